//! Status monitor
//!
//! Re-probes known devices and records online/offline transitions.
//!
//! ## Reconcile
//!
//! ```text
//! ping(ip) ──► Err ──────────────► log, NoChange (never marks offline)
//!    │
//!    ▼
//! lock(ip) ─► fresh read ─► same liveness ─► heartbeat write, NoChange
//!                        └► different ────► device + history row in one write
//!                                            emit StatusChanged
//! ```
//!
//! A history row is appended only when the observed liveness differs from
//! the stored one, so the ledger holds exactly the real transitions.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::net::IpAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::cancel::{self, CancelReceiver};
use crate::config::EngineConfig;
use crate::error::Result;
use crate::events::{EventSink, InventoryEvent, StatusChange};
use crate::locks::IpLocks;
use crate::model::{Device, DeviceStatus};
use crate::traits::{DeviceStore, ProbeResult, Prober};

/// Result of reconciling one device
#[derive(Debug, Clone, PartialEq)]
pub enum Reconciliation {
    Changed(StatusChange),
    NoChange,
}

/// Totals for one monitor cycle
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MonitorSummary {
    /// 1-based cycle counter
    pub cycle: u64,
    pub checked: usize,
    pub changed: usize,
    pub online: usize,
    pub offline: usize,
    /// Probe or store failures; the affected devices kept their state
    pub errors: usize,
    pub snmp_refreshed: bool,
    pub cancelled: bool,
    pub changes: Vec<StatusChange>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl MonitorSummary {
    fn new(cycle: u64, snmp_refreshed: bool) -> Self {
        let now = Utc::now();
        Self {
            cycle,
            checked: 0,
            changed: 0,
            online: 0,
            offline: 0,
            errors: 0,
            snmp_refreshed,
            cancelled: false,
            changes: Vec::new(),
            started_at: now,
            finished_at: now,
        }
    }

    fn count_status(&mut self, alive: bool) {
        if alive {
            self.online += 1;
        } else {
            self.offline += 1;
        }
    }
}

enum Observation {
    Changed(StatusChange),
    Unchanged { alive: bool },
    ProbeFailed,
    Vanished,
}

/// Write a liveness transition: device and history row together, then event
///
/// `device` already carries the new liveness. Shared by discovery and the
/// monitor so both paths produce identical history. A failed write leaves
/// the stored liveness untouched, so the next observation retries it.
pub(crate) async fn record_transition(
    store: &dyn DeviceStore,
    events: &EventSink,
    old_status: DeviceStatus,
    device: Device,
    changed_at: DateTime<Utc>,
) -> Result<StatusChange> {
    let (stored, entry) = store.record_transition(&device, changed_at).await?;
    let new_status = entry.status;

    info!("{}: {} -> {}", stored.ip_address, old_status, new_status);

    let change = StatusChange {
        device: stored,
        old_status,
        new_status,
    };
    events.emit(InventoryEvent::StatusChanged(change.clone()));
    Ok(change)
}

/// Periodic liveness checker for known devices
#[derive(Clone)]
pub struct StatusMonitor {
    prober: Arc<dyn Prober>,
    store: Arc<dyn DeviceStore>,
    locks: IpLocks,
    events: EventSink,
    concurrency: usize,
    batch_size: usize,
    snmp_refresh_cycles: u64,
    cycles: Arc<AtomicU64>,
}

impl StatusMonitor {
    pub fn new(
        prober: Arc<dyn Prober>,
        store: Arc<dyn DeviceStore>,
        config: &EngineConfig,
        locks: IpLocks,
        events: EventSink,
    ) -> Self {
        Self {
            prober,
            store,
            locks,
            events,
            concurrency: config.concurrency.max(1),
            batch_size: config.monitor_batch_size.max(1),
            snmp_refresh_cycles: config.snmp_refresh_cycles,
            cycles: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Re-probe one device and record a transition if its liveness changed
    ///
    /// A probe error is logged and reported as `NoChange`. Store errors are
    /// returned.
    pub async fn reconcile(&self, device: &Device) -> Result<Reconciliation> {
        match self.observe(device, false).await? {
            Observation::Changed(change) => Ok(Reconciliation::Changed(change)),
            _ => Ok(Reconciliation::NoChange),
        }
    }

    /// Reconcile every known device in batches
    ///
    /// Only a failure to list devices aborts the cycle. After cancellation no
    /// new probes start; in-flight ones finish and persist.
    pub async fn reconcile_all(&self, mut cancel: CancelReceiver) -> Result<MonitorSummary> {
        let cycle = self.cycles.fetch_add(1, Ordering::Relaxed) + 1;
        let refresh_snmp = self.snmp_refresh_cycles > 0 && cycle % self.snmp_refresh_cycles == 0;
        let mut summary = MonitorSummary::new(cycle, refresh_snmp);

        let devices = self.store.list_devices().await?;
        debug!(
            "Monitor cycle {}: {} devices, snmp refresh: {}",
            cycle,
            devices.len(),
            refresh_snmp
        );

        for batch in devices.chunks(self.batch_size) {
            if cancel::is_cancelled(&cancel) {
                summary.cancelled = true;
                break;
            }
            self.run_batch(batch, refresh_snmp, &mut summary, &mut cancel)
                .await;
        }

        summary.finished_at = Utc::now();
        info!(
            "Monitor cycle {} finished: {} checked, {} changed, {} online, {} offline, {} errors{}",
            cycle,
            summary.checked,
            summary.changed,
            summary.online,
            summary.offline,
            summary.errors,
            if summary.cancelled { " (cancelled)" } else { "" }
        );
        self.events
            .emit(InventoryEvent::MonitorCompleted(summary.clone()));
        Ok(summary)
    }

    async fn run_batch(
        &self,
        batch: &[Device],
        refresh_snmp: bool,
        summary: &mut MonitorSummary,
        cancel: &mut CancelReceiver,
    ) {
        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let mut tasks = JoinSet::new();

        for device in batch {
            if cancel::is_cancelled(cancel) {
                summary.cancelled = true;
                break;
            }
            let permit = tokio::select! {
                biased;
                _ = cancel::cancelled(cancel) => {
                    summary.cancelled = true;
                    break;
                }
                permit = semaphore.clone().acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };

            let monitor = self.clone();
            let device = device.clone();
            tasks.spawn(async move {
                let _permit = permit;
                let ip = device.ip_address;
                (ip, monitor.observe(&device, refresh_snmp).await)
            });
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((_, Ok(Observation::Changed(change)))) => {
                    summary.checked += 1;
                    summary.changed += 1;
                    summary.count_status(change.new_status.is_online());
                    summary.changes.push(change);
                }
                Ok((_, Ok(Observation::Unchanged { alive }))) => {
                    summary.checked += 1;
                    summary.count_status(alive);
                }
                Ok((_, Ok(Observation::ProbeFailed))) => {
                    summary.checked += 1;
                    summary.errors += 1;
                }
                Ok((_, Ok(Observation::Vanished))) => {}
                Ok((ip, Err(e))) => {
                    summary.checked += 1;
                    summary.errors += 1;
                    warn!("{}: monitor update failed: {}", ip, e);
                }
                Err(e) => {
                    summary.errors += 1;
                    error!("Monitor worker panicked: {}", e);
                }
            }
        }
    }

    async fn observe(&self, device: &Device, refresh_snmp: bool) -> Result<Observation> {
        let ip = device.ip_address;

        let (alive, probe) = match self.check(ip, refresh_snmp).await {
            Ok(observed) => observed,
            Err(e) => {
                warn!(
                    "{}: liveness probe failed, keeping {}: {}",
                    ip,
                    device.status(),
                    e
                );
                return Ok(Observation::ProbeFailed);
            }
        };

        let _guard = self.locks.lock(ip).await;

        // Fresh read: discovery may have written this device since the list
        let Some(current) = self.store.get_device_by_id(device.id).await? else {
            debug!("{}: device {} removed during monitor cycle", ip, device.id);
            return Ok(Observation::Vanished);
        };

        let now = Utc::now();
        let mut next = current.clone();
        next.is_alive = alive;
        if alive {
            next.last_seen = Some(now);
        }
        if let Some(result) = probe.filter(|r| r.is_reachable()) {
            match result.snmp() {
                Some(snmp) => {
                    next.snmp = snmp.clone();
                    next.snmp_available = true;
                }
                None => next.snmp_available = false,
            }
        }

        if current.is_alive != alive {
            let change =
                record_transition(self.store.as_ref(), &self.events, current.status(), next, now)
                    .await?;
            return Ok(Observation::Changed(change));
        }

        if next != current {
            self.store.update_device(&next).await?;
        }
        Ok(Observation::Unchanged { alive })
    }

    /// Liveness, plus the full probe result on SNMP refresh cycles
    async fn check(&self, ip: IpAddr, refresh_snmp: bool) -> Result<(bool, Option<ProbeResult>)> {
        if refresh_snmp {
            let result = self.prober.probe(ip).await?;
            Ok((result.is_reachable(), Some(result)))
        } else {
            let liveness = self.prober.ping(ip).await?;
            Ok((liveness.is_alive(), None))
        }
    }
}
