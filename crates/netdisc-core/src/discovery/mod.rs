//! Discovery orchestrator
//!
//! Drives one discovery run over a scan target:
//!
//! ```text
//! Enumerating ─► Probing(ip) ─► Classifying ─► Assigning ─► Upserting ─► Done
//!                    │                                          │
//!                    ├─► Skipped (excluded hostname)            │
//!                    └─► Failed(ip): recorded, run continues ◄──┘
//! ```
//!
//! IPs are processed by a bounded pool of tasks. Order does not affect the
//! outcome, only reporting order. The upsert for one IP runs under that IP's
//! lock so concurrent runs (or a monitor cycle) cannot clobber each other.
//!
//! ## Upsert rule
//!
//! - New IP: classification and assignment computed, Device inserted with
//!   `auto_assigned = true`.
//! - Existing, `auto_assigned = true`: everything recomputed and overwritten.
//! - Existing, `auto_assigned = false`: department/unit are left untouched.
//! - Unreachable: unknown IPs are skipped; known online devices go offline
//!   through the same transition recorder as the status monitor.

mod summary;

pub use summary::{DiscoveryStage, IpFailure, RunSummary};

use chrono::Utc;
use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::assign::AssignmentResolver;
use crate::cancel::{self, CancelReceiver};
use crate::classify::Classifier;
use crate::config::DiscoveryConfig;
use crate::error::{Error, Result};
use crate::events::{ClassificationChange, EventSink, InventoryEvent};
use crate::exclusion::ExclusionFilter;
use crate::locks::IpLocks;
use crate::model::{
    Classification, Device, DeviceStatus, NewDevice, NewQueueEntry, QueueStatus, SnmpSystemInfo,
};
use crate::monitor::record_transition;
use crate::targets::{ScanTarget, expand_targets};
use crate::traits::{DeviceStore, ProbeResult, Prober};

/// What one reachable probe told us about an IP
struct Observation {
    ip: IpAddr,
    hostname: Option<String>,
    snmp: Option<SnmpSystemInfo>,
    classification: Classification,
}

enum IpOutcome {
    /// Excluded after probing (hostname pattern); nothing written
    Skipped,
    /// Unreachable; known devices were marked offline
    Offline,
    /// Reachable and upserted
    Online {
        created: Option<Device>,
        changed: bool,
    },
}

type StageResult<T> = std::result::Result<T, (DiscoveryStage, Error)>;

fn at(stage: DiscoveryStage) -> impl FnOnce(Error) -> (DiscoveryStage, Error) {
    move |e| (stage, e)
}

/// Discovery orchestrator
///
/// Cheap to clone; all clones share the prober, store, locks and event sink.
#[derive(Clone)]
pub struct DiscoveryOrchestrator {
    prober: Arc<dyn Prober>,
    store: Arc<dyn DeviceStore>,
    classifier: Arc<Classifier>,
    resolver: Arc<AssignmentResolver>,
    exclusions: Arc<ExclusionFilter>,
    locks: IpLocks,
    events: EventSink,
    subnets: Arc<Vec<String>>,
    concurrency: usize,
    max_hosts: usize,
    record_queue: bool,
    queue_retention: Option<chrono::Duration>,
    resolve_hostnames: bool,
    metadata: Arc<std::collections::HashMap<String, String>>,
}

impl DiscoveryOrchestrator {
    /// Build an orchestrator from validated configuration
    ///
    /// Rule compilation errors (bad regex, malformed CIDR) surface here as
    /// `Error::Config`. Overlapping assignment ranges are logged once.
    pub fn new(
        prober: Arc<dyn Prober>,
        store: Arc<dyn DeviceStore>,
        config: &DiscoveryConfig,
        locks: IpLocks,
        events: EventSink,
    ) -> Result<Self> {
        config.validate()?;

        let classifier = Classifier::from_config(&config.classification)?;
        let resolver = AssignmentResolver::new(&config.assignment, store.clone())?;
        let exclusions = ExclusionFilter::new(&config.exclusions)?;

        Ok(Self {
            prober,
            store,
            classifier: Arc::new(classifier),
            resolver: Arc::new(resolver),
            exclusions: Arc::new(exclusions),
            locks,
            events,
            subnets: Arc::new(config.subnets.clone()),
            concurrency: config.engine.concurrency,
            max_hosts: config.engine.max_hosts_per_run,
            record_queue: config.engine.record_queue,
            queue_retention: match config.engine.queue_retention_secs {
                0 => None,
                secs => i64::try_from(secs).ok().and_then(chrono::Duration::try_seconds),
            },
            resolve_hostnames: config.probe.resolve_hostnames,
            metadata: Arc::new(config.engine.metadata.clone()),
        })
    }

    pub fn classifier(&self) -> &Classifier {
        &self.classifier
    }

    pub fn resolver(&self) -> &AssignmentResolver {
        &self.resolver
    }

    /// Run discovery to completion
    pub async fn run(&self, target: &ScanTarget) -> Result<RunSummary> {
        self.run_with_cancel(target, cancel::never()).await
    }

    /// Run discovery with cooperative cancellation
    ///
    /// Returns `Err` only for failures before probing starts: a bad target,
    /// or a store that cannot provide the "Unknown" bucket. Per-IP failures
    /// are collected in the summary.
    pub async fn run_with_cancel(
        &self,
        target: &ScanTarget,
        mut cancel: CancelReceiver,
    ) -> Result<RunSummary> {
        let label = target.to_string();
        let mut summary = RunSummary::new(label.clone(), (*self.metadata).clone());

        let hosts = expand_targets(target, &self.subnets, &self.exclusions, self.max_hosts)?;
        self.resolver.ensure_unknown_bucket().await?;

        summary.candidates = hosts.len();
        info!("Discovery {}: {} candidate hosts", label, hosts.len());
        self.events.emit(InventoryEvent::RunStarted {
            target: label.clone(),
            candidates: hosts.len(),
        });

        let semaphore = Arc::new(Semaphore::new(self.concurrency.max(1)));
        let mut tasks = JoinSet::new();

        for ip in hosts {
            if cancel::is_cancelled(&cancel) {
                summary.cancelled = true;
                break;
            }
            let permit = tokio::select! {
                biased;
                _ = cancel::cancelled(&mut cancel) => {
                    summary.cancelled = true;
                    break;
                }
                permit = semaphore.clone().acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };

            let this = self.clone();
            tasks.spawn(async move {
                let _permit = permit;
                (ip, this.process_ip(IpAddr::V4(ip)).await)
            });
        }

        if summary.cancelled {
            info!(
                "Discovery {} cancelled; waiting for {} in-flight probes",
                label,
                tasks.len()
            );
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((ip, outcome)) => self.tally(&mut summary, ip, outcome),
                Err(e) => {
                    summary.errors += 1;
                    error!("Discovery worker panicked: {}", e);
                }
            }
        }

        summary.finish();
        info!(
            "Discovery {} finished: {} probed, {} online, {} offline, {} new, {} updated, {} skipped, {} errors{}",
            label,
            summary.probed,
            summary.online,
            summary.offline,
            summary.new_devices.len(),
            summary.updated,
            summary.skipped,
            summary.errors,
            if summary.cancelled { " (cancelled)" } else { "" }
        );
        self.expire_queue().await;
        self.events.emit(InventoryEvent::RunCompleted(summary.clone()));
        Ok(summary)
    }

    /// Drop completed queue entries older than the retention window
    async fn expire_queue(&self) {
        let Some(retention) = self.queue_retention else {
            return;
        };
        let before = Utc::now() - retention;
        match self.store.purge_queue(before).await {
            Ok(0) => {}
            Ok(purged) => debug!("Purged {} discovery queue entries before {}", purged, before),
            Err(e) => warn!("Could not purge discovery queue: {}", e),
        }
    }

    fn tally(
        &self,
        summary: &mut RunSummary,
        ip: Ipv4Addr,
        outcome: std::result::Result<IpOutcome, IpFailure>,
    ) {
        match outcome {
            Ok(IpOutcome::Skipped) => {
                summary.probed += 1;
                summary.skipped += 1;
            }
            Ok(IpOutcome::Offline) => {
                summary.probed += 1;
                summary.offline += 1;
            }
            Ok(IpOutcome::Online { created, changed }) => {
                summary.probed += 1;
                summary.online += 1;
                match created {
                    Some(device) => summary.new_devices.push(device),
                    None if changed => summary.updated += 1,
                    None => {}
                }
            }
            Err(failure) => {
                if failure.stage != DiscoveryStage::Probing {
                    summary.probed += 1;
                }
                summary.errors += 1;
                warn!(
                    "{}: discovery failed while {}: {}",
                    ip, failure.stage, failure.message
                );
                self.events.emit(InventoryEvent::IpFailed {
                    ip: failure.ip,
                    stage: failure.stage,
                    message: failure.message.clone(),
                });
                summary.failures.push(failure);
            }
        }
    }

    /// Full pipeline for one IP, bracketed by its discovery queue entry
    async fn process_ip(&self, ip: IpAddr) -> std::result::Result<IpOutcome, IpFailure> {
        let probed = self.prober.probe(ip).await;
        let queue_id = self.enqueue(ip, &probed).await;

        let outcome = match probed {
            Ok(result) => self.handle(ip, result).await,
            Err(e) => Err((DiscoveryStage::Probing, e)),
        };

        let outcome = outcome.map_err(|(stage, e)| IpFailure {
            ip,
            stage,
            message: e.to_string(),
        });
        self.complete_queue(ip, queue_id, &outcome).await;
        outcome
    }

    async fn handle(&self, ip: IpAddr, result: ProbeResult) -> StageResult<IpOutcome> {
        if !result.is_reachable() {
            return self.mark_unreachable(ip).await;
        }

        let snmp = result.snmp().cloned();
        let hostname = self.hostname_for(ip, snmp.as_ref()).await;

        if let Some(name) = hostname.as_deref()
            && self.exclusions.is_excluded_hostname(name)
        {
            debug!("{}: hostname '{}' is excluded, skipping", ip, name);
            return Ok(IpOutcome::Skipped);
        }

        let classification = self.classifier.classify(
            snmp.as_ref().and_then(|s| s.sys_descr.as_deref()),
            hostname.as_deref(),
        );
        debug!(
            "{}: classified as {} (vendor {:?}, os {:?})",
            ip, classification.device_type, classification.vendor, classification.os
        );

        let observation = Observation {
            ip,
            hostname,
            snmp,
            classification,
        };

        let _guard = self.locks.lock(ip).await;
        match self.upsert(&observation).await {
            Err((_, e)) if e.is_conflict() => {
                warn!("{}: store conflict, retrying with a fresh read: {}", ip, e);
                self.upsert(&observation).await
            }
            other => other,
        }
    }

    /// SNMP sysName first, reverse DNS second
    async fn hostname_for(&self, ip: IpAddr, snmp: Option<&SnmpSystemInfo>) -> Option<String> {
        let sys_name = snmp
            .and_then(|s| s.sys_name.as_deref())
            .map(str::trim)
            .filter(|name| !name.is_empty());
        if let Some(name) = sys_name {
            return Some(name.to_string());
        }
        if self.resolve_hostnames {
            return self.prober.lookup_hostname(ip).await;
        }
        None
    }

    async fn mark_unreachable(&self, ip: IpAddr) -> StageResult<IpOutcome> {
        let _guard = self.locks.lock(ip).await;

        let existing = self
            .store
            .get_device(ip)
            .await
            .map_err(at(DiscoveryStage::Upserting))?;

        match existing {
            None => {
                debug!("{}: unreachable, not in inventory", ip);
                Ok(IpOutcome::Offline)
            }
            Some(device) if device.is_alive => {
                let mut next = device;
                next.is_alive = false;
                record_transition(
                    self.store.as_ref(),
                    &self.events,
                    DeviceStatus::Online,
                    next,
                    Utc::now(),
                )
                .await
                .map_err(at(DiscoveryStage::Upserting))?;
                Ok(IpOutcome::Offline)
            }
            Some(_) => Ok(IpOutcome::Offline),
        }
    }

    /// Read-modify-write of one Device; caller holds the IP lock
    async fn upsert(&self, obs: &Observation) -> StageResult<IpOutcome> {
        let now = Utc::now();

        let existing = self
            .store
            .get_device(obs.ip)
            .await
            .map_err(at(DiscoveryStage::Upserting))?;

        let Some(existing) = existing else {
            let (assignment, target) = self
                .resolver
                .resolve(
                    obs.ip,
                    obs.hostname.as_deref(),
                    &obs.classification,
                    obs.snmp.as_ref(),
                )
                .await
                .map_err(at(DiscoveryStage::Assigning))?;

            let device = self
                .store
                .insert_device(NewDevice {
                    ip_address: obs.ip,
                    hostname: obs.hostname.clone(),
                    is_alive: true,
                    snmp_available: obs.snmp.is_some(),
                    snmp: obs.snmp.clone().unwrap_or_default(),
                    classification: obs.classification.clone(),
                    department_id: assignment.department_id,
                    unit_id: assignment.unit_id,
                    auto_assigned: true,
                    last_seen: Some(now),
                })
                .await
                .map_err(at(DiscoveryStage::Upserting))?;

            info!(
                "{}: discovered {} device, assigned to {}/{}",
                obs.ip, device.classification.device_type, target.department, target.unit
            );
            self.events.emit(InventoryEvent::DeviceDiscovered {
                device: device.clone(),
            });
            return Ok(IpOutcome::Online {
                created: Some(device),
                changed: true,
            });
        };

        let mut next = existing.clone();
        if obs.hostname.is_some() {
            next.hostname = obs.hostname.clone();
        }
        next.snmp_available = obs.snmp.is_some();
        if let Some(snmp) = &obs.snmp {
            next.snmp = snmp.clone();
        }
        next.classification = obs.classification.clone();

        if existing.auto_assigned {
            let (assignment, _) = self
                .resolver
                .resolve(
                    obs.ip,
                    next.hostname.as_deref(),
                    &next.classification,
                    obs.snmp.as_ref(),
                )
                .await
                .map_err(at(DiscoveryStage::Assigning))?;
            next.department_id = assignment.department_id;
            next.unit_id = assignment.unit_id;
        }

        next.is_alive = true;
        next.last_seen = Some(now);

        let changed = !existing.same_observed_state(&next);

        let stored = if existing.is_alive {
            self.store
                .update_device(&next)
                .await
                .map_err(at(DiscoveryStage::Upserting))?
        } else {
            record_transition(
                self.store.as_ref(),
                &self.events,
                DeviceStatus::Offline,
                next,
                now,
            )
            .await
            .map_err(at(DiscoveryStage::Upserting))?
            .device
        };

        if existing.classification != stored.classification
            || existing.assignment() != stored.assignment()
        {
            info!(
                "{}: classification changed from {} to {}",
                obs.ip, existing.classification.device_type, stored.classification.device_type
            );
            self.events
                .emit(InventoryEvent::ClassificationChanged(ClassificationChange {
                    old_classification: existing.classification.clone(),
                    new_classification: stored.classification.clone(),
                    old_assignment: existing.assignment(),
                    new_assignment: stored.assignment(),
                    device: stored,
                }));
        }

        Ok(IpOutcome::Online {
            created: None,
            changed,
        })
    }

    async fn enqueue(&self, ip: IpAddr, probed: &Result<ProbeResult>) -> Option<i64> {
        if !self.record_queue {
            return None;
        }

        let entry = NewQueueEntry {
            ip_address: ip,
            is_alive: probed.as_ref().is_ok_and(ProbeResult::is_reachable),
            snmp: probed.as_ref().ok().and_then(|r| r.snmp().cloned()),
        };

        match self.store.enqueue(entry).await {
            Ok(entry) => Some(entry.id),
            Err(e) => {
                warn!("{}: could not record discovery queue entry: {}", ip, e);
                None
            }
        }
    }

    async fn complete_queue(
        &self,
        ip: IpAddr,
        queue_id: Option<i64>,
        outcome: &std::result::Result<IpOutcome, IpFailure>,
    ) {
        let Some(id) = queue_id else {
            return;
        };

        let (status, message) = match outcome {
            Ok(_) => (QueueStatus::Processed, None),
            Err(failure) => (
                QueueStatus::Failed,
                Some(format!("{}: {}", failure.stage, failure.message)),
            ),
        };

        if let Err(e) = self.store.complete_queue_entry(id, status, message).await {
            warn!("{}: could not complete discovery queue entry {}: {}", ip, id, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::MemoryDeviceStore;
    use crate::traits::Liveness;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::time::Duration;

    /// Fixed answers per IP; anything else is unreachable
    struct FixedProber {
        answers: HashMap<IpAddr, ProbeResult>,
    }

    #[async_trait]
    impl Prober for FixedProber {
        async fn probe(&self, ip: IpAddr) -> Result<ProbeResult> {
            Ok(self
                .answers
                .get(&ip)
                .cloned()
                .unwrap_or(ProbeResult::Unreachable))
        }

        async fn ping(&self, ip: IpAddr) -> Result<Liveness> {
            Ok(match self.answers.get(&ip) {
                Some(r) if r.is_reachable() => Liveness::Alive {
                    rtt: Duration::from_millis(1),
                },
                _ => Liveness::Dead,
            })
        }

        fn prober_name(&self) -> &'static str {
            "fixed"
        }
    }

    fn printer_snmp() -> SnmpSystemInfo {
        SnmpSystemInfo {
            sys_descr: Some("HP ETHERNET MULTI-ENVIRONMENT, JETDIRECT".into()),
            sys_name: Some("prn-floor2".into()),
            ..SnmpSystemInfo::default()
        }
    }

    fn orchestrator(
        answers: Vec<(&str, ProbeResult)>,
        store: &MemoryDeviceStore,
    ) -> DiscoveryOrchestrator {
        let prober = FixedProber {
            answers: answers
                .into_iter()
                .map(|(ip, r)| (ip.parse().unwrap(), r))
                .collect(),
        };
        let mut config = DiscoveryConfig::default();
        config.probe.resolve_hostnames = false;
        let (events, _rx) = EventSink::channel(64);
        DiscoveryOrchestrator::new(
            Arc::new(prober),
            Arc::new(store.clone()),
            &config,
            IpLocks::new(),
            events,
        )
        .unwrap()
    }

    async fn device(store: &MemoryDeviceStore, ip: &str) -> Device {
        store.get_device(ip.parse().unwrap()).await.unwrap().unwrap()
    }

    #[tokio::test]
    async fn test_new_device_is_classified_and_recorded() {
        let store = MemoryDeviceStore::new();
        let discovery = orchestrator(
            vec![(
                "10.0.0.2",
                ProbeResult::ReachableWithSnmp {
                    rtt: Duration::from_millis(2),
                    snmp: printer_snmp(),
                },
            )],
            &store,
        );

        let summary = discovery
            .run(&"10.0.0.0/30".parse().unwrap())
            .await
            .unwrap();
        assert_eq!(summary.candidates, 2);
        assert_eq!(summary.new_devices.len(), 1);
        assert_eq!(summary.online, 1);
        assert_eq!(summary.offline, 1);

        let printer = device(&store, "10.0.0.2").await;
        assert_eq!(printer.hostname.as_deref(), Some("prn-floor2"));
        assert_eq!(printer.classification.device_type, "printer");
        assert!(printer.snmp_available && printer.auto_assigned);

        let queue = store.list_queue().await.unwrap();
        assert_eq!(queue.len(), 2);
        assert!(queue.iter().all(|e| e.status == QueueStatus::Processed));
    }

    #[tokio::test]
    async fn test_known_device_goes_offline_once() {
        let store = MemoryDeviceStore::new();
        let online = orchestrator(
            vec![(
                "10.0.0.2",
                ProbeResult::ReachableNoSnmp {
                    rtt: Duration::from_millis(2),
                },
            )],
            &store,
        );
        online.run(&"10.0.0.0/30".parse().unwrap()).await.unwrap();

        let offline = orchestrator(vec![], &store);
        let target = "10.0.0.0/30".parse().unwrap();
        offline.run(&target).await.unwrap();
        offline.run(&target).await.unwrap();

        let d = device(&store, "10.0.0.2").await;
        assert!(!d.is_alive);
        let history = store.status_history(d.id, None, None).await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].status, DeviceStatus::Offline);
    }

    #[tokio::test]
    async fn test_expired_queue_entries_are_purged_after_a_run() {
        let store = MemoryDeviceStore::new();
        let prober = FixedProber {
            answers: HashMap::new(),
        };
        let mut config = DiscoveryConfig::default();
        config.probe.resolve_hostnames = false;
        config.engine.queue_retention_secs = 1;
        let (events, _rx) = EventSink::channel(64);
        let discovery = DiscoveryOrchestrator::new(
            Arc::new(prober),
            Arc::new(store.clone()),
            &config,
            IpLocks::new(),
            events,
        )
        .unwrap();

        discovery.run(&"10.0.0.0/30".parse().unwrap()).await.unwrap();
        assert_eq!(store.list_queue().await.unwrap().len(), 2);

        tokio::time::sleep(Duration::from_millis(1100)).await;
        discovery.run(&"10.0.1.0/30".parse().unwrap()).await.unwrap();

        let queue = store.list_queue().await.unwrap();
        assert_eq!(queue.len(), 2);
        assert!(
            queue
                .iter()
                .all(|e| e.ip_address.to_string().starts_with("10.0.1."))
        );
    }

    #[tokio::test]
    async fn test_invalid_target_aborts_before_probing() {
        let store = MemoryDeviceStore::new();
        let discovery = orchestrator(vec![], &store);
        let err = discovery
            .run(&ScanTarget::Cidr("10.0.0.0/99".into()))
            .await
            .unwrap_err();
        assert!(err.is_config());
        assert!(store.list_queue().await.unwrap().is_empty());
    }
}
