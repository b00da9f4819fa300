//! Inventory engine
//!
//! The InventoryEngine is responsible for:
//! - Running the status monitor on a fixed cadence
//! - Running scheduled discovery over all configured subnets (optional)
//! - Serving one-shot discovery and monitor requests
//! - Flushing the device store on shutdown
//!
//! ## Architecture
//!
//! ```text
//!                 ┌──────────────────┐
//!  interval ─────►│ InventoryEngine  │◄──── shutdown
//!                 └──────────────────┘
//!                    │            │
//!          ┌─────────┘            └──────────┐
//!          ▼                                 ▼
//! ┌──────────────────────┐        ┌───────────────────┐
//! │ DiscoveryOrchestrator│        │   StatusMonitor   │
//! └──────────────────────┘        └───────────────────┘
//!          │   │                          │   │
//!          │   └──── IpLocks (per IP) ────┘   │
//!          ▼                                  ▼
//!   ┌─────────────┐   ┌─────────────┐   ┌─────────────┐
//!   │   Prober    │   │ DeviceStore │   │   Events    │
//!   └─────────────┘   └─────────────┘   └─────────────┘
//! ```
//!
//! ## Shutdown
//!
//! A shutdown signal during a cycle cancels it cooperatively: no new probes
//! are issued, in-flight probes finish and persist, then the store is flushed.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::MissedTickBehavior;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::IntervalStream;
use tracing::{debug, error, info};

use crate::cancel;
use crate::config::DiscoveryConfig;
use crate::discovery::{DiscoveryOrchestrator, RunSummary};
use crate::error::Result;
use crate::events::{EventSink, InventoryEvent};
use crate::locks::IpLocks;
use crate::monitor::{MonitorSummary, StatusMonitor};
use crate::targets::ScanTarget;
use crate::traits::{DeviceStore, Prober};

/// Core inventory engine
///
/// ## Lifecycle
///
/// 1. Create with [`InventoryEngine::new()`]
/// 2. Either call [`discover()`](Self::discover) / [`monitor_once()`](Self::monitor_once)
///    for one-shot work, or [`run()`](Self::run) for the scheduled loop
/// 3. The loop runs until a shutdown signal is received
///
/// ## Load Resistance
///
/// - **Bounded worker pool**: at most `engine.concurrency` probes in flight
/// - **Bounded event channel**: a slow notifier drops events instead of stalling probes
/// - **Missed ticks skipped**: a cycle that overruns its interval is not replayed
pub struct InventoryEngine {
    discovery: DiscoveryOrchestrator,
    monitor: StatusMonitor,
    store: Arc<dyn DeviceStore>,
    monitor_interval: Duration,
    discovery_interval: Option<Duration>,
}

impl InventoryEngine {
    /// Create a new inventory engine
    ///
    /// # Parameters
    ///
    /// - `prober`: Prober implementation
    /// - `store`: Device store implementation
    /// - `config`: Discovery configuration (validated here)
    ///
    /// # Returns
    ///
    /// A tuple of (engine, event_receiver) where event_receiver yields inventory events
    pub fn new(
        prober: Box<dyn Prober>,
        store: Box<dyn DeviceStore>,
        config: DiscoveryConfig,
    ) -> Result<(Self, mpsc::Receiver<InventoryEvent>)> {
        config.validate()?;

        let prober: Arc<dyn Prober> = Arc::from(prober);
        let store: Arc<dyn DeviceStore> = Arc::from(store);
        let (events, rx) = EventSink::channel(config.engine.event_channel_capacity);
        let locks = IpLocks::new();

        let discovery = DiscoveryOrchestrator::new(
            prober.clone(),
            store.clone(),
            &config,
            locks.clone(),
            events.clone(),
        )?;
        let monitor = StatusMonitor::new(prober, store.clone(), &config.engine, locks, events);

        let discovery_interval = match config.engine.discovery_interval_secs {
            0 => None,
            secs if config.subnets.is_empty() => {
                info!(
                    "Scheduled discovery every {}s requested but no subnets configured; disabled",
                    secs
                );
                None
            }
            secs => Some(Duration::from_secs(secs)),
        };

        let engine = Self {
            discovery,
            monitor,
            store,
            monitor_interval: Duration::from_secs(config.engine.monitor_interval_secs),
            discovery_interval,
        };

        Ok((engine, rx))
    }

    pub fn discovery(&self) -> &DiscoveryOrchestrator {
        &self.discovery
    }

    pub fn monitor(&self) -> &StatusMonitor {
        &self.monitor
    }

    pub fn store(&self) -> &Arc<dyn DeviceStore> {
        &self.store
    }

    /// One-shot discovery run, flushing the store afterwards
    pub async fn discover(&self, target: &ScanTarget) -> Result<RunSummary> {
        let summary = self.discovery.run(target).await?;
        self.store.flush().await?;
        Ok(summary)
    }

    /// One-shot monitor cycle, flushing the store afterwards
    pub async fn monitor_once(&self) -> Result<MonitorSummary> {
        let summary = self.monitor.reconcile_all(cancel::never()).await?;
        self.store.flush().await?;
        Ok(summary)
    }

    /// Run the scheduled loop until Ctrl-C
    pub async fn run(&self) -> Result<()> {
        self.run_with_shutdown(None).await
    }

    /// Run the scheduled loop until `shutdown_rx` fires (or Ctrl-C when `None`)
    ///
    /// Cycle failures are logged and the loop continues; only the final
    /// store flush can fail the call.
    pub async fn run_with_shutdown(&self, shutdown_rx: Option<oneshot::Receiver<()>>) -> Result<()> {
        let shutdown = async move {
            match shutdown_rx {
                Some(rx) => {
                    let _ = rx.await;
                }
                None => {
                    let _ = tokio::signal::ctrl_c().await;
                }
            }
        };
        tokio::pin!(shutdown);

        let (cancel_tx, cancel_rx) = cancel::channel();

        let mut monitor_ticks = ticks(self.monitor_interval);
        let mut discovery_ticks = self.discovery_interval.map(ticks);

        info!(
            "Inventory engine started: monitor every {}s, discovery {}",
            self.monitor_interval.as_secs(),
            match self.discovery_interval {
                Some(interval) => format!("every {}s", interval.as_secs()),
                None => "on demand".to_string(),
            }
        );

        loop {
            let work = tokio::select! {
                _ = &mut shutdown => break,
                Some(_) = monitor_ticks.next() => Work::Monitor,
                Some(_) = next_tick(&mut discovery_ticks) => Work::Discovery,
            };

            let cycle = self.run_cycle(work, cancel_rx.clone());
            tokio::pin!(cycle);

            let stopping = tokio::select! {
                _ = &mut cycle => false,
                _ = &mut shutdown => {
                    info!("Shutdown requested; letting in-flight probes finish");
                    let _ = cancel_tx.send(true);
                    cycle.await;
                    true
                }
            };
            if stopping {
                break;
            }
        }

        info!("Shutdown signal received");
        self.store.flush().await?;
        info!("Device store flushed, engine stopped");
        Ok(())
    }

    async fn run_cycle(&self, work: Work, cancel: watch::Receiver<bool>) {
        match work {
            Work::Monitor => {
                debug!("Monitor tick");
                if let Err(e) = self.monitor.reconcile_all(cancel).await {
                    error!("Monitor cycle failed: {}", e);
                }
            }
            Work::Discovery => {
                debug!("Discovery tick");
                if let Err(e) = self
                    .discovery
                    .run_with_cancel(&ScanTarget::AllConfigured, cancel)
                    .await
                {
                    error!("Scheduled discovery failed: {}", e);
                }
            }
        }
        if let Err(e) = self.store.flush().await {
            error!("Failed to flush device store: {}", e);
        }
    }
}

enum Work {
    Monitor,
    Discovery,
}

fn ticks(period: Duration) -> IntervalStream {
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
    IntervalStream::new(interval)
}

async fn next_tick(ticks: &mut Option<IntervalStream>) -> Option<tokio::time::Instant> {
    match ticks {
        Some(stream) => stream.next().await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::MemoryDeviceStore;
    use crate::traits::{Liveness, ProbeResult};
    use async_trait::async_trait;
    use std::net::IpAddr;

    struct SilentProber;

    #[async_trait]
    impl Prober for SilentProber {
        async fn probe(&self, _ip: IpAddr) -> Result<ProbeResult> {
            Ok(ProbeResult::Unreachable)
        }

        async fn ping(&self, _ip: IpAddr) -> Result<Liveness> {
            Ok(Liveness::Dead)
        }

        fn prober_name(&self) -> &'static str {
            "silent"
        }
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let mut config = DiscoveryConfig::default();
        config.engine.concurrency = 0;
        let result = InventoryEngine::new(
            Box::new(SilentProber),
            Box::new(MemoryDeviceStore::new()),
            config,
        );
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_first_tick_runs_monitor() {
        let (engine, mut rx) = InventoryEngine::new(
            Box::new(SilentProber),
            Box::new(MemoryDeviceStore::new()),
            DiscoveryConfig::default(),
        )
        .unwrap();

        let (tx, shutdown_rx) = oneshot::channel();
        let handle = tokio::spawn(async move { engine.run_with_shutdown(Some(shutdown_rx)).await });

        let event = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap();
        assert!(matches!(event, Some(InventoryEvent::MonitorCompleted(_))));

        tx.send(()).unwrap();
        handle.await.unwrap().unwrap();
    }
}
