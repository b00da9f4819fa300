//! Outbound inventory events
//!
//! Events are handed to an external notifier through a bounded channel.
//! Nothing in the core blocks on a slow consumer: when the channel is full
//! the event is dropped and a warning is logged.

use serde::Serialize;
use std::net::IpAddr;
use tokio::sync::mpsc;
use tracing::warn;

use crate::discovery::{DiscoveryStage, RunSummary};
use crate::model::{Assignment, Classification, Device, DeviceStatus};
use crate::monitor::MonitorSummary;

/// A liveness transition that was written to the status history
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusChange {
    /// Device as stored after the transition
    pub device: Device,
    pub old_status: DeviceStatus,
    pub new_status: DeviceStatus,
}

/// Classification or assignment diff produced by a discovery upsert
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClassificationChange {
    /// Device as stored after the change
    pub device: Device,
    pub old_classification: Classification,
    pub new_classification: Classification,
    pub old_assignment: Assignment,
    pub new_assignment: Assignment,
}

/// Events emitted by discovery runs and monitor cycles
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum InventoryEvent {
    /// Discovery run started
    RunStarted {
        target: String,
        candidates: usize,
    },

    /// A Device was created for a previously unknown IP
    DeviceDiscovered { device: Device },

    /// Online/offline transition recorded in the history
    StatusChanged(StatusChange),

    /// Vendor/type/os or department/unit changed on an existing Device
    ClassificationChanged(ClassificationChange),

    /// One IP failed; the run continued
    IpFailed {
        ip: IpAddr,
        stage: DiscoveryStage,
        message: String,
    },

    /// Discovery run finished (possibly cancelled)
    RunCompleted(RunSummary),

    /// Status monitor cycle finished (possibly cancelled)
    MonitorCompleted(MonitorSummary),
}

/// Cloneable handle that emits events without ever awaiting the consumer
#[derive(Debug, Clone)]
pub struct EventSink {
    tx: mpsc::Sender<InventoryEvent>,
}

impl EventSink {
    /// Create a sink and the receiver the notifier reads from
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<InventoryEvent>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }

    pub fn emit(&self, event: InventoryEvent) {
        match self.tx.try_send(event) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!(
                    "Event channel full, dropping event. Consider increasing event_channel_capacity."
                );
            }
            // Nobody is listening; events are optional for callers
            Err(mpsc::error::TrySendError::Closed(_)) => {}
        }
    }
}
