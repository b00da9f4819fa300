// # netdisc-core
//
// Core library for network device discovery and liveness monitoring.
//
// ## Architecture Overview
//
// - **Prober**: Trait for ICMP reachability and SNMP system-info queries
// - **Classifier**: Ordered rules mapping sysDescr/hostname to vendor, type and OS
// - **AssignmentResolver**: Prioritised department/unit placement
// - **DiscoveryOrchestrator**: Enumerate → probe → classify → assign → upsert
// - **StatusMonitor**: Re-probes known devices and records transitions
// - **DeviceStore**: Trait for the inventory (devices, status history, buckets, queue)
// - **InventoryEngine**: Scheduled loop tying monitor and discovery together
// - **ComponentRegistry**: Plugin-based registry for probers and stores
//
// ## Design Principles
//
// 1. **Pure decisions**: classification and assignment rules are plain functions
// 2. **Per-IP atomicity**: every device read-modify-write runs under that IP's lock
// 3. **Explicit events**: transitions are returned and sent on a channel, no hooks
// 4. **Partial results**: one IP's failure never aborts a run

pub mod assign;
pub mod cancel;
pub mod classify;
pub mod config;
pub mod discovery;
pub mod engine;
pub mod error;
pub mod events;
pub mod exclusion;
pub mod locks;
pub mod model;
pub mod monitor;
pub mod registry;
pub mod state;
pub mod targets;
pub mod traits;

// Re-export core types for convenience
pub use assign::{AssignmentResolver, AssignmentSource, AssignmentTarget};
pub use classify::Classifier;
pub use config::DiscoveryConfig;
pub use discovery::{DiscoveryOrchestrator, DiscoveryStage, IpFailure, RunSummary};
pub use engine::InventoryEngine;
pub use error::{Error, Result};
pub use events::{ClassificationChange, EventSink, InventoryEvent, StatusChange};
pub use exclusion::ExclusionFilter;
pub use locks::IpLocks;
pub use model::{Device, DeviceStatus};
pub use monitor::{MonitorSummary, Reconciliation, StatusMonitor};
pub use registry::ComponentRegistry;
pub use state::{FileDeviceStore, MemoryDeviceStore};
pub use targets::{ScanTarget, expand_targets};
pub use traits::{DeviceStore, Liveness, ProbeResult, Prober};
