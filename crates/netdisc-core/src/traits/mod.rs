//! Core traits for the discovery engine
//!
//! This module defines the abstract interfaces that all implementations must follow.
//!
//! - [`Prober`]: Probe one IP address over ICMP/SNMP
//! - [`DeviceStore`]: Persist devices, status history and organisational buckets

pub mod device_store;
pub mod prober;

pub use device_store::{DeviceStore, DeviceStoreFactory};
pub use prober::{Liveness, ProbeResult, Prober, ProberFactory};
