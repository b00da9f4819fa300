// # Device Store Implementations
//
// This module provides implementations of the DeviceStore trait for
// different persistence strategies.

mod data;
pub mod file;
pub mod memory;

pub use file::{FileDeviceStore, FileDeviceStoreFactory};
pub use memory::{MemoryDeviceStore, MemoryDeviceStoreFactory};
