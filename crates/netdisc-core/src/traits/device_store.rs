// # Device Store Trait
//
// Defines the interface for the inventory persistence layer.
//
// ## Purpose
//
// The device store owns:
// - Device records, unique by IP address
// - The append-only status history of each device
// - Department and unit buckets (including the "Unknown" sentinel)
// - The transient discovery queue audit trail
//
// ## Implementations
//
// - Memory: `MemoryDeviceStore`
// - File: `FileDeviceStore` (JSON snapshot with crash recovery)
// - Future: a relational database behind the same trait
//
// ## Usage
//
// ```rust,ignore
// use netdisc_core::DeviceStore;
//
// #[tokio::main]
// async fn main() -> anyhow::Result<()> {
//     let store = /* DeviceStore implementation */;
//
//     let device = store.get_device("192.168.1.20".parse()?).await?;
//     if let Some(device) = device {
//         let history = store.status_history(device.id, None, None).await?;
//     }
//
//     Ok(())
// }
// ```

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::net::IpAddr;

use crate::model::{
    Department, Device, DeviceStatus, NewDevice, NewQueueEntry, QueueEntry, QueueStatus,
    StatusHistoryEntry, Unit,
};

/// Trait for device store implementations
///
/// Implementations must be thread-safe and usable across async tasks.
///
/// # Consistency Contract
///
/// - `insert_device` fails with `Error::Conflict` if the IP already exists;
///   the caller re-reads and retries.
/// - `update_device` replaces a device row by id and never changes its IP.
/// - `delete_device` cascades to the device's status history.
/// - `record_transition` writes the device row and its history row together;
///   on error neither is visible.
/// - `get_or_create_department` / `get_or_create_unit` are lookup-or-create
///   keyed on name / `(department_id, name)` and never create duplicates.
///
/// # Forbidden Capabilities
/// - ❌ Decide whether a device should be reassigned (owned by the orchestrator)
/// - ❌ Decide whether a status row is needed (owned by the transition recorder)
/// - ❌ Perform network I/O to probed hosts
#[async_trait]
pub trait DeviceStore: Send + Sync {
    /// Get a device by IP address
    async fn get_device(&self, ip: IpAddr) -> Result<Option<Device>, crate::Error>;

    /// Get a device by id
    async fn get_device_by_id(&self, id: i64) -> Result<Option<Device>, crate::Error>;

    /// Insert a new device
    ///
    /// # Returns
    ///
    /// - `Ok(Device)`: The stored device with id and timestamps assigned
    /// - `Err(Error::Conflict)`: A device with this IP already exists
    async fn insert_device(&self, device: NewDevice) -> Result<Device, crate::Error>;

    /// Replace an existing device row
    ///
    /// # Returns
    ///
    /// - `Ok(Device)`: The stored device (with `updated_at` refreshed)
    /// - `Err(Error::NotFound)`: No device with this id
    async fn update_device(&self, device: &Device) -> Result<Device, crate::Error>;

    /// List all devices, ordered by id
    async fn list_devices(&self) -> Result<Vec<Device>, crate::Error>;

    /// Delete a device and its status history
    async fn delete_device(&self, id: i64) -> Result<(), crate::Error>;

    /// Append a status history row
    async fn append_status(
        &self,
        device_id: i64,
        status: DeviceStatus,
        changed_at: DateTime<Utc>,
    ) -> Result<StatusHistoryEntry, crate::Error>;

    /// Replace a device row and append one history row for its new status
    ///
    /// # Returns
    ///
    /// - `Ok((Device, StatusHistoryEntry))`: Both rows as stored
    /// - `Err(Error)`: Nothing was written
    async fn record_transition(
        &self,
        device: &Device,
        changed_at: DateTime<Utc>,
    ) -> Result<(Device, StatusHistoryEntry), crate::Error>;

    /// Most recent status history row for a device
    async fn latest_status(
        &self,
        device_id: i64,
    ) -> Result<Option<StatusHistoryEntry>, crate::Error>;

    /// Status history for a device, oldest first, optionally bounded in time
    async fn status_history(
        &self,
        device_id: i64,
        from: Option<DateTime<Utc>>,
        to: Option<DateTime<Utc>>,
    ) -> Result<Vec<StatusHistoryEntry>, crate::Error>;

    /// Look up a department by name
    async fn find_department(&self, name: &str) -> Result<Option<Department>, crate::Error>;

    /// Look up a department by name, creating it if missing
    async fn get_or_create_department(&self, name: &str) -> Result<Department, crate::Error>;

    /// Look up a unit by `(department_id, name)`
    async fn find_unit(&self, department_id: i64, name: &str)
    -> Result<Option<Unit>, crate::Error>;

    /// Look up a unit by `(department_id, name)`, creating it if missing
    async fn get_or_create_unit(&self, department_id: i64, name: &str)
    -> Result<Unit, crate::Error>;

    /// Record a raw probe attempt as `pending`
    async fn enqueue(&self, entry: NewQueueEntry) -> Result<QueueEntry, crate::Error>;

    /// Move a queue entry to `processed` or `failed`
    async fn complete_queue_entry(
        &self,
        id: i64,
        status: QueueStatus,
        error: Option<String>,
    ) -> Result<(), crate::Error>;

    /// List queue entries, ordered by id
    async fn list_queue(&self) -> Result<Vec<QueueEntry>, crate::Error>;

    /// Remove completed queue entries created before `before`
    ///
    /// Pending entries are kept. Returns the number of entries removed.
    async fn purge_queue(&self, before: DateTime<Utc>) -> Result<usize, crate::Error>;

    /// Persist any pending changes
    ///
    /// Some implementations may buffer writes. This ensures
    /// all changes are flushed to persistent storage.
    async fn flush(&self) -> Result<(), crate::Error>;

    /// Ensure the sentinel department and its unit exist
    async fn ensure_unknown_bucket(
        &self,
        department: &str,
        unit: &str,
    ) -> Result<(Department, Unit), crate::Error> {
        let department = self.get_or_create_department(department).await?;
        let unit = self.get_or_create_unit(department.id, unit).await?;
        Ok((department, unit))
    }
}

/// Helper trait for constructing device stores from configuration
#[async_trait]
pub trait DeviceStoreFactory: Send + Sync {
    /// Create a DeviceStore instance from configuration
    ///
    /// # Parameters
    ///
    /// - `config`: Configuration specific to this store
    async fn create(
        &self,
        config: &crate::config::StoreConfig,
    ) -> Result<Box<dyn DeviceStore>, crate::Error>;
}
