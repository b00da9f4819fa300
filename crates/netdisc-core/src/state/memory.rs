// # Memory Device Store
//
// In-memory implementation of DeviceStore.
//
// ## Purpose
//
// Provides a simple, fast store that doesn't persist across restarts.
// Useful for testing, one-shot discovery runs, or embedding the engine
// in front of an external database that is synchronised from events.
//
// ## Crash Behavior
//
// - All inventory is lost on restart/crash
// - First run after a crash rediscovers every reachable device as new

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::net::IpAddr;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::Error;
use crate::config::StoreConfig;
use crate::model::{
    Department, Device, DeviceStatus, NewDevice, NewQueueEntry, QueueEntry, QueueStatus,
    StatusHistoryEntry, Unit,
};
use crate::state::data::InventoryData;
use crate::traits::device_store::{DeviceStore, DeviceStoreFactory};

/// In-memory device store implementation
///
/// This implementation stores all tables behind a single RwLock.
/// It provides no persistence across restarts.
///
/// # Example
///
/// ```rust,no_run
/// use netdisc_core::state::MemoryDeviceStore;
/// use netdisc_core::traits::DeviceStore;
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let store = MemoryDeviceStore::new();
///
///     let (department, unit) = store.ensure_unknown_bucket("Unknown", "Unknown").await?;
///     assert_eq!(department.name, "Unknown");
///     assert_eq!(unit.department_id, department.id);
///
///     Ok(())
/// }
/// ```
#[derive(Debug, Clone, Default)]
pub struct MemoryDeviceStore {
    inner: Arc<RwLock<InventoryData>>,
}

impl MemoryDeviceStore {
    /// Create a new empty memory store
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the number of devices in the store
    pub async fn len(&self) -> usize {
        self.inner.read().await.device_count()
    }

    /// Check if the store has no devices
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl DeviceStore for MemoryDeviceStore {
    async fn get_device(&self, ip: IpAddr) -> Result<Option<Device>, Error> {
        Ok(self.inner.read().await.get_device(ip))
    }

    async fn get_device_by_id(&self, id: i64) -> Result<Option<Device>, Error> {
        Ok(self.inner.read().await.get_device_by_id(id))
    }

    async fn insert_device(&self, device: NewDevice) -> Result<Device, Error> {
        self.inner.write().await.insert_device(device)
    }

    async fn update_device(&self, device: &Device) -> Result<Device, Error> {
        self.inner.write().await.update_device(device)
    }

    async fn list_devices(&self) -> Result<Vec<Device>, Error> {
        Ok(self.inner.read().await.list_devices())
    }

    async fn delete_device(&self, id: i64) -> Result<(), Error> {
        self.inner.write().await.delete_device(id);
        Ok(())
    }

    async fn append_status(
        &self,
        device_id: i64,
        status: DeviceStatus,
        changed_at: DateTime<Utc>,
    ) -> Result<StatusHistoryEntry, Error> {
        self.inner
            .write()
            .await
            .append_status(device_id, status, changed_at)
    }

    async fn record_transition(
        &self,
        device: &Device,
        changed_at: DateTime<Utc>,
    ) -> Result<(Device, StatusHistoryEntry), Error> {
        self.inner
            .write()
            .await
            .record_transition(device, changed_at)
    }

    async fn latest_status(&self, device_id: i64) -> Result<Option<StatusHistoryEntry>, Error> {
        Ok(self.inner.read().await.latest_status(device_id))
    }

    async fn status_history(
        &self,
        device_id: i64,
        from: Option<DateTime<Utc>>,
        to: Option<DateTime<Utc>>,
    ) -> Result<Vec<StatusHistoryEntry>, Error> {
        Ok(self.inner.read().await.status_history(device_id, from, to))
    }

    async fn find_department(&self, name: &str) -> Result<Option<Department>, Error> {
        Ok(self.inner.read().await.find_department(name))
    }

    async fn get_or_create_department(&self, name: &str) -> Result<Department, Error> {
        self.inner
            .write()
            .await
            .get_or_create_department(name)
            .map(|(department, _)| department)
    }

    async fn find_unit(&self, department_id: i64, name: &str) -> Result<Option<Unit>, Error> {
        Ok(self.inner.read().await.find_unit(department_id, name))
    }

    async fn get_or_create_unit(&self, department_id: i64, name: &str) -> Result<Unit, Error> {
        self.inner
            .write()
            .await
            .get_or_create_unit(department_id, name)
            .map(|(unit, _)| unit)
    }

    async fn enqueue(&self, entry: NewQueueEntry) -> Result<QueueEntry, Error> {
        Ok(self.inner.write().await.enqueue(entry))
    }

    async fn complete_queue_entry(
        &self,
        id: i64,
        status: QueueStatus,
        error: Option<String>,
    ) -> Result<(), Error> {
        self.inner
            .write()
            .await
            .complete_queue_entry(id, status, error)
    }

    async fn list_queue(&self) -> Result<Vec<QueueEntry>, Error> {
        Ok(self.inner.read().await.list_queue())
    }

    async fn purge_queue(&self, before: DateTime<Utc>) -> Result<usize, Error> {
        Ok(self.inner.write().await.purge_queue(before))
    }

    async fn flush(&self) -> Result<(), Error> {
        // No-op for memory store (everything is already "persisted")
        Ok(())
    }
}

/// Factory registered under `"memory"`
pub struct MemoryDeviceStoreFactory;

#[async_trait]
impl DeviceStoreFactory for MemoryDeviceStoreFactory {
    async fn create(&self, config: &StoreConfig) -> Result<Box<dyn DeviceStore>, Error> {
        match config {
            StoreConfig::Memory => Ok(Box::new(MemoryDeviceStore::new())),
            other => Err(Error::config(format!(
                "Memory store factory cannot build a '{}' store",
                other.type_name()
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Classification, SnmpSystemInfo};

    fn new_device(ip: &str) -> NewDevice {
        NewDevice {
            ip_address: ip.parse().unwrap(),
            hostname: Some("ws-reception".into()),
            is_alive: true,
            snmp_available: false,
            snmp: SnmpSystemInfo::default(),
            classification: Classification::unknown(),
            department_id: None,
            unit_id: None,
            auto_assigned: true,
            last_seen: Some(Utc::now()),
        }
    }

    #[tokio::test]
    async fn test_memory_store_basic() {
        let store = MemoryDeviceStore::new();

        // Initially empty
        assert!(store.is_empty().await);

        // Insert and get
        let device = store.insert_device(new_device("192.168.1.2")).await.unwrap();
        assert_eq!(store.len().await, 1);

        let by_ip = store.get_device(device.ip_address).await.unwrap();
        assert_eq!(by_ip.as_ref().map(|d| d.id), Some(device.id));

        // Delete
        store.delete_device(device.id).await.unwrap();
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn test_memory_store_history_range() {
        let store = MemoryDeviceStore::new();
        let device = store.insert_device(new_device("192.168.1.2")).await.unwrap();

        let t0 = Utc::now();
        let t1 = t0 + chrono::Duration::minutes(5);
        let t2 = t0 + chrono::Duration::minutes(10);
        store.append_status(device.id, DeviceStatus::Offline, t0).await.unwrap();
        store.append_status(device.id, DeviceStatus::Online, t1).await.unwrap();
        store.append_status(device.id, DeviceStatus::Offline, t2).await.unwrap();

        let latest = store.latest_status(device.id).await.unwrap().unwrap();
        assert_eq!(latest.status, DeviceStatus::Offline);
        assert_eq!(latest.changed_at, t2);

        let window = store
            .status_history(device.id, Some(t1), Some(t2))
            .await
            .unwrap();
        assert_eq!(window.len(), 2);
        assert_eq!(window[0].status, DeviceStatus::Online);
    }

    #[tokio::test]
    async fn test_memory_factory_rejects_other_types() {
        let factory = MemoryDeviceStoreFactory;
        assert!(factory.create(&StoreConfig::Memory).await.is_ok());
        let file = StoreConfig::File {
            path: "/tmp/x.json".into(),
        };
        assert!(factory.create(&file).await.is_err());
    }
}
