// # File Device Store
//
// File-based implementation of DeviceStore with crash recovery.
//
// ## Purpose
//
// Persists the inventory (devices, status history, departments, units and
// the discovery queue) across daemon restarts and crashes.
//
// ## Crash Recovery
//
// - Atomic writes: Uses write-then-rename for atomicity
// - All-or-nothing mutations: changes become visible only after the write
// - Corruption detection: Validates JSON on load
// - Automatic backup: Keeps .backup of last known good state
// - Recovery: Falls back to backup if corruption detected
//
// ## File Format
//
// ```json
// {
//   "version": "1.0",
//   "inventory": {
//     "devices": { "1": { "ip_address": "192.168.1.2", ... } },
//     "history": [ { "id": 1, "device_id": 1, "status": "offline", ... } ],
//     "departments": [ { "id": 1, "name": "Unknown" } ],
//     "units": [ { "id": 1, "department_id": 1, "name": "Unknown" } ],
//     "queue": {},
//     "sequences": { "device": 2, ... }
//   }
// }
// ```

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::{Mutex, RwLock};

use crate::Error;
use crate::config::StoreConfig;
use crate::model::{
    Department, Device, DeviceStatus, NewDevice, NewQueueEntry, QueueEntry, QueueStatus,
    StatusHistoryEntry, Unit,
};
use crate::state::data::InventoryData;
use crate::traits::device_store::{DeviceStore, DeviceStoreFactory};

/// Inventory file format version
/// Used for future migration if format changes
const STORE_FILE_VERSION: &str = "1.0";

/// File-based device store with crash recovery
///
/// Every mutation is written through to disk before the call returns. A
/// mutation whose write fails is discarded, so memory never runs ahead of
/// the file.
///
/// # Example
///
/// ```rust,no_run
/// use netdisc_core::state::FileDeviceStore;
/// use netdisc_core::traits::DeviceStore;
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let store = FileDeviceStore::new("/var/lib/netdisc/inventory.json").await?;
///
///     // Atomically written to disk
///     store.ensure_unknown_bucket("Unknown", "Unknown").await?;
///
///     let devices = store.list_devices().await?;
///     println!("{} devices", devices.len());
///
///     Ok(())
/// }
/// ```
#[derive(Debug)]
pub struct FileDeviceStore {
    path: PathBuf,
    state: Arc<RwLock<InventoryData>>,
    /// Serialises writers so a newer snapshot is never overwritten by an older one
    write_lock: Mutex<()>,
}

/// Serializable store file format
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
struct StoreFileFormat {
    version: String,
    inventory: InventoryData,
}

impl FileDeviceStore {
    /// Create or load a file device store
    ///
    /// This will:
    /// 1. Try to load existing store file
    /// 2. If corruption detected, try to load from backup
    /// 3. If both fail, start with empty inventory
    /// 4. Create parent directories if needed
    pub async fn new<P: AsRef<Path>>(path: P) -> Result<Self, Error> {
        let path = path.as_ref().to_path_buf();

        // Create parent directory if it doesn't exist
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
            && !parent.exists()
        {
            fs::create_dir_all(parent).await.map_err(|e| {
                Error::config(format!(
                    "Failed to create store directory {}: {}",
                    parent.display(),
                    e
                ))
            })?;
        }

        let data = Self::load_with_recovery(&path).await?;

        Ok(Self {
            path,
            state: Arc::new(RwLock::new(data)),
            write_lock: Mutex::new(()),
        })
    }

    /// Load inventory from file with automatic recovery
    ///
    /// Recovery strategy:
    /// 1. Try to load main store file
    /// 2. If it is corrupted, try loading backup
    /// 3. If backup also fails, start with empty inventory
    async fn load_with_recovery(path: &Path) -> Result<InventoryData, Error> {
        match Self::load(path).await {
            Ok(data) => {
                tracing::debug!("Loaded inventory from file: {} devices", data.device_count());
                Ok(data)
            }
            Err(LoadError::Io(e)) => Err(e),
            Err(LoadError::Corrupt(e)) => {
                tracing::warn!(
                    "Store file appears corrupted: {}. Attempting recovery from backup.",
                    e
                );

                let backup_path = Self::backup_path(path);
                if !backup_path.exists() {
                    tracing::warn!("No backup file found. Starting with empty inventory.");
                    return Ok(InventoryData::default());
                }

                match Self::load(&backup_path).await {
                    Ok(data) => {
                        tracing::info!(
                            "Recovered inventory from backup: {} devices",
                            data.device_count()
                        );

                        // Restore corrupted file from backup
                        if let Err(restore_err) = Self::restore_from_backup(path, &backup_path).await
                        {
                            tracing::error!(
                                "Failed to restore store file from backup: {}",
                                restore_err
                            );
                        }

                        Ok(data)
                    }
                    Err(backup_err) => {
                        tracing::error!(
                            "Backup also unusable: {}. Starting with empty inventory.",
                            backup_err
                        );
                        Ok(InventoryData::default())
                    }
                }
            }
        }
    }

    /// Load inventory from file
    async fn load(path: &Path) -> Result<InventoryData, LoadError> {
        if !path.exists() {
            tracing::debug!("Store file does not exist: {}", path.display());
            return Ok(InventoryData::default());
        }

        let content = fs::read_to_string(path).await.map_err(|e| {
            LoadError::Io(Error::store(format!(
                "Failed to read store file {}: {}",
                path.display(),
                e
            )))
        })?;

        let file: StoreFileFormat = serde_json::from_str(&content).map_err(|e| {
            LoadError::Corrupt(Error::store(format!(
                "Failed to parse store file {}: {}",
                path.display(),
                e
            )))
        })?;

        if file.version != STORE_FILE_VERSION {
            tracing::warn!(
                "Store file version mismatch: expected {}, got {}. \
                Attempting to load anyway.",
                STORE_FILE_VERSION,
                file.version
            );
        }

        let mut data = file.inventory;
        data.reindex().map_err(LoadError::Corrupt)?;
        Ok(data)
    }

    /// Write the current inventory to file atomically
    async fn write_state(&self) -> Result<(), Error> {
        let _writer = self.write_lock.lock().await;
        let snapshot = self.state.read().await.clone();
        self.persist(&snapshot).await
    }

    /// Write `data` to file atomically; the caller holds `write_lock`
    async fn persist(&self, data: &InventoryData) -> Result<(), Error> {
        let file = StoreFileFormat {
            version: STORE_FILE_VERSION.to_string(),
            inventory: data.clone(),
        };
        let json = serde_json::to_string_pretty(&file)
            .map_err(|e| Error::store(format!("Failed to serialize inventory: {}", e)))?;

        // Write to temporary file first
        let temp_path = self.temp_path();
        {
            let mut file = fs::File::create(&temp_path).await.map_err(|e| {
                Error::store(format!(
                    "Failed to create temp file {}: {}",
                    temp_path.display(),
                    e
                ))
            })?;

            file.write_all(json.as_bytes()).await.map_err(|e| {
                Error::store(format!(
                    "Failed to write to temp file {}: {}",
                    temp_path.display(),
                    e
                ))
            })?;

            file.sync_all().await.map_err(|e| {
                Error::store(format!(
                    "Failed to sync temp file {}: {}",
                    temp_path.display(),
                    e
                ))
            })?;
        }

        // Create backup of current file (if it exists)
        if self.path.exists() {
            let backup_path = Self::backup_path(&self.path);
            if let Err(e) = fs::copy(&self.path, &backup_path).await {
                tracing::warn!("Failed to create backup: {}", e);
            }
        }

        // Atomic rename (temp -> actual)
        fs::rename(&temp_path, &self.path).await.map_err(|e| {
            Error::store(format!(
                "Failed to rename {} to {}: {}",
                temp_path.display(),
                self.path.display(),
                e
            ))
        })?;

        tracing::trace!("Inventory written to file: {}", self.path.display());
        Ok(())
    }

    /// Restore store file from backup
    async fn restore_from_backup(path: &Path, backup_path: &Path) -> Result<(), Error> {
        fs::copy(backup_path, path).await.map_err(|e| {
            Error::store(format!(
                "Failed to restore from backup {} to {}: {}",
                backup_path.display(),
                path.display(),
                e
            ))
        })?;

        tracing::info!("Restored store file from backup");
        Ok(())
    }

    /// Get path to temporary file for atomic writes
    fn temp_path(&self) -> PathBuf {
        let mut temp = self.path.clone();
        temp.set_extension("tmp");
        temp
    }

    /// Get path to backup file
    fn backup_path(path: &Path) -> PathBuf {
        let mut backup = path.to_path_buf();
        backup.set_extension("backup");
        backup
    }

    /// Apply a mutation to a copy, write it through, then publish it
    async fn mutate<T>(
        &self,
        f: impl FnOnce(&mut InventoryData) -> Result<T, Error>,
    ) -> Result<T, Error> {
        let _writer = self.write_lock.lock().await;

        let mut next = self.state.read().await.clone();
        let value = f(&mut next)?;

        self.persist(&next).await?;
        *self.state.write().await = next;
        Ok(value)
    }

    /// Force immediate write to disk
    pub async fn sync(&self) -> Result<(), Error> {
        self.write_state().await
    }
}

/// Distinguishes unreadable files from corrupted content
enum LoadError {
    Io(Error),
    Corrupt(Error),
}

impl std::fmt::Display for LoadError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LoadError::Io(e) | LoadError::Corrupt(e) => e.fmt(f),
        }
    }
}

#[async_trait]
impl DeviceStore for FileDeviceStore {
    async fn get_device(&self, ip: IpAddr) -> Result<Option<Device>, Error> {
        Ok(self.state.read().await.get_device(ip))
    }

    async fn get_device_by_id(&self, id: i64) -> Result<Option<Device>, Error> {
        Ok(self.state.read().await.get_device_by_id(id))
    }

    async fn insert_device(&self, device: NewDevice) -> Result<Device, Error> {
        self.mutate(|data| data.insert_device(device)).await
    }

    async fn update_device(&self, device: &Device) -> Result<Device, Error> {
        self.mutate(|data| data.update_device(device)).await
    }

    async fn list_devices(&self) -> Result<Vec<Device>, Error> {
        Ok(self.state.read().await.list_devices())
    }

    async fn delete_device(&self, id: i64) -> Result<(), Error> {
        self.mutate(|data| {
            data.delete_device(id);
            Ok(())
        })
        .await
    }

    async fn append_status(
        &self,
        device_id: i64,
        status: DeviceStatus,
        changed_at: DateTime<Utc>,
    ) -> Result<StatusHistoryEntry, Error> {
        self.mutate(|data| data.append_status(device_id, status, changed_at))
            .await
    }

    async fn record_transition(
        &self,
        device: &Device,
        changed_at: DateTime<Utc>,
    ) -> Result<(Device, StatusHistoryEntry), Error> {
        self.mutate(|data| data.record_transition(device, changed_at))
            .await
    }

    async fn latest_status(&self, device_id: i64) -> Result<Option<StatusHistoryEntry>, Error> {
        Ok(self.state.read().await.latest_status(device_id))
    }

    async fn status_history(
        &self,
        device_id: i64,
        from: Option<DateTime<Utc>>,
        to: Option<DateTime<Utc>>,
    ) -> Result<Vec<StatusHistoryEntry>, Error> {
        Ok(self.state.read().await.status_history(device_id, from, to))
    }

    async fn find_department(&self, name: &str) -> Result<Option<Department>, Error> {
        Ok(self.state.read().await.find_department(name))
    }

    async fn get_or_create_department(&self, name: &str) -> Result<Department, Error> {
        if let Some(existing) = self.find_department(name).await? {
            return Ok(existing);
        }
        self.mutate(|data| data.get_or_create_department(name).map(|(d, _)| d))
            .await
    }

    async fn find_unit(&self, department_id: i64, name: &str) -> Result<Option<Unit>, Error> {
        Ok(self.state.read().await.find_unit(department_id, name))
    }

    async fn get_or_create_unit(&self, department_id: i64, name: &str) -> Result<Unit, Error> {
        if let Some(existing) = self.find_unit(department_id, name).await? {
            return Ok(existing);
        }
        self.mutate(|data| data.get_or_create_unit(department_id, name).map(|(u, _)| u))
            .await
    }

    async fn enqueue(&self, entry: NewQueueEntry) -> Result<QueueEntry, Error> {
        self.mutate(|data| Ok(data.enqueue(entry))).await
    }

    async fn complete_queue_entry(
        &self,
        id: i64,
        status: QueueStatus,
        error: Option<String>,
    ) -> Result<(), Error> {
        self.mutate(|data| data.complete_queue_entry(id, status, error))
            .await
    }

    async fn list_queue(&self) -> Result<Vec<QueueEntry>, Error> {
        Ok(self.state.read().await.list_queue())
    }

    async fn purge_queue(&self, before: DateTime<Utc>) -> Result<usize, Error> {
        // Skip the rewrite when nothing expired
        if self.state.read().await.expired_queue_entries(before) == 0 {
            return Ok(0);
        }
        self.mutate(|data| Ok(data.purge_queue(before))).await
    }

    async fn flush(&self) -> Result<(), Error> {
        // Mutations are already on disk; rewrite so a removed file comes back
        self.write_state().await
    }
}

/// Factory registered under `"file"`
pub struct FileDeviceStoreFactory;

#[async_trait]
impl DeviceStoreFactory for FileDeviceStoreFactory {
    async fn create(&self, config: &StoreConfig) -> Result<Box<dyn DeviceStore>, Error> {
        match config {
            StoreConfig::File { path } => {
                if path.is_empty() {
                    return Err(Error::config("File store path cannot be empty"));
                }
                Ok(Box::new(FileDeviceStore::new(path).await?))
            }
            other => Err(Error::config(format!(
                "File store factory cannot build a '{}' store",
                other.type_name()
            ))),
        }
    }
}
