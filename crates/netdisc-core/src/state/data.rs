// # Inventory Data
//
// The in-memory table set shared by the memory and file stores.
//
// Each store wraps one `InventoryData` behind a lock; all consistency rules
// (unique IP, cascade delete, lookup-or-create buckets) live here so both
// stores enforce them identically.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::net::IpAddr;

use crate::Error;
use crate::model::{
    Department, Device, DeviceStatus, NewDevice, NewQueueEntry, QueueEntry, QueueStatus,
    StatusHistoryEntry, Unit,
};

/// Next id per table (auto-increment)
#[derive(Debug, Clone, Serialize, Deserialize)]
struct Sequences {
    device: i64,
    history: i64,
    department: i64,
    unit: i64,
    queue: i64,
}

impl Default for Sequences {
    fn default() -> Self {
        Self {
            device: 1,
            history: 1,
            department: 1,
            unit: 1,
            queue: 1,
        }
    }
}

fn next(seq: &mut i64) -> i64 {
    let id = *seq;
    *seq += 1;
    id
}

/// All inventory tables
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub(crate) struct InventoryData {
    #[serde(default)]
    devices: BTreeMap<i64, Device>,
    #[serde(default)]
    history: Vec<StatusHistoryEntry>,
    #[serde(default)]
    departments: Vec<Department>,
    #[serde(default)]
    units: Vec<Unit>,
    #[serde(default)]
    queue: BTreeMap<i64, QueueEntry>,
    #[serde(default)]
    sequences: Sequences,

    /// Unique index on `devices.ip_address`, rebuilt after load
    #[serde(skip)]
    ip_index: HashMap<IpAddr, i64>,
}

impl InventoryData {
    /// Rebuild derived indexes after deserialization
    pub(crate) fn reindex(&mut self) -> Result<(), Error> {
        self.ip_index.clear();
        for device in self.devices.values() {
            if self.ip_index.insert(device.ip_address, device.id).is_some() {
                return Err(Error::store(format!(
                    "Duplicate IP {} in stored inventory",
                    device.ip_address
                )));
            }
        }
        Ok(())
    }

    pub(crate) fn device_count(&self) -> usize {
        self.devices.len()
    }

    pub(crate) fn get_device(&self, ip: IpAddr) -> Option<Device> {
        self.ip_index
            .get(&ip)
            .and_then(|id| self.devices.get(id))
            .cloned()
    }

    pub(crate) fn get_device_by_id(&self, id: i64) -> Option<Device> {
        self.devices.get(&id).cloned()
    }

    pub(crate) fn insert_device(&mut self, new: NewDevice) -> Result<Device, Error> {
        if self.ip_index.contains_key(&new.ip_address) {
            return Err(Error::conflict(format!(
                "Device with IP {} already exists",
                new.ip_address
            )));
        }
        let id = next(&mut self.sequences.device);
        let device = new.into_device(id, Utc::now());
        self.ip_index.insert(device.ip_address, id);
        self.devices.insert(id, device.clone());
        Ok(device)
    }

    pub(crate) fn update_device(&mut self, device: &Device) -> Result<Device, Error> {
        let stored = self
            .devices
            .get_mut(&device.id)
            .ok_or_else(|| Error::not_found(format!("Device {}", device.id)))?;

        if stored.ip_address != device.ip_address {
            return Err(Error::invalid_input(format!(
                "Device {} IP cannot change from {} to {}",
                device.id, stored.ip_address, device.ip_address
            )));
        }

        let created_at = stored.created_at;
        *stored = device.clone();
        stored.created_at = created_at;
        stored.updated_at = Utc::now();
        Ok(stored.clone())
    }

    pub(crate) fn list_devices(&self) -> Vec<Device> {
        self.devices.values().cloned().collect()
    }

    pub(crate) fn delete_device(&mut self, id: i64) -> bool {
        match self.devices.remove(&id) {
            Some(device) => {
                self.ip_index.remove(&device.ip_address);
                self.history.retain(|entry| entry.device_id != id);
                true
            }
            None => false,
        }
    }

    pub(crate) fn append_status(
        &mut self,
        device_id: i64,
        status: DeviceStatus,
        changed_at: DateTime<Utc>,
    ) -> Result<StatusHistoryEntry, Error> {
        if !self.devices.contains_key(&device_id) {
            return Err(Error::not_found(format!("Device {}", device_id)));
        }
        let entry = StatusHistoryEntry {
            id: next(&mut self.sequences.history),
            device_id,
            status,
            changed_at,
        };
        self.history.push(entry.clone());
        Ok(entry)
    }

    pub(crate) fn record_transition(
        &mut self,
        device: &Device,
        changed_at: DateTime<Utc>,
    ) -> Result<(Device, StatusHistoryEntry), Error> {
        let stored = self.update_device(device)?;
        let entry = self.append_status(stored.id, stored.status(), changed_at)?;
        Ok((stored, entry))
    }

    pub(crate) fn latest_status(&self, device_id: i64) -> Option<StatusHistoryEntry> {
        self.history
            .iter()
            .filter(|entry| entry.device_id == device_id)
            .max_by_key(|entry| (entry.changed_at, entry.id))
            .cloned()
    }

    pub(crate) fn status_history(
        &self,
        device_id: i64,
        from: Option<DateTime<Utc>>,
        to: Option<DateTime<Utc>>,
    ) -> Vec<StatusHistoryEntry> {
        let mut entries: Vec<_> = self
            .history
            .iter()
            .filter(|entry| entry.device_id == device_id)
            .filter(|entry| from.is_none_or(|from| entry.changed_at >= from))
            .filter(|entry| to.is_none_or(|to| entry.changed_at <= to))
            .cloned()
            .collect();
        entries.sort_by_key(|entry| (entry.changed_at, entry.id));
        entries
    }

    pub(crate) fn find_department(&self, name: &str) -> Option<Department> {
        self.departments.iter().find(|d| d.name == name).cloned()
    }

    /// Returns the department and whether it was created
    pub(crate) fn get_or_create_department(&mut self, name: &str) -> Result<(Department, bool), Error> {
        if name.trim().is_empty() {
            return Err(Error::invalid_input("Department name cannot be empty"));
        }
        if let Some(existing) = self.find_department(name) {
            return Ok((existing, false));
        }
        let department = Department {
            id: next(&mut self.sequences.department),
            name: name.to_string(),
        };
        self.departments.push(department.clone());
        Ok((department, true))
    }

    pub(crate) fn find_unit(&self, department_id: i64, name: &str) -> Option<Unit> {
        self.units
            .iter()
            .find(|u| u.department_id == department_id && u.name == name)
            .cloned()
    }

    /// Returns the unit and whether it was created
    pub(crate) fn get_or_create_unit(
        &mut self,
        department_id: i64,
        name: &str,
    ) -> Result<(Unit, bool), Error> {
        if name.trim().is_empty() {
            return Err(Error::invalid_input("Unit name cannot be empty"));
        }
        if !self.departments.iter().any(|d| d.id == department_id) {
            return Err(Error::not_found(format!("Department {}", department_id)));
        }
        if let Some(existing) = self.find_unit(department_id, name) {
            return Ok((existing, false));
        }
        let unit = Unit {
            id: next(&mut self.sequences.unit),
            department_id,
            name: name.to_string(),
        };
        self.units.push(unit.clone());
        Ok((unit, true))
    }

    pub(crate) fn enqueue(&mut self, entry: NewQueueEntry) -> QueueEntry {
        let entry = QueueEntry {
            id: next(&mut self.sequences.queue),
            ip_address: entry.ip_address,
            is_alive: entry.is_alive,
            snmp: entry.snmp,
            status: QueueStatus::Pending,
            error: None,
            created_at: Utc::now(),
        };
        self.queue.insert(entry.id, entry.clone());
        entry
    }

    pub(crate) fn complete_queue_entry(
        &mut self,
        id: i64,
        status: QueueStatus,
        error: Option<String>,
    ) -> Result<(), Error> {
        let entry = self
            .queue
            .get_mut(&id)
            .ok_or_else(|| Error::not_found(format!("Queue entry {}", id)))?;
        if entry.status != QueueStatus::Pending {
            return Err(Error::invalid_input(format!(
                "Queue entry {} is already {:?}",
                id, entry.status
            )));
        }
        if status == QueueStatus::Pending {
            return Err(Error::invalid_input("Queue entries can only move out of pending"));
        }
        entry.status = status;
        entry.error = error;
        Ok(())
    }

    pub(crate) fn list_queue(&self) -> Vec<QueueEntry> {
        self.queue.values().cloned().collect()
    }

    fn is_expired(entry: &QueueEntry, before: DateTime<Utc>) -> bool {
        entry.status != QueueStatus::Pending && entry.created_at < before
    }

    pub(crate) fn expired_queue_entries(&self, before: DateTime<Utc>) -> usize {
        self.queue
            .values()
            .filter(|entry| Self::is_expired(entry, before))
            .count()
    }

    pub(crate) fn purge_queue(&mut self, before: DateTime<Utc>) -> usize {
        let len = self.queue.len();
        self.queue.retain(|_, entry| !Self::is_expired(entry, before));
        len - self.queue.len()
    }
}
