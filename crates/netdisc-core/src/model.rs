//! Inventory data model
//!
//! Records persisted by a [`DeviceStore`](crate::traits::DeviceStore):
//! devices keyed by unique IP, their append-only status history,
//! the department/unit buckets they are placed in, and the transient
//! discovery queue audit trail.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::IpAddr;

/// Device type used when nothing classifies a host
pub const UNKNOWN_DEVICE_TYPE: &str = "unknown";

/// Default name of the sentinel department/unit
pub const UNKNOWN_BUCKET: &str = "Unknown";

/// Online/offline state recorded in the status history
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceStatus {
    Online,
    Offline,
}

impl DeviceStatus {
    pub fn from_alive(is_alive: bool) -> Self {
        if is_alive {
            DeviceStatus::Online
        } else {
            DeviceStatus::Offline
        }
    }

    pub fn is_online(self) -> bool {
        self == DeviceStatus::Online
    }
}

impl fmt::Display for DeviceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceStatus::Online => f.write_str("online"),
            DeviceStatus::Offline => f.write_str("offline"),
        }
    }
}

/// SNMP system group values returned by a host
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnmpSystemInfo {
    pub sys_descr: Option<String>,
    pub sys_object_id: Option<String>,
    pub sys_location: Option<String>,
    pub sys_contact: Option<String>,
    pub sys_name: Option<String>,
}

impl SnmpSystemInfo {
    /// True when the host returned none of the system OIDs
    pub fn is_empty(&self) -> bool {
        self.sys_descr.is_none()
            && self.sys_object_id.is_none()
            && self.sys_location.is_none()
            && self.sys_contact.is_none()
            && self.sys_name.is_none()
    }
}

/// Vendor/type/OS derived by the [`Classifier`](crate::classify::Classifier)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Classification {
    pub vendor: Option<String>,
    pub device_type: String,
    pub os: Option<String>,
}

impl Classification {
    pub fn unknown() -> Self {
        Self {
            vendor: None,
            device_type: UNKNOWN_DEVICE_TYPE.to_string(),
            os: None,
        }
    }

    pub fn is_unknown(&self) -> bool {
        self.device_type == UNKNOWN_DEVICE_TYPE && self.vendor.is_none() && self.os.is_none()
    }
}

impl Default for Classification {
    fn default() -> Self {
        Self::unknown()
    }
}

/// Department/unit placement of a device
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Assignment {
    pub department_id: Option<i64>,
    pub unit_id: Option<i64>,
}

/// An inventoried network device, unique by IP address
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Device {
    pub id: i64,
    pub ip_address: IpAddr,
    pub hostname: Option<String>,
    pub is_alive: bool,
    pub snmp_available: bool,
    #[serde(default)]
    pub snmp: SnmpSystemInfo,
    #[serde(default)]
    pub classification: Classification,
    pub department_id: Option<i64>,
    pub unit_id: Option<i64>,
    pub asset_tag: Option<String>,
    pub assigned_user: Option<String>,
    /// Placement was made by discovery and may be recomputed by later runs
    pub auto_assigned: bool,
    pub last_seen: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Device {
    pub fn assignment(&self) -> Assignment {
        Assignment {
            department_id: self.department_id,
            unit_id: self.unit_id,
        }
    }

    pub fn status(&self) -> DeviceStatus {
        DeviceStatus::from_alive(self.is_alive)
    }

    /// Compares every field discovery may write, ignoring the `last_seen`
    /// heartbeat and bookkeeping timestamps
    pub fn same_observed_state(&self, other: &Device) -> bool {
        self.hostname == other.hostname
            && self.is_alive == other.is_alive
            && self.snmp_available == other.snmp_available
            && self.snmp == other.snmp
            && self.classification == other.classification
            && self.department_id == other.department_id
            && self.unit_id == other.unit_id
            && self.auto_assigned == other.auto_assigned
    }
}

/// Fields for a device that does not exist yet; the store assigns id and timestamps
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewDevice {
    pub ip_address: IpAddr,
    pub hostname: Option<String>,
    pub is_alive: bool,
    pub snmp_available: bool,
    pub snmp: SnmpSystemInfo,
    pub classification: Classification,
    pub department_id: Option<i64>,
    pub unit_id: Option<i64>,
    pub auto_assigned: bool,
    pub last_seen: Option<DateTime<Utc>>,
}

impl NewDevice {
    pub(crate) fn into_device(self, id: i64, now: DateTime<Utc>) -> Device {
        Device {
            id,
            ip_address: self.ip_address,
            hostname: self.hostname,
            is_alive: self.is_alive,
            snmp_available: self.snmp_available,
            snmp: self.snmp,
            classification: self.classification,
            department_id: self.department_id,
            unit_id: self.unit_id,
            asset_tag: None,
            assigned_user: None,
            auto_assigned: self.auto_assigned,
            last_seen: self.last_seen,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Append-only liveness transition
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusHistoryEntry {
    pub id: i64,
    pub device_id: i64,
    pub status: DeviceStatus,
    pub changed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Department {
    pub id: i64,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Unit {
    pub id: i64,
    pub department_id: i64,
    pub name: String,
}

/// Processing state of a discovery queue entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueueStatus {
    Pending,
    Processed,
    Failed,
}

/// Raw probe attempt recorded before admission into the device table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueEntry {
    pub id: i64,
    pub ip_address: IpAddr,
    pub is_alive: bool,
    pub snmp: Option<SnmpSystemInfo>,
    pub status: QueueStatus,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Queue entry fields supplied by the orchestrator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewQueueEntry {
    pub ip_address: IpAddr,
    pub is_alive: bool,
    pub snmp: Option<SnmpSystemInfo>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn device() -> Device {
        let now = Utc::now();
        NewDevice {
            ip_address: "10.0.0.5".parse().unwrap(),
            hostname: Some("sw-core".into()),
            is_alive: true,
            snmp_available: false,
            snmp: SnmpSystemInfo::default(),
            classification: Classification::unknown(),
            department_id: Some(1),
            unit_id: Some(1),
            auto_assigned: true,
            last_seen: Some(now),
        }
        .into_device(7, now)
    }

    #[test]
    fn test_status_serializes_lowercase() {
        let json = serde_json::to_string(&DeviceStatus::Offline).unwrap();
        assert_eq!(json, "\"offline\"");
        assert_eq!(DeviceStatus::from_alive(true), DeviceStatus::Online);
    }

    #[test]
    fn test_same_observed_state_ignores_heartbeat() {
        let a = device();
        let mut b = a.clone();
        b.last_seen = Some(Utc::now() + chrono::Duration::seconds(30));
        b.updated_at = Utc::now() + chrono::Duration::seconds(30);
        assert!(a.same_observed_state(&b));

        b.unit_id = Some(2);
        assert!(!a.same_observed_state(&b));
    }

    #[test]
    fn test_unknown_classification() {
        assert!(Classification::default().is_unknown());
        assert!(SnmpSystemInfo::default().is_empty());
    }
}
