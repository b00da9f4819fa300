use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::net::IpAddr;

use crate::model::Device;

/// Per-IP pipeline stage, used to report where an IP failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DiscoveryStage {
    Enumerating,
    Probing,
    Classifying,
    Assigning,
    Upserting,
    Done,
}

impl fmt::Display for DiscoveryStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DiscoveryStage::Enumerating => "enumerating",
            DiscoveryStage::Probing => "probing",
            DiscoveryStage::Classifying => "classifying",
            DiscoveryStage::Assigning => "assigning",
            DiscoveryStage::Upserting => "upserting",
            DiscoveryStage::Done => "done",
        };
        f.write_str(name)
    }
}

/// One IP that failed during a run
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IpFailure {
    pub ip: IpAddr,
    pub stage: DiscoveryStage,
    pub message: String,
}

/// Result of one discovery run
///
/// A run always produces a summary once probing has started, including when
/// it was cancelled or individual IPs failed.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunSummary {
    /// Scan target as given (`10.0.0.0/24`, `a-b`, `all`)
    pub target: String,
    /// Hosts left after enumeration and IP exclusion
    pub candidates: usize,
    pub probed: usize,
    /// Reachable but excluded by hostname pattern
    pub skipped: usize,
    pub online: usize,
    pub offline: usize,
    /// Existing devices whose observed fields changed
    pub updated: usize,
    pub errors: usize,
    /// Devices created by this run, ordered by IP
    pub new_devices: Vec<Device>,
    pub failures: Vec<IpFailure>,
    pub cancelled: bool,
    pub metadata: HashMap<String, String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl RunSummary {
    pub(crate) fn new(target: String, metadata: HashMap<String, String>) -> Self {
        let now = Utc::now();
        Self {
            target,
            candidates: 0,
            probed: 0,
            skipped: 0,
            online: 0,
            offline: 0,
            updated: 0,
            errors: 0,
            new_devices: Vec::new(),
            failures: Vec::new(),
            cancelled: false,
            metadata,
            started_at: now,
            finished_at: now,
        }
    }

    pub(crate) fn finish(&mut self) {
        self.new_devices.sort_by_key(|d| d.ip_address);
        self.failures.sort_by_key(|f| f.ip);
        self.finished_at = Utc::now();
    }

    /// True when nothing was created, changed or failed
    pub fn is_quiet(&self) -> bool {
        self.new_devices.is_empty() && self.updated == 0 && self.errors == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_display() {
        assert_eq!(DiscoveryStage::Upserting.to_string(), "upserting");
        assert_eq!(
            serde_json::to_string(&DiscoveryStage::Assigning).unwrap(),
            "\"assigning\""
        );
    }

    #[test]
    fn test_finish_orders_failures() {
        let mut summary = RunSummary::new("10.0.0.0/24".into(), HashMap::new());
        for ip in ["10.0.0.9", "10.0.0.3"] {
            summary.failures.push(IpFailure {
                ip: ip.parse().unwrap(),
                stage: DiscoveryStage::Probing,
                message: "socket denied".into(),
            });
        }
        summary.errors = 2;
        summary.finish();
        assert_eq!(summary.failures[0].ip.to_string(), "10.0.0.3");
        assert!(!summary.is_quiet());
    }
}
