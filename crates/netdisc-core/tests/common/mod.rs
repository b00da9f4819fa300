//! Test doubles and common utilities for contract tests
//!
//! These doubles script network answers per IP and count store calls, so the
//! contracts can be checked without sockets.

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use netdisc_core::config::DiscoveryConfig;
use netdisc_core::error::{Error, Result};
use netdisc_core::model::{
    Department, Device, DeviceStatus, NewDevice, NewQueueEntry, QueueEntry, QueueStatus,
    SnmpSystemInfo, StatusHistoryEntry, Unit,
};
use netdisc_core::state::MemoryDeviceStore;
use netdisc_core::traits::{DeviceStore, Liveness, ProbeResult, Prober};
use std::collections::{HashMap, VecDeque};
use std::net::IpAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub fn ip(s: &str) -> IpAddr {
    s.parse().expect("valid IP literal")
}

pub fn reachable() -> ProbeResult {
    ProbeResult::ReachableNoSnmp {
        rtt: Duration::from_millis(3),
    }
}

pub fn reachable_with_snmp(sys_descr: &str, sys_name: &str) -> ProbeResult {
    ProbeResult::ReachableWithSnmp {
        rtt: Duration::from_millis(3),
        snmp: SnmpSystemInfo {
            sys_descr: Some(sys_descr.to_string()),
            sys_object_id: Some("1.3.6.1.4.1.9.1.1208".to_string()),
            sys_location: Some("Server room".to_string()),
            sys_contact: Some("it@sancella.example".to_string()),
            sys_name: Some(sys_name.to_string()),
        },
    }
}

#[derive(Clone)]
enum Answer {
    Result(ProbeResult),
    Fail(String),
}

/// A prober that answers from a per-IP script
///
/// Each IP has a queue of answers; the last one repeats forever. Unknown IPs
/// are unreachable. Clones share scripts and counters.
#[derive(Clone, Default)]
pub struct ScriptedProber {
    scripts: Arc<Mutex<HashMap<IpAddr, VecDeque<Answer>>>>,
    hostnames: Arc<Mutex<HashMap<IpAddr, String>>>,
    delay: Option<Duration>,
    probe_call_count: Arc<AtomicUsize>,
    ping_call_count: Arc<AtomicUsize>,
    in_flight: Arc<AtomicUsize>,
    max_in_flight: Arc<AtomicUsize>,
}

impl ScriptedProber {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every probe sleeps for `delay` before answering
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Replace the script for `ip` with a single repeating answer
    pub fn set(&self, ip: IpAddr, result: ProbeResult) {
        self.script(ip, vec![result]);
    }

    /// Replace the script for `ip` with a sequence of answers
    pub fn script(&self, ip: IpAddr, results: Vec<ProbeResult>) {
        self.scripts
            .lock()
            .unwrap()
            .insert(ip, results.into_iter().map(Answer::Result).collect());
    }

    /// Make every probe of `ip` fail with an infrastructure error
    pub fn fail(&self, ip: IpAddr, message: &str) {
        self.scripts
            .lock()
            .unwrap()
            .insert(ip, VecDeque::from([Answer::Fail(message.to_string())]));
    }

    pub fn set_hostname(&self, ip: IpAddr, name: &str) {
        self.hostnames.lock().unwrap().insert(ip, name.to_string());
    }

    pub fn probe_call_count(&self) -> usize {
        self.probe_call_count.load(Ordering::SeqCst)
    }

    pub fn ping_call_count(&self) -> usize {
        self.ping_call_count.load(Ordering::SeqCst)
    }

    /// Highest number of concurrent probe/ping calls observed
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    async fn answer(&self, ip: IpAddr) -> Result<ProbeResult> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let answer = {
            let mut scripts = self.scripts.lock().unwrap();
            match scripts.get_mut(&ip) {
                Some(queue) if queue.len() > 1 => queue.pop_front(),
                Some(queue) => queue.front().cloned(),
                None => None,
            }
        };

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        match answer {
            Some(Answer::Result(result)) => Ok(result),
            Some(Answer::Fail(message)) => Err(Error::probe(message)),
            None => Ok(ProbeResult::Unreachable),
        }
    }
}

#[async_trait]
impl Prober for ScriptedProber {
    async fn probe(&self, ip: IpAddr) -> Result<ProbeResult> {
        self.probe_call_count.fetch_add(1, Ordering::SeqCst);
        self.answer(ip).await
    }

    async fn ping(&self, ip: IpAddr) -> Result<Liveness> {
        self.ping_call_count.fetch_add(1, Ordering::SeqCst);
        Ok(match self.answer(ip).await?.rtt() {
            Some(rtt) => Liveness::Alive { rtt },
            None => Liveness::Dead,
        })
    }

    async fn lookup_hostname(&self, ip: IpAddr) -> Option<String> {
        self.hostnames.lock().unwrap().get(&ip).cloned()
    }

    fn prober_name(&self) -> &'static str {
        "scripted"
    }
}

/// A device store wrapper that counts calls and can inject faults
///
/// Clones share the underlying store and counters.
#[derive(Clone, Default)]
pub struct CountingStore {
    inner: MemoryDeviceStore,
    flush_call_count: Arc<AtomicUsize>,
    insert_call_count: Arc<AtomicUsize>,
    update_call_count: Arc<AtomicUsize>,
    /// Number of upcoming `get_device` calls that pretend the IP is unknown
    stale_reads: Arc<AtomicUsize>,
    fail_lists: Arc<AtomicUsize>,
    /// Number of upcoming transition writes that fail before touching the store
    failing_transitions: Arc<AtomicUsize>,
}

impl CountingStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inner(&self) -> &MemoryDeviceStore {
        &self.inner
    }

    pub fn flush_call_count(&self) -> usize {
        self.flush_call_count.load(Ordering::SeqCst)
    }

    pub fn insert_call_count(&self) -> usize {
        self.insert_call_count.load(Ordering::SeqCst)
    }

    pub fn update_call_count(&self) -> usize {
        self.update_call_count.load(Ordering::SeqCst)
    }

    /// Simulate a concurrent writer: the next `n` IP lookups miss
    pub fn stale_reads(&self, n: usize) {
        self.stale_reads.store(n, Ordering::SeqCst);
    }

    /// Make `list_devices` fail (database unreachable)
    pub fn fail_lists(&self) {
        self.fail_lists.store(1, Ordering::SeqCst);
    }

    /// Make the next `n` transition writes fail (disk full)
    pub fn fail_transitions(&self, n: usize) {
        self.failing_transitions.store(n, Ordering::SeqCst);
    }
}

#[async_trait]
impl DeviceStore for CountingStore {
    async fn get_device(&self, ip: IpAddr) -> Result<Option<Device>> {
        let stale = self
            .stale_reads
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if stale {
            return Ok(None);
        }
        self.inner.get_device(ip).await
    }

    async fn get_device_by_id(&self, id: i64) -> Result<Option<Device>> {
        self.inner.get_device_by_id(id).await
    }

    async fn insert_device(&self, device: NewDevice) -> Result<Device> {
        self.insert_call_count.fetch_add(1, Ordering::SeqCst);
        self.inner.insert_device(device).await
    }

    async fn update_device(&self, device: &Device) -> Result<Device> {
        self.update_call_count.fetch_add(1, Ordering::SeqCst);
        self.inner.update_device(device).await
    }

    async fn list_devices(&self) -> Result<Vec<Device>> {
        if self.fail_lists.load(Ordering::SeqCst) > 0 {
            return Err(Error::store("connection refused"));
        }
        self.inner.list_devices().await
    }

    async fn delete_device(&self, id: i64) -> Result<()> {
        self.inner.delete_device(id).await
    }

    async fn append_status(
        &self,
        device_id: i64,
        status: DeviceStatus,
        changed_at: DateTime<Utc>,
    ) -> Result<StatusHistoryEntry> {
        self.inner.append_status(device_id, status, changed_at).await
    }

    async fn record_transition(
        &self,
        device: &Device,
        changed_at: DateTime<Utc>,
    ) -> Result<(Device, StatusHistoryEntry)> {
        let failing = self
            .failing_transitions
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(Error::store("disk full"));
        }
        self.update_call_count.fetch_add(1, Ordering::SeqCst);
        self.inner.record_transition(device, changed_at).await
    }

    async fn latest_status(&self, device_id: i64) -> Result<Option<StatusHistoryEntry>> {
        self.inner.latest_status(device_id).await
    }

    async fn status_history(
        &self,
        device_id: i64,
        from: Option<DateTime<Utc>>,
        to: Option<DateTime<Utc>>,
    ) -> Result<Vec<StatusHistoryEntry>> {
        self.inner.status_history(device_id, from, to).await
    }

    async fn find_department(&self, name: &str) -> Result<Option<Department>> {
        self.inner.find_department(name).await
    }

    async fn get_or_create_department(&self, name: &str) -> Result<Department> {
        self.inner.get_or_create_department(name).await
    }

    async fn find_unit(&self, department_id: i64, name: &str) -> Result<Option<Unit>> {
        self.inner.find_unit(department_id, name).await
    }

    async fn get_or_create_unit(&self, department_id: i64, name: &str) -> Result<Unit> {
        self.inner.get_or_create_unit(department_id, name).await
    }

    async fn enqueue(&self, entry: NewQueueEntry) -> Result<QueueEntry> {
        self.inner.enqueue(entry).await
    }

    async fn complete_queue_entry(
        &self,
        id: i64,
        status: QueueStatus,
        error: Option<String>,
    ) -> Result<()> {
        self.inner.complete_queue_entry(id, status, error).await
    }

    async fn list_queue(&self) -> Result<Vec<QueueEntry>> {
        self.inner.list_queue().await
    }

    async fn purge_queue(&self, before: DateTime<Utc>) -> Result<usize> {
        self.inner.purge_queue(before).await
    }

    async fn flush(&self) -> Result<()> {
        self.flush_call_count.fetch_add(1, Ordering::SeqCst);
        self.inner.flush().await
    }
}

/// Configuration with no subnets, no DNS lookups and default rules
pub fn minimal_config() -> DiscoveryConfig {
    let mut config = DiscoveryConfig::default();
    config.probe.resolve_hostnames = false;
    config
}

/// Configuration excluding the usual gateway address `.1` of every subnet
pub fn gateway_excluded_config() -> DiscoveryConfig {
    let mut config = minimal_config();
    config.exclusions.ips = vec!["*.*.*.1".to_string()];
    config
}

/// Insert a device directly, bypassing discovery
pub async fn seed_device(
    store: &dyn DeviceStore,
    address: &str,
    is_alive: bool,
    auto_assigned: bool,
) -> Device {
    let (department, unit) = store
        .ensure_unknown_bucket("Unknown", "Unknown")
        .await
        .expect("bucket");
    store
        .insert_device(NewDevice {
            ip_address: ip(address),
            hostname: None,
            is_alive,
            snmp_available: false,
            snmp: SnmpSystemInfo::default(),
            classification: netdisc_core::model::Classification::unknown(),
            department_id: Some(department.id),
            unit_id: Some(unit.id),
            auto_assigned,
            last_seen: None,
        })
        .await
        .expect("seed insert")
}
