//! Per-IP serialisation of device read-modify-write cycles
//!
//! Discovery and the status monitor both lock an address before reading and
//! rewriting its Device. Different addresses never contend, and entries are
//! dropped from the table once nobody holds or waits for them.

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

type LockTable = HashMap<IpAddr, Arc<AsyncMutex<()>>>;

/// Table of per-address async locks, cheap to clone and share
#[derive(Debug, Clone, Default)]
pub struct IpLocks {
    table: Arc<Mutex<LockTable>>,
}

impl IpLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to `ip`
    pub async fn lock(&self, ip: IpAddr) -> IpGuard {
        let slot = {
            let mut table = self.table();
            table.entry(ip).or_default().clone()
        };

        IpGuard {
            ip,
            table: self.table.clone(),
            guard: Some(slot.lock_owned().await),
        }
    }

    /// Number of addresses currently locked or awaited
    pub fn active(&self) -> usize {
        self.table().len()
    }

    fn table(&self) -> MutexGuard<'_, LockTable> {
        self.table.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Held lock for one address; released on drop
#[derive(Debug)]
pub struct IpGuard {
    ip: IpAddr,
    table: Arc<Mutex<LockTable>>,
    guard: Option<OwnedMutexGuard<()>>,
}

impl IpGuard {
    pub fn ip(&self) -> IpAddr {
        self.ip
    }
}

impl Drop for IpGuard {
    fn drop(&mut self) {
        let mut table = self.table.lock().unwrap_or_else(PoisonError::into_inner);
        // Release first so the count below only sees the table and any waiters
        self.guard.take();
        if let Some(slot) = table.get(&self.ip)
            && Arc::strong_count(slot) == 1
        {
            table.remove(&self.ip);
        }
    }
}
