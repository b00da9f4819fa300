// # Prober Trait
//
// Defines the interface for probing a single IP address.
//
// ## Implementations
//
// - ICMP + SNMPv2c: `netdisc-probe-net` crate
// - Test doubles: scripted probers in the contract tests
//
// ## Usage
//
// ```rust,ignore
// use netdisc_core::Prober;
//
// #[tokio::main]
// async fn main() -> anyhow::Result<()> {
//     let prober = /* Prober implementation */;
//
//     // Full probe: ICMP, then SNMP if reachable
//     let result = prober.probe("192.168.1.20".parse()?).await?;
//
//     // Liveness only (status monitor)
//     let alive = prober.ping("192.168.1.20".parse()?).await?;
//
//     Ok(())
// }
// ```

use async_trait::async_trait;
use std::net::IpAddr;
use std::time::Duration;

use crate::model::SnmpSystemInfo;

/// Outcome of probing one IP address
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeResult {
    /// No echo reply within the timeout budget
    Unreachable,
    /// Echo reply, but no SNMP agent answered any configured community
    ReachableNoSnmp {
        /// Round-trip time of the successful echo
        rtt: Duration,
    },
    /// Echo reply and SNMP system group
    ReachableWithSnmp {
        /// Round-trip time of the successful echo
        rtt: Duration,
        /// sysDescr, sysObjectID, sysLocation, sysContact, sysName
        snmp: SnmpSystemInfo,
    },
}

impl ProbeResult {
    pub fn is_reachable(&self) -> bool {
        !matches!(self, ProbeResult::Unreachable)
    }

    pub fn rtt(&self) -> Option<Duration> {
        match self {
            ProbeResult::Unreachable => None,
            ProbeResult::ReachableNoSnmp { rtt } | ProbeResult::ReachableWithSnmp { rtt, .. } => {
                Some(*rtt)
            }
        }
    }

    pub fn snmp(&self) -> Option<&SnmpSystemInfo> {
        match self {
            ProbeResult::ReachableWithSnmp { snmp, .. } => Some(snmp),
            _ => None,
        }
    }
}

/// Liveness-only probe result
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Liveness {
    Alive { rtt: Duration },
    Dead,
}

impl Liveness {
    pub fn is_alive(&self) -> bool {
        matches!(self, Liveness::Alive { .. })
    }
}

/// Trait for prober implementations
///
/// A prober turns one IP address into a [`ProbeResult`]. It holds no shared
/// mutable state, so the engine calls it concurrently for independent IPs.
///
/// # Error Semantics
///
/// - A host that does not answer is `Ok(ProbeResult::Unreachable)` / `Ok(Liveness::Dead)`.
/// - SNMP timeouts, authentication failures and malformed responses are
///   NOT errors: the result degrades to `ReachableNoSnmp`.
/// - `Err(Error)` is reserved for infrastructure failures (socket creation
///   denied, resolver broken). The status monitor never marks a device
///   offline because of an `Err`.
///
/// # Timeout Discipline
///
/// Every network call must carry its own timeout. A stalled probe must not
/// hold a worker slot indefinitely.
///
/// # Forbidden Capabilities
/// - ❌ Access the device store (owned by the orchestrator/monitor)
/// - ❌ Classify or assign devices (owned by `Classifier`/`AssignmentResolver`)
/// - ❌ Spawn background tasks that outlive a probe call
#[async_trait]
pub trait Prober: Send + Sync {
    /// Probe an address: ICMP echo, then SNMP system group if reachable
    async fn probe(&self, ip: IpAddr) -> Result<ProbeResult, crate::Error>;

    /// ICMP liveness check only
    async fn ping(&self, ip: IpAddr) -> Result<Liveness, crate::Error>;

    /// Resolve a hostname for an address (reverse DNS)
    ///
    /// Returns `None` when no name is known. The default does no lookup.
    async fn lookup_hostname(&self, _ip: IpAddr) -> Option<String> {
        None
    }

    /// Get the prober name (for logging/debugging)
    fn prober_name(&self) -> &'static str;
}

/// Helper trait for constructing probers from configuration
pub trait ProberFactory: Send + Sync {
    /// Create a Prober instance from configuration
    ///
    /// # Parameters
    ///
    /// - `config`: Full discovery configuration (probe parameters and prober selection)
    fn create(
        &self,
        config: &crate::config::DiscoveryConfig,
    ) -> Result<Box<dyn Prober>, crate::Error>;
}
