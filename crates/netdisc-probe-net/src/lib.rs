// # Network Prober
//
// ICMP echo + SNMPv2c system group prober for the discovery engine.
//
// ## Probe Sequence
//
// 1. ICMP echo with a per-attempt timeout, retried `icmp_retries` times
// 2. If reachable: one SNMPv2c GET carrying all five system group OIDs, one
//    community at a time in configured order, first answering community wins
// 3. Reverse DNS only on request (`lookup_hostname`)
//
// ## Error Semantics
//
// - No echo reply: `Unreachable`, never an error
// - SNMP timeout, rejected community or malformed reply: `ReachableNoSnmp`
// - Socket creation denied (missing CAP_NET_RAW): `Err`, so the monitor keeps
//   the stored state
//
// ## Forbidden Capabilities
// - ❌ Access the device store
// - ❌ Spawn tasks that outlive a probe call
// - ❌ Retry SNMP beyond the configured community list

use async_trait::async_trait;
use netdisc_core::config::{DiscoveryConfig, ProbeConfig, ProberConfig};
use netdisc_core::model::SnmpSystemInfo;
use netdisc_core::traits::{Liveness, ProbeResult, Prober, ProberFactory};
use netdisc_core::{ComponentRegistry, Error, Result};
use snmp2::{AsyncSession, Oid, Value};
use std::io;
use std::net::{IpAddr, SocketAddr};
use std::sync::atomic::{AtomicU16, Ordering};
use std::time::Duration;
use surge_ping::{Client, Config, PingIdentifier, PingSequence, SurgeError};
use tokio::sync::OnceCell;
use tokio::time::timeout;
use tracing::{debug, warn};

const OID_SYS_DESCR: &[u64] = &[1, 3, 6, 1, 2, 1, 1, 1, 0];
const OID_SYS_OBJECT_ID: &[u64] = &[1, 3, 6, 1, 2, 1, 1, 2, 0];
const OID_SYS_CONTACT: &[u64] = &[1, 3, 6, 1, 2, 1, 1, 4, 0];
const OID_SYS_NAME: &[u64] = &[1, 3, 6, 1, 2, 1, 1, 5, 0];
const OID_SYS_LOCATION: &[u64] = &[1, 3, 6, 1, 2, 1, 1, 6, 0];

const ECHO_PAYLOAD: [u8; 56] = [0; 56];

/// Reverse lookups run on the blocking pool and are abandoned after this
const DNS_TIMEOUT: Duration = Duration::from_secs(3);

/// Why one community failed to produce a system group
#[derive(Debug, thiserror::Error)]
enum SnmpFailure {
    #[error("no SNMP response within {0:?}")]
    Timeout(Duration),

    #[error("SNMP community rejected: {0}")]
    AuthFailure(String),

    #[error("malformed SNMP response: {0}")]
    Malformed(String),

    #[error("SNMP transport error: {0}")]
    Transport(#[from] io::Error),
}

impl SnmpFailure {
    fn from_request(e: &snmp2::Error) -> Self {
        match e {
            snmp2::Error::CommunityMismatch => SnmpFailure::AuthFailure(format!("{:?}", e)),
            snmp2::Error::Send | snmp2::Error::Receive => {
                SnmpFailure::Transport(io::Error::other(format!("{:?}", e)))
            }
            other => SnmpFailure::Malformed(format!("{:?}", other)),
        }
    }
}

#[derive(Clone, Copy)]
enum SystemField {
    Descr,
    ObjectId,
    Contact,
    Name,
    Location,
}

impl SystemField {
    const ALL: [SystemField; 5] = [
        SystemField::Descr,
        SystemField::ObjectId,
        SystemField::Contact,
        SystemField::Name,
        SystemField::Location,
    ];

    fn oid(self) -> &'static [u64] {
        match self {
            SystemField::Descr => OID_SYS_DESCR,
            SystemField::ObjectId => OID_SYS_OBJECT_ID,
            SystemField::Contact => OID_SYS_CONTACT,
            SystemField::Name => OID_SYS_NAME,
            SystemField::Location => OID_SYS_LOCATION,
        }
    }

    fn store(self, info: &mut SnmpSystemInfo, value: Option<String>) {
        let slot = match self {
            SystemField::Descr => &mut info.sys_descr,
            SystemField::ObjectId => &mut info.sys_object_id,
            SystemField::Contact => &mut info.sys_contact,
            SystemField::Name => &mut info.sys_name,
            SystemField::Location => &mut info.sys_location,
        };
        *slot = value;
    }
}

/// ICMP + SNMPv2c prober
///
/// The ICMP socket is opened on first use, so constructing a prober never
/// needs privileges.
pub struct NetProber {
    config: ProbeConfig,
    client: OnceCell<Client>,
    next_ident: AtomicU16,
}

impl NetProber {
    pub fn new(config: ProbeConfig) -> Self {
        Self {
            config,
            client: OnceCell::new(),
            next_ident: AtomicU16::new(std::process::id() as u16),
        }
    }

    async fn client(&self) -> Result<&Client> {
        self.client
            .get_or_try_init(|| async {
                Client::new(&Config::default()).map_err(|e| {
                    Error::prober(
                        "net",
                        format!("cannot open ICMP socket (CAP_NET_RAW required?): {}", e),
                    )
                })
            })
            .await
    }

    async fn echo(&self, ip: IpAddr) -> Result<Liveness> {
        if ip.is_ipv6() {
            return Err(Error::prober("net", format!("{}: IPv6 is not probed", ip)));
        }
        let client = self.client().await?;

        let ident = PingIdentifier(self.next_ident.fetch_add(1, Ordering::Relaxed));
        let mut pinger = client.pinger(ip, ident).await;
        pinger.timeout(self.config.icmp_timeout());

        for attempt in 0..=u16::from(self.config.icmp_retries) {
            match pinger.ping(PingSequence(attempt), &ECHO_PAYLOAD).await {
                Ok((_, rtt)) => return Ok(Liveness::Alive { rtt }),
                Err(SurgeError::Timeout { .. }) => continue,
                Err(SurgeError::IOError(e)) if e.kind() == io::ErrorKind::PermissionDenied => {
                    return Err(Error::prober("net", format!("{}: {}", ip, e)));
                }
                Err(e) => {
                    debug!("{}: echo attempt {} failed: {}", ip, attempt + 1, e);
                }
            }
        }
        Ok(Liveness::Dead)
    }

    /// Try each community in order; `None` when no agent answered
    async fn system_info(&self, ip: IpAddr) -> Option<SnmpSystemInfo> {
        let agent = SocketAddr::new(ip, self.config.snmp_port);

        for community in &self.config.snmp_communities {
            match query_system(agent, community, self.config.snmp_timeout()).await {
                Ok(info) => return Some(info),
                Err(e @ SnmpFailure::Malformed(_)) => warn!("{}: {}", ip, e),
                Err(e) => debug!("{}: {}", ip, e),
            }
        }
        None
    }
}

/// GET the whole system group with one community in a single request
///
/// A failed request fails the community. Within an answer, fields the agent
/// reports as `noSuchObject` are left empty, but sysDescr must be present.
async fn query_system(
    agent: SocketAddr,
    community: &str,
    per_request: Duration,
) -> std::result::Result<SnmpSystemInfo, SnmpFailure> {
    let oids = SystemField::ALL
        .iter()
        .map(|field| Oid::from(field.oid()))
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| SnmpFailure::Malformed(format!("invalid OID: {:?}", e)))?;
    let names: Vec<&Oid> = oids.iter().collect();

    let mut session = timeout(
        per_request,
        AsyncSession::new_v2c(agent, community.as_bytes(), 0),
    )
    .await
    .map_err(|_| SnmpFailure::Timeout(per_request))??;

    let response = timeout(per_request, session.get_many(&names))
        .await
        .map_err(|_| SnmpFailure::Timeout(per_request))?
        .map_err(|e| SnmpFailure::from_request(&e))?;

    if response.error_status != 0 {
        return Err(SnmpFailure::Malformed(format!(
            "agent error status {} at index {}",
            response.error_status, response.error_index
        )));
    }

    system_group(response.varbinds.map(|(_, value)| value))
}

/// Map varbind values, in request order, onto the system group
fn system_group<'a>(
    values: impl IntoIterator<Item = Value<'a>>,
) -> std::result::Result<SnmpSystemInfo, SnmpFailure> {
    let mut info = SnmpSystemInfo::default();
    for (field, value) in SystemField::ALL.into_iter().zip(values) {
        field.store(&mut info, text_value(&value));
    }
    if info.sys_descr.is_none() {
        return Err(SnmpFailure::Malformed("agent returned no sysDescr".into()));
    }
    Ok(info)
}

fn text_value(value: &Value<'_>) -> Option<String> {
    match value {
        Value::OctetString(bytes) => octets_to_text(bytes),
        Value::ObjectIdentifier(oid) => Some(oid.to_id_string()),
        _ => None,
    }
}

fn octets_to_text(bytes: &[u8]) -> Option<String> {
    let text = String::from_utf8_lossy(bytes)
        .trim_matches(|c: char| c.is_whitespace() || c == '\0')
        .to_string();
    if text.is_empty() { None } else { Some(text) }
}

#[async_trait]
impl Prober for NetProber {
    async fn probe(&self, ip: IpAddr) -> Result<ProbeResult> {
        let rtt = match self.echo(ip).await? {
            Liveness::Alive { rtt } => rtt,
            Liveness::Dead => return Ok(ProbeResult::Unreachable),
        };

        Ok(match self.system_info(ip).await {
            Some(snmp) => ProbeResult::ReachableWithSnmp { rtt, snmp },
            None => ProbeResult::ReachableNoSnmp { rtt },
        })
    }

    async fn ping(&self, ip: IpAddr) -> Result<Liveness> {
        self.echo(ip).await
    }

    async fn lookup_hostname(&self, ip: IpAddr) -> Option<String> {
        let lookup = tokio::task::spawn_blocking(move || dns_lookup::lookup_addr(&ip));
        match timeout(DNS_TIMEOUT, lookup).await {
            Ok(Ok(Ok(name))) if !name.is_empty() && name != ip.to_string() => Some(name),
            Ok(Ok(Ok(_))) => None,
            Ok(Ok(Err(e))) => {
                debug!("{}: no reverse DNS: {}", ip, e);
                None
            }
            Ok(Err(e)) => {
                warn!("{}: reverse DNS task failed: {}", ip, e);
                None
            }
            Err(_) => {
                debug!("{}: reverse DNS timed out", ip);
                None
            }
        }
    }

    fn prober_name(&self) -> &'static str {
        "net"
    }
}

/// Factory for [`NetProber`]
pub struct NetProberFactory;

impl ProberFactory for NetProberFactory {
    fn create(&self, config: &DiscoveryConfig) -> Result<Box<dyn Prober>> {
        match &config.prober {
            ProberConfig::Net => {
                config.probe.validate()?;
                Ok(Box::new(NetProber::new(config.probe.clone())))
            }
            other => Err(Error::config(format!(
                "net prober factory cannot build '{}'",
                other.type_name()
            ))),
        }
    }
}

/// Register the network prober with a registry
pub fn register(registry: &ComponentRegistry) {
    registry.register_prober("net", Box::new(NetProberFactory));
}
