//! Configuration types for the discovery engine
//!
//! All configuration is immutable input for a run. [`DiscoveryConfig::validate`]
//! must succeed before any probing starts; a malformed CIDR or regex is a
//! configuration error, never a per-IP failure.

use ipnetwork::Ipv4Network;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

use crate::model::UNKNOWN_BUCKET;

/// Main discovery configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DiscoveryConfig {
    /// Subnets (CIDR) scanned by an "all configured subnets" run
    #[serde(default)]
    pub subnets: Vec<String>,

    /// Prober configuration
    #[serde(default)]
    pub prober: ProberConfig,

    /// ICMP/SNMP probe parameters
    #[serde(default)]
    pub probe: ProbeConfig,

    /// IPs and hostnames discovery must never touch
    #[serde(default)]
    pub exclusions: ExclusionConfig,

    /// Ordered classification rules
    #[serde(default)]
    pub classification: ClassificationConfig,

    /// Ordered department/unit placement rules
    #[serde(default)]
    pub assignment: AssignmentConfig,

    /// Device store configuration
    #[serde(default)]
    pub store: StoreConfig,

    /// Optional engine settings
    #[serde(default)]
    pub engine: EngineConfig,
}

impl DiscoveryConfig {
    /// Create a new configuration with defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a JSON configuration file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, crate::Error> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            crate::Error::config(format!("Failed to read config {}: {}", path.display(), e))
        })?;
        serde_json::from_str(&content).map_err(|e| {
            crate::Error::config(format!("Failed to parse config {}: {}", path.display(), e))
        })
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), crate::Error> {
        for subnet in &self.subnets {
            parse_scan_cidr(subnet)?;
        }

        self.prober.validate()?;
        self.probe.validate()?;
        self.exclusions.validate()?;
        self.classification.validate()?;
        self.assignment.validate()?;
        self.engine.validate()?;

        Ok(())
    }
}

/// Parse a CIDR usable as a scan target
///
/// Host bits are normalised away (`192.168.1.7/24` scans `192.168.1.0/24`).
/// Prefixes above /30 have no host addresses once network and broadcast are
/// removed and are rejected.
pub fn parse_scan_cidr(cidr: &str) -> Result<Ipv4Network, crate::Error> {
    let network: Ipv4Network = cidr
        .trim()
        .parse()
        .map_err(|e| crate::Error::config(format!("Malformed CIDR '{}': {}", cidr, e)))?;

    if network.prefix() > 30 {
        return Err(crate::Error::config(format!(
            "CIDR '{}' has no scannable hosts (prefix must be <= 30)",
            cidr
        )));
    }

    Ipv4Network::new(network.network(), network.prefix())
        .map_err(|e| crate::Error::config(format!("Malformed CIDR '{}': {}", cidr, e)))
}

/// Prober selection
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProberConfig {
    /// ICMP + SNMP network prober
    #[default]
    Net,

    /// Custom prober
    Custom {
        /// Factory name to use
        factory: String,
        /// Custom configuration data
        config: serde_json::Value,
    },
}

impl ProberConfig {
    /// Validate the prober configuration
    pub fn validate(&self) -> Result<(), crate::Error> {
        match self {
            ProberConfig::Net => Ok(()),
            ProberConfig::Custom { factory, .. } => {
                if factory.is_empty() {
                    return Err(crate::Error::config("Custom prober factory cannot be empty"));
                }
                Ok(())
            }
        }
    }

    /// Get the prober type name
    pub fn type_name(&self) -> &str {
        match self {
            ProberConfig::Net => "net",
            ProberConfig::Custom { factory, .. } => factory,
        }
    }
}

/// ICMP and SNMP probe parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProbeConfig {
    /// Timeout for a single ICMP echo request (milliseconds)
    #[serde(default = "default_icmp_timeout_ms")]
    pub icmp_timeout_ms: u64,

    /// Additional echo attempts after the first one times out
    #[serde(default = "default_icmp_retries")]
    pub icmp_retries: u8,

    /// Community strings tried in order; first success wins
    #[serde(default = "default_snmp_communities")]
    pub snmp_communities: Vec<String>,

    /// SNMP agent port
    #[serde(default = "default_snmp_port")]
    pub snmp_port: u16,

    /// Timeout for each SNMP request (milliseconds)
    #[serde(default = "default_snmp_timeout_ms")]
    pub snmp_timeout_ms: u64,

    /// Fall back to reverse DNS when SNMP gives no sysName
    #[serde(default = "default_true")]
    pub resolve_hostnames: bool,
}

impl ProbeConfig {
    /// Validate the probe configuration
    pub fn validate(&self) -> Result<(), crate::Error> {
        if self.icmp_timeout_ms == 0 {
            return Err(crate::Error::config("ICMP timeout must be > 0"));
        }
        if self.snmp_timeout_ms == 0 {
            return Err(crate::Error::config("SNMP timeout must be > 0"));
        }
        if self.snmp_communities.is_empty() {
            return Err(crate::Error::config("At least one SNMP community is required"));
        }
        if self.snmp_communities.iter().any(|c| c.is_empty()) {
            return Err(crate::Error::config("SNMP community strings cannot be empty"));
        }
        Ok(())
    }

    pub fn icmp_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.icmp_timeout_ms)
    }

    pub fn snmp_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.snmp_timeout_ms)
    }
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            icmp_timeout_ms: default_icmp_timeout_ms(),
            icmp_retries: default_icmp_retries(),
            snmp_communities: default_snmp_communities(),
            snmp_port: default_snmp_port(),
            snmp_timeout_ms: default_snmp_timeout_ms(),
            resolve_hostnames: true,
        }
    }
}

/// IPs and hostnames excluded from discovery
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExclusionConfig {
    /// Exact IPs, CIDRs, `a-b` ranges or octet wildcards (`*.*.*.1`)
    #[serde(default)]
    pub ips: Vec<String>,

    /// Case-insensitive hostname regexes
    #[serde(default)]
    pub hostname_patterns: Vec<String>,
}

impl ExclusionConfig {
    /// Validate the exclusion configuration
    pub fn validate(&self) -> Result<(), crate::Error> {
        crate::exclusion::ExclusionFilter::new(self).map(|_| ())
    }
}

/// Rule matched against sysDescr (case-insensitive substring)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SysDescrRule {
    pub contains: String,
    pub vendor: Option<String>,
    pub device_type: String,
    pub os: Option<String>,
}

/// Rule matched against the hostname (case-insensitive regex)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostnameRule {
    pub pattern: String,
    pub device_type: String,
    #[serde(default)]
    pub vendor: Option<String>,
    #[serde(default)]
    pub os: Option<String>,
}

/// Classification rule tables; empty tables select the built-in rules
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClassificationConfig {
    #[serde(default)]
    pub sys_descr_rules: Vec<SysDescrRule>,

    #[serde(default)]
    pub hostname_rules: Vec<HostnameRule>,
}

impl ClassificationConfig {
    /// Validate the classification configuration
    pub fn validate(&self) -> Result<(), crate::Error> {
        crate::classify::Classifier::from_config(self).map(|_| ())
    }
}

/// IP range → department rule
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IpRangeRule {
    pub cidr: String,
    pub department: String,
    #[serde(default)]
    pub unit: Option<String>,
}

/// Regex → department rule (hostname or sysLocation)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatternRule {
    pub pattern: String,
    pub department: String,
    #[serde(default)]
    pub unit: Option<String>,
}

/// Device type → department rule
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypeRule {
    pub device_type: String,
    pub department: String,
    #[serde(default)]
    pub unit: Option<String>,
}

/// Department/unit placement rules, evaluated in field order
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssignmentConfig {
    #[serde(default)]
    pub ip_ranges: Vec<IpRangeRule>,

    #[serde(default)]
    pub hostname_patterns: Vec<PatternRule>,

    #[serde(default)]
    pub snmp_locations: Vec<PatternRule>,

    #[serde(default)]
    pub type_defaults: Vec<TypeRule>,

    #[serde(default = "default_unknown_bucket")]
    pub unknown_department: String,

    #[serde(default = "default_unknown_bucket")]
    pub unknown_unit: String,
}

impl AssignmentConfig {
    /// Validate the assignment configuration
    pub fn validate(&self) -> Result<(), crate::Error> {
        if self.unknown_department.trim().is_empty() || self.unknown_unit.trim().is_empty() {
            return Err(crate::Error::config(
                "Unknown department/unit names cannot be empty",
            ));
        }
        crate::assign::AssignmentRules::compile(self).map(|_| ())
    }
}

impl Default for AssignmentConfig {
    fn default() -> Self {
        Self {
            ip_ranges: Vec::new(),
            hostname_patterns: Vec::new(),
            snmp_locations: Vec::new(),
            type_defaults: Vec::new(),
            unknown_department: default_unknown_bucket(),
            unknown_unit: default_unknown_bucket(),
        }
    }
}

/// Device store configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StoreConfig {
    /// JSON file store
    File {
        /// Path to the store file
        path: String,
    },

    /// In-memory store (not persistent)
    #[default]
    Memory,

    /// Custom store
    Custom {
        /// Factory name to use
        factory: String,
        /// Custom configuration data
        config: serde_json::Value,
    },
}

impl StoreConfig {
    /// Get the store type name
    pub fn type_name(&self) -> &str {
        match self {
            StoreConfig::File { .. } => "file",
            StoreConfig::Memory => "memory",
            StoreConfig::Custom { factory, .. } => factory,
        }
    }
}

/// Engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Maximum number of probes in flight within one run
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// Upper bound on enumerated hosts for a single run
    #[serde(default = "default_max_hosts_per_run")]
    pub max_hosts_per_run: usize,

    /// Devices loaded per status monitor batch
    #[serde(default = "default_monitor_batch_size")]
    pub monitor_batch_size: usize,

    /// Interval between status monitor cycles (in seconds)
    #[serde(default = "default_monitor_interval_secs")]
    pub monitor_interval_secs: u64,

    /// Interval between scheduled discovery runs over all configured subnets
    ///
    /// Set to 0 to disable scheduled discovery.
    #[serde(default)]
    pub discovery_interval_secs: u64,

    /// Refresh SNMP fields every N monitor cycles (0 = never)
    #[serde(default = "default_snmp_refresh_cycles")]
    pub snmp_refresh_cycles: u64,

    /// Capacity of the outbound event channel
    ///
    /// When full, new events are dropped (with a warning log).
    #[serde(default = "default_event_channel_capacity")]
    pub event_channel_capacity: usize,

    /// Record each probe attempt in the discovery queue
    #[serde(default = "default_true")]
    pub record_queue: bool,

    /// Completed discovery queue entries older than this are purged after
    /// each run (in seconds, 0 = keep forever)
    #[serde(default = "default_queue_retention_secs")]
    pub queue_retention_secs: u64,

    /// Additional metadata attached to run summaries
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

impl EngineConfig {
    /// Validate the engine configuration
    pub fn validate(&self) -> Result<(), crate::Error> {
        if self.concurrency == 0 {
            return Err(crate::Error::config("Engine concurrency must be > 0"));
        }
        if self.max_hosts_per_run == 0 {
            return Err(crate::Error::config("max_hosts_per_run must be > 0"));
        }
        if self.monitor_batch_size == 0 {
            return Err(crate::Error::config("monitor_batch_size must be > 0"));
        }
        if self.monitor_interval_secs == 0 {
            return Err(crate::Error::config("monitor_interval_secs must be > 0"));
        }
        if self.event_channel_capacity == 0 {
            return Err(crate::Error::config("event_channel_capacity must be > 0"));
        }
        Ok(())
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            max_hosts_per_run: default_max_hosts_per_run(),
            monitor_batch_size: default_monitor_batch_size(),
            monitor_interval_secs: default_monitor_interval_secs(),
            discovery_interval_secs: 0,
            snmp_refresh_cycles: default_snmp_refresh_cycles(),
            event_channel_capacity: default_event_channel_capacity(),
            record_queue: true,
            queue_retention_secs: default_queue_retention_secs(),
            metadata: HashMap::new(),
        }
    }
}

fn default_icmp_timeout_ms() -> u64 {
    1000
}

fn default_icmp_retries() -> u8 {
    2
}

fn default_snmp_communities() -> Vec<String> {
    vec!["public".to_string(), "private".to_string()]
}

fn default_snmp_port() -> u16 {
    161
}

fn default_snmp_timeout_ms() -> u64 {
    1000
}

fn default_true() -> bool {
    true
}

fn default_unknown_bucket() -> String {
    UNKNOWN_BUCKET.to_string()
}

fn default_concurrency() -> usize {
    32
}

fn default_max_hosts_per_run() -> usize {
    65_534
}

fn default_monitor_batch_size() -> usize {
    100
}

fn default_monitor_interval_secs() -> u64 {
    300
}

fn default_snmp_refresh_cycles() -> u64 {
    12
}

fn default_event_channel_capacity() -> usize {
    1000
}

fn default_queue_retention_secs() -> u64 {
    86400
}
