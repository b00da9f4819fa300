//! Device classification
//!
//! Maps SNMP `sysDescr` and the hostname to a vendor, device type and OS
//! using ordered rules. Rule order is part of the contract: the first
//! matching rule wins, so specific rules (e.g. "cisco ios") must precede
//! generic ones (e.g. "linux").
//!
//! Evaluation order:
//!
//! 1. `sysDescr` rules (case-insensitive substring)
//! 2. hostname rules (case-insensitive regex)
//! 3. fallback `{ vendor: None, device_type: "unknown", os: None }`
//!
//! Classification is a pure function; it never performs I/O.

use regex::{Regex, RegexBuilder};

use crate::config::{ClassificationConfig, HostnameRule, SysDescrRule};
use crate::error::{Error, Result};
use crate::model::Classification;

#[derive(Debug, Clone)]
struct CompiledSysDescrRule {
    needle: String,
    vendor: Option<String>,
    device_type: String,
    os: Option<String>,
}

#[derive(Debug, Clone)]
struct CompiledHostnameRule {
    regex: Regex,
    vendor: Option<String>,
    device_type: String,
    os: Option<String>,
}

/// Ordered rule-based classifier
#[derive(Debug, Clone)]
pub struct Classifier {
    sys_descr_rules: Vec<CompiledSysDescrRule>,
    hostname_rules: Vec<CompiledHostnameRule>,
}

impl Classifier {
    /// Build a classifier from explicit rule lists
    pub fn new(sys_descr_rules: &[SysDescrRule], hostname_rules: &[HostnameRule]) -> Result<Self> {
        let sys_descr_rules = sys_descr_rules
            .iter()
            .map(|rule| {
                if rule.contains.trim().is_empty() {
                    return Err(Error::config("sysDescr rule pattern cannot be empty"));
                }
                Ok(CompiledSysDescrRule {
                    needle: rule.contains.to_lowercase(),
                    vendor: rule.vendor.clone(),
                    device_type: rule.device_type.clone(),
                    os: rule.os.clone(),
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let hostname_rules = hostname_rules
            .iter()
            .map(|rule| {
                let regex = RegexBuilder::new(&rule.pattern)
                    .case_insensitive(true)
                    .build()
                    .map_err(|e| {
                        Error::config(format!("Invalid hostname rule '{}': {}", rule.pattern, e))
                    })?;
                Ok(CompiledHostnameRule {
                    regex,
                    vendor: rule.vendor.clone(),
                    device_type: rule.device_type.clone(),
                    os: rule.os.clone(),
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            sys_descr_rules,
            hostname_rules,
        })
    }

    /// Build a classifier from configuration
    ///
    /// An empty rule list is replaced by the corresponding built-in list.
    pub fn from_config(config: &ClassificationConfig) -> Result<Self> {
        let sys_descr = if config.sys_descr_rules.is_empty() {
            builtin_sys_descr_rules()
        } else {
            config.sys_descr_rules.clone()
        };
        let hostname = if config.hostname_rules.is_empty() {
            builtin_hostname_rules()
        } else {
            config.hostname_rules.clone()
        };
        Self::new(&sys_descr, &hostname)
    }

    /// Classify a host
    pub fn classify(&self, sys_descr: Option<&str>, hostname: Option<&str>) -> Classification {
        if let Some(descr) = sys_descr.filter(|d| !d.trim().is_empty()) {
            let descr = descr.to_lowercase();
            if let Some(rule) = self
                .sys_descr_rules
                .iter()
                .find(|rule| descr.contains(&rule.needle))
            {
                return Classification {
                    vendor: rule.vendor.clone(),
                    device_type: rule.device_type.clone(),
                    os: rule.os.clone(),
                };
            }
        }

        if let Some(name) = hostname.filter(|h| !h.trim().is_empty())
            && let Some(rule) = self.hostname_rules.iter().find(|rule| rule.regex.is_match(name))
        {
            return Classification {
                vendor: rule.vendor.clone(),
                device_type: rule.device_type.clone(),
                os: rule.os.clone(),
            };
        }

        Classification::unknown()
    }
}

fn descr(contains: &str, vendor: &str, device_type: &str, os: &str) -> SysDescrRule {
    SysDescrRule {
        contains: contains.to_string(),
        vendor: (!vendor.is_empty()).then(|| vendor.to_string()),
        device_type: device_type.to_string(),
        os: (!os.is_empty()).then(|| os.to_string()),
    }
}

fn host(pattern: &str, device_type: &str) -> HostnameRule {
    HostnameRule {
        pattern: pattern.to_string(),
        device_type: device_type.to_string(),
        vendor: None,
        os: None,
    }
}

/// Built-in sysDescr rules, most specific first
pub fn builtin_sys_descr_rules() -> Vec<SysDescrRule> {
    vec![
        descr("cisco nx-os", "Cisco", "switch", "NX-OS"),
        descr("cisco adaptive security appliance", "Cisco", "firewall", "ASA"),
        descr("cisco ios xe", "Cisco", "router", "IOS XE"),
        descr("cisco ios", "Cisco", "router", "IOS"),
        descr("junos", "Juniper", "router", "Junos"),
        descr("fortigate", "Fortinet", "firewall", "FortiOS"),
        descr("routeros", "MikroTik", "router", "RouterOS"),
        descr("procurve", "HP", "switch", "ProCurve"),
        descr("aruba", "Aruba", "switch", "ArubaOS"),
        descr("ubiquiti", "Ubiquiti", "access_point", ""),
        descr("jetdirect", "HP", "printer", ""),
        descr("laserjet", "HP", "printer", ""),
        descr("printer", "", "printer", ""),
        descr("synology", "Synology", "nas", "DSM"),
        descr("vmware esxi", "VMware", "server", "ESXi"),
        descr("windows", "Microsoft", "workstation", "Windows"),
        descr("linux", "", "server", "Linux"),
    ]
}

/// Built-in hostname rules
pub fn builtin_hostname_rules() -> Vec<HostnameRule> {
    vec![
        host(r"^sw[-_]", "switch"),
        host(r"^(rt|rtr|router)[-_]", "router"),
        host(r"^fw[-_]", "firewall"),
        host(r"^ap[-_]", "access_point"),
        host(r"^(prn|printer|imp)[-_]", "printer"),
        host(r"^(srv|server)[-_]", "server"),
        host(r"^(pc|ws|desktop)[-_]", "workstation"),
        host(r"^(lt|laptop)[-_]", "laptop"),
        host(r"^(cam|ipcam)[-_]", "camera"),
        host(r"^(ups)[-_]", "ups"),
    ]
}
