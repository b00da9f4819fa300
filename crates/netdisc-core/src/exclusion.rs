//! Exclusion filter
//!
//! Gateways, broadcast addresses and reserved DHCP ranges are removed before
//! any probing. Hostname exclusions are checked once a hostname is known and
//! still prevent every device write.

use ipnetwork::Ipv4Network;
use regex::{Regex, RegexBuilder};
use std::net::{IpAddr, Ipv4Addr};

use crate::config::ExclusionConfig;
use crate::error::{Error, Result};

/// One parsed IP exclusion pattern
#[derive(Debug, Clone, PartialEq, Eq)]
enum IpPattern {
    Exact(Ipv4Addr),
    Network(Ipv4Network),
    Range(Ipv4Addr, Ipv4Addr),
    /// `None` octets match anything
    Wildcard([Option<u8>; 4]),
}

impl IpPattern {
    fn parse(raw: &str) -> Result<Self> {
        let raw = raw.trim();

        if raw.contains('*') {
            let parts: Vec<&str> = raw.split('.').collect();
            if parts.len() != 4 {
                return Err(Error::config(format!("Malformed wildcard pattern '{}'", raw)));
            }
            let mut octets = [None; 4];
            for (slot, part) in octets.iter_mut().zip(parts) {
                if part != "*" {
                    *slot = Some(part.parse::<u8>().map_err(|_| {
                        Error::config(format!("Malformed wildcard pattern '{}'", raw))
                    })?);
                }
            }
            return Ok(IpPattern::Wildcard(octets));
        }

        if let Some((start, end)) = raw.split_once('-') {
            let start: Ipv4Addr = start
                .trim()
                .parse()
                .map_err(|_| Error::config(format!("Malformed exclusion range '{}'", raw)))?;
            let end: Ipv4Addr = end
                .trim()
                .parse()
                .map_err(|_| Error::config(format!("Malformed exclusion range '{}'", raw)))?;
            if u32::from(start) > u32::from(end) {
                return Err(Error::config(format!(
                    "Exclusion range '{}' has start after end",
                    raw
                )));
            }
            return Ok(IpPattern::Range(start, end));
        }

        if raw.contains('/') {
            let network: Ipv4Network = raw
                .parse()
                .map_err(|e| Error::config(format!("Malformed exclusion CIDR '{}': {}", raw, e)))?;
            return Ok(IpPattern::Network(network));
        }

        raw.parse()
            .map(IpPattern::Exact)
            .map_err(|_| Error::config(format!("Malformed exclusion pattern '{}'", raw)))
    }

    fn matches(&self, ip: Ipv4Addr) -> bool {
        match self {
            IpPattern::Exact(exact) => *exact == ip,
            IpPattern::Network(network) => network.contains(ip),
            IpPattern::Range(start, end) => {
                let value = u32::from(ip);
                u32::from(*start) <= value && value <= u32::from(*end)
            }
            IpPattern::Wildcard(octets) => octets
                .iter()
                .zip(ip.octets())
                .all(|(expected, actual)| expected.is_none_or(|o| o == actual)),
        }
    }
}

/// Compiled exclusion configuration
#[derive(Debug, Clone, Default)]
pub struct ExclusionFilter {
    ip_patterns: Vec<IpPattern>,
    hostname_patterns: Vec<Regex>,
}

impl ExclusionFilter {
    /// Compile an exclusion configuration
    pub fn new(config: &ExclusionConfig) -> Result<Self> {
        let ip_patterns = config
            .ips
            .iter()
            .map(|raw| IpPattern::parse(raw))
            .collect::<Result<Vec<_>>>()?;

        let hostname_patterns = config
            .hostname_patterns
            .iter()
            .map(|pattern| {
                RegexBuilder::new(pattern)
                    .case_insensitive(true)
                    .build()
                    .map_err(|e| {
                        Error::config(format!("Invalid hostname exclusion '{}': {}", pattern, e))
                    })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            ip_patterns,
            hostname_patterns,
        })
    }

    /// Check whether an IP must be skipped
    pub fn is_excluded_ip(&self, ip: IpAddr) -> bool {
        match ip {
            IpAddr::V4(v4) => self.ip_patterns.iter().any(|p| p.matches(v4)),
            IpAddr::V6(_) => false,
        }
    }

    /// Check whether a hostname must be skipped
    pub fn is_excluded_hostname(&self, hostname: &str) -> bool {
        self.hostname_patterns.iter().any(|re| re.is_match(hostname))
    }
}
