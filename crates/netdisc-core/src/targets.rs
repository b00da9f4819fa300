//! Scan target enumeration
//!
//! Expands a CIDR, an explicit start–end range, or the configured subnet list
//! into the ordered, deduplicated set of host IPs a discovery run probes.

use std::collections::BTreeSet;
use std::fmt;
use std::net::{IpAddr, Ipv4Addr};
use std::str::FromStr;

use crate::config::parse_scan_cidr;
use crate::error::{Error, Result};
use crate::exclusion::ExclusionFilter;

/// What a discovery run scans
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanTarget {
    /// A subnet in CIDR form
    Cidr(String),
    /// An inclusive IP range
    Range { start: Ipv4Addr, end: Ipv4Addr },
    /// Every subnet in the configuration
    AllConfigured,
}

impl fmt::Display for ScanTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScanTarget::Cidr(cidr) => f.write_str(cidr),
            ScanTarget::Range { start, end } => write!(f, "{}-{}", start, end),
            ScanTarget::AllConfigured => f.write_str("all"),
        }
    }
}

impl FromStr for ScanTarget {
    type Err = Error;

    /// Accepts `all`, `a.b.c.d/nn` or `a.b.c.d-e.f.g.h`
    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        if s.eq_ignore_ascii_case("all") {
            return Ok(ScanTarget::AllConfigured);
        }
        if s.contains('/') {
            parse_scan_cidr(s)?;
            return Ok(ScanTarget::Cidr(s.to_string()));
        }
        if let Some((start, end)) = s.split_once('-') {
            let start = start
                .trim()
                .parse()
                .map_err(|_| Error::config(format!("Malformed range start in '{}'", s)))?;
            let end = end
                .trim()
                .parse()
                .map_err(|_| Error::config(format!("Malformed range end in '{}'", s)))?;
            return Ok(ScanTarget::Range { start, end });
        }
        Err(Error::config(format!(
            "Unrecognised scan target '{}' (expected CIDR, start-end range, or 'all')",
            s
        )))
    }
}

/// Expand a scan target into host IPs
///
/// CIDR inputs drop their network and broadcast addresses. Range bounds are
/// inclusive. Excluded IPs are removed. The result is ascending and contains
/// each address once, even when configured subnets overlap.
pub fn expand_targets(
    target: &ScanTarget,
    configured_subnets: &[String],
    exclusions: &ExclusionFilter,
    max_hosts: usize,
) -> Result<Vec<Ipv4Addr>> {
    let mut hosts = BTreeSet::new();

    match target {
        ScanTarget::Cidr(cidr) => add_cidr(&mut hosts, cidr, max_hosts)?,
        ScanTarget::Range { start, end } => {
            let (start, end) = (u32::from(*start), u32::from(*end));
            if start > end {
                return Err(Error::config(format!(
                    "Range start {} is after end {}",
                    Ipv4Addr::from(start),
                    Ipv4Addr::from(end)
                )));
            }
            ensure_within_cap((end - start) as u64 + 1, max_hosts, &target.to_string())?;
            hosts.extend((start..=end).map(Ipv4Addr::from));
        }
        ScanTarget::AllConfigured => {
            if configured_subnets.is_empty() {
                return Err(Error::config("No subnets configured"));
            }
            for cidr in configured_subnets {
                add_cidr(&mut hosts, cidr, max_hosts)?;
            }
        }
    }

    ensure_within_cap(hosts.len() as u64, max_hosts, &target.to_string())?;

    Ok(hosts
        .into_iter()
        .filter(|ip| !exclusions.is_excluded_ip(IpAddr::V4(*ip)))
        .collect())
}

fn add_cidr(hosts: &mut BTreeSet<Ipv4Addr>, cidr: &str, max_hosts: usize) -> Result<()> {
    let network = parse_scan_cidr(cidr)?;
    let usable = (1u64 << (32 - network.prefix() as u32)) - 2;
    ensure_within_cap(usable, max_hosts, cidr)?;

    let first = u32::from(network.network()) + 1;
    let last = u32::from(network.broadcast()) - 1;
    hosts.extend((first..=last).map(Ipv4Addr::from));
    Ok(())
}

fn ensure_within_cap(count: u64, max_hosts: usize, label: &str) -> Result<()> {
    if count > max_hosts as u64 {
        return Err(Error::config(format!(
            "Target {} expands to {} hosts, above the limit of {}",
            label, count, max_hosts
        )));
    }
    Ok(())
}
