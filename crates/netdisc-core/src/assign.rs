//! Department/unit assignment
//!
//! Placement priority is fixed:
//!
//! 1. IP falls within a configured CIDR range
//! 2. Hostname matches a configured pattern
//! 3. SNMP data (sysLocation) matches a configured pattern
//! 4. Device type has a configured default
//! 5. The sentinel "Unknown" department/unit
//!
//! Within each level the first matching rule wins. Overlapping IP ranges are
//! therefore legal but reported once, at construction.
//!
//! [`AssignmentRules`] is the pure decision; [`AssignmentResolver`] turns the
//! decision into store ids, creating missing units on the way.

use ipnetwork::Ipv4Network;
use regex::{Regex, RegexBuilder};
use std::fmt;
use std::net::IpAddr;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::config::AssignmentConfig;
use crate::error::{Error, Result};
use crate::model::{Assignment, Classification, SnmpSystemInfo};
use crate::traits::DeviceStore;

/// Which rule level produced an assignment
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssignmentSource {
    IpRange,
    HostnamePattern,
    SnmpLocation,
    DeviceType,
    Unknown,
}

impl fmt::Display for AssignmentSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AssignmentSource::IpRange => "ip_range",
            AssignmentSource::HostnamePattern => "hostname_pattern",
            AssignmentSource::SnmpLocation => "snmp_location",
            AssignmentSource::DeviceType => "device_type",
            AssignmentSource::Unknown => "unknown",
        };
        f.write_str(name)
    }
}

/// Department/unit names chosen for a device, before id lookup
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssignmentTarget {
    pub department: String,
    pub unit: String,
    pub source: AssignmentSource,
}

#[derive(Debug, Clone)]
struct Placement {
    department: String,
    unit: Option<String>,
}

/// Compiled assignment rules
#[derive(Debug, Clone)]
pub struct AssignmentRules {
    ip_ranges: Vec<(Ipv4Network, Placement)>,
    hostname_patterns: Vec<(Regex, Placement)>,
    snmp_locations: Vec<(Regex, Placement)>,
    type_defaults: Vec<(String, Placement)>,
    unknown_department: String,
    unknown_unit: String,
}

fn compile_pattern(pattern: &str, kind: &str) -> Result<Regex> {
    RegexBuilder::new(pattern)
        .case_insensitive(true)
        .build()
        .map_err(|e| Error::config(format!("Invalid {} pattern '{}': {}", kind, pattern, e)))
}

impl AssignmentRules {
    /// Compile the assignment configuration
    pub fn compile(config: &AssignmentConfig) -> Result<Self> {
        let ip_ranges = config
            .ip_ranges
            .iter()
            .map(|rule| {
                let network: Ipv4Network = rule.cidr.trim().parse().map_err(|e| {
                    Error::config(format!("Malformed assignment CIDR '{}': {}", rule.cidr, e))
                })?;
                Ok((
                    network,
                    Placement {
                        department: rule.department.clone(),
                        unit: rule.unit.clone(),
                    },
                ))
            })
            .collect::<Result<Vec<_>>>()?;

        let hostname_patterns = config
            .hostname_patterns
            .iter()
            .map(|rule| {
                Ok((
                    compile_pattern(&rule.pattern, "hostname")?,
                    Placement {
                        department: rule.department.clone(),
                        unit: rule.unit.clone(),
                    },
                ))
            })
            .collect::<Result<Vec<_>>>()?;

        let snmp_locations = config
            .snmp_locations
            .iter()
            .map(|rule| {
                Ok((
                    compile_pattern(&rule.pattern, "sysLocation")?,
                    Placement {
                        department: rule.department.clone(),
                        unit: rule.unit.clone(),
                    },
                ))
            })
            .collect::<Result<Vec<_>>>()?;

        let type_defaults = config
            .type_defaults
            .iter()
            .map(|rule| {
                (
                    rule.device_type.to_lowercase(),
                    Placement {
                        department: rule.department.clone(),
                        unit: rule.unit.clone(),
                    },
                )
            })
            .collect();

        Ok(Self {
            ip_ranges,
            hostname_patterns,
            snmp_locations,
            type_defaults,
            unknown_department: config.unknown_department.clone(),
            unknown_unit: config.unknown_unit.clone(),
        })
    }

    /// Pairs of configured IP ranges that overlap (first one wins at runtime)
    pub fn overlapping_ranges(&self) -> Vec<(Ipv4Network, Ipv4Network)> {
        let mut overlaps = Vec::new();
        for (i, (a, _)) in self.ip_ranges.iter().enumerate() {
            for (b, _) in &self.ip_ranges[i + 1..] {
                if a.contains(b.network()) || b.contains(a.network()) {
                    overlaps.push((*a, *b));
                }
            }
        }
        overlaps
    }

    pub fn unknown_department(&self) -> &str {
        &self.unknown_department
    }

    pub fn unknown_unit(&self) -> &str {
        &self.unknown_unit
    }

    /// Decide department/unit names for a device
    pub fn resolve_target(
        &self,
        ip: IpAddr,
        hostname: Option<&str>,
        classification: &Classification,
        snmp: Option<&SnmpSystemInfo>,
    ) -> AssignmentTarget {
        if let IpAddr::V4(v4) = ip
            && let Some((_, placement)) = self.ip_ranges.iter().find(|(net, _)| net.contains(v4))
        {
            return self.target(placement, classification, AssignmentSource::IpRange);
        }

        if let Some(name) = hostname
            && let Some((_, placement)) =
                self.hostname_patterns.iter().find(|(re, _)| re.is_match(name))
        {
            return self.target(placement, classification, AssignmentSource::HostnamePattern);
        }

        if let Some(location) = snmp.and_then(|s| s.sys_location.as_deref())
            && let Some((_, placement)) =
                self.snmp_locations.iter().find(|(re, _)| re.is_match(location))
        {
            return self.target(placement, classification, AssignmentSource::SnmpLocation);
        }

        let device_type = classification.device_type.to_lowercase();
        if let Some((_, placement)) = self.type_defaults.iter().find(|(t, _)| *t == device_type) {
            return self.target(placement, classification, AssignmentSource::DeviceType);
        }

        AssignmentTarget {
            department: self.unknown_department.clone(),
            unit: self.unknown_unit.clone(),
            source: AssignmentSource::Unknown,
        }
    }

    /// A matched department without an explicit unit gets a unit named after
    /// the device type; unclassified devices land in the unknown unit.
    fn target(
        &self,
        placement: &Placement,
        classification: &Classification,
        source: AssignmentSource,
    ) -> AssignmentTarget {
        let unit = match &placement.unit {
            Some(unit) => unit.clone(),
            None if classification.is_unknown() => self.unknown_unit.clone(),
            None => classification.device_type.clone(),
        };
        AssignmentTarget {
            department: placement.department.clone(),
            unit,
            source,
        }
    }
}

/// Resolves assignment targets into department/unit ids
pub struct AssignmentResolver {
    rules: AssignmentRules,
    store: Arc<dyn DeviceStore>,
}

impl AssignmentResolver {
    /// Create a resolver, logging configuration conflicts once
    pub fn new(config: &AssignmentConfig, store: Arc<dyn DeviceStore>) -> Result<Self> {
        let rules = AssignmentRules::compile(config)?;

        for (first, second) in rules.overlapping_ranges() {
            warn!(
                "Assignment IP ranges {} and {} overlap; {} takes priority",
                first, second, first
            );
        }

        Ok(Self { rules, store })
    }

    pub fn rules(&self) -> &AssignmentRules {
        &self.rules
    }

    /// Create the sentinel department/unit if they do not exist yet
    pub async fn ensure_unknown_bucket(&self) -> Result<Assignment> {
        let (department, unit) = self
            .store
            .ensure_unknown_bucket(&self.rules.unknown_department, &self.rules.unknown_unit)
            .await?;
        Ok(Assignment {
            department_id: Some(department.id),
            unit_id: Some(unit.id),
        })
    }

    /// Resolve a device placement into store ids
    ///
    /// Missing departments and units are created through the store's
    /// lookup-or-create operations.
    pub async fn resolve(
        &self,
        ip: IpAddr,
        hostname: Option<&str>,
        classification: &Classification,
        snmp: Option<&SnmpSystemInfo>,
    ) -> Result<(Assignment, AssignmentTarget)> {
        let target = self.rules.resolve_target(ip, hostname, classification, snmp);

        let department = self.store.get_or_create_department(&target.department).await?;
        let unit = match self.store.find_unit(department.id, &target.unit).await? {
            Some(unit) => unit,
            None => {
                debug!(
                    "{}: creating unit '{}' in department '{}'",
                    ip, target.unit, department.name
                );
                self.store.get_or_create_unit(department.id, &target.unit).await?
            }
        };

        debug!(
            "{}: assigned to {}/{} via {}",
            ip, department.name, unit.name, target.source
        );

        Ok((
            Assignment {
                department_id: Some(department.id),
                unit_id: Some(unit.id),
            },
            target,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{IpRangeRule, PatternRule, TypeRule};
    use crate::state::MemoryDeviceStore;

    fn config() -> AssignmentConfig {
        AssignmentConfig {
            ip_ranges: vec![
                IpRangeRule {
                    cidr: "10.10.0.0/24".into(),
                    department: "Finance".into(),
                    unit: Some("Accounting".into()),
                },
                IpRangeRule {
                    cidr: "10.10.0.0/16".into(),
                    department: "Headquarters".into(),
                    unit: None,
                },
            ],
            hostname_patterns: vec![PatternRule {
                pattern: "^prod-".into(),
                department: "Production".into(),
                unit: None,
            }],
            snmp_locations: vec![PatternRule {
                pattern: "warehouse".into(),
                department: "Logistics".into(),
                unit: Some("Warehouse".into()),
            }],
            type_defaults: vec![TypeRule {
                device_type: "printer".into(),
                department: "IT".into(),
                unit: Some("Printers".into()),
            }],
            ..AssignmentConfig::default()
        }
    }

    fn classification(device_type: &str) -> Classification {
        Classification {
            vendor: None,
            device_type: device_type.to_string(),
            os: None,
        }
    }

    fn ip(s: &str) -> IpAddr {
        s.parse().unwrap()
    }

    #[test]
    fn test_priority_order() {
        let rules = AssignmentRules::compile(&config()).unwrap();
        let printer = classification("printer");
        let snmp = SnmpSystemInfo {
            sys_location: Some("Main Warehouse, bay 3".into()),
            ..SnmpSystemInfo::default()
        };

        // IP range beats everything
        let t = rules.resolve_target(ip("10.10.0.5"), Some("prod-line1"), &printer, Some(&snmp));
        assert_eq!((t.department.as_str(), t.source), ("Finance", AssignmentSource::IpRange));

        // Hostname beats SNMP and type
        let t = rules.resolve_target(ip("172.16.0.5"), Some("PROD-line1"), &printer, Some(&snmp));
        assert_eq!(t.source, AssignmentSource::HostnamePattern);

        // SNMP location beats type
        let t = rules.resolve_target(ip("172.16.0.5"), None, &printer, Some(&snmp));
        assert_eq!((t.department.as_str(), t.unit.as_str()), ("Logistics", "Warehouse"));

        // Type default
        let t = rules.resolve_target(ip("172.16.0.5"), None, &printer, None);
        assert_eq!((t.department.as_str(), t.unit.as_str()), ("IT", "Printers"));

        // Unknown bucket
        let t = rules.resolve_target(ip("172.16.0.5"), None, &Classification::unknown(), None);
        assert_eq!(t.department, "Unknown");
        assert_eq!(t.unit, "Unknown");
        assert_eq!(t.source, AssignmentSource::Unknown);
    }

    #[test]
    fn test_first_overlapping_range_wins() {
        let rules = AssignmentRules::compile(&config()).unwrap();
        let t = rules.resolve_target(ip("10.10.0.9"), None, &Classification::unknown(), None);
        assert_eq!(t.department, "Finance");
        let t = rules.resolve_target(ip("10.10.7.9"), None, &classification("switch"), None);
        assert_eq!(t.department, "Headquarters");
        assert_eq!(t.unit, "switch");

        assert_eq!(rules.overlapping_ranges().len(), 1);
    }

    #[test]
    fn test_invalid_rules_rejected() {
        let mut bad = config();
        bad.ip_ranges[0].cidr = "10.10.0.0/99".into();
        assert!(AssignmentRules::compile(&bad).is_err());

        let mut bad = config();
        bad.hostname_patterns[0].pattern = "(".into();
        assert!(AssignmentRules::compile(&bad).is_err());
    }

    #[tokio::test]
    async fn test_resolver_auto_provisions_unit_once() {
        let store: Arc<dyn DeviceStore> = Arc::new(MemoryDeviceStore::new());
        let resolver = AssignmentResolver::new(&config(), Arc::clone(&store)).unwrap();

        let (first, _) = resolver
            .resolve(ip("10.10.3.3"), None, &classification("switch"), None)
            .await
            .unwrap();
        let (second, _) = resolver
            .resolve(ip("10.10.3.4"), None, &classification("switch"), None)
            .await
            .unwrap();
        assert_eq!(first, second);

        let department = store.find_department("Headquarters").await.unwrap().unwrap();
        let unit = store.find_unit(department.id, "switch").await.unwrap().unwrap();
        assert_eq!(first.unit_id, Some(unit.id));
    }

    #[tokio::test]
    async fn test_unknown_bucket_is_stable() {
        let store: Arc<dyn DeviceStore> = Arc::new(MemoryDeviceStore::new());
        let resolver =
            AssignmentResolver::new(&AssignmentConfig::default(), Arc::clone(&store)).unwrap();

        let sentinel = resolver.ensure_unknown_bucket().await.unwrap();
        let (resolved, target) = resolver
            .resolve(ip("192.168.1.2"), None, &Classification::unknown(), None)
            .await
            .unwrap();
        assert_eq!(target.source, AssignmentSource::Unknown);
        assert_eq!(resolved, sentinel);
    }
}
