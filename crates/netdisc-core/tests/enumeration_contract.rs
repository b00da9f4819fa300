//! Contract Test: Target Enumeration
//!
//! Constraints verified:
//! - A CIDR with prefix p yields exactly 2^(32-p) - 2 hosts, each once
//! - Network and broadcast addresses are never probed
//! - Excluded IPs never reach the prober
//! - Oversized or malformed targets abort before any probing
//!
//! If this test fails, discovery probes the wrong address set.

mod common;

use common::*;
use netdisc_core::config::ExclusionConfig;
use netdisc_core::{ExclusionFilter, ScanTarget, expand_targets};
use std::collections::HashSet;
use std::net::Ipv4Addr;

#[test]
fn cidr_host_count_matches_prefix() {
    let none = ExclusionFilter::default();

    for prefix in 16..=30u32 {
        let target: ScanTarget = format!("172.16.0.0/{}", prefix).parse().unwrap();
        let hosts = expand_targets(&target, &[], &none, 1 << 16).unwrap();

        let expected = (1usize << (32 - prefix)) - 2;
        assert_eq!(hosts.len(), expected, "prefix /{}", prefix);

        let unique: HashSet<_> = hosts.iter().collect();
        assert_eq!(unique.len(), hosts.len(), "duplicates for /{}", prefix);

        let network = Ipv4Addr::new(172, 16, 0, 0);
        assert!(!hosts.contains(&network));
        let broadcast = Ipv4Addr::from(u32::from(network) + (1u32 << (32 - prefix)) - 1);
        assert!(!hosts.contains(&broadcast));
    }
}

#[test]
fn configured_subnets_are_merged_without_duplicates() {
    let subnets = vec!["10.1.0.0/24".to_string(), "10.1.0.128/25".to_string()];
    let hosts = expand_targets(
        &ScanTarget::AllConfigured,
        &subnets,
        &ExclusionFilter::default(),
        1024,
    )
    .unwrap();

    // The /25 lies inside the /24
    assert_eq!(hosts.len(), 254);
    assert!(hosts.windows(2).all(|w| w[0] < w[1]), "ascending order");
}

#[test]
fn exclusions_are_removed_from_enumeration() {
    let filter = ExclusionFilter::new(&ExclusionConfig {
        ips: vec![
            "*.*.*.1".to_string(),
            "192.168.5.200-192.168.5.254".to_string(),
            "192.168.5.64/27".to_string(),
        ],
        hostname_patterns: vec![],
    })
    .unwrap();

    let target: ScanTarget = "192.168.5.0/24".parse().unwrap();
    let hosts = expand_targets(&target, &[], &filter, 1024).unwrap();

    // 254 hosts - .1 - 55 (200..=254) - 32 (64..=95)
    assert_eq!(hosts.len(), 254 - 1 - 55 - 32);
    assert!(hosts.iter().all(|h| !filter.is_excluded_ip((*h).into())));
}

#[test]
fn range_bounds_are_inclusive() {
    let target: ScanTarget = "10.9.0.250-10.9.1.5".parse().unwrap();
    let hosts = expand_targets(&target, &[], &ExclusionFilter::default(), 1024).unwrap();
    assert_eq!(hosts.len(), 12);
    assert_eq!(hosts.first(), Some(&Ipv4Addr::new(10, 9, 0, 250)));
    assert_eq!(hosts.last(), Some(&Ipv4Addr::new(10, 9, 1, 5)));
}

#[tokio::test]
async fn invalid_targets_abort_before_probing() {
    let prober = ScriptedProber::new();
    let store = CountingStore::new();
    let mut config = minimal_config();
    config.engine.max_hosts_per_run = 300;

    let discovery = netdisc_core::DiscoveryOrchestrator::new(
        std::sync::Arc::new(prober.clone()),
        std::sync::Arc::new(store.clone()),
        &config,
        netdisc_core::IpLocks::new(),
        netdisc_core::EventSink::channel(16).0,
    )
    .unwrap();

    for target in [
        ScanTarget::Cidr("10.0.0.0/16".into()),
        ScanTarget::Cidr("10.0.0.0/31".into()),
        ScanTarget::Range {
            start: Ipv4Addr::new(10, 0, 0, 9),
            end: Ipv4Addr::new(10, 0, 0, 1),
        },
        ScanTarget::AllConfigured,
    ] {
        let err = discovery.run(&target).await.unwrap_err();
        assert!(err.is_config(), "{} should be a config error: {}", target, err);
    }

    assert_eq!(prober.probe_call_count(), 0);
    assert!(store.inner().is_empty().await);
}
