//! Engine settings.
//!
//! Every threshold the engine uses is a configurable default. The tolerance
//! values in particular are empirical and worth calibrating against the
//! resolvers actually in use.

use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

use crate::dns::distribution::{DEFAULT_TOLERANCE, HIGH_VOLUME_TOLERANCE, STRICT_TOLERANCE};
use crate::dns::geo::DEFAULT_GEO_URL;
use crate::dns::types::TestConfig;

/// A named public resolver used for cross-checks.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PublicResolver {
    pub name: String,
    #[serde(rename = "IP")]
    pub ip: IpAddr,
}

impl PublicResolver {
    pub fn new(name: impl Into<String>, ip: IpAddr) -> Self {
        Self {
            name: name.into(),
            ip,
        }
    }
}

/// Client subnet sent as an EDNS hint to emulate a client in some region.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TestSubnet {
    pub label: String,
    pub subnet: String,
}

impl TestSubnet {
    pub fn new(label: impl Into<String>, subnet: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            subnet: subnet.into(),
        }
    }
}

/// Tunable engine behavior.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EngineSettings {
    /// Allowed deviation for standard weighted tests
    pub default_tolerance: f64,
    /// Allowed deviation for high-volume tests
    pub high_volume_tolerance: f64,
    /// Allowed deviation for high-volume tests above `strict_threshold`
    pub strict_tolerance: f64,
    /// Iteration count above which the high-volume path is used
    pub high_volume_threshold: usize,
    /// Iteration count above which `strict_tolerance` applies
    pub strict_threshold: usize,
    /// Deadline for one lookup
    pub lookup_timeout_ms: u64,
    /// Soft deadline for a whole high-volume batch
    pub batch_timeout_secs: u64,
    /// Concurrent lookups in flight on the high-volume path
    pub max_in_flight: usize,
    /// Raw per-query lines kept for the high-volume report
    pub sample_size: usize,
    /// Delay between lookups for runs of at most 100 iterations
    pub small_run_delay_ms: u64,
    /// Delay between lookups for runs of at most 1000 iterations
    pub medium_run_delay_ms: u64,
    /// Delay between lookups for larger standard runs
    pub large_run_delay_ms: u64,
    /// Delay between lookup submissions on the high-volume path
    pub high_volume_delay_ms: u64,
    /// Resolver used by the high-volume path when the test names none
    pub default_resolver: IpAddr,
    pub public_resolvers: Vec<PublicResolver>,
    pub test_subnets: Vec<TestSubnet>,
    /// Client subnet unlikely to have an explicit location record
    pub unmapped_subnet: String,
    /// Name answering with the querying resolver's egress address
    pub identity_name: String,
    /// Name answering with the client subnet the resolver forwarded
    pub ecs_probe_name: String,
    /// Identity queries used to detect resolver rotation
    pub rotation_probe_count: usize,
    /// Rounds of vantage-point resolution for geolocation tests
    pub geo_rounds: usize,
    /// Pause after requesting a new vantage point
    pub vantage_settle_ms: u64,
    pub enable_vantage_points: bool,
    pub tor_control_addr: SocketAddr,
    pub tor_socks_addr: SocketAddr,
    pub tor_password: Option<String>,
    /// Look up unknown addresses with the geolocation service
    pub enable_geo_lookup: bool,
    pub geo_lookup_url: String,
    pub reachability_timeout_ms: u64,
    /// Test runs executing at the same time
    pub worker_pool_size: usize,
    /// Lookup tool executable
    pub dig_path: String,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            default_tolerance: DEFAULT_TOLERANCE,
            high_volume_tolerance: HIGH_VOLUME_TOLERANCE,
            strict_tolerance: STRICT_TOLERANCE,
            high_volume_threshold: 5_000,
            strict_threshold: 10_000,
            lookup_timeout_ms: 3_000,
            batch_timeout_secs: 900,
            max_in_flight: 16,
            sample_size: 20,
            small_run_delay_ms: 100,
            medium_run_delay_ms: 20,
            large_run_delay_ms: 5,
            high_volume_delay_ms: 1,
            default_resolver: IpAddr::V4(Ipv4Addr::new(8, 8, 8, 8)),
            public_resolvers: vec![
                PublicResolver::new("Google", IpAddr::V4(Ipv4Addr::new(8, 8, 8, 8))),
                PublicResolver::new("Cloudflare", IpAddr::V4(Ipv4Addr::new(1, 1, 1, 1))),
                PublicResolver::new("Quad9", IpAddr::V4(Ipv4Addr::new(9, 9, 9, 9))),
            ],
            test_subnets: vec![
                TestSubnet::new("north-america", "24.48.0.0/24"),
                TestSubnet::new("europe", "81.2.69.0/24"),
                TestSubnet::new("asia-pacific", "1.0.16.0/24"),
                TestSubnet::new("south-america", "200.160.0.0/24"),
                TestSubnet::new("oceania", "1.128.0.0/24"),
            ],
            unmapped_subnet: "41.0.0.0/24".to_string(),
            identity_name: "whoami.akamai.net".to_string(),
            ecs_probe_name: "o-o.myaddr.l.google.com".to_string(),
            rotation_probe_count: 5,
            geo_rounds: 5,
            vantage_settle_ms: 3_000,
            enable_vantage_points: false,
            tor_control_addr: SocketAddr::from(([127, 0, 0, 1], 9051)),
            tor_socks_addr: SocketAddr::from(([127, 0, 0, 1], 9050)),
            tor_password: None,
            enable_geo_lookup: false,
            geo_lookup_url: DEFAULT_GEO_URL.to_string(),
            reachability_timeout_ms: 2_000,
            worker_pool_size: 4,
            dig_path: "dig".to_string(),
        }
    }
}

impl EngineSettings {
    /// Check whether a run of `iterations` takes the high-volume path.
    #[must_use]
    pub fn is_high_volume(&self, iterations: usize) -> bool {
        iterations > self.high_volume_threshold
    }

    /// Tolerance for a test: the test's own override, else the tightened
    /// high-volume values, else the default.
    #[must_use]
    pub fn tolerance_for(&self, config: &TestConfig) -> f64 {
        if let Some(tolerance) = config.tolerance {
            return tolerance;
        }
        if !self.is_high_volume(config.iterations) {
            self.default_tolerance
        } else if config.iterations > self.strict_threshold {
            self.strict_tolerance
        } else {
            self.high_volume_tolerance
        }
    }

    /// Pause between standard lookups; shorter for longer runs.
    #[must_use]
    pub fn inter_query_delay(&self, iterations: usize) -> Duration {
        let ms = if self.is_high_volume(iterations) {
            self.high_volume_delay_ms
        } else if iterations <= 100 {
            self.small_run_delay_ms
        } else if iterations <= 1_000 {
            self.medium_run_delay_ms
        } else {
            self.large_run_delay_ms
        };
        Duration::from_millis(ms)
    }

    #[must_use]
    pub fn lookup_timeout(&self) -> Duration {
        Duration::from_millis(self.lookup_timeout_ms)
    }

    #[must_use]
    pub fn reachability_timeout(&self) -> Duration {
        Duration::from_millis(self.reachability_timeout_ms)
    }

    #[must_use]
    pub fn batch_timeout(&self) -> Duration {
        Duration::from_secs(self.batch_timeout_secs)
    }
}
