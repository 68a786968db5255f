//! Routing-policy test types and data structures.
//!
//! This module provides the core types used for describing a test run,
//! its outcome, and the address records found during discovery.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::net::IpAddr;

use crate::error::{Error, Result};

/// Routing policy under test.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PolicyType {
    /// Weighted round-robin between endpoints
    #[default]
    Weighted,
    /// Answer depends on the client's geographic location
    Geolocation,
    /// Answer depends on measured latency to the client
    Latency,
    /// Primary/secondary health-based failover
    Failover,
    /// Answer depends on the client's source network
    IpBased,
    /// Up to eight healthy records returned per answer
    MultivalueAnswer,
}

impl PolicyType {
    /// Get all available policy names.
    #[must_use]
    pub fn names() -> &'static [&'static str] {
        &[
            "weighted",
            "geolocation",
            "latency",
            "failover",
            "ip_based",
            "multivalue_answer",
        ]
    }
}

impl std::str::FromStr for PolicyType {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "weighted" => Ok(Self::Weighted),
            "geolocation" | "geo" => Ok(Self::Geolocation),
            "latency" => Ok(Self::Latency),
            "failover" => Ok(Self::Failover),
            "ip_based" | "ipbased" => Ok(Self::IpBased),
            "multivalue_answer" | "multivalue" => Ok(Self::MultivalueAnswer),
            _ => Err(format!(
                "Unknown policy: {}. Valid options are: {:?}",
                s,
                Self::names()
            )),
        }
    }
}

impl std::fmt::Display for PolicyType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Weighted => write!(f, "WEIGHTED"),
            Self::Geolocation => write!(f, "GEOLOCATION"),
            Self::Latency => write!(f, "LATENCY"),
            Self::Failover => write!(f, "FAILOVER"),
            Self::IpBased => write!(f, "IP_BASED"),
            Self::MultivalueAnswer => write!(f, "MULTIVALUE_ANSWER"),
        }
    }
}

/// Final verdict of a test run.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TestResult {
    /// Observed behavior matches the expected policy
    Passed,
    /// Some evidence of the policy, but not conclusive
    Partial,
    /// Observed behavior contradicts the expected policy
    Failed,
    /// The run hit an unexpected execution error
    #[default]
    Unknown,
    /// The run was stopped before completing
    Cancelled,
}

impl TestResult {
    /// Check if the run finished with a verdict (not cancelled or errored).
    #[must_use]
    pub fn is_verdict(&self) -> bool {
        matches!(self, Self::Passed | Self::Partial | Self::Failed)
    }
}

impl std::fmt::Display for TestResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Passed => write!(f, "PASSED"),
            Self::Partial => write!(f, "PARTIAL"),
            Self::Failed => write!(f, "FAILED"),
            Self::Unknown => write!(f, "UNKNOWN"),
            Self::Cancelled => write!(f, "CANCELLED"),
        }
    }
}

/// Reporting classification of a distribution, independent of pass/fail.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Compliance {
    Compliant,
    PartiallyCompliant,
    NonCompliant,
}

impl Compliance {
    /// Classify a maximum deviation (fraction, `0.05` = 5%).
    #[must_use]
    pub fn from_max_deviation(max_deviation: f64) -> Self {
        if max_deviation < 0.05 {
            Self::Compliant
        } else if max_deviation < 0.15 {
            Self::PartiallyCompliant
        } else {
            Self::NonCompliant
        }
    }
}

impl std::fmt::Display for Compliance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Compliant => write!(f, "COMPLIANT"),
            Self::PartiallyCompliant => write!(f, "PARTIALLY COMPLIANT"),
            Self::NonCompliant => write!(f, "NON-COMPLIANT"),
        }
    }
}

/// User or file supplied description of a test to run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TestConfig {
    /// Policy to validate
    #[serde(rename = "policy")]
    pub policy_type: PolicyType,
    /// Domain name under test
    pub domain: String,
    /// Expected endpoint weights (exact IPs, CIDRs, ranges, wildcards or endpoint ids)
    #[serde(default)]
    pub expected_weights: BTreeMap<String, u32>,
    /// Requested number of lookups
    #[serde(default = "default_iterations")]
    pub iterations: usize,
    /// Resolver to query instead of the system configuration
    #[serde(default)]
    pub resolver: Option<IpAddr>,
    /// Allowed deviation override (fraction)
    #[serde(default)]
    pub tolerance: Option<f64>,
    /// Designated primary address or hostname (failover)
    #[serde(default)]
    pub primary_endpoint: Option<String>,
    /// Designated secondary address or hostname (failover)
    #[serde(default)]
    pub secondary_endpoint: Option<String>,
    /// Use the vantage-point capability when available (geolocation)
    #[serde(default)]
    pub use_vantage_points: bool,
}

fn default_iterations() -> usize {
    100
}

impl TestConfig {
    /// Create a config with default settings for a policy and domain.
    pub fn new(policy_type: PolicyType, domain: impl Into<String>) -> Self {
        Self {
            policy_type,
            domain: domain.into(),
            expected_weights: BTreeMap::new(),
            iterations: default_iterations(),
            resolver: None,
            tolerance: None,
            primary_endpoint: None,
            secondary_endpoint: None,
            use_vantage_points: false,
        }
    }

    /// Check the config invariants.
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` for an empty domain, zero iterations, a
    /// weighted test without positive weights, or an out-of-range tolerance.
    pub fn validate(&self) -> Result<()> {
        if self.domain.trim().is_empty() {
            return Err(Error::config("domain must not be empty"));
        }
        if self.iterations == 0 {
            return Err(Error::config("iterations must be at least 1"));
        }
        if self.policy_type == PolicyType::Weighted && self.total_weight() == 0 {
            return Err(Error::config(
                "weighted test requires expected weights summing to more than 0",
            ));
        }
        if let Some(t) = self.tolerance {
            if !(0.0..=1.0).contains(&t) {
                return Err(Error::config(format!(
                    "tolerance must be between 0 and 1, got {t}"
                )));
            }
        }
        Ok(())
    }

    /// Sum of all expected weights.
    #[must_use]
    pub fn total_weight(&self) -> u64 {
        self.expected_weights.values().map(|w| u64::from(*w)).sum()
    }
}

/// One routing-policy test run.
///
/// Created from a [`TestConfig`] when the run starts and completed exactly
/// once through [`RoutingPolicyTest::complete`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoutingPolicyTest {
    pub policy_type: PolicyType,
    pub domain: String,
    pub expected_weights: BTreeMap<String, u32>,
    pub iterations: usize,
    pub resolver: Option<IpAddr>,
    pub tolerance: Option<f64>,
    /// Observed endpoint counts, populated on completion
    pub actual_distribution: BTreeMap<String, u64>,
    /// Average lookup latency in milliseconds
    pub response_time_ms: f64,
    pub result: TestResult,
    /// Diagnostic text; carries the full report for protocol-style policies
    pub error_message: Option<String>,
    pub primary_endpoint: Option<String>,
    pub secondary_endpoint: Option<String>,
    pub failover_triggered: bool,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl RoutingPolicyTest {
    /// Start a run from a config.
    #[must_use]
    pub fn from_config(config: &TestConfig) -> Self {
        Self {
            policy_type: config.policy_type,
            domain: config.domain.trim().trim_end_matches('.').to_string(),
            expected_weights: config.expected_weights.clone(),
            iterations: config.iterations,
            resolver: config.resolver,
            tolerance: config.tolerance,
            actual_distribution: BTreeMap::new(),
            response_time_ms: 0.0,
            result: TestResult::Unknown,
            error_message: None,
            primary_endpoint: config.primary_endpoint.clone(),
            secondary_endpoint: config.secondary_endpoint.clone(),
            failover_triggered: false,
            started_at: Utc::now(),
            completed_at: None,
        }
    }

    /// Check if the run has been completed.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.completed_at.is_some()
    }

    /// Apply the outcome of the run. Later calls are ignored.
    pub fn complete(&mut self, outcome: PolicyOutcome) {
        if self.is_complete() {
            tracing::warn!("ignoring second completion of test for {}", self.domain);
            return;
        }
        self.actual_distribution = outcome.distribution;
        self.response_time_ms = outcome.response_time_ms;
        self.result = outcome.result;
        self.error_message = outcome.report;
        self.failover_triggered = outcome.failover_triggered;
        self.completed_at = Some(Utc::now());
    }

    /// Total number of counted observations.
    #[must_use]
    pub fn observed_total(&self) -> u64 {
        self.actual_distribution.values().sum()
    }
}

/// Everything a policy procedure produces, applied to the record in one step.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PolicyOutcome {
    pub distribution: BTreeMap<String, u64>,
    pub response_time_ms: f64,
    pub result: TestResult,
    pub report: Option<String>,
    pub failover_triggered: bool,
}

impl PolicyOutcome {
    /// Outcome for a run that hit an unexpected error.
    pub fn unknown(message: impl Into<String>) -> Self {
        Self {
            result: TestResult::Unknown,
            report: Some(message.into()),
            ..Self::default()
        }
    }

    /// Outcome for a run stopped by cancellation; partial counts are kept.
    pub fn cancelled(
        distribution: BTreeMap<String, u64>,
        response_time_ms: f64,
        report: impl Into<String>,
    ) -> Self {
        Self {
            distribution,
            response_time_ms,
            result: TestResult::Cancelled,
            report: Some(report.into()),
            failover_triggered: false,
        }
    }

    /// Outcome with a verdict and report and nothing else.
    pub fn verdict(result: TestResult, report: impl Into<String>) -> Self {
        Self {
            result,
            report: Some(report.into()),
            ..Self::default()
        }
    }
}

/// Index of a record inside a discovery set.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RecordId(pub usize);

impl std::fmt::Display for RecordId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Role hint attached to a discovered record.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum SuggestedRole {
    Primary,
    Secondary,
    #[default]
    Unassigned,
}

impl std::fmt::Display for SuggestedRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Primary => write!(f, "Primary (main domain)"),
            Self::Secondary => write!(f, "Secondary (backup subdomain)"),
            Self::Unassigned => write!(f, "Unassigned"),
        }
    }
}

/// One resolved address found during A-record discovery.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DiscoveredARecord {
    pub id: RecordId,
    pub ip_address: IpAddr,
    /// Domain variant that produced this address
    pub source_domain: String,
    pub cloud_provider: Option<String>,
    pub aws_region: String,
    pub endpoint_name: String,
    pub ttl: Option<u32>,
    pub reachable: bool,
    pub response_time_ms: Option<f64>,
    pub suggested_role: SuggestedRole,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_policy_type_parse() {
        assert_eq!("weighted".parse::<PolicyType>(), Ok(PolicyType::Weighted));
        assert_eq!("GEO".parse::<PolicyType>(), Ok(PolicyType::Geolocation));
        assert_eq!("ip-based".parse::<PolicyType>(), Ok(PolicyType::IpBased));
        assert_eq!(
            "multivalue".parse::<PolicyType>(),
            Ok(PolicyType::MultivalueAnswer)
        );
        assert!("roundrobin".parse::<PolicyType>().is_err());
        assert_eq!(PolicyType::MultivalueAnswer.to_string(), "MULTIVALUE_ANSWER");
    }

    #[test]
    fn test_compliance_thresholds() {
        assert_eq!(Compliance::from_max_deviation(0.0), Compliance::Compliant);
        assert_eq!(Compliance::from_max_deviation(0.049), Compliance::Compliant);
        assert_eq!(
            Compliance::from_max_deviation(0.05),
            Compliance::PartiallyCompliant
        );
        assert_eq!(
            Compliance::from_max_deviation(0.15),
            Compliance::NonCompliant
        );
        assert_eq!(Compliance::NonCompliant.to_string(), "NON-COMPLIANT");
    }

    #[test]
    fn test_config_validation() {
        let mut config = TestConfig::new(PolicyType::Weighted, "example.com");
        assert!(config.validate().is_err());

        config.expected_weights.insert("A".into(), 70);
        config.expected_weights.insert("B".into(), 30);
        assert!(config.validate().is_ok());
        assert_eq!(config.total_weight(), 100);

        config.iterations = 0;
        assert!(config.validate().is_err());

        let failover = TestConfig::new(PolicyType::Failover, " ");
        assert!(failover.validate().is_err());
    }

    #[test]
    fn test_complete_applies_once() {
        let config = TestConfig::new(PolicyType::Failover, "example.com.");
        let mut test = RoutingPolicyTest::from_config(&config);
        assert_eq!(test.domain, "example.com");
        assert!(!test.is_complete());

        test.complete(PolicyOutcome::verdict(TestResult::Passed, "ok"));
        assert!(test.is_complete());
        assert_eq!(test.result, TestResult::Passed);

        test.complete(PolicyOutcome::verdict(TestResult::Failed, "late"));
        assert_eq!(test.result, TestResult::Passed);
        assert_eq!(test.error_message.as_deref(), Some("ok"));
    }

    #[test]
    fn test_verdict_results() {
        assert!(TestResult::Passed.is_verdict());
        assert!(TestResult::Partial.is_verdict());
        assert!(TestResult::Failed.is_verdict());
        assert!(!TestResult::Cancelled.is_verdict());
        assert!(!TestResult::Unknown.is_verdict());
    }

    #[test]
    fn test_config_json_defaults() {
        let json = r#"{"policy": "WEIGHTED", "domain": "example.com", "expected_weights": {"10.0.0.1": 70}}"#;
        let config: TestConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.iterations, 100);
        assert!(config.resolver.is_none());
        assert_eq!(config.expected_weights.get("10.0.0.1"), Some(&70));
    }
}
