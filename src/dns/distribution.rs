//! Distribution accumulation and weighted-policy validation.

use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::dns::types::Compliance;

/// Default allowed deviation for a standard weighted test.
pub const DEFAULT_TOLERANCE: f64 = 0.15;

/// Allowed deviation for a high-volume run.
pub const HIGH_VOLUME_TOLERANCE: f64 = 0.10;

/// Allowed deviation for a high-volume run above the strict threshold.
pub const STRICT_TOLERANCE: f64 = 0.05;

/// Concurrent endpoint counter for one test run.
///
/// Increments commute, so lookups completing in any order produce the same
/// distribution.
#[derive(Debug, Default)]
pub struct DistributionAccumulator {
    counts: DashMap<String, u64>,
    failures: AtomicU64,
    response_times: Mutex<Vec<f64>>,
}

impl DistributionAccumulator {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Count one observation of an endpoint.
    pub fn increment(&self, endpoint_id: &str) {
        *self.counts.entry(endpoint_id.to_string()).or_insert(0) += 1;
    }

    /// Count one failed lookup.
    pub fn record_failure(&self) {
        self.failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Keep a latency sample in milliseconds.
    pub fn record_response_time(&self, ms: f64) {
        self.response_times.lock().push(ms);
    }

    /// Number of counted observations.
    #[must_use]
    pub fn total(&self) -> u64 {
        self.counts.iter().map(|e| *e.value()).sum()
    }

    #[must_use]
    pub fn failures(&self) -> u64 {
        self.failures.load(Ordering::Relaxed)
    }

    /// Ordered copy of the current counts.
    #[must_use]
    pub fn snapshot(&self) -> BTreeMap<String, u64> {
        self.counts
            .iter()
            .map(|e| (e.key().clone(), *e.value()))
            .collect()
    }

    /// Mean of the latency samples, 0 when there are none.
    #[must_use]
    pub fn average_response_ms(&self) -> f64 {
        let samples = self.response_times.lock();
        if samples.is_empty() {
            0.0
        } else {
            samples.iter().sum::<f64>() / samples.len() as f64
        }
    }

    /// Fastest and slowest latency samples.
    #[must_use]
    pub fn response_range_ms(&self) -> Option<(f64, f64)> {
        let samples = self.response_times.lock();
        let min = samples.iter().copied().reduce(f64::min)?;
        let max = samples.iter().copied().reduce(f64::max)?;
        Some((min, max))
    }
}

/// Expected versus observed share of one endpoint.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EndpointDeviation {
    pub endpoint: String,
    pub weight: u32,
    pub expected_pct: f64,
    pub actual_pct: f64,
    pub count: u64,
    pub deviation: f64,
    pub within_tolerance: bool,
}

/// Result of validating a weighted distribution.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ValidationReport {
    pub rows: Vec<EndpointDeviation>,
    pub total: u64,
    pub tolerance: f64,
    pub max_deviation: f64,
    pub passed: bool,
    pub compliance: Compliance,
    /// Observed endpoints that have no expected weight
    pub unexpected: BTreeMap<String, u64>,
}

impl ValidationReport {
    /// Plain-text table of the per-endpoint comparison.
    #[must_use]
    pub fn render(&self) -> String {
        let mut out = format!(
            "{:<32} {:>8} {:>10} {:>10} {:>10}  {}\n",
            "Endpoint", "Weight", "Expected", "Actual", "Deviation", "Status"
        );
        out.push_str(&"-".repeat(84));
        out.push('\n');
        for row in &self.rows {
            out.push_str(&format!(
                "{:<32} {:>8} {:>9.1}% {:>9.1}% {:>9.1}%  {}\n",
                row.endpoint,
                row.weight,
                row.expected_pct * 100.0,
                row.actual_pct * 100.0,
                row.deviation * 100.0,
                if row.within_tolerance { "OK" } else { "OUT OF TOLERANCE" }
            ));
        }
        for (endpoint, count) in &self.unexpected {
            out.push_str(&format!("{endpoint:<32} (unexpected) observed {count} times\n"));
        }
        out.push_str(&format!(
            "\nSamples: {}  Tolerance: {:.1}%  Max deviation: {:.1}%  Compliance: {}\n",
            self.total,
            self.tolerance * 100.0,
            self.max_deviation * 100.0,
            self.compliance
        ));
        out
    }
}

/// Compare an observed distribution with expected weights.
///
/// Every expected endpoint must individually satisfy
/// `|expected_pct - actual_pct| <= tolerance`; a single violation fails the
/// whole distribution. An empty sample never passes.
#[must_use]
pub fn validate_weighted_distribution(
    expected: &BTreeMap<String, u32>,
    observed: &BTreeMap<String, u64>,
    total: u64,
    tolerance: f64,
) -> ValidationReport {
    let total_weight: u64 = expected.values().map(|w| u64::from(*w)).sum();

    let rows: Vec<EndpointDeviation> = expected
        .iter()
        .map(|(endpoint, weight)| {
            let expected_pct = if total_weight == 0 {
                0.0
            } else {
                f64::from(*weight) / total_weight as f64
            };
            let count = observed.get(endpoint).copied().unwrap_or(0);
            let actual_pct = if total == 0 {
                0.0
            } else {
                count as f64 / total as f64
            };
            let deviation = (expected_pct - actual_pct).abs();
            EndpointDeviation {
                endpoint: endpoint.clone(),
                weight: *weight,
                expected_pct,
                actual_pct,
                count,
                deviation,
                // guard against float noise at the boundary
                within_tolerance: deviation <= tolerance + f64::EPSILON,
            }
        })
        .collect();

    let max_deviation = rows.iter().map(|r| r.deviation).fold(0.0, f64::max);
    let unexpected = observed
        .iter()
        .filter(|(k, _)| !expected.contains_key(*k))
        .map(|(k, v)| (k.clone(), *v))
        .collect();

    ValidationReport {
        passed: total > 0 && total_weight > 0 && rows.iter().all(|r| r.within_tolerance),
        compliance: Compliance::from_max_deviation(max_deviation),
        rows,
        total,
        tolerance,
        max_deviation,
        unexpected,
    }
}
