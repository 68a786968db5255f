//! Multivalue-answer routing tests.
//!
//! A multivalue policy returns up to eight healthy records per answer.
//! Every returned address is counted, and the answer sizes show whether the
//! policy is in effect.

use std::collections::{BTreeMap, BTreeSet};
use std::net::IpAddr;

use crate::dns::distribution::DistributionAccumulator;
use crate::dns::types::{PolicyOutcome, TestConfig, TestResult};
use crate::error::Result;
use crate::policy::context::RunContext;
use crate::policy::report::{Mark, ReportBuilder};

/// Most records a multivalue answer carries.
pub const MAX_ANSWER_RECORDS: usize = 8;

/// Verdict from the answer-size histogram.
#[must_use]
pub fn verdict(sizes: &BTreeMap<usize, u64>) -> TestResult {
    let multi = sizes
        .keys()
        .any(|n| (2..=MAX_ANSWER_RECORDS).contains(n));
    let oversized = sizes.keys().any(|n| *n > MAX_ANSWER_RECORDS);
    if sizes.is_empty() {
        TestResult::Failed
    } else if multi && !oversized {
        TestResult::Passed
    } else {
        TestResult::Partial
    }
}

/// Run a multivalue-answer test.
pub async fn run(ctx: &RunContext, config: &TestConfig) -> Result<PolicyOutcome> {
    let mut report = ReportBuilder::new(format!(
        "Multivalue answer routing test for {}",
        config.domain
    ));
    let resolver = ctx.resolver_for(config);
    let delay = ctx.settings.inter_query_delay(config.iterations);
    let accumulator = DistributionAccumulator::new();
    let mut sizes: BTreeMap<usize, u64> = BTreeMap::new();
    let mut seen: BTreeSet<IpAddr> = BTreeSet::new();
    let mut attempted = 0;
    let mut cancelled = false;

    for i in 0..config.iterations {
        if ctx.is_cancelled() {
            cancelled = true;
            break;
        }
        match resolver.resolve(&config.domain).await {
            Ok(resolution) if !resolution.addresses.is_empty() => {
                accumulator.record_response_time(resolution.elapsed_ms);
                *sizes.entry(resolution.addresses.len()).or_insert(0) += 1;
                for ip in &resolution.addresses {
                    seen.insert(*ip);
                    let endpoint = ctx.endpoint_for(*ip, &config.expected_weights).await;
                    accumulator.increment(&endpoint);
                }
            }
            Ok(_) => accumulator.record_failure(),
            Err(e) => {
                tracing::debug!("lookup {} of {} failed: {e}", i + 1, config.domain);
                accumulator.record_failure();
            }
        }
        attempted += 1;
        if i + 1 < config.iterations && !ctx.pause(delay).await {
            cancelled = true;
            break;
        }
    }

    report.section("Lookups").line(
        Mark::Info,
        format!(
            "{attempted} of {} lookups via {}, {} failed",
            config.iterations,
            resolver.label(),
            accumulator.failures()
        ),
    );
    if cancelled {
        report.line(Mark::Warn, "cancelled");
        return Ok(PolicyOutcome::cancelled(
            accumulator.snapshot(),
            accumulator.average_response_ms(),
            report.finish(),
        ));
    }

    report.section("Answer sizes");
    for (size, count) in &sizes {
        report.line(
            if *size > MAX_ANSWER_RECORDS { Mark::Warn } else { Mark::Info },
            format!("{size} record(s): {count} answers"),
        );
    }
    report.line(
        Mark::Info,
        format!(
            "{} distinct addresses: {}",
            seen.len(),
            seen.iter().map(ToString::to_string).collect::<Vec<_>>().join(", ")
        ),
    );

    let result = verdict(&sizes);
    let text = match result {
        TestResult::Passed => "answers carry multiple records",
        TestResult::Failed => "no lookup returned an address",
        _ if sizes.keys().any(|n| *n > MAX_ANSWER_RECORDS) => "answers exceed eight records",
        _ => "only single-record answers seen",
    };
    report.section("Verdict").line(
        match result {
            TestResult::Passed => Mark::Ok,
            TestResult::Failed => Mark::Fail,
            _ => Mark::Warn,
        },
        format!("{result}: {text}"),
    );

    Ok(PolicyOutcome {
        distribution: accumulator.snapshot(),
        response_time_ms: accumulator.average_response_ms(),
        result,
        report: Some(report.finish()),
        failover_triggered: false,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sizes(pairs: &[(usize, u64)]) -> BTreeMap<usize, u64> {
        pairs.iter().copied().collect()
    }

    #[test]
    fn test_verdict() {
        assert_eq!(verdict(&sizes(&[])), TestResult::Failed);
        assert_eq!(verdict(&sizes(&[(1, 10)])), TestResult::Partial);
        assert_eq!(verdict(&sizes(&[(1, 2), (3, 8)])), TestResult::Passed);
        assert_eq!(verdict(&sizes(&[(8, 10)])), TestResult::Passed);
        assert_eq!(verdict(&sizes(&[(4, 5), (9, 1)])), TestResult::Partial);
    }
}
