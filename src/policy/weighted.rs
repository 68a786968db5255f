//! Weighted routing tests.
//!
//! The domain is resolved repeatedly and every answer's first address is
//! counted under an endpoint id. Short runs go through the test's resolver
//! with a pause between lookups that shrinks as the run grows. Runs above
//! the high-volume threshold switch to the lookup tool with bounded
//! concurrency and roughly 1 ms pacing.

use futures::stream::{self, StreamExt};
use std::sync::Arc;

use crate::dns::distribution::{validate_weighted_distribution, DistributionAccumulator};
use crate::dns::resolver::{Resolver, ToolResolver};
use crate::dns::types::{PolicyOutcome, TestConfig, TestResult};
use crate::error::Result;
use crate::policy::context::RunContext;
use crate::policy::report::{Mark, ReportBuilder};

/// Observations collected by a resolution loop.
#[derive(Debug, Default)]
pub struct Sampling {
    pub accumulator: DistributionAccumulator,
    /// Lookups that completed, successfully or not
    pub attempted: usize,
    pub cancelled: bool,
    /// The soft batch deadline stopped the run
    pub timed_out: bool,
    /// First per-query lines in completion order
    pub samples: Vec<String>,
    pub resolver_label: String,
}

impl Sampling {
    /// Lookup summary lines for a report.
    pub fn describe(&self, config: &TestConfig, report: &mut ReportBuilder) {
        let answered = self.accumulator.total();
        let failures = self.accumulator.failures();
        report
            .line(
                Mark::Info,
                format!(
                    "{} of {} lookups via {}",
                    self.attempted, config.iterations, self.resolver_label
                ),
            )
            .line(
                if failures == 0 { Mark::Ok } else { Mark::Warn },
                format!("{answered} answered, {failures} failed"),
            );
        if let Some((min, max)) = self.accumulator.response_range_ms() {
            report.line(
                Mark::Info,
                format!(
                    "response time avg {:.1} ms (min {min:.1} ms, max {max:.1} ms)",
                    self.accumulator.average_response_ms()
                ),
            );
        }
        if self.timed_out {
            report.line(Mark::Warn, "batch deadline reached before all lookups finished");
        }
    }

    /// Outcome for a cancelled loop, keeping the partial counts.
    #[must_use]
    pub fn into_cancelled(self, config: &TestConfig, mut report: ReportBuilder) -> PolicyOutcome {
        report.section("Cancelled").line(
            Mark::Warn,
            format!(
                "stopped after {} of {} lookups",
                self.attempted, config.iterations
            ),
        );
        PolicyOutcome::cancelled(
            self.accumulator.snapshot(),
            self.accumulator.average_response_ms(),
            report.finish(),
        )
    }
}

/// Resolve `config.iterations` times through the test's resolver.
///
/// Checks for cancellation before every lookup; a failed lookup is counted
/// and the loop carries on.
pub async fn sample_standard(ctx: &RunContext, config: &TestConfig) -> Sampling {
    let resolver = ctx.resolver_for(config);
    let delay = ctx.settings.inter_query_delay(config.iterations);
    let mut sampling = Sampling {
        resolver_label: resolver.label(),
        ..Sampling::default()
    };

    for i in 0..config.iterations {
        if ctx.is_cancelled() {
            sampling.cancelled = true;
            break;
        }
        match resolver.resolve(&config.domain).await {
            Ok(resolution) => {
                sampling.accumulator.record_response_time(resolution.elapsed_ms);
                match resolution.primary() {
                    Some(ip) => {
                        let endpoint = ctx.endpoint_for(ip, &config.expected_weights).await;
                        sampling.accumulator.increment(&endpoint);
                    }
                    None => sampling.accumulator.record_failure(),
                }
            }
            Err(e) => {
                tracing::debug!("lookup {} of {} failed: {e}", i + 1, config.domain);
                sampling.accumulator.record_failure();
            }
        }
        sampling.attempted += 1;

        if i + 1 < config.iterations && !ctx.pause(delay).await {
            sampling.cancelled = true;
            break;
        }
    }
    sampling
}

/// High-volume variant: lookup tool against one resolver, bounded in-flight
/// lookups, paced submissions and a soft deadline for the whole batch.
pub async fn sample_high_volume(ctx: &RunContext, config: &TestConfig) -> Sampling {
    let server = config.resolver.unwrap_or(ctx.settings.default_resolver);
    let resolver = ToolResolver::new(
        Arc::clone(&ctx.collab.tool),
        Some(server),
        ctx.settings.lookup_timeout(),
    );
    let mut sampling = Sampling {
        resolver_label: resolver.label(),
        ..Sampling::default()
    };
    let pacing = ctx.settings.inter_query_delay(config.iterations);
    let sample_size = ctx.settings.sample_size;
    let domain = config.domain.as_str();
    let resolver = &resolver;

    tracing::info!(
        "high-volume run: {} lookups of {domain} via {server}, {} in flight",
        config.iterations,
        ctx.settings.max_in_flight
    );

    let lookups = stream::iter(1..=config.iterations)
        .then(|seq| async move {
            tokio::time::sleep(pacing).await;
            seq
        })
        .map(|seq| async move { (seq, resolver.resolve(domain).await) })
        .buffer_unordered(ctx.settings.max_in_flight.max(1));
    let deadline = tokio::time::sleep(ctx.settings.batch_timeout());
    tokio::pin!(lookups, deadline);

    loop {
        tokio::select! {
            biased;
            () = ctx.cancel.cancelled() => {
                sampling.cancelled = true;
                break;
            }
            () = &mut deadline => {
                tracing::warn!("batch deadline reached after {} lookups", sampling.attempted);
                sampling.timed_out = true;
                break;
            }
            next = lookups.next() => {
                let Some((seq, outcome)) = next else { break };
                sampling.attempted += 1;
                let line = match outcome {
                    Ok(resolution) => {
                        sampling.accumulator.record_response_time(resolution.elapsed_ms);
                        match resolution.primary() {
                            Some(ip) => {
                                let endpoint = ctx.endpoint_for(ip, &config.expected_weights).await;
                                sampling.accumulator.increment(&endpoint);
                                format!("#{seq:<6} {ip} -> {endpoint} ({:.1} ms)", resolution.elapsed_ms)
                            }
                            None => {
                                sampling.accumulator.record_failure();
                                format!("#{seq:<6} empty answer")
                            }
                        }
                    }
                    Err(e) => {
                        sampling.accumulator.record_failure();
                        format!("#{seq:<6} failed: {e}")
                    }
                };
                if sampling.samples.len() < sample_size {
                    sampling.samples.push(line);
                }
                if sampling.attempted % 1000 == 0 {
                    tracing::info!(
                        "progress {}/{}: {} ok, {} failed",
                        sampling.attempted,
                        config.iterations,
                        sampling.accumulator.total(),
                        sampling.accumulator.failures()
                    );
                }
            }
        }
    }
    sampling
}

/// Run a weighted test.
pub async fn run(ctx: &RunContext, config: &TestConfig) -> Result<PolicyOutcome> {
    let high_volume = ctx.settings.is_high_volume(config.iterations);
    let sampling = if high_volume {
        sample_high_volume(ctx, config).await
    } else {
        sample_standard(ctx, config).await
    };

    let mut report = ReportBuilder::new(format!("Weighted routing test for {}", config.domain));
    report.section("Lookups");
    sampling.describe(config, &mut report);
    if sampling.cancelled {
        return Ok(sampling.into_cancelled(config, report));
    }

    let tolerance = ctx.settings.tolerance_for(config);
    let snapshot = sampling.accumulator.snapshot();
    let total = sampling.accumulator.total();
    let validation =
        validate_weighted_distribution(&config.expected_weights, &snapshot, total, tolerance);
    report.section("Distribution").block(validation.render());

    if !sampling.samples.is_empty() {
        report
            .section(format!("First {} queries", sampling.samples.len()))
            .block(sampling.samples.join("\n"));
    }

    let result = if validation.passed {
        TestResult::Passed
    } else {
        TestResult::Failed
    };
    let verdict = if total == 0 {
        "no lookup returned an address".to_string()
    } else if validation.passed {
        format!(
            "every endpoint within {:.1}% of its expected share",
            tolerance * 100.0
        )
    } else {
        format!(
            "max deviation {:.1}% exceeds tolerance {:.1}%",
            validation.max_deviation * 100.0,
            tolerance * 100.0
        )
    };
    report.section("Verdict").line(
        if validation.passed { Mark::Ok } else { Mark::Fail },
        format!("{result}: {verdict}"),
    );

    Ok(PolicyOutcome {
        distribution: snapshot,
        response_time_ms: sampling.accumulator.average_response_ms(),
        result,
        report: Some(report.finish()),
        failover_triggered: false,
    })
}
