//! Geolocation routing tests.
//!
//! Observations come from vantage points when that capability is present and
//! enabled, otherwise from a plain resolution loop. The verification protocol
//! then looks at how the authoritative servers answer clients in different
//! test subnets.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use crate::dns::types::{PolicyOutcome, TestConfig, TestResult};
use crate::dns::vantage::VantagePoint;
use crate::error::Result;
use crate::policy::context::RunContext;
use crate::policy::protocol::{
    authoritative_servers, probe_ecs_support, propagation_consistent, query_default,
    query_public_resolvers, query_subnets, render_answers, subnet_steering,
};
use crate::policy::report::{Mark, ReportBuilder};
use crate::policy::weighted::{sample_standard, Sampling};

/// Resolution from one vantage point.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VantageObservation {
    pub round: usize,
    pub vantage_id: String,
    pub outcome: String,
}

/// Resolve once per round, each round from a new vantage point.
async fn sample_vantage_points(
    ctx: &RunContext,
    config: &TestConfig,
    vantage: &Arc<dyn VantagePoint>,
    observations: &mut Vec<VantageObservation>,
) -> Sampling {
    let mut sampling = Sampling {
        resolver_label: "vantage points".to_string(),
        ..Sampling::default()
    };
    let rounds = ctx.settings.geo_rounds.max(1);
    let settle = Duration::from_millis(ctx.settings.vantage_settle_ms);

    for round in 1..=rounds {
        if ctx.is_cancelled() {
            sampling.cancelled = true;
            break;
        }
        let vantage_id = vantage.current_vantage_point_id().await;
        let started = std::time::Instant::now();
        let outcome = match vantage.resolve_through_vantage_point(&config.domain).await {
            Ok(ip) => {
                sampling
                    .accumulator
                    .record_response_time(started.elapsed().as_secs_f64() * 1000.0);
                let endpoint = ctx.endpoint_for(ip, &config.expected_weights).await;
                sampling.accumulator.increment(&endpoint);
                format!("{ip} ({endpoint})")
            }
            Err(e) => {
                sampling.accumulator.record_failure();
                format!("failed: {e}")
            }
        };
        tracing::info!("round {round}/{rounds} via {vantage_id}: {outcome}");
        observations.push(VantageObservation {
            round,
            vantage_id,
            outcome,
        });
        sampling.attempted += 1;

        if round < rounds {
            if !vantage.rotate_vantage_point().await {
                tracing::warn!("vantage point rotation refused after round {round}");
            }
            if !ctx.pause(settle).await {
                sampling.cancelled = true;
                break;
            }
        }
    }
    sampling
}

/// Verdict of the geolocation protocol.
///
/// Passing needs authoritative answers that agree across servers and some
/// sign of location-dependent answers.
#[must_use]
pub fn verdict(answered: bool, steering: bool, consistent: bool, observed_endpoints: usize) -> TestResult {
    if !answered && observed_endpoints == 0 {
        TestResult::Failed
    } else if answered && consistent && (steering || observed_endpoints > 1) {
        TestResult::Passed
    } else {
        TestResult::Partial
    }
}

/// Run a geolocation test.
pub async fn run(ctx: &RunContext, config: &TestConfig) -> Result<PolicyOutcome> {
    let mut report = ReportBuilder::new(format!("Geolocation routing test for {}", config.domain));

    let wants_vantage = config.use_vantage_points || ctx.settings.enable_vantage_points;
    let vantage = match (&ctx.collab.vantage, wants_vantage) {
        (Some(v), true) => {
            if v.is_available().await {
                Some(Arc::clone(v))
            } else {
                tracing::warn!("vantage points unavailable, falling back to plain resolution");
                None
            }
        }
        _ => None,
    };

    let mut observations = Vec::new();
    let sampling = match &vantage {
        Some(v) => sample_vantage_points(ctx, config, v, &mut observations).await,
        None => sample_standard(ctx, config).await,
    };
    report.section("Observations");
    sampling.describe(config, &mut report);
    if !observations.is_empty() {
        let distinct: BTreeSet<&str> = observations.iter().map(|o| o.vantage_id.as_str()).collect();
        report.line(
            Mark::Info,
            format!("{} distinct vantage points", distinct.len()),
        );
        report.block(
            observations
                .iter()
                .map(|o| format!("round {}: {} -> {}", o.round, o.vantage_id, o.outcome))
                .collect::<Vec<_>>()
                .join("\n"),
        );
    }
    if sampling.cancelled {
        return Ok(sampling.into_cancelled(config, report));
    }
    let distribution = sampling.accumulator.snapshot();
    for (endpoint, count) in &distribution {
        report.line(Mark::Info, format!("{endpoint}: {count}"));
    }

    report.step("Default location");
    let default = query_default(
        ctx,
        &config.domain,
        Some(&ctx.settings.unmapped_subnet),
        "unmapped",
    )
    .await;
    if default.answered() {
        report.line(
            Mark::Ok,
            format!(
                "clients in {} receive {}",
                ctx.settings.unmapped_subnet,
                default.addresses_text()
            ),
        );
    } else {
        report.line(
            Mark::Warn,
            format!(
                "no answer for {} ({}); clients outside every configured location get no record unless a default location exists",
                ctx.settings.unmapped_subnet,
                default.addresses_text()
            ),
        );
    }

    report.step("Client subnet support");
    let ecs = probe_ecs_support(ctx).await;
    report.line(
        if ecs.supported { Mark::Ok } else { Mark::Warn },
        format!(
            "{} {} client subnets: {}",
            ctx.settings.default_resolver,
            if ecs.supported { "forwards" } else { "does not forward" },
            ecs.detail
        ),
    );

    report.step("Authoritative answers per client subnet");
    let servers = authoritative_servers(ctx, &config.domain).await;
    if servers.is_empty() {
        report.line(Mark::Fail, "no authoritative name servers found");
    }
    for server in &servers {
        report.line(
            Mark::Info,
            format!(
                "{} ({})",
                server.name,
                server.ip.map_or_else(|| "unresolved".to_string(), |ip| ip.to_string())
            ),
        );
    }
    let answers = query_subnets(ctx, &config.domain, &servers).await;
    if !answers.is_empty() {
        report.block(render_answers(&answers));
    }

    report.step("Public resolvers");
    let public = query_public_resolvers(ctx, &config.domain).await;
    report.block(render_answers(&public));
    if ctx.is_cancelled() {
        return Ok(sampling.into_cancelled(config, report));
    }

    report.step("Propagation consistency");
    let answered = answers.iter().any(|a| a.answered());
    let consistent = propagation_consistent(&answers);
    let steering = subnet_steering(&answers);
    if !answered {
        report.line(Mark::Fail, "no authoritative server answered");
    } else if consistent {
        report.line(Mark::Ok, "all authoritative servers agree per subnet");
    } else {
        report.line(Mark::Warn, "authoritative servers disagree; changes may still be propagating");
    }
    report.line(
        if steering { Mark::Ok } else { Mark::Warn },
        if steering {
            "answers differ by client location"
        } else {
            "every client subnet received the same answer"
        },
    );

    let result = verdict(answered, steering, consistent, distribution.len());
    report.step("Verdict").line(
        match result {
            TestResult::Passed => Mark::Ok,
            TestResult::Partial => Mark::Warn,
            _ => Mark::Fail,
        },
        result.to_string(),
    );

    Ok(PolicyOutcome {
        distribution,
        response_time_ms: sampling.accumulator.average_response_ms(),
        result,
        report: Some(report.finish()),
        failover_triggered: false,
    })
}
