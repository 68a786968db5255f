//! Latency routing tests.
//!
//! A latency policy answers with the region closest to the querying
//! resolver, so the protocol looks for answers that change with the
//! client-subnet hint and records how fast and with which TTL each
//! authoritative server answers.

use std::collections::BTreeSet;
use std::net::Ipv4Addr;

use crate::dns::dig::{DnsQuery, RecordKind};
use crate::dns::distribution::DistributionAccumulator;
use crate::dns::types::{PolicyOutcome, TestConfig, TestResult};
use crate::error::Result;
use crate::policy::context::RunContext;
use crate::policy::protocol::{
    authoritative_servers, probe_ecs_support, propagation_consistent, query_public_resolvers,
    query_subnets, render_answers, subnet_steering, SubnetAnswer,
};
use crate::policy::report::{Mark, ReportBuilder};

/// TTL above which re-routing after a latency change is slow.
const LONG_TTL_SECS: u32 = 300;

/// Egress addresses reported by repeated identity queries.
async fn probe_rotation(ctx: &RunContext) -> (BTreeSet<Ipv4Addr>, usize) {
    let mut egress = BTreeSet::new();
    let mut failures = 0;
    for _ in 0..ctx.settings.rotation_probe_count {
        if ctx.is_cancelled() {
            break;
        }
        let q = DnsQuery::new(&ctx.settings.identity_name, RecordKind::A)
            .via(ctx.settings.default_resolver)
            .with_timeout(ctx.settings.lookup_timeout());
        match ctx.collab.tool.query(&q).await {
            Ok(answer) if !answer.ipv4_addresses().is_empty() => {
                egress.extend(answer.ipv4_addresses());
            }
            Ok(_) => failures += 1,
            Err(e) => {
                tracing::debug!("identity query failed: {e}");
                failures += 1;
            }
        }
    }
    (egress, failures)
}

/// Verdict of the latency protocol.
#[must_use]
pub fn verdict(authoritative_answered: bool, public_answered: bool, steering: bool, consistent: bool) -> TestResult {
    if !authoritative_answered && !public_answered {
        TestResult::Failed
    } else if authoritative_answered && steering && consistent {
        TestResult::Passed
    } else {
        TestResult::Partial
    }
}

/// Run a latency test.
pub async fn run(ctx: &RunContext, config: &TestConfig) -> Result<PolicyOutcome> {
    let mut report = ReportBuilder::new(format!("Latency routing test for {}", config.domain));
    let accumulator = DistributionAccumulator::new();

    report.step("Resolver rotation");
    let (egress, failures) = probe_rotation(ctx).await;
    match egress.len() {
        0 => report.line(
            Mark::Warn,
            format!("{} identity queries returned no address", ctx.settings.identity_name),
        ),
        1 => report.line(
            Mark::Info,
            format!(
                "single resolver egress {}; answers reflect one location",
                egress.iter().next().map_or_else(String::new, ToString::to_string)
            ),
        ),
        n => report.line(
            Mark::Ok,
            format!(
                "{n} resolver egress addresses: {}",
                egress.iter().map(ToString::to_string).collect::<Vec<_>>().join(", ")
            ),
        ),
    };
    if failures > 0 {
        report.line(Mark::Warn, format!("{failures} identity queries failed"));
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

    report.step("Authoritative name servers");
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
    if ctx.is_cancelled() {
        return Ok(cancelled(&accumulator, report));
    }

    report.step("Latency and TTL per server and subnet");
    let answers = query_subnets(ctx, &config.domain, &servers).await;
    record(ctx, config, &accumulator, &answers).await;
    if answers.is_empty() {
        report.line(Mark::Warn, "no authoritative server could be queried");
    } else {
        report.block(render_answers(&answers));
    }
    if let Some(max_ttl) = answers.iter().filter_map(|a| a.ttl).max() {
        if max_ttl > LONG_TTL_SECS {
            report.line(
                Mark::Warn,
                format!("TTL up to {max_ttl}s delays re-routing when latency changes"),
            );
        } else {
            report.line(Mark::Ok, format!("TTL at most {max_ttl}s"));
        }
    }
    if ctx.is_cancelled() {
        return Ok(cancelled(&accumulator, report));
    }

    report.step("Public resolvers");
    let public = query_public_resolvers(ctx, &config.domain).await;
    record(ctx, config, &accumulator, &public).await;
    report.block(render_answers(&public));
    if ctx.is_cancelled() {
        return Ok(cancelled(&accumulator, report));
    }

    let authoritative_answered = answers.iter().any(SubnetAnswer::answered);
    let public_answered = public.iter().any(SubnetAnswer::answered);
    let steering = subnet_steering(&answers);
    let consistent = propagation_consistent(&answers);
    let result = verdict(authoritative_answered, public_answered, steering, consistent);

    report.step("Verdict");
    report.line(
        if steering { Mark::Ok } else { Mark::Warn },
        if steering {
            "answers change with client location"
        } else {
            "every client subnet received the same answer"
        },
    );
    if !consistent {
        report.line(Mark::Warn, "authoritative servers disagree for the same subnet");
    }
    report.line(
        match result {
            TestResult::Passed => Mark::Ok,
            TestResult::Partial => Mark::Warn,
            _ => Mark::Fail,
        },
        result.to_string(),
    );

    Ok(PolicyOutcome {
        distribution: accumulator.snapshot(),
        response_time_ms: accumulator.average_response_ms(),
        result,
        report: Some(report.finish()),
        failover_triggered: false,
    })
}

/// Count every answered address and keep its response time.
async fn record(
    ctx: &RunContext,
    config: &TestConfig,
    accumulator: &DistributionAccumulator,
    answers: &[SubnetAnswer],
) {
    for answer in answers {
        if !answer.answered() {
            accumulator.record_failure();
            continue;
        }
        accumulator.record_response_time(answer.elapsed_ms);
        for ip in &answer.addresses {
            let endpoint = ctx
                .endpoint_for(std::net::IpAddr::V4(*ip), &config.expected_weights)
                .await;
            accumulator.increment(&endpoint);
        }
    }
}

fn cancelled(accumulator: &DistributionAccumulator, report: ReportBuilder) -> PolicyOutcome {
    PolicyOutcome::cancelled(
        accumulator.snapshot(),
        accumulator.average_response_ms(),
        report.finish(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineSettings;
    use crate::dns::types::PolicyType;
    use crate::policy::testing::{answer, context, CyclingResolver, StubTool};
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_verdict_table() {
        assert_eq!(verdict(false, false, true, true), TestResult::Failed);
        assert_eq!(verdict(true, true, true, true), TestResult::Passed);
        assert_eq!(verdict(true, true, false, true), TestResult::Partial);
        assert_eq!(verdict(false, true, false, true), TestResult::Partial);
        assert_eq!(verdict(true, true, true, false), TestResult::Partial);
    }

    #[tokio::test]
    async fn test_rotation_and_uniform_answers() {
        let identity = AtomicUsize::new(0);
        let tool = StubTool::scripted(move |q| {
            Ok(match q.kind {
                RecordKind::Ns => answer(&q.name, &[("NS", "ns1.example.net.")]),
                RecordKind::A if q.name == "whoami.akamai.net" => {
                    let n = identity.fetch_add(1, Ordering::SeqCst) % 2;
                    answer(&q.name, &[("A", if n == 0 { "172.253.1.1" } else { "172.253.2.2" })])
                }
                RecordKind::A if q.name == "ns1.example.net" => answer(&q.name, &[("A", "192.0.2.53")]),
                RecordKind::A => answer(&q.name, &[("A", "10.0.0.1")]),
                _ => answer(&q.name, &[]),
            })
        });
        let ctx = context(EngineSettings::default(), CyclingResolver::failing(), tool);
        let config = TestConfig::new(PolicyType::Latency, "api.example.com");
        let outcome = run(&ctx, &config).await.unwrap();

        assert_eq!(outcome.result, TestResult::Partial);
        let report = outcome.report.unwrap();
        assert!(report.contains("2 resolver egress addresses"));
        assert!(report.contains("TTL at most 60s"));
        assert!(report.contains("every client subnet received the same answer"));
        // five subnets from one server plus three public resolvers
        assert_eq!(outcome.distribution.values().sum::<u64>(), 8);
    }
}
