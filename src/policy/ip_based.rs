//! IP-based routing tests.
//!
//! One host cannot vary its own source address, so the distribution loop
//! only shows what this client receives. Client-subnet hints sent through
//! the default resolver show what other networks would receive. With
//! expected endpoints, usually CIDR keys, the observed distribution is
//! validated like a weighted test.

use crate::dns::distribution::validate_weighted_distribution;
use crate::dns::types::{PolicyOutcome, TestConfig, TestResult};
use crate::error::Result;
use crate::policy::context::RunContext;
use crate::policy::protocol::{query_default, render_answers, subnet_steering};
use crate::policy::report::{Mark, ReportBuilder};
use crate::policy::weighted::sample_standard;

/// Run an IP-based test.
pub async fn run(ctx: &RunContext, config: &TestConfig) -> Result<PolicyOutcome> {
    let mut report = ReportBuilder::new(format!("IP-based routing test for {}", config.domain));

    let sampling = sample_standard(ctx, config).await;
    report.section("Lookups");
    sampling.describe(config, &mut report);
    if sampling.cancelled {
        return Ok(sampling.into_cancelled(config, report));
    }
    let distribution = sampling.accumulator.snapshot();
    let total = sampling.accumulator.total();

    report.section("Answers per client network");
    let mut by_network = Vec::new();
    for subnet in &ctx.settings.test_subnets {
        if ctx.is_cancelled() {
            return Ok(sampling.into_cancelled(config, report));
        }
        by_network.push(query_default(ctx, &config.domain, Some(&subnet.subnet), &subnet.label).await);
    }
    report.block(render_answers(&by_network));
    report.line(
        Mark::Info,
        if subnet_steering(&by_network) {
            "answers differ by client network"
        } else {
            "every client network received the same answer"
        },
    );

    let result = if config.expected_weights.is_empty() {
        report.section("Observed distribution");
        for (endpoint, count) in &distribution {
            report.line(Mark::Info, format!("{endpoint}: {count}"));
        }
        if total == 0 {
            TestResult::Failed
        } else {
            TestResult::Partial
        }
    } else {
        let tolerance = ctx.settings.tolerance_for(config);
        let validation =
            validate_weighted_distribution(&config.expected_weights, &distribution, total, tolerance);
        report.section("Distribution").block(validation.render());
        if validation.passed {
            TestResult::Passed
        } else {
            TestResult::Failed
        }
    };
    report.section("Verdict").line(
        match result {
            TestResult::Passed => Mark::Ok,
            TestResult::Partial => Mark::Warn,
            _ => Mark::Fail,
        },
        if config.expected_weights.is_empty() && total > 0 {
            format!("{result}: no expected endpoints to validate against")
        } else {
            result.to_string()
        },
    );

    Ok(PolicyOutcome {
        distribution,
        response_time_ms: sampling.accumulator.average_response_ms(),
        result,
        report: Some(report.finish()),
        failover_triggered: false,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineSettings;
    use crate::dns::types::PolicyType;
    use crate::policy::testing::{context, CyclingResolver, StubTool};

    fn settings() -> EngineSettings {
        EngineSettings {
            small_run_delay_ms: 0,
            ..EngineSettings::default()
        }
    }

    #[tokio::test]
    async fn test_cidr_keys_validate() {
        let resolver = CyclingResolver::weighted(&[("10.1.0.5", 1), ("10.2.0.9", 1)]);
        let ctx = context(settings(), resolver, StubTool::a_records(&["10.1.0.5"]));
        let mut config = TestConfig::new(PolicyType::IpBased, "app.example.com");
        config.iterations = 20;
        config.expected_weights = [("10.1.0.0/16".to_string(), 1), ("10.2.0.0/16".to_string(), 1)].into();
        let outcome = run(&ctx, &config).await.unwrap();

        assert_eq!(outcome.result, TestResult::Passed);
        assert_eq!(outcome.distribution.get("10.1.0.0/16"), Some(&10));
        assert!(outcome.report.unwrap().contains("every client network received the same answer"));
    }

    #[tokio::test]
    async fn test_without_expectations_is_partial() {
        let resolver = CyclingResolver::weighted(&[("10.1.0.5", 1)]);
        let ctx = context(settings(), resolver, StubTool::empty());
        let mut config = TestConfig::new(PolicyType::IpBased, "app.example.com");
        config.iterations = 3;
        let outcome = run(&ctx, &config).await.unwrap();
        assert_eq!(outcome.result, TestResult::Partial);
        assert_eq!(outcome.distribution.values().sum::<u64>(), 3);
    }
}
