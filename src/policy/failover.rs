//! Failover routing tests.
//!
//! A single resolution is compared with the designated primary and
//! secondary endpoints. Designations may be addresses or host names; names
//! are resolved first. Any resolution error fails the test.

use std::collections::{BTreeMap, BTreeSet};
use std::net::IpAddr;

use crate::dns::types::{PolicyOutcome, TestConfig, TestResult};
use crate::error::{ResolutionFailure, Result};
use crate::policy::context::RunContext;
use crate::policy::report::{Mark, ReportBuilder};

/// What the answer says about the failover state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailoverState {
    /// Only the primary answered
    Primary,
    /// Only the secondary answered; failover happened
    FailedOver,
    /// Both were returned
    Both,
    /// Neither designated endpoint was returned
    Neither,
    /// Nothing was designated
    Undesignated,
}

impl FailoverState {
    #[must_use]
    pub fn classify(
        answer: &BTreeSet<IpAddr>,
        primary: Option<&BTreeSet<IpAddr>>,
        secondary: Option<&BTreeSet<IpAddr>>,
    ) -> Self {
        if primary.is_none() && secondary.is_none() {
            return Self::Undesignated;
        }
        let hit = |set: Option<&BTreeSet<IpAddr>>| set.is_some_and(|s| !s.is_disjoint(answer));
        match (hit(primary), hit(secondary)) {
            (true, false) => Self::Primary,
            (false, true) => Self::FailedOver,
            (true, true) => Self::Both,
            (false, false) => Self::Neither,
        }
    }

    #[must_use]
    pub fn result(self) -> TestResult {
        match self {
            Self::Primary | Self::FailedOver => TestResult::Passed,
            Self::Both | Self::Undesignated => TestResult::Partial,
            Self::Neither => TestResult::Failed,
        }
    }
}

/// Addresses of a designated endpoint.
async fn designated_addresses(
    ctx: &RunContext,
    endpoint: &str,
) -> std::result::Result<BTreeSet<IpAddr>, ResolutionFailure> {
    let endpoint = endpoint.trim();
    if let Ok(ip) = endpoint.parse::<IpAddr>() {
        return Ok(BTreeSet::from([ip]));
    }
    let resolution = ctx.collab.resolver.resolve(endpoint).await?;
    Ok(resolution.addresses.into_iter().collect())
}

fn failed(mut report: ReportBuilder, message: String) -> PolicyOutcome {
    report.line(Mark::Fail, &message);
    PolicyOutcome::verdict(TestResult::Failed, report.finish())
}

fn join(set: &BTreeSet<IpAddr>) -> String {
    set.iter().map(ToString::to_string).collect::<Vec<_>>().join(", ")
}

/// Run a failover test.
pub async fn run(ctx: &RunContext, config: &TestConfig) -> Result<PolicyOutcome> {
    let mut report = ReportBuilder::new(format!("Failover routing test for {}", config.domain));

    report.step("Designation");
    let mut designated = Vec::new();
    for (role, endpoint) in [
        ("primary", config.primary_endpoint.as_deref()),
        ("secondary", config.secondary_endpoint.as_deref()),
    ] {
        let Some(endpoint) = endpoint.filter(|e| !e.trim().is_empty()) else {
            report.line(Mark::Info, format!("no {role} designated"));
            designated.push(None);
            continue;
        };
        match designated_addresses(ctx, endpoint).await {
            Ok(set) if !set.is_empty() => {
                report.line(Mark::Info, format!("{role} {endpoint}: {}", join(&set)));
                designated.push(Some(set));
            }
            Ok(_) => {
                return Ok(failed(report, format!("{role} {endpoint} has no addresses")));
            }
            Err(e) => {
                return Ok(failed(report, format!("resolving {role} {endpoint} failed: {e}")));
            }
        }
    }
    let secondary = designated.pop().flatten();
    let primary = designated.pop().flatten();

    report.step("Resolution");
    let resolver = ctx.resolver_for(config);
    let resolution = match resolver.resolve(&config.domain).await {
        Ok(resolution) => resolution,
        Err(e) => {
            return Ok(failed(
                report,
                format!("resolving {} via {} failed: {e}", config.domain, resolver.label()),
            ));
        }
    };
    let answer: BTreeSet<IpAddr> = resolution.addresses.iter().copied().collect();
    report.line(
        Mark::Info,
        format!(
            "{} answered {} in {:.1} ms",
            resolver.label(),
            join(&answer),
            resolution.elapsed_ms
        ),
    );

    let mut distribution = BTreeMap::new();
    for ip in &answer {
        let role = if primary.as_ref().is_some_and(|s| s.contains(ip)) {
            "primary".to_string()
        } else if secondary.as_ref().is_some_and(|s| s.contains(ip)) {
            "secondary".to_string()
        } else {
            ctx.endpoint_for(*ip, &config.expected_weights).await
        };
        *distribution.entry(role).or_insert(0) += 1;
    }

    let state = FailoverState::classify(&answer, primary.as_ref(), secondary.as_ref());
    let result = state.result();
    let (mark, text) = match state {
        FailoverState::Primary => (Mark::Ok, "primary is serving; failover not triggered"),
        FailoverState::FailedOver => (Mark::Ok, "secondary is serving; failover triggered"),
        FailoverState::Both => (Mark::Warn, "primary and secondary returned together"),
        FailoverState::Neither => (Mark::Fail, "neither designated endpoint was returned"),
        FailoverState::Undesignated => (Mark::Warn, "no designation; raw answer reported"),
    };
    report.step("Verdict").line(mark, format!("{result}: {text}"));

    Ok(PolicyOutcome {
        distribution,
        response_time_ms: resolution.elapsed_ms,
        result,
        report: Some(report.finish()),
        failover_triggered: state == FailoverState::FailedOver,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set(ips: &[&str]) -> BTreeSet<IpAddr> {
        ips.iter().map(|ip| ip.parse().unwrap()).collect()
    }

    #[test]
    fn test_classify_states() {
        let primary = set(&["1.2.3.4"]);
        let secondary = set(&["5.6.7.8"]);
        let cases = [
            (set(&["1.2.3.4"]), FailoverState::Primary, TestResult::Passed),
            (set(&["5.6.7.8"]), FailoverState::FailedOver, TestResult::Passed),
            (set(&["1.2.3.4", "5.6.7.8"]), FailoverState::Both, TestResult::Partial),
            (set(&["9.9.9.9"]), FailoverState::Neither, TestResult::Failed),
        ];
        for (answer, state, result) in cases {
            let got = FailoverState::classify(&answer, Some(&primary), Some(&secondary));
            assert_eq!(got, state);
            assert_eq!(got.result(), result);
        }
    }

    #[test]
    fn test_undesignated_is_partial() {
        let state = FailoverState::classify(&set(&["1.2.3.4"]), None, None);
        assert_eq!(state, FailoverState::Undesignated);
        assert_eq!(state.result(), TestResult::Partial);
    }

    #[test]
    fn test_primary_only_designation() {
        let primary = set(&["1.2.3.4"]);
        assert_eq!(
            FailoverState::classify(&set(&["5.6.7.8"]), Some(&primary), None),
            FailoverState::Neither
        );
    }
}
