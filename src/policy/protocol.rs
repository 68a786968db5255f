//! Verification steps shared by the geolocation and latency protocols.
//!
//! Each step asks the lookup tool something specific: which name servers are
//! authoritative, whether a resolver forwards client-subnet hints, and what
//! each authoritative server answers for clients in the configured test
//! subnets. The analysis helpers are pure functions over those answers.

use std::collections::{BTreeMap, BTreeSet};
use std::net::{IpAddr, Ipv4Addr};

use crate::dns::dig::{DnsQuery, RecordKind};
use crate::policy::context::RunContext;

/// Authoritative name servers queried per test.
const MAX_NAME_SERVERS: usize = 4;

/// Marker in the TXT answer of the client-subnet echo name.
const ECS_MARKER: &str = "edns0-client-subnet";

/// One authoritative server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NameServer {
    pub name: String,
    pub ip: Option<IpAddr>,
}

/// Whether a resolver forwarded the client-subnet hint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EcsProbe {
    pub supported: bool,
    pub detail: String,
}

/// Answer of one server for one client subnet.
#[derive(Debug, Clone, PartialEq)]
pub struct SubnetAnswer {
    pub server: String,
    pub subnet_label: String,
    pub addresses: BTreeSet<Ipv4Addr>,
    pub elapsed_ms: f64,
    pub ttl: Option<u32>,
    pub error: Option<String>,
}

impl SubnetAnswer {
    #[must_use]
    pub fn answered(&self) -> bool {
        self.error.is_none() && !self.addresses.is_empty()
    }

    #[must_use]
    pub fn addresses_text(&self) -> String {
        if let Some(e) = &self.error {
            return format!("error: {e}");
        }
        if self.addresses.is_empty() {
            return "no answer".to_string();
        }
        self.addresses
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(", ")
    }
}

fn query(ctx: &RunContext, name: &str, kind: RecordKind) -> DnsQuery {
    DnsQuery::new(name, kind).with_timeout(ctx.settings.lookup_timeout())
}

/// A query through the default resolver with an optional subnet hint.
pub async fn query_default(
    ctx: &RunContext,
    name: &str,
    subnet: Option<&str>,
    label: &str,
) -> SubnetAnswer {
    let mut q = query(ctx, name, RecordKind::A).via(ctx.settings.default_resolver);
    if let Some(subnet) = subnet {
        q = q.with_subnet(subnet);
    }
    run_query(ctx, &q, ctx.settings.default_resolver.to_string(), label).await
}

async fn run_query(ctx: &RunContext, q: &DnsQuery, server: String, label: &str) -> SubnetAnswer {
    match ctx.collab.tool.query(q).await {
        Ok(answer) => SubnetAnswer {
            server,
            subnet_label: label.to_string(),
            addresses: answer.ipv4_addresses().into_iter().collect(),
            elapsed_ms: answer.elapsed_ms,
            ttl: answer.min_ttl(),
            error: None,
        },
        Err(e) => SubnetAnswer {
            server,
            subnet_label: label.to_string(),
            addresses: BTreeSet::new(),
            elapsed_ms: 0.0,
            ttl: None,
            error: Some(e.to_string()),
        },
    }
}

/// Ask the default resolver to echo the client subnet it forwards.
pub async fn probe_ecs_support(ctx: &RunContext) -> EcsProbe {
    let Some(subnet) = ctx.settings.test_subnets.first() else {
        return EcsProbe {
            supported: false,
            detail: "no test subnet configured".to_string(),
        };
    };
    let q = query(ctx, &ctx.settings.ecs_probe_name, RecordKind::Txt)
        .via(ctx.settings.default_resolver)
        .with_subnet(subnet.subnet.clone());
    match ctx.collab.tool.query(&q).await {
        Ok(answer) => {
            let values = answer.values(RecordKind::Txt);
            match values.iter().find(|v| v.contains(ECS_MARKER)) {
                Some(v) => EcsProbe {
                    supported: true,
                    detail: v.clone(),
                },
                None => EcsProbe {
                    supported: false,
                    detail: if values.is_empty() {
                        "no TXT answer".to_string()
                    } else {
                        values.join("; ")
                    },
                },
            }
        }
        Err(e) => EcsProbe {
            supported: false,
            detail: e.to_string(),
        },
    }
}

/// Authoritative servers of the closest enclosing zone that has NS records.
pub async fn authoritative_servers(ctx: &RunContext, domain: &str) -> Vec<NameServer> {
    let mut zone = domain.trim_end_matches('.').to_string();
    loop {
        let q = query(ctx, &zone, RecordKind::Ns).via(ctx.settings.default_resolver);
        let names = match ctx.collab.tool.query(&q).await {
            Ok(answer) => answer.values(RecordKind::Ns),
            Err(e) => {
                tracing::debug!("NS lookup for {zone} failed: {e}");
                Vec::new()
            }
        };
        if !names.is_empty() {
            let mut servers = Vec::new();
            for name in names.into_iter().take(MAX_NAME_SERVERS) {
                let name = name.trim_end_matches('.').to_string();
                let ip = address_of(ctx, &name).await;
                servers.push(NameServer { name, ip });
            }
            return servers;
        }
        match zone.split_once('.') {
            Some((_, parent)) if parent.contains('.') => zone = parent.to_string(),
            _ => return Vec::new(),
        }
    }
}

async fn address_of(ctx: &RunContext, name: &str) -> Option<IpAddr> {
    let q = query(ctx, name, RecordKind::A).via(ctx.settings.default_resolver);
    ctx.collab
        .tool
        .query(&q)
        .await
        .ok()?
        .ipv4_addresses()
        .first()
        .map(|ip| IpAddr::V4(*ip))
}

/// Query every reachable authoritative server once per test subnet.
///
/// Stops early when the run is cancelled.
pub async fn query_subnets(
    ctx: &RunContext,
    domain: &str,
    servers: &[NameServer],
) -> Vec<SubnetAnswer> {
    let mut answers = Vec::new();
    for server in servers {
        let Some(ip) = server.ip else { continue };
        for subnet in &ctx.settings.test_subnets {
            if ctx.is_cancelled() {
                return answers;
            }
            let q = query(ctx, domain, RecordKind::A)
                .via(ip)
                .with_subnet(subnet.subnet.clone());
            answers.push(run_query(ctx, &q, server.name.clone(), &subnet.label).await);
        }
    }
    answers
}

/// Resolve through each configured public resolver.
pub async fn query_public_resolvers(ctx: &RunContext, domain: &str) -> Vec<SubnetAnswer> {
    let mut answers = Vec::new();
    for resolver in &ctx.settings.public_resolvers {
        if ctx.is_cancelled() {
            break;
        }
        let q = query(ctx, domain, RecordKind::A).via(resolver.ip);
        answers.push(run_query(ctx, &q, resolver.name.clone(), &resolver.ip.to_string()).await);
    }
    answers
}

/// Answer sets seen per subnet label, from servers that answered.
#[must_use]
pub fn answers_by_subnet(answers: &[SubnetAnswer]) -> BTreeMap<String, BTreeSet<Vec<Ipv4Addr>>> {
    let mut by_subnet: BTreeMap<String, BTreeSet<Vec<Ipv4Addr>>> = BTreeMap::new();
    for answer in answers.iter().filter(|a| a.answered()) {
        by_subnet
            .entry(answer.subnet_label.clone())
            .or_default()
            .insert(answer.addresses.iter().copied().collect());
    }
    by_subnet
}

/// Different subnets received different answers.
#[must_use]
pub fn subnet_steering(answers: &[SubnetAnswer]) -> bool {
    let distinct: BTreeSet<Vec<Ipv4Addr>> = answers_by_subnet(answers)
        .into_values()
        .flatten()
        .collect();
    distinct.len() > 1
}

/// Every server that answered gave the same set for the same subnet.
#[must_use]
pub fn propagation_consistent(answers: &[SubnetAnswer]) -> bool {
    answers_by_subnet(answers).values().all(|sets| sets.len() <= 1)
}

/// One line per subnet answer for reports.
#[must_use]
pub fn render_answers(answers: &[SubnetAnswer]) -> String {
    answers
        .iter()
        .map(|a| {
            let ttl = a.ttl.map_or_else(String::new, |t| format!(" ttl={t}"));
            format!(
                "{:<24} {:<16} {:>7.1} ms{ttl}  {}",
                a.server,
                a.subnet_label,
                a.elapsed_ms,
                a.addresses_text()
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineSettings;
    use crate::policy::testing::{answer, context, CyclingResolver, StubTool};

    fn subnet_answer(server: &str, label: &str, ips: &[&str]) -> SubnetAnswer {
        SubnetAnswer {
            server: server.to_string(),
            subnet_label: label.to_string(),
            addresses: ips.iter().map(|ip| ip.parse().unwrap()).collect(),
            elapsed_ms: 10.0,
            ttl: Some(60),
            error: None,
        }
    }

    #[test]
    fn test_steering_and_consistency() {
        let uniform = vec![
            subnet_answer("ns1", "europe", &["10.0.0.1"]),
            subnet_answer("ns1", "asia", &["10.0.0.1"]),
        ];
        assert!(!subnet_steering(&uniform));
        assert!(propagation_consistent(&uniform));

        let steered = vec![
            subnet_answer("ns1", "europe", &["10.0.0.2"]),
            subnet_answer("ns2", "europe", &["10.0.0.2"]),
            subnet_answer("ns1", "asia", &["10.0.0.3"]),
            subnet_answer("ns2", "asia", &["10.0.0.3"]),
        ];
        assert!(subnet_steering(&steered));
        assert!(propagation_consistent(&steered));

        let mut split = steered.clone();
        split[3] = subnet_answer("ns2", "asia", &["10.0.0.9"]);
        assert!(!propagation_consistent(&split));
    }

    #[test]
    fn test_failed_answers_are_ignored() {
        let mut failed = subnet_answer("ns2", "europe", &[]);
        failed.error = Some("timed out".to_string());
        let answers = vec![subnet_answer("ns1", "europe", &["10.0.0.1"]), failed];
        assert!(propagation_consistent(&answers));
        assert!(render_answers(&answers).contains("error: timed out"));
    }

    #[tokio::test]
    async fn test_ns_lookup_walks_up_to_zone() {
        let tool = StubTool::scripted(|q| {
            Ok(match (q.kind, q.name.as_str()) {
                (RecordKind::Ns, "example.com") => answer(
                    "example.com",
                    &[("NS", "ns1.example.net."), ("NS", "ns2.example.net.")],
                ),
                (RecordKind::A, "ns1.example.net") => answer("ns1.example.net", &[("A", "192.0.2.53")]),
                _ => answer(&q.name, &[]),
            })
        });
        let ctx = context(EngineSettings::default(), CyclingResolver::failing(), tool);
        let servers = authoritative_servers(&ctx, "www.example.com").await;

        assert_eq!(servers.len(), 2);
        assert_eq!(servers[0].name, "ns1.example.net");
        assert_eq!(servers[0].ip, Some("192.0.2.53".parse().unwrap()));
        assert_eq!(servers[1].ip, None);
    }

    #[tokio::test]
    async fn test_ecs_probe() {
        let tool = StubTool::scripted(|q| {
            Ok(answer(
                &q.name,
                &[("TXT", "\"edns0-client-subnet 24.48.0.0/24\"")],
            ))
        });
        let ctx = context(EngineSettings::default(), CyclingResolver::failing(), tool);
        let probe = probe_ecs_support(&ctx).await;
        assert!(probe.supported);
        assert_eq!(probe.detail, "edns0-client-subnet 24.48.0.0/24");
    }
}
