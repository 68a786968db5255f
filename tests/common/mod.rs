//! Scripted collaborators shared by the integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dnspolicy::config::EngineSettings;
use dnspolicy::dns::dig::{AnswerRecord, DnsQuery, LookupTool, QueryAnswer};
use dnspolicy::dns::probe::Prober;
use dnspolicy::dns::resolver::{Resolution, ResolveOutcome, Resolver};
use dnspolicy::error::ResolutionFailure;
use dnspolicy::policy::{Collaborators, Engine};

fn parse(ip: &str) -> IpAddr {
    ip.parse().unwrap()
}

/// Resolver that hands out one address per lookup from a repeating cycle.
pub struct CycleResolver {
    cycle: Vec<IpAddr>,
    next: AtomicUsize,
}

impl CycleResolver {
    /// `pairs` lists each address with how many times it appears per cycle.
    pub fn new(pairs: &[(&str, usize)]) -> Arc<Self> {
        let cycle = pairs
            .iter()
            .flat_map(|(ip, n)| std::iter::repeat(parse(ip)).take(*n))
            .collect();
        Arc::new(Self {
            cycle,
            next: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl Resolver for CycleResolver {
    fn label(&self) -> String {
        "cycle".to_string()
    }

    async fn resolve(&self, domain: &str) -> ResolveOutcome {
        if self.cycle.is_empty() {
            return Err(ResolutionFailure::NoAnswer(domain.to_string()));
        }
        let i = self.next.fetch_add(1, Ordering::SeqCst) % self.cycle.len();
        Ok(Resolution {
            addresses: vec![self.cycle[i]],
            elapsed_ms: 1.5,
            raw: None,
        })
    }
}

/// Resolver that always returns the same full answer.
pub struct FixedResolver(pub Vec<IpAddr>);

impl FixedResolver {
    pub fn new(ips: &[&str]) -> Arc<Self> {
        Arc::new(Self(ips.iter().map(|ip| parse(ip)).collect()))
    }
}

#[async_trait]
impl Resolver for FixedResolver {
    fn label(&self) -> String {
        "fixed".to_string()
    }

    async fn resolve(&self, domain: &str) -> ResolveOutcome {
        if self.0.is_empty() {
            return Err(ResolutionFailure::NoAnswer(domain.to_string()));
        }
        Ok(Resolution {
            addresses: self.0.clone(),
            elapsed_ms: 3.0,
            raw: None,
        })
    }
}

/// Lookup tool answering A queries from a name table, counting every call.
pub struct TableTool {
    names: HashMap<String, Vec<String>>,
    default: Option<String>,
    delay: Duration,
    calls: AtomicUsize,
}

impl TableTool {
    pub fn new(names: &[(&str, &[&str])]) -> Arc<Self> {
        Arc::new(Self {
            names: names
                .iter()
                .map(|(name, ips)| {
                    (
                        (*name).to_string(),
                        ips.iter().map(|ip| (*ip).to_string()).collect(),
                    )
                })
                .collect(),
            default: None,
            delay: Duration::ZERO,
            calls: AtomicUsize::new(0),
        })
    }

    /// Answer every A query with `ip` after `delay`.
    pub fn slow(ip: &str, delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            names: HashMap::new(),
            default: Some(ip.to_string()),
            delay,
            calls: AtomicUsize::new(0),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LookupTool for TableTool {
    async fn query(&self, query: &DnsQuery) -> Result<QueryAnswer, ResolutionFailure> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        let name = query.name.trim_end_matches('.');
        let ips: Vec<String> = match (self.names.get(name), &self.default) {
            (Some(ips), _) => ips.clone(),
            (None, Some(ip)) => vec![ip.clone()],
            (None, None) => Vec::new(),
        };
        Ok(QueryAnswer {
            records: ips
                .into_iter()
                .map(|data| AnswerRecord {
                    name: format!("{name}."),
                    ttl: 300,
                    kind: "A".to_string(),
                    data,
                })
                .collect(),
            elapsed_ms: 2.0,
            raw: String::new(),
        })
    }
}

/// Prober that reports every address up.
pub struct AllUp;

#[async_trait]
impl Prober for AllUp {
    async fn is_reachable(&self, _ip: IpAddr, _timeout: Duration) -> bool {
        true
    }

    async fn measure_latency(&self, _ip: IpAddr) -> Option<f64> {
        Some(4.0)
    }
}

/// Settings without pacing delays.
pub fn fast_settings() -> EngineSettings {
    EngineSettings {
        small_run_delay_ms: 0,
        medium_run_delay_ms: 0,
        large_run_delay_ms: 0,
        high_volume_delay_ms: 0,
        ..EngineSettings::default()
    }
}

pub fn engine(
    settings: EngineSettings,
    resolver: Arc<dyn Resolver>,
    tool: Arc<dyn LookupTool>,
) -> Engine {
    Engine::new(Collaborators::new(resolver, tool, Arc::new(AllUp)), settings)
}
