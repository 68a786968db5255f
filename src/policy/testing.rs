//! Stub collaborators for unit tests.

use async_trait::async_trait;
use std::net::IpAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::config::EngineSettings;
use crate::dns::dig::{AnswerRecord, DnsQuery, LookupTool, QueryAnswer};
use crate::dns::probe::Prober;
use crate::dns::resolver::{Resolution, ResolveOutcome, Resolver};
use crate::error::ResolutionFailure;
use crate::policy::context::{Collaborators, RunContext};

/// Resolver answering from a fixed cycle of single-address answers.
pub struct CyclingResolver {
    answers: Vec<IpAddr>,
    next: AtomicUsize,
}

impl CyclingResolver {
    pub fn weighted(pairs: &[(&str, usize)]) -> Arc<Self> {
        let answers: Vec<IpAddr> = pairs
            .iter()
            .flat_map(|(ip, n)| std::iter::repeat(ip.parse::<IpAddr>().unwrap()).take(*n))
            .collect();
        Arc::new(Self {
            answers,
            next: AtomicUsize::new(0),
        })
    }

    pub fn failing() -> Arc<Self> {
        Self::weighted(&[])
    }
}

#[async_trait]
impl Resolver for CyclingResolver {
    fn label(&self) -> String {
        "stub resolver".to_string()
    }

    async fn resolve(&self, domain: &str) -> ResolveOutcome {
        if self.answers.is_empty() {
            return Err(ResolutionFailure::NoAnswer(domain.to_string()));
        }
        let i = self.next.fetch_add(1, Ordering::SeqCst) % self.answers.len();
        Ok(Resolution {
            addresses: vec![self.answers[i]],
            elapsed_ms: 1.0,
            raw: None,
        })
    }
}

type Script = dyn Fn(&DnsQuery) -> Result<QueryAnswer, ResolutionFailure> + Send + Sync;

/// Lookup tool answering through a closure.
pub struct StubTool {
    script: Box<Script>,
}

impl StubTool {
    pub fn scripted(
        script: impl Fn(&DnsQuery) -> Result<QueryAnswer, ResolutionFailure> + Send + Sync + 'static,
    ) -> Arc<Self> {
        Arc::new(Self {
            script: Box::new(script),
        })
    }

    pub fn empty() -> Arc<Self> {
        Self::scripted(|_| Ok(QueryAnswer::default()))
    }

    /// A queries cycle through `ips`; other types get an empty answer.
    pub fn a_records(ips: &[&str]) -> Arc<Self> {
        let ips: Vec<String> = ips.iter().map(|s| (*s).to_string()).collect();
        let next = AtomicUsize::new(0);
        Self::scripted(move |query| {
            if query.kind != crate::dns::dig::RecordKind::A {
                return Ok(QueryAnswer::default());
            }
            let i = next.fetch_add(1, Ordering::SeqCst) % ips.len();
            Ok(answer(&query.name, &[("A", ips[i].as_str())]))
        })
    }
}

#[async_trait]
impl LookupTool for StubTool {
    async fn query(&self, query: &DnsQuery) -> Result<QueryAnswer, ResolutionFailure> {
        (self.script)(query)
    }
}

/// Answer with `(type, data)` records, TTL 60.
pub fn answer(name: &str, records: &[(&str, &str)]) -> QueryAnswer {
    QueryAnswer {
        records: records
            .iter()
            .map(|(kind, data)| AnswerRecord {
                name: format!("{}.", name.trim_end_matches('.')),
                ttl: 60,
                kind: (*kind).to_string(),
                data: (*data).to_string(),
            })
            .collect(),
        elapsed_ms: 2.0,
        raw: String::new(),
    }
}

pub struct UpProber;

#[async_trait]
impl Prober for UpProber {
    async fn is_reachable(&self, _ip: IpAddr, _timeout: Duration) -> bool {
        true
    }

    async fn measure_latency(&self, _ip: IpAddr) -> Option<f64> {
        Some(1.0)
    }
}

pub fn context(
    settings: EngineSettings,
    resolver: Arc<dyn Resolver>,
    tool: Arc<dyn LookupTool>,
) -> RunContext {
    RunContext {
        collab: Arc::new(Collaborators::new(resolver, tool, Arc::new(UpProber))),
        settings: Arc::new(settings),
        cancel: CancellationToken::new(),
    }
}
