//! Resolution adapters.
//!
//! A [`Resolver`] performs one lookup and reports either the resolved
//! addresses with the elapsed time, or a typed [`ResolutionFailure`]. Two
//! implementations exist: the host's standard resolution path and an
//! external lookup tool pointed at a specific resolver.

#![allow(clippy::missing_errors_doc)]

use async_trait::async_trait;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use trust_dns_resolver::TokioAsyncResolver;

use crate::dns::dig::{DnsQuery, LookupTool};
use crate::error::{ResolutionFailure, Result};

/// Addresses returned by one successful lookup.
#[derive(Debug, Clone, PartialEq)]
pub struct Resolution {
    pub addresses: Vec<IpAddr>,
    pub elapsed_ms: f64,
    /// Raw tool output, when the lookup went through an external tool
    pub raw: Option<String>,
}

impl Resolution {
    /// First address of the answer.
    #[must_use]
    pub fn primary(&self) -> Option<IpAddr> {
        self.addresses.first().copied()
    }
}

/// Outcome of one lookup.
pub type ResolveOutcome = std::result::Result<Resolution, ResolutionFailure>;

/// One-shot DNS resolution capability.
#[async_trait]
pub trait Resolver: Send + Sync {
    /// Human readable name used in reports.
    fn label(&self) -> String;

    async fn resolve(&self, domain: &str) -> ResolveOutcome;
}

/// Normalize a domain so it is resolved as an absolute name.
fn absolute(domain: &str) -> String {
    if domain.ends_with('.') {
        domain.to_string()
    } else {
        format!("{domain}.")
    }
}

/// Resolution through the host's resolver configuration.
///
/// The resolver cache is disabled: a routing-policy test needs every lookup
/// to reach the upstream resolver.
pub struct SystemResolver {
    resolver: TokioAsyncResolver,
    timeout: Duration,
}

impl SystemResolver {
    /// Build from `/etc/resolv.conf` (or the platform equivalent).
    ///
    /// # Errors
    ///
    /// Returns an error if the system configuration cannot be read or the
    /// resolver cannot be created.
    pub fn new(timeout: Duration) -> Result<Self> {
        let (config, mut opts) = trust_dns_resolver::system_conf::read_system_conf()?;
        opts.cache_size = 0;
        opts.timeout = timeout;
        opts.attempts = 1;
        let resolver = TokioAsyncResolver::tokio(config, opts)?;
        Ok(Self { resolver, timeout })
    }
}

#[async_trait]
impl Resolver for SystemResolver {
    fn label(&self) -> String {
        "system resolver".to_string()
    }

    async fn resolve(&self, domain: &str) -> ResolveOutcome {
        let start = Instant::now();
        // trust-dns enforces its own timeout; this guards against a stuck task
        let lookup = tokio::time::timeout(
            self.timeout * 2,
            self.resolver.lookup_ip(absolute(domain)),
        )
        .await
        .map_err(|_| ResolutionFailure::Timeout(self.timeout.as_millis() as u64))?;
        let elapsed_ms = start.elapsed().as_secs_f64() * 1000.0;

        match lookup {
            Ok(response) => {
                let addresses: Vec<IpAddr> = response.iter().collect();
                if addresses.is_empty() {
                    return Err(ResolutionFailure::NoAnswer(domain.to_string()));
                }
                Ok(Resolution {
                    addresses,
                    elapsed_ms,
                    raw: None,
                })
            }
            Err(e) => {
                use trust_dns_resolver::error::ResolveErrorKind;
                match e.kind() {
                    ResolveErrorKind::Timeout => Err(ResolutionFailure::Timeout(
                        self.timeout.as_millis() as u64,
                    )),
                    ResolveErrorKind::NoRecordsFound { .. } => {
                        Err(ResolutionFailure::NoAnswer(domain.to_string()))
                    }
                    _ => Err(ResolutionFailure::Lookup(e.to_string())),
                }
            }
        }
    }
}

/// Resolution through an external lookup tool aimed at one resolver.
#[derive(Clone)]
pub struct ToolResolver {
    tool: Arc<dyn LookupTool>,
    server: Option<IpAddr>,
    timeout: Duration,
}

impl ToolResolver {
    pub fn new(tool: Arc<dyn LookupTool>, server: Option<IpAddr>, timeout: Duration) -> Self {
        Self {
            tool,
            server,
            timeout,
        }
    }
}

#[async_trait]
impl Resolver for ToolResolver {
    fn label(&self) -> String {
        match self.server {
            Some(server) => format!("lookup tool via {server}"),
            None => "lookup tool".to_string(),
        }
    }

    async fn resolve(&self, domain: &str) -> ResolveOutcome {
        let mut query = DnsQuery::a(domain).with_timeout(self.timeout);
        if let Some(server) = self.server {
            query = query.via(server);
        }
        let answer = self.tool.query(&query).await?;
        let addresses: Vec<IpAddr> = answer
            .ipv4_addresses()
            .into_iter()
            .map(IpAddr::V4)
            .collect();
        if addresses.is_empty() {
            return Err(ResolutionFailure::NoAnswer(domain.to_string()));
        }
        Ok(Resolution {
            addresses,
            elapsed_ms: answer.elapsed_ms,
            raw: Some(answer.raw),
        })
    }
}
