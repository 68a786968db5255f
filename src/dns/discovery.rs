//! A-record discovery for failover setups.
//!
//! Resolves a domain together with conventionally named backup variants,
//! classifies every address found and proposes which one is the primary and
//! which the secondary. Designation is held once per discovery set, so a
//! record can never be primary and secondary at the same time and each role
//! has at most one holder.

#![allow(clippy::missing_errors_doc)]

use serde::Serialize;
use std::collections::HashSet;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use crate::dns::classifier::Classifier;
use crate::dns::dig::{DnsQuery, LookupTool};
use crate::dns::probe::Prober;
use crate::dns::resolver::Resolver;
use crate::dns::types::{DiscoveredARecord, RecordId, SuggestedRole};
use crate::error::{Error, Result};

/// Leaf-label suffixes tried for names with three or more labels.
const LEAF_SUFFIXES: &[&str] = &["-backup", "-failover", "-secondary", "2", "-dr", "-hot", "-standby"];

/// Leaf-label prefixes tried for names with three or more labels.
const LEAF_PREFIXES: &[&str] = &["backup-", "failover-", "secondary-", "bak-"];

/// Labels prepended to a two-label (apex) domain.
const APEX_PREFIXES: &[&str] = &[
    "backup.",
    "failover.",
    "secondary.",
    "dr.",
    "standby.",
    "www2.",
    "www-backup.",
];

/// Substrings that mark a leaf label as a backup.
const BACKUP_MARKERS: &[&str] = &[
    "backup", "failover", "secondary", "standby", "fallback", "mirror", "bak-",
];

/// Short markers that only count as whole `-`-separated tokens.
const BACKUP_TOKENS: &[&str] = &["dr", "hot"];

/// Domain names to resolve: the input first, then its backup variants.
#[must_use]
pub fn candidate_domains(domain: &str) -> Vec<String> {
    let domain = domain.trim().trim_end_matches('.').to_lowercase();
    let mut out = vec![domain.clone()];
    let labels: Vec<&str> = domain.split('.').collect();

    if labels.len() >= 3 {
        let leaf = labels[0];
        let rest = labels[1..].join(".");
        out.extend(LEAF_SUFFIXES.iter().map(|s| format!("{leaf}{s}.{rest}")));
        out.extend(LEAF_PREFIXES.iter().map(|p| format!("{p}{leaf}.{rest}")));
    } else if labels.len() == 2 {
        out.extend(APEX_PREFIXES.iter().map(|p| format!("{p}{domain}")));
    }
    out
}

/// Check whether a name looks like a backup endpoint.
#[must_use]
pub fn is_backup_pattern(domain: &str) -> bool {
    let domain = domain.to_lowercase();
    let leaf = domain.split('.').next().unwrap_or_default();
    BACKUP_MARKERS.iter().any(|m| leaf.contains(m))
        || leaf.split('-').any(|token| BACKUP_TOKENS.contains(&token))
        || leaf.chars().last().is_some_and(|c| c.is_ascii_digit())
}

/// Role hint for a record found under `source` while discovering `main`.
#[must_use]
pub fn suggest_role(source: &str, main: &str) -> SuggestedRole {
    if source.trim_end_matches('.').eq_ignore_ascii_case(main.trim_end_matches('.')) {
        SuggestedRole::Primary
    } else if is_backup_pattern(source) {
        SuggestedRole::Secondary
    } else {
        SuggestedRole::Unassigned
    }
}

/// Current primary/secondary assignment of a discovery set.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Designation {
    pub primary: Option<RecordId>,
    pub secondary: Option<RecordId>,
}

/// Record plus its designation flags, for display and JSON output.
#[derive(Debug, Clone, Serialize)]
pub struct DesignatedRecord<'a> {
    #[serde(flatten)]
    pub record: &'a DiscoveredARecord,
    pub is_primary: bool,
    pub is_secondary: bool,
}

/// Records found by one discovery run.
#[derive(Debug, Clone, Default)]
pub struct DiscoverySet {
    pub domain: String,
    records: Vec<DiscoveredARecord>,
    designation: Designation,
}

impl DiscoverySet {
    pub fn new(domain: impl Into<String>) -> Self {
        Self {
            domain: domain.into(),
            records: Vec::new(),
            designation: Designation::default(),
        }
    }

    /// Add a record; its id is its position in the set.
    pub fn push(&mut self, mut record: DiscoveredARecord) -> RecordId {
        let id = RecordId(self.records.len());
        record.id = id;
        self.records.push(record);
        id
    }

    #[must_use]
    pub fn records(&self) -> &[DiscoveredARecord] {
        &self.records
    }

    #[must_use]
    pub fn get(&self, id: RecordId) -> Option<&DiscoveredARecord> {
        self.records.get(id.0)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    #[must_use]
    pub fn designation(&self) -> Designation {
        self.designation
    }

    #[must_use]
    pub fn is_primary(&self, id: RecordId) -> bool {
        self.designation.primary == Some(id)
    }

    #[must_use]
    pub fn is_secondary(&self, id: RecordId) -> bool {
        self.designation.secondary == Some(id)
    }

    #[must_use]
    pub fn primary(&self) -> Option<&DiscoveredARecord> {
        self.designation.primary.and_then(|id| self.get(id))
    }

    #[must_use]
    pub fn secondary(&self) -> Option<&DiscoveredARecord> {
        self.designation.secondary.and_then(|id| self.get(id))
    }

    fn check(&self, id: RecordId) -> Result<()> {
        if id.0 < self.records.len() {
            Ok(())
        } else {
            Err(Error::config(format!("no discovered record {id}")))
        }
    }

    /// Make `id` the primary, replacing any previous primary.
    pub fn set_primary(&mut self, id: RecordId) -> Result<()> {
        self.check(id)?;
        if self.designation.secondary == Some(id) {
            self.designation.secondary = None;
        }
        self.designation.primary = Some(id);
        Ok(())
    }

    /// Make `id` the secondary, replacing any previous secondary.
    pub fn set_secondary(&mut self, id: RecordId) -> Result<()> {
        self.check(id)?;
        if self.designation.primary == Some(id) {
            self.designation.primary = None;
        }
        self.designation.secondary = Some(id);
        Ok(())
    }

    /// Remove whatever role `id` holds.
    pub fn clear_designation(&mut self, id: RecordId) -> Result<()> {
        self.check(id)?;
        if self.designation.primary == Some(id) {
            self.designation.primary = None;
        }
        if self.designation.secondary == Some(id) {
            self.designation.secondary = None;
        }
        Ok(())
    }

    /// Records with their designation flags.
    #[must_use]
    pub fn rows(&self) -> Vec<DesignatedRecord<'_>> {
        self.records
            .iter()
            .map(|record| DesignatedRecord {
                record,
                is_primary: self.is_primary(record.id),
                is_secondary: self.is_secondary(record.id),
            })
            .collect()
    }

    /// Propose a designation from the role suggestions and reachability.
    pub fn auto_designate(&mut self) {
        self.designation = Designation::default();
        let ids: Vec<RecordId> = self.records.iter().map(|r| r.id).collect();
        let with_role = |role: SuggestedRole| -> Vec<RecordId> {
            self.records
                .iter()
                .filter(|r| r.suggested_role == role)
                .map(|r| r.id)
                .collect()
        };
        let primaries = with_role(SuggestedRole::Primary);
        let secondaries = with_role(SuggestedRole::Secondary);
        let reachable = |id: &RecordId| self.records[id.0].reachable;

        let (primary, secondary) = if ids.len() == 1 {
            (Some(ids[0]), None)
        } else if primaries.len() == 1 && secondaries.len() == 1 {
            (Some(primaries[0]), Some(secondaries[0]))
        } else if !primaries.is_empty() && ids.len() >= 2 {
            let primary = primaries[0];
            let secondary = ids
                .iter()
                .copied()
                .find(|id| *id != primary && reachable(id));
            (Some(primary), secondary)
        } else if ids.len() >= 2 {
            let mut up = ids.iter().copied().filter(|id| reachable(id));
            (up.next(), up.next())
        } else {
            (None, None)
        };

        if let Some(id) = primary {
            self.designation.primary = Some(id);
        }
        if let Some(id) = secondary {
            self.designation.secondary = Some(id);
        }
        tracing::debug!(
            "auto designation for {}: primary {:?}, secondary {:?}",
            self.domain,
            self.designation.primary,
            self.designation.secondary
        );
    }
}

/// Runs discovery against the configured collaborators.
pub struct Discoverer {
    tool: Arc<dyn LookupTool>,
    fallback: Arc<dyn Resolver>,
    classifier: Arc<Classifier>,
    prober: Arc<dyn Prober>,
    lookup_timeout: Duration,
    reachability_timeout: Duration,
}

impl Discoverer {
    pub fn new(
        tool: Arc<dyn LookupTool>,
        fallback: Arc<dyn Resolver>,
        classifier: Arc<Classifier>,
        prober: Arc<dyn Prober>,
        lookup_timeout: Duration,
        reachability_timeout: Duration,
    ) -> Self {
        Self {
            tool,
            fallback,
            classifier,
            prober,
            lookup_timeout,
            reachability_timeout,
        }
    }

    /// Addresses and TTL for one name: lookup tool first, resolver second.
    async fn lookup(&self, name: &str) -> Vec<(IpAddr, Option<u32>)> {
        let query = DnsQuery::a(name).with_timeout(self.lookup_timeout);
        match self.tool.query(&query).await {
            Ok(answer) if !answer.ipv4_addresses().is_empty() => {
                let ttl = answer.min_ttl();
                return answer
                    .ipv4_addresses()
                    .into_iter()
                    .map(|ip| (IpAddr::V4(ip), ttl))
                    .collect();
            }
            Ok(_) => tracing::trace!("{name}: no A records from lookup tool"),
            Err(e) => tracing::debug!("{name}: lookup tool failed ({e}), using resolver"),
        }
        match self.fallback.resolve(name).await {
            Ok(resolution) => resolution
                .addresses
                .into_iter()
                .filter(IpAddr::is_ipv4)
                .map(|ip| (ip, None))
                .collect(),
            Err(_) => Vec::new(),
        }
    }

    /// Resolve the domain and its variants, then auto-designate.
    pub async fn discover(&self, domain: &str) -> DiscoverySet {
        let main = domain.trim().trim_end_matches('.').to_lowercase();
        let mut set = DiscoverySet::new(main.clone());
        let mut seen: HashSet<IpAddr> = HashSet::new();

        for candidate in candidate_domains(&main) {
            let found = self.lookup(&candidate).await;
            if found.is_empty() {
                continue;
            }
            tracing::info!("{candidate}: {} address(es)", found.len());

            for (ip, ttl) in found {
                if !seen.insert(ip) {
                    continue;
                }
                let class = self.classifier.classify(ip);
                let reachable = self.prober.is_reachable(ip, self.reachability_timeout).await;
                let response_time_ms = if reachable {
                    self.prober.measure_latency(ip).await
                } else {
                    None
                };
                set.push(DiscoveredARecord {
                    id: RecordId(0),
                    ip_address: ip,
                    source_domain: candidate.clone(),
                    cloud_provider: class.provider.map(|p| p.to_string()),
                    aws_region: class.region,
                    endpoint_name: class.endpoint_id,
                    ttl,
                    reachable,
                    response_time_ms,
                    suggested_role: suggest_role(&candidate, &main),
                });
            }
        }

        set.auto_designate();
        set
    }
}
