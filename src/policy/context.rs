//! Per-run context shared by the policy procedures.

use std::collections::BTreeMap;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::config::EngineSettings;
use crate::dns::classifier::Classifier;
use crate::dns::dig::LookupTool;
use crate::dns::geo::GeoLocator;
use crate::dns::probe::Prober;
use crate::dns::ranges::match_expected_endpoint;
use crate::dns::resolver::{Resolver, ToolResolver};
use crate::dns::types::TestConfig;
use crate::dns::vantage::VantagePoint;

/// External capabilities the engine drives.
///
/// Only the resolver, lookup tool, prober and classifier are required. A
/// missing vantage point degrades geolocation tests to plain resolution and
/// a missing locator skips the geolocation fallbacks of classification.
#[derive(Clone)]
pub struct Collaborators {
    pub resolver: Arc<dyn Resolver>,
    pub tool: Arc<dyn LookupTool>,
    pub prober: Arc<dyn Prober>,
    pub classifier: Arc<Classifier>,
    pub vantage: Option<Arc<dyn VantagePoint>>,
    pub locator: Option<Arc<dyn GeoLocator>>,
}

impl Collaborators {
    pub fn new(
        resolver: Arc<dyn Resolver>,
        tool: Arc<dyn LookupTool>,
        prober: Arc<dyn Prober>,
    ) -> Self {
        Self {
            resolver,
            tool,
            prober,
            classifier: Arc::new(Classifier::default()),
            vantage: None,
            locator: None,
        }
    }

    #[must_use]
    pub fn with_classifier(mut self, classifier: Arc<Classifier>) -> Self {
        self.classifier = classifier;
        self
    }

    #[must_use]
    pub fn with_vantage(mut self, vantage: Arc<dyn VantagePoint>) -> Self {
        self.vantage = Some(vantage);
        self
    }

    #[must_use]
    pub fn with_locator(mut self, locator: Arc<dyn GeoLocator>) -> Self {
        self.locator = Some(locator);
        self
    }
}

/// Everything one run needs. Cheap to clone.
#[derive(Clone)]
pub struct RunContext {
    pub collab: Arc<Collaborators>,
    pub settings: Arc<EngineSettings>,
    pub cancel: CancellationToken,
}

impl RunContext {
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Sleep for `delay`. Returns `false` if the run was cancelled meanwhile.
    pub async fn pause(&self, delay: Duration) -> bool {
        if delay.is_zero() {
            return !self.is_cancelled();
        }
        tokio::select! {
            () = self.cancel.cancelled() => false,
            () = tokio::time::sleep(delay) => true,
        }
    }

    /// Resolver for a test: the lookup tool against the requested server, or
    /// the engine's default resolver.
    #[must_use]
    pub fn resolver_for(&self, config: &TestConfig) -> Arc<dyn Resolver> {
        match config.resolver {
            Some(server) => Arc::new(ToolResolver::new(
                Arc::clone(&self.collab.tool),
                Some(server),
                self.settings.lookup_timeout(),
            )),
            None => Arc::clone(&self.collab.resolver),
        }
    }

    /// Endpoint id an address is counted under.
    ///
    /// A configured expected endpoint wins; otherwise the classifier names
    /// the address, consulting the locator only for addresses no provider
    /// table claims.
    pub async fn endpoint_for(&self, ip: IpAddr, expected: &BTreeMap<String, u32>) -> String {
        if let Some(key) = match_expected_endpoint(&ip.to_string(), expected.keys()) {
            return key.to_string();
        }
        let classification = self.collab.classifier.classify(ip);
        if classification.provider.is_some() {
            return classification.endpoint_id;
        }
        match &self.collab.locator {
            Some(locator) => {
                let location = locator.locate(ip).await;
                self.collab
                    .classifier
                    .classify_with_location(ip, Some(&location))
                    .endpoint_id
            }
            None => classification.endpoint_id,
        }
    }
}
