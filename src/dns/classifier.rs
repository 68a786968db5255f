//! Address classification.
//!
//! Maps a resolved address to a cloud provider, an approximate region and a
//! synthetic endpoint id. Each of the three answers comes from an ordered list
//! of strategies; the first strategy that produces a value wins. The
//! classifier performs no I/O: geolocation hints are looked up by the caller
//! and passed in.

use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;

use crate::dns::ranges::{CloudProvider, GeoBucket, RangeTables, UNKNOWN_REGION};

/// Result of classifying one address.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Classification {
    pub provider: Option<CloudProvider>,
    pub region: String,
    pub endpoint_id: String,
}

/// Provider detection strategies, tried in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderStrategy {
    /// Address lies inside a known AWS region block
    AwsRegionBlock,
    /// Textual prefix table
    PrefixTable,
}

/// Region detection strategies, tried in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegionStrategy {
    AwsRegionBlock,
    AwsOctetHint,
    GeoBucket,
}

/// Endpoint-id synthesis strategies, tried in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndpointStrategy {
    KnownService,
    ProviderRegionSubnet,
    GeoBucketSubnet,
}

/// Inputs shared by all strategies for one address.
struct Subject<'a> {
    v4: Option<Ipv4Addr>,
    text: String,
    location: Option<&'a str>,
}

impl Subject<'_> {
    fn subnet(&self) -> Option<String> {
        self.v4.map(|ip| {
            let [a, b, c, _] = ip.octets();
            format!("{a}-{b}-{c}")
        })
    }

    fn bucket(&self) -> Option<GeoBucket> {
        self.location.and_then(GeoBucket::from_location)
    }
}

impl ProviderStrategy {
    fn apply(self, tables: &RangeTables, subject: &Subject<'_>) -> Option<CloudProvider> {
        match self {
            Self::AwsRegionBlock => subject
                .v4
                .and_then(|ip| tables.aws_region_for(ip))
                .map(|_| CloudProvider::Aws),
            Self::PrefixTable => tables.provider_for_prefix(&subject.text),
        }
    }
}

impl RegionStrategy {
    fn apply(
        self,
        tables: &RangeTables,
        subject: &Subject<'_>,
        provider: Option<CloudProvider>,
    ) -> Option<String> {
        let is_aws = provider == Some(CloudProvider::Aws);
        match self {
            Self::AwsRegionBlock if is_aws => subject
                .v4
                .and_then(|ip| tables.aws_region_for(ip))
                .map(str::to_string),
            Self::AwsOctetHint if is_aws => subject
                .v4
                .and_then(|ip| tables.aws_octet_hint(ip))
                .map(str::to_string),
            Self::GeoBucket => subject.bucket().map(|b| b.default_region().to_string()),
            _ => None,
        }
    }
}

impl EndpointStrategy {
    fn apply(
        self,
        tables: &RangeTables,
        subject: &Subject<'_>,
        provider: Option<CloudProvider>,
        region: &str,
    ) -> Option<String> {
        match self {
            Self::KnownService => subject
                .v4
                .and_then(|ip| tables.known_service(ip))
                .map(str::to_string),
            Self::ProviderRegionSubnet => {
                let provider = provider?;
                Some(format!("{}-{}-{}", provider.label(), region, subject.subnet()?))
            }
            Self::GeoBucketSubnet => {
                let bucket = subject.bucket()?;
                Some(format!("geo-{}-{}", bucket.label(), subject.subnet()?))
            }
        }
    }
}

/// Raw endpoint id used when every strategy declines.
#[must_use]
pub fn raw_endpoint_id(ip: &str) -> String {
    format!("endpoint-{}", ip.replace(['.', ':'], "-"))
}

/// Address classifier backed by shared immutable tables.
///
/// # Example
///
/// ```ignore
/// let classifier = Classifier::default();
/// let c = classifier.classify("52.31.255.255".parse()?);
/// assert_eq!(c.region, "eu-west-1");
/// ```
#[derive(Debug, Clone)]
pub struct Classifier {
    tables: Arc<RangeTables>,
    provider_strategies: Vec<ProviderStrategy>,
    region_strategies: Vec<RegionStrategy>,
    endpoint_strategies: Vec<EndpointStrategy>,
}

impl Default for Classifier {
    fn default() -> Self {
        Self::new(RangeTables::shared())
    }
}

impl Classifier {
    /// Create a classifier with the standard strategy order.
    #[must_use]
    pub fn new(tables: Arc<RangeTables>) -> Self {
        Self {
            tables,
            provider_strategies: vec![
                ProviderStrategy::AwsRegionBlock,
                ProviderStrategy::PrefixTable,
            ],
            region_strategies: vec![
                RegionStrategy::AwsRegionBlock,
                RegionStrategy::AwsOctetHint,
                RegionStrategy::GeoBucket,
            ],
            endpoint_strategies: vec![
                EndpointStrategy::KnownService,
                EndpointStrategy::ProviderRegionSubnet,
                EndpointStrategy::GeoBucketSubnet,
            ],
        }
    }

    /// Replace the region strategy order.
    #[must_use]
    pub fn with_region_strategies(mut self, strategies: Vec<RegionStrategy>) -> Self {
        self.region_strategies = strategies;
        self
    }

    /// The tables this classifier reads.
    #[must_use]
    pub fn tables(&self) -> &Arc<RangeTables> {
        &self.tables
    }

    /// Classify an address without a geolocation hint.
    #[must_use]
    pub fn classify(&self, ip: IpAddr) -> Classification {
        self.classify_with_location(ip, None)
    }

    /// Classify an address, using `location` (country code or name) for the
    /// geolocation fallbacks.
    #[must_use]
    pub fn classify_with_location(&self, ip: IpAddr, location: Option<&str>) -> Classification {
        let subject = Subject {
            v4: match ip {
                IpAddr::V4(v4) => Some(v4),
                IpAddr::V6(v6) => v6.to_ipv4_mapped(),
            },
            text: ip.to_string(),
            location,
        };

        let provider = self
            .provider_strategies
            .iter()
            .find_map(|s| s.apply(&self.tables, &subject));

        let region = self
            .region_strategies
            .iter()
            .find_map(|s| s.apply(&self.tables, &subject, provider))
            .unwrap_or_else(|| UNKNOWN_REGION.to_string());

        let endpoint_id = self
            .endpoint_strategies
            .iter()
            .find_map(|s| s.apply(&self.tables, &subject, provider, &region))
            .unwrap_or_else(|| raw_endpoint_id(&subject.text));

        Classification {
            provider,
            region,
            endpoint_id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ip(s: &str) -> IpAddr {
        s.parse().unwrap()
    }

    #[test]
    fn test_every_block_edge_maps_to_its_region() {
        let classifier = Classifier::default();
        for (cidr, region) in classifier.tables().aws_region_blocks() {
            for addr in [cidr.first(), cidr.last()] {
                let c = classifier.classify(IpAddr::V4(addr));
                assert_eq!(c.region, region, "{addr} should be in {region}");
                assert_eq!(c.provider, Some(CloudProvider::Aws));
            }
        }
    }

    #[test]
    fn test_inside_block_by_construction() {
        let classifier = Classifier::default();
        // outside every block, picked up by the octet hint
        let c = classifier.classify(ip("52.31.255.255"));
        assert_eq!(c.region, "eu-west-1");
        let c = classifier.classify(ip("52.17.200.1"));
        assert_eq!(c.region, "eu-west-1");
        assert_eq!(c.endpoint_id, "aws-eu-west-1-52-17-200");
    }

    #[test]
    fn test_outside_all_ranges_is_unknown_region() {
        let classifier = Classifier::default();
        let c = classifier.classify(ip("192.0.2.44"));
        assert_eq!(c.provider, None);
        assert_eq!(c.region, UNKNOWN_REGION);
        assert_eq!(c.endpoint_id, "endpoint-192-0-2-44");
    }

    #[test]
    fn test_octet_hint_fallback() {
        let classifier = Classifier::default();
        let c = classifier.classify(ip("54.200.10.10"));
        assert_eq!(c.provider, Some(CloudProvider::Aws));
        assert_eq!(c.region, "eu-west-1");
    }

    #[test]
    fn test_known_service_names() {
        let classifier = Classifier::default();
        assert_eq!(
            classifier.classify(ip("8.8.8.8")).endpoint_id,
            "google-dns-primary"
        );
        assert_eq!(
            classifier.classify(ip("169.254.169.253")).endpoint_id,
            "aws-vpc-resolver"
        );
    }

    #[test]
    fn test_non_aws_provider_keeps_unknown_region() {
        let classifier = Classifier::default();
        let c = classifier.classify(ip("104.16.5.9"));
        assert_eq!(c.provider, Some(CloudProvider::Cloudflare));
        assert_eq!(c.region, UNKNOWN_REGION);
        assert_eq!(c.endpoint_id, "cloudflare-unknown-region-104-16-5");
    }

    #[test]
    fn test_geolocation_fallbacks() {
        let classifier = Classifier::default();
        let c = classifier.classify_with_location(ip("203.0.113.7"), Some("JP"));
        assert_eq!(c.provider, None);
        assert_eq!(c.region, "ap-southeast-1");
        assert_eq!(c.endpoint_id, "geo-asia-203-0-113");

        let c = classifier.classify_with_location(ip("203.0.113.7"), Some("Unknown location"));
        assert_eq!(c.region, UNKNOWN_REGION);
        assert_eq!(c.endpoint_id, "endpoint-203-0-113-7");
    }

    #[test]
    fn test_ipv6_raw_id() {
        let classifier = Classifier::default();
        let c = classifier.classify(ip("2001:db8::1"));
        assert_eq!(c.endpoint_id, "endpoint-2001-db8--1");
    }

    #[test]
    fn test_classification_is_deterministic() {
        let classifier = Classifier::default();
        for addr in ["52.17.1.1", "8.8.4.4", "203.0.113.9", "13.64.1.1", "44.200.3.4"] {
            let first = classifier.classify(ip(addr));
            for _ in 0..10 {
                assert_eq!(classifier.classify(ip(addr)), first);
            }
        }
    }

    #[test]
    fn test_custom_strategy_order() {
        let classifier =
            Classifier::default().with_region_strategies(vec![RegionStrategy::GeoBucket]);
        let c = classifier.classify_with_location(ip("52.17.200.1"), Some("US"));
        assert_eq!(c.region, "us-east-1");
    }
}
