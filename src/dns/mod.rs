//! DNS module.
//!
//! This module provides the building blocks of a routing-policy test:
//! - Address classification against provider and region tables
//! - Resolution through the system resolver or an external lookup tool
//! - Distribution accumulation and weighted validation
//! - A-record discovery for failover designation
//! - Probes, geolocation and vantage-point capabilities
//! - Core data types

pub mod classifier;
pub mod dig;
pub mod discovery;
pub mod distribution;
pub mod geo;
pub mod probe;
pub mod ranges;
pub mod resolver;
pub mod types;
pub mod vantage;

pub use classifier::{Classification, Classifier};
pub use dig::{DigTool, DnsQuery, LookupTool, QueryAnswer, RecordKind};
pub use discovery::{Designation, Discoverer, DiscoverySet};
pub use distribution::{validate_weighted_distribution, DistributionAccumulator, ValidationReport};
pub use geo::{GeoLocator, IpApiLocator};
pub use probe::{NetProber, Prober};
pub use ranges::{find_expected_endpoint_for_ip, CloudProvider, RangeTables};
pub use resolver::{Resolution, ResolveOutcome, Resolver, SystemResolver, ToolResolver};
pub use types::*;
pub use vantage::{TorVantage, VantagePoint};
