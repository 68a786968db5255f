//! dnspolicy - A DNS routing-policy test engine.
//!
//! This crate provides both a library API and a CLI tool for:
//! - Checking weighted distributions against expected endpoint weights
//! - Inspecting geolocation and latency steering through client-subnet hints
//! - Verifying which side of a failover pair is being served
//! - IP-based and multivalue answer checks
//! - Discovering the A records behind a domain and designating primary/secondary
//! - Multiple output formats (table, JSON, CSV, TSV)
//!
//! # Library Usage
//!
//! ```ignore
//! use dnspolicy::{ConfigLoader, Engine, PolicyType, TestConfig};
//!
//! let engine = Engine::from_settings(ConfigLoader::load_settings()?)?;
//!
//! // Weighted 70/30 check
//! let mut config = TestConfig::new(PolicyType::Weighted, "www.example.com");
//! config.expected_weights = ConfigLoader::parse_weights(vec![
//!     "10.0.0.1=70".into(),
//!     "10.0.0.2=30".into(),
//! ])?;
//! config.iterations = 200;
//! let handle = engine.submit_test(config);
//! let test = handle.wait().await?;
//!
//! // Failover candidates
//! let set = engine.discover_a_records("app.example.com").await;
//! ```
//!
//! # CLI Usage
//!
//! ```bash
//! # Weighted policy
//! dnspolicy weighted www.example.com -w 10.0.0.1=70 -w 10.0.0.2=30 -n 200
//!
//! # Geolocation policy from rotating vantage points
//! dnspolicy geo www.example.com --vantage
//!
//! # Failover policy
//! dnspolicy failover app.example.com --primary 1.2.3.4 --secondary backup.example.com
//!
//! # Test plan file
//! dnspolicy run plan.json --format json
//!
//! # Discovery and classification
//! dnspolicy discover app.example.com
//! dnspolicy classify 52.95.110.1 8.8.8.8
//! ```
//!
//! # Features
//!
//! - **Concurrent Runs**: Each test runs as its own task behind a bounded worker pool
//! - **Cancellation**: Cancelled runs stop promptly and keep their partial counts
//! - **High Volume**: Large weighted runs use the lookup tool with bounded concurrency
//! - **Classification**: Built-in provider and region tables with a geolocation fallback

pub mod cli;
pub mod config;
pub mod dns;
pub mod error;
pub mod policy;

// Re-export commonly used types
pub use cli::{Cli, Commands, OutputFormat};
pub use config::{ConfigLoader, EngineSettings};
pub use dns::types::{
    DiscoveredARecord, PolicyType, RoutingPolicyTest, SuggestedRole, TestConfig, TestResult,
};
pub use dns::{find_expected_endpoint_for_ip, Classifier, DiscoverySet};
pub use error::{Error, Result};
pub use policy::{Collaborators, Engine, TestHandle, TestObserver};
