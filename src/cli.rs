//! Command-line interface (CLI) argument parsing module.
//!
//! This module provides CLI argument parsing using `clap`.
//! It supports one command per routing policy, running a test plan file,
//! A-record discovery, address classification, settings management and
//! shell completions.

use clap::{Args, Parser, Subcommand};
use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::path::PathBuf;

use crate::config::ConfigLoader;
use crate::dns::types::{PolicyType, TestConfig};
use crate::error::Result;

/// CLI argument parser using clap derive macro.
///
/// # Example
///
/// ```ignore
/// let cli = Cli::parse();
/// match cli.command {
///     Commands::Weighted { .. } => { /* ... */ }
///     Commands::Discover { domain, .. } => { /* ... */ }
///     _ => { /* ... */ }
/// }
/// ```
#[derive(Parser, Debug)]
#[command(
    name = "dnspolicy",
    version,
    about = "DNS routing-policy test engine",
    long_about = "Resolve a domain repeatedly, classify the answers by provider and region, and check the observed distribution against a weighted, geolocation, latency, failover, IP-based or multivalue routing policy",
    infer_subcommands = true
)]
pub struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Quiet mode (only errors)
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Output format
    #[arg(long, global = true, default_value = "table")]
    pub format: OutputFormat,

    /// Settings file (default: config directory, then ./dnspolicy.json)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

/// Output format for CLI commands.
///
/// This enum represents different output formats that can be used
/// when displaying test results.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// Table format (default, human-readable)
    #[default]
    Table,
    /// JSON format
    Json,
    /// CSV format
    Csv,
    /// TSV format (tab-separated)
    Tsv,
}

impl OutputFormat {
    /// Get all available output format names.
    #[must_use]
    pub fn names() -> &'static [&'static str] {
        &["table", "json", "csv", "tsv"]
    }

    /// Field separator for delimited formats.
    #[must_use]
    pub fn separator(&self) -> Option<&'static str> {
        match self {
            Self::Csv => Some(","),
            Self::Tsv => Some("\t"),
            Self::Table | Self::Json => None,
        }
    }
}

impl std::str::FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "table" => Ok(Self::Table),
            "json" => Ok(Self::Json),
            "csv" => Ok(Self::Csv),
            "tsv" => Ok(Self::Tsv),
            _ => Err(format!(
                "Unknown format: {}. Valid options are: {:?}",
                s,
                Self::names()
            )),
        }
    }
}

impl std::fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Table => write!(f, "table"),
            Self::Json => write!(f, "json"),
            Self::Csv => write!(f, "csv"),
            Self::Tsv => write!(f, "tsv"),
        }
    }
}

/// Domain and resolver shared by every policy command.
#[derive(Debug, Args)]
pub struct Target {
    /// Domain under test
    pub domain: String,

    /// Resolve through this resolver with the lookup tool instead of the host resolver
    #[arg(short, long)]
    pub resolver: Option<IpAddr>,
}

/// Available commands for the dnspolicy CLI.
#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Test a weighted routing policy
    ///
    /// Resolve the domain repeatedly and compare the share of each endpoint
    /// with its expected weight. Runs above the high-volume threshold use the
    /// lookup tool with bounded concurrency and a tighter tolerance.
    #[command(alias = "w")]
    Weighted {
        #[command(flatten)]
        target: Target,

        /// Expected endpoint weight (format: ENDPOINT=WEIGHT; endpoint may be an IP, CIDR, range or wildcard)
        #[arg(short, long = "weight", required = true)]
        weights: Vec<String>,

        /// Number of lookups
        #[arg(short = 'n', long, default_value = "100")]
        iterations: usize,

        /// Allowed deviation per endpoint (0.0 - 1.0)
        #[arg(short, long)]
        tolerance: Option<f64>,
    },

    /// Test a geolocation routing policy
    ///
    /// Resolve from vantage points (or locally), then query the authoritative
    /// name servers with client-subnet hints for each test region.
    #[command(alias = "g", name = "geo")]
    Geolocation {
        #[command(flatten)]
        target: Target,

        /// Number of local lookups when vantage points are not used
        #[arg(short = 'n', long, default_value = "20")]
        iterations: usize,

        /// Resolve through rotating vantage points (requires a local Tor daemon)
        #[arg(long)]
        vantage: bool,
    },

    /// Test a latency routing policy
    ///
    /// Probe resolver rotation and client-subnet support, then measure the
    /// answers, latency and TTL of each authoritative name server.
    #[command(alias = "l")]
    Latency {
        #[command(flatten)]
        target: Target,
    },

    /// Test a failover routing policy
    ///
    /// Resolve once and check whether the primary or the secondary endpoint
    /// is being served. Endpoints may be addresses or host names.
    #[command(alias = "f")]
    Failover {
        #[command(flatten)]
        target: Target,

        /// Primary endpoint
        #[arg(short, long)]
        primary: Option<String>,

        /// Secondary endpoint
        #[arg(short, long)]
        secondary: Option<String>,
    },

    /// Test an IP-based routing policy
    ///
    /// Sample the answers this host receives and the answers other client
    /// networks receive through client-subnet hints.
    #[command(name = "ipbased")]
    IpBased {
        #[command(flatten)]
        target: Target,

        /// Expected endpoint weight (format: ENDPOINT=WEIGHT)
        #[arg(short, long = "weight")]
        weights: Vec<String>,

        /// Number of lookups
        #[arg(short = 'n', long, default_value = "20")]
        iterations: usize,

        /// Allowed deviation per endpoint (0.0 - 1.0)
        #[arg(short, long)]
        tolerance: Option<f64>,
    },

    /// Test a multivalue answer routing policy
    #[command(name = "multivalue")]
    Multivalue {
        #[command(flatten)]
        target: Target,

        /// Number of lookups
        #[arg(short = 'n', long, default_value = "20")]
        iterations: usize,
    },

    /// Run every test in a plan file
    ///
    /// The file holds one test, an array of tests, or an object with a
    /// `tests` array (JSON format).
    #[command(alias = "r")]
    Run {
        /// Test plan file
        plan: PathBuf,
    },

    /// Discover A records behind a domain and its failover variants
    ///
    /// Resolve the domain and conventional backup subdomains, classify each
    /// address, probe reachability and suggest a primary and secondary.
    #[command(alias = "d")]
    Discover {
        /// Domain to discover
        domain: String,

        /// Designate this record number as primary
        #[arg(long)]
        primary: Option<usize>,

        /// Designate this record number as secondary
        #[arg(long)]
        secondary: Option<usize>,
    },

    /// Classify addresses by provider, region and endpoint id
    #[command(alias = "c")]
    Classify {
        /// Addresses to classify
        #[arg(required = true)]
        ips: Vec<IpAddr>,

        /// Use the geolocation service for addresses outside known provider ranges
        #[arg(long)]
        locate: bool,
    },

    /// Show or initialize engine settings
    Settings {
        /// Write the effective settings to the config directory
        #[arg(long)]
        init: bool,

        /// Write to this file instead
        #[arg(short, long, requires = "init")]
        output: Option<PathBuf>,
    },

    /// Generate shell completions
    Completions {
        /// Target shell
        shell: clap_complete::Shell,
    },
}

impl Commands {
    /// Test configuration for the single-test commands.
    ///
    /// # Errors
    ///
    /// Returns an error if a weight argument is malformed.
    pub fn test_config(&self) -> Result<Option<TestConfig>> {
        let config = match self {
            Self::Weighted {
                target,
                weights,
                iterations,
                tolerance,
            } => {
                let mut config = base(PolicyType::Weighted, target);
                config.expected_weights = ConfigLoader::parse_weights(weights.clone())?;
                config.iterations = *iterations;
                config.tolerance = *tolerance;
                config
            }
            Self::Geolocation {
                target,
                iterations,
                vantage,
            } => {
                let mut config = base(PolicyType::Geolocation, target);
                config.iterations = *iterations;
                config.use_vantage_points = *vantage;
                config
            }
            Self::Latency { target } => base(PolicyType::Latency, target),
            Self::Failover {
                target,
                primary,
                secondary,
            } => {
                let mut config = base(PolicyType::Failover, target);
                config.iterations = 1;
                config.primary_endpoint.clone_from(primary);
                config.secondary_endpoint.clone_from(secondary);
                config
            }
            Self::IpBased {
                target,
                weights,
                iterations,
                tolerance,
            } => {
                let mut config = base(PolicyType::IpBased, target);
                config.expected_weights = ConfigLoader::parse_weights(weights.clone())?;
                config.iterations = *iterations;
                config.tolerance = *tolerance;
                config
            }
            Self::Multivalue { target, iterations } => {
                let mut config = base(PolicyType::MultivalueAnswer, target);
                config.iterations = *iterations;
                config
            }
            _ => return Ok(None),
        };
        Ok(Some(config))
    }
}

fn base(policy: PolicyType, target: &Target) -> TestConfig {
    let mut config = TestConfig::new(policy, target.domain.clone());
    config.resolver = target.resolver;
    config
}

/// Parse CLI arguments and return verbose flag.
///
/// # Returns
///
/// Returns a tuple of `(Cli, verbose)` where `verbose` indicates
/// whether verbose logging was enabled.
#[must_use]
pub fn parse_verbose() -> (Cli, bool) {
    let cli = Cli::parse();
    let verbose = cli.verbose;
    (cli, verbose)
}
