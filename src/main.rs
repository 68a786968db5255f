//! dnspolicy - DNS routing-policy test engine
//!
//! Binary entry point for the dnspolicy CLI application.

#![warn(clippy::all, warnings)]
#![warn(clippy::pedantic, clippy::nursery)]

use clap::CommandFactory;
use dnspolicy::cli::{Cli, Commands, OutputFormat};
use dnspolicy::config::{ConfigLoader, EngineSettings};
use dnspolicy::dns::discovery::DiscoverySet;
use dnspolicy::dns::geo::{CachedLocator, GeoLocator, IpApiLocator};
use dnspolicy::dns::types::{RecordId, RoutingPolicyTest, TestConfig, TestResult};
use dnspolicy::error::Result;
use dnspolicy::policy::{Engine, TestHandle};
use std::net::IpAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Set up logging based on verbosity level.
///
/// # Arguments
///
/// * `verbose` - Enable debug-level logging
/// * `quiet` - Enable error-level only logging
fn setup_logging(verbose: bool, quiet: bool) {
    let filter = if quiet {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("error"))
    } else if verbose {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug"))
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).without_time())
        .init();
}

/// Load engine settings from an explicit file or the default locations.
fn load_settings(path: Option<&PathBuf>) -> Result<EngineSettings> {
    match path {
        Some(path) => ConfigLoader::load_settings_from_file(path),
        None => ConfigLoader::load_settings(),
    }
}

/// Cancel `tokens` when Ctrl-C is pressed.
fn cancel_on_ctrl_c(tokens: Vec<CancellationToken>) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupted, cancelling {} test(s)", tokens.len());
            for token in &tokens {
                token.cancel();
            }
        }
    });
}

/// Run tests concurrently and output the completed records.
///
/// # Arguments
///
/// * `engine` - Engine to submit the tests to
/// * `configs` - Tests to run
/// * `format` - Output format
async fn run_tests(engine: &Engine, configs: Vec<TestConfig>, format: OutputFormat) -> Result<bool> {
    if format == OutputFormat::Table {
        println!("Running {} test(s)... (Ctrl-C to cancel)\n", configs.len());
    }

    let handles: Vec<TestHandle> = configs
        .into_iter()
        .map(|config| engine.submit_test(config))
        .collect();
    cancel_on_ctrl_c(handles.iter().map(TestHandle::cancellation_token).collect());

    let mut results = Vec::with_capacity(handles.len());
    for handle in handles {
        results.push(handle.wait().await?);
    }

    match format {
        OutputFormat::Table => print_results_table(&results),
        OutputFormat::Json => print_results_json(&results)?,
        OutputFormat::Csv | OutputFormat::Tsv => {
            print_results_delimited(&results, format.separator().unwrap_or(","));
        }
    }

    Ok(results
        .iter()
        .all(|r| matches!(r.result, TestResult::Passed | TestResult::Partial)))
}

fn distribution_text(test: &RoutingPolicyTest) -> String {
    test.actual_distribution
        .iter()
        .map(|(endpoint, count)| format!("{endpoint}={count}"))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Print results in table format, followed by each test's report.
fn print_results_table(results: &[RoutingPolicyTest]) {
    println!(
        "{:<4} {:<18} {:<30} {:<10} {:>8} {:>10} {:<8}",
        "#", "Policy", "Domain", "Result", "Counted", "Avg(ms)", "Failover"
    );
    println!("{}", "-".repeat(94));

    for (idx, r) in results.iter().enumerate() {
        println!(
            "{:<4} {:<18} {:<30} {:<10} {:>8} {:>10.1} {:<8}",
            idx + 1,
            r.policy_type.to_string(),
            r.domain,
            r.result.to_string(),
            r.observed_total(),
            r.response_time_ms,
            if r.failover_triggered { "yes" } else { "" }
        );
    }

    for (idx, r) in results.iter().enumerate() {
        println!("\n=== #{} {} ===", idx + 1, r.domain);
        if !r.actual_distribution.is_empty() {
            println!("Distribution: {}", distribution_text(r));
        }
        if let Some(report) = &r.error_message {
            println!("{report}");
        }
    }
}

/// Print results in JSON format.
fn print_results_json(results: &[RoutingPolicyTest]) -> Result<()> {
    let json = serde_json::to_string_pretty(results)?;
    println!("{json}");
    Ok(())
}

/// Print results as CSV or TSV.
fn print_results_delimited(results: &[RoutingPolicyTest], sep: &str) {
    println!(
        "{}",
        ["#Idx", "Policy", "Domain", "Result", "Counted", "AvgMs", "FailoverTriggered", "Distribution"]
            .join(sep)
    );
    for (idx, r) in results.iter().enumerate() {
        println!(
            "{}",
            [
                (idx + 1).to_string(),
                r.policy_type.to_string(),
                r.domain.clone(),
                r.result.to_string(),
                r.observed_total().to_string(),
                format!("{:.1}", r.response_time_ms),
                r.failover_triggered.to_string(),
                distribution_text(r),
            ]
            .join(sep)
        );
    }
}

/// Run A-record discovery and output the designated records.
///
/// # Arguments
///
/// * `engine` - Engine whose collaborators do the lookups
/// * `domain` - Domain to discover
/// * `primary` - Optional record number to designate as primary
/// * `secondary` - Optional record number to designate as secondary
/// * `format` - Output format
async fn run_discovery(
    engine: &Engine,
    domain: &str,
    primary: Option<usize>,
    secondary: Option<usize>,
    format: OutputFormat,
) -> Result<()> {
    if format == OutputFormat::Table {
        println!("Discovering A records for {domain}...\n");
    }
    let mut set = engine.discover_a_records(domain).await;
    if let Some(n) = primary {
        set.set_primary(RecordId(n))?;
    }
    if let Some(n) = secondary {
        set.set_secondary(RecordId(n))?;
    }

    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&set.rows())?);
        }
        OutputFormat::Csv | OutputFormat::Tsv => {
            print_discovery_delimited(&set, format.separator().unwrap_or(","));
        }
        OutputFormat::Table => print_discovery_table(&set),
    }
    Ok(())
}

fn role_text(is_primary: bool, is_secondary: bool) -> &'static str {
    if is_primary {
        "PRIMARY"
    } else if is_secondary {
        "SECONDARY"
    } else {
        ""
    }
}

fn print_discovery_table(set: &DiscoverySet) {
    if set.is_empty() {
        println!("No A records found for {}", set.domain);
        return;
    }
    println!(
        "{:<4} {:<16} {:<28} {:<10} {:<16} {:<22} {:>8} {:<10}",
        "#", "IP", "Source", "Provider", "Region", "Endpoint", "RTT(ms)", "Role"
    );
    println!("{}", "-".repeat(120));
    for row in set.rows() {
        let r = row.record;
        let rtt = match (r.reachable, r.response_time_ms) {
            (true, Some(ms)) => format!("{ms:.1}"),
            (true, None) => "up".to_string(),
            (false, _) => "down".to_string(),
        };
        println!(
            "{:<4} {:<16} {:<28} {:<10} {:<16} {:<22} {:>8} {:<10}",
            r.id.0,
            r.ip_address.to_string(),
            r.source_domain,
            r.cloud_provider.as_deref().unwrap_or("-"),
            r.aws_region,
            r.endpoint_name,
            rtt,
            role_text(row.is_primary, row.is_secondary)
        );
    }

    let describe = |record: Option<&dnspolicy::dns::types::DiscoveredARecord>| {
        record.map_or_else(|| "none".to_string(), |r| format!("{} ({})", r.ip_address, r.source_domain))
    };
    println!("\nPrimary:   {}", describe(set.primary()));
    println!("Secondary: {}", describe(set.secondary()));
}

fn print_discovery_delimited(set: &DiscoverySet, sep: &str) {
    println!(
        "{}",
        ["#Idx", "IP", "Source", "Provider", "Region", "Endpoint", "Reachable", "RttMs", "Role"].join(sep)
    );
    for row in set.rows() {
        let r = row.record;
        println!(
            "{}",
            [
                r.id.0.to_string(),
                r.ip_address.to_string(),
                r.source_domain.clone(),
                r.cloud_provider.clone().unwrap_or_default(),
                r.aws_region.clone(),
                r.endpoint_name.clone(),
                r.reachable.to_string(),
                r.response_time_ms.map(|ms| format!("{ms:.1}")).unwrap_or_default(),
                role_text(row.is_primary, row.is_secondary).to_string(),
            ]
            .join(sep)
        );
    }
}

/// Classify addresses and print provider, region and endpoint id.
///
/// # Arguments
///
/// * `engine` - Engine whose classifier is used
/// * `ips` - Addresses to classify
/// * `locate` - Consult the geolocation service for unknown providers
/// * `format` - Output format
async fn run_classify(engine: &Engine, ips: &[IpAddr], locate: bool, format: OutputFormat) -> Result<()> {
    let collab = engine.collaborators();
    let locator: Option<Arc<dyn GeoLocator>> = match (&collab.locator, locate) {
        (_, false) => None,
        (Some(locator), true) => Some(Arc::clone(locator)),
        (None, true) => {
            let settings = engine.settings();
            let api = IpApiLocator::new(settings.geo_lookup_url.clone(), settings.lookup_timeout())?;
            Some(Arc::new(CachedLocator::new(Arc::new(api))))
        }
    };

    let mut rows = Vec::with_capacity(ips.len());
    for ip in ips {
        let mut class = collab.classifier.classify(*ip);
        if class.provider.is_none() {
            if let Some(locator) = &locator {
                let location = locator.locate(*ip).await;
                class = collab.classifier.classify_with_location(*ip, Some(&location));
            }
        }
        rows.push((*ip, class));
    }

    match format {
        OutputFormat::Json => {
            let json: Vec<_> = rows
                .iter()
                .map(|(ip, c)| {
                    serde_json::json!({
                        "ip": ip,
                        "provider": c.provider.map(|p| p.to_string()),
                        "region": c.region,
                        "endpoint": c.endpoint_id,
                    })
                })
                .collect();
            println!("{}", serde_json::to_string_pretty(&json)?);
        }
        OutputFormat::Csv | OutputFormat::Tsv => {
            let sep = format.separator().unwrap_or(",");
            println!("{}", ["IP", "Provider", "Region", "Endpoint"].join(sep));
            for (ip, c) in &rows {
                println!(
                    "{}",
                    [
                        ip.to_string(),
                        c.provider.map(|p| p.to_string()).unwrap_or_default(),
                        c.region.clone(),
                        c.endpoint_id.clone(),
                    ]
                    .join(sep)
                );
            }
        }
        OutputFormat::Table => {
            println!("{:<40} {:<10} {:<16} {:<24}", "IP", "Provider", "Region", "Endpoint");
            println!("{}", "-".repeat(92));
            for (ip, c) in &rows {
                println!(
                    "{:<40} {:<10} {:<16} {:<24}",
                    ip.to_string(),
                    c.provider.map_or_else(|| "-".to_string(), |p| p.to_string()),
                    c.region,
                    c.endpoint_id
                );
            }
        }
    }
    Ok(())
}

/// Show the effective settings, or write them out with `--init`.
fn run_settings(settings: &EngineSettings, init: bool, output: Option<PathBuf>) -> Result<()> {
    if init {
        let path = output.unwrap_or_else(|| ConfigLoader::config_dir().join("settings.json"));
        ConfigLoader::save_settings(settings, &path)?;
        println!("Settings written to: {}", path.display());
    } else {
        println!("{}", serde_json::to_string_pretty(settings)?);
    }
    Ok(())
}

/// Main entry point for the dnspolicy CLI application.
#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;

    let (cli, verbose) = dnspolicy::cli::parse_verbose();
    setup_logging(verbose, cli.quiet);

    tracing::debug!("dnspolicy starting...");

    if let Commands::Completions { shell } = cli.command {
        clap_complete::generate(shell, &mut Cli::command(), "dnspolicy", &mut std::io::stdout());
        return Ok(());
    }

    let settings = load_settings(cli.config.as_ref())?;
    if let Commands::Settings { init, output } = cli.command {
        return run_settings(&settings, init, output);
    }

    let engine = Engine::from_settings(settings)?;
    let all_passed = if let Some(config) = cli.command.test_config()? {
        run_tests(&engine, vec![config], cli.format).await?
    } else {
        match cli.command {
            Commands::Run { plan } => {
                let configs = ConfigLoader::load_test_plan(&plan)?;
                run_tests(&engine, configs, cli.format).await?
            }
            Commands::Discover {
                domain,
                primary,
                secondary,
            } => {
                run_discovery(&engine, &domain, primary, secondary, cli.format).await?;
                true
            }
            Commands::Classify { ips, locate } => {
                run_classify(&engine, &ips, locate, cli.format).await?;
                true
            }
            _ => true,
        }
    };

    if !all_passed {
        std::process::exit(2);
    }
    Ok(())
}
