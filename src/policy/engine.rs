//! Test engine.
//!
//! The engine owns the collaborators and settings, runs each submitted test
//! as its own task behind a bounded worker pool, and turns every way a run
//! can end into a completed [`RoutingPolicyTest`].

use futures::FutureExt;
use std::any::Any;
use std::collections::BTreeMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::EngineSettings;
use crate::dns::classifier::Classifier;
use crate::dns::dig::{DigTool, LookupTool};
use crate::dns::discovery::{Discoverer, DiscoverySet};
use crate::dns::geo::{CachedLocator, IpApiLocator};
use crate::dns::probe::{NetProber, Prober};
use crate::dns::ranges::RangeTables;
use crate::dns::resolver::{Resolver, SystemResolver};
use crate::dns::types::{PolicyOutcome, PolicyType, RoutingPolicyTest, TestConfig, TestResult};
use crate::dns::vantage::TorVantage;
use crate::error::{Error, Result};
use crate::policy::context::{Collaborators, RunContext};
use crate::policy::{failover, geolocation, ip_based, latency, multivalue, weighted};

/// Completion callbacks for a submitted test.
///
/// `on_success` fires for every run that reached a verdict, including a
/// failed policy check. `on_failure` fires when the run could not be carried
/// out and ended as `UNKNOWN`.
pub trait TestObserver: Send + Sync {
    fn on_success(&self, _test: &RoutingPolicyTest) {}

    fn on_failure(&self, _test: &RoutingPolicyTest) {}

    fn on_cancelled(&self, _test: &RoutingPolicyTest) {}
}

/// Handle to a submitted test.
#[derive(Debug)]
pub struct TestHandle {
    cancel: CancellationToken,
    join: JoinHandle<RoutingPolicyTest>,
}

impl TestHandle {
    /// Request cooperative cancellation. The run stops at its next iteration
    /// boundary and completes as `CANCELLED` with its partial counts.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Token that cancels this run, e.g. for a Ctrl-C handler.
    #[must_use]
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    /// Wait for the completed record.
    ///
    /// # Errors
    ///
    /// Returns `Error::Execution` if the task was aborted by the runtime.
    pub async fn wait(self) -> Result<RoutingPolicyTest> {
        self.join
            .await
            .map_err(|e| Error::execution(format!("test task did not complete: {e}")))
    }
}

/// Routing-policy test engine.
///
/// # Example
///
/// ```ignore
/// let engine = Engine::from_settings(ConfigLoader::load_settings()?)?;
/// let mut config = TestConfig::new(PolicyType::Weighted, "www.example.com");
/// config.expected_weights = ConfigLoader::parse_weights(vec!["10.0.0.1=70".into(), "10.0.0.2=30".into()])?;
/// let test = engine.submit_test(config).wait().await?;
/// println!("{}", test.result);
/// ```
#[derive(Clone)]
pub struct Engine {
    collab: Arc<Collaborators>,
    settings: Arc<EngineSettings>,
    pool: Arc<Semaphore>,
}

impl Engine {
    pub fn new(collaborators: Collaborators, settings: EngineSettings) -> Self {
        let workers = settings.worker_pool_size.max(1);
        Self {
            collab: Arc::new(collaborators),
            settings: Arc::new(settings),
            pool: Arc::new(Semaphore::new(workers)),
        }
    }

    /// Engine with the production collaborators: the host resolver, `dig`,
    /// ICMP/TCP probes, a Tor vantage point and, when enabled, the HTTP
    /// geolocation service.
    ///
    /// Must be called from within a tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns an error if the system resolver configuration cannot be read
    /// or the geolocation HTTP client cannot be built.
    pub fn from_settings(settings: EngineSettings) -> Result<Self> {
        let resolver: Arc<dyn Resolver> = Arc::new(SystemResolver::new(settings.lookup_timeout())?);
        let tool: Arc<dyn LookupTool> = Arc::new(DigTool::new(settings.dig_path.clone()));
        let prober: Arc<dyn Prober> =
            Arc::new(NetProber::with_timeout(settings.reachability_timeout()));

        let mut collab = Collaborators::new(resolver, tool, prober)
            .with_classifier(Arc::new(Classifier::new(RangeTables::shared())))
            .with_vantage(Arc::new(TorVantage::new(
                settings.tor_control_addr,
                settings.tor_socks_addr,
                settings.tor_password.clone(),
                settings.lookup_timeout(),
            )));
        if settings.enable_geo_lookup {
            let api = IpApiLocator::new(settings.geo_lookup_url.clone(), settings.lookup_timeout())?;
            collab = collab.with_locator(Arc::new(CachedLocator::new(Arc::new(api))));
        }
        Ok(Self::new(collab, settings))
    }

    #[must_use]
    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    #[must_use]
    pub fn collaborators(&self) -> &Collaborators {
        &self.collab
    }

    /// Start a test and return immediately.
    ///
    /// Must be called from within a tokio runtime.
    pub fn submit_test(&self, config: TestConfig) -> TestHandle {
        self.spawn(config, None)
    }

    /// Start a test and report its completion to `observer`.
    pub fn submit_test_with(&self, config: TestConfig, observer: Arc<dyn TestObserver>) -> TestHandle {
        self.spawn(config, Some(observer))
    }

    /// Run a test to completion.
    ///
    /// # Errors
    ///
    /// Returns `Error::Execution` if the task was aborted by the runtime.
    pub async fn run_test(&self, config: TestConfig) -> Result<RoutingPolicyTest> {
        self.submit_test(config).wait().await
    }

    fn spawn(&self, config: TestConfig, observer: Option<Arc<dyn TestObserver>>) -> TestHandle {
        let cancel = CancellationToken::new();
        let ctx = RunContext {
            collab: Arc::clone(&self.collab),
            settings: Arc::clone(&self.settings),
            cancel: cancel.clone(),
        };
        let pool = Arc::clone(&self.pool);

        let join = tokio::spawn(async move {
            let mut record = RoutingPolicyTest::from_config(&config);
            let mut config = config;
            config.domain.clone_from(&record.domain);

            let outcome = tokio::select! {
                biased;
                () = ctx.cancel.cancelled() => {
                    PolicyOutcome::cancelled(BTreeMap::new(), 0.0, "cancelled before the run started")
                }
                permit = pool.acquire_owned() => match permit {
                    Ok(_permit) => execute(&ctx, &config).await,
                    Err(_) => PolicyOutcome::unknown("worker pool closed"),
                },
            };
            record.complete(outcome);

            tracing::info!(
                "{} test of {} finished: {}",
                record.policy_type,
                record.domain,
                record.result
            );
            if let Some(observer) = observer {
                if record.result.is_verdict() {
                    observer.on_success(&record);
                } else if record.result == TestResult::Cancelled {
                    observer.on_cancelled(&record);
                } else {
                    observer.on_failure(&record);
                }
            }
            record
        });

        TestHandle { cancel, join }
    }

    /// Discovery wired to this engine's collaborators.
    #[must_use]
    pub fn discoverer(&self) -> Discoverer {
        Discoverer::new(
            Arc::clone(&self.collab.tool),
            Arc::clone(&self.collab.resolver),
            Arc::clone(&self.collab.classifier),
            Arc::clone(&self.collab.prober),
            self.settings.lookup_timeout(),
            self.settings.reachability_timeout(),
        )
    }

    /// Find the A records behind a domain and its failover variants.
    pub async fn discover_a_records(&self, domain: &str) -> DiscoverySet {
        self.discoverer().discover(domain).await
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    panic
        .downcast_ref::<&str>()
        .map(|s| (*s).to_string())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "policy procedure panicked".to_string())
}

/// Run the procedure for a test's policy.
///
/// An invalid config, an error or a panic inside the procedure all end the
/// run as `UNKNOWN` with the message as its report.
pub async fn execute(ctx: &RunContext, config: &TestConfig) -> PolicyOutcome {
    if let Err(e) = config.validate() {
        tracing::error!("rejected test of {}: {e}", config.domain);
        return PolicyOutcome::unknown(e.to_string());
    }
    tracing::info!(
        "starting {} test of {} ({} iterations)",
        config.policy_type,
        config.domain,
        config.iterations
    );

    let procedure = async {
        match config.policy_type {
            PolicyType::Weighted => weighted::run(ctx, config).await,
            PolicyType::Geolocation => geolocation::run(ctx, config).await,
            PolicyType::Latency => latency::run(ctx, config).await,
            PolicyType::Failover => failover::run(ctx, config).await,
            PolicyType::IpBased => ip_based::run(ctx, config).await,
            PolicyType::MultivalueAnswer => multivalue::run(ctx, config).await,
        }
    };

    match AssertUnwindSafe(procedure).catch_unwind().await {
        Ok(Ok(outcome)) => outcome,
        Ok(Err(e)) => {
            tracing::error!("{} test of {} failed: {e}", config.policy_type, config.domain);
            PolicyOutcome::unknown(e.to_string())
        }
        Err(panic) => {
            let message = panic_message(panic.as_ref());
            tracing::error!("{} test of {} panicked: {message}", config.policy_type, config.domain);
            PolicyOutcome::unknown(message)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dns::resolver::ResolveOutcome;
    use crate::policy::testing::{CyclingResolver, StubTool, UpProber};
    use async_trait::async_trait;
    use parking_lot::Mutex;

    struct PanickingResolver;

    #[async_trait]
    impl Resolver for PanickingResolver {
        fn label(&self) -> String {
            "panicking".to_string()
        }

        async fn resolve(&self, _domain: &str) -> ResolveOutcome {
            panic!("resolver exploded")
        }
    }

    #[derive(Default)]
    struct Recorder {
        events: Mutex<Vec<&'static str>>,
    }

    impl TestObserver for Recorder {
        fn on_success(&self, _test: &RoutingPolicyTest) {
            self.events.lock().push("success");
        }

        fn on_failure(&self, _test: &RoutingPolicyTest) {
            self.events.lock().push("failure");
        }

        fn on_cancelled(&self, _test: &RoutingPolicyTest) {
            self.events.lock().push("cancelled");
        }
    }

    fn engine(resolver: Arc<dyn Resolver>, workers: usize) -> Engine {
        let settings = EngineSettings {
            small_run_delay_ms: 0,
            worker_pool_size: workers,
            ..EngineSettings::default()
        };
        Engine::new(
            Collaborators::new(resolver, StubTool::empty(), Arc::new(UpProber)),
            settings,
        )
    }

    fn weighted(domain: &str) -> TestConfig {
        let mut config = TestConfig::new(PolicyType::Weighted, domain);
        config.iterations = 10;
        config.expected_weights = [("10.0.0.1".to_string(), 1)].into();
        config
    }

    #[tokio::test]
    async fn test_panic_becomes_unknown() {
        let engine = engine(Arc::new(PanickingResolver), 1);
        let recorder = Arc::new(Recorder::default());
        let test = engine
            .submit_test_with(weighted("www.example.com"), recorder.clone())
            .wait()
            .await
            .unwrap();

        assert_eq!(test.result, TestResult::Unknown);
        assert_eq!(test.error_message.as_deref(), Some("resolver exploded"));
        assert!(test.is_complete());
        assert_eq!(*recorder.events.lock(), vec!["failure"]);
    }

    #[tokio::test]
    async fn test_invalid_config_becomes_unknown() {
        let engine = engine(CyclingResolver::failing(), 1);
        let mut config = weighted("www.example.com");
        config.expected_weights.clear();
        let test = engine.run_test(config).await.unwrap();
        assert_eq!(test.result, TestResult::Unknown);
        assert!(test.error_message.unwrap().contains("expected weights"));
    }

    #[tokio::test]
    async fn test_success_observer_and_trailing_dot() {
        let engine = engine(CyclingResolver::weighted(&[("10.0.0.1", 1)]), 2);
        let recorder = Arc::new(Recorder::default());
        let test = engine
            .submit_test_with(weighted("www.example.com."), recorder.clone())
            .wait()
            .await
            .unwrap();

        assert_eq!(test.result, TestResult::Passed);
        assert_eq!(test.domain, "www.example.com");
        assert_eq!(test.observed_total(), 10);
        assert_eq!(*recorder.events.lock(), vec!["success"]);
    }

    #[tokio::test]
    async fn test_cancel_while_waiting_for_a_worker() {
        let engine = engine(CyclingResolver::weighted(&[("10.0.0.1", 1)]), 1);
        let held = Arc::clone(&engine.pool).acquire_owned().await.unwrap();

        let recorder = Arc::new(Recorder::default());
        let handle = engine.submit_test_with(weighted("www.example.com"), recorder.clone());
        handle.cancel();
        let test = handle.wait().await.unwrap();
        drop(held);

        assert_eq!(test.result, TestResult::Cancelled);
        assert!(test.actual_distribution.is_empty());
        assert_eq!(*recorder.events.lock(), vec!["cancelled"]);
    }
}
