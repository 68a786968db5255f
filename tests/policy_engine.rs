mod common;

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use common::{engine, fast_settings, CycleResolver, FixedResolver, TableTool};
use dnspolicy::config::ConfigLoader;
use dnspolicy::dns::types::{PolicyType, RoutingPolicyTest, TestConfig, TestResult};
use dnspolicy::policy::TestObserver;

fn weights(pairs: &[(&str, u32)]) -> BTreeMap<String, u32> {
    pairs.iter().map(|(k, v)| ((*k).to_string(), *v)).collect()
}

fn weighted(iterations: usize, tolerance: Option<f64>) -> TestConfig {
    let mut config = TestConfig::new(PolicyType::Weighted, "www.example.com");
    config.expected_weights = weights(&[("10.0.0.1", 70), ("10.0.0.2", 30)]);
    config.iterations = iterations;
    config.tolerance = tolerance;
    config
}

#[tokio::test]
async fn test_weighted_70_30_converges() {
    let resolver = CycleResolver::new(&[("10.0.0.1", 7), ("10.0.0.2", 3)]);
    let engine = engine(fast_settings(), resolver, TableTool::new(&[]));

    for tolerance in [0.15, 0.05] {
        let test = engine.run_test(weighted(100, Some(tolerance))).await.unwrap();
        assert_eq!(test.result, TestResult::Passed, "tolerance {tolerance}");
        assert_eq!(test.actual_distribution.get("10.0.0.1"), Some(&70));
        assert_eq!(test.actual_distribution.get("10.0.0.2"), Some(&30));
        assert!(test.is_complete());
    }
}

#[tokio::test]
async fn test_weighted_95_5_violates_tolerance() {
    let resolver = CycleResolver::new(&[("10.0.0.1", 19), ("10.0.0.2", 1)]);
    let engine = engine(fast_settings(), resolver, TableTool::new(&[]));

    let test = engine.run_test(weighted(100, Some(0.15))).await.unwrap();
    assert_eq!(test.result, TestResult::Failed);
    assert_eq!(test.observed_total(), 100);
    let report = test.error_message.unwrap();
    assert!(report.contains("10.0.0.1"));
}

#[tokio::test]
async fn test_high_volume_run_cancels_promptly() {
    let tool = TableTool::slow("10.0.0.1", Duration::from_millis(1));
    let mut settings = fast_settings();
    settings.max_in_flight = 1;
    let engine = engine(settings, CycleResolver::new(&[]), Arc::clone(&tool) as _);

    let handle = engine.submit_test(weighted(100_000, None));
    while tool.calls() < 10 {
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
    handle.cancel();
    let test = tokio::time::timeout(Duration::from_secs(5), handle.wait())
        .await
        .expect("cancelled run did not stop")
        .unwrap();

    assert_eq!(test.result, TestResult::Cancelled);
    assert!(test.observed_total() >= 9);
    assert!(test.observed_total() < 10_000);
    assert!(tool.calls() < 10_000);
}

#[tokio::test]
async fn test_cancel_before_start_keeps_empty_counts() {
    let mut settings = fast_settings();
    settings.worker_pool_size = 1;
    let tool = TableTool::slow("10.0.0.1", Duration::from_millis(5));
    let engine = engine(settings, CycleResolver::new(&[]), tool);

    let busy = engine.submit_test(weighted(20_000, None));
    let queued = engine.submit_test(weighted(100, None));
    queued.cancel();
    let test = queued.wait().await.unwrap();
    busy.cancel();

    assert_eq!(test.result, TestResult::Cancelled);
    assert_eq!(test.observed_total(), 0);
    assert_eq!(busy.wait().await.unwrap().result, TestResult::Cancelled);
}

fn failover(primary: &str, secondary: &str) -> TestConfig {
    let mut config = TestConfig::new(PolicyType::Failover, "app.example.com");
    config.iterations = 1;
    config.primary_endpoint = Some(primary.to_string());
    config.secondary_endpoint = Some(secondary.to_string());
    config
}

#[tokio::test]
async fn test_failover_states() {
    let cases: [(&[&str], TestResult, bool); 4] = [
        (&["1.2.3.4"], TestResult::Passed, false),
        (&["5.6.7.8"], TestResult::Passed, true),
        (&["1.2.3.4", "5.6.7.8"], TestResult::Partial, false),
        (&["9.9.9.9"], TestResult::Failed, false),
    ];
    for (answer, result, triggered) in cases {
        let engine = engine(fast_settings(), FixedResolver::new(answer), TableTool::new(&[]));
        let test = engine.run_test(failover("1.2.3.4", "5.6.7.8")).await.unwrap();
        assert_eq!(test.result, result, "answer {answer:?}");
        assert_eq!(test.failover_triggered, triggered, "answer {answer:?}");
    }
}

#[tokio::test]
async fn test_failover_resolution_error_fails() {
    let engine = engine(fast_settings(), FixedResolver::new(&[]), TableTool::new(&[]));
    let test = engine.run_test(failover("1.2.3.4", "5.6.7.8")).await.unwrap();
    assert_eq!(test.result, TestResult::Failed);
    assert!(!test.failover_triggered);
}

#[derive(Default)]
struct Counts {
    success: AtomicUsize,
    failure: AtomicUsize,
    cancelled: AtomicUsize,
}

impl TestObserver for Counts {
    fn on_success(&self, _test: &RoutingPolicyTest) {
        self.success.fetch_add(1, Ordering::SeqCst);
    }

    fn on_failure(&self, _test: &RoutingPolicyTest) {
        self.failure.fetch_add(1, Ordering::SeqCst);
    }

    fn on_cancelled(&self, _test: &RoutingPolicyTest) {
        self.cancelled.fetch_add(1, Ordering::SeqCst);
    }
}

#[tokio::test]
async fn test_observer_sees_each_completion_once() {
    let resolver = CycleResolver::new(&[("10.0.0.1", 7), ("10.0.0.2", 3)]);
    let engine = engine(fast_settings(), resolver, TableTool::new(&[]));
    let counts = Arc::new(Counts::default());

    let ok = engine.submit_test_with(weighted(10, None), Arc::clone(&counts) as _);
    let invalid = engine.submit_test_with(weighted(0, None), Arc::clone(&counts) as _);
    assert_eq!(ok.wait().await.unwrap().result, TestResult::Passed);
    assert_eq!(invalid.wait().await.unwrap().result, TestResult::Unknown);

    assert_eq!(counts.success.load(Ordering::SeqCst), 1);
    assert_eq!(counts.failure.load(Ordering::SeqCst), 1);
    assert_eq!(counts.cancelled.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_plan_file_runs_concurrently() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("plan.json");
    std::fs::write(
        &path,
        r#"{"tests": [
            {"policy": "WEIGHTED", "domain": "www.example.com",
             "expected_weights": {"10.0.0.1": 70, "10.0.0.2": 30}, "iterations": 50},
            {"policy": "MULTIVALUE_ANSWER", "domain": "www.example.com", "iterations": 5}
        ]}"#,
    )
    .unwrap();

    let configs = ConfigLoader::load_test_plan(&path).unwrap();
    assert_eq!(configs.len(), 2);

    let resolver = CycleResolver::new(&[("10.0.0.1", 7), ("10.0.0.2", 3)]);
    let engine = engine(fast_settings(), resolver, TableTool::new(&[]));
    let handles: Vec<_> = configs.into_iter().map(|c| engine.submit_test(c)).collect();
    let mut results = Vec::new();
    for handle in handles {
        results.push(handle.wait().await.unwrap());
    }

    assert!(results.iter().all(RoutingPolicyTest::is_complete));
    assert_eq!(results[0].policy_type, PolicyType::Weighted);
    // Single-address answers only
    assert_eq!(results[1].result, TestResult::Partial);
}
