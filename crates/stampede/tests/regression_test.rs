// Integration tests for regression detection against file-backed baselines
//
// Run with: cargo test -p stampede --test regression_test

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use stampede::regression::{
    BaselineStore, Benchmark, BenchmarkError, FileBaselineStore, FnBenchmark, MemoryProbe,
    PerformanceTestSuite, RegressionError, RegressionTester, DURATION_METRIC,
};
use stampede::RegressionConfig;

struct FlatMemory;

impl MemoryProbe for FlatMemory {
    fn current_bytes(&self) -> u64 {
        1 << 20
    }
}

/// Sleeps `base_ms` or `base_ms + 2` on alternating calls
fn sleeper(name: &str, base_ms: Arc<AtomicU64>) -> impl Benchmark {
    let calls = AtomicUsize::new(0);
    FnBenchmark::new(name, move || {
        let jitter = (calls.fetch_add(1, Ordering::SeqCst) % 2) as u64 * 2;
        let ms = base_ms.load(Ordering::SeqCst) + jitter;
        async move {
            tokio::time::sleep(Duration::from_millis(ms)).await;
            Ok::<(), BenchmarkError>(())
        }
    })
    .with_iterations(20)
    .with_warmup(2)
}

fn tester(dir: &std::path::Path, base_ms: Arc<AtomicU64>) -> RegressionTester {
    let config = RegressionConfig::default()
        .with_baseline_directory(dir)
        .with_auto_baseline_update(true);
    let mut tester = RegressionTester::new(config)
        .unwrap()
        .with_memory_probe(Arc::new(FlatMemory))
        .with_version("1.0.0");

    let mut suite = PerformanceTestSuite::new("api");
    suite.add_benchmark(sleeper("users/list", base_ms));
    tester.register_suite(suite);
    tester
}

#[tokio::test(start_paused = true)]
async fn test_baseline_survives_across_testers() {
    let dir = tempfile::tempdir().unwrap();
    let base = Arc::new(AtomicU64::new(10));

    let first = tester(dir.path(), base.clone()).run_tests(&[]).await.unwrap();
    assert!(!first.has_regressions());
    assert!(dir.path().join("users_list.json").exists());

    // A fresh tester reads the stored baseline from disk
    base.store(25, Ordering::SeqCst);
    let second = tester(dir.path(), base.clone()).run_tests(&["api"]).await.unwrap();
    assert!(second.has_regressions());

    let outcome = second.regressions()[0];
    assert_eq!(outcome.test, "users/list");
    let baseline = outcome.baseline.as_ref().unwrap();
    assert_eq!(baseline.version, "1.0.0");
    let duration = &outcome.comparison.metrics[DURATION_METRIC];
    assert!((duration.baseline - 11.0).abs() < 0.5);
    assert!((duration.current - 26.0).abs() < 0.5);
    assert!(duration.change_percent > 100.0);
    assert!(duration.effect_size > 0.5);

    let report = second.report();
    assert!(report.contains("✗ REGRESSION users/list"));
    assert!(report.contains("    - duration: "));
}

#[tokio::test(start_paused = true)]
async fn test_list_and_delete_baselines() {
    let dir = tempfile::tempdir().unwrap();
    let tester = tester(dir.path(), Arc::new(AtomicU64::new(5)));
    tester.run_tests(&[]).await.unwrap();

    let all = tester.baselines().await.unwrap();
    assert_eq!(all.keys().collect::<Vec<_>>(), vec!["users_list"]);

    let store = FileBaselineStore::new(dir.path());
    store.delete("users/list").await.unwrap();
    assert!(tester.baselines().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_unknown_suite_is_not_found() {
    let dir = tempfile::tempdir().unwrap();
    let tester = tester(dir.path(), Arc::new(AtomicU64::new(1)));
    let err = tester.run_tests(&["nightly"]).await.unwrap_err();
    assert!(matches!(err, RegressionError::NotFound(name) if name == "nightly"));
    assert!(std::fs::read_dir(dir.path()).unwrap().next().is_none());
}
