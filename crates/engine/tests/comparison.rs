mod support;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use pixl_engine::result::VisualFailureReason;
use pixl_engine::{
    ComparatorAdapter, ComparisonPass, ImageDiffComparator, PixelComparator, PixelDiff, PixlResult,
    RunConfig, RunStore, ScenarioDefinition, ScenarioResult, ScenarioRunner, StepDefinition, StepError,
};
use support::{click, config, FakeBrowser};

#[derive(Default)]
struct CountingComparator {
    calls: AtomicUsize,
}

impl PixelComparator for CountingComparator {
    fn compare(&self, baseline: &[u8], candidate: &[u8]) -> PixlResult<PixelDiff> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        ImageDiffComparator::default().compare(baseline, candidate)
    }
}

struct Harness {
    browser: FakeBrowser,
    config: Arc<RunConfig>,
    store: RunStore,
    comparator: Arc<CountingComparator>,
}

impl Harness {
    fn new(config: RunConfig) -> Self {
        let store = RunStore::from_config(&config);
        Self {
            browser: FakeBrowser::new(),
            config: Arc::new(config),
            store,
            comparator: Arc::new(CountingComparator::default()),
        }
    }

    async fn run(&self, scenario: &ScenarioDefinition, timestamp: &str) -> ScenarioResult {
        let runner = ScenarioRunner::new(Arc::clone(&self.config), self.browser.driver(), self.store.clone());
        let comparator: Arc<dyn PixelComparator> = self.comparator.clone();
        let pass = ComparisonPass::new(
            Arc::clone(&self.config),
            self.store.clone(),
            ComparatorAdapter::new(comparator, self.config.mismatch_threshold_percent),
        );
        let result = runner.run(scenario, timestamp).await.unwrap();
        pass.run(result).await.unwrap()
    }
}

fn landing() -> ScenarioDefinition {
    ScenarioDefinition::new(
        "Landing page",
        vec![
            StepDefinition::new("It shows the hero"),
            StepDefinition::new("It opens the menu").with_action(click("#menu")),
        ],
    )
}

#[tokio::test]
async fn first_run_fails_without_reference_images() {
    let dir = tempfile::tempdir().unwrap();
    let harness = Harness::new(config(dir.path()));

    let result = harness.run(&landing(), "1000").await;

    assert!(!result.passed());
    assert!(result.comparison_time_ms.is_some());
    for step in &result.steps {
        match &step.error {
            Some(StepError::Visual { failures }) => {
                assert_eq!(failures.len(), 2);
                assert!(failures.iter().all(|f| f.reason == VisualFailureReason::MissingBaseline));
            }
            other => panic!("expected missing baselines, got {:?}", other),
        }
        for viewport in ["desktop", "mobile"] {
            let (store, n) = (&harness.store, step.step_number);
            assert!(store.failed_image_path("1000", "landing_page", viewport, n).is_file());
            assert!(!store.step_image_path("1000", "landing_page", viewport, n).exists());
            assert!(!store.diff_image_path("1000", "landing_page", viewport, n).exists());
        }
    }
    assert_eq!(harness.comparator.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn approved_run_becomes_the_reference() {
    let dir = tempfile::tempdir().unwrap();
    let harness = Harness::new(config(dir.path()));

    harness.run(&landing(), "1000").await;
    assert!(harness.store.approve_latest_run().unwrap());
    assert!(harness.store.reference_image_path("landing_page", "mobile", 2).is_file());

    let result = harness.run(&landing(), "2000").await;

    assert!(result.passed(), "{:?}", result.steps);
    for step in &result.steps {
        assert_eq!(step.mismatch_percent.get("desktop"), Some(&0.0));
        assert_eq!(step.mismatch_percent.get("mobile"), Some(&0.0));
        assert!(harness.store.step_image_path("2000", "landing_page", "desktop", step.step_number).is_file());
    }
    assert_eq!(harness.comparator.calls.load(Ordering::SeqCst), 4);
}

#[tokio::test]
async fn changed_page_fails_with_a_diff_image() {
    let dir = tempfile::tempdir().unwrap();
    let harness = Harness::new(config(dir.path()));

    harness.run(&landing(), "1000").await;
    harness.store.approve_latest_run().unwrap();

    harness.browser.paint([255, 255, 255, 255]);
    let result = harness.run(&landing(), "2000").await;

    let step = &result.steps[0];
    match &step.error {
        Some(StepError::Visual { failures }) => {
            assert_eq!(failures.len(), 2);
            for failure in failures {
                match failure.reason {
                    VisualFailureReason::Mismatch { mismatch_percent } => assert_eq!(mismatch_percent, 100.0),
                    ref other => panic!("expected a mismatch, got {:?}", other),
                }
            }
        }
        other => panic!("expected a visual failure, got {:?}", other),
    }
    assert!(harness.store.failed_image_path("2000", "landing_page", "desktop", 1).is_file());
    assert!(harness.store.diff_image_path("2000", "landing_page", "desktop", 1).is_file());
    assert!(!harness.store.step_image_path("2000", "landing_page", "desktop", 1).exists());
}

#[tokio::test]
async fn threshold_tolerates_small_changes() {
    let dir = tempfile::tempdir().unwrap();
    let harness = Harness::new(RunConfig {
        mismatch_threshold_percent: 100.0,
        ..config(dir.path())
    });

    harness.run(&landing(), "1000").await;
    harness.store.approve_latest_run().unwrap();
    harness.browser.paint([0, 0, 0, 255]);

    let result = harness.run(&landing(), "2000").await;
    assert!(result.passed());
    assert_eq!(result.steps[0].mismatch_percent.get("desktop"), Some(&100.0));
}

#[tokio::test]
async fn failed_and_skipped_steps_are_not_compared() {
    let dir = tempfile::tempdir().unwrap();
    let harness = Harness::new(config(dir.path()));
    let scenario = ScenarioDefinition::new(
        "Broken",
        vec![
            StepDefinition::new("It fails").with_action(click("#missing")),
            StepDefinition::new("It is skipped"),
        ],
    );

    let result = harness.run(&scenario, "1000").await;

    assert!(matches!(result.steps[0].error, Some(StepError::Action { .. })));
    assert!(result.steps[1].is_skipped());
    assert!(result.steps.iter().all(|s| s.mismatch_percent.is_empty()));
    assert_eq!(harness.comparator.calls.load(Ordering::SeqCst), 0);
}
