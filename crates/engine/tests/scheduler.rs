mod support;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use pixl_engine::{
    PixlResult, ReportEmitter, RunConfig, RunStore, ScenarioDefinition, ScenarioPattern, ScenarioRegistry,
    Scheduler, StepDefinition, SuiteResult, Viewport, YamlScenarioProvider,
};
use support::{click, config, FakeBrowser};

#[derive(Default)]
struct RecordingEmitter {
    calls: AtomicUsize,
    scenarios: AtomicUsize,
}

impl ReportEmitter for RecordingEmitter {
    fn emit(&self, suite: &SuiteResult, _store: &RunStore, _viewports: &[Viewport]) -> PixlResult<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.scenarios
            .store(suite.results.len() + suite.infrastructure_failures.len(), Ordering::SeqCst);
        Ok(())
    }
}

fn scenario(name: &str, steps: Vec<StepDefinition>) -> ScenarioDefinition {
    ScenarioDefinition::new(name, steps)
}

fn pattern() -> ScenarioPattern {
    ScenarioPattern::new("scenarios/*.scenario").unwrap()
}

fn scheduler(browser: &FakeBrowser, config: RunConfig, registry: ScenarioRegistry) -> Scheduler {
    Scheduler::new(config, browser.driver(), Arc::new(registry))
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn pool_never_exceeds_max_workers() {
    let dir = tempfile::tempdir().unwrap();
    let browser = FakeBrowser::new();
    browser.slow_screenshots(Duration::from_millis(30));

    let mut registry = ScenarioRegistry::new();
    for i in 1..=5 {
        registry.register(
            format!("scenarios/{}.scenario", i),
            scenario(&format!("Scenario {}", i), vec![StepDefinition::new("It renders")]),
        );
    }

    let emitter = Arc::new(RecordingEmitter::default());
    let suite = scheduler(&browser, config(dir.path()), registry)
        .with_max_workers(2)
        .with_emitter(emitter.clone())
        .run_at(&pattern(), "1000")
        .await
        .unwrap();

    assert_eq!(suite.results.len(), 5);
    assert!(suite.infrastructure_failures.is_empty());
    assert_eq!(browser.state.launched.load(Ordering::SeqCst), 5);
    assert_eq!(browser.state.closed.load(Ordering::SeqCst), 5);
    let max_active = browser.state.max_active.load(Ordering::SeqCst);
    assert!(max_active <= 2, "{} browsers were open at once", max_active);
    assert_eq!(emitter.calls.load(Ordering::SeqCst), 1);
    assert_eq!(emitter.scenarios.load(Ordering::SeqCst), 5);
}

#[tokio::test]
async fn one_failed_step_fails_the_suite() {
    let dir = tempfile::tempdir().unwrap();
    let browser = FakeBrowser::new();

    let mut registry = ScenarioRegistry::new();
    registry
        .register("scenarios/a.scenario", scenario("A", vec![StepDefinition::new("ok").without_screenshot()]))
        .register(
            "scenarios/b.scenario",
            scenario("B", vec![StepDefinition::new("broken").with_action(click("#missing"))]),
        )
        .register("scenarios/c.scenario", scenario("C", vec![StepDefinition::new("ok").without_screenshot()]));

    let suite = scheduler(&browser, config(dir.path()), registry)
        .run_at(&pattern(), "1000")
        .await
        .unwrap();

    assert_eq!(suite.results.len(), 3);
    assert_eq!(suite.total_steps(), 3);
    assert_eq!(suite.failed_steps(), 1);
    assert!(!suite.passed());
    assert_eq!(suite.exit_code(), 1);
}

#[tokio::test]
async fn crashed_worker_does_not_block_the_others() {
    let dir = tempfile::tempdir().unwrap();
    let browser = FakeBrowser::new();

    let mut registry = ScenarioRegistry::new();
    registry
        .register("scenarios/a.scenario", scenario("A", vec![StepDefinition::new("ok").without_screenshot()]))
        .register(
            "scenarios/b.scenario",
            scenario("B", vec![StepDefinition::new("explodes").with_action(click("#panic"))]),
        )
        .register("scenarios/c.scenario", scenario("C", vec![StepDefinition::new("ok").without_screenshot()]));

    let emitter = Arc::new(RecordingEmitter::default());
    let suite = scheduler(&browser, config(dir.path()), registry)
        .with_emitter(emitter.clone())
        .run_at(&pattern(), "1000")
        .await
        .unwrap();

    assert_eq!(suite.results.len(), 2);
    assert!(suite.results.iter().all(|r| r.passed()));
    assert_eq!(suite.infrastructure_failures.len(), 1);
    let failure = &suite.infrastructure_failures[0];
    assert_eq!(failure.scenario_name.as_deref(), Some("B"));
    assert!(failure.error.contains("scripted worker panic"), "{}", failure.error);
    assert_eq!(suite.exit_code(), 1);
    assert_eq!(emitter.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn colliding_scenario_is_rejected_not_run() {
    let dir = tempfile::tempdir().unwrap();
    let browser = FakeBrowser::new();

    let mut registry = ScenarioRegistry::new();
    registry
        .register("scenarios/a.scenario", scenario("Checkout", vec![StepDefinition::new("ok").without_screenshot()]))
        .register("scenarios/b.scenario", scenario("checkout", vec![StepDefinition::new("ok").without_screenshot()]));

    let suite = scheduler(&browser, config(dir.path()), registry)
        .run_at(&pattern(), "1000")
        .await
        .unwrap();

    assert_eq!(suite.results.len(), 1);
    assert_eq!(suite.results[0].scenario_name, "Checkout");
    assert_eq!(suite.infrastructure_failures.len(), 1);
    assert!(suite.infrastructure_failures[0].error.contains("shares folder 'checkout'"));
    assert_eq!(browser.state.launched.load(Ordering::SeqCst), 1);
    assert_eq!(suite.exit_code(), 1);
}

#[tokio::test]
async fn empty_pattern_passes_and_still_reports() {
    let dir = tempfile::tempdir().unwrap();
    let browser = FakeBrowser::new();

    let scheduler = scheduler(&browser, config(dir.path()), ScenarioRegistry::new());
    let suite = scheduler.run_at(&pattern(), "1000").await.unwrap();

    assert!(suite.results.is_empty());
    assert_eq!(suite.exit_code(), 0);
    assert!(scheduler.store().report_path().is_file());
    assert_eq!(browser.state.launched.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn yaml_scenarios_run_end_to_end() {
    let dir = tempfile::tempdir().unwrap();
    let scenarios = dir.path().join("scenarios/nested");
    std::fs::create_dir_all(&scenarios).unwrap();
    std::fs::write(
        scenarios.join("search.scenario.yaml"),
        r##"
name: Search results
steps:
  - ["It shows the search box"]
  - - It shows results
    - - { action: fill, selector: "#q", value: "pixl" }
      - { action: press, key: Enter }
"##,
    )
    .unwrap();
    std::fs::write(dir.path().join("scenarios/ignored.yaml"), "name: Ignored\nsteps: []\n").unwrap();
    let hook = dir.path().join("before_each.yaml");
    std::fs::write(&hook, "{ action: click, selector: \"#accept-cookies\" }\n").unwrap();

    let browser = FakeBrowser::new();
    let mut config = config(dir.path());
    config.before_each = Some(hook);
    let scheduler = Scheduler::new(config, browser.driver(), Arc::new(YamlScenarioProvider::new()));

    let pattern = ScenarioPattern::new(&format!("{}/scenarios/**/*.scenario.yaml", dir.path().display())).unwrap();
    let suite = scheduler.run_at(&pattern, "1000").await.unwrap();

    assert_eq!(suite.results.len(), 1);
    let result = &suite.results[0];
    assert_eq!(result.scenario_folder, "search_results");
    assert_eq!(result.steps.len(), 2);

    let calls = browser.state.calls();
    assert!(calls.contains(&"click:#accept-cookies".to_string()));
    assert!(calls.contains(&"fill:#q=pixl".to_string()));
    assert!(calls.contains(&"press:Enter".to_string()));

    // Nothing approved yet
    assert_eq!(suite.exit_code(), 1);
    let report = std::fs::read_to_string(scheduler.store().report_path()).unwrap();
    assert!(report.contains("<h1>Scenario: Search results</h1>"));
}

#[tokio::test]
async fn unloadable_hook_fails_every_scenario_and_rewrites_the_report() {
    let dir = tempfile::tempdir().unwrap();
    let browser = FakeBrowser::new();
    let mut config = config(dir.path());
    config.before_each = Some(dir.path().join("missing_hook.yaml"));

    let mut registry = ScenarioRegistry::new();
    registry
        .register("scenarios/a.scenario", scenario("A", vec![StepDefinition::new("ok")]))
        .register("scenarios/b.scenario", scenario("B", vec![StepDefinition::new("ok")]));

    let scheduler = scheduler(&browser, config, registry);
    std::fs::write(scheduler.store().report_path(), "stale report from the last run").unwrap();

    let suite = scheduler.run_at(&pattern(), "1000").await.unwrap();

    assert!(suite.results.is_empty());
    assert_eq!(suite.infrastructure_failures.len(), 2);
    assert!(suite.infrastructure_failures[0].error.contains("missing_hook.yaml"));
    assert_eq!(suite.exit_code(), 1);
    assert_eq!(browser.state.launched.load(Ordering::SeqCst), 0);

    let report = std::fs::read_to_string(scheduler.store().report_path()).unwrap();
    assert!(!report.contains("stale report"));
}

#[tokio::test]
async fn hanging_browser_close_does_not_block_the_barrier() {
    let dir = tempfile::tempdir().unwrap();
    let browser = FakeBrowser::new();
    browser.hang_on_close();

    let mut registry = ScenarioRegistry::new();
    registry
        .register("scenarios/a.scenario", scenario("A", vec![StepDefinition::new("ok").without_screenshot()]))
        .register("scenarios/b.scenario", scenario("B", vec![StepDefinition::new("ok").without_screenshot()]));

    let emitter = Arc::new(RecordingEmitter::default());
    let scheduler = scheduler(&browser, config(dir.path()), registry).with_emitter(emitter.clone());
    let pattern = pattern();
    let suite = tokio::time::timeout(Duration::from_secs(5), scheduler.run_at(&pattern, "1000"))
        .await
        .expect("suite did not finish")
        .unwrap();

    assert_eq!(suite.results.len(), 2);
    assert_eq!(suite.exit_code(), 0);
    assert_eq!(emitter.calls.load(Ordering::SeqCst), 1);
}
