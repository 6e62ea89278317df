//! Suite scheduling
//!
//! Every matched scenario becomes one unit of work: a [`ScenarioRunner`] run
//! followed by the [`ComparisonPass`]. Units are spawned onto the runtime and
//! gated by a semaphore of `max_workers` permits, so a worker owns its
//! scenario from browser launch until the comparison ends. All handles are
//! joined before anything is aggregated; the report is emitted once, after
//! that barrier.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use futures::future::join_all;
use tokio::sync::Semaphore;
use tokio::task::JoinError;
use tracing::{debug, error, info, warn};

use crate::compare::{ComparatorAdapter, ImageDiffComparator, PixelComparator};
use crate::comparison::ComparisonPass;
use crate::config::{RunConfig, DEFAULT_MAX_WORKERS};
use crate::discover::ScenarioPattern;
use crate::driver::BrowserDriver;
use crate::error::{PixlError, PixlResult};
use crate::report::{HtmlReport, ReportEmitter};
use crate::result::{InfrastructureFailure, ScenarioResult, SuiteResult};
use crate::runner::ScenarioRunner;
use crate::scenario::{Action, ScenarioDefinition, ScenarioProvider};
use crate::store::RunStore;

/// A loaded scenario and where it came from
#[derive(Debug, Clone)]
pub struct PlannedScenario {
    pub source: PathBuf,
    pub definition: ScenarioDefinition,
}

/// What a pattern resolves to before anything is run
#[derive(Debug, Clone, Default)]
pub struct ScenarioPlan {
    /// Scenarios that will run, in discovery order
    pub scenarios: Vec<PlannedScenario>,

    /// Scenarios that failed to load or collide with an earlier folder
    pub rejected: Vec<InfrastructureFailure>,
}

/// Runs a suite of scenarios under bounded concurrency
pub struct Scheduler {
    config: Arc<RunConfig>,
    driver: Arc<dyn BrowserDriver>,
    provider: Arc<dyn ScenarioProvider>,
    comparator: Arc<dyn PixelComparator>,
    emitter: Arc<dyn ReportEmitter>,
    max_workers: usize,
}

impl Scheduler {
    pub fn new(config: RunConfig, driver: Arc<dyn BrowserDriver>, provider: Arc<dyn ScenarioProvider>) -> Self {
        Self {
            config: Arc::new(config),
            driver,
            provider,
            comparator: Arc::new(ImageDiffComparator::default()),
            emitter: Arc::new(HtmlReport::new()),
            max_workers: DEFAULT_MAX_WORKERS,
        }
    }

    /// Set the pool size; values below one are raised to one
    pub fn with_max_workers(mut self, max_workers: usize) -> Self {
        self.max_workers = max_workers.max(1);
        self
    }

    pub fn with_comparator(mut self, comparator: Arc<dyn PixelComparator>) -> Self {
        self.comparator = comparator;
        self
    }

    pub fn with_emitter(mut self, emitter: Arc<dyn ReportEmitter>) -> Self {
        self.emitter = emitter;
        self
    }

    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    pub fn max_workers(&self) -> usize {
        self.max_workers
    }

    pub fn store(&self) -> RunStore {
        RunStore::from_config(&self.config)
    }

    /// Discover and load every scenario matching `pattern`.
    ///
    /// A scenario that cannot be loaded, or whose folder is empty or already
    /// taken by an earlier scenario, is rejected rather than run.
    pub fn plan(&self, pattern: &ScenarioPattern) -> PixlResult<ScenarioPlan> {
        let mut plan = ScenarioPlan::default();
        let mut folders: HashMap<String, String> = HashMap::new();

        for source in self.provider.discover(pattern)? {
            let definition = match self.provider.load(&source) {
                Ok(definition) => definition,
                Err(e) => {
                    error!("Could not load scenario {}: {}", source.display(), e);
                    plan.rejected.push(InfrastructureFailure {
                        source,
                        scenario_name: None,
                        error: e.to_string(),
                    });
                    continue;
                }
            };

            let folder = definition.folder();
            if folder.is_empty() {
                let reason = format!("scenario name '{}' yields an empty folder name", definition.name);
                error!("Rejected {}: {}", source.display(), reason);
                plan.rejected.push(InfrastructureFailure {
                    source,
                    scenario_name: Some(definition.name),
                    error: reason,
                });
                continue;
            }

            if let Some(existing) = folders.get(&folder) {
                let e = PixlError::SlugCollision {
                    scenario: definition.name.clone(),
                    existing: existing.clone(),
                    folder,
                };
                error!("Rejected {}: {}", source.display(), e);
                plan.rejected.push(InfrastructureFailure {
                    source,
                    scenario_name: Some(definition.name),
                    error: e.to_string(),
                });
                continue;
            }

            folders.insert(folder, definition.name.clone());
            plan.scenarios.push(PlannedScenario { source, definition });
        }

        Ok(plan)
    }

    /// Run every matching scenario under a fresh run timestamp
    pub async fn run(&self, pattern: &ScenarioPattern) -> PixlResult<SuiteResult> {
        let timestamp = chrono::Utc::now().timestamp_millis().to_string();
        self.run_at(pattern, &timestamp).await
    }

    /// Run every matching scenario under `timestamp`.
    ///
    /// Scenario failures, including crashed workers and a before-each hook
    /// that does not load, are part of the returned suite. An `Err` means the
    /// pattern itself could not be resolved.
    pub async fn run_at(&self, pattern: &ScenarioPattern, timestamp: &str) -> PixlResult<SuiteResult> {
        let start = Instant::now();

        let hook = match &self.config.before_each {
            Some(path) => match self.provider.load_hook(path) {
                Ok(hook) => Ok(Some(hook)),
                Err(e) => {
                    error!("Could not load beforeEach hook {}: {}", path.display(), e);
                    Err(format!("beforeEach hook {} could not be loaded: {}", path.display(), e))
                }
            },
            None => Ok(None),
        };

        let plan = self.plan(pattern)?;
        if plan.scenarios.is_empty() {
            warn!("No scenarios match '{}'", pattern.as_str());
        }

        let store = self.store();
        let mut infrastructure_failures = plan.rejected;

        let results = match hook {
            Ok(hook) => {
                let (results, failed) = self.execute(plan.scenarios, hook, &store, timestamp).await;
                infrastructure_failures.extend(failed);
                results
            }
            Err(reason) => {
                for planned in plan.scenarios {
                    infrastructure_failures.push(InfrastructureFailure {
                        source: planned.source,
                        scenario_name: Some(planned.definition.name),
                        error: reason.clone(),
                    });
                }
                Vec::new()
            }
        };

        let suite = SuiteResult {
            run_timestamp: timestamp.to_string(),
            results,
            infrastructure_failures,
            duration_ms: start.elapsed().as_millis() as u64,
        };

        if let Err(e) = self.emitter.emit(&suite, &store, &self.config.viewports) {
            error!("Could not write report: {}", e);
        }

        info!("Total execution time: {} ms", suite.duration_ms);
        Ok(suite)
    }

    /// One spawned unit per scenario, gated by the worker semaphore
    async fn execute(
        &self,
        scenarios: Vec<PlannedScenario>,
        hook: Option<Arc<dyn Action>>,
        store: &RunStore,
        timestamp: &str,
    ) -> (Vec<ScenarioResult>, Vec<InfrastructureFailure>) {
        info!(
            "Running {} scenario(s) with up to {} worker(s), run {}",
            scenarios.len(),
            self.max_workers,
            timestamp
        );

        let runner = ScenarioRunner::new(Arc::clone(&self.config), Arc::clone(&self.driver), store.clone())
            .with_before_each(hook);
        let pass = ComparisonPass::new(
            Arc::clone(&self.config),
            store.clone(),
            ComparatorAdapter::new(Arc::clone(&self.comparator), self.config.mismatch_threshold_percent),
        );

        let semaphore = Arc::new(Semaphore::new(self.max_workers));
        let mut units = Vec::with_capacity(scenarios.len());
        let mut handles = Vec::with_capacity(scenarios.len());

        for planned in scenarios {
            let runner = runner.clone();
            let pass = pass.clone();
            let semaphore = Arc::clone(&semaphore);
            let timestamp = timestamp.to_string();
            let definition = planned.definition;
            units.push((planned.source, definition.name.clone()));

            handles.push(tokio::spawn(async move {
                let _permit = semaphore
                    .acquire_owned()
                    .await
                    .map_err(|e| PixlError::WorkerCrashed(e.to_string()))?;
                debug!("Worker picked up '{}'", definition.name);
                let result = runner.run(&definition, &timestamp).await?;
                pass.run(result).await
            }));
        }

        let outcomes = join_all(handles).await;
        semaphore.close();

        let mut results = Vec::new();
        let mut failures = Vec::new();

        for ((source, name), outcome) in units.into_iter().zip(outcomes) {
            let failure = match outcome {
                Ok(Ok(result)) => {
                    results.push(result);
                    continue;
                }
                Ok(Err(e)) => e.to_string(),
                Err(e) => PixlError::WorkerCrashed(panic_message(e)).to_string(),
            };
            error!("Infrastructure failure in '{}' ({}): {}", name, source.display(), failure);
            failures.push(InfrastructureFailure {
                source,
                scenario_name: Some(name),
                error: failure,
            });
        }

        (results, failures)
    }
}

fn panic_message(e: JoinError) -> String {
    match e.try_into_panic() {
        Ok(payload) => payload
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "worker panicked".to_string()),
        Err(e) => e.to_string(),
    }
}
