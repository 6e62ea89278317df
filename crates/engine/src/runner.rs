//! Single-scenario execution
//!
//! A scenario runs against one browser session and one page. Steps execute
//! strictly in order. The first failing step puts the scenario into a
//! skipping state: every later step is recorded as skipped without being
//! executed, and steps that declare a screenshot get the placeholder image so
//! the run tree keeps a uniform shape.

use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, error, info, warn};

use crate::config::RunConfig;
use crate::driver::{BrowserDriver, BrowserSession, Page};
use crate::error::{PixlError, PixlResult};
use crate::result::{ScenarioResult, StepError, StepResult};
use crate::scenario::{Action, ScenarioDefinition, StepDefinition};
use crate::store::RunStore;

/// Blurs whatever element currently holds focus
const BLUR_SCRIPT: &str = "(() => { const el = document.querySelector(':focus'); if (el) { el.blur(); } })()";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RunState {
    Initializing,
    Running { step_index: usize },
    Skipping { remaining: usize },
    Completed,
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunState::Initializing => f.write_str("initializing"),
            RunState::Running { step_index } => write!(f, "running step {}", step_index + 1),
            RunState::Skipping { remaining } => write!(f, "skipping, {} step(s) left", remaining),
            RunState::Completed => f.write_str("completed"),
        }
    }
}

/// Executes scenarios step by step against a browser driver
#[derive(Clone)]
pub struct ScenarioRunner {
    config: Arc<RunConfig>,
    driver: Arc<dyn BrowserDriver>,
    store: RunStore,
    before_each: Option<Arc<dyn Action>>,
}

impl ScenarioRunner {
    pub fn new(config: Arc<RunConfig>, driver: Arc<dyn BrowserDriver>, store: RunStore) -> Self {
        Self {
            config,
            driver,
            store,
            before_each: None,
        }
    }

    /// Run `hook` against every page before the first step
    pub fn with_before_each(mut self, hook: Option<Arc<dyn Action>>) -> Self {
        self.before_each = hook;
        self
    }

    /// Run every step of `scenario`, writing captures under the run `timestamp`.
    ///
    /// Step failures are encoded in the returned result. An `Err` means the
    /// scenario could not be executed at all (no browser, unwritable output).
    pub async fn run(&self, scenario: &ScenarioDefinition, timestamp: &str) -> PixlResult<ScenarioResult> {
        let start = Instant::now();
        debug!("Running scenario: {}", scenario.name);

        let session = self.within(self.driver.launch(self.config.headless)).await?;
        let steps = self.drive(session.as_ref(), scenario, timestamp).await;

        if let Err(e) = self.within(session.close()).await {
            warn!("Could not close browser for '{}': {}", scenario.name, e);
        }

        Ok(ScenarioResult {
            scenario_name: scenario.name.clone(),
            scenario_folder: scenario.folder(),
            run_timestamp: timestamp.to_string(),
            steps: steps?,
            run_time_ms: start.elapsed().as_millis() as u64,
            comparison_time_ms: None,
        })
    }

    async fn drive(
        &self,
        session: &dyn BrowserSession,
        scenario: &ScenarioDefinition,
        timestamp: &str,
    ) -> PixlResult<Vec<StepResult>> {
        let mut state = RunState::Initializing;
        debug!("[{}] {}", scenario.name, state);

        let page = self.within(session.new_page()).await?;
        self.prepare_page(page.as_ref(), scenario).await;

        let folder = scenario.folder();
        self.store
            .prepare_run_folders(&folder, timestamp, &self.config.viewports)?;

        let total = scenario.steps.len();
        let mut results = Vec::with_capacity(total);

        for (index, step) in scenario.steps.iter().enumerate() {
            let step_number = index + 1;

            let result = if let RunState::Skipping { remaining } = state {
                state = RunState::Skipping {
                    remaining: remaining.saturating_sub(1),
                };
                warn!(
                    "Skipped: {} - Step {}: '{}'.",
                    scenario.name, step_number, step.description
                );
                self.record_failure(&folder, timestamp, step, step_number, StepError::Skipped)
                    .await?
            } else {
                state = RunState::Running { step_index: index };
                match self
                    .execute_step(page.as_ref(), scenario, step, &folder, timestamp, step_number)
                    .await
                {
                    Ok(()) => {
                        info!(
                            "Executed: {} - Step {}: '{}'.",
                            scenario.name, step_number, step.description
                        );
                        StepResult {
                            step_number,
                            description: step.description.clone(),
                            error: None,
                            has_screenshot: step.capture_screenshot,
                            mismatch_percent: BTreeMap::new(),
                        }
                    }
                    Err(e) => {
                        error!(
                            "Failed: {} - Step {}: '{}'. {:#}",
                            scenario.name, step_number, step.description, e
                        );
                        state = RunState::Skipping {
                            remaining: total - step_number,
                        };
                        let error = StepError::Action {
                            detail: format!("{:?}", e),
                        };
                        self.record_failure(&folder, timestamp, step, step_number, error)
                            .await?
                    }
                }
            };

            debug!("[{}] {}", scenario.name, state);
            results.push(result);
        }

        state = RunState::Completed;
        debug!("[{}] {}", scenario.name, state);
        Ok(results)
    }

    /// Timeout, navigation and before-each hook. Nothing here is fatal.
    async fn prepare_page(&self, page: &dyn Page, scenario: &ScenarioDefinition) {
        if let Err(e) = self.within(page.set_default_timeout(self.config.timeout())).await {
            warn!("Could not set default timeout for '{}': {}", scenario.name, e);
        }

        match &self.config.url {
            Some(url) => {
                if let Err(e) = self.bounded(page.goto(url)).await {
                    error!("Could not navigate to scenario URL {} for '{}': {:#}", url, scenario.name, e);
                }
            }
            None => warn!("No url configured; '{}' starts from a blank page", scenario.name),
        }

        if let Some(hook) = &self.before_each {
            if let Err(e) = self.bounded(hook.run(page, scenario)).await {
                error!("beforeEach hook failed for '{}': {:#}", scenario.name, e);
            }
        }
    }

    async fn execute_step(
        &self,
        page: &dyn Page,
        scenario: &ScenarioDefinition,
        step: &StepDefinition,
        folder: &str,
        timestamp: &str,
        step_number: usize,
    ) -> anyhow::Result<()> {
        if let Some(action) = &step.action {
            self.bounded(action.run(page, scenario)).await?;
        }

        if step.capture_screenshot {
            self.stabilise(page).await?;
            // Nothing is written unless every viewport captured
            let mut captures = Vec::with_capacity(self.config.viewports.len());
            for viewport in &self.config.viewports {
                captures.push(self.bounded(page.screenshot(viewport.width)).await?);
            }
            for (viewport, png) in self.config.viewports.iter().zip(captures) {
                self.store
                    .write_screenshot(folder, timestamp, &viewport.name, step_number, &png)
                    .await?;
            }
        }
        Ok(())
    }

    /// Drop focus, park the pointer and let animations settle
    async fn stabilise(&self, page: &dyn Page) -> anyhow::Result<()> {
        self.bounded(page.evaluate(BLUR_SCRIPT)).await?;
        self.bounded(page.mouse_move(0.0, 0.0)).await?;
        tokio::time::sleep(self.config.stabilise_delay()).await;
        Ok(())
    }

    async fn record_failure(
        &self,
        folder: &str,
        timestamp: &str,
        step: &StepDefinition,
        step_number: usize,
        error: StepError,
    ) -> PixlResult<StepResult> {
        if step.capture_screenshot {
            for viewport in &self.config.viewports {
                self.store
                    .write_failure_placeholder(folder, timestamp, &viewport.name, step_number)
                    .await?;
            }
        }

        Ok(StepResult {
            step_number,
            description: step.description.clone(),
            error: Some(error),
            has_screenshot: step.capture_screenshot,
            mismatch_percent: BTreeMap::new(),
        })
    }

    /// Bound a session-level browser call by the configured timeout
    async fn within<T, F>(&self, future: F) -> PixlResult<T>
    where
        F: Future<Output = PixlResult<T>>,
    {
        tokio::time::timeout(self.config.timeout(), future)
            .await
            .map_err(|_| PixlError::Timeout(self.config.timeout_ms))?
    }

    /// Bound a browser interaction by the configured timeout
    async fn bounded<T, E, F>(&self, future: F) -> anyhow::Result<T>
    where
        F: Future<Output = Result<T, E>>,
        E: Into<anyhow::Error>,
    {
        match tokio::time::timeout(self.config.timeout(), future).await {
            Ok(result) => result.map_err(Into::into),
            Err(_) => Err(PixlError::Timeout(self.config.timeout_ms).into()),
        }
    }
}
