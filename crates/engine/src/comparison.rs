//! Comparison of a finished run against the reference set

use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, error};

use crate::compare::ComparatorAdapter;
use crate::config::RunConfig;
use crate::error::PixlResult;
use crate::result::{ScenarioResult, StepError, VisualFailure, VisualFailureReason};
use crate::store::RunStore;

/// Annotates a scenario result with per-viewport comparison outcomes
#[derive(Clone)]
pub struct ComparisonPass {
    config: Arc<RunConfig>,
    store: RunStore,
    adapter: ComparatorAdapter,
}

impl ComparisonPass {
    pub fn new(config: Arc<RunConfig>, store: RunStore, adapter: ComparatorAdapter) -> Self {
        Self {
            config,
            store,
            adapter,
        }
    }

    /// Compare every captured, non-failed step against its reference image.
    ///
    /// A missing reference fails the step without a diff image. A mismatch
    /// over the threshold renames the capture to `stepN_failed.png` and writes
    /// `stepN_diff.png` next to it.
    pub async fn run(&self, mut result: ScenarioResult) -> PixlResult<ScenarioResult> {
        let start = Instant::now();
        let folder = result.scenario_folder.clone();
        let timestamp = result.run_timestamp.clone();

        for step in result
            .steps
            .iter_mut()
            .filter(|step| step.error.is_none() && step.has_screenshot)
        {
            let mut failures = Vec::new();

            for viewport in &self.config.viewports {
                let reference = self
                    .store
                    .reference_image_path(&folder, &viewport.name, step.step_number);
                let candidate = self
                    .store
                    .step_image_path(&timestamp, &folder, &viewport.name, step.step_number);

                if !reference.is_file() {
                    error!(
                        "Failed: [{}] {} - Step {}: '{}' has no reference image.",
                        viewport.name, result.scenario_name, step.step_number, step.description
                    );
                    self.store
                        .mark_failed(&folder, &timestamp, &viewport.name, step.step_number)
                        .await?;
                    failures.push(VisualFailure {
                        viewport: viewport.name.clone(),
                        reason: VisualFailureReason::MissingBaseline,
                    });
                    continue;
                }

                let verdict = match self.adapter.compare(&reference, &candidate).await {
                    Ok(verdict) => verdict,
                    Err(e) => {
                        error!(
                            "Failed: [{}] {} - Step {}: '{}' could not be compared: {}",
                            viewport.name, result.scenario_name, step.step_number, step.description, e
                        );
                        self.store
                            .mark_failed(&folder, &timestamp, &viewport.name, step.step_number)
                            .await?;
                        failures.push(VisualFailure {
                            viewport: viewport.name.clone(),
                            reason: VisualFailureReason::Unreadable {
                                message: e.to_string(),
                            },
                        });
                        continue;
                    }
                };

                if verdict.failed {
                    error!(
                        "Failed: [{}] {} - Step {}: '{}' is different by {:.2}%.",
                        viewport.name,
                        result.scenario_name,
                        step.step_number,
                        step.description,
                        verdict.mismatch_percent
                    );
                    self.store
                        .mark_failed(&folder, &timestamp, &viewport.name, step.step_number)
                        .await?;
                    self.store
                        .write_diff(&folder, &timestamp, &viewport.name, step.step_number, &verdict.diff_image)
                        .await?;
                    failures.push(VisualFailure {
                        viewport: viewport.name.clone(),
                        reason: VisualFailureReason::Mismatch {
                            mismatch_percent: verdict.mismatch_percent,
                        },
                    });
                } else {
                    debug!(
                        "Matched: [{}] {} - Step {} ({:.2}%)",
                        viewport.name, result.scenario_name, step.step_number, verdict.mismatch_percent
                    );
                }

                step.mismatch_percent
                    .insert(viewport.name.clone(), verdict.mismatch_percent);
            }

            if !failures.is_empty() {
                step.error = Some(StepError::Visual { failures });
            }
        }

        result.comparison_time_ms = Some(start.elapsed().as_millis() as u64);
        Ok(result)
    }
}
