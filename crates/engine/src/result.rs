//! Structured results of scenario runs

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::PixlResult;

/// Recorded for every step after the first failure of a scenario
pub const SKIPPED_MARKER: &str = "Skipped due to previous step failure";

/// Why a step did not pass
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StepError {
    /// Not executed because an earlier step failed
    Skipped,

    /// The step's action (or its capture) failed
    Action { detail: String },

    /// One or more viewports did not match the reference set
    Visual { failures: Vec<VisualFailure> },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VisualFailure {
    pub viewport: String,
    pub reason: VisualFailureReason,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum VisualFailureReason {
    /// First run of this step: nothing approved yet
    MissingBaseline,
    Mismatch { mismatch_percent: f64 },
    /// The images could not be compared at all
    Unreadable { message: String },
}

impl fmt::Display for StepError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StepError::Skipped => f.write_str(SKIPPED_MARKER),
            StepError::Action { detail } => f.write_str(detail),
            StepError::Visual { failures } => {
                let parts: Vec<String> = failures
                    .iter()
                    .map(|failure| match &failure.reason {
                        VisualFailureReason::MissingBaseline => {
                            format!("[{}] no reference image", failure.viewport)
                        }
                        VisualFailureReason::Mismatch { mismatch_percent } => {
                            format!("[{}] different by {:.2}%", failure.viewport, mismatch_percent)
                        }
                        VisualFailureReason::Unreadable { message } => {
                            format!("[{}] could not compare: {}", failure.viewport, message)
                        }
                    })
                    .collect();
                f.write_str(&parts.join("; "))
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepResult {
    /// 1-based position in the scenario
    pub step_number: usize,
    pub description: String,
    pub error: Option<StepError>,
    pub has_screenshot: bool,

    /// Mismatch against the reference, keyed by viewport name
    #[serde(default)]
    pub mismatch_percent: BTreeMap<String, f64>,
}

impl StepResult {
    pub fn passed(&self) -> bool {
        self.error.is_none()
    }

    pub fn is_skipped(&self) -> bool {
        matches!(self.error, Some(StepError::Skipped))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScenarioResult {
    pub scenario_name: String,
    pub scenario_folder: String,
    pub run_timestamp: String,
    pub steps: Vec<StepResult>,
    pub run_time_ms: u64,

    /// Set once the comparison pass has run
    #[serde(default)]
    pub comparison_time_ms: Option<u64>,
}

impl ScenarioResult {
    pub fn passed(&self) -> bool {
        self.steps.iter().all(StepResult::passed)
    }

    pub fn passed_steps(&self) -> usize {
        self.steps.iter().filter(|s| s.passed()).count()
    }

    pub fn failed_steps(&self) -> usize {
        self.steps.len() - self.passed_steps()
    }
}

/// A scenario that produced no structured result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InfrastructureFailure {
    /// Scenario file (or registry identifier)
    pub source: PathBuf,
    pub scenario_name: Option<String>,
    pub error: String,
}

/// Everything one invocation produced, collected after all workers finished
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SuiteResult {
    pub run_timestamp: String,
    pub results: Vec<ScenarioResult>,
    pub infrastructure_failures: Vec<InfrastructureFailure>,
    pub duration_ms: u64,
}

impl SuiteResult {
    pub fn total_steps(&self) -> usize {
        self.results.iter().map(|r| r.steps.len()).sum()
    }

    pub fn passed_steps(&self) -> usize {
        self.results.iter().map(ScenarioResult::passed_steps).sum()
    }

    pub fn failed_steps(&self) -> usize {
        self.total_steps() - self.passed_steps()
    }

    /// True iff every step of every scenario passed and no worker failed
    pub fn passed(&self) -> bool {
        self.infrastructure_failures.is_empty() && self.results.iter().all(ScenarioResult::passed)
    }

    /// Process exit code for this suite
    pub fn exit_code(&self) -> i32 {
        if self.passed() {
            0
        } else {
            1
        }
    }

    /// Write the suite as pretty JSON
    pub fn write_json(&self, path: &Path) -> PixlResult<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, serde_json::to_string_pretty(self)?)?;
        info!("Results written to: {}", path.display());
        Ok(())
    }
}
