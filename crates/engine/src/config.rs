//! Run configuration
//!
//! The config document is read once per invocation. Its run-related half,
//! [`RunConfig`], is handed to every scenario worker behind an `Arc` and is
//! never mutated afterwards.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{PixlError, PixlResult};

/// Default glob used to discover scenario files
pub const DEFAULT_SCENARIO_PATTERN: &str = "**/*.scenario.yaml";

/// Default number of scenarios executed in parallel
pub const DEFAULT_MAX_WORKERS: usize = 5;

/// A named browser width at which every screenshot is captured
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Viewport {
    pub name: String,
    pub width: u32,
}

impl Viewport {
    pub fn new(name: impl Into<String>, width: u32) -> Self {
        Self {
            name: name.into(),
            width,
        }
    }
}

/// Settings shared read-only by every scenario execution of one invocation
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunConfig {
    /// Upper bound for every browser action, in milliseconds
    #[serde(rename = "timeout", default = "default_timeout_ms")]
    pub timeout_ms: u64,

    /// Number of run directories retained, the current one included
    #[serde(default = "default_max_runs_to_keep")]
    pub max_runs_to_keep: usize,

    /// Settle delay before each capture, in milliseconds
    #[serde(rename = "stabiliseDelay", default = "default_stabilise_delay_ms")]
    pub stabilise_delay_ms: u64,

    /// Mismatch (0.0 - 100.0 percent) tolerated before a step fails
    #[serde(rename = "misMatchPercentage", default)]
    pub mismatch_threshold_percent: f64,

    #[serde(default = "default_headless")]
    pub headless: bool,

    #[serde(default = "default_viewports")]
    pub viewports: Vec<Viewport>,

    /// Root of `vr_references/`, `vr_runs/` and the report
    #[serde(default = "default_output_directory")]
    pub output_directory: PathBuf,

    /// Page every scenario starts from
    #[serde(default)]
    pub url: Option<String>,

    /// Hook file run against the page before the first step
    #[serde(rename = "beforeEach", default)]
    pub before_each: Option<PathBuf>,
}

fn default_timeout_ms() -> u64 {
    10_000
}

fn default_max_runs_to_keep() -> usize {
    5
}

fn default_stabilise_delay_ms() -> u64 {
    50
}

fn default_headless() -> bool {
    true
}

fn default_viewports() -> Vec<Viewport> {
    vec![Viewport::new("desktop", 1440)]
}

fn default_output_directory() -> PathBuf {
    PathBuf::from(".")
}

fn default_scenarios() -> String {
    DEFAULT_SCENARIO_PATTERN.to_string()
}

fn default_max_workers() -> usize {
    DEFAULT_MAX_WORKERS
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            timeout_ms: default_timeout_ms(),
            max_runs_to_keep: default_max_runs_to_keep(),
            stabilise_delay_ms: default_stabilise_delay_ms(),
            mismatch_threshold_percent: 0.0,
            headless: default_headless(),
            viewports: default_viewports(),
            output_directory: default_output_directory(),
            url: None,
            before_each: None,
        }
    }
}

impl RunConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn stabilise_delay(&self) -> Duration {
        Duration::from_millis(self.stabilise_delay_ms)
    }

    /// Reject values the engine cannot honour
    pub fn validate(&self) -> PixlResult<()> {
        if self.max_runs_to_keep < 1 {
            return Err(PixlError::InvalidConfig(
                "maxRunsToKeep must be at least 1".to_string(),
            ));
        }
        if !self.mismatch_threshold_percent.is_finite() || self.mismatch_threshold_percent < 0.0 {
            return Err(PixlError::InvalidConfig(format!(
                "misMatchPercentage must be a non-negative number, got {}",
                self.mismatch_threshold_percent
            )));
        }
        if self.viewports.is_empty() {
            return Err(PixlError::InvalidConfig(
                "at least one viewport is required".to_string(),
            ));
        }
        for viewport in &self.viewports {
            if viewport.width == 0 {
                return Err(PixlError::InvalidConfig(format!(
                    "viewport '{}' must have a width greater than 0",
                    viewport.name
                )));
            }
            if viewport.name.is_empty() || viewport.name.contains(['/', '\\']) {
                return Err(PixlError::InvalidConfig(format!(
                    "viewport name '{}' cannot be used as a folder name",
                    viewport.name
                )));
            }
        }
        let mut names: Vec<&str> = self.viewports.iter().map(|v| v.name.as_str()).collect();
        names.sort_unstable();
        if let Some(pair) = names.windows(2).find(|pair| pair[0] == pair[1]) {
            return Err(PixlError::InvalidConfig(format!(
                "viewport '{}' is configured more than once",
                pair[0]
            )));
        }
        Ok(())
    }
}

/// The config document as written by users
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigDocument {
    /// Glob matching the scenario files to run
    #[serde(default = "default_scenarios")]
    pub scenarios: String,

    #[serde(default = "default_max_workers")]
    pub max_workers: usize,

    #[serde(flatten)]
    pub run: RunConfig,
}

impl Default for ConfigDocument {
    fn default() -> Self {
        Self {
            scenarios: default_scenarios(),
            max_workers: default_max_workers(),
            run: RunConfig::default(),
        }
    }
}

impl ConfigDocument {
    pub fn from_json(json: &str) -> PixlResult<Self> {
        serde_json::from_str(json).map_err(PixlError::from)
    }

    pub fn from_yaml(yaml: &str) -> PixlResult<Self> {
        serde_yaml::from_str(yaml).map_err(PixlError::from)
    }

    /// Load a config file, picking the format from its extension (JSON unless `.yaml`/`.yml`)
    pub fn from_file(path: &Path) -> PixlResult<Self> {
        let content = std::fs::read_to_string(path)?;
        let is_yaml = path
            .extension()
            .map(|ext| ext == "yaml" || ext == "yml")
            .unwrap_or(false);

        let document = if is_yaml {
            Self::from_yaml(&content)?
        } else {
            Self::from_json(&content)?
        };
        document.validate()?;
        Ok(document)
    }

    pub fn validate(&self) -> PixlResult<()> {
        if self.max_workers < 1 {
            return Err(PixlError::InvalidConfig(
                "maxWorkers must be at least 1".to_string(),
            ));
        }
        if self.scenarios.trim().is_empty() {
            return Err(PixlError::InvalidConfig(
                "scenarios pattern cannot be empty".to_string(),
            ));
        }
        self.run.validate()
    }
}
