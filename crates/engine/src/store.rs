//! On-disk layout of runs and approved references
//!
//! ```text
//! <output>/vr_references/<scenario>/<viewport>/stepN.png
//! <output>/vr_runs/<timestamp>/<scenario>/<viewport>/stepN.png
//!                                                   stepN_failed.png
//!                                                   stepN_diff.png
//! <output>/vr_report.html
//! ```
//!
//! Run timestamps are epoch milliseconds, so numeric order is recency order.
//! Each `<timestamp>/<scenario>` subtree is written by exactly one worker and
//! the reference set only changes through approval.

use std::io::Cursor;
use std::path::{Path, PathBuf};

use image::{DynamicImage, ImageOutputFormat, Rgba, RgbaImage};
use once_cell::sync::OnceCell;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::config::{RunConfig, Viewport};
use crate::error::PixlResult;

static FAILURE_PLACEHOLDER: OnceCell<Vec<u8>> = OnceCell::new();

pub const REFERENCES_FOLDER: &str = "vr_references";
pub const RUNS_FOLDER: &str = "vr_runs";
pub const REPORT_FILE: &str = "vr_report.html";
pub const RESULTS_FILE: &str = "vr_results.json";

const FAILED_SUFFIX: &str = "_failed.png";

/// Manages the run and reference directory trees under one output directory
#[derive(Debug, Clone)]
pub struct RunStore {
    root: PathBuf,
    max_runs_to_keep: usize,
}

impl RunStore {
    pub fn new(output_directory: impl Into<PathBuf>, max_runs_to_keep: usize) -> Self {
        Self {
            root: output_directory.into(),
            max_runs_to_keep: max_runs_to_keep.max(1),
        }
    }

    pub fn from_config(config: &RunConfig) -> Self {
        Self::new(config.output_directory.clone(), config.max_runs_to_keep)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn references_dir(&self) -> PathBuf {
        self.root.join(REFERENCES_FOLDER)
    }

    pub fn runs_dir(&self) -> PathBuf {
        self.root.join(RUNS_FOLDER)
    }

    pub fn report_path(&self) -> PathBuf {
        self.root.join(REPORT_FILE)
    }

    pub fn results_path(&self) -> PathBuf {
        self.root.join(RESULTS_FILE)
    }

    pub fn run_dir(&self, timestamp: &str) -> PathBuf {
        self.runs_dir().join(timestamp)
    }

    pub fn viewport_dir(&self, timestamp: &str, scenario_folder: &str, viewport: &str) -> PathBuf {
        self.run_dir(timestamp).join(scenario_folder).join(viewport)
    }

    pub fn step_image_path(&self, timestamp: &str, scenario_folder: &str, viewport: &str, step: usize) -> PathBuf {
        self.viewport_dir(timestamp, scenario_folder, viewport)
            .join(format!("step{}.png", step))
    }

    pub fn failed_image_path(&self, timestamp: &str, scenario_folder: &str, viewport: &str, step: usize) -> PathBuf {
        self.viewport_dir(timestamp, scenario_folder, viewport)
            .join(format!("step{}_failed.png", step))
    }

    pub fn diff_image_path(&self, timestamp: &str, scenario_folder: &str, viewport: &str, step: usize) -> PathBuf {
        self.viewport_dir(timestamp, scenario_folder, viewport)
            .join(format!("step{}_diff.png", step))
    }

    pub fn reference_image_path(&self, scenario_folder: &str, viewport: &str, step: usize) -> PathBuf {
        self.references_dir()
            .join(scenario_folder)
            .join(viewport)
            .join(format!("step{}.png", step))
    }

    /// Create the run subtree for every viewport, pruning old runs first.
    ///
    /// The current timestamp never counts against retention, so concurrent
    /// workers of the same run cannot prune each other's output.
    pub fn prepare_run_folders(&self, scenario_folder: &str, timestamp: &str, viewports: &[Viewport]) -> PixlResult<()> {
        self.prune_runs(timestamp);

        for viewport in viewports {
            std::fs::create_dir_all(self.viewport_dir(timestamp, scenario_folder, &viewport.name))?;
        }
        Ok(())
    }

    /// Remove all but the `max_runs_to_keep - 1` most recent runs other than `current`.
    /// Failures are expected (no runs yet, a sibling worker got there first) and ignored.
    fn prune_runs(&self, current: &str) {
        let runs = match self.list_runs() {
            Ok(runs) => runs,
            Err(e) => {
                debug!("Nothing to prune in {}: {}", self.runs_dir().display(), e);
                return;
            }
        };

        for run in runs
            .into_iter()
            .filter(|run| run != current)
            .skip(self.max_runs_to_keep - 1)
        {
            match std::fs::remove_dir_all(self.run_dir(&run)) {
                Ok(()) => info!("Pruned old run {}", run),
                Err(e) => debug!("Could not prune run {}: {}", run, e),
            }
        }
    }

    /// Run timestamps, most recent first. Entries that are not timestamps are ignored.
    pub fn list_runs(&self) -> PixlResult<Vec<String>> {
        let mut runs: Vec<(u64, String)> = std::fs::read_dir(self.runs_dir())?
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.path().is_dir())
            .filter_map(|entry| {
                let name = entry.file_name().to_string_lossy().to_string();
                name.parse::<u64>().ok().map(|ts| (ts, name))
            })
            .collect();

        runs.sort_by(|a, b| b.0.cmp(&a.0));
        Ok(runs.into_iter().map(|(_, name)| name).collect())
    }

    pub fn find_latest_run(&self) -> Option<String> {
        self.list_runs().ok()?.into_iter().next()
    }

    pub async fn write_screenshot(
        &self,
        scenario_folder: &str,
        timestamp: &str,
        viewport: &str,
        step: usize,
        png: &[u8],
    ) -> PixlResult<PathBuf> {
        let path = self.step_image_path(timestamp, scenario_folder, viewport, step);
        tokio::fs::write(&path, png).await?;
        Ok(path)
    }

    /// Write the generic "failed" image for a step that produced no capture
    pub async fn write_failure_placeholder(
        &self,
        scenario_folder: &str,
        timestamp: &str,
        viewport: &str,
        step: usize,
    ) -> PixlResult<PathBuf> {
        let path = self.failed_image_path(timestamp, scenario_folder, viewport, step);
        tokio::fs::write(&path, failure_placeholder_png()?).await?;
        Ok(path)
    }

    /// Rename a capture to the failed-image convention
    pub async fn mark_failed(
        &self,
        scenario_folder: &str,
        timestamp: &str,
        viewport: &str,
        step: usize,
    ) -> PixlResult<PathBuf> {
        let from = self.step_image_path(timestamp, scenario_folder, viewport, step);
        let to = self.failed_image_path(timestamp, scenario_folder, viewport, step);
        tokio::fs::rename(&from, &to).await?;
        Ok(to)
    }

    pub async fn write_diff(
        &self,
        scenario_folder: &str,
        timestamp: &str,
        viewport: &str,
        step: usize,
        png: &[u8],
    ) -> PixlResult<PathBuf> {
        let path = self.diff_image_path(timestamp, scenario_folder, viewport, step);
        tokio::fs::write(&path, png).await?;
        Ok(path)
    }

    /// Copy every failed image of a run into the reference set with the
    /// failure marker stripped. Returns `false` if the run does not exist.
    pub fn promote_run_to_baseline(&self, timestamp: &str) -> PixlResult<bool> {
        let run_dir = self.run_dir(timestamp);
        if !run_dir.is_dir() {
            return Ok(false);
        }

        let references = self.references_dir();
        let mut promoted = 0usize;

        for entry in WalkDir::new(&run_dir).into_iter().filter_map(|e| e.ok()) {
            if !entry.file_type().is_file() {
                continue;
            }
            let file_name = entry.file_name().to_string_lossy();
            let Some(stem) = file_name.strip_suffix(FAILED_SUFFIX) else {
                continue;
            };
            let Ok(relative) = entry.path().strip_prefix(&run_dir) else {
                continue;
            };

            let target = references
                .join(relative)
                .with_file_name(format!("{}.png", stem));
            if let Some(parent) = target.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::copy(entry.path(), &target)?;
            debug!("Approved {} -> {}", entry.path().display(), target.display());
            promoted += 1;
        }

        info!("Promoted {} image(s) from run {} to the reference set", promoted, timestamp);
        Ok(true)
    }

    /// Approve the most recent run. Returns `false` when there is no run to approve.
    pub fn approve_latest_run(&self) -> PixlResult<bool> {
        match self.find_latest_run() {
            Some(timestamp) => self.promote_run_to_baseline(&timestamp),
            None => {
                warn!("Could not find any visual regression run to approve in {}", self.runs_dir().display());
                Ok(false)
            }
        }
    }
}

/// The generic image used for steps that could not be captured, encoded once
pub fn failure_placeholder_png() -> PixlResult<&'static [u8]> {
    FAILURE_PLACEHOLDER
        .get_or_try_init(render_failure_placeholder)
        .map(Vec::as_slice)
}

/// A pale red card crossed by two dark red diagonals
fn render_failure_placeholder() -> PixlResult<Vec<u8>> {
    const WIDTH: u32 = 320;
    const HEIGHT: u32 = 240;

    let background = Rgba([252, 228, 228, 255]);
    let stroke = Rgba([190, 30, 45, 255]);

    let image = RgbaImage::from_fn(WIDTH, HEIGHT, |x, y| {
        let down = (x * HEIGHT) as i64 - (y * WIDTH) as i64;
        let up = (x * HEIGHT) as i64 - ((HEIGHT - 1 - y) * WIDTH) as i64;
        let thickness = (3 * WIDTH) as i64;
        if down.abs() < thickness || up.abs() < thickness {
            stroke
        } else {
            background
        }
    });

    let mut bytes = Vec::new();
    DynamicImage::ImageRgba8(image).write_to(&mut Cursor::new(&mut bytes), ImageOutputFormat::Png)?;
    Ok(bytes)
}
