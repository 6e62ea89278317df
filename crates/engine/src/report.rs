//! HTML report
//!
//! One section per scenario, one heading per step and one block per viewport
//! showing the reference image, the run image and, for visual mismatches, the
//! diff image. Image links are relative to the output directory.

use std::fmt::Write;

use tracing::{debug, info};

use crate::config::Viewport;
use crate::error::PixlResult;
use crate::result::{ScenarioResult, StepError, StepResult, SuiteResult, VisualFailure, VisualFailureReason};
use crate::store::{RunStore, REFERENCES_FOLDER, RUNS_FOLDER};

/// Renders the suite once, after every scenario has finished
pub trait ReportEmitter: Send + Sync {
    fn emit(&self, suite: &SuiteResult, store: &RunStore, viewports: &[Viewport]) -> PixlResult<()>;
}

/// Writes `vr_report.html` into the output directory
#[derive(Debug, Clone, Default)]
pub struct HtmlReport;

impl HtmlReport {
    pub fn new() -> Self {
        Self
    }

    pub fn render(suite: &SuiteResult, viewports: &[Viewport]) -> String {
        let mut body = String::new();
        for scenario in &suite.results {
            render_scenario(&mut body, scenario, viewports);
        }

        if !suite.infrastructure_failures.is_empty() {
            body.push_str("\n<h1 style=\"color: red\">Scenarios that could not run</h1>\n<ul>\n");
            for failure in &suite.infrastructure_failures {
                let _ = writeln!(
                    body,
                    "  <li><strong>{}</strong> ({}): <pre>{}</pre></li>",
                    escape(failure.scenario_name.as_deref().unwrap_or("unknown scenario")),
                    escape(&failure.source.display().to_string()),
                    escape(&failure.error)
                );
            }
            body.push_str("</ul>\n");
        }

        format!(
            "<html>\n<head>\n<title>Pixl Report</title>\n</head>\n\n<body style=\"font-family: Arial\">\n{}</body>\n</html>\n",
            body
        )
    }
}

impl ReportEmitter for HtmlReport {
    fn emit(&self, suite: &SuiteResult, store: &RunStore, viewports: &[Viewport]) -> PixlResult<()> {
        let path = store.report_path();
        if path.exists() {
            std::fs::remove_file(&path)?;
            debug!("Removed previous report {}", path.display());
        }

        std::fs::create_dir_all(store.root())?;
        std::fs::write(&path, Self::render(suite, viewports))?;
        info!("Report written to: {}", path.display());
        Ok(())
    }
}

fn render_scenario(out: &mut String, scenario: &ScenarioResult, viewports: &[Viewport]) {
    let _ = write!(
        out,
        "\n<h1>Scenario: {}</h1>\n<p>Ran {} steps of which <span style=\"color: green\">{}</span> passed and <span style=\"color: red\">{}</span> failed.</p>\n",
        escape(&scenario.scenario_name),
        scenario.steps.len(),
        scenario.passed_steps(),
        scenario.failed_steps()
    );

    let comparison = scenario
        .comparison_time_ms
        .map(|ms| format!("{} ms", ms))
        .unwrap_or_else(|| "no time".to_string());
    let _ = writeln!(
        out,
        "<p>It took <strong>{} ms</strong> to run the scenario and <strong>{}</strong> to perform a comparison.</p>\n<hr/>",
        scenario.run_time_ms, comparison
    );

    for step in &scenario.steps {
        render_step(out, step, scenario, viewports);
    }
}

fn render_step(out: &mut String, step: &StepResult, scenario: &ScenarioResult, viewports: &[Viewport]) {
    let color = if step.passed() { "green" } else { "red" };
    let _ = writeln!(
        out,
        "\n<h2 style=\"color: {}\">{}. {}</h2>",
        color,
        step.step_number,
        escape(&step.description)
    );

    for viewport in viewports {
        let _ = writeln!(out, "  Viewport: <strong>{}</strong>\n  <br/>", escape(&viewport.name));

        if let Some(percent) = step.mismatch_percent.get(&viewport.name) {
            let _ = writeln!(out, "  Difference: <strong>{:.2}%</strong><br/>", percent);
        }
        if let Some(error) = &step.error {
            let _ = writeln!(out, "  Error: <pre>{}</pre><br/>", escape(&error.to_string()));
        }
        out.push_str("  <br/>\n");

        let reference = format!(
            "./{}/{}/{}/step{}.png",
            REFERENCES_FOLDER, scenario.scenario_folder, viewport.name, step.step_number
        );
        let run_base = format!(
            "./{}/{}/{}/{}/step{}",
            RUNS_FOLDER, scenario.run_timestamp, scenario.scenario_folder, viewport.name, step.step_number
        );
        let capture = Capture::of(step, &viewport.name);
        let run = if capture == Capture::Kept {
            format!("{}.png", run_base)
        } else {
            format!("{}_failed.png", run_base)
        };

        out.push_str(&image_tag(&reference));
        out.push_str(&image_tag(&run));
        if capture == Capture::Mismatched {
            out.push_str(&image_tag(&format!("{}_diff.png", run_base)));
        }
        out.push_str("  <br/>\n  <br/>\n  <hr/>\n");
    }
}

/// What the run tree holds for one viewport of a step
#[derive(Debug, PartialEq, Eq)]
enum Capture {
    /// `stepN.png`
    Kept,
    /// `stepN_failed.png`
    Failed,
    /// `stepN_failed.png` and `stepN_diff.png`
    Mismatched,
}

impl Capture {
    fn of(step: &StepResult, viewport: &str) -> Self {
        match &step.error {
            None => Capture::Kept,
            Some(StepError::Skipped) | Some(StepError::Action { .. }) => Capture::Failed,
            Some(StepError::Visual { failures }) => match failures.iter().find(|f| f.viewport == viewport) {
                None => Capture::Kept,
                Some(VisualFailure {
                    reason: VisualFailureReason::Mismatch { .. },
                    ..
                }) => Capture::Mismatched,
                Some(_) => Capture::Failed,
            },
        }
    }
}

fn image_tag(src: &str) -> String {
    format!(
        "  <img border=\"1\" src=\"{}\" width=\"300\" height=\"300\" style=\"object-fit: contain\" />\n",
        escape(src)
    )
}

fn escape(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            _ => escaped.push(c),
        }
    }
    escaped
}
