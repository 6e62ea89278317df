//! `pixl run`

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::{Args, ValueEnum};
use serde::Serialize;
use tracing::info;

use pixl_engine::{
    Browser, ConfigDocument, PlaywrightConfig, PlaywrightDriver, ScenarioPattern, ScenarioResult, Scheduler,
    SuiteResult, YamlScenarioProvider,
};

use super::load_config;
use crate::output::{print_failure, print_list, print_serialized, print_success, print_warning, OutputFormat, TableDisplay};

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum BrowserArg {
    Chromium,
    Firefox,
    Webkit,
}

impl From<BrowserArg> for Browser {
    fn from(arg: BrowserArg) -> Self {
        match arg {
            BrowserArg::Chromium => Browser::Chromium,
            BrowserArg::Firefox => Browser::Firefox,
            BrowserArg::Webkit => Browser::Webkit,
        }
    }
}

#[derive(Args, Debug)]
pub struct RunArgs {
    /// Config file (.json, .yaml or .yml)
    #[arg(env = "PIXL_CONFIG")]
    pub config: PathBuf,

    /// Scenario file glob, overrides `scenarios` from the config
    #[arg(long, env = "PIXL_SCENARIOS")]
    pub scenarios: Option<String>,

    /// Maximum number of scenarios run at once
    #[arg(long, env = "PIXL_MAX_WORKERS")]
    pub max_workers: Option<usize>,

    /// Run browsers headless (true/false)
    #[arg(long, env = "PIXL_HEADLESS")]
    pub headless: Option<bool>,

    /// Browser engine driven by Playwright
    #[arg(long, value_enum, default_value = "chromium", env = "PIXL_BROWSER")]
    pub browser: BrowserArg,

    /// Node.js executable used for the Playwright bridge
    #[arg(long, default_value = "node", env = "PIXL_NODE")]
    pub node: PathBuf,
}

impl RunArgs {
    /// Apply command-line overrides on top of the config file
    fn apply(&self, document: &mut ConfigDocument) {
        if let Some(scenarios) = &self.scenarios {
            document.scenarios = scenarios.clone();
        }
        if let Some(max_workers) = self.max_workers {
            document.max_workers = max_workers;
        }
        if let Some(headless) = self.headless {
            document.run.headless = headless;
        }
    }
}

#[derive(Serialize)]
struct ScenarioRow {
    scenario: String,
    folder: String,
    steps: usize,
    passed: usize,
    failed: usize,
    run_time_ms: u64,
    comparison_time_ms: Option<u64>,
}

impl From<&ScenarioResult> for ScenarioRow {
    fn from(result: &ScenarioResult) -> Self {
        Self {
            scenario: result.scenario_name.clone(),
            folder: result.scenario_folder.clone(),
            steps: result.steps.len(),
            passed: result.passed_steps(),
            failed: result.failed_steps(),
            run_time_ms: result.run_time_ms,
            comparison_time_ms: result.comparison_time_ms,
        }
    }
}

impl TableDisplay for ScenarioRow {
    fn headers() -> Vec<&'static str> {
        vec!["Scenario", "Folder", "Steps", "Passed", "Failed", "Run", "Comparison"]
    }

    fn row(&self) -> Vec<String> {
        vec![
            self.scenario.clone(),
            self.folder.clone(),
            self.steps.to_string(),
            self.passed.to_string(),
            self.failed.to_string(),
            format!("{} ms", self.run_time_ms),
            self.comparison_time_ms
                .map(|ms| format!("{} ms", ms))
                .unwrap_or_else(|| "-".to_string()),
        ]
    }
}

pub async fn execute(args: RunArgs, format: OutputFormat) -> Result<i32> {
    let mut document = load_config(&args.config)?;
    args.apply(&mut document);
    document.validate()?;

    let pattern = ScenarioPattern::new(&document.scenarios)?;
    let driver = PlaywrightDriver::new(PlaywrightConfig {
        node_binary: args.node.clone(),
        browser: args.browser.into(),
        working_dir: None,
    });

    let scheduler = Scheduler::new(document.run, Arc::new(driver), Arc::new(YamlScenarioProvider::new()))
        .with_max_workers(document.max_workers);
    info!("Matching scenarios against '{}'", pattern.as_str());

    let suite = scheduler.run(&pattern).await?;
    suite.write_json(&scheduler.store().results_path())?;

    print_suite(&suite, format);
    Ok(suite.exit_code())
}

fn print_suite(suite: &SuiteResult, format: OutputFormat) {
    if let OutputFormat::Json | OutputFormat::Yaml = format {
        print_serialized(suite, format);
        return;
    }

    let rows: Vec<ScenarioRow> = suite.results.iter().map(ScenarioRow::from).collect();
    print_list(&rows, format);

    for failure in &suite.infrastructure_failures {
        print_warning(&format!(
            "{} ({}) did not run: {}",
            failure.scenario_name.as_deref().unwrap_or("Scenario"),
            failure.source.display(),
            failure.error
        ));
    }

    println!("Visual regression execution took: {}ms", suite.duration_ms);
    let summary = summary_line(suite);
    if suite.passed() {
        print_success(&summary);
    } else {
        print_failure(&summary);
    }
}

fn summary_line(suite: &SuiteResult) -> String {
    format!(
        "{} out of {} steps passed ({} failed).",
        suite.passed_steps(),
        suite.total_steps(),
        suite.failed_steps()
    )
}
