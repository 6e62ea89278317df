//! `pixl list`

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::Args;
use serde::Serialize;

use pixl_engine::{PlaywrightDriver, ScenarioPattern, ScenarioPlan, Scheduler, YamlScenarioProvider};

use super::load_config;
use crate::output::{print_list, OutputFormat, TableDisplay};

#[derive(Args, Debug)]
pub struct ListArgs {
    /// Config file (.json, .yaml or .yml)
    #[arg(env = "PIXL_CONFIG")]
    pub config: PathBuf,

    /// Scenario file glob, overrides `scenarios` from the config
    #[arg(long, env = "PIXL_SCENARIOS")]
    pub scenarios: Option<String>,
}

#[derive(Serialize)]
struct ScenarioEntry {
    source: String,
    scenario: Option<String>,
    folder: Option<String>,
    steps: Option<usize>,
    error: Option<String>,
}

impl TableDisplay for ScenarioEntry {
    fn headers() -> Vec<&'static str> {
        vec!["Source", "Scenario", "Folder", "Steps", "Status"]
    }

    fn row(&self) -> Vec<String> {
        vec![
            self.source.clone(),
            self.scenario.clone().unwrap_or_else(|| "-".to_string()),
            self.folder.clone().unwrap_or_else(|| "-".to_string()),
            self.steps.map(|n| n.to_string()).unwrap_or_else(|| "-".to_string()),
            self.error.clone().unwrap_or_else(|| "ok".to_string()),
        ]
    }
}

fn entries(plan: &ScenarioPlan) -> Vec<ScenarioEntry> {
    let accepted = plan.scenarios.iter().map(|planned| ScenarioEntry {
        source: planned.source.display().to_string(),
        scenario: Some(planned.definition.name.clone()),
        folder: Some(planned.definition.folder()),
        steps: Some(planned.definition.steps.len()),
        error: None,
    });
    let rejected = plan.rejected.iter().map(|failure| ScenarioEntry {
        source: failure.source.display().to_string(),
        scenario: failure.scenario_name.clone(),
        folder: None,
        steps: None,
        error: Some(failure.error.clone()),
    });

    let mut entries: Vec<ScenarioEntry> = accepted.chain(rejected).collect();
    entries.sort_by(|a, b| a.source.cmp(&b.source));
    entries
}

/// Show what a run would execute, flagging scenarios that would be rejected
pub fn execute(args: ListArgs, format: OutputFormat) -> Result<i32> {
    let mut document = load_config(&args.config)?;
    if let Some(scenarios) = args.scenarios {
        document.scenarios = scenarios;
    }

    let pattern = ScenarioPattern::new(&document.scenarios)?;
    let scheduler = Scheduler::new(
        document.run,
        Arc::new(PlaywrightDriver::default()),
        Arc::new(YamlScenarioProvider::new()),
    );
    let plan = scheduler.plan(&pattern)?;

    print_list(&entries(&plan), format);
    Ok(if plan.rejected.is_empty() { 0 } else { 1 })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pixl_engine::{InfrastructureFailure, PlannedScenario, ScenarioDefinition, StepDefinition};

    #[test]
    fn test_entries_merge_accepted_and_rejected() {
        let plan = ScenarioPlan {
            scenarios: vec![PlannedScenario {
                source: PathBuf::from("b.scenario.yaml"),
                definition: ScenarioDefinition::new("Checkout", vec![StepDefinition::new("opens")]),
            }],
            rejected: vec![InfrastructureFailure {
                source: PathBuf::from("a.scenario.yaml"),
                scenario_name: Some("checkout".to_string()),
                error: "Scenario 'checkout' shares folder 'checkout' with 'Checkout'".to_string(),
            }],
        };

        let entries = entries(&plan);
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].source, "a.scenario.yaml");
        assert!(entries[0].row()[4].contains("shares folder"));
        assert_eq!(entries[1].row(), vec!["b.scenario.yaml", "Checkout", "checkout", "1", "ok"]);
    }
}
