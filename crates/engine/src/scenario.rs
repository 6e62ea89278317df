//! Scenario definitions and the providers that produce them
//!
//! A scenario is a named list of steps. Each step has a description, an
//! optional [`Action`] run against the page, and a flag saying whether a
//! screenshot is captured once the action succeeds.
//!
//! Scenario files are YAML. A step is written positionally with one to three
//! fields, or as a mapping:
//!
//! ```yaml
//! name: Gmail login
//! steps:
//!   - ["It should navigate to Gmail"]
//!   - ["It should enter an email address", { action: type, selector: "input[type=email]", text: "test@email.com" }]
//!   - - It should press Next
//!     - - { action: click, selector: "#identifierNext" }
//!       - { action: wait, selector: "#password" }
//!     - false
//!   - description: It should show the password form
//!     action: { action: wait, selector: "#password" }
//! ```

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::discover::ScenarioPattern;
use crate::driver::Page;
use crate::error::{PixlError, PixlResult};

/// Something a step does to the page
#[async_trait]
pub trait Action: Send + Sync {
    async fn run(&self, page: &dyn Page, scenario: &ScenarioDefinition) -> anyhow::Result<()>;
}

/// Future returned by closure-backed actions
pub type ActionFuture<'a> = BoxFuture<'a, anyhow::Result<()>>;

struct FnAction<F>(F);

#[async_trait]
impl<F> Action for FnAction<F>
where
    F: for<'a> Fn(&'a dyn Page, &'a ScenarioDefinition) -> ActionFuture<'a> + Send + Sync,
{
    async fn run(&self, page: &dyn Page, scenario: &ScenarioDefinition) -> anyhow::Result<()> {
        (self.0)(page, scenario).await
    }
}

/// Wrap a closure as an [`Action`] for compiled-in scenarios
pub fn fn_action<F>(f: F) -> Arc<dyn Action>
where
    F: for<'a> Fn(&'a dyn Page, &'a ScenarioDefinition) -> ActionFuture<'a> + Send + Sync + 'static,
{
    Arc::new(FnAction(f))
}

/// One step of a scenario
#[derive(Clone)]
pub struct StepDefinition {
    pub description: String,
    pub action: Option<Arc<dyn Action>>,
    pub capture_screenshot: bool,
}

impl StepDefinition {
    /// A step with no action that only captures a screenshot
    pub fn new(description: impl Into<String>) -> Self {
        Self {
            description: description.into(),
            action: None,
            capture_screenshot: true,
        }
    }

    pub fn with_action(mut self, action: Arc<dyn Action>) -> Self {
        self.action = Some(action);
        self
    }

    pub fn without_screenshot(mut self) -> Self {
        self.capture_screenshot = false;
        self
    }
}

impl fmt::Debug for StepDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StepDefinition")
            .field("description", &self.description)
            .field("has_action", &self.action.is_some())
            .field("capture_screenshot", &self.capture_screenshot)
            .finish()
    }
}

/// A named, ordered list of steps run against one browser page
#[derive(Debug, Clone)]
pub struct ScenarioDefinition {
    pub name: String,
    pub steps: Vec<StepDefinition>,
}

impl ScenarioDefinition {
    pub fn new(name: impl Into<String>, steps: Vec<StepDefinition>) -> Self {
        Self {
            name: name.into(),
            steps,
        }
    }

    /// Storage folder for this scenario's screenshots
    pub fn folder(&self) -> String {
        scenario_folder(&self.name)
    }

    /// Parse a scenario from YAML
    pub fn from_yaml(yaml: &str) -> PixlResult<Self> {
        let file: ScenarioFile = serde_yaml::from_str(yaml)?;
        Ok(file.into_definition())
    }
}

/// Derive a filesystem-safe folder name from a scenario name.
///
/// Whitespace becomes `_`, anything other than ASCII letters, digits and `_`
/// is dropped, and the result is lowercased. Applying it twice changes nothing.
pub fn scenario_folder(name: &str) -> String {
    name.chars()
        .filter_map(|c| {
            if c.is_whitespace() {
                Some('_')
            } else if c.is_ascii_alphanumeric() || c == '_' {
                Some(c.to_ascii_lowercase())
            } else {
                None
            }
        })
        .collect()
}

/// Declarative page interactions available to scenario files
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum PageAction {
    /// Navigate to an absolute URL
    Navigate { url: String },

    Click { selector: String },

    /// Replace an input's value
    Fill { selector: String, value: String },

    /// Type text with keyboard simulation
    Type { selector: String, text: String },

    Press { key: String },

    /// Wait for an element to appear
    Wait {
        selector: String,
        #[serde(default)]
        timeout_ms: Option<u64>,
    },

    /// Wait for a fixed amount of time (use sparingly)
    Sleep { ms: u64 },

    Hover { selector: String },

    Focus { selector: String },

    /// Select an option from a dropdown
    Select { selector: String, value: String },

    /// Run JavaScript, optionally asserting on its result
    Evaluate {
        script: String,
        #[serde(default)]
        expected: Option<serde_json::Value>,
    },

    Log { message: String },
}

impl PageAction {
    /// Short label used in logs
    pub fn label(&self) -> String {
        match self {
            PageAction::Navigate { url } => format!("navigate:{}", url),
            PageAction::Click { selector } => format!("click:{}", selector),
            PageAction::Fill { selector, .. } => format!("fill:{}", selector),
            PageAction::Type { selector, .. } => format!("type:{}", selector),
            PageAction::Press { key } => format!("press:{}", key),
            PageAction::Wait { selector, .. } => format!("wait:{}", selector),
            PageAction::Sleep { ms } => format!("sleep:{}ms", ms),
            PageAction::Hover { selector } => format!("hover:{}", selector),
            PageAction::Focus { selector } => format!("focus:{}", selector),
            PageAction::Select { selector, .. } => format!("select:{}", selector),
            PageAction::Evaluate { .. } => "evaluate".to_string(),
            PageAction::Log { message } => {
                format!("log:{}", message.chars().take(30).collect::<String>())
            }
        }
    }
}

#[async_trait]
impl Action for PageAction {
    async fn run(&self, page: &dyn Page, scenario: &ScenarioDefinition) -> anyhow::Result<()> {
        match self {
            PageAction::Navigate { url } => page.goto(url).await?,
            PageAction::Click { selector } => page.click(selector).await?,
            PageAction::Fill { selector, value } => page.fill(selector, value).await?,
            PageAction::Type { selector, text } => page.type_text(selector, text).await?,
            PageAction::Press { key } => page.press_key(key).await?,
            PageAction::Wait { selector, timeout_ms } => {
                page.wait_for_selector(selector, timeout_ms.map(Duration::from_millis))
                    .await?
            }
            PageAction::Sleep { ms } => tokio::time::sleep(Duration::from_millis(*ms)).await,
            PageAction::Hover { selector } => page.hover(selector).await?,
            PageAction::Focus { selector } => page.focus(selector).await?,
            PageAction::Select { selector, value } => page.select_option(selector, value).await?,
            PageAction::Evaluate { script, expected } => {
                let value = page.evaluate(script).await?;
                if let Some(expected) = expected {
                    anyhow::ensure!(
                        &value == expected,
                        "script returned {} but {} was expected",
                        value,
                        expected
                    );
                }
            }
            PageAction::Log { message } => info!("[{}] {}", scenario.name, message),
        }
        Ok(())
    }
}

#[async_trait]
impl Action for Vec<PageAction> {
    async fn run(&self, page: &dyn Page, scenario: &ScenarioDefinition) -> anyhow::Result<()> {
        for action in self {
            action
                .run(page, scenario)
                .await
                .map_err(|e| e.context(format!("'{}' failed", action.label())))?;
        }
        Ok(())
    }
}

/// A single page action or a list run in order
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum ActionEntry {
    One(PageAction),
    Many(Vec<PageAction>),
}

impl ActionEntry {
    fn into_action(self) -> Arc<dyn Action> {
        match self {
            ActionEntry::One(action) => Arc::new(action),
            ActionEntry::Many(actions) => Arc::new(actions),
        }
    }
}

fn default_capture() -> bool {
    true
}

/// A step as written in a scenario file
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum StepEntry {
    Full((String, Option<ActionEntry>, bool)),
    WithAction((String, Option<ActionEntry>)),
    Described((String,)),
    Mapping {
        description: String,
        #[serde(default)]
        action: Option<ActionEntry>,
        #[serde(default = "default_capture")]
        screenshot: bool,
    },
}

impl StepEntry {
    fn into_definition(self) -> StepDefinition {
        let (description, action, capture_screenshot) = match self {
            StepEntry::Full((description, action, capture)) => (description, action, capture),
            StepEntry::WithAction((description, action)) => (description, action, true),
            StepEntry::Described((description,)) => (description, None, true),
            StepEntry::Mapping {
                description,
                action,
                screenshot,
            } => (description, action, screenshot),
        };
        StepDefinition {
            description,
            action: action.map(ActionEntry::into_action),
            capture_screenshot,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
struct ScenarioFile {
    name: String,
    #[serde(default)]
    steps: Vec<StepEntry>,
}

impl ScenarioFile {
    fn into_definition(self) -> ScenarioDefinition {
        ScenarioDefinition {
            name: self.name,
            steps: self.steps.into_iter().map(StepEntry::into_definition).collect(),
        }
    }
}

/// Produces scenario definitions and hooks from identifiers
pub trait ScenarioProvider: Send + Sync {
    /// Identifiers matching the pattern, in a stable order
    fn discover(&self, pattern: &ScenarioPattern) -> PixlResult<Vec<PathBuf>>;

    fn load(&self, id: &Path) -> PixlResult<ScenarioDefinition>;

    /// Load the action run against every page before its first step
    fn load_hook(&self, id: &Path) -> PixlResult<Arc<dyn Action>>;
}

/// Reads YAML scenario and hook files from disk
#[derive(Debug, Clone, Default)]
pub struct YamlScenarioProvider;

impl YamlScenarioProvider {
    pub fn new() -> Self {
        Self
    }
}

impl ScenarioProvider for YamlScenarioProvider {
    fn discover(&self, pattern: &ScenarioPattern) -> PixlResult<Vec<PathBuf>> {
        pattern.discover_files()
    }

    fn load(&self, id: &Path) -> PixlResult<ScenarioDefinition> {
        let content = std::fs::read_to_string(id).map_err(|e| PixlError::ScenarioLoad {
            path: id.to_path_buf(),
            reason: e.to_string(),
        })?;
        ScenarioDefinition::from_yaml(&content).map_err(|e| PixlError::ScenarioLoad {
            path: id.to_path_buf(),
            reason: e.to_string(),
        })
    }

    fn load_hook(&self, id: &Path) -> PixlResult<Arc<dyn Action>> {
        let content = std::fs::read_to_string(id).map_err(|e| PixlError::ScenarioLoad {
            path: id.to_path_buf(),
            reason: e.to_string(),
        })?;
        let entry: ActionEntry = serde_yaml::from_str(&content).map_err(|e| PixlError::ScenarioLoad {
            path: id.to_path_buf(),
            reason: e.to_string(),
        })?;
        Ok(entry.into_action())
    }
}

/// Scenarios and hooks compiled into the binary, keyed by identifier
#[derive(Default)]
pub struct ScenarioRegistry {
    scenarios: HashMap<PathBuf, ScenarioDefinition>,
    hooks: HashMap<PathBuf, Arc<dyn Action>>,
}

impl ScenarioRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, id: impl Into<PathBuf>, scenario: ScenarioDefinition) -> &mut Self {
        self.scenarios.insert(id.into(), scenario);
        self
    }

    pub fn register_hook(&mut self, id: impl Into<PathBuf>, hook: Arc<dyn Action>) -> &mut Self {
        self.hooks.insert(id.into(), hook);
        self
    }
}

impl ScenarioProvider for ScenarioRegistry {
    fn discover(&self, pattern: &ScenarioPattern) -> PixlResult<Vec<PathBuf>> {
        let mut ids: Vec<PathBuf> = self
            .scenarios
            .keys()
            .filter(|id| pattern.matches_path(id))
            .cloned()
            .collect();
        ids.sort();
        Ok(ids)
    }

    fn load(&self, id: &Path) -> PixlResult<ScenarioDefinition> {
        self.scenarios
            .get(id)
            .cloned()
            .ok_or_else(|| PixlError::ScenarioLoad {
                path: id.to_path_buf(),
                reason: "no scenario registered under this identifier".to_string(),
            })
    }

    fn load_hook(&self, id: &Path) -> PixlResult<Arc<dyn Action>> {
        self.hooks
            .get(id)
            .cloned()
            .ok_or_else(|| PixlError::ScenarioLoad {
                path: id.to_path_buf(),
                reason: "no hook registered under this identifier".to_string(),
            })
    }
}
