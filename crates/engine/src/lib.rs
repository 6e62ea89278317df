//! Pixl visual regression engine
//!
//! Scenarios are named lists of steps run against a real browser. Each step
//! may act on the page and capture a full-page screenshot per configured
//! viewport. Captures are compared against an approved reference set; any
//! difference over the threshold fails the step.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                         Scheduler                           │
//! │    ├── plan(pattern) -> ScenarioPlan (collisions rejected)  │
//! │    ├── Semaphore(max_workers) + one task per scenario       │
//! │    ├── join_all barrier -> SuiteResult                      │
//! │    └── ReportEmitter::emit (once)                           │
//! ├─────────────────────────────────────────────────────────────┤
//! │  ScenarioRunner (per scenario)                              │
//! │    ├── BrowserDriver::launch -> BrowserSession -> Page      │
//! │    ├── navigate, beforeEach hook                            │
//! │    ├── steps: action -> stabilise -> screenshot/viewport    │
//! │    └── first failure -> remaining steps skipped             │
//! ├─────────────────────────────────────────────────────────────┤
//! │  ComparisonPass (per scenario)                              │
//! │    └── ComparatorAdapter -> PixelComparator                 │
//! ├─────────────────────────────────────────────────────────────┤
//! │  RunStore                                                   │
//! │    ├── vr_references/<folder>/<viewport>/stepN.png          │
//! │    ├── vr_runs/<ts>/<folder>/<viewport>/stepN[_failed|_diff]│
//! │    └── retention, approval                                  │
//! └─────────────────────────────────────────────────────────────┘
//! ```

pub mod compare;
pub mod comparison;
pub mod config;
pub mod discover;
pub mod driver;
pub mod error;
pub mod playwright;
pub mod report;
pub mod result;
pub mod runner;
pub mod scenario;
pub mod scheduler;
pub mod store;

pub use compare::{ComparatorAdapter, ImageDiffComparator, PixelComparator, PixelDiff, Verdict};
pub use comparison::ComparisonPass;
pub use config::{ConfigDocument, RunConfig, Viewport};
pub use discover::ScenarioPattern;
pub use driver::{BrowserDriver, BrowserSession, Page};
pub use error::{PixlError, PixlResult};
pub use playwright::{Browser, PlaywrightConfig, PlaywrightDriver};
pub use report::{HtmlReport, ReportEmitter};
pub use result::{InfrastructureFailure, ScenarioResult, StepError, StepResult, SuiteResult};
pub use runner::ScenarioRunner;
pub use scenario::{
    fn_action, Action, ActionFuture, PageAction, ScenarioDefinition, ScenarioProvider, ScenarioRegistry,
    StepDefinition, YamlScenarioProvider,
};
pub use scheduler::{PlannedScenario, ScenarioPlan, Scheduler};
pub use store::RunStore;
