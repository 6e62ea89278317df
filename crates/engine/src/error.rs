//! Error types for the pixl engine

use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum PixlError {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Could not load scenario {}: {reason}", path.display())]
    ScenarioLoad { path: PathBuf, reason: String },

    #[error("Invalid scenario pattern '{pattern}': {reason}")]
    Pattern { pattern: String, reason: String },

    #[error("Browser failed to launch: {0}")]
    BrowserLaunch(String),

    #[error("Browser error: {0}")]
    Browser(String),

    #[error("Browser bridge protocol error: {0}")]
    Protocol(String),

    #[error("Timed out after {0} ms")]
    Timeout(u64),

    #[error("Scenario '{scenario}' shares folder '{folder}' with '{existing}'")]
    SlugCollision {
        scenario: String,
        existing: String,
        folder: String,
    },

    #[error("Scenario worker crashed: {0}")]
    WorkerCrashed(String),

    #[error("Image comparison failed: {0}")]
    Comparison(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("Regex error: {0}")]
    Regex(#[from] regex::Error),
}

pub type PixlResult<T> = Result<T, PixlError>;
