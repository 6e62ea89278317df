//! CLI Commands

pub mod approve;
pub mod list;
pub mod run;

use std::path::Path;

use anyhow::Context;
use pixl_engine::ConfigDocument;

/// Read and validate a config document
pub fn load_config(path: &Path) -> anyhow::Result<ConfigDocument> {
    ConfigDocument::from_file(path).with_context(|| format!("Could not load config file {}", path.display()))
}
