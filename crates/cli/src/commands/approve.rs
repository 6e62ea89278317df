//! `pixl approve`

use std::path::PathBuf;

use anyhow::Result;
use clap::Args;

use pixl_engine::RunStore;

use super::load_config;
use crate::output::{print_failure, print_success};

#[derive(Args, Debug)]
pub struct ApproveArgs {
    /// Config file (.json, .yaml or .yml)
    #[arg(env = "PIXL_CONFIG")]
    pub config: PathBuf,
}

/// Promote the failed images of the latest run into the reference set
pub fn execute(args: ApproveArgs) -> Result<i32> {
    let document = load_config(&args.config)?;
    let store = RunStore::from_config(&document.run);

    let latest = store.find_latest_run();
    if store.approve_latest_run()? {
        print_success(&format!(
            "Last visual regression run ({}) has been marked as approved.",
            latest.unwrap_or_default()
        ));
        Ok(0)
    } else {
        print_failure(&format!(
            "No visual regression run found in {}",
            store.runs_dir().display()
        ));
        Ok(1)
    }
}
