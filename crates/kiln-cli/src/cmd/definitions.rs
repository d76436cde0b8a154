//! `kiln --definitions`

use std::process::ExitCode;

use anyhow::{Context, Result};
use kiln_core::Settings;
use kiln_schema::Definition;

/// Print the built-in definition names, one per line, sorted.
pub fn definitions() -> Result<ExitCode> {
    let settings = Settings::load().context("Failed to load settings")?;
    let dir = settings
        .definitions_dir
        .context("No definitions directory configured (set KILN_DEFINITIONS)")?;

    for name in Definition::list(&dir) {
        println!("{name}");
    }
    Ok(ExitCode::SUCCESS)
}
