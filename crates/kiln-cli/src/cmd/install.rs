//! `kiln <definition> <prefix>`

use std::fs;
use std::io::{IsTerminal, Write};
use std::path::Path;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use crossterm::style::Stylize;
use kiln_core::io::follow::LogFollower;
use kiln_core::{InstallError, Interpreter, Outcome, Settings};
use kiln_schema::Definition;

use crate::Cli;
use crate::ui::ConsoleReporter;

/// Install the definition named on the command line into its prefix.
pub async fn install(cli: &Cli) -> Result<ExitCode> {
    let (Some(definition), Some(prefix)) = (&cli.definition, &cli.prefix) else {
        anyhow::bail!("usage: kiln [-k|--keep] [-v|--verbose] [-f|--force] <definition> <prefix>");
    };

    let mut settings = Settings::load().context("Failed to load settings")?;
    settings.keep_build_tree |= cli.keep;
    settings.verbose |= cli.verbose;
    let verbose = settings.verbose;

    let path = Definition::locate(definition, settings.definitions_dir.as_deref())?;
    let def = Definition::from_file(&path)?;
    let version_name = version_name(&path);
    let prefix = std::path::absolute(prefix)
        .with_context(|| format!("Invalid prefix {}", prefix.display()))?;

    if !cli.force && !confirm_overwrite(&prefix)? {
        return Err(InstallError::Declined(prefix).into());
    }

    let reporter = Arc::new(ConsoleReporter::new());
    let mut interpreter = Interpreter::new(settings, reporter.clone());
    interpreter.load_hooks()?;

    let tx = interpreter.prepare(&def, &version_name, &prefix)?;
    let follower = verbose.then(|| LogFollower::spawn(tx.context().log_path.clone()));

    let outcome = tokio::task::spawn_blocking(move || interpreter.run(&def, tx))
        .await
        .context("Installer task panicked")?;

    if let Some(follower) = follower {
        follower.stop().await;
    }

    match &outcome {
        Outcome::Committed(installed) => {
            reporter.success(&format!(
                "Installed {} to {}",
                installed.version_name,
                installed.prefix.display()
            ));
            if let Some((build_path, log_path)) = &installed.kept {
                reporter.note(&format!("Build tree kept at {}", build_path.display()));
                reporter.note(&format!("Build log kept at {}", log_path.display()));
            }
        }
        Outcome::Failed(failure) => {
            eprintln!();
            eprint!("{}", failure.summary());
        }
    }
    Ok(ExitCode::from(outcome.exit_code()))
}

/// Version name for a definition file: its file name without `.toml`.
fn version_name(path: &Path) -> String {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    name.strip_suffix(".toml").map(str::to_string).unwrap_or(name)
}

/// Ask before installing over a non-empty prefix. A non-interactive stdin
/// counts as "no".
fn confirm_overwrite(prefix: &Path) -> Result<bool> {
    let occupied = fs::read_dir(prefix).is_ok_and(|mut entries| entries.next().is_some());
    if !occupied {
        return Ok(true);
    }
    if !std::io::stdin().is_terminal() {
        eprintln!(
            "{} {} already exists; pass --force to install over it",
            "warning:".yellow().bold(),
            prefix.display()
        );
        return Ok(false);
    }

    eprint!(
        "  {} {} already exists. Continue with installation? (y/N) ",
        "WARNING:".bold().yellow(),
        prefix.display()
    );
    std::io::stderr().flush()?;

    let mut input = String::new();
    std::io::stdin().read_line(&mut input)?;
    Ok(input.trim().eq_ignore_ascii_case("y"))
}
