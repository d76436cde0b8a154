//! kiln - source build installer CLI

use std::process::ExitCode;

use clap::Parser;
use crossterm::style::Stylize;
use tracing_subscriber::EnvFilter;

use kiln_cli::Cli;
use kiln_cli::cmd;

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    // Help and version are not errors; every other argument problem exits 1.
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            let code = u8::from(e.use_stderr());
            let _ = e.print();
            return ExitCode::from(code);
        }
    };

    let result = if cli.definitions {
        cmd::definitions::definitions()
    } else {
        cmd::install::install(&cli).await
    };

    match result {
        Ok(code) => code,
        Err(e) => {
            eprintln!("{} {e:#}", "error:".red().bold());
            ExitCode::FAILURE
        }
    }
}
