//! Console reporter
//!
//! Progress goes to stderr so stdout carries only the final result line.

use std::path::Path;

use crossterm::style::{Color, Stylize};
use kiln_core::Reporter;
use kiln_schema::PackageName;

/// Colors for the status words.
#[derive(Debug, Clone)]
pub struct ColorScheme {
    /// Download and build progress
    pub active: Color,
    /// Completed steps
    pub success: Color,
    /// Skips and warnings
    pub warning: Color,
    /// Failures
    pub error: Color,
    /// URLs and paths
    pub secondary: Color,
}

impl Default for ColorScheme {
    fn default() -> Self {
        Self {
            active: Color::Cyan,
            success: Color::Green,
            warning: Color::Yellow,
            error: Color::Red,
            secondary: Color::DarkGrey,
        }
    }
}

/// [`Reporter`] that prints one line per event.
#[derive(Debug, Clone, Default)]
pub struct ConsoleReporter {
    colors: ColorScheme,
}

impl ConsoleReporter {
    /// Reporter with the default colors.
    pub fn new() -> Self {
        Self::default()
    }

    /// Print the final success line to stdout.
    pub fn success(&self, msg: &str) {
        println!("{}", msg.with(self.colors.success));
    }

    /// Print a secondary note to stderr.
    pub fn note(&self, msg: &str) {
        eprintln!("{}", msg.with(self.colors.secondary));
    }

    fn status(&self, word: &str, color: Color, rest: &str) {
        eprintln!("{} {rest}", format!("{word:>11}").with(color).bold());
    }
}

impl Reporter for ConsoleReporter {
    fn downloading(&self, name: &PackageName, url: &str) {
        self.status(
            "Downloading",
            self.colors.active,
            &format!("{name} {}", url.with(self.colors.secondary)),
        );
    }

    fn installing(&self, name: &PackageName) {
        self.status("Installing", self.colors.active, &format!("{name}..."));
    }

    fn installed(&self, name: &PackageName, prefix: &Path) {
        self.status(
            "Installed",
            self.colors.success,
            &format!("{name} to {}", prefix.display()),
        );
    }

    fn skipped(&self, name: &PackageName, reason: &str) {
        self.status("Skipping", self.colors.warning, &format!("{name} ({reason})"));
    }

    fn info(&self, msg: &str) {
        eprintln!("{msg}");
    }

    fn warning(&self, msg: &str) {
        eprintln!("{} {msg}", "warning:".with(self.colors.warning).bold());
    }

    fn error(&self, msg: &str) {
        eprintln!("{} {msg}", "error:".with(self.colors.error).bold());
    }
}
