//! Terminal output

mod console;

pub use console::{ColorScheme, ConsoleReporter};
