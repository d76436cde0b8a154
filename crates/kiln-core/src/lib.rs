//! Core library for kiln: the package installation pipeline.
//!
//! A [`Definition`](kiln_schema::Definition) is handed to the
//! [`Interpreter`], which opens one [`Transaction`] for the whole run and, for
//! each package directive in order, fetches the source ([`fetch`]), dispatches
//! the named build strategies ([`builder`]) and installs into the prefix.
//! [`hooks`] bracket the run. Any error aborts the remaining packages and is
//! handled once, by the transaction.

pub mod builder;
pub mod cache;
pub mod checksum;
pub mod error;
pub mod fetch;
pub mod hooks;
pub mod interpreter;
pub mod io;
pub mod options;
pub mod paths;
pub mod reporter;
pub mod settings;
pub mod strategies;
pub mod transaction;

pub use error::InstallError;
pub use interpreter::Interpreter;
pub use reporter::{NullReporter, Reporter};
pub use settings::Settings;
pub use transaction::{Failure, InstallContext, Outcome, Transaction};

/// Prefix used for build workspaces and log files under the temp root.
pub const WORKSPACE_PREFIX: &str = "kiln";
