//! Reporter trait for dependency injection
//!
//! The pipeline reports progress through this trait without being coupled
//! to a terminal. Tool output never goes through here; it goes to the build
//! log.

use std::path::Path;

use kiln_schema::PackageName;

/// Progress sink for the install pipeline.
pub trait Reporter: Send + Sync {
    /// A download of `url` for `name` is starting.
    fn downloading(&self, name: &PackageName, url: &str);

    /// `name` is being built and installed.
    fn installing(&self, name: &PackageName);

    /// `name` was installed into `prefix`.
    fn installed(&self, name: &PackageName, prefix: &Path);

    /// `name` was skipped, e.g. because its predicate failed.
    fn skipped(&self, name: &PackageName, reason: &str);

    /// Log an informational message.
    fn info(&self, msg: &str);

    /// Log a warning message.
    fn warning(&self, msg: &str);

    /// Log an error message.
    fn error(&self, msg: &str);
}

impl<T: Reporter + ?Sized> Reporter for std::sync::Arc<T> {
    fn downloading(&self, name: &PackageName, url: &str) {
        (**self).downloading(name, url);
    }
    fn installing(&self, name: &PackageName) {
        (**self).installing(name);
    }
    fn installed(&self, name: &PackageName, prefix: &Path) {
        (**self).installed(name, prefix);
    }
    fn skipped(&self, name: &PackageName, reason: &str) {
        (**self).skipped(name, reason);
    }
    fn info(&self, msg: &str) {
        (**self).info(msg);
    }
    fn warning(&self, msg: &str) {
        (**self).warning(msg);
    }
    fn error(&self, msg: &str) {
        (**self).error(msg);
    }
}

/// Reporter that discards everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullReporter;

impl Reporter for NullReporter {
    fn downloading(&self, _name: &PackageName, _url: &str) {}
    fn installing(&self, _name: &PackageName) {}
    fn installed(&self, _name: &PackageName, _prefix: &Path) {}
    fn skipped(&self, _name: &PackageName, _reason: &str) {}
    fn info(&self, _msg: &str) {}
    fn warning(&self, _msg: &str) {}
    fn error(&self, _msg: &str) {}
}
