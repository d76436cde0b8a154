//! IO modules - side effects (filesystem, build log)

pub mod extract;
pub mod follow;
pub mod log;

pub use log::BuildLog;
