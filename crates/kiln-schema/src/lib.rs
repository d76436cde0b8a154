//! Shared types and the definition format for kiln.
//!
//! Everything in this crate is plain data: a [`Definition`] is parsed once from
//! TOML and never mutated afterwards. The pipeline that acts on it lives in
//! `kiln-core`.

pub mod definition;
pub mod source;
pub mod types;

// Re-exports
pub use definition::{ConditionalArg, Definition, DefinitionError, PackageSpec};
pub use source::{Locator, SourceKind};
pub use types::{Checksum, PackageName};

/// Strategy used when a package directive does not name any.
pub const DEFAULT_STRATEGY: &str = "standard";
