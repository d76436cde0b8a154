//! Command implementations

pub mod definitions;
pub mod install;
