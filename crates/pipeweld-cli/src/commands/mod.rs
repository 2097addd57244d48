//! CLI subcommand implementations.

pub mod compose;
pub mod validate;
