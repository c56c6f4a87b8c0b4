//! CLI subcommand implementations.

pub mod cleanup;
pub mod limits;
pub mod replay;
pub mod report;
pub mod status;
