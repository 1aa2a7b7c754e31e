//! CLI command implementations

pub mod call;
pub mod config;
pub mod serve;
pub mod version;

use crate::common::error::Result;

/// Common result type for all command operations
pub type CommandResult = Result<()>;
