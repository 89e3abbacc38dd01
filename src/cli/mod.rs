//! CLI module for funcsync.
//!
//! This module provides the command-line interface for reconciling a
//! desired-state document against a provider.

mod commands;
mod output;

pub use commands::{Cli, Commands, OutputFormat, ProviderArgs, ProviderKind};
pub use output::OutputFormatter;
