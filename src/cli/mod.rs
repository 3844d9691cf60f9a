//! CLI module for towerctl.
//!
//! This module provides the command-line interface for reconciling
//! CloudTower VMs.

mod commands;
mod output;

pub use commands::{Cli, Commands, OutputFormat, StateCommands};
pub use output::OutputFormatter;
