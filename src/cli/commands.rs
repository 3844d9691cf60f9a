//! CLI command definitions.
//!
//! This module defines all CLI commands and their arguments using clap.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::tower::PowerState;

/// towerctl - Declarative CloudTower VM reconciler.
#[derive(Parser, Debug)]
#[command(name = "towerctl")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Path to the configuration file.
    #[arg(short, long, global = true, env = "TOWERCTL_CONFIG")]
    pub config: Option<PathBuf>,

    /// Enable verbose output.
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Output format (text, json).
    #[arg(long, global = true, default_value = "text")]
    pub output: OutputFormat,

    /// Log format (text, json).
    #[arg(long, global = true, default_value = "text")]
    pub log_format: OutputFormat,

    /// Overall deadline for the command, in seconds.
    #[arg(long, global = true)]
    pub timeout_secs: Option<u64>,

    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,
}

/// Available CLI commands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Validate the configuration without contacting the control plane.
    Validate {
        /// Show all warnings, not just errors.
        #[arg(short, long)]
        warnings: bool,
    },

    /// Compute and display the update plan.
    Plan {
        /// Show the reason of every action.
        #[arg(short, long)]
        detailed: bool,
    },

    /// Apply the update plan.
    Apply {
        /// Skip confirmation prompt.
        #[arg(short, long)]
        yes: bool,
    },

    /// Power the VM off and delete it.
    Destroy {
        /// Skip confirmation prompt.
        #[arg(short, long)]
        yes: bool,
    },

    /// Show the observed VM.
    Status,

    /// Change the power state of the VM.
    Power {
        /// Desired power state.
        #[arg(value_parser = parse_power_state)]
        state: PowerState,

        /// Hard power off instead of a guest shutdown.
        #[arg(short, long)]
        force: bool,

        /// Host to start the VM on.
        #[arg(long)]
        host_id: Option<String>,
    },

    /// Wait for remote tasks to finish.
    WaitTasks {
        /// Task ids.
        #[arg(required = true)]
        task_ids: Vec<String>,
    },

    /// Manage the local state.
    State {
        /// State subcommand.
        #[command(subcommand)]
        command: StateCommands,
    },
}

/// State management subcommands.
#[derive(Subcommand, Debug)]
pub enum StateCommands {
    /// Show current state.
    Show,

    /// Unlock the state.
    Unlock {
        /// Lock ID to unlock.
        #[arg(long)]
        lock_id: Option<String>,
    },
}

/// Output format options.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text output.
    #[default]
    Text,
    /// JSON output for scripting.
    Json,
}

impl Cli {
    /// Parses CLI arguments from the command line.
    #[must_use]
    pub fn parse_args() -> Self {
        Self::parse()
    }
}

fn parse_power_state(s: &str) -> Result<PowerState, String> {
    s.parse()
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_is_well_formed() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_power_command() {
        let cli = Cli::try_parse_from(["towerctl", "power", "stopped", "--force"])
            .expect("valid args");

        assert!(matches!(
            cli.command,
            Commands::Power {
                state: PowerState::Stopped,
                force: true,
                host_id: None
            }
        ));
    }

    #[test]
    fn test_destroy_command() {
        let cli = Cli::try_parse_from(["towerctl", "destroy", "--yes"]).expect("valid args");

        assert!(matches!(cli.command, Commands::Destroy { yes: true }));
    }

    #[test]
    fn test_wait_tasks_requires_ids() {
        assert!(Cli::try_parse_from(["towerctl", "wait-tasks"]).is_err());

        let cli = Cli::try_parse_from(["towerctl", "--output", "json", "wait-tasks", "t1", "t2"])
            .expect("valid args");
        assert_eq!(cli.output, OutputFormat::Json);
        assert!(matches!(cli.command, Commands::WaitTasks { ref task_ids } if task_ids.len() == 2));
    }
}
