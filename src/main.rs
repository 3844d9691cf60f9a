//! towerctl CLI entrypoint.
//!
//! This is the main entrypoint for the towerctl command-line tool.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use tower_vm_reconcile::cli::{Cli, Commands, OutputFormat, OutputFormatter, StateCommands};
use tower_vm_reconcile::config::{
    find_config_file, ConfigParser, ConfigValidator, ReconcileConfig,
};
use tower_vm_reconcile::context::Context;
use tower_vm_reconcile::error::{ConfigError, Result};
use tower_vm_reconcile::reconciler::VmReconciler;
use tower_vm_reconcile::state::{LocalStateStore, StateStore};
use tower_vm_reconcile::tower::{ControlPlane, PowerState, TowerClient};

use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

/// Main entrypoint.
fn main() -> ExitCode {
    let cli = Cli::parse_args();

    init_logging(cli.verbose, cli.log_format);

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("Failed to create async runtime: {e}");
            return ExitCode::FAILURE;
        }
    };

    let formatter = OutputFormatter::new(cli.output);
    match runtime.block_on(run(cli, &formatter)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{}", formatter.format_error(&format!("[{}] {e}", e.phase())));
            ExitCode::FAILURE
        }
    }
}

/// Initializes the logging system. `RUST_LOG` wins over `--verbose`.
fn init_logging(verbose: bool, format: OutputFormat) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);
    match format {
        OutputFormat::Json => builder.json().init(),
        OutputFormat::Text => builder.init(),
    }
}

/// Main async entry point.
async fn run(cli: Cli, formatter: &OutputFormatter) -> Result<()> {
    let ctx = cli
        .timeout_secs
        .map_or_else(Context::background, |secs| {
            Context::background().with_timeout(Duration::from_secs(secs))
        });
    let config_path = cli.config.as_ref();

    match cli.command {
        Commands::Validate { warnings } => cmd_validate(config_path, warnings, formatter),
        Commands::Plan { detailed } => cmd_plan(&ctx, config_path, detailed, formatter).await,
        Commands::Apply { yes } => cmd_apply(&ctx, config_path, yes, formatter).await,
        Commands::Destroy { yes } => cmd_destroy(&ctx, config_path, yes, formatter).await,
        Commands::Status => cmd_status(&ctx, config_path, formatter).await,
        Commands::Power {
            state,
            force,
            host_id,
        } => cmd_power(&ctx, config_path, state, force, host_id.as_deref(), formatter).await,
        Commands::WaitTasks { task_ids } => {
            cmd_wait_tasks(&ctx, config_path, &task_ids, formatter).await
        }
        Commands::State { command } => cmd_state(config_path, command, formatter).await,
    }
}

/// Validate configuration.
fn cmd_validate(
    config_path: Option<&PathBuf>,
    show_warnings: bool,
    formatter: &OutputFormatter,
) -> Result<()> {
    let config = load_config(config_path)?;

    let validator = ConfigValidator::new();
    let result = validator.check(&config);
    println!("{}", formatter.format_validation(&result, show_warnings));
    if !result.is_valid() {
        validator.validate(&config)?;
    }
    Ok(())
}

/// Show the update plan.
async fn cmd_plan(
    ctx: &Context,
    config_path: Option<&PathBuf>,
    detailed: bool,
    formatter: &OutputFormatter,
) -> Result<()> {
    let (config, reconciler) = load_reconciler(config_path)?;
    let plan = reconciler.plan(ctx, &config.vm).await?;
    println!("{}", formatter.format_plan(&plan, detailed));
    Ok(())
}

/// Apply the update plan.
async fn cmd_apply(
    ctx: &Context,
    config_path: Option<&PathBuf>,
    auto_approve: bool,
    formatter: &OutputFormatter,
) -> Result<()> {
    let (config, reconciler) = load_reconciler(config_path)?;

    let plan = reconciler.plan(ctx, &config.vm).await?;
    if plan.is_empty() {
        println!("{}", formatter.format_plan(&plan, false));
        return Ok(());
    }

    if !auto_approve {
        eprintln!("{}", formatter.format_plan(&plan, false));
        eprint!("\nDo you want to apply these changes? [y/N] ");
        std::io::stderr().flush()?;

        let mut input = String::new();
        std::io::stdin().read_line(&mut input)?;

        if !input.trim().eq_ignore_ascii_case("y") {
            eprintln!("Apply cancelled.");
            return Ok(());
        }
    }

    let result = reconciler.apply(ctx, &config.vm).await?;
    println!("{}", formatter.format_reconciliation(&result));
    Ok(())
}

/// Power the VM off and delete it.
async fn cmd_destroy(
    ctx: &Context,
    config_path: Option<&PathBuf>,
    auto_approve: bool,
    formatter: &OutputFormatter,
) -> Result<()> {
    let (config, reconciler) = load_reconciler(config_path)?;

    if !auto_approve {
        let name = config.vm.state_key().unwrap_or("<unnamed>");
        eprint!("Destroy vm {name} and its volumes? [y/N] ");
        std::io::stderr().flush()?;

        let mut input = String::new();
        std::io::stdin().read_line(&mut input)?;

        if !input.trim().eq_ignore_ascii_case("y") {
            eprintln!("Destroy cancelled.");
            return Ok(());
        }
    }

    let message = match reconciler.destroy(ctx, &config.vm).await? {
        Some(vm_id) => format!("vm {vm_id} destroyed"),
        None => String::from("No vm to destroy."),
    };
    println!("{}", formatter.format_message(&message));
    Ok(())
}

/// Show the observed VM.
async fn cmd_status(
    ctx: &Context,
    config_path: Option<&PathBuf>,
    formatter: &OutputFormatter,
) -> Result<()> {
    let (config, reconciler) = load_reconciler(config_path)?;
    let vm_id = reconciler.vm_id(&config.vm).await?;
    let observed = reconciler.status(ctx, &vm_id).await?;
    println!("{}", formatter.format_vm(&observed));
    Ok(())
}

/// Change the power state.
async fn cmd_power(
    ctx: &Context,
    config_path: Option<&PathBuf>,
    desired: PowerState,
    force: bool,
    host_id: Option<&str>,
    formatter: &OutputFormatter,
) -> Result<()> {
    let (config, reconciler) = load_reconciler(config_path)?;
    let host_id = host_id.or(config.vm.host_id.as_deref());
    let vm_id = reconciler.vm_id(&config.vm).await?;
    reconciler
        .power(ctx, &vm_id, desired, force, host_id)
        .await?;
    println!(
        "{}",
        formatter.format_message(&format!("vm {vm_id} is {desired}"))
    );
    Ok(())
}

/// Wait for remote tasks.
async fn cmd_wait_tasks(
    ctx: &Context,
    config_path: Option<&PathBuf>,
    task_ids: &[String],
    formatter: &OutputFormatter,
) -> Result<()> {
    let (_, reconciler) = load_reconciler(config_path)?;
    reconciler.wait_tasks(ctx, task_ids).await?;
    println!(
        "{}",
        formatter.format_message(&format!("{} task(s) succeeded", task_ids.len()))
    );
    Ok(())
}

/// Manage state.
async fn cmd_state(
    config_path: Option<&PathBuf>,
    command: StateCommands,
    formatter: &OutputFormatter,
) -> Result<()> {
    let config = load_config(config_path)?;
    let store = state_store(&config);
    let key = config.vm.state_key().ok_or_else(|| {
        ConfigError::validation("either vm.id or vm.name must be set", "vm.id")
    })?;

    match command {
        StateCommands::Show => match store.load(key).await? {
            Some(state) => println!("{}", formatter.format_state(&state)),
            None => println!("{}", formatter.format_message("No state recorded yet.")),
        },
        StateCommands::Unlock { lock_id } => {
            let Some(lock) = store.lock_info(key).await? else {
                println!("{}", formatter.format_message("State is not locked."));
                return Ok(());
            };
            let lock_id = lock_id.unwrap_or(lock.lock_id);
            store.release_lock(key, &lock_id).await?;
            println!(
                "{}",
                formatter.format_message(&format!("Released lock held by {}", lock.holder))
            );
        }
    }
    Ok(())
}

/// Resolves the configuration file path.
fn resolve_config_path(config_path: Option<&PathBuf>) -> Result<PathBuf> {
    config_path.map_or_else(|| find_config_file("."), |path| Ok(path.clone()))
}

/// Loads `.env` next to the configuration, then the configuration itself.
fn load_config(config_path: Option<&PathBuf>) -> Result<ReconcileConfig> {
    let config_file = resolve_config_path(config_path)?;
    debug!("Loading configuration from: {}", config_file.display());

    let parser = ConfigParser::new().with_base_path(
        config_file
            .parent()
            .unwrap_or_else(|| Path::new(".")),
    );
    parser.load_dotenv()?;
    parser.load_with_env(&config_file)
}

fn state_store(config: &ReconcileConfig) -> LocalStateStore {
    LocalStateStore::new(config.state.dir_or_default())
}

/// Loads and validates the configuration, then wires the reconciler.
fn load_reconciler(
    config_path: Option<&PathBuf>,
) -> Result<(ReconcileConfig, VmReconciler<LocalStateStore>)> {
    let config = load_config(config_path)?;
    let result = ConfigValidator::new().validate(&config)?;
    for warning in &result.warnings {
        tracing::warn!("{warning}");
    }

    let token = ConfigParser::api_token(&config)?;
    let client = TowerClient::with_timeout(
        &config.tower.endpoint,
        &token,
        config.tower.request_timeout_secs,
    )?;
    info!("Using control plane at {}", config.tower.endpoint);

    let api: Arc<dyn ControlPlane> = Arc::new(client);
    let reconciler = VmReconciler::new(api, state_store(&config), &config.tower);
    Ok((config, reconciler))
}
