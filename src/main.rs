mod cli;
mod commands;
mod output;

use clap::{CommandFactory, Parser};
use cli::{Cli, Commands};
use myfleet::confirm::{AssumeYes, Confirm, TerminalConfirm};
use myfleet::{Error as FleetError, ErrorKind, LifecycleController, Settings};
use output::UserOutput;
use std::sync::Arc;

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        let code = match e.downcast_ref::<FleetError>() {
            Some(fleet_error) => {
                output::CliOutput.error(&format!("Error: {}", fleet_error));
                if let Some(suggestion) = fleet_error.suggestion() {
                    eprintln!("\nHint: {}", suggestion);
                }
                fleet_error.exit_code()
            }
            None => {
                output::CliOutput.error(&format!("Error: {:#}", e));
                ErrorKind::Fatal.exit_code()
            }
        };
        std::process::exit(code);
    }
}

async fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose)?;

    if let Commands::Completions { shell } = &cli.command {
        let mut cmd = Cli::command();
        let bin_name = cmd.get_name().to_string();
        clap_complete::generate(*shell, &mut cmd, bin_name, &mut std::io::stdout());
        return Ok(());
    }

    // ── Settings and controller ─────────────────────────────────────
    let settings = match &cli.root {
        Some(root) => Settings::rooted(root),
        None => Settings::load(cli.config.as_deref())?,
    };
    let confirm: Arc<dyn Confirm> = if cli.yes {
        Arc::new(AssumeYes)
    } else {
        Arc::new(TerminalConfirm::default())
    };
    let controller = LifecycleController::builder(settings)
        .confirm(confirm)
        .build()?;

    let out = output::CliOutput;
    let result = match cli.command {
        Commands::Init {
            name,
            port,
            mysql_version,
        } => commands::run_init(&controller, name, port, mysql_version, &out).await,
        Commands::List { json } => commands::run_list(&controller, json, &out),
        Commands::Start { name } => commands::run_start(&controller, &name, &out).await,
        Commands::Stop { name } => commands::run_stop(&controller, &name, &out).await,
        Commands::Restart { name } => commands::run_restart(&controller, &name, &out).await,
        Commands::Status { name, json } => {
            commands::run_status(&controller, &name, json, &out).await
        }
        Commands::Remove { name, keep_data } => {
            commands::run_remove(&controller, &name, keep_data, &out).await
        }
        Commands::Set { name, key, value } => {
            commands::run_set(&controller, &name, &key, &value, &out).await
        }
        Commands::Show { name, key, live } => {
            commands::run_show(&controller, &name, key.as_deref(), live, &out).await
        }
        Commands::Backup { name, output } => {
            commands::run_backup(&controller, &name, output.as_deref(), &out).await
        }
        Commands::Backups { name, dir } => {
            commands::run_backups(&controller, &name, dir.as_deref(), &out)
        }
        Commands::Restore { name, artifact } => {
            commands::run_restore(&controller, &name, &artifact, &out).await
        }
        Commands::Upgrade {
            name,
            target,
            no_backup,
            allow_cross_major,
            backup_dir,
            dry_run,
        } => {
            let options = commands::UpgradeOptions {
                target,
                no_backup,
                allow_cross_major,
                backup_dir,
                dry_run,
            };
            commands::run_upgrade(&controller, &name, options, &out).await
        }
        Commands::Install { line } => commands::run_install(&controller, &line, &out).await,
        Commands::ListAvailable { line } => {
            commands::run_list_available(&controller, &line, &out).await
        }
        Commands::SuggestPort => commands::run_suggest_port(&controller, &out),
        Commands::Completions { .. } => Ok(()),
    };

    controller.close();
    result
}

fn init_tracing(verbose: bool) -> anyhow::Result<()> {
    let default_level = if verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    Ok(())
}
