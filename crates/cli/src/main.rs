use crate::{
    commands::Commands,
    env::EnvManager,
    error::CliError,
    shutdown::{ExitCode, ShutdownCoordinator},
};
use clap::Parser;
use connectors::source::SplitHint;
use engine_config::config::MigrationConfig;
use engine_runtime::{
    coordinator::MigrationCoordinator, error::MigrationError, factory, planner::plan_split_size,
};
use model::migration::status::PartitionStatus;
use std::{process, sync::Arc};
use tokio_util::sync::CancellationToken;
use tracing::{Level, error, info};

mod commands;
mod env;
mod error;
mod shutdown;

#[derive(Parser)]
#[command(
    name = "caravan",
    version = "0.1.0",
    about = "Cassandra/MongoDB to YugabyteDB table migrator"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt().with_max_level(Level::INFO).init();

    let exit_code = match run_cli().await {
        Ok(code) => code,
        Err(CliError::ShutdownRequested) => {
            info!("Stopped on shutdown request; checkpoint state is saved for resume");
            ExitCode::ShutdownRequested
        }
        Err(err) => {
            error!("{err}");
            ExitCode::GeneralError
        }
    };

    process::exit(exit_code.as_i32());
}

async fn run_cli() -> Result<ExitCode, CliError> {
    let cli = Cli::parse();
    let cancel = CancellationToken::new();
    ShutdownCoordinator::new(cancel.clone()).register_handlers();

    match cli.command {
        Commands::Migrate { config, env_file } => {
            migrate(&config, env_file.as_deref(), cancel).await
        }
        Commands::Plan { config, env_file } => plan(&config, env_file.as_deref()).await,
        Commands::Status {
            config,
            env_file,
            run_id,
        } => status(&config, env_file.as_deref(), run_id).await,
    }
}

/// Environment first, then properties: the env file (if any) overlays the
/// process environment before `${NAME}` references are resolved.
fn load_config(config_path: &str, env_file: Option<&str>) -> Result<Arc<MigrationConfig>, CliError> {
    let mut env = EnvManager::new();
    if let Some(path) = env_file {
        info!("Loading environment variables from: {}", path);
        env.load_from_file(path)?;
    }
    Ok(Arc::new(MigrationConfig::load_with_vars(
        config_path,
        env.vars(),
    )?))
}

async fn migrate(
    config_path: &str,
    env_file: Option<&str>,
    cancel: CancellationToken,
) -> Result<ExitCode, CliError> {
    let config = load_config(config_path, env_file)?;

    let source = factory::create_source(&config).await?;
    let router = factory::create_router(&config)?;
    let checkpoint = factory::create_checkpoint_store(&config, &router).await?;

    let coordinator =
        MigrationCoordinator::new(config, source, router, checkpoint, cancel.clone());

    let result = coordinator.run().await;
    if cancel.is_cancelled() {
        return Err(CliError::ShutdownRequested);
    }

    match result {
        Ok(summary) if summary.succeeded => {
            info!(run_id = summary.run_id, "Migration completed successfully");
            Ok(ExitCode::Success)
        }
        Ok(summary) => {
            error!(
                run_id = summary.run_id,
                partitions_failed = summary.snapshot.partitions_failed,
                "Migration finished with failures; resume with migration.prevRunId={}",
                summary.run_id
            );
            Ok(ExitCode::GeneralError)
        }
        Err(MigrationError::Cancelled) => Err(CliError::ShutdownRequested),
        Err(err) => Err(err.into()),
    }
}

async fn plan(config_path: &str, env_file: Option<&str>) -> Result<ExitCode, CliError> {
    let config = load_config(config_path, env_file)?;
    let source = factory::create_source(&config).await?;

    let estimate = source.estimate().await;
    let split_mb = plan_split_size(&config.split, estimate);
    let partitions = source
        .enumerate_partitions(SplitHint { split_mb })
        .await
        .map_err(MigrationError::from)?;

    println!("Plan for {}.{}:", config.table.source_keyspace, config.table.source_table);
    println!("{:<20} {}", "Table size (bytes)", display_opt(estimate.table_size_bytes));
    println!("{:<20} {}", "Skew ratio", display_opt(estimate.skew_ratio));
    println!("{:<20} {}", "Split size (MB)", split_mb);
    println!("{:<20} {}", "Partitions", partitions.len());
    Ok(ExitCode::Success)
}

async fn status(
    config_path: &str,
    env_file: Option<&str>,
    run_id: i64,
) -> Result<ExitCode, CliError> {
    let config = load_config(config_path, env_file)?;
    let router = factory::create_router(&config)?;
    let checkpoint = factory::create_checkpoint_store(&config, &router).await?;

    let table = format!(
        "{}.{}",
        config.table.source_keyspace, config.table.source_table
    );

    let Some(info) = checkpoint.load_run_info(&table, run_id).await? else {
        println!("No run {run_id} recorded for table '{table}'");
        return Ok(ExitCode::GeneralError);
    };

    println!("Run {run_id} for table '{table}':");
    println!("{:<16} {}", "Status", info.status);
    println!("{:<16} {}", "Type", info.run_type);
    println!("{:<16} {}", "Previous run", info.prev_run_id);
    println!("{:<16} {}", "Started", info.start_time.to_rfc3339());
    if let Some(end) = info.end_time {
        println!("{:<16} {}", "Ended", end.to_rfc3339());
    }
    if let Some(summary) = &info.run_info {
        println!("{:<16} {}", "Summary", summary);
    }

    let details = checkpoint.run_details(&table, run_id).await?;
    let tally = |status: PartitionStatus| {
        details
            .iter()
            .filter(|detail| detail.status == status)
            .count()
    };
    println!("-----------------------------");
    println!("{:<16} {}", "Partitions", details.len());
    println!("{:<16} {}", "PASS", tally(PartitionStatus::Pass));
    println!("{:<16} {}", "FAIL", tally(PartitionStatus::Fail));
    println!("{:<16} {}", "STARTED", tally(PartitionStatus::Started));
    println!("{:<16} {}", "NOT_STARTED", tally(PartitionStatus::NotStarted));

    for detail in details.iter().filter(|d| d.status == PartitionStatus::Fail) {
        println!(
            "  partition {} FAIL: {}",
            detail.partition_id,
            detail.run_info.as_deref().unwrap_or("(no detail)")
        );
    }
    Ok(ExitCode::Success)
}

fn display_opt<T: std::fmt::Display>(value: Option<T>) -> String {
    value.map_or_else(|| "unknown".to_string(), |v| v.to_string())
}
