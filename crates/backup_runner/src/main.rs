use backup_runner::services::generator::ArtifactGenerator;
use backup_runner::services::provider::ConfigProvider;
use backup_runner::{
    config, BackupScheduler, FileTimestampStore, HttpConfigProvider, S3ArtifactGenerator,
};
use clap::{Parser, Subcommand};
use std::sync::Arc;
use tracing::{error, info, warn};

#[derive(Parser)]
#[command(name = "backup_runner", about = "Scheduled site backups to object storage")]
struct Cli {
    /// Path to the configuration file.
    #[arg(long, env = "BACKUP_CONFIG")]
    config: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the scheduled backups, then remove expired backup groups.
    Cron,
    /// Generate one custom backup kept for the given number of days.
    Custom {
        #[arg(long)]
        days: u32,
    },
    /// Verify storage reachability and local filesystem access.
    SelfTest,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::filter::EnvFilter::from_default_env())
        .json()
        .init();

    let cli = Cli::parse();

    let config = config::Config::load(cli.config.as_deref()).map_err(|e| {
        error!("Failed to load config: {}", e);
        e
    })?;

    let provider = Arc::new(HttpConfigProvider::new(config.control_plane.clone()));

    // The storage client is built from the fetched credentials, so the
    // control plane is consulted before any command runs.
    let details = provider.backup_details().await?;
    let generator = Arc::new(S3ArtifactGenerator::new(&config, &details)?);
    let timestamps = Arc::new(FileTimestampStore::new(config.state.path.clone()));

    let scheduler = BackupScheduler::new(
        provider,
        timestamps,
        generator.clone(),
        config.control_plane.clone(),
    );

    match cli.command {
        Command::Cron => {
            if !config.backup.enable_backups {
                warn!("Backups are disabled, skipping the scheduled run");
                return Ok(());
            }

            scheduler.initialize().await?;
            scheduler.run_scheduled_backups().await?;
            scheduler.sweep_expired().await?;
            info!("Backup cron finished");
        }
        Command::Custom { days } => {
            scheduler.initialize().await?;
            scheduler.run_custom_backup(days).await?;
        }
        Command::SelfTest => {
            scheduler.initialize().await?;
            generator.self_test().await?;
            info!("Self test passed");
        }
    }

    Ok(())
}
