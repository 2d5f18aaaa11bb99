mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};
use commands::{
    backup::BackupCommand, cleanup::CleanupCommand, health::HealthCommand, list::ListCommand,
    restore::RestoreCommand,
};
use std::path::PathBuf;
use tracing::debug;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[derive(Parser)]
#[command(
    name = "dumpvault",
    version,
    about = "Database backup orchestration and retention",
    long_about = "Dumpvault dumps a PostgreSQL database, compresses and encrypts the dump, \
                  replicates it to several storages and prunes old backups by retention tier"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    #[arg(long, short, env = "DUMPVAULT_CONFIG", help = "Configuration file")]
    config: Option<PathBuf>,

    #[arg(long, env = "DUMPVAULT_DB_PASSWORD", hide_env_values = true, help = "Database password")]
    db_password: Option<String>,

    #[arg(long, env = "DUMPVAULT_ENCRYPTION_KEY", hide_env_values = true, help = "Encryption key")]
    encryption_key: Option<String>,

    #[arg(short, long, help = "Enable verbose output")]
    verbose: bool,

    #[arg(short, long, help = "Enable quiet mode")]
    quiet: bool,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Run a backup")]
    Backup(BackupCommand),

    #[command(about = "Delete backups outside the retention policy")]
    Cleanup(CleanupCommand),

    #[command(about = "Check storages and backup freshness")]
    Health(HealthCommand),

    #[command(about = "Restore a backup from the primary storage")]
    Restore(RestoreCommand),

    #[command(about = "List backups on the primary storage")]
    List(ListCommand),
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_tracing(cli.verbose, cli.quiet)?;

    debug!("Starting dumpvault {}", env!("CARGO_PKG_VERSION"));

    match cli.command {
        Commands::Backup(ref cmd) => cmd.run(&cli).await,
        Commands::Cleanup(ref cmd) => cmd.run(&cli).await,
        Commands::Health(ref cmd) => cmd.run(&cli).await,
        Commands::Restore(ref cmd) => cmd.run(&cli).await,
        Commands::List(ref cmd) => cmd.run(&cli).await,
    }
}

fn init_tracing(verbose: bool, quiet: bool) -> Result<()> {
    let level = if quiet {
        "warn"
    } else if verbose {
        "debug"
    } else {
        "info"
    };

    let subscriber = FmtSubscriber::builder()
        .with_env_filter(EnvFilter::new(format!("dumpvault={}", level)))
        .with_writer(std::io::stderr)
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .map_err(|e| anyhow::anyhow!("Setting default subscriber failed: {}", e))
}
