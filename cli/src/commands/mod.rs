pub mod backup;
pub mod cleanup;
pub mod health;
pub mod list;
pub mod restore;

use anyhow::{Context, Result, anyhow};
use dumpvault_core::Config;
use dumpvault_engine::Orchestrator;
use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;
use tracing::info;

/// Loads the configuration file and applies secrets from the command line
/// or environment. Prompts for the encryption key when one is required.
pub async fn load_config(cli: &crate::Cli) -> Result<Config> {
    let path = cli
        .config
        .clone()
        .or_else(Config::default_path)
        .ok_or_else(|| anyhow!("No configuration file (--config or DUMPVAULT_CONFIG)"))?;

    info!("Loading configuration from {}", path.display());
    let mut config = Config::load(&path)
        .await
        .with_context(|| format!("Failed to load {}", path.display()))?;

    if let Some(password) = &cli.db_password {
        config.database.password = Some(password.clone());
    }
    if let Some(key) = &cli.encryption_key {
        config.encryption.key = Some(key.clone());
    }
    if config.encryption.enabled && config.encryption.key.as_deref().is_none_or(str::is_empty) {
        let key = rpassword::prompt_password("Enter encryption key: ").context("Encryption key required")?;
        config.encryption.key = Some(key);
    }

    config.validate()?;
    Ok(config)
}

pub async fn orchestrator(cli: &crate::Cli) -> Result<Orchestrator> {
    let config = load_config(cli).await?;
    Ok(Orchestrator::from_config(config).await?)
}

pub fn spinner(message: impl Into<String>, quiet: bool) -> ProgressBar {
    if quiet {
        return ProgressBar::hidden();
    }
    let pb = ProgressBar::new_spinner();
    if let Ok(style) = ProgressStyle::default_spinner().template("{spinner:.green} [{elapsed_precise}] {msg}") {
        pb.set_style(style);
    }
    pb.set_message(message.into());
    pb.enable_steady_tick(Duration::from_millis(120));
    pb
}

pub fn check_format(format: &str) -> Result<()> {
    match format {
        "table" | "json" => Ok(()),
        other => Err(anyhow!("Unsupported format: {}", other)),
    }
}

pub fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

pub fn format_size(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];
    let mut size = bytes as f64;
    let mut unit = 0;
    while size >= 1024.0 && unit < UNITS.len() - 1 {
        size /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{} {}", bytes, UNITS[0])
    } else {
        format!("{:.1} {}", size, UNITS[unit])
    }
}
