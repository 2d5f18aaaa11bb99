use super::{check_format, format_size, orchestrator, print_json, spinner};
use anyhow::{Result, anyhow, bail};
use clap::Args;
use dumpvault_core::BackupResult;

#[derive(Args)]
pub struct BackupCommand {
    #[arg(long, default_value = "auto", help = "Backup mode (auto, full, differential)")]
    pub mode: String,

    #[arg(long, default_value = "table", help = "Output format (table, json)")]
    pub format: String,
}

impl BackupCommand {
    pub async fn run(&self, cli: &crate::Cli) -> Result<()> {
        check_format(&self.format)?;
        let orchestrator = orchestrator(cli).await?;

        let pb = spinner(format!("Running {} backup...", self.mode), cli.quiet);
        let result = match self.mode.as_str() {
            "auto" => orchestrator.run().await,
            "full" => orchestrator.run_full().await,
            "differential" => orchestrator.run_differential().await,
            other => {
                pb.finish_and_clear();
                return Err(anyhow!("Unsupported mode: {}", other));
            }
        };
        pb.finish_and_clear();

        if self.format == "json" {
            print_json(&result)?;
        } else {
            print_table(&result);
        }

        if !result.success {
            bail!("Backup failed");
        }
        Ok(())
    }
}

fn print_table(result: &BackupResult) {
    if !result.success {
        println!("Backup failed: {}", result.error.as_deref().unwrap_or("unknown error"));
        return;
    }
    if result.filename.is_empty() {
        println!("No tables changed, nothing to back up");
        return;
    }

    println!("Backup {} completed in {:.1}s", result.filename, result.duration_ms as f64 / 1000.0);
    println!("  Type: {}", result.backup_type);
    println!("  Size: {}", format_size(result.size));
    println!();
    println!("{:<20} {}", "Storage", "Stored");
    println!("{:-<30}", "");
    for (name, stored) in &result.storages {
        println!("{:<20} {}", name, if *stored { "yes" } else { "no" });
    }
}
