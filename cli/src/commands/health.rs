use super::{check_format, format_size, orchestrator, print_json};
use anyhow::{Result, bail};
use clap::Args;

#[derive(Args)]
pub struct HealthCommand {
    #[arg(long, default_value = "table", help = "Output format (table, json)")]
    pub format: String,
}

impl HealthCommand {
    pub async fn run(&self, cli: &crate::Cli) -> Result<()> {
        check_format(&self.format)?;
        let orchestrator = orchestrator(cli).await?;
        let report = orchestrator.health_check().await;

        if self.format == "json" {
            print_json(&report)?;
        } else {
            println!("Status: {}", if report.healthy { "healthy" } else { "unhealthy" });
            println!();
            println!("{:<20} {}", "Storage", "Available");
            println!("{:-<30}", "");
            for (name, available) in &report.storages {
                println!("{:<20} {}", name, if *available { "yes" } else { "no" });
            }
            if let Some(last) = &report.last_backup {
                println!();
                println!(
                    "Last backup: {} ({}, {})",
                    last.filename,
                    last.created_at.format("%Y-%m-%d %H:%M:%S UTC"),
                    format_size(last.size)
                );
            }
            if !report.issues.is_empty() {
                println!();
                println!("Issues:");
                for issue in &report.issues {
                    println!("  - {}", issue);
                }
            }
        }

        if !report.healthy {
            bail!("Health check failed with {} issue(s)", report.issues.len());
        }
        Ok(())
    }
}
