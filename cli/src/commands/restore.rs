use super::{check_format, orchestrator, print_json, spinner};
use anyhow::{Result, bail};
use clap::Args;
use std::io::{self, Write};

#[derive(Args)]
pub struct RestoreCommand {
    #[arg(help = "Backup filename on the primary storage")]
    pub filename: String,

    #[arg(long, short, help = "Do not ask for confirmation")]
    pub yes: bool,

    #[arg(long, default_value = "table", help = "Output format (table, json)")]
    pub format: String,
}

impl RestoreCommand {
    pub async fn run(&self, cli: &crate::Cli) -> Result<()> {
        check_format(&self.format)?;
        let orchestrator = orchestrator(cli).await?;

        if !self.yes && !confirm(&self.filename, &orchestrator.config().database.database)? {
            println!("Restore cancelled");
            return Ok(());
        }

        let pb = spinner(format!("Restoring {}...", self.filename), cli.quiet);
        let result = orchestrator.restore(&self.filename).await;
        pb.finish_and_clear();

        if self.format == "json" {
            print_json(&result)?;
        } else if result.success {
            println!(
                "Restored {} in {:.1}s",
                result.filename,
                result.duration_ms as f64 / 1000.0
            );
        } else {
            println!(
                "Restore of {} failed: {}",
                result.filename,
                result.error.as_deref().unwrap_or("unknown error")
            );
        }

        if !result.success {
            bail!("Restore failed");
        }
        Ok(())
    }
}

fn confirm(filename: &str, database: &str) -> Result<bool> {
    print!("Restore {} into database '{}'? [y/N] ", filename, database);
    io::stdout().flush()?;
    let mut answer = String::new();
    io::stdin().read_line(&mut answer)?;
    Ok(matches!(answer.trim(), "y" | "Y" | "yes"))
}
