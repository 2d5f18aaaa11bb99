use super::{check_format, format_size, orchestrator, print_json};
use anyhow::Result;
use clap::Args;

#[derive(Args)]
pub struct ListCommand {
    #[arg(long, default_value = "table", help = "Output format (table, json)")]
    pub format: String,

    #[arg(long, help = "Show latest N backups")]
    pub latest: Option<usize>,
}

impl ListCommand {
    pub async fn run(&self, cli: &crate::Cli) -> Result<()> {
        check_format(&self.format)?;
        let orchestrator = orchestrator(cli).await?;

        let mut backups = orchestrator.list_backups().await?;
        if let Some(latest) = self.latest {
            backups.truncate(latest);
        }

        if self.format == "json" {
            return print_json(&backups);
        }

        if backups.is_empty() {
            println!("No backups found on {}", orchestrator.primary_storage());
            return Ok(());
        }

        println!("{:<50} {:<13} {:<20} {}", "Filename", "Type", "Created", "Size");
        println!("{:-<95}", "");
        for backup in backups {
            println!(
                "{:<50} {:<13} {:<20} {}",
                backup.filename,
                backup.backup_type.as_str(),
                backup.created_at.format("%Y-%m-%d %H:%M:%S").to_string(),
                format_size(backup.size)
            );
        }
        Ok(())
    }
}
