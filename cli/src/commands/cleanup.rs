use super::{check_format, orchestrator, print_json, spinner};
use anyhow::Result;
use clap::Args;

#[derive(Args)]
pub struct CleanupCommand {
    #[arg(long, default_value = "table", help = "Output format (table, json)")]
    pub format: String,
}

impl CleanupCommand {
    pub async fn run(&self, cli: &crate::Cli) -> Result<()> {
        check_format(&self.format)?;
        let orchestrator = orchestrator(cli).await?;

        let pb = spinner("Applying retention policy...", cli.quiet);
        let report = orchestrator.cleanup().await;
        pb.finish_and_clear();

        if self.format == "json" {
            print_json(&report)?;
        } else {
            println!("Deleted: {}", report.deleted);
            println!("Kept:    {}", report.kept);
            println!("Errors:  {}", report.errors);
        }
        Ok(())
    }
}
