use async_trait::async_trait;
use dumpvault_core::{Error, ProcessOutput, ProcessRunner, Result};
use std::process::Stdio;
use tokio::process::Command;
use tracing::debug;

/// Runs programs with `tokio::process`. The child is killed if the returned
/// future is dropped before it exits.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioProcessRunner;

#[async_trait]
impl ProcessRunner for TokioProcessRunner {
    async fn run(&self, program: &str, args: &[String], env: &[(String, String)]) -> Result<ProcessOutput> {
        debug!(program, ?args, "Spawning process");

        let output = Command::new(program)
            .args(args)
            .envs(env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| Error::Other(format!("Failed to spawn {}: {}", program, e)))?;

        Ok(ProcessOutput {
            code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}
