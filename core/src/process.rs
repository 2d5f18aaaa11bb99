use crate::Result;
use async_trait::async_trait;
use std::path::Path;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessOutput {
    /// `None` when the process was terminated by a signal.
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl ProcessOutput {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

/// Runs an external program to completion with both output pipes drained.
#[async_trait]
pub trait ProcessRunner: Send + Sync {
    async fn run(&self, program: &str, args: &[String], env: &[(String, String)]) -> Result<ProcessOutput>;
}

/// Engine-specific dump and restore utilities.
#[async_trait]
pub trait DatabaseTools: Send + Sync {
    fn database_name(&self) -> &str;

    /// Writes a plain SQL dump to `output`, restricted to `tables` when given.
    async fn dump(&self, output: &Path, tables: Option<&[String]>) -> Result<()>;

    /// Applies a plain SQL dump.
    async fn restore(&self, input: &Path) -> Result<()>;
}
