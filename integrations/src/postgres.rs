use crate::catalog::quote_qualified;
use async_trait::async_trait;
use dumpvault_core::config::DatabaseConfig;
use dumpvault_core::{DatabaseTools, Error, ProcessRunner, Result};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

/// `pg_dump` / `psql` wrappers.
pub struct PgTools {
    config: DatabaseConfig,
    runner: Arc<dyn ProcessRunner>,
}

impl PgTools {
    pub fn new(config: DatabaseConfig, runner: Arc<dyn ProcessRunner>) -> Self {
        Self { config, runner }
    }

    fn connection_args(&self) -> Vec<String> {
        if let Some(url) = &self.config.url {
            return vec!["-d".to_string(), url.clone()];
        }
        vec![
            "-h".to_string(),
            self.config.host.clone(),
            "-p".to_string(),
            self.config.port.to_string(),
            "-U".to_string(),
            self.config.user.clone(),
            "-d".to_string(),
            self.config.database.clone(),
        ]
    }

    fn env(&self) -> Vec<(String, String)> {
        self.config
            .password
            .iter()
            .map(|p| ("PGPASSWORD".to_string(), p.clone()))
            .collect()
    }

    fn dump_args(&self, output: &Path, tables: Option<&[String]>) -> Vec<String> {
        let mut args = self.connection_args();
        args.push("--format=plain".to_string());
        args.push("--no-password".to_string());
        args.push("--file".to_string());
        args.push(output.to_string_lossy().into_owned());
        if let Some(tables) = tables {
            args.push("--strict-names".to_string());
            for table in tables {
                args.push("-t".to_string());
                args.push(quote_qualified(table));
            }
        }
        args
    }

    fn restore_args(&self, input: &Path) -> Vec<String> {
        let mut args = self.connection_args();
        args.push("--no-password".to_string());
        args.push("-v".to_string());
        args.push("ON_ERROR_STOP=1".to_string());
        args.push("--file".to_string());
        args.push(input.to_string_lossy().into_owned());
        args
    }
}

#[async_trait]
impl DatabaseTools for PgTools {
    fn database_name(&self) -> &str {
        &self.config.database
    }

    async fn dump(&self, output: &Path, tables: Option<&[String]>) -> Result<()> {
        let args = self.dump_args(output, tables);
        debug!(
            database = %self.config.database,
            tables = tables.map_or(0, |t| t.len()),
            "Running {}",
            self.config.dump_command
        );

        let result = self
            .runner
            .run(&self.config.dump_command, &args, &self.env())
            .await
            .map_err(|e| Error::DumpFailed(e.to_string()))?;

        if !result.success() {
            return Err(Error::DumpFailed(format!(
                "{} exited with {}: {}",
                self.config.dump_command,
                result.code.map_or("signal".to_string(), |c| c.to_string()),
                result.stderr.trim()
            )));
        }

        info!("Dumped database {} to {}", self.config.database, output.display());
        Ok(())
    }

    async fn restore(&self, input: &Path) -> Result<()> {
        let args = self.restore_args(input);
        let result = self
            .runner
            .run(&self.config.restore_command, &args, &self.env())
            .await
            .map_err(|e| Error::RestoreApplyFailed {
                code: None,
                stderr: e.to_string(),
            })?;

        if !result.success() {
            return Err(Error::RestoreApplyFailed {
                code: result.code,
                stderr: result.stderr.trim().to_string(),
            });
        }

        info!("Applied {} to database {}", input.display(), self.config.database);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dumpvault_core::ProcessOutput;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingRunner {
        calls: Mutex<Vec<(String, Vec<String>, Vec<(String, String)>)>>,
        code: i32,
        stderr: String,
    }

    #[async_trait]
    impl ProcessRunner for RecordingRunner {
        async fn run(&self, program: &str, args: &[String], env: &[(String, String)]) -> Result<ProcessOutput> {
            self.calls
                .lock()
                .unwrap()
                .push((program.to_string(), args.to_vec(), env.to_vec()));
            Ok(ProcessOutput {
                code: Some(self.code),
                stdout: String::new(),
                stderr: self.stderr.clone(),
            })
        }
    }

    fn config() -> DatabaseConfig {
        DatabaseConfig {
            host: "db.internal".to_string(),
            port: 6432,
            user: "backup".to_string(),
            password: Some("s3cret".to_string()),
            database: "shop".to_string(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_dump_passes_tables_and_password() {
        let runner = Arc::new(RecordingRunner::default());
        let tools = PgTools::new(config(), runner.clone());

        let tables = vec!["public.Orders".to_string(), "public.users".to_string()];
        tools.dump(Path::new("/tmp/out.sql"), Some(&tables)).await.unwrap();

        let calls = runner.calls.lock().unwrap();
        let (program, args, env) = &calls[0];
        assert_eq!(program, "pg_dump");
        assert!(args.windows(2).any(|w| w == ["-h", "db.internal"]));
        assert!(args.windows(2).any(|w| w == ["-p", "6432"]));
        assert!(args.windows(2).any(|w| w == ["--file", "/tmp/out.sql"]));
        assert!(args.windows(2).any(|w| w == ["-t", "\"public\".\"Orders\""]));
        assert!(args.windows(2).any(|w| w == ["-t", "\"public\".\"users\""]));
        assert!(args.contains(&"--strict-names".to_string()));
        assert!(args.contains(&"--format=plain".to_string()));
        assert_eq!(env, &vec![("PGPASSWORD".to_string(), "s3cret".to_string())]);
    }

    #[tokio::test]
    async fn test_full_dump_has_no_table_filter() {
        let runner = Arc::new(RecordingRunner::default());
        let tools = PgTools::new(config(), runner.clone());
        tools.dump(Path::new("/tmp/out.sql"), None).await.unwrap();

        let calls = runner.calls.lock().unwrap();
        assert!(!calls[0].1.contains(&"-t".to_string()));
        assert!(!calls[0].1.contains(&"--strict-names".to_string()));
    }

    #[tokio::test]
    async fn test_table_patterns_are_literal() {
        let runner = Arc::new(RecordingRunner::default());
        let tools = PgTools::new(config(), runner.clone());
        let tables = vec!["audit.log*2026".to_string(), "we\"ird".to_string()];
        tools.dump(Path::new("/tmp/out.sql"), Some(&tables)).await.unwrap();

        let calls = runner.calls.lock().unwrap();
        let args = &calls[0].1;
        assert!(args.windows(2).any(|w| w == ["-t", "\"audit\".\"log*2026\""]));
        assert!(args.windows(2).any(|w| w == ["-t", "\"we\"\"ird\""]));
    }

    #[tokio::test]
    async fn test_dump_failure_carries_stderr() {
        let runner = Arc::new(RecordingRunner {
            code: 1,
            stderr: "connection refused".to_string(),
            ..Default::default()
        });
        let tools = PgTools::new(config(), runner);
        let err = tools.dump(Path::new("/tmp/out.sql"), None).await.unwrap_err();
        match err {
            Error::DumpFailed(msg) => assert!(msg.contains("connection refused")),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_restore_stops_on_error() {
        let runner = Arc::new(RecordingRunner {
            code: 3,
            stderr: "ERROR: relation exists".to_string(),
            ..Default::default()
        });
        let tools = PgTools::new(config(), runner.clone());
        let err = tools.restore(Path::new("/tmp/in.sql")).await.unwrap_err();
        assert!(matches!(err, Error::RestoreApplyFailed { code: Some(3), .. }));

        let calls = runner.calls.lock().unwrap();
        let (program, args, _) = &calls[0];
        assert_eq!(program, "psql");
        assert!(args.windows(2).any(|w| w == ["-v", "ON_ERROR_STOP=1"]));
        assert!(args.windows(2).any(|w| w == ["--file", "/tmp/in.sql"]));
    }
}
