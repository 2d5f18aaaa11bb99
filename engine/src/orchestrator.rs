use crate::health::HealthMonitor;
use dumpvault_backends::{Backend, RetryConfig, build_backends, retry_with_backoff};
use dumpvault_core::pipeline::checksum_file;
use dumpvault_core::retention;
use dumpvault_core::{
    BackupArtifact, BackupResult, BackupType, ChangeDetector, CleanupReport, Clock, Config, DatabaseTools, Error,
    HealthReport, Manifest, Notification, NotificationLevel, Notifier, Pipeline, RestoreResult, Result, RunLock,
    SystemClock, latest_artifact, manifest_filename_for,
};
use dumpvault_integrations::{PgCatalog, PgTools, TokioProcessRunner, notifier_from_config};
use futures::future::join_all;
use std::collections::BTreeMap;
use std::future::Future;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tempfile::TempDir;
use tracing::{Instrument, debug, error, info, info_span, warn};
use uuid::Uuid;

const MIB: u64 = 1024 * 1024;

/// Drives backup runs end to end and exposes the maintenance entry points.
pub struct Orchestrator {
    config: Config,
    storages: Vec<Arc<dyn Backend>>,
    primary: Arc<dyn Backend>,
    pipeline: Pipeline,
    database: Arc<dyn DatabaseTools>,
    changes: ChangeDetector,
    notifier: Arc<dyn Notifier>,
    clock: Arc<dyn Clock>,
    retry: RetryConfig,
}

impl Orchestrator {
    pub fn new(
        config: Config,
        storages: Vec<Arc<dyn Backend>>,
        database: Arc<dyn DatabaseTools>,
        changes: ChangeDetector,
        notifier: Arc<dyn Notifier>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        let primary = match config.primary_storage_name() {
            Some(name) => storages.iter().find(|s| s.name() == name).cloned(),
            None => None,
        }
        .or_else(|| storages.first().cloned())
        .ok_or_else(|| Error::Config("At least one storage must be enabled".to_string()))?;

        let pipeline = Pipeline::from_config(&config.compression, &config.encryption)?;

        Ok(Self {
            config,
            storages,
            primary,
            pipeline,
            database,
            changes,
            notifier,
            clock,
            retry: RetryConfig::quick(),
        })
    }

    /// Production wiring: configured storages, `pg_dump`/`psql`, a lazily
    /// connected catalog and the configured notifiers.
    pub async fn from_config(config: Config) -> Result<Self> {
        config.validate()?;

        let storages = build_backends(&config.storages).await?;
        let database = Arc::new(PgTools::new(config.database.clone(), Arc::new(TokioProcessRunner)));
        let catalog = Arc::new(PgCatalog::connect_lazy(&config.database)?);
        let changes = ChangeDetector::new(
            catalog,
            config.differential.exclude_tables.clone(),
            config.differential.timestamp_columns.clone(),
        );
        let notifier = notifier_from_config(&config.notifications)?;

        Self::new(config, storages, database, changes, notifier, Arc::new(SystemClock))
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn primary_storage(&self) -> &str {
        self.primary.name()
    }

    /// Full backup on the configured weekday, differential otherwise.
    pub async fn run(&self) -> BackupResult {
        match self.config.differential.backup_type_for(self.clock.now()) {
            BackupType::Full => self.run_full().await,
            BackupType::Differential => self.run_differential().await,
        }
    }

    pub async fn run_full(&self) -> BackupResult {
        let span = info_span!("backup", run_id = %Uuid::new_v4(), kind = "full");
        async {
            let started = Instant::now();
            let _lock = match self.lock() {
                Ok(lock) => lock,
                Err(e) => return self.fail(BackupType::Full, started, e).await,
            };
            self.full_locked(started).await
        }
        .instrument(span)
        .await
    }

    pub async fn run_differential(&self) -> BackupResult {
        let span = info_span!("backup", run_id = %Uuid::new_v4(), kind = "differential");
        async {
            let started = Instant::now();
            let _lock = match self.lock() {
                Ok(lock) => lock,
                Err(e) => return self.fail(BackupType::Differential, started, e).await,
            };

            let reference = match self.bounded("list", self.primary.list()).await {
                Ok(artifacts) => latest_artifact(&artifacts, Some(BackupType::Full)).cloned(),
                Err(e) => {
                    warn!(storage = self.primary.name(), error = %e, "Cannot list primary storage");
                    None
                }
            };

            let Some(reference) = reference else {
                info!("No full backup to diff against, running a full backup instead");
                return self.full_locked(started).await;
            };

            let tables = match self.changes.modified_tables(reference.created_at).await {
                Ok(tables) => tables,
                Err(e) => {
                    let e = match e {
                        Error::Database(_) => e,
                        other => Error::Database(other.to_string()),
                    };
                    return self.fail(BackupType::Differential, started, e).await;
                }
            };

            if tables.is_empty() {
                info!(since = %reference.created_at, "No tables changed since last full backup, skipping");
                return BackupResult::skipped(elapsed_ms(started));
            }

            info!(tables = tables.len(), reference = %reference.filename, "Backing up modified tables");
            let filter = tables.clone();
            match self
                .execute(
                    BackupType::Differential,
                    Some(filter.as_slice()),
                    tables,
                    Some(reference.filename),
                    started,
                )
                .await
            {
                Ok(result) => result,
                Err(e) => self.fail(BackupType::Differential, started, e).await,
            }
        }
        .instrument(span)
        .await
    }

    async fn full_locked(&self, started: Instant) -> BackupResult {
        let tables = self.changes.all_tables().await.unwrap_or_else(|e| {
            warn!(error = %e, "Could not list tables for the manifest");
            Vec::new()
        });

        match self.execute(BackupType::Full, None, tables, None, started).await {
            Ok(result) => result,
            Err(e) => self.fail(BackupType::Full, started, e).await,
        }
    }

    async fn execute(
        &self,
        backup_type: BackupType,
        filter: Option<&[String]>,
        tables: Vec<String>,
        full_backup_reference: Option<String>,
        started: Instant,
    ) -> Result<BackupResult> {
        let name = self.pipeline.artifact_name(backup_type, self.clock.now());
        let run_dir = self.run_dir().await?;

        let dump_path = run_dir.path().join(name.sql_filename());
        self.database.dump(&dump_path, filter).await?;

        let artifact_path = self.pipeline.seal(dump_path).await?;
        let size = tokio::fs::metadata(&artifact_path).await?.len();
        let checksum = checksum_file(&artifact_path).await?;

        let manifest = Manifest {
            backup_type,
            created_at: name.created_at,
            tables,
            full_backup_reference,
            size,
            checksum,
            compressed: self.pipeline.compresses(),
            encrypted: self.pipeline.encrypts(),
        };
        let manifest_name = name.manifest_filename();
        let manifest_path = run_dir.path().join(&manifest_name);
        let manifest_written = match write_manifest(&manifest_path, &manifest).await {
            Ok(()) => true,
            Err(e) => {
                warn!(error = %e, "Manifest not written, replicating the backup without it");
                false
            }
        };

        let filename = name.filename();
        let manifest = manifest_written.then_some((manifest_path.as_path(), manifest_name.as_str()));
        let storages = self.replicate(&artifact_path, &filename, manifest).await;

        if let Err(e) = run_dir.close() {
            warn!(error = %e, "Failed to remove run directory");
        }

        let mut result = BackupResult {
            success: true,
            filename,
            backup_type,
            size,
            duration_ms: elapsed_ms(started),
            storages,
            error: None,
        };

        if !result.stored_anywhere() {
            if self.config.require_at_least_one_storage {
                let e = Error::UploadFailed {
                    storage: "all".to_string(),
                    reason: "no storage accepted the backup".to_string(),
                };
                error!(filename = %result.filename, duration_ms = result.duration_ms, "{}", e);
                result.success = false;
                result.error = Some(e.to_string());
                if self.config.notifications.on_failure {
                    self.notify(
                        Notification::new(NotificationLevel::Error, "Backup failed", e.to_string())
                            .with_data(serde_json::to_value(&result).unwrap_or_default()),
                    )
                    .await;
                }
                return Ok(result);
            }
            warn!(filename = %result.filename, "Backup was not stored on any storage");
        }

        info!(
            filename = %result.filename,
            size = result.size,
            duration_ms = result.duration_ms,
            "Backup completed"
        );

        if size > self.config.health.max_backup_size_bytes() && self.config.notifications.on_large_backup {
            self.notify(
                Notification::new(
                    NotificationLevel::Warning,
                    "Large backup",
                    format!(
                        "Backup {} is {} MB, above the {} MB threshold",
                        result.filename,
                        size / MIB,
                        self.config.health.max_backup_size_mb
                    ),
                )
                .with_data(serde_json::json!({ "filename": result.filename, "size": size })),
            )
            .await;
        }

        if self.config.notifications.on_success {
            self.notify(
                Notification::new(
                    NotificationLevel::Info,
                    "Backup completed",
                    format!("{} backup {} completed", backup_type, result.filename),
                )
                .with_data(serde_json::to_value(&result).unwrap_or_default()),
            )
            .await;
        }

        Ok(result)
    }

    /// Uploads the artifact and its manifest to every reachable storage
    /// concurrently. A manifest failure never changes the recorded outcome.
    async fn replicate(
        &self,
        artifact: &Path,
        filename: &str,
        manifest: Option<(&Path, &str)>,
    ) -> BTreeMap<String, bool> {
        let uploads = self.storages.iter().map(|storage| async move {
            let stored = self
                .replicate_to(storage.as_ref(), artifact, filename, manifest)
                .await;
            (storage.name().to_string(), stored)
        });
        join_all(uploads).await.into_iter().collect()
    }

    async fn replicate_to(
        &self,
        storage: &dyn Backend,
        artifact: &Path,
        filename: &str,
        manifest: Option<(&Path, &str)>,
    ) -> bool {
        let available = tokio::time::timeout(self.config.storage_timeout(), storage.is_available())
            .await
            .unwrap_or(false);
        if !available {
            warn!(storage = storage.name(), "Storage unavailable, skipping upload");
            return false;
        }

        let stored = match self.upload(storage, artifact, filename).await {
            Ok(()) => {
                debug!(storage = storage.name(), filename, "Artifact uploaded");
                true
            }
            Err(e) => {
                let e = Error::UploadFailed {
                    storage: storage.name().to_string(),
                    reason: e.to_string(),
                };
                warn!(storage = storage.name(), error = %e, "Artifact upload failed");
                false
            }
        };

        if let Some((path, name)) = manifest {
            if let Err(e) = self.upload(storage, path, name).await {
                let e = Error::ManifestUploadFailed {
                    storage: storage.name().to_string(),
                    reason: e.to_string(),
                };
                warn!(storage = storage.name(), error = %e, "Manifest upload failed");
            }
        }
        stored
    }

    async fn upload(&self, storage: &dyn Backend, local: &Path, remote: &str) -> Result<()> {
        let limit = self.config.transfer_timeout(tokio::fs::metadata(local).await?.len());
        let operation = format!("upload to {}", storage.name());
        retry_with_backoff(&self.retry, &operation, || {
            self.bounded_by(limit, "upload", storage.upload(local, remote))
        })
        .await
    }

    /// Applies the retention policy to every storage independently.
    pub async fn cleanup(&self) -> CleanupReport {
        let now = self.clock.now();
        let mut report = CleanupReport::default();

        for storage in &self.storages {
            let artifacts = match self.bounded("list", storage.list()).await {
                Ok(artifacts) => artifacts,
                Err(e) => {
                    warn!(storage = storage.name(), error = %e, "Cannot list storage for cleanup");
                    report.errors += 1;
                    continue;
                }
            };

            let plan = retention::plan(&artifacts, &self.config.retention, now);
            report.kept += plan.keep.len();

            for artifact in plan.delete {
                match self.bounded("delete", storage.delete(&artifact.filename)).await {
                    Ok(()) => {
                        report.deleted += 1;
                        info!(storage = storage.name(), filename = %artifact.filename, "Deleted expired backup");
                        let manifest = manifest_filename_for(&artifact.filename);
                        if let Err(e) = self.bounded("delete", storage.delete(&manifest)).await {
                            debug!(storage = storage.name(), manifest = %manifest, error = %e, "Manifest not deleted");
                        }
                    }
                    Err(e) => {
                        report.errors += 1;
                        warn!(
                            storage = storage.name(),
                            filename = %artifact.filename,
                            error = %e,
                            "Failed to delete expired backup"
                        );
                    }
                }
            }
        }

        info!(
            deleted = report.deleted,
            kept = report.kept,
            errors = report.errors,
            "Retention cleanup finished"
        );
        report
    }

    pub async fn health_check(&self) -> HealthReport {
        let monitor = HealthMonitor::new(
            self.storages.clone(),
            self.primary.clone(),
            self.config.health.clone(),
            self.clock.clone(),
            self.config.storage_timeout(),
        );
        let report = monitor.check().await;

        if !report.healthy && self.config.notifications.on_health_check_failure {
            self.notify(
                Notification::new(
                    NotificationLevel::Error,
                    "Backup health check failed",
                    report.issues.join("; "),
                )
                .with_data(serde_json::to_value(&report).unwrap_or_default()),
            )
            .await;
        }
        report
    }

    /// Restores `filename` from the primary storage into the database.
    pub async fn restore(&self, filename: &str) -> RestoreResult {
        let span = info_span!("restore", run_id = %Uuid::new_v4(), filename);
        async {
            let started = Instant::now();
            let outcome = self.restore_locked(filename).await;
            let duration_ms = elapsed_ms(started);

            match outcome {
                Ok(()) => {
                    info!(duration_ms, "Restore completed");
                    RestoreResult {
                        success: true,
                        filename: filename.to_string(),
                        duration_ms,
                        error: None,
                    }
                }
                Err(e) => {
                    error!(duration_ms, error = %e, "Restore failed");
                    if self.config.notifications.on_failure {
                        self.notify(Notification::new(
                            NotificationLevel::Error,
                            "Restore failed",
                            format!("Restore of {} failed: {}", filename, e),
                        ))
                        .await;
                    }
                    RestoreResult {
                        success: false,
                        filename: filename.to_string(),
                        duration_ms,
                        error: Some(e.to_string()),
                    }
                }
            }
        }
        .instrument(span)
        .await
    }

    async fn restore_locked(&self, filename: &str) -> Result<()> {
        let _lock = self.lock()?;

        let not_found = || Error::RestoreNotFound {
            filename: filename.to_string(),
        };
        if filename.is_empty() || filename.contains(['/', '\\']) {
            return Err(not_found());
        }
        if !self.bounded("exists", self.primary.exists(filename)).await? {
            return Err(not_found());
        }

        let size = self
            .artifact_size(filename)
            .await
            .unwrap_or_else(|| self.config.health.max_backup_size_bytes());
        let run_dir = self.run_dir().await?;
        let downloaded = run_dir.path().join(filename);
        self.bounded_by(
            self.config.transfer_timeout(size),
            "download",
            self.primary.download(filename, &downloaded),
        )
        .await?;
        debug!(storage = self.primary.name(), "Downloaded {}", filename);

        let plain = self.pipeline.open(downloaded).await?;
        let applied = self.database.restore(&plain).await;
        if let Err(e) = tokio::fs::remove_file(&plain).await {
            warn!(error = %e, "Failed to remove restored plaintext {}", plain.display());
        }
        applied?;

        if let Err(e) = run_dir.close() {
            warn!(error = %e, "Failed to remove run directory");
        }
        Ok(())
    }

    /// Artifacts on the primary storage, newest first.
    pub async fn list_backups(&self) -> Result<Vec<BackupArtifact>> {
        let mut artifacts = self.bounded("list", self.primary.list()).await?;
        artifacts.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then_with(|| b.filename.cmp(&a.filename))
        });
        Ok(artifacts)
    }

    /// Size of `filename` according to the primary storage's listing.
    async fn artifact_size(&self, filename: &str) -> Option<u64> {
        let artifacts = self.bounded("list", self.primary.list()).await.ok()?;
        artifacts.into_iter().find(|a| a.filename == filename).map(|a| a.size)
    }

    fn lock(&self) -> Result<RunLock> {
        RunLock::acquire(
            &self.config.work_dir,
            self.database.database_name(),
            Duration::from_secs(self.config.stale_lock_secs),
        )
    }

    async fn run_dir(&self) -> Result<TempDir> {
        tokio::fs::create_dir_all(&self.config.work_dir).await?;
        Ok(tempfile::Builder::new()
            .prefix("run-")
            .tempdir_in(&self.config.work_dir)?)
    }

    /// Bounds one storage call by the configured storage timeout.
    async fn bounded<T>(&self, operation: &str, call: impl Future<Output = Result<T>>) -> Result<T> {
        self.bounded_by(self.config.storage_timeout(), operation, call).await
    }

    async fn bounded_by<T>(&self, limit: Duration, operation: &str, call: impl Future<Output = Result<T>>) -> Result<T> {
        tokio::time::timeout(limit, call)
            .await
            .unwrap_or_else(|_| {
                Err(Error::Timeout {
                    operation: operation.to_string(),
                    seconds: limit.as_secs(),
                })
            })
    }

    async fn fail(&self, backup_type: BackupType, started: Instant, error: Error) -> BackupResult {
        let result = BackupResult::failed(backup_type, elapsed_ms(started), &error);
        error!(
            kind = %backup_type,
            duration_ms = result.duration_ms,
            error = %error,
            "Backup failed"
        );

        if self.config.notifications.on_failure {
            self.notify(
                Notification::new(
                    NotificationLevel::Error,
                    "Backup failed",
                    format!("{} backup failed: {}", backup_type, error),
                )
                .with_data(serde_json::json!({ "durationMs": result.duration_ms })),
            )
            .await;
        }
        result
    }

    async fn notify(&self, notification: Notification) {
        let notification = notification.with_user(self.config.notifications.user_id.clone());
        if let Err(e) = self.notifier.notify(notification).await {
            warn!(error = %e, "Failed to deliver notification");
        }
    }
}

async fn write_manifest(path: &Path, manifest: &Manifest) -> Result<()> {
    tokio::fs::write(path, manifest.to_json()?).await?;
    Ok(())
}

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}
