use dumpvault_backends::Backend;
use dumpvault_core::config::HealthThresholds;
use dumpvault_core::{Clock, HealthReport, latest_artifact};
use futures::future::join_all;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, warn};

const MIB: u64 = 1024 * 1024;

/// Evaluates storage reachability, free space on the primary storage and
/// freshness of the newest backup against the configured thresholds.
pub struct HealthMonitor {
    storages: Vec<Arc<dyn Backend>>,
    primary: Arc<dyn Backend>,
    thresholds: HealthThresholds,
    clock: Arc<dyn Clock>,
    timeout: std::time::Duration,
}

impl HealthMonitor {
    pub fn new(
        storages: Vec<Arc<dyn Backend>>,
        primary: Arc<dyn Backend>,
        thresholds: HealthThresholds,
        clock: Arc<dyn Clock>,
        timeout: std::time::Duration,
    ) -> Self {
        Self {
            storages,
            primary,
            thresholds,
            clock,
            timeout,
        }
    }

    pub async fn check(&self) -> HealthReport {
        let mut issues = Vec::new();

        let checks = self.storages.iter().map(|storage| async move {
            let available = tokio::time::timeout(self.timeout, storage.is_available())
                .await
                .unwrap_or(false);
            (storage.name().to_string(), available)
        });
        let storages: BTreeMap<String, bool> = join_all(checks).await.into_iter().collect();

        for (name, available) in &storages {
            if !available {
                issues.push(format!("Storage '{}' is unavailable", name));
            }
        }

        let primary = self.primary.name();
        let primary_available = storages.get(primary).copied().unwrap_or(false);
        let mut last_backup = None;

        if primary_available {
            self.check_free_space(&mut issues).await;

            match tokio::time::timeout(self.timeout, self.primary.list()).await {
                Ok(Ok(artifacts)) => {
                    last_backup = latest_artifact(&artifacts, None).cloned();
                    match &last_backup {
                        None => issues.push(format!("No backups found on primary storage '{}'", primary)),
                        Some(latest) => {
                            let age = latest.age(self.clock.now());
                            if age > self.thresholds.max_backup_age() {
                                issues.push(format!(
                                    "Latest backup {} is {} hours old (maximum {} hours)",
                                    latest.filename,
                                    age.num_hours(),
                                    self.thresholds.max_backup_age_hours
                                ));
                            }
                        }
                    }
                }
                Ok(Err(e)) => issues.push(format!("Failed to list backups on '{}': {}", primary, e)),
                Err(_) => issues.push(format!("Listing backups on '{}' timed out", primary)),
            }
        }

        let healthy = issues.is_empty();
        if healthy {
            debug!("Health check passed for {} storages", storages.len());
        } else {
            warn!(issues = issues.len(), "Health check found problems: {}", issues.join("; "));
        }

        HealthReport {
            healthy,
            issues,
            storages,
            last_backup,
        }
    }

    async fn check_free_space(&self, issues: &mut Vec<String>) {
        let name = self.primary.name();
        match tokio::time::timeout(self.timeout, self.primary.free_space()).await {
            Ok(Ok(Some(free))) if free < self.thresholds.min_free_space_bytes() => {
                issues.push(format!(
                    "Low free space on '{}': {} MB available, minimum {} MB",
                    name,
                    free / MIB,
                    self.thresholds.min_free_space_mb
                ));
            }
            Ok(Ok(_)) => {}
            Ok(Err(e)) => issues.push(format!("Failed to query free space on '{}': {}", name, e)),
            Err(_) => issues.push(format!("Free space query on '{}' timed out", name)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::{TimeZone, Utc};
    use dumpvault_backends::{BackendType, LocalBackend};
    use dumpvault_core::{BackupArtifact, Error, FixedClock, Result};
    use std::path::Path;

    struct Unreachable;

    #[async_trait]
    impl Backend for Unreachable {
        fn name(&self) -> &str {
            "offsite"
        }
        fn backend_type(&self) -> BackendType {
            BackendType::S3
        }
        async fn is_available(&self) -> bool {
            false
        }
        async fn upload(&self, _: &Path, _: &str) -> Result<()> {
            Err(Error::Backend("unreachable".into()))
        }
        async fn download(&self, _: &str, _: &Path) -> Result<()> {
            Err(Error::Backend("unreachable".into()))
        }
        async fn delete(&self, _: &str) -> Result<()> {
            Err(Error::Backend("unreachable".into()))
        }
        async fn list(&self) -> Result<Vec<BackupArtifact>> {
            Err(Error::Backend("unreachable".into()))
        }
        async fn exists(&self, _: &str) -> Result<bool> {
            Err(Error::Backend("unreachable".into()))
        }
        async fn free_space(&self) -> Result<Option<u64>> {
            Ok(None)
        }
    }

    /// Reachable with a fresh backup, but one byte of space left.
    struct NearlyFull;

    #[async_trait]
    impl Backend for NearlyFull {
        fn name(&self) -> &str {
            "nas"
        }
        fn backend_type(&self) -> BackendType {
            BackendType::WebDav
        }
        async fn is_available(&self) -> bool {
            true
        }
        async fn upload(&self, _: &Path, _: &str) -> Result<()> {
            Err(Error::Backend("no space left".into()))
        }
        async fn download(&self, _: &str, _: &Path) -> Result<()> {
            Err(Error::Backend("not found".into()))
        }
        async fn delete(&self, _: &str) -> Result<()> {
            Ok(())
        }
        async fn list(&self) -> Result<Vec<BackupArtifact>> {
            let name = "backup-full-2026-10-18-020000.sql.gz";
            Ok(BackupArtifact::from_listing(name, name, 4096).into_iter().collect())
        }
        async fn exists(&self, _: &str) -> Result<bool> {
            Ok(true)
        }
        async fn free_space(&self) -> Result<Option<u64>> {
            Ok(Some(1))
        }
    }

    fn thresholds() -> HealthThresholds {
        HealthThresholds {
            max_backup_age_hours: 26,
            max_backup_size_mb: 1024,
            min_free_space_mb: 0,
        }
    }

    fn monitor(storages: Vec<Arc<dyn Backend>>, now: chrono::DateTime<Utc>) -> HealthMonitor {
        let primary = storages[0].clone();
        HealthMonitor::new(
            storages,
            primary,
            thresholds(),
            Arc::new(FixedClock::new(now)),
            std::time::Duration::from_secs(5),
        )
    }

    #[tokio::test]
    async fn test_no_backups_is_unhealthy() {
        let dir = tempfile::tempdir().unwrap();
        let local: Arc<dyn Backend> = Arc::new(LocalBackend::new("local", dir.path()));
        let report = monitor(vec![local], Utc::now()).check().await;

        assert!(!report.healthy);
        assert!(report.issues.iter().any(|i| i.contains("No backups")));
        assert_eq!(report.storages.get("local"), Some(&true));
        assert!(report.last_backup.is_none());
    }

    #[tokio::test]
    async fn test_fresh_backup_is_healthy() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("backup-full-2026-10-18-020000.sql.gz"), b"x").unwrap();
        let local: Arc<dyn Backend> = Arc::new(LocalBackend::new("local", dir.path()));

        let now = Utc.with_ymd_and_hms(2026, 10, 18, 12, 0, 0).unwrap();
        let report = monitor(vec![local], now).check().await;

        assert!(report.healthy, "{:?}", report.issues);
        assert_eq!(
            report.last_backup.map(|b| b.filename),
            Some("backup-full-2026-10-18-020000.sql.gz".to_string())
        );
    }

    #[tokio::test]
    async fn test_stale_backup_and_unreachable_storage() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("backup-full-2026-10-10-020000.sql"), b"x").unwrap();
        let local: Arc<dyn Backend> = Arc::new(LocalBackend::new("local", dir.path()));

        let now = Utc.with_ymd_and_hms(2026, 10, 18, 12, 0, 0).unwrap();
        let report = monitor(vec![local, Arc::new(Unreachable)], now).check().await;

        assert!(!report.healthy);
        assert_eq!(report.storages.len(), 2);
        assert_eq!(report.storages.get("offsite"), Some(&false));
        assert!(report.issues.iter().any(|i| i.contains("'offsite' is unavailable")));
        assert!(report.issues.iter().any(|i| i.contains("hours old")));
    }

    #[tokio::test]
    async fn test_low_free_space() {
        let now = Utc.with_ymd_and_hms(2026, 10, 18, 12, 0, 0).unwrap();
        let nas: Arc<dyn Backend> = Arc::new(NearlyFull);
        let mut monitor = monitor(vec![nas], now);
        monitor.thresholds.min_free_space_mb = 1;

        let report = monitor.check().await;
        assert!(!report.healthy);
        assert_eq!(
            report.issues,
            vec!["Low free space on 'nas': 0 MB available, minimum 1 MB".to_string()]
        );
        assert!(report.last_backup.is_some());

        monitor.thresholds.min_free_space_mb = 0;
        assert!(monitor.check().await.healthy);
    }
}
