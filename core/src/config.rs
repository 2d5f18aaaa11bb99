use crate::crypto::KdfParams;
use crate::retention::RetentionPolicy;
use crate::types::BackupType;
use crate::{Error, Result};
use chrono::{DateTime, Datelike, Utc, Weekday};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub work_dir: PathBuf,
    /// Storage used for restore, differential lineage and health checks.
    /// Defaults to the first enabled storage.
    pub primary_storage: Option<String>,
    /// When set, a run whose artifact reached no storage is reported as failed.
    pub require_at_least_one_storage: bool,
    pub storage_timeout_secs: u64,
    /// Slowest acceptable transfer rate. Uploads and downloads get
    /// `storage_timeout_secs` plus the time this rate needs for the file.
    pub min_transfer_rate_kib: u64,
    pub stale_lock_secs: u64,
    pub database: DatabaseConfig,
    pub storages: Vec<StorageConfig>,
    pub compression: CompressionConfig,
    pub encryption: EncryptionConfig,
    pub retention: RetentionPolicy,
    pub health: HealthThresholds,
    pub notifications: NotificationConfig,
    pub differential: DifferentialConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            work_dir: std::env::temp_dir().join("dumpvault"),
            primary_storage: None,
            require_at_least_one_storage: false,
            storage_timeout_secs: 300,
            min_transfer_rate_kib: 1024,
            stale_lock_secs: 6 * 60 * 60,
            database: DatabaseConfig::default(),
            storages: Vec::new(),
            compression: CompressionConfig::default(),
            encryption: EncryptionConfig::default(),
            retention: RetentionPolicy::default(),
            health: HealthThresholds::default(),
            notifications: NotificationConfig::default(),
            differential: DifferentialConfig::default(),
        }
    }
}

impl Config {
    pub fn default_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("", "", "dumpvault").map(|dirs| dirs.config_dir().join("config.toml"))
    }

    pub async fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| Error::Config(format!("Failed to read {}: {}", path.display(), e)))?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| Error::Config(e.to_string()))
    }

    pub fn validate(&self) -> Result<()> {
        let enabled: Vec<&StorageConfig> = self.enabled_storages().collect();
        if enabled.is_empty() {
            return Err(Error::Config("At least one storage must be enabled".to_string()));
        }

        let mut seen = HashSet::new();
        for storage in &self.storages {
            if !seen.insert(storage.name.as_str()) {
                return Err(Error::Config(format!("Duplicate storage name: {}", storage.name)));
            }
        }

        if let Some(primary) = &self.primary_storage {
            if !enabled.iter().any(|s| &s.name == primary) {
                return Err(Error::Config(format!("Primary storage '{}' is not an enabled storage", primary)));
            }
        }

        if self.compression.level > crate::compress::MAX_LEVEL {
            return Err(Error::Config(format!(
                "Compression level must be between 0 and {}",
                crate::compress::MAX_LEVEL
            )));
        }

        if self.encryption.enabled && self.encryption.key.as_deref().is_none_or(str::is_empty) {
            return Err(Error::Config("Encryption is enabled but no key is configured".to_string()));
        }

        Ok(())
    }

    pub fn enabled_storages(&self) -> impl Iterator<Item = &StorageConfig> {
        self.storages.iter().filter(|s| s.enabled)
    }

    pub fn primary_storage_name(&self) -> Option<&str> {
        self.primary_storage
            .as_deref()
            .or_else(|| self.enabled_storages().next().map(|s| s.name.as_str()))
    }

    pub fn storage_timeout(&self) -> Duration {
        Duration::from_secs(self.storage_timeout_secs)
    }

    /// Deadline for moving a file of `size` bytes to or from a storage.
    pub fn transfer_timeout(&self, size: u64) -> Duration {
        let rate = self.min_transfer_rate_kib.max(1).saturating_mul(1024);
        self.storage_timeout()
            .saturating_add(Duration::from_secs(size.div_ceil(rate)))
    }
}

#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: Option<String>,
    pub database: String,
    /// Connection URL; takes precedence over the fields above when set.
    pub url: Option<String>,
    pub dump_command: String,
    pub restore_command: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 5432,
            user: "postgres".to_string(),
            password: None,
            database: "postgres".to_string(),
            url: None,
            dump_command: "pg_dump".to_string(),
            restore_command: "psql".to_string(),
        }
    }
}

impl std::fmt::Debug for DatabaseConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DatabaseConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("database", &self.database)
            .field("dump_command", &self.dump_command)
            .field("restore_command", &self.restore_command)
            .finish()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    pub name: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(flatten)]
    pub kind: StorageKind,
}

#[derive(Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StorageKind {
    Local {
        path: PathBuf,
    },
    S3 {
        bucket: String,
        #[serde(default)]
        prefix: String,
        #[serde(default)]
        region: Option<String>,
        #[serde(default)]
        endpoint: Option<String>,
        #[serde(default)]
        access_key: Option<String>,
        #[serde(default)]
        secret_key: Option<String>,
        #[serde(default)]
        force_path_style: bool,
    },
    Webdav {
        url: String,
        #[serde(default)]
        username: Option<String>,
        #[serde(default)]
        password: Option<String>,
    },
}

impl std::fmt::Debug for StorageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StorageKind::Local { path } => f.debug_struct("Local").field("path", path).finish(),
            StorageKind::S3 {
                bucket,
                prefix,
                region,
                endpoint,
                access_key,
                force_path_style,
                ..
            } => f
                .debug_struct("S3")
                .field("bucket", bucket)
                .field("prefix", prefix)
                .field("region", region)
                .field("endpoint", endpoint)
                .field("access_key", access_key)
                .field("force_path_style", force_path_style)
                .finish_non_exhaustive(),
            StorageKind::Webdav { url, username, .. } => f
                .debug_struct("Webdav")
                .field("url", url)
                .field("username", username)
                .finish_non_exhaustive(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CompressionConfig {
    pub enabled: bool,
    pub level: u32,
}

impl Default for CompressionConfig {
    fn default() -> Self {
        Self { enabled: true, level: 6 }
    }
}

#[derive(Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EncryptionConfig {
    pub enabled: bool,
    pub key: Option<String>,
    pub kdf: KdfParams,
}

impl std::fmt::Debug for EncryptionConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EncryptionConfig")
            .field("enabled", &self.enabled)
            .field("key", &self.key.as_ref().map(|_| "<redacted>"))
            .field("kdf", &self.kdf)
            .finish()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthThresholds {
    pub max_backup_age_hours: u64,
    pub max_backup_size_mb: u64,
    pub min_free_space_mb: u64,
}

impl Default for HealthThresholds {
    fn default() -> Self {
        Self {
            max_backup_age_hours: 26,
            max_backup_size_mb: 10 * 1024,
            min_free_space_mb: 1024,
        }
    }
}

impl HealthThresholds {
    pub fn max_backup_age(&self) -> chrono::Duration {
        i64::try_from(self.max_backup_age_hours)
            .ok()
            .and_then(chrono::Duration::try_hours)
            .unwrap_or(chrono::Duration::MAX)
    }

    pub fn max_backup_size_bytes(&self) -> u64 {
        self.max_backup_size_mb.saturating_mul(1024 * 1024)
    }

    pub fn min_free_space_bytes(&self) -> u64 {
        self.min_free_space_mb.saturating_mul(1024 * 1024)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NotificationConfig {
    pub user_id: Option<String>,
    pub on_success: bool,
    pub on_failure: bool,
    pub on_large_backup: bool,
    pub on_health_check_failure: bool,
    pub webhook_url: Option<String>,
    pub timeout_secs: u64,
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            user_id: None,
            on_success: false,
            on_failure: true,
            on_large_backup: true,
            on_health_check_failure: true,
            webhook_url: None,
            timeout_secs: 10,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DifferentialConfig {
    pub exclude_tables: Vec<String>,
    pub timestamp_columns: Vec<String>,
    pub full_backup_weekday: Weekday,
}

impl Default for DifferentialConfig {
    fn default() -> Self {
        Self {
            exclude_tables: Vec::new(),
            timestamp_columns: vec!["updated_at".to_string()],
            full_backup_weekday: Weekday::Sun,
        }
    }
}

impl DifferentialConfig {
    pub fn backup_type_for(&self, now: DateTime<Utc>) -> BackupType {
        if now.weekday() == self.full_backup_weekday {
            BackupType::Full
        } else {
            BackupType::Differential
        }
    }
}

fn default_true() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    const SAMPLE: &str = r#"
work_dir = "/var/tmp/dumpvault"
primary_storage = "local"
storage_timeout_secs = 60

[database]
host = "db.internal"
user = "backup"
database = "app"
password = "hunter2"

[compression]
level = 9

[encryption]
enabled = true
key = "s3cret"

[retention]
daily_days = 10
weekly_anchor = "Mon"

[differential]
exclude_tables = ["sessions"]
full_backup_weekday = "Sat"

[[storages]]
name = "local"
type = "local"
path = "/var/backups/db"

[[storages]]
name = "offsite"
type = "s3"
bucket = "backups"
prefix = "db"
endpoint = "http://minio:9000"
force_path_style = true

[[storages]]
name = "nas"
type = "webdav"
enabled = false
url = "https://nas.example/dav/backups"
username = "backup"
"#;

    #[test]
    fn test_parse_sample_config() {
        let config = Config::from_toml(SAMPLE).unwrap();
        config.validate().unwrap();

        assert_eq!(config.database.port, 5432);
        assert_eq!(config.database.database, "app");
        assert_eq!(config.compression.level, 9);
        assert!(config.compression.enabled);
        assert_eq!(config.retention.daily_days, 10);
        assert_eq!(config.retention.weekly_anchor, Weekday::Mon);
        assert_eq!(config.differential.full_backup_weekday, Weekday::Sat);
        assert_eq!(config.differential.timestamp_columns, vec!["updated_at"]);
        assert_eq!(config.storages.len(), 3);
        assert_eq!(config.enabled_storages().count(), 2);
        assert!(matches!(config.storages[1].kind, StorageKind::S3 { force_path_style: true, .. }));
        assert!(matches!(config.storages[2].kind, StorageKind::Webdav { .. }));
        assert_eq!(config.primary_storage_name(), Some("local"));
        assert_eq!(config.storage_timeout(), Duration::from_secs(60));
    }

    #[test]
    fn test_validate_rejects_bad_configs() {
        let mut config = Config::from_toml(SAMPLE).unwrap();
        config.encryption.key = None;
        assert!(config.validate().is_err());

        let mut config = Config::from_toml(SAMPLE).unwrap();
        config.primary_storage = Some("nas".to_string());
        assert!(config.validate().is_err());

        let mut config = Config::from_toml(SAMPLE).unwrap();
        config.compression.level = 12;
        assert!(config.validate().is_err());

        let mut config = Config::from_toml(SAMPLE).unwrap();
        config.storages[1].name = "local".to_string();
        assert!(config.validate().is_err());

        assert!(Config::default().validate().is_err());
    }

    #[test]
    fn test_primary_defaults_to_first_enabled() {
        let mut config = Config::from_toml(SAMPLE).unwrap();
        config.primary_storage = None;
        config.storages[0].enabled = false;
        assert_eq!(config.primary_storage_name(), Some("offsite"));
    }

    #[test]
    fn test_secrets_are_redacted() {
        let config = Config::from_toml(SAMPLE).unwrap();
        let debug = format!("{:?}", config);
        assert!(!debug.contains("hunter2"));
        assert!(!debug.contains("s3cret"));
    }

    #[test]
    fn test_transfer_timeout_scales_with_size() {
        let mut config = Config::from_toml(SAMPLE).unwrap();
        config.min_transfer_rate_kib = 1024;
        assert_eq!(config.transfer_timeout(0), Duration::from_secs(60));
        assert_eq!(config.transfer_timeout(10 * 1024 * 1024 * 1024), Duration::from_secs(60 + 10 * 1024));
        assert_eq!(config.transfer_timeout(1), Duration::from_secs(61));

        config.min_transfer_rate_kib = 0;
        assert_eq!(config.transfer_timeout(4096), Duration::from_secs(60 + 4));
        assert!(config.transfer_timeout(u64::MAX) > Duration::from_secs(60));
    }

    #[test]
    fn test_huge_thresholds_saturate() {
        let thresholds = HealthThresholds {
            max_backup_age_hours: u64::MAX,
            max_backup_size_mb: u64::MAX,
            min_free_space_mb: u64::MAX / 2,
        };
        assert_eq!(thresholds.max_backup_age(), chrono::Duration::MAX);
        assert_eq!(thresholds.max_backup_size_bytes(), u64::MAX);
        assert_eq!(thresholds.min_free_space_bytes(), u64::MAX);
        assert_eq!(HealthThresholds::default().max_backup_age(), chrono::Duration::hours(26));
    }

    #[test]
    fn test_weekday_rule() {
        let config = DifferentialConfig::default();
        let sunday = Utc.with_ymd_and_hms(2026, 10, 18, 2, 0, 0).unwrap();
        let monday = Utc.with_ymd_and_hms(2026, 10, 19, 2, 0, 0).unwrap();
        assert_eq!(config.backup_type_for(sunday), BackupType::Full);
        assert_eq!(config.backup_type_for(monday), BackupType::Differential);
    }
}
