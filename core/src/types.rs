use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

pub const SQL_EXTENSION: &str = ".sql";
pub const GZIP_EXTENSION: &str = ".gz";
pub const ENCRYPTED_EXTENSION: &str = ".enc";
pub const MANIFEST_EXTENSION: &str = ".manifest.json";

const FILENAME_PREFIX: &str = "backup-";
const TIMESTAMP_FORMAT: &str = "%Y-%m-%d-%H%M%S";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackupType {
    Full,
    Differential,
}

impl BackupType {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackupType::Full => "full",
            BackupType::Differential => "differential",
        }
    }
}

impl fmt::Display for BackupType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BackupType {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "full" => Ok(BackupType::Full),
            "differential" => Ok(BackupType::Differential),
            other => Err(crate::Error::Other(format!("Unknown backup type: {}", other))),
        }
    }
}

/// Parsed form of `backup-{type}-{YYYY-MM-DD}-{HHMMSS}.sql[.gz][.enc]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactName {
    pub backup_type: BackupType,
    pub created_at: DateTime<Utc>,
    pub compressed: bool,
    pub encrypted: bool,
}

impl ArtifactName {
    pub fn new(backup_type: BackupType, created_at: DateTime<Utc>, compressed: bool, encrypted: bool) -> Self {
        Self {
            backup_type,
            created_at,
            compressed,
            encrypted,
        }
    }

    pub fn stem(&self) -> String {
        format!(
            "{}{}-{}",
            FILENAME_PREFIX,
            self.backup_type,
            self.created_at.format(TIMESTAMP_FORMAT)
        )
    }

    /// Name of the plaintext dump before any pipeline stage runs.
    pub fn sql_filename(&self) -> String {
        format!("{}{}", self.stem(), SQL_EXTENSION)
    }

    pub fn filename(&self) -> String {
        let mut name = self.sql_filename();
        if self.compressed {
            name.push_str(GZIP_EXTENSION);
        }
        if self.encrypted {
            name.push_str(ENCRYPTED_EXTENSION);
        }
        name
    }

    pub fn manifest_filename(&self) -> String {
        format!("{}{}", self.stem(), MANIFEST_EXTENSION)
    }

    pub fn parse(filename: &str) -> Option<Self> {
        let rest = filename.strip_prefix(FILENAME_PREFIX)?;
        let (type_str, rest) = rest.split_once('-')?;
        let backup_type = type_str.parse().ok()?;

        // YYYY-MM-DD-HHMMSS is 17 bytes
        if rest.len() < 17 || !rest.is_char_boundary(17) {
            return None;
        }
        let (timestamp, suffix) = rest.split_at(17);
        let naive = NaiveDateTime::parse_from_str(timestamp, TIMESTAMP_FORMAT).ok()?;

        let (compressed, encrypted) = match suffix {
            ".sql" => (false, false),
            ".sql.gz" => (true, false),
            ".sql.enc" => (false, true),
            ".sql.gz.enc" => (true, true),
            _ => return None,
        };

        Some(Self {
            backup_type,
            created_at: naive.and_utc(),
            compressed,
            encrypted,
        })
    }
}

/// Manifest filename for an artifact filename; unparseable names keep their
/// full name as the stem.
pub fn manifest_filename_for(filename: &str) -> String {
    match ArtifactName::parse(filename) {
        Some(name) => name.manifest_filename(),
        None => format!("{}{}", filename, MANIFEST_EXTENSION),
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupArtifact {
    pub filename: String,
    #[serde(rename = "type")]
    pub backup_type: BackupType,
    pub size: u64,
    pub created_at: DateTime<Utc>,
    pub path: String,
}

impl BackupArtifact {
    /// Builds an artifact from a listed object, ignoring anything that does
    /// not follow the artifact filename grammar (manifests, lock files, ...).
    pub fn from_listing(filename: &str, path: impl Into<String>, size: u64) -> Option<Self> {
        let name = ArtifactName::parse(filename)?;
        Some(Self {
            filename: filename.to_string(),
            backup_type: name.backup_type,
            size,
            created_at: name.created_at,
            path: path.into(),
        })
    }

    pub fn age(&self, now: DateTime<Utc>) -> chrono::Duration {
        now - self.created_at
    }
}

/// Most recent artifact of a listing, optionally restricted to one type.
pub fn latest_artifact(artifacts: &[BackupArtifact], backup_type: Option<BackupType>) -> Option<&BackupArtifact> {
    artifacts
        .iter()
        .filter(|a| backup_type.is_none_or(|t| a.backup_type == t))
        .max_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.filename.cmp(&b.filename))
        })
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Manifest {
    #[serde(rename = "type")]
    pub backup_type: BackupType,
    pub created_at: DateTime<Utc>,
    pub tables: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub full_backup_reference: Option<String>,
    #[serde(default)]
    pub size: u64,
    #[serde(default)]
    pub checksum: String,
    #[serde(default)]
    pub compressed: bool,
    #[serde(default)]
    pub encrypted: bool,
}

impl Manifest {
    pub fn to_json(&self) -> crate::Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn from_json(data: &str) -> crate::Result<Self> {
        Ok(serde_json::from_str(data)?)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupResult {
    pub success: bool,
    pub filename: String,
    #[serde(rename = "type")]
    pub backup_type: BackupType,
    pub size: u64,
    pub duration_ms: u64,
    pub storages: BTreeMap<String, bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl BackupResult {
    pub fn failed(backup_type: BackupType, duration_ms: u64, error: &crate::Error) -> Self {
        Self {
            success: false,
            filename: String::new(),
            backup_type,
            size: 0,
            duration_ms,
            storages: BTreeMap::new(),
            error: Some(error.to_string()),
        }
    }

    /// Result of a differential run that found nothing to back up.
    pub fn skipped(duration_ms: u64) -> Self {
        Self {
            success: true,
            filename: String::new(),
            backup_type: BackupType::Differential,
            size: 0,
            duration_ms,
            storages: BTreeMap::new(),
            error: None,
        }
    }

    pub fn stored_anywhere(&self) -> bool {
        self.storages.values().any(|ok| *ok)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthReport {
    pub healthy: bool,
    pub issues: Vec<String>,
    pub storages: BTreeMap<String, bool>,
    pub last_backup: Option<BackupArtifact>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CleanupReport {
    pub deleted: usize,
    pub kept: usize,
    pub errors: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RestoreResult {
    pub success: bool,
    pub filename: String,
    pub duration_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}
