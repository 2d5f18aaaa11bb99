use async_trait::async_trait;
use dumpvault_core::{BackupArtifact, Result};
use std::fmt;
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendType {
    Local,
    S3,
    WebDav,
}

impl fmt::Display for BackendType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendType::Local => f.write_str("local"),
            BackendType::S3 => f.write_str("s3"),
            BackendType::WebDav => f.write_str("webdav"),
        }
    }
}

/// A replication target for backup artifacts.
///
/// Remote names are flat filenames relative to the backend's root. Uploads
/// and downloads stream between the local filesystem and the backend.
#[async_trait]
pub trait Backend: Send + Sync {
    fn name(&self) -> &str;

    fn backend_type(&self) -> BackendType;

    /// Cheap reachability check. Never errors; an unreachable backend is `false`.
    async fn is_available(&self) -> bool;

    async fn upload(&self, local_path: &Path, remote_name: &str) -> Result<()>;

    async fn download(&self, remote_name: &str, local_path: &Path) -> Result<()>;

    async fn delete(&self, remote_name: &str) -> Result<()>;

    /// Backup artifacts stored in the backend. Objects that aren't artifacts
    /// (manifests, unrelated files) are left out.
    async fn list(&self) -> Result<Vec<BackupArtifact>>;

    async fn exists(&self, remote_name: &str) -> Result<bool>;

    /// Free space in bytes, when the backend can report it.
    async fn free_space(&self) -> Result<Option<u64>>;
}
