use crate::backend::{Backend, BackendType};
use async_trait::async_trait;
use dumpvault_core::{BackupArtifact, Error, Result};
use std::path::{Path, PathBuf};
use sysinfo::Disks;
use tokio::fs;
use tracing::debug;

pub struct LocalBackend {
    name: String,
    base_path: PathBuf,
}

impl LocalBackend {
    pub fn new<P: AsRef<Path>>(name: impl Into<String>, base_path: P) -> Self {
        Self {
            name: name.into(),
            base_path: base_path.as_ref().to_path_buf(),
        }
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    fn full_path(&self, remote_name: &str) -> Result<PathBuf> {
        if remote_name.is_empty() || remote_name.contains(['/', '\\']) || remote_name == ".." {
            return Err(Error::Backend(format!("Invalid remote name: {:?}", remote_name)));
        }
        Ok(self.base_path.join(remote_name))
    }
}

#[async_trait]
impl Backend for LocalBackend {
    fn name(&self) -> &str {
        &self.name
    }

    fn backend_type(&self) -> BackendType {
        BackendType::Local
    }

    async fn is_available(&self) -> bool {
        if let Err(e) = fs::create_dir_all(&self.base_path).await {
            debug!("Local storage {} unavailable: {}", self.base_path.display(), e);
            return false;
        }
        fs::metadata(&self.base_path)
            .await
            .map(|m| m.is_dir() && !m.permissions().readonly())
            .unwrap_or(false)
    }

    async fn upload(&self, local_path: &Path, remote_name: &str) -> Result<()> {
        let target = self.full_path(remote_name)?;
        fs::create_dir_all(&self.base_path).await?;

        // Copy under a temporary name so a partial file never looks like an artifact.
        let partial = self.base_path.join(format!(".{}.partial", remote_name));
        let copied = match fs::copy(local_path, &partial).await {
            Ok(_) => fs::rename(&partial, &target)
                .await
                .map_err(|e| Error::Backend(format!("Failed to finalize {}: {}", remote_name, e))),
            Err(e) => Err(Error::Backend(format!("Failed to write {}: {}", remote_name, e))),
        };
        if copied.is_err() {
            if let Err(e) = fs::remove_file(&partial).await {
                if e.kind() != std::io::ErrorKind::NotFound {
                    debug!("Could not remove {}: {}", partial.display(), e);
                }
            }
        }
        copied
    }

    async fn download(&self, remote_name: &str, local_path: &Path) -> Result<()> {
        let source = self.full_path(remote_name)?;
        fs::copy(&source, local_path)
            .await
            .map_err(|e| Error::Backend(format!("Failed to read {}: {}", remote_name, e)))?;
        Ok(())
    }

    async fn delete(&self, remote_name: &str) -> Result<()> {
        let full_path = self.full_path(remote_name)?;
        fs::remove_file(&full_path)
            .await
            .map_err(|e| Error::Backend(format!("Failed to delete {}: {}", remote_name, e)))?;
        Ok(())
    }

    async fn list(&self) -> Result<Vec<BackupArtifact>> {
        let mut results = Vec::new();
        if !self.base_path.is_dir() {
            return Ok(results);
        }

        let mut entries = fs::read_dir(&self.base_path).await?;
        while let Some(entry) = entries.next_entry().await? {
            let Some(name) = entry.file_name().to_str().map(str::to_string) else {
                continue;
            };
            let metadata = entry.metadata().await?;
            if !metadata.is_file() {
                continue;
            }
            let path = entry.path().to_string_lossy().to_string();
            if let Some(artifact) = BackupArtifact::from_listing(&name, path, metadata.len()) {
                results.push(artifact);
            }
        }

        Ok(results)
    }

    async fn exists(&self, remote_name: &str) -> Result<bool> {
        let path = self.full_path(remote_name)?;
        Ok(fs::try_exists(&path).await?)
    }

    async fn free_space(&self) -> Result<Option<u64>> {
        let base = fs::canonicalize(&self.base_path).await?;
        let space = tokio::task::spawn_blocking(move || {
            let disks = Disks::new_with_refreshed_list();
            disks
                .list()
                .iter()
                .filter(|disk| base.starts_with(disk.mount_point()))
                .max_by_key(|disk| disk.mount_point().as_os_str().len())
                .map(|disk| disk.available_space())
        })
        .await
        .map_err(|e| Error::Other(format!("Disk query failed: {}", e)))?;
        Ok(space)
    }
}
