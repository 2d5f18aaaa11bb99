use crate::backend::{Backend, BackendType};
use async_trait::async_trait;
use aws_config::{BehaviorVersion, Region};
use aws_sdk_s3::Client;
use aws_sdk_s3::config::Credentials;
use aws_sdk_s3::primitives::ByteStream;
use dumpvault_core::{BackupArtifact, Error, Result};
use std::path::Path;
use tokio::io::AsyncWriteExt;
use tracing::debug;

#[derive(Debug, Clone, Default)]
pub struct S3Settings {
    pub bucket: String,
    pub prefix: String,
    pub region: Option<String>,
    pub endpoint: Option<String>,
    pub access_key: Option<String>,
    pub secret_key: Option<String>,
    pub force_path_style: bool,
}

pub struct S3Backend {
    name: String,
    client: Client,
    bucket: String,
    prefix: String,
}

impl S3Backend {
    pub async fn new(name: impl Into<String>, settings: S3Settings) -> Result<Self> {
        let mut loader = aws_config::defaults(BehaviorVersion::latest());
        if let Some(region) = &settings.region {
            loader = loader.region(Region::new(region.clone()));
        }
        if let Some(endpoint) = &settings.endpoint {
            loader = loader.endpoint_url(endpoint);
        }
        if let (Some(access_key), Some(secret_key)) = (&settings.access_key, &settings.secret_key) {
            loader = loader.credentials_provider(Credentials::new(
                access_key,
                secret_key,
                None,
                None,
                "dumpvault-config",
            ));
        }
        let shared = loader.load().await;

        let s3_config = aws_sdk_s3::config::Builder::from(&shared)
            .force_path_style(settings.force_path_style)
            .build();

        Ok(Self {
            name: name.into(),
            client: Client::from_conf(s3_config),
            bucket: settings.bucket,
            prefix: settings.prefix.trim_matches('/').to_string(),
        })
    }

    fn full_key(&self, path: &str) -> String {
        full_key(&self.prefix, path)
    }

    fn list_prefix(&self) -> Option<String> {
        if self.prefix.is_empty() {
            None
        } else {
            Some(format!("{}/", self.prefix))
        }
    }
}

fn full_key(prefix: &str, path: &str) -> String {
    if prefix.is_empty() {
        path.to_string()
    } else {
        format!("{}/{}", prefix, path)
    }
}

/// Filename of a listed key when it sits directly under `prefix`.
fn key_filename<'a>(prefix: &str, key: &'a str) -> Option<&'a str> {
    let relative = if prefix.is_empty() {
        key
    } else {
        key.strip_prefix(prefix)?.strip_prefix('/')?
    };
    (!relative.is_empty() && !relative.contains('/')).then_some(relative)
}

#[async_trait]
impl Backend for S3Backend {
    fn name(&self) -> &str {
        &self.name
    }

    fn backend_type(&self) -> BackendType {
        BackendType::S3
    }

    async fn is_available(&self) -> bool {
        match self.client.head_bucket().bucket(&self.bucket).send().await {
            Ok(_) => true,
            Err(e) => {
                debug!("Bucket {} not accessible: {}", self.bucket, e);
                false
            }
        }
    }

    async fn upload(&self, local_path: &Path, remote_name: &str) -> Result<()> {
        let body = ByteStream::from_path(local_path)
            .await
            .map_err(|e| Error::Backend(format!("Failed to open {}: {}", local_path.display(), e)))?;

        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(self.full_key(remote_name))
            .body(body)
            .send()
            .await
            .map_err(|e| Error::Backend(format!("Failed to write {}: {}", remote_name, e)))?;

        Ok(())
    }

    async fn download(&self, remote_name: &str, local_path: &Path) -> Result<()> {
        let response = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(self.full_key(remote_name))
            .send()
            .await
            .map_err(|e| Error::Backend(format!("Failed to read {}: {}", remote_name, e)))?;

        let mut body = response.body.into_async_read();
        let mut file = tokio::fs::File::create(local_path).await?;
        tokio::io::copy(&mut body, &mut file)
            .await
            .map_err(|e| Error::Backend(format!("Failed to read body of {}: {}", remote_name, e)))?;
        file.flush().await?;

        Ok(())
    }

    async fn delete(&self, remote_name: &str) -> Result<()> {
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(self.full_key(remote_name))
            .send()
            .await
            .map_err(|e| Error::Backend(format!("Failed to delete {}: {}", remote_name, e)))?;

        Ok(())
    }

    async fn list(&self) -> Result<Vec<BackupArtifact>> {
        let mut results = Vec::new();
        let mut continuation_token = None;

        loop {
            let request = self
                .client
                .list_objects_v2()
                .bucket(&self.bucket)
                .set_prefix(self.list_prefix())
                .set_continuation_token(continuation_token);

            let response = request
                .send()
                .await
                .map_err(|e| Error::Backend(format!("Failed to list: {}", e)))?;

            for object in response.contents() {
                let Some(key) = object.key() else {
                    continue;
                };
                let Some(filename) = key_filename(&self.prefix, key) else {
                    continue;
                };
                let size = object.size().unwrap_or(0).max(0) as u64;
                if let Some(artifact) = BackupArtifact::from_listing(filename, key, size) {
                    results.push(artifact);
                }
            }

            if response.is_truncated().unwrap_or(false) {
                continuation_token = response.next_continuation_token().map(str::to_string);
            } else {
                break;
            }
        }

        Ok(results)
    }

    async fn exists(&self, remote_name: &str) -> Result<bool> {
        let result = self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(self.full_key(remote_name))
            .send()
            .await;

        match result {
            Ok(_) => Ok(true),
            Err(e) => {
                if e.as_service_error().is_some_and(|se| se.is_not_found()) {
                    Ok(false)
                } else {
                    Err(Error::Backend(format!("Failed to check existence: {}", e)))
                }
            }
        }
    }

    async fn free_space(&self) -> Result<Option<u64>> {
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_key() {
        assert_eq!(full_key("", "a.sql"), "a.sql");
        assert_eq!(full_key("db/prod", "a.sql"), "db/prod/a.sql");
    }

    #[test]
    fn test_key_filename() {
        assert_eq!(key_filename("", "a.sql"), Some("a.sql"));
        assert_eq!(key_filename("db", "db/a.sql"), Some("a.sql"));
        assert_eq!(key_filename("db", "db/nested/a.sql"), None);
        assert_eq!(key_filename("db", "dbx/a.sql"), None);
        assert_eq!(key_filename("db", "db/"), None);
    }
}
