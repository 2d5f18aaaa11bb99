use crate::backend::Backend;
use crate::local::LocalBackend;
use crate::s3::{S3Backend, S3Settings};
use crate::webdav::WebDavBackend;
use dumpvault_core::config::{StorageConfig, StorageKind};
use dumpvault_core::Result;
use std::sync::Arc;
use tracing::debug;

/// Instantiate a backend for one configured storage.
pub async fn build_backend(storage: &StorageConfig) -> Result<Arc<dyn Backend>> {
    let backend: Arc<dyn Backend> = match &storage.kind {
        StorageKind::Local { path } => Arc::new(LocalBackend::new(&storage.name, path)),
        StorageKind::S3 {
            bucket,
            prefix,
            region,
            endpoint,
            access_key,
            secret_key,
            force_path_style,
        } => {
            let settings = S3Settings {
                bucket: bucket.clone(),
                prefix: prefix.clone(),
                region: region.clone(),
                endpoint: endpoint.clone(),
                access_key: access_key.clone(),
                secret_key: secret_key.clone(),
                force_path_style: *force_path_style,
            };
            Arc::new(S3Backend::new(&storage.name, settings).await?)
        }
        StorageKind::Webdav {
            url,
            username,
            password,
        } => Arc::new(WebDavBackend::new(
            &storage.name,
            url,
            username.clone(),
            password.clone(),
        )?),
    };

    debug!(storage = %storage.name, backend = %backend.backend_type(), "Storage backend ready");
    Ok(backend)
}

/// Backends for every enabled storage, in configuration order.
pub async fn build_backends(storages: &[StorageConfig]) -> Result<Vec<Arc<dyn Backend>>> {
    let mut backends = Vec::new();
    for storage in storages.iter().filter(|s| s.enabled) {
        backends.push(build_backend(storage).await?);
    }
    Ok(backends)
}
