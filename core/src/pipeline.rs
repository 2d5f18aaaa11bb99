//! File-to-file transforms applied to a dump on its way to storage and back.
//!
//! Outbound order is compress then encrypt, inbound is decrypt then
//! decompress. Each stage reads one temp file and writes the next, removing
//! its input once the output is complete, so at most two intermediates exist
//! at any time. The transforms run on the blocking pool over buffered
//! readers and writers; memory use does not depend on dump size.

use crate::compress;
use crate::config::{CompressionConfig, EncryptionConfig};
use crate::crypto::{self, StreamCipher};
use crate::types::{ArtifactName, BackupType, ENCRYPTED_EXTENSION, GZIP_EXTENSION};
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};
use tracing::debug;

#[derive(Debug, Clone)]
pub struct Pipeline {
    compression_level: Option<u32>,
    cipher: Option<StreamCipher>,
}

impl Pipeline {
    pub fn new(compression_level: Option<u32>, cipher: Option<StreamCipher>) -> Self {
        Self {
            compression_level,
            cipher,
        }
    }

    pub fn from_config(compression: &CompressionConfig, encryption: &EncryptionConfig) -> Result<Self> {
        let compression_level = compression.enabled.then_some(compression.level);
        let cipher = if encryption.enabled {
            let key = encryption
                .key
                .clone()
                .ok_or_else(|| Error::Config("Encryption is enabled but no key is configured".to_string()))?;
            Some(StreamCipher::new(key, encryption.kdf.clone())?)
        } else {
            None
        };
        Ok(Self::new(compression_level, cipher))
    }

    pub fn compresses(&self) -> bool {
        self.compression_level.is_some()
    }

    pub fn encrypts(&self) -> bool {
        self.cipher.is_some()
    }

    pub fn artifact_name(&self, backup_type: BackupType, at: DateTime<Utc>) -> ArtifactName {
        ArtifactName::new(backup_type, at, self.compresses(), self.encrypts())
    }

    /// Compresses and encrypts `dump` as configured and returns the path of
    /// the final artifact, next to the input.
    pub async fn seal(&self, dump: PathBuf) -> Result<PathBuf> {
        let mut current = dump;

        if let Some(level) = self.compression_level {
            let output = with_suffix(&current, GZIP_EXTENSION);
            debug!("Compressing {} at level {}", current.display(), level);
            let (input, out) = (current.clone(), output.clone());
            run_blocking(move || {
                let reader = BufReader::new(File::open(&input)?);
                let writer = BufWriter::new(File::create(&out)?);
                compress::compress(reader, writer, level)
            })
            .await
            .map_err(|e| Error::CompressionFailed(stage_message(e)))?;
            consume(&current).await?;
            current = output;
        }

        if let Some(cipher) = self.cipher.clone() {
            let output = with_suffix(&current, ENCRYPTED_EXTENSION);
            debug!("Encrypting {}", current.display());
            let (input, out) = (current.clone(), output.clone());
            run_blocking(move || {
                let reader = BufReader::new(File::open(&input)?);
                let writer = BufWriter::new(File::create(&out)?);
                cipher.encrypt(reader, writer)
            })
            .await
            .map_err(|e| Error::EncryptionFailed(stage_message(e)))?;
            consume(&current).await?;
            current = output;
        }

        Ok(current)
    }

    /// Reverses [`Pipeline::seal`] for a downloaded artifact, driven by its
    /// suffixes. Returns the path of the recovered plaintext SQL.
    pub async fn open(&self, artifact: PathBuf) -> Result<PathBuf> {
        let mut current = artifact;

        if let Some(stripped) = strip_suffix(&current, ENCRYPTED_EXTENSION) {
            let cipher = self.cipher.clone().ok_or_else(|| {
                Error::RestoreDecryptFailed("Backup is encrypted but no encryption key is configured".to_string())
            })?;
            debug!("Decrypting {}", current.display());
            let (input, out) = (current.clone(), stripped.clone());
            run_blocking(move || {
                let reader = BufReader::new(File::open(&input)?);
                let writer = BufWriter::new(File::create(&out)?);
                cipher.decrypt(reader, writer)
            })
            .await
            .map_err(|e| Error::RestoreDecryptFailed(stage_message(e)))?;
            consume(&current).await?;
            current = stripped;
        }

        if let Some(stripped) = strip_suffix(&current, GZIP_EXTENSION) {
            debug!("Decompressing {}", current.display());
            let (input, out) = (current.clone(), stripped.clone());
            run_blocking(move || {
                let reader = BufReader::new(File::open(&input)?);
                let writer = BufWriter::new(File::create(&out)?);
                compress::decompress(reader, writer)
            })
            .await
            .map_err(|e| Error::RestoreDecompressFailed(stage_message(e)))?;
            consume(&current).await?;
            current = stripped;
        }

        Ok(current)
    }
}

/// blake3 checksum of a file, computed on the blocking pool.
pub async fn checksum_file(path: &Path) -> Result<String> {
    let path = path.to_path_buf();
    run_blocking(move || crypto::checksum_reader(BufReader::new(File::open(&path)?))).await
}

async fn run_blocking<T, F>(f: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| Error::Other(format!("Pipeline task failed: {}", e)))?
}

async fn consume(path: &Path) -> Result<()> {
    tokio::fs::remove_file(path).await?;
    Ok(())
}

/// Unwraps the stage-specific message so the outer error doesn't repeat
/// "Compression failed: Compression failed: ...".
fn stage_message(error: Error) -> String {
    match error {
        Error::CompressionFailed(msg) | Error::EncryptionFailed(msg) => msg,
        other => other.to_string(),
    }
}

fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(suffix);
    PathBuf::from(name)
}

fn strip_suffix(path: &Path, suffix: &str) -> Option<PathBuf> {
    let name = path.to_str()?;
    name.strip_suffix(suffix).map(PathBuf::from)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::KdfParams;

    fn cipher(secret: &str) -> StreamCipher {
        StreamCipher::new(
            secret,
            KdfParams {
                memory_kib: 1024,
                iterations: 1,
                parallelism: 1,
            },
        )
        .unwrap()
    }

    async fn write_dump(dir: &Path, contents: &[u8]) -> PathBuf {
        let path = dir.join("backup-full-2026-01-01-000000.sql");
        tokio::fs::write(&path, contents).await.unwrap();
        path
    }

    #[tokio::test]
    async fn test_seal_and_open_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let contents = b"-- dump\nCREATE TABLE a (id int);\n".repeat(500);
        let dump = write_dump(dir.path(), &contents).await;

        let pipeline = Pipeline::new(Some(6), Some(cipher("k")));
        let sealed = pipeline.seal(dump.clone()).await.unwrap();
        assert!(sealed.to_str().unwrap().ends_with(".sql.gz.enc"));
        assert!(!dump.exists());
        assert!(!with_suffix(&dump, ".gz").exists());

        let opened = pipeline.open(sealed.clone()).await.unwrap();
        assert_eq!(opened, dump);
        assert!(!sealed.exists());
        assert_eq!(tokio::fs::read(&opened).await.unwrap(), contents);
    }

    #[tokio::test]
    async fn test_disabled_stages_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let dump = write_dump(dir.path(), b"").await;

        let pipeline = Pipeline::new(None, None);
        let sealed = pipeline.seal(dump.clone()).await.unwrap();
        assert_eq!(sealed, dump);
        assert_eq!(pipeline.open(sealed).await.unwrap(), dump);
    }

    #[tokio::test]
    async fn test_open_encrypted_without_key_fails() {
        let dir = tempfile::tempdir().unwrap();
        let dump = write_dump(dir.path(), b"data").await;
        let sealed = Pipeline::new(None, Some(cipher("k"))).seal(dump).await.unwrap();

        let result = Pipeline::new(None, None).open(sealed).await;
        assert!(matches!(result, Err(Error::RestoreDecryptFailed(_))));
    }

    #[tokio::test]
    async fn test_open_with_wrong_key_fails() {
        let dir = tempfile::tempdir().unwrap();
        let dump = write_dump(dir.path(), b"data").await;
        let sealed = Pipeline::new(Some(1), Some(cipher("right"))).seal(dump).await.unwrap();

        let result = Pipeline::new(Some(1), Some(cipher("wrong"))).open(sealed).await;
        assert!(matches!(result, Err(Error::RestoreDecryptFailed(_))));
    }

    #[tokio::test]
    async fn test_open_corrupt_gzip_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("backup-full-2026-01-01-000000.sql.gz");
        tokio::fs::write(&path, b"not gzip at all").await.unwrap();

        let result = Pipeline::new(Some(6), None).open(path).await;
        assert!(matches!(result, Err(Error::RestoreDecompressFailed(_))));
    }

    #[tokio::test]
    async fn test_seal_missing_input_fails_as_compression() {
        let dir = tempfile::tempdir().unwrap();
        let result = Pipeline::new(Some(6), None).seal(dir.path().join("missing.sql")).await;
        assert!(matches!(result, Err(Error::CompressionFailed(_))));
    }

    #[test]
    fn test_artifact_name_reflects_stages() {
        let at = chrono::DateTime::parse_from_rfc3339("2026-05-06T07:08:09Z").unwrap().with_timezone(&Utc);
        let name = Pipeline::new(Some(6), None).artifact_name(BackupType::Full, at);
        assert_eq!(name.filename(), "backup-full-2026-05-06-070809.sql.gz");
    }
}
