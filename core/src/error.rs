use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Database dump failed: {0}")]
    DumpFailed(String),

    #[error("Compression failed: {0}")]
    CompressionFailed(String),

    #[error("Encryption failed: {0}")]
    EncryptionFailed(String),

    #[error("Upload to {storage} failed: {reason}")]
    UploadFailed { storage: String, reason: String },

    #[error("Manifest upload to {storage} failed: {reason}")]
    ManifestUploadFailed { storage: String, reason: String },

    #[error("Backup not found: {filename}")]
    RestoreNotFound { filename: String },

    #[error("Failed to decrypt backup: {0}")]
    RestoreDecryptFailed(String),

    #[error("Failed to decompress backup: {0}")]
    RestoreDecompressFailed(String),

    #[error("Restore utility exited with {code:?}: {stderr}")]
    RestoreApplyFailed { code: Option<i32>, stderr: String },

    #[error("Backend error: {0}")]
    Backend(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Operation timed out after {seconds}s: {operation}")]
    Timeout { operation: String, seconds: u64 },

    #[error("Lock conflict: {0}")]
    LockConflict(String),

    #[error("Notification error: {0}")]
    Notification(String),

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, Error>;
