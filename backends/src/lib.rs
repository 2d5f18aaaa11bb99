pub mod backend;
pub mod local;
pub mod registry;
pub mod retry;
pub mod s3;
pub mod webdav;

pub use backend::{Backend, BackendType};
pub use local::LocalBackend;
pub use registry::{build_backend, build_backends};
pub use retry::{RetryConfig, Retryable, retry_with_backoff};
pub use s3::{S3Backend, S3Settings};
pub use webdav::WebDavBackend;
