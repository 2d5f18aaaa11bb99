pub mod changes;
pub mod clock;
pub mod compress;
pub mod config;
pub mod crypto;
pub mod error;
pub mod lock;
pub mod notify;
pub mod pipeline;
pub mod process;
pub mod retention;
pub mod types;

pub use changes::{ChangeDetector, TableCatalog};
pub use clock::{Clock, FixedClock, SystemClock};
pub use config::Config;
pub use error::{Error, Result};
pub use lock::RunLock;
pub use notify::{Notification, NotificationLevel, Notifier};
pub use pipeline::Pipeline;
pub use process::{DatabaseTools, ProcessOutput, ProcessRunner};
pub use retention::{RetentionPlan, RetentionPolicy};
pub use types::*;
