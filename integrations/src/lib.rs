pub mod catalog;
pub mod notify;
pub mod postgres;
pub mod process;

pub use catalog::PgCatalog;
pub use notify::{FanoutNotifier, LogNotifier, WebhookNotifier, notifier_from_config};
pub use postgres::PgTools;
pub use process::TokioProcessRunner;
