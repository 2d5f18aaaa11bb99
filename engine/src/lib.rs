pub mod health;
pub mod orchestrator;

pub use health::HealthMonitor;
pub use orchestrator::Orchestrator;
