mod app_config;
mod database;
mod message_queue;
mod observability;
mod tracking;

pub use app_config::AppConfig;
pub use database::DatabaseConfig;
pub use message_queue::MessageQueueConfig;
pub use observability::ObservabilityConfig;
pub use tracking::{PublisherConfig, TrackingConfig};
