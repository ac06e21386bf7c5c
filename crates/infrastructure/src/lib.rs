pub mod database;
pub mod forwarding;
pub mod message_queue;

pub use database::{DatabaseManager, PostgresJobReporter, PostgresJobStore};
pub use forwarding::BrokerForwarder;
pub use message_queue::{headers_from_properties, RabbitBroker, RabbitMessagePublisher};
