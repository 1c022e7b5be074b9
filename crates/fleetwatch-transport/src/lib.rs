// fleetwatch-transport: resilient MQTT client with topic-pattern routing

pub mod backoff;
pub mod client;
pub mod error;
pub mod payload;
pub mod topic;

pub use backoff::{ConnectPolicy, ReconnectConfig};
pub use client::{ConnectionState, Credentials, HandlerError, TransportClient, TransportConfig};
pub use error::Error;
pub use payload::{IncomingMessage, Payload};
pub use topic::TopicFilter;
