pub mod auth;
pub mod memory;
pub mod pubsub;

pub use auth::{ServiceAccountKey, TokenSource};
pub use memory::{MemoryConnector, MemoryTransport, Script};
pub use pubsub::{PubSubClient, PubSubConnector};

use crate::error::PublishError;
use crate::Result;
use async_trait::async_trait;
use bytes::Bytes;
use std::fmt;
use std::sync::Arc;

/// Payload framing a topic declares for schema-validated messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WireEncoding {
    Binary,
    Json,
    Unspecified,
}

impl WireEncoding {
    pub fn from_api(value: &str) -> Self {
        match value {
            "BINARY" => WireEncoding::Binary,
            "JSON" => WireEncoding::Json,
            _ => WireEncoding::Unspecified,
        }
    }
}

impl fmt::Display for WireEncoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WireEncoding::Binary => f.write_str("BINARY"),
            WireEncoding::Json => f.write_str("JSON"),
            WireEncoding::Unspecified => f.write_str("ENCODING_UNSPECIFIED"),
        }
    }
}

/// Opens sessions against the message bus.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(
        &self,
        project: &str,
        credentials: ServiceAccountKey,
    ) -> Result<Arc<dyn Transport>>;
}

/// An open session: sends one request worth of messages to a topic.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn topic_encoding(&self, topic: &str) -> Result<WireEncoding>;

    /// Publishes the messages as a single request and returns their message
    /// ids in submission order.
    async fn publish(
        &self,
        topic: &str,
        messages: Vec<Bytes>,
    ) -> std::result::Result<Vec<String>, PublishError>;
}
