//! Error types and result handling for pubsub-sink.
//!
//! This module defines the main error type [`Error`], the per-message
//! [`PublishError`] that a publish handle resolves to, and a convenience
//! [`Result`] type alias used throughout the crate.
//!
//! # Example
//!
//! ```rust
//! use pubsub_sink::{Error, Result};
//!
//! fn require_topic(topic: &str) -> Result<()> {
//!     if topic.is_empty() {
//!         return Err(Error::Config("topic is required".to_string()));
//!     }
//!     Ok(())
//! }
//!
//! match require_topic("") {
//!     Ok(()) => println!("Configured"),
//!     Err(Error::Config(msg)) => eprintln!("Configuration error: {}", msg),
//!     Err(e) => eprintln!("Other error: {}", e),
//! }
//! ```

use crate::config::SchemaType;
use thiserror::Error;

/// The main error type for pubsub-sink operations.
///
/// Everything here is fatal for the operation that produced it. Failures of
/// individual messages travel as [`PublishError`] instead and never abort a
/// flush.
#[derive(Error, Debug)]
pub enum Error {
    /// Missing or invalid configuration value.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Configuration file or environment could not be loaded.
    #[error("Settings error: {0}")]
    Settings(#[from] config::ConfigError),

    /// Credentials file missing, unreadable or malformed.
    #[error("Credentials error: {0}")]
    Credentials(String),

    /// The message bus could not be reached or refused the session.
    #[error("Connection error: {0}")]
    Connection(String),

    /// The schema definition could not be parsed.
    #[error("Schema error: {0}")]
    Schema(String),

    /// A schema type that has no working encoder.
    #[error("Unsupported schema type: {0}")]
    UnsupportedSchema(SchemaType),

    /// The topic advertises a wire encoding no codec exists for.
    #[error("Invalid topic encoding: {0}")]
    InvalidEncoding(String),

    /// A record could not be converted into a payload.
    #[error("Encode error: {0}")]
    Encode(String),

    /// Avro codec error.
    #[error("Avro error: {0}")]
    Avro(#[from] apache_avro::Error),

    /// I/O error, typically from reading credential or schema files.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error while reading credentials or encoding payloads.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// HTTP client error talking to the bus or the token endpoint.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

/// Why a single message was not published.
///
/// [`PublishError::DeadlineExceeded`], [`PublishError::Cancelled`] and
/// [`PublishError::Unavailable`] mean the message may not have reached the
/// bus; every other variant is a definite rejection.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PublishError {
    /// The transport did not acknowledge within the publish timeout.
    #[error("deadline exceeded")]
    DeadlineExceeded,

    /// The publish was abandoned before it resolved.
    #[error("publish cancelled")]
    Cancelled,

    /// The bus answered with an error status.
    #[error("rejected by bus ({status}): {message}")]
    Rejected {
        /// HTTP status returned by the bus
        status: u16,
        /// Error body returned by the bus
        message: String,
    },

    /// The payload exceeds the largest message the bus accepts.
    #[error("message of {size} bytes exceeds the {limit} byte limit")]
    MessageTooLarge {
        /// Payload size in bytes
        size: usize,
        /// Largest accepted payload
        limit: usize,
    },

    /// The bus could not be reached or asked to try again later.
    #[error("bus unavailable: {0}")]
    Unavailable(String),

    /// The publisher was already drained.
    #[error("publisher has been stopped")]
    Stopped,

    /// Any other transport failure.
    #[error("transport error: {0}")]
    Transport(String),
}

impl PublishError {
    /// Returns true when the message might not have been sent, so the whole
    /// batch should be redelivered.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            PublishError::DeadlineExceeded | PublishError::Cancelled | PublishError::Unavailable(_)
        )
    }
}

/// A convenient Result type alias for pubsub-sink operations.
///
/// This is equivalent to `std::result::Result<T, pubsub_sink::Error>`.
///
/// # Example
///
/// ```rust
/// use pubsub_sink::Result;
///
/// fn do_something() -> Result<String> {
///     Ok("Success".to_string())
/// }
/// ```
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(PublishError::DeadlineExceeded.is_transient());
        assert!(PublishError::Cancelled.is_transient());
        assert!(PublishError::Unavailable("503".to_string()).is_transient());

        assert!(!PublishError::Stopped.is_transient());
        assert!(!PublishError::Transport("reset".to_string()).is_transient());
        assert!(!PublishError::Rejected {
            status: 400,
            message: "bad payload".to_string()
        }
        .is_transient());
        assert!(!PublishError::MessageTooLarge {
            size: 11,
            limit: 10
        }
        .is_transient());
    }
}
