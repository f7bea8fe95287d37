//! The long-lived publishing service.
//!
//! A [`Keeper`] owns the bus session, the batch publisher bound to one topic
//! and the payload encoder selected from the schema configuration. It is
//! built once at startup, shared by reference with every flush, and stopped
//! once at shutdown.
//!
//! # Example
//!
//! ```rust,no_run
//! use pubsub_sink::keeper::{Keeper, KeeperOptions};
//! use pubsub_sink::transport::PubSubConnector;
//!
//! # async fn example() -> pubsub_sink::Result<()> {
//! let options = KeeperOptions::new("my-project", "logs", "/etc/pubsub/key.json");
//! let keeper = Keeper::connect(&PubSubConnector::from_env(), options).await?;
//!
//! // ... flush batches ...
//!
//! keeper.stop().await;
//! # Ok(())
//! # }
//! ```

use crate::codec::{AvroCodec, PayloadEncoder};
use crate::config::{PublishSettings, SchemaConfig, SchemaType};
use crate::flush::{self, FlushReport};
use crate::publisher::{BatchPublisher, PublishHandle};
use crate::record::Record;
use crate::transport::{Connector, ServiceAccountKey};
use crate::{Error, Result};
use bytes::Bytes;
use std::path::PathBuf;
use tracing::{info, instrument};

/// Everything needed to build a [`Keeper`].
#[derive(Debug, Clone, Default)]
pub struct KeeperOptions {
    pub project: String,
    pub topic: String,
    pub credentials_path: PathBuf,
    /// Batching thresholds; library defaults when `None`.
    pub publish_settings: Option<PublishSettings>,
    /// Payload schema; raw mode when `None`.
    pub schema: Option<SchemaConfig>,
    /// Log every decoded record at debug level.
    pub debug: bool,
}

impl KeeperOptions {
    pub fn new(
        project: impl Into<String>,
        topic: impl Into<String>,
        credentials_path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            project: project.into(),
            topic: topic.into(),
            credentials_path: credentials_path.into(),
            ..Default::default()
        }
    }

    pub fn with_publish_settings(mut self, settings: PublishSettings) -> Self {
        self.publish_settings = Some(settings);
        self
    }

    pub fn with_schema(mut self, schema: SchemaConfig) -> Self {
        self.schema = Some(schema);
        self
    }
}

pub struct Keeper {
    publisher: BatchPublisher,
    encoder: PayloadEncoder,
    debug: bool,
}

impl Keeper {
    /// Opens a session for the configured topic and selects the encoder.
    ///
    /// # Errors
    ///
    /// Returns `Err` if:
    /// - project, topic or credentials path is empty, or the schema type has
    ///   no encoder (before anything else is attempted)
    /// - the credentials file cannot be read or parsed
    /// - the connection cannot be established
    /// - a schema codec is requested and the schema is malformed or the
    ///   topic's wire encoding is unrecognized
    #[instrument(skip_all, fields(project = %options.project, topic = %options.topic))]
    pub async fn connect(connector: &dyn Connector, options: KeeperOptions) -> Result<Self> {
        if options.project.is_empty()
            || options.topic.is_empty()
            || options.credentials_path.as_os_str().is_empty()
        {
            return Err(Error::Config(
                "project, topic and credentials path are required".to_string(),
            ));
        }

        let schema = options.schema.unwrap_or_default();
        let avro = match schema.schema_type {
            SchemaType::None => false,
            SchemaType::Avro => true,
            SchemaType::ProtocolBuffer => {
                return Err(Error::UnsupportedSchema(SchemaType::ProtocolBuffer));
            }
        };

        let key_bytes = tokio::fs::read(&options.credentials_path)
            .await
            .map_err(|e| {
                Error::Credentials(format!(
                    "cannot read {:?}: {}",
                    options.credentials_path, e
                ))
            })?;
        let credentials = ServiceAccountKey::from_json(&key_bytes)?;

        let transport = connector.connect(&options.project, credentials).await?;

        let encoder = if avro {
            let encoding = transport.topic_encoding(&options.topic).await?;
            PayloadEncoder::Avro(AvroCodec::new(&schema.definition, encoding)?)
        } else {
            PayloadEncoder::Raw
        };

        let publisher = BatchPublisher::new(
            transport,
            &options.topic,
            options.publish_settings.unwrap_or_default(),
        );

        info!(mode = encoder.mode(), "Keeper ready");

        Ok(Self {
            publisher,
            encoder,
            debug: options.debug,
        })
    }

    pub fn topic(&self) -> &str {
        self.publisher.topic()
    }

    pub fn encoder(&self) -> &PayloadEncoder {
        &self.encoder
    }

    pub fn publish_settings(&self) -> &PublishSettings {
        self.publisher.settings()
    }

    pub fn debug(&self) -> bool {
        self.debug
    }

    /// Queues one payload; `None` when the payload is empty.
    pub fn enqueue(&self, payload: Bytes) -> Option<PublishHandle> {
        self.publisher.enqueue(payload)
    }

    /// Publishes one batch of host records; see [`flush::flush`].
    pub async fn flush<I>(&self, records: I, tag: &str) -> FlushReport
    where
        I: IntoIterator<Item = Record>,
    {
        flush::flush(self, records, tag).await
    }

    /// Drains the publisher. Safe to call more than once.
    pub async fn stop(&self) {
        info!(topic = %self.topic(), "Stopping keeper");
        self.publisher.drain().await;
    }
}
