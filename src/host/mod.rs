//! The boundary with the log-processing host.
//!
//! The host drives the plugin through four callbacks: register, init, flush
//! and exit. [`OutputPlugin`] implements them on top of a [`Keeper`]; the
//! caller owns the plugin value for the lifetime of the pipeline.

mod decoder;

pub use decoder::{ChunkDecoder, JsonLinesDecoder};

use crate::config::Config;
use crate::flush::FlushStatus;
use crate::keeper::Keeper;
use crate::transport::Connector;
use crate::Result;
use std::collections::HashMap;
use tracing::{error, info};

pub const PLUGIN_NAME: &str = "pubsub";
pub const PLUGIN_DESCRIPTION: &str = "output pubsub";

/// Where plugin configuration keys are read from.
pub trait ConfigSource {
    /// The value of `key`, or `None` when it is unset or empty.
    fn config_key(&self, key: &str) -> Option<String>;
}

/// Key lookup ignores ASCII case, as the host's does.
impl ConfigSource for HashMap<String, String> {
    fn config_key(&self, key: &str) -> Option<String> {
        self.iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(_, v)| v.clone())
            .filter(|v| !v.is_empty())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Registration {
    pub name: &'static str,
    pub description: &'static str,
}

pub struct OutputPlugin {
    keeper: Keeper,
}

impl OutputPlugin {
    pub fn register() -> Registration {
        Registration {
            name: PLUGIN_NAME,
            description: PLUGIN_DESCRIPTION,
        }
    }

    /// Reads the plugin keys and starts the keeper.
    pub async fn init<S>(source: &S, connector: &dyn Connector) -> Result<Self>
    where
        S: ConfigSource + ?Sized,
    {
        let config = Config::from_source(source)?;
        config.log_summary();

        let options = config.keeper_options().await?;
        let keeper = Keeper::connect(connector, options).await?;

        info!(plugin = PLUGIN_NAME, topic = %keeper.topic(), "Plugin initialized");
        Ok(Self { keeper })
    }

    /// The status reported to the host for an init attempt.
    pub fn init_status(result: &Result<Self>) -> FlushStatus {
        match result {
            Ok(_) => FlushStatus::Ok,
            Err(e) => {
                error!(plugin = PLUGIN_NAME, "Failed to initialize: {}", e);
                FlushStatus::Error
            }
        }
    }

    pub fn keeper(&self) -> &Keeper {
        &self.keeper
    }

    /// Publishes one host chunk and tells the host what to do with it.
    pub async fn flush(&self, data: &[u8], tag: &str) -> FlushStatus {
        self.keeper.flush(ChunkDecoder::new(data), tag).await.status
    }

    pub async fn exit(self) -> FlushStatus {
        self.keeper.stop().await;
        FlushStatus::Ok
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registration() {
        let registration = OutputPlugin::register();
        assert_eq!(registration.name, "pubsub");
        assert_eq!(registration.description, "output pubsub");
    }

    #[test]
    fn test_config_key_lookup_ignores_case() {
        let mut keys = HashMap::new();
        keys.insert("project".to_string(), "p".to_string());
        keys.insert("TOPIC".to_string(), "t".to_string());
        keys.insert("JwtPath".to_string(), String::new());

        assert_eq!(keys.config_key("Project"), Some("p".to_string()));
        assert_eq!(keys.config_key("Topic"), Some("t".to_string()));
        assert_eq!(keys.config_key("JwtPath"), None);
        assert_eq!(keys.config_key("Debug"), None);
    }
}
