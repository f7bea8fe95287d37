use crate::host::ConfigSource;
use crate::keeper::KeeperOptions;
use crate::{Error, Result};
use serde::Deserialize;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use tracing::info;

/// Most messages the bus accepts in one publish request.
pub const MAX_PUBLISH_REQUEST_COUNT: usize = 1000;
/// Largest publish request body the bus accepts.
pub const MAX_PUBLISH_REQUEST_BYTES: usize = 10_000_000;
/// Largest single message the bus accepts.
pub const MAX_MESSAGE_BYTES: usize = 10_000_000;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub project: String,
    pub topic: String,
    pub jwt_path: String,
    pub debug: bool,
    pub timeout_ms: Option<u64>,
    pub byte_threshold: Option<usize>,
    pub count_threshold: Option<usize>,
    pub delay_threshold_ms: Option<u64>,
    pub schema_type: SchemaType,
    pub schema_file_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(try_from = "String")]
pub enum SchemaType {
    #[default]
    None,
    Avro,
    ProtocolBuffer,
}

impl FromStr for SchemaType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "" => Ok(SchemaType::None),
            "Avro" => Ok(SchemaType::Avro),
            "ProtocolBuffer" => Ok(SchemaType::ProtocolBuffer),
            other => Err(Error::Config(format!("invalid SchemaType '{}'", other))),
        }
    }
}

impl TryFrom<String> for SchemaType {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl fmt::Display for SchemaType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SchemaType::None => f.write_str("none"),
            SchemaType::Avro => f.write_str("Avro"),
            SchemaType::ProtocolBuffer => f.write_str("ProtocolBuffer"),
        }
    }
}

/// Thresholds that decide when buffered payloads go out as one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishSettings {
    pub byte_threshold: usize,
    pub count_threshold: usize,
    pub delay_threshold: Duration,
    pub timeout: Duration,
}

impl Default for PublishSettings {
    fn default() -> Self {
        Self {
            byte_threshold: default_byte_threshold(),
            count_threshold: default_count_threshold(),
            delay_threshold: Duration::from_millis(default_delay_threshold_ms()),
            timeout: Duration::from_millis(default_timeout_ms()),
        }
    }
}

impl PublishSettings {
    /// Caps the thresholds at what a single publish request may carry and
    /// replaces zero values with defaults.
    pub fn clamped(self) -> Self {
        let defaults = Self::default();
        Self {
            byte_threshold: match self.byte_threshold {
                0 => defaults.byte_threshold,
                n => n.min(MAX_PUBLISH_REQUEST_BYTES),
            },
            count_threshold: match self.count_threshold {
                0 => defaults.count_threshold,
                n => n.min(MAX_PUBLISH_REQUEST_COUNT),
            },
            delay_threshold: if self.delay_threshold.is_zero() {
                defaults.delay_threshold
            } else {
                self.delay_threshold
            },
            timeout: if self.timeout.is_zero() {
                defaults.timeout
            } else {
                self.timeout
            },
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SchemaConfig {
    pub schema_type: SchemaType,
    pub definition: String,
}

impl Config {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::from(path.as_ref()))
            .add_source(
                config::Environment::with_prefix("PUBSUB_SINK")
                    .prefix_separator("_")
                    .separator("__"),
            )
            .build()?;

        Ok(settings.try_deserialize()?)
    }

    /// Reads the plugin keys handed over by the host.
    pub fn from_source<S: ConfigSource + ?Sized>(source: &S) -> Result<Self> {
        let mut config = Config {
            project: source.config_key("Project").unwrap_or_default(),
            topic: source.config_key("Topic").unwrap_or_default(),
            jwt_path: source.config_key("JwtPath").unwrap_or_default(),
            ..Default::default()
        };

        if let Some(value) = source.config_key("Debug") {
            config.debug = parse_bool(&value)
                .ok_or_else(|| Error::Config(format!("invalid Debug value '{}'", value)))?;
        }
        config.timeout_ms = parse_number(source, "Timeout")?;
        config.byte_threshold = parse_number(source, "ByteThreshold")?;
        config.count_threshold = parse_number(source, "CountThreshold")?;
        config.delay_threshold_ms = parse_number(source, "DelayThreshold")?;
        if let Some(value) = source.config_key("SchemaType") {
            config.schema_type = value.parse()?;
        }
        config.schema_file_path = source.config_key("SchemaFilePath").map(PathBuf::from);

        Ok(config)
    }

    pub fn publish_settings(&self) -> PublishSettings {
        let defaults = PublishSettings::default();
        PublishSettings {
            byte_threshold: self.byte_threshold.unwrap_or(defaults.byte_threshold),
            count_threshold: self.count_threshold.unwrap_or(defaults.count_threshold),
            delay_threshold: self
                .delay_threshold_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.delay_threshold),
            timeout: self
                .timeout_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.timeout),
        }
        .clamped()
    }

    /// Loads the schema definition file, if one is configured, and assembles
    /// everything the keeper needs.
    pub async fn keeper_options(&self) -> Result<KeeperOptions> {
        let definition = match &self.schema_file_path {
            Some(path) => tokio::fs::read_to_string(path).await.map_err(|e| {
                Error::Config(format!("cannot read schema file {:?}: {}", path, e))
            })?,
            None => String::new(),
        };

        Ok(KeeperOptions {
            project: self.project.clone(),
            topic: self.topic.clone(),
            credentials_path: PathBuf::from(&self.jwt_path),
            publish_settings: Some(self.publish_settings()),
            schema: Some(SchemaConfig {
                schema_type: self.schema_type,
                definition,
            }),
            debug: self.debug,
        })
    }

    pub fn log_summary(&self) {
        let settings = self.publish_settings();
        info!(
            project = %self.project,
            topic = %self.topic,
            jwt_path = %self.jwt_path,
            debug = self.debug,
            timeout_ms = settings.timeout.as_millis() as u64,
            byte_threshold = settings.byte_threshold,
            count_threshold = settings.count_threshold,
            delay_threshold_ms = settings.delay_threshold.as_millis() as u64,
            schema_type = %self.schema_type,
            schema_file_path = ?self.schema_file_path,
            "Plugin parameters"
        );
    }
}

fn parse_number<S, T>(source: &S, key: &str) -> Result<Option<T>>
where
    S: ConfigSource + ?Sized,
    T: FromStr,
{
    match source.config_key(key) {
        Some(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| Error::Config(format!("invalid {} value '{}'", key, value))),
        None => Ok(None),
    }
}

/// Accepts the boolean spellings the host documents for its options.
pub fn parse_bool(value: &str) -> Option<bool> {
    match value {
        "1" | "t" | "T" | "TRUE" | "true" | "True" => Some(true),
        "0" | "f" | "F" | "FALSE" | "false" | "False" => Some(false),
        _ => None,
    }
}

fn default_byte_threshold() -> usize {
    1_000_000
}

fn default_count_threshold() -> usize {
    100
}

fn default_delay_threshold_ms() -> u64 {
    10
}

fn default_timeout_ms() -> u64 {
    60_000
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    fn source(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_from_source_reads_all_keys() {
        let keys = source(&[
            ("Project", "my-project"),
            ("Topic", "logs"),
            ("JwtPath", "/etc/creds.json"),
            ("Debug", "true"),
            ("Timeout", "10000"),
            ("ByteThreshold", "1000000"),
            ("CountThreshold", "100"),
            ("DelayThreshold", "100"),
            ("SchemaType", "Avro"),
            ("SchemaFilePath", "/etc/schema.avsc"),
        ]);

        let config = Config::from_source(&keys).unwrap();
        assert_eq!(config.project, "my-project");
        assert_eq!(config.topic, "logs");
        assert_eq!(config.jwt_path, "/etc/creds.json");
        assert!(config.debug);
        assert_eq!(config.timeout_ms, Some(10_000));
        assert_eq!(config.byte_threshold, Some(1_000_000));
        assert_eq!(config.count_threshold, Some(100));
        assert_eq!(config.delay_threshold_ms, Some(100));
        assert_eq!(config.schema_type, SchemaType::Avro);
        assert_eq!(
            config.schema_file_path,
            Some(PathBuf::from("/etc/schema.avsc"))
        );

        let settings = config.publish_settings();
        assert_eq!(settings.timeout, Duration::from_secs(10));
        assert_eq!(settings.delay_threshold, Duration::from_millis(100));
        assert_eq!(settings.count_threshold, 100);
    }

    #[test]
    fn test_missing_keys_use_defaults() {
        let config = Config::from_source(&source(&[])).unwrap();
        assert!(!config.debug);
        assert_eq!(config.schema_type, SchemaType::None);
        assert_eq!(config.publish_settings(), PublishSettings::default());
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        assert!(Config::from_source(&source(&[("Debug", "yes")])).is_err());
        assert!(Config::from_source(&source(&[("Timeout", "-5")])).is_err());
        assert!(Config::from_source(&source(&[("CountThreshold", "many")])).is_err());
        assert!(Config::from_source(&source(&[("SchemaType", "Thrift")])).is_err());
    }

    #[test]
    fn test_parse_bool_spellings() {
        for yes in ["1", "t", "T", "TRUE", "true", "True"] {
            assert_eq!(parse_bool(yes), Some(true));
        }
        for no in ["0", "f", "F", "FALSE", "false", "False"] {
            assert_eq!(parse_bool(no), Some(false));
        }
        assert_eq!(parse_bool("on"), None);
    }

    #[test]
    fn test_settings_are_clamped_to_bus_limits() {
        let settings = PublishSettings {
            byte_threshold: 50_000_000,
            count_threshold: 5000,
            delay_threshold: Duration::ZERO,
            timeout: Duration::from_secs(5),
        }
        .clamped();

        assert_eq!(settings.byte_threshold, MAX_PUBLISH_REQUEST_BYTES);
        assert_eq!(settings.count_threshold, MAX_PUBLISH_REQUEST_COUNT);
        assert_eq!(settings.delay_threshold, Duration::from_millis(10));
        assert_eq!(settings.timeout, Duration::from_secs(5));
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
project = "file-project"
topic = "file-topic"
jwt_path = "/tmp/creds.json"
count_threshold = 10
schema_type = "Avro"
"#
        )
        .unwrap();

        let config = Config::from_file(file.path()).unwrap();
        assert_eq!(config.project, "file-project");
        assert_eq!(config.topic, "file-topic");
        assert_eq!(config.count_threshold, Some(10));
        assert_eq!(config.schema_type, SchemaType::Avro);
        assert_eq!(config.timeout_ms, None);
    }

    #[tokio::test]
    async fn test_keeper_options_reads_schema_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"type": "string"}}"#).unwrap();

        let config = Config {
            project: "p".to_string(),
            topic: "t".to_string(),
            jwt_path: "/creds.json".to_string(),
            schema_type: SchemaType::Avro,
            schema_file_path: Some(file.path().to_path_buf()),
            ..Default::default()
        };

        let options = config.keeper_options().await.unwrap();
        let schema = options.schema.unwrap();
        assert_eq!(schema.schema_type, SchemaType::Avro);
        assert_eq!(schema.definition, r#"{"type": "string"}"#);
        assert_eq!(options.credentials_path, PathBuf::from("/creds.json"));
    }

    #[tokio::test]
    async fn test_keeper_options_missing_schema_file() {
        let config = Config {
            schema_file_path: Some(PathBuf::from("/nonexistent/schema.avsc")),
            ..Default::default()
        };
        assert!(matches!(
            config.keeper_options().await,
            Err(Error::Config(_))
        ));
    }
}
