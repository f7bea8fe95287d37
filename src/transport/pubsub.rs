use super::{Connector, ServiceAccountKey, TokenSource, Transport, WireEncoding};
use crate::error::PublishError;
use crate::{Error, Result};
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument};

const DEFAULT_ENDPOINT: &str = "https://pubsub.googleapis.com";
const EMULATOR_HOST_ENV: &str = "PUBSUB_EMULATOR_HOST";
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const INITIAL_BACKOFF: Duration = Duration::from_millis(100);
const MAX_BACKOFF: Duration = Duration::from_secs(5);

/// Connects to Cloud Pub/Sub over its REST API.
#[derive(Debug, Clone)]
pub struct PubSubConnector {
    endpoint: String,
    emulator: bool,
    request_timeout: Duration,
}

impl Default for PubSubConnector {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            emulator: false,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }
}

impl PubSubConnector {
    /// Targets the emulator when `PUBSUB_EMULATOR_HOST` is set.
    pub fn from_env() -> Self {
        match std::env::var(EMULATOR_HOST_ENV) {
            Ok(host) if !host.is_empty() => Self::emulator(&host),
            _ => Self::default(),
        }
    }

    pub fn emulator(host: &str) -> Self {
        Self {
            endpoint: format!("http://{}", host),
            emulator: true,
            ..Self::default()
        }
    }

    /// Upper bound on any single HTTP exchange, topic lookups included.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }
}

#[async_trait]
impl Connector for PubSubConnector {
    async fn connect(
        &self,
        project: &str,
        credentials: ServiceAccountKey,
    ) -> Result<Arc<dyn Transport>> {
        let http = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(self.request_timeout)
            .build()
            .map_err(|e| Error::Connection(format!("cannot build HTTP client: {}", e)))?;

        let auth = if self.emulator {
            info!(endpoint = %self.endpoint, "Using Pub/Sub emulator");
            None
        } else {
            Some(TokenSource::new(credentials, http.clone())?)
        };

        let client = PubSubClient {
            http,
            endpoint: self.endpoint.clone(),
            project: project.to_string(),
            auth,
        };

        // Fails fast on bad credentials instead of on the first flush.
        if let Some(auth) = &client.auth {
            auth.token()
                .await
                .map_err(|e| Error::Connection(format!("cannot obtain access token: {}", e)))?;
            info!(client_email = %auth.client_email(), "Authenticated with Pub/Sub");
        }

        Ok(Arc::new(client))
    }
}

pub struct PubSubClient {
    http: reqwest::Client,
    endpoint: String,
    project: String,
    auth: Option<TokenSource>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct TopicResource {
    #[serde(default)]
    schema_settings: Option<SchemaSettings>,
}

#[derive(Deserialize)]
struct SchemaSettings {
    #[serde(default)]
    encoding: Option<String>,
}

#[derive(Serialize)]
struct PublishRequest {
    messages: Vec<PubsubMessage>,
}

#[derive(Serialize)]
struct PubsubMessage {
    data: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct PublishResponse {
    #[serde(default)]
    message_ids: Vec<String>,
}

impl PubSubClient {
    fn topic_url(&self, topic: &str) -> String {
        format!(
            "{}/v1/projects/{}/topics/{}",
            self.endpoint, self.project, topic
        )
    }

    async fn authorize(
        &self,
        request: reqwest::RequestBuilder,
    ) -> std::result::Result<reqwest::RequestBuilder, PublishError> {
        match &self.auth {
            Some(auth) => Ok(request.bearer_auth(auth.token().await?)),
            None => Ok(request),
        }
    }
}

#[async_trait]
impl Transport for PubSubClient {
    #[instrument(skip(self))]
    async fn topic_encoding(&self, topic: &str) -> Result<WireEncoding> {
        let request = self
            .authorize(self.http.get(self.topic_url(topic)))
            .await
            .map_err(|e| Error::Connection(e.to_string()))?;
        let response = request.send().await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Connection(format!(
                "topic lookup failed ({}): {}",
                status, body
            )));
        }

        let resource: TopicResource = response.json().await?;
        let encoding = resource
            .schema_settings
            .and_then(|s| s.encoding)
            .map(|e| WireEncoding::from_api(&e))
            .unwrap_or(WireEncoding::Unspecified);

        debug!(%encoding, "Resolved topic encoding");
        Ok(encoding)
    }

    async fn publish(
        &self,
        topic: &str,
        messages: Vec<Bytes>,
    ) -> std::result::Result<Vec<String>, PublishError> {
        let body = PublishRequest {
            messages: messages
                .iter()
                .map(|m| PubsubMessage {
                    data: STANDARD.encode(m),
                })
                .collect(),
        };

        let url = format!("{}:publish", self.topic_url(topic));

        // Retries until it succeeds, fails for good, or the caller's publish
        // timeout drops this future.
        let mut backoff = INITIAL_BACKOFF;
        let mut attempt = 1u32;
        loop {
            match self.publish_once(&url, &body).await {
                Err(PublishError::Unavailable(reason)) => {
                    debug!(%topic, attempt, %reason, "Bus unavailable, retrying publish");
                    tokio::time::sleep(backoff).await;
                    backoff = (backoff * 2).min(MAX_BACKOFF);
                    attempt += 1;
                }
                outcome => return outcome,
            }
        }
    }
}

impl PubSubClient {
    async fn publish_once(
        &self,
        url: &str,
        body: &PublishRequest,
    ) -> std::result::Result<Vec<String>, PublishError> {
        let response = self
            .authorize(self.http.post(url).json(body))
            .await?
            .send()
            .await
            .map_err(classify_http_error)?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(classify_status(status.as_u16(), message));
        }

        let published: PublishResponse = response
            .json()
            .await
            .map_err(|e| PublishError::Transport(format!("malformed publish response: {}", e)))?;
        Ok(published.message_ids)
    }
}

pub(crate) fn classify_http_error(error: reqwest::Error) -> PublishError {
    if error.is_timeout() {
        PublishError::DeadlineExceeded
    } else if error.is_connect() {
        PublishError::Unavailable(error.to_string())
    } else {
        PublishError::Transport(error.to_string())
    }
}

/// Maps the bus's HTTP status to the per-message failure classes.
pub(crate) fn classify_status(status: u16, message: String) -> PublishError {
    match status {
        504 => PublishError::DeadlineExceeded,
        499 => PublishError::Cancelled,
        429 | 500 | 502 | 503 => PublishError::Unavailable(format!("{}: {}", status, message)),
        _ => PublishError::Rejected { status, message },
    }
}
