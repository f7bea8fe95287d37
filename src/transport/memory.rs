use super::{Connector, ServiceAccountKey, Transport, WireEncoding};
use crate::error::PublishError;
use crate::{Error, Result};
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tracing::info;

/// What the in-memory bus does with the next publish request.
#[derive(Debug, Clone, PartialEq)]
pub enum Script {
    Succeed,
    Fail(PublishError),
    Delay(Duration),
    Hang,
}

/// A bus that lives in process memory. Requests succeed unless a script
/// says otherwise.
#[derive(Debug)]
pub struct MemoryTransport {
    encoding: WireEncoding,
    echo: bool,
    scripts: Mutex<VecDeque<Script>>,
    published: Mutex<Vec<(String, Bytes)>>,
    request_sizes: Mutex<Vec<usize>>,
    next_id: AtomicU64,
}

impl Default for MemoryTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self {
            encoding: WireEncoding::Unspecified,
            echo: false,
            scripts: Mutex::new(VecDeque::new()),
            published: Mutex::new(Vec::new()),
            request_sizes: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn with_encoding(mut self, encoding: WireEncoding) -> Self {
        self.encoding = encoding;
        self
    }

    /// Logs every published payload.
    pub fn echo(mut self) -> Self {
        self.echo = true;
        self
    }

    pub fn push_script(&self, script: Script) {
        lock(&self.scripts).push_back(script);
    }

    pub fn published(&self) -> Vec<Bytes> {
        lock(&self.published)
            .iter()
            .map(|(_, payload)| payload.clone())
            .collect()
    }

    /// Number of messages carried by each publish request, in arrival order.
    pub fn request_sizes(&self) -> Vec<usize> {
        lock(&self.request_sizes).clone()
    }

    fn record(&self, topic: &str, messages: Vec<Bytes>) -> Vec<String> {
        let mut published = lock(&self.published);
        messages
            .into_iter()
            .map(|payload| {
                let id = self.next_id.fetch_add(1, Ordering::Relaxed).to_string();
                if self.echo {
                    info!(
                        topic,
                        message_id = %id,
                        payload = %String::from_utf8_lossy(&payload),
                        "Published"
                    );
                }
                published.push((topic.to_string(), payload));
                id
            })
            .collect()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn topic_encoding(&self, _topic: &str) -> Result<WireEncoding> {
        Ok(self.encoding)
    }

    async fn publish(
        &self,
        topic: &str,
        messages: Vec<Bytes>,
    ) -> std::result::Result<Vec<String>, PublishError> {
        lock(&self.request_sizes).push(messages.len());
        let script = lock(&self.scripts).pop_front().unwrap_or(Script::Succeed);

        match script {
            Script::Succeed => Ok(self.record(topic, messages)),
            Script::Fail(error) => Err(error),
            Script::Delay(delay) => {
                tokio::time::sleep(delay).await;
                Ok(self.record(topic, messages))
            }
            Script::Hang => std::future::pending().await,
        }
    }
}

/// Hands out one shared [`MemoryTransport`].
#[derive(Debug, Default)]
pub struct MemoryConnector {
    transport: Arc<MemoryTransport>,
    refuse: bool,
    connects: AtomicUsize,
}

impl MemoryConnector {
    pub fn new(transport: Arc<MemoryTransport>) -> Self {
        Self {
            transport,
            refuse: false,
            connects: AtomicUsize::new(0),
        }
    }

    /// A connector whose every connection attempt fails.
    pub fn refusing() -> Self {
        Self {
            refuse: true,
            ..Self::default()
        }
    }

    pub fn transport(&self) -> Arc<MemoryTransport> {
        Arc::clone(&self.transport)
    }

    pub fn connect_count(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Connector for MemoryConnector {
    async fn connect(
        &self,
        _project: &str,
        _credentials: ServiceAccountKey,
    ) -> Result<Arc<dyn Transport>> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        if self.refuse {
            return Err(Error::Connection("connection refused".to_string()));
        }
        let transport: Arc<dyn Transport> = self.transport.clone();
        Ok(transport)
    }
}
