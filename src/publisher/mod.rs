//! Threshold-driven batching in front of a [`Transport`].
//!
//! Payloads handed to [`BatchPublisher::enqueue`] are buffered by a
//! background task and sent as one publish request as soon as any of the
//! configured thresholds (count, bytes, delay) is reached. Each payload gets a
//! [`PublishHandle`] that resolves once its request has been acknowledged,
//! rejected, or has run past the publish timeout.

mod batch;


use crate::config::{PublishSettings, MAX_MESSAGE_BYTES};
use crate::error::PublishError;
use crate::transport::Transport;
use batch::MessageBatch;
use bytes::Bytes;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::{mpsc, oneshot};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::{sleep_until, Instant};
use tracing::{debug, error, info, warn};

/// Outcome of one publish: the bus-assigned message id or why it failed.
pub type PublishResult = std::result::Result<String, PublishError>;

#[derive(Debug)]
pub(crate) struct Pending {
    payload: Bytes,
    ack: oneshot::Sender<PublishResult>,
}

/// Resolves exactly once to the outcome of one enqueued payload.
#[derive(Debug)]
pub struct PublishHandle {
    rx: oneshot::Receiver<PublishResult>,
}

impl PublishHandle {
    fn resolved(result: PublishResult) -> Self {
        let (tx, rx) = oneshot::channel();
        let _ = tx.send(result);
        Self { rx }
    }

    /// Waits for the outcome. A handle whose publish was abandoned resolves
    /// as [`PublishError::Cancelled`].
    pub async fn get(self) -> PublishResult {
        self.rx.await.unwrap_or(Err(PublishError::Cancelled))
    }
}

pub struct BatchPublisher {
    topic: String,
    settings: PublishSettings,
    sender: Mutex<Option<mpsc::UnboundedSender<Pending>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl BatchPublisher {
    /// Starts the background batching task. Must be called from within a
    /// tokio runtime.
    pub fn new(transport: Arc<dyn Transport>, topic: &str, settings: PublishSettings) -> Self {
        let settings = settings.clamped();
        let (tx, rx) = mpsc::unbounded_channel();

        let worker = tokio::spawn(run_batcher(
            rx,
            transport,
            topic.to_string(),
            settings.clone(),
        ));

        info!(
            topic,
            byte_threshold = settings.byte_threshold,
            count_threshold = settings.count_threshold,
            delay_threshold_ms = settings.delay_threshold.as_millis() as u64,
            timeout_ms = settings.timeout.as_millis() as u64,
            "Batch publisher started"
        );

        Self {
            topic: topic.to_string(),
            settings,
            sender: Mutex::new(Some(tx)),
            worker: Mutex::new(Some(worker)),
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn settings(&self) -> &PublishSettings {
        &self.settings
    }

    /// Hands a payload to the batcher without waiting for the network.
    ///
    /// Returns `None` for an empty payload: nothing is published for it.
    pub fn enqueue(&self, payload: Bytes) -> Option<PublishHandle> {
        if payload.is_empty() {
            return None;
        }
        if payload.len() > MAX_MESSAGE_BYTES {
            return Some(PublishHandle::resolved(Err(PublishError::MessageTooLarge {
                size: payload.len(),
                limit: MAX_MESSAGE_BYTES,
            })));
        }

        let guard = lock(&self.sender);
        let Some(sender) = guard.as_ref() else {
            return Some(PublishHandle::resolved(Err(PublishError::Stopped)));
        };

        let (ack, rx) = oneshot::channel();
        if let Err(mpsc::error::SendError(pending)) = sender.send(Pending { payload, ack }) {
            let _ = pending.ack.send(Err(PublishError::Stopped));
        }
        Some(PublishHandle { rx })
    }

    /// Publishes everything still buffered, waits for all outstanding
    /// requests and shuts the batcher down. Later calls return immediately.
    pub async fn drain(&self) {
        // Closing the channel tells the batcher to flush and exit.
        drop(lock(&self.sender).take());

        let worker = lock(&self.worker).take();
        match worker {
            Some(worker) => {
                if let Err(e) = worker.await {
                    error!(topic = %self.topic, "Batch publisher task failed: {}", e);
                }
                info!(topic = %self.topic, "Batch publisher drained");
            }
            None => debug!(topic = %self.topic, "Batch publisher already drained"),
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Sleeps until the batch's delay runs out, or forever if nothing is buffered.
fn batch_timer(deadline: Option<Instant>) -> impl Future<Output = ()> {
    async move {
        match deadline {
            Some(deadline) => sleep_until(deadline).await,
            None => std::future::pending().await,
        }
    }
}

async fn run_batcher(
    mut rx: mpsc::UnboundedReceiver<Pending>,
    transport: Arc<dyn Transport>,
    topic: String,
    settings: PublishSettings,
) {
    let mut batch = MessageBatch::new(settings.clone());
    let mut in_flight = JoinSet::new();

    loop {
        tokio::select! {
            message = rx.recv() => {
                let Some(message) = message else { break };
                if batch.would_overflow(message.payload.len()) {
                    dispatch(&mut in_flight, &transport, &topic, &settings, batch.drain());
                }
                batch.push(message, Instant::now());
                if batch.is_ready(Instant::now()) {
                    dispatch(&mut in_flight, &transport, &topic, &settings, batch.drain());
                }
            }
            _ = batch_timer(batch.deadline()) => {
                dispatch(&mut in_flight, &transport, &topic, &settings, batch.drain());
            }
            Some(joined) = in_flight.join_next(), if !in_flight.is_empty() => {
                if let Err(e) = joined {
                    error!(%topic, "Publish request task failed: {}", e);
                }
            }
        }
    }

    if !batch.is_empty() {
        debug!(%topic, pending = batch.len(), "Flushing remaining messages");
        dispatch(&mut in_flight, &transport, &topic, &settings, batch.drain());
    }
    while let Some(joined) = in_flight.join_next().await {
        if let Err(e) = joined {
            error!(%topic, "Publish request task failed: {}", e);
        }
    }
}

fn dispatch(
    in_flight: &mut JoinSet<()>,
    transport: &Arc<dyn Transport>,
    topic: &str,
    settings: &PublishSettings,
    messages: Vec<Pending>,
) {
    if messages.is_empty() {
        return;
    }
    in_flight.spawn(send_request(
        Arc::clone(transport),
        topic.to_string(),
        settings.timeout,
        messages,
    ));
}

async fn send_request(
    transport: Arc<dyn Transport>,
    topic: String,
    timeout: std::time::Duration,
    messages: Vec<Pending>,
) {
    let count = messages.len();
    let (payloads, acks): (Vec<Bytes>, Vec<oneshot::Sender<PublishResult>>) = messages
        .into_iter()
        .map(|m| (m.payload, m.ack))
        .unzip();

    let outcome = match tokio::time::timeout(timeout, transport.publish(&topic, payloads)).await {
        Ok(Ok(ids)) if ids.len() == count => {
            debug!(%topic, count, "Publish request acknowledged");
            for (ack, id) in acks.into_iter().zip(ids) {
                let _ = ack.send(Ok(id));
            }
            return;
        }
        Ok(Ok(ids)) => PublishError::Transport(format!(
            "bus returned {} message ids for {} messages",
            ids.len(),
            count
        )),
        Ok(Err(e)) => e,
        Err(_) => PublishError::DeadlineExceeded,
    };

    warn!(%topic, count, error = %outcome, "Publish request failed");
    for ack in acks {
        let _ = ack.send(Err(outcome.clone()));
    }
}
