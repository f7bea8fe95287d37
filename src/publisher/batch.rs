use super::Pending;
use crate::config::{PublishSettings, MAX_PUBLISH_REQUEST_BYTES, MAX_PUBLISH_REQUEST_COUNT};
use tokio::time::Instant;

/// Payloads waiting to go out together in one publish request.
#[derive(Debug)]
pub(crate) struct MessageBatch {
    pending: Vec<Pending>,
    bytes: usize,
    oldest: Option<Instant>,
    settings: PublishSettings,
}

impl MessageBatch {
    pub fn new(settings: PublishSettings) -> Self {
        Self {
            pending: Vec::with_capacity(settings.count_threshold),
            bytes: 0,
            oldest: None,
            settings,
        }
    }

    pub fn push(&mut self, message: Pending, now: Instant) {
        self.bytes += message.payload.len();
        self.oldest.get_or_insert(now);
        self.pending.push(message);
    }

    pub fn drain(&mut self) -> Vec<Pending> {
        self.bytes = 0;
        self.oldest = None;
        std::mem::replace(
            &mut self.pending,
            Vec::with_capacity(self.settings.count_threshold),
        )
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    /// Whether adding a payload of `size` bytes would make the request larger
    /// than the bus accepts.
    pub fn would_overflow(&self, size: usize) -> bool {
        !self.is_empty()
            && (self.bytes + size > MAX_PUBLISH_REQUEST_BYTES
                || self.pending.len() + 1 > MAX_PUBLISH_REQUEST_COUNT)
    }

    pub fn exceeded_batch_size(&self) -> bool {
        self.pending.len() >= self.settings.count_threshold
            || self.bytes >= self.settings.byte_threshold
    }

    /// When the oldest buffered payload has waited out the delay threshold.
    pub fn deadline(&self) -> Option<Instant> {
        self.oldest.map(|oldest| oldest + self.settings.delay_threshold)
    }

    pub fn exceeded_interval(&self, now: Instant) -> bool {
        self.deadline().is_some_and(|deadline| now >= deadline)
    }

    pub fn is_ready(&self, now: Instant) -> bool {
        self.exceeded_interval(now) || self.exceeded_batch_size()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use std::time::Duration;
    use tokio::sync::oneshot;

    fn pending(payload: &'static [u8]) -> Pending {
        let (tx, _rx) = oneshot::channel();
        Pending {
            payload: Bytes::from_static(payload),
            ack: tx,
        }
    }

    fn settings(count: usize, bytes: usize, delay_ms: u64) -> PublishSettings {
        PublishSettings {
            byte_threshold: bytes,
            count_threshold: count,
            delay_threshold: Duration::from_millis(delay_ms),
            timeout: Duration::from_secs(1),
        }
    }

    #[test]
    fn test_count_threshold() {
        let now = Instant::now();
        let mut batch = MessageBatch::new(settings(2, 1000, 1000));
        batch.push(pending(b"a"), now);
        assert!(!batch.is_ready(now));
        batch.push(pending(b"b"), now);
        assert!(batch.is_ready(now));

        let drained = batch.drain();
        assert_eq!(drained.len(), 2);
        assert!(batch.is_empty());
        assert!(batch.deadline().is_none());
    }

    #[test]
    fn test_byte_threshold() {
        let now = Instant::now();
        let mut batch = MessageBatch::new(settings(100, 4, 1000));
        batch.push(pending(b"abc"), now);
        assert!(!batch.exceeded_batch_size());
        batch.push(pending(b"de"), now);
        assert!(batch.exceeded_batch_size());
    }

    #[test]
    fn test_delay_measured_from_oldest() {
        let start = Instant::now();
        let mut batch = MessageBatch::new(settings(100, 1000, 50));
        batch.push(pending(b"a"), start);
        batch.push(pending(b"b"), start + Duration::from_millis(40));

        assert_eq!(batch.deadline(), Some(start + Duration::from_millis(50)));
        assert!(!batch.is_ready(start + Duration::from_millis(49)));
        assert!(batch.is_ready(start + Duration::from_millis(50)));
    }

    #[test]
    fn test_request_limits() {
        let now = Instant::now();
        let mut batch = MessageBatch::new(settings(1000, MAX_PUBLISH_REQUEST_BYTES, 1000));
        assert!(!batch.would_overflow(MAX_PUBLISH_REQUEST_BYTES + 1));

        batch.push(pending(b"abc"), now);
        assert!(!batch.would_overflow(10));
        assert!(batch.would_overflow(MAX_PUBLISH_REQUEST_BYTES));
    }
}
