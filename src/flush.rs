//! Turns one host batch into publishes and one verdict for the host.
//!
//! A flush encodes every record, enqueues every payload, waits for all of
//! the resulting handles and reduces their outcomes with [`retry_policy`].
//! Redelivery is whole-batch: the host resends everything on
//! [`FlushStatus::Retry`], so only failures that leave a message's fate
//! unknown (timeout, cancellation, bus unavailable) ask for it. Definite
//! rejections are logged and dropped.

use crate::keeper::Keeper;
use crate::publisher::{PublishHandle, PublishResult};
use crate::record::Record;
use futures::future::join_all;
use tracing::{debug, error, info, warn};

/// What the host is told after a flush.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum FlushStatus {
    #[default]
    Ok,
    Retry,
    Error,
}

impl FlushStatus {
    /// The host's numeric exit code.
    pub fn code(self) -> i32 {
        match self {
            FlushStatus::Error => 0,
            FlushStatus::Ok => 1,
            FlushStatus::Retry => 2,
        }
    }
}

/// Bookkeeping for one flush.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FlushReport {
    pub status: FlushStatus,
    /// Records pulled from the batch.
    pub records: usize,
    /// Records dropped because they could not be encoded.
    pub encode_failures: usize,
    /// Payloads skipped for being empty.
    pub empty_payloads: usize,
    /// Messages acknowledged by the bus.
    pub published: usize,
    /// Messages whose fate is unknown: timed out, cancelled or bus unavailable.
    pub transient_failures: usize,
    /// Messages that were rejected for good.
    pub dropped: usize,
}

/// Reduces per-message outcomes to the host verdict: retry the whole batch
/// if any message may not have reached the bus, otherwise succeed, even
/// when some messages were rejected.
pub fn retry_policy(results: &[PublishResult]) -> FlushStatus {
    let any_transient = results
        .iter()
        .any(|result| matches!(result, Err(e) if e.is_transient()));

    if any_transient {
        FlushStatus::Retry
    } else {
        FlushStatus::Ok
    }
}

pub async fn flush<I>(keeper: &Keeper, records: I, tag: &str) -> FlushReport
where
    I: IntoIterator<Item = Record>,
{
    let mut report = FlushReport::default();
    let mut handles = Vec::new();

    for record in records {
        report.records += 1;
        if keeper.debug() {
            debug!(
                tag,
                timestamp = %record.timestamp,
                fields = record.len(),
                "Decoded record"
            );
        }

        let payloads = match keeper.encoder().encode(&record) {
            Ok(payloads) => payloads,
            Err(e) => {
                error!(tag, error = %e, "[don't retry] Dropping record that failed to encode");
                report.encode_failures += 1;
                continue;
            }
        };

        for payload in payloads {
            match keeper.enqueue(payload) {
                Some(handle) => handles.push(handle),
                None => report.empty_payloads += 1,
            }
        }
    }

    let results = join_all(handles.into_iter().map(PublishHandle::get)).await;

    for result in &results {
        match result {
            Ok(_) => report.published += 1,
            Err(e) if e.is_transient() => {
                warn!(tag, error = %e, "[retry] Publish did not complete");
                report.transient_failures += 1;
            }
            Err(e) => {
                error!(tag, error = %e, "[don't retry] Publish failed");
                report.dropped += 1;
            }
        }
    }

    report.status = retry_policy(&results);

    info!(
        tag,
        status = ?report.status,
        records = report.records,
        published = report.published,
        dropped = report.dropped,
        transient_failures = report.transient_failures,
        encode_failures = report.encode_failures,
        "Flush complete"
    );

    report
}
