use crate::record::{Record, Value};
use chrono::{DateTime, TimeZone, Utc};
use serde::Deserialize;
use std::io::Cursor;
use tracing::warn;

/// Iterates the records of one host chunk: concatenated MessagePack entries,
/// each `[timestamp, map]` or `[[timestamp, metadata], map]`.
///
/// Iteration stops at the end of the buffer or at the first entry that does
/// not decode; the rest of the chunk is abandoned.
pub struct ChunkDecoder<'a> {
    cursor: Cursor<&'a [u8]>,
    failed: bool,
}

impl<'a> ChunkDecoder<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self {
            cursor: Cursor::new(data),
            failed: false,
        }
    }

    /// Whether iteration stopped on a malformed entry.
    pub fn failed(&self) -> bool {
        self.failed
    }

    fn remaining(&self) -> usize {
        let len = self.cursor.get_ref().len() as u64;
        len.saturating_sub(self.cursor.position()) as usize
    }

    fn stop(&mut self, reason: &str) -> Option<Record> {
        warn!(
            offset = self.cursor.position(),
            reason, "Stopped decoding chunk at malformed entry"
        );
        self.failed = true;
        None
    }
}

impl Iterator for ChunkDecoder<'_> {
    type Item = Record;

    fn next(&mut self) -> Option<Record> {
        if self.failed || self.remaining() == 0 {
            return None;
        }

        let mut de = rmp_serde::Deserializer::new(&mut self.cursor);
        let entry = match Value::deserialize(&mut de) {
            Ok(entry) => entry,
            Err(e) => return self.stop(&e.to_string()),
        };

        let Value::Array(mut parts) = entry else {
            return self.stop("entry is not an array");
        };
        if parts.len() != 2 {
            return self.stop("entry does not have two elements");
        }
        let body = parts.pop().unwrap_or(Value::Null);
        let head = parts.pop().unwrap_or(Value::Null);

        // Newer hosts wrap the timestamp together with metadata.
        let time = match head {
            Value::Array(mut header) if !header.is_empty() => header.swap_remove(0),
            other => other,
        };
        let Some(timestamp) = entry_time(&time) else {
            return self.stop("unrecognized timestamp");
        };

        match Record::from_value(timestamp, body) {
            Some(record) => Some(record),
            None => self.stop("record body is not a map"),
        }
    }
}

fn entry_time(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::Timestamp(ts) => Some(*ts),
        Value::Int(secs) => Utc.timestamp_opt(*secs, 0).single(),
        Value::UInt(secs) => Utc.timestamp_opt(i64::try_from(*secs).ok()?, 0).single(),
        Value::Float(secs) if secs.is_finite() => {
            let whole = secs.floor();
            let nanos = ((secs - whole) * 1e9).round().min(999_999_999.0) as u32;
            Utc.timestamp_opt(whole as i64, nanos).single()
        }
        _ => None,
    }
}

/// Iterates newline-delimited JSON objects, stamping each with the time it
/// was decoded. Blank lines are skipped; the first line that is not a JSON
/// object ends iteration unless [`JsonLinesDecoder::skip_malformed`] is set.
pub struct JsonLinesDecoder<'a> {
    lines: std::str::Lines<'a>,
    failed: bool,
    skip_malformed: bool,
    skipped: usize,
}

impl<'a> JsonLinesDecoder<'a> {
    pub fn new(data: &'a str) -> Self {
        Self {
            lines: data.lines(),
            failed: false,
            skip_malformed: false,
            skipped: 0,
        }
    }

    /// Logs and drops malformed lines instead of stopping at them.
    pub fn skip_malformed(mut self) -> Self {
        self.skip_malformed = true;
        self
    }

    /// Malformed lines dropped so far.
    pub fn skipped(&self) -> usize {
        self.skipped
    }

    pub fn failed(&self) -> bool {
        self.failed
    }
}

impl Iterator for JsonLinesDecoder<'_> {
    type Item = Record;

    fn next(&mut self) -> Option<Record> {
        if self.failed {
            return None;
        }

        loop {
            let line = self.lines.by_ref().find(|line| !line.trim().is_empty())?;
            let record = serde_json::from_str::<Value>(line)
                .map_err(|e| e.to_string())
                .and_then(|value| {
                    Record::from_value(Utc::now(), value)
                        .ok_or_else(|| "line is not a JSON object".to_string())
                });

            match record {
                Ok(record) => return Some(record),
                Err(reason) if self.skip_malformed => {
                    warn!(reason = %reason, "Skipping malformed line");
                    self.skipped += 1;
                }
                Err(reason) => {
                    warn!(reason = %reason, "Stopped decoding at malformed line");
                    self.failed = true;
                    return None;
                }
            }
        }
    }
}
