pub mod avro;
pub mod raw;

pub use avro::{AvroCodec, AvroEncoding};
pub use raw::value_to_bytes;

use crate::record::Record;
use crate::Result;
use bytes::Bytes;

/// Turns records into publishable payloads.
///
/// Raw mode publishes every field of a record as its own message; schema mode
/// publishes the whole record as one encoded message.
#[derive(Debug)]
pub enum PayloadEncoder {
    Raw,
    Avro(AvroCodec),
}

impl PayloadEncoder {
    pub fn encode(&self, record: &Record) -> Result<Vec<Bytes>> {
        match self {
            PayloadEncoder::Raw => Ok(record
                .fields
                .iter()
                .map(|(_, value)| value_to_bytes(value))
                .collect()),
            PayloadEncoder::Avro(codec) => Ok(vec![Bytes::from(codec.encode(record)?)]),
        }
    }

    pub fn mode(&self) -> &'static str {
        match self {
            PayloadEncoder::Raw => "raw",
            PayloadEncoder::Avro(codec) => match codec.encoding() {
                AvroEncoding::Binary => "avro-binary",
                AvroEncoding::Json => "avro-json",
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::Value;
    use crate::transport::WireEncoding;
    use chrono::Utc;

    #[test]
    fn test_raw_mode_one_payload_per_field() {
        let record = Record::new(Utc::now())
            .with_field("testvalue1", Value::Bytes(Bytes::from_static(b"record1")))
            .with_field("testvalue2", Value::Bytes(Bytes::from_static(b"record2")));

        let payloads = PayloadEncoder::Raw.encode(&record).unwrap();
        assert_eq!(
            payloads,
            vec![Bytes::from_static(b"record1"), Bytes::from_static(b"record2")]
        );
    }

    #[test]
    fn test_raw_mode_keeps_empty_payloads_for_the_publisher() {
        let record = Record::new(Utc::now()).with_field("empty", "");
        let payloads = PayloadEncoder::Raw.encode(&record).unwrap();
        assert_eq!(payloads.len(), 1);
        assert!(payloads[0].is_empty());
    }

    #[test]
    fn test_schema_mode_one_payload_per_record() {
        let codec = AvroCodec::new(r#"{"type": "map", "values": "string"}"#, WireEncoding::Json);
        let encoder = PayloadEncoder::Avro(codec.unwrap());
        assert_eq!(encoder.mode(), "avro-json");

        let record = Record::new(Utc::now())
            .with_field("a", "1")
            .with_field("b", "2");
        let payloads = encoder.encode(&record).unwrap();
        assert_eq!(payloads.len(), 1);

        let json: serde_json::Value = serde_json::from_slice(&payloads[0]).unwrap();
        assert_eq!(json, serde_json::json!({"a": "1", "b": "2"}));
    }
}
