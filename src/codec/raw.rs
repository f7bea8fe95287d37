use crate::record::{rfc3339, Value};
use bytes::Bytes;

/// Renders one value as the payload published for it in raw mode.
pub fn value_to_bytes(value: &Value) -> Bytes {
    match value {
        Value::Bytes(b) => b.clone(),
        Value::String(s) => Bytes::from(s.clone()),
        Value::Int(i) => Bytes::from(i.to_string()),
        Value::UInt(u) => Bytes::from(u.to_string()),
        Value::Float(x) => Bytes::from(format!("{:.6}", x)),
        Value::Bool(b) => Bytes::from(b.to_string()),
        Value::Timestamp(ts) => Bytes::from(rfc3339(ts)),
        Value::Null | Value::Array(_) | Value::Map(_) => Bytes::from(value.to_string()),
    }
}
