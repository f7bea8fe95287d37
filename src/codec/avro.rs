use crate::record::{Record, Value};
use crate::transport::WireEncoding;
use crate::{Error, Result};
use apache_avro::schema::{Name, ResolvedSchema};
use apache_avro::types::Value as AvroValue;
use apache_avro::Schema;
use std::collections::HashMap;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AvroEncoding {
    Binary,
    Json,
}

/// Encodes whole records against an Avro schema, in the framing the topic
/// expects.
#[derive(Debug)]
pub struct AvroCodec {
    schema: Schema,
    names: HashMap<Name, Schema>,
    encoding: AvroEncoding,
}

impl AvroCodec {
    pub fn new(definition: &str, wire: WireEncoding) -> Result<Self> {
        let schema = Schema::parse_str(definition)
            .map_err(|e| Error::Schema(format!("failed to parse Avro schema: {}", e)))?;

        let encoding = match wire {
            WireEncoding::Binary => AvroEncoding::Binary,
            WireEncoding::Json => AvroEncoding::Json,
            WireEncoding::Unspecified => {
                return Err(Error::InvalidEncoding(wire.to_string()));
            }
        };

        let names = ResolvedSchema::try_from(&schema)
            .map_err(|e| Error::Schema(format!("failed to resolve Avro schema: {}", e)))?
            .get_names()
            .iter()
            .map(|(name, schema)| (name.clone(), Schema::clone(schema)))
            .collect();

        debug!(?encoding, "Avro codec ready");

        Ok(Self {
            schema,
            names,
            encoding,
        })
    }

    pub fn encoding(&self) -> AvroEncoding {
        self.encoding
    }

    pub fn encode(&self, record: &Record) -> Result<Vec<u8>> {
        let value = normalize(record);
        self.check_narrowing(&value, &self.schema, "")?;
        let value = value.resolve(&self.schema)?;

        match self.encoding {
            AvroEncoding::Binary => Ok(apache_avro::to_avro_datum(&self.schema, value)?),
            AvroEncoding::Json => {
                let json = self.to_json(&value, &self.schema)?;
                Ok(serde_json::to_vec(&json)?)
            }
        }
    }

    fn lookup<'a>(&'a self, schema: &'a Schema) -> Result<&'a Schema> {
        match schema {
            Schema::Ref { name } => self
                .names
                .get(name)
                .ok_or_else(|| {
                    Error::Schema(format!("unresolved schema reference {}", name.fullname(None)))
                }),
            other => Ok(other),
        }
    }

    /// Avro's JSON encoding: unions other than null are wrapped in an object
    /// keyed by the branch type name, bytes become ISO-8859-1 strings.
    fn to_json(&self, value: &AvroValue, schema: &Schema) -> Result<serde_json::Value> {
        let schema = self.lookup(schema)?;

        match (value, schema) {
            (AvroValue::Union(index, inner), Schema::Union(union)) => {
                let branch = union.variants().get(*index as usize).ok_or_else(|| {
                    Error::Encode(format!("union branch {} out of range", index))
                })?;
                if matches!(**inner, AvroValue::Null) {
                    return Ok(serde_json::Value::Null);
                }
                let mut object = serde_json::Map::new();
                object.insert(
                    self.branch_name(branch)?,
                    self.to_json(inner, branch)?,
                );
                Ok(serde_json::Value::Object(object))
            }
            (AvroValue::Record(fields), Schema::Record(record_schema)) => {
                let mut object = serde_json::Map::new();
                for (name, field_value) in fields {
                    let field = record_schema
                        .fields
                        .iter()
                        .find(|f| &f.name == name)
                        .ok_or_else(|| Error::Encode(format!("unknown field {}", name)))?;
                    object.insert(name.clone(), self.to_json(field_value, &field.schema)?);
                }
                Ok(serde_json::Value::Object(object))
            }
            (AvroValue::Array(items), Schema::Array(array)) => items
                .iter()
                .map(|item| self.to_json(item, &array.items))
                .collect::<Result<Vec<_>>>()
                .map(serde_json::Value::Array),
            (AvroValue::Map(entries), Schema::Map(map)) => {
                let mut object = serde_json::Map::new();
                let mut keys: Vec<&String> = entries.keys().collect();
                keys.sort();
                for key in keys {
                    object.insert(key.clone(), self.to_json(&entries[key], &map.types)?);
                }
                Ok(serde_json::Value::Object(object))
            }
            (scalar, _) => scalar_to_json(scalar),
        }
    }

    /// Rejects integers that an `int` field cannot hold; resolution would
    /// silently truncate them.
    fn check_narrowing(&self, value: &AvroValue, schema: &Schema, path: &str) -> Result<()> {
        match (value, self.lookup(schema)?) {
            (AvroValue::Long(n), Schema::Int | Schema::Date | Schema::TimeMillis) => {
                if i32::try_from(*n).is_err() {
                    return Err(Error::Encode(format!(
                        "{} does not fit int field '{}'",
                        n, path
                    )));
                }
            }
            (AvroValue::Map(entries), Schema::Record(record)) => {
                for field in &record.fields {
                    if let Some(inner) = entries.get(&field.name) {
                        self.check_narrowing(inner, &field.schema, &join(path, &field.name))?;
                    }
                }
            }
            (AvroValue::Map(entries), Schema::Map(map)) => {
                for (key, inner) in entries {
                    self.check_narrowing(inner, &map.types, &join(path, key))?;
                }
            }
            (AvroValue::Array(items), Schema::Array(array)) => {
                for item in items {
                    self.check_narrowing(item, &array.items, path)?;
                }
            }
            (AvroValue::Null, Schema::Union(_)) => {}
            (_, Schema::Union(union)) => {
                if let Some(branch) = self.narrowing_branch(value, union.variants())? {
                    self.check_narrowing(value, branch, path)?;
                }
            }
            _ => {}
        }
        Ok(())
    }

    /// The union branch a value would land in, as far as narrowing goes. A
    /// long that has a wider branch available is never narrowed.
    fn narrowing_branch<'a>(
        &self,
        value: &AvroValue,
        variants: &'a [Schema],
    ) -> Result<Option<&'a Schema>> {
        if let AvroValue::Long(_) = value {
            let mut int_branch = None;
            for variant in variants {
                match self.lookup(variant)? {
                    Schema::Long
                    | Schema::TimeMicros
                    | Schema::TimestampMillis
                    | Schema::TimestampMicros
                    | Schema::Float
                    | Schema::Double => return Ok(None),
                    Schema::Int | Schema::Date | Schema::TimeMillis => {
                        int_branch.get_or_insert(variant);
                    }
                    _ => {}
                }
            }
            return Ok(int_branch);
        }

        for variant in variants {
            let fits = matches!(
                (value, self.lookup(variant)?),
                (AvroValue::Map(_), Schema::Record(_) | Schema::Map(_))
                    | (AvroValue::Array(_), Schema::Array(_))
            );
            if fits {
                return Ok(Some(variant));
            }
        }
        Ok(None)
    }

    fn branch_name(&self, schema: &Schema) -> Result<String> {
        let name = match self.lookup(schema)? {
            Schema::Null => "null",
            Schema::Boolean => "boolean",
            Schema::Int | Schema::Date | Schema::TimeMillis => "int",
            Schema::Long
            | Schema::TimeMicros
            | Schema::TimestampMillis
            | Schema::TimestampMicros => "long",
            Schema::Float => "float",
            Schema::Double => "double",
            Schema::String | Schema::Uuid => "string",
            Schema::Array(_) => "array",
            Schema::Map(_) => "map",
            Schema::Record(record) => return Ok(record.name.fullname(None)),
            Schema::Enum(e) => return Ok(e.name.fullname(None)),
            Schema::Fixed(fixed) => return Ok(fixed.name.fullname(None)),
            _ => "bytes",
        };
        Ok(name.to_string())
    }
}

fn join(path: &str, name: &str) -> String {
    if path.is_empty() {
        name.to_string()
    } else {
        format!("{}.{}", path, name)
    }
}

fn scalar_to_json(value: &AvroValue) -> Result<serde_json::Value> {
    let json = match value {
        AvroValue::Null => serde_json::Value::Null,
        AvroValue::Boolean(b) => serde_json::Value::Bool(*b),
        AvroValue::Int(i) | AvroValue::Date(i) | AvroValue::TimeMillis(i) => serde_json::json!(i),
        AvroValue::Long(l)
        | AvroValue::TimeMicros(l)
        | AvroValue::TimestampMillis(l)
        | AvroValue::TimestampMicros(l) => serde_json::json!(l),
        AvroValue::Float(f) => float_to_json(f64::from(*f))?,
        AvroValue::Double(d) => float_to_json(*d)?,
        AvroValue::String(s) | AvroValue::Enum(_, s) => serde_json::Value::String(s.clone()),
        AvroValue::Bytes(b) | AvroValue::Fixed(_, b) => {
            serde_json::Value::String(b.iter().map(|&byte| char::from(byte)).collect())
        }
        AvroValue::Uuid(u) => serde_json::Value::String(u.to_string()),
        other => {
            return Err(Error::Encode(format!(
                "value {:?} has no JSON encoding",
                other
            )))
        }
    };
    Ok(json)
}

fn float_to_json(f: f64) -> Result<serde_json::Value> {
    serde_json::Number::from_f64(f)
        .map(serde_json::Value::Number)
        .ok_or_else(|| Error::Encode(format!("{} cannot be encoded as JSON", f)))
}

/// Flattens a record into a string-keyed map; top-level byte values become
/// text, timestamps become epoch milliseconds.
fn normalize(record: &Record) -> AvroValue {
    AvroValue::Map(
        record
            .fields
            .iter()
            .map(|(key, value)| {
                let value = match value {
                    Value::Bytes(b) => AvroValue::String(String::from_utf8_lossy(b).into_owned()),
                    other => to_avro(other),
                };
                (key.clone(), value)
            })
            .collect(),
    )
}

fn to_avro(value: &Value) -> AvroValue {
    match value {
        Value::Null => AvroValue::Null,
        Value::Bool(b) => AvroValue::Boolean(*b),
        Value::Int(i) => AvroValue::Long(*i),
        Value::UInt(u) => match i64::try_from(*u) {
            Ok(i) => AvroValue::Long(i),
            Err(_) => AvroValue::Double(*u as f64),
        },
        Value::Float(f) => AvroValue::Double(*f),
        Value::String(s) => AvroValue::String(s.clone()),
        Value::Bytes(b) => AvroValue::Bytes(b.to_vec()),
        Value::Timestamp(ts) => AvroValue::Long(ts.timestamp_millis()),
        Value::Array(items) => AvroValue::Array(items.iter().map(to_avro).collect()),
        Value::Map(entries) => AvroValue::Map(
            entries
                .iter()
                .map(|(k, v)| (k.to_key_string(), to_avro(v)))
                .collect(),
        ),
    }
}
