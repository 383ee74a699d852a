//! Core types for MiniStore
//!
//! Defines the typed document value model, documents, and the canonical JSON
//! wire encoding used by the production REST API.

use std::collections::BTreeMap;
use std::fmt;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value as JsonValue;

use crate::error::{MiniStoreError, Result};

/// Map from field name to value, the payload of a document or a mapValue
pub type FieldMap = BTreeMap<String, Value>;

/// A typed document value
///
/// Exactly one tag is active at a time. Equality is structural: array order
/// is significant, map key order is not, and NaN compares equal to NaN so
/// that array membership tests behave deterministically.
#[derive(Debug, Clone)]
pub enum Value {
    /// Null value
    Null,
    /// Boolean value
    Boolean(bool),
    /// 64-bit integer (decimal string on the wire)
    Integer(i64),
    /// 64-bit IEEE-754 double
    Double(f64),
    /// ISO-8601 UTC timestamp
    Timestamp(DateTime<Utc>),
    /// String value
    String(String),
    /// Byte string (base64 on the wire)
    Bytes(Vec<u8>),
    /// Reference to another document path
    Reference(String),
    /// Geographic point
    GeoPoint { latitude: f64, longitude: f64 },
    /// Ordered list of values
    Array(Vec<Value>),
    /// Mapping from field name to value
    Map(FieldMap),
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Boolean(a), Value::Boolean(b)) => a == b,
            (Value::Integer(a), Value::Integer(b)) => a == b,
            // NaN == NaN so structural membership is reflexive
            (Value::Double(a), Value::Double(b)) => a == b || (a.is_nan() && b.is_nan()),
            (Value::Timestamp(a), Value::Timestamp(b)) => a == b,
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Bytes(a), Value::Bytes(b)) => a == b,
            (Value::Reference(a), Value::Reference(b)) => a == b,
            (
                Value::GeoPoint { latitude: alat, longitude: alon },
                Value::GeoPoint { latitude: blat, longitude: blon },
            ) => alat == blat && alon == blon,
            (Value::Array(a), Value::Array(b)) => a == b,
            (Value::Map(a), Value::Map(b)) => a == b,
            _ => false,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Boolean(v) => write!(f, "{}", v),
            Value::Integer(v) => write!(f, "{}", v),
            Value::Double(v) => write!(f, "{}", v),
            Value::Timestamp(v) => write!(f, "{}", format_timestamp(*v)),
            Value::String(v) => write!(f, "{}", v),
            Value::Bytes(v) => write!(f, "{}", BASE64.encode(v)),
            Value::Reference(v) => write!(f, "{}", v),
            Value::GeoPoint { latitude, longitude } => write!(f, "[{}, {}]", latitude, longitude),
            Value::Array(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", item)?;
                }
                write!(f, "]")
            }
            Value::Map(fields) => {
                write!(f, "{{")?;
                for (i, (k, v)) in fields.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}: {}", k, v)?;
                }
                write!(f, "}}")
            }
        }
    }
}

/// Format a timestamp the way the production API does: RFC 3339 UTC with
/// microsecond precision and a literal `Z` suffix.
pub fn format_timestamp(t: DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Parse an ISO-8601 timestamp, normalizing to UTC at microsecond precision
pub fn parse_timestamp(s: &str) -> Result<DateTime<Utc>> {
    let parsed = DateTime::parse_from_rfc3339(s).map_err(|e| {
        MiniStoreError::InvalidArgument(format!("Invalid timestamp \"{}\": {}", s, e))
    })?;
    Ok(truncate_to_micros(parsed.with_timezone(&Utc)))
}

/// Drop sub-microsecond precision so stored times round-trip the wire exactly
pub fn truncate_to_micros(t: DateTime<Utc>) -> DateTime<Utc> {
    DateTime::from_timestamp_micros(t.timestamp_micros()).unwrap_or(t)
}

impl Value {
    /// Check if the value is null
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Short tag name used in error messages and `is` type tests
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Boolean(_) => "bool",
            Value::Integer(_) => "int",
            Value::Double(_) => "float",
            Value::Timestamp(_) => "timestamp",
            Value::String(_) => "string",
            Value::Bytes(_) => "bytes",
            Value::Reference(_) => "path",
            Value::GeoPoint { .. } => "latlng",
            Value::Array(_) => "list",
            Value::Map(_) => "map",
        }
    }

    /// Encode this value as its canonical wire JSON
    pub fn to_json(&self) -> JsonValue {
        match self {
            Value::Null => serde_json::json!({ "nullValue": null }),
            Value::Boolean(b) => serde_json::json!({ "booleanValue": b }),
            // 64-bit integers are decimal strings on the wire
            Value::Integer(i) => serde_json::json!({ "integerValue": i.to_string() }),
            Value::Double(d) => {
                if d.is_nan() {
                    serde_json::json!({ "doubleValue": "NaN" })
                } else if d.is_infinite() {
                    let s = if *d > 0.0 { "Infinity" } else { "-Infinity" };
                    serde_json::json!({ "doubleValue": s })
                } else {
                    serde_json::json!({ "doubleValue": d })
                }
            }
            Value::Timestamp(t) => serde_json::json!({ "timestampValue": format_timestamp(*t) }),
            Value::String(s) => serde_json::json!({ "stringValue": s }),
            Value::Bytes(b) => serde_json::json!({ "bytesValue": BASE64.encode(b) }),
            Value::Reference(r) => serde_json::json!({ "referenceValue": r }),
            Value::GeoPoint { latitude, longitude } => serde_json::json!({
                "geoPointValue": { "latitude": latitude, "longitude": longitude }
            }),
            Value::Array(items) => {
                let values: Vec<JsonValue> = items.iter().map(|v| v.to_json()).collect();
                serde_json::json!({ "arrayValue": { "values": values } })
            }
            Value::Map(fields) => {
                let mut out = serde_json::Map::new();
                for (k, v) in fields {
                    out.insert(k.clone(), v.to_json());
                }
                serde_json::json!({ "mapValue": { "fields": out } })
            }
        }
    }

    /// Decode a value from its canonical wire JSON
    pub fn from_json(json: &JsonValue) -> Result<Value> {
        let obj = json.as_object().ok_or_else(|| {
            MiniStoreError::InvalidArgument(format!("Invalid value: expected object, got {}", json))
        })?;

        if obj.contains_key("nullValue") {
            return Ok(Value::Null);
        }
        if let Some(b) = obj.get("booleanValue") {
            let b = b.as_bool().ok_or_else(|| {
                MiniStoreError::InvalidArgument("booleanValue must be a boolean".into())
            })?;
            return Ok(Value::Boolean(b));
        }
        if let Some(i) = obj.get("integerValue") {
            // Accepted as a decimal string (canonical) or a bare number
            let parsed = match i {
                JsonValue::String(s) => s.parse::<i64>().ok(),
                JsonValue::Number(n) => n.as_i64(),
                _ => None,
            };
            return parsed.map(Value::Integer).ok_or_else(|| {
                MiniStoreError::InvalidArgument(format!("Invalid integerValue: {}", i))
            });
        }
        if let Some(d) = obj.get("doubleValue") {
            let parsed = match d {
                JsonValue::Number(n) => n.as_f64(),
                JsonValue::String(s) => match s.as_str() {
                    "NaN" => Some(f64::NAN),
                    "Infinity" => Some(f64::INFINITY),
                    "-Infinity" => Some(f64::NEG_INFINITY),
                    other => other.parse::<f64>().ok(),
                },
                _ => None,
            };
            return parsed.map(Value::Double).ok_or_else(|| {
                MiniStoreError::InvalidArgument(format!("Invalid doubleValue: {}", d))
            });
        }
        if let Some(t) = obj.get("timestampValue") {
            let s = t.as_str().ok_or_else(|| {
                MiniStoreError::InvalidArgument("timestampValue must be a string".into())
            })?;
            return Ok(Value::Timestamp(parse_timestamp(s)?));
        }
        if let Some(s) = obj.get("stringValue") {
            let s = s.as_str().ok_or_else(|| {
                MiniStoreError::InvalidArgument("stringValue must be a string".into())
            })?;
            return Ok(Value::String(s.to_string()));
        }
        if let Some(b) = obj.get("bytesValue") {
            let s = b.as_str().ok_or_else(|| {
                MiniStoreError::InvalidArgument("bytesValue must be a base64 string".into())
            })?;
            let decoded = BASE64.decode(s).map_err(|e| {
                MiniStoreError::InvalidArgument(format!("Invalid base64 in bytesValue: {}", e))
            })?;
            return Ok(Value::Bytes(decoded));
        }
        if let Some(r) = obj.get("referenceValue") {
            let s = r.as_str().ok_or_else(|| {
                MiniStoreError::InvalidArgument("referenceValue must be a string".into())
            })?;
            return Ok(Value::Reference(s.to_string()));
        }
        if let Some(g) = obj.get("geoPointValue") {
            let latitude = g.get("latitude").and_then(|v| v.as_f64()).unwrap_or(0.0);
            let longitude = g.get("longitude").and_then(|v| v.as_f64()).unwrap_or(0.0);
            return Ok(Value::GeoPoint { latitude, longitude });
        }
        if let Some(a) = obj.get("arrayValue") {
            let mut items = Vec::new();
            if let Some(values) = a.get("values").and_then(|v| v.as_array()) {
                for v in values {
                    items.push(Value::from_json(v)?);
                }
            }
            return Ok(Value::Array(items));
        }
        if let Some(m) = obj.get("mapValue") {
            let mut fields = FieldMap::new();
            if let Some(entries) = m.get("fields").and_then(|v| v.as_object()) {
                for (k, v) in entries {
                    fields.insert(k.clone(), Value::from_json(v)?);
                }
            }
            return Ok(Value::Map(fields));
        }

        Err(MiniStoreError::InvalidArgument(format!(
            "Invalid value: no recognized type tag in {}",
            json
        )))
    }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        self.to_json().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Value {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let json = JsonValue::deserialize(deserializer)?;
        Value::from_json(&json).map_err(|e| D::Error::custom(e.to_string()))
    }
}

/// Encode a field map as a wire `fields` object
pub fn fields_to_json(fields: &FieldMap) -> JsonValue {
    let mut out = serde_json::Map::new();
    for (k, v) in fields {
        out.insert(k.clone(), v.to_json());
    }
    JsonValue::Object(out)
}

// =========================================================================
// Field path traversal
// =========================================================================

/// Read the value at a dotted field path, traversing nested maps
pub fn get_field<'a>(fields: &'a FieldMap, segments: &[String]) -> Option<&'a Value> {
    let (first, rest) = segments.split_first()?;
    let value = fields.get(first)?;
    if rest.is_empty() {
        return Some(value);
    }
    match value {
        Value::Map(inner) => get_field(inner, rest),
        _ => None,
    }
}

/// Write a value at a dotted field path, creating intermediate maps
///
/// Existing non-map intermediates are replaced by maps, matching the
/// production merge behavior.
pub fn set_field(fields: &mut FieldMap, segments: &[String], value: Value) {
    let (first, rest) = match segments.split_first() {
        Some(split) => split,
        None => return,
    };
    if rest.is_empty() {
        fields.insert(first.clone(), value);
        return;
    }
    let entry = fields
        .entry(first.clone())
        .or_insert_with(|| Value::Map(FieldMap::new()));
    if !matches!(entry, Value::Map(_)) {
        *entry = Value::Map(FieldMap::new());
    }
    if let Value::Map(inner) = entry {
        set_field(inner, rest, value);
    }
}

/// Delete the value at a dotted field path; missing intermediates are a no-op
pub fn delete_field(fields: &mut FieldMap, segments: &[String]) {
    let (first, rest) = match segments.split_first() {
        Some(split) => split,
        None => return,
    };
    if rest.is_empty() {
        fields.remove(first);
        return;
    }
    if let Some(Value::Map(inner)) = fields.get_mut(first) {
        delete_field(inner, rest);
    }
}

// =========================================================================
// Documents
// =========================================================================

/// A stored document: fields plus server-assigned times
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    /// Field values
    pub fields: FieldMap,
    /// Time of first successful write to this path; immutable until deletion
    pub create_time: DateTime<Utc>,
    /// Time of the latest successful commit touching this path
    pub update_time: DateTime<Utc>,
}

impl Document {
    /// Create a document whose create and update times are both `time`
    pub fn new(fields: FieldMap, time: DateTime<Utc>) -> Self {
        Self {
            fields,
            create_time: time,
            update_time: time,
        }
    }

    /// Encode as a wire document with the given resource name
    pub fn to_json(&self, name: &str) -> JsonValue {
        serde_json::json!({
            "name": name,
            "fields": fields_to_json(&self.fields),
            "createTime": format_timestamp(self.create_time),
            "updateTime": format_timestamp(self.update_time),
        })
    }
}
