use chrono::NaiveDate;
use serde_json::Value;

use crate::errors::TypeParseError;
use crate::schema::CastType;

/// A typed plaintext value, the unit of work for the whole pipeline.
///
/// Every variant carries an `Option` so that a null value of a known type can
/// flow through the system without losing its type information.
#[derive(Debug, Clone, PartialEq)]
pub enum Plaintext {
    Utf8Str(Option<String>),
    BigInt(Option<i64>),
    Float(Option<f64>),
    Boolean(Option<bool>),
    NaiveDate(Option<NaiveDate>),
    JsonB(Option<Value>),
}

// Byte-serialization type tags. Stable across versions; the tag byte leads
// every sealed plaintext.
const TAG_UTF8_STR: u8 = 1;
const TAG_BIG_INT: u8 = 2;
const TAG_FLOAT: u8 = 3;
const TAG_BOOLEAN: u8 = 4;
const TAG_NAIVE_DATE: u8 = 5;
const TAG_JSONB: u8 = 6;

impl Plaintext {
    pub fn is_null(&self) -> bool {
        match self {
            Plaintext::Utf8Str(x) => x.is_none(),
            Plaintext::BigInt(x) => x.is_none(),
            Plaintext::Float(x) => x.is_none(),
            Plaintext::Boolean(x) => x.is_none(),
            Plaintext::NaiveDate(x) => x.is_none(),
            Plaintext::JsonB(x) => x.is_none(),
        }
    }

    /// Canonical bytes used as HMAC input by the indexers. Null variants
    /// serialize to an empty buffer; indexers short-circuit on null before
    /// calling this.
    pub fn index_bytes(&self) -> Vec<u8> {
        match self {
            Plaintext::Utf8Str(Some(s)) => s.as_bytes().to_vec(),
            Plaintext::BigInt(Some(i)) => i.to_be_bytes().to_vec(),
            Plaintext::Float(Some(f)) => f.to_bits().to_be_bytes().to_vec(),
            Plaintext::Boolean(Some(b)) => vec![*b as u8],
            Plaintext::NaiveDate(Some(d)) => days_since_epoch(d).to_be_bytes().to_vec(),
            Plaintext::JsonB(Some(v)) => canonical_json_bytes(v),
            _ => Vec::new(),
        }
    }

    /// Serializes self for AEAD sealing: a type tag, a presence flag, then
    /// the payload bytes.
    pub fn to_bytes(&self) -> Vec<u8> {
        let (tag, payload) = match self {
            Plaintext::Utf8Str(x) => (TAG_UTF8_STR, x.as_ref().map(|s| s.as_bytes().to_vec())),
            Plaintext::BigInt(x) => (TAG_BIG_INT, x.map(|i| i.to_be_bytes().to_vec())),
            Plaintext::Float(x) => (TAG_FLOAT, x.map(|f| f.to_bits().to_be_bytes().to_vec())),
            Plaintext::Boolean(x) => (TAG_BOOLEAN, x.map(|b| vec![b as u8])),
            Plaintext::NaiveDate(x) => (
                TAG_NAIVE_DATE,
                x.map(|d| days_since_epoch(&d).to_be_bytes().to_vec()),
            ),
            Plaintext::JsonB(x) => (TAG_JSONB, x.as_ref().map(canonical_json_bytes)),
        };

        let mut out = Vec::with_capacity(2 + payload.as_ref().map(Vec::len).unwrap_or(0));
        out.push(tag);
        match payload {
            Some(bytes) => {
                out.push(1);
                out.extend(bytes);
            }
            None => out.push(0),
        }
        out
    }

    /// Inverse of [`Plaintext::to_bytes`].
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, TypeParseError> {
        if bytes.len() < 2 {
            return Err(TypeParseError::new("Plaintext", "buffer too short"));
        }

        let (tag, present, payload) = (bytes[0], bytes[1] == 1, &bytes[2..]);

        macro_rules! fixed {
            ($len:expr, $name:literal) => {{
                let arr: [u8; $len] = payload
                    .try_into()
                    .map_err(|_| TypeParseError::new($name, "unexpected payload length"))?;
                arr
            }};
        }

        match (tag, present) {
            (TAG_UTF8_STR, false) => Ok(Plaintext::Utf8Str(None)),
            (TAG_UTF8_STR, true) => String::from_utf8(payload.to_vec())
                .map(|s| Plaintext::Utf8Str(Some(s)))
                .map_err(|e| TypeParseError::new("Utf8Str", e.to_string())),
            (TAG_BIG_INT, false) => Ok(Plaintext::BigInt(None)),
            (TAG_BIG_INT, true) => Ok(Plaintext::BigInt(Some(i64::from_be_bytes(fixed!(
                8, "BigInt"
            ))))),
            (TAG_FLOAT, false) => Ok(Plaintext::Float(None)),
            (TAG_FLOAT, true) => Ok(Plaintext::Float(Some(f64::from_bits(
                u64::from_be_bytes(fixed!(8, "Float")),
            )))),
            (TAG_BOOLEAN, false) => Ok(Plaintext::Boolean(None)),
            (TAG_BOOLEAN, true) => match payload {
                [0] => Ok(Plaintext::Boolean(Some(false))),
                [1] => Ok(Plaintext::Boolean(Some(true))),
                _ => Err(TypeParseError::new("Boolean", "invalid payload")),
            },
            (TAG_NAIVE_DATE, false) => Ok(Plaintext::NaiveDate(None)),
            (TAG_NAIVE_DATE, true) => {
                let days = i32::from_be_bytes(fixed!(4, "NaiveDate"));
                date_from_days(days)
                    .map(|d| Plaintext::NaiveDate(Some(d)))
                    .ok_or_else(|| TypeParseError::new("NaiveDate", "date out of range"))
            }
            (TAG_JSONB, false) => Ok(Plaintext::JsonB(None)),
            (TAG_JSONB, true) => serde_json::from_slice(payload)
                .map(|v| Plaintext::JsonB(Some(v)))
                .map_err(|e| TypeParseError::new("JsonB", e.to_string())),
            _ => Err(TypeParseError::new("Plaintext", "unknown type tag")),
        }
    }

    /// Casts a schema-free JSON value to the column's plaintext type.
    pub fn from_json_value(value: &Value, cast_type: CastType) -> Result<Self, TypeParseError> {
        if value.is_null() {
            return Ok(Self::null_of(cast_type));
        }

        match cast_type {
            CastType::Utf8Str => value
                .as_str()
                .map(|s| Plaintext::Utf8Str(Some(s.to_string())))
                .ok_or_else(|| TypeParseError::new("Utf8Str", format!("got {value}"))),
            CastType::BigInt => value
                .as_i64()
                .map(|i| Plaintext::BigInt(Some(i)))
                .ok_or_else(|| TypeParseError::new("BigInt", format!("got {value}"))),
            CastType::Float => value
                .as_f64()
                .map(|f| Plaintext::Float(Some(f)))
                .ok_or_else(|| TypeParseError::new("Float", format!("got {value}"))),
            CastType::Boolean => value
                .as_bool()
                .map(|b| Plaintext::Boolean(Some(b)))
                .ok_or_else(|| TypeParseError::new("Boolean", format!("got {value}"))),
            CastType::Date => value
                .as_str()
                .and_then(|s| s.parse::<NaiveDate>().ok())
                .map(|d| Plaintext::NaiveDate(Some(d)))
                .ok_or_else(|| TypeParseError::new("Date", format!("got {value}"))),
            CastType::Json | CastType::JsonB => Ok(Plaintext::JsonB(Some(value.clone()))),
        }
    }

    /// The null plaintext of the given cast type.
    pub fn null_of(cast_type: CastType) -> Self {
        match cast_type {
            CastType::Utf8Str => Plaintext::Utf8Str(None),
            CastType::BigInt => Plaintext::BigInt(None),
            CastType::Float => Plaintext::Float(None),
            CastType::Boolean => Plaintext::Boolean(None),
            CastType::Date => Plaintext::NaiveDate(None),
            CastType::Json | CastType::JsonB => Plaintext::JsonB(None),
        }
    }

    /// Converts self back to a schema-free JSON value, for reassembling
    /// decrypted records.
    pub fn to_json_value(&self) -> Value {
        match self {
            Plaintext::Utf8Str(Some(s)) => Value::String(s.clone()),
            Plaintext::BigInt(Some(i)) => Value::from(*i),
            Plaintext::Float(Some(f)) => {
                serde_json::Number::from_f64(*f).map(Value::Number).unwrap_or(Value::Null)
            }
            Plaintext::Boolean(Some(b)) => Value::Bool(*b),
            Plaintext::NaiveDate(Some(d)) => Value::String(d.to_string()),
            Plaintext::JsonB(Some(v)) => v.clone(),
            _ => Value::Null,
        }
    }
}

impl From<&str> for Plaintext {
    fn from(value: &str) -> Self {
        Plaintext::Utf8Str(Some(value.to_string()))
    }
}

impl From<String> for Plaintext {
    fn from(value: String) -> Self {
        Plaintext::Utf8Str(Some(value))
    }
}

impl From<i64> for Plaintext {
    fn from(value: i64) -> Self {
        Plaintext::BigInt(Some(value))
    }
}

impl From<f64> for Plaintext {
    fn from(value: f64) -> Self {
        Plaintext::Float(Some(value))
    }
}

impl From<bool> for Plaintext {
    fn from(value: bool) -> Self {
        Plaintext::Boolean(Some(value))
    }
}

impl From<NaiveDate> for Plaintext {
    fn from(value: NaiveDate) -> Self {
        Plaintext::NaiveDate(Some(value))
    }
}

impl From<Value> for Plaintext {
    fn from(value: Value) -> Self {
        Plaintext::JsonB(Some(value))
    }
}

fn days_since_epoch(date: &NaiveDate) -> i32 {
    let epoch = NaiveDate::from_ymd_opt(1970, 1, 1).expect("epoch date is valid");
    (*date - epoch).num_days() as i32
}

fn date_from_days(days: i32) -> Option<NaiveDate> {
    let epoch = NaiveDate::from_ymd_opt(1970, 1, 1)?;
    epoch.checked_add_signed(chrono::Duration::days(days as i64))
}

/// Compact JSON with object keys sorted, so index terms are stable across
/// semantically equal documents.
fn canonical_json_bytes(value: &Value) -> Vec<u8> {
    fn canonicalize(value: &Value) -> Value {
        match value {
            Value::Object(map) => {
                let mut entries: Vec<(&String, &Value)> = map.iter().collect();
                entries.sort_by_key(|(k, _)| k.as_str());
                Value::Object(
                    entries
                        .into_iter()
                        .map(|(k, v)| (k.clone(), canonicalize(v)))
                        .collect(),
                )
            }
            Value::Array(items) => Value::Array(items.iter().map(canonicalize).collect()),
            other => other.clone(),
        }
    }

    serde_json::to_vec(&canonicalize(value)).unwrap_or_default()
}
