//! The encrypted payload in its canonical object form, and the
//! database-boundary encodings it travels in.
//!
//! Canonical form is compact JSON. For storage the payload is wrapped in a
//! composite literal: the JSON with every `"` doubled, inside `("…")`. The
//! escaped variant JSON-stringifies the composite literal for transports
//! that carry it inside another JSON document.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::EncodingError;
use crate::schema::Table;

/// Payload format version.
pub const PAYLOAD_VERSION: u16 = 2;

/// Table and column identification carried inside every payload; required to
/// find the decryption config.
#[derive(Clone, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
pub struct Identifier {
    /// The table name.
    #[serde(rename = "t")]
    pub table: String,
    /// The column name.
    #[serde(rename = "c")]
    pub column: String,
}

impl Identifier {
    pub fn new<S>(table: S, column: S) -> Self
    where
        S: Into<String>,
    {
        Self {
            table: table.into(),
            column: column.into(),
        }
    }

    /// The canonical `{table}/{column}` key-derivation descriptor.
    pub fn descriptor(&self) -> String {
        format!("{}/{}", self.table, self.column)
    }
}

impl std::fmt::Display for Identifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.table, self.column)
    }
}

/// Payload shape tag.
#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Eq, Serialize)]
pub enum PayloadKind {
    /// A scalar value payload.
    #[serde(rename = "pt")]
    Scalar,
    /// A searchable-JSON payload carrying a ste-vec.
    #[serde(rename = "sv")]
    SteVec,
}

/// One per-leaf entry of a ste-vec.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct SteVecEntry {
    /// Selector identifying the leaf's JSON path.
    #[serde(rename = "s")]
    pub selector: String,
    /// Encrypted leaf value.
    #[serde(rename = "c", default, skip_serializing_if = "Option::is_none")]
    pub ciphertext: Option<String>,
    /// Deterministic per-leaf equality term, used for containment matching.
    #[serde(rename = "hm", default, skip_serializing_if = "Option::is_none")]
    pub term: Option<String>,
}

/// The canonical encrypted payload.
///
/// Index token fields are present iff the corresponding index is configured
/// on the column (or, for query terms, selected by the query type).
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct EncryptedPayload {
    /// Format version.
    #[serde(rename = "v")]
    pub version: u16,
    /// Payload shape tag.
    #[serde(rename = "k")]
    pub kind: PayloadKind,
    /// AEAD ciphertext. Absent on path-only query terms.
    #[serde(rename = "c", default, skip_serializing_if = "Option::is_none")]
    pub ciphertext: Option<String>,
    /// Table and column identification.
    #[serde(rename = "i")]
    pub identifier: Identifier,
    /// Order index token.
    #[serde(rename = "ob", default, skip_serializing_if = "Option::is_none")]
    pub ore_index: Option<String>,
    /// Equality HMAC token.
    #[serde(rename = "hm", default, skip_serializing_if = "Option::is_none")]
    pub unique_index: Option<String>,
    /// Match index bloom positions.
    #[serde(rename = "bf", default, skip_serializing_if = "Option::is_none")]
    pub match_index: Option<Vec<u16>>,
    /// Ste-vec selector (query terms only).
    #[serde(rename = "s", default, skip_serializing_if = "Option::is_none")]
    pub selector: Option<String>,
    /// Ste-vec entries.
    #[serde(rename = "sv", default, skip_serializing_if = "Option::is_none")]
    pub ste_vec_index: Option<Vec<SteVecEntry>>,
    /// Caller-supplied correlation id (bulk operations only).
    #[serde(rename = "id", default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
}

impl EncryptedPayload {
    /// An empty scalar payload for the identifier; the pipeline fills in
    /// ciphertext and tokens.
    pub(crate) fn scalar(identifier: Identifier) -> Self {
        Self {
            version: PAYLOAD_VERSION,
            kind: PayloadKind::Scalar,
            ciphertext: None,
            identifier,
            ore_index: None,
            unique_index: None,
            match_index: None,
            selector: None,
            ste_vec_index: None,
            id: None,
        }
    }

    pub(crate) fn ste_vec(identifier: Identifier) -> Self {
        Self {
            kind: PayloadKind::SteVec,
            ..Self::scalar(identifier)
        }
    }

    /// Serializes to compact canonical JSON.
    pub fn to_json(&self) -> Result<String, EncodingError> {
        Ok(serde_json::to_string(self)?)
    }

    /// Encodes to the storage composite literal: canonical JSON with every
    /// `"` doubled, wrapped in `("…")`.
    pub fn to_composite_literal(&self) -> Result<String, EncodingError> {
        Ok(composite_literal(&self.to_json()?))
    }

    /// Encodes to the escaped transport form: the composite literal as a
    /// JSON string.
    pub fn to_escaped_composite_literal(&self) -> Result<String, EncodingError> {
        let literal = self.to_composite_literal()?;
        Ok(serde_json::to_string(&literal)?)
    }

    /// Decodes a storage composite literal back to the canonical payload.
    pub fn from_composite_literal(literal: &str) -> Result<Self, EncodingError> {
        let json = decode_composite_literal(literal)?;
        Ok(serde_json::from_str(&json)?)
    }

    /// Decodes the escaped transport form.
    pub fn from_escaped_composite_literal(escaped: &str) -> Result<Self, EncodingError> {
        let literal: String = serde_json::from_str(escaped)?;
        Self::from_composite_literal(&literal)
    }
}

fn composite_literal(json: &str) -> String {
    format!("(\"{}\")", json.replace('"', "\"\""))
}

fn decode_composite_literal(literal: &str) -> Result<String, EncodingError> {
    let inner = literal
        .strip_prefix("(\"")
        .and_then(|rest| rest.strip_suffix("\")"))
        .ok_or_else(|| {
            EncodingError::Malformed("expected a (\"…\") composite literal".to_string())
        })?;

    Ok(inner.replace("\"\"", "\""))
}

/// Replaces every encrypted-column payload in a record with its composite
/// literal string, ready for storage.
pub fn encode_record(record: &Value, table: &Table) -> Result<Value, EncodingError> {
    map_record_fields(record, table, |field| {
        let payload: EncryptedPayload = serde_json::from_value(field.clone())?;
        Ok(Value::String(payload.to_composite_literal()?))
    })
}

/// Inverse of [`encode_record`]: parses composite literal strings at
/// encrypted-column paths back into payload objects.
pub fn decode_record(record: &Value, table: &Table) -> Result<Value, EncodingError> {
    map_record_fields(record, table, |field| {
        let literal = field.as_str().ok_or_else(|| {
            EncodingError::Malformed("expected a composite literal string".to_string())
        })?;
        let payload = EncryptedPayload::from_composite_literal(literal)?;
        Ok(serde_json::to_value(payload)?)
    })
}

fn map_record_fields(
    record: &Value,
    table: &Table,
    mut transform: impl FnMut(&Value) -> Result<Value, EncodingError>,
) -> Result<Value, EncodingError> {
    let mut out = record.clone();

    for column in table.columns() {
        let segments: Vec<&str> = column.path().split('.').collect();
        if let Some(field) = lookup_path(&out, &segments) {
            if field.is_null() {
                continue;
            }
            let replacement = transform(field)?;
            if let Some(slot) = lookup_path_mut(&mut out, &segments) {
                *slot = replacement;
            }
        }
    }

    Ok(out)
}

pub(crate) fn lookup_path<'v>(record: &'v Value, segments: &[&str]) -> Option<&'v Value> {
    let mut current = record;
    for segment in segments {
        current = current.as_object()?.get(*segment)?;
    }
    Some(current)
}

pub(crate) fn lookup_path_mut<'v>(
    record: &'v mut Value,
    segments: &[&str],
) -> Option<&'v mut Value> {
    let mut current = record;
    for segment in segments {
        current = current.as_object_mut()?.get_mut(*segment)?;
    }
    Some(current)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_payload() -> EncryptedPayload {
        EncryptedPayload {
            ciphertext: Some("9jqo^BlbD-BleB1DJ".to_string()),
            unique_index: Some("deadbeef".to_string()),
            match_index: Some(vec![3, 17, 900]),
            ..EncryptedPayload::scalar(Identifier::new("users", "email"))
        }
    }

    #[test]
    fn canonical_json_format() {
        let json = sample_payload().to_json().unwrap();
        let parsed: Value = serde_json::from_str(&json).unwrap();

        assert_eq!(parsed["v"], 2);
        assert_eq!(parsed["k"], "pt");
        assert_eq!(parsed["i"]["t"], "users");
        assert_eq!(parsed["i"]["c"], "email");
        assert_eq!(parsed["hm"], "deadbeef");
        // Unconfigured tokens are omitted entirely, not nulled
        assert!(parsed.get("ob").is_none());
        assert!(parsed.get("s").is_none());
        assert!(parsed.get("sv").is_none());
    }

    #[test]
    fn composite_literal_round_trip() {
        let payload = sample_payload();
        let literal = payload.to_composite_literal().unwrap();

        assert!(literal.starts_with("(\""));
        assert!(literal.ends_with("\")"));
        assert!(!literal.contains(r#""v""#));

        let decoded = EncryptedPayload::from_composite_literal(&literal).unwrap();
        assert_eq!(decoded, payload);
    }

    #[test]
    fn escaped_composite_literal_round_trip() {
        let payload = sample_payload();
        let escaped = payload.to_escaped_composite_literal().unwrap();

        assert!(escaped.starts_with("\"(\\\""));

        let decoded = EncryptedPayload::from_escaped_composite_literal(&escaped).unwrap();
        assert_eq!(decoded, payload);
    }

    #[test]
    fn malformed_literals_are_rejected() {
        assert!(EncryptedPayload::from_composite_literal("not a literal").is_err());
        assert!(EncryptedPayload::from_composite_literal("(\"{}\"").is_err());
    }
}
