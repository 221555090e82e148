//! The model pipeline: whole-record encryption and decryption.
//!
//! Records are schema-free JSON objects. Fields whose dotted path matches
//! an encrypted column are transformed; everything else (including nested
//! objects, arrays, nulls and absent fields) passes through untouched.

use itertools::Itertools;
use log::debug;
use serde_json::Value;

use super::build_payload;
use crate::client::ProtectClient;
use crate::encryption::{iv_of, open, Plaintext};
use crate::eql::{lookup_path, lookup_path_mut, EncryptedPayload, Identifier};
use crate::errors::{DecryptError, EncryptError, Error};
use crate::schema::Table;
use crate::zerokms::{Context, GenerateKeyPayload, KeyService, RetrieveKeyPayload};

/// Encrypts a batch of records against one table, coalescing all key
/// derivation into a single request. Any sub-failure fails the whole call.
pub(crate) async fn encrypt_models<K: KeyService>(
    client: &ProtectClient<K>,
    records: Vec<Value>,
    table: &Table,
    context: Vec<Context>,
) -> Result<Vec<Value>, Error> {
    // Plan: collect (record, path, plaintext) for every present, non-null
    // encrypted field
    struct PlannedField {
        record_index: usize,
        path: String,
        plaintext: Plaintext,
        identifier: Identifier,
    }

    let mut fields = Vec::new();

    for (record_index, record) in records.iter().enumerate() {
        for column in table.columns() {
            let segments: Vec<&str> = column.path().split('.').collect();

            let field = match lookup_path(record, &segments) {
                Some(field) if !field.is_null() => field,
                // Null and absent fields are preserved exactly
                _ => continue,
            };

            let plaintext = Plaintext::from_json_value(field, column.config().cast_type)
                .map_err(EncryptError::from)?;

            fields.push(PlannedField {
                record_index,
                path: column.path().to_string(),
                plaintext,
                identifier: Identifier::new(table.name(), column.name()),
            });
        }
    }

    debug!(
        "encrypting {} fields across {} records of \"{}\"",
        fields.len(),
        records.len(),
        table.name()
    );

    let key_payloads = fields
        .iter()
        .map(|field| GenerateKeyPayload {
            descriptor: client.scoped_descriptor(&field.identifier),
            context: context.clone(),
        })
        .collect();

    let keys = client
        .key_service()
        .generate_keys(key_payloads)
        .await
        .map_err(EncryptError::from)?;

    let mut out = records;

    for (field, key) in fields.into_iter().zip_eq(keys) {
        let column = table
            .resolve_column(&field.path)
            .expect("planning resolved this column");

        let payload = build_payload(client, &field.plaintext, &key, column, &field.identifier)?;

        let segments: Vec<&str> = field.path.split('.').collect();
        let slot = lookup_path_mut(&mut out[field.record_index], &segments)
            .expect("planning located this field");
        *slot = serde_json::to_value(payload)
            .map_err(|e| EncryptError::IndexingError(e.to_string()))?;
    }

    Ok(out)
}

/// Decrypts a batch of records. Any field anywhere in a record that matches
/// the encrypted payload shape is decrypted; its config is located through
/// the payload's own identification tuple. Fields that are not payloads
/// pass through untouched. The whole batch fails on the first field that
/// cannot be decrypted.
pub(crate) async fn decrypt_models<K: KeyService>(
    client: &ProtectClient<K>,
    records: Vec<Value>,
    context: Vec<Context>,
) -> Result<Vec<Value>, Error> {
    struct PlannedField {
        record_index: usize,
        pointer: String,
        payload: EncryptedPayload,
    }

    let mut fields = Vec::new();

    for (record_index, record) in records.iter().enumerate() {
        let mut found = Vec::new();
        collect_payloads(record, String::new(), &mut found);

        for (pointer, payload) in found {
            client
                .schema()
                .resolve(&payload.identifier.table, &payload.identifier.column)?;

            fields.push(PlannedField {
                record_index,
                pointer,
                payload,
            });
        }
    }

    debug!(
        "decrypting {} fields across {} records",
        fields.len(),
        records.len()
    );

    let retrievals = fields
        .iter()
        .map(|field| {
            let ciphertext = field.payload.ciphertext.as_deref().ok_or_else(|| {
                DecryptError::InvalidCiphertext("payload has no ciphertext".to_string())
            })?;

            Ok(RetrieveKeyPayload {
                iv: iv_of(ciphertext).map_err(Error::Decrypt)?,
                descriptor: client.scoped_descriptor(&field.payload.identifier),
                context: context.clone(),
            })
        })
        .collect::<Result<Vec<_>, Error>>()?;

    let keys = client
        .key_service()
        .retrieve_keys(retrievals)
        .await
        .map_err(DecryptError::from)?;

    let mut out = records;

    for (field, key) in fields.into_iter().zip_eq(keys) {
        let ciphertext = field
            .payload
            .ciphertext
            .as_deref()
            .expect("planning checked the ciphertext");

        let plaintext = open(ciphertext, &key).map_err(Error::Decrypt)?;

        let slot = out[field.record_index]
            .pointer_mut(&field.pointer)
            .expect("planning located this field");
        *slot = plaintext.to_json_value();
    }

    Ok(out)
}

/// Depth-first scan for encrypted payload objects, keyed by JSON pointer.
fn collect_payloads(value: &Value, pointer: String, out: &mut Vec<(String, EncryptedPayload)>) {
    match value {
        Value::Object(map) => {
            if let Ok(payload) = serde_json::from_value::<EncryptedPayload>(value.clone()) {
                out.push((pointer, payload));
                return;
            }

            for (key, child) in map {
                let escaped = key.replace('~', "~0").replace('/', "~1");
                collect_payloads(child, format!("{pointer}/{escaped}"), out);
            }
        }
        Value::Array(items) => {
            for (index, item) in items.iter().enumerate() {
                collect_payloads(item, format!("{pointer}/{index}"), out);
            }
        }
        _ => {}
    }
}
