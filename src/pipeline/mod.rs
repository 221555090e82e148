//! The value pipeline: batches key requests and drives the primitive
//! operations for single and bulk encrypt/decrypt.
//!
//! All cryptographic work for one public call funnels through a single key
//! service round trip. Output order always equals input order.

pub(crate) mod model;

use itertools::Itertools;
use log::debug;

use crate::client::ProtectClient;
use crate::encryption::{
    flatten_json_to_leaves, iv_of, open, seal, seal_with_aad, selector, IndexTerm, Plaintext,
};
use crate::eql::{EncryptedPayload, Identifier, SteVecEntry};
use crate::errors::{DecryptError, EncryptError, Error};
use crate::schema::{Column, IndexType, Table};
use crate::zerokms::{Context, DataKey, GenerateKeyPayload, KeyService, RetrieveKeyPayload};

/// One bulk-encrypt input: an optional caller correlation id and the
/// plaintext (a null plaintext passes through as a null payload).
pub struct BulkEncryptItem {
    pub id: Option<String>,
    pub plaintext: Plaintext,
}

/// One bulk-decrypt input.
pub struct BulkDecryptItem {
    pub id: Option<String>,
    pub payload: Option<EncryptedPayload>,
}

/// One bulk-decrypt output. Per-item failure is expected and does not fail
/// the batch.
pub struct BulkDecryptedItem {
    pub id: Option<String>,
    pub result: Result<Option<Plaintext>, Error>,
}

pub(crate) async fn encrypt_values<K: KeyService>(
    client: &ProtectClient<K>,
    items: Vec<BulkEncryptItem>,
    table: &Table,
    column: &Column,
    context: Vec<Context>,
) -> Result<Vec<(Option<String>, Option<EncryptedPayload>)>, Error> {
    let identifier = Identifier::new(table.name(), column.name());
    let descriptor = client.scoped_descriptor(&identifier);

    // One key per non-null plaintext, all in one round trip
    let key_demand = items.iter().filter(|item| !item.plaintext.is_null()).count();
    let payloads = vec![
        GenerateKeyPayload {
            descriptor: descriptor.clone(),
            context: context.clone(),
        };
        key_demand
    ];

    debug!(
        "encrypting {} values ({} keys) for {}",
        items.len(),
        key_demand,
        identifier
    );

    let mut keys = client
        .key_service()
        .generate_keys(payloads)
        .await
        .map_err(EncryptError::from)?
        .into_iter();

    let mut out = Vec::with_capacity(items.len());

    for item in items {
        if item.plaintext.is_null() {
            out.push((item.id, None));
            continue;
        }

        let key = keys.next().ok_or_else(|| {
            EncryptError::IndexingError("key service returned too few keys".to_string())
        })?;

        let mut payload = build_payload(client, &item.plaintext, &key, column, &identifier)?;
        payload.id = item.id.clone();
        out.push((item.id, Some(payload)));
    }

    Ok(out)
}

pub(crate) async fn decrypt_values<K: KeyService>(
    client: &ProtectClient<K>,
    items: Vec<BulkDecryptItem>,
    context: Vec<Context>,
) -> Result<Vec<BulkDecryptedItem>, Error> {
    // Plan each item before going to the key service. Items that fail
    // planning carry their error inline and claim no key.
    enum Planned {
        Null,
        Failed(Error),
        Ready { payload: EncryptedPayload },
    }

    let mut planned = Vec::with_capacity(items.len());
    let mut retrievals = Vec::new();
    let mut ids = Vec::with_capacity(items.len());

    for item in items {
        ids.push(item.id);

        let payload = match item.payload {
            None => {
                planned.push(Planned::Null);
                continue;
            }
            Some(payload) => payload,
        };

        match plan_retrieval(client, &payload, &context) {
            Ok(retrieval) => {
                retrievals.push(retrieval);
                planned.push(Planned::Ready { payload });
            }
            Err(e) => planned.push(Planned::Failed(e)),
        }
    }

    debug!(
        "decrypting {} values ({} keys)",
        planned.len(),
        retrievals.len()
    );

    // A transport failure fails the whole batch
    let mut keys = client
        .key_service()
        .retrieve_keys(retrievals)
        .await
        .map_err(DecryptError::from)?
        .into_iter();

    let results = planned
        .into_iter()
        .zip_eq(ids)
        .map(|(plan, id)| {
            let result = match plan {
                Planned::Null => Ok(None),
                Planned::Failed(e) => Err(e),
                Planned::Ready { payload } => {
                    let key = keys.next().expect("one key was requested per ready item");
                    open_payload(&payload, &key).map(Some)
                }
            };

            BulkDecryptedItem { id, result }
        })
        .collect();

    Ok(results)
}

fn plan_retrieval<K: KeyService>(
    client: &ProtectClient<K>,
    payload: &EncryptedPayload,
    context: &[Context],
) -> Result<RetrieveKeyPayload, Error> {
    // The payload's identification tuple must locate a column in the loaded
    // schema before any key is requested.
    client
        .schema()
        .resolve(&payload.identifier.table, &payload.identifier.column)?;

    let ciphertext = payload.ciphertext.as_deref().ok_or_else(|| {
        Error::Decrypt(DecryptError::InvalidCiphertext(
            "payload has no ciphertext".to_string(),
        ))
    })?;

    Ok(RetrieveKeyPayload {
        iv: iv_of(ciphertext).map_err(Error::Decrypt)?,
        descriptor: client.scoped_descriptor(&payload.identifier),
        context: context.to_vec(),
    })
}

fn open_payload(payload: &EncryptedPayload, key: &DataKey) -> Result<Plaintext, Error> {
    let ciphertext = payload
        .ciphertext
        .as_deref()
        .expect("planning checked the ciphertext");

    Ok(open(ciphertext, key).map_err(Error::Decrypt)?)
}

/// Builds the full payload for one plaintext: ciphertext plus every index
/// token the column's config demands.
pub(crate) fn build_payload<K: KeyService>(
    client: &ProtectClient<K>,
    plaintext: &Plaintext,
    key: &DataKey,
    column: &Column,
    identifier: &Identifier,
) -> Result<EncryptedPayload, Error> {
    if let Some(prefix) = column.config().ste_vec_prefix() {
        return build_ste_vec_payload(client, plaintext, key, identifier, prefix);
    }

    let mut payload = EncryptedPayload::scalar(identifier.clone());
    payload.ciphertext = Some(seal(plaintext, key).map_err(Error::Encrypt)?);

    let cipher = client.cipher();
    for index in &column.config().indexes {
        let descriptor = format!("{}#{}", identifier.descriptor(), index.index_type.as_str());

        match &index.index_type {
            IndexType::Unique { token_filters } => {
                if let IndexTerm::Binary(bytes) =
                    cipher.unique_index(plaintext, &descriptor, token_filters.clone())?
                {
                    payload.unique_index = Some(hex::encode(bytes));
                }
            }
            IndexType::Match(opts) => {
                if let IndexTerm::BitMap(positions) =
                    cipher.match_index(plaintext, &descriptor, opts.clone())?
                {
                    payload.match_index = Some(positions);
                }
            }
            IndexType::Ore => {
                if let IndexTerm::OreFull(bytes) = cipher.ore_index(plaintext, &descriptor)? {
                    payload.ore_index = Some(hex::encode(bytes));
                }
            }
            IndexType::SteVec { .. } => unreachable!("handled above"),
        }
    }

    Ok(payload)
}

fn build_ste_vec_payload<K: KeyService>(
    client: &ProtectClient<K>,
    plaintext: &Plaintext,
    key: &DataKey,
    identifier: &Identifier,
    prefix: &str,
) -> Result<EncryptedPayload, Error> {
    let value = match plaintext {
        Plaintext::JsonB(Some(value)) => value,
        other => {
            return Err(Error::Encrypt(EncryptError::IndexingError(format!(
                "ste-vec requires a JSON plaintext, got {other:?}"
            ))))
        }
    };

    let mut payload = EncryptedPayload::ste_vec(identifier.clone());
    payload.ciphertext = Some(seal(plaintext, key).map_err(Error::Encrypt)?);

    let cipher = client.cipher();
    let mut entries = Vec::new();

    for leaf in flatten_json_to_leaves(value) {
        let leaf_selector = selector(prefix, &leaf.path);

        let term = match cipher.selector_term(&leaf.leaf, &leaf_selector)? {
            IndexTerm::Binary(bytes) => Some(hex::encode(bytes)),
            _ => None,
        };

        // Leaf ciphertexts share the value's data key; the selector rides
        // along as AAD so entries cannot be swapped between paths.
        let ciphertext =
            seal_with_aad(&leaf.leaf, key, leaf_selector.as_bytes()).map_err(Error::Encrypt)?;

        entries.push(SteVecEntry {
            selector: leaf_selector,
            ciphertext: Some(ciphertext),
            term,
        });
    }

    payload.ste_vec_index = Some(entries);

    Ok(payload)
}
