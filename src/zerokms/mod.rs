//! The key service client: batched per-value data keys and the
//! keyset-scoped index root key.
//!
//! Every call is one remote round trip regardless of batch size, and keys
//! are never cached locally. A transport failure fails the whole batch with
//! [`ZeroKmsError`](crate::errors::ZeroKmsError); there is no per-item
//! partial success at this layer.

mod client;

pub use client::{ZeroKmsClient, ZeroKmsClientBuilder};

use async_trait::async_trait;
use uuid::Uuid;
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

use crate::encryption::{IndexRootKey, IV_LEN};
use crate::errors::ZeroKmsError;

/// A derivation context entry attached to a key request. Identity claims
/// come from a bound lock context; a key derived with a context can only be
/// re-derived with the same context.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub enum Context {
    IdentityClaim(String),
    Tag(String),
    Value { key: String, value: String },
}

impl Context {
    pub fn new_identity_claim(claim: impl Into<String>) -> Self {
        Context::IdentityClaim(claim.into())
    }

    pub fn new_tag(tag: impl Into<String>) -> Self {
        Context::Tag(tag.into())
    }

    pub fn new_value(key: impl Into<String>, value: impl Into<String>) -> Self {
        Context::Value {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// Canonical byte rendering of a context set, independent of entry order.
pub fn canonical_context(context: &[Context]) -> Vec<u8> {
    let mut entries: Vec<String> = context
        .iter()
        .map(|entry| match entry {
            Context::IdentityClaim(claim) => format!("ic:{claim}"),
            Context::Tag(tag) => format!("tag:{tag}"),
            Context::Value { key, value } => format!("v:{key}={value}"),
        })
        .collect();

    entries.sort();
    entries.join("\n").into_bytes()
}

/// A single-use data key together with the IV the key service identifies it
/// by. Key material is wiped on drop.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct DataKey {
    #[zeroize(skip)]
    iv: [u8; IV_LEN],
    key: [u8; 32],
}

impl DataKey {
    pub fn new(iv: [u8; IV_LEN], key: [u8; 32]) -> Self {
        Self { iv, key }
    }

    pub fn iv(&self) -> &[u8; IV_LEN] {
        &self.iv
    }

    pub(crate) fn key_bytes(&self) -> &[u8; 32] {
        &self.key
    }
}

/// Request item for a fresh data key.
#[derive(Debug, Clone)]
pub struct GenerateKeyPayload {
    pub descriptor: String,
    pub context: Vec<Context>,
}

/// Request item to re-derive the data key identified by `iv`.
#[derive(Debug, Clone)]
pub struct RetrieveKeyPayload {
    pub iv: [u8; IV_LEN],
    pub descriptor: String,
    pub context: Vec<Context>,
}

/// An optional tenant keyset namespacing all derived keys.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Keyset {
    Name(String),
    Id(Uuid),
}

impl Keyset {
    pub fn descriptor(&self) -> String {
        match self {
            Keyset::Name(name) => format!("keyset-name:{name}"),
            Keyset::Id(id) => format!("keyset-id:{id}"),
        }
    }
}

/// The workspace client key. Derived keys mix this material in locally, so
/// key material served by the key service is useless on its own.
pub struct ClientKey {
    client_id: String,
    material: Zeroizing<Vec<u8>>,
}

impl ClientKey {
    pub fn from_bytes(
        client_id: impl Into<String>,
        material: &[u8],
    ) -> Result<Self, ZeroKmsError> {
        if material.len() < 16 {
            return Err(ZeroKmsError::Rejected(
                "client key material must be at least 16 bytes".to_string(),
            ));
        }

        Ok(Self {
            client_id: client_id.into(),
            material: Zeroizing::new(material.to_vec()),
        })
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    pub(crate) fn material(&self) -> &[u8] {
        &self.material
    }
}

/// The key-derivation seam the pipelines run against.
///
/// The production implementation is [`ZeroKmsClient`]; tests drive the
/// pipelines through an in-process implementation of this trait.
#[async_trait]
pub trait KeyService: Send + Sync {
    /// Derives one fresh data key per payload, in one round trip. The
    /// result preserves payload order.
    async fn generate_keys(
        &self,
        payloads: Vec<GenerateKeyPayload>,
    ) -> Result<Vec<DataKey>, ZeroKmsError>;

    /// Re-derives the data keys identified by each payload's IV, in one
    /// round trip. The result preserves payload order.
    async fn retrieve_keys(
        &self,
        payloads: Vec<RetrieveKeyPayload>,
    ) -> Result<Vec<DataKey>, ZeroKmsError>;

    /// Fetches the index root key for the keyset.
    async fn index_root_key(
        &self,
        keyset: Option<&Keyset>,
    ) -> Result<IndexRootKey, ZeroKmsError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonical_context_is_order_independent() {
        let a = canonical_context(&[
            Context::new_identity_claim("sub-1"),
            Context::new_tag("pii"),
        ]);
        let b = canonical_context(&[
            Context::new_tag("pii"),
            Context::new_identity_claim("sub-1"),
        ]);

        assert_eq!(a, b);
    }

    #[test]
    fn canonical_context_distinguishes_kinds() {
        let claim = canonical_context(&[Context::new_identity_claim("x")]);
        let tag = canonical_context(&[Context::new_tag("x")]);

        assert_ne!(claim, tag);
    }

    #[test]
    fn keyset_descriptors_are_namespaced() {
        assert_eq!(
            Keyset::Name("tenant-a".into()).descriptor(),
            "keyset-name:tenant-a"
        );
    }
}
