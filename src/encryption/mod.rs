//! The crypto primitive operations interface.
//!
//! Everything in this module is deterministic for a given (plaintext, key,
//! config) tuple, so outputs can be reproduced byte-for-byte in tests.
//! Value encryption uses single-use data keys from the key service; index
//! tokens use keys derived locally from the keyset-scoped index root key so
//! that a query term is comparable with stored tokens.

mod b64;
mod match_indexer;
mod ore_indexer;
mod plaintext;
mod record_cipher;
mod ste_vec;
mod text;
mod unique_indexer;

pub use b64::{b64_decode, b64_encode};
pub use match_indexer::{is_subset, MatchIndexer};
pub use ore_indexer::{compare as ore_compare, OreIndexer};
pub use plaintext::Plaintext;
pub use record_cipher::{iv_of, open, open_with_aad, seal, seal_with_aad, IV_LEN};
pub use ste_vec::{flatten_json_to_leaves, parse_path_expression, selector, JsonLeaf};
pub use unique_indexer::UniqueIndexer;

use hmac::{Hmac, Mac};
use sha2::Sha256;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::errors::EncryptError;
use crate::schema::{MatchOpts, TokenFilter};

type HmacSha256 = Hmac<Sha256>;

/// An index term produced by one of the indexers.
#[derive(Debug, Clone, PartialEq)]
pub enum IndexTerm {
    /// The plaintext was null; nothing to index.
    Null,
    /// Equality HMAC bytes.
    Binary(Vec<u8>),
    /// Bloom filter bit positions.
    BitMap(Vec<u16>),
    /// Order-revealing encoding.
    OreFull(Vec<u8>),
}

/// The keyset-scoped root key all index keys derive from. Fetched once at
/// client initialization and held for the client's lifetime.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct IndexRootKey([u8; 32]);

impl IndexRootKey {
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }
}

/// A per-descriptor index key, derived from the root key.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct IndexKey([u8; 32]);

impl IndexKey {
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub(crate) fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

/// Deterministic index-token builder scoped to one index root key.
pub struct ScopedCipher {
    root_key: IndexRootKey,
}

impl ScopedCipher {
    pub fn new(root_key: IndexRootKey) -> Self {
        Self { root_key }
    }

    /// Derives the index key for a descriptor such as `users/email#unique`
    /// or a ste-vec selector.
    pub fn index_key(&self, descriptor: &str) -> IndexKey {
        let mut mac = HmacSha256::new_from_slice(&self.root_key.0)
            .expect("HMAC accepts any key length");
        mac.update(descriptor.as_bytes());

        IndexKey(mac.finalize().into_bytes().into())
    }

    pub fn unique_index(
        &self,
        plaintext: &Plaintext,
        descriptor: &str,
        token_filters: Vec<TokenFilter>,
    ) -> Result<IndexTerm, EncryptError> {
        UniqueIndexer::new(self.index_key(descriptor), token_filters).index(plaintext)
    }

    pub fn match_index(
        &self,
        plaintext: &Plaintext,
        descriptor: &str,
        opts: MatchOpts,
    ) -> Result<IndexTerm, EncryptError> {
        MatchIndexer::new(self.index_key(descriptor), opts).index(plaintext)
    }

    pub fn ore_index(
        &self,
        plaintext: &Plaintext,
        descriptor: &str,
    ) -> Result<IndexTerm, EncryptError> {
        OreIndexer::new(self.index_key(descriptor)).index(plaintext)
    }

    /// The deterministic per-leaf term for a ste-vec entry, keyed by the
    /// leaf's selector.
    pub fn selector_term(
        &self,
        plaintext: &Plaintext,
        selector: &str,
    ) -> Result<IndexTerm, EncryptError> {
        UniqueIndexer::new(self.index_key(selector), vec![]).index(plaintext)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn index_keys_differ_by_descriptor() {
        let cipher = ScopedCipher::new(IndexRootKey::from_bytes([9; 32]));

        let a = cipher.index_key("users/email#unique");
        let b = cipher.index_key("users/email#match");

        assert_ne!(a.as_bytes(), b.as_bytes());
    }

    #[test]
    fn index_keys_are_deterministic() {
        let cipher = ScopedCipher::new(IndexRootKey::from_bytes([9; 32]));

        assert_eq!(
            cipher.index_key("users/email#unique").as_bytes(),
            cipher.index_key("users/email#unique").as_bytes()
        );
    }
}
