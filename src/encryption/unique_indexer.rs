use hmac::{Hmac, Mac};
use sha2::Sha256;

use super::{text::apply_filters, IndexKey, IndexTerm, Plaintext};
use crate::errors::EncryptError;
use crate::schema::TokenFilter;

type HmacSha256 = Hmac<Sha256>;

/// Produces the deterministic equality token (`hm`) for a plaintext.
pub struct UniqueIndexer {
    index_key: IndexKey,
    token_filters: Vec<TokenFilter>,
}

impl UniqueIndexer {
    pub fn new(index_key: IndexKey, token_filters: Vec<TokenFilter>) -> Self {
        Self {
            index_key,
            token_filters,
        }
    }

    fn create_hmac(&self) -> Result<HmacSha256, EncryptError> {
        HmacSha256::new_from_slice(self.index_key.as_bytes())
            .map_err(|e| EncryptError::IndexingError(e.to_string()))
    }

    pub fn index(&self, plaintext: &Plaintext) -> Result<IndexTerm, EncryptError> {
        if plaintext.is_null() {
            return Ok(IndexTerm::Null);
        }

        let bytes = match plaintext {
            Plaintext::Utf8Str(Some(s)) => {
                let filtered = apply_filters(&self.token_filters, s);
                Plaintext::Utf8Str(Some(filtered)).index_bytes()
            }
            other => other.index_bytes(),
        };

        let mut mac = self.create_hmac()?;
        mac.update(&bytes);

        Ok(IndexTerm::Binary(mac.finalize().into_bytes().to_vec()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key() -> IndexKey {
        IndexKey::from_bytes([1; 32])
    }

    #[test]
    fn deterministic_for_equal_plaintexts() {
        let indexer = UniqueIndexer::new(key(), vec![]);

        let first = indexer
            .index(&Plaintext::Utf8Str(Some("hello".into())))
            .expect("Failed to index");
        let second = indexer
            .index(&Plaintext::Utf8Str(Some("hello".into())))
            .expect("Failed to index");

        assert_eq!(first, second);
    }

    #[test]
    fn case_insensitive_with_downcase_filter() {
        let indexer = UniqueIndexer::new(key(), vec![TokenFilter::Downcase]);

        let first = indexer
            .index(&Plaintext::Utf8Str(Some("hello WORLD".into())))
            .expect("Failed to index");
        let second = indexer
            .index(&Plaintext::Utf8Str(Some("HELLO world".into())))
            .expect("Failed to index");

        assert_eq!(first, second);
    }

    #[test]
    fn null_yields_null_term() {
        let indexer = UniqueIndexer::new(key(), vec![]);
        let term = indexer.index(&Plaintext::Utf8Str(None)).unwrap();
        assert_eq!(term, IndexTerm::Null);
    }
}
