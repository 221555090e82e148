use hmac::{Hmac, Mac};
use sha2::Sha256;

use super::{text::apply_filters, IndexKey, IndexTerm, Plaintext};
use crate::errors::EncryptError;
use crate::schema::MatchOpts;

type HmacSha256 = Hmac<Sha256>;

/// Produces the bloom-filter match tokens (`bf`) for a text plaintext.
///
/// Each token contributes `k` bit positions in an `m`-bit space. The emitted
/// term is the sorted, deduplicated list of positions; a query term matches
/// a stored value iff its positions are a subset of the stored positions.
pub struct MatchIndexer {
    index_key: IndexKey,
    opts: MatchOpts,
}

impl MatchIndexer {
    pub fn new(index_key: IndexKey, opts: MatchOpts) -> Self {
        Self { index_key, opts }
    }

    pub fn index(&self, plaintext: &Plaintext) -> Result<IndexTerm, EncryptError> {
        if plaintext.is_null() {
            return Ok(IndexTerm::Null);
        }

        let text = match plaintext {
            Plaintext::Utf8Str(Some(s)) => s.as_str(),
            other => {
                return Err(EncryptError::IndexingError(format!(
                    "match index requires a text plaintext, got {other:?}"
                )))
            }
        };

        let filtered = apply_filters(&self.opts.token_filters, text);
        let mut tokens = self.opts.tokenizer.tokenize(&filtered);

        if self.opts.include_original {
            tokens.push(filtered);
        }

        let mut positions = Vec::with_capacity(tokens.len() * self.opts.k);
        for token in &tokens {
            self.positions_for_token(token, &mut positions)?;
        }

        positions.sort_unstable();
        positions.dedup();

        Ok(IndexTerm::BitMap(positions))
    }

    fn positions_for_token(
        &self,
        token: &str,
        positions: &mut Vec<u16>,
    ) -> Result<(), EncryptError> {
        for i in 0..self.opts.k {
            let mut mac = HmacSha256::new_from_slice(self.index_key.as_bytes())
                .map_err(|e| EncryptError::IndexingError(e.to_string()))?;
            mac.update(&[i as u8]);
            mac.update(token.as_bytes());

            let digest = mac.finalize().into_bytes();
            let position = u16::from_be_bytes([digest[0], digest[1]]) % self.opts.m as u16;
            positions.push(position);
        }

        Ok(())
    }
}

/// Subset check used to evaluate a match query term against a stored term.
/// Both inputs must be sorted (which `MatchIndexer::index` guarantees).
pub fn is_subset(query: &[u16], stored: &[u16]) -> bool {
    query.iter().all(|position| stored.binary_search(position).is_ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{TokenFilter, Tokenizer};

    fn indexer() -> MatchIndexer {
        MatchIndexer::new(IndexKey::from_bytes([2; 32]), MatchOpts::default())
    }

    fn bitmap(term: IndexTerm) -> Vec<u16> {
        match term {
            IndexTerm::BitMap(positions) => positions,
            other => panic!("expected BitMap, got {other:?}"),
        }
    }

    #[test]
    fn substring_positions_are_subset() {
        let stored = bitmap(
            indexer()
                .index(&Plaintext::Utf8Str(Some("alice@x.com".into())))
                .unwrap(),
        );
        let query = bitmap(
            indexer()
                .index(&Plaintext::Utf8Str(Some("lice".into())))
                .unwrap(),
        );

        assert!(is_subset(&query, &stored));
    }

    #[test]
    fn unrelated_text_is_not_subset() {
        let stored = bitmap(
            indexer()
                .index(&Plaintext::Utf8Str(Some("alice@x.com".into())))
                .unwrap(),
        );
        let query = bitmap(
            indexer()
                .index(&Plaintext::Utf8Str(Some("zebra".into())))
                .unwrap(),
        );

        assert!(!is_subset(&query, &stored));
    }

    #[test]
    fn positions_stay_within_filter_size() {
        let opts = MatchOpts {
            tokenizer: Tokenizer::Standard,
            token_filters: vec![TokenFilter::Downcase],
            k: 3,
            m: 64,
            include_original: true,
        };
        let indexer = MatchIndexer::new(IndexKey::from_bytes([3; 32]), opts);

        let positions = bitmap(
            indexer
                .index(&Plaintext::Utf8Str(Some("The Quick Brown Fox".into())))
                .unwrap(),
        );

        assert!(positions.iter().all(|&p| p < 64));
    }

    #[test]
    fn non_text_plaintext_is_rejected() {
        let result = indexer().index(&Plaintext::BigInt(Some(5)));
        assert!(matches!(result, Err(EncryptError::IndexingError(_))));
    }
}
