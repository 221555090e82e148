use std::cmp::Ordering;

use hmac::{Hmac, Mac};
use sha2::Sha256;

use super::{IndexKey, IndexTerm, Plaintext};
use crate::errors::EncryptError;

type HmacSha256 = Hmac<Sha256>;

/// Cap on the number of string bytes fed into the order encoding. Order
/// comparisons beyond this prefix are not meaningful, matching the usual
/// behavior of prefix-bounded order indexes.
const MAX_STRING_ORDER_BYTES: usize = 16;

/// Per-position modulus of the order encoding. Must be at least twice the
/// alphabet size (256) so comparison is unambiguous.
const MODULUS: u16 = 512;

/// Produces the order token (`ob`) for a plaintext.
///
/// The construction is a CLWW-style left encoding over an order-preserving
/// byte rendering of the plaintext: for byte `i`, the token carries
/// `(pad(prefix) + byte) mod 512` where `pad` is an HMAC of the preceding
/// bytes. Two tokens built under the same index key compare like their
/// plaintexts; nothing else about the values is revealed beyond that order.
pub struct OreIndexer {
    index_key: IndexKey,
}

impl OreIndexer {
    pub fn new(index_key: IndexKey) -> Self {
        Self { index_key }
    }

    pub fn index(&self, plaintext: &Plaintext) -> Result<IndexTerm, EncryptError> {
        if plaintext.is_null() {
            return Ok(IndexTerm::Null);
        }

        let bytes = order_encode(plaintext)?;
        let mut out = Vec::with_capacity(bytes.len() * 2);

        for i in 0..bytes.len() {
            let pad = self.prefix_pad(&bytes[..i])?;
            let z = (pad + bytes[i] as u16) % MODULUS;
            out.extend_from_slice(&z.to_be_bytes());
        }

        Ok(IndexTerm::OreFull(out))
    }

    fn prefix_pad(&self, prefix: &[u8]) -> Result<u16, EncryptError> {
        let mut mac = HmacSha256::new_from_slice(self.index_key.as_bytes())
            .map_err(|e| EncryptError::IndexingError(e.to_string()))?;
        mac.update(prefix);

        let digest = mac.finalize().into_bytes();
        Ok(u16::from_be_bytes([digest[0], digest[1]]) % MODULUS)
    }
}

/// Compares two order tokens produced under the same index key.
pub fn compare(a: &[u8], b: &[u8]) -> Ordering {
    for (za, zb) in a.chunks_exact(2).zip(b.chunks_exact(2)) {
        let za = u16::from_be_bytes([za[0], za[1]]);
        let zb = u16::from_be_bytes([zb[0], zb[1]]);

        if za == zb {
            continue;
        }

        // Positions before the first difference are equal, so the pads
        // cancel: the difference mod 512 is the byte difference, which lies
        // in [1, 256) when a's byte is larger.
        let diff = (za + MODULUS - zb) % MODULUS;
        return if (1..256).contains(&diff) {
            Ordering::Greater
        } else {
            Ordering::Less
        };
    }

    a.len().cmp(&b.len())
}

/// Renders a plaintext as bytes whose lexicographic order matches the
/// plaintext order.
fn order_encode(plaintext: &Plaintext) -> Result<Vec<u8>, EncryptError> {
    match plaintext {
        Plaintext::BigInt(Some(i)) => {
            // Offset binary: flip the sign bit so negative values sort first.
            Ok(((*i as u64) ^ (1 << 63)).to_be_bytes().to_vec())
        }
        Plaintext::Float(Some(f)) => {
            // IEEE-754 total order: flip all bits of negatives, the sign bit
            // of positives.
            let bits = f.to_bits();
            let ordered = if bits >> 63 == 1 { !bits } else { bits | (1 << 63) };
            Ok(ordered.to_be_bytes().to_vec())
        }
        Plaintext::Boolean(Some(b)) => Ok(vec![*b as u8]),
        Plaintext::NaiveDate(Some(_)) => {
            let days = match plaintext.index_bytes().as_slice() {
                [a, b, c, d] => i32::from_be_bytes([*a, *b, *c, *d]),
                _ => unreachable!("date index bytes are 4 bytes"),
            };
            Ok(((days as u32) ^ (1 << 31)).to_be_bytes().to_vec())
        }
        Plaintext::Utf8Str(Some(s)) => {
            let mut bytes = s.as_bytes().to_vec();
            bytes.truncate(MAX_STRING_ORDER_BYTES);
            Ok(bytes)
        }
        other => Err(EncryptError::IndexingError(format!(
            "order index is not supported for {other:?}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn indexer() -> OreIndexer {
        OreIndexer::new(IndexKey::from_bytes([4; 32]))
    }

    fn token(plaintext: impl Into<Plaintext>) -> Vec<u8> {
        match indexer().index(&plaintext.into()).unwrap() {
            IndexTerm::OreFull(bytes) => bytes,
            other => panic!("expected OreFull, got {other:?}"),
        }
    }

    #[test]
    fn integers_compare_like_plaintexts() {
        let cases: [(i64, i64); 5] = [(1, 2), (-5, 3), (-10, -2), (0, i64::MAX), (i64::MIN, 0)];

        for (a, b) in cases {
            assert_eq!(compare(&token(a), &token(b)), Ordering::Less, "{a} < {b}");
            assert_eq!(compare(&token(b), &token(a)), Ordering::Greater);
        }
    }

    #[test]
    fn equal_values_compare_equal() {
        assert_eq!(compare(&token(42i64), &token(42i64)), Ordering::Equal);
    }

    #[test]
    fn floats_compare_like_plaintexts() {
        assert_eq!(compare(&token(1.5f64), &token(2.25f64)), Ordering::Less);
        assert_eq!(compare(&token(-1.5f64), &token(1.5f64)), Ordering::Less);
        assert_eq!(compare(&token(-2.0f64), &token(-1.0f64)), Ordering::Less);
    }

    #[test]
    fn strings_compare_lexicographically() {
        assert_eq!(compare(&token("apple"), &token("banana")), Ordering::Less);
        assert_eq!(compare(&token("app"), &token("apple")), Ordering::Less);
        assert_eq!(compare(&token("same"), &token("same")), Ordering::Equal);
    }

    #[test]
    fn tokens_reveal_nothing_positionally() {
        // Same byte at the same position under different prefixes must not
        // produce the same encoded position.
        let a = token("aa");
        let b = token("ba");
        assert_ne!(a[2..4], b[2..4]);
    }
}
