use aes_gcm_siv::{
    aead::{Aead, KeyInit, Payload},
    Aes256GcmSiv, Nonce,
};

use super::b64::{b64_decode, b64_encode};
use super::Plaintext;
use crate::errors::{DecryptError, EncryptError};
use crate::zerokms::DataKey;

/// Length of the key-identifying IV prefixed to every ciphertext.
pub const IV_LEN: usize = 16;

/// Seals a plaintext under a single-use data key.
///
/// The ciphertext layout is `iv || aead(..)`, base64-encoded. The IV is the
/// key service's identifier for the data key, carried so decryption can ask
/// for the same key again. Data keys are never reused, so the AEAD nonce is
/// fixed.
pub fn seal(plaintext: &Plaintext, key: &DataKey) -> Result<String, EncryptError> {
    seal_with_aad(plaintext, key, &[])
}

/// Seals with additional authenticated data (used to bind ste-vec leaf
/// entries to their selector).
pub fn seal_with_aad(
    plaintext: &Plaintext,
    key: &DataKey,
    aad: &[u8],
) -> Result<String, EncryptError> {
    let cipher = Aes256GcmSiv::new_from_slice(key.key_bytes())
        .map_err(|_| EncryptError::CipherError)?;

    let sealed = cipher
        .encrypt(
            &Nonce::default(),
            Payload {
                msg: &plaintext.to_bytes(),
                aad,
            },
        )
        .map_err(|_| EncryptError::CipherError)?;

    let mut out = Vec::with_capacity(IV_LEN + sealed.len());
    out.extend_from_slice(key.iv());
    out.extend_from_slice(&sealed);

    Ok(b64_encode(out))
}

/// Opens a ciphertext produced by [`seal`].
pub fn open(ciphertext: &str, key: &DataKey) -> Result<Plaintext, DecryptError> {
    open_with_aad(ciphertext, key, &[])
}

pub fn open_with_aad(
    ciphertext: &str,
    key: &DataKey,
    aad: &[u8],
) -> Result<Plaintext, DecryptError> {
    let bytes = b64_decode(ciphertext)
        .map_err(|e| DecryptError::InvalidCiphertext(e.to_string()))?;

    if bytes.len() <= IV_LEN {
        return Err(DecryptError::InvalidCiphertext(
            "ciphertext too short".to_string(),
        ));
    }

    let cipher = Aes256GcmSiv::new_from_slice(key.key_bytes())
        .map_err(|_| DecryptError::CipherError)?;

    let opened = cipher
        .decrypt(
            &Nonce::default(),
            Payload {
                msg: &bytes[IV_LEN..],
                aad,
            },
        )
        .map_err(|_| DecryptError::CipherError)?;

    Ok(Plaintext::from_bytes(&opened)?)
}

/// Extracts the key-identifying IV without opening the ciphertext.
pub fn iv_of(ciphertext: &str) -> Result<[u8; IV_LEN], DecryptError> {
    let bytes = b64_decode(ciphertext)
        .map_err(|e| DecryptError::InvalidCiphertext(e.to_string()))?;

    bytes
        .get(..IV_LEN)
        .and_then(|iv| iv.try_into().ok())
        .ok_or_else(|| DecryptError::InvalidCiphertext("ciphertext too short".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(iv_byte: u8, key_byte: u8) -> DataKey {
        DataKey::new([iv_byte; IV_LEN], [key_byte; 32])
    }

    #[test]
    fn seal_open_round_trip() {
        let key = key(7, 9);
        let plaintext = Plaintext::Utf8Str(Some("alice@x.com".into()));

        let sealed = seal(&plaintext, &key).unwrap();
        let opened = open(&sealed, &key).unwrap();

        assert_eq!(opened, plaintext);
    }

    #[test]
    fn iv_is_recoverable_without_the_key() {
        let key = key(7, 9);
        let sealed = seal(&Plaintext::BigInt(Some(1)), &key).unwrap();

        assert_eq!(iv_of(&sealed).unwrap(), [7; IV_LEN]);
    }

    #[test]
    fn wrong_key_fails_closed() {
        let sealed = seal(&Plaintext::Utf8Str(Some("secret".into())), &key(7, 9)).unwrap();
        let result = open(&sealed, &key(7, 10));

        assert!(matches!(result, Err(DecryptError::CipherError)));
    }

    #[test]
    fn aad_mismatch_fails_closed() {
        let key = key(1, 2);
        let sealed =
            seal_with_aad(&Plaintext::Utf8Str(Some("leaf".into())), &key, b"docs/meta/a").unwrap();

        assert!(open_with_aad(&sealed, &key, b"docs/meta/b").is_err());
        assert!(open_with_aad(&sealed, &key, b"docs/meta/a").is_ok());
    }
}
