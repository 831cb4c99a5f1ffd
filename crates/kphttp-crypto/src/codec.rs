//! Protocol field codec.
//!
//! Encrypted request and response fields travel as base64 ciphertext. Every
//! field of one exchange is encrypted under the same key and the session IV,
//! i.e. the IV established by the most recent verifier step.

use crate::cipher::{AssociationKey, CipherEngine, IV_SIZE, decode_base64, encode_base64};
use crate::error::CryptoError;

/// Representation of a field value on one side of a transform.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Encoding {
    /// UTF-8 text.
    Raw,
    /// Standard base64 of the underlying bytes.
    Base64,
}

/// Cipher direction of a transform.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Encrypt,
    Decrypt,
}

/// Transform one field value.
///
/// `None` passes through untouched and the cipher is not invoked.
pub fn transform(
    engine: &dyn CipherEngine,
    value: Option<&str>,
    input: Encoding,
    output: Encoding,
    key: &AssociationKey,
    iv: &[u8],
    direction: Direction,
) -> Result<Option<String>, CryptoError> {
    let Some(value) = value else {
        return Ok(None);
    };

    let bytes = match input {
        Encoding::Raw => value.as_bytes().to_vec(),
        Encoding::Base64 => decode_base64(value)?,
    };

    let transformed = match direction {
        Direction::Encrypt => engine.encrypt(&bytes, key.as_bytes(), iv)?,
        Direction::Decrypt => engine.decrypt(&bytes, key.as_bytes(), iv)?,
    };

    let out = match output {
        Encoding::Raw => String::from_utf8(transformed)?,
        Encoding::Base64 => encode_base64(&transformed),
    };
    Ok(Some(out))
}

/// A key and session IV bound together for the fields of one exchange.
pub struct FieldCodec<'a> {
    engine: &'a dyn CipherEngine,
    key: &'a AssociationKey,
    iv: [u8; IV_SIZE],
}

impl<'a> FieldCodec<'a> {
    /// Bind `key` and `iv`. The IV must be exactly one AES block.
    pub fn new(
        engine: &'a dyn CipherEngine,
        key: &'a AssociationKey,
        iv: &[u8],
    ) -> Result<Self, CryptoError> {
        let iv: [u8; IV_SIZE] = iv.try_into().map_err(|_| CryptoError::InvalidIvLength {
            expected: IV_SIZE,
            actual: iv.len(),
        })?;
        Ok(Self { engine, key, iv })
    }

    /// Bind `key` to an IV given in its base64 nonce form.
    pub fn from_nonce(
        engine: &'a dyn CipherEngine,
        key: &'a AssociationKey,
        nonce: &str,
    ) -> Result<Self, CryptoError> {
        let iv = decode_base64(nonce)?;
        Self::new(engine, key, &iv)
    }

    pub const fn iv(&self) -> &[u8; IV_SIZE] {
        &self.iv
    }

    /// Plaintext field → base64 ciphertext.
    pub fn encrypt(&self, value: &str) -> Result<String, CryptoError> {
        self.encrypt_opt(Some(value)).map(Option::unwrap_or_default)
    }

    /// Optional plaintext field → optional base64 ciphertext.
    pub fn encrypt_opt(&self, value: Option<&str>) -> Result<Option<String>, CryptoError> {
        transform(
            self.engine,
            value,
            Encoding::Raw,
            Encoding::Base64,
            self.key,
            &self.iv,
            Direction::Encrypt,
        )
    }

    /// Base64 ciphertext field → plaintext.
    pub fn decrypt(&self, value: &str) -> Result<String, CryptoError> {
        self.decrypt_opt(Some(value)).map(Option::unwrap_or_default)
    }

    /// Optional base64 ciphertext field → optional plaintext.
    pub fn decrypt_opt(&self, value: Option<&str>) -> Result<Option<String>, CryptoError> {
        transform(
            self.engine,
            value,
            Encoding::Base64,
            Encoding::Raw,
            self.key,
            &self.iv,
            Direction::Decrypt,
        )
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::cipher::AesCbcEngine;

    /// Counts cipher invocations so pass-through behaviour can be checked.
    #[derive(Default)]
    struct CountingEngine {
        inner: AesCbcEngine,
        calls: AtomicUsize,
    }

    impl CipherEngine for CountingEngine {
        fn encrypt(&self, p: &[u8], k: &[u8], iv: &[u8]) -> Result<Vec<u8>, CryptoError> {
            self.calls.fetch_add(1, Ordering::Relaxed);
            self.inner.encrypt(p, k, iv)
        }
        fn decrypt(&self, c: &[u8], k: &[u8], iv: &[u8]) -> Result<Vec<u8>, CryptoError> {
            self.calls.fetch_add(1, Ordering::Relaxed);
            self.inner.decrypt(c, k, iv)
        }
        fn random_bytes(&self, len: usize) -> Vec<u8> {
            self.inner.random_bytes(len)
        }
        fn sha256(&self, data: &str) -> [u8; 32] {
            self.inner.sha256(data)
        }
    }

    fn key() -> AssociationKey {
        AssociationKey::from_bytes(vec![0x42; 32])
    }

    #[test]
    fn none_passes_through_without_cipher_call() {
        let engine = CountingEngine::default();
        let key = key();
        let codec = FieldCodec::new(&engine, &key, &[0u8; IV_SIZE]).unwrap();
        assert_eq!(codec.encrypt_opt(None).unwrap(), None);
        assert_eq!(codec.decrypt_opt(None).unwrap(), None);
        assert_eq!(engine.calls.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn field_roundtrip_through_base64() {
        let engine = AesCbcEngine::new();
        let key = key();
        let codec = FieldCodec::new(&engine, &key, &[5u8; IV_SIZE]).unwrap();
        let wire = codec.encrypt("alice@example.com").unwrap();
        assert!(decode_base64(&wire).is_ok());
        assert_eq!(codec.decrypt(&wire).unwrap(), "alice@example.com");
    }

    #[test]
    fn all_fields_share_the_session_iv() {
        let engine = AesCbcEngine::new();
        let key = key();
        let codec = FieldCodec::new(&engine, &key, &[5u8; IV_SIZE]).unwrap();
        let a = codec.encrypt("same").unwrap();
        let b = codec.encrypt("same").unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn decrypt_rejects_non_utf8_plaintext() {
        let engine = AesCbcEngine::new();
        let key = key();
        let iv = [1u8; IV_SIZE];
        let ct = engine.encrypt(&[0xff, 0xfe], key.as_bytes(), &iv).unwrap();
        let codec = FieldCodec::new(&engine, &key, &iv).unwrap();
        assert!(matches!(
            codec.decrypt(&encode_base64(&ct)),
            Err(CryptoError::InvalidUtf8(_))
        ));
    }

    #[test]
    fn decrypt_rejects_bad_base64() {
        let engine = AesCbcEngine::new();
        let key = key();
        let codec = FieldCodec::new(&engine, &key, &[0u8; IV_SIZE]).unwrap();
        assert!(matches!(
            codec.decrypt("%%%"),
            Err(CryptoError::InvalidBase64(_))
        ));
    }

    #[test]
    fn from_nonce_decodes_iv() {
        let engine = AesCbcEngine::new();
        let key = key();
        let nonce = encode_base64(&[9u8; IV_SIZE]);
        let codec = FieldCodec::from_nonce(&engine, &key, &nonce).unwrap();
        assert_eq!(codec.iv(), &[9u8; IV_SIZE]);
    }

    #[test]
    fn new_rejects_short_iv() {
        let engine = AesCbcEngine::new();
        let key = key();
        let result = FieldCodec::new(&engine, &key, &[0u8; 8]);
        assert!(matches!(
            result,
            Err(CryptoError::InvalidIvLength {
                expected: IV_SIZE,
                actual: 8
            })
        ));
    }
}
