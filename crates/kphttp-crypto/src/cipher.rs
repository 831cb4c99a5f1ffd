//! AES-CBC cipher engine.
//!
//! KeePassHTTP clients share an AES key with the credential manager and
//! exchange PKCS#7-padded CBC ciphertexts. Keys are generated as 256-bit;
//! 128- and 192-bit keys offered by clients are accepted too. The IV for
//! each exchange is carried in the clear as the request or response nonce.

use aes::{Aes128, Aes192, Aes256};
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use cbc::cipher::block_padding::Pkcs7;
use cbc::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use cbc::{Decryptor, Encryptor};
use rand::RngCore;
use rand::rngs::OsRng;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::CryptoError;

/// Size in bytes of generated keys (AES-256).
pub const KEY_SIZE: usize = 32;

/// Accepted AES key sizes in bytes.
pub const KEY_SIZES: [usize; 3] = [16, 24, 32];

/// AES block size, which is also the CBC IV size.
pub const IV_SIZE: usize = 16;

/// Block cipher, hashing and randomness used by the protocol engine.
///
/// Implementations must be deterministic for identical inputs (apart from
/// [`CipherEngine::random_bytes`]).
pub trait CipherEngine: Send + Sync {
    /// Encrypt `plaintext` with PKCS#7 padding.
    fn encrypt(&self, plaintext: &[u8], key: &[u8], iv: &[u8]) -> Result<Vec<u8>, CryptoError>;

    /// Decrypt `ciphertext` and strip PKCS#7 padding.
    fn decrypt(&self, ciphertext: &[u8], key: &[u8], iv: &[u8]) -> Result<Vec<u8>, CryptoError>;

    /// Fill a fresh buffer of `len` bytes from a secure random source.
    fn random_bytes(&self, len: usize) -> Vec<u8>;

    /// SHA-256 digest of the UTF-8 bytes of `data`.
    fn sha256(&self, data: &str) -> [u8; 32];
}

/// Default [`CipherEngine`] backed by the `aes`/`cbc` crates and the OS RNG.
#[derive(Debug, Default, Clone, Copy)]
pub struct AesCbcEngine;

impl AesCbcEngine {
    pub const fn new() -> Self {
        Self
    }
}

fn check_lengths(key: &[u8], iv: &[u8]) -> Result<(), CryptoError> {
    if !KEY_SIZES.contains(&key.len()) {
        return Err(CryptoError::InvalidKeyLength { actual: key.len() });
    }
    if iv.len() != IV_SIZE {
        return Err(CryptoError::InvalidIvLength {
            expected: IV_SIZE,
            actual: iv.len(),
        });
    }
    Ok(())
}

fn cbc_encrypt<E: KeyIvInit + BlockEncryptMut>(
    plaintext: &[u8],
    key: &[u8],
    iv: &[u8],
) -> Result<Vec<u8>, CryptoError> {
    let cipher =
        E::new_from_slices(key, iv).map_err(|e| CryptoError::EncryptionFailed(e.to_string()))?;
    Ok(cipher.encrypt_padded_vec_mut::<Pkcs7>(plaintext))
}

fn cbc_decrypt<D: KeyIvInit + BlockDecryptMut>(
    ciphertext: &[u8],
    key: &[u8],
    iv: &[u8],
) -> Result<Vec<u8>, CryptoError> {
    let cipher =
        D::new_from_slices(key, iv).map_err(|e| CryptoError::DecryptionFailed(e.to_string()))?;
    cipher
        .decrypt_padded_vec_mut::<Pkcs7>(ciphertext)
        .map_err(|_| CryptoError::DecryptionFailed("bad block length or padding".into()))
}

impl CipherEngine for AesCbcEngine {
    fn encrypt(&self, plaintext: &[u8], key: &[u8], iv: &[u8]) -> Result<Vec<u8>, CryptoError> {
        check_lengths(key, iv)?;
        match key.len() {
            16 => cbc_encrypt::<Encryptor<Aes128>>(plaintext, key, iv),
            24 => cbc_encrypt::<Encryptor<Aes192>>(plaintext, key, iv),
            _ => cbc_encrypt::<Encryptor<Aes256>>(plaintext, key, iv),
        }
    }

    fn decrypt(&self, ciphertext: &[u8], key: &[u8], iv: &[u8]) -> Result<Vec<u8>, CryptoError> {
        check_lengths(key, iv)?;
        match key.len() {
            16 => cbc_decrypt::<Decryptor<Aes128>>(ciphertext, key, iv),
            24 => cbc_decrypt::<Decryptor<Aes192>>(ciphertext, key, iv),
            _ => cbc_decrypt::<Decryptor<Aes256>>(ciphertext, key, iv),
        }
    }

    fn random_bytes(&self, len: usize) -> Vec<u8> {
        let mut buf = vec![0u8; len];
        OsRng.fill_bytes(&mut buf);
        buf
    }

    fn sha256(&self, data: &str) -> [u8; 32] {
        Sha256::digest(data.as_bytes()).into()
    }
}

/// Standard (padded) base64 encoding, as used on the wire.
pub fn encode_base64(bytes: &[u8]) -> String {
    STANDARD.encode(bytes)
}

/// Decode standard (padded) base64.
pub fn decode_base64(text: &str) -> Result<Vec<u8>, CryptoError> {
    Ok(STANDARD.decode(text)?)
}

/// Shared symmetric key of one client association.
///
/// Key bytes are wiped on drop and never printed.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct AssociationKey(Vec<u8>);

impl std::fmt::Debug for AssociationKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("AssociationKey").field(&"[REDACTED]").finish()
    }
}

impl PartialEq for AssociationKey {
    fn eq(&self, other: &Self) -> bool {
        self.0.ct_eq(&other.0).into()
    }
}

impl Eq for AssociationKey {}

impl AssociationKey {
    /// Wrap raw key bytes. Length is checked when the key is first used.
    pub const fn from_bytes(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    /// Decode a key from its base64 wire form.
    pub fn from_base64(text: &str) -> Result<Self, CryptoError> {
        decode_base64(text).map(Self)
    }

    /// Generate a random AES-256 key.
    pub fn generate(engine: &dyn CipherEngine) -> Self {
        Self(engine.random_bytes(KEY_SIZE))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Base64 wire form of the key.
    pub fn to_base64(&self) -> String {
        encode_base64(&self.0)
    }
}

/// Lowercase hex SHA-256 of `data`.
pub fn sha256_hex(engine: &dyn CipherEngine, data: &str) -> String {
    hex::encode(engine.sha256(data))
}

/// Compare two byte strings in constant time.
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    a.ct_eq(b).into()
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    const KEY: [u8; KEY_SIZE] = [7u8; KEY_SIZE];
    const IV: [u8; IV_SIZE] = [3u8; IV_SIZE];

    #[test]
    fn encrypt_decrypt_roundtrip() {
        let engine = AesCbcEngine::new();
        let ct = engine.encrypt(b"https://example.com", &KEY, &IV).unwrap();
        assert_eq!(ct.len() % IV_SIZE, 0);
        let pt = engine.decrypt(&ct, &KEY, &IV).unwrap();
        assert_eq!(pt, b"https://example.com");
    }

    #[test]
    fn empty_plaintext_gets_a_full_padding_block() {
        let engine = AesCbcEngine::new();
        let ct = engine.encrypt(b"", &KEY, &IV).unwrap();
        assert_eq!(ct.len(), IV_SIZE);
        assert!(engine.decrypt(&ct, &KEY, &IV).unwrap().is_empty());
    }

    #[test]
    fn encryption_is_deterministic_for_same_inputs() {
        let engine = AesCbcEngine::new();
        let a = engine.encrypt(b"nonce", &KEY, &IV).unwrap();
        let b = engine.encrypt(b"nonce", &KEY, &IV).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn known_answer_nist_cbc_aes256() {
        // NIST SP 800-38A F.2.5, first block; PKCS#7 adds one padding block.
        let key = hex::decode("603deb1015ca71be2b73aef0857d77811f352c073b6108d72d9810a30914dff4")
            .unwrap();
        let iv = hex::decode("000102030405060708090a0b0c0d0e0f").unwrap();
        let pt = hex::decode("6bc1bee22e409f96e93d7e117393172a").unwrap();
        let ct = AesCbcEngine::new().encrypt(&pt, &key, &iv).unwrap();
        assert_eq!(hex::encode(&ct[..16]), "f58c4c04d6e5f1ba779eabfb5f7bfbd6");
    }

    #[test]
    fn decrypt_with_wrong_key_fails_or_differs() {
        let engine = AesCbcEngine::new();
        let ct = engine.encrypt(b"secret data", &KEY, &IV).unwrap();
        let wrong = [9u8; KEY_SIZE];
        match engine.decrypt(&ct, &wrong, &IV) {
            Ok(pt) => assert_ne!(pt, b"secret data"),
            Err(e) => assert!(matches!(e, CryptoError::DecryptionFailed(_))),
        }
    }

    #[test]
    fn decrypt_rejects_partial_block() {
        let engine = AesCbcEngine::new();
        let result = engine.decrypt(&[1, 2, 3], &KEY, &IV);
        assert!(matches!(result, Err(CryptoError::DecryptionFailed(_))));
    }

    #[test]
    fn decrypt_rejects_empty_ciphertext() {
        let engine = AesCbcEngine::new();
        assert!(engine.decrypt(&[], &KEY, &IV).is_err());
    }

    #[test]
    fn known_answer_nist_cbc_aes128() {
        // NIST SP 800-38A F.2.1, first block.
        let key = hex::decode("2b7e151628aed2a6abf7158809cf4f3c").unwrap();
        let iv = hex::decode("000102030405060708090a0b0c0d0e0f").unwrap();
        let pt = hex::decode("6bc1bee22e409f96e93d7e117393172a").unwrap();
        let engine = AesCbcEngine::new();
        let ct = engine.encrypt(&pt, &key, &iv).unwrap();
        assert_eq!(hex::encode(&ct[..16]), "7649abac8119b246cee98e9b12e9197d");
        assert_eq!(engine.decrypt(&ct, &key, &iv).unwrap(), pt);
    }

    #[test]
    fn known_answer_nist_cbc_aes192() {
        // NIST SP 800-38A F.2.3, first block.
        let key = hex::decode("8e73b0f7da0e6452c810f32b809079e562f8ead2522c6b7b").unwrap();
        let iv = hex::decode("000102030405060708090a0b0c0d0e0f").unwrap();
        let pt = hex::decode("6bc1bee22e409f96e93d7e117393172a").unwrap();
        let engine = AesCbcEngine::new();
        let ct = engine.encrypt(&pt, &key, &iv).unwrap();
        assert_eq!(hex::encode(&ct[..16]), "4f021db243bc633d7178183a9fa071e8");
        assert_eq!(engine.decrypt(&ct, &key, &iv).unwrap(), pt);
    }

    #[test]
    fn rejects_unsupported_key_length() {
        let engine = AesCbcEngine::new();
        for len in [0, 15, 20, 31, 33, 64] {
            let result = engine.encrypt(b"x", &vec![0u8; len], &IV);
            assert!(
                matches!(result, Err(CryptoError::InvalidKeyLength { actual }) if actual == len),
                "{len}-byte key accepted"
            );
        }
    }

    #[test]
    fn rejects_wrong_iv_length() {
        let engine = AesCbcEngine::new();
        let result = engine.decrypt(&[0u8; 16], &KEY, &[0u8; 12]);
        assert!(matches!(
            result,
            Err(CryptoError::InvalidIvLength {
                expected: IV_SIZE,
                actual: 12
            })
        ));
    }

    #[test]
    fn random_bytes_are_fresh() {
        let engine = AesCbcEngine::new();
        let a = engine.random_bytes(IV_SIZE);
        let b = engine.random_bytes(IV_SIZE);
        assert_eq!(a.len(), IV_SIZE);
        assert_ne!(a, b);
    }

    #[test]
    fn sha256_hex_of_empty_string() {
        let engine = AesCbcEngine::new();
        assert_eq!(
            sha256_hex(&engine, ""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn association_key_debug_is_redacted() {
        let key = AssociationKey::from_bytes(KEY.to_vec());
        let debug = format!("{key:?}");
        assert!(debug.contains("REDACTED"));
        assert!(!debug.contains('7'));
    }

    #[test]
    fn association_key_base64_roundtrip() {
        let key = AssociationKey::generate(&AesCbcEngine::new());
        let restored = AssociationKey::from_base64(&key.to_base64()).unwrap();
        assert_eq!(key, restored);
        assert_eq!(restored.as_bytes().len(), KEY_SIZE);
    }

    #[test]
    fn association_key_rejects_bad_base64() {
        assert!(matches!(
            AssociationKey::from_base64("not base64!!"),
            Err(CryptoError::InvalidBase64(_))
        ));
    }

    #[test]
    fn constant_time_eq_matches_slices() {
        assert!(constant_time_eq(b"abc", b"abc"));
        assert!(!constant_time_eq(b"abc", b"abd"));
        assert!(!constant_time_eq(b"abc", b"ab"));
    }
}
