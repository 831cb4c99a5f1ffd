//! Nonce challenge-response.
//!
//! A verifier proves possession of an association key: it is the AES-CBC
//! encryption of the nonce's base64 text, using the nonce bytes as IV.
//! Clients sign requests this way and the server answers in kind with a
//! fresh nonce, which then becomes the session IV for response fields.

use kphttp_crypto::{
    AssociationKey, CipherEngine, CryptoError, FieldCodec, IV_SIZE, constant_time_eq,
    decode_base64, encode_base64,
};
use tracing::debug;

use crate::protocol::{Request, Response};

/// A freshly generated nonce together with its verifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Challenge {
    pub iv: [u8; IV_SIZE],
    /// Base64 of `iv`.
    pub nonce: String,
    /// Base64 encryption of `nonce` under the key and `iv`.
    pub verifier: String,
}

pub struct Verifier<'a> {
    engine: &'a dyn CipherEngine,
}

impl<'a> Verifier<'a> {
    pub const fn new(engine: &'a dyn CipherEngine) -> Self {
        Self { engine }
    }

    /// Check the request's verifier against `key`.
    ///
    /// A missing key, missing fields, malformed base64, bad padding and a
    /// plain mismatch all yield `false`.
    pub fn authenticate(&self, request: &Request, key: Option<&AssociationKey>) -> bool {
        let (Some(key), Some(nonce), Some(verifier)) =
            (key, request.nonce.as_deref(), request.verifier.as_deref())
        else {
            debug!(id = request.id(), "verifier inputs missing");
            return false;
        };

        match self.check(nonce, verifier, key) {
            Ok(valid) => valid,
            Err(e) => {
                debug!(id = request.id(), error = %e, "verifier could not be decrypted");
                false
            }
        }
    }

    fn check(&self, nonce: &str, verifier: &str, key: &AssociationKey) -> Result<bool, CryptoError> {
        let iv = decode_base64(nonce)?;
        let crypted = decode_base64(verifier)?;
        let plain = self.engine.decrypt(&crypted, key.as_bytes(), &iv)?;
        Ok(constant_time_eq(&plain, nonce.as_bytes()))
    }

    /// Generate a new nonce and its verifier under `key`.
    pub fn challenge(&self, key: &AssociationKey) -> Result<Challenge, CryptoError> {
        let bytes = self.engine.random_bytes(IV_SIZE);
        let iv: [u8; IV_SIZE] = bytes
            .as_slice()
            .try_into()
            .map_err(|_| CryptoError::InvalidIvLength {
                expected: IV_SIZE,
                actual: bytes.len(),
            })?;
        let nonce = encode_base64(&iv);
        let verifier = FieldCodec::new(self.engine, key, &iv)?.encrypt(&nonce)?;
        Ok(Challenge {
            iv,
            nonce,
            verifier,
        })
    }

    /// Attach a fresh nonce and verifier to `response`.
    ///
    /// Returns the new session IV, which must be used for every encrypted
    /// field of the same response.
    pub fn sign(
        &self,
        response: &mut Response,
        key: &AssociationKey,
    ) -> Result<[u8; IV_SIZE], CryptoError> {
        let challenge = self.challenge(key)?;
        response.nonce = challenge.nonce;
        response.verifier = challenge.verifier;
        Ok(challenge.iv)
    }

    /// Client-side check of a signed response.
    pub fn verify_response(&self, response: &Response, key: &AssociationKey) -> bool {
        self.check(&response.nonce, &response.verifier, key)
            .unwrap_or(false)
    }
}
