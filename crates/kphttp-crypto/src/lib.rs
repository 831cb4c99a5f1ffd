//! KeePassHTTP Crypto Library
//!
//! Cryptographic primitives shared by the protocol engine and its hosts.
//!
//! ## Crypto primitives
//!
//! - **Cipher**: AES-CBC with PKCS#7 padding, 16-byte IV carried as the exchange nonce
//! - **Key sizes**: 128, 192 or 256 bits accepted; generated keys are 256-bit
//! - **Keys**: per-association shared keys, base64 on the wire
//! - **Fields**: base64 ciphertext fields encrypted under the session IV
//! - **Hash**: SHA-256, hex encoded, for the database fingerprint

pub mod cipher;
pub mod codec;
pub mod error;

pub use cipher::{
    AesCbcEngine, AssociationKey, CipherEngine, IV_SIZE, KEY_SIZE, KEY_SIZES, constant_time_eq,
    decode_base64, encode_base64, sha256_hex,
};
pub use codec::{Direction, Encoding, FieldCodec, transform};
pub use error::CryptoError;
