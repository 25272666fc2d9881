//! dv_crypto: DataVault cryptographic primitives
//!
//! # Design principles
//! - NO custom crypto; AES-256-GCM comes from the RustCrypto `aes-gcm` crate.
//! - Key material is zeroized on drop and never printed.
//! - A fresh random nonce is drawn for every encryption. Nonces are stored
//!   next to the ciphertext; they are not secret.
//!
//! # Module layout
//! - `key`    : 256-bit vault key: generate / export / import
//! - `aead`   : envelope encrypt/decrypt of JSON-serializable values
//! - `error`  : unified error type

pub mod aead;
pub mod error;
pub mod key;

pub use aead::{decrypt, encrypt, Envelope};
pub use error::CryptoError;
pub use key::EncryptionKey;
