//! Authenticated Encryption with Associated Data
//!
//! Uses AES-256-GCM (96-bit nonce).
//! Key size: 32 bytes.  Nonce: 12 bytes (random, per call).  Tag: 16 bytes.
//!
//! An [`Envelope`] carries the nonce and the ciphertext+tag separately so the
//! store can persist them as two columns. Both are base64 encoded at rest.

use aes_gcm::{
    aead::{consts::U12, Aead, AeadCore, KeyInit, OsRng, Payload},
    Aes256Gcm, Nonce,
};
use base64::{engine::general_purpose, Engine as _};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use zeroize::Zeroizing;

use crate::error::CryptoError;
use crate::key::EncryptionKey;

pub const NONCE_LEN: usize = 12;
pub const TAG_LEN: usize = 16;

/// Output of one encryption: nonce + ciphertext (tag appended).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "EncodedEnvelope", into = "EncodedEnvelope")]
pub struct Envelope {
    iv: [u8; NONCE_LEN],
    ciphertext: Vec<u8>,
}

/// Wire form: `{ "iv": "<b64>", "ciphertext": "<b64>" }`.
#[derive(Serialize, Deserialize)]
struct EncodedEnvelope {
    iv: String,
    ciphertext: String,
}

impl Envelope {
    /// Rebuild an envelope from its base64 columns. A malformed envelope is a
    /// decryption failure for the caller, never a panic.
    pub fn from_encoded(iv: &str, ciphertext: &str) -> Result<Self, CryptoError> {
        let iv_bytes = general_purpose::STANDARD
            .decode(iv)
            .map_err(|_| CryptoError::Decryption)?;
        let iv: [u8; NONCE_LEN] = iv_bytes
            .as_slice()
            .try_into()
            .map_err(|_| CryptoError::Decryption)?;
        let ciphertext = general_purpose::STANDARD
            .decode(ciphertext)
            .map_err(|_| CryptoError::Decryption)?;
        if ciphertext.len() < TAG_LEN {
            return Err(CryptoError::Decryption);
        }
        Ok(Self { iv, ciphertext })
    }

    pub fn iv(&self) -> &[u8; NONCE_LEN] {
        &self.iv
    }

    pub fn ciphertext(&self) -> &[u8] {
        &self.ciphertext
    }

    pub fn encoded_iv(&self) -> String {
        general_purpose::STANDARD.encode(self.iv)
    }

    pub fn encoded_ciphertext(&self) -> String {
        general_purpose::STANDARD.encode(&self.ciphertext)
    }
}

impl TryFrom<EncodedEnvelope> for Envelope {
    type Error = CryptoError;

    fn try_from(value: EncodedEnvelope) -> Result<Self, Self::Error> {
        Envelope::from_encoded(&value.iv, &value.ciphertext)
    }
}

impl From<Envelope> for EncodedEnvelope {
    fn from(value: Envelope) -> Self {
        Self {
            iv: value.encoded_iv(),
            ciphertext: value.encoded_ciphertext(),
        }
    }
}

/// Serialize `value` to JSON and seal it under `key`.
/// `aad` is authenticated but not encrypted; the same bytes must be supplied
/// to [`decrypt`].
pub fn encrypt<T: Serialize + ?Sized>(
    key: &EncryptionKey,
    value: &T,
    aad: &[u8],
) -> Result<Envelope, CryptoError> {
    let plaintext = Zeroizing::new(serde_json::to_vec(value)?);
    let cipher = Aes256Gcm::new_from_slice(key.as_bytes()).map_err(|_| CryptoError::Encryption)?;

    let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
    let ciphertext = cipher
        .encrypt(&nonce, Payload { msg: plaintext.as_slice(), aad })
        .map_err(|_| CryptoError::Encryption)?;

    let mut iv = [0u8; NONCE_LEN];
    iv.copy_from_slice(&nonce);
    Ok(Envelope { iv, ciphertext })
}

/// Open an envelope and parse the plaintext JSON as `T`.
pub fn decrypt<T: DeserializeOwned>(
    key: &EncryptionKey,
    envelope: &Envelope,
    aad: &[u8],
) -> Result<T, CryptoError> {
    let cipher = Aes256Gcm::new_from_slice(key.as_bytes()).map_err(|_| CryptoError::Decryption)?;
    let nonce = Nonce::<U12>::from_slice(&envelope.iv);

    let plaintext = Zeroizing::new(
        cipher
            .decrypt(
                nonce,
                Payload {
                    msg: envelope.ciphertext.as_slice(),
                    aad,
                },
            )
            .map_err(|_| CryptoError::Decryption)?,
    );

    // Authenticated bytes that are not valid JSON mean the writer was not us.
    serde_json::from_slice(&plaintext).map_err(|_| CryptoError::Decryption)
}
