//! AES-256-CBC at-rest encryption for stored mailbox credentials
//!
//! Ciphertext is encoded as `<ivHex>:<cipherHex>` with a 16-byte random IV
//! prepended in hex, matching the scheme the relational store already uses
//! (spec §6). Decryption failures on a single field are not fatal to the
//! caller — see `credentials.rs`, which treats them as an absent field.

use aes::Aes256;
use cbc::cipher::block_padding::Pkcs7;
use cbc::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use rand::RngCore;
use secrecy::{ExposeSecret, SecretString};
use thiserror::Error;

type Encryptor = cbc::Encryptor<Aes256>;
type Decryptor = cbc::Decryptor<Aes256>;

const IV_LEN: usize = 16;
const KEY_LEN: usize = 32;

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("ciphertext is not in <ivHex>:<cipherHex> format")]
    BadFormat,
    #[error("invalid hex encoding: {0}")]
    Hex(#[from] hex::FromHexError),
    #[error("IV must be {IV_LEN} bytes, got {0}")]
    BadIvLength(usize),
    #[error("decryption failed (bad key, corrupt ciphertext, or padding)")]
    Decrypt,
}

/// A resolved 32-byte AES-256 key.
pub struct EncryptionKey([u8; KEY_LEN]);

impl EncryptionKey {
    pub fn from_hex(key_hex: &SecretString) -> Result<Self, CryptoError> {
        let bytes = hex::decode(key_hex.expose_secret())?;
        let array: [u8; KEY_LEN] = bytes
            .try_into()
            .map_err(|v: Vec<u8>| CryptoError::BadIvLength(v.len()))?;
        Ok(Self(array))
    }

    /// Decrypt a `<ivHex>:<cipherHex>` blob into plaintext bytes.
    pub fn decrypt(&self, blob: &str) -> Result<Vec<u8>, CryptoError> {
        let (iv_hex, cipher_hex) = blob.split_once(':').ok_or(CryptoError::BadFormat)?;
        let iv = hex::decode(iv_hex)?;
        if iv.len() != IV_LEN {
            return Err(CryptoError::BadIvLength(iv.len()));
        }
        let mut buf = hex::decode(cipher_hex)?;
        let decryptor = Decryptor::new(self.0.as_slice().into(), iv.as_slice().into());
        let plain = decryptor
            .decrypt_padded_mut::<Pkcs7>(&mut buf)
            .map_err(|_| CryptoError::Decrypt)?;
        Ok(plain.to_vec())
    }

    /// Decrypt into a `String`, treating non-UTF8 plaintext as a failure.
    pub fn decrypt_to_string(&self, blob: &str) -> Result<String, CryptoError> {
        let bytes = self.decrypt(blob)?;
        String::from_utf8(bytes).map_err(|_| CryptoError::Decrypt)
    }

    /// Encrypt plaintext, producing a fresh random IV each call.
    pub fn encrypt(&self, plaintext: &[u8]) -> String {
        let mut iv = [0u8; IV_LEN];
        rand::thread_rng().fill_bytes(&mut iv);
        let encryptor = Encryptor::new(self.0.as_slice().into(), iv.as_slice().into());
        let cipher = encryptor.encrypt_padded_vec_mut::<Pkcs7>(plaintext);
        format!("{}:{}", hex::encode(iv), hex::encode(cipher))
    }

    pub fn encrypt_str(&self, plaintext: &str) -> String {
        self.encrypt(plaintext.as_bytes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_key() -> EncryptionKey {
        EncryptionKey([9u8; KEY_LEN])
    }

    #[test]
    fn round_trips_plaintext() {
        let key = test_key();
        let blob = key.encrypt_str("hunter2");
        assert_eq!(key.decrypt_to_string(&blob).unwrap(), "hunter2");
    }

    #[test]
    fn each_encryption_uses_a_fresh_iv() {
        let key = test_key();
        let a = key.encrypt_str("same plaintext");
        let b = key.encrypt_str("same plaintext");
        assert_ne!(a, b, "ciphertexts should differ due to random IV");
    }

    #[test]
    fn rejects_missing_separator() {
        let key = test_key();
        assert!(matches!(key.decrypt("nodelimiterhere"), Err(CryptoError::BadFormat)));
    }

    #[test]
    fn rejects_wrong_key() {
        let key = test_key();
        let blob = key.encrypt_str("secret value");
        let wrong = EncryptionKey([1u8; KEY_LEN]);
        assert!(wrong.decrypt(&blob).is_err());
    }

    #[test]
    fn rejects_truncated_iv() {
        let key = test_key();
        assert!(matches!(
            key.decrypt("aabb:00112233"),
            Err(CryptoError::BadIvLength(_))
        ));
    }
}
