//! # Packet Ciphers
//!
//! Two independent symmetric layers protect every packet:
//!
//! - **Body cipher**: AES-256-CBC with PKCS#7 padding under a [`KeyMaterial`]
//!   pair generated fresh for each outbound packet.
//! - **Header cipher**: a ChaCha20 keystream XORed over the 62-byte header. The
//!   key is derived from the UTC wall-clock hour (`yyyyMMddHH`), so both ends must
//!   agree on the hour. XOR makes the operation self-inverse.
//!
//! The body key travels inside the header, so body confidentiality is only as
//! strong as the header obfuscation. Run over a secure channel when real secrecy
//! is required.

use aes::cipher::block_padding::Pkcs7;
use aes::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use chacha20::cipher::StreamCipher;
use chacha20::ChaCha20;
use chrono::{DateTime, Utc};
use rand::RngCore;
use sha2::{Digest, Sha256};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::{ProtocolError, Result};

type Aes256CbcEnc = cbc::Encryptor<aes::Aes256>;
type Aes256CbcDec = cbc::Decryptor<aes::Aes256>;

/// Body key length in bytes (AES-256)
pub const BODY_KEY_LEN: usize = 32;

/// Body IV length in bytes (one AES block)
pub const BODY_IV_LEN: usize = 16;

/// AES block size; every encrypted body is a multiple of this
pub const BODY_BLOCK_LEN: usize = 16;

/// chrono format string for the hourly header key
pub const HOUR_KEY_FORMAT: &str = "%Y%m%d%H";

/// Ephemeral per-packet body key and IV.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct KeyMaterial {
    pub key: [u8; BODY_KEY_LEN],
    pub iv: [u8; BODY_IV_LEN],
}

impl KeyMaterial {
    /// Generate a fresh random key and IV from the thread CSPRNG.
    pub fn generate() -> Self {
        let mut rng = rand::rng();
        let mut material = Self {
            key: [0u8; BODY_KEY_LEN],
            iv: [0u8; BODY_IV_LEN],
        };
        rng.fill_bytes(&mut material.key);
        rng.fill_bytes(&mut material.iv);
        material
    }
}

impl std::fmt::Debug for KeyMaterial {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyMaterial").finish_non_exhaustive()
    }
}

/// Encrypt a packet body. The output is always at least one block long.
pub fn encrypt_body(plaintext: &[u8], key: &[u8; BODY_KEY_LEN], iv: &[u8; BODY_IV_LEN]) -> Vec<u8> {
    Aes256CbcEnc::new(key.into(), iv.into()).encrypt_padded_vec_mut::<Pkcs7>(plaintext)
}

/// Decrypt a packet body, failing if the ciphertext length or padding is invalid.
pub fn decrypt_body(
    ciphertext: &[u8],
    key: &[u8; BODY_KEY_LEN],
    iv: &[u8; BODY_IV_LEN],
) -> Result<Vec<u8>> {
    if ciphertext.is_empty() || ciphertext.len() % BODY_BLOCK_LEN != 0 {
        return Err(ProtocolError::DecryptionFailure);
    }
    Aes256CbcDec::new(key.into(), iv.into())
        .decrypt_padded_vec_mut::<Pkcs7>(ciphertext)
        .map_err(|_| ProtocolError::DecryptionFailure)
}

/// Render the header key for the hour containing `at`.
pub fn hour_key(at: DateTime<Utc>) -> String {
    at.format(HOUR_KEY_FORMAT).to_string()
}

/// Self-inverse header obfuscation keyed by an hour string.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct HeaderCipher {
    key: [u8; 32],
}

impl HeaderCipher {
    /// Build a cipher from an arbitrary key string.
    pub fn new(key: &str) -> Self {
        let digest = Sha256::digest(key.as_bytes());
        let mut derived = [0u8; 32];
        derived.copy_from_slice(&digest);
        Self { key: derived }
    }

    /// Cipher for the hour containing `at`.
    pub fn for_time(at: DateTime<Utc>) -> Self {
        Self::new(&hour_key(at))
    }

    /// Cipher for the current UTC hour.
    pub fn current() -> Self {
        Self::for_time(Utc::now())
    }

    /// XOR the keystream over `data` in place. Applying twice restores the input.
    pub fn apply(&self, data: &mut [u8]) {
        let nonce = [0u8; 12];
        let mut stream = ChaCha20::new(&self.key.into(), &nonce.into());
        stream.apply_keystream(data);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn body_roundtrip_boundary_lengths() {
        let material = KeyMaterial::generate();
        for len in [0usize, 1, 15, 16, 17, 4096] {
            let plain: Vec<u8> = (0..len).map(|i| (i % 251) as u8).collect();
            let cipher = encrypt_body(&plain, &material.key, &material.iv);
            assert_eq!(cipher.len() % BODY_BLOCK_LEN, 0);
            assert!(cipher.len() > plain.len());
            let back = decrypt_body(&cipher, &material.key, &material.iv).unwrap();
            assert_eq!(back, plain, "length {len}");
        }
    }

    #[test]
    fn body_decrypt_rejects_partial_block() {
        let material = KeyMaterial::generate();
        let err = decrypt_body(&[0u8; 15], &material.key, &material.iv).unwrap_err();
        assert!(matches!(err, ProtocolError::DecryptionFailure));
    }

    #[test]
    fn key_material_is_fresh() {
        let a = KeyMaterial::generate();
        let b = KeyMaterial::generate();
        assert_ne!(a.key, b.key);
        assert_ne!(a.iv, b.iv);
    }

    #[test]
    fn hour_key_format() {
        let at = Utc.with_ymd_and_hms(2024, 3, 9, 7, 59, 59).unwrap();
        assert_eq!(hour_key(at), "2024030907");
    }

    #[test]
    fn header_cipher_is_self_inverse() {
        let cipher = HeaderCipher::new("2024030907");
        let original: Vec<u8> = (0u8..62).collect();
        let mut data = original.clone();
        cipher.apply(&mut data);
        assert_ne!(data, original);
        cipher.apply(&mut data);
        assert_eq!(data, original);
    }

    #[test]
    fn header_cipher_depends_on_hour() {
        let a = Utc.with_ymd_and_hms(2024, 3, 9, 7, 0, 0).unwrap();
        let b = Utc.with_ymd_and_hms(2024, 3, 9, 8, 0, 0).unwrap();
        let mut x = [0u8; 62];
        let mut y = [0u8; 62];
        HeaderCipher::for_time(a).apply(&mut x);
        HeaderCipher::for_time(b).apply(&mut y);
        assert_ne!(x, y);
    }
}
