//! Pluggable record cipher suites, implemented with RustCrypto AES-GCM.
use std::fmt;

use aes_gcm::aead::{AeadInPlace, KeyInit};
use aes_gcm::{Aes128Gcm, Aes256Gcm};

use super::aead::{Aad, Nonce, IV_LEN};

/// Stateful record cipher created from one direction's key.
pub trait Cipher: Send {
    /// Encrypt `data` in place and append the tag.
    fn encrypt(&mut self, data: &mut Vec<u8>, aad: &Aad, nonce: Nonce) -> Result<(), String>;

    /// Verify the tag, strip it and decrypt `data` in place.
    ///
    /// On error the content of `data` is unspecified and must be discarded.
    fn decrypt(&mut self, data: &mut Vec<u8>, aad: &Aad, nonce: Nonce) -> Result<(), String>;
}

/// A cipher suite capability.
///
/// The handshake only needs to know the key material sizes and how to turn a
/// key into a [`Cipher`]. Both peers must be configured with the same suite.
pub trait CipherSuite: fmt::Debug + Send + Sync {
    /// Identifier sent in the Hello message.
    fn id(&self) -> u16;

    fn name(&self) -> &'static str;

    fn key_len(&self) -> usize;

    fn iv_len(&self) -> usize {
        IV_LEN
    }

    fn tag_len(&self) -> usize;

    fn create_cipher(&self, key: &[u8]) -> Result<Box<dyn Cipher>, String>;
}

enum AesGcm {
    Aes128(Box<Aes128Gcm>),
    Aes256(Box<Aes256Gcm>),
}

impl fmt::Debug for AesGcm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AesGcm::Aes128(_) => f.debug_tuple("AesGcm::Aes128").finish(),
            AesGcm::Aes256(_) => f.debug_tuple("AesGcm::Aes256").finish(),
        }
    }
}

impl AesGcm {
    fn new(key: &[u8]) -> Result<Self, String> {
        match key.len() {
            16 => Aes128Gcm::new_from_slice(key)
                .map(|c| AesGcm::Aes128(Box::new(c)))
                .map_err(|_| "Invalid AES-128 key".to_string()),
            32 => Aes256Gcm::new_from_slice(key)
                .map(|c| AesGcm::Aes256(Box::new(c)))
                .map_err(|_| "Invalid AES-256 key".to_string()),
            _ => Err(format!("Invalid key size for AES-GCM: {}", key.len())),
        }
    }
}

impl Cipher for AesGcm {
    fn encrypt(&mut self, data: &mut Vec<u8>, aad: &Aad, nonce: Nonce) -> Result<(), String> {
        let nonce = aes_gcm::Nonce::from_slice(&nonce.0);

        match self {
            AesGcm::Aes128(cipher) => cipher.encrypt_in_place(nonce, aad, data),
            AesGcm::Aes256(cipher) => cipher.encrypt_in_place(nonce, aad, data),
        }
        .map_err(|_| "AES-GCM encryption failed".to_string())
    }

    fn decrypt(&mut self, data: &mut Vec<u8>, aad: &Aad, nonce: Nonce) -> Result<(), String> {
        if data.len() < GCM_TAG_LEN {
            return Err(format!("Ciphertext too short: {}", data.len()));
        }

        let nonce = aes_gcm::Nonce::from_slice(&nonce.0);

        // decrypt_in_place removes the tag and shortens the buffer
        match self {
            AesGcm::Aes128(cipher) => cipher.decrypt_in_place(nonce, aad, data),
            AesGcm::Aes256(cipher) => cipher.decrypt_in_place(nonce, aad, data),
        }
        .map_err(|_| "AES-GCM decryption failed".to_string())
    }
}

const GCM_TAG_LEN: usize = 16;

/// AES-128-GCM records, HMAC-SHA256 key schedule.
#[derive(Debug)]
struct Aes128GcmSha256;

impl CipherSuite for Aes128GcmSha256 {
    fn id(&self) -> u16 {
        0x1301
    }

    fn name(&self) -> &'static str {
        "AES_128_GCM_SHA256"
    }

    fn key_len(&self) -> usize {
        16
    }

    fn tag_len(&self) -> usize {
        GCM_TAG_LEN
    }

    fn create_cipher(&self, key: &[u8]) -> Result<Box<dyn Cipher>, String> {
        Ok(Box::new(AesGcm::new(key)?))
    }
}

/// AES-256-GCM records, HMAC-SHA256 key schedule.
#[derive(Debug)]
struct Aes256GcmSha256;

impl CipherSuite for Aes256GcmSha256 {
    fn id(&self) -> u16 {
        0x1399
    }

    fn name(&self) -> &'static str {
        "AES_256_GCM_SHA256"
    }

    fn key_len(&self) -> usize {
        32
    }

    fn tag_len(&self) -> usize {
        GCM_TAG_LEN
    }

    fn create_cipher(&self, key: &[u8]) -> Result<Box<dyn Cipher>, String> {
        Ok(Box::new(AesGcm::new(key)?))
    }
}

/// AES-128-GCM suite. This is the default.
pub static AES_128_GCM_SHA256: &dyn CipherSuite = &Aes128GcmSha256;

/// AES-256-GCM suite.
pub static AES_256_GCM_SHA256: &dyn CipherSuite = &Aes256GcmSha256;

/// All built-in suites.
pub static ALL_CIPHER_SUITES: &[&dyn CipherSuite] = &[AES_128_GCM_SHA256, AES_256_GCM_SHA256];
