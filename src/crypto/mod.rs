//! Cryptographic primitives used by the handshake and the record layer.

mod aead;
mod cipher_suite;
mod key_exchange;
mod key_pair;
pub(crate) mod prf;

pub use aead::{Aad, Nonce, IV_LEN};
pub use cipher_suite::{Cipher, CipherSuite};
pub use cipher_suite::{AES_128_GCM_SHA256, AES_256_GCM_SHA256, ALL_CIPHER_SUITES};
pub use key_exchange::{KeyExchange, KEY_SHARE_LEN};
pub use key_pair::{KeyAlgorithm, KeyPair, PublicKey, SignatureScheme};

use sha2::{Digest, Sha256};

/// Length of a SHA-256 digest.
pub const HASH_LEN: usize = 32;

pub(crate) fn sha256(data: &[u8]) -> [u8; HASH_LEN] {
    Sha256::digest(data).into()
}
