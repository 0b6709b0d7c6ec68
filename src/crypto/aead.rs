//! Record AEAD nonce and additional data construction.
//!
//! Kept apart from the pluggable [`CipherSuite`](super::CipherSuite) so that
//! every suite seals records with the same framing.

use std::ops::Deref;

use tinyvec::ArrayVec;

use crate::message::{ContentType, ProtocolVersion};

/// Fixed length of the per-direction IV and of the nonce derived from it.
pub const IV_LEN: usize = 12;

/// Full AEAD nonce.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Nonce(pub [u8; IV_LEN]);

impl Nonce {
    /// nonce = iv XOR pad_left(seq, iv_len)
    pub(crate) fn xor(iv: &[u8; IV_LEN], seq: u64) -> Self {
        let mut nonce = *iv;
        let seq_bytes = seq.to_be_bytes();
        for i in 0..8 {
            nonce[4 + i] ^= seq_bytes[i];
        }
        Self(nonce)
    }
}

/// Additional Authenticated Data for a record.
///
/// content_type(1) || version(2) || sequence(8) || plaintext length(2)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Aad(pub ArrayVec<[u8; 13]>);

impl Aad {
    pub(crate) fn new(
        content_type: ContentType,
        version: ProtocolVersion,
        sequence: u64,
        length: u16,
    ) -> Self {
        let mut aad = ArrayVec::new();
        aad.push(content_type.as_u8());
        aad.extend_from_slice(&version.as_u16().to_be_bytes());
        aad.extend_from_slice(&sequence.to_be_bytes());
        aad.extend_from_slice(&length.to_be_bytes());
        Aad(aad)
    }
}

impl Deref for Aad {
    type Target = [u8];
    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl Deref for Nonce {
    type Target = [u8];
    fn deref(&self) -> &Self::Target {
        &self.0
    }
}
