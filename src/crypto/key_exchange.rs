use x25519_dalek::{EphemeralSecret, PublicKey as X25519PublicKey};
use zeroize::Zeroizing;

use crate::rng::Entropy;
use crate::Error;

/// Length of an X25519 public key share.
pub const KEY_SHARE_LEN: usize = 32;

/// Ephemeral X25519 key exchange, one per handshake.
///
/// The secret is consumed by [`KeyExchange::compute_shared_secret`] and can
/// only be used once. `x25519-dalek` zeroizes it on drop.
pub struct KeyExchange {
    secret: Option<EphemeralSecret>,
    public_key: [u8; KEY_SHARE_LEN],
}

impl KeyExchange {
    pub fn new() -> Result<Self, Error> {
        let secret = EphemeralSecret::random_from_rng(Entropy::rng()?);
        let public_key = X25519PublicKey::from(&secret).to_bytes();

        Ok(KeyExchange {
            secret: Some(secret),
            public_key,
        })
    }

    pub fn public_key(&self) -> &[u8] {
        &self.public_key
    }

    /// Compute shared secret using peer's public key
    pub fn compute_shared_secret(
        &mut self,
        peer_public_key: &[u8],
    ) -> Result<Zeroizing<[u8; 32]>, String> {
        let Some(secret) = self.secret.take() else {
            return Err("Key exchange secret already used".to_string());
        };

        let peer: [u8; KEY_SHARE_LEN] = peer_public_key
            .try_into()
            .map_err(|_| format!("Invalid key share length {}", peer_public_key.len()))?;

        let shared = secret.diffie_hellman(&X25519PublicKey::from(peer));

        // Low order peer points give an all-zero secret.
        if !shared.was_contributory() {
            return Err("Non-contributory key share".to_string());
        }

        Ok(Zeroizing::new(*shared.as_bytes()))
    }

    pub fn is_consumed(&self) -> bool {
        self.secret.is_none()
    }
}

impl std::fmt::Debug for KeyExchange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyExchange")
            .field("consumed", &self.is_consumed())
            .finish()
    }
}
