//! Process-wide cryptographically secure random source.
//!
//! One [`StdRng`] is seeded from the OS exactly once and shared behind a lock,
//! so concurrent connections draw from the same generator without ever
//! observing the same output.

use std::sync::{Mutex, MutexGuard};

use once_cell::sync::OnceCell;
use rand::rngs::{OsRng, StdRng};
use rand::{CryptoRng, RngCore, SeedableRng};

use crate::Error;

static ENTROPY: OnceCell<Mutex<StdRng>> = OnceCell::new();

/// Access point for the process-wide random generator.
pub struct Entropy;

impl Entropy {
    fn shared() -> Result<&'static Mutex<StdRng>, Error> {
        ENTROPY.get_or_try_init(|| {
            let rng = StdRng::from_rng(OsRng)
                .map_err(|e| Error::EntropyUnavailable(e.to_string()))?;
            debug!("Entropy source seeded from OS");
            Ok(Mutex::new(rng))
        })
    }

    /// Seed the generator now instead of on first use.
    ///
    /// Servers call this at startup so that a broken OS source is reported
    /// before the first connection is accepted.
    pub fn init() -> Result<(), Error> {
        Self::shared().map(|_| ())
    }

    /// Fill `buf` with random bytes.
    pub fn fill(buf: &mut [u8]) -> Result<(), Error> {
        lock(Self::shared()?).fill_bytes(buf);
        Ok(())
    }

    /// Produce `n` random bytes.
    pub fn next_bytes(n: usize) -> Result<Vec<u8>, Error> {
        let mut out = vec![0; n];
        Self::fill(&mut out)?;
        Ok(out)
    }

    /// A handle usable wherever a crate wants `RngCore + CryptoRng`.
    pub fn rng() -> Result<EntropyRng, Error> {
        Ok(EntropyRng {
            shared: Self::shared()?,
        })
    }
}

// A panic while holding the lock cannot leave a ChaCha state half-updated in a
// way that matters, so poisoning is ignored.
fn lock(m: &Mutex<StdRng>) -> MutexGuard<'_, StdRng> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Borrowed handle to the shared generator.
#[derive(Clone, Copy)]
pub struct EntropyRng {
    shared: &'static Mutex<StdRng>,
}

impl RngCore for EntropyRng {
    fn next_u32(&mut self) -> u32 {
        lock(self.shared).next_u32()
    }

    fn next_u64(&mut self) -> u64 {
        lock(self.shared).next_u64()
    }

    fn fill_bytes(&mut self, dest: &mut [u8]) {
        lock(self.shared).fill_bytes(dest)
    }

    fn try_fill_bytes(&mut self, dest: &mut [u8]) -> Result<(), rand::Error> {
        lock(self.shared).try_fill_bytes(dest)
    }
}

impl CryptoRng for EntropyRng {}

impl std::fmt::Debug for EntropyRng {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EntropyRng").finish()
    }
}
