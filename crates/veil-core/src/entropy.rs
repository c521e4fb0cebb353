use once_cell::sync::Lazy;
use rand::{rngs::OsRng, RngCore, SeedableRng};
use rand_chacha::ChaCha20Rng;
use sha3::{Digest, Sha3_512};
use std::sync::Mutex;

/// Bytes drawn from a seed before fresh OS entropy is folded back in.
const RESEED_BUDGET: u64 = 64 * 1024;

static MIXER: Lazy<Mutex<Mixer>> = Lazy::new(|| {
    let mut seed = [0u8; 32];
    OsRng.fill_bytes(&mut seed);
    Mutex::new(Mixer::new(seed))
});

struct Mixer {
    rng: ChaCha20Rng,
    drawn: u64,
}

impl Mixer {
    fn new(seed: [u8; 32]) -> Self {
        Self {
            rng: ChaCha20Rng::from_seed(seed),
            drawn: 0,
        }
    }

    fn reseed_if_needed(&mut self) {
        if self.drawn < RESEED_BUDGET {
            return;
        }
        let mut fresh = [0u8; 64];
        OsRng.fill_bytes(&mut fresh);

        // Diffuse the old stream position into the new seed so two reseeds
        // from identical OS output still diverge.
        let mut carry = [0u8; 32];
        self.rng.fill_bytes(&mut carry);

        let mut hasher = Sha3_512::new();
        hasher.update(fresh);
        hasher.update(carry);
        let digest = hasher.finalize();

        let mut seed = [0u8; 32];
        seed.copy_from_slice(&digest[..32]);
        self.rng = ChaCha20Rng::from_seed(seed);
        self.drawn = 0;
    }

    fn fill(&mut self, buf: &mut [u8]) {
        self.reseed_if_needed();
        self.rng.fill_bytes(buf);
        self.drawn = self.drawn.saturating_add(buf.len() as u64);
    }
}

/// Process-wide CSPRNG front-end for handshake randoms and ephemeral key
/// material. A ChaCha20 stream is periodically reseeded from OS entropy with
/// a SHA3 diffusion step.
pub struct SecureRandom;

impl SecureRandom {
    /// Fill the provided buffer with random bytes.
    pub fn fill_bytes(buf: &mut [u8]) {
        let mut guard = MIXER.lock().expect("entropy mixer");
        guard.fill(buf);
    }

    /// Produce a fixed-size array of random bytes.
    pub fn array<const N: usize>() -> [u8; N] {
        let mut out = [0u8; N];
        Self::fill_bytes(&mut out);
        out
    }
}
