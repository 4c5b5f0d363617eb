//! Image payload generation.
//!
//! Deterministic pseudorandom payloads for filling slots in tests.  The
//! trailer code never looks at image contents, but tests that corrupt or
//! erase a slot want recognizable, reproducible data in it.

use rand::{RngCore, SeedableRng};
use rand_xoshiro::Xoshiro256Plus;

pub struct GeneratedImage {
    pub data: Vec<u8>,
}

pub struct GenBuilder {
    /// Total size of the payload.
    size: usize,
    /// Seed for the PRNG
    seed: usize,
}

impl Default for GenBuilder {
    fn default() -> Self {
        GenBuilder {
            size: 76_137,
            seed: 1,
        }
    }
}

impl GenBuilder {
    pub fn size(&mut self, size: usize) -> &mut Self {
        self.size = size;
        self
    }

    pub fn seed(&mut self, seed: usize) -> &mut Self {
        self.seed = seed;
        self
    }

    pub fn build(&self) -> GeneratedImage {
        let mut rng = Xoshiro256Plus::seed_from_u64(self.seed as u64);
        let mut data = vec![0u8; self.size];
        rng.fill_bytes(&mut data);

        GeneratedImage { data }
    }
}
