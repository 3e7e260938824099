//! Deterministic, splittable random seeds.
//!
//! A [`Seed`] is a pure value: splitting it always yields the same children,
//! so threading one seed through a sampler makes the whole draw reproducible.

use rand::rngs::{SmallRng, StdRng};
use rand::{thread_rng, Rng, SeedableRng};

/// A splittable seed for stateless sampling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Seed(u64);

impl Seed {
    /// Wraps a raw seed value.
    pub fn new(value: u64) -> Self {
        Self(value)
    }

    /// Draws a fresh seed from the thread-local generator.
    pub fn from_entropy() -> Self {
        Self(thread_rng().gen::<u64>())
    }

    /// Returns the raw seed value.
    pub fn value(self) -> u64 {
        self.0
    }

    /// Derives `n` child seeds. The result depends only on `self` and `n`.
    pub fn split(self, n: usize) -> Vec<Seed> {
        let mut rng = StdRng::seed_from_u64(self.0);
        (0..n).map(|_| Seed(rng.gen::<u64>())).collect()
    }

    /// Splits into exactly two children.
    pub fn split2(self) -> (Seed, Seed) {
        let mut rng = StdRng::seed_from_u64(self.0);
        (Seed(rng.gen::<u64>()), Seed(rng.gen::<u64>()))
    }

    /// Like [`Seed::split`], after mixing `salt` into the parent so that
    /// different call sites sharing one seed draw independent streams.
    pub fn split_with_salt(self, n: usize, salt: &str) -> Vec<Seed> {
        self.salted(salt).split(n)
    }

    fn salted(self, salt: &str) -> Seed {
        // FNV-1a over the salt bytes.
        let hash = salt
            .bytes()
            .fold(0xcbf2_9ce4_8422_2325_u64, |h, b| {
                (h ^ b as u64).wrapping_mul(0x0000_0100_0000_01b3)
            });
        Seed(self.0 ^ hash)
    }

    /// A fast generator seeded from this seed, used to realize draws.
    pub fn rng(self) -> SmallRng {
        SmallRng::seed_from_u64(self.0)
    }
}

impl From<u64> for Seed {
    fn from(value: u64) -> Self {
        Seed(value)
    }
}
