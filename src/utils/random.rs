//! Deterministic pseudo-random number generator.
//!
//! Every random choice the Temporal Memory makes (least-used-cell tie breaks,
//! synapse growth order) draws from one of these, threaded explicitly through
//! the call. There is no path to OS entropy: an unspecified seed is a fixed
//! value.

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha20Rng;

/// A seeded ChaCha20 generator whose full state can be persisted.
///
/// # Example
///
/// ```rust
/// use mnemos::utils::Random;
///
/// let mut rng = Random::new(42);
///
/// let idx = rng.get_usize(100);
/// assert!(idx < 100);
///
/// let picked = rng.sample((0..10).collect::<Vec<u32>>(), 3);
/// assert_eq!(picked.len(), 3);
/// ```
pub struct Random {
    rng: ChaCha20Rng,
    seed: u64,
}

// The generator is persisted as its seed plus the ChaCha word position, which
// restores the exact stream position regardless of how many words each draw
// consumed.
#[cfg(feature = "serde")]
mod serde_impl {
    use super::*;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    #[derive(Serialize, Deserialize)]
    struct RandomState {
        seed: u64,
        /// Word position split as `[high, low]` 64-bit halves.
        word_pos: [u64; 2],
    }

    impl Serialize for Random {
        fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
        where
            S: Serializer,
        {
            let pos = self.word_pos();
            let state = RandomState {
                seed: self.seed,
                word_pos: [(pos >> 64) as u64, pos as u64],
            };
            state.serialize(serializer)
        }
    }

    impl<'de> Deserialize<'de> for Random {
        fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
        where
            D: Deserializer<'de>,
        {
            let state = RandomState::deserialize(deserializer)?;
            let mut rng = ChaCha20Rng::seed_from_u64(state.seed);
            rng.set_word_pos((u128::from(state.word_pos[0]) << 64) | u128::from(state.word_pos[1]));
            Ok(Random {
                rng,
                seed: state.seed,
            })
        }
    }
}

impl Random {
    /// Creates a new random number generator with the given seed.
    #[must_use]
    pub fn new(seed: u64) -> Self {
        Self {
            rng: ChaCha20Rng::seed_from_u64(seed),
            seed,
        }
    }

    /// Restarts the generator from a new seed.
    pub fn reseed(&mut self, seed: u64) {
        *self = Self::new(seed);
    }

    /// Returns the seed used for this generator.
    #[must_use]
    pub fn seed(&self) -> u64 {
        self.seed
    }

    /// Returns the number of 32-bit words consumed from the stream so far.
    #[must_use]
    pub fn word_pos(&self) -> u128 {
        self.rng.get_word_pos()
    }

    /// Generates a random usize in the range [0, n).
    pub fn get_usize(&mut self, n: usize) -> usize {
        if n == 0 {
            return 0;
        }
        self.rng.gen_range(0..n)
    }

    /// Shuffles a slice in place using Fisher-Yates algorithm.
    fn shuffle<T>(&mut self, slice: &mut [T]) {
        let n = slice.len();
        if n <= 1 {
            return;
        }

        for i in (1..n).rev() {
            let j = self.get_usize(i + 1);
            slice.swap(i, j);
        }
    }

    /// Samples `k` unique items from a collection without replacement.
    ///
    /// If `k >= items.len()`, returns a shuffled copy of all items.
    pub fn sample<T>(&mut self, mut items: Vec<T>, k: usize) -> Vec<T> {
        let n = items.len();
        if k >= n {
            self.shuffle(&mut items);
            return items;
        }

        // Partial Fisher-Yates
        for i in 0..k {
            let j = self.get_usize(n - i) + i;
            items.swap(i, j);
        }

        items.truncate(k);
        items
    }
}

impl Default for Random {
    fn default() -> Self {
        Self::new(0)
    }
}

impl Clone for Random {
    fn clone(&self) -> Self {
        Self {
            rng: self.rng.clone(),
            seed: self.seed,
        }
    }
}

impl PartialEq for Random {
    fn eq(&self, other: &Self) -> bool {
        self.seed == other.seed && self.word_pos() == other.word_pos()
    }
}

impl std::fmt::Debug for Random {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Random")
            .field("seed", &self.seed)
            .field("word_pos", &self.word_pos())
            .finish()
    }
}
