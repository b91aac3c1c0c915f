//! Deterministic Random Number Generator
//!
//! Uses Xorshift128+ for fast, deterministic randomness.
//! Given the same seed, a session replays identical spawns, bursts and layouts.

use serde::{Serialize, Deserialize};
use sha2::{Sha256, Digest};

use super::vec2::Vec2;

/// Deterministic PRNG using the Xorshift128+ algorithm.
///
/// Each session owns exactly one generator, seeded once at creation.
/// Everything random in the simulation (particle bursts, marker spawns)
/// draws from it in tick order, so replays stay bit-exact.
///
/// # Example
///
/// ```
/// use arena_session::core::rng::DeterministicRng;
///
/// let mut a = DeterministicRng::new(12345);
/// let mut b = DeterministicRng::new(12345);
/// assert_eq!(a.next_u64(), b.next_u64());
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeterministicRng {
    state: [u64; 2],
}

impl Default for DeterministicRng {
    fn default() -> Self {
        Self::new(0)
    }
}

impl DeterministicRng {
    /// Create a new RNG from a 64-bit seed.
    ///
    /// Uses SplitMix64 to initialize the internal state, ensuring
    /// good distribution even from weak seeds.
    pub fn new(seed: u64) -> Self {
        let mut s = seed;
        let state0 = splitmix64(&mut s);
        let state1 = splitmix64(&mut s);

        // Ensure state is never all zeros
        let state = if state0 == 0 && state1 == 0 {
            [1, 1]
        } else {
            [state0, state1]
        };

        Self { state }
    }

    /// Generate the next 64-bit random value.
    #[inline]
    pub fn next_u64(&mut self) -> u64 {
        let s0 = self.state[0];
        let mut s1 = self.state[1];
        let result = s0.wrapping_add(s1);

        s1 ^= s0;
        self.state[0] = s0.rotate_left(24) ^ s1 ^ (s1 << 16);
        self.state[1] = s1.rotate_left(37);

        result
    }

    /// Generate a random `f64` in [0, 1).
    ///
    /// Uses the top 53 bits so every value is exactly representable.
    #[inline]
    pub fn next_f64(&mut self) -> f64 {
        (self.next_u64() >> 11) as f64 * (1.0 / (1u64 << 53) as f64)
    }

    /// Generate a random `f64` in [min, max).
    #[inline]
    pub fn next_range(&mut self, min: f64, max: f64) -> f64 {
        if min >= max {
            return min;
        }
        min + (max - min) * self.next_f64()
    }

    /// Generate a random unit direction vector.
    pub fn random_direction(&mut self) -> Vec2 {
        Vec2::from_angle(self.next_range(0.0, std::f64::consts::TAU))
    }

    /// Generate a random point inside the rectangle `[-half, half]`.
    pub fn random_in_rect(&mut self, half_width: f64, half_height: f64) -> Vec2 {
        let x = self.next_range(-half_width, half_width);
        let y = self.next_range(-half_height, half_height);
        Vec2::new(x, y)
    }

    /// Generate a random boolean that is true with `probability` (0..=1).
    #[inline]
    pub fn next_bool(&mut self, probability: f64) -> bool {
        self.next_f64() < probability
    }

    /// Get current state (for checkpointing/hashing).
    pub fn state(&self) -> [u64; 2] {
        self.state
    }
}

/// SplitMix64 for seed initialization.
#[inline]
fn splitmix64(state: &mut u64) -> u64 {
    *state = state.wrapping_add(0x9E3779B97F4A7C15);
    let mut z = *state;
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58476D1CE4E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D049BB133111EB);
    z ^ (z >> 31)
}

/// Derive a session seed from the session id and the variant name.
///
/// Two sessions of the same variant get unrelated random streams, and a
/// recorded session id is enough to reproduce a session's randomness.
pub fn derive_session_seed(session_id: &[u8; 16], variant_name: &str) -> u64 {
    let mut hasher = Sha256::new();

    // Domain separator
    hasher.update(b"ARENA_SESSION_SEED_V1");
    hasher.update(session_id);
    hasher.update((variant_name.len() as u32).to_le_bytes());
    hasher.update(variant_name.as_bytes());

    let hash = hasher.finalize();

    let mut seed = [0u8; 8];
    seed.copy_from_slice(&hash[0..8]);
    u64::from_le_bytes(seed)
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rng_determinism() {
        let mut rng1 = DeterministicRng::new(12345);
        let mut rng2 = DeterministicRng::new(12345);

        for _ in 0..1000 {
            assert_eq!(rng1.next_u64(), rng2.next_u64());
        }
    }

    #[test]
    fn test_rng_different_seeds() {
        let mut rng1 = DeterministicRng::new(12345);
        let mut rng2 = DeterministicRng::new(54321);

        assert_ne!(rng1.next_u64(), rng2.next_u64());
    }

    #[test]
    fn test_next_f64_bounds() {
        let mut rng = DeterministicRng::new(9999);

        for _ in 0..1000 {
            let v = rng.next_f64();
            assert!((0.0..1.0).contains(&v));

            let r = rng.next_range(-5.0, 5.0);
            assert!((-5.0..5.0).contains(&r));
        }

        assert_eq!(rng.next_range(3.0, 3.0), 3.0);
    }

    #[test]
    fn test_random_direction_is_unit() {
        let mut rng = DeterministicRng::new(7777);

        for _ in 0..100 {
            let dir = rng.random_direction();
            assert!((dir.length() - 1.0).abs() < 1e-9);
        }
    }

    #[test]
    fn test_random_in_rect() {
        let mut rng = DeterministicRng::new(31);

        for _ in 0..100 {
            let p = rng.random_in_rect(10.0, 4.0);
            assert!(p.x.abs() <= 10.0 && p.y.abs() <= 4.0);
        }
    }

    #[test]
    fn test_derive_session_seed() {
        let id = [1u8; 16];

        assert_eq!(derive_session_seed(&id, "racing"), derive_session_seed(&id, "racing"));
        assert_ne!(derive_session_seed(&id, "racing"), derive_session_seed(&id, "billiards"));
        assert_ne!(derive_session_seed(&id, "racing"), derive_session_seed(&[2u8; 16], "racing"));
    }

    #[test]
    fn test_state_checkpoint() {
        let mut rng = DeterministicRng::new(5555);

        for _ in 0..50 {
            rng.next_u64();
        }

        let mut checkpoint = rng.clone();
        assert_eq!(checkpoint.state(), rng.state());
        let next_values: Vec<u64> = (0..10).map(|_| rng.next_u64()).collect();

        for expected in next_values {
            assert_eq!(checkpoint.next_u64(), expected);
        }
        assert_eq!(checkpoint.state(), rng.state());
    }
}
