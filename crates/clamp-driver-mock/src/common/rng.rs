//! Seeded RNG for reproducible failure injection.

use parking_lot::Mutex;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

/// Thread-safe seeded random source.
pub struct MockRng {
    inner: Mutex<ChaCha8Rng>,
}

impl MockRng {
    /// Create a new RNG; `None` seeds from the OS.
    pub fn new(seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(s) => ChaCha8Rng::seed_from_u64(s),
            None => ChaCha8Rng::from_entropy(),
        };
        Self {
            inner: Mutex::new(rng),
        }
    }

    /// Decide whether an operation fails, `rate` in `[0, 1]`.
    pub fn should_fail(&self, rate: f64) -> bool {
        if rate <= 0.0 {
            return false;
        }
        if rate >= 1.0 {
            return true;
        }
        self.inner.lock().gen::<f64>() < rate
    }

    /// Uniform noise in `-amplitude..=amplitude` device units.
    pub fn noise(&self, amplitude: i16) -> i16 {
        if amplitude <= 0 {
            return 0;
        }
        self.inner.lock().gen_range(-amplitude..=amplitude)
    }
}

impl Default for MockRng {
    fn default() -> Self {
        Self::new(None)
    }
}

impl std::fmt::Debug for MockRng {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockRng")
            .field("inner", &"<Mutex<ChaCha8Rng>>")
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seeded_rng_deterministic() {
        let rng1 = MockRng::new(Some(7));
        let rng2 = MockRng::new(Some(7));
        let a: Vec<i16> = (0..16).map(|_| rng1.noise(100)).collect();
        let b: Vec<i16> = (0..16).map(|_| rng2.noise(100)).collect();
        assert_eq!(a, b);
    }

    #[test]
    fn test_should_fail_bounds() {
        let rng = MockRng::new(Some(1));
        assert!((0..100).all(|_| !rng.should_fail(0.0)));
        assert!((0..100).all(|_| rng.should_fail(1.0)));
    }

    #[test]
    fn test_noise_range() {
        let rng = MockRng::new(Some(3));
        assert_eq!(rng.noise(0), 0);
        assert!((0..200).map(|_| rng.noise(5)).all(|v| (-5..=5).contains(&v)));
    }
}
