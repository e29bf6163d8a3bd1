//! How the simulated sample clock advances.
//!
//! - **Instant**: pulsed transfers complete the moment they start; continuous
//!   transfers advance only when the test calls
//!   [`MockHandle::advance`](crate::MockHandle::advance). Deterministic.
//! - **Realistic**: the clock follows wall time at the granted sample
//!   interval, and bus latencies from [`LatencyConfig`](super::LatencyConfig)
//!   are slept.

/// Clock behavior of a [`MockBoard`](crate::MockBoard).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MockMode {
    /// Clock moves only on request - for unit tests
    #[default]
    Instant,
    /// Clock follows wall time - for integration tests
    Realistic,
}

impl MockMode {
    /// Whether the clock is driven by wall time.
    pub fn follows_wall_clock(self) -> bool {
        matches!(self, MockMode::Realistic)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_mode() {
        assert_eq!(MockMode::default(), MockMode::Instant);
    }

    #[test]
    fn test_wall_clock_modes() {
        assert!(MockMode::Realistic.follows_wall_clock());
        assert!(!MockMode::Instant.follows_wall_clock());
    }
}
