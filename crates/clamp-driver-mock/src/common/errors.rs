//! Failure injection for the simulated board.
//!
//! Each bus primitive checks in under an operation name (`"open"`,
//! `"transmit"`, `"start_transfer"`, `"poll"`, `"read_adc"`, ...) before it
//! does anything, and fails with the [`TransportError`] the active
//! scenario prescribes.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use clamp_core::error::TransportError;
use parking_lot::Mutex;

use super::rng::MockRng;

/// Failure injection settings, cheap to clone.
#[derive(Clone, Debug)]
pub struct ErrorConfig {
    failure_rates: Arc<HashMap<&'static str, f64>>,
    scenarios: Arc<Vec<ErrorScenario>>,
    rng: Arc<MockRng>,
    state: Arc<Mutex<ErrorState>>,
}

/// A scripted failure.
#[derive(Debug, Clone, PartialEq)]
pub enum ErrorScenario {
    /// Succeed `count` times, then fail every call of `operation`.
    FailAfterN {
        /// Operation name.
        operation: &'static str,
        /// Successful calls before failing.
        count: u32,
    },
    /// Every call of `operation` times out.
    Timeout {
        /// Operation name.
        operation: &'static str,
    },
    /// The device drops off the bus at the first call of `operation`.
    Detach {
        /// Operation name.
        operation: &'static str,
    },
    /// The interface is held elsewhere; `open` fails.
    Locked,
}

#[derive(Default, Debug)]
struct ErrorState {
    operation_counts: HashMap<&'static str, u32>,
    detached: bool,
}

impl ErrorConfig {
    /// No failures.
    pub fn none() -> Self {
        Self::build(HashMap::new(), Vec::new(), None)
    }

    /// Every operation fails with probability `rate`.
    pub fn random_failures_seeded(rate: f64, seed: Option<u64>) -> Self {
        let mut rates = HashMap::new();
        rates.insert("*", rate);
        Self::build(rates, Vec::new(), seed)
    }

    /// A single scripted failure.
    pub fn scenario(scenario: ErrorScenario) -> Self {
        Self::scenarios(vec![scenario])
    }

    /// Several scripted failures.
    pub fn scenarios(scenarios: Vec<ErrorScenario>) -> Self {
        Self::build(HashMap::new(), scenarios, None)
    }

    fn build(
        rates: HashMap<&'static str, f64>,
        scenarios: Vec<ErrorScenario>,
        seed: Option<u64>,
    ) -> Self {
        Self {
            failure_rates: Arc::new(rates),
            scenarios: Arc::new(scenarios),
            rng: Arc::new(MockRng::new(seed)),
            state: Arc::new(Mutex::new(ErrorState::default())),
        }
    }

    /// Check in `operation`; `timeout` is what a timeout failure reports.
    pub fn check(&self, operation: &'static str, timeout: Duration) -> Result<(), TransportError> {
        let mut state = self.state.lock();

        if state.detached {
            return Err(TransportError::Detached);
        }

        for scenario in self.scenarios.iter() {
            match scenario {
                ErrorScenario::FailAfterN {
                    operation: op,
                    count,
                } if *op == operation => {
                    let current = state.operation_counts.entry(operation).or_insert(0);
                    *current += 1;
                    if *current > *count {
                        return Err(TransportError::Protocol(format!(
                            "injected failure of '{}' after {} calls",
                            operation, count
                        )));
                    }
                }
                ErrorScenario::Timeout { operation: op } if *op == operation => {
                    return Err(TransportError::Timeout { operation, timeout });
                }
                ErrorScenario::Detach { operation: op } if *op == operation => {
                    state.detached = true;
                    return Err(TransportError::Detached);
                }
                ErrorScenario::Locked if operation == "open" => {
                    return Err(TransportError::DeviceBusy(
                        "interface in use by another process".to_string(),
                    ));
                }
                _ => {}
            }
        }

        let rate = self
            .failure_rates
            .get(operation)
            .or_else(|| self.failure_rates.get("*"))
            .copied()
            .unwrap_or(0.0);
        if self.rng.should_fail(rate) {
            return Err(TransportError::Protocol(format!(
                "random failure on '{}'",
                operation
            )));
        }

        Ok(())
    }

    /// Whether a detach scenario has fired.
    pub fn is_detached(&self) -> bool {
        self.state.lock().detached
    }
}

impl Default for ErrorConfig {
    fn default() -> Self {
        Self::none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_none_never_fails() {
        let config = ErrorConfig::none();
        for _ in 0..50 {
            assert!(config.check("transmit", Duration::ZERO).is_ok());
        }
    }

    #[test]
    fn test_fail_after_n() {
        let config = ErrorConfig::scenario(ErrorScenario::FailAfterN {
            operation: "poll",
            count: 2,
        });
        assert!(config.check("poll", Duration::ZERO).is_ok());
        assert!(config.check("poll", Duration::ZERO).is_ok());
        assert!(config.check("poll", Duration::ZERO).is_err());
        assert!(config.check("transmit", Duration::ZERO).is_ok());
    }

    #[test]
    fn test_timeout_reports_duration() {
        let config = ErrorConfig::scenario(ErrorScenario::Timeout {
            operation: "transmit",
        });
        let err = config
            .check("transmit", Duration::from_millis(20))
            .unwrap_err();
        assert_eq!(
            err,
            TransportError::Timeout {
                operation: "transmit",
                timeout: Duration::from_millis(20)
            }
        );
    }

    #[test]
    fn test_detach_is_sticky() {
        let config = ErrorConfig::scenario(ErrorScenario::Detach { operation: "poll" });
        assert!(config.check("open", Duration::ZERO).is_ok());
        assert_eq!(
            config.check("poll", Duration::ZERO),
            Err(TransportError::Detached)
        );
        assert!(config.is_detached());
        assert_eq!(
            config.check("close", Duration::ZERO),
            Err(TransportError::Detached)
        );
    }

    #[test]
    fn test_locked_only_affects_open() {
        let config = ErrorConfig::scenario(ErrorScenario::Locked);
        assert!(matches!(
            config.check("open", Duration::ZERO),
            Err(TransportError::DeviceBusy(_))
        ));
        assert!(config.check("poll", Duration::ZERO).is_ok());
    }
}
