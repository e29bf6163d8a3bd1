//! Shared access to the one bus connection of a system.
//!
//! Every component (command caches, acquisition engine, single-shot
//! interface, digital port) holds a clone of the same [`BusContext`]. It
//! bundles the transport, the process-wide bus timeout and the last-error
//! slot, so a failure anywhere lands in the one slot the client polls.

use std::sync::Arc;
use std::time::Duration;

use clamp_core::error::{ClampError, Result, TransportResult};
use clamp_core::status::LastError;
use clamp_core::transport::{BoardTransport, SharedTransport};
use parking_lot::RwLock;
use tracing::debug;

/// Cloneable handle onto the transport, the bus timeout and the last-error
/// slot.
#[derive(Clone)]
pub struct BusContext {
    transport: SharedTransport,
    timeout: Arc<RwLock<Duration>>,
    last_error: LastError,
}

impl std::fmt::Debug for BusContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BusContext")
            .field("timeout", &self.timeout())
            .field("last_error", &self.last_error.code())
            .finish_non_exhaustive()
    }
}

impl BusContext {
    /// Wrap an already shared transport.
    pub fn new(transport: SharedTransport, timeout: Duration) -> Self {
        Self {
            transport,
            timeout: Arc::new(RwLock::new(timeout)),
            last_error: LastError::new(),
        }
    }

    /// Current bus timeout.
    pub fn timeout(&self) -> Duration {
        *self.timeout.read()
    }

    /// Change the bus timeout for every component of the system.
    pub fn set_timeout(&self, timeout: Duration) -> Result<()> {
        let result = if timeout.is_zero() {
            Err(ClampError::InvalidParameter(
                "bus timeout must be positive".to_string(),
            ))
        } else {
            *self.timeout.write() = timeout;
            debug!(timeout_ms = timeout.as_millis() as u64, "bus timeout changed");
            Ok(())
        };
        self.track(result)
    }

    /// The shared last-error slot.
    pub fn last_error(&self) -> &LastError {
        &self.last_error
    }

    /// Record `result`'s error, if any, and pass it through.
    pub fn track<T>(&self, result: Result<T>) -> Result<T> {
        self.last_error.track(result)
    }

    /// Run `f` with exclusive access to the transport.
    ///
    /// Transport failures are converted to [`ClampError::Transport`] but not
    /// recorded; callers decide what the failure means for their state.
    pub fn with<R>(&self, f: impl FnOnce(&mut dyn BoardTransport) -> TransportResult<R>) -> Result<R> {
        let mut transport = self.transport.lock();
        f(transport.as_mut()).map_err(ClampError::from)
    }

    /// Underlying shared transport.
    pub fn transport(&self) -> &SharedTransport {
        &self.transport
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clamp_core::error::ErrorCode;
    use clamp_core::transport::shared;
    use clamp_driver_mock::MockBoard;

    #[test]
    fn test_timeout_shared_between_clones() {
        let bus = BusContext::new(shared(MockBoard::lih88()), Duration::from_secs(1));
        let other = bus.clone();
        other.set_timeout(Duration::from_millis(250)).unwrap();
        assert_eq!(bus.timeout(), Duration::from_millis(250));
    }

    #[test]
    fn test_zero_timeout_rejected_and_recorded() {
        let bus = BusContext::new(shared(MockBoard::lih88()), Duration::from_secs(1));
        assert!(bus.set_timeout(Duration::ZERO).is_err());
        assert_eq!(bus.timeout(), Duration::from_secs(1));
        assert_eq!(bus.last_error().code(), ErrorCode::InvalidParameter);
    }
}
