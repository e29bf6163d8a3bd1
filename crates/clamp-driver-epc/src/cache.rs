//! Per-board queue of amplifier commands.
//!
//! Setters never touch the bus; they append to the [`CommandCache`] of their
//! board. A flush transmits the whole queue in enqueue order and empties it
//! only once the amplifier acknowledged every command. A failed flush keeps
//! the queue intact so the caller can retry.

use std::time::Duration;

use clamp_core::command::{AmplifierCommand, AmplifierSetting};
use clamp_core::error::Result;
use tracing::{debug, trace};

use crate::bus::BusContext;

/// Something holding commands that must reach the amplifier before the next
/// acquisition starts.
///
/// The acquisition engine calls this before touching the hardware, so a
/// session never runs against settings the amplifier has not received yet.
pub trait FlushBeforeStart {
    /// Transmit everything pending. Returns the number of commands sent.
    fn flush_pending(&mut self) -> Result<usize>;
}

/// Ordered, not yet transmitted commands of one amplifier board.
#[derive(Debug, Clone, Default)]
pub struct CommandCache {
    board: usize,
    pending: Vec<AmplifierCommand>,
    transmitted: u64,
}

impl CommandCache {
    /// Empty cache for `board`.
    pub fn new(board: usize) -> Self {
        Self {
            board,
            pending: Vec::new(),
            transmitted: 0,
        }
    }

    /// Board this cache belongs to.
    pub fn board(&self) -> usize {
        self.board
    }

    /// Queue a setting.
    pub fn enqueue(&mut self, setting: AmplifierSetting) {
        trace!(board = self.board, setting = setting.name(), "command queued");
        self.pending.push(AmplifierCommand::new(self.board, setting));
    }

    /// Commands waiting for the next flush, oldest first.
    pub fn pending(&self) -> &[AmplifierCommand] {
        &self.pending
    }

    /// Number of pending commands.
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    /// True when nothing is pending.
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Commands acknowledged since the cache was created.
    pub fn transmitted(&self) -> u64 {
        self.transmitted
    }

    /// Transmit all pending commands in order.
    ///
    /// Nothing is sent when the queue is empty. The queue is cleared only
    /// after the transport acknowledged the whole batch.
    pub fn flush(&mut self, bus: &BusContext, timeout: Duration) -> Result<usize> {
        if self.pending.is_empty() {
            return Ok(0);
        }
        let count = self.pending.len();
        bus.with(|transport| transport.transmit(&self.pending, timeout))?;
        self.pending.clear();
        self.transmitted += count as u64;
        debug!(board = self.board, count, "amplifier commands flushed");
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clamp_core::command::ClampMode;
    use clamp_core::transport::shared;
    use clamp_driver_mock::{ErrorConfig, ErrorScenario, MockBoard};

    #[test]
    fn test_flush_preserves_order() {
        let board = MockBoard::lih88();
        let handle = board.handle();
        let bus = BusContext::new(shared(board), Duration::from_secs(1));

        let mut cache = CommandCache::new(0);
        cache.enqueue(AmplifierSetting::VHold(-0.07));
        cache.enqueue(AmplifierSetting::Mode {
            mode: ClampMode::CurrentClamp,
            gently: true,
        });
        cache.enqueue(AmplifierSetting::CcIHold(1e-11));
        assert_eq!(cache.len(), 3);

        assert_eq!(cache.flush(&bus, bus.timeout()).unwrap(), 3);
        assert!(cache.is_empty());
        let names: Vec<_> = handle
            .transmitted()
            .iter()
            .map(|c| c.setting.name())
            .collect();
        assert_eq!(names, vec!["v_hold", "mode", "cc_i_hold"]);
        assert_eq!(cache.transmitted(), 3);
    }

    #[test]
    fn test_empty_flush_sends_nothing() {
        let board = MockBoard::lih88();
        let handle = board.handle();
        let bus = BusContext::new(shared(board), Duration::from_secs(1));
        let mut cache = CommandCache::new(1);
        assert_eq!(cache.flush(&bus, bus.timeout()).unwrap(), 0);
        assert!(handle.events().is_empty());
    }

    #[test]
    fn test_failed_flush_keeps_queue() {
        let board = MockBoard::lih88().with_errors(ErrorConfig::scenario(ErrorScenario::Timeout {
            operation: "transmit",
        }));
        let bus = BusContext::new(shared(board), Duration::from_millis(10));
        let mut cache = CommandCache::new(0);
        cache.enqueue(AmplifierSetting::VHold(0.01));
        let err = cache.flush(&bus, bus.timeout()).unwrap_err();
        assert!(err.is_timeout());
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.transmitted(), 0);
    }
}
