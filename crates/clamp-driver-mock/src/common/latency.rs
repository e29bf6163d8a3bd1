//! Bus latencies slept in realistic mode.

use std::time::Duration;

/// Per-primitive delays of the simulated bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LatencyConfig {
    /// Delay per transmitted amplifier command.
    pub per_command: Duration,
    /// Handshake delay when a transfer is armed.
    pub start_handshake: Duration,
    /// Round trip of a forced halt.
    pub force_stop: Duration,
}

impl LatencyConfig {
    /// Delays typical of a USB-attached LIH 8+8.
    pub fn usb() -> Self {
        Self {
            per_command: Duration::from_micros(200),
            start_handshake: Duration::from_millis(2),
            force_stop: Duration::from_millis(5),
        }
    }

    /// Delays typical of a PCI board.
    pub fn pci() -> Self {
        Self {
            per_command: Duration::from_micros(20),
            start_handshake: Duration::from_micros(200),
            force_stop: Duration::from_micros(500),
        }
    }

    /// Total delay of transmitting `count` commands.
    pub fn transmit(&self, count: usize) -> Duration {
        self.per_command * count as u32
    }
}
