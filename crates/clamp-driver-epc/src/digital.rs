//! Digital I/O port of the interface.
//!
//! The 16-bit output port is shared: an EPC 8 is remote-controlled through
//! the low byte, and a trigger box occupies bits 8-11. Those bits are
//! reserved; user writes go through a read-modify-write that leaves them
//! untouched.

use clamp_core::command::AmplifierKind;
use clamp_core::error::{ClampError, Result};
use tracing::debug;

use crate::bus::BusContext;

/// Output bits driving the EPC 8 remote control.
pub const AMPLIFIER_REMOTE_BITS: u16 = 0x00FF;

/// Output bits used by a trigger box.
pub const TRIGGER_BOX_BITS: u16 = 0x0F00;

/// Reserved output bits for an amplifier and trigger box combination.
pub fn reserved_bits(kind: AmplifierKind, trigger_box: bool) -> u16 {
    let mut reserved = 0;
    if kind.uses_remote_control_bits() {
        reserved |= AMPLIFIER_REMOTE_BITS;
    }
    if trigger_box {
        reserved |= TRIGGER_BOX_BITS;
    }
    reserved
}

/// Digital input and output port.
#[derive(Debug, Clone)]
pub struct DigitalPort {
    bus: BusContext,
    reserved: u16,
}

impl DigitalPort {
    /// Port with `reserved` output bits owned by other equipment.
    pub fn new(bus: BusContext, reserved: u16) -> Self {
        Self { bus, reserved }
    }

    /// Bits the user may not drive.
    pub fn reserved(&self) -> u16 {
        self.reserved
    }

    /// Bits the user may drive.
    pub fn user_mask(&self) -> u16 {
        !self.reserved
    }

    /// Read the digital input port.
    pub fn read_digital(&self) -> Result<u16> {
        let result = self.bus.with(|transport| transport.read_digital());
        self.bus.track(result)
    }

    /// Pattern presently driven on the output port.
    pub fn digital_out_state(&self) -> Result<u16> {
        let result = self.bus.with(|transport| transport.digital_out_state());
        self.bus.track(result)
    }

    /// Drive all user bits from `value`; reserved bits keep their state.
    pub fn set_digital(&self, value: u16) -> Result<u16> {
        let result = self.write_masked(self.user_mask(), value);
        self.bus.track(result)
    }

    /// Replace the bits in `mask` with those of `value`, keeping every other
    /// bit. Returns the pattern written.
    pub fn update_user_bits(&self, mask: u16, value: u16) -> Result<u16> {
        let result = if mask & self.reserved != 0 {
            Err(ClampError::InvalidParameter(format!(
                "digital mask {:#06x} touches reserved bits {:#06x}",
                mask,
                mask & self.reserved
            )))
        } else {
            self.write_masked(mask, value)
        };
        self.bus.track(result)
    }

    fn write_masked(&self, mask: u16, value: u16) -> Result<u16> {
        self.bus.with(|transport| {
            let current = transport.digital_out_state()?;
            let next = (current & !mask) | (value & mask);
            transport.write_digital(next)?;
            debug!(mask, current, next, "digital output updated");
            Ok(next)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clamp_core::error::ErrorCode;
    use clamp_core::transport::shared;
    use clamp_driver_mock::MockBoard;
    use std::time::Duration;

    fn port(reserved: u16) -> (DigitalPort, clamp_driver_mock::MockHandle) {
        let board = MockBoard::lih88();
        let handle = board.handle();
        let bus = BusContext::new(shared(board), Duration::from_secs(1));
        (DigitalPort::new(bus, reserved), handle)
    }

    #[test]
    fn test_reserved_bits() {
        assert_eq!(reserved_bits(AmplifierKind::Epc10Usb, false), 0);
        assert_eq!(reserved_bits(AmplifierKind::Epc8, false), 0x00FF);
        assert_eq!(reserved_bits(AmplifierKind::Epc8, true), 0x0FFF);
        assert_eq!(reserved_bits(AmplifierKind::Epc9, true), 0x0F00);
    }

    #[test]
    fn test_update_preserves_other_bits() {
        let (port, handle) = port(TRIGGER_BOX_BITS);
        port.update_user_bits(0xF000, 0xA000).unwrap();
        port.update_user_bits(0x000F, 0x0005).unwrap();
        assert_eq!(handle.digital_out(), 0xA005);
        assert_eq!(port.digital_out_state().unwrap(), 0xA005);
    }

    #[test]
    fn test_reserved_mask_rejected() {
        let (port, handle) = port(AMPLIFIER_REMOTE_BITS);
        let err = port.update_user_bits(0x0101, 0xFFFF).unwrap_err();
        assert!(matches!(err, ClampError::InvalidParameter(_)));
        assert_eq!(port.bus.last_error().code(), ErrorCode::InvalidParameter);
        assert_eq!(handle.digital_out(), 0);
    }

    #[test]
    fn test_set_digital_keeps_reserved_bits() {
        let (port, handle) = port(AMPLIFIER_REMOTE_BITS);
        // Another party drives the remote-control byte.
        port.bus
            .with(|transport| transport.write_digital(0x0042))
            .unwrap();
        let written = port.set_digital(0xFFFF).unwrap();
        assert_eq!(written, 0xFF42);
        assert_eq!(handle.digital_out(), 0xFF42);
    }

    #[test]
    fn test_read_input() {
        let (port, handle) = port(0);
        handle.set_digital_in(0x8001);
        assert_eq!(port.read_digital().unwrap(), 0x8001);
    }
}
