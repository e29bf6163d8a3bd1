//! The bus collaborator.
//!
//! [`BoardTransport`] is the raw channel read/write surface of the interface
//! board and the amplifier link. Wire-level USB/PCI transactions live behind
//! it; the acquisition engine and the command caches only ever talk to the
//! hardware through this trait.
//!
//! # Architecture
//!
//! ```text
//! BoardSession ──flush──┐
//!                       ├──> SharedTransport (Arc<Mutex<Box<dyn BoardTransport>>>)
//! AcquisitionEngine ────┘
//! ```
//!
//! Sample data crosses the trait as interleaved scans: one scan holds one
//! sample for every *physical* channel, in channel-list order.

use std::sync::Arc;
use std::time::Duration;

use bitflags::bitflags;
use parking_lot::Mutex;

use crate::board::{AdcInputRange, BoardInfo};
use crate::command::AmplifierCommand;
use crate::config::InitOptions;
use crate::error::TransportResult;

bitflags! {
    /// Acquisition mode flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct AcquisitionMode: u16 {
        /// Drive the DAC channels from the stimulus FIFO.
        const ENABLE_DAC_OUTPUT = 1;
        /// Keep running when the DAC FIFO runs dry.
        const DONT_STOP_DAC_ON_UNDERRUN = 2;
        /// Keep running when the ADC FIFO overflows.
        const DONT_STOP_ADC_ON_OVERRUN = 4;
        /// Wait for the external trigger before the sample clock starts.
        const TRIGGERED = 8;
    }
}

/// Sample interval actually produced by the hardware.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SampleInterval {
    /// Interval in board ticks.
    pub ticks: u64,
    /// Interval in seconds (`ticks × seconds_per_tick`).
    pub seconds: f64,
}

/// Everything the board needs to arm a transfer.
#[derive(Debug, Clone, PartialEq)]
pub struct TransferPlan {
    /// Physical DAC list (raw indices), padded by cycling.
    pub dac_channels: Vec<u16>,
    /// Physical ADC list (raw indices), padded by cycling.
    pub adc_channels: Vec<u16>,
    /// Granted sample interval.
    pub interval: SampleInterval,
    /// Scans to acquire; `None` runs until stopped.
    pub scans: Option<u64>,
    /// Mode flags.
    pub mode: AcquisitionMode,
    /// Blocking low-latency path.
    pub immediate: bool,
}

impl TransferPlan {
    /// Physical DAC channel count.
    pub fn physical_dac(&self) -> usize {
        self.dac_channels.len()
    }

    /// Physical ADC channel count.
    pub fn physical_adc(&self) -> usize {
        self.adc_channels.len()
    }
}

/// Hardware-side cursor of a running transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TransferProgress {
    /// The sample clock has started.
    pub started: bool,
    /// Scans clocked since start.
    pub scans: u64,
    /// The transfer stopped by itself (pulsed transfer complete).
    pub finished: bool,
}

/// Identity reported by the hardware when the bus is opened.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct DeviceIdentity {
    /// Amplifier serial number.
    pub serial_number: String,
    /// Device number of the interface (USB device ID).
    pub device_number: String,
    /// Number of amplifier boards behind the link.
    pub amplifier_boards: usize,
    /// Amplifier firmware answered correctly.
    pub firmware_ok: bool,
    /// Board-supplied volts→units factors for the 8 DAC slots.
    pub dac_scaling: Vec<f64>,
    /// Board-supplied units→volts factors for the 16 ADC slots.
    pub adc_scaling: Vec<f64>,
}

/// Raw primitives of one interface board and its amplifier link.
///
/// Implementations must be `Send`; the system shares one instance between
/// all amplifier boards and the acquisition engine through
/// [`SharedTransport`].
pub trait BoardTransport: Send {
    /// Open the bus and identify the connected hardware.
    fn open(&mut self, options: &InitOptions) -> TransportResult<DeviceIdentity>;

    /// Static capabilities of the board.
    fn board_info(&self) -> BoardInfo;

    /// Send amplifier commands in order, waiting for acknowledgment.
    fn transmit(&mut self, commands: &[AmplifierCommand], timeout: Duration)
        -> TransportResult<()>;

    /// Hand calibration data (scale and CFast files) to the amplifier.
    fn install_calibration(&mut self, scale: &[u8], cfast: &[u8]) -> TransportResult<()>;

    /// Arm a transfer with `stimulus` preloaded (interleaved DAC scans).
    /// Untriggered transfers start clocking right away.
    fn start_transfer(
        &mut self,
        plan: &TransferPlan,
        stimulus: &[i16],
        timeout: Duration,
    ) -> TransportResult<()>;

    /// Queue interleaved DAC scans behind the data already written.
    fn write_dac(&mut self, scans: &[i16]) -> TransportResult<()>;

    /// Current hardware cursor. Never blocks.
    fn poll(&mut self) -> TransportResult<TransferProgress>;

    /// Copy the next `scans` interleaved ADC scans into `out`.
    fn read_adc(&mut self, scans: usize, out: &mut [i16]) -> TransportResult<()>;

    /// Stop the sample clock at the next safe boundary.
    fn stop_transfer(&mut self) -> TransportResult<()>;

    /// Reset the acquisition hardware regardless of its state.
    fn force_stop(&mut self, timeout: Duration) -> TransportResult<()>;

    /// Set one DAC outside of a transfer.
    fn set_dac(&mut self, channel: u16, units: i16) -> TransportResult<()>;

    /// Read one ADC outside of a transfer.
    fn read_adc_single(&mut self, channel: u16) -> TransportResult<i16>;

    /// Read the digital input port.
    fn read_digital(&mut self) -> TransportResult<u16>;

    /// Drive the digital output port.
    fn write_digital(&mut self, value: u16) -> TransportResult<()>;

    /// Pattern presently driven on the digital output port.
    fn digital_out_state(&mut self) -> TransportResult<u16>;

    /// Select the input range of one ADC, returning the range in effect.
    fn set_input_range(
        &mut self,
        channel: u16,
        range: AdcInputRange,
    ) -> TransportResult<AdcInputRange>;

    /// Release the bus.
    fn close(&mut self) -> TransportResult<()>;
}

/// The one bus connection shared by command caches and the engine.
pub type SharedTransport = Arc<Mutex<Box<dyn BoardTransport>>>;

/// Wrap a transport for sharing.
pub fn shared<T: BoardTransport + 'static>(transport: T) -> SharedTransport {
    Arc::new(Mutex::new(Box::new(transport)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mode_bits() {
        let mode = AcquisitionMode::ENABLE_DAC_OUTPUT | AcquisitionMode::DONT_STOP_ADC_ON_OVERRUN;
        assert_eq!(mode.bits(), 5);
        assert!(!mode.contains(AcquisitionMode::TRIGGERED));
        assert_eq!(
            AcquisitionMode::from_bits_truncate(0xFF),
            AcquisitionMode::all()
        );
    }

    #[test]
    fn test_plan_counts() {
        let plan = TransferPlan {
            dac_channels: vec![0, 1],
            adc_channels: vec![0, 1, 2, 0],
            interval: SampleInterval {
                ticks: 10,
                seconds: 1e-5,
            },
            scans: Some(100),
            mode: AcquisitionMode::ENABLE_DAC_OUTPUT,
            immediate: false,
        };
        assert_eq!(plan.physical_dac(), 2);
        assert_eq!(plan.physical_adc(), 4);
    }
}
