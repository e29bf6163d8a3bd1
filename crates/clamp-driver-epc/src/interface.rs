//! Single-shot access to the interface outside of an acquisition.
//!
//! These calls talk to one DAC or ADC at a time and must not be mixed with a
//! running session; [`EpcSystem`](crate::EpcSystem) only hands out the
//! [`Interface`] while the engine is idle.

use std::sync::Arc;

use clamp_core::board::{AdcInputRange, BoardInfo, BoardType};
use clamp_core::channel::{AdcChannel, DacChannel, Direction};
use clamp_core::error::{ClampError, Result};
use clamp_core::transport::SampleInterval;
use tracing::debug;

use crate::bus::BusContext;
use crate::cache::FlushBeforeStart;
use crate::topology::{self, ChannelTopology};
use crate::units::{Quantized, ScalingTable};

/// One reading of every analog ADC plus the digital input port.
#[derive(Debug, Clone, PartialEq)]
pub struct ReadAll {
    /// Volts per analog ADC, in channel order.
    pub adc_volts: Vec<f64>,
    /// Digital input port.
    pub digital: u16,
    /// Interval the board would grant between two conversions.
    pub interval: SampleInterval,
}

/// Single-shot DAC/ADC operations and board queries.
#[derive(Debug, Clone)]
pub struct Interface {
    bus: BusContext,
    board: BoardInfo,
    scaling: Arc<ScalingTable>,
}

impl Interface {
    /// Interface of `board` converting with `scaling`.
    pub fn new(bus: BusContext, board: BoardInfo, scaling: Arc<ScalingTable>) -> Self {
        Self {
            bus,
            board,
            scaling,
        }
    }

    /// Board capabilities.
    pub fn board_info(&self) -> &BoardInfo {
        &self.board
    }

    /// Board family.
    pub fn board_type(&self) -> BoardType {
        self.board.board_type
    }

    /// Scaling table in use.
    pub fn scaling(&self) -> &Arc<ScalingTable> {
        &self.scaling
    }

    /// Interval the board grants for `requested` seconds at
    /// `physical_channels` channels per scan.
    pub fn check_sample_interval(
        &self,
        requested: f64,
        physical_channels: usize,
    ) -> Result<SampleInterval> {
        let result = ChannelTopology::new(&self.board).check_sample_interval(requested, physical_channels);
        self.bus.track(result)
    }

    /// Common physical channel count for `dac` and `adc` requested channels.
    pub fn physical_channels(&self, dac: usize, adc: usize) -> Result<usize> {
        self.bus.track(topology::physical_channels(dac, adc))
    }

    fn analog_dac(&self, channel: DacChannel) -> Result<u16> {
        match channel {
            DacChannel::Analog(index) if (index as usize) < self.board.dac_channels => {
                Ok(channel.raw())
            }
            _ => Err(ClampError::InvalidChannel {
                direction: Direction::Dac,
                channel: channel.raw(),
                reason: "single-shot output needs an analog DAC of this board".to_string(),
            }),
        }
    }

    fn analog_adc(&self, channel: AdcChannel) -> Result<u16> {
        match channel {
            AdcChannel::Analog(index) if (index as usize) < self.board.adc_channels => {
                Ok(channel.raw())
            }
            _ => Err(ClampError::InvalidChannel {
                direction: Direction::Adc,
                channel: channel.raw(),
                reason: "single-shot input needs an analog ADC of this board".to_string(),
            }),
        }
    }

    /// Set one DAC to `volts`. Returns the quantized value applied.
    pub fn set_dac(&self, channel: DacChannel, volts: f64) -> Result<Quantized> {
        let result = self.analog_dac(channel).and_then(|raw| {
            let quantized = self.scaling.to_device_units(channel, volts)?;
            self.bus
                .with(|transport| transport.set_dac(raw, quantized.units))?;
            debug!(%channel, volts = quantized.volts_actual, "DAC set");
            Ok(quantized)
        });
        self.bus.track(result)
    }

    /// Set one DAC in device units.
    pub fn set_dac_units(&self, channel: DacChannel, units: i16) -> Result<()> {
        let result = self
            .analog_dac(channel)
            .and_then(|raw| self.bus.with(|transport| transport.set_dac(raw, units)));
        self.bus.track(result)
    }

    /// Read one ADC in volts.
    pub fn read_adc(&self, channel: AdcChannel) -> Result<f64> {
        let result = self
            .read_adc_units(channel)
            .and_then(|units| self.scaling.to_volts(channel, units));
        self.bus.track(result)
    }

    /// Read one ADC in device units.
    pub fn read_adc_units(&self, channel: AdcChannel) -> Result<i16> {
        let result = self
            .analog_adc(channel)
            .and_then(|raw| self.bus.with(|transport| transport.read_adc_single(raw)));
        self.bus.track(result)
    }

    /// Read every analog ADC and the digital input, `interval` apart.
    ///
    /// Flushes `pending` first, like any acquisition.
    pub fn read_all(
        &self,
        interval: f64,
        pending: Option<&mut dyn FlushBeforeStart>,
    ) -> Result<ReadAll> {
        let result = self.read_all_inner(interval, pending);
        self.bus.track(result)
    }

    fn read_all_inner(
        &self,
        interval: f64,
        pending: Option<&mut dyn FlushBeforeStart>,
    ) -> Result<ReadAll> {
        let granted = ChannelTopology::new(&self.board).check_sample_interval(interval, 1)?;
        if let Some(pending) = pending {
            pending.flush_pending()?;
        }
        let (raw, digital) = self.bus.with(|transport| {
            let raw = (0..self.board.adc_channels as u16)
                .map(|channel| transport.read_adc_single(channel))
                .collect::<std::result::Result<Vec<_>, _>>()?;
            let digital = transport.read_digital()?;
            Ok((raw, digital))
        })?;
        let adc_volts = raw
            .iter()
            .enumerate()
            .map(|(index, &units)| self.scaling.to_volts(AdcChannel::Analog(index as u8), units))
            .collect::<Result<Vec<_>>>()?;
        Ok(ReadAll {
            adc_volts,
            digital,
            interval: granted,
        })
    }

    /// Select the input range of one ADC. Only boards with selectable
    /// ranges accept this.
    pub fn set_input_range(&self, channel: AdcChannel, range: AdcInputRange) -> Result<AdcInputRange> {
        let result = if !self.board.input_range_selectable {
            Err(ClampError::UnsupportedCombination(format!(
                "{} has a fixed input range",
                self.board.board_type
            )))
        } else {
            self.analog_adc(channel).and_then(|raw| {
                self.bus
                    .with(|transport| transport.set_input_range(raw, range))
            })
        };
        self.bus.track(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clamp_core::channel::Unit;
    use clamp_core::transport::shared;
    use clamp_driver_mock::{MockBoard, MockHandle};
    use std::time::Duration;

    fn interface(info: BoardInfo) -> (Interface, MockHandle) {
        let board = MockBoard::new(info.clone());
        let handle = board.handle();
        let bus = BusContext::new(shared(board), Duration::from_secs(1));
        (
            Interface::new(bus, info, Arc::new(ScalingTable::internal())),
            handle,
        )
    }

    #[test]
    fn test_set_dac_quantizes() {
        let (iface, handle) = interface(BoardInfo::lih88());
        let applied = iface.set_dac(DacChannel::Analog(1), 0.5).unwrap();
        assert_eq!(applied.units, 1600);
        assert_eq!(handle.dac_level(1), Some(1600));
        assert!(iface.set_dac(DacChannel::DigitalOut(Unit::First), 1.0).is_err());
        assert!(iface.set_dac(DacChannel::Analog(7), 1.0).is_err());
    }

    #[test]
    fn test_read_adc_loopback() {
        let (iface, handle) = interface(BoardInfo::lih88());
        handle.loopback(3, 0);
        iface.set_dac_units(DacChannel::Analog(0), -3200).unwrap();
        assert_eq!(iface.read_adc_units(AdcChannel::Analog(3)).unwrap(), -3200);
        assert!((iface.read_adc(AdcChannel::Analog(3)).unwrap() + 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_read_all() {
        let (iface, handle) = interface(BoardInfo::lih88());
        handle.set_adc_level(2, 6400);
        handle.set_digital_in(0x0003);
        let all = iface.read_all(1e-5, None).unwrap();
        assert_eq!(all.adc_volts.len(), 8);
        assert!((all.adc_volts[2] - 2.0).abs() < 1e-12);
        assert_eq!(all.digital, 0x0003);
        assert_eq!(all.interval.ticks, 10);
    }

    #[test]
    fn test_input_range_only_where_selectable() {
        let (lih, _) = interface(BoardInfo::lih88());
        assert!(matches!(
            lih.set_input_range(AdcChannel::Analog(0), AdcInputRange::Volts5),
            Err(ClampError::UnsupportedCombination(_))
        ));
        let (itc, handle) = interface(BoardInfo::itc18());
        assert_eq!(
            itc.set_input_range(AdcChannel::Analog(1), AdcInputRange::Volts5)
                .unwrap(),
            AdcInputRange::Volts5
        );
        assert_eq!(handle.input_range(1), Some(AdcInputRange::Volts5));
    }

    #[test]
    fn test_board_queries() {
        let (iface, _) = interface(BoardInfo::lih88());
        assert_eq!(iface.board_type(), BoardType::Lih88);
        assert_eq!(iface.physical_channels(3, 1).unwrap(), 4);
        assert!(iface.physical_channels(21, 0).is_err());
    }
}
