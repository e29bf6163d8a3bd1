//! Conversion between physical values and 16-bit device units.
//!
//! The interface works in signed 16-bit units. With the internal scaling,
//! ±10.24 V spans ±32768 units (3200 units per volt). Boards calibrated at
//! the factory may instead supply per-channel factors, which are read once
//! at initialization.
//!
//! ```text
//! DAC:  units = round(volts × dac_factor)      dac_factor: volts → units
//! ADC:  volts = units × adc_factor             adc_factor: units → volts
//! ```
//!
//! Digital pseudo-channels carry bit patterns and are never scaled.

use clamp_core::channel::{
    AdcChannel, Channel, DacChannel, Direction, MAX_ADC_CHANNELS, MAX_DAC_CHANNELS,
};
use clamp_core::error::{ClampError, Result};
use clamp_core::command::GainIndex;

/// Device units per volt with the internal scaling.
pub const INTERNAL_UNITS_PER_VOLT: f64 = 3200.0;

/// A value quantized to device units.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Quantized {
    /// Device units sent to or read from the hardware.
    pub units: i16,
    /// Physical value those units actually represent.
    pub volts_actual: f64,
}

/// Per-channel scaling factors, immutable after initialization.
#[derive(Debug, Clone, PartialEq)]
pub struct ScalingTable {
    dac_units_per_volt: [f64; MAX_DAC_CHANNELS],
    adc_volts_per_unit: [f64; MAX_ADC_CHANNELS],
    external: bool,
}

impl ScalingTable {
    /// Nominal scaling shared by all boards.
    pub fn internal() -> Self {
        Self {
            dac_units_per_volt: [INTERNAL_UNITS_PER_VOLT; MAX_DAC_CHANNELS],
            adc_volts_per_unit: [1.0 / INTERNAL_UNITS_PER_VOLT; MAX_ADC_CHANNELS],
            external: false,
        }
    }

    /// Board-supplied factors: 8 DAC volts→units and 16 ADC units→volts.
    pub fn external(dac: &[f64], adc: &[f64]) -> Result<Self> {
        if dac.len() < MAX_DAC_CHANNELS || adc.len() < MAX_ADC_CHANNELS {
            return Err(ClampError::InitFailed(format!(
                "board supplied {} DAC and {} ADC scaling factors, need {} and {}",
                dac.len(),
                adc.len(),
                MAX_DAC_CHANNELS,
                MAX_ADC_CHANNELS
            )));
        }
        if let Some(bad) = dac
            .iter()
            .chain(adc.iter())
            .find(|factor| !(factor.is_finite() && **factor != 0.0))
        {
            return Err(ClampError::InitFailed(format!(
                "board supplied unusable scaling factor {}",
                bad
            )));
        }

        let mut table = Self::internal();
        table
            .dac_units_per_volt
            .copy_from_slice(&dac[..MAX_DAC_CHANNELS]);
        table
            .adc_volts_per_unit
            .copy_from_slice(&adc[..MAX_ADC_CHANNELS]);
        table.external = true;
        Ok(table)
    }

    /// Whether the factors came from the board.
    pub fn is_external(&self) -> bool {
        self.external
    }

    /// Volts represented by one device unit on `channel`.
    pub fn volts_per_unit(&self, channel: impl Into<Channel>) -> Result<f64> {
        match channel.into() {
            Channel::Dac(DacChannel::Analog(index)) => self
                .dac_units_per_volt
                .get(index as usize)
                .map(|factor| 1.0 / factor)
                .ok_or_else(|| out_of_table(Direction::Dac, index as u16)),
            Channel::Adc(AdcChannel::Analog(index)) => self
                .adc_volts_per_unit
                .get(index as usize)
                .copied()
                .ok_or_else(|| out_of_table(Direction::Adc, index as u16)),
            digital => Err(ClampError::InvalidChannel {
                direction: digital.direction(),
                channel: digital.raw(),
                reason: "digital channels carry bit patterns, not voltages".to_string(),
            }),
        }
    }

    /// Quantize `volts` for `channel`, saturating at the 16-bit limits.
    pub fn to_device_units(&self, channel: impl Into<Channel>, volts: f64) -> Result<Quantized> {
        if volts.is_nan() {
            return Err(ClampError::InvalidParameter(
                "cannot convert NaN to device units".to_string(),
            ));
        }
        let step = self.volts_per_unit(channel)?;
        let exact = (volts / step).round();
        let units = exact.clamp(i16::MIN as f64, i16::MAX as f64) as i16;
        Ok(Quantized {
            units,
            volts_actual: units as f64 * step,
        })
    }

    /// Physical value of `units` on `channel`.
    pub fn to_volts(&self, channel: impl Into<Channel>, units: i16) -> Result<f64> {
        Ok(units as f64 * self.volts_per_unit(channel)?)
    }
}

impl Default for ScalingTable {
    fn default() -> Self {
        Self::internal()
    }
}

fn out_of_table(direction: Direction, channel: u16) -> ClampError {
    ClampError::InvalidChannel {
        direction,
        channel,
        reason: "no scaling factor for this channel".to_string(),
    }
}

/// Current in amperes measured through a gain of `gain_ohms` (V/A).
pub fn amperes(volts: f64, gain_ohms: f64) -> f64 {
    volts / gain_ohms
}

/// Current in amperes for a voltage read at a selected gain index.
pub fn amperes_at_gain(volts: f64, gain: GainIndex) -> f64 {
    amperes(volts, gain.ohms())
}
