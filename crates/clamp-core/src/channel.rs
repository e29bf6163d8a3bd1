//! Channel identifiers for stimulus (DAC) and sampling (ADC) lists.
//!
//! Channels are addressed by a raw index, exactly as the interface firmware
//! numbers them:
//!
//! | direction | analog        | digital pseudo-channel        |
//! |-----------|---------------|-------------------------------|
//! | DAC       | `0..8`        | `8` (unit 1), `11` (unit 2)   |
//! | ADC       | `0..16`       | `16` (unit 1), `19` (unit 2)  |
//!
//! Digital pseudo-channels transfer the 16-bit digital port in lockstep with
//! the analog channels; they carry bit patterns, not scaled voltages.

use std::fmt;

use crate::error::ClampError;

/// Number of analog DAC slots addressable by the interface.
pub const MAX_DAC_CHANNELS: usize = 8;
/// Number of analog ADC slots addressable by the interface.
pub const MAX_ADC_CHANNELS: usize = 16;

/// Raw index of the digital output pseudo-channel of the first unit.
pub const DIGITAL_OUT_CHANNEL: u16 = 8;
/// Raw index of the digital output pseudo-channel of the second unit.
pub const DIGITAL_OUT_CHANNEL_2: u16 = 11;
/// Raw index of the digital input pseudo-channel of the first unit.
pub const DIGITAL_IN_CHANNEL: u16 = 16;
/// Raw index of the digital input pseudo-channel of the second unit.
pub const DIGITAL_IN_CHANNEL_2: u16 = 19;

/// Transfer direction of a channel list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// Stimulus output.
    Dac,
    /// Sample input.
    Adc,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Dac => write!(f, "DAC"),
            Direction::Adc => write!(f, "ADC"),
        }
    }
}

/// Interface unit a digital pseudo-channel belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Unit {
    /// First (or only) interface unit.
    First,
    /// Second, daisy-chained unit.
    Second,
}

/// A stimulus output channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DacChannel {
    /// Analog output `0..8`.
    Analog(u8),
    /// Digital output port of a unit.
    DigitalOut(Unit),
}

impl DacChannel {
    /// Decode a raw channel index.
    pub fn from_raw(raw: u16) -> Result<Self, ClampError> {
        match raw {
            r if (r as usize) < MAX_DAC_CHANNELS => Ok(DacChannel::Analog(r as u8)),
            DIGITAL_OUT_CHANNEL => Ok(DacChannel::DigitalOut(Unit::First)),
            DIGITAL_OUT_CHANNEL_2 => Ok(DacChannel::DigitalOut(Unit::Second)),
            _ => Err(ClampError::InvalidChannel {
                direction: Direction::Dac,
                channel: raw,
                reason: "not an analog or digital output index".to_string(),
            }),
        }
    }

    /// Raw channel index.
    pub fn raw(self) -> u16 {
        match self {
            DacChannel::Analog(index) => index as u16,
            DacChannel::DigitalOut(Unit::First) => DIGITAL_OUT_CHANNEL,
            DacChannel::DigitalOut(Unit::Second) => DIGITAL_OUT_CHANNEL_2,
        }
    }

    /// True for the digital pseudo-channels.
    pub fn is_digital(self) -> bool {
        matches!(self, DacChannel::DigitalOut(_))
    }
}

impl fmt::Display for DacChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DacChannel::Analog(index) => write!(f, "DAC{}", index),
            DacChannel::DigitalOut(Unit::First) => write!(f, "DigOut"),
            DacChannel::DigitalOut(Unit::Second) => write!(f, "DigOut2"),
        }
    }
}

/// A sampling input channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AdcChannel {
    /// Analog input `0..16`.
    Analog(u8),
    /// Digital input port of a unit.
    DigitalIn(Unit),
}

impl AdcChannel {
    /// Decode a raw channel index.
    pub fn from_raw(raw: u16) -> Result<Self, ClampError> {
        match raw {
            r if (r as usize) < MAX_ADC_CHANNELS => Ok(AdcChannel::Analog(r as u8)),
            DIGITAL_IN_CHANNEL => Ok(AdcChannel::DigitalIn(Unit::First)),
            DIGITAL_IN_CHANNEL_2 => Ok(AdcChannel::DigitalIn(Unit::Second)),
            _ => Err(ClampError::InvalidChannel {
                direction: Direction::Adc,
                channel: raw,
                reason: "not an analog or digital input index".to_string(),
            }),
        }
    }

    /// Raw channel index.
    pub fn raw(self) -> u16 {
        match self {
            AdcChannel::Analog(index) => index as u16,
            AdcChannel::DigitalIn(Unit::First) => DIGITAL_IN_CHANNEL,
            AdcChannel::DigitalIn(Unit::Second) => DIGITAL_IN_CHANNEL_2,
        }
    }

    /// True for the digital pseudo-channels.
    pub fn is_digital(self) -> bool {
        matches!(self, AdcChannel::DigitalIn(_))
    }
}

impl fmt::Display for AdcChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AdcChannel::Analog(index) => write!(f, "ADC{}", index),
            AdcChannel::DigitalIn(Unit::First) => write!(f, "DigIn"),
            AdcChannel::DigitalIn(Unit::Second) => write!(f, "DigIn2"),
        }
    }
}

/// Either kind of channel, for direction-agnostic operations such as unit
/// conversion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Channel {
    /// Stimulus output.
    Dac(DacChannel),
    /// Sample input.
    Adc(AdcChannel),
}

impl Channel {
    /// Direction of the channel.
    pub fn direction(self) -> Direction {
        match self {
            Channel::Dac(_) => Direction::Dac,
            Channel::Adc(_) => Direction::Adc,
        }
    }

    /// Raw channel index.
    pub fn raw(self) -> u16 {
        match self {
            Channel::Dac(ch) => ch.raw(),
            Channel::Adc(ch) => ch.raw(),
        }
    }

    /// True for the digital pseudo-channels.
    pub fn is_digital(self) -> bool {
        match self {
            Channel::Dac(ch) => ch.is_digital(),
            Channel::Adc(ch) => ch.is_digital(),
        }
    }
}

impl From<DacChannel> for Channel {
    fn from(ch: DacChannel) -> Self {
        Channel::Dac(ch)
    }
}

impl From<AdcChannel> for Channel {
    fn from(ch: AdcChannel) -> Self {
        Channel::Adc(ch)
    }
}
