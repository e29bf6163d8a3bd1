//! Immutable description of the acquisition interface.
//!
//! A [`BoardInfo`] is obtained once, at initialization, from the
//! [`BoardTransport`](crate::transport::BoardTransport) and never changes
//! afterwards. Re-initializing the system is the only way to pick up a
//! different board.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Interface family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BoardType {
    /// InstruTech ITC-16.
    Itc16,
    /// InstruTech ITC-18.
    Itc18,
    /// HEKA LIH 1600.
    Lih1600,
    /// HEKA LIH 8+8.
    Lih88,
}

impl BoardType {
    /// Numeric board code as reported by the interface firmware.
    pub fn code(self) -> i32 {
        match self {
            BoardType::Itc16 => 0,
            BoardType::Itc18 => 1,
            BoardType::Lih1600 => 2,
            BoardType::Lih88 => 3,
        }
    }
}

impl fmt::Display for BoardType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            BoardType::Itc16 => "ITC-16",
            BoardType::Itc18 => "ITC-18",
            BoardType::Lih1600 => "LIH 1600",
            BoardType::Lih88 => "LIH 8+8",
        };
        write!(f, "{}", name)
    }
}

/// Per-channel ADC input range (ITC-18 only).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AdcInputRange {
    /// ±10 V.
    Volts10,
    /// ±5 V.
    Volts5,
    /// ±2 V.
    Volts2,
    /// ±1 V.
    Volts1,
}

impl AdcInputRange {
    /// Full-scale voltage of the range.
    pub fn full_scale(self) -> f64 {
        match self {
            AdcInputRange::Volts10 => 10.0,
            AdcInputRange::Volts5 => 5.0,
            AdcInputRange::Volts2 => 2.0,
            AdcInputRange::Volts1 => 1.0,
        }
    }
}

/// Bounds within which a blocking immediate acquisition is allowed.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ImmediateLimits {
    /// Maximum physical DAC channels.
    pub max_dac_channels: usize,
    /// Maximum physical ADC channels.
    pub max_adc_channels: usize,
    /// Maximum samples per channel.
    pub max_samples: usize,
    /// Maximum acquisition duration in seconds.
    pub max_duration_s: f64,
}

impl ImmediateLimits {
    /// Check a request against the limits.
    pub fn permits(
        &self,
        dac_channels: usize,
        adc_channels: usize,
        samples: usize,
        duration_s: f64,
    ) -> bool {
        dac_channels <= self.max_dac_channels
            && adc_channels <= self.max_adc_channels
            && samples <= self.max_samples
            && duration_s <= self.max_duration_s
    }
}

/// Static capabilities of one interface board.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoardInfo {
    /// Interface family.
    pub board_type: BoardType,
    /// Duration of one sample-clock tick in seconds.
    pub seconds_per_tick: f64,
    /// Shortest sample interval per physical channel; a scan of `n`
    /// channels needs at least `n` times this.
    pub min_sampling_time: f64,
    /// Longest supported sample interval.
    pub max_sampling_time: f64,
    /// FIFO depth in samples (all channels together).
    pub fifo_length: usize,
    /// Number of analog DACs.
    pub dac_channels: usize,
    /// Number of analog ADCs.
    pub adc_channels: usize,
    /// Immediate-mode bounds, `None` if the board has no immediate path.
    pub immediate: Option<ImmediateLimits>,
    /// Scans that must follow the last stimulus sample so it reaches the DAC.
    pub stim_end_padding: usize,
    /// Per-channel ADC input range can be selected.
    pub input_range_selectable: bool,
}

impl BoardInfo {
    /// Typical ITC-16 capabilities.
    pub fn itc16() -> Self {
        Self {
            board_type: BoardType::Itc16,
            seconds_per_tick: 1e-6,
            min_sampling_time: 5e-6,
            max_sampling_time: 65_535e-6,
            fifo_length: 16_384,
            dac_channels: 4,
            adc_channels: 8,
            immediate: None,
            stim_end_padding: 1,
            input_range_selectable: false,
        }
    }

    /// Typical ITC-18 capabilities.
    pub fn itc18() -> Self {
        Self {
            board_type: BoardType::Itc18,
            seconds_per_tick: 1.25e-6,
            min_sampling_time: 5e-6,
            max_sampling_time: 81_918.75e-6,
            fifo_length: 262_144,
            dac_channels: 4,
            adc_channels: 8,
            immediate: None,
            stim_end_padding: 3,
            input_range_selectable: true,
        }
    }

    /// Typical LIH 1600 capabilities.
    pub fn lih1600() -> Self {
        Self {
            board_type: BoardType::Lih1600,
            seconds_per_tick: 1e-6,
            min_sampling_time: 2.5e-6,
            max_sampling_time: 1.0,
            fifo_length: 1_048_576,
            dac_channels: 4,
            adc_channels: 16,
            immediate: Some(ImmediateLimits {
                max_dac_channels: 2,
                max_adc_channels: 4,
                max_samples: 1024,
                max_duration_s: 0.1,
            }),
            stim_end_padding: 2,
            input_range_selectable: false,
        }
    }

    /// Typical LIH 8+8 capabilities.
    pub fn lih88() -> Self {
        Self {
            board_type: BoardType::Lih88,
            seconds_per_tick: 1e-6,
            min_sampling_time: 5e-6,
            max_sampling_time: 1.0,
            fifo_length: 1_048_576,
            dac_channels: 4,
            adc_channels: 8,
            immediate: Some(ImmediateLimits {
                max_dac_channels: 4,
                max_adc_channels: 8,
                max_samples: 2048,
                max_duration_s: 0.2,
            }),
            stim_end_padding: 2,
            input_range_selectable: false,
        }
    }

    /// Default capabilities for a board type.
    pub fn for_type(board_type: BoardType) -> Self {
        match board_type {
            BoardType::Itc16 => Self::itc16(),
            BoardType::Itc18 => Self::itc18(),
            BoardType::Lih1600 => Self::lih1600(),
            BoardType::Lih88 => Self::lih88(),
        }
    }

    /// Tick duration as a [`Duration`].
    pub fn tick(&self) -> Duration {
        Duration::from_secs_f64(self.seconds_per_tick)
    }

    /// Whether the board offers the blocking immediate path at all.
    pub fn supports_immediate(&self) -> bool {
        self.immediate.is_some()
    }
}
