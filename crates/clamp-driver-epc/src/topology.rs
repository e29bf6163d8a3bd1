//! Physical channel layout and sample interval negotiation.
//!
//! The interface can only clock certain numbers of channels per scan. A
//! request for `n` channels is widened to the smallest supported count
//! `≥ n`, and the physical list is filled by cycling the requested one:
//!
//! ```text
//! requested ADC:  [0, 3, 5]          (3 channels)
//! physical ADC:   [0, 3, 5, 0]       (4 channels, last slot discarded)
//! ```
//!
//! The sample interval is a whole number of board ticks. The requested
//! interval is rounded to the nearest tick (ties round up), then clamped to
//! what the board can clock for the physical channel count.

use std::collections::HashSet;

use clamp_core::board::BoardInfo;
use clamp_core::channel::{AdcChannel, DacChannel, Direction};
use clamp_core::error::{ClampError, Result};
use clamp_core::transport::SampleInterval;
use tracing::{debug, warn};

/// Channel counts the interface can clock per scan.
pub const PHYSICAL_CHANNEL_COUNTS: [usize; 8] = [1, 2, 4, 5, 8, 10, 16, 20];

/// Largest physical channel count.
pub const MAX_PHYSICAL_CHANNELS: usize = 20;

/// Relative tolerance for tick arithmetic, absorbs binary rounding of
/// decimal intervals such as `2.5e-6 / 1e-6`.
const TICK_EPSILON: f64 = 1e-9;

/// Smallest supported physical count `≥ requested`; zero stays zero.
pub fn physical_count(direction: Direction, requested: usize) -> Result<usize> {
    if requested == 0 {
        return Ok(0);
    }
    PHYSICAL_CHANNEL_COUNTS
        .iter()
        .copied()
        .find(|&count| count >= requested)
        .ok_or(ClampError::TooManyChannels {
            direction,
            requested,
            max: MAX_PHYSICAL_CHANNELS,
        })
}

/// Common physical count of a DAC and an ADC request: the count both lists
/// are widened to when the board clocks them in lockstep.
pub fn physical_channels(dac: usize, adc: usize) -> Result<usize> {
    let dac = physical_count(Direction::Dac, dac)?;
    let adc = physical_count(Direction::Adc, adc)?;
    Ok(dac.max(adc))
}

/// Fill `count` slots by cycling `requested`.
fn pad_cycling(requested: &[u16], count: usize) -> Vec<u16> {
    requested.iter().copied().cycle().take(count).collect()
}

/// Resolved layout of one acquisition.
#[derive(Debug, Clone, PartialEq)]
pub struct Topology {
    /// DAC list as requested.
    pub requested_dac: Vec<DacChannel>,
    /// ADC list as requested.
    pub requested_adc: Vec<AdcChannel>,
    /// Physical DAC list (raw indices), padded by cycling.
    pub physical_dac: Vec<u16>,
    /// Physical ADC list (raw indices), padded by cycling.
    pub physical_adc: Vec<u16>,
    /// Granted sample interval.
    pub interval: SampleInterval,
    /// The granted interval differs from the request.
    pub interval_adjusted: bool,
}

impl Topology {
    /// Physical DAC channel count.
    pub fn physical_dac_count(&self) -> usize {
        self.physical_dac.len()
    }

    /// Physical ADC channel count.
    pub fn physical_adc_count(&self) -> usize {
        self.physical_adc.len()
    }

    /// Larger of the two physical counts.
    pub fn physical_channels(&self) -> usize {
        self.physical_dac.len().max(self.physical_adc.len())
    }
}

/// Channel and interval rules of one board.
#[derive(Debug, Clone, Copy)]
pub struct ChannelTopology<'a> {
    board: &'a BoardInfo,
}

impl<'a> ChannelTopology<'a> {
    /// Rules of `board`.
    pub fn new(board: &'a BoardInfo) -> Self {
        Self { board }
    }

    /// Check a DAC list: known identifiers within the board, no repeats.
    pub fn validate_dac(&self, channels: &[DacChannel]) -> Result<()> {
        let mut seen = HashSet::new();
        for channel in channels {
            if let DacChannel::Analog(index) = channel {
                if *index as usize >= self.board.dac_channels {
                    return Err(ClampError::InvalidChannel {
                        direction: Direction::Dac,
                        channel: channel.raw(),
                        reason: format!("{} has {} DACs", self.board.board_type, self.board.dac_channels),
                    });
                }
            }
            if !seen.insert(channel.raw()) {
                return Err(ClampError::DuplicateChannel {
                    direction: Direction::Dac,
                    channel: channel.raw(),
                });
            }
        }
        physical_count(Direction::Dac, channels.len()).map(|_| ())
    }

    /// Check an ADC list: known identifiers within the board, no repeats.
    pub fn validate_adc(&self, channels: &[AdcChannel]) -> Result<()> {
        let mut seen = HashSet::new();
        for channel in channels {
            if let AdcChannel::Analog(index) = channel {
                if *index as usize >= self.board.adc_channels {
                    return Err(ClampError::InvalidChannel {
                        direction: Direction::Adc,
                        channel: channel.raw(),
                        reason: format!("{} has {} ADCs", self.board.board_type, self.board.adc_channels),
                    });
                }
            }
            if !seen.insert(channel.raw()) {
                return Err(ClampError::DuplicateChannel {
                    direction: Direction::Adc,
                    channel: channel.raw(),
                });
            }
        }
        physical_count(Direction::Adc, channels.len()).map(|_| ())
    }

    /// Interval the board would grant for `requested` seconds with
    /// `physical_channels` channels per scan.
    pub fn check_sample_interval(
        &self,
        requested: f64,
        physical_channels: usize,
    ) -> Result<SampleInterval> {
        if !(requested.is_finite() && requested > 0.0) {
            return Err(ClampError::InvalidParameter(format!(
                "sample interval must be positive, got {}",
                requested
            )));
        }
        let tick = self.board.seconds_per_tick;
        let ratio = requested / tick;
        let nearest = (ratio + 0.5 + TICK_EPSILON * ratio.max(1.0)).floor();

        let shortest = self.board.min_sampling_time * physical_channels.max(1) as f64 / tick;
        let min_ticks = (shortest - TICK_EPSILON * shortest.max(1.0)).ceil().max(1.0);
        let longest = self.board.max_sampling_time / tick;
        let max_ticks = (longest + TICK_EPSILON * longest.max(1.0)).floor();
        if min_ticks > max_ticks {
            return Err(ClampError::UnsupportedCombination(format!(
                "{} physical channels cannot be clocked within {} s",
                physical_channels, self.board.max_sampling_time
            )));
        }

        let ticks = nearest.clamp(min_ticks, max_ticks) as u64;
        Ok(SampleInterval {
            ticks,
            seconds: ticks as f64 * tick,
        })
    }

    /// Validate both lists and compute the physical layout and granted
    /// interval.
    pub fn resolve(
        &self,
        dac: &[DacChannel],
        adc: &[AdcChannel],
        requested_interval: f64,
    ) -> Result<Topology> {
        self.validate_dac(dac)?;
        self.validate_adc(adc)?;
        if dac.is_empty() && adc.is_empty() {
            return Err(ClampError::UnsupportedCombination(
                "at least one DAC or ADC channel is required".to_string(),
            ));
        }

        let dac_count = physical_count(Direction::Dac, dac.len())?;
        let adc_count = physical_count(Direction::Adc, adc.len())?;
        let dac_raw: Vec<u16> = dac.iter().map(|c| c.raw()).collect();
        let adc_raw: Vec<u16> = adc.iter().map(|c| c.raw()).collect();

        let interval = self.check_sample_interval(requested_interval, dac_count.max(adc_count))?;
        let interval_adjusted =
            (interval.seconds - requested_interval).abs() > TICK_EPSILON * requested_interval;

        if dac_count != dac.len() || adc_count != adc.len() {
            warn!(
                requested_dac = dac.len(),
                requested_adc = adc.len(),
                physical_dac = dac_count,
                physical_adc = adc_count,
                "channel lists padded to physical counts"
            );
        }
        if interval_adjusted {
            warn!(
                requested_s = requested_interval,
                granted_s = interval.seconds,
                ticks = interval.ticks,
                "sample interval adjusted"
            );
        }
        debug!(
            board = %self.board.board_type,
            physical_dac = dac_count,
            physical_adc = adc_count,
            interval_s = interval.seconds,
            "topology resolved"
        );

        Ok(Topology {
            requested_dac: dac.to_vec(),
            requested_adc: adc.to_vec(),
            physical_dac: pad_cycling(&dac_raw, dac_count),
            physical_adc: pad_cycling(&adc_raw, adc_count),
            interval,
            interval_adjusted,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clamp_core::channel::Unit;

    #[test]
    fn test_physical_count_table() {
        let expected = [
            (0, 0),
            (1, 1),
            (2, 2),
            (3, 4),
            (4, 4),
            (5, 5),
            (6, 8),
            (8, 8),
            (9, 10),
            (11, 16),
            (16, 16),
            (17, 20),
            (20, 20),
        ];
        for (requested, physical) in expected {
            assert_eq!(
                physical_count(Direction::Adc, requested).unwrap(),
                physical,
                "request {}",
                requested
            );
        }
        assert!(matches!(
            physical_count(Direction::Dac, 21),
            Err(ClampError::TooManyChannels { max: 20, .. })
        ));
    }

    #[test]
    fn test_physical_channels_is_common_count() {
        assert_eq!(physical_channels(2, 3).unwrap(), 4);
        assert_eq!(physical_channels(0, 9).unwrap(), 10);
        assert_eq!(physical_channels(0, 0).unwrap(), 0);
    }

    #[test]
    fn test_padding_cycles() {
        assert_eq!(pad_cycling(&[0, 3, 5], 4), vec![0, 3, 5, 0]);
        assert_eq!(pad_cycling(&[7, 1, 2], 5), vec![7, 1, 2, 7, 1]);
        assert!(pad_cycling(&[], 0).is_empty());
    }

    #[test]
    fn test_interval_ties_round_up() {
        let board = BoardInfo::lih88();
        let topo = ChannelTopology::new(&board);
        let granted = topo.check_sample_interval(10.5e-6, 1).unwrap();
        assert_eq!(granted.ticks, 11);
        let granted = topo.check_sample_interval(10.4e-6, 1).unwrap();
        assert_eq!(granted.ticks, 10);

        let itc = BoardInfo::itc18();
        let granted = ChannelTopology::new(&itc)
            .check_sample_interval(10.625e-6, 1)
            .unwrap();
        assert_eq!(granted.ticks, 9);
        assert!((granted.seconds - 11.25e-6).abs() < 1e-15);
    }

    #[test]
    fn test_interval_clamped() {
        let board = BoardInfo::lih88();
        let topo = ChannelTopology::new(&board);
        // 5 µs per channel, 4 physical channels.
        let granted = topo.check_sample_interval(1e-6, 4).unwrap();
        assert_eq!(granted.ticks, 20);
        let granted = topo.check_sample_interval(10.0, 1).unwrap();
        assert_eq!(granted.ticks, 1_000_000);
        assert!(topo.check_sample_interval(0.0, 1).is_err());
        assert!(topo.check_sample_interval(f64::NAN, 1).is_err());
    }

    #[test]
    fn test_resolve_pulsed_layout() {
        let board = BoardInfo::lih88();
        let topology = ChannelTopology::new(&board)
            .resolve(
                &[DacChannel::Analog(0), DacChannel::Analog(1)],
                &[
                    AdcChannel::Analog(0),
                    AdcChannel::Analog(2),
                    AdcChannel::DigitalIn(Unit::First),
                ],
                1e-4,
            )
            .unwrap();
        assert_eq!(topology.physical_dac, vec![0, 1]);
        assert_eq!(topology.physical_adc, vec![0, 2, 16, 0]);
        assert_eq!(topology.interval.ticks, 100);
        assert!(!topology.interval_adjusted);
        assert_eq!(topology.physical_channels(), 4);
    }

    #[test]
    fn test_duplicates_and_bounds_rejected() {
        let board = BoardInfo::lih88();
        let topo = ChannelTopology::new(&board);
        assert!(matches!(
            topo.validate_adc(&[AdcChannel::Analog(1), AdcChannel::Analog(1)]),
            Err(ClampError::DuplicateChannel { channel: 1, .. })
        ));
        assert!(matches!(
            topo.validate_dac(&[DacChannel::Analog(6)]),
            Err(ClampError::InvalidChannel { channel: 6, .. })
        ));
        assert!(topo
            .validate_dac(&[DacChannel::Analog(0), DacChannel::DigitalOut(Unit::First)])
            .is_ok());
        assert!(topo.resolve(&[], &[], 1e-4).is_err());
    }

    #[tracing_test::traced_test]
    #[test]
    fn test_adjusted_interval_is_logged() {
        let board = BoardInfo::lih88();
        ChannelTopology::new(&board)
            .resolve(&[], &[AdcChannel::Analog(0)], 12.3e-6)
            .unwrap();
        assert!(logs_contain("sample interval adjusted"));
    }
}
