//! State of one acquisition session.

use std::fmt;
use std::time::{Duration, Instant};

use clamp_core::error::ClampError;
use clamp_core::transport::AcquisitionMode;

use super::request::AcquisitionRequest;
use crate::topology::Topology;

/// Lifecycle of the engine.
///
/// ```text
/// Idle ──start──> Armed ──clock started──> Running ──┬─ pulsed done ──> Completed ─┐
///   ^                │                        │      └─ fault ────────> Halted ────┤
///   │                └──────── halt ──────────┴──────────────────────────────────── │
///   └──────────────────────────── halt / read(do_halt) / start ────────────────────┘
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum EngineState {
    /// No session.
    #[default]
    Idle,
    /// Hardware armed, waiting for the sample clock (trigger).
    Armed,
    /// Sample clock running.
    Running,
    /// Stopped by an overrun, underrun or bus failure; data already
    /// acquired can still be read.
    Halted,
    /// A pulsed session acquired all of its samples.
    Completed,
}

impl EngineState {
    /// Armed or running.
    pub fn is_active(self) -> bool {
        matches!(self, EngineState::Armed | EngineState::Running)
    }
}

impl fmt::Display for EngineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            EngineState::Idle => "idle",
            EngineState::Armed => "armed",
            EngineState::Running => "running",
            EngineState::Halted => "halted",
            EngineState::Completed => "completed",
        };
        write!(f, "{}", label)
    }
}

/// FIFO boundary condition seen by [`available`](super::AcquisitionEngine::available).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FifoCondition {
    /// More unread ADC samples than the FIFO holds.
    Overrun {
        /// Unread samples per channel.
        backlog: u64,
        /// FIFO capacity per channel.
        capacity: u64,
    },
    /// The sample clock passed the last DAC sample written.
    Underrun {
        /// Samples clocked per channel.
        clocked: u64,
        /// DAC samples written per channel.
        written: u64,
    },
}

impl From<FifoCondition> for ClampError {
    fn from(condition: FifoCondition) -> Self {
        match condition {
            FifoCondition::Overrun { backlog, capacity } => {
                ClampError::Overrun { backlog, capacity }
            }
            FifoCondition::Underrun { clocked, written } => {
                ClampError::Underrun { clocked, written }
            }
        }
    }
}

/// Answer of [`available`](super::AcquisitionEngine::available).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Availability {
    /// Samples per requested ADC channel ready to read.
    pub samples: usize,
    /// The session is still armed or running.
    pub still_running: bool,
    /// Boundary condition detected by this call.
    pub condition: Option<FifoCondition>,
}

/// Counters of the current (or last) session.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionStats {
    /// Samples per channel read by the client.
    pub samples_read: u64,
    /// Samples per channel appended after start.
    pub samples_appended: u64,
    /// Samples per channel clocked by the hardware.
    pub samples_clocked: u64,
    /// Overruns tolerated because of `DONT_STOP_ADC_ON_OVERRUN`.
    pub overruns: u64,
    /// Underruns tolerated because of `DONT_STOP_DAC_ON_UNDERRUN`.
    pub underruns: u64,
    /// Largest unread backlog seen, per channel.
    pub peak_backlog: u64,
    /// Time since the session was armed.
    pub elapsed: Duration,
    /// Backlog relative to capacity (0.0 - 1.0).
    pub buffer_fill: f64,
}

/// Per-physical-channel FIFO position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelCursor {
    /// Raw channel index.
    pub channel: u16,
    /// Samples transferred through this slot.
    pub samples: u64,
}

/// Engine-owned state of an armed or finished session.
#[derive(Debug)]
pub(crate) struct Session {
    pub(crate) request: AcquisitionRequest,
    pub(crate) topology: Topology,
    pub(crate) capacity: u64,
    /// Scans the hardware clocks for a pulsed session.
    pub(crate) total_scans: Option<u64>,
    pub(crate) dac_cursors: Vec<ChannelCursor>,
    pub(crate) adc_cursors: Vec<ChannelCursor>,
    pub(crate) appended: u64,
    pub(crate) produced: u64,
    pub(crate) stim_ended: bool,
    pub(crate) overflowing: bool,
    pub(crate) underflowing: bool,
    pub(crate) last_scan: Vec<i16>,
    pub(crate) started_at: Instant,
    pub(crate) stats: SessionStats,
}

impl Session {
    pub(crate) fn new(
        request: AcquisitionRequest,
        topology: Topology,
        capacity: u64,
        stimulus_scans: u64,
    ) -> Self {
        let total_scans = (!request.read_continuously)
            .then(|| request.dac_samples.max(request.adc_samples) as u64);
        let dac_cursors = topology
            .physical_dac
            .iter()
            .map(|&channel| ChannelCursor {
                channel,
                samples: stimulus_scans,
            })
            .collect();
        let adc_cursors = topology
            .physical_adc
            .iter()
            .map(|&channel| ChannelCursor {
                channel,
                samples: 0,
            })
            .collect();
        let stim_ended = request.set_stim_end;
        Self {
            request,
            topology,
            capacity,
            total_scans,
            dac_cursors,
            adc_cursors,
            appended: 0,
            produced: 0,
            stim_ended,
            overflowing: false,
            underflowing: false,
            last_scan: Vec::new(),
            started_at: Instant::now(),
            stats: SessionStats::default(),
        }
    }

    /// DAC samples written per channel, initial stimulus included. All slots
    /// advance in lockstep.
    pub(crate) fn dac_written(&self) -> u64 {
        self.dac_cursors.iter().map(|c| c.samples).min().unwrap_or(0)
    }

    /// ADC samples consumed per channel.
    pub(crate) fn consumed(&self) -> u64 {
        self.adc_cursors.iter().map(|c| c.samples).min().unwrap_or(0)
    }

    pub(crate) fn advance_dac(&mut self, scans: u64) {
        for cursor in &mut self.dac_cursors {
            cursor.samples += scans;
        }
    }

    pub(crate) fn advance_adc(&mut self, scans: u64) {
        for cursor in &mut self.adc_cursors {
            cursor.samples += scans;
        }
    }

    /// ADC samples per channel the hardware has delivered and the client
    /// may read.
    pub(crate) fn readable(&self) -> u64 {
        let limit = if self.request.read_continuously {
            self.produced
        } else {
            self.produced.min(self.request.adc_samples as u64)
        };
        limit.saturating_sub(self.consumed())
    }

    /// Unread backlog the FIFO has to hold.
    pub(crate) fn backlog(&self) -> u64 {
        self.produced.saturating_sub(self.consumed())
    }

    /// Samples per channel that may still be appended.
    pub(crate) fn credit(&self) -> u64 {
        self.consumed().saturating_sub(self.appended)
    }

    pub(crate) fn pulsed_done(&self) -> bool {
        matches!(self.total_scans, Some(total) if self.produced >= total)
    }

    /// Underrun is only meaningful while the client still owes stimulus.
    pub(crate) fn watches_underrun(&self) -> bool {
        self.request.read_continuously
            && self.request.mode.contains(AcquisitionMode::ENABLE_DAC_OUTPUT)
            && !self.stim_ended
    }

    pub(crate) fn refresh_stats(&mut self) {
        let backlog = self.backlog();
        self.stats.samples_clocked = self.produced;
        self.stats.peak_backlog = self.stats.peak_backlog.max(backlog);
        self.stats.elapsed = self.started_at.elapsed();
        self.stats.buffer_fill = if self.capacity > 0 {
            (backlog as f64 / self.capacity as f64).min(1.0)
        } else {
            0.0
        };
    }

    pub(crate) fn view(&self, state: EngineState) -> SessionView<'_> {
        SessionView {
            session: self,
            state,
        }
    }
}

/// Read-only view of the current session.
#[derive(Debug, Clone, Copy)]
pub struct SessionView<'a> {
    session: &'a Session,
    state: EngineState,
}

impl SessionView<'_> {
    /// Engine state.
    pub fn state(&self) -> EngineState {
        self.state
    }

    /// The request the session was started with, stimulus end forced for
    /// pulsed sessions.
    pub fn request(&self) -> &AcquisitionRequest {
        &self.session.request
    }

    /// Resolved physical layout and interval.
    pub fn topology(&self) -> &Topology {
        &self.session.topology
    }

    /// FIFO capacity per channel.
    pub fn capacity(&self) -> u64 {
        self.session.capacity
    }

    /// DAC cursors, one per physical channel.
    pub fn dac_cursors(&self) -> &[ChannelCursor] {
        &self.session.dac_cursors
    }

    /// ADC cursors, one per physical channel.
    pub fn adc_cursors(&self) -> &[ChannelCursor] {
        &self.session.adc_cursors
    }

    /// Samples per channel that may still be appended.
    pub fn append_credit(&self) -> u64 {
        self.session.credit()
    }

    /// Whether the stimulus has been ended.
    pub fn stim_ended(&self) -> bool {
        self.session.stim_ended
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clamp_core::channel::{AdcChannel, DacChannel};
    use clamp_core::transport::SampleInterval;

    fn session(continuous: bool) -> Session {
        let request = AcquisitionRequest {
            dac_channels: vec![DacChannel::Analog(0)],
            adc_channels: vec![AdcChannel::Analog(0), AdcChannel::Analog(1)],
            dac_samples: 100,
            adc_samples: 100,
            mode: AcquisitionMode::ENABLE_DAC_OUTPUT,
            read_continuously: continuous,
            ..AcquisitionRequest::default()
        };
        let topology = Topology {
            requested_dac: request.dac_channels.clone(),
            requested_adc: request.adc_channels.clone(),
            physical_dac: vec![0],
            physical_adc: vec![0, 1],
            interval: SampleInterval {
                ticks: 100,
                seconds: 1e-4,
            },
            interval_adjusted: false,
        };
        Session::new(request, topology, 1000, 100)
    }

    #[test]
    fn test_credit_follows_consumption() {
        let mut s = session(true);
        assert_eq!(s.credit(), 0);
        s.produced = 40;
        s.advance_adc(30);
        assert_eq!(s.credit(), 30);
        s.appended = 30;
        s.advance_dac(30);
        assert_eq!(s.credit(), 0);
        assert_eq!(s.dac_written(), 130);
        assert_eq!(s.readable(), 10);
    }

    #[test]
    fn test_pulsed_readable_capped_by_record() {
        let mut s = session(false);
        s.produced = 100;
        assert!(s.pulsed_done());
        assert_eq!(s.readable(), 100);
        assert!(!s.watches_underrun());
    }

    #[test]
    fn test_fill_level() {
        let mut s = session(true);
        s.produced = 250;
        s.refresh_stats();
        assert_eq!(s.stats.peak_backlog, 250);
        assert!((s.stats.buffer_fill - 0.25).abs() < 1e-12);
    }

    #[test]
    fn test_state_display() {
        assert_eq!(EngineState::Completed.to_string(), "completed");
        assert!(EngineState::Armed.is_active());
        assert!(!EngineState::Halted.is_active());
    }
}
