//! Amplifier boards and their deferred settings.
//!
//! An [`Amplifier`] owns one [`CommandCache`] and one [`AmplifierSettings`]
//! snapshot per board. Commands are addressed through a [`BoardSession`]
//! obtained from [`Amplifier::with_board`]; there is no process-wide active
//! board, and switching boards never flushes anything.
//!
//! Setters validate, record the value locally and enqueue the command.
//! Getters return the last locally accepted value; the hardware is never
//! re-queried.
//!
//! # Example
//!
//! ```rust,ignore
//! let mut board = system.amplifier_mut().with_board(0)?;
//! board.set_mode(ClampMode::VoltageClamp, false);
//! board.set_current_gain(1e9)?;
//! board.set_v_hold(-0.07);
//! board.flush()?;
//! ```

use std::thread;
use std::time::Duration;

use clamp_core::command::{
    AmplifierKind, AmplifierSetting, CSlowRange, CcGain, CcTrackTau, ClampMode, ExtStimPath,
    Filter1, GainIndex, RsMode,
};
use clamp_core::error::{ClampError, Result};
use serde::Serialize;
use tracing::{debug, info};

use crate::bus::BusContext;
use crate::cache::{CommandCache, FlushBeforeStart};

// =============================================================================
// Settings Snapshot
// =============================================================================

/// Locally accepted value of every amplifier parameter of one board.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AmplifierSettings {
    /// Clamp mode.
    pub mode: ClampMode,
    /// Current gain selector.
    pub current_gain: GainIndex,
    /// Current-clamp output range.
    pub cc_gain: CcGain,
    /// Holding potential (V).
    pub v_hold: f64,
    /// Current-clamp holding current (A).
    pub cc_i_hold: f64,
    /// Liquid junction potential (V).
    pub v_liquid_junction: f64,
    /// Pipette offset (V).
    pub vp_offset: f64,
    /// CFast total (F).
    pub c_fast_total: f64,
    /// CFast tau (s).
    pub c_fast_tau: f64,
    /// CSlow range.
    pub c_slow_range: CSlowRange,
    /// CSlow (F).
    pub c_slow: f64,
    /// Series conductance (S).
    pub g_series: f64,
    /// Rs compensation speed.
    pub rs_mode: RsMode,
    /// Rs compensation fraction `0.0..=1.0`.
    pub rs_fraction: f64,
    /// Leak conductance (S).
    pub g_leak: f64,
    /// Filter 1.
    pub filter1: Filter1,
    /// Filter 2 bandwidth (Hz).
    pub filter2_bandwidth: f64,
    /// Filter 2 Butterworth instead of Bessel.
    pub filter2_butterworth: bool,
    /// Stimulus filter on.
    pub stim_filter: bool,
    /// Low-frequency voltage clamp target (V).
    pub cc_track_hold: f64,
    /// Low-frequency voltage clamp speed.
    pub cc_track_tau: CcTrackTau,
    /// Voltage monitor ×100.
    pub vmon_x100: bool,
    /// Fast current-clamp speed.
    pub cc_fast_speed: bool,
    /// External stimulus scale.
    pub ext_stim_factor: f64,
    /// External stimulus routing.
    pub ext_stim_path: ExtStimPath,
    /// CSlow measurement cycles.
    pub c_slow_cycles: u32,
    /// CSlow test pulse amplitude (V).
    pub c_slow_peak: f64,
    /// Probe selector position (1-based).
    pub selector: u32,
}

impl Default for AmplifierSettings {
    fn default() -> Self {
        Self {
            mode: ClampMode::VoltageClamp,
            current_gain: GainIndex::default(),
            cc_gain: CcGain::default(),
            v_hold: 0.0,
            cc_i_hold: 0.0,
            v_liquid_junction: 0.0,
            vp_offset: 0.0,
            c_fast_total: 0.0,
            c_fast_tau: 0.0,
            c_slow_range: CSlowRange::Off,
            c_slow: 0.0,
            g_series: 0.0,
            rs_mode: RsMode::Off,
            rs_fraction: 0.0,
            g_leak: 0.0,
            filter1: Filter1::default(),
            filter2_bandwidth: 3e3,
            filter2_butterworth: false,
            stim_filter: false,
            cc_track_hold: 0.0,
            cc_track_tau: CcTrackTau::Off,
            vmon_x100: false,
            cc_fast_speed: false,
            ext_stim_factor: 1.0,
            ext_stim_path: ExtStimPath::Off,
            c_slow_cycles: 1,
            c_slow_peak: 0.01,
            selector: 1,
        }
    }
}

impl AmplifierSettings {
    /// Record `setting` as accepted.
    fn apply(&mut self, setting: AmplifierSetting) {
        match setting {
            AmplifierSetting::Mode { mode, .. } => self.mode = mode,
            AmplifierSetting::CurrentGain(gain) => self.current_gain = gain,
            AmplifierSetting::CcGain(gain) => self.cc_gain = gain,
            AmplifierSetting::VHold(v) => self.v_hold = v,
            AmplifierSetting::CcIHold(i) => self.cc_i_hold = i,
            AmplifierSetting::VLiquidJunction(v) => self.v_liquid_junction = v,
            AmplifierSetting::VpOffset(v) => self.vp_offset = v,
            AmplifierSetting::CFastTotal(c) => self.c_fast_total = c,
            AmplifierSetting::CFastTau(t) => self.c_fast_tau = t,
            AmplifierSetting::CSlowRange(range) => self.c_slow_range = range,
            AmplifierSetting::CSlow(c) => self.c_slow = c,
            AmplifierSetting::GSeries(g) => self.g_series = g,
            AmplifierSetting::RsMode(mode) => self.rs_mode = mode,
            AmplifierSetting::RsFraction(f) => self.rs_fraction = f,
            AmplifierSetting::GLeak(g) => self.g_leak = g,
            AmplifierSetting::Filter1(filter) => self.filter1 = filter,
            AmplifierSetting::Filter2Bandwidth(hz) => self.filter2_bandwidth = hz,
            AmplifierSetting::Filter2Butterworth(on) => self.filter2_butterworth = on,
            AmplifierSetting::StimFilter(on) => self.stim_filter = on,
            AmplifierSetting::CcTrackHold(v) => self.cc_track_hold = v,
            AmplifierSetting::CcTrackTau(tau) => self.cc_track_tau = tau,
            AmplifierSetting::VmonX100(on) => self.vmon_x100 = on,
            AmplifierSetting::CcFastSpeed(on) => self.cc_fast_speed = on,
            AmplifierSetting::ExtStimPath { factor, path } => {
                self.ext_stim_factor = factor;
                self.ext_stim_path = path;
            }
            AmplifierSetting::CSlowCycles(n) => self.c_slow_cycles = n,
            AmplifierSetting::CSlowPeak(v) => self.c_slow_peak = v,
            AmplifierSetting::Selector(position) => self.selector = position,
            AmplifierSetting::Reset => self.reset(),
        }
    }

    /// Defaults, except the holding and offset potentials, the CSlow and
    /// series conductance values and the CC fast speed, which survive a
    /// reset. CSlow and Rs compensation come back switched off.
    fn reset(&mut self) {
        let kept = std::mem::take(self);
        self.v_hold = kept.v_hold;
        self.vp_offset = kept.vp_offset;
        self.v_liquid_junction = kept.v_liquid_junction;
        self.cc_track_hold = kept.cc_track_hold;
        self.c_slow = kept.c_slow;
        self.g_series = kept.g_series;
        self.cc_fast_speed = kept.cc_fast_speed;
        self.selector = kept.selector;
        self.c_slow_range = CSlowRange::Off;
        self.rs_mode = RsMode::Off;
    }
}

// =============================================================================
// Amplifier
// =============================================================================

#[derive(Debug, Clone)]
struct BoardState {
    cache: CommandCache,
    settings: AmplifierSettings,
}

/// All amplifier boards behind one interface.
#[derive(Debug)]
pub struct Amplifier {
    kind: AmplifierKind,
    bus: BusContext,
    max_probes: u32,
    boards: Vec<BoardState>,
}

impl Amplifier {
    /// `board_count` boards of `kind`, each with an empty cache and default
    /// settings.
    pub fn new(kind: AmplifierKind, board_count: usize, max_probes: u32, bus: BusContext) -> Self {
        let boards = (0..board_count)
            .map(|index| BoardState {
                cache: CommandCache::new(index),
                settings: AmplifierSettings::default(),
            })
            .collect();
        Self {
            kind,
            bus,
            max_probes,
            boards,
        }
    }

    /// Amplifier model.
    pub fn kind(&self) -> AmplifierKind {
        self.kind
    }

    /// Number of computer-controlled boards.
    pub fn board_count(&self) -> usize {
        self.boards.len()
    }

    /// Bind to one board.
    pub fn with_board(&mut self, index: usize) -> Result<BoardSession<'_>> {
        let count = self.boards.len();
        let result = match self.boards.get_mut(index) {
            Some(state) => Ok(BoardSession {
                index,
                state,
                bus: &self.bus,
                max_probes: self.max_probes,
            }),
            None if count == 0 => Err(ClampError::InvalidParameter(format!(
                "{} has no computer-controlled amplifier boards",
                self.kind
            ))),
            None => Err(ClampError::InvalidParameter(format!(
                "amplifier board {} out of range 0..{}",
                index, count
            ))),
        };
        match result {
            Ok(session) => Ok(session),
            Err(err) => {
                self.bus.last_error().record(&err);
                Err(err)
            }
        }
    }

    /// Commands pending on every board.
    pub fn pending(&self) -> usize {
        self.boards.iter().map(|b| b.cache.len()).sum()
    }

    /// Flush every board in index order.
    pub fn flush_all(&mut self) -> Result<usize> {
        let mut sent = 0;
        for index in 0..self.boards.len() {
            sent += self.with_board(index)?.flush()?;
        }
        Ok(sent)
    }

    /// Put every board in voltage clamp and flush. Keeps going past
    /// failing boards and returns the first error.
    pub(crate) fn enter_safe_state(&mut self) -> Result<()> {
        let mut first_error = None;
        for index in 0..self.boards.len() {
            let result = self.with_board(index).and_then(|mut board| {
                board.set_mode(ClampMode::VoltageClamp, false);
                board.flush().map(|_| ())
            });
            if let Err(err) = result {
                first_error.get_or_insert(err);
            }
        }
        first_error.map_or(Ok(()), Err)
    }
}

// =============================================================================
// BoardSession
// =============================================================================

/// Setters and getters bound to one amplifier board.
pub struct BoardSession<'a> {
    index: usize,
    state: &'a mut BoardState,
    bus: &'a BusContext,
    max_probes: u32,
}

impl std::fmt::Debug for BoardSession<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BoardSession")
            .field("index", &self.index)
            .field("pending", &self.state.cache.len())
            .finish_non_exhaustive()
    }
}

impl BoardSession<'_> {
    fn push(&mut self, setting: AmplifierSetting) {
        self.state.settings.apply(setting);
        self.state.cache.enqueue(setting);
    }

    fn reject<T>(&self, err: ClampError) -> Result<T> {
        self.bus.last_error().record(&err);
        Err(err)
    }

    /// Board index.
    pub fn index(&self) -> usize {
        self.index
    }

    /// Snapshot of every locally accepted value.
    pub fn settings(&self) -> &AmplifierSettings {
        &self.state.settings
    }

    /// Commands waiting for the next flush.
    pub fn pending(&self) -> usize {
        self.state.cache.len()
    }

    /// Transmit pending commands now.
    pub fn flush(&mut self) -> Result<usize> {
        let timeout = self.bus.timeout();
        self.bus.track(self.state.cache.flush(self.bus, timeout))
    }

    /// Flush, then sleep for `seconds` so the amplifier can settle.
    pub fn flush_then_wait(&mut self, seconds: f64) -> Result<()> {
        if !(seconds.is_finite() && seconds >= 0.0) {
            return self.reject(ClampError::InvalidParameter(format!(
                "wait time must be non-negative, got {}",
                seconds
            )));
        }
        let wait = match Duration::try_from_secs_f64(seconds) {
            Ok(wait) => wait,
            Err(err) => {
                return self.reject(ClampError::InvalidParameter(format!(
                    "wait time of {} s out of range: {}",
                    seconds, err
                )))
            }
        };
        self.flush()?;
        thread::sleep(wait);
        Ok(())
    }

    /// Return the board to its reset state; see [`AmplifierSettings`] for
    /// what survives.
    pub fn reset(&mut self) {
        info!(board = self.index, "amplifier board reset");
        self.push(AmplifierSetting::Reset);
    }

    // ===== Mode and gains =====

    /// Switch clamp mode; `gently` minimizes the transient.
    pub fn set_mode(&mut self, mode: ClampMode, gently: bool) {
        self.push(AmplifierSetting::Mode { mode, gently });
    }

    /// Clamp mode.
    pub fn mode(&self) -> ClampMode {
        self.state.settings.mode
    }

    /// Select the gain nearest to `ohms` (V/A). Returns the gain selected.
    pub fn set_current_gain(&mut self, ohms: f64) -> Result<f64> {
        match GainIndex::nearest(ohms) {
            Ok(gain) => {
                debug!(board = self.index, requested = ohms, granted = gain.ohms(), "current gain");
                self.push(AmplifierSetting::CurrentGain(gain));
                Ok(gain.ohms())
            }
            Err(err) => self.reject(err),
        }
    }

    /// Current gain in ohms.
    pub fn current_gain(&self) -> f64 {
        self.state.settings.current_gain.ohms()
    }

    /// Select a gain by raw index.
    pub fn set_current_gain_index(&mut self, index: u8) -> Result<()> {
        match GainIndex::new(index) {
            Ok(gain) => {
                self.push(AmplifierSetting::CurrentGain(gain));
                Ok(())
            }
            Err(err) => self.reject(err),
        }
    }

    /// Raw gain index.
    pub fn current_gain_index(&self) -> u8 {
        self.state.settings.current_gain.index()
    }

    /// Current-clamp output range.
    pub fn set_cc_gain(&mut self, gain: CcGain) {
        self.push(AmplifierSetting::CcGain(gain));
    }

    /// Current-clamp output range.
    pub fn cc_gain(&self) -> CcGain {
        self.state.settings.cc_gain
    }

    // ===== Potentials and currents =====

    /// Holding potential (V).
    pub fn set_v_hold(&mut self, volts: f64) {
        self.push(AmplifierSetting::VHold(volts));
    }

    /// Holding potential (V).
    pub fn v_hold(&self) -> f64 {
        self.state.settings.v_hold
    }

    /// Current-clamp holding current (A).
    pub fn set_cc_i_hold(&mut self, amperes: f64) {
        self.push(AmplifierSetting::CcIHold(amperes));
    }

    /// Current-clamp holding current (A).
    pub fn cc_i_hold(&self) -> f64 {
        self.state.settings.cc_i_hold
    }

    /// Liquid junction potential (V).
    pub fn set_v_liquid_junction(&mut self, volts: f64) {
        self.push(AmplifierSetting::VLiquidJunction(volts));
    }

    /// Liquid junction potential (V).
    pub fn v_liquid_junction(&self) -> f64 {
        self.state.settings.v_liquid_junction
    }

    /// Pipette offset (V).
    pub fn set_vp_offset(&mut self, volts: f64) {
        self.push(AmplifierSetting::VpOffset(volts));
    }

    /// Pipette offset (V).
    pub fn vp_offset(&self) -> f64 {
        self.state.settings.vp_offset
    }

    // ===== Compensation =====

    /// CFast total (F).
    pub fn set_c_fast_total(&mut self, farads: f64) {
        self.push(AmplifierSetting::CFastTotal(farads));
    }

    /// CFast total (F).
    pub fn c_fast_total(&self) -> f64 {
        self.state.settings.c_fast_total
    }

    /// CFast tau (s).
    pub fn set_c_fast_tau(&mut self, seconds: f64) {
        self.push(AmplifierSetting::CFastTau(seconds));
    }

    /// CFast tau (s).
    pub fn c_fast_tau(&self) -> f64 {
        self.state.settings.c_fast_tau
    }

    /// CSlow range.
    pub fn set_c_slow_range(&mut self, range: CSlowRange) {
        self.push(AmplifierSetting::CSlowRange(range));
    }

    /// CSlow range.
    pub fn c_slow_range(&self) -> CSlowRange {
        self.state.settings.c_slow_range
    }

    /// CSlow (F).
    pub fn set_c_slow(&mut self, farads: f64) {
        self.push(AmplifierSetting::CSlow(farads));
    }

    /// CSlow (F).
    pub fn c_slow(&self) -> f64 {
        self.state.settings.c_slow
    }

    /// Series conductance (S).
    pub fn set_g_series(&mut self, siemens: f64) {
        self.push(AmplifierSetting::GSeries(siemens));
    }

    /// Series conductance (S).
    pub fn g_series(&self) -> f64 {
        self.state.settings.g_series
    }

    /// Rs compensation speed.
    pub fn set_rs_mode(&mut self, mode: RsMode) {
        self.push(AmplifierSetting::RsMode(mode));
    }

    /// Rs compensation speed.
    pub fn rs_mode(&self) -> RsMode {
        self.state.settings.rs_mode
    }

    /// Fraction of Rs to compensate, `0.0..=1.0`.
    pub fn set_rs_fraction(&mut self, fraction: f64) -> Result<()> {
        if !(0.0..=1.0).contains(&fraction) {
            return self.reject(ClampError::InvalidParameter(format!(
                "Rs fraction {} outside 0..=1",
                fraction
            )));
        }
        self.push(AmplifierSetting::RsFraction(fraction));
        Ok(())
    }

    /// Fraction of Rs compensated.
    pub fn rs_fraction(&self) -> f64 {
        self.state.settings.rs_fraction
    }

    /// Leak conductance (S).
    pub fn set_g_leak(&mut self, siemens: f64) {
        self.push(AmplifierSetting::GLeak(siemens));
    }

    /// Leak conductance (S).
    pub fn g_leak(&self) -> f64 {
        self.state.settings.g_leak
    }

    // ===== Filters =====

    /// Filter 1 setting.
    pub fn set_filter1(&mut self, filter: Filter1) {
        self.push(AmplifierSetting::Filter1(filter));
    }

    /// Filter 1 setting.
    pub fn filter1(&self) -> Filter1 {
        self.state.settings.filter1
    }

    /// Select the Bessel filter 1 nearest to `hz`.
    pub fn set_filter1_bandwidth(&mut self, hz: f64) -> Filter1 {
        let filter = Filter1::nearest(hz);
        self.set_filter1(filter);
        filter
    }

    /// Filter 1 bandwidth (Hz).
    pub fn filter1_bandwidth(&self) -> f64 {
        self.state.settings.filter1.bandwidth()
    }

    /// Filter 2 bandwidth (Hz).
    pub fn set_filter2_bandwidth(&mut self, hz: f64) -> Result<()> {
        if !(hz.is_finite() && hz > 0.0) {
            return self.reject(ClampError::InvalidParameter(format!(
                "filter 2 bandwidth must be positive, got {}",
                hz
            )));
        }
        self.push(AmplifierSetting::Filter2Bandwidth(hz));
        Ok(())
    }

    /// Filter 2 bandwidth (Hz).
    pub fn filter2_bandwidth(&self) -> f64 {
        self.state.settings.filter2_bandwidth
    }

    /// Filter 2 response: Butterworth (true) or Bessel (false).
    pub fn set_filter2_butterworth(&mut self, butterworth: bool) {
        self.push(AmplifierSetting::Filter2Butterworth(butterworth));
    }

    /// Filter 2 response.
    pub fn filter2_butterworth(&self) -> bool {
        self.state.settings.filter2_butterworth
    }

    /// Stimulus rise-time filter.
    pub fn set_stim_filter(&mut self, on: bool) {
        self.push(AmplifierSetting::StimFilter(on));
    }

    /// Stimulus rise-time filter.
    pub fn stim_filter(&self) -> bool {
        self.state.settings.stim_filter
    }

    // ===== Current clamp =====

    /// Low-frequency voltage clamp target (V).
    pub fn set_cc_track_hold(&mut self, volts: f64) {
        self.push(AmplifierSetting::CcTrackHold(volts));
    }

    /// Low-frequency voltage clamp target (V).
    pub fn cc_track_hold(&self) -> f64 {
        self.state.settings.cc_track_hold
    }

    /// Low-frequency voltage clamp speed.
    pub fn set_cc_track_tau(&mut self, tau: CcTrackTau) {
        self.push(AmplifierSetting::CcTrackTau(tau));
    }

    /// Low-frequency voltage clamp speed.
    pub fn cc_track_tau(&self) -> CcTrackTau {
        self.state.settings.cc_track_tau
    }

    /// Voltage monitor ×100.
    pub fn set_vmon_x100(&mut self, on: bool) {
        self.push(AmplifierSetting::VmonX100(on));
    }

    /// Voltage monitor ×100.
    pub fn vmon_x100(&self) -> bool {
        self.state.settings.vmon_x100
    }

    /// Fast current-clamp speed.
    pub fn set_cc_fast_speed(&mut self, on: bool) {
        self.push(AmplifierSetting::CcFastSpeed(on));
    }

    /// Fast current-clamp speed.
    pub fn cc_fast_speed(&self) -> bool {
        self.state.settings.cc_fast_speed
    }

    // ===== Stimulus, CSlow measurement, probe selector =====

    /// External stimulus routing and scale.
    pub fn set_ext_stim_path(&mut self, factor: f64, path: ExtStimPath) {
        self.push(AmplifierSetting::ExtStimPath { factor, path });
    }

    /// External stimulus routing and scale.
    pub fn ext_stim_path(&self) -> (f64, ExtStimPath) {
        (
            self.state.settings.ext_stim_factor,
            self.state.settings.ext_stim_path,
        )
    }

    /// Pulses averaged by a CSlow measurement.
    pub fn set_c_slow_cycles(&mut self, cycles: u32) -> Result<()> {
        if cycles == 0 {
            return self.reject(ClampError::InvalidParameter(
                "CSlow cycles must be at least 1".to_string(),
            ));
        }
        self.push(AmplifierSetting::CSlowCycles(cycles));
        Ok(())
    }

    /// Pulses averaged by a CSlow measurement.
    pub fn c_slow_cycles(&self) -> u32 {
        self.state.settings.c_slow_cycles
    }

    /// CSlow test pulse amplitude (V).
    pub fn set_c_slow_peak(&mut self, volts: f64) {
        self.push(AmplifierSetting::CSlowPeak(volts));
    }

    /// CSlow test pulse amplitude (V).
    pub fn c_slow_peak(&self) -> f64 {
        self.state.settings.c_slow_peak
    }

    /// Probe selector position, `1..=max_probes`.
    pub fn set_selector(&mut self, position: u32) -> Result<()> {
        if position == 0 || position > self.max_probes {
            return self.reject(ClampError::InvalidParameter(format!(
                "selector position {} outside 1..={}",
                position, self.max_probes
            )));
        }
        self.push(AmplifierSetting::Selector(position));
        Ok(())
    }

    /// Probe selector position.
    pub fn selector(&self) -> u32 {
        self.state.settings.selector
    }
}

impl FlushBeforeStart for BoardSession<'_> {
    fn flush_pending(&mut self) -> Result<usize> {
        self.flush()
    }
}
