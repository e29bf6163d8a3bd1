//! Amplifier configuration commands.
//!
//! Every amplifier setter produces one [`AmplifierCommand`] that sits in the
//! board's command cache until the next flush point. The enums here are the
//! typed values those commands carry.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::ClampError;

// =============================================================================
// Amplifier Families
// =============================================================================

/// Amplifier family driven by the system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AmplifierKind {
    /// EPC7, no computer control of the amplifier.
    Epc7,
    /// EPC8, front-panel remote control through the digital port.
    Epc8,
    /// EPC9.
    Epc9,
    /// EPC10.
    Epc10,
    /// EPC10 Plus.
    Epc10Plus,
    /// EPC10 USB.
    Epc10Usb,
}

impl AmplifierKind {
    /// True when the amplifier has computer-controlled boards with a command
    /// cache and calibration files.
    pub fn has_amplifier_boards(self) -> bool {
        !matches!(self, AmplifierKind::Epc7 | AmplifierKind::Epc8)
    }

    /// True when the amplifier owns part of the digital output port.
    pub fn uses_remote_control_bits(self) -> bool {
        matches!(self, AmplifierKind::Epc8)
    }
}

impl fmt::Display for AmplifierKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AmplifierKind::Epc7 => "EPC7",
            AmplifierKind::Epc8 => "EPC8",
            AmplifierKind::Epc9 => "EPC9",
            AmplifierKind::Epc10 => "EPC10",
            AmplifierKind::Epc10Plus => "EPC10 Plus",
            AmplifierKind::Epc10Usb => "EPC10 USB",
        };
        write!(f, "{}", name)
    }
}

// =============================================================================
// Setting Values
// =============================================================================

/// Clamp mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ClampMode {
    /// Voltage clamp.
    #[default]
    VoltageClamp,
    /// Current clamp.
    CurrentClamp,
}

/// CSlow compensation range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum CSlowRange {
    /// Compensation off.
    #[default]
    Off,
    /// 30 pF range.
    Pf30,
    /// 100 pF range.
    Pf100,
    /// 1000 pF range.
    Pf1000,
}

/// Current-clamp output range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum CcGain {
    /// 1 pA/mV.
    #[default]
    Pa1,
    /// 10 pA/mV.
    Pa10,
    /// 100 pA/mV.
    Pa100,
}

/// Low-frequency voltage clamp speed in current-clamp mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum CcTrackTau {
    /// Tracking off.
    #[default]
    Off,
    /// 1 s.
    S1,
    /// 3 s.
    S3,
    /// 10 s.
    S10,
    /// 30 s.
    S30,
    /// 100 s.
    S100,
}

/// Series-resistance compensation speed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum RsMode {
    /// Compensation off.
    #[default]
    Off,
    /// 100 µs.
    Us100,
    /// 10 µs.
    Us10,
    /// 2 µs.
    Us2,
}

/// Filter 1 setting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Filter1 {
    /// Bessel 100 kHz.
    Bessel100k,
    /// Bessel 30 kHz.
    Bessel30k,
    /// Bessel 10 kHz.
    #[default]
    Bessel10k,
    /// High-quality 30 kHz.
    Hq30k,
}

impl Filter1 {
    /// Nominal bandwidth in Hz.
    pub fn bandwidth(self) -> f64 {
        match self {
            Filter1::Bessel100k => 100e3,
            Filter1::Bessel30k | Filter1::Hq30k => 30e3,
            Filter1::Bessel10k => 10e3,
        }
    }

    /// Bessel setting whose bandwidth is nearest to `hz`.
    pub fn nearest(hz: f64) -> Self {
        [Filter1::Bessel100k, Filter1::Bessel30k, Filter1::Bessel10k]
            .into_iter()
            .min_by(|a, b| {
                let da = (a.bandwidth() - hz).abs();
                let db = (b.bandwidth() - hz).abs();
                da.total_cmp(&db)
            })
            .unwrap_or_default()
    }
}

/// Routing of the external stimulus input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ExtStimPath {
    /// Stimulus DAC drives the stimulus input, external input off.
    #[default]
    Off,
    /// Test DAC drives the stimulus input, external input off.
    StimDac,
    /// Stimulus DAC and external input are summed.
    Input,
}

/// Current-gain selector index.
///
/// Indices 6 and 13 separate the low, medium and high ranges and are not
/// selectable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GainIndex(u8);

/// Gain of every index in mV/pA; `None` marks a range separator.
const GAIN_TABLE_MV_PER_PA: [Option<f64>; 20] = [
    Some(0.005),
    Some(0.01),
    Some(0.02),
    Some(0.05),
    Some(0.1),
    Some(0.2),
    None,
    Some(0.5),
    Some(1.0),
    Some(2.0),
    Some(5.0),
    Some(10.0),
    Some(20.0),
    None,
    Some(50.0),
    Some(100.0),
    Some(200.0),
    Some(500.0),
    Some(1000.0),
    Some(2000.0),
];

impl GainIndex {
    /// Validate a raw index.
    pub fn new(index: u8) -> Result<Self, ClampError> {
        match GAIN_TABLE_MV_PER_PA.get(index as usize) {
            Some(Some(_)) => Ok(Self(index)),
            Some(None) => Err(ClampError::InvalidParameter(format!(
                "gain index {} is a range separator",
                index
            ))),
            None => Err(ClampError::InvalidParameter(format!(
                "gain index {} out of range 0..20",
                index
            ))),
        }
    }

    /// Raw index.
    pub fn index(self) -> u8 {
        self.0
    }

    /// Gain in mV/pA.
    pub fn mv_per_pa(self) -> f64 {
        GAIN_TABLE_MV_PER_PA[self.0 as usize].unwrap_or(0.0)
    }

    /// Gain in ohms (V/A).
    pub fn ohms(self) -> f64 {
        self.mv_per_pa() * 1e9
    }

    /// Index whose gain is nearest to `ohms` on a logarithmic scale.
    pub fn nearest(ohms: f64) -> Result<Self, ClampError> {
        if !(ohms.is_finite() && ohms > 0.0) {
            return Err(ClampError::InvalidParameter(format!(
                "current gain must be positive, got {}",
                ohms
            )));
        }
        let target = ohms.ln();
        GAIN_TABLE_MV_PER_PA
            .iter()
            .enumerate()
            .filter_map(|(i, g)| g.map(|mv| (i as u8, ((mv * 1e9).ln() - target).abs())))
            .min_by(|a, b| a.1.total_cmp(&b.1))
            .map(|(i, _)| Self(i))
            .ok_or_else(|| ClampError::InvalidParameter("empty gain table".to_string()))
    }
}

impl Default for GainIndex {
    /// 1 mV/pA.
    fn default() -> Self {
        Self(8)
    }
}

// =============================================================================
// Commands
// =============================================================================

/// One amplifier parameter change.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum AmplifierSetting {
    /// Clamp mode; `gently` preserves the clamp condition across the switch.
    Mode {
        /// Target mode.
        mode: ClampMode,
        /// Minimize the clamp transient.
        gently: bool,
    },
    /// Current gain.
    CurrentGain(GainIndex),
    /// Current-clamp output range.
    CcGain(CcGain),
    /// Holding potential (V).
    VHold(f64),
    /// Current-clamp holding current (A).
    CcIHold(f64),
    /// Liquid junction potential (V).
    VLiquidJunction(f64),
    /// Pipette offset (V).
    VpOffset(f64),
    /// Total CFast compensation (F).
    CFastTotal(f64),
    /// CFast time constant (s).
    CFastTau(f64),
    /// CSlow range.
    CSlowRange(CSlowRange),
    /// CSlow value (F).
    CSlow(f64),
    /// Series conductance (S).
    GSeries(f64),
    /// Series-resistance compensation speed.
    RsMode(RsMode),
    /// Fraction of series resistance to compensate.
    RsFraction(f64),
    /// Leak conductance (S).
    GLeak(f64),
    /// Filter 1 setting.
    Filter1(Filter1),
    /// Filter 2 bandwidth (Hz).
    Filter2Bandwidth(f64),
    /// Filter 2 Butterworth (true) or Bessel (false).
    Filter2Butterworth(bool),
    /// 20 µs stimulus rise-time filter.
    StimFilter(bool),
    /// Low-frequency voltage clamp target (V).
    CcTrackHold(f64),
    /// Low-frequency voltage clamp speed.
    CcTrackTau(CcTrackTau),
    /// Voltage monitor ×100.
    VmonX100(bool),
    /// Fast current-clamp speed.
    CcFastSpeed(bool),
    /// External stimulus routing and scale.
    ExtStimPath {
        /// Scale factor applied to the external input.
        factor: f64,
        /// Routing.
        path: ExtStimPath,
    },
    /// Pulses averaged by CSlow measurements.
    CSlowCycles(u32),
    /// Test pulse amplitude for CSlow measurements (V).
    CSlowPeak(f64),
    /// Probe selector position (1-based).
    Selector(u32),
    /// Return the board to its reset state.
    Reset,
}

impl AmplifierSetting {
    /// Short register-style name for logs and command traces.
    pub fn name(&self) -> &'static str {
        match self {
            AmplifierSetting::Mode { .. } => "mode",
            AmplifierSetting::CurrentGain(_) => "current_gain",
            AmplifierSetting::CcGain(_) => "cc_gain",
            AmplifierSetting::VHold(_) => "v_hold",
            AmplifierSetting::CcIHold(_) => "cc_i_hold",
            AmplifierSetting::VLiquidJunction(_) => "v_liquid_junction",
            AmplifierSetting::VpOffset(_) => "vp_offset",
            AmplifierSetting::CFastTotal(_) => "c_fast_total",
            AmplifierSetting::CFastTau(_) => "c_fast_tau",
            AmplifierSetting::CSlowRange(_) => "c_slow_range",
            AmplifierSetting::CSlow(_) => "c_slow",
            AmplifierSetting::GSeries(_) => "g_series",
            AmplifierSetting::RsMode(_) => "rs_mode",
            AmplifierSetting::RsFraction(_) => "rs_fraction",
            AmplifierSetting::GLeak(_) => "g_leak",
            AmplifierSetting::Filter1(_) => "filter1",
            AmplifierSetting::Filter2Bandwidth(_) => "filter2_bandwidth",
            AmplifierSetting::Filter2Butterworth(_) => "filter2_butterworth",
            AmplifierSetting::StimFilter(_) => "stim_filter",
            AmplifierSetting::CcTrackHold(_) => "cc_track_hold",
            AmplifierSetting::CcTrackTau(_) => "cc_track_tau",
            AmplifierSetting::VmonX100(_) => "vmon_x100",
            AmplifierSetting::CcFastSpeed(_) => "cc_fast_speed",
            AmplifierSetting::ExtStimPath { .. } => "ext_stim_path",
            AmplifierSetting::CSlowCycles(_) => "c_slow_cycles",
            AmplifierSetting::CSlowPeak(_) => "c_slow_peak",
            AmplifierSetting::Selector(_) => "selector",
            AmplifierSetting::Reset => "reset",
        }
    }
}

/// A setting addressed to one amplifier board.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AmplifierCommand {
    /// Amplifier board index (0-based).
    pub board: usize,
    /// Parameter change.
    pub setting: AmplifierSetting,
}

impl AmplifierCommand {
    /// Address `setting` to `board`.
    pub fn new(board: usize, setting: AmplifierSetting) -> Self {
        Self { board, setting }
    }
}

impl fmt::Display for AmplifierCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "board{}:{}", self.board, self.setting.name())
    }
}
