//! Simulated LIH-style interface board with an amplifier link.

use std::collections::HashMap;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use clamp_core::board::{AdcInputRange, BoardInfo};
use clamp_core::channel::{DIGITAL_IN_CHANNEL, DIGITAL_IN_CHANNEL_2};
use clamp_core::command::AmplifierCommand;
use clamp_core::config::InitOptions;
use clamp_core::error::{TransportError, TransportResult};
use clamp_core::transport::{
    AcquisitionMode, BoardTransport, DeviceIdentity, TransferPlan, TransferProgress,
};
use parking_lot::Mutex;
use tracing::{debug, trace};

use crate::common::{ErrorConfig, LatencyConfig, MockMode, MockRng};

// =============================================================================
// Recorded Bus Traffic
// =============================================================================

/// One bus primitive as seen by the simulated board.
#[derive(Debug, Clone, PartialEq)]
pub enum MockEvent {
    /// Bus opened.
    Open,
    /// Amplifier commands transmitted, with their count.
    Transmit(usize),
    /// Calibration data installed.
    InstallCalibration,
    /// Transfer armed.
    StartTransfer {
        /// Immediate path requested.
        immediate: bool,
        /// Scans to acquire, `None` for continuous.
        scans: Option<u64>,
    },
    /// DAC scans appended.
    WriteDac(usize),
    /// Cooperative stop.
    StopTransfer,
    /// Forced stop.
    ForceStop,
    /// Single DAC write.
    SetDac {
        /// Raw channel.
        channel: u16,
        /// Device units.
        units: i16,
    },
    /// Digital output port written.
    WriteDigital(u16),
    /// ADC input range changed.
    SetInputRange {
        /// Raw channel.
        channel: u16,
        /// Range in effect.
        range: AdcInputRange,
    },
    /// Bus released.
    Close,
}

#[derive(Debug)]
struct Transfer {
    plan: TransferPlan,
    dac_data: Vec<i16>,
    adc_consumed: u64,
    clocked: u64,
    started: bool,
    stopped: bool,
    started_at: Option<Instant>,
}

impl Transfer {
    fn cap(&self, scans: u64) -> u64 {
        match self.plan.scans {
            Some(total) => scans.min(total),
            None => scans,
        }
    }

    fn finished(&self) -> bool {
        self.stopped || matches!(self.plan.scans, Some(total) if self.started && self.clocked >= total)
    }

    fn begin(&mut self, mode: MockMode) {
        self.started = true;
        self.started_at = Some(Instant::now());
        if !mode.follows_wall_clock() {
            if let Some(total) = self.plan.scans {
                self.clocked = total;
            }
        }
    }

    fn dac_sample(&self, dac_raw: u16, scan: u64) -> Option<i16> {
        if !self.plan.mode.contains(AcquisitionMode::ENABLE_DAC_OUTPUT) {
            return None;
        }
        let width = self.plan.physical_dac();
        let position = self.plan.dac_channels.iter().position(|&c| c == dac_raw)?;
        let index = usize::try_from(scan).ok()? * width + position;
        Some(self.dac_data.get(index).copied().unwrap_or(0))
    }
}

#[derive(Debug, Default)]
struct MockState {
    open: bool,
    events: Vec<MockEvent>,
    transmitted: Vec<AmplifierCommand>,
    calibration_installed: bool,
    transfer: Option<Transfer>,
    dac_levels: HashMap<u16, i16>,
    adc_levels: HashMap<u16, i16>,
    loopback: HashMap<u16, u16>,
    digital_in: u16,
    digital_out: u16,
    input_ranges: HashMap<u16, AdcInputRange>,
}

impl MockState {
    fn adc_level(&self, adc_raw: u16) -> i16 {
        if adc_raw == DIGITAL_IN_CHANNEL || adc_raw == DIGITAL_IN_CHANNEL_2 {
            return self.digital_in as i16;
        }
        match self.loopback.get(&adc_raw) {
            Some(dac_raw) => self.dac_levels.get(dac_raw).copied().unwrap_or(0),
            None => self.adc_levels.get(&adc_raw).copied().unwrap_or(0),
        }
    }
}

// =============================================================================
// MockBoard
// =============================================================================

/// A [`BoardTransport`] that keeps everything in memory.
///
/// ADC channels return a fixed level per channel unless they are looped back
/// to a DAC, in which case each scan returns the stimulus sample written for
/// that scan. Digital input channels return the simulated input port.
#[derive(Debug)]
pub struct MockBoard {
    info: BoardInfo,
    identity: DeviceIdentity,
    mode: MockMode,
    latency: LatencyConfig,
    errors: ErrorConfig,
    noise: i16,
    rng: MockRng,
    state: Arc<Mutex<MockState>>,
}

impl MockBoard {
    /// Simulate a board with the given capabilities.
    pub fn new(info: BoardInfo) -> Self {
        let identity = DeviceIdentity {
            serial_number: "MOCK-000001".to_string(),
            device_number: "mock0".to_string(),
            amplifier_boards: 1,
            firmware_ok: true,
            dac_scaling: vec![3200.0; 8],
            adc_scaling: vec![1.0 / 3200.0; 16],
        };
        Self {
            info,
            identity,
            mode: MockMode::default(),
            latency: LatencyConfig::default(),
            errors: ErrorConfig::none(),
            noise: 0,
            rng: MockRng::new(Some(0)),
            state: Arc::new(Mutex::new(MockState::default())),
        }
    }

    /// Simulated LIH 8+8.
    pub fn lih88() -> Self {
        Self::new(BoardInfo::lih88())
    }

    /// Set the clock mode.
    pub fn with_mode(mut self, mode: MockMode) -> Self {
        self.mode = mode;
        self
    }

    /// Set bus latencies (slept in realistic mode only).
    pub fn with_latency(mut self, latency: LatencyConfig) -> Self {
        self.latency = latency;
        self
    }

    /// Inject failures.
    pub fn with_errors(mut self, errors: ErrorConfig) -> Self {
        self.errors = errors;
        self
    }

    /// Replace the identity reported on open.
    pub fn with_identity(mut self, identity: DeviceIdentity) -> Self {
        self.identity = identity;
        self
    }

    /// Number of amplifier boards behind the link.
    pub fn with_amplifier_boards(mut self, count: usize) -> Self {
        self.identity.amplifier_boards = count;
        self
    }

    /// Add uniform noise of `amplitude` units to every ADC sample.
    pub fn with_noise(mut self, amplitude: i16, seed: u64) -> Self {
        self.noise = amplitude;
        self.rng = MockRng::new(Some(seed));
        self
    }

    /// Test-side handle onto the simulated hardware.
    pub fn handle(&self) -> MockHandle {
        MockHandle {
            state: Arc::clone(&self.state),
            mode: self.mode,
        }
    }

    fn check(&self, operation: &'static str, timeout: Duration) -> TransportResult<()> {
        self.errors.check(operation, timeout).inspect_err(|err| {
            debug!(operation, error = %err, "mock board failure injected");
        })
    }

    fn sleep(&self, delay: Duration) {
        if self.mode.follows_wall_clock() && !delay.is_zero() {
            thread::sleep(delay);
        }
    }

    fn update_clock(&self, transfer: &mut Transfer) {
        if !self.mode.follows_wall_clock() || !transfer.started || transfer.stopped {
            return;
        }
        if let Some(started_at) = transfer.started_at {
            let interval = transfer.plan.interval.seconds;
            if interval > 0.0 {
                let scans = (started_at.elapsed().as_secs_f64() / interval) as u64;
                transfer.clocked = transfer.cap(scans);
            }
        }
    }
}

impl BoardTransport for MockBoard {
    fn open(&mut self, options: &InitOptions) -> TransportResult<DeviceIdentity> {
        self.check("open", options.bus_timeout)?;
        let mut state = self.state.lock();
        state.open = true;
        state.events.push(MockEvent::Open);
        debug!(board = %self.info.board_type, "mock board opened");
        Ok(self.identity.clone())
    }

    fn board_info(&self) -> BoardInfo {
        self.info.clone()
    }

    fn transmit(&mut self, commands: &[AmplifierCommand], timeout: Duration) -> TransportResult<()> {
        self.check("transmit", timeout)?;
        self.sleep(self.latency.transmit(commands.len()));
        let mut state = self.state.lock();
        state.transmitted.extend_from_slice(commands);
        state.events.push(MockEvent::Transmit(commands.len()));
        trace!(count = commands.len(), "mock board received commands");
        Ok(())
    }

    fn install_calibration(&mut self, scale: &[u8], cfast: &[u8]) -> TransportResult<()> {
        self.check("install_calibration", Duration::ZERO)?;
        let mut state = self.state.lock();
        state.calibration_installed = true;
        state.events.push(MockEvent::InstallCalibration);
        trace!(scale = scale.len(), cfast = cfast.len(), "calibration installed");
        Ok(())
    }

    fn start_transfer(
        &mut self,
        plan: &TransferPlan,
        stimulus: &[i16],
        timeout: Duration,
    ) -> TransportResult<()> {
        self.check("start_transfer", timeout)?;
        let mut state = self.state.lock();
        if let Some(active) = state.transfer.as_ref() {
            if !active.finished() {
                return Err(TransportError::DeviceBusy(
                    "transfer already running".to_string(),
                ));
            }
        }
        let width = plan.physical_dac();
        if width > 0 && stimulus.len() % width != 0 {
            return Err(TransportError::Protocol(format!(
                "{} stimulus samples do not fill whole scans of {} channels",
                stimulus.len(),
                width
            )));
        }

        let mut transfer = Transfer {
            plan: plan.clone(),
            dac_data: stimulus.to_vec(),
            adc_consumed: 0,
            clocked: 0,
            started: false,
            stopped: false,
            started_at: None,
        };
        if !plan.mode.contains(AcquisitionMode::TRIGGERED) {
            transfer.begin(self.mode);
        }
        state.transfer = Some(transfer);
        state.events.push(MockEvent::StartTransfer {
            immediate: plan.immediate,
            scans: plan.scans,
        });
        drop(state);

        self.sleep(self.latency.start_handshake);
        debug!(
            dac = plan.physical_dac(),
            adc = plan.physical_adc(),
            interval_s = plan.interval.seconds,
            "mock transfer armed"
        );
        Ok(())
    }

    fn write_dac(&mut self, scans: &[i16]) -> TransportResult<()> {
        self.check("write_dac", Duration::ZERO)?;
        let mut state = self.state.lock();
        let transfer = state
            .transfer
            .as_mut()
            .ok_or_else(|| TransportError::Protocol("no transfer armed".to_string()))?;
        let width = transfer.plan.physical_dac();
        if width == 0 || scans.len() % width != 0 {
            return Err(TransportError::Protocol(format!(
                "{} samples do not fill whole scans of {} channels",
                scans.len(),
                width
            )));
        }
        transfer.dac_data.extend_from_slice(scans);
        let count = scans.len() / width;
        state.events.push(MockEvent::WriteDac(count));
        Ok(())
    }

    fn poll(&mut self) -> TransportResult<TransferProgress> {
        self.check("poll", Duration::ZERO)?;
        let mut state = self.state.lock();
        match state.transfer.as_mut() {
            Some(transfer) => {
                self.update_clock(transfer);
                Ok(TransferProgress {
                    started: transfer.started,
                    scans: transfer.clocked,
                    finished: transfer.finished(),
                })
            }
            None => Ok(TransferProgress::default()),
        }
    }

    fn read_adc(&mut self, scans: usize, out: &mut [i16]) -> TransportResult<()> {
        self.check("read_adc", Duration::ZERO)?;
        let mut state = self.state.lock();
        let Some(transfer) = state.transfer.as_ref() else {
            return Err(TransportError::Protocol("no transfer armed".to_string()));
        };
        let width = transfer.plan.physical_adc();
        let first = transfer.adc_consumed;
        let last = first + scans as u64;
        if last > transfer.clocked {
            return Err(TransportError::Protocol(format!(
                "read up to scan {} but only {} clocked",
                last, transfer.clocked
            )));
        }
        if out.len() < scans * width {
            return Err(TransportError::Protocol(format!(
                "buffer of {} samples too small for {} scans",
                out.len(),
                scans * width
            )));
        }

        for (offset, scan) in (first..last).enumerate() {
            for (position, &adc_raw) in transfer.plan.adc_channels.iter().enumerate() {
                let looped = state
                    .loopback
                    .get(&adc_raw)
                    .and_then(|&dac_raw| transfer.dac_sample(dac_raw, scan));
                let level = looped.unwrap_or_else(|| state.adc_level(adc_raw));
                out[offset * width + position] = level.saturating_add(self.rng.noise(self.noise));
            }
        }

        if let Some(transfer) = state.transfer.as_mut() {
            transfer.adc_consumed = last;
        }
        Ok(())
    }

    fn stop_transfer(&mut self) -> TransportResult<()> {
        self.check("stop_transfer", Duration::ZERO)?;
        let mut state = self.state.lock();
        if let Some(transfer) = state.transfer.as_mut() {
            self.update_clock(transfer);
            transfer.stopped = true;
        }
        state.events.push(MockEvent::StopTransfer);
        Ok(())
    }

    fn force_stop(&mut self, timeout: Duration) -> TransportResult<()> {
        self.check("force_stop", timeout)?;
        self.sleep(self.latency.force_stop);
        let mut state = self.state.lock();
        if let Some(transfer) = state.transfer.as_mut() {
            transfer.stopped = true;
        }
        state.events.push(MockEvent::ForceStop);
        Ok(())
    }

    fn set_dac(&mut self, channel: u16, units: i16) -> TransportResult<()> {
        self.check("set_dac", Duration::ZERO)?;
        let mut state = self.state.lock();
        state.dac_levels.insert(channel, units);
        state.events.push(MockEvent::SetDac { channel, units });
        Ok(())
    }

    fn read_adc_single(&mut self, channel: u16) -> TransportResult<i16> {
        self.check("read_adc_single", Duration::ZERO)?;
        let state = self.state.lock();
        Ok(state
            .adc_level(channel)
            .saturating_add(self.rng.noise(self.noise)))
    }

    fn read_digital(&mut self) -> TransportResult<u16> {
        self.check("read_digital", Duration::ZERO)?;
        Ok(self.state.lock().digital_in)
    }

    fn write_digital(&mut self, value: u16) -> TransportResult<()> {
        self.check("write_digital", Duration::ZERO)?;
        let mut state = self.state.lock();
        state.digital_out = value;
        state.events.push(MockEvent::WriteDigital(value));
        Ok(())
    }

    fn digital_out_state(&mut self) -> TransportResult<u16> {
        self.check("digital_out_state", Duration::ZERO)?;
        Ok(self.state.lock().digital_out)
    }

    fn set_input_range(
        &mut self,
        channel: u16,
        range: AdcInputRange,
    ) -> TransportResult<AdcInputRange> {
        self.check("set_input_range", Duration::ZERO)?;
        if !self.info.input_range_selectable {
            return Err(TransportError::NotSupported(format!(
                "{} has a fixed input range",
                self.info.board_type
            )));
        }
        let mut state = self.state.lock();
        state.input_ranges.insert(channel, range);
        state.events.push(MockEvent::SetInputRange { channel, range });
        Ok(range)
    }

    fn close(&mut self) -> TransportResult<()> {
        self.check("close", Duration::ZERO)?;
        let mut state = self.state.lock();
        state.open = false;
        state.events.push(MockEvent::Close);
        debug!("mock board closed");
        Ok(())
    }
}

// =============================================================================
// MockHandle
// =============================================================================

/// Test-side view of a [`MockBoard`], valid after the board is boxed and
/// shared.
#[derive(Debug, Clone)]
pub struct MockHandle {
    state: Arc<Mutex<MockState>>,
    mode: MockMode,
}

impl MockHandle {
    /// Advance the sample clock of the active transfer by `scans`.
    ///
    /// Has no effect before the clock started or after it stopped; pulsed
    /// transfers never advance past their requested length.
    pub fn advance(&self, scans: u64) {
        let mut state = self.state.lock();
        if let Some(transfer) = state.transfer.as_mut() {
            if transfer.started && !transfer.stopped {
                transfer.clocked = transfer.cap(transfer.clocked + scans);
            }
        }
    }

    /// Fire the external trigger.
    pub fn trigger(&self) {
        let mut state = self.state.lock();
        if let Some(transfer) = state.transfer.as_mut() {
            if !transfer.started {
                transfer.begin(self.mode);
            }
        }
    }

    /// Feed ADC `adc` from DAC `dac`.
    pub fn loopback(&self, adc: u16, dac: u16) {
        self.state.lock().loopback.insert(adc, dac);
    }

    /// Fixed level returned by an ADC channel without loopback.
    pub fn set_adc_level(&self, adc: u16, units: i16) {
        self.state.lock().adc_levels.insert(adc, units);
    }

    /// Pattern on the digital input port.
    pub fn set_digital_in(&self, value: u16) {
        self.state.lock().digital_in = value;
    }

    /// Pattern driven on the digital output port.
    pub fn digital_out(&self) -> u16 {
        self.state.lock().digital_out
    }

    /// Every amplifier command received, in order.
    pub fn transmitted(&self) -> Vec<AmplifierCommand> {
        self.state.lock().transmitted.clone()
    }

    /// Every bus primitive received, in order.
    pub fn events(&self) -> Vec<MockEvent> {
        self.state.lock().events.clone()
    }

    /// Forget recorded events and commands.
    pub fn clear_log(&self) {
        let mut state = self.state.lock();
        state.events.clear();
        state.transmitted.clear();
    }

    /// Plan of the most recent transfer.
    pub fn last_plan(&self) -> Option<TransferPlan> {
        self.state.lock().transfer.as_ref().map(|t| t.plan.clone())
    }

    /// Stimulus written for one physical DAC channel of the most recent
    /// transfer, in scan order.
    pub fn dac_written(&self, dac: u16) -> Vec<i16> {
        let state = self.state.lock();
        let Some(transfer) = state.transfer.as_ref() else {
            return Vec::new();
        };
        let width = transfer.plan.physical_dac();
        match transfer.plan.dac_channels.iter().position(|&c| c == dac) {
            Some(position) if width > 0 => transfer
                .dac_data
                .chunks(width)
                .filter_map(|scan| scan.get(position).copied())
                .collect(),
            _ => Vec::new(),
        }
    }

    /// Last value set on a DAC outside of a transfer.
    pub fn dac_level(&self, dac: u16) -> Option<i16> {
        self.state.lock().dac_levels.get(&dac).copied()
    }

    /// Whether a transfer is clocking.
    pub fn transfer_running(&self) -> bool {
        self.state
            .lock()
            .transfer
            .as_ref()
            .is_some_and(|t| t.started && !t.finished())
    }

    /// Scans clocked by the most recent transfer.
    pub fn clocked(&self) -> u64 {
        self.state.lock().transfer.as_ref().map_or(0, |t| t.clocked)
    }

    /// Whether the bus is open.
    pub fn is_open(&self) -> bool {
        self.state.lock().open
    }

    /// Whether calibration data was installed.
    pub fn calibration_installed(&self) -> bool {
        self.state.lock().calibration_installed
    }

    /// Input range selected for an ADC channel.
    pub fn input_range(&self, adc: u16) -> Option<AdcInputRange> {
        self.state.lock().input_ranges.get(&adc).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clamp_core::transport::SampleInterval;

    fn plan(scans: Option<u64>, mode: AcquisitionMode) -> TransferPlan {
        TransferPlan {
            dac_channels: vec![0, 1],
            adc_channels: vec![0, 1],
            interval: SampleInterval {
                ticks: 10,
                seconds: 1e-5,
            },
            scans,
            mode,
            immediate: false,
        }
    }

    #[test]
    fn test_pulsed_transfer_completes_instantly() {
        let mut board = MockBoard::lih88();
        let handle = board.handle();
        handle.loopback(1, 0);
        let stimulus: Vec<i16> = (0..8).flat_map(|s| [s * 10, -s]).collect();

        board
            .start_transfer(
                &plan(Some(8), AcquisitionMode::ENABLE_DAC_OUTPUT),
                &stimulus,
                Duration::from_secs(1),
            )
            .unwrap();
        let progress = board.poll().unwrap();
        assert!(progress.started);
        assert!(progress.finished);
        assert_eq!(progress.scans, 8);

        let mut out = vec![0i16; 16];
        board.read_adc(8, &mut out).unwrap();
        let adc1: Vec<i16> = out.chunks(2).map(|scan| scan[1]).collect();
        assert_eq!(adc1, vec![0, 10, 20, 30, 40, 50, 60, 70]);
    }

    #[test]
    fn test_continuous_transfer_advances_on_request() {
        let mut board = MockBoard::lih88();
        let handle = board.handle();
        board
            .start_transfer(&plan(None, AcquisitionMode::empty()), &[], Duration::ZERO)
            .unwrap();
        assert_eq!(board.poll().unwrap().scans, 0);
        handle.advance(5);
        handle.advance(7);
        let progress = board.poll().unwrap();
        assert_eq!(progress.scans, 12);
        assert!(!progress.finished);

        let mut out = vec![0i16; 2 * 13];
        assert!(board.read_adc(13, &mut out).is_err());
        assert!(board.read_adc(12, &mut out).is_ok());
    }

    #[test]
    fn test_triggered_waits_for_trigger() {
        let mut board = MockBoard::lih88();
        let handle = board.handle();
        board
            .start_transfer(
                &plan(Some(4), AcquisitionMode::TRIGGERED),
                &[],
                Duration::ZERO,
            )
            .unwrap();
        assert!(!board.poll().unwrap().started);
        handle.trigger();
        let progress = board.poll().unwrap();
        assert!(progress.started && progress.finished);
    }

    #[test]
    fn test_second_start_while_running_is_busy() {
        let mut board = MockBoard::lih88();
        let continuous = plan(None, AcquisitionMode::empty());
        board.start_transfer(&continuous, &[], Duration::ZERO).unwrap();
        assert!(matches!(
            board.start_transfer(&continuous, &[], Duration::ZERO),
            Err(TransportError::DeviceBusy(_))
        ));
        board.stop_transfer().unwrap();
        assert!(board.start_transfer(&continuous, &[], Duration::ZERO).is_ok());
    }

    #[test]
    fn test_input_range_only_on_selectable_boards() {
        let mut lih = MockBoard::lih88();
        assert!(matches!(
            lih.set_input_range(0, AdcInputRange::Volts2),
            Err(TransportError::NotSupported(_))
        ));
        let mut itc = MockBoard::new(BoardInfo::itc18());
        let handle = itc.handle();
        assert_eq!(
            itc.set_input_range(3, AdcInputRange::Volts2).unwrap(),
            AdcInputRange::Volts2
        );
        assert_eq!(handle.input_range(3), Some(AdcInputRange::Volts2));
    }

    #[test]
    fn test_single_shot_loopback() {
        let mut board = MockBoard::lih88();
        let handle = board.handle();
        handle.loopback(2, 1);
        board.set_dac(1, 1234).unwrap();
        assert_eq!(board.read_adc_single(2).unwrap(), 1234);
        handle.set_digital_in(0x00F0);
        assert_eq!(board.read_adc_single(DIGITAL_IN_CHANNEL).unwrap(), 0x00F0);
    }
}
