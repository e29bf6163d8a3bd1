//! FIFO-buffered acquisition engine.
//!
//! The engine owns at most one [`Session`] and drives it through
//! [`EngineState`]. All hardware access goes through the shared
//! [`BusContext`]; the engine itself spawns no threads and never blocks,
//! except inside an immediate-mode [`start`](AcquisitionEngine::start).
//!
//! # Streaming
//!
//! ```text
//! start ──> Armed ──> Running
//!             │          │  available()  poll cursor, detect overrun/underrun
//!             │          │  read(n)      consume n ADC samples per channel
//!             │          │  append(n)    refill n DAC samples per channel
//!             └──────────┴─ halt() ──> Idle
//! ```
//!
//! A continuous session may never append more stimulus than it has read
//! back: the DAC side is refilled from the credit the ADC side has freed.
//!
//! # Immediate mode
//!
//! Small pulsed acquisitions can run on a blocking low-latency path.
//! `start` then polls until every sample is in, returns the data in the
//! [`StartOutcome`] and leaves the engine `Idle`. The wait is bounded by the
//! bus timeout.

mod request;
mod session;

pub use request::{AcquisitionRequest, AcquisitionRequestBuilder, StartOutcome};
pub use session::{
    Availability, ChannelCursor, EngineState, FifoCondition, SessionStats, SessionView,
};

use std::thread;
use std::time::{Duration, Instant};

use clamp_core::board::BoardInfo;
use clamp_core::error::{ClampError, Result, TransportError};
use clamp_core::status::InterfaceStatus;
use clamp_core::transport::{AcquisitionMode, TransferPlan, TransferProgress};
use tracing::{debug, error, info, warn};

use crate::bus::BusContext;
use crate::cache::FlushBeforeStart;
use crate::topology::{ChannelTopology, Topology};
use session::Session;

/// Drives one interface board's DAC and ADC FIFOs.
#[derive(Debug)]
pub struct AcquisitionEngine {
    bus: BusContext,
    board: BoardInfo,
    poll_interval: Duration,
    state: EngineState,
    session: Option<Session>,
    last_stats: SessionStats,
}

impl AcquisitionEngine {
    /// Engine for `board`, polling immediate transfers every
    /// `poll_interval`.
    pub fn new(bus: BusContext, board: BoardInfo, poll_interval: Duration) -> Self {
        Self {
            bus,
            board,
            poll_interval,
            state: EngineState::Idle,
            session: None,
            last_stats: SessionStats::default(),
        }
    }

    /// Current state.
    pub fn state(&self) -> EngineState {
        self.state
    }

    /// Capabilities of the board this engine drives.
    pub fn board(&self) -> &BoardInfo {
        &self.board
    }

    /// Read-only view of the session, if there is one.
    pub fn session(&self) -> Option<SessionView<'_>> {
        self.session.as_ref().map(|s| s.view(self.state))
    }

    /// Counters of the current session, or of the last one once released.
    pub fn stats(&self) -> SessionStats {
        self.session
            .as_ref()
            .map_or_else(|| self.last_stats.clone(), |s| s.stats.clone())
    }

    /// Interface status as seen by the engine.
    ///
    /// A tolerated ADC overrun shows as [`InterfaceStatus::AdcOverflow`] for
    /// the rest of the session. The status set has no DAC-side value, so a
    /// tolerated underrun leaves the status `Busy` and is reported through
    /// [`SessionStats::underruns`] instead. The engine never reports
    /// [`InterfaceStatus::Locked`]: a held interface fails initialization.
    pub fn status(&self) -> InterfaceStatus {
        match (self.state, self.session.as_ref()) {
            (EngineState::Armed | EngineState::Running, Some(s)) if s.stats.overruns > 0 => {
                InterfaceStatus::AdcOverflow
            }
            (EngineState::Armed | EngineState::Running, _) => InterfaceStatus::Busy,
            _ => InterfaceStatus::Idle,
        }
    }

    fn set_state(&mut self, next: EngineState) {
        if self.state != next {
            debug!(from = %self.state, to = %next, "engine state");
            self.state = next;
        }
    }

    fn invalid_state(&self, operation: &'static str) -> ClampError {
        ClampError::InvalidState {
            operation,
            state: self.state.to_string(),
        }
    }

    /// A bus failure during an armed or running session halts it.
    fn transport_fault(&mut self, operation: &'static str, err: &ClampError) {
        if self.state.is_active() {
            error!(operation, error = %err, "bus failure during acquisition, session halted");
            self.set_state(EngineState::Halted);
        }
    }

    fn release(&mut self) {
        if let Some(mut session) = self.session.take() {
            session.refresh_stats();
            self.last_stats = session.stats;
        }
        self.set_state(EngineState::Idle);
    }

    // =========================================================================
    // Start
    // =========================================================================

    /// Start an acquisition.
    ///
    /// `stimulus` holds one buffer per requested DAC channel with at least
    /// `dac_samples` samples each; it is ignored unless
    /// [`AcquisitionMode::ENABLE_DAC_OUTPUT`] is set. `pending` is flushed
    /// after validation and before the hardware is touched.
    ///
    /// A halted or completed session is released first. Starting while a
    /// session is armed or running fails with
    /// [`ClampError::SessionAlreadyActive`] and changes nothing.
    pub fn start(
        &mut self,
        request: &AcquisitionRequest,
        stimulus: &[&[i16]],
        pending: Option<&mut dyn FlushBeforeStart>,
    ) -> Result<StartOutcome> {
        let result = self.start_inner(request, stimulus, pending);
        self.bus.track(result)
    }

    fn start_inner(
        &mut self,
        request: &AcquisitionRequest,
        stimulus: &[&[i16]],
        pending: Option<&mut dyn FlushBeforeStart>,
    ) -> Result<StartOutcome> {
        if self.state.is_active() {
            return Err(ClampError::SessionAlreadyActive {
                state: self.state.to_string(),
            });
        }

        request.validate()?;
        let topology = ChannelTopology::new(&self.board).resolve(
            &request.dac_channels,
            &request.adc_channels,
            request.interval_s,
        )?;
        if request.drives_dac() {
            check_buffers(
                "stimulus",
                stimulus.iter().map(|b| b.len()),
                stimulus.len(),
                request.dac_channels.len(),
                request.dac_samples,
            )?;
        }

        if self.state != EngineState::Idle {
            self.release();
        }

        let mut request = request.clone();
        if !request.read_continuously && !request.set_stim_end {
            debug!("pulsed acquisition, stimulus end forced");
            request.set_stim_end = true;
        }

        if let Some(pending) = pending {
            pending.flush_pending()?;
        }

        let immediate = request.immediate && self.grants_immediate(&request, &topology);
        if request.immediate && !immediate {
            info!("immediate mode not available for this request, streaming instead");
        }

        let fifo_per_channel = self.board.fifo_length / topology.physical_adc_count().max(1);
        let capacity = fifo_per_channel
            .max(request.dac_samples)
            .max(request.adc_samples) as u64;

        let width = topology.physical_dac_count();
        let (initial, stimulus_scans, last_scan) = if request.drives_dac() {
            let mut data = interleave(stimulus, width, request.dac_samples);
            let last_scan = last_scan_of(&data, width);
            if request.set_stim_end {
                data.extend(padding(&last_scan, width, self.board.stim_end_padding));
            }
            (data, request.dac_samples as u64, last_scan)
        } else {
            (Vec::new(), 0, Vec::new())
        };

        let mut session = Session::new(request, topology, capacity, stimulus_scans);
        session.last_scan = last_scan;
        let plan = TransferPlan {
            dac_channels: session.topology.physical_dac.clone(),
            adc_channels: session.topology.physical_adc.clone(),
            interval: session.topology.interval,
            scans: session.total_scans,
            mode: session.request.mode,
            immediate,
        };

        let timeout = self.bus.timeout();
        self.bus
            .with(|transport| transport.start_transfer(&plan, &initial, timeout))?;

        let mut outcome = StartOutcome {
            interval: plan.interval,
            physical_dac: plan.physical_dac(),
            physical_adc: plan.physical_adc(),
            set_stim_end: session.request.set_stim_end,
            immediate,
            data: None,
        };

        if immediate {
            outcome.data = Some(self.run_immediate(&session)?);
            session.refresh_stats();
            self.last_stats = session.stats;
            return Ok(outcome);
        }

        info!(
            dac = outcome.physical_dac,
            adc = outcome.physical_adc,
            interval_s = outcome.interval.seconds,
            continuous = session.request.read_continuously,
            capacity,
            "acquisition armed"
        );

        self.session = Some(session);
        self.set_state(EngineState::Armed);

        match self.bus.with(|transport| transport.poll()) {
            Ok(progress) => {
                self.absorb_progress(progress);
                Ok(outcome)
            }
            Err(err) => {
                self.transport_fault("poll", &err);
                Err(err)
            }
        }
    }

    fn grants_immediate(&self, request: &AcquisitionRequest, topology: &Topology) -> bool {
        let Some(limits) = self.board.immediate else {
            return false;
        };
        !request.read_continuously
            && !request.mode.contains(AcquisitionMode::TRIGGERED)
            && limits.permits(
                topology.physical_dac_count(),
                topology.physical_adc_count(),
                request.dac_samples.max(request.adc_samples),
                request.duration_s(topology.interval),
            )
    }

    /// Block until the immediate transfer finished and collect its data.
    fn run_immediate(&mut self, session: &Session) -> Result<Vec<Vec<i16>>> {
        let result = self.collect_immediate(session);
        if let Err(err) = &result {
            warn!(error = %err, "immediate acquisition failed, resetting the interface");
            let timeout = self.bus.timeout();
            if let Err(stop_err) = self.bus.with(|transport| transport.force_stop(timeout)) {
                warn!(error = %stop_err, "force stop after immediate failure also failed");
            }
        }
        result
    }

    fn collect_immediate(&mut self, session: &Session) -> Result<Vec<Vec<i16>>> {
        let timeout = self.bus.timeout();
        // No deadline when the timeout reaches past the clock's range.
        let deadline = Instant::now().checked_add(timeout);
        loop {
            let progress = self.bus.with(|transport| transport.poll())?;
            if progress.finished {
                break;
            }
            if deadline.is_some_and(|deadline| Instant::now() >= deadline) {
                return Err(TransportError::Timeout {
                    operation: "immediate acquisition",
                    timeout,
                }
                .into());
            }
            thread::sleep(self.poll_interval);
        }

        let samples = session.request.adc_samples;
        let width = session.topology.physical_adc_count();
        let requested = session.topology.requested_adc.len();
        let mut data = vec![vec![0i16; samples]; requested];
        if samples > 0 && width > 0 {
            let mut raw = vec![0i16; samples * width];
            self.bus
                .with(|transport| transport.read_adc(samples, &mut raw))?;
            let mut buffers: Vec<&mut [i16]> = data.iter_mut().map(Vec::as_mut_slice).collect();
            deinterleave(&raw, width, samples, &mut buffers);
        }
        debug!(samples, channels = requested, "immediate acquisition complete");
        Ok(data)
    }

    // =========================================================================
    // Poll
    // =========================================================================

    /// Samples per requested ADC channel ready to read.
    ///
    /// Never blocks. Polls the hardware cursor while armed or running,
    /// detects overrun and underrun, and completes pulsed sessions.
    pub fn available(&mut self) -> Result<Availability> {
        let result = self.available_inner();
        self.bus.track(result)
    }

    fn available_inner(&mut self) -> Result<Availability> {
        if self.session.is_none() {
            return Err(self.invalid_state("available"));
        }

        let mut condition = None;
        if self.state.is_active() {
            let progress = match self.bus.with(|transport| transport.poll()) {
                Ok(progress) => progress,
                Err(err) => {
                    self.transport_fault("poll", &err);
                    return Err(err);
                }
            };
            condition = self.absorb_progress(progress);
        }

        let Some(session) = self.session.as_ref() else {
            return Err(self.invalid_state("available"));
        };
        let samples = session.readable().min(session.capacity);
        Ok(Availability {
            samples: usize::try_from(samples).unwrap_or(usize::MAX),
            still_running: self.state.is_active(),
            condition,
        })
    }

    /// Fold a hardware cursor into the session and apply the state rules.
    fn absorb_progress(&mut self, progress: TransferProgress) -> Option<FifoCondition> {
        let Some(mut session) = self.session.take() else {
            return None;
        };
        session.produced = session.produced.max(progress.scans);
        if self.state == EngineState::Armed && progress.started {
            self.set_state(EngineState::Running);
        }

        let mut condition = None;
        let backlog = session.backlog();
        if backlog > session.capacity {
            let overrun = FifoCondition::Overrun {
                backlog,
                capacity: session.capacity,
            };
            if session
                .request
                .mode
                .contains(AcquisitionMode::DONT_STOP_ADC_ON_OVERRUN)
            {
                if !session.overflowing {
                    session.overflowing = true;
                    session.stats.overruns += 1;
                    warn!(backlog, capacity = session.capacity, "ADC overrun, continuing");
                }
            } else {
                condition = Some(overrun);
            }
        } else {
            session.overflowing = false;
        }

        if condition.is_none() && session.watches_underrun() {
            let written = session.dac_written();
            if session.produced > written {
                let underrun = FifoCondition::Underrun {
                    clocked: session.produced,
                    written,
                };
                if session
                    .request
                    .mode
                    .contains(AcquisitionMode::DONT_STOP_DAC_ON_UNDERRUN)
                {
                    if !session.underflowing {
                        session.underflowing = true;
                        session.stats.underruns += 1;
                        warn!(clocked = session.produced, written, "DAC underrun, continuing");
                    }
                } else {
                    condition = Some(underrun);
                }
            } else {
                session.underflowing = false;
            }
        }

        session.refresh_stats();
        let pulsed_done = session.pulsed_done();
        let continuous_stopped = session.request.read_continuously && progress.finished;
        self.session = Some(session);

        if let Some(fault) = condition {
            self.halt_on_condition(fault);
        } else if self.state.is_active() && pulsed_done {
            debug!("pulsed acquisition complete");
            self.set_state(EngineState::Completed);
        } else if self.state.is_active() && continuous_stopped {
            warn!("hardware stopped a continuous acquisition");
            self.set_state(EngineState::Halted);
        }
        condition
    }

    fn halt_on_condition(&mut self, condition: FifoCondition) {
        let err = ClampError::from(condition);
        error!(error = %err, "acquisition halted");
        if let Err(stop_err) = self.bus.with(|transport| transport.stop_transfer()) {
            warn!(error = %stop_err, "stop after FIFO fault failed");
        }
        self.set_state(EngineState::Halted);
        self.bus.last_error().record(&err);
    }

    // =========================================================================
    // Read / Append
    // =========================================================================

    /// Copy `samples` samples per requested ADC channel into `buffers`, one
    /// buffer per requested channel, and advance the ADC cursors.
    ///
    /// Fails with [`ClampError::ReadExceedsAvailable`] when fewer samples are
    /// ready; it never truncates. With `do_halt` the session is released
    /// afterwards.
    pub fn read(&mut self, samples: usize, do_halt: bool, buffers: &mut [&mut [i16]]) -> Result<()> {
        let result = self.read_inner(samples, do_halt, buffers);
        self.bus.track(result)
    }

    fn read_inner(
        &mut self,
        samples: usize,
        do_halt: bool,
        buffers: &mut [&mut [i16]],
    ) -> Result<()> {
        let (requested, width) = match self.session.as_ref() {
            Some(session) => (
                session.topology.requested_adc.len(),
                session.topology.physical_adc_count(),
            ),
            None => return Err(self.invalid_state("read")),
        };
        check_buffers(
            "ADC",
            buffers.iter().map(|b| b.len()),
            buffers.len(),
            requested,
            samples,
        )?;

        let available = self.available_inner()?.samples;
        if samples > available {
            return Err(ClampError::ReadExceedsAvailable {
                requested: samples,
                available,
            });
        }

        if samples > 0 && width > 0 {
            let mut raw = vec![0i16; samples * width];
            if let Err(err) = self
                .bus
                .with(|transport| transport.read_adc(samples, &mut raw))
            {
                self.transport_fault("read_adc", &err);
                return Err(err);
            }
            deinterleave(&raw, width, samples, buffers);
        }

        if let Some(session) = self.session.as_mut() {
            session.advance_adc(samples as u64);
            session.stats.samples_read += samples as u64;
            session.refresh_stats();
        }

        if do_halt {
            self.halt_inner()?;
        }
        Ok(())
    }

    /// Queue `samples` more stimulus samples per requested DAC channel.
    ///
    /// Requires DAC output and an armed or running session whose stimulus
    /// has not ended. The cumulative appended count may not exceed the
    /// cumulative ADC samples read; once they are equal only a call with
    /// `set_stim_end` is accepted. With `set_stim_end` the board's trailing
    /// padding follows the data and no further appends are accepted.
    pub fn append(&mut self, samples: usize, set_stim_end: bool, stimulus: &[&[i16]]) -> Result<()> {
        let result = self.append_inner(samples, set_stim_end, stimulus);
        self.bus.track(result)
    }

    fn append_inner(&mut self, samples: usize, set_stim_end: bool, stimulus: &[&[i16]]) -> Result<()> {
        let Some(session) = self.session.as_ref() else {
            return Err(self.invalid_state("append"));
        };
        if !session.request.drives_dac() {
            return Err(ClampError::InvalidState {
                operation: "append",
                state: "DAC output is disabled".to_string(),
            });
        }
        if !self.state.is_active() {
            return Err(self.invalid_state("append"));
        }
        if session.stim_ended {
            return Err(ClampError::InvalidState {
                operation: "append",
                state: "the stimulus has ended".to_string(),
            });
        }
        let credit = session.credit();
        if samples as u64 > credit || (credit == 0 && !set_stim_end) {
            return Err(ClampError::AppendExceedsCredit {
                requested: samples,
                credit,
            });
        }
        check_buffers(
            "stimulus",
            stimulus.iter().map(|b| b.len()),
            stimulus.len(),
            session.topology.requested_dac.len(),
            samples,
        )?;
        if samples == 0 && !set_stim_end {
            return Ok(());
        }

        let width = session.topology.physical_dac_count();
        let mut data = interleave(stimulus, width, samples);
        let last_scan = if samples > 0 {
            last_scan_of(&data, width)
        } else {
            session.last_scan.clone()
        };
        if set_stim_end {
            data.extend(padding(&last_scan, width, self.board.stim_end_padding));
        }

        if let Err(err) = self.bus.with(|transport| transport.write_dac(&data)) {
            self.transport_fault("write_dac", &err);
            return Err(err);
        }

        if let Some(session) = self.session.as_mut() {
            session.advance_dac(samples as u64);
            session.appended += samples as u64;
            session.stats.samples_appended += samples as u64;
            session.last_scan = last_scan;
            if set_stim_end {
                session.stim_ended = true;
                debug!(written = session.dac_written(), "stimulus ended");
            }
        }
        Ok(())
    }

    // =========================================================================
    // Halt
    // =========================================================================

    /// Stop the acquisition and release the session. Halting an idle
    /// engine does nothing.
    pub fn halt(&mut self) -> Result<()> {
        let result = self.halt_inner();
        self.bus.track(result)
    }

    fn halt_inner(&mut self) -> Result<()> {
        match self.state {
            EngineState::Idle => Ok(()),
            EngineState::Armed | EngineState::Running => {
                if let Err(err) = self.bus.with(|transport| transport.stop_transfer()) {
                    self.transport_fault("stop_transfer", &err);
                    return Err(err);
                }
                info!(stats = ?self.stats(), "acquisition halted");
                self.release();
                Ok(())
            }
            EngineState::Halted | EngineState::Completed => {
                self.release();
                Ok(())
            }
        }
    }

    /// Reset the acquisition hardware unconditionally. The engine ends
    /// `Idle` even when the bus reports a failure.
    pub fn force_halt(&mut self) -> Result<()> {
        let timeout = self.bus.timeout();
        let result = self
            .bus
            .with(|transport| transport.force_stop(timeout));
        if self.state != EngineState::Idle {
            warn!(state = %self.state, "acquisition force-halted");
        }
        self.release();
        self.bus.track(result)
    }
}

impl Drop for AcquisitionEngine {
    fn drop(&mut self) {
        if self.state.is_active() {
            if let Err(e) = self.bus.with(|transport| transport.stop_transfer()) {
                error!("Error stopping acquisition on drop: {}", e);
            }
        }
    }
}

// =============================================================================
// Scan Layout
// =============================================================================

/// Check one buffer per requested channel, each holding `samples`.
fn check_buffers(
    what: &str,
    lengths: impl Iterator<Item = usize>,
    count: usize,
    requested: usize,
    samples: usize,
) -> Result<()> {
    if count != requested {
        return Err(ClampError::InvalidBuffer(format!(
            "{} {} buffers for {} channels",
            count, what, requested
        )));
    }
    if let Some((index, len)) = lengths.enumerate().find(|(_, len)| *len < samples) {
        return Err(ClampError::InvalidBuffer(format!(
            "{} buffer {} holds {} samples, {} needed",
            what, index, len, samples
        )));
    }
    Ok(())
}

/// Interleave the first `samples` scans of one buffer per requested channel
/// into `width` physical slots. Padded slots repeat the requested channel
/// they cycle back to.
fn interleave(buffers: &[&[i16]], width: usize, samples: usize) -> Vec<i16> {
    if buffers.is_empty() || width == 0 {
        return Vec::new();
    }
    let mut out = Vec::with_capacity(samples * width);
    for scan in 0..samples {
        for slot in 0..width {
            let source = buffers[slot % buffers.len()];
            out.push(source.get(scan).copied().unwrap_or(0));
        }
    }
    out
}

/// Scatter interleaved scans into one buffer per requested channel; padded
/// slots are dropped.
fn deinterleave(raw: &[i16], width: usize, samples: usize, buffers: &mut [&mut [i16]]) {
    for (position, buffer) in buffers.iter_mut().enumerate() {
        for (dst, scan) in buffer.iter_mut().zip(raw.chunks(width)).take(samples) {
            if let Some(&value) = scan.get(position) {
                *dst = value;
            }
        }
    }
}

fn last_scan_of(data: &[i16], width: usize) -> Vec<i16> {
    if width == 0 || data.len() < width {
        return Vec::new();
    }
    data[data.len() - width..].to_vec()
}

/// `scans` repetitions of the final scan, or zeros without one.
fn padding(last_scan: &[i16], width: usize, scans: usize) -> Vec<i16> {
    if last_scan.len() == width {
        last_scan.repeat(scans)
    } else {
        vec![0; width * scans]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clamp_core::channel::{AdcChannel, DacChannel};
    use clamp_core::transport::shared;
    use clamp_driver_mock::{MockBoard, MockHandle};

    fn engine() -> (AcquisitionEngine, MockHandle) {
        let board = MockBoard::lih88();
        let handle = board.handle();
        let bus = BusContext::new(shared(board), Duration::from_secs(1));
        (
            AcquisitionEngine::new(bus, BoardInfo::lih88(), Duration::from_micros(10)),
            handle,
        )
    }

    #[test]
    fn test_interleave_repeats_padded_slots() {
        let a: &[i16] = &[1, 2, 3];
        let b: &[i16] = &[10, 20, 30];
        let c: &[i16] = &[100, 200, 300];
        let data = interleave(&[a, b, c], 4, 2);
        assert_eq!(data, vec![1, 10, 100, 1, 2, 20, 200, 2]);
    }

    #[test]
    fn test_deinterleave_drops_padded_slots() {
        let raw = [1, 10, 100, 1, 2, 20, 200, 2];
        let mut x = [0i16; 2];
        let mut y = [0i16; 2];
        let mut z = [0i16; 2];
        let mut buffers: Vec<&mut [i16]> = vec![&mut x, &mut y, &mut z];
        deinterleave(&raw, 4, 2, &mut buffers);
        assert_eq!(x, [1, 2]);
        assert_eq!(y, [10, 20]);
        assert_eq!(z, [100, 200]);
    }

    #[test]
    fn test_padding_repeats_last_scan() {
        assert_eq!(padding(&[5, 6], 2, 2), vec![5, 6, 5, 6]);
        assert_eq!(padding(&[], 2, 1), vec![0, 0]);
        assert_eq!(last_scan_of(&[1, 2, 3, 4], 2), vec![3, 4]);
    }

    #[test]
    fn test_operations_rejected_while_idle() {
        let (mut engine, _) = engine();
        assert!(matches!(
            engine.available(),
            Err(ClampError::InvalidState { .. })
        ));
        assert!(engine.append(1, false, &[&[0]]).is_err());
        let mut buf = [0i16; 1];
        assert!(engine.read(1, false, &mut [&mut buf]).is_err());
        assert_eq!(engine.state(), EngineState::Idle);
        assert_eq!(engine.status(), InterfaceStatus::Idle);
    }

    #[test]
    fn test_capacity_uses_fifo_per_channel() {
        let (mut engine, _) = engine();
        let request = AcquisitionRequest::builder()
            .adc_channels(&[AdcChannel::Analog(0), AdcChannel::Analog(1)])
            .adc_samples(100)
            .continuous(true)
            .build()
            .unwrap();
        engine.start(&request, &[], None).unwrap();
        let view = engine.session().unwrap();
        assert_eq!(view.capacity(), (1_048_576 / 2) as u64);
        assert_eq!(view.adc_cursors().len(), 2);
    }

    #[test]
    fn test_stimulus_buffer_shape_checked() {
        let (mut engine, handle) = engine();
        let request = AcquisitionRequest::builder()
            .dac_channels(&[DacChannel::Analog(0), DacChannel::Analog(1)])
            .adc_channels(&[AdcChannel::Analog(0)])
            .samples(4)
            .mode(AcquisitionMode::ENABLE_DAC_OUTPUT)
            .build()
            .unwrap();
        let short: &[i16] = &[1, 2];
        let full: &[i16] = &[1, 2, 3, 4];
        assert!(matches!(
            engine.start(&request, &[full], None),
            Err(ClampError::InvalidBuffer(_))
        ));
        assert!(matches!(
            engine.start(&request, &[full, short], None),
            Err(ClampError::InvalidBuffer(_))
        ));
        assert!(handle.events().is_empty());
        assert_eq!(engine.state(), EngineState::Idle);
    }
}
