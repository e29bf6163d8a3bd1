//! Initialization and shutdown of a complete amplifier + interface system.
//!
//! [`EpcSystem`] ties together everything that shares one bus: the
//! amplifier boards, the acquisition engine, the single-shot interface and
//! the digital port. They all hold clones of one [`BusContext`], so the bus
//! timeout and the last-error slot are common to the whole system.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use clamp_core::board::{BoardInfo, BoardType};
use clamp_core::command::AmplifierKind;
use clamp_core::config::InitOptions;
use clamp_core::error::{ClampError, ErrorCode, Result, TransportError};
use clamp_core::status::{truncate_to_boundary, InterfaceStatus, ERROR_TEXT_CAPACITY};
use clamp_core::transport::{self, BoardTransport, DeviceIdentity};
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::amplifier::Amplifier;
use crate::bus::BusContext;
use crate::cache::FlushBeforeStart;
use crate::digital::{reserved_bits, DigitalPort};
use crate::engine::{AcquisitionEngine, AcquisitionRequest, StartOutcome};
use crate::interface::Interface;
use crate::units::ScalingTable;

// =============================================================================
// Initialization Results
// =============================================================================

/// Outcome code of [`EpcSystem::initialize`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InitResult {
    /// Everything initialized.
    Success,
    /// The interface could not be opened.
    InitFailed,
    /// The amplifier firmware did not respond.
    FirmwareError,
    /// Initialized, but the scale file is missing.
    NoScaleFile,
    /// Initialized, but the CFast file is missing.
    NoCFastFile,
}

impl InitResult {
    /// Numeric result code.
    pub fn code(self) -> i32 {
        match self {
            InitResult::Success => 0,
            InitResult::InitFailed => 1,
            InitResult::FirmwareError => 2,
            InitResult::NoScaleFile => 3,
            InitResult::NoCFastFile => 4,
        }
    }

    /// The system is usable.
    pub fn is_usable(self) -> bool {
        matches!(
            self,
            InitResult::Success | InitResult::NoScaleFile | InitResult::NoCFastFile
        )
    }
}

impl std::fmt::Display for InitResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            InitResult::Success => "success",
            InitResult::InitFailed => "init failed",
            InitResult::FirmwareError => "firmware error",
            InitResult::NoScaleFile => "no scale file",
            InitResult::NoCFastFile => "no CFast file",
        };
        write!(f, "{}", label)
    }
}

/// Fatal initialization failure.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("{code}: {message}")]
pub struct InitError {
    /// `InitFailed` or `FirmwareError`.
    pub code: InitResult,
    /// Description, at most 255 bytes.
    pub message: String,
}

impl InitError {
    fn new(code: InitResult, message: impl AsRef<str>) -> Self {
        Self {
            code,
            message: truncate_to_boundary(message.as_ref(), ERROR_TEXT_CAPACITY).to_string(),
        }
    }
}

/// A usable system, possibly still missing calibration files.
#[derive(Debug)]
pub struct Initialized {
    /// The system.
    pub system: EpcSystem,
    /// `Success`, `NoScaleFile` or `NoCFastFile`.
    pub result: InitResult,
    /// Description of a non-success result, at most 255 bytes.
    pub message: String,
}

/// Borrow of every component at once.
#[derive(Debug)]
pub struct SystemParts<'a> {
    /// Amplifier boards.
    pub amplifier: &'a mut Amplifier,
    /// Acquisition engine.
    pub engine: &'a mut AcquisitionEngine,
    /// Single-shot interface.
    pub interface: &'a Interface,
    /// Digital port.
    pub digital: &'a DigitalPort,
}

// =============================================================================
// EpcSystem
// =============================================================================

/// An initialized amplifier and interface.
#[derive(Debug)]
pub struct EpcSystem {
    kind: AmplifierKind,
    bus: BusContext,
    board: BoardInfo,
    identity: DeviceIdentity,
    scaling: Arc<ScalingTable>,
    amplifier: Amplifier,
    engine: AcquisitionEngine,
    interface: Interface,
    digital: DigitalPort,
    options: InitOptions,
    scale_dir: PathBuf,
    calibration_loaded: bool,
    shut_down: bool,
}

/// Close the bus after a failed initialization.
fn abandon(bus: &BusContext) {
    if let Err(err) = bus.with(|transport| transport.close()) {
        warn!(error = %err, "closing the bus after failed initialization failed");
    }
}

impl EpcSystem {
    /// Open the interface, identify the amplifier and load its calibration.
    ///
    /// `scale_path` is the directory holding the scale and CFast files
    /// (`None` for the working directory). Missing calibration files are not
    /// fatal: the system is returned with `NoScaleFile`/`NoCFastFile` and
    /// [`load_scale_files`](Self::load_scale_files) can retry. EPC 7 and
    /// EPC 8 amplifiers have no computer-controlled boards and need no files.
    pub fn initialize<T: BoardTransport + 'static>(
        device: T,
        kind: AmplifierKind,
        scale_path: Option<&Path>,
        options: InitOptions,
    ) -> std::result::Result<Initialized, InitError> {
        let bus = BusContext::new(transport::shared(device), options.bus_timeout);

        let identity = match bus.with(|transport| transport.open(&options)) {
            Ok(identity) => identity,
            Err(ClampError::Transport(TransportError::DeviceBusy(reason))) => {
                error!(%reason, "interface locked");
                return Err(InitError::new(
                    InitResult::InitFailed,
                    format!("interface locked: {}", reason),
                ));
            }
            Err(err) => {
                error!(error = %err, "interface could not be opened");
                return Err(InitError::new(InitResult::InitFailed, err.to_string()));
            }
        };

        let mut board = bus.transport().lock().board_info();
        if matches!(board.board_type, BoardType::Lih1600 | BoardType::Lih88) {
            board.fifo_length = options.fifo_samples;
        }

        let scaling = if options.external_scaling {
            match ScalingTable::external(&identity.dac_scaling, &identity.adc_scaling) {
                Ok(table) => table,
                Err(err) => {
                    abandon(&bus);
                    return Err(InitError::new(InitResult::InitFailed, err.to_string()));
                }
            }
        } else {
            ScalingTable::internal()
        };

        let board_count = if kind.has_amplifier_boards() {
            if !identity.firmware_ok || identity.amplifier_boards == 0 {
                abandon(&bus);
                return Err(InitError::new(
                    InitResult::FirmwareError,
                    format!("{} did not answer on the amplifier link", kind),
                ));
            }
            identity.amplifier_boards
        } else {
            0
        };

        let scaling = Arc::new(scaling);
        let reserved = reserved_bits(kind, options.trigger_box);
        let mut system = EpcSystem {
            kind,
            amplifier: Amplifier::new(kind, board_count, options.max_probes, bus.clone()),
            engine: AcquisitionEngine::new(
                bus.clone(),
                board.clone(),
                options.immediate_poll_interval,
            ),
            interface: Interface::new(bus.clone(), board.clone(), Arc::clone(&scaling)),
            digital: DigitalPort::new(bus.clone(), reserved),
            bus,
            board,
            identity,
            scaling,
            scale_dir: scale_path.map_or_else(|| PathBuf::from("."), Path::to_path_buf),
            options,
            calibration_loaded: false,
            shut_down: false,
        };

        let (result, message) = if kind.has_amplifier_boards() {
            let dir = system.scale_dir.clone();
            match system.load_scale_files(&dir) {
                Ok(()) => (InitResult::Success, String::new()),
                Err(err @ ClampError::NoScaleFile { .. }) => {
                    (InitResult::NoScaleFile, err.to_string())
                }
                Err(err @ ClampError::NoCFastFile { .. }) => {
                    (InitResult::NoCFastFile, err.to_string())
                }
                Err(err) => {
                    return Err(InitError::new(InitResult::FirmwareError, err.to_string()));
                }
            }
        } else {
            (InitResult::Success, String::new())
        };

        info!(
            amplifier = %system.kind,
            board = %system.board.board_type,
            serial = %system.identity.serial_number,
            amplifier_boards = board_count,
            external_scaling = system.scaling.is_external(),
            result = %result,
            "system initialized"
        );
        if result != InitResult::Success {
            warn!(%message, "calibration files missing, amplifier values are uncalibrated");
        }

        Ok(Initialized {
            system,
            result,
            message: truncate_to_boundary(&message, ERROR_TEXT_CAPACITY).to_string(),
        })
    }

    /// Read the scale and CFast files from `dir` and install them.
    pub fn load_scale_files(&mut self, dir: &Path) -> Result<()> {
        if !self.kind.has_amplifier_boards() {
            debug!(amplifier = %self.kind, "no calibration files needed");
            return Ok(());
        }
        let result = self.install_calibration(dir);
        if result.is_ok() {
            self.calibration_loaded = true;
            self.scale_dir = dir.to_path_buf();
            info!(dir = %dir.display(), "calibration installed");
        }
        self.bus.track(result)
    }

    fn install_calibration(&self, dir: &Path) -> Result<()> {
        let scale_path = dir.join(&self.options.scale_file_name);
        let scale = fs::read(&scale_path).map_err(|err| {
            debug!(path = %scale_path.display(), error = %err, "scale file not readable");
            ClampError::NoScaleFile {
                path: scale_path.display().to_string(),
            }
        })?;
        let cfast_path = dir.join(&self.options.cfast_file_name);
        let cfast = fs::read(&cfast_path).map_err(|err| {
            debug!(path = %cfast_path.display(), error = %err, "CFast file not readable");
            ClampError::NoCFastFile {
                path: cfast_path.display().to_string(),
            }
        })?;
        self.bus
            .with(|transport| transport.install_calibration(&scale, &cfast))
    }

    // ===== Identity =====

    /// Amplifier model.
    pub fn kind(&self) -> AmplifierKind {
        self.kind
    }

    /// Identity reported by the hardware.
    pub fn identity(&self) -> &DeviceIdentity {
        &self.identity
    }

    /// Amplifier serial number.
    pub fn serial_number(&self) -> &str {
        &self.identity.serial_number
    }

    /// Interface device number.
    pub fn device_number(&self) -> &str {
        &self.identity.device_number
    }

    /// Board capabilities.
    pub fn board_info(&self) -> &BoardInfo {
        &self.board
    }

    /// Scaling table shared with the interface.
    pub fn scaling(&self) -> &Arc<ScalingTable> {
        &self.scaling
    }

    /// Whether calibration files are installed.
    pub fn calibration_loaded(&self) -> bool {
        self.calibration_loaded
    }

    // ===== Components =====

    /// Amplifier boards.
    pub fn amplifier(&self) -> &Amplifier {
        &self.amplifier
    }

    /// Amplifier boards, for configuration.
    pub fn amplifier_mut(&mut self) -> &mut Amplifier {
        &mut self.amplifier
    }

    /// Acquisition engine.
    pub fn engine(&self) -> &AcquisitionEngine {
        &self.engine
    }

    /// Acquisition engine, for running sessions.
    pub fn engine_mut(&mut self) -> &mut AcquisitionEngine {
        &mut self.engine
    }

    /// Digital port.
    pub fn digital(&self) -> &DigitalPort {
        &self.digital
    }

    /// Single-shot interface; unavailable while a session is armed or
    /// running.
    pub fn interface(&self) -> Result<&Interface> {
        let state = self.engine.state();
        if state.is_active() {
            return self.bus.track(Err(ClampError::InvalidState {
                operation: "single-shot access",
                state: state.to_string(),
            }));
        }
        Ok(&self.interface)
    }

    /// Every component at once.
    pub fn parts_mut(&mut self) -> SystemParts<'_> {
        SystemParts {
            amplifier: &mut self.amplifier,
            engine: &mut self.engine,
            interface: &self.interface,
            digital: &self.digital,
        }
    }

    /// Start an acquisition after flushing `active_board`'s pending
    /// commands.
    pub fn start(
        &mut self,
        active_board: Option<usize>,
        request: &AcquisitionRequest,
        stimulus: &[&[i16]],
    ) -> Result<StartOutcome> {
        match active_board {
            Some(index) => {
                let mut board = self.amplifier.with_board(index)?;
                self.engine.start(
                    request,
                    stimulus,
                    Some(&mut board as &mut dyn FlushBeforeStart),
                )
            }
            None => self.engine.start(request, stimulus, None),
        }
    }

    // ===== Status =====

    /// Change the bus timeout of the whole system.
    pub fn set_timeout(&self, seconds: f64) -> Result<()> {
        if !(seconds.is_finite() && seconds > 0.0) {
            return self.bus.track(Err(ClampError::InvalidParameter(format!(
                "bus timeout must be positive, got {}",
                seconds
            ))));
        }
        match Duration::try_from_secs_f64(seconds) {
            Ok(timeout) => self.bus.set_timeout(timeout),
            Err(err) => self.bus.track(Err(ClampError::InvalidParameter(format!(
                "bus timeout of {} s out of range: {}",
                seconds, err
            )))),
        }
    }

    /// Current bus timeout.
    pub fn timeout(&self) -> Duration {
        self.bus.timeout()
    }

    /// Code of the last failing call.
    pub fn last_error(&self) -> ErrorCode {
        self.bus.last_error().code()
    }

    /// Message of the last failing call.
    pub fn last_error_text(&self) -> String {
        self.bus.last_error().text()
    }

    /// Interface status.
    pub fn status(&self) -> InterfaceStatus {
        if self.shut_down {
            InterfaceStatus::Unknown
        } else {
            self.engine.status()
        }
    }

    /// Whether [`shutdown`](Self::shutdown) has run.
    pub fn is_shut_down(&self) -> bool {
        self.shut_down
    }

    // ===== Shutdown =====

    /// Leave the hardware in a safe state and release the bus.
    ///
    /// Force-halts any acquisition, switches every amplifier board to
    /// voltage clamp, zeroes every analog DAC and closes the bus. Each step
    /// runs even if an earlier one failed; the first failure is returned.
    /// Calling it again does nothing.
    pub fn shutdown(&mut self) -> Result<()> {
        if self.shut_down {
            return Ok(());
        }
        self.shut_down = true;

        let mut first_error = None;
        if let Err(err) = self.engine.force_halt() {
            first_error.get_or_insert(err);
        }
        if let Err(err) = self.amplifier.enter_safe_state() {
            first_error.get_or_insert(err);
        }
        for channel in 0..self.board.dac_channels as u16 {
            if let Err(err) = self.bus.with(|transport| transport.set_dac(channel, 0)) {
                first_error.get_or_insert(err);
            }
        }
        if let Err(err) = self.bus.with(|transport| transport.close()) {
            first_error.get_or_insert(err);
        }

        match first_error {
            Some(err) => {
                warn!(error = %err, "shutdown completed with errors");
                self.bus.track(Err(err))
            }
            None => {
                info!("system shut down");
                Ok(())
            }
        }
    }
}

impl Drop for EpcSystem {
    fn drop(&mut self) {
        if let Err(e) = self.shutdown() {
            error!("Error shutting down on drop: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clamp_core::channel::DacChannel;
    use clamp_core::command::AmplifierSetting;
    use clamp_driver_mock::{ErrorConfig, ErrorScenario, MockBoard, MockEvent};
    use std::fs;

    fn scale_dir() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        let options = InitOptions::default();
        fs::write(dir.path().join(&options.scale_file_name), b"scale").unwrap();
        fs::write(dir.path().join(&options.cfast_file_name), b"cfast").unwrap();
        dir
    }

    #[test]
    fn test_initialize_with_calibration() {
        let dir = scale_dir();
        let board = MockBoard::lih88();
        let handle = board.handle();
        let init = EpcSystem::initialize(
            board,
            AmplifierKind::Epc10Usb,
            Some(dir.path()),
            InitOptions::default(),
        )
        .unwrap();
        assert_eq!(init.result, InitResult::Success);
        assert!(init.message.is_empty());
        assert!(init.system.calibration_loaded());
        assert!(handle.calibration_installed());
        assert_eq!(init.system.serial_number(), "MOCK-000001");
        assert_eq!(init.system.amplifier().board_count(), 1);
        assert_eq!(
            init.system.board_info().fifo_length,
            InitOptions::default().fifo_samples
        );
    }

    #[test]
    fn test_missing_scale_file_is_not_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let init = EpcSystem::initialize(
            MockBoard::lih88(),
            AmplifierKind::Epc10Usb,
            Some(dir.path()),
            InitOptions::default(),
        )
        .unwrap();
        assert_eq!(init.result, InitResult::NoScaleFile);
        assert_eq!(init.result.code(), 3);
        assert!(init.result.is_usable());
        assert!(!init.system.calibration_loaded());
        assert_eq!(init.system.last_error(), ErrorCode::NoScaleFile);
    }

    #[test]
    fn test_firmware_silent() {
        let board = MockBoard::lih88().with_amplifier_boards(0);
        let handle = board.handle();
        let err = EpcSystem::initialize(board, AmplifierKind::Epc9, None, InitOptions::default())
            .unwrap_err();
        assert_eq!(err.code, InitResult::FirmwareError);
        assert!(!handle.is_open());
    }

    #[test]
    fn test_locked_interface() {
        let board = MockBoard::lih88().with_errors(ErrorConfig::scenario(ErrorScenario::Locked));
        let err =
            EpcSystem::initialize(board, AmplifierKind::Epc10Usb, None, InitOptions::default())
                .unwrap_err();
        assert_eq!(err.code, InitResult::InitFailed);
        assert!(err.message.contains("locked"));
    }

    #[test]
    fn test_interface_unavailable_while_running() {
        let mut system = EpcSystem::initialize(
            MockBoard::lih88(),
            AmplifierKind::Epc8,
            None,
            InitOptions::default(),
        )
        .unwrap()
        .system;
        let request = AcquisitionRequest::builder()
            .adc_channels(&[clamp_core::channel::AdcChannel::Analog(0)])
            .samples(100)
            .continuous(true)
            .build()
            .unwrap();
        system.start(None, &request, &[]).unwrap();
        assert!(matches!(
            system.interface(),
            Err(ClampError::InvalidState { .. })
        ));
        system.engine_mut().halt().unwrap();
        assert!(system.interface().is_ok());
    }

    #[test]
    fn test_start_flushes_active_board() {
        let dir = scale_dir();
        let board = MockBoard::lih88();
        let handle = board.handle();
        let mut system = EpcSystem::initialize(
            board,
            AmplifierKind::Epc10Usb,
            Some(dir.path()),
            InitOptions::default(),
        )
        .unwrap()
        .system;
        system
            .amplifier_mut()
            .with_board(0)
            .unwrap()
            .set_v_hold(-0.07);
        assert!(handle.transmitted().is_empty());
        let request = AcquisitionRequest::builder()
            .adc_channels(&[clamp_core::channel::AdcChannel::Analog(0)])
            .samples(10)
            .build()
            .unwrap();
        system.start(Some(0), &request, &[]).unwrap();
        let sent = handle.transmitted();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].setting, AmplifierSetting::VHold(-0.07));
    }

    #[test]
    fn test_shutdown_once() {
        let board = MockBoard::lih88();
        let handle = board.handle();
        let mut system = EpcSystem::initialize(
            board,
            AmplifierKind::Epc8,
            None,
            InitOptions::default(),
        )
        .unwrap()
        .system;
        system
            .interface()
            .unwrap()
            .set_dac(DacChannel::Analog(2), 1.0)
            .unwrap();
        system.shutdown().unwrap();
        assert!(system.is_shut_down());
        assert_eq!(system.status(), InterfaceStatus::Unknown);
        assert_eq!(handle.dac_level(2), Some(0));
        assert!(!handle.is_open());
        handle.clear_log();
        system.shutdown().unwrap();
        drop(system);
        assert!(!handle.events().contains(&MockEvent::Close));
    }

    #[test]
    fn test_timeout_shared() {
        let init = EpcSystem::initialize(
            MockBoard::lih88(),
            AmplifierKind::Epc8,
            None,
            InitOptions::default(),
        )
        .unwrap();
        let system = init.system;
        system.set_timeout(0.25).unwrap();
        assert_eq!(system.timeout(), Duration::from_millis(250));
        assert!(system.set_timeout(0.0).is_err());
        assert_eq!(system.last_error(), ErrorCode::InvalidParameter);
        assert!(!system.last_error_text().is_empty());
    }

    #[test]
    fn test_init_error_message_truncated() {
        let err = InitError::new(InitResult::InitFailed, "x".repeat(400));
        assert_eq!(err.message.len(), ERROR_TEXT_CAPACITY);
    }
}
