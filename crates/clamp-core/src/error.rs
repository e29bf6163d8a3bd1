//! Error types shared by the amplifier, interface and acquisition layers.
//!
//! [`ClampError`] is the one error type returned by the public API. Every
//! variant belongs to exactly one [`ErrorKind`]:
//!
//! - **`Configuration`**: invalid channel lists, duplicate channels, unsupported
//!   combinations of counts, modes or intervals. Rejected before anything is
//!   sent to the hardware.
//! - **`Transport`**: the bus failed (timeout, detached device, protocol error).
//!   During an active session this forces the engine to `Halted`.
//! - **`Resource`**: scale or CFast calibration files are missing. Recoverable by
//!   reloading the files.
//! - **`State`**: the operation is not valid in the present engine state, e.g.
//!   `append` before `start`. Never mutates engine state.
//! - **`OverrunUnderrun`**: the FIFO ran over (ADC) or under (DAC) and the mode
//!   flags did not suppress it.
//!
//! Each variant also maps to a stable numeric [`ErrorCode`], which is what the
//! last-error slot reports to clients that poll for failures.

use std::time::Duration;

use thiserror::Error;

use crate::channel::Direction;

/// Convenience alias for results using [`ClampError`].
pub type Result<T> = std::result::Result<T, ClampError>;

// =============================================================================
// Taxonomy
// =============================================================================

/// Broad category of a [`ClampError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Invalid channel list, duplicate channel, unsupported combination.
    Configuration,
    /// Bus communication failure, timeout or detached device.
    Transport,
    /// Calibration data missing.
    Resource,
    /// Operation invalid in the current state.
    State,
    /// FIFO boundary condition.
    OverrunUnderrun,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            ErrorKind::Configuration => "configuration",
            ErrorKind::Transport => "transport",
            ErrorKind::Resource => "resource",
            ErrorKind::State => "state",
            ErrorKind::OverrunUnderrun => "overrun_underrun",
        };
        write!(f, "{}", label)
    }
}

/// Numeric error code reported through the last-error slot.
///
/// `NoError` (0) means the last failing call has been cleared or no call
/// has failed yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(i32)]
pub enum ErrorCode {
    /// No error recorded.
    #[default]
    NoError = 0,
    /// Invalid channel identifier or channel count.
    InvalidChannel = 10,
    /// The same channel appears twice in one list.
    DuplicateChannel = 11,
    /// Unsupported parameter combination.
    UnsupportedCombination = 12,
    /// Invalid sample count or buffer shape.
    InvalidBuffer = 13,
    /// Invalid value (interval, timeout, mask).
    InvalidParameter = 14,
    /// Bus timed out.
    TransportTimeout = 20,
    /// Bus communication failed.
    TransportFailure = 21,
    /// Device detached from the bus.
    DeviceDetached = 22,
    /// Interface could not be initialized.
    InitFailed = 23,
    /// Amplifier firmware check failed.
    FirmwareError = 24,
    /// The scale file could not be found.
    NoScaleFile = 30,
    /// The CFast file could not be found.
    NoCFastFile = 31,
    /// Operation not valid in the present state.
    InvalidState = 40,
    /// A session is already armed or running.
    SessionAlreadyActive = 41,
    /// Read requested more samples than available.
    ReadExceedsAvailable = 42,
    /// Append would let the DAC side outrun the ADC side.
    AppendExceedsCredit = 43,
    /// ADC FIFO overrun.
    Overrun = 50,
    /// DAC FIFO underrun.
    Underrun = 51,
}

impl ErrorCode {
    /// Raw numeric value of the code.
    pub fn as_i32(self) -> i32 {
        self as i32
    }
}

// =============================================================================
// Transport Errors
// =============================================================================

/// Failure reported by a [`BoardTransport`](crate::transport::BoardTransport).
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TransportError {
    /// The bus did not acknowledge within the allotted time.
    #[error("{operation} timed out after {timeout:?}")]
    Timeout {
        /// Bus operation that timed out.
        operation: &'static str,
        /// Timeout that elapsed.
        timeout: Duration,
    },

    /// The device disappeared from the bus.
    #[error("device detached")]
    Detached,

    /// The interface is held by another transfer.
    #[error("interface locked: {0}")]
    DeviceBusy(String),

    /// The device answered with something unexpected.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Host-side I/O failure.
    #[error("I/O error: {0}")]
    Io(String),

    /// The requested operation is not available on this board.
    #[error("not supported by this board: {0}")]
    NotSupported(String),
}

impl From<std::io::Error> for TransportError {
    fn from(err: std::io::Error) -> Self {
        TransportError::Io(err.to_string())
    }
}

/// Convenience alias for transport results.
pub type TransportResult<T> = std::result::Result<T, TransportError>;

// =============================================================================
// ClampError
// =============================================================================

/// Primary error type of the workspace.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ClampError {
    /// A channel identifier is not valid for this board.
    #[error("invalid {direction} channel {channel}: {reason}")]
    InvalidChannel {
        /// DAC or ADC list.
        direction: Direction,
        /// Raw channel index.
        channel: u16,
        /// Why it was rejected.
        reason: String,
    },

    /// A channel appears twice in the same list.
    #[error("{direction} channel {channel} listed more than once")]
    DuplicateChannel {
        /// DAC or ADC list.
        direction: Direction,
        /// Raw channel index.
        channel: u16,
    },

    /// Too many channels requested for one direction.
    #[error("{requested} {direction} channels requested, at most {max} supported")]
    TooManyChannels {
        /// DAC or ADC list.
        direction: Direction,
        /// Requested count.
        requested: usize,
        /// Supported maximum.
        max: usize,
    },

    /// Parameter combination the board cannot do.
    #[error("unsupported combination: {0}")]
    UnsupportedCombination(String),

    /// Buffer count or length does not match the session.
    #[error("invalid buffer: {0}")]
    InvalidBuffer(String),

    /// A scalar parameter is out of range.
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    /// Bus failure.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// Interface initialization failed.
    #[error("initialization failed: {0}")]
    InitFailed(String),

    /// Amplifier firmware did not respond as expected.
    #[error("firmware error: {0}")]
    Firmware(String),

    /// The amplifier scale file was not found.
    #[error("scale file not found: {path}")]
    NoScaleFile {
        /// Path that was searched.
        path: String,
    },

    /// The amplifier CFast file was not found.
    #[error("CFast file not found: {path}")]
    NoCFastFile {
        /// Path that was searched.
        path: String,
    },

    /// Operation rejected in the current engine state.
    #[error("{operation} not allowed while {state}")]
    InvalidState {
        /// Rejected operation.
        operation: &'static str,
        /// Engine state at the time of the call.
        state: String,
    },

    /// `start` while a session is armed or running.
    #[error("an acquisition session is already active ({state})")]
    SessionAlreadyActive {
        /// State of the active session.
        state: String,
    },

    /// `read` asked for more samples than `available` reported.
    #[error("read of {requested} samples per channel exceeds {available} available")]
    ReadExceedsAvailable {
        /// Requested samples per channel.
        requested: usize,
        /// Samples per channel ready to read.
        available: usize,
    },

    /// `append` would push more DAC data than ADC data consumed.
    #[error("append of {requested} samples per channel exceeds the {credit} samples consumed but not yet refilled")]
    AppendExceedsCredit {
        /// Requested samples per channel.
        requested: usize,
        /// Samples per channel that may still be appended.
        credit: u64,
    },

    /// ADC FIFO overrun.
    #[error("ADC FIFO overrun: {backlog} unread samples per channel exceed capacity {capacity}")]
    Overrun {
        /// Unread samples per channel when detected.
        backlog: u64,
        /// FIFO capacity per channel.
        capacity: u64,
    },

    /// DAC FIFO underrun.
    #[error("DAC FIFO underrun: sample clock at {clocked} passed {written} written samples")]
    Underrun {
        /// Samples clocked out per channel.
        clocked: u64,
        /// DAC samples written per channel.
        written: u64,
    },
}

impl ClampError {
    /// Category of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            ClampError::InvalidChannel { .. }
            | ClampError::DuplicateChannel { .. }
            | ClampError::TooManyChannels { .. }
            | ClampError::UnsupportedCombination(_)
            | ClampError::InvalidBuffer(_)
            | ClampError::InvalidParameter(_) => ErrorKind::Configuration,
            ClampError::Transport(_) | ClampError::InitFailed(_) | ClampError::Firmware(_) => {
                ErrorKind::Transport
            }
            ClampError::NoScaleFile { .. } | ClampError::NoCFastFile { .. } => ErrorKind::Resource,
            ClampError::InvalidState { .. }
            | ClampError::SessionAlreadyActive { .. }
            | ClampError::ReadExceedsAvailable { .. }
            | ClampError::AppendExceedsCredit { .. } => ErrorKind::State,
            ClampError::Overrun { .. } | ClampError::Underrun { .. } => ErrorKind::OverrunUnderrun,
        }
    }

    /// Numeric code for the last-error slot.
    pub fn code(&self) -> ErrorCode {
        match self {
            ClampError::InvalidChannel { .. } | ClampError::TooManyChannels { .. } => {
                ErrorCode::InvalidChannel
            }
            ClampError::DuplicateChannel { .. } => ErrorCode::DuplicateChannel,
            ClampError::UnsupportedCombination(_) => ErrorCode::UnsupportedCombination,
            ClampError::InvalidBuffer(_) => ErrorCode::InvalidBuffer,
            ClampError::InvalidParameter(_) => ErrorCode::InvalidParameter,
            ClampError::Transport(TransportError::Timeout { .. }) => ErrorCode::TransportTimeout,
            ClampError::Transport(TransportError::Detached) => ErrorCode::DeviceDetached,
            ClampError::Transport(_) => ErrorCode::TransportFailure,
            ClampError::InitFailed(_) => ErrorCode::InitFailed,
            ClampError::Firmware(_) => ErrorCode::FirmwareError,
            ClampError::NoScaleFile { .. } => ErrorCode::NoScaleFile,
            ClampError::NoCFastFile { .. } => ErrorCode::NoCFastFile,
            ClampError::InvalidState { .. } => ErrorCode::InvalidState,
            ClampError::SessionAlreadyActive { .. } => ErrorCode::SessionAlreadyActive,
            ClampError::ReadExceedsAvailable { .. } => ErrorCode::ReadExceedsAvailable,
            ClampError::AppendExceedsCredit { .. } => ErrorCode::AppendExceedsCredit,
            ClampError::Overrun { .. } => ErrorCode::Overrun,
            ClampError::Underrun { .. } => ErrorCode::Underrun,
        }
    }

    /// Check if this is a state-machine rejection.
    pub fn is_state_error(&self) -> bool {
        self.kind() == ErrorKind::State
    }

    /// Check if this is a bus timeout.
    pub fn is_timeout(&self) -> bool {
        matches!(self, ClampError::Transport(TransportError::Timeout { .. }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = ClampError::DuplicateChannel {
            direction: Direction::Adc,
            channel: 3,
        };
        assert!(err.to_string().contains("ADC"));
        assert!(err.to_string().contains('3'));
    }

    #[test]
    fn test_kind_mapping() {
        assert_eq!(
            ClampError::ReadExceedsAvailable {
                requested: 10,
                available: 5
            }
            .kind(),
            ErrorKind::State
        );
        assert_eq!(
            ClampError::NoCFastFile { path: "x".into() }.kind(),
            ErrorKind::Resource
        );
        assert_eq!(
            ClampError::Overrun {
                backlog: 10,
                capacity: 5
            }
            .kind(),
            ErrorKind::OverrunUnderrun
        );
        assert_eq!(
            ClampError::from(TransportError::Detached).kind(),
            ErrorKind::Transport
        );
    }

    #[test]
    fn test_timeout_code() {
        let err = ClampError::from(TransportError::Timeout {
            operation: "flush",
            timeout: Duration::from_millis(500),
        });
        assert!(err.is_timeout());
        assert_eq!(err.code(), ErrorCode::TransportTimeout);
        assert_eq!(err.code().as_i32(), 20);
    }

    #[test]
    fn test_default_code_is_no_error() {
        assert_eq!(ErrorCode::default(), ErrorCode::NoError);
        assert_eq!(ErrorCode::NoError.as_i32(), 0);
    }
}
