//! Last-error slot and interface status.
//!
//! Every failing engine or interface call deposits its code and message in
//! the [`LastError`] slot before returning. The slot is shared by all
//! components of one system and is overwritten by the next failure, so the
//! caller has to read it right after the call that failed.

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::{ClampError, ErrorCode};

/// Longest message the slot keeps, in bytes (a 256-byte buffer with NUL).
pub const ERROR_TEXT_CAPACITY: usize = 255;

#[derive(Debug, Default)]
struct ErrorRecord {
    code: ErrorCode,
    text: String,
}

/// Shared, cloneable handle to the last-error slot.
#[derive(Debug, Clone, Default)]
pub struct LastError {
    inner: Arc<Mutex<ErrorRecord>>,
}

impl LastError {
    /// Empty slot.
    pub fn new() -> Self {
        Self::default()
    }

    /// Overwrite the slot with `err`.
    pub fn record(&self, err: &ClampError) {
        let mut record = self.inner.lock();
        record.code = err.code();
        record.text = truncate_to_boundary(&err.to_string(), ERROR_TEXT_CAPACITY).to_string();
    }

    /// Pass `result` through, recording the error if there is one.
    pub fn track<T>(&self, result: Result<T, ClampError>) -> Result<T, ClampError> {
        if let Err(err) = &result {
            self.record(err);
        }
        result
    }

    /// Code of the last failure.
    pub fn code(&self) -> ErrorCode {
        self.inner.lock().code
    }

    /// Message of the last failure, at most [`ERROR_TEXT_CAPACITY`] bytes.
    pub fn text(&self) -> String {
        self.inner.lock().text.clone()
    }

    /// Reset to `NoError`.
    pub fn clear(&self) {
        let mut record = self.inner.lock();
        record.code = ErrorCode::NoError;
        record.text.clear();
    }
}

/// Longest prefix of `text` within `max` bytes that ends on a char boundary.
pub fn truncate_to_boundary(text: &str, max: usize) -> &str {
    if text.len() <= max {
        return text;
    }
    let mut end = max;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}

/// Present state of the interface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum InterfaceStatus {
    /// Not initialized or not known.
    #[default]
    Unknown,
    /// Held by another process. An open system owns its interface, so this
    /// only describes a device that failed to open.
    Locked,
    /// Initialized, no transfer active.
    Idle,
    /// A transfer is armed or running.
    Busy,
    /// The ADC FIFO overflowed during a run that was told to continue.
    AdcOverflow,
}

impl InterfaceStatus {
    /// Numeric status value.
    pub fn code(self) -> i32 {
        match self {
            InterfaceStatus::Unknown => 0,
            InterfaceStatus::Locked => 1,
            InterfaceStatus::Idle => 2,
            InterfaceStatus::Busy => 3,
            InterfaceStatus::AdcOverflow => 4,
        }
    }
}

impl fmt::Display for InterfaceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            InterfaceStatus::Unknown => "unknown",
            InterfaceStatus::Locked => "locked",
            InterfaceStatus::Idle => "idle",
            InterfaceStatus::Busy => "busy",
            InterfaceStatus::AdcOverflow => "adc overflow",
        };
        write!(f, "{}", label)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TransportError;

    #[test]
    fn test_last_error_overwrite() {
        let slot = LastError::new();
        assert_eq!(slot.code(), ErrorCode::NoError);

        slot.record(&ClampError::InvalidParameter("first".into()));
        assert_eq!(slot.code(), ErrorCode::InvalidParameter);
        assert!(slot.text().contains("first"));

        slot.record(&ClampError::from(TransportError::Detached));
        assert_eq!(slot.code(), ErrorCode::DeviceDetached);
        assert!(!slot.text().contains("first"));
    }

    #[test]
    fn test_shared_between_clones() {
        let slot = LastError::new();
        let other = slot.clone();
        other.record(&ClampError::InvalidBuffer("x".into()));
        assert_eq!(slot.code(), ErrorCode::InvalidBuffer);
        slot.clear();
        assert_eq!(other.code(), ErrorCode::NoError);
        assert!(other.text().is_empty());
    }

    #[test]
    fn test_text_truncated() {
        let slot = LastError::new();
        slot.record(&ClampError::InvalidParameter("µ".repeat(400)));
        let text = slot.text();
        assert!(text.len() <= ERROR_TEXT_CAPACITY);
        assert!(text.starts_with("invalid parameter"));
    }

    #[test]
    fn test_track_passes_ok_through() {
        let slot = LastError::new();
        let ok: Result<u8, ClampError> = Ok(3);
        assert_eq!(slot.track(ok), Ok(3));
        assert_eq!(slot.code(), ErrorCode::NoError);
    }
}
