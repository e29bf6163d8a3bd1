//! Core types for patch-clamp amplifier control and synchronized DAC/ADC
//! acquisition.
//!
//! This crate holds everything the driver and the simulated board share:
//!
//! - [`error`]: the [`ClampError`] taxonomy and numeric [`ErrorCode`]s
//! - [`status`]: the shared last-error slot and [`InterfaceStatus`]
//! - [`board`]: immutable [`BoardInfo`] capabilities
//! - [`channel`]: DAC/ADC channel identifiers
//! - [`command`]: amplifier settings and [`AmplifierCommand`]
//! - [`transport`]: the [`BoardTransport`] bus trait
//! - [`config`]: figment-layered [`ClampConfig`]
//! - [`logging`]: subscriber setup

pub mod board;
pub mod channel;
pub mod command;
pub mod config;
pub mod error;
pub mod logging;
pub mod status;
pub mod transport;

pub use board::{AdcInputRange, BoardInfo, BoardType, ImmediateLimits};
pub use channel::{AdcChannel, Channel, DacChannel, Direction, Unit};
pub use command::{AmplifierCommand, AmplifierKind, AmplifierSetting};
pub use config::{ClampConfig, InitOptions};
pub use error::{ClampError, ErrorCode, ErrorKind, Result, TransportError};
pub use status::{InterfaceStatus, LastError};
pub use transport::{
    AcquisitionMode, BoardTransport, DeviceIdentity, SampleInterval, SharedTransport,
    TransferPlan, TransferProgress,
};
