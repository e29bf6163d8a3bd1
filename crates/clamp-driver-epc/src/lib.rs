//! EPC patch-clamp amplifier control and LIH/ITC acquisition engine.
//!
//! An [`EpcSystem`] owns one interface board and the amplifier behind it.
//! Everything shares one [`BusContext`]: a transport, a bus timeout and the
//! last-error slot.
//!
//! - [`amplifier`]: per-board settings behind a [`CommandCache`] that is
//!   flushed before every acquisition
//! - [`engine`]: FIFO-buffered pulsed and continuous acquisition
//! - [`topology`]: physical channel counts and sample-interval granting
//! - [`interface`]: single-shot DAC/ADC access while no session runs
//! - [`digital`]: the digital port with reserved bits
//! - [`units`]: volts to device units
//!
//! # Example
//!
//! ```rust,ignore
//! use clamp_core::{AdcChannel, AmplifierKind, InitOptions};
//! use clamp_driver_epc::{AcquisitionRequest, EpcSystem};
//! use clamp_driver_mock::MockBoard;
//!
//! let init = EpcSystem::initialize(MockBoard::lih88(), AmplifierKind::Epc10Usb, None, InitOptions::default())?;
//! let mut system = init.system;
//! system.amplifier_mut().with_board(0)?.set_v_hold(-0.07);
//!
//! let request = AcquisitionRequest::builder()
//!     .adc_channels(&[AdcChannel::Analog(0)])
//!     .samples(1000)
//!     .build()?;
//! system.start(Some(0), &request, &[])?;
//! ```

pub mod amplifier;
pub mod bus;
pub mod cache;
pub mod digital;
pub mod engine;
pub mod interface;
pub mod system;
pub mod topology;
pub mod units;

pub use amplifier::{Amplifier, AmplifierSettings, BoardSession};
pub use bus::BusContext;
pub use cache::{CommandCache, FlushBeforeStart};
pub use digital::{DigitalPort, AMPLIFIER_REMOTE_BITS, TRIGGER_BOX_BITS};
pub use engine::{
    AcquisitionEngine, AcquisitionRequest, AcquisitionRequestBuilder, Availability,
    ChannelCursor, EngineState, FifoCondition, SessionStats, SessionView, StartOutcome,
};
pub use interface::{Interface, ReadAll};
pub use system::{EpcSystem, InitError, InitResult, Initialized, SystemParts};
pub use topology::{physical_channels, physical_count, ChannelTopology, Topology};
pub use units::{amperes, Quantized, ScalingTable};
