//! Simulated interface board for patch-clamp acquisition.
//!
//! [`MockBoard`] implements [`clamp_core::BoardTransport`] entirely in
//! memory so the amplifier and acquisition layers can be exercised without
//! hardware:
//!
//! - a sample clock driven on request ([`MockMode::Instant`]) or by wall time
//!   ([`MockMode::Realistic`])
//! - DAC→ADC loopback and fixed per-channel ADC levels
//! - a log of every transmitted amplifier command and bus primitive
//! - scripted and random failures through [`ErrorConfig`]
//!
//! # Example
//!
//! ```rust,ignore
//! use clamp_driver_mock::{MockBoard, MockMode};
//!
//! let board = MockBoard::lih88().with_mode(MockMode::Instant);
//! let handle = board.handle();
//! handle.loopback(0, 0);
//! // hand `board` to EpcSystem::initialize, drive the clock with handle.advance(n)
//! ```

pub mod common;
mod mock_board;

pub use common::{ErrorConfig, ErrorScenario, LatencyConfig, MockMode, MockRng};
pub use mock_board::{MockBoard, MockEvent, MockHandle};
