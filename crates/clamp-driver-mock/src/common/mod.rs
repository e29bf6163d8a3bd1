//! Shared infrastructure of the simulated board.
//!
//! - **mode**: how the sample clock advances (Instant, Realistic)
//! - **latency**: bus delays for realistic mode
//! - **errors**: failure injection
//! - **rng**: seeded random source

pub mod errors;
pub mod latency;
pub mod mode;
pub mod rng;

pub use errors::{ErrorConfig, ErrorScenario};
pub use latency::LatencyConfig;
pub use mode::MockMode;
pub use rng::MockRng;
