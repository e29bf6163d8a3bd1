//! FIFO Fault Handling Test Suite
//!
//! Overrun, underrun and bus failures during a session.
//!
//! # Test Coverage
//!
//! | Test | Description |
//! |------|-------------|
//! | `test_overrun_halts` | Backlog beyond capacity stops the session |
//! | `test_overrun_tolerated` | `DONT_STOP_ADC_ON_OVERRUN` keeps running, status `AdcOverflow` |
//! | `test_underrun_halts` | Clock passing the stimulus stops the session |
//! | `test_underrun_tolerated` | `DONT_STOP_DAC_ON_UNDERRUN` counts instead, status stays `Busy` |
//! | `test_no_underrun_after_stim_end` | Ended stimulus is not watched |
//! | `test_poll_failure_halts` | Bus error during `available` |
//! | `test_detach_during_start` | Bus error while arming |
//! | `test_force_halt_bus_failure_ends_idle` | Failed force stop still releases the session |
//! | `test_flush_timeout_blocks_start` | Failed flush leaves hardware untouched |

mod common;

use clamp_core::channel::{AdcChannel, DacChannel};
use clamp_core::error::{ClampError, ErrorCode, TransportError};
use clamp_core::status::InterfaceStatus;
use clamp_core::transport::AcquisitionMode;
use clamp_driver_epc::{AcquisitionRequest, EngineState, FifoCondition};
use clamp_driver_mock::{ErrorConfig, ErrorScenario, MockBoard, MockEvent};
use common::{epc10, epc8, epc8_with, ramp, small_fifo};

fn adc_stream(mode: AcquisitionMode) -> AcquisitionRequest {
    AcquisitionRequest::builder()
        .adc_channels(&[AdcChannel::Analog(0)])
        .adc_samples(100)
        .mode(mode)
        .continuous(true)
        .build()
        .unwrap()
}

fn looped_stream(mode: AcquisitionMode) -> AcquisitionRequest {
    AcquisitionRequest::builder()
        .dac_channels(&[DacChannel::Analog(0)])
        .adc_channels(&[AdcChannel::Analog(0)])
        .samples(100)
        .mode(AcquisitionMode::ENABLE_DAC_OUTPUT | mode)
        .continuous(true)
        .build()
        .unwrap()
}

// =============================================================================
// Overrun
// =============================================================================

#[test]
fn test_overrun_halts() {
    let (mut system, handle) = epc8_with(MockBoard::lih88(), small_fifo(1000));
    system
        .start(None, &adc_stream(AcquisitionMode::empty()), &[])
        .unwrap();
    assert_eq!(system.engine().session().unwrap().capacity(), 1000);

    handle.advance(1500);
    let availability = system.engine_mut().available().unwrap();
    assert_eq!(
        availability.condition,
        Some(FifoCondition::Overrun {
            backlog: 1500,
            capacity: 1000
        })
    );
    assert!(!availability.still_running);
    assert_eq!(availability.samples, 1000);
    assert_eq!(system.engine().state(), EngineState::Halted);
    assert_eq!(system.last_error(), ErrorCode::Overrun);
    assert!(handle.events().contains(&MockEvent::StopTransfer));

    // Data acquired before the stop is still readable.
    let mut buffer = vec![0i16; 1000];
    system
        .engine_mut()
        .read(1000, true, &mut [&mut buffer[..]])
        .unwrap();
    assert_eq!(system.engine().state(), EngineState::Idle);
}

#[test]
fn test_overrun_tolerated() {
    let (mut system, handle) = epc8_with(MockBoard::lih88(), small_fifo(1000));
    system
        .start(
            None,
            &adc_stream(AcquisitionMode::DONT_STOP_ADC_ON_OVERRUN),
            &[],
        )
        .unwrap();

    handle.advance(1500);
    let availability = system.engine_mut().available().unwrap();
    assert_eq!(availability.condition, None);
    assert!(availability.still_running);
    assert_eq!(system.engine().state(), EngineState::Running);
    assert_eq!(system.status(), InterfaceStatus::AdcOverflow);

    handle.advance(10);
    system.engine_mut().available().unwrap();
    assert_eq!(system.engine().stats().overruns, 1);

    let mut buffer = vec![0i16; 1000];
    system
        .engine_mut()
        .read(1000, false, &mut [&mut buffer[..]])
        .unwrap();
    system.engine_mut().available().unwrap();
    handle.advance(2000);
    system.engine_mut().available().unwrap();
    assert_eq!(system.engine().stats().overruns, 2);
    assert_eq!(system.status(), InterfaceStatus::AdcOverflow);
}

// =============================================================================
// Underrun
// =============================================================================

#[test]
fn test_underrun_halts() {
    let (mut system, handle) = epc8(MockBoard::lih88());
    let stimulus = ramp(0, 100);
    system
        .start(None, &looped_stream(AcquisitionMode::empty()), &[&stimulus])
        .unwrap();

    handle.advance(150);
    let availability = system.engine_mut().available().unwrap();
    assert_eq!(
        availability.condition,
        Some(FifoCondition::Underrun {
            clocked: 150,
            written: 100
        })
    );
    assert_eq!(system.engine().state(), EngineState::Halted);
    assert_eq!(system.last_error(), ErrorCode::Underrun);

    let refill = ramp(0, 1);
    assert!(matches!(
        system.engine_mut().append(1, false, &[&refill]),
        Err(ClampError::InvalidState { .. })
    ));
    system.engine_mut().halt().unwrap();
    assert_eq!(system.engine().state(), EngineState::Idle);
}

#[test]
fn test_underrun_tolerated() {
    let (mut system, handle) = epc8(MockBoard::lih88());
    let stimulus = ramp(0, 100);
    system
        .start(
            None,
            &looped_stream(AcquisitionMode::DONT_STOP_DAC_ON_UNDERRUN),
            &[&stimulus],
        )
        .unwrap();

    handle.advance(150);
    let availability = system.engine_mut().available().unwrap();
    assert_eq!(availability.condition, None);
    assert_eq!(system.engine().state(), EngineState::Running);
    assert_eq!(system.engine().stats().underruns, 1);
    assert_eq!(system.last_error(), ErrorCode::NoError);
    assert_eq!(system.status(), InterfaceStatus::Busy);
}

#[test]
fn test_no_underrun_after_stim_end() {
    let (mut system, handle) = epc8(MockBoard::lih88());
    let stimulus = ramp(0, 100);
    let request = AcquisitionRequest::builder()
        .dac_channels(&[DacChannel::Analog(0)])
        .adc_channels(&[AdcChannel::Analog(0)])
        .samples(100)
        .mode(AcquisitionMode::ENABLE_DAC_OUTPUT)
        .continuous(true)
        .set_stim_end(true)
        .build()
        .unwrap();
    system.start(None, &request, &[&stimulus]).unwrap();

    handle.advance(500);
    let availability = system.engine_mut().available().unwrap();
    assert_eq!(availability.condition, None);
    assert_eq!(system.engine().state(), EngineState::Running);
}

// =============================================================================
// Bus failures
// =============================================================================

#[test]
fn test_poll_failure_halts() {
    let board = MockBoard::lih88().with_errors(ErrorConfig::scenario(ErrorScenario::FailAfterN {
        operation: "poll",
        count: 1,
    }));
    let (mut system, _) = epc8(board);
    system
        .start(None, &adc_stream(AcquisitionMode::empty()), &[])
        .unwrap();
    assert_eq!(system.engine().state(), EngineState::Running);

    let err = system.engine_mut().available().unwrap_err();
    assert!(matches!(err, ClampError::Transport(TransportError::Protocol(_))));
    assert_eq!(system.engine().state(), EngineState::Halted);
    assert_eq!(system.last_error(), ErrorCode::TransportFailure);

    system.engine_mut().halt().unwrap();
    assert_eq!(system.engine().state(), EngineState::Idle);
}

#[test]
fn test_detach_during_start() {
    let board = MockBoard::lih88().with_errors(ErrorConfig::scenario(ErrorScenario::Detach {
        operation: "poll",
    }));
    let (mut system, _) = epc8(board);
    let err = system
        .start(None, &adc_stream(AcquisitionMode::empty()), &[])
        .unwrap_err();
    assert!(matches!(err, ClampError::Transport(TransportError::Detached)));
    assert_eq!(system.engine().state(), EngineState::Halted);
    assert_eq!(system.last_error(), ErrorCode::DeviceDetached);

    // Every step of the shutdown fails on a detached bus, the first error
    // is reported.
    assert!(system.shutdown().is_err());
    assert!(system.is_shut_down());
    assert!(system.shutdown().is_ok());
}

#[test]
fn test_force_halt_bus_failure_ends_idle() {
    let board = MockBoard::lih88().with_errors(ErrorConfig::scenario(ErrorScenario::Timeout {
        operation: "force_stop",
    }));
    let (mut system, _) = epc8(board);
    system
        .start(None, &adc_stream(AcquisitionMode::empty()), &[])
        .unwrap();
    assert_eq!(system.engine().state(), EngineState::Running);

    let err = system.engine_mut().force_halt().unwrap_err();
    assert!(err.is_timeout());
    assert_eq!(system.engine().state(), EngineState::Idle);
    assert!(system.engine().session().is_none());
    assert_eq!(system.last_error(), ErrorCode::TransportTimeout);
    assert_eq!(system.status(), InterfaceStatus::Idle);
}

#[test]
fn test_flush_timeout_blocks_start() {
    let board = MockBoard::lih88().with_errors(ErrorConfig::scenario(ErrorScenario::Timeout {
        operation: "transmit",
    }));
    let (mut system, handle, _dir) = epc10(board);
    system
        .amplifier_mut()
        .with_board(0)
        .unwrap()
        .set_v_hold(-0.06);
    handle.clear_log();

    let err = system
        .start(Some(0), &adc_stream(AcquisitionMode::empty()), &[])
        .unwrap_err();
    assert!(err.is_timeout());
    assert_eq!(system.last_error(), ErrorCode::TransportTimeout);
    assert_eq!(system.engine().state(), EngineState::Idle);
    assert_eq!(system.amplifier().pending(), 1);
    assert!(!handle
        .events()
        .iter()
        .any(|e| matches!(e, MockEvent::StartTransfer { .. })));
}
