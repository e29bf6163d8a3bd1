//! Shared fixtures for the clamp-driver-epc integration tests.

#![allow(dead_code)]

use std::fs;

use clamp_core::command::AmplifierKind;
use clamp_core::config::InitOptions;
use clamp_driver_epc::EpcSystem;
use clamp_driver_mock::{MockBoard, MockHandle};
use tempfile::TempDir;

/// Directory holding both calibration files.
pub fn calibration_dir() -> TempDir {
    let dir = tempfile::tempdir().expect("create temp dir");
    let options = InitOptions::default();
    fs::write(dir.path().join(&options.scale_file_name), [0x5a; 64]).expect("write scale file");
    fs::write(dir.path().join(&options.cfast_file_name), [0xcf; 32]).expect("write CFast file");
    dir
}

/// EPC 10 USB on a simulated LIH 8+8, calibrated.
pub fn epc10(board: MockBoard) -> (EpcSystem, MockHandle, TempDir) {
    epc10_with(board, InitOptions::default())
}

/// EPC 10 USB with custom init options.
pub fn epc10_with(board: MockBoard, options: InitOptions) -> (EpcSystem, MockHandle, TempDir) {
    let dir = calibration_dir();
    let handle = board.handle();
    let init = EpcSystem::initialize(board, AmplifierKind::Epc10Usb, Some(dir.path()), options)
        .expect("initialize EPC 10 USB");
    assert!(init.result.is_usable());
    (init.system, handle, dir)
}

/// EPC 8 (no amplifier boards) on a simulated board.
pub fn epc8(board: MockBoard) -> (EpcSystem, MockHandle) {
    epc8_with(board, InitOptions::default())
}

/// EPC 8 with custom init options.
pub fn epc8_with(board: MockBoard, options: InitOptions) -> (EpcSystem, MockHandle) {
    let handle = board.handle();
    let init = EpcSystem::initialize(board, AmplifierKind::Epc8, None, options)
        .expect("initialize EPC 8");
    (init.system, handle)
}

/// Init options with a small virtual FIFO.
pub fn small_fifo(samples: usize) -> InitOptions {
    InitOptions {
        fifo_samples: samples,
        ..InitOptions::default()
    }
}

/// Ramp of `len` samples starting at `start`.
pub fn ramp(start: i16, len: usize) -> Vec<i16> {
    (0..len).map(|i| start.wrapping_add(i as i16)).collect()
}
