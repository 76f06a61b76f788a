#![no_std]

// Shared logic for the programmable series current limiter.
//
// This crate stays portable across the MCU firmware and the host emulator by
// avoiding the Rust standard library. Every peripheral the control core touches
// is reached through a narrow trait so the same state machine runs on the
// STM32 board and on the deterministic simulation board.

pub mod board;
pub mod clock;
pub mod config;
pub mod context;
pub mod controller;
pub mod display;
pub mod gate;
pub mod hold;
pub mod menu;
pub mod qualifier;
pub mod repl;
#[cfg(any(test, feature = "sim"))]
pub mod sim;
pub mod store;
pub mod telemetry;
