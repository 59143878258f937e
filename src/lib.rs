//! Power-management co-processor firmware
//!
//! Everything except the register-level drivers in [`hal`] is plain
//! `no_std` logic and builds for the host as well, where the tests run.

#![cfg_attr(not(test), no_std)]

pub mod application;
pub mod config;
pub mod diagnostics;
pub mod drivers;
pub mod logger;
pub mod protocol;
pub mod rtos;
pub mod shared;
pub mod sync;

#[cfg(target_arch = "avr")]
pub mod hal;

pub use application::{Board, Parts, RunState, Supervisor};
pub use shared::SharedState;
