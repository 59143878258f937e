//! Cooperative scheduling for the super-loop

pub mod scheduler;

pub use scheduler::{Phase, Scheduler, TickState};
