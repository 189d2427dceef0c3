//! Damped-oscillator integrator behind a sandboxed script harness.
//!
//! Scripts run in a fresh namespace where the only callable besides `print`
//! is whatever the [`functions::CapabilityTable`] exposes (by default just
//! `simulate`). See [`execution::Harness`] for the entry point.

pub mod config;
pub mod execution;
pub mod functions;
pub mod printer;
pub mod script;
pub mod simulation;
pub mod utils;

pub use execution::{ExecutionError, ExecutionOutcome, Harness, Limits};
pub use functions::CapabilityTable;
pub use simulation::{simulate, OscillatorConfig, SimulationError, Trajectory};
