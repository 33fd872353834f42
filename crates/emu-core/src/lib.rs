//! Core traits and types for cycle-accurate emulation.
//!
//! Everything ticks at the master crystal frequency. All component timing
//! derives from this. No exceptions.

mod bus;
mod clock;
mod exec;
mod observable;
mod tickable;
mod ticks;

pub use bus::Bus;
pub use clock::MasterClock;
pub use exec::{ExecResult, StopReason};
pub use observable::{Observable, Value};
pub use tickable::Tickable;
pub use ticks::Ticks;
