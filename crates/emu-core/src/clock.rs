//! Master clock configuration.

use crate::Ticks;

/// Master clock configuration for a system.
///
/// Each system has a master crystal that drives all timing. Components may
/// run at divided rates, but everything derives from this frequency.
#[derive(Debug, Clone, Copy)]
pub struct MasterClock {
    /// Crystal frequency in Hz (e.g. `985_248` for a PAL C64 CPU).
    pub frequency_hz: u64,
}

impl MasterClock {
    #[must_use]
    pub const fn new(frequency_hz: u64) -> Self {
        Self { frequency_hz }
    }

    /// Ticks per frame at the given frame rate (integer division).
    #[must_use]
    pub const fn ticks_per_frame(&self, frames_per_second: u64) -> Ticks {
        Ticks::new(self.frequency_hz / frames_per_second)
    }

    /// Duration of one tick in tenths of a nanosecond.
    ///
    /// The 1541 interleave compares times in this unit, so the divide
    /// rounds the same way everywhere.
    #[must_use]
    pub const fn tick_duration_tenth_ns(&self) -> u64 {
        10_000_000_000 / self.frequency_hz
    }
}
