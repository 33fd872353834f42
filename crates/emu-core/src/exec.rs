//! Execution results for cycle-stepped components.

/// Why a component wants the run loop to stop.
///
/// Stops are honored at the next instruction boundary, never mid-cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// A soft (user-settable, resumable) breakpoint was reached.
    SoftBreakpoint,
    /// A hard breakpoint was reached.
    HardBreakpoint,
    /// A watchpoint fired.
    Watchpoint,
    /// The CPU executed a jam opcode and is locked until reset.
    Jammed,
    /// An external stop request (UI, power-off) is pending.
    Requested,
}

/// Result of advancing a component by one cycle.
///
/// Replaces unwinding out of the run loop: a component that wants the
/// scheduler to pause returns `StopAtBoundary` and the scheduler finishes
/// the current instruction before suspending.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecResult {
    /// Keep running.
    Continue,
    /// Suspend at the next clean instruction boundary.
    StopAtBoundary(StopReason),
}

impl ExecResult {
    /// True if this result requests a stop.
    #[must_use]
    pub fn is_stop(self) -> bool {
        matches!(self, ExecResult::StopAtBoundary(_))
    }
}
