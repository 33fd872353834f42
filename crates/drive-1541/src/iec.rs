//! IEC serial bus connecting the C64 to the drive.
//!
//! Three open-collector lines: ATN, CLK, DATA. Each participant can
//! independently pull a line low; a line reads high only when nobody
//! does. This matches the hardware, where every line has a pull-up
//! resistor and any device can ground it.

/// Bus participants.
const C64: usize = 0;
const DRIVE: usize = 1;

/// The IEC serial bus with two participants.
pub struct IecBus {
    atn_pulls: [bool; 2],
    clk_pulls: [bool; 2],
    data_pulls: [bool; 2],
}

impl IecBus {
    /// All lines released (high).
    #[must_use]
    pub fn new() -> Self {
        Self {
            atn_pulls: [false; 2],
            clk_pulls: [false; 2],
            data_pulls: [false; 2],
        }
    }

    // --- C64 side ---

    pub fn set_c64_atn(&mut self, pull_low: bool) {
        self.atn_pulls[C64] = pull_low;
    }

    pub fn set_c64_clk(&mut self, pull_low: bool) {
        self.clk_pulls[C64] = pull_low;
    }

    pub fn set_c64_data(&mut self, pull_low: bool) {
        self.data_pulls[C64] = pull_low;
    }

    // --- Drive side ---

    pub fn set_drive_clk(&mut self, pull_low: bool) {
        self.clk_pulls[DRIVE] = pull_low;
    }

    pub fn set_drive_data(&mut self, pull_low: bool) {
        self.data_pulls[DRIVE] = pull_low;
    }

    // --- Line levels (true = high) ---

    #[must_use]
    pub fn atn(&self) -> bool {
        !self.atn_pulls[C64] && !self.atn_pulls[DRIVE]
    }

    #[must_use]
    pub fn clk(&self) -> bool {
        !self.clk_pulls[C64] && !self.clk_pulls[DRIVE]
    }

    #[must_use]
    pub fn data(&self) -> bool {
        !self.data_pulls[C64] && !self.data_pulls[DRIVE]
    }
}

impl Default for IecBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lines_start_high() {
        let bus = IecBus::new();
        assert!(bus.atn() && bus.clk() && bus.data());
    }

    #[test]
    fn either_side_pulls_low() {
        let mut bus = IecBus::new();
        bus.set_c64_atn(true);
        assert!(!bus.atn());
        bus.set_drive_data(true);
        assert!(!bus.data());
        assert!(bus.clk());
    }

    #[test]
    fn line_stays_low_until_both_release() {
        let mut bus = IecBus::new();
        bus.set_c64_clk(true);
        bus.set_drive_clk(true);
        bus.set_c64_clk(false);
        assert!(!bus.clk());
        bus.set_drive_clk(false);
        assert!(bus.clk());
    }
}
