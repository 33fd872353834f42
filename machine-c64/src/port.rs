//! The 6510 on-chip I/O port at $0000/$0001.
//!
//! Bits 0-2 select the memory banking (LORAM/HIRAM/CHAREN), bits 3-5
//! talk to the datasette, bits 6-7 are unconnected. Unconnected input
//! bits behave like capacitors: after the direction flips from
//! output-high to input they keep reading 1 for roughly 350,000 cycles,
//! then discharge to 0.

/// Cycles until a floating bit discharges (VICE-measured value).
const DISCHARGE_CYCLES: u64 = 350_000;

/// The 6510 processor port.
pub struct ProcessorPort {
    /// Data register ($0001).
    port: u8,
    /// Direction register ($0000), 1 = output.
    direction: u8,
    /// Cycle at which the floating bit reads 0 again.
    discharge_cycle_bit3: u64,
    discharge_cycle_bit6: u64,
    discharge_cycle_bit7: u64,
    /// Datasette sense line (bit 4, input): play key held pulls it low.
    datasette_sense: bool,
}

impl ProcessorPort {
    #[must_use]
    pub fn new() -> Self {
        Self {
            // Kernal values; also what a hard reset establishes.
            port: 0x37,
            direction: 0x2F,
            discharge_cycle_bit3: 0,
            discharge_cycle_bit6: 0,
            discharge_cycle_bit7: 0,
            datasette_sense: false,
        }
    }

    pub fn reset(&mut self) {
        *self = Self::new();
    }

    /// Read the data register ($0001) at the given CPU cycle.
    ///
    /// Input bits: 0-2 pull up, 4 follows the datasette sense, 5 pulls
    /// down, 3/6/7 float per their discharge schedule.
    #[must_use]
    pub fn read(&self, cycle: u64) -> u8 {
        let bit3 = if self.discharge_cycle_bit3 > cycle { 0x08 } else { 0x00 };
        let bit4 = if self.datasette_sense { 0x00 } else { 0x10 };
        let bit6 = if self.discharge_cycle_bit6 > cycle { 0x40 } else { 0x00 };
        let bit7 = if self.discharge_cycle_bit7 > cycle { 0x80 } else { 0x00 };
        let input_bits = bit7 | bit6 | bit4 | bit3 | 0x07;
        (self.port & self.direction) | (input_bits & !self.direction)
    }

    /// Read the direction register ($0000).
    #[must_use]
    pub fn read_direction(&self) -> u8 {
        self.direction
    }

    /// Write the data register.
    pub fn write(&mut self, value: u8) {
        self.port = value;
    }

    /// Write the direction register, updating the float schedule for
    /// bits 3, 6, 7.
    pub fn write_direction(&mut self, value: u8, cycle: u64) {
        // Bits driven as outputs stop floating.
        if value & 0x08 != 0 {
            self.discharge_cycle_bit3 = 0;
        }
        if value & 0x40 != 0 {
            self.discharge_cycle_bit6 = 0;
        }
        if value & 0x80 != 0 {
            self.discharge_cycle_bit7 = 0;
        }

        // Bits flipping output-high → input start floating. Bit 3 holds
        // its charge indefinitely (strong external load).
        let falling = self.direction & !value;
        if falling & 0x08 != 0 && self.port & 0x08 != 0 {
            self.discharge_cycle_bit3 = u64::MAX;
        }
        if falling & 0x40 != 0 && self.port & 0x40 != 0 {
            self.discharge_cycle_bit6 = cycle + DISCHARGE_CYCLES;
        }
        if falling & 0x80 != 0 && self.port & 0x80 != 0 {
            self.discharge_cycle_bit7 = cycle + DISCHARGE_CYCLES;
        }

        self.direction = value;
    }

    /// Banking inputs LORAM/HIRAM/CHAREN as the PLA sees them.
    #[must_use]
    pub fn bank_bits(&self, cycle: u64) -> u8 {
        self.read(cycle) & 0x07
    }

    /// Datasette motor line (bit 5, active low output).
    #[must_use]
    pub fn datasette_motor(&self) -> bool {
        self.direction & 0x20 != 0 && self.port & 0x20 == 0
    }

    /// Datasette write line (bit 3 as output).
    #[must_use]
    pub fn datasette_write(&self) -> bool {
        self.direction & 0x08 != 0 && self.port & 0x08 != 0
    }

    /// Drive the datasette sense input (play key held = true).
    pub fn set_datasette_sense(&mut self, play_key: bool) {
        self.datasette_sense = play_key;
    }

    #[must_use]
    pub fn raw_port(&self) -> u8 {
        self.port
    }

    #[must_use]
    pub fn raw_direction(&self) -> u8 {
        self.direction
    }

    /// Restore internal state from a snapshot.
    pub fn restore(
        &mut self,
        port: u8,
        direction: u8,
        discharge: [u64; 3],
        datasette_sense: bool,
    ) {
        self.port = port;
        self.direction = direction;
        self.discharge_cycle_bit3 = discharge[0];
        self.discharge_cycle_bit6 = discharge[1];
        self.discharge_cycle_bit7 = discharge[2];
        self.datasette_sense = datasette_sense;
    }

    #[must_use]
    pub fn discharge_cycles(&self) -> [u64; 3] {
        [
            self.discharge_cycle_bit3,
            self.discharge_cycle_bit6,
            self.discharge_cycle_bit7,
        ]
    }
}

impl Default for ProcessorPort {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_banking_bits() {
        let port = ProcessorPort::new();
        assert_eq!(port.bank_bits(0), 0x07); // LORAM, HIRAM, CHAREN all high
    }

    #[test]
    fn output_bits_read_back() {
        let mut port = ProcessorPort::new();
        port.write_direction(0xFF, 0);
        port.write(0x55);
        assert_eq!(port.read(0), 0x55);
    }

    #[test]
    fn bit6_discharges_after_350k_cycles() {
        let mut port = ProcessorPort::new();
        port.write_direction(0xFF, 0);
        port.write(0xFF);
        port.write_direction(0x00, 1000);
        // 349,999 cycles later the capacitor still holds its charge.
        assert_eq!(port.read(1000 + 349_999) & 0x40, 0x40);
        // One cycle later it has discharged.
        assert_eq!(port.read(1000 + 350_000) & 0x40, 0x00);
    }

    #[test]
    fn bit7_discharges_like_bit6() {
        let mut port = ProcessorPort::new();
        port.write_direction(0xFF, 0);
        port.write(0xFF);
        port.write_direction(0x00, 0);
        assert_eq!(port.read(100_000) & 0x80, 0x80);
        assert_eq!(port.read(400_000) & 0x80, 0x00);
    }

    #[test]
    fn bit3_holds_charge() {
        let mut port = ProcessorPort::new();
        port.write_direction(0xFF, 0);
        port.write(0xFF);
        port.write_direction(0x00, 0);
        assert_eq!(port.read(10_000_000) & 0x08, 0x08);
    }

    #[test]
    fn float_cleared_when_bit_becomes_output() {
        let mut port = ProcessorPort::new();
        port.write_direction(0xFF, 0);
        port.write(0xFF);
        port.write_direction(0x00, 0); // Float with charge
        port.write_direction(0x40, 10); // Bit 6 output again
        port.write(0x00);
        port.write_direction(0x00, 20); // Input, but was output-low
        assert_eq!(port.read(25) & 0x40, 0x00);
    }

    #[test]
    fn datasette_sense_reads_on_bit4() {
        let mut port = ProcessorPort::new();
        assert_eq!(port.read(0) & 0x10, 0x10);
        port.set_datasette_sense(true);
        assert_eq!(port.read(0) & 0x10, 0x00);
    }

    #[test]
    fn datasette_motor_control() {
        let mut port = ProcessorPort::new();
        // Kernal default: bit 5 output, high → motor off.
        assert!(!port.datasette_motor());
        port.write(0x17); // Bit 5 low → motor on
        assert!(port.datasette_motor());
    }
}
