//! The drive proper: CPU, VIAs, clock dividers, and the magnetic head.
//!
//! # Clocking
//!
//! The logic board runs from a 16 MHz crystal. UE7, a 74LS193 4-bit
//! counter preloaded from the density bits on VIA2 PB5/PB6, emits a carry
//! every 13 (density %11) to 16 (density %00) crystal ticks. UF4 counts
//! those carries; every fourth one moves one bit past the head. UE3
//! counts bits; at eight it raises byte-ready, which feeds VIA2 CA1 and
//! (gated by CA2/SOE) the drive CPU's V flag.
//!
//! The CPU and VIAs are clocked at 1 MHz. Both schedules are kept in
//! tenths of a nanosecond and interleaved by a next-event comparison, so
//! the drive can be driven from the C64's clock at any ratio.

#![allow(clippy::cast_possible_truncation)]

use std::fmt;

use emu_core::{Observable, Value};
use mos_6510::{IrqSource, Mos6510};

use crate::disk::{track_for_halftrack, Disk, MAX_HALFTRACK};
use crate::iec::IecBus;
use crate::mem::{DriveMemory, ROM_SIZE};

/// Duration of one drive CPU cycle in tenths of a nanosecond (1 MHz).
const CPU_CYCLE: u64 = 10_000;

/// Time between two UE7 carry pulses in tenths of a nanosecond, indexed
/// by the density bits. %00 divides by 16, %11 by 13.
const CARRY_PERIOD: [u64; 4] = [10_000, 9_375, 8_750, 8_125];

#[derive(Debug)]
pub enum DriveError {
    /// DOS ROM missing or not 16 KiB.
    RomMissing,
}

impl fmt::Display for DriveError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::RomMissing => write!(f, "1541 DOS ROM missing or wrong size"),
        }
    }
}

impl std::error::Error for DriveError {}

/// Flattened clocking state for snapshots.
#[derive(Debug, Clone, Copy)]
pub struct DriveClockState {
    pub elapsed_time: u64,
    pub next_clock: u64,
    pub next_carry: u64,
    pub counter_uf4: u8,
    pub byte_ready_counter: u8,
    pub read_shift: u16,
    pub write_shift: u8,
    pub sync: bool,
    pub byte_ready: bool,
    pub zone: u8,
    pub spinning: bool,
    pub led_on: bool,
    pub cpu_cycle: u64,
}

/// A Commodore 1541 disk drive.
pub struct Drive1541 {
    cpu: Mos6510,
    mem: DriveMemory,
    disk: Option<Disk>,

    powered_on: bool,
    /// Disk is rotating (VIA2 PB2).
    spinning: bool,
    /// Red activity LED (VIA2 PB3).
    led_on: bool,

    // Clocking, all in tenths of a nanosecond.
    elapsed_time: u64,
    next_clock: u64,
    next_carry: u64,

    /// UF4 counter, clocked by UE7 carries. Every fourth count is a bit.
    counter_uf4: u8,
    /// UE3 byte-ready counter (bits since the last sync or byte).
    byte_ready_counter: u8,

    /// Head position: halftrack 1-84.
    halftrack: u8,
    /// Head position: bit offset within the halftrack.
    offset: usize,
    /// Density bits last taken from VIA2 PB5/PB6.
    zone: u8,

    /// 74LS164 serial-to-parallel read shift register (10-bit window).
    read_shift: u16,
    /// 74LS165 parallel-to-serial write shift register.
    write_shift: u8,
    /// SYNC line: ten consecutive one-bits seen while in read mode.
    sync: bool,
    /// Byte-ready line level (active low).
    byte_ready: bool,

    prev_atn_low: bool,
    prev_stepper: u8,
}

impl Drive1541 {
    /// Create a drive with the given 16 KiB DOS ROM.
    pub fn new(rom: Vec<u8>) -> Result<Self, DriveError> {
        if rom.len() != ROM_SIZE {
            return Err(DriveError::RomMissing);
        }
        let mut mem = DriveMemory::new(rom);
        let mut cpu = Mos6510::new();
        cpu.reset(&mut mem);
        Ok(Self {
            cpu,
            mem,
            disk: None,
            powered_on: false,
            spinning: false,
            led_on: false,
            elapsed_time: 0,
            next_clock: CPU_CYCLE,
            next_carry: CARRY_PERIOD[0],
            counter_uf4: 0,
            byte_ready_counter: 0,
            halftrack: 41, // Track 21: where the head parks after format
            offset: 0,
            zone: 0,
            read_shift: 0,
            write_shift: 0,
            sync: false,
            byte_ready: true,
            prev_atn_low: false,
            prev_stepper: 0,
        })
    }

    // --- Power and media ---

    pub fn power_on(&mut self) {
        self.powered_on = true;
        self.reset();
    }

    pub fn power_off(&mut self) {
        self.powered_on = false;
        self.spinning = false;
        self.led_on = false;
    }

    #[must_use]
    pub fn powered_on(&self) -> bool {
        self.powered_on
    }

    /// Hard-reset the drive CPU and VIAs.
    pub fn reset(&mut self) {
        self.mem.via1.reset();
        self.mem.via2.reset();
        self.cpu.reset(&mut self.mem);
        self.read_shift = 0;
        self.byte_ready_counter = 0;
        self.sync = false;
        self.byte_ready = true;
    }

    pub fn insert_disk(&mut self, disk: Disk) {
        self.disk = Some(disk);
    }

    /// Remove the disk, if any.
    pub fn eject_disk(&mut self) -> Option<Disk> {
        self.disk.take()
    }

    #[must_use]
    pub fn has_disk(&self) -> bool {
        self.disk.is_some()
    }

    #[must_use]
    pub fn disk(&self) -> Option<&Disk> {
        self.disk.as_ref()
    }

    pub fn disk_mut(&mut self) -> Option<&mut Disk> {
        self.disk.as_mut()
    }

    // --- Status ---

    #[must_use]
    pub fn spinning(&self) -> bool {
        self.spinning
    }

    #[must_use]
    pub fn led_on(&self) -> bool {
        self.led_on
    }

    /// Current halftrack (1-84).
    #[must_use]
    pub fn halftrack(&self) -> u8 {
        self.halftrack
    }

    /// Current track (1-42).
    #[must_use]
    pub fn track(&self) -> u8 {
        track_for_halftrack(self.halftrack)
    }

    /// Head bit offset within the current halftrack.
    #[must_use]
    pub fn head_offset(&self) -> usize {
        self.offset
    }

    /// Place the head directly (snapshot restore).
    pub fn set_head(&mut self, halftrack: u8, offset: usize) {
        self.halftrack = halftrack.clamp(1, MAX_HALFTRACK as u8);
        self.offset = offset;
    }

    /// Clocking and read/write-logic state, for state capture.
    #[must_use]
    pub fn clock_state(&self) -> DriveClockState {
        DriveClockState {
            elapsed_time: self.elapsed_time,
            next_clock: self.next_clock,
            next_carry: self.next_carry,
            counter_uf4: self.counter_uf4,
            byte_ready_counter: self.byte_ready_counter,
            read_shift: self.read_shift,
            write_shift: self.write_shift,
            sync: self.sync,
            byte_ready: self.byte_ready,
            zone: self.zone,
            spinning: self.spinning,
            led_on: self.led_on,
            cpu_cycle: self.cpu.cycle(),
        }
    }

    /// Restore clocking state from a snapshot.
    pub fn restore_clock_state(&mut self, state: &DriveClockState) {
        self.elapsed_time = state.elapsed_time;
        self.next_clock = state.next_clock;
        self.next_carry = state.next_carry;
        self.counter_uf4 = state.counter_uf4;
        self.byte_ready_counter = state.byte_ready_counter;
        self.read_shift = state.read_shift;
        self.write_shift = state.write_shift;
        self.sync = state.sync;
        self.byte_ready = state.byte_ready;
        self.zone = state.zone;
        self.spinning = state.spinning;
        self.led_on = state.led_on;
        self.cpu.set_cycle(state.cpu_cycle);
    }

    #[must_use]
    pub fn cpu(&self) -> &Mos6510 {
        &self.cpu
    }

    pub fn cpu_mut(&mut self) -> &mut Mos6510 {
        &mut self.cpu
    }

    #[must_use]
    pub fn mem(&self) -> &DriveMemory {
        &self.mem
    }

    pub fn mem_mut(&mut self) -> &mut DriveMemory {
        &mut self.mem
    }

    /// SYNC line level.
    #[must_use]
    pub fn sync(&self) -> bool {
        self.sync
    }

    // --- Execution ---

    /// Advance the drive by a wall-clock duration in tenths of a
    /// nanosecond. Both the 1 MHz CPU schedule and the UE7 carry schedule
    /// are replayed in timestamp order.
    pub fn execute(&mut self, duration: u64, iec: &mut IecBus) {
        self.elapsed_time += duration;

        if !self.powered_on {
            // Keep the schedules monotonic while switched off.
            self.next_clock = self.next_clock.max(self.elapsed_time);
            self.next_carry = self.next_carry.max(self.elapsed_time);
            return;
        }

        while self.next_clock <= self.elapsed_time || self.next_carry <= self.elapsed_time {
            if self.next_clock <= self.next_carry {
                self.execute_cpu_cycle(iec);
                self.next_clock += CPU_CYCLE;
            } else {
                self.execute_carry();
                self.next_carry += CARRY_PERIOD[self.zone as usize];
            }
        }
    }

    /// One 1 MHz cycle: IEC in, CPU, VIAs, IEC out, mechanics.
    fn execute_cpu_cycle(&mut self, iec: &mut IecBus) {
        self.read_iec_inputs(iec);

        let _ = self.cpu.execute_one_cycle(&mut self.mem);
        self.mem.via1.tick();
        self.mem.via2.tick();

        self.write_iec_outputs(iec);
        self.update_mechanics();

        if self.mem.via1.irq_active() {
            self.cpu.pull_down_irq(IrqSource::VIA1);
        } else {
            self.cpu.release_irq(IrqSource::VIA1);
        }
        if self.mem.via2.irq_active() {
            self.cpu.pull_down_irq(IrqSource::VIA2);
        } else {
            self.cpu.release_irq(IrqSource::VIA2);
        }
    }

    /// Latch the IEC line levels into VIA1.
    ///
    /// Port B: bit 0 = DATA IN, bit 2 = CLK IN (both inverted: 1 = line
    /// low), bit 7 = ATN IN (line level). CA1 is wired to ATN.
    fn read_iec_inputs(&mut self, iec: &IecBus) {
        let mut ext = self.mem.via1.external_b;
        ext = (ext & !0x01) | u8::from(!iec.data());
        ext = (ext & !0x04) | (u8::from(!iec.clk()) << 2);
        ext = (ext & !0x80) | (u8::from(iec.atn()) << 7);
        self.mem.via1.external_b = ext;

        let atn_low = !iec.atn();
        if atn_low != self.prev_atn_low {
            self.mem.via1.set_ca1(!atn_low);
            self.prev_atn_low = atn_low;
        }
    }

    /// Drive the IEC lines from VIA1 port B.
    ///
    /// Bit 1 = DATA OUT, bit 3 = CLK OUT, bit 4 = ATN ACK. The ATN
    /// acknowledge gate pulls DATA low whenever ATN is asserted and the
    /// ack bit is set.
    fn write_iec_outputs(&mut self, iec: &mut IecBus) {
        let pb = self.mem.via1.port_b();
        let atn_ack = pb & 0x10 != 0 && !iec.atn();
        iec.set_drive_data(pb & 0x02 != 0 || atn_ack);
        iec.set_drive_clk(pb & 0x08 != 0);
    }

    /// Decode VIA2 port B into motor, LED, stepper, and density state,
    /// and present write-protect and SYNC on the input bits. Undriven
    /// output lines read as 0: the motor driver has no pull-up.
    fn update_mechanics(&mut self) {
        let pb = self.mem.via2.port_b() & self.mem.via2.ddrb();
        self.spinning = pb & 0x04 != 0;
        self.led_on = pb & 0x08 != 0;
        self.zone = (pb >> 5) & 0x03;

        let phase = pb & 0x03;
        if phase != self.prev_stepper {
            self.step_head(phase);
        }

        // Write protect sense (PB4): low when the notch is covered or no
        // disk is present.
        let wps = match &self.disk {
            Some(disk) if !disk.write_protected() => 0x10,
            _ => 0x00,
        };
        // SYNC (PB7): active low.
        let sync_bit = if self.sync { 0x00 } else { 0x80 };
        self.mem.via2.external_b =
            (self.mem.via2.external_b & !0x90) | wps | sync_bit;
    }

    /// Move the head one halftrack per stepper phase transition.
    fn step_head(&mut self, phase: u8) {
        let delta = (4 + phase - self.prev_stepper) & 0x03;
        self.prev_stepper = phase;
        match delta {
            1 if (self.halftrack as usize) < MAX_HALFTRACK => self.halftrack += 1,
            3 if self.halftrack > 1 => self.halftrack -= 1,
            _ => return,
        }
        // Keep the head offset inside the new track.
        let len = self
            .disk
            .as_ref()
            .map_or(0, |d| d.track_length(self.halftrack));
        if len > 0 {
            self.offset %= len;
        } else {
            self.offset = 0;
        }
    }

    /// One UE7 carry pulse. Every fourth carry moves one bit past the
    /// head.
    fn execute_carry(&mut self) {
        self.counter_uf4 = (self.counter_uf4 + 1) & 0x0F;
        if self.counter_uf4 % 4 != 0 {
            return;
        }
        if !self.spinning || self.disk.is_none() {
            return;
        }

        // Release a pending byte-ready pulse one bit later.
        if !self.byte_ready {
            self.byte_ready = true;
            self.mem.via2.set_ca1(true);
        }

        if self.read_mode() {
            self.read_bit_from_head();
        } else {
            self.write_bit_to_head();
        }
    }

    /// Read mode is selected by VIA2 CB2 (low = write).
    fn read_mode(&self) -> bool {
        self.mem.via2.cb2_out()
    }

    fn read_bit_from_head(&mut self) {
        let disk = self.disk.as_ref().expect("checked by caller");
        let len = disk.track_length(self.halftrack);
        if len == 0 {
            return;
        }
        let bit = disk.read_bit(self.halftrack, self.offset);
        self.offset = (self.offset + 1) % len;

        self.read_shift = ((self.read_shift << 1) | u16::from(bit)) & 0x3FF;
        self.sync = self.read_shift == 0x3FF;

        if self.sync {
            self.byte_ready_counter = 0;
            return;
        }

        self.byte_ready_counter += 1;
        if self.byte_ready_counter == 8 {
            self.byte_ready_counter = 0;
            self.signal_byte_ready((self.read_shift & 0xFF) as u8);
        }
    }

    fn write_bit_to_head(&mut self) {
        self.sync = false;
        if self.byte_ready_counter == 0 {
            // Load the parallel-to-serial register at the byte boundary.
            self.write_shift = self.mem.via2.port_a();
        }
        let bit = self.write_shift >> 7;
        self.write_shift <<= 1;

        let halftrack = self.halftrack;
        let offset = self.offset;
        let disk = self.disk.as_mut().expect("checked by caller");
        let len = disk.track_length(halftrack);
        if len == 0 {
            return;
        }
        disk.write_bit(halftrack, offset, bit);
        self.offset = (offset + 1) % len;

        self.byte_ready_counter += 1;
        if self.byte_ready_counter == 8 {
            self.byte_ready_counter = 0;
            self.signal_byte_ready(0);
        }
    }

    /// Byte-ready: latch the byte into VIA2 port A, pulse CA1, and set
    /// the CPU's V flag through the SO pin when SOE (CA2) allows it.
    fn signal_byte_ready(&mut self, byte: u8) {
        if self.read_mode() {
            self.mem.via2.external_a = byte;
        }
        self.byte_ready = false;
        self.mem.via2.set_ca1(false);
        if self.mem.via2.ca2_out() {
            self.cpu.set_overflow_pin();
        }
    }
}

impl Observable for Drive1541 {
    fn query(&self, path: &str) -> Option<Value> {
        match path {
            "halftrack" => Some(u16::from(self.halftrack).into()),
            "track" => Some(u16::from(self.track()).into()),
            "offset" => Some((self.offset as u32).into()),
            "zone" => Some(self.zone.into()),
            "spinning" => Some(self.spinning.into()),
            "led" => Some(self.led_on.into()),
            "sync" => Some(self.sync.into()),
            "powered_on" => Some(self.powered_on.into()),
            _ => path.strip_prefix("cpu.").and_then(|rest| self.cpu.query(rest)),
        }
    }

    fn query_paths(&self) -> &'static [&'static str] {
        &[
            "halftrack", "track", "offset", "zone", "spinning", "led", "sync", "powered_on",
            "cpu.<6502 paths>",
        ]
    }
}
