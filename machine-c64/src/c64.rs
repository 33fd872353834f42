//! Top-level C64 system: scheduler, run loop, and machine lifecycle.
//!
//! The master clock ticks at the CPU rate (985,248 Hz PAL). Within one
//! cycle the order is fixed: VIC first (it may steal the bus), then both
//! CIAs, then the CPU, then the drive catches up to the wall-clock time
//! of the cycle. One frame is the model's lines × cycles.
//!
//! The run loop polls a flag mask at the end of every cycle; any set
//! flag suspends execution at the next clean instruction boundary. The
//! machine lifecycle is an explicit state machine {Off, Paused, Running,
//! Halted}; transitions happen only at instruction boundaries.

#![allow(clippy::cast_possible_truncation)]

use bitflags::bitflags;
use crossbeam_channel::Receiver;
use drive_1541::{Disk, Drive1541};
use emu_core::{Bus, ExecResult, MasterClock, Observable, StopReason, Tickable, Value};
use mos_6510::{IrqSource, Mos6510, NmiSource, Status};

use crate::bus::C64Bus;
use crate::cartridge::Cartridge;
use crate::config::{C64Config, ConfigError};
use crate::messages::{Message, MessageQueue};
use crate::prg;
use crate::snapshot::{Reader, SnapshotError, Writer};

bitflags! {
    /// Run-loop control flags, polled at the end of each cycle.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct RunLoopFlags: u8 {
        const STOP = 0x01;
        const CPU_JAMMED = 0x02;
        const INSPECT = 0x04;
        const BREAKPOINT = 0x08;
        const WATCHPOINT = 0x10;
        const AUTO_SNAPSHOT = 0x20;
        const USER_SNAPSHOT = 0x40;
    }
}

/// Machine lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MachineState {
    Off,
    Paused,
    Running,
    Halted,
}

/// The Commodore 64.
pub struct C64 {
    cpu: Mos6510,
    pub bus: C64Bus,
    pub drive: Drive1541,

    state: MachineState,
    run_flags: RunLoopFlags,
    /// UI suspension nesting depth.
    suspend_depth: u32,
    warp: bool,

    /// Duration of one CPU cycle in tenths of a nanosecond.
    cycle_duration: u64,

    messages: MessageQueue,
    /// Drive status mirrors, to post change messages from the frame hook.
    drive_led_seen: bool,
    drive_motor_seen: bool,
    disk_modified_seen: bool,
}

impl C64 {
    /// Build a machine. Fails with `RomMissing` if any ROM image is
    /// absent or mis-sized; nothing is powered on yet.
    pub fn new(config: &C64Config) -> Result<Self, ConfigError> {
        config.validate()?;
        let bus = C64Bus::new(config);
        let drive = Drive1541::new(config.drive_rom.clone())
            .map_err(|_| ConfigError::RomMissing("1541 dos"))?;
        Ok(Self {
            cpu: Mos6510::new(),
            bus,
            drive,
            state: MachineState::Off,
            run_flags: RunLoopFlags::empty(),
            suspend_depth: 0,
            warp: false,
            cycle_duration: MasterClock::new(config.vic_model.cpu_frequency())
                .tick_duration_tenth_ns(),
            messages: MessageQueue::new(),
            drive_led_seen: false,
            drive_motor_seen: false,
            disk_modified_seen: false,
        })
    }

    // --- Lifecycle ---

    /// Power on: hard reset everything and enter the paused state.
    pub fn power_on(&mut self) {
        self.hard_reset();
        self.state = MachineState::Paused;
        self.messages.post(Message::PowerOn);
    }

    /// Power off. Blocks nothing: the caller owns the machine.
    pub fn power_off(&mut self) {
        self.state = MachineState::Off;
        self.drive.power_off();
        self.messages.post(Message::PowerOff);
    }

    /// Start (or resume) the run loop.
    pub fn run(&mut self) {
        if self.state == MachineState::Paused || self.state == MachineState::Halted {
            self.state = MachineState::Running;
            self.run_flags -= RunLoopFlags::STOP | RunLoopFlags::BREAKPOINT;
            self.messages.post(Message::Resumed);
        }
    }

    /// Pause at the next instruction boundary.
    pub fn pause(&mut self) {
        if self.state == MachineState::Running {
            self.run_flags |= RunLoopFlags::STOP;
        }
    }

    /// Request a halt (processed at the next instruction boundary).
    pub fn signal_stop(&mut self) {
        self.run_flags |= RunLoopFlags::STOP;
    }

    #[must_use]
    pub fn state(&self) -> MachineState {
        self.state
    }

    #[must_use]
    pub fn run_flags(&self) -> RunLoopFlags {
        self.run_flags
    }

    /// Hard reset: clear-on-reset state zeroed, components re-created.
    pub fn hard_reset(&mut self) {
        self.bus.mem.clear_ram();
        self.soft_reset();
    }

    /// Soft reset: components reset, RAM kept.
    pub fn soft_reset(&mut self) {
        self.bus.mem.reset();
        self.bus.vic.reset();
        self.bus.cia1.reset();
        self.bus.cia2.reset();
        self.bus.sid.reset();
        self.bus.sync_cia2_outputs();
        if let Some(cart) = self.bus.cartridge.as_mut() {
            cart.reset_config();
        }
        let (game, exrom) = self
            .bus
            .cartridge
            .as_ref()
            .map_or((true, true), |c| (c.game_line(), c.exrom_line()));
        self.bus.mem.set_cartridge_lines(game, exrom, 0);
        self.bus.vic.set_ultimax(self.bus.mem.ultimax());

        self.cpu = Mos6510::new();
        self.cpu.reset(&mut self.bus);
        self.drive.power_on();
        self.run_flags = RunLoopFlags::empty();
        self.messages.post(Message::Reset);
    }

    // --- Suspension (UI mutation windows) ---

    /// Enter a suspend window. Nested calls stack.
    pub fn suspend(&mut self) {
        self.suspend_depth += 1;
        if self.state == MachineState::Running {
            self.state = MachineState::Halted;
            self.messages.post(Message::Stopped(StopReason::Requested));
        }
    }

    /// Leave a suspend window; the outermost resume restarts the loop.
    pub fn resume(&mut self) {
        self.suspend_depth = self.suspend_depth.saturating_sub(1);
        if self.suspend_depth == 0 && self.state == MachineState::Halted {
            self.state = MachineState::Running;
            self.messages.post(Message::Resumed);
        }
    }

    #[must_use]
    pub fn suspended(&self) -> bool {
        self.suspend_depth > 0
    }

    // --- Warp ---

    /// Engage or release warp. The SID sink ramps its volume so the
    /// transition never pops; frame pacing is the host's concern.
    pub fn set_warp(&mut self, warp: bool) {
        if self.warp != warp {
            self.warp = warp;
            if warp {
                self.bus.sid.ramp_down();
            } else {
                self.bus.sid.ramp_up();
            }
            self.messages.post(Message::WarpChanged { on: warp });
        }
    }

    #[must_use]
    pub fn warp(&self) -> bool {
        self.warp
    }

    // --- Messages ---

    /// Take the host-side message endpoint (callable once).
    pub fn take_message_receiver(&mut self) -> Option<Receiver<Message>> {
        self.messages.take_receiver()
    }

    /// Drain messages in-process (tests, simple hosts).
    pub fn drain_messages(&self) -> Vec<Message> {
        self.messages.drain()
    }

    // --- Execution ---

    /// One master clock cycle: VIC → CIAs → CPU → drive.
    pub fn execute_cycle(&mut self) -> ExecResult {
        self.bus.set_cycle(self.cpu.cycle());

        // 1. VIC: may assert BA, stealing read cycles from the CPU.
        let ba_low = self
            .bus
            .vic
            .cycle(&self.bus.mem, self.bus.cartridge.as_ref());
        self.cpu.set_rdy(!ba_low);

        // 2. CIAs.
        self.bus.cycle_cias();

        // 3. Interrupt lines. Every source holds its own bit; the line
        // stays low while any bit is set.
        if self.bus.vic.irq_line_low() {
            self.cpu.pull_down_irq(IrqSource::VIC);
        } else {
            self.cpu.release_irq(IrqSource::VIC);
        }
        if self.bus.cia1.irq_line_low() {
            self.cpu.pull_down_irq(IrqSource::CIA);
        } else {
            self.cpu.release_irq(IrqSource::CIA);
        }
        if self.bus.cia2.irq_line_low() {
            self.cpu.pull_down_nmi(NmiSource::CIA);
        } else {
            self.cpu.release_nmi(NmiSource::CIA);
        }
        if self.bus.keyboard.restore_held() {
            self.cpu.pull_down_nmi(NmiSource::KEYBOARD);
        } else {
            self.cpu.release_nmi(NmiSource::KEYBOARD);
        }

        // 4. CPU.
        let result = self.cpu.execute_one_cycle(&mut self.bus);

        // 5. SID sample clock.
        self.bus.sid.execute_cycle();

        // 6. Drive: replay its schedules over this cycle's duration.
        self.drive.execute(self.cycle_duration, &mut self.bus.iec);

        if let ExecResult::StopAtBoundary(reason) = result {
            match reason {
                StopReason::Jammed => self.run_flags |= RunLoopFlags::CPU_JAMMED,
                StopReason::SoftBreakpoint | StopReason::HardBreakpoint => {
                    self.run_flags |= RunLoopFlags::BREAKPOINT;
                }
                StopReason::Watchpoint => self.run_flags |= RunLoopFlags::WATCHPOINT,
                StopReason::Requested => self.run_flags |= RunLoopFlags::STOP,
            }
        }
        result
    }

    /// Run until the frame completes or a run-loop flag suspends the
    /// machine at an instruction boundary. Returns the stop reason, if
    /// any.
    pub fn run_frame(&mut self) -> Option<StopReason> {
        loop {
            let result = self.execute_cycle();

            if !self.run_flags.is_empty() && self.cpu.at_instruction_boundary() {
                let reason = match result {
                    ExecResult::StopAtBoundary(r) => r,
                    ExecResult::Continue => StopReason::Requested,
                };
                self.state = if self.run_flags.contains(RunLoopFlags::CPU_JAMMED) {
                    MachineState::Halted
                } else {
                    MachineState::Paused
                };
                self.run_flags -= RunLoopFlags::STOP;
                self.messages.post(Message::Stopped(reason));
                return Some(reason);
            }

            if self.bus.vic.take_frame_complete() {
                self.frame_end_hook();
                return None;
            }
        }
    }

    /// Frame-end hook: feed the TOD clocks, publish status changes.
    ///
    /// The frame rate tracks the power-line frequency closely enough
    /// that one pulse per frame is the hardware-faithful feed.
    fn frame_end_hook(&mut self) {
        self.bus.cia1.tod_pulse();
        self.bus.cia2.tod_pulse();

        self.messages.post(Message::Frame {
            number: self.bus.vic.frame(),
        });

        if self.drive.led_on() != self.drive_led_seen {
            self.drive_led_seen = self.drive.led_on();
            self.messages.post(Message::DriveLed {
                on: self.drive_led_seen,
            });
        }
        if self.drive.spinning() != self.drive_motor_seen {
            self.drive_motor_seen = self.drive.spinning();
            self.messages.post(Message::DriveMotor {
                spinning: self.drive_motor_seen,
            });
        }
        let modified = self.drive.disk().is_some_and(Disk::modified);
        if modified && !self.disk_modified_seen {
            self.messages.post(Message::DiskModified);
        }
        self.disk_modified_seen = modified;
    }

    // --- Access ---

    #[must_use]
    pub fn cpu(&self) -> &Mos6510 {
        &self.cpu
    }

    pub fn cpu_mut(&mut self) -> &mut Mos6510 {
        &mut self.cpu
    }

    /// Side-effect-free memory read through the CPU's current banking.
    #[must_use]
    pub fn spypeek(&self, addr: u16) -> u8 {
        self.bus.peek(addr)
    }

    #[must_use]
    pub fn frame_count(&self) -> u64 {
        self.bus.vic.frame()
    }

    // --- Media ---

    pub fn insert_disk(&mut self, disk: Disk) {
        self.drive.insert_disk(disk);
        self.messages.post(Message::DiskInserted);
    }

    pub fn eject_disk(&mut self) -> Option<Disk> {
        let disk = self.drive.eject_disk();
        if disk.is_some() {
            self.messages.post(Message::DiskEjected);
        }
        disk
    }

    pub fn attach_cartridge(&mut self, cartridge: Cartridge) {
        self.bus.attach_cartridge(cartridge);
    }

    pub fn load_prg(&mut self, data: &[u8]) -> Result<(u16, u16), prg::LoadError> {
        prg::load_prg(&mut self.bus.mem, data)
    }

    pub fn load_p00(&mut self, data: &[u8]) -> Result<(u16, u16), prg::LoadError> {
        prg::load_p00(&mut self.bus.mem, data)
    }

    pub fn load_t64(&mut self, data: &[u8]) -> Result<(u16, u16), prg::LoadError> {
        prg::load_t64(&mut self.bus.mem, data)
    }

    // --- Snapshots ---

    /// Serialize the machine state. Component order is fixed: CPU,
    /// memory, VIC, CIA1, CIA2, SID, drive.
    #[must_use]
    pub fn save_snapshot(&self) -> Vec<u8> {
        let mut w = Writer::new();

        // CPU.
        let regs = &self.cpu.regs;
        w.put_u8(regs.a);
        w.put_u8(regs.x);
        w.put_u8(regs.y);
        w.put_u8(regs.sp);
        w.put_u16(regs.pc);
        w.put_u16(regs.pc_frozen);
        w.put_u8(regs.p.bits());
        w.put_u64(self.cpu.cycle());
        write_micro_state(&mut w, &self.cpu.micro_state());

        // Memory.
        w.put_bytes(&self.bus.mem.ram[..]);
        w.put_bytes(self.bus.mem.color_ram_bytes());
        w.put_u8(self.bus.mem.port.raw_port());
        w.put_u8(self.bus.mem.port.raw_direction());
        for cycle in self.bus.mem.port.discharge_cycles() {
            w.put_u64(cycle);
        }

        // VIC.
        let vic = self.bus.vic.state_for_snapshot();
        w.put_bytes(&vic.reg_current);
        w.put_bytes(&vic.reg_delayed);
        w.put_u16(vic.raster_line);
        w.put_u8(vic.raster_cycle);
        w.put_u16(vic.raster_compare);
        w.put_u8(vic.irr);
        w.put_u8(vic.imr);
        w.put_u8(vic.bank);
        w.put_u16(vic.vc);
        w.put_u16(vic.vc_base);
        w.put_u8(vic.rc);
        w.put_bool(vic.den_latch);
        w.put_bool(vic.display_state);
        w.put_bytes(&vic.vm_line);
        w.put_bytes(&vic.color_line);
        w.put_u8(vic.sprite_sprite_coll);
        w.put_u8(vic.sprite_bg_coll);

        // CIAs.
        for cia in [&self.bus.cia1, &self.bus.cia2] {
            let view = cia.registers_for_snapshot();
            w.put_u16(view.counters[0]);
            w.put_u16(view.counters[1]);
            w.put_u16(view.latches[0]);
            w.put_u16(view.latches[1]);
            w.put_u8(view.control[0]);
            w.put_u8(view.control[1]);
            w.put_bytes(&view.ports);
            w.put_u8(view.icr);
            w.put_u8(view.icr_ack);
            w.put_u8(view.imr);
            w.put_bool(view.int_line);
            w.put_u8(view.sdr);
            w.put_u8(view.ser_counter);
            w.put_bytes(&view.pb67);
            w.put_u64(view.pipeline.0);
            w.put_u64(view.pipeline.1);
            let time = cia.tod.time();
            let alarm = cia.tod.alarm();
            for t in [time, alarm] {
                w.put_u8(t.tenths);
                w.put_u8(t.seconds);
                w.put_u8(t.minutes);
                w.put_u8(t.hours);
            }
            w.put_bool(cia.tod.stopped());
            w.put_u8(cia.tod.divider());
        }

        // SID registers.
        w.put_bytes(self.bus.sid.registers());

        // Drive.
        let dregs = &self.drive.cpu().regs;
        w.put_u8(dregs.a);
        w.put_u8(dregs.x);
        w.put_u8(dregs.y);
        w.put_u8(dregs.sp);
        w.put_u16(dregs.pc);
        w.put_u16(dregs.pc_frozen);
        w.put_u8(dregs.p.bits());
        write_micro_state(&mut w, &self.drive.cpu().micro_state());
        w.put_bytes(self.drive.mem().ram());
        w.put_u8(self.drive.halftrack());
        w.put_u32(self.drive.head_offset() as u32);
        let clock = self.drive.clock_state();
        w.put_u64(clock.elapsed_time);
        w.put_u64(clock.next_clock);
        w.put_u64(clock.next_carry);
        w.put_u8(clock.counter_uf4);
        w.put_u8(clock.byte_ready_counter);
        w.put_u16(clock.read_shift);
        w.put_u8(clock.write_shift);
        w.put_bool(clock.sync);
        w.put_bool(clock.byte_ready);
        w.put_u8(clock.zone);
        w.put_bool(clock.spinning);
        w.put_bool(clock.led_on);
        w.put_u64(clock.cpu_cycle);

        w.finish()
    }

    /// Restore a snapshot. The version check happens before any field is
    /// consumed; a truncated stream leaves the machine unchanged only up
    /// to the point of failure, so callers should treat errors as fatal.
    pub fn load_snapshot(&mut self, data: &[u8]) -> Result<(), SnapshotError> {
        let mut r = Reader::new(data)?;

        // CPU.
        self.cpu.regs.a = r.get_u8()?;
        self.cpu.regs.x = r.get_u8()?;
        self.cpu.regs.y = r.get_u8()?;
        self.cpu.regs.sp = r.get_u8()?;
        self.cpu.regs.pc = r.get_u16()?;
        self.cpu.regs.pc_frozen = r.get_u16()?;
        let p = r.get_u8()?;
        self.cpu.regs.p = Status::from_bits_truncate(p);
        let cycle = r.get_u64()?;
        self.cpu.set_cycle(cycle);
        let micro = read_micro_state(&mut r)?;
        self.cpu.restore_micro_state(&micro);

        // Memory.
        r.get_bytes(&mut self.bus.mem.ram[..])?;
        let mut color = [0u8; 1024];
        r.get_bytes(&mut color)?;
        self.bus.mem.restore_color_ram(&color);
        let port = r.get_u8()?;
        let direction = r.get_u8()?;
        let discharge = [r.get_u64()?, r.get_u64()?, r.get_u64()?];
        self.bus.mem.port.restore(port, direction, discharge, false);
        self.bus.mem.update_lookup_tables(cycle);

        // VIC.
        let mut vic = self.bus.vic.state_for_snapshot();
        r.get_bytes(&mut vic.reg_current)?;
        r.get_bytes(&mut vic.reg_delayed)?;
        vic.raster_line = r.get_u16()?;
        vic.raster_cycle = r.get_u8()?;
        vic.raster_compare = r.get_u16()?;
        vic.irr = r.get_u8()?;
        vic.imr = r.get_u8()?;
        vic.bank = r.get_u8()?;
        vic.vc = r.get_u16()?;
        vic.vc_base = r.get_u16()?;
        vic.rc = r.get_u8()?;
        vic.den_latch = r.get_bool()?;
        vic.display_state = r.get_bool()?;
        r.get_bytes(&mut vic.vm_line)?;
        r.get_bytes(&mut vic.color_line)?;
        vic.sprite_sprite_coll = r.get_u8()?;
        vic.sprite_bg_coll = r.get_u8()?;
        self.bus.vic.restore(&vic);

        // CIAs.
        for which in 0..2 {
            let counters = [r.get_u16()?, r.get_u16()?];
            let latches = [r.get_u16()?, r.get_u16()?];
            let control = [r.get_u8()?, r.get_u8()?];
            let mut ports = [0u8; 4];
            r.get_bytes(&mut ports)?;
            let icr = r.get_u8()?;
            let icr_ack = r.get_u8()?;
            let imr = r.get_u8()?;
            let int_line = r.get_bool()?;
            let sdr = r.get_u8()?;
            let ser_counter = r.get_u8()?;
            let mut pb67 = [0u8; 2];
            r.get_bytes(&mut pb67)?;
            let pipeline = (r.get_u64()?, r.get_u64()?);
            let mut times = [crate::tod::TodTime::default(); 2];
            for t in &mut times {
                t.tenths = r.get_u8()?;
                t.seconds = r.get_u8()?;
                t.minutes = r.get_u8()?;
                t.hours = r.get_u8()?;
            }
            let stopped = r.get_bool()?;
            let divider = r.get_u8()?;

            let cia = if which == 0 { &mut self.bus.cia1 } else { &mut self.bus.cia2 };
            cia.restore_registers(
                counters, latches, control, ports, icr, icr_ack, imr, int_line, sdr,
                ser_counter, pb67, pipeline,
            );
            cia.tod.restore(times[0], times[1], stopped, divider);
        }
        self.bus.sync_cia2_outputs();

        // SID.
        let mut sid_regs = [0u8; 0x20];
        r.get_bytes(&mut sid_regs)?;
        for (reg, &value) in sid_regs.iter().enumerate() {
            self.bus.sid.write(reg as u8, value);
        }

        // Drive.
        let dr = self.drive.cpu_mut();
        dr.regs.a = r.get_u8()?;
        dr.regs.x = r.get_u8()?;
        dr.regs.y = r.get_u8()?;
        dr.regs.sp = r.get_u8()?;
        dr.regs.pc = r.get_u16()?;
        dr.regs.pc_frozen = r.get_u16()?;
        let dp = r.get_u8()?;
        dr.regs.p = Status::from_bits_truncate(dp);
        let dmicro = read_micro_state(&mut r)?;
        dr.restore_micro_state(&dmicro);
        let mut dram = [0u8; 0x800];
        r.get_bytes(&mut dram)?;
        *self.drive.mem_mut().ram_mut() = dram;
        let halftrack = r.get_u8()?;
        let offset = r.get_u32()? as usize;
        self.drive.set_head(halftrack, offset);
        let clock = drive_1541::DriveClockState {
            elapsed_time: r.get_u64()?,
            next_clock: r.get_u64()?,
            next_carry: r.get_u64()?,
            counter_uf4: r.get_u8()?,
            byte_ready_counter: r.get_u8()?,
            read_shift: r.get_u16()?,
            write_shift: r.get_u8()?,
            sync: r.get_bool()?,
            byte_ready: r.get_bool()?,
            zone: r.get_u8()?,
            spinning: r.get_bool()?,
            led_on: r.get_bool()?,
            cpu_cycle: r.get_u64()?,
        };
        self.drive.restore_clock_state(&clock);

        self.messages.post(Message::SnapshotTaken);
        Ok(())
    }
}

fn write_micro_state(w: &mut Writer, s: &mos_6510::CpuMicroState) {
    w.put_u8(s.state);
    w.put_u8(s.opcode);
    w.put_bool(s.in_interrupt);
    w.put_u8(s.micro_ip);
    w.put_u16(s.addr);
    w.put_u8(s.pointer);
    w.put_u8(s.idl);
    w.put_bool(s.fixup);
    w.put_u16(s.branch_target);
    w.put_u16(s.vector);
    w.put_bool(s.irq_delay);
    w.put_bool(s.do_irq);
    w.put_bool(s.nmi_delay);
    w.put_bool(s.do_nmi);
    w.put_bool(s.nmi_line_was_high);
    w.put_bool(s.rdy);
}

fn read_micro_state(r: &mut Reader<'_>) -> Result<mos_6510::CpuMicroState, SnapshotError> {
    Ok(mos_6510::CpuMicroState {
        state: r.get_u8()?,
        opcode: r.get_u8()?,
        in_interrupt: r.get_bool()?,
        micro_ip: r.get_u8()?,
        addr: r.get_u16()?,
        pointer: r.get_u8()?,
        idl: r.get_u8()?,
        fixup: r.get_bool()?,
        branch_target: r.get_u16()?,
        vector: r.get_u16()?,
        irq_delay: r.get_bool()?,
        do_irq: r.get_bool()?,
        nmi_delay: r.get_bool()?,
        do_nmi: r.get_bool()?,
        nmi_line_was_high: r.get_bool()?,
        rdy: r.get_bool()?,
    })
}

impl Tickable for C64 {
    fn tick(&mut self) {
        let _ = self.execute_cycle();
    }
}

impl Observable for C64 {
    fn query(&self, path: &str) -> Option<Value> {
        if let Some(rest) = path.strip_prefix("cpu.") {
            return self.cpu.query(rest);
        }
        if let Some(rest) = path.strip_prefix("vic.") {
            return self.bus.vic.query(rest);
        }
        if let Some(rest) = path.strip_prefix("drive.") {
            return self.drive.query(rest);
        }
        if let Some(rest) = path.strip_prefix("cia1.") {
            return match rest {
                "timer_a" => Some(self.bus.cia1.timer_a().into()),
                "timer_b" => Some(self.bus.cia1.timer_b().into()),
                "icr" => Some(self.bus.cia1.icr_status().into()),
                "imr" => Some(self.bus.cia1.icr_mask().into()),
                _ => None,
            };
        }
        if let Some(rest) = path.strip_prefix("cia2.") {
            return match rest {
                "timer_a" => Some(self.bus.cia2.timer_a().into()),
                "timer_b" => Some(self.bus.cia2.timer_b().into()),
                "icr" => Some(self.bus.cia2.icr_status().into()),
                "imr" => Some(self.bus.cia2.icr_mask().into()),
                _ => None,
            };
        }
        if let Some(rest) = path.strip_prefix("mem.") {
            let addr = rest
                .strip_prefix("0x")
                .and_then(|hex| u16::from_str_radix(hex, 16).ok())
                .or_else(|| rest.parse().ok())?;
            return Some(self.spypeek(addr).into());
        }
        match path {
            "frame" => Some(self.frame_count().into()),
            "warp" => Some(self.warp.into()),
            _ => None,
        }
    }

    fn query_paths(&self) -> &'static [&'static str] {
        &[
            "cpu.<register>",
            "vic.<field>",
            "drive.<field>",
            "cia1.timer_a",
            "cia1.timer_b",
            "cia1.icr",
            "cia1.imr",
            "cia2.timer_a",
            "cia2.timer_b",
            "cia2.icr",
            "cia2.imr",
            "mem.<address>",
            "frame",
            "warp",
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::VicModel;

    fn test_config() -> C64Config {
        // Kernal is a NOP sled with vectors pointing back into it.
        let mut kernal = vec![0xEA; 8192];
        kernal[0x1FFC] = 0x00; // Reset → $E000
        kernal[0x1FFD] = 0xE0;
        kernal[0x1FFE] = 0x00; // IRQ → $E000
        kernal[0x1FFF] = 0xE0;
        kernal[0x1FFA] = 0x00; // NMI → $E000
        kernal[0x1FFB] = 0xE0;
        let mut drive_rom = vec![0xEA; 16384];
        drive_rom[0x3FFC] = 0x00;
        drive_rom[0x3FFD] = 0xC0;
        C64Config::pal(kernal, vec![0; 8192], vec![0; 4096], drive_rom)
    }

    fn make_c64() -> C64 {
        let mut c64 = C64::new(&test_config()).expect("valid config");
        c64.power_on();
        c64
    }

    #[test]
    fn rom_missing_refuses_power_on() {
        let mut config = test_config();
        config.kernal_rom = Vec::new();
        assert!(C64::new(&config).is_err());
    }

    #[test]
    fn reset_reads_vector() {
        let c64 = make_c64();
        assert_eq!(c64.cpu().regs.pc, 0xE000);
    }

    #[test]
    fn cycle_advances_cpu_by_one() {
        let mut c64 = make_c64();
        let before = c64.cpu().cycle();
        let _ = c64.execute_cycle();
        assert_eq!(c64.cpu().cycle(), before + 1);
    }

    #[test]
    fn run_frame_is_one_frame_of_cycles() {
        let mut c64 = make_c64();
        let before = c64.cpu().cycle();
        assert!(c64.run_frame().is_none());
        let elapsed = c64.cpu().cycle() - before;
        assert_eq!(elapsed, u64::from(VicModel::Pal6569.cycles_per_frame()));
    }

    #[test]
    fn hard_reset_is_idempotent() {
        let mut c64 = make_c64();
        for _ in 0..1000 {
            let _ = c64.execute_cycle();
        }
        c64.bus.mem.ram_write(0x1234, 0x56);
        c64.hard_reset();
        let first = c64.save_snapshot();
        c64.hard_reset();
        let second = c64.save_snapshot();
        assert_eq!(first, second);
    }

    #[test]
    fn stop_flag_suspends_at_boundary() {
        let mut c64 = make_c64();
        c64.run();
        c64.signal_stop();
        let reason = c64.run_frame();
        assert_eq!(reason, Some(StopReason::Requested));
        assert_eq!(c64.state(), MachineState::Paused);
        assert!(c64.cpu().at_instruction_boundary());
    }

    #[test]
    fn jam_sets_flag_and_halts() {
        let mut c64 = make_c64();
        // Poke a JAM opcode at the reset target, running from RAM.
        c64.bus.mem.ram_write(0x2000, 0x02);
        c64.cpu_mut().regs.pc = 0x2000;
        c64.bus.write(0x0001, 0x30); // All RAM so the fetch sees the JAM
        let reason = c64.run_frame();
        assert_eq!(reason, Some(StopReason::Jammed));
        assert!(c64.run_flags().contains(RunLoopFlags::CPU_JAMMED));
        assert_eq!(c64.state(), MachineState::Halted);
    }

    #[test]
    fn suspend_resume_nesting() {
        let mut c64 = make_c64();
        c64.run();
        c64.suspend();
        c64.suspend();
        assert!(c64.suspended());
        c64.resume();
        assert!(c64.suspended(), "still nested");
        assert_eq!(c64.state(), MachineState::Halted);
        c64.resume();
        assert!(!c64.suspended());
        assert_eq!(c64.state(), MachineState::Running);
    }

    #[test]
    fn warp_messages_and_ramp() {
        let mut c64 = make_c64();
        let _ = c64.drain_messages();
        c64.set_warp(true);
        c64.set_warp(true); // No duplicate message
        c64.set_warp(false);
        let messages = c64.drain_messages();
        assert_eq!(
            messages,
            vec![
                Message::WarpChanged { on: true },
                Message::WarpChanged { on: false }
            ]
        );
    }

    #[test]
    fn frame_message_posted() {
        let mut c64 = make_c64();
        let _ = c64.drain_messages();
        let _ = c64.run_frame();
        let messages = c64.drain_messages();
        assert!(messages.iter().any(|m| matches!(m, Message::Frame { .. })));
    }

    #[test]
    fn tod_advances_with_frames() {
        let mut c64 = make_c64();
        // Start CIA1's TOD.
        c64.bus.cia1.write(0x0E, 0x80); // 50 Hz line
        c64.bus.cia1.write(0x08, 0); // Write tenths: clock runs
        // 5 frames at 50 Hz = one tenth of a second.
        for _ in 0..5 {
            let _ = c64.run_frame();
        }
        assert_eq!(c64.bus.cia1.tod.time().tenths, 1);
    }

    #[test]
    fn snapshot_round_trip_preserves_ram_and_registers() {
        let mut c64 = make_c64();
        for _ in 0..5000 {
            let _ = c64.execute_cycle();
        }
        c64.bus.mem.ram_write(0x1000, 0xAA);
        let snapshot = c64.save_snapshot();

        let mut other = C64::new(&test_config()).expect("valid config");
        other.power_on();
        other.load_snapshot(&snapshot).expect("loads");

        assert_eq!(other.cpu().regs.pc, c64.cpu().regs.pc);
        assert_eq!(other.cpu().cycle(), c64.cpu().cycle());
        assert_eq!(other.spypeek(0x1000), 0xAA);

        // Both instances continue identically.
        for _ in 0..1000 {
            let _ = c64.execute_cycle();
            let _ = other.execute_cycle();
        }
        assert_eq!(c64.save_snapshot(), other.save_snapshot());
    }

    #[test]
    fn snapshot_version_checked() {
        let mut c64 = make_c64();
        let mut snapshot = c64.save_snapshot();
        snapshot[4] = 0x7F;
        assert!(c64.load_snapshot(&snapshot).is_err());
    }

    #[test]
    fn spypeek_is_pure() {
        let mut c64 = make_c64();
        for _ in 0..100 {
            let _ = c64.execute_cycle();
        }
        let before = c64.save_snapshot();
        for addr in [0x0000u16, 0x0001, 0xD019, 0xDC0D, 0xDD0D, 0xD800, 0x1234] {
            let _ = c64.spypeek(addr);
        }
        assert_eq!(c64.save_snapshot(), before);
    }

    #[test]
    fn restore_key_raises_nmi() {
        let mut c64 = make_c64();
        c64.bus.keyboard.set_restore(true);
        for _ in 0..20 {
            let _ = c64.execute_cycle();
        }
        // NMI vector executed: PC inside the kernal NOP sled.
        assert!(c64.cpu().regs.pc >= 0xE000);
        // Releasing and pressing again re-triggers (edge detector).
        c64.bus.keyboard.set_restore(false);
        for _ in 0..4 {
            let _ = c64.execute_cycle();
        }
        c64.bus.keyboard.set_restore(true);
        for _ in 0..20 {
            let _ = c64.execute_cycle();
        }
        assert!(c64.cpu().regs.pc >= 0xE000);
    }
}
