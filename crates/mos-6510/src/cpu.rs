//! The micro-cycle execution engine.

#![allow(clippy::cast_possible_truncation)]

use bitflags::bitflags;
use emu_core::{Bus, ExecResult, Observable, StopReason, Value};

use crate::microcode::{sequence, Micro, Mode, Op, INTERRUPT, OPCODES};
use crate::registers::{Registers, Status};

bitflags! {
    /// Sources that can pull the IRQ line low. The line is low while any
    /// bit is set.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct IrqSource: u8 {
        const CIA = 0x01;
        const VIC = 0x02;
        const VIA1 = 0x04;
        const VIA2 = 0x08;
        const EXPANSION = 0x10;
    }
}

bitflags! {
    /// Sources that can pull the NMI line low.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct NmiSource: u8 {
        const CIA = 0x01;
        const KEYBOARD = 0x02;
        const EXPANSION = 0x04;
    }
}

/// CPU health tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorState {
    Ok,
    SoftBreakpoint,
    HardBreakpoint,
    Jammed,
}

/// Capacity of the retired-instruction trace ring.
pub const TRACE_CAPACITY: usize = 1024;

/// Flattened micro-cycle state for snapshots.
#[derive(Debug, Clone, Copy)]
pub struct CpuMicroState {
    /// 0 = fetch, 1 = execute, 2 = jammed.
    pub state: u8,
    pub opcode: u8,
    /// Executing the interrupt sequence instead of a decoded opcode.
    pub in_interrupt: bool,
    pub micro_ip: u8,
    pub addr: u16,
    pub pointer: u8,
    pub idl: u8,
    pub fixup: bool,
    pub branch_target: u16,
    pub vector: u16,
    pub irq_delay: bool,
    pub do_irq: bool,
    pub nmi_delay: bool,
    pub do_nmi: bool,
    pub nmi_line_was_high: bool,
    pub rdy: bool,
}

/// One retired instruction, recorded at its fetch cycle.
#[derive(Debug, Clone, Copy, Default)]
pub struct TraceEntry {
    pub cycle: u64,
    pub pc: u16,
    pub opcode: u8,
    pub a: u8,
    pub x: u8,
    pub y: u8,
    pub sp: u8,
    pub p: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    /// Next cycle fetches an opcode (or enters an interrupt sequence).
    Fetch,
    /// Executing the current micro-instruction sequence.
    Execute,
    /// Jam opcode executed; dead until reset.
    Jammed,
}

/// Cycle-stepped MOS 6502/6510.
pub struct Mos6510 {
    /// Architectural registers.
    pub regs: Registers,

    state: State,
    opcode: u8,
    op: Op,
    mode: Mode,
    seq: &'static [Micro],
    micro_ip: usize,

    /// Effective address latch (ADL/ADH pair).
    addr: u16,
    /// Zero-page pointer latch for indirect modes.
    pointer: u8,
    /// Input data latch.
    idl: u8,
    /// Page-cross carry noted during indexed address computation.
    fixup: bool,
    /// Fully-resolved branch target.
    branch_target: u16,
    /// Interrupt vector base for the running interrupt/BRK sequence.
    vector: u16,

    /// Clock cycle counter. Increments exactly once per executed cycle.
    cycle: u64,

    rdy: bool,
    rdy_rose_at: u64,
    rdy_fell_at: u64,

    irq_sources: IrqSource,
    nmi_sources: NmiSource,
    /// IRQ level, delayed by one cycle.
    irq_delay: bool,
    do_irq: bool,
    /// NMI edge, delayed by one cycle.
    nmi_delay: bool,
    do_nmi: bool,
    nmi_line_was_high: bool,

    error_state: ErrorState,
    breakpoints: Vec<u16>,
    /// Set after a breakpoint stop so the next call resumes past it.
    bp_resume: bool,

    trace: Box<[TraceEntry; TRACE_CAPACITY]>,
    trace_head: usize,
    trace_len: usize,
}

impl Mos6510 {
    #[must_use]
    pub fn new() -> Self {
        Self {
            regs: Registers::new(),
            state: State::Fetch,
            opcode: 0,
            op: Op::Nop,
            mode: Mode::Imp,
            seq: &[],
            micro_ip: 0,
            addr: 0,
            pointer: 0,
            idl: 0,
            fixup: false,
            branch_target: 0,
            vector: 0xFFFE,
            cycle: 0,
            rdy: true,
            rdy_rose_at: 0,
            rdy_fell_at: 0,
            irq_sources: IrqSource::empty(),
            nmi_sources: NmiSource::empty(),
            irq_delay: false,
            do_irq: false,
            nmi_delay: false,
            do_nmi: false,
            nmi_line_was_high: true,
            error_state: ErrorState::Ok,
            breakpoints: Vec::new(),
            bp_resume: false,
            trace: Box::new([TraceEntry::default(); TRACE_CAPACITY]),
            trace_head: 0,
            trace_len: 0,
        }
    }

    /// Reset the CPU and load PC from the reset vector at $FFFC/$FFFD.
    pub fn reset<B: Bus>(&mut self, bus: &mut B) {
        self.regs = Registers::new();
        let lo = bus.read(0xFFFC);
        let hi = bus.read(0xFFFD);
        self.regs.pc = u16::from(lo) | (u16::from(hi) << 8);
        self.regs.pc_frozen = self.regs.pc;
        self.state = State::Fetch;
        self.micro_ip = 0;
        self.irq_sources = IrqSource::empty();
        self.nmi_sources = NmiSource::empty();
        self.irq_delay = false;
        self.do_irq = false;
        self.nmi_delay = false;
        self.do_nmi = false;
        self.nmi_line_was_high = true;
        self.error_state = ErrorState::Ok;
        self.bp_resume = false;
    }

    /// Advance the CPU by exactly one clock cycle.
    ///
    /// On a read cycle with RDY low the cycle repeats with no side effect.
    /// Write and internal cycles complete regardless of RDY.
    pub fn execute_one_cycle<B: Bus>(&mut self, bus: &mut B) -> ExecResult {
        if self.state == State::Jammed {
            let _ = bus.read(self.regs.pc);
            self.cycle += 1;
            self.update_interrupt_detectors();
            return ExecResult::StopAtBoundary(StopReason::Jammed);
        }

        if !self.rdy && !self.next_cycle_is_write() {
            // Frozen: the bus cycle repeats until RDY rises.
            self.cycle += 1;
            self.update_interrupt_detectors();
            return ExecResult::Continue;
        }

        let result = if self.state == State::Fetch {
            self.fetch_cycle(bus)
        } else {
            self.step_micro(bus);
            ExecResult::Continue
        };

        self.cycle += 1;
        self.update_interrupt_detectors();
        result
    }

    /// True if the CPU is between instructions (safe suspension point).
    #[must_use]
    pub fn at_instruction_boundary(&self) -> bool {
        self.state != State::Execute
    }

    /// Clock cycle counter.
    #[must_use]
    pub fn cycle(&self) -> u64 {
        self.cycle
    }

    /// Restore the cycle counter (snapshot load).
    pub fn set_cycle(&mut self, cycle: u64) {
        self.cycle = cycle;
    }

    /// Micro-cycle execution state, for state capture. Together with the
    /// register file this pins the CPU mid-instruction.
    #[must_use]
    pub fn micro_state(&self) -> CpuMicroState {
        CpuMicroState {
            state: match self.state {
                State::Fetch => 0,
                State::Execute => 1,
                State::Jammed => 2,
            },
            opcode: self.opcode,
            in_interrupt: std::ptr::eq(self.seq.as_ptr(), INTERRUPT.as_ptr()),
            micro_ip: self.micro_ip as u8,
            addr: self.addr,
            pointer: self.pointer,
            idl: self.idl,
            fixup: self.fixup,
            branch_target: self.branch_target,
            vector: self.vector,
            irq_delay: self.irq_delay,
            do_irq: self.do_irq,
            nmi_delay: self.nmi_delay,
            do_nmi: self.do_nmi,
            nmi_line_was_high: self.nmi_line_was_high,
            rdy: self.rdy,
        }
    }

    /// Restore micro-cycle state captured by [`Self::micro_state`].
    pub fn restore_micro_state(&mut self, s: &CpuMicroState) {
        self.state = match s.state {
            1 => State::Execute,
            2 => State::Jammed,
            _ => State::Fetch,
        };
        self.opcode = s.opcode;
        let (op, mode) = OPCODES[s.opcode as usize];
        self.op = op;
        self.mode = mode;
        self.seq = if s.in_interrupt {
            INTERRUPT
        } else {
            sequence(op, mode)
        };
        self.micro_ip = usize::from(s.micro_ip).min(self.seq.len().saturating_sub(1));
        self.addr = s.addr;
        self.pointer = s.pointer;
        self.idl = s.idl;
        self.fixup = s.fixup;
        self.branch_target = s.branch_target;
        self.vector = s.vector;
        self.irq_delay = s.irq_delay;
        self.do_irq = s.do_irq;
        self.nmi_delay = s.nmi_delay;
        self.do_nmi = s.do_nmi;
        self.nmi_line_was_high = s.nmi_line_was_high;
        self.rdy = s.rdy;
    }

    #[must_use]
    pub fn error_state(&self) -> ErrorState {
        self.error_state
    }

    #[must_use]
    pub fn is_jammed(&self) -> bool {
        self.state == State::Jammed
    }

    // --- RDY line ---

    /// Drive the RDY input. Level changes are timestamped for diagnostics.
    pub fn set_rdy(&mut self, level: bool) {
        if level != self.rdy {
            if level {
                self.rdy_rose_at = self.cycle;
            } else {
                self.rdy_fell_at = self.cycle;
            }
            self.rdy = level;
        }
    }

    #[must_use]
    pub fn rdy(&self) -> bool {
        self.rdy
    }

    /// Cycle at which RDY last rose.
    #[must_use]
    pub fn rdy_rose_at(&self) -> u64 {
        self.rdy_rose_at
    }

    /// Cycle at which RDY last fell.
    #[must_use]
    pub fn rdy_fell_at(&self) -> u64 {
        self.rdy_fell_at
    }

    // --- Interrupt lines ---

    /// Pull the IRQ line low for the given source.
    pub fn pull_down_irq(&mut self, source: IrqSource) {
        self.irq_sources |= source;
    }

    /// Release the IRQ line for the given source.
    pub fn release_irq(&mut self, source: IrqSource) {
        self.irq_sources -= source;
    }

    /// Pull the NMI line low for the given source.
    pub fn pull_down_nmi(&mut self, source: NmiSource) {
        self.nmi_sources |= source;
    }

    /// Release the NMI line for the given source.
    pub fn release_nmi(&mut self, source: NmiSource) {
        self.nmi_sources -= source;
    }

    #[must_use]
    pub fn irq_line_low(&self) -> bool {
        !self.irq_sources.is_empty()
    }

    #[must_use]
    pub fn nmi_line_low(&self) -> bool {
        !self.nmi_sources.is_empty()
    }

    /// Assert the SO (set overflow) pin. The 1541 wires byte-ready to it.
    pub fn set_overflow_pin(&mut self) {
        self.regs.p.insert(Status::OVERFLOW);
    }

    // --- Breakpoints ---

    pub fn add_breakpoint(&mut self, addr: u16) {
        if !self.breakpoints.contains(&addr) {
            self.breakpoints.push(addr);
        }
    }

    pub fn remove_breakpoint(&mut self, addr: u16) {
        self.breakpoints.retain(|&a| a != addr);
    }

    #[must_use]
    pub fn breakpoints(&self) -> &[u16] {
        &self.breakpoints
    }

    // --- Trace ring ---

    /// Retired instructions, oldest first. At most [`TRACE_CAPACITY`].
    pub fn trace(&self) -> impl Iterator<Item = &TraceEntry> {
        let start = (self.trace_head + TRACE_CAPACITY - self.trace_len) % TRACE_CAPACITY;
        (0..self.trace_len).map(move |i| &self.trace[(start + i) % TRACE_CAPACITY])
    }

    fn record_trace(&mut self) {
        self.trace[self.trace_head] = TraceEntry {
            cycle: self.cycle,
            pc: self.regs.pc,
            opcode: 0, // patched after the fetch read
            a: self.regs.a,
            x: self.regs.x,
            y: self.regs.y,
            sp: self.regs.sp,
            p: self.regs.p.bits(),
        };
    }

    fn commit_trace(&mut self, opcode: u8) {
        self.trace[self.trace_head].opcode = opcode;
        self.trace_head = (self.trace_head + 1) % TRACE_CAPACITY;
        self.trace_len = (self.trace_len + 1).min(TRACE_CAPACITY);
    }

    // --- Engine ---

    fn next_cycle_is_write(&self) -> bool {
        match self.state {
            State::Execute => self.seq[self.micro_ip].is_write(),
            _ => false,
        }
    }

    /// Fetch cycle: poll interrupts, check breakpoints, read the opcode.
    fn fetch_cycle<B: Bus>(&mut self, bus: &mut B) -> ExecResult {
        // NMI wins over IRQ; a lost IRQ may re-detect later (level).
        if self.do_nmi {
            self.do_nmi = false;
            self.begin_interrupt(bus, 0xFFFA);
            return ExecResult::Continue;
        }
        if self.do_irq && !self.regs.p.contains(Status::IRQ_MASK) {
            self.begin_interrupt(bus, 0xFFFE);
            return ExecResult::Continue;
        }

        if !self.bp_resume && self.breakpoints.contains(&self.regs.pc) {
            self.bp_resume = true;
            self.error_state = ErrorState::SoftBreakpoint;
            // The cycle is not consumed; the next call resumes here.
            self.cycle = self.cycle.wrapping_sub(1);
            return ExecResult::StopAtBoundary(StopReason::SoftBreakpoint);
        }
        self.bp_resume = false;
        if self.error_state == ErrorState::SoftBreakpoint {
            self.error_state = ErrorState::Ok;
        }

        self.record_trace();
        self.regs.pc_frozen = self.regs.pc;
        let opcode = bus.read(self.regs.pc);
        self.commit_trace(opcode);
        self.regs.pc = self.regs.pc.wrapping_add(1);
        self.opcode = opcode;
        let (op, mode) = OPCODES[opcode as usize];
        self.op = op;
        self.mode = mode;

        if op == Op::Jam {
            self.state = State::Jammed;
            self.error_state = ErrorState::Jammed;
            return ExecResult::StopAtBoundary(StopReason::Jammed);
        }

        self.seq = sequence(op, mode);
        self.micro_ip = 0;
        self.fixup = false;
        self.state = State::Execute;
        ExecResult::Continue
    }

    /// Enter the 7-cycle interrupt sequence. The current cycle performs the
    /// first dummy read; six micro-cycles follow.
    fn begin_interrupt<B: Bus>(&mut self, bus: &mut B, vector: u16) {
        let _ = bus.read(self.regs.pc);
        self.vector = vector;
        self.seq = INTERRUPT;
        self.micro_ip = 0;
        self.state = State::Execute;
    }

    fn end_instruction(&mut self) {
        self.state = State::Fetch;
    }

    fn push<B: Bus>(&mut self, bus: &mut B, value: u8) {
        bus.write(0x0100 | u16::from(self.regs.sp), value);
        self.regs.sp = self.regs.sp.wrapping_sub(1);
    }

    fn pull<B: Bus>(&mut self, bus: &mut B) -> u8 {
        self.regs.sp = self.regs.sp.wrapping_add(1);
        bus.read(0x0100 | u16::from(self.regs.sp))
    }

    fn step_micro<B: Bus>(&mut self, bus: &mut B) {
        let micro = self.seq[self.micro_ip];
        self.micro_ip += 1;
        let last = self.micro_ip >= self.seq.len();

        match micro {
            Micro::ImmExec => {
                let v = bus.read(self.regs.pc);
                self.regs.pc = self.regs.pc.wrapping_add(1);
                self.exec_read(v);
                self.end_instruction();
            }
            Micro::ImpExec => {
                let _ = bus.read(self.regs.pc);
                self.exec_implied();
                self.end_instruction();
            }

            Micro::FetchAdl => {
                self.addr = u16::from(bus.read(self.regs.pc));
                self.regs.pc = self.regs.pc.wrapping_add(1);
            }
            Micro::FetchAdh => {
                let hi = bus.read(self.regs.pc);
                self.regs.pc = self.regs.pc.wrapping_add(1);
                self.addr |= u16::from(hi) << 8;
            }
            Micro::FetchAdhIndexX => self.fetch_adh_indexed(bus, self.regs.x),
            Micro::FetchAdhIndexY => self.fetch_adh_indexed(bus, self.regs.y),
            Micro::ZpIndexX => {
                let _ = bus.read(self.addr);
                self.addr = u16::from((self.addr as u8).wrapping_add(self.regs.x));
            }
            Micro::ZpIndexY => {
                let _ = bus.read(self.addr);
                self.addr = u16::from((self.addr as u8).wrapping_add(self.regs.y));
            }

            Micro::FetchPointer => {
                self.pointer = bus.read(self.regs.pc);
                self.regs.pc = self.regs.pc.wrapping_add(1);
            }
            Micro::PointerIndexX => {
                let _ = bus.read(u16::from(self.pointer));
                self.pointer = self.pointer.wrapping_add(self.regs.x);
            }
            Micro::ReadPointerLo => {
                self.addr = u16::from(bus.read(u16::from(self.pointer)));
            }
            Micro::ReadPointerHi => {
                let hi = bus.read(u16::from(self.pointer.wrapping_add(1)));
                self.addr |= u16::from(hi) << 8;
            }
            Micro::ReadPointerHiIndexY => {
                let hi = bus.read(u16::from(self.pointer.wrapping_add(1)));
                let lo = (self.addr as u8).wrapping_add(self.regs.y);
                self.fixup = (self.addr as u8).checked_add(self.regs.y).is_none();
                self.addr = (u16::from(hi) << 8) | u16::from(lo);
            }

            Micro::ReadMaybeFixup => {
                let v = bus.read(self.addr);
                if self.fixup {
                    self.addr = self.addr.wrapping_add(0x100);
                } else {
                    self.exec_read(v);
                    self.end_instruction();
                }
            }
            Micro::ReadFixup => {
                let _ = bus.read(self.addr);
                if self.fixup {
                    self.addr = self.addr.wrapping_add(0x100);
                }
            }
            Micro::ReadExec => {
                let v = bus.read(self.addr);
                self.exec_read(v);
                self.end_instruction();
            }
            Micro::ReadData => {
                self.idl = bus.read(self.addr);
            }
            Micro::DummyWrite => {
                bus.write(self.addr, self.idl);
            }
            Micro::WriteModified => {
                let v = self.exec_modify(self.idl);
                bus.write(self.addr, v);
                self.end_instruction();
            }
            Micro::WriteData => {
                let v = self.store_value();
                bus.write(self.addr, v);
                self.end_instruction();
            }

            Micro::BranchOperand => {
                let offset = bus.read(self.regs.pc);
                self.regs.pc = self.regs.pc.wrapping_add(1);
                if self.branch_taken() {
                    self.branch_target = self.regs.pc.wrapping_add(i16::from(offset as i8) as u16);
                } else {
                    self.end_instruction();
                }
            }
            Micro::BranchTaken => {
                let _ = bus.read(self.regs.pc);
                let same_page = self.branch_target & 0xFF00 == self.regs.pc & 0xFF00;
                self.regs.pc = (self.regs.pc & 0xFF00) | (self.branch_target & 0x00FF);
                if same_page {
                    self.end_instruction();
                }
            }
            Micro::BranchFixup => {
                let _ = bus.read(self.regs.pc);
                self.regs.pc = self.branch_target;
                self.end_instruction();
            }

            Micro::PcDummy => {
                let _ = bus.read(self.regs.pc);
            }
            Micro::StackDummy => {
                let _ = bus.read(0x0100 | u16::from(self.regs.sp));
            }
            Micro::PushPch => self.push(bus, (self.regs.pc >> 8) as u8),
            Micro::PushPcl => self.push(bus, self.regs.pc as u8),
            Micro::PushPBrk => {
                let p = self.regs.p.pushed_by_instruction();
                self.push(bus, p);
                self.regs.p.insert(Status::IRQ_MASK);
                self.vector = if self.do_nmi { 0xFFFA } else { 0xFFFE };
            }
            Micro::PushPInt => {
                let p = self.regs.p.pushed_by_interrupt();
                self.push(bus, p);
                self.regs.p.insert(Status::IRQ_MASK);
            }
            Micro::PushA => {
                let a = self.regs.a;
                self.push(bus, a);
                self.end_instruction();
            }
            Micro::PushP => {
                let p = self.regs.p.pushed_by_instruction();
                self.push(bus, p);
                self.end_instruction();
            }
            Micro::PullA => {
                let v = self.pull(bus);
                self.regs.a = v;
                self.regs.p.set_nz(v);
                self.end_instruction();
            }
            Micro::PullP => {
                let v = self.pull(bus);
                self.regs.p.set_from_pull(v);
                self.end_instruction();
            }
            Micro::PullPKeepGoing => {
                let v = self.pull(bus);
                self.regs.p.set_from_pull(v);
            }
            Micro::PullPcl => {
                let v = self.pull(bus);
                self.regs.pc = (self.regs.pc & 0xFF00) | u16::from(v);
            }
            Micro::PullPchEnd => {
                let v = self.pull(bus);
                self.regs.pc = (self.regs.pc & 0x00FF) | (u16::from(v) << 8);
                self.end_instruction();
            }
            Micro::PullPch => {
                let v = self.pull(bus);
                self.regs.pc = (self.regs.pc & 0x00FF) | (u16::from(v) << 8);
            }
            Micro::IncPcEnd => {
                let _ = bus.read(self.regs.pc);
                self.regs.pc = self.regs.pc.wrapping_add(1);
                self.end_instruction();
            }

            Micro::JumpAdh => {
                let hi = bus.read(self.regs.pc);
                self.regs.pc = (u16::from(hi) << 8) | (self.addr & 0x00FF);
                self.end_instruction();
            }
            Micro::ReadIndLo => {
                self.idl = bus.read(self.addr);
            }
            Micro::ReadIndHiEnd => {
                // 6502 page-wrap bug: high byte fetched within the same page.
                let hi_addr = (self.addr & 0xFF00) | (self.addr.wrapping_add(1) & 0x00FF);
                let hi = bus.read(hi_addr);
                self.regs.pc = (u16::from(hi) << 8) | u16::from(self.idl);
                self.end_instruction();
            }

            Micro::BrkPad => {
                let _ = bus.read(self.regs.pc);
                self.regs.pc = self.regs.pc.wrapping_add(1);
            }
            Micro::VectorLo => {
                self.idl = bus.read(self.vector);
            }
            Micro::VectorHi => {
                let hi = bus.read(self.vector.wrapping_add(1));
                self.regs.pc = (u16::from(hi) << 8) | u16::from(self.idl);
                self.end_instruction();
            }
        }

        if last && self.state == State::Execute {
            self.end_instruction();
        }
    }

    fn fetch_adh_indexed<B: Bus>(&mut self, bus: &mut B, index: u8) {
        let hi = bus.read(self.regs.pc);
        self.regs.pc = self.regs.pc.wrapping_add(1);
        let lo = (self.addr as u8).wrapping_add(index);
        self.fixup = (self.addr as u8).checked_add(index).is_none();
        self.addr = (u16::from(hi) << 8) | u16::from(lo);
    }

    fn branch_taken(&self) -> bool {
        let p = self.regs.p;
        match self.op {
            Op::Bpl => !p.contains(Status::NEGATIVE),
            Op::Bmi => p.contains(Status::NEGATIVE),
            Op::Bvc => !p.contains(Status::OVERFLOW),
            Op::Bvs => p.contains(Status::OVERFLOW),
            Op::Bcc => !p.contains(Status::CARRY),
            Op::Bcs => p.contains(Status::CARRY),
            Op::Bne => !p.contains(Status::ZERO),
            Op::Beq => p.contains(Status::ZERO),
            _ => false,
        }
    }

    /// End-of-cycle interrupt detector pipeline.
    ///
    /// NMI: edge detector with a one-cycle delay buffer. IRQ: level detector
    /// with a one-cycle delay buffer.
    fn update_interrupt_detectors(&mut self) {
        let nmi_low = !self.nmi_sources.is_empty();
        let edge = self.nmi_line_was_high && nmi_low;
        self.nmi_line_was_high = !nmi_low;
        if self.nmi_delay {
            self.do_nmi = true;
        }
        self.nmi_delay = edge;

        self.do_irq = self.irq_delay;
        self.irq_delay = !self.irq_sources.is_empty();
    }

    // --- Operation dispatch ---

    fn exec_read(&mut self, value: u8) {
        match self.op {
            Op::Lda => {
                self.regs.a = value;
                self.regs.p.set_nz(value);
            }
            Op::Ldx => {
                self.regs.x = value;
                self.regs.p.set_nz(value);
            }
            Op::Ldy => {
                self.regs.y = value;
                self.regs.p.set_nz(value);
            }
            Op::Lax => {
                self.regs.a = value;
                self.regs.x = value;
                self.regs.p.set_nz(value);
            }
            Op::And => {
                self.regs.a &= value;
                let a = self.regs.a;
                self.regs.p.set_nz(a);
            }
            Op::Ora => {
                self.regs.a |= value;
                let a = self.regs.a;
                self.regs.p.set_nz(a);
            }
            Op::Eor => {
                self.regs.a ^= value;
                let a = self.regs.a;
                self.regs.p.set_nz(a);
            }
            Op::Adc => self.adc(value),
            Op::Sbc => self.sbc(value),
            Op::Cmp => self.compare(self.regs.a, value),
            Op::Cpx => self.compare(self.regs.x, value),
            Op::Cpy => self.compare(self.regs.y, value),
            Op::Bit => {
                let a = self.regs.a;
                self.regs.p.set(Status::ZERO, a & value == 0);
                self.regs.p.set(Status::NEGATIVE, value & 0x80 != 0);
                self.regs.p.set(Status::OVERFLOW, value & 0x40 != 0);
            }
            Op::Anc => {
                self.regs.a &= value;
                let a = self.regs.a;
                self.regs.p.set_nz(a);
                self.regs.p.set(Status::CARRY, a & 0x80 != 0);
            }
            Op::Alr => {
                self.regs.a &= value;
                self.regs.a = self.shift_lsr(self.regs.a);
            }
            Op::Arr => self.arr(value),
            Op::Sbx => {
                let t = self.regs.a & self.regs.x;
                self.regs.p.set(Status::CARRY, t >= value);
                self.regs.x = t.wrapping_sub(value);
                let x = self.regs.x;
                self.regs.p.set_nz(x);
            }
            Op::Ane => {
                self.regs.a = (self.regs.a | 0xEE) & self.regs.x & value;
                let a = self.regs.a;
                self.regs.p.set_nz(a);
            }
            Op::Lxa => {
                self.regs.a = (self.regs.a | 0xEE) & value;
                self.regs.x = self.regs.a;
                let a = self.regs.a;
                self.regs.p.set_nz(a);
            }
            Op::Las => {
                let v = value & self.regs.sp;
                self.regs.a = v;
                self.regs.x = v;
                self.regs.sp = v;
                self.regs.p.set_nz(v);
            }
            Op::Nop => {}
            _ => {}
        }
    }

    fn exec_implied(&mut self) {
        match self.op {
            Op::Clc => self.regs.p.remove(Status::CARRY),
            Op::Sec => self.regs.p.insert(Status::CARRY),
            Op::Cli => self.regs.p.remove(Status::IRQ_MASK),
            Op::Sei => self.regs.p.insert(Status::IRQ_MASK),
            Op::Clv => self.regs.p.remove(Status::OVERFLOW),
            Op::Cld => self.regs.p.remove(Status::DECIMAL),
            Op::Sed => self.regs.p.insert(Status::DECIMAL),
            Op::Dex => {
                self.regs.x = self.regs.x.wrapping_sub(1);
                let x = self.regs.x;
                self.regs.p.set_nz(x);
            }
            Op::Dey => {
                self.regs.y = self.regs.y.wrapping_sub(1);
                let y = self.regs.y;
                self.regs.p.set_nz(y);
            }
            Op::Inx => {
                self.regs.x = self.regs.x.wrapping_add(1);
                let x = self.regs.x;
                self.regs.p.set_nz(x);
            }
            Op::Iny => {
                self.regs.y = self.regs.y.wrapping_add(1);
                let y = self.regs.y;
                self.regs.p.set_nz(y);
            }
            Op::Tax => {
                self.regs.x = self.regs.a;
                let x = self.regs.x;
                self.regs.p.set_nz(x);
            }
            Op::Tay => {
                self.regs.y = self.regs.a;
                let y = self.regs.y;
                self.regs.p.set_nz(y);
            }
            Op::Txa => {
                self.regs.a = self.regs.x;
                let a = self.regs.a;
                self.regs.p.set_nz(a);
            }
            Op::Tya => {
                self.regs.a = self.regs.y;
                let a = self.regs.a;
                self.regs.p.set_nz(a);
            }
            Op::Tsx => {
                self.regs.x = self.regs.sp;
                let x = self.regs.x;
                self.regs.p.set_nz(x);
            }
            Op::Txs => self.regs.sp = self.regs.x,
            Op::Asl if self.mode == Mode::Acc => self.regs.a = self.shift_asl(self.regs.a),
            Op::Lsr if self.mode == Mode::Acc => self.regs.a = self.shift_lsr(self.regs.a),
            Op::Rol if self.mode == Mode::Acc => self.regs.a = self.shift_rol(self.regs.a),
            Op::Ror if self.mode == Mode::Acc => self.regs.a = self.shift_ror(self.regs.a),
            Op::Nop => {}
            _ => {}
        }
    }

    fn exec_modify(&mut self, value: u8) -> u8 {
        match self.op {
            Op::Asl => self.shift_asl(value),
            Op::Lsr => self.shift_lsr(value),
            Op::Rol => self.shift_rol(value),
            Op::Ror => self.shift_ror(value),
            Op::Inc => {
                let v = value.wrapping_add(1);
                self.regs.p.set_nz(v);
                v
            }
            Op::Dec => {
                let v = value.wrapping_sub(1);
                self.regs.p.set_nz(v);
                v
            }
            Op::Slo => {
                let v = self.shift_asl(value);
                self.regs.a |= v;
                let a = self.regs.a;
                self.regs.p.set_nz(a);
                v
            }
            Op::Rla => {
                let v = self.shift_rol(value);
                self.regs.a &= v;
                let a = self.regs.a;
                self.regs.p.set_nz(a);
                v
            }
            Op::Sre => {
                let v = self.shift_lsr(value);
                self.regs.a ^= v;
                let a = self.regs.a;
                self.regs.p.set_nz(a);
                v
            }
            Op::Rra => {
                let v = self.shift_ror(value);
                self.adc(v);
                v
            }
            Op::Dcp => {
                let v = value.wrapping_sub(1);
                self.compare(self.regs.a, v);
                v
            }
            Op::Isc => {
                let v = value.wrapping_add(1);
                self.sbc(v);
                v
            }
            _ => value,
        }
    }

    fn store_value(&mut self) -> u8 {
        let hi_plus_1 = ((self.addr >> 8) as u8).wrapping_add(1);
        match self.op {
            Op::Sta => self.regs.a,
            Op::Stx => self.regs.x,
            Op::Sty => self.regs.y,
            Op::Sax => self.regs.a & self.regs.x,
            Op::Sha => self.regs.a & self.regs.x & hi_plus_1,
            Op::Shx => self.regs.x & hi_plus_1,
            Op::Shy => self.regs.y & hi_plus_1,
            Op::Tas => {
                self.regs.sp = self.regs.a & self.regs.x;
                self.regs.sp & hi_plus_1
            }
            _ => 0,
        }
    }

    // --- ALU ---

    fn compare(&mut self, reg: u8, value: u8) {
        self.regs.p.set(Status::CARRY, reg >= value);
        self.regs.p.set_nz(reg.wrapping_sub(value));
    }

    fn adc(&mut self, value: u8) {
        if self.regs.p.contains(Status::DECIMAL) {
            self.adc_decimal(value);
        } else {
            self.adc_binary(value);
        }
    }

    fn adc_binary(&mut self, value: u8) {
        let carry = u16::from(self.regs.p.contains(Status::CARRY));
        let sum = u16::from(self.regs.a) + u16::from(value) + carry;
        let result = sum as u8;
        self.regs.p.set(Status::CARRY, sum > 0xFF);
        self.regs.p.set(
            Status::OVERFLOW,
            (self.regs.a ^ result) & (value ^ result) & 0x80 != 0,
        );
        self.regs.p.set_nz(result);
        self.regs.a = result;
    }

    /// NMOS decimal-mode ADC. N/V/Z come out the documented odd way: Z from
    /// the binary sum, N/V from the intermediate high nibble.
    fn adc_decimal(&mut self, value: u8) {
        let carry = u16::from(self.regs.p.contains(Status::CARRY));
        let binary = u16::from(self.regs.a) + u16::from(value) + carry;
        self.regs.p.set(Status::ZERO, binary as u8 == 0);

        let mut lo = u16::from(self.regs.a & 0x0F) + u16::from(value & 0x0F) + carry;
        let mut hi = u16::from(self.regs.a >> 4) + u16::from(value >> 4);
        if lo > 9 {
            lo += 6;
            hi += 1;
        }
        self.regs.p.set(Status::NEGATIVE, hi & 0x08 != 0);
        self.regs.p.set(
            Status::OVERFLOW,
            (u16::from(self.regs.a >> 4) ^ hi) & 0x08 != 0 && (self.regs.a ^ value) & 0x80 == 0,
        );
        if hi > 9 {
            hi += 6;
        }
        self.regs.p.set(Status::CARRY, hi > 15);
        self.regs.a = (((hi & 0x0F) << 4) | (lo & 0x0F)) as u8;
    }

    fn sbc(&mut self, value: u8) {
        if self.regs.p.contains(Status::DECIMAL) {
            self.sbc_decimal(value);
        } else {
            // Binary SBC is ADC of the complement.
            self.adc_binary(!value);
        }
    }

    /// NMOS decimal-mode SBC. Flags are computed from the binary difference.
    fn sbc_decimal(&mut self, value: u8) {
        let borrow = u16::from(!self.regs.p.contains(Status::CARRY));
        let binary = u16::from(self.regs.a)
            .wrapping_sub(u16::from(value))
            .wrapping_sub(borrow);

        let mut lo = u16::from(self.regs.a & 0x0F)
            .wrapping_sub(u16::from(value & 0x0F))
            .wrapping_sub(borrow);
        let mut hi = u16::from(self.regs.a >> 4).wrapping_sub(u16::from(value >> 4));
        if lo & 0x10 != 0 {
            lo = lo.wrapping_sub(6);
            hi = hi.wrapping_sub(1);
        }
        if hi & 0x10 != 0 {
            hi = hi.wrapping_sub(6);
        }

        let result = binary as u8;
        self.regs.p.set(Status::CARRY, binary < 0x100);
        self.regs.p.set(
            Status::OVERFLOW,
            (self.regs.a ^ value) & (self.regs.a ^ result) & 0x80 != 0,
        );
        self.regs.p.set_nz(result);
        self.regs.a = (((hi & 0x0F) << 4) | (lo & 0x0F)) as u8;
    }

    fn arr(&mut self, value: u8) {
        let t = self.regs.a & value;
        let carry_in = u8::from(self.regs.p.contains(Status::CARRY)) << 7;
        let result = (t >> 1) | carry_in;
        self.regs.a = result;
        self.regs.p.set_nz(result);
        self.regs.p.set(Status::CARRY, result & 0x40 != 0);
        self.regs.p.set(
            Status::OVERFLOW,
            ((result >> 6) ^ (result >> 5)) & 0x01 != 0,
        );
    }

    fn shift_asl(&mut self, value: u8) -> u8 {
        self.regs.p.set(Status::CARRY, value & 0x80 != 0);
        let v = value << 1;
        self.regs.p.set_nz(v);
        v
    }

    fn shift_lsr(&mut self, value: u8) -> u8 {
        self.regs.p.set(Status::CARRY, value & 0x01 != 0);
        let v = value >> 1;
        self.regs.p.set_nz(v);
        v
    }

    fn shift_rol(&mut self, value: u8) -> u8 {
        let carry_in = u8::from(self.regs.p.contains(Status::CARRY));
        self.regs.p.set(Status::CARRY, value & 0x80 != 0);
        let v = (value << 1) | carry_in;
        self.regs.p.set_nz(v);
        v
    }

    fn shift_ror(&mut self, value: u8) -> u8 {
        let carry_in = u8::from(self.regs.p.contains(Status::CARRY)) << 7;
        self.regs.p.set(Status::CARRY, value & 0x01 != 0);
        let v = (value >> 1) | carry_in;
        self.regs.p.set_nz(v);
        v
    }
}

impl Default for Mos6510 {
    fn default() -> Self {
        Self::new()
    }
}

impl Observable for Mos6510 {
    fn query(&self, path: &str) -> Option<Value> {
        match path {
            "a" => Some(self.regs.a.into()),
            "x" => Some(self.regs.x.into()),
            "y" => Some(self.regs.y.into()),
            "sp" => Some(self.regs.sp.into()),
            "pc" => Some(self.regs.pc.into()),
            "pc_frozen" => Some(self.regs.pc_frozen.into()),
            "p" => Some(self.regs.p.bits().into()),
            "cycle" => Some(self.cycle.into()),
            "rdy" => Some(self.rdy.into()),
            "flags.n" => Some(self.regs.p.contains(Status::NEGATIVE).into()),
            "flags.v" => Some(self.regs.p.contains(Status::OVERFLOW).into()),
            "flags.d" => Some(self.regs.p.contains(Status::DECIMAL).into()),
            "flags.i" => Some(self.regs.p.contains(Status::IRQ_MASK).into()),
            "flags.z" => Some(self.regs.p.contains(Status::ZERO).into()),
            "flags.c" => Some(self.regs.p.contains(Status::CARRY).into()),
            _ => None,
        }
    }

    fn query_paths(&self) -> &'static [&'static str] {
        &[
            "a", "x", "y", "sp", "pc", "pc_frozen", "p", "cycle", "rdy", "flags.n", "flags.v",
            "flags.d", "flags.i", "flags.z", "flags.c",
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// 64K flat RAM for CPU unit tests.
    struct TestBus {
        ram: Vec<u8>,
    }

    impl TestBus {
        fn new() -> Self {
            Self { ram: vec![0; 0x10000] }
        }

        fn load(&mut self, addr: u16, bytes: &[u8]) {
            let a = addr as usize;
            self.ram[a..a + bytes.len()].copy_from_slice(bytes);
        }
    }

    impl Bus for TestBus {
        fn read(&mut self, address: u16) -> u8 {
            self.ram[address as usize]
        }

        fn write(&mut self, address: u16, value: u8) {
            self.ram[address as usize] = value;
        }

        fn peek(&self, address: u16) -> u8 {
            self.ram[address as usize]
        }
    }

    fn cpu_at(bus: &mut TestBus, pc: u16) -> Mos6510 {
        let mut cpu = Mos6510::new();
        bus.ram[0xFFFC] = pc as u8;
        bus.ram[0xFFFD] = (pc >> 8) as u8;
        cpu.reset(bus);
        cpu
    }

    fn run_cycles(cpu: &mut Mos6510, bus: &mut TestBus, n: usize) {
        for _ in 0..n {
            let _ = cpu.execute_one_cycle(bus);
        }
    }

    #[test]
    fn cycle_advances_by_exactly_one() {
        let mut bus = TestBus::new();
        bus.load(0x0200, &[0xEA]); // NOP
        let mut cpu = cpu_at(&mut bus, 0x0200);
        let before = cpu.cycle();
        let _ = cpu.execute_one_cycle(&mut bus);
        assert_eq!(cpu.cycle(), before + 1);
    }

    #[test]
    fn lda_imm_two_cycles() {
        let mut bus = TestBus::new();
        bus.load(0x0200, &[0xA9, 0x42]); // LDA #$42
        let mut cpu = cpu_at(&mut bus, 0x0200);
        run_cycles(&mut cpu, &mut bus, 2);
        assert_eq!(cpu.regs.a, 0x42);
        assert_eq!(cpu.regs.pc, 0x0202);
        assert!(cpu.at_instruction_boundary());
    }

    #[test]
    fn sta_abs_four_cycles() {
        let mut bus = TestBus::new();
        bus.load(0x0200, &[0xA9, 0x55, 0x8D, 0x00, 0x30]); // LDA #$55 / STA $3000
        let mut cpu = cpu_at(&mut bus, 0x0200);
        run_cycles(&mut cpu, &mut bus, 2 + 4);
        assert_eq!(bus.ram[0x3000], 0x55);
    }

    #[test]
    fn page_cross_adds_cycle() {
        let mut bus = TestBus::new();
        // LDA $30FF,X with X=1 crosses into $3100: 5 cycles.
        bus.load(0x0200, &[0xBD, 0xFF, 0x30]);
        bus.ram[0x3100] = 0x99;
        let mut cpu = cpu_at(&mut bus, 0x0200);
        cpu.regs.x = 1;
        run_cycles(&mut cpu, &mut bus, 4);
        assert!(!cpu.at_instruction_boundary(), "fixup cycle still pending");
        run_cycles(&mut cpu, &mut bus, 1);
        assert_eq!(cpu.regs.a, 0x99);
        assert!(cpu.at_instruction_boundary());
    }

    #[test]
    fn no_page_cross_is_four_cycles() {
        let mut bus = TestBus::new();
        bus.load(0x0200, &[0xBD, 0x00, 0x30]); // LDA $3000,X
        bus.ram[0x3001] = 0x77;
        let mut cpu = cpu_at(&mut bus, 0x0200);
        cpu.regs.x = 1;
        run_cycles(&mut cpu, &mut bus, 4);
        assert_eq!(cpu.regs.a, 0x77);
        assert!(cpu.at_instruction_boundary());
    }

    #[test]
    fn rmw_dummy_write_visible() {
        // INC writes the old value back before the new one.
        struct Spy {
            ram: Vec<u8>,
            writes: Vec<(u16, u8)>,
        }
        impl Bus for Spy {
            fn read(&mut self, a: u16) -> u8 {
                self.ram[a as usize]
            }
            fn write(&mut self, a: u16, v: u8) {
                self.writes.push((a, v));
                self.ram[a as usize] = v;
            }
            fn peek(&self, a: u16) -> u8 {
                self.ram[a as usize]
            }
        }
        let mut bus = Spy { ram: vec![0; 0x10000], writes: Vec::new() };
        bus.ram[0x0200] = 0xE6; // INC $10
        bus.ram[0x0201] = 0x10;
        bus.ram[0x0010] = 0x41;
        bus.ram[0xFFFC] = 0x00;
        bus.ram[0xFFFD] = 0x02;
        let mut cpu = Mos6510::new();
        cpu.reset(&mut bus);
        for _ in 0..5 {
            let _ = cpu.execute_one_cycle(&mut bus);
        }
        assert_eq!(bus.writes, vec![(0x0010, 0x41), (0x0010, 0x42)]);
    }

    #[test]
    fn jsr_rts_round_trip() {
        let mut bus = TestBus::new();
        bus.load(0x0200, &[0x20, 0x00, 0x30]); // JSR $3000
        bus.load(0x3000, &[0x60]); // RTS
        let mut cpu = cpu_at(&mut bus, 0x0200);
        run_cycles(&mut cpu, &mut bus, 6);
        assert_eq!(cpu.regs.pc, 0x3000);
        run_cycles(&mut cpu, &mut bus, 6);
        assert_eq!(cpu.regs.pc, 0x0203);
    }

    #[test]
    fn branch_taken_page_cross_is_four_cycles() {
        let mut bus = TestBus::new();
        // BNE back across a page boundary.
        bus.load(0x0200, &[0xD0, 0xFC]); // BNE *-2
        let mut cpu = cpu_at(&mut bus, 0x0200);
        cpu.regs.p.remove(Status::ZERO);
        run_cycles(&mut cpu, &mut bus, 4);
        assert_eq!(cpu.regs.pc, 0x01FE);
        assert!(cpu.at_instruction_boundary());
    }

    #[test]
    fn branch_not_taken_is_two_cycles() {
        let mut bus = TestBus::new();
        bus.load(0x0200, &[0xD0, 0x10]); // BNE +16
        let mut cpu = cpu_at(&mut bus, 0x0200);
        cpu.regs.p.insert(Status::ZERO);
        run_cycles(&mut cpu, &mut bus, 2);
        assert_eq!(cpu.regs.pc, 0x0202);
        assert!(cpu.at_instruction_boundary());
    }

    #[test]
    fn adc_binary_overflow() {
        let mut bus = TestBus::new();
        bus.load(0x0200, &[0x69, 0x50]); // ADC #$50
        let mut cpu = cpu_at(&mut bus, 0x0200);
        cpu.regs.a = 0x50;
        run_cycles(&mut cpu, &mut bus, 2);
        assert_eq!(cpu.regs.a, 0xA0);
        assert!(cpu.regs.p.contains(Status::OVERFLOW));
        assert!(cpu.regs.p.contains(Status::NEGATIVE));
    }

    #[test]
    fn adc_decimal_mode() {
        let mut bus = TestBus::new();
        bus.load(0x0200, &[0x69, 0x19]); // ADC #$19 (BCD 19)
        let mut cpu = cpu_at(&mut bus, 0x0200);
        cpu.regs.p.insert(Status::DECIMAL);
        cpu.regs.a = 0x28; // BCD 28
        run_cycles(&mut cpu, &mut bus, 2);
        assert_eq!(cpu.regs.a, 0x47); // BCD 47
        assert!(!cpu.regs.p.contains(Status::CARRY));
    }

    #[test]
    fn sbc_decimal_mode() {
        let mut bus = TestBus::new();
        bus.load(0x0200, &[0xE9, 0x19]); // SBC #$19
        let mut cpu = cpu_at(&mut bus, 0x0200);
        cpu.regs.p.insert(Status::DECIMAL);
        cpu.regs.p.insert(Status::CARRY);
        cpu.regs.a = 0x47;
        run_cycles(&mut cpu, &mut bus, 2);
        assert_eq!(cpu.regs.a, 0x28);
        assert!(cpu.regs.p.contains(Status::CARRY));
    }

    #[test]
    fn irq_level_detected_with_delay() {
        let mut bus = TestBus::new();
        bus.load(0x0200, &[0xEA, 0xEA, 0xEA, 0xEA]); // NOPs
        bus.ram[0xFFFE] = 0x00;
        bus.ram[0xFFFF] = 0x40; // IRQ vector → $4000
        let mut cpu = cpu_at(&mut bus, 0x0200);
        cpu.regs.p.remove(Status::IRQ_MASK);
        cpu.pull_down_irq(IrqSource::CIA);
        // The delayed level detector lets one NOP finish, then the 7-cycle
        // interrupt sequence runs.
        run_cycles(&mut cpu, &mut bus, 2 + 7);
        assert_eq!(cpu.regs.pc, 0x4000);
        assert!(cpu.regs.p.contains(Status::IRQ_MASK));
    }

    #[test]
    fn irq_masked_by_i_flag() {
        let mut bus = TestBus::new();
        bus.load(0x0200, &[0xEA; 16]);
        let mut cpu = cpu_at(&mut bus, 0x0200);
        cpu.regs.p.insert(Status::IRQ_MASK);
        cpu.pull_down_irq(IrqSource::VIC);
        run_cycles(&mut cpu, &mut bus, 10);
        assert_eq!(cpu.regs.pc, 0x0205);
    }

    #[test]
    fn nmi_edge_triggers_once() {
        let mut bus = TestBus::new();
        bus.load(0x0200, &[0xEA; 32]);
        bus.ram[0xFFFA] = 0x00;
        bus.ram[0xFFFB] = 0x50; // NMI vector → $5000
        bus.load(0x5000, &[0xEA; 8]);
        let mut cpu = cpu_at(&mut bus, 0x0200);
        cpu.pull_down_nmi(NmiSource::KEYBOARD);
        run_cycles(&mut cpu, &mut bus, 2 + 7);
        assert_eq!(cpu.regs.pc, 0x5000);
        // Line still low: no second NMI (edge-triggered).
        run_cycles(&mut cpu, &mut bus, 8);
        assert_eq!(cpu.regs.pc, 0x5004);
    }

    #[test]
    fn nmi_wins_over_irq() {
        let mut bus = TestBus::new();
        bus.load(0x0200, &[0xEA; 8]);
        bus.ram[0xFFFA] = 0x00;
        bus.ram[0xFFFB] = 0x50;
        bus.ram[0xFFFE] = 0x00;
        bus.ram[0xFFFF] = 0x40;
        let mut cpu = cpu_at(&mut bus, 0x0200);
        cpu.regs.p.remove(Status::IRQ_MASK);
        cpu.pull_down_irq(IrqSource::CIA);
        cpu.pull_down_nmi(NmiSource::CIA);
        run_cycles(&mut cpu, &mut bus, 2 + 7);
        assert_eq!(cpu.regs.pc, 0x5000);
    }

    #[test]
    fn rdy_freezes_read_cycles() {
        let mut bus = TestBus::new();
        bus.load(0x0200, &[0xA9, 0x42]); // LDA #$42
        let mut cpu = cpu_at(&mut bus, 0x0200);
        cpu.set_rdy(false);
        run_cycles(&mut cpu, &mut bus, 10);
        // Nothing executed: PC unchanged, A unchanged.
        assert_eq!(cpu.regs.pc, 0x0200);
        assert_eq!(cpu.regs.a, 0);
        cpu.set_rdy(true);
        run_cycles(&mut cpu, &mut bus, 2);
        assert_eq!(cpu.regs.a, 0x42);
    }

    #[test]
    fn rdy_does_not_block_write_cycles() {
        let mut bus = TestBus::new();
        bus.load(0x0200, &[0x8D, 0x00, 0x30]); // STA $3000
        let mut cpu = cpu_at(&mut bus, 0x0200);
        cpu.regs.a = 0x77;
        // Run the three read cycles (fetch, adl, adh).
        run_cycles(&mut cpu, &mut bus, 3);
        // Drop RDY: the pending write cycle must still complete.
        cpu.set_rdy(false);
        run_cycles(&mut cpu, &mut bus, 1);
        assert_eq!(bus.ram[0x3000], 0x77);
    }

    #[test]
    fn jam_opcode_halts() {
        let mut bus = TestBus::new();
        bus.load(0x0200, &[0x02]); // JAM
        let mut cpu = cpu_at(&mut bus, 0x0200);
        let r = cpu.execute_one_cycle(&mut bus);
        assert_eq!(r, ExecResult::StopAtBoundary(StopReason::Jammed));
        assert_eq!(cpu.error_state(), ErrorState::Jammed);
        let pc = cpu.regs.pc;
        run_cycles(&mut cpu, &mut bus, 5);
        assert_eq!(cpu.regs.pc, pc);
    }

    #[test]
    fn breakpoint_stops_before_execution() {
        let mut bus = TestBus::new();
        bus.load(0x0200, &[0xA9, 0x42]); // LDA #$42
        let mut cpu = cpu_at(&mut bus, 0x0200);
        cpu.add_breakpoint(0x0200);
        let r = cpu.execute_one_cycle(&mut bus);
        assert_eq!(r, ExecResult::StopAtBoundary(StopReason::SoftBreakpoint));
        assert_eq!(cpu.regs.a, 0);
        // Resume runs through the breakpoint.
        run_cycles(&mut cpu, &mut bus, 2);
        assert_eq!(cpu.regs.a, 0x42);
    }

    #[test]
    fn pc_frozen_stable_during_instruction() {
        let mut bus = TestBus::new();
        bus.load(0x0200, &[0xAD, 0x00, 0x30]); // LDA $3000
        let mut cpu = cpu_at(&mut bus, 0x0200);
        run_cycles(&mut cpu, &mut bus, 1);
        assert_eq!(cpu.regs.pc_frozen, 0x0200);
        run_cycles(&mut cpu, &mut bus, 2);
        assert_eq!(cpu.regs.pc_frozen, 0x0200);
        assert_ne!(cpu.regs.pc, cpu.regs.pc_frozen);
    }

    #[test]
    fn trace_records_retired_instructions() {
        let mut bus = TestBus::new();
        bus.load(0x0200, &[0xA9, 0x01, 0xA9, 0x02]); // LDA #1 / LDA #2
        let mut cpu = cpu_at(&mut bus, 0x0200);
        run_cycles(&mut cpu, &mut bus, 4);
        let entries: Vec<_> = cpu.trace().collect();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].pc, 0x0200);
        assert_eq!(entries[0].opcode, 0xA9);
        assert_eq!(entries[1].pc, 0x0202);
    }

    #[test]
    fn illegal_lax_loads_a_and_x() {
        let mut bus = TestBus::new();
        bus.load(0x0200, &[0xA7, 0x10]); // LAX $10
        bus.ram[0x0010] = 0x3C;
        let mut cpu = cpu_at(&mut bus, 0x0200);
        run_cycles(&mut cpu, &mut bus, 3);
        assert_eq!(cpu.regs.a, 0x3C);
        assert_eq!(cpu.regs.x, 0x3C);
    }

    #[test]
    fn illegal_dcp_decrements_and_compares() {
        let mut bus = TestBus::new();
        bus.load(0x0200, &[0xC7, 0x10]); // DCP $10
        bus.ram[0x0010] = 0x43;
        let mut cpu = cpu_at(&mut bus, 0x0200);
        cpu.regs.a = 0x42;
        run_cycles(&mut cpu, &mut bus, 5);
        assert_eq!(bus.ram[0x0010], 0x42);
        assert!(cpu.regs.p.contains(Status::ZERO));
        assert!(cpu.regs.p.contains(Status::CARRY));
    }

    #[test]
    fn brk_pushes_b_set_and_jumps() {
        let mut bus = TestBus::new();
        bus.load(0x0200, &[0x00, 0xFF]); // BRK + pad
        bus.ram[0xFFFE] = 0x00;
        bus.ram[0xFFFF] = 0x40;
        let mut cpu = cpu_at(&mut bus, 0x0200);
        let sp = cpu.regs.sp;
        run_cycles(&mut cpu, &mut bus, 7);
        assert_eq!(cpu.regs.pc, 0x4000);
        let pushed_p = bus.ram[0x0100 + sp.wrapping_sub(2) as usize];
        assert_eq!(pushed_p & 0x30, 0x30);
        // Return address is BRK + 2.
        let lo = bus.ram[0x0100 + sp.wrapping_sub(1) as usize];
        let hi = bus.ram[0x0100 + sp as usize];
        assert_eq!(u16::from(lo) | (u16::from(hi) << 8), 0x0202);
    }

    #[test]
    fn jmp_indirect_page_bug() {
        let mut bus = TestBus::new();
        bus.load(0x0200, &[0x6C, 0xFF, 0x30]); // JMP ($30FF)
        bus.ram[0x30FF] = 0x34;
        bus.ram[0x3000] = 0x12; // High byte wraps to $3000, not $3100.
        let mut cpu = cpu_at(&mut bus, 0x0200);
        run_cycles(&mut cpu, &mut bus, 5);
        assert_eq!(cpu.regs.pc, 0x1234);
    }

    #[test]
    fn so_pin_sets_overflow() {
        let mut cpu = Mos6510::new();
        assert!(!cpu.regs.p.contains(Status::OVERFLOW));
        cpu.set_overflow_pin();
        assert!(cpu.regs.p.contains(Status::OVERFLOW));
    }
}
