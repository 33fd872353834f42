//! Instruction decode tables and micro-instruction sequences.
//!
//! Every opcode maps to an operation and an addressing mode; the pair
//! selects a static sequence of micro-instructions, one bus access each.
//! The sequences encode the documented cycle-by-cycle behaviour of the
//! NMOS 6502, including dummy reads and dummy writes.

/// One micro-instruction: exactly one clock cycle, one bus access.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Micro {
    /// Read operand at PC into the data latch, execute, end. (Immediate.)
    ImmExec,
    /// Dummy read at PC, execute on registers, end. (Implied/accumulator.)
    ImpExec,

    /// Read address low byte at PC into ADL.
    FetchAdl,
    /// Read address high byte at PC into ADH.
    FetchAdh,
    /// Read high byte at PC; add X to ADL, note page-cross carry.
    FetchAdhIndexX,
    /// Read high byte at PC; add Y to ADL, note page-cross carry.
    FetchAdhIndexY,
    /// Dummy read at the zero-page address; add X to ADL (page-zero wrap).
    ZpIndexX,
    /// Dummy read at the zero-page address; add Y to ADL (page-zero wrap).
    ZpIndexY,

    /// Read pointer byte at PC.
    FetchPointer,
    /// Dummy read at the pointer; add X (page-zero wrap).
    PointerIndexX,
    /// Read ADL from the zero-page pointer.
    ReadPointerLo,
    /// Read ADH from pointer+1 (page-zero wrap).
    ReadPointerHi,
    /// Read ADH from pointer+1; add Y to ADL, note page-cross carry.
    ReadPointerHiIndexY,

    /// Read the effective address; if no page cross, execute and end,
    /// otherwise fix ADH and take one more cycle.
    ReadMaybeFixup,
    /// Read the (possibly unfixed) effective address, then fix ADH.
    /// Always takes the extra cycle; used by write and modify sequences.
    ReadFixup,
    /// Read the effective address, execute, end.
    ReadExec,
    /// Read the effective address into the data latch.
    ReadData,
    /// Write the unmodified data latch back (modify sequences).
    DummyWrite,
    /// Write the modified value, end.
    WriteModified,
    /// Write the register selected by the operation, end.
    WriteData,

    /// Read branch offset at PC; if the condition fails, end.
    BranchOperand,
    /// Dummy read at PC; apply offset to PCL; if no page cross, end.
    BranchTaken,
    /// Dummy read at the unfixed PC; fix PCH, end.
    BranchFixup,

    /// Dummy read at PC (no increment).
    PcDummy,
    /// Dummy read of the stack at SP.
    StackDummy,
    /// Push PCH.
    PushPch,
    /// Push PCL.
    PushPcl,
    /// Push P with B set (BRK).
    PushPBrk,
    /// Push P with B clear (IRQ/NMI).
    PushPInt,
    /// Push A, end.
    PushA,
    /// Push P with B set, end. (PHP.)
    PushP,
    /// Pull A, set NZ, end.
    PullA,
    /// Pull P, end.
    PullP,
    /// Pull P (RTI middle cycle).
    PullPKeepGoing,
    /// Pull PCL.
    PullPcl,
    /// Pull PCH, end. (RTI.)
    PullPchEnd,
    /// Pull PCH (RTS; one more cycle follows).
    PullPch,
    /// Dummy read at PC, increment PC, end. (RTS final cycle.)
    IncPcEnd,

    /// Read ADH at PC and jump, end. (JMP abs / JSR final cycle.)
    JumpAdh,
    /// Read new PCL from the indirect address.
    ReadIndLo,
    /// Read new PCH from the indirect address (page-wrap bug), end.
    ReadIndHiEnd,

    /// Read padding byte after BRK, increment PC.
    BrkPad,
    /// Read interrupt vector low byte.
    VectorLo,
    /// Read interrupt vector high byte, jump, end.
    VectorHi,
}

impl Micro {
    /// Whether this micro-instruction drives the bus with a write.
    ///
    /// RDY may only freeze read cycles; write cycles complete regardless.
    #[must_use]
    pub fn is_write(self) -> bool {
        matches!(
            self,
            Micro::DummyWrite
                | Micro::WriteModified
                | Micro::WriteData
                | Micro::PushPch
                | Micro::PushPcl
                | Micro::PushPBrk
                | Micro::PushPInt
                | Micro::PushA
                | Micro::PushP
        )
    }
}

/// Instruction operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    Adc, And, Asl, Bcc, Bcs, Beq, Bit, Bmi, Bne, Bpl, Brk, Bvc, Bvs,
    Clc, Cld, Cli, Clv, Cmp, Cpx, Cpy, Dec, Dex, Dey, Eor, Inc, Inx,
    Iny, Jmp, Jsr, Lda, Ldx, Ldy, Lsr, Nop, Ora, Pha, Php, Pla, Plp,
    Rol, Ror, Rti, Rts, Sbc, Sec, Sed, Sei, Sta, Stx, Sty, Tax, Tay,
    Tsx, Txa, Txs, Tya,
    // Stable illegals.
    Lax, Sax, Dcp, Isc, Slo, Rla, Sre, Rra, Anc, Alr, Arr, Sbx,
    // Unstable illegals (common approximations).
    Ane, Lxa, Sha, Shx, Shy, Tas, Las,
    // Halt.
    Jam,
}

/// Addressing mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Imp, Acc, Imm, Zp, ZpX, ZpY, Abs, AbsX, AbsY, Izx, Izy, Ind, Rel,
}

/// Bus-access class of an operation's final data cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Class {
    Read,
    Write,
    Modify,
}

impl Op {
    #[must_use]
    pub fn class(self) -> Class {
        match self {
            Op::Sta | Op::Stx | Op::Sty | Op::Sax | Op::Sha | Op::Shx | Op::Shy | Op::Tas => {
                Class::Write
            }
            Op::Asl | Op::Lsr | Op::Rol | Op::Ror | Op::Inc | Op::Dec | Op::Slo | Op::Rla
            | Op::Sre | Op::Rra | Op::Dcp | Op::Isc => Class::Modify,
            _ => Class::Read,
        }
    }
}

// Sequences start at the cycle after the opcode fetch.

const IMP: &[Micro] = &[Micro::ImpExec];
const IMM: &[Micro] = &[Micro::ImmExec];
const REL: &[Micro] = &[Micro::BranchOperand, Micro::BranchTaken, Micro::BranchFixup];

const ZP_R: &[Micro] = &[Micro::FetchAdl, Micro::ReadExec];
const ZP_W: &[Micro] = &[Micro::FetchAdl, Micro::WriteData];
const ZP_M: &[Micro] = &[Micro::FetchAdl, Micro::ReadData, Micro::DummyWrite, Micro::WriteModified];

const ZPX_R: &[Micro] = &[Micro::FetchAdl, Micro::ZpIndexX, Micro::ReadExec];
const ZPX_W: &[Micro] = &[Micro::FetchAdl, Micro::ZpIndexX, Micro::WriteData];
const ZPX_M: &[Micro] = &[
    Micro::FetchAdl, Micro::ZpIndexX, Micro::ReadData, Micro::DummyWrite, Micro::WriteModified,
];

const ZPY_R: &[Micro] = &[Micro::FetchAdl, Micro::ZpIndexY, Micro::ReadExec];
const ZPY_W: &[Micro] = &[Micro::FetchAdl, Micro::ZpIndexY, Micro::WriteData];

const ABS_R: &[Micro] = &[Micro::FetchAdl, Micro::FetchAdh, Micro::ReadExec];
const ABS_W: &[Micro] = &[Micro::FetchAdl, Micro::FetchAdh, Micro::WriteData];
const ABS_M: &[Micro] = &[
    Micro::FetchAdl, Micro::FetchAdh, Micro::ReadData, Micro::DummyWrite, Micro::WriteModified,
];

const ABX_R: &[Micro] = &[
    Micro::FetchAdl, Micro::FetchAdhIndexX, Micro::ReadMaybeFixup, Micro::ReadExec,
];
const ABX_W: &[Micro] = &[
    Micro::FetchAdl, Micro::FetchAdhIndexX, Micro::ReadFixup, Micro::WriteData,
];
const ABX_M: &[Micro] = &[
    Micro::FetchAdl, Micro::FetchAdhIndexX, Micro::ReadFixup, Micro::ReadData,
    Micro::DummyWrite, Micro::WriteModified,
];

const ABY_R: &[Micro] = &[
    Micro::FetchAdl, Micro::FetchAdhIndexY, Micro::ReadMaybeFixup, Micro::ReadExec,
];
const ABY_W: &[Micro] = &[
    Micro::FetchAdl, Micro::FetchAdhIndexY, Micro::ReadFixup, Micro::WriteData,
];
const ABY_M: &[Micro] = &[
    Micro::FetchAdl, Micro::FetchAdhIndexY, Micro::ReadFixup, Micro::ReadData,
    Micro::DummyWrite, Micro::WriteModified,
];

const IZX_R: &[Micro] = &[
    Micro::FetchPointer, Micro::PointerIndexX, Micro::ReadPointerLo, Micro::ReadPointerHi,
    Micro::ReadExec,
];
const IZX_W: &[Micro] = &[
    Micro::FetchPointer, Micro::PointerIndexX, Micro::ReadPointerLo, Micro::ReadPointerHi,
    Micro::WriteData,
];
const IZX_M: &[Micro] = &[
    Micro::FetchPointer, Micro::PointerIndexX, Micro::ReadPointerLo, Micro::ReadPointerHi,
    Micro::ReadData, Micro::DummyWrite, Micro::WriteModified,
];

const IZY_R: &[Micro] = &[
    Micro::FetchPointer, Micro::ReadPointerLo, Micro::ReadPointerHiIndexY,
    Micro::ReadMaybeFixup, Micro::ReadExec,
];
const IZY_W: &[Micro] = &[
    Micro::FetchPointer, Micro::ReadPointerLo, Micro::ReadPointerHiIndexY,
    Micro::ReadFixup, Micro::WriteData,
];
const IZY_M: &[Micro] = &[
    Micro::FetchPointer, Micro::ReadPointerLo, Micro::ReadPointerHiIndexY,
    Micro::ReadFixup, Micro::ReadData, Micro::DummyWrite, Micro::WriteModified,
];

const JMP_ABS: &[Micro] = &[Micro::FetchAdl, Micro::JumpAdh];
const JMP_IND: &[Micro] = &[
    Micro::FetchAdl, Micro::FetchAdh, Micro::ReadIndLo, Micro::ReadIndHiEnd,
];
const JSR: &[Micro] = &[
    Micro::FetchAdl, Micro::StackDummy, Micro::PushPch, Micro::PushPcl, Micro::JumpAdh,
];
const RTS: &[Micro] = &[
    Micro::PcDummy, Micro::StackDummy, Micro::PullPcl, Micro::PullPch, Micro::IncPcEnd,
];
const RTI: &[Micro] = &[
    Micro::PcDummy, Micro::StackDummy, Micro::PullPKeepGoing, Micro::PullPcl, Micro::PullPchEnd,
];
const PHA: &[Micro] = &[Micro::PcDummy, Micro::PushA];
const PHP: &[Micro] = &[Micro::PcDummy, Micro::PushP];
const PLA: &[Micro] = &[Micro::PcDummy, Micro::StackDummy, Micro::PullA];
const PLP: &[Micro] = &[Micro::PcDummy, Micro::StackDummy, Micro::PullP];
const BRK: &[Micro] = &[
    Micro::BrkPad, Micro::PushPch, Micro::PushPcl, Micro::PushPBrk, Micro::VectorLo,
    Micro::VectorHi,
];

/// Interrupt sequence, entered instead of an opcode fetch. The fetch cycle
/// itself performs the first dummy read, so six micro-cycles follow.
pub const INTERRUPT: &[Micro] = &[
    Micro::PcDummy, Micro::PushPch, Micro::PushPcl, Micro::PushPInt, Micro::VectorLo,
    Micro::VectorHi,
];

/// Micro-instruction sequence for an opcode.
#[must_use]
pub fn sequence(op: Op, mode: Mode) -> &'static [Micro] {
    match op {
        Op::Brk => return BRK,
        Op::Jsr => return JSR,
        Op::Rts => return RTS,
        Op::Rti => return RTI,
        Op::Pha => return PHA,
        Op::Php => return PHP,
        Op::Pla => return PLA,
        Op::Plp => return PLP,
        Op::Jmp => return if mode == Mode::Ind { JMP_IND } else { JMP_ABS },
        Op::Jam => return IMP,
        _ => {}
    }

    match (mode, op.class()) {
        (Mode::Imp | Mode::Acc, _) => IMP,
        (Mode::Imm, _) => IMM,
        (Mode::Rel, _) => REL,
        (Mode::Zp, Class::Read) => ZP_R,
        (Mode::Zp, Class::Write) => ZP_W,
        (Mode::Zp, Class::Modify) => ZP_M,
        (Mode::ZpX, Class::Read) => ZPX_R,
        (Mode::ZpX, Class::Write) => ZPX_W,
        (Mode::ZpX, Class::Modify) => ZPX_M,
        (Mode::ZpY, Class::Read) => ZPY_R,
        (Mode::ZpY, Class::Write) => ZPY_W,
        (Mode::ZpY, Class::Modify) => ZPX_M,
        (Mode::Abs, Class::Read) => ABS_R,
        (Mode::Abs, Class::Write) => ABS_W,
        (Mode::Abs, Class::Modify) => ABS_M,
        (Mode::AbsX, Class::Read) => ABX_R,
        (Mode::AbsX, Class::Write) => ABX_W,
        (Mode::AbsX, Class::Modify) => ABX_M,
        (Mode::AbsY, Class::Read) => ABY_R,
        (Mode::AbsY, Class::Write) => ABY_W,
        (Mode::AbsY, Class::Modify) => ABY_M,
        (Mode::Izx, Class::Read) => IZX_R,
        (Mode::Izx, Class::Write) => IZX_W,
        (Mode::Izx, Class::Modify) => IZX_M,
        (Mode::Izy, Class::Read) => IZY_R,
        (Mode::Izy, Class::Write) => IZY_W,
        (Mode::Izy, Class::Modify) => IZY_M,
        (Mode::Ind, _) => JMP_IND,
    }
}

/// Opcode → (operation, addressing mode).
pub const OPCODES: [(Op, Mode); 256] = {
    use Mode::*;
    use Op::*;
    [
        // 0x00
        (Brk, Imp), (Ora, Izx), (Jam, Imp), (Slo, Izx),
        (Nop, Zp), (Ora, Zp), (Asl, Zp), (Slo, Zp),
        (Php, Imp), (Ora, Imm), (Asl, Acc), (Anc, Imm),
        (Nop, Abs), (Ora, Abs), (Asl, Abs), (Slo, Abs),
        // 0x10
        (Bpl, Rel), (Ora, Izy), (Jam, Imp), (Slo, Izy),
        (Nop, ZpX), (Ora, ZpX), (Asl, ZpX), (Slo, ZpX),
        (Clc, Imp), (Ora, AbsY), (Nop, Imp), (Slo, AbsY),
        (Nop, AbsX), (Ora, AbsX), (Asl, AbsX), (Slo, AbsX),
        // 0x20
        (Jsr, Abs), (And, Izx), (Jam, Imp), (Rla, Izx),
        (Bit, Zp), (And, Zp), (Rol, Zp), (Rla, Zp),
        (Plp, Imp), (And, Imm), (Rol, Acc), (Anc, Imm),
        (Bit, Abs), (And, Abs), (Rol, Abs), (Rla, Abs),
        // 0x30
        (Bmi, Rel), (And, Izy), (Jam, Imp), (Rla, Izy),
        (Nop, ZpX), (And, ZpX), (Rol, ZpX), (Rla, ZpX),
        (Sec, Imp), (And, AbsY), (Nop, Imp), (Rla, AbsY),
        (Nop, AbsX), (And, AbsX), (Rol, AbsX), (Rla, AbsX),
        // 0x40
        (Rti, Imp), (Eor, Izx), (Jam, Imp), (Sre, Izx),
        (Nop, Zp), (Eor, Zp), (Lsr, Zp), (Sre, Zp),
        (Pha, Imp), (Eor, Imm), (Lsr, Acc), (Alr, Imm),
        (Jmp, Abs), (Eor, Abs), (Lsr, Abs), (Sre, Abs),
        // 0x50
        (Bvc, Rel), (Eor, Izy), (Jam, Imp), (Sre, Izy),
        (Nop, ZpX), (Eor, ZpX), (Lsr, ZpX), (Sre, ZpX),
        (Cli, Imp), (Eor, AbsY), (Nop, Imp), (Sre, AbsY),
        (Nop, AbsX), (Eor, AbsX), (Lsr, AbsX), (Sre, AbsX),
        // 0x60
        (Rts, Imp), (Adc, Izx), (Jam, Imp), (Rra, Izx),
        (Nop, Zp), (Adc, Zp), (Ror, Zp), (Rra, Zp),
        (Pla, Imp), (Adc, Imm), (Ror, Acc), (Arr, Imm),
        (Jmp, Ind), (Adc, Abs), (Ror, Abs), (Rra, Abs),
        // 0x70
        (Bvs, Rel), (Adc, Izy), (Jam, Imp), (Rra, Izy),
        (Nop, ZpX), (Adc, ZpX), (Ror, ZpX), (Rra, ZpX),
        (Sei, Imp), (Adc, AbsY), (Nop, Imp), (Rra, AbsY),
        (Nop, AbsX), (Adc, AbsX), (Ror, AbsX), (Rra, AbsX),
        // 0x80
        (Nop, Imm), (Sta, Izx), (Nop, Imm), (Sax, Izx),
        (Sty, Zp), (Sta, Zp), (Stx, Zp), (Sax, Zp),
        (Dey, Imp), (Nop, Imm), (Txa, Imp), (Ane, Imm),
        (Sty, Abs), (Sta, Abs), (Stx, Abs), (Sax, Abs),
        // 0x90
        (Bcc, Rel), (Sta, Izy), (Jam, Imp), (Sha, Izy),
        (Sty, ZpX), (Sta, ZpX), (Stx, ZpY), (Sax, ZpY),
        (Tya, Imp), (Sta, AbsY), (Txs, Imp), (Tas, AbsY),
        (Shy, AbsX), (Sta, AbsX), (Shx, AbsY), (Sha, AbsY),
        // 0xA0
        (Ldy, Imm), (Lda, Izx), (Ldx, Imm), (Lax, Izx),
        (Ldy, Zp), (Lda, Zp), (Ldx, Zp), (Lax, Zp),
        (Tay, Imp), (Lda, Imm), (Tax, Imp), (Lxa, Imm),
        (Ldy, Abs), (Lda, Abs), (Ldx, Abs), (Lax, Abs),
        // 0xB0
        (Bcs, Rel), (Lda, Izy), (Jam, Imp), (Lax, Izy),
        (Ldy, ZpX), (Lda, ZpX), (Ldx, ZpY), (Lax, ZpY),
        (Clv, Imp), (Lda, AbsY), (Tsx, Imp), (Las, AbsY),
        (Ldy, AbsX), (Lda, AbsX), (Ldx, AbsY), (Lax, AbsY),
        // 0xC0
        (Cpy, Imm), (Cmp, Izx), (Nop, Imm), (Dcp, Izx),
        (Cpy, Zp), (Cmp, Zp), (Dec, Zp), (Dcp, Zp),
        (Iny, Imp), (Cmp, Imm), (Dex, Imp), (Sbx, Imm),
        (Cpy, Abs), (Cmp, Abs), (Dec, Abs), (Dcp, Abs),
        // 0xD0
        (Bne, Rel), (Cmp, Izy), (Jam, Imp), (Dcp, Izy),
        (Nop, ZpX), (Cmp, ZpX), (Dec, ZpX), (Dcp, ZpX),
        (Cld, Imp), (Cmp, AbsY), (Nop, Imp), (Dcp, AbsY),
        (Nop, AbsX), (Cmp, AbsX), (Dec, AbsX), (Dcp, AbsX),
        // 0xE0
        (Cpx, Imm), (Sbc, Izx), (Nop, Imm), (Isc, Izx),
        (Cpx, Zp), (Sbc, Zp), (Inc, Zp), (Isc, Zp),
        (Inx, Imp), (Sbc, Imm), (Nop, Imp), (Sbc, Imm),
        (Cpx, Abs), (Sbc, Abs), (Inc, Abs), (Isc, Abs),
        // 0xF0
        (Beq, Rel), (Sbc, Izy), (Jam, Imp), (Isc, Izy),
        (Nop, ZpX), (Sbc, ZpX), (Inc, ZpX), (Isc, ZpX),
        (Sed, Imp), (Sbc, AbsY), (Nop, Imp), (Isc, AbsY),
        (Nop, AbsX), (Sbc, AbsX), (Inc, AbsX), (Isc, AbsX),
    ]
};
