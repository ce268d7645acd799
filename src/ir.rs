//! Intermediate representation (§3, §4.3, component C/D).
//!
//! Where the teacher keeps one `Instruction` row per opcode byte pointing
//! straight at an `execute` function (`instruction.rs`), the translator
//! needs a layer between "guest byte stream" and "emitted code": a node per
//! guest instruction that the optimizer can inspect and rewrite before
//! anything is compiled. `IrOpcode` is the closed operation tag set and
//! `Operand` is the closed operand tag set the design calls for; together
//! they generalize the teacher's per-opcode `execute: fn(...)` pointer into
//! data the optimizer passes over instead of only ever running once.

/// One of the eight 8-bit registers, or the `(HL)` memory operand standing
/// in the same slot in the primary opcode table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reg8 {
    A,
    B,
    C,
    D,
    E,
    H,
    L,
    MemHl,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reg16 {
    Bc,
    De,
    Hl,
    Sp,
    Af,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Condition {
    Nz,
    Z,
    Nc,
    C,
}

impl Condition {
    pub fn holds(self, hflags_z: bool, hflags_c: bool) -> bool {
        match self {
            Condition::Nz => !hflags_z,
            Condition::Z => hflags_z,
            Condition::Nc => !hflags_c,
            Condition::C => hflags_c,
        }
    }
}

/// Closed operand tag set. Immediates are resolved at decode time so the
/// optimizer and emitter never need to re-read the guest byte stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operand {
    None,
    Reg8(Reg8),
    Reg16(Reg16),
    Imm8(u8),
    Imm16(u16),
    RelImm8(i8),
    MemBc,
    MemDe,
    MemHlInc,
    MemHlDec,
    MemImm16(u16),
    MemImm8(u8),
    MemC,
    Cond(Condition),
    Bit(u8),
    RstVec(u8),
    SpPlusImm8(i8),
}

/// Closed IR opcode tag set (§4.3/§4.4).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IrOpcode {
    Nop,
    Stop,
    Halt,
    Di,
    Ei,

    /// Generic 8-bit load: op1 <- op2.
    Ld8,
    /// 16-bit immediate load into a register pair, or `LD SP, HL`.
    Ld16,
    /// `LD (a16), SP`.
    LdMemSp,
    /// `LD HL, SP+r8`.
    LdHlSpImm8,

    Inc8,
    Dec8,
    Inc16,
    Dec16,
    AddHl16,
    AddSpImm8,

    Add,
    Adc,
    Sub,
    Sbc,
    And,
    Xor,
    Or,
    Cp,

    Rlca,
    Rrca,
    Rla,
    Rra,
    Daa,
    Cpl,
    Scf,
    Ccf,

    Jr,
    Jp,
    JpHl,
    Call,
    Ret,
    Reti,
    RstOp,

    Push,
    Pop,

    Rlc,
    Rrc,
    Rl,
    Rr,
    Sla,
    Sra,
    Swap,
    Srl,

    BitOp,
    ResOp,
    SetOp,

    /// An opcode from the 12 unused primary/CB slots (§1 invariant: decoding
    /// one must fail the block compile immediately, not emit garbage).
    Invalid,
}

/// Static facts about an IR node the optimizer consults without re-deriving
/// them from the opcode tag every pass (§4.4 "flag bitset": uses-CC,
/// affects-CC, ends-block).
#[derive(Debug, Clone, Copy, Default)]
pub struct IrFlags {
    pub uses_cc: bool,
    pub affects_cc: bool,
    pub ends_block: bool,
    /// Conditional control flow: true branch and false branch can consume a
    /// different cycle count (§4.3 "taken/not-taken cycles").
    pub has_branch_cycles: bool,
    /// Writes somewhere other than a register (MMIO, WRAM, HRAM) -- the
    /// self-loop/busy-wait optimizer must never eliminate these (§4.4 P?).
    pub persistent_write: bool,
}

#[derive(Debug, Clone)]
pub struct IrNode {
    pub opcode: IrOpcode,
    pub op1: Operand,
    pub op2: Operand,
    /// Guest address the originating instruction started at.
    pub address: u16,
    /// Length in guest bytes (1-3), used to compute the next sequential PC.
    pub length: u8,
    /// T-cycles when the branch, if any, is not taken (or the instruction's
    /// only cost, for unconditional instructions).
    pub cycles: u8,
    /// T-cycles when the branch is taken, for conditional control flow.
    pub cycles_branch: Option<u8>,
    pub flags: IrFlags,
}

impl IrNode {
    pub fn new(opcode: IrOpcode, address: u16, length: u8, cycles: u8) -> Self {
        IrNode {
            opcode,
            op1: Operand::None,
            op2: Operand::None,
            address,
            length,
            cycles,
            cycles_branch: None,
            flags: IrFlags::default(),
        }
    }

    pub fn with_ops(mut self, op1: Operand, op2: Operand) -> Self {
        self.op1 = op1;
        self.op2 = op2;
        self
    }

    pub fn with_branch_cycles(mut self, taken: u8) -> Self {
        self.cycles_branch = Some(taken);
        self.flags.has_branch_cycles = true;
        self
    }

    pub fn affects_cc(mut self) -> Self {
        self.flags.affects_cc = true;
        self
    }

    pub fn uses_cc(mut self) -> Self {
        self.flags.uses_cc = true;
        self
    }

    pub fn ends_block(mut self) -> Self {
        self.flags.ends_block = true;
        self
    }

    pub fn persistent_write(mut self) -> Self {
        self.flags.persistent_write = true;
        self
    }

    /// The guest address immediately after this instruction, ignoring any
    /// taken branch (used to seed sequential decode and as the "not taken"
    /// successor for conditional control flow).
    pub fn next_address(&self) -> u16 {
        self.address.wrapping_add(self.length as u16)
    }
}

/// Busy-wait shape a block was recognized as by the optimizer (§4.4 named
/// peephole rules: wait-for-STAT3, wait-for-LY, joypad double-poll).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SpinKind {
    #[default]
    None,
    /// Spins on a condition with no observable side effect; safe to fast
    /// forward cycles but must still be woken by the scheduler/interrupts.
    Generic,
    WaitLy,
    WaitStat3,
    Joypad,
}

#[derive(Debug, Clone)]
pub struct BasicBlock {
    pub start: u16,
    pub nodes: Vec<IrNode>,
    pub spin: SpinKind,
}

impl BasicBlock {
    pub fn end_address(&self) -> u16 {
        self.nodes
            .last()
            .map(|n| n.next_address())
            .unwrap_or(self.start)
    }

    pub fn total_length(&self) -> u16 {
        self.nodes.iter().map(|n| n.length as u16).sum()
    }
}
