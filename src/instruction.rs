// Copyright (C) 2025 FZI Forschungszentrum Informatik
// SPDX-License-Identifier: Apache-2.0
//! Minimal, control-flow relevant instruction decoding
//!
//! This is deliberately not a full RISC-V disassembler: only the opcodes
//! that the tracing algorithm needs to reason about (branches, jumps, calls,
//! returns and the handful of trap-related instructions) are decoded.
//! Everything else decodes to [`Kind`]'s absence, i.e. [`Instruction::kind`]
//! is `None`.

pub mod format;

#[cfg(test)]
mod tests;

/// The bits from which an instruction can be decoded
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Bits {
    Bit32(u32),
    Bit16(u16),
}

impl Bits {
    /// Extract [`Bits`] from the beginning of a raw byte slice
    ///
    /// Honors the Base Instruction-Length Encoding specified in Section 1.5
    /// of The RISC-V Instruction Set Manual Volume I. Returns the remaining
    /// part of the slice alongside the extracted bits. Returns `None` if the
    /// beginning does not appear to be either a 16 or 32 bit instruction, or
    /// the slice does not hold enough bytes.
    pub fn extract(data: &[u8]) -> Option<(Self, &[u8])> {
        match data {
            [a, b, r @ ..] if a & 0b11 != 0b11 => {
                Some((Self::Bit16(u16::from_le_bytes([*a, *b])), r))
            }
            [a, b, c, d, r @ ..] if a & 0b11100 != 0b11100 => {
                Some((Self::Bit32(u32::from_le_bytes([*a, *b, *c, *d])), r))
            }
            _ => None,
        }
    }
}

#[repr(u32)]
#[derive(Eq, PartialEq)]
enum OpCode {
    MiscMem = 0b0001111,
    Lui = 0b0110111,
    Auipc = 0b0010111,
    Branch = 0b1100011,
    Jalr = 0b1100111,
    Jal = 0b1101111,
    System = 0b1110011,
    Ignored,
}

impl From<u32> for OpCode {
    fn from(value: u32) -> Self {
        use OpCode::*;

        const MASK: u32 = 0x7F;
        match value & MASK {
            x if x == Auipc as u32 => Auipc,
            x if x == Lui as u32 => Lui,
            x if x == MiscMem as u32 => MiscMem,
            x if x == Branch as u32 => Branch,
            x if x == Jalr as u32 => Jalr,
            x if x == Jal as u32 => Jal,
            x if x == System as u32 => System,
            _ => Ignored,
        }
    }
}

/// The control-flow relevant instructions the tracing algorithm needs to know
#[allow(non_camel_case_types)]
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Kind {
    mret,
    sret,
    uret,
    dret,
    fence,
    sfence_vma,
    wfi,
    ecall,
    ebreak,
    fence_i,
    beq(format::TypeB),
    bne(format::TypeB),
    blt(format::TypeB),
    bge(format::TypeB),
    bltu(format::TypeB),
    bgeu(format::TypeB),
    auipc(format::TypeU),
    lui(format::TypeU),
    c_beqz(format::TypeB),
    c_bnez(format::TypeB),
    jal(format::TypeJ),
    c_j(format::TypeJ),
    c_jal(format::TypeJ),
    c_lui(format::TypeU),
    c_jr(format::TypeR),
    c_jalr(format::TypeR),
    c_ebreak,
    jalr(format::TypeI),
}

impl Kind {
    /// Whether this is a (conditional) branch instruction
    pub fn is_branch(self) -> bool {
        self.branch_target().is_some()
    }

    /// The branch target, relative to this instruction
    ///
    /// Returns `None` if this is not a (known) branch instruction. Jump
    /// instructions are not considered branches.
    pub fn branch_target(self) -> Option<i16> {
        match self {
            Self::c_beqz(d) => Some(d.imm),
            Self::c_bnez(d) => Some(d.imm),
            Self::beq(d) => Some(d.imm),
            Self::bne(d) => Some(d.imm),
            Self::blt(d) => Some(d.imm),
            Self::bge(d) => Some(d.imm),
            Self::bltu(d) => Some(d.imm),
            Self::bgeu(d) => Some(d.imm),
            _ => None,
        }
    }

    /// The inferable jump target, relative to this instruction
    ///
    /// Returns `None` if this is not a (known) jump instruction whose target
    /// is determined by the instruction alone. A `jalr` is only considered
    /// inferable if its source register is `zero`, regardless of whether it
    /// is preceded by instructions that happen to define a constant target.
    pub fn inferable_jump_target(self) -> Option<i32> {
        match self {
            Self::jal(d) => Some(d.imm),
            Self::c_jal(d) => Some(d.imm),
            Self::c_j(d) => Some(d.imm),
            Self::jalr(format::TypeI { rs1: 0, imm, .. }) => Some(imm.into()),
            _ => None,
        }
    }

    /// Register and offset needed to compute an uninferable jump's target
    ///
    /// The jump target is `registers[reg] + offset`. Returns `None` if this
    /// is not a (known) jump instruction with an uninferable target.
    pub fn uninferable_jump(self) -> Option<(format::Register, i16)> {
        match self {
            Self::c_jalr(d) => Some((d.rs1, 0)),
            Self::c_jr(d) => Some((d.rs1, 0)),
            Self::jalr(d) => Some((d.rs1, d.imm)),
            _ => None,
        }
        .filter(|(r, _)| *r != 0)
    }

    /// Whether this instruction returns from a trap (`xret`)
    pub fn is_return_from_trap(self) -> bool {
        matches!(self, Self::uret | Self::sret | Self::mret | Self::dret)
    }

    /// Whether this instruction causes a PC discontinuity whose target
    /// cannot be inferred from the instruction alone
    ///
    /// True for [uninferable jumps][Self::uninferable_jump] and [returns
    /// from trap][Self::is_return_from_trap]. `ecall`/`ebreak` are
    /// deliberately excluded: exceptions are conveyed by packets, not by
    /// this classification.
    pub fn is_uninferable_discon(self) -> bool {
        self.uninferable_jump().is_some() || self.is_return_from_trap()
    }

    /// Whether this is `ecall`, `ebreak` or `c.ebreak`
    pub fn is_ecall_or_ebreak(self) -> bool {
        matches!(self, Self::ecall | Self::ebreak | Self::c_ebreak)
    }

    /// Whether this instruction is considered a function call
    ///
    /// True for jump-and-link instructions with `ra` (`x1`) as `rd`.
    pub fn is_call(self) -> bool {
        matches!(
            self,
            Self::jalr(format::TypeI { rd: 1, .. })
                | Self::c_jalr(_)
                | Self::jal(format::TypeJ { rd: 1, .. })
                | Self::c_jal(_)
        )
    }

    /// Whether this instruction is considered a function return
    ///
    /// True for jump register instructions with `ra` (`x1`) as `rs1` and
    /// `zero` as `rd`.
    pub fn is_return(self) -> bool {
        matches!(
            self,
            Self::jalr(format::TypeI { rd: 0, rs1: 1, .. })
                | Self::c_jr(format::TypeR { rs1: 1, .. })
        )
    }

    /// Register loaded and the absolute value it is loaded with, if this
    /// instruction is `lui`, `c.lui` or `auipc`
    ///
    /// `auipc`'s value is relative to `pc`; `lui`/`c.lui` is an absolute
    /// immediate. This is the building block for recognizing the
    /// `lui`/`auipc` + `jalr` sequentially-inferrable-jump idiom.
    pub fn upper_immediate(self, pc: u64) -> Option<(format::Register, u64)> {
        match self {
            Self::auipc(d) => Some((d.rd, pc.wrapping_add_signed(d.imm.into()))),
            Self::lui(d) => Some((d.rd, d.imm as i64 as u64)),
            Self::c_lui(d) => Some((d.rd, d.imm as i64 as u64)),
            _ => None,
        }
    }

    /// Decode a 32bit ("normal") instruction
    ///
    /// Returns `None` for any opcode not relevant to the tracing algorithm;
    /// this is not treated as an error.
    #[allow(clippy::unusual_byte_groupings)]
    pub fn decode_32(insn: u32) -> Option<Self> {
        let funct3 = (insn >> 12) & 0x7;

        match OpCode::from(insn) {
            OpCode::MiscMem => match funct3 {
                0b000 => Some(Self::fence),
                0b001 => Some(Self::fence_i),
                _ => None,
            },
            OpCode::Lui => Some(Self::lui(insn.into())),
            OpCode::Auipc => Some(Self::auipc(insn.into())),
            OpCode::Branch => match funct3 {
                0b000 => Some(Self::beq(insn.into())),
                0b001 => Some(Self::bne(insn.into())),
                0b100 => Some(Self::blt(insn.into())),
                0b101 => Some(Self::bge(insn.into())),
                0b110 => Some(Self::bltu(insn.into())),
                0b111 => Some(Self::bgeu(insn.into())),
                _ => None,
            },
            OpCode::Jalr => Some(Self::jalr(insn.into())),
            OpCode::Jal => Some(Self::jal(insn.into())),
            OpCode::System => match insn >> 7 {
                0b000000000000_00000_000_00000 => Some(Self::ecall),
                0b000000000001_00000_000_00000 => Some(Self::ebreak),
                0b000100000010_00000_000_00000 => Some(Self::sret),
                0b001100000010_00000_000_00000 => Some(Self::mret),
                0b000100000101_00000_000_00000 => Some(Self::wfi),
                _ if (insn >> 25) == 0b0001001 => Some(Self::sfence_vma),
                _ => None,
            },
            _ => None,
        }
    }

    /// Decode a 16bit ("compressed") instruction
    ///
    /// Returns `None` for any opcode not relevant to the tracing algorithm;
    /// this is not treated as an error.
    pub fn decode_16(insn: u16) -> Option<Self> {
        let op = insn & 0x3;
        let func3 = insn >> 13;
        match (op, func3) {
            (0b01, 0b001) => Some(Self::c_jal(insn.into())),
            (0b01, 0b011) => {
                let data = format::TypeU::from(insn);
                if data.rd != 0 && data.rd != 2 {
                    Some(Self::c_lui(data))
                } else {
                    None
                }
            }
            (0x01, 0b101) => Some(Self::c_j(insn.into())),
            (0x01, 0b110) => Some(Self::c_beqz(insn.into())),
            (0x01, 0b111) => Some(Self::c_bnez(insn.into())),
            (0b10, 0b100) => {
                let data = format::TypeR::from(insn);
                let bit12 = (insn >> 12) & 0x1;
                match (bit12, data.rs1, data.rs2) {
                    (0, r, 0) if r != 0 => Some(Self::c_jr(data)),
                    (1, r, 0) if r != 0 => Some(Self::c_jalr(data)),
                    (1, 0, 0) => Some(Self::c_ebreak),
                    _ => None,
                }
            }
            _ => None,
        }
    }
}

/// Byte length of an [`Instruction`]: either 2 (compressed) or 4 (normal)
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Size {
    Compressed = 2,
    Normal = 4,
}

impl Default for Size {
    fn default() -> Self {
        Self::Normal
    }
}

impl From<Size> for u64 {
    fn from(size: Size) -> Self {
        size as u64
    }
}

/// A decoded RISC-V instruction
///
/// Instructions are looked up and cached by address; this type intentionally
/// does not carry its own `pc`.
#[derive(Copy, Clone, Default, Debug, Eq, PartialEq)]
pub struct Instruction {
    pub size: Size,
    /// `None` for any instruction not relevant to the tracing algorithm
    pub kind: Option<Kind>,
}

impl Instruction {
    /// Whether this instruction is a branch
    pub fn is_branch(&self) -> bool {
        self.kind.is_some_and(Kind::is_branch)
    }

    /// Whether this instruction causes an uninferable discontinuity
    pub fn is_uninferable_discon(&self) -> bool {
        self.kind.is_some_and(Kind::is_uninferable_discon)
    }

    /// Whether this instruction is `ecall`, `ebreak` or `c.ebreak`
    pub fn is_ecall_or_ebreak(&self) -> bool {
        self.kind.is_some_and(Kind::is_ecall_or_ebreak)
    }

    /// Whether this instruction is considered a function call
    pub fn is_call(&self) -> bool {
        self.kind.is_some_and(Kind::is_call)
    }

    /// Whether this instruction is considered a function return
    pub fn is_return(&self) -> bool {
        self.kind.is_some_and(Kind::is_return)
    }
}

impl From<Bits> for Instruction {
    fn from(bits: Bits) -> Self {
        match bits {
            Bits::Bit32(bits) => Self {
                size: Size::Normal,
                kind: Kind::decode_32(bits),
            },
            Bits::Bit16(bits) => Self {
                size: Size::Compressed,
                kind: Kind::decode_16(bits),
            },
        }
    }
}
