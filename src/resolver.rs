// Copyright (C) 2025 FZI Forschungszentrum Informatik
// SPDX-License-Identifier: Apache-2.0
//! Pure next-PC resolution
//!
//! [`resolve`] turns one decoded [`Instruction`] (plus the small amount of
//! context the six priority rules need) into a tagged [`Outcome`], with no
//! access to decoder state: it neither touches the return stack nor
//! consumes branch-map bits itself. The caller (`tracer::state`) applies the
//! outcome and owns every side effect.

use crate::config::Features;
use crate::instruction::Instruction;

/// The resolved effect of retiring one instruction
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Outcome {
    /// Inferrable jump: target is `pc + imm`, already resolved here
    InferrableJump(u64),
    /// `lui`/`auipc`/`c.lui` + `jalr`/`c.jr`/`c.jalr` idiom, target resolved
    /// purely from the current and previous instruction
    SeqJump(u64),
    /// Implicit return: caller must pop the return stack for the target
    ImplicitReturn,
    /// Uninferrable discontinuity with no inference available: caller must
    /// take the target from the packet's reported address
    Uninferrable,
    /// Conditional branch, taken: target is `pc + imm`
    BranchTaken(u64),
    /// Conditional branch, not taken
    BranchNotTaken,
    /// Fall through to the next sequential instruction
    Fallthrough(u64),
}

/// Resolve the next-PC outcome for one instruction
///
/// `pc` is the address `insn` was fetched from. `prev` is the `(address,
/// instruction)` pair last retired, used only for the sequentially-inferred
/// jump idiom. `branch_taken` must be `Some` whenever `insn.is_branch()`, the
/// value of the next pending branch-map bit; it is ignored otherwise.
/// `call_depth` is the current return stack depth, gating the
/// implicit-return rule exactly as the classifier specifies.
pub fn resolve(
    pc: u64,
    insn: Instruction,
    prev: Option<(u64, Instruction)>,
    branch_taken: Option<bool>,
    call_depth: usize,
    features: &Features,
) -> Outcome {
    let Some(kind) = insn.kind else {
        return Outcome::Fallthrough(pc.wrapping_add(insn.size.into()));
    };

    // Rule 1: inferrable jump.
    if let Some(offset) = kind.inferable_jump_target() {
        return Outcome::InferrableJump(pc.wrapping_add_signed(offset.into()));
    }

    // Rule 2: sequentially-inferrable jump.
    if features.sequentially_inferred_jumps {
        if let Some(target) = sequential_jump_target(pc, kind, prev) {
            return Outcome::SeqJump(target);
        }
    }

    // Rule 3: implicit return.
    if features.implicit_returns && call_depth > 0 && is_implicit_return(kind) {
        return Outcome::ImplicitReturn;
    }

    // Rule 4: uninferrable discontinuity without inference.
    if kind.is_uninferable_discon() {
        return Outcome::Uninferrable;
    }

    // Rule 5: conditional branch.
    if kind.is_branch() {
        let offset = kind.branch_target().expect("branch_target set for is_branch");
        return match branch_taken {
            Some(true) => Outcome::BranchTaken(pc.wrapping_add_signed(offset.into())),
            Some(false) | None => Outcome::BranchNotTaken,
        };
    }

    // Rule 6: fall through.
    Outcome::Fallthrough(pc.wrapping_add(insn.size.into()))
}

fn is_implicit_return(kind: crate::instruction::Kind) -> bool {
    kind.is_return()
}

/// Resolve the target of a `lui`/`auipc`/`c.lui` + `jalr`/`c.jr`/`c.jalr`
/// idiom, if `prev` is the upper-immediate half and its destination register
/// feeds the jump's base register
fn sequential_jump_target(
    pc: u64,
    kind: crate::instruction::Kind,
    prev: Option<(u64, Instruction)>,
) -> Option<u64> {
    let (reg, offset) = kind.uninferable_jump()?;
    let (prev_pc, prev_insn) = prev?;
    let (upper_reg, base) = prev_insn.kind?.upper_immediate(prev_pc)?;

    (upper_reg == reg).then(|| base.wrapping_add_signed(offset.into()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instruction::{format, Kind, Size};

    fn features(seq: bool, implicit: bool) -> Features {
        Features {
            sequentially_inferred_jumps: seq,
            implicit_returns: implicit,
        }
    }

    fn insn(kind: Kind) -> Instruction {
        Instruction { size: Size::Normal, kind: Some(kind) }
    }

    #[test]
    fn inferrable_jump_adds_immediate() {
        let jal = insn(Kind::jal(format::TypeJ { rd: 1, imm: 0x40 }));
        let outcome = resolve(0x1000, jal, None, None, 0, &features(true, true));
        assert_eq!(outcome, Outcome::InferrableJump(0x1040));
    }

    #[test]
    fn sequential_jump_combines_upper_immediate_and_jalr_offset() {
        let lui = insn(Kind::lui(format::TypeU { rd: 5, imm: 0x2000 }));
        let jalr = insn(Kind::jalr(format::TypeI { rd: 0, rs1: 5, imm: 0x100 }));

        let outcome = resolve(
            0x2004,
            jalr,
            Some((0x2000, lui)),
            None,
            0,
            &features(true, true),
        );
        assert_eq!(outcome, Outcome::SeqJump(0x2100));
    }

    #[test]
    fn sequential_jump_disabled_falls_back_to_uninferrable() {
        let lui = insn(Kind::lui(format::TypeU { rd: 5, imm: 0x2000 }));
        let jalr = insn(Kind::jalr(format::TypeI { rd: 0, rs1: 5, imm: 0x100 }));

        let outcome = resolve(
            0x2004,
            jalr,
            Some((0x2000, lui)),
            None,
            0,
            &features(false, true),
        );
        assert_eq!(outcome, Outcome::Uninferrable);
    }

    #[test]
    fn implicit_return_requires_nonzero_depth() {
        let ret = insn(Kind::jalr(format::TypeI { rd: 0, rs1: 1, imm: 0 }));
        let outcome = resolve(0x1050, ret, None, None, 0, &features(true, true));
        assert_eq!(outcome, Outcome::Uninferrable);

        let outcome = resolve(0x1050, ret, None, None, 1, &features(true, true));
        assert_eq!(outcome, Outcome::ImplicitReturn);
    }

    #[test]
    fn taken_branch_adds_immediate_not_taken_falls_through_by_caller() {
        let beq = insn(Kind::beq(format::TypeB { rs1: 1, rs2: 2, imm: 0x20 }));
        assert_eq!(
            resolve(0x1000, beq, None, Some(true), 0, &features(true, true)),
            Outcome::BranchTaken(0x1020)
        );
        assert_eq!(
            resolve(0x1000, beq, None, Some(false), 0, &features(true, true)),
            Outcome::BranchNotTaken
        );
    }

    #[test]
    fn plain_instruction_falls_through_by_length() {
        let outcome = resolve(
            0x1000,
            Instruction { size: Size::Normal, kind: None },
            None,
            None,
            0,
            &features(true, true),
        );
        assert_eq!(outcome, Outcome::Fallthrough(0x1004));
    }
}
