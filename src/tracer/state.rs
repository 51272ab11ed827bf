// Copyright (C) 2025 FZI Forschungszentrum Informatik
// SPDX-License-Identifier: Apache-2.0
//! Execution-path tracing state
//!
//! [`State`] holds everything one instruction step needs and nothing a
//! packet shouldn't be allowed to touch directly: [`crate::tracer::Tracer`]
//! owns the packet dispatch and stop-condition logic, this module owns the
//! one-instruction-at-a-time walk ([`State::step`]) that dispatch drives.

use crate::binary::Binary;
use crate::config::Features;
use crate::instruction::Instruction;
use crate::resolver::{self, Outcome};
use crate::stack::ReturnStack;
use crate::types::{branch, Context};

use super::Error;

/// One instruction retirement produced by [`State::step`]
#[derive(Copy, Clone, Debug)]
pub struct StepEvent {
    pub old_pc: u64,
    pub new_pc: u64,
    pub insn: Instruction,
    /// `Some(taken)` if `insn` was a branch and consumed a branch-map bit
    pub branch_taken: Option<bool>,
}

/// Execution tracing state for a single hart
///
/// Field-for-field this is the Decoder State: `pc`/`last_pc` are
/// `Option<u64>` rather than a sentinel address (there is never a value
/// that both compares unequal to every real PC and survives a checked
/// decode), `branches`/`branch_map` are merged into one [`branch::Map`]
/// since they are never observed apart, and `call_counter` is simply
/// `return_stack.depth()`.
#[derive(Clone, Debug)]
pub struct State<R: ReturnStack> {
    pc: Option<u64>,
    last_pc: Option<u64>,
    address: u64,
    branch_map: branch::Map,
    stop_at_last_branch: bool,
    inferred_address: Option<u64>,
    start_of_trace: bool,
    context: Context,
    return_stack: R,
}

impl<R: ReturnStack> State<R> {
    /// Create a fresh state: no PC established yet, `start_of_trace` set
    pub fn new(return_stack: R) -> Self {
        Self {
            pc: None,
            last_pc: None,
            address: 0,
            branch_map: branch::Map::default(),
            stop_at_last_branch: false,
            inferred_address: None,
            start_of_trace: true,
            context: Context::default(),
            return_stack,
        }
    }

    pub fn pc(&self) -> Option<u64> {
        self.pc
    }

    pub fn address(&self) -> u64 {
        self.address
    }

    pub fn set_address(&mut self, address: u64) {
        self.address = address;
    }

    /// Accumulate a differential address update, already shifted by
    /// `iaddress_lsb`
    pub fn add_address(&mut self, delta: i64) {
        self.address = self.address.wrapping_add_signed(delta);
    }

    pub fn branch_map(&self) -> branch::Map {
        self.branch_map
    }

    pub fn branch_map_mut(&mut self) -> &mut branch::Map {
        &mut self.branch_map
    }

    pub fn clear_branch_map(&mut self) {
        self.branch_map = branch::Map::default();
    }

    pub fn stop_at_last_branch(&self) -> bool {
        self.stop_at_last_branch
    }

    pub fn set_stop_at_last_branch(&mut self, value: bool) {
        self.stop_at_last_branch = value;
    }

    pub fn inferred_address(&self) -> Option<u64> {
        self.inferred_address
    }

    pub fn set_inferred_address(&mut self, pc: u64) {
        self.inferred_address = Some(pc);
    }

    pub fn clear_inferred_address(&mut self) {
        self.inferred_address = None;
    }

    pub fn start_of_trace(&self) -> bool {
        self.start_of_trace
    }

    pub fn clear_start_of_trace(&mut self) {
        self.start_of_trace = false;
    }

    /// Re-arm `start_of_trace`, e.g. after a qualification-ended `te_support`
    /// packet: the next `te_inst` must again be a synchronization packet.
    pub fn set_start_of_trace(&mut self, value: bool) {
        self.start_of_trace = value;
    }

    pub fn context(&self) -> Context {
        self.context
    }

    pub fn set_context(&mut self, context: Context) {
        self.context = context;
    }

    /// Depth of the return stack, i.e. `call_counter`
    pub fn call_depth(&self) -> usize {
        self.return_stack.depth()
    }

    /// Drain the return stack, as format-3 packets reset `call_counter`
    pub fn reset_call_depth(&mut self) {
        while self.return_stack.pop().is_some() {}
    }

    /// Set `pc` directly, bypassing the Path Follower
    ///
    /// Used for the very first retirement and for trap entry/exit, neither
    /// of which walks forward from a previous PC. Returns the PC that was
    /// current before this call (`None` the very first time). `last_pc` is
    /// left equal to the new `pc`, so a sequentially-inferred jump can never
    /// spuriously fire against this fresh state: the "previous" instruction
    /// it would compare against is this same instruction, and no opcode is
    /// both a jump and an upper-immediate load.
    pub fn set_pc_direct(&mut self, pc: u64) -> Option<u64> {
        let old_pc = self.pc;
        self.pc = Some(pc);
        self.last_pc = Some(pc);
        old_pc
    }

    /// Advance one instruction
    ///
    /// Implements the `next_pc` step: fetches the instruction at the
    /// current `pc`, resolves its [`Outcome`], applies return-stack
    /// push/pop, and moves `pc`/`last_pc` forward. `reported_address` is
    /// only consulted for the uninferrable-discontinuity rule.
    pub fn step<B: Binary>(
        &mut self,
        binary: &mut B,
        features: &Features,
        reported_address: u64,
    ) -> Result<StepEvent, Error<B::Error>> {
        let pc = self.pc.expect("step called before a PC was established");
        let insn = binary
            .get_insn(pc)
            .map_err(|e| Error::CannotGetInstruction(e, pc))?;

        let branch_taken = if insn.is_branch() {
            Some(
                self.branch_map
                    .pop_taken()
                    .ok_or(Error::UnresolvableBranch)?,
            )
        } else {
            None
        };

        let prev = match self.last_pc {
            Some(last_pc) => {
                let last_insn = binary
                    .get_insn(last_pc)
                    .map_err(|e| Error::CannotGetInstruction(e, last_pc))?;
                Some((last_pc, last_insn))
            }
            None => None,
        };

        let outcome = resolver::resolve(pc, insn, prev, branch_taken, self.call_depth(), features);

        let new_pc = match outcome {
            Outcome::InferrableJump(t)
            | Outcome::SeqJump(t)
            | Outcome::BranchTaken(t)
            | Outcome::Fallthrough(t) => t,
            Outcome::ImplicitReturn => self
                .return_stack
                .pop()
                .expect("call_depth > 0 guarantees a return address"),
            Outcome::Uninferrable => {
                if self.stop_at_last_branch {
                    return Err(Error::UnexpectedUninferableDiscon);
                }
                reported_address
            }
            Outcome::BranchNotTaken => pc.wrapping_add(insn.size.into()),
        };

        if insn.is_call() {
            self.return_stack.push(pc.wrapping_add(insn.size.into()));
        }

        self.last_pc = Some(pc);
        self.pc = Some(new_pc);

        Ok(StepEvent {
            old_pc: pc,
            new_pc,
            insn,
            branch_taken,
        })
    }
}
