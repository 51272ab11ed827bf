// Copyright (C) 2025 FZI Forschungszentrum Informatik
// SPDX-License-Identifier: Apache-2.0
//! The decoder session
//!
//! [`Tracer`] is the packet-driven outer loop: [`Tracer::process_te_inst`]
//! and [`Tracer::process_te_support`] are the host-driven upcalls, dispatch
//! to [`state::State`]'s one-instruction-at-a-time walk, and report every
//! retirement through a host-supplied [`ReportTrace`].

pub mod state;

use core::fmt;
use core::num::NonZeroU8;

use crate::binary::Binary;
use crate::config::{AddressMode, Parameters};
use crate::instruction::Instruction;
use crate::packet::{Branch, Format, Payload, QualStatus, Support, Synchronization};
use crate::stack::ReturnStack;

use state::State;

/// Step budget for the `ENDED_NTR` forward walk
///
/// The reference algorithm walks forward, unbounded, until the PC revisits
/// the address an earlier ambiguous match stopped at. A malformed or
/// truncated stream can never produce that revisit, so this crate bounds
/// the walk and reports [`Error::NtrWalkBudgetExceeded`] instead of hanging.
pub const MAX_NTR_WALK_STEPS: u32 = 4096;

/// Errors produced while tracing
///
/// Every variant is unrecoverable: it indicates a bug in the decoder,
/// corruption of the packet stream, or a protocol mismatch with the
/// encoder. Recovery means discarding this [`Tracer`] and opening a new one
/// from a fresh synchronization packet.
#[derive(Debug, PartialEq, Eq)]
pub enum Error<E> {
    /// A synchronization packet reported address `0`
    AddressIsZero,
    /// A non-synchronization packet arrived before the first sync packet
    StartOfTrace,
    /// The walk stopped at a reported address with branch-map bits left over
    UnprocessedBranches(NonZeroU8),
    /// Rule 4 (uninferrable discontinuity) fired while stopped at the last branch
    UnexpectedUninferableDiscon,
    /// A branch instruction needed a bit but the branch map was empty
    UnresolvableBranch,
    /// The walk kept going past `stop_at_last_branch` without reaching it
    WalkedPastLastBranch,
    /// The `ENDED_NTR` forward walk exceeded [`MAX_NTR_WALK_STEPS`]
    NtrWalkBudgetExceeded,
    /// The host-provided [`Binary`] could not fetch an instruction
    CannotGetInstruction(E, u64),
}

impl<E> fmt::Display for Error<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AddressIsZero => write!(f, "synchronization packet reported address zero"),
            Self::StartOfTrace => write!(f, "expected a synchronization packet first"),
            Self::UnprocessedBranches(count) => {
                write!(f, "{count} unprocessed branch(es) left at stop")
            }
            Self::UnexpectedUninferableDiscon => {
                write!(f, "uninferrable discontinuity while stopped at last branch")
            }
            Self::UnresolvableBranch => write!(f, "branch map depleted"),
            Self::WalkedPastLastBranch => write!(f, "walked past the last pending branch"),
            Self::NtrWalkBudgetExceeded => {
                write!(f, "ENDED_NTR forward walk exceeded its step budget")
            }
            Self::CannotGetInstruction(_, address) => {
                write!(f, "cannot fetch instruction at {address:#x}")
            }
        }
    }
}

impl<E> core::error::Error for Error<E>
where
    E: fmt::Debug + core::error::Error + 'static,
{
    fn source(&self) -> Option<&(dyn core::error::Error + 'static)> {
        match self {
            Self::CannotGetInstruction(inner, _) => Some(inner),
            _ => None,
        }
    }
}

/// Sink for retired execution reported by a [`Tracer`]
///
/// All methods default to doing nothing, so a host only implements the
/// hooks it cares about. This is the only reporting surface the crate
/// offers: there is no logging facade, since a host can build whatever
/// logging it wants on top of these calls.
pub trait ReportTrace {
    /// One PC transition. `old_pc` is `None` only for the very first
    /// retirement of a session, replacing a magic sentinel address.
    fn report_pc(&mut self, _old_pc: Option<u64>, _new_pc: u64) {}
    /// The instruction retired at `pc`. May be called more than once for
    /// the same address across a session.
    fn report_instr(&mut self, _pc: u64, _instr: Instruction) {}
    /// A branch at `pc` was resolved to `taken`
    fn report_branch(&mut self, _pc: u64, _taken: bool) {}
}

impl ReportTrace for () {}

fn msb(address: u64, width: NonZeroU8) -> bool {
    (address >> (width.get() - 1)) & 1 != 0
}

/// A decoder session for a single traced hart
pub struct Tracer<B: Binary, R: ReturnStack, T: ReportTrace> {
    binary: B,
    state: State<R>,
    params: Parameters,
    reporter: T,
}

impl<B: Binary, R: ReturnStack, T: ReportTrace> Tracer<B, R, T> {
    /// Construct a new session
    ///
    /// Returns `None` if `R` cannot provide the return-stack depth implied
    /// by `params.call_counter_width`.
    pub fn new(binary: B, params: Parameters, reporter: T) -> Option<Self> {
        let return_stack = R::new(params.return_stack_depth())?;
        Some(Self {
            binary,
            state: State::new(return_stack),
            params,
            reporter,
        })
    }

    /// Current reconstructed PC, if tracing has started
    pub fn current_pc(&self) -> Option<u64> {
        self.state.pc()
    }

    /// Current return-stack depth (`call_counter`)
    pub fn call_depth(&self) -> usize {
        self.state.call_depth()
    }

    /// Consume the session, returning the wrapped binary and reporter
    pub fn into_parts(self) -> (B, T) {
        (self.binary, self.reporter)
    }

    /// Process one `te_inst` packet
    pub fn process_te_inst(&mut self, payload: &Payload) -> Result<(), Error<B::Error>> {
        match payload {
            Payload::Synchronization(sync) => self.process_sync(sync),
            Payload::Branch(branch) => self.process_branch(branch),
        }
    }

    /// Process one `te_support` qualification packet
    pub fn process_te_support(&mut self, support: &Support) -> Result<(), Error<B::Error>> {
        self.process_support(support)
    }

    fn process_sync(&mut self, sync: &Synchronization) -> Result<(), Error<B::Error>> {
        if let Synchronization::Context(ctx) = sync {
            self.state.set_context(*ctx);
            return Ok(());
        }
        if let Synchronization::Support(support) = sync {
            return self.process_support(support);
        }

        let raw_address = match sync {
            Synchronization::Start(s) => s.address,
            Synchronization::Trap(t) => t.address,
            Synchronization::Context(_) | Synchronization::Support(_) => unreachable!(),
        };

        self.state.clear_inferred_address();
        let address = raw_address << self.params.iaddress_lsb;
        if address == 0 {
            return Err(Error::AddressIsZero);
        }
        self.state.set_address(address);

        let is_trap = matches!(sync, Synchronization::Trap(_));
        if is_trap || self.state.start_of_trace() {
            self.state.clear_branch_map();
        }

        let branch_not_taken = sync
            .branch_not_taken()
            .expect("Start and Trap always report a branch flag");
        if self
            .binary
            .get_insn(address)
            .map_err(|e| Error::CannotGetInstruction(e, address))?
            .is_branch()
        {
            self.state.branch_map_mut().push_branch_taken(!branch_not_taken);
        }

        if matches!(sync, Synchronization::Start(_)) && !self.state.start_of_trace() {
            self.follow_execution_path(address, true, None)?;
        } else {
            let old_pc = self.state.set_pc_direct(address);
            self.reporter.report_pc(old_pc, address);
        }

        if let Some(ctx) = sync.context() {
            self.state.set_context(ctx);
        }
        self.state.clear_start_of_trace();
        self.state.reset_call_depth();

        Ok(())
    }

    fn process_branch(&mut self, branch: &Branch) -> Result<(), Error<B::Error>> {
        if self.state.start_of_trace() {
            return Err(Error::StartOfTrace);
        }

        let mut updiscon = None;
        if let Some(info) = branch.address {
            self.state.set_stop_at_last_branch(false);
            updiscon = Some((info.updiscon, info.address));
            match self.params.address_mode() {
                AddressMode::Full => self.state.set_address(info.address as u64),
                AddressMode::Delta => {
                    self.state.add_address(info.address << self.params.iaddress_lsb)
                }
            }
        }

        if let Format::One = branch.format {
            self.state.set_stop_at_last_branch(branch.branches == 0);
            let count = if branch.branches == 0 { 31 } else { branch.branches };
            self.state
                .branch_map_mut()
                .append(crate::types::branch::Map::new(count, branch.branch_map));
        }

        self.follow_execution_path(self.state.address(), false, updiscon)
    }

    fn process_support(&mut self, support: &Support) -> Result<(), Error<B::Error>> {
        match support.qual_status {
            QualStatus::NoChange | QualStatus::TraceLost => {}
            QualStatus::EndedRep => self.state.set_start_of_trace(true),
            QualStatus::EndedNtr => {
                if let Some(resume_pc) = self.state.inferred_address() {
                    self.state.clear_inferred_address();
                    self.walk_until_revisit(resume_pc)?;
                }
                self.state.set_start_of_trace(true);
            }
        }
        Ok(())
    }

    /// Walk forward with no reported address, until `pc` revisits `target`
    ///
    /// Grounds the `ENDED_NTR` forward walk: since there is no packet
    /// address to resolve an uninferrable discontinuity against, the last
    /// known `address` is used as a fallback.
    fn walk_until_revisit(&mut self, target: u64) -> Result<(), Error<B::Error>> {
        let fallback_address = self.state.address();
        for _ in 0..MAX_NTR_WALK_STEPS {
            let event = self
                .state
                .step(&mut self.binary, &self.params.features, fallback_address)?;
            self.reporter.report_pc(Some(event.old_pc), event.new_pc);
            self.reporter.report_instr(event.old_pc, event.insn);
            if let Some(taken) = event.branch_taken {
                self.reporter.report_branch(event.old_pc, taken);
            }
            if event.new_pc == target {
                return Ok(());
            }
        }
        Err(Error::NtrWalkBudgetExceeded)
    }

    /// Drive the Path Follower until one of spec's stopping conditions fires
    ///
    /// `updiscon`, when present, pairs the packet's updiscon bit with the
    /// raw (pre-accumulation) address field it was reported against, used
    /// only for the ambiguous-match check.
    fn follow_execution_path(
        &mut self,
        address: u64,
        is_sync: bool,
        updiscon: Option<(bool, i64)>,
    ) -> Result<(), Error<B::Error>> {
        loop {
            let reported_address = self.state.inferred_address().unwrap_or(address);
            let event = self
                .state
                .step(&mut self.binary, &self.params.features, reported_address)?;
            self.reporter.report_pc(Some(event.old_pc), event.new_pc);
            self.reporter.report_instr(event.old_pc, event.insn);
            if let Some(taken) = event.branch_taken {
                self.reporter.report_branch(event.old_pc, taken);
            }

            if self.state.stop_at_last_branch() && self.state.branch_map().count() == 0 {
                return Err(Error::WalkedPastLastBranch);
            }

            if let Some(pending) = self.state.inferred_address() {
                if event.new_pc == pending {
                    self.state.clear_inferred_address();
                }
                continue;
            }

            let next_is_branch = self
                .binary
                .get_insn(event.new_pc)
                .map_err(|e| Error::CannotGetInstruction(e, event.new_pc))?
                .is_branch();
            let branch_limit = u8::from(next_is_branch);

            if self.state.branch_map().count() == 1
                && next_is_branch
                && self.state.stop_at_last_branch()
            {
                self.state.set_stop_at_last_branch(false);
                return Ok(());
            }

            let previous_was_uninferable_discon = self
                .binary
                .get_insn(event.old_pc)
                .map_err(|e| Error::CannotGetInstruction(e, event.old_pc))?
                .is_uninferable_discon();

            if event.new_pc == address && previous_was_uninferable_discon {
                if self.state.branch_map().count() > branch_limit {
                    let count = NonZeroU8::new(self.state.branch_map().count())
                        .expect("count > branch_limit >= 0 implies count > 0");
                    return Err(Error::UnprocessedBranches(count));
                }
                return Ok(());
            }

            if let Some((updiscon, raw_address)) = updiscon {
                if !is_sync
                    && event.new_pc == address
                    && updiscon == msb(raw_address as u64, self.params.address_width)
                    && self.state.branch_map().count() == branch_limit
                {
                    self.state.set_inferred_address(event.new_pc);
                    return Ok(());
                }
            }

            if is_sync
                && event.new_pc == address
                && self.state.branch_map().count() == branch_limit
            {
                return Ok(());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Features, Parameters, PARAMETERS};
    use crate::instruction::{format, Kind, Size};
    use crate::packet::{AddressInfo, Start};
    use crate::stack::StaticStack;
    use crate::types::Context;

    #[derive(Default)]
    struct Recorder {
        transitions: Vec<(Option<u64>, u64)>,
    }

    impl ReportTrace for Recorder {
        fn report_pc(&mut self, old_pc: Option<u64>, new_pc: u64) {
            self.transitions.push((old_pc, new_pc));
        }
    }

    fn params() -> Parameters {
        Parameters {
            call_counter_width: 2,
            iaddress_lsb: 0,
            features: Features {
                sequentially_inferred_jumps: true,
                implicit_returns: true,
            },
            ..PARAMETERS
        }
    }

    fn tracer_for(
        table: &'static [(u64, Instruction)],
    ) -> Tracer<&'static [(u64, Instruction)], StaticStack<16>, Recorder> {
        Tracer::new(table, params(), Recorder::default()).unwrap()
    }

    fn start_payload(address: u64) -> Payload {
        Payload::Synchronization(Synchronization::Start(Start {
            branch: true,
            ctx: Context::default(),
            address,
        }))
    }

    #[test]
    fn first_sync_packet_retires_from_sentinel() {
        static TABLE: &[(u64, Instruction)] = &[(0x1000, Instruction { size: Size::Normal, kind: None })];
        let mut tracer = tracer_for(TABLE);

        tracer.process_te_inst(&start_payload(0x1000)).unwrap();

        assert_eq!(tracer.current_pc(), Some(0x1000));
        assert_eq!(tracer.call_depth(), 0);
        assert_eq!(tracer.into_parts().1.transitions, vec![(None, 0x1000)]);
    }

    #[test]
    fn branch_map_bits_are_drained_before_the_uninferable_jump_resolves() {
        static TABLE: &[(u64, Instruction)] = &[
            (0x1000, Instruction { size: Size::Normal, kind: Some(Kind::beq(format::TypeB { rs1: 1, rs2: 2, imm: 0x10 })) }),
            (0x1010, Instruction { size: Size::Normal, kind: Some(Kind::beq(format::TypeB { rs1: 1, rs2: 2, imm: 0x10 })) }),
            (0x1020, Instruction { size: Size::Normal, kind: Some(Kind::jalr(format::TypeI { rd: 0, rs1: 3, imm: 0 })) }),
            (0x3000, Instruction { size: Size::Normal, kind: None }),
        ];
        let mut tracer = tracer_for(TABLE);
        tracer.process_te_inst(&start_payload(0x1000)).unwrap();

        // Both branches taken (map bit 0), landing on the uninferable jalr;
        // its reported target closes the walk.
        let branch = Payload::Branch(Branch {
            format: Format::One,
            branches: 2,
            branch_map: 0,
            address: Some(AddressInfo { address: 0x2000, updiscon: false }),
        });
        tracer.process_te_inst(&branch).unwrap();

        assert_eq!(tracer.current_pc(), Some(0x3000));
    }

    #[test]
    fn implicit_return_pops_the_link_pushed_by_the_call() {
        static TABLE: &[(u64, Instruction)] = &[
            (0x1000, Instruction { size: Size::Normal, kind: Some(Kind::jal(format::TypeJ { rd: 1, imm: 0x40 })) }),
            (0x1004, Instruction { size: Size::Normal, kind: None }),
            (0x1040, Instruction { size: Size::Normal, kind: Some(Kind::jalr(format::TypeI { rd: 0, rs1: 1, imm: 0 })) }),
        ];
        let mut tracer = tracer_for(TABLE);
        tracer.process_te_inst(&start_payload(0x1000)).unwrap();

        // The call (0x1000) and its implicit return (0x1040) both resolve
        // without needing a pending branch; the reported address matches
        // where the return lands.
        let branch = Payload::Branch(Branch {
            format: Format::Two,
            branches: 0,
            branch_map: 0,
            address: Some(AddressInfo { address: 4, updiscon: false }),
        });
        tracer.process_te_inst(&branch).unwrap();

        assert_eq!(tracer.current_pc(), Some(0x1004));
        assert_eq!(tracer.call_depth(), 0);
    }

    #[test]
    fn sequential_jump_idiom_needs_no_reported_address() {
        static TABLE: &[(u64, Instruction)] = &[
            (0x2000, Instruction { size: Size::Normal, kind: Some(Kind::lui(format::TypeU { rd: 5, imm: 0x2000 })) }),
            (0x2004, Instruction { size: Size::Normal, kind: Some(Kind::jalr(format::TypeI { rd: 0, rs1: 5, imm: 0x100 })) }),
            (0x2100, Instruction { size: Size::Normal, kind: None }),
        ];
        let mut tracer = tracer_for(TABLE);
        tracer.process_te_inst(&start_payload(0x2000)).unwrap();

        let branch = Payload::Branch(Branch {
            format: Format::Two,
            branches: 0,
            branch_map: 0,
            address: Some(AddressInfo { address: 0x100, updiscon: false }),
        });
        tracer.process_te_inst(&branch).unwrap();

        assert_eq!(tracer.current_pc(), Some(0x2100));
    }

    #[test]
    fn inferred_address_phase_resumes_against_the_pending_target() {
        static TABLE: &[(u64, Instruction)] = &[
            (0x1000, Instruction { size: Size::Normal, kind: Some(Kind::jalr(format::TypeI { rd: 0, rs1: 9, imm: 0 })) }),
            (0x2000, Instruction { size: Size::Normal, kind: Some(Kind::jalr(format::TypeI { rd: 0, rs1: 10, imm: 0 })) }),
            (0x3000, Instruction { size: Size::Normal, kind: None }),
        ];
        let mut tracer = tracer_for(TABLE);
        tracer.state.set_pc_direct(0x1000);
        tracer.state.set_inferred_address(0x2000);

        // The first uninferrable jump must resolve against the still-pending
        // 0x2000, not the outer 0x3000; only the second jump, once the
        // pending address has been revisited, resolves against 0x3000.
        tracer.follow_execution_path(0x3000, false, None).unwrap();

        assert_eq!(tracer.current_pc(), Some(0x3000));
    }

    #[test]
    fn ambiguous_match_checks_updiscon_against_the_raw_packet_address() {
        static TABLE: &[(u64, Instruction)] = &[
            (0x8000_0000_0000_0000, Instruction { size: Size::Normal, kind: None }),
            (0x8000_0000_0000_0004, Instruction { size: Size::Normal, kind: None }),
        ];
        let mut tracer = tracer_for(TABLE);
        tracer.process_te_inst(&start_payload(0x8000_0000_0000_0000)).unwrap();

        // The accumulated address has its top bit set, but the packet's raw
        // delta (4) does not; `updiscon` must be checked against the raw
        // field, not the reconstructed address, or this never matches.
        let branch = Payload::Branch(Branch {
            format: Format::Two,
            branches: 0,
            branch_map: 0,
            address: Some(AddressInfo { address: 4, updiscon: false }),
        });
        tracer.process_te_inst(&branch).unwrap();

        assert_eq!(tracer.current_pc(), Some(0x8000_0000_0000_0004));
    }

    #[test]
    fn overflow_of_return_stack_keeps_newest_links() {
        let mut stack = StaticStack::<4>::new(4).unwrap();
        for link in [0xA0u64, 0xA1, 0xA2, 0xA3, 0xA4] {
            stack.push(link);
        }
        assert_eq!(stack.pop(), Some(0xA4));
        assert_eq!(stack.pop(), Some(0xA3));
        assert_eq!(stack.pop(), Some(0xA2));
        assert_eq!(stack.pop(), Some(0xA1));
        assert_eq!(stack.pop(), None);
    }

    #[test]
    fn branch_before_first_sync_is_an_error() {
        static TABLE: &[(u64, Instruction)] = &[];
        let mut tracer = tracer_for(TABLE);
        let branch = Payload::Branch(Branch { format: Format::Zero, branches: 0, branch_map: 0, address: None });
        assert_eq!(tracer.process_te_inst(&branch), Err(Error::StartOfTrace));
    }

    #[test]
    fn sync_with_zero_address_is_an_error() {
        static TABLE: &[(u64, Instruction)] = &[];
        let mut tracer = tracer_for(TABLE);
        assert_eq!(
            tracer.process_te_inst(&start_payload(0)),
            Err(Error::AddressIsZero)
        );
    }
}
