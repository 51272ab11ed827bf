// Copyright (C) 2025 FZI Forschungszentrum Informatik
// SPDX-License-Identifier: Apache-2.0
//! Logical trace packet payloads
//!
//! Wire framing of `te_inst`/`te_support` packets is a transport concern and
//! is not modeled here; these types are what a transport layer is expected
//! to hand the [`Tracer`][crate::tracer::Tracer] after already parsing the
//! bitstream. Field names and their meaning follow the trace specification's
//! packet layout directly.

use crate::types::{Context, TrapInfo};

/// An E-Trace instruction-trace payload (a `te_inst` packet)
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Payload {
    /// Formats 0, 1 and 2: an incremental update relative to the current
    /// decoder state
    Branch(Branch),
    /// Format 3: a self-contained resynchronization point
    Synchronization(Synchronization),
}

/// A format 0, 1 or 2 payload
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Branch {
    pub format: Format,
    /// Pending branch count (6 bit field); `0` is the "31 or depleted"
    /// sentinel, only meaningful for [`Format::One`]
    pub branches: u8,
    /// Pending branch-map bits, LSB is the earliest pending decision; only
    /// meaningful for [`Format::One`]
    pub branch_map: u64,
    /// Reported address, present whenever this packet updates `address`
    pub address: Option<AddressInfo>,
}

/// The incremental-packet format tag
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Format {
    Zero,
    One,
    Two,
}

/// Address information carried by a format 2 packet, or embedded in a
/// format 1 packet that also reports an address
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct AddressInfo {
    /// Differential instruction address, or absolute if full address mode
    /// is negotiated; always sign-extended, still in wire units (shifted
    /// left by `iaddress_lsb` by the tracer before use)
    pub address: i64,
    /// This packet reports the instruction following an uninferable
    /// discontinuity that is also the last instruction before a resync
    pub updiscon: bool,
}

/// A format 3 (resynchronization) payload
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Synchronization {
    /// Subformat 0: start of trace, or resynchronization
    Start(Start),
    /// Subformat 1: following an exception or interrupt
    Trap(Trap),
    /// Subformat 2: a context change with no other event to report
    Context(Context),
    /// Subformat 3: qualification/support information
    Support(Support),
}

impl Synchronization {
    /// Whether the reported address was reached via a taken branch
    ///
    /// `false` if the address is a taken-branch target, `true` if the
    /// branch was not taken or the instruction is not a branch. `None` for
    /// subformats that carry no address.
    pub fn branch_not_taken(&self) -> Option<bool> {
        match self {
            Self::Start(s) => Some(s.branch),
            Self::Trap(t) => Some(t.branch),
            _ => None,
        }
    }

    /// The execution [`Context`] carried by this payload, if any
    pub fn context(&self) -> Option<Context> {
        match self {
            Self::Start(s) => Some(s.ctx),
            Self::Trap(t) => Some(t.ctx),
            Self::Context(c) => Some(*c),
            Self::Support(_) => None,
        }
    }
}

/// Format 3, subformat 0: start of trace / resynchronization
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Start {
    /// `false` if the address is a taken branch, `true` otherwise
    pub branch: bool,
    pub ctx: Context,
    /// Absolute address of the instruction, still in wire units (shifted
    /// left by `iaddress_lsb` by the tracer before use)
    pub address: u64,
}

/// Format 3, subformat 1: trap entry/exit
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Trap {
    /// `false` if the address is a taken branch, `true` otherwise
    pub branch: bool,
    pub ctx: Context,
    /// Whether `address` points at the trap handler rather than the
    /// faulting instruction's EPC
    pub thaddr: bool,
    /// Absolute address of the instruction, still in wire units (shifted
    /// left by `iaddress_lsb` by the tracer before use)
    pub address: u64,
    pub info: TrapInfo,
}

/// Format 3, subformat 3: qualification/support information (`te_support`)
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct Support {
    pub ienable: bool,
    pub qual_status: QualStatus,
    pub denable: bool,
    pub dloss: bool,
}

/// Change in filter qualification status carried by a [`Support`] packet
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum QualStatus {
    #[default]
    NoChange,
    /// Qualification ended; the preceding packet was the last qualified
    /// instruction
    EndedRep,
    /// One or more instruction trace packets were lost
    TraceLost,
    /// Qualification ended at a point that would have produced a packet
    /// anyway (an uninferable discontinuity), even though it was not the
    /// last qualified instruction
    EndedNtr,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn synchronization_branch_not_taken_only_for_start_and_trap() {
        let ctx = Context::default();
        let start = Synchronization::Start(Start { branch: true, ctx, address: 0x1000 });
        assert_eq!(start.branch_not_taken(), Some(true));

        let support = Synchronization::Support(Support::default());
        assert_eq!(support.branch_not_taken(), None);
    }

    #[test]
    fn synchronization_context_available_from_start_trap_and_context() {
        let ctx = Context { context: 7, ..Context::default() };
        let c = Synchronization::Context(ctx);
        assert_eq!(c.context(), Some(ctx));

        let support = Synchronization::Support(Support::default());
        assert_eq!(support.context(), None);
    }
}
