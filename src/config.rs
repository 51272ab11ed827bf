// Copyright (C) 2025 FZI Forschungszentrum Informatik
// SPDX-License-Identifier: Apache-2.0
//! Decoder configuration
//!
//! The trace specification negotiates a handful of parameters ("discovery
//! parameters") out of band before tracing starts. This module turns those
//! into plain, immutable data rather than process-wide constants, so that a
//! host can run decoders for several harts (each potentially discovered with
//! different parameters) side by side.

#[cfg(feature = "serde")]
mod serde_utils;

use core::fmt;
use core::num::NonZeroU8;

/// Discovery parameters for a single traced hart
///
/// These are exactly the values a host is expected to obtain via discovery
/// (or from a `te_support` packet) before constructing a [`Tracer`][crate::tracer::Tracer].
///
/// # Serde
///
/// If the `serde` feature is enabled, this type supports (de)serialization.
/// The `full_address` flag and the flags in [`Features`] are (de)serialized
/// to/from the numerical values `0` and `1`, in line with the specification.
#[derive(Copy, Clone, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Parameters {
    /// Width, in bits, of the call counter (determines return stack depth:
    /// `2^(call_counter_width + 2)`)
    pub call_counter_width: u8,
    /// Number of bits by which reported addresses are left-shifted, i.e. the
    /// number of low-order address bits implied to be zero (`1` if compressed
    /// instructions are supported)
    pub iaddress_lsb: u8,
    /// Width, in bits, of the instruction address bus
    pub address_width: NonZeroU8,
    /// log2 of the number of slots in the instruction decode cache
    pub cache_size: u8,
    /// Whether addresses are reported as absolute ([`AddressMode::Full`]) or
    /// relative to the previously reported address ([`AddressMode::Delta`])
    #[cfg_attr(feature = "serde", serde(with = "serde_utils::Flag"))]
    pub full_address: bool,
    /// Optional features negotiated for this hart
    pub features: Features,
}

impl Default for Parameters {
    fn default() -> Self {
        PARAMETERS
    }
}

/// See [`PARAMETERS`] for the default values of individual fields
pub const PARAMETERS: Parameters = Parameters {
    call_counter_width: 7,
    iaddress_lsb: 1,
    address_width: NonZeroU8::new(64).unwrap(),
    cache_size: 10,
    full_address: false,
    features: Features {
        sequentially_inferred_jumps: false,
        implicit_returns: false,
    },
};

impl Parameters {
    /// Address mode implied by [`full_address`][Self::full_address]
    pub fn address_mode(&self) -> AddressMode {
        AddressMode::from_full(self.full_address)
    }

    /// Maximum depth of the return stack implied by [`call_counter_width`][Self::call_counter_width]
    pub fn return_stack_depth(&self) -> usize {
        1usize << (self.call_counter_width as u32 + 2)
    }
}

/// Optional E-Trace feature selection
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Features {
    /// Sequentially inferred jumps
    ///
    /// Jumps with a target that depends on a register (other than the `zero`
    /// register) can not be inferred from the instruction alone. This flag
    /// being `true` indicates that those jumps are inferred if the jump is
    /// preceded directly by an `lui`, `c.lui` or `auipc` instruction
    /// initializing the register the jump target depends on.
    #[cfg_attr(feature = "serde", serde(with = "serde_utils::Flag"))]
    pub sequentially_inferred_jumps: bool,
    /// Implicit returns
    ///
    /// A value of `true` indicates that function returns may be inferred
    /// based on the assumption that the traced program is well-behaved and
    /// follows the common RISC-V calling conventions.
    #[cfg_attr(feature = "serde", serde(with = "serde_utils::Flag"))]
    pub implicit_returns: bool,
}

/// Address mode
#[derive(Copy, Clone, Default, Debug, PartialEq, Eq)]
pub enum AddressMode {
    /// Any address is assumed to be a full, absolute address
    Full,
    /// An address is assumed to be relative to the previously reported address
    #[default]
    Delta,
}

impl AddressMode {
    /// Create an address mode from a [`bool`] indicating full address mode
    pub const fn from_full(full: bool) -> Self {
        if full { Self::Full } else { Self::Delta }
    }
}

impl fmt::Display for AddressMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Full => write!(f, "full"),
            Self::Delta => write!(f, "delta"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn return_stack_depth_matches_spec_formula() {
        let params = Parameters {
            call_counter_width: 3,
            ..PARAMETERS
        };
        assert_eq!(params.return_stack_depth(), 1 << 5);
    }

    #[test]
    fn address_mode_from_full() {
        assert_eq!(AddressMode::from_full(true), AddressMode::Full);
        assert_eq!(AddressMode::from_full(false), AddressMode::Delta);
    }
}
