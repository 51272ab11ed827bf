// Copyright (C) 2025 FZI Forschungszentrum Informatik
// SPDX-License-Identifier: Apache-2.0
//! Instruction memory access
//!
//! The decoder never reads instruction bytes itself: it asks a host-provided
//! [`Binary`] for them. This keeps the crate ignorant of where the traced
//! program's image actually lives (a live target over JTAG, an ELF file on
//! disk, a flat memory dump, ...).

pub mod basic;
pub mod error;

#[cfg(feature = "elf")]
pub mod elf;

use crate::instruction::Instruction;
pub use error::NoInstruction;

/// A binary of some sort that contains [`Instruction`]s
pub trait Binary {
    /// Error type returned by [`get_insn`][Self::get_insn]
    type Error;

    /// Retrieve the [`Instruction`] at the given address
    fn get_insn(&mut self, address: u64) -> Result<Instruction, Self::Error>;
}

impl<F: FnMut(u64) -> Result<Instruction, E>, E> Binary for F {
    type Error = E;

    fn get_insn(&mut self, address: u64) -> Result<Instruction, Self::Error> {
        self(address)
    }
}

/// [`Binary`] implementation for a slice sorted by address
impl Binary for &[(u64, Instruction)] {
    type Error = NoInstruction;

    fn get_insn(&mut self, address: u64) -> Result<Instruction, Self::Error> {
        self.binary_search_by_key(&address, |(a, _)| *a)
            .map(|i| self[i].1)
            .map_err(|_| NoInstruction)
    }
}

/// A [`Binary`] that does not contain any [`Instruction`]s
#[derive(Copy, Clone, Default, Debug)]
pub struct Empty;

impl Binary for Empty {
    type Error = NoInstruction;

    fn get_insn(&mut self, _: u64) -> Result<Instruction, Self::Error> {
        Err(NoInstruction)
    }
}

/// A [`Binary`] that applies a fixed offset before delegating to another
#[derive(Copy, Clone, Debug)]
pub struct Offset<B> {
    inner: B,
    offset: i64,
}

impl<B> Offset<B> {
    /// Wrap `inner`, subtracting `offset` from every requested address
    /// before delegating
    pub fn new(inner: B, offset: i64) -> Self {
        Self { inner, offset }
    }
}

impl<B: Binary> Binary for Offset<B> {
    type Error = B::Error;

    fn get_insn(&mut self, address: u64) -> Result<Instruction, Self::Error> {
        self.inner.get_insn(address.wrapping_add_signed(-self.offset))
    }
}

#[cfg(feature = "alloc")]
impl<B: Binary + ?Sized> Binary for alloc::boxed::Box<B> {
    type Error = B::Error;

    fn get_insn(&mut self, address: u64) -> Result<Instruction, Self::Error> {
        (**self).get_insn(address)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instruction::{Bits, Size};

    #[test]
    fn empty_always_errors() {
        let mut binary = Empty;
        assert_eq!(binary.get_insn(0x1000), Err(NoInstruction));
    }

    #[test]
    fn closures_implement_binary() {
        let mut binary = |addr: u64| {
            (addr == 0x1000)
                .then(|| Instruction::from(Bits::Bit16(0)))
                .ok_or(NoInstruction)
        };
        assert!(binary.get_insn(0x1000).is_ok());
        assert!(binary.get_insn(0x2000).is_err());
    }

    #[test]
    fn slice_binary_requires_sorted_order() {
        let table: &[(u64, Instruction)] = &[
            (0x1000, Instruction { size: Size::Normal, kind: None }),
            (0x1004, Instruction { size: Size::Compressed, kind: None }),
        ];
        let mut binary = table;
        assert_eq!(binary.get_insn(0x1004).unwrap().size, Size::Compressed);
        assert!(binary.get_insn(0x2000).is_err());
    }

    #[test]
    fn offset_shifts_requested_address() {
        let mut binary = Offset::new(
            |addr: u64| {
                (addr == 0x1000)
                    .then(|| Instruction::from(Bits::Bit16(0)))
                    .ok_or(NoInstruction)
            },
            0x4000,
        );
        assert!(binary.get_insn(0x5000).is_ok());
    }
}
