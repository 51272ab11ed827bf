// Copyright (C) 2025 FZI Forschungszentrum Informatik
// SPDX-License-Identifier: Apache-2.0
//! ELF-backed instruction memory
//!
//! Requires the `elf` feature. Mainly useful for demos and tests: it reads
//! straight out of executable `LOAD` segments of a parsed ELF file, with no
//! support for decompression or dynamic linking.

use core::fmt;

use elf::ElfBytes;
use elf::endian::EndianParse;

use crate::instruction::{Bits, Instruction};

use super::Binary;

/// [`Binary`] backed by the executable `LOAD` segments of an ELF file
pub struct Elf<'d, P: EndianParse> {
    elf: ElfBytes<'d, P>,
}

impl<'d, P: EndianParse> Elf<'d, P> {
    /// Create a new ELF-backed [`Binary`]
    ///
    /// Fails if the ELF file is not a little-endian RISC-V image.
    pub fn new(elf: ElfBytes<'d, P>) -> Result<Self, Error> {
        use elf::abi;

        if elf.ehdr.e_machine != abi::EM_RISCV {
            return Err(Error::UnsupportedArchitecture);
        }
        if !elf.ehdr.endianness.is_little() {
            return Err(Error::UnsupportedEndianness);
        }

        Ok(Self { elf })
    }
}

impl<P: EndianParse> Binary for Elf<'_, P> {
    type Error = Error;

    fn get_insn(&mut self, address: u64) -> Result<Instruction, Self::Error> {
        use elf::abi;

        let insn_data = self
            .elf
            .segments()
            .into_iter()
            .flat_map(|s| s.iter())
            .filter(|s| s.p_type == abi::PT_LOAD && s.p_flags & abi::PF_X != 0)
            .map(|s| {
                self.elf
                    .segment_data(&s)
                    .map(|d| (s.p_vaddr, d))
                    .map_err(Error::CouldNotRetrieveData)
            })
            .map(|s| {
                let (base, data) = s?;
                let Some(offset) = address.checked_sub(base) else {
                    return Ok(None);
                };
                let offset = usize::try_from(offset).map_err(Error::ExceededHostUSize)?;
                Ok(data
                    .split_at_checked(offset)
                    .filter(|(_, insn_data)| !insn_data.is_empty())
                    .map(|(_, insn_data)| insn_data))
            })
            .find_map(Result::transpose)
            .ok_or(Error::NoSegmentFound)??;

        let (bits, _) = Bits::extract(insn_data).ok_or(Error::InvalidInstruction)?;
        Ok(bits.into())
    }
}

/// Errors specific to [`Elf`]
#[derive(Debug)]
pub enum Error {
    /// No segment covers the requested address
    NoSegmentFound,
    /// The data for a segment could not be retrieved
    CouldNotRetrieveData(elf::parse::ParseError),
    /// An offset exceeds what can be represented as a host `usize`
    ExceededHostUSize(core::num::TryFromIntError),
    /// No valid instruction could be extracted from the segment data
    InvalidInstruction,
    /// The ELF file is not a RISC-V image
    UnsupportedArchitecture,
    /// The ELF file is not little-endian
    UnsupportedEndianness,
}

impl core::error::Error for Error {
    fn source(&self) -> Option<&(dyn core::error::Error + 'static)> {
        match self {
            Self::CouldNotRetrieveData(e) => Some(e),
            Self::ExceededHostUSize(e) => Some(e),
            _ => None,
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoSegmentFound => write!(f, "could not find a segment for the address"),
            Self::CouldNotRetrieveData(_) => write!(f, "could not retrieve data for segment"),
            Self::ExceededHostUSize(_) => {
                write!(f, "an offset exceeds what the host can represent")
            }
            Self::InvalidInstruction => write!(f, "no valid instruction at address"),
            Self::UnsupportedArchitecture => write!(f, "the target architecture is not RISC-V"),
            Self::UnsupportedEndianness => write!(f, "the target is not little-endian"),
        }
    }
}
