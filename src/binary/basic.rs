// Copyright (C) 2025 FZI Forschungszentrum Informatik
// SPDX-License-Identifier: Apache-2.0
//! Simple, self-contained [`Binary`] implementations

use crate::instruction::{Bits, Instruction};

use super::error::SegmentError;
use super::Binary;

/// A flat, contiguous segment of instruction memory
///
/// The simplest possible [`Binary`]: a byte slice plus the address its first
/// byte is loaded at. Useful for tests and for tracing small, single-segment
/// binaries without pulling in the `elf` feature.
#[derive(Copy, Clone, Debug)]
pub struct Segment<'d> {
    base: u64,
    data: &'d [u8],
}

impl<'d> Segment<'d> {
    /// Create a segment of `data` loaded starting at `base`
    pub fn new(base: u64, data: &'d [u8]) -> Self {
        Self { base, data }
    }

    /// Whether `address` falls within this segment
    pub fn contains(&self, address: u64) -> bool {
        let Some(offset) = address.checked_sub(self.base) else {
            return false;
        };
        offset < self.data.len() as u64
    }
}

impl Binary for Segment<'_> {
    type Error = SegmentError;

    fn get_insn(&mut self, address: u64) -> Result<Instruction, Self::Error> {
        let offset = address
            .checked_sub(self.base)
            .ok_or(SegmentError::AddressNotCovered)?;
        let offset = usize::try_from(offset).map_err(|_| SegmentError::AddressNotCovered)?;
        let data = self
            .data
            .get(offset..)
            .ok_or(SegmentError::AddressNotCovered)?;

        let (bits, _) = Bits::extract(data).ok_or(SegmentError::Truncated)?;
        Ok(bits.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn segment_contains_checks_bounds() {
        let data = [0u8; 8];
        let segment = Segment::new(0x1000, &data);
        assert!(segment.contains(0x1000));
        assert!(segment.contains(0x1007));
        assert!(!segment.contains(0x1008));
        assert!(!segment.contains(0x0fff));
    }

    #[test]
    fn segment_decodes_instruction_at_offset() {
        let mut data = [0u8; 8];
        data[4..8].copy_from_slice(&0x0040_00efu32.to_le_bytes());
        let mut segment = Segment::new(0x1000, &data);

        let insn = segment.get_insn(0x1004).unwrap();
        assert_eq!(insn.kind.unwrap().inferable_jump_target(), Some(4));
    }

    #[test]
    fn segment_errors_outside_bounds() {
        let data = [0u8; 4];
        let mut segment = Segment::new(0x1000, &data);
        assert_eq!(segment.get_insn(0x2000), Err(SegmentError::AddressNotCovered));
    }
}
