// Copyright (C) 2025 FZI Forschungszentrum Informatik
// SPDX-License-Identifier: Apache-2.0
//! Errors for built-in [`Binary`][super::Binary] implementations

use core::fmt;

/// An error type expressing simple absence of an [`Instruction`][crate::instruction::Instruction]
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct NoInstruction;

impl core::error::Error for NoInstruction {}

impl fmt::Display for NoInstruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "no instruction available")
    }
}

/// Errors that can occur when reading from a segment-backed [`Binary`][super::Binary]
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum SegmentError {
    /// The requested address is not covered by any known segment
    AddressNotCovered,
    /// The segment did not contain enough bytes to decode an instruction
    Truncated,
}

impl core::error::Error for SegmentError {}

impl fmt::Display for SegmentError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AddressNotCovered => write!(f, "address is not covered by any segment"),
            Self::Truncated => write!(f, "not enough bytes remain to decode an instruction"),
        }
    }
}
