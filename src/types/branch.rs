// Copyright (C) 2025 FZI Forschungszentrum Informatik
// SPDX-License-Identifier: Apache-2.0
//! Branch map utilities

/// A record of branches that are taken or not taken
///
/// Branches are recorded oldest-first in the low bits of `map`: a set bit
/// means the branch was not taken, an unset bit means it was taken, matching
/// the wire encoding of the `branch-map` field.
#[derive(Copy, Clone, Default, Debug, Eq, PartialEq)]
pub struct Map {
    count: u8,
    map: u64,
}

impl Map {
    /// Maximum number of branches a branch map can hold.
    pub const MAX_BRANCHES: u32 = u64::BITS;

    /// Create a new branch map from a raw count and bit pattern
    pub fn new(count: u8, map: u64) -> Self {
        Self { count, map }
    }

    /// Remove the oldest branch information and return whether it was taken
    pub fn pop_taken(&mut self) -> Option<bool> {
        let count = self.count.checked_sub(1)?;
        let taken = self.map & 1 == 0;

        self.map >>= 1;
        self.count = count;

        Some(taken)
    }

    /// Push new branch information
    pub fn push_branch_taken(&mut self, taken: bool) {
        let count = self.count;
        let bit = 1u64.checked_shl(count.into()).unwrap_or_default();
        self.map = if taken { self.map & !bit } else { self.map | bit };

        self.count = count.saturating_add(1);
    }

    /// Append another branch map to this one
    ///
    /// The branches from `other` are considered newer than the existing ones.
    pub fn append(&mut self, other: Self) {
        let count = self.count;
        self.map |= other.map.checked_shl(count.into()).unwrap_or_default();
        self.count = count.saturating_add(other.count);
    }

    /// Number of unresolved branches in the map
    pub fn count(&self) -> u8 {
        self.count
    }

    /// Raw contents of the map
    ///
    /// The lowest valued bit corresponds to the oldest branch. Set bits
    /// represent branches not taken, unset bits represent taken branches.
    pub fn raw_map(&self) -> u64 {
        self.map
    }

    /// Whether there are no unresolved branches left
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }
}
