// Copyright (C) 2025 FZI Forschungszentrum Informatik
// SPDX-License-Identifier: Apache-2.0
//! Cached instruction fetch
//!
//! Decoding every retired instruction from raw memory would make long traces
//! expensive to replay, since the same few addresses (loop bodies, hot
//! functions) are visited repeatedly. [`Oracle`] sits in front of a
//! [`Binary`] with a small direct-mapped cache, keyed on the address bits a
//! real trace encoder would use to discover `iaddress_lsb`/`cache_size_p`.

use crate::binary::Binary;
use crate::instruction::Instruction;

impl<B: Binary, const N: usize> Binary for Oracle<B, N>
where
    B::Error: Clone,
{
    type Error = B::Error;

    fn get_insn(&mut self, address: u64) -> Result<Instruction, Self::Error> {
        self.get_insn(address)
    }
}

/// A cache slot: the address it was last filled from, plus the decode result
#[derive(Copy, Clone, Debug)]
struct Slot<E> {
    address: u64,
    result: Result<Instruction, E>,
}

/// Instruction fetch cached by a direct-mapped table of `N` slots
///
/// `N` must be a power of two; the slot for `address` is
/// `(address >> iaddress_lsb) & (N - 1)`. Unlike a set-associative cache
/// there is no eviction policy to speak of: a collision simply overwrites
/// whatever was there, last writer wins. This mirrors how a trace decoder
/// models the discovery-time `cache_size_p` parameter, where the only
/// meaningful property is the effective hit rate, not any particular
/// replacement strategy.
pub struct Oracle<B: Binary, const N: usize> {
    binary: B,
    iaddress_lsb: u8,
    slots: [Option<Slot<B::Error>>; N],
    last: Option<(u64, Instruction)>,
    fetches: u64,
    same_as_last: u64,
    cache_hits: u64,
}

impl<B: Binary, const N: usize> Oracle<B, N>
where
    B::Error: Clone,
{
    /// Create a new oracle in front of `binary`
    ///
    /// `iaddress_lsb` is the number of low address bits to discard before
    /// hashing into the cache (compressed instructions are 2-byte aligned,
    /// so this is usually 1). Panics if `N` is not a power of two.
    pub fn new(binary: B, iaddress_lsb: u8) -> Self {
        assert!(N.is_power_of_two(), "oracle cache size must be a power of two");
        Self {
            binary,
            iaddress_lsb,
            slots: [const { None }; N],
            last: None,
            fetches: 0,
            same_as_last: 0,
            cache_hits: 0,
        }
    }

    fn slot_index(&self, address: u64) -> usize {
        ((address >> self.iaddress_lsb) as usize) & (N - 1)
    }

    /// Fetch and decode the instruction at `address`
    ///
    /// Repeated requests for the same address as the previous call are
    /// served without touching the cache at all; everything else is looked
    /// up by slot, falling through to the underlying [`Binary`] on a miss or
    /// a collision with a different address.
    pub fn get_insn(&mut self, address: u64) -> Result<Instruction, B::Error> {
        self.fetches += 1;

        if let Some((last_addr, last_insn)) = self.last {
            if last_addr == address {
                self.same_as_last += 1;
                return Ok(last_insn);
            }
        }

        let index = self.slot_index(address);
        if let Some(slot) = &self.slots[index] {
            if slot.address == address {
                self.cache_hits += 1;
                let result = slot.result.clone();
                if let Ok(insn) = result {
                    self.last = Some((address, insn));
                }
                return result;
            }
        }

        let result = self.binary.get_insn(address);
        self.slots[index] = Some(Slot {
            address,
            result: result.clone(),
        });
        if let Ok(insn) = result {
            self.last = Some((address, insn));
        }
        result
    }

    /// Total number of [`get_insn`][Self::get_insn] calls made so far
    pub fn fetches(&self) -> u64 {
        self.fetches
    }

    /// Number of fetches served without consulting the cache, because the
    /// address matched the immediately preceding fetch
    pub fn same_as_last(&self) -> u64 {
        self.same_as_last
    }

    /// Number of fetches served directly from the cache (excluding
    /// [`same_as_last`][Self::same_as_last] hits)
    pub fn cache_hits(&self) -> u64 {
        self.cache_hits
    }

    /// Consume the oracle, returning the wrapped [`Binary`]
    pub fn into_inner(self) -> B {
        self.binary
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::binary::NoInstruction;
    use crate::instruction::{Bits, Size};

    fn insn_at(addr: u64) -> Result<Instruction, NoInstruction> {
        // encode the address into the immediate-free `size` bit so distinct
        // addresses can be told apart in assertions
        if addr % 4 == 0 {
            Ok(Instruction { size: Size::Normal, kind: None })
        } else {
            Ok(Instruction { size: Size::Compressed, kind: None })
        }
    }

    #[test]
    fn repeated_same_address_skips_cache_entirely() {
        let mut oracle: Oracle<_, 4> = Oracle::new(insn_at, 1);
        oracle.get_insn(0x1000).unwrap();
        oracle.get_insn(0x1000).unwrap();
        oracle.get_insn(0x1000).unwrap();

        assert_eq!(oracle.fetches(), 3);
        assert_eq!(oracle.same_as_last(), 2);
        assert_eq!(oracle.cache_hits(), 0);
    }

    #[test]
    fn distinct_addresses_hit_cache_on_revisit() {
        let mut oracle: Oracle<_, 4> = Oracle::new(insn_at, 1);
        oracle.get_insn(0x1000).unwrap();
        oracle.get_insn(0x2000).unwrap();
        oracle.get_insn(0x1000).unwrap();

        assert_eq!(oracle.fetches(), 3);
        assert_eq!(oracle.same_as_last(), 0);
        assert_eq!(oracle.cache_hits(), 1);
    }

    #[test]
    fn colliding_addresses_overwrite_last_writer_wins() {
        // with N=2 and iaddress_lsb=1, addresses 0x1000 and 0x1008 collide
        let mut oracle: Oracle<_, 2> = Oracle::new(insn_at, 1);
        oracle.get_insn(0x1000).unwrap();
        oracle.get_insn(0x1008).unwrap();
        // 0x1000 was evicted by the collision, so this is a miss, not a hit
        oracle.get_insn(0x1000).unwrap();

        assert_eq!(oracle.fetches(), 3);
        assert_eq!(oracle.cache_hits(), 0);
    }

    #[test]
    #[should_panic]
    fn non_power_of_two_size_panics() {
        let _: Oracle<_, 3> = Oracle::new(insn_at, 1);
    }
}
