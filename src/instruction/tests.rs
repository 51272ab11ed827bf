// Copyright (C) 2025 FZI Forschungszentrum Informatik
// SPDX-License-Identifier: Apache-2.0

use super::*;

#[test]
fn extract_selects_compressed_for_low_two_bits_not_eleven() {
    let data = [0x01, 0x00, 0xff, 0xff];
    let (bits, rest) = Bits::extract(&data).unwrap();
    assert_eq!(bits, Bits::Bit16(0x0001));
    assert_eq!(rest, &[0xff, 0xff]);
}

#[test]
fn extract_selects_normal_for_low_bits_eleven() {
    // jal x1, 4 -> 0x0040_00ef
    let data = 0x0040_00efu32.to_le_bytes();
    let (bits, rest) = Bits::extract(&data).unwrap();
    assert_eq!(bits, Bits::Bit32(0x0040_00ef));
    assert!(rest.is_empty());
}

#[test]
fn decode_jal_is_inferable_call() {
    let insn = Instruction::from(Bits::Bit32(0x0040_00ef));
    assert_eq!(insn.size, Size::Normal);
    let kind = insn.kind.unwrap();
    assert_eq!(kind.inferable_jump_target(), Some(4));
    assert!(kind.is_call());
    assert!(!kind.is_uninferable_discon());
}

#[test]
fn decode_jalr_ra_zero_is_return() {
    // jalr x0, 0(x1) -> ret
    let insn: u32 = 0x0000_8067;
    let kind = Kind::decode_32(insn).unwrap();
    assert!(kind.is_return());
    assert!(kind.uninferable_jump().is_some());
}

#[test]
fn decode_jalr_with_zero_source_is_inferable() {
    // jalr x1, 0(x0)
    let insn: u32 = 0x0000_00e7;
    let kind = Kind::decode_32(insn).unwrap();
    assert_eq!(kind.inferable_jump_target(), Some(0));
    assert!(kind.uninferable_jump().is_none());
}

#[test]
fn decode_branch_extracts_offset() {
    // beq x0, x0, 0
    let insn: u32 = 0x0000_0063;
    let kind = Kind::decode_32(insn).unwrap();
    assert_eq!(kind.branch_target(), Some(0));
    assert!(kind.is_branch());
}

#[test]
fn decode_auipc_gives_upper_immediate_relative_to_pc() {
    // auipc x1, 0x1
    let insn: u32 = 0x0000_1097;
    let kind = Kind::decode_32(insn).unwrap();
    let (reg, value) = kind.upper_immediate(0x1000).unwrap();
    assert_eq!(reg, 1);
    assert_eq!(value, 0x1000 + 0x1000);
}

#[test]
fn decode_mret_is_return_from_trap() {
    let insn: u32 = 0x3020_0073;
    let kind = Kind::decode_32(insn).unwrap();
    assert!(kind.is_return_from_trap());
    assert!(kind.is_uninferable_discon());
}

#[test]
fn decode_compressed_jr_ra_is_return() {
    // c.jr x1 -> 0x8082
    let kind = Kind::decode_16(0x8082).unwrap();
    assert!(kind.is_return());
}

#[test]
fn unknown_opcode_decodes_to_none() {
    // a `sw` (store), not relevant to tracing
    let insn: u32 = 0x0010_a023;
    assert!(Kind::decode_32(insn).is_none());
}
