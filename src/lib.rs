// Copyright (C) 2025 FZI Forschungszentrum Informatik
// SPDX-License-Identifier: Apache-2.0
//! Reconstruct retired instruction PCs from RISC-V Efficient Trace packets
//!
//! This crate implements the execution-path-following side of the RISC-V
//! Efficient Trace specification: given a sequence of `te_inst`/`te_support`
//! packets, a read-only view of the traced program's instructions
//! ([`binary::Binary`]), and the discovery [`config::Parameters`] negotiated
//! out of band, it drives a [`tracer::Tracer`] that reports every retired PC
//! through a host-supplied [`tracer::ReportTrace`] sink. Wire-level bit
//! decoding of packets themselves is out of scope; [`packet`] models the
//! logical payload a transport layer is expected to already have parsed.
#![no_std]

#[cfg(feature = "alloc")]
extern crate alloc;

pub mod binary;
pub mod config;
pub mod instruction;
pub mod oracle;
pub mod packet;
pub mod resolver;
pub mod stack;
pub mod tracer;
pub mod types;

pub use binary::Binary;
pub use instruction::Instruction;
pub use tracer::{ReportTrace, Tracer};
