//! Opcode fingerprints.
//!
//! A fingerprint keeps one byte per decoded instruction: the primary opcode.
//! Operands, immediates and displacements are dropped, so the same library
//! routine linked at different addresses or built with different constants
//! still produces the same fingerprint. The hex form (two lowercase digits
//! per opcode) is the key format of the signature database.

use std::fmt;

use tracing::trace;

use crate::disasm::InstructionDecoder;
use crate::error::{LibIdentError, Result};

/// Opcode sequence of a function plus the branch count seen while building it.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Fingerprint {
    opcodes: Vec<u8>,
    hex: String,
    branches: u32,
}

impl Fingerprint {
    pub fn from_opcodes(opcodes: Vec<u8>, branches: u32) -> Self {
        let hex = hex::encode(&opcodes);
        Self {
            opcodes,
            hex,
            branches,
        }
    }

    /// Parse a signature key. Returns `None` for odd-length or non-hex keys.
    pub fn from_hex(key: &str) -> Option<Self> {
        let opcodes = hex::decode(key).ok()?;
        Some(Self::from_opcodes(opcodes, 0))
    }

    pub fn opcodes(&self) -> &[u8] {
        &self.opcodes
    }

    pub fn as_hex(&self) -> &str {
        &self.hex
    }

    /// Length in hex characters (two per instruction).
    pub fn hex_len(&self) -> usize {
        self.hex.len()
    }

    /// Number of decoded instructions.
    pub fn len(&self) -> usize {
        self.opcodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.opcodes.is_empty()
    }

    /// Branch instructions seen; always 0 unless branch counting was requested.
    pub fn branches(&self) -> u32 {
        self.branches
    }

    /// True when this fingerprint begins with the opcodes of `key`.
    pub fn starts_with_hex(&self, key: &str) -> bool {
        self.hex.starts_with(key)
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.hex)
    }
}

/// Builds fingerprints by streaming instructions through a decoder.
#[derive(Debug, Clone)]
pub struct Fingerprinter<D> {
    decoder: D,
}

impl<D: InstructionDecoder> Fingerprinter<D> {
    pub fn new(decoder: D) -> Self {
        Self { decoder }
    }

    pub fn decoder(&self) -> &D {
        &self.decoder
    }

    /// Decode `code[..max_len]` as if it were mapped at `ip`.
    ///
    /// Decoding stops at the first invalid or truncated instruction or when
    /// the window is exhausted. An empty fingerprint is a valid result; the
    /// only error is failing to reserve the output buffer.
    pub fn fingerprint(
        &self,
        code: &[u8],
        ip: u64,
        max_len: usize,
        count_branches: bool,
    ) -> Result<Fingerprint> {
        let window = &code[..max_len.min(code.len())];

        let mut opcodes = Vec::new();
        opcodes
            .try_reserve(window.len())
            .map_err(|_| LibIdentError::Allocation {
                requested: window.len(),
            })?;

        let mut branches = 0u32;
        let mut offset = 0usize;
        while offset < window.len() {
            let Some(ins) = self
                .decoder
                .decode(&window[offset..], ip.wrapping_add(offset as u64))
            else {
                break;
            };
            opcodes.push(ins.opcode);
            if count_branches && ins.branch.is_branch() {
                branches += 1;
            }
            offset += ins.length;
        }
        opcodes.shrink_to_fit();

        trace!(
            ip,
            instructions = opcodes.len(),
            branches,
            "fingerprinted window"
        );
        Ok(Fingerprint::from_opcodes(opcodes, branches))
    }
}
