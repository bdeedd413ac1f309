use iced_x86::{Decoder, DecoderOptions, EncodingKind, FlowControl, Instruction, OpKind};

use crate::disasm::{BranchKind, DecodedInstruction, InstructionDecoder};
use crate::error::{LibIdentError, Result};

/// iced-x86 backed decoder for 16/32/64-bit x86 code.
#[derive(Debug, Clone, Copy)]
pub struct IcedDecoder {
    bitness: u32,
}

impl IcedDecoder {
    pub fn new(bitness: u32) -> Result<Self> {
        if !matches!(bitness, 16 | 32 | 64) {
            return Err(LibIdentError::UnsupportedBitness(bitness));
        }
        Ok(Self { bitness })
    }

    fn branch_kind(instr: &Instruction) -> BranchKind {
        match instr.flow_control() {
            FlowControl::ConditionalBranch => BranchKind::Conditional,
            FlowControl::UnconditionalBranch | FlowControl::IndirectBranch => {
                BranchKind::Unconditional
            }
            FlowControl::Call | FlowControl::IndirectCall => BranchKind::Call,
            FlowControl::Return => BranchKind::Return,
            _ => BranchKind::None,
        }
    }

    /// Opcode byte as encoded in the instruction stream.
    ///
    /// Legacy-encoded instructions are read from their raw bytes: prefixes
    /// (and REX in 64-bit mode) are skipped, then the byte after any `0F`,
    /// `0F 38` or `0F 3A` escape is taken. This keeps the register field of
    /// `50+r`, `B8+r`, `0F C8+r` and friends. VEX, EVEX, XOP and 3DNow!
    /// forms fall back to iced's opcode value.
    fn primary_opcode(&self, raw: &[u8], instr: &Instruction) -> u8 {
        if instr.encoding() != EncodingKind::Legacy {
            return Self::table_opcode(instr);
        }
        let bytes = &raw[..instr.len().min(raw.len())];
        let mut i = 0;
        while let Some(&b) = bytes.get(i) {
            match b {
                0xF0 | 0xF2 | 0xF3 | 0x2E | 0x36 | 0x3E | 0x26 | 0x64 | 0x65 | 0x66 | 0x67 => {
                    i += 1
                }
                0x40..=0x4F if self.bitness == 64 => i += 1,
                _ => break,
            }
        }
        let opcode = match (bytes.get(i), bytes.get(i + 1)) {
            (Some(0x0F), Some(0x38 | 0x3A)) => bytes.get(i + 2),
            (Some(0x0F), next) => next,
            (first, _) => first,
        };
        opcode.copied().unwrap_or_else(|| Self::table_opcode(instr))
    }

    // iced reports multi-byte opcodes (e.g. `0F 01 D0`, `D9 C0+i`) as a
    // single value; the primary byte is the most significant one.
    fn table_opcode(instr: &Instruction) -> u8 {
        let info = instr.op_code();
        let value = info.op_code();
        match info.op_code_len() {
            2 => (value >> 8) as u8,
            _ => value as u8,
        }
    }
}

impl InstructionDecoder for IcedDecoder {
    fn decode(&self, code: &[u8], ip: u64) -> Option<DecodedInstruction> {
        if code.is_empty() {
            return None;
        }
        let mut decoder = Decoder::try_with_ip(self.bitness, code, ip, DecoderOptions::NONE).ok()?;
        let instr = decoder.decode();
        if instr.is_invalid() {
            return None;
        }

        let relative_target = match (instr.op_count(), instr.op0_kind()) {
            (1, OpKind::NearBranch16 | OpKind::NearBranch32 | OpKind::NearBranch64) => {
                Some(instr.near_branch_target())
            }
            _ => None,
        };

        Some(DecodedInstruction {
            length: instr.len(),
            opcode: self.primary_opcode(code, &instr),
            mnemonic: instr.mnemonic(),
            branch: Self::branch_kind(&instr),
            relative_target,
        })
    }

    fn bitness(&self) -> u32 {
        self.bitness
    }
}
