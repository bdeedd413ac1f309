//! Instruction decoding primitive used by fingerprinting and entry resolution.
//!
//! The engine only needs a narrow view of each instruction: its length, its
//! primary opcode byte, whether it transfers control, and for relative
//! branches the target it resolves to. `InstructionDecoder` is that view;
//! `iced::IcedDecoder` implements it for x86/x64.

pub mod iced;

pub use self::iced::IcedDecoder;

use iced_x86::Mnemonic;

/// Control-flow classification of a decoded instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BranchKind {
    /// Falls through to the next instruction
    None,
    /// Jcc, loop, jrcxz and friends
    Conditional,
    /// Direct or indirect jmp
    Unconditional,
    /// Direct or indirect call
    Call,
    /// ret, iret and friends
    Return,
}

impl BranchKind {
    pub fn is_branch(&self) -> bool {
        !matches!(self, BranchKind::None)
    }
}

/// The subset of a decoded instruction the matchers look at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedInstruction {
    /// Encoded length in bytes.
    pub length: usize,
    /// Primary opcode byte (escape bytes and prefixes excluded).
    pub opcode: u8,
    pub mnemonic: Mnemonic,
    pub branch: BranchKind,
    /// Absolute target of a relative immediate branch operand, computed
    /// from the ip the instruction was decoded at.
    pub relative_target: Option<u64>,
}

impl DecodedInstruction {
    /// `call rel16/rel32`: a call whose single operand is a relative immediate.
    pub fn is_relative_call(&self) -> bool {
        self.mnemonic == Mnemonic::Call && self.relative_target.is_some()
    }
}

/// Decode one instruction at the start of `code`, as if it lived at `ip`.
///
/// Returns `None` when the bytes do not form a valid, complete instruction.
pub trait InstructionDecoder {
    fn decode(&self, code: &[u8], ip: u64) -> Option<DecodedInstruction>;

    /// Decoder mode in bits.
    fn bitness(&self) -> u32;
}

impl<T: InstructionDecoder + ?Sized> InstructionDecoder for &T {
    fn decode(&self, code: &[u8], ip: u64) -> Option<DecodedInstruction> {
        (**self).decode(code, ip)
    }

    fn bitness(&self) -> u32 {
        (**self).bitness()
    }
}
