//! Core IR, traits, and error types for the 6502 → 65816 retargeting engine.
//!
//! The engine takes a raw NES PRG image with no symbol table, recovers its
//! instructions, functions and hardware register accesses by recursive
//! descent, and rewrites the result into 65816 assembly for the SNES. Code the
//! deterministic rewriter cannot handle safely is sent to an external
//! translation oracle whose output is only accepted after re-assembly.
//!
//! # Basic Usage
//!
//! ```rust,no_run
//! use std::fs;
//! use rom_retarget::{
//!     config::RetargetConfig,
//!     oracle::UnavailableOracle,
//!     parser::PrgImage,
//!     pipeline::Retargeter,
//! };
//!
//! let prg = fs::read("workspace/prg_rom.bin").unwrap();
//! let image = PrgImage::new(prg).into_program_image().unwrap();
//!
//! let config = RetargetConfig::default();
//! let retargeter = Retargeter::new(&config, UnavailableOracle).unwrap();
//! let output = retargeter.run(&image).unwrap();
//!
//! for bank in &output.banks {
//!     println!("{}", bank.render());
//! }
//! ```

pub mod decoder;
pub mod hardware;
pub mod parser;
pub mod flow;
pub mod rewrite;
pub mod oracle;
pub mod config;
pub mod pipeline;
pub mod format;

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

pub use decoder::{AddressingMode, DecodeError, Mnemonic, Mos6502Decoder};

/// Represents an address in the source CPU's 16-bit address space
pub type Address = u16;

/// Maximum instruction size in bytes on the source CPU
pub const MAX_INSTRUCTION_SIZE: usize = 3;

/// Load address of NES PRG-ROM in the CPU address space
pub const PRG_BASE: Address = 0x8000;

/// The fixed entry vectors of the source platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EntryVector {
    /// Non-maskable interrupt (vblank on the NES)
    Nmi,
    /// Power-on / reset
    Reset,
    /// Maskable interrupt and BRK
    Irq,
}

impl EntryVector {
    /// All vectors, in the order used to resolve shared handler addresses.
    ///
    /// When two vectors point at the same code the earlier one names it.
    pub const PRIORITY: [EntryVector; 3] = [EntryVector::Reset, EntryVector::Nmi, EntryVector::Irq];

    /// Key used in the image's vector map
    pub fn key(self) -> &'static str {
        match self {
            EntryVector::Nmi => "NMI",
            EntryVector::Reset => "RESET",
            EntryVector::Irq => "IRQ",
        }
    }

    /// Fixed symbolic name given to the handler function
    pub fn handler_name(self) -> &'static str {
        match self {
            EntryVector::Nmi => "NMI_HANDLER",
            EntryVector::Reset => "RESET_HANDLER",
            EntryVector::Irq => "IRQ_HANDLER",
        }
    }

    /// Parse a vector map key
    pub fn from_key(key: &str) -> Option<Self> {
        match key.to_ascii_uppercase().as_str() {
            "NMI" => Some(EntryVector::Nmi),
            "RESET" => Some(EntryVector::Reset),
            "IRQ" | "BRK" => Some(EntryVector::Irq),
            _ => None,
        }
    }
}

impl fmt::Display for EntryVector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.key())
    }
}

/// An immutable program image: the raw bytes, where they load, and the
/// named entry points the platform jumps to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgramImage {
    bytes: Vec<u8>,
    base: Address,
    vectors: BTreeMap<String, Address>,
}

impl ProgramImage {
    /// Create an image loaded at `base` with no entry vectors
    pub fn new(bytes: Vec<u8>, base: Address) -> Self {
        Self {
            bytes,
            base,
            vectors: BTreeMap::new(),
        }
    }

    /// Add a named entry vector
    pub fn with_vector(mut self, name: impl Into<String>, address: Address) -> Self {
        self.vectors.insert(name.into(), address);
        self
    }

    /// Load address of the first byte
    pub fn base(&self) -> Address {
        self.base
    }

    /// Size of the image in bytes
    pub fn size(&self) -> usize {
        self.bytes.len()
    }

    /// Raw image bytes
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// One past the last mapped address, widened so a full 64K image fits
    pub fn end(&self) -> u32 {
        self.base as u32 + self.bytes.len() as u32
    }

    /// Named entry vectors
    pub fn vectors(&self) -> &BTreeMap<String, Address> {
        &self.vectors
    }

    /// Address of a platform vector, if the provider supplied it
    pub fn vector(&self, vector: EntryVector) -> Option<Address> {
        self.vectors
            .iter()
            .find(|(name, _)| EntryVector::from_key(name) == Some(vector))
            .map(|(_, addr)| *addr)
    }

    /// Returns true if `addr` lies inside `base..base + size`
    pub fn contains(&self, addr: Address) -> bool {
        addr >= self.base && (addr as u32) < self.end()
    }

    /// Translate an address into an offset into the byte buffer
    pub fn offset_of(&self, addr: Address) -> Option<usize> {
        if self.contains(addr) {
            Some((addr - self.base) as usize)
        } else {
            None
        }
    }

    /// Read one byte at an address
    pub fn byte_at(&self, addr: Address) -> Option<u8> {
        self.offset_of(addr).map(|off| self.bytes[off])
    }
}

/// How an instruction moves control, as far as the image alone tells us.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowClass {
    /// Subroutine call; assumed to return to the next instruction
    Call(Address),
    /// Unconditional absolute jump
    Jump(Address),
    /// Jump through a pointer; no target derivable statically
    IndirectJump,
    /// Conditional relative branch
    Branch { target: Address, fallthrough: Address },
    /// Return, interrupt return, or break
    Terminator,
    /// Anything else: execution continues at the next instruction
    Sequential,
}

/// One decoded source instruction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Instruction {
    /// Address of the opcode byte
    pub address: Address,
    /// The opcode byte
    pub opcode: u8,
    /// Instruction mnemonic
    pub mnemonic: Mnemonic,
    /// Addressing mode, which fixes the operand length
    pub mode: AddressingMode,
    /// Operand bytes, zero-padded
    pub operand: [u8; 2],
    /// Encoded length in bytes (1-3)
    pub length: u8,
    /// Branch, jump, call, or absolute data target, when one is encoded
    pub target: Option<Address>,
}

impl Instruction {
    /// Returns the operand bytes actually encoded
    pub fn operand_bytes(&self) -> &[u8] {
        &self.operand[..self.length as usize - 1]
    }

    /// Operand as a little-endian word (high byte zero for 1-byte operands)
    pub fn operand_word(&self) -> u16 {
        u16::from_le_bytes(self.operand)
    }

    /// Address of the next sequential instruction, with 16-bit wraparound
    pub fn fallthrough(&self) -> Address {
        self.address.wrapping_add(self.length as Address)
    }

    /// The absolute (or absolute indexed) base address this instruction touches
    pub fn absolute_target(&self) -> Option<Address> {
        if self.mode.is_absolute() {
            self.target
        } else {
            None
        }
    }

    /// Classify the instruction's control flow
    pub fn flow(&self) -> FlowClass {
        match (self.mnemonic, self.mode, self.target) {
            (Mnemonic::Jsr, _, Some(target)) => FlowClass::Call(target),
            (Mnemonic::Jmp, AddressingMode::Absolute, Some(target)) => FlowClass::Jump(target),
            (Mnemonic::Jmp, AddressingMode::Indirect, _) => FlowClass::IndirectJump,
            (m, AddressingMode::Relative, Some(target)) if m.is_branch() => FlowClass::Branch {
                target,
                fallthrough: self.fallthrough(),
            },
            (m, _, _) if m.is_terminator() => FlowClass::Terminator,
            _ => FlowClass::Sequential,
        }
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let operand = decoder::format_operand(self, None);
        if operand.is_empty() {
            write!(f, "{}", self.mnemonic)
        } else {
            write!(f, "{} {}", self.mnemonic, operand)
        }
    }
}

/// Decoder trait: one source ISA instruction at a time.
pub trait Decoder: Send + Sync {
    /// Decode a single instruction at `at`.
    ///
    /// # Arguments
    /// * `image` - The program image to decode from
    /// * `at` - Address of the opcode byte
    ///
    /// # Returns
    /// The decoded instruction, or a `DecodeError` that callers treat as the
    /// end of the current traversal run
    fn decode(&self, image: &ProgramImage, at: Address) -> Result<Instruction, DecodeError>;
}

/// Error type for operations that can fail a whole run (artifact I/O,
/// configuration). Recovery, rewriting and oracle failures never surface here.
#[derive(Debug, thiserror::Error)]
pub enum RetargetError {
    /// Invalid configuration value
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// Program image cannot be used
    #[error("Invalid program image: {0}")]
    InvalidImage(String),

    /// A serialized table could not be read back
    #[error("Malformed artifact: {0}")]
    Artifact(String),

    /// Worker pool construction failed
    #[error("Failed to build worker pool: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),

    /// JSON (de)serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// CSV (de)serialization error
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lda_imm() -> Instruction {
        Instruction {
            address: 0x8000,
            opcode: 0xA9,
            mnemonic: Mnemonic::Lda,
            mode: AddressingMode::Immediate,
            operand: [0x05, 0],
            length: 2,
            target: None,
        }
    }

    #[test]
    fn test_image_bounds() {
        let image = ProgramImage::new(vec![0xEA; 0x10], 0x8000);

        assert!(image.contains(0x8000));
        assert!(image.contains(0x800F));
        assert!(!image.contains(0x8010));
        assert!(!image.contains(0x7FFF));
        assert_eq!(image.offset_of(0x8004), Some(4));
        assert_eq!(image.byte_at(0x9000), None);
    }

    #[test]
    fn test_full_window_image_end() {
        // 32K at $8000 reaches exactly the top of the address space
        let image = ProgramImage::new(vec![0; 0x8000], 0x8000);
        assert_eq!(image.end(), 0x10000);
        assert!(image.contains(0xFFFF));
    }

    #[test]
    fn test_vector_lookup_is_case_insensitive() {
        let image = ProgramImage::new(vec![0; 4], 0x8000)
            .with_vector("reset", 0x8000)
            .with_vector("NMI", 0x8002);

        assert_eq!(image.vector(EntryVector::Reset), Some(0x8000));
        assert_eq!(image.vector(EntryVector::Nmi), Some(0x8002));
        assert_eq!(image.vector(EntryVector::Irq), None);
    }

    #[test]
    fn test_instruction_operand_bytes() {
        let insn = lda_imm();
        assert_eq!(insn.operand_bytes(), &[0x05]);
        assert_eq!(insn.fallthrough(), 0x8002);
        assert_eq!(insn.flow(), FlowClass::Sequential);
        assert_eq!(insn.to_string(), "LDA #$05");
    }

    #[test]
    fn test_fallthrough_wraps() {
        let mut insn = lda_imm();
        insn.address = 0xFFFF;
        assert_eq!(insn.fallthrough(), 0x0001);
    }
}
