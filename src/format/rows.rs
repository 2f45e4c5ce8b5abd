//! Flat row types for the emitted tables.
//!
//! Addresses are written as `0x`-prefixed hex and address sets as
//! space-separated hex, so every table survives CSV as well as JSON.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::flow::{Function, RegisterAccessSite};
use crate::hardware::{Direction, Subsystem};
use crate::oracle::log::TranslationLogEntry;
use crate::rewrite::branch::BranchExpansion;
use crate::rewrite::io::IoRewrite;
use crate::rewrite::{LineKind, Provenance, TranslationLine};
use crate::{Address, AddressingMode, Instruction, Mnemonic, RetargetError};

/// One row of the function table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionRow {
    pub entry: String,
    pub name: String,
    pub callers: String,
    pub callees: String,
    pub body: String,
}

/// One row of the instruction table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstructionRow {
    pub address: String,
    pub opcode: String,
    pub mnemonic: Mnemonic,
    pub mode: AddressingMode,
    pub operand: String,
    pub length: u8,
    pub target: String,
    pub text: String,
}

/// One row of the register-access table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterAccessRow {
    pub instruction_address: String,
    pub hw_address: String,
    pub hw_name: String,
    pub subsystem: Subsystem,
    pub direction: Direction,
    pub mnemonic: Mnemonic,
}

/// One row of the translation log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranslationRow {
    pub function_address: String,
    pub function_name: String,
    pub confidence: f64,
    pub review_marker_count: u32,
    pub provenance: Provenance,
    pub failure_reason: Option<String>,
    pub translated_text: String,
}

/// Which kind of line a [`LineRow`] holds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LineTag {
    Label,
    Preamble,
    Instruction,
    IoCall,
    Branch,
    OracleBlock,
}

impl LineTag {
    pub fn as_str(&self) -> &'static str {
        match self {
            LineTag::Label => "label",
            LineTag::Preamble => "preamble",
            LineTag::Instruction => "instruction",
            LineTag::IoCall => "io_call",
            LineTag::Branch => "branch",
            LineTag::OracleBlock => "oracle_block",
        }
    }
}

/// One row of a bank's line table.
///
/// The columns are shared between kinds:
///
/// | kind | `text` | `symbol` |
/// |---|---|---|
/// | label | label name | |
/// | instruction | instruction text | operand symbol |
/// | io_call | replaced instruction | wrapper |
/// | branch | | jump target |
/// | oracle_block | block text | function name |
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LineRow {
    pub address: String,
    pub kind: LineTag,
    pub provenance: Provenance,
    pub text: String,
    pub symbol: String,
    pub inverted: Option<Mnemonic>,
    pub skip_label: String,
    pub confidence: Option<f64>,
    pub failure_reason: Option<String>,
}

pub(crate) fn hex(addr: Address) -> String {
    format!("0x{:04x}", addr)
}

pub(crate) fn parse_hex(text: &str) -> Result<Address, RetargetError> {
    let digits = text.trim().trim_start_matches("0x").trim_start_matches("0X");
    Address::from_str_radix(digits, 16)
        .map_err(|e| RetargetError::Artifact(format!("bad address '{}': {}", text, e)))
}

fn hex_list<'a>(addrs: impl IntoIterator<Item = &'a Address>) -> String {
    addrs.into_iter().map(|a| hex(*a)).collect::<Vec<_>>().join(" ")
}

fn parse_hex_list(text: &str) -> Result<Vec<Address>, RetargetError> {
    text.split_whitespace().map(parse_hex).collect()
}

impl From<&Function> for FunctionRow {
    fn from(f: &Function) -> Self {
        Self {
            entry: hex(f.entry),
            name: f.name.clone(),
            callers: hex_list(&f.callers),
            callees: hex_list(&f.callees),
            body: hex_list(&f.body),
        }
    }
}

impl TryFrom<FunctionRow> for Function {
    type Error = RetargetError;

    fn try_from(row: FunctionRow) -> Result<Self, Self::Error> {
        let mut function = Function::new(parse_hex(&row.entry)?, row.name);
        function.callers = parse_hex_list(&row.callers)?.into_iter().collect();
        function.callees = parse_hex_list(&row.callees)?.into_iter().collect();
        function.body = parse_hex_list(&row.body)?;
        Ok(function)
    }
}

impl From<&Instruction> for InstructionRow {
    fn from(insn: &Instruction) -> Self {
        Self {
            address: hex(insn.address),
            opcode: format!("{:02x}", insn.opcode),
            mnemonic: insn.mnemonic,
            mode: insn.mode,
            operand: insn
                .operand_bytes()
                .iter()
                .map(|b| format!("{:02x}", b))
                .collect::<Vec<_>>()
                .join(" "),
            length: insn.length,
            target: insn.target.map(hex).unwrap_or_default(),
            text: insn.to_string(),
        }
    }
}

impl TryFrom<InstructionRow> for Instruction {
    type Error = RetargetError;

    fn try_from(row: InstructionRow) -> Result<Self, Self::Error> {
        let byte = |text: &str| {
            u8::from_str_radix(text, 16)
                .map_err(|e| RetargetError::Artifact(format!("bad byte '{}': {}", text, e)))
        };

        let mut operand = [0u8; 2];
        for (slot, text) in operand.iter_mut().zip(row.operand.split_whitespace()) {
            *slot = byte(text)?;
        }
        if row.length == 0 || row.length as usize > crate::MAX_INSTRUCTION_SIZE {
            return Err(RetargetError::Artifact(format!("bad length {}", row.length)));
        }

        Ok(Instruction {
            address: parse_hex(&row.address)?,
            opcode: byte(&row.opcode)?,
            mnemonic: row.mnemonic,
            mode: row.mode,
            operand,
            length: row.length,
            target: if row.target.trim().is_empty() {
                None
            } else {
                Some(parse_hex(&row.target)?)
            },
        })
    }
}

impl From<&RegisterAccessSite> for RegisterAccessRow {
    fn from(site: &RegisterAccessSite) -> Self {
        Self {
            instruction_address: hex(site.instruction_address),
            hw_address: hex(site.hw_address),
            hw_name: site.hw_name.clone(),
            subsystem: site.subsystem,
            direction: site.direction,
            mnemonic: site.mnemonic,
        }
    }
}

impl TryFrom<RegisterAccessRow> for RegisterAccessSite {
    type Error = RetargetError;

    fn try_from(row: RegisterAccessRow) -> Result<Self, Self::Error> {
        Ok(RegisterAccessSite {
            instruction_address: parse_hex(&row.instruction_address)?,
            hw_address: parse_hex(&row.hw_address)?,
            hw_name: row.hw_name,
            subsystem: row.subsystem,
            direction: row.direction,
            mnemonic: row.mnemonic,
        })
    }
}

impl From<&TranslationLogEntry> for TranslationRow {
    fn from(e: &TranslationLogEntry) -> Self {
        Self {
            function_address: hex(e.function_address),
            function_name: e.function_name.clone(),
            confidence: e.confidence,
            review_marker_count: e.review_marker_count,
            provenance: e.provenance,
            failure_reason: e.failure_reason.clone(),
            translated_text: e.translated_text.clone(),
        }
    }
}

impl TryFrom<TranslationRow> for TranslationLogEntry {
    type Error = RetargetError;

    fn try_from(row: TranslationRow) -> Result<Self, Self::Error> {
        Ok(TranslationLogEntry {
            function_address: parse_hex(&row.function_address)?,
            function_name: row.function_name,
            translated_text: row.translated_text,
            confidence: row.confidence,
            review_marker_count: row.review_marker_count,
            provenance: row.provenance,
            failure_reason: row.failure_reason.filter(|r| !r.is_empty()),
        })
    }
}

impl From<&TranslationLine> for LineRow {
    fn from(line: &TranslationLine) -> Self {
        let mut row = LineRow {
            address: line.address.map(hex).unwrap_or_default(),
            kind: LineTag::Preamble,
            provenance: line.provenance,
            text: String::new(),
            symbol: String::new(),
            inverted: None,
            skip_label: String::new(),
            confidence: None,
            failure_reason: None,
        };

        match &line.kind {
            LineKind::Label(name) => {
                row.kind = LineTag::Label;
                row.text = name.clone();
            }
            LineKind::Preamble => {}
            LineKind::Instruction { text, symbol } => {
                row.kind = LineTag::Instruction;
                row.text = text.clone();
                row.symbol = symbol.clone().unwrap_or_default();
            }
            LineKind::IoCall(io) => {
                row.kind = LineTag::IoCall;
                row.text = io.original.clone();
                row.symbol = io.wrapper.clone();
            }
            LineKind::Branch(expansion) => {
                row.kind = LineTag::Branch;
                row.symbol = expansion.target.clone();
                row.inverted = Some(expansion.inverted);
                row.skip_label = expansion.skip_label.clone();
            }
            LineKind::OracleBlock {
                function_name,
                text,
                confidence,
                failure_reason,
            } => {
                row.kind = LineTag::OracleBlock;
                row.text = text.clone();
                row.symbol = function_name.clone();
                row.confidence = Some(*confidence);
                row.failure_reason = failure_reason.clone();
            }
        }
        row
    }
}

impl TryFrom<LineRow> for TranslationLine {
    type Error = RetargetError;

    fn try_from(row: LineRow) -> Result<Self, Self::Error> {
        let address = if row.address.trim().is_empty() {
            None
        } else {
            Some(parse_hex(&row.address)?)
        };
        let missing = |column: &str| {
            RetargetError::Artifact(format!("{} line without {}", row.kind.as_str(), column))
        };

        let kind = match row.kind {
            LineTag::Label => LineKind::Label(row.text.clone()),
            LineTag::Preamble => LineKind::Preamble,
            LineTag::Instruction => LineKind::Instruction {
                text: row.text.clone(),
                symbol: Some(row.symbol.clone()).filter(|s| !s.is_empty()),
            },
            LineTag::IoCall => LineKind::IoCall(IoRewrite {
                wrapper: row.symbol.clone(),
                original: row.text.clone(),
            }),
            LineTag::Branch => LineKind::Branch(BranchExpansion {
                inverted: row.inverted.ok_or_else(|| missing("inverted"))?,
                skip_label: row.skip_label.clone(),
                target: row.symbol.clone(),
            }),
            LineTag::OracleBlock => LineKind::OracleBlock {
                function_name: row.symbol.clone(),
                text: row.text.clone(),
                confidence: row.confidence.ok_or_else(|| missing("confidence"))?,
                failure_reason: row.failure_reason.clone().filter(|r| !r.is_empty()),
            },
        };

        Ok(TranslationLine {
            address,
            kind,
            provenance: row.provenance,
        })
    }
}

impl fmt::Display for FunctionRow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let count = |s: &str| s.split_whitespace().count();
        write!(
            f,
            "{}  {:<24} callers: [{}]  callees: [{}]  {} instruction(s)",
            self.entry,
            self.name,
            self.callers,
            self.callees,
            count(&self.body)
        )
    }
}

impl fmt::Display for InstructionRow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let bytes = if self.operand.is_empty() {
            self.opcode.clone()
        } else {
            format!("{} {}", self.opcode, self.operand)
        };
        write!(f, "{}: {:<10} {}", self.address, bytes, self.text)
    }
}

impl fmt::Display for RegisterAccessRow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: {} {} {} ({} {})",
            self.instruction_address,
            self.mnemonic,
            self.hw_address,
            self.hw_name,
            self.subsystem,
            self.direction
        )
    }
}

impl fmt::Display for TranslationRow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {:<24} {:.2} review={} {}",
            self.function_address,
            self.function_name,
            self.confidence,
            self.review_marker_count,
            self.provenance
        )?;
        if let Some(reason) = &self.failure_reason {
            write!(f, " ({})", reason)?;
        }
        Ok(())
    }
}

impl fmt::Display for LineRow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let address = if self.address.is_empty() { "-" } else { self.address.as_str() };
        let detail = match self.kind {
            LineTag::Branch => format!(
                "{} {} / JMP {}",
                self.inverted.map(|m| m.as_str()).unwrap_or("?"),
                self.skip_label,
                self.symbol
            ),
            LineTag::IoCall => format!("JSR {} ; was: {}", self.symbol, self.text),
            LineTag::OracleBlock => format!(
                "{} ({} lines)",
                self.symbol,
                self.text.lines().count()
            ),
            _ => self.text.clone(),
        };
        write!(
            f,
            "{:<6} {:<14} {:<12} {}",
            address,
            self.provenance.to_string(),
            self.kind.as_str(),
            detail
        )
    }
}
