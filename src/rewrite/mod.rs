//! Deterministic 6502 → 65816 rewriter.
//!
//! Works bank by bank over the recovered instruction table. Each instruction
//! becomes one or more `TranslationLine`s: labels for recovered targets, the
//! native-mode preamble at the reset entry, wrapper calls for hardware I/O,
//! three-line expansions for conditional branches, and everything else passed
//! through unchanged. Functions flagged for the oracle are left out of the
//! mechanical stream and emitted afterwards as guarded blocks.

pub mod branch;
pub mod flag;
pub mod io;
pub mod labels;
pub mod preamble;

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::decoder::format_operand;
use crate::flow::{Bank, Function, Recovery};
use crate::hardware::HardwareTable;
use crate::oracle::{self, log::TranslationLogEntry, LOW_CONFIDENCE};
use crate::{Address, FlowClass, Instruction};

use self::branch::BranchExpansion;
use self::flag::FlagSet;
use self::io::IoRewrite;
use self::labels::{SkipLabels, SymbolTable, SKIP_PREFIX};

/// Where an emitted line came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Provenance {
    /// Produced by a mechanical rewrite rule
    Deterministic,
    /// Oracle output that passed validation
    Oracle,
    /// The fixed stub used when the oracle failed or was rejected
    StubFallback,
}

impl fmt::Display for Provenance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Provenance::Deterministic => write!(f, "deterministic"),
            Provenance::Oracle => write!(f, "oracle"),
            Provenance::StubFallback => write!(f, "stub-fallback"),
        }
    }
}

/// What a line holds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LineKind {
    /// `NAME:`
    Label(String),
    /// The native-mode initialization sequence
    Preamble,
    /// An instruction passed through with symbolic operands
    Instruction {
        text: String,
        symbol: Option<String>,
    },
    /// A hardware access replaced by a wrapper call
    IoCall(IoRewrite),
    /// A conditional branch expanded into three lines
    Branch(BranchExpansion),
    /// A guarded oracle or stub block for one function
    OracleBlock {
        function_name: String,
        text: String,
        confidence: f64,
        failure_reason: Option<String>,
    },
}

/// One emitted unit of a bank listing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranslationLine {
    /// Source address the line was produced from, if any
    pub address: Option<Address>,
    pub kind: LineKind,
    pub provenance: Provenance,
}

impl TranslationLine {
    fn deterministic(address: Address, kind: LineKind) -> Self {
        Self {
            address: Some(address),
            kind,
            provenance: Provenance::Deterministic,
        }
    }

    /// Render into assembler source lines
    pub fn lines(&self) -> Vec<String> {
        match &self.kind {
            LineKind::Label(name) => vec![format!("{}:", name)],
            LineKind::Preamble => preamble::RESET_PREAMBLE
                .iter()
                .map(|insn| format!("    {}", insn))
                .collect(),
            LineKind::Instruction { text, .. } => vec![format!("    {}", text)],
            LineKind::IoCall(io) => vec![format!("    JSR {} ; was: {}", io.wrapper, io.original)],
            LineKind::Branch(expansion) => expansion.lines().to_vec(),
            LineKind::OracleBlock {
                function_name,
                text,
                confidence,
                failure_reason,
            } => {
                let guard = guard_symbol(function_name);
                let scope = scope_symbol(function_name);
                let mut out = vec![format!(".ifndef {}", guard), format!("{} = 1", guard)];
                match failure_reason {
                    Some(reason) => out.push(format!("; {}: stub ({})", function_name, reason)),
                    None => out.push(format!("; {}: oracle translation", function_name)),
                }
                // Labels inside the block stay local; only the entry is exported
                out.push(format!(".scope {}", scope));
                out.extend(text.lines().map(str::to_string));
                out.push(".endscope".to_string());
                out.push(format!("{} := {}::{}", function_name, scope, function_name));
                if *confidence < LOW_CONFIDENCE {
                    out.push(format!(
                        "; WARNING: low confidence ({:.2}), manual review needed",
                        confidence
                    ));
                }
                out.push(".endif".to_string());
                out
            }
        }
    }

    /// Symbol defined by this line
    fn defines(&self) -> Option<&str> {
        match &self.kind {
            LineKind::Label(name) => Some(name),
            LineKind::OracleBlock { function_name, .. } => Some(function_name),
            _ => None,
        }
    }

    /// Symbol referenced by this line
    fn references(&self) -> Option<&str> {
        match &self.kind {
            LineKind::Instruction { symbol, .. } => symbol.as_deref(),
            LineKind::IoCall(io) => Some(&io.wrapper),
            LineKind::Branch(expansion) if !expansion.target.starts_with('$') => {
                Some(&expansion.target)
            }
            _ => None,
        }
    }
}

/// Prefix of the define-at-most-once guard around an oracle block
pub const GUARD_PREFIX: &str = "__ORACLE_";

/// Prefix of the scope that keeps an oracle block's labels local
pub const SCOPE_PREFIX: &str = "__SCOPE_";

/// Name of the define-at-most-once guard around an oracle block
pub fn guard_symbol(function_name: &str) -> String {
    format!("{}{}", GUARD_PREFIX, function_name)
}

/// Name of the scope an oracle block is assembled in
pub fn scope_symbol(function_name: &str) -> String {
    format!("{}{}", SCOPE_PREFIX, function_name)
}

/// Symbols the rewriter allocates itself; generated code may not define them
pub fn is_reserved_symbol(name: &str) -> bool {
    [SKIP_PREFIX, GUARD_PREFIX, SCOPE_PREFIX]
        .iter()
        .any(|prefix| name.starts_with(prefix))
}

/// The rewritten stream for one bank.
#[derive(Debug, Clone, PartialEq)]
pub struct BankListing {
    pub bank: Bank,
    /// Symbols this file defines or needs from elsewhere
    pub globals: Vec<String>,
    pub lines: Vec<TranslationLine>,
}

impl BankListing {
    /// Conventional file name, `bank_NN.asm`
    pub fn file_name(&self) -> String {
        format!("bank_{:02}.asm", self.bank.index)
    }

    /// Render the whole bank as ca65 source
    pub fn render(&self) -> String {
        let mut out = String::new();
        out.push_str(&format!(
            "; bank {:02}: ${:04X}-${:04X}\n",
            self.bank.index,
            self.bank.start,
            self.bank.end.saturating_sub(1)
        ));
        out.push_str(".p816\n.smart\n.a8\n.i8\n");
        for symbol in &self.globals {
            out.push_str(&format!(".global {}\n", symbol));
        }
        out.push('\n');
        for line in &self.lines {
            for text in line.lines() {
                out.push_str(&text);
                out.push('\n');
            }
        }
        out
    }

    /// Instruction lines only, without header or globals
    pub fn body_lines(&self) -> Vec<String> {
        self.lines.iter().flat_map(TranslationLine::lines).collect()
    }
}

/// Mechanical rewriter over one recovery result.
pub struct Rewriter<'a> {
    recovery: &'a Recovery,
    hardware: &'a HardwareTable,
    flags: &'a FlagSet,
    symbols: SymbolTable,
    reset: Option<Address>,
}

impl<'a> Rewriter<'a> {
    /// Build a rewriter; `reset` is the entry that receives the preamble
    pub fn new(
        recovery: &'a Recovery,
        hardware: &'a HardwareTable,
        flags: &'a FlagSet,
        reset: Option<Address>,
    ) -> Self {
        Self {
            recovery,
            hardware,
            flags,
            symbols: SymbolTable::build(recovery),
            reset,
        }
    }

    pub fn symbols(&self) -> &SymbolTable {
        &self.symbols
    }

    /// Number of skip labels `rewrite_bank` will draw for `bank`
    pub fn branch_count(&self, bank: &Bank) -> u32 {
        self.recovery
            .bank_instructions(bank)
            .filter(|insn| !self.flags.is_skipped(insn.address) && insn.mnemonic.is_branch())
            .count() as u32
    }

    /// Rewrite one bank.
    ///
    /// `translations` holds the gateway result for each flagged function;
    /// a flagged function without one gets the stub.
    pub fn rewrite_bank(
        &self,
        bank: Bank,
        skip_labels: &mut SkipLabels<'_>,
        translations: &BTreeMap<Address, TranslationLogEntry>,
    ) -> BankListing {
        let mut lines = Vec::new();

        for insn in self.recovery.bank_instructions(&bank) {
            if self.flags.is_skipped(insn.address) {
                continue;
            }
            self.rewrite_instruction(insn, skip_labels, &mut lines);
        }

        for function in self.recovery.bank_functions(&bank) {
            if self.flags.is_flagged(function.entry) {
                lines.push(self.oracle_block(function, translations.get(&function.entry)));
            }
        }

        let globals = globals(&lines);
        log::debug!(
            "Bank {:02}: {} lines, {} globals",
            bank.index,
            lines.len(),
            globals.len()
        );

        BankListing { bank, globals, lines }
    }

    fn rewrite_instruction(
        &self,
        insn: &Instruction,
        skip_labels: &mut SkipLabels<'_>,
        lines: &mut Vec<TranslationLine>,
    ) {
        let at = insn.address;

        if let Some(label) = self.symbols.label_at(at) {
            lines.push(TranslationLine::deterministic(at, LineKind::Label(label.to_string())));
        }
        if self.reset == Some(at) {
            lines.push(TranslationLine::deterministic(at, LineKind::Preamble));
        }

        if let Some(io) = io::rewrite(insn, self.hardware) {
            lines.push(TranslationLine::deterministic(at, LineKind::IoCall(io)));
            return;
        }

        let symbol = self.symbols.operand_symbol(insn).map(str::to_string);

        if let FlowClass::Branch { target, .. } = insn.flow() {
            let target = symbol.clone().unwrap_or_else(|| format!("${:04X}", target));
            if let Some(expansion) = branch::expand(insn, target, skip_labels) {
                lines.push(TranslationLine::deterministic(at, LineKind::Branch(expansion)));
                return;
            }
        }

        let operand = format_operand(insn, symbol.as_deref());
        let text = if operand.is_empty() {
            insn.mnemonic.to_string()
        } else {
            format!("{} {}", insn.mnemonic, operand)
        };
        lines.push(TranslationLine::deterministic(at, LineKind::Instruction { text, symbol }));
    }

    fn oracle_block(&self, function: &Function, entry: Option<&TranslationLogEntry>) -> TranslationLine {
        let (text, confidence, provenance, failure_reason) = match entry {
            Some(e) => (
                e.translated_text.clone(),
                e.confidence,
                e.provenance,
                e.failure_reason.clone(),
            ),
            None => (
                oracle::stub_text(&function.name),
                0.0,
                Provenance::StubFallback,
                Some("no translation".to_string()),
            ),
        };

        let text = if self.reset == Some(function.entry) {
            preamble::splice_after_label(&text, &function.name).unwrap_or_else(|| {
                log::warn!("No {} label to attach the reset preamble to", function.name);
                text
            })
        } else {
            text
        };

        TranslationLine {
            address: Some(function.entry),
            kind: LineKind::OracleBlock {
                function_name: function.name.clone(),
                text,
                confidence,
                failure_reason,
            },
            provenance,
        }
    }

    /// The 6502 source of a function as sent to the oracle.
    ///
    /// Labels are symbolic and annotations are kept as comments so the
    /// oracle sees why the function was flagged.
    pub fn source_text(&self, function: &Function) -> String {
        let mut out = String::new();
        for addr in &function.body {
            let Some(insn) = self.recovery.instructions.get(addr) else {
                continue;
            };
            if let Some(label) = self.symbols.label_at(*addr) {
                out.push_str(&format!("{}:\n", label));
            }
            for annotation in self.recovery.annotations_at(*addr) {
                out.push_str(&format!("    ; {}\n", annotation));
            }
            let operand = format_operand(insn, self.symbols.operand_symbol(insn));
            let text = if operand.is_empty() {
                insn.mnemonic.to_string()
            } else {
                format!("{} {}", insn.mnemonic, operand)
            };
            out.push_str(&format!("    {:<24}; ${:04X}\n", text, addr));
        }
        out
    }
}

/// Every non-local symbol a bank defines or references, sorted
fn globals(lines: &[TranslationLine]) -> Vec<String> {
    let symbols: BTreeSet<&str> = lines
        .iter()
        .flat_map(|line| line.defines().into_iter().chain(line.references()))
        .filter(|s| !s.starts_with(SKIP_PREFIX))
        .collect();
    symbols.into_iter().map(str::to_string).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flow::recursive;
    use crate::rewrite::labels::LabelCounter;
    use crate::{Mos6502Decoder, ProgramImage};

    fn rewrite_single_bank(image: &ProgramImage) -> BankListing {
        let recovery = recursive::run(image, &Mos6502Decoder, &HardwareTable::nes(), 0x4000);
        let flags = FlagSet::analyze(&recovery, image);
        let hardware = HardwareTable::nes();
        let rewriter = Rewriter::new(&recovery, &hardware, &flags, image.vector(crate::EntryVector::Reset));
        let counter = LabelCounter::new();
        let mut labels = SkipLabels::unreserved(&counter);
        rewriter.rewrite_bank(recovery.layout.bank(0), &mut labels, &BTreeMap::new())
    }

    #[test]
    fn test_reset_preamble_then_load() {
        let image = ProgramImage::new(vec![0xA9, 0x05], 0x8000).with_vector("RESET", 0x8000);
        let listing = rewrite_single_bank(&image);
        let lines = listing.body_lines();

        assert_eq!(lines[0], "RESET_HANDLER:");
        let preamble: Vec<_> = lines[1..11].iter().map(|l| l.trim()).collect();
        assert_eq!(preamble, preamble::RESET_PREAMBLE.to_vec());
        assert_eq!(lines[11], "    LDA #$05");
        assert_eq!(lines.len(), 12);
    }

    #[test]
    fn test_hardware_store_becomes_wrapper_call() {
        let image = ProgramImage::new(vec![0x8D, 0x00, 0x20, 0x60], 0x8000).with_vector("RESET", 0x8000);
        let listing = rewrite_single_bank(&image);
        let lines = listing.body_lines();

        assert!(lines.contains(&"    JSR PPU_CTRL_WRITE ; was: STA $2000".to_string()));
        assert!(!lines.iter().any(|l| l.trim_start().starts_with("STA")));
        assert!(listing.globals.contains(&"PPU_CTRL_WRITE".to_string()));
    }

    #[test]
    fn test_branch_and_jump_use_labels() {
        // $8000: LDX #0  $8002: INX; BNE $8002; JMP $8000
        let bytes = [0xA2, 0x00, 0xE8, 0xD0, 0xFD, 0x4C, 0x00, 0x80];
        let image = ProgramImage::new(bytes.to_vec(), 0x8000).with_vector("RESET", 0x8000);
        let listing = rewrite_single_bank(&image);
        let lines = listing.body_lines();

        let at = lines.iter().position(|l| l == "L_8002:").unwrap();
        assert_eq!(lines[at + 1], "    INX");
        assert_eq!(lines[at + 2], "    BEQ SKIP_0");
        assert_eq!(lines[at + 3], "    JMP L_8002");
        assert_eq!(lines[at + 4], "SKIP_0:");
        assert_eq!(lines[at + 5], "    JMP RESET_HANDLER");
    }

    #[test]
    fn test_flagged_function_emitted_after_mechanical_lines() {
        // reset: JSR $8004; RTS   $8004 (nmi): RTI
        let bytes = [0x20, 0x04, 0x80, 0x60, 0x40];
        let image = ProgramImage::new(bytes.to_vec(), 0x8000)
            .with_vector("RESET", 0x8000)
            .with_vector("NMI", 0x8004);
        let listing = rewrite_single_bank(&image);
        let lines = listing.body_lines();

        assert!(!lines.contains(&"    RTI".to_string()));
        let guard = lines.iter().position(|l| l == ".ifndef __ORACLE_NMI_HANDLER").unwrap();
        let last_mechanical = lines.iter().position(|l| l == "    RTS").unwrap();
        assert!(guard > last_mechanical);
        assert!(lines.contains(&"NMI_HANDLER:".to_string()));
        assert!(lines.contains(&"    BRK".to_string()));
        assert!(lines.contains(&".scope __SCOPE_NMI_HANDLER".to_string()));
        assert!(lines.contains(&"NMI_HANDLER := __SCOPE_NMI_HANDLER::NMI_HANDLER".to_string()));
        assert_eq!(lines[lines.len() - 4], ".endscope");
        assert!(lines[lines.len() - 2].starts_with("; WARNING: low confidence (0.00)"));
        assert_eq!(lines.last().unwrap(), ".endif");
        assert_eq!(listing.lines.last().unwrap().provenance, Provenance::StubFallback);
    }

    #[test]
    fn test_flagged_reset_keeps_preamble() {
        // reset: JMP ($0200)
        let image = ProgramImage::new(vec![0x6C, 0x00, 0x02], 0x8000).with_vector("RESET", 0x8000);
        let listing = rewrite_single_bank(&image);
        let lines = listing.body_lines();

        let label = lines.iter().position(|l| l == "RESET_HANDLER:").unwrap();
        assert_eq!(lines[label + 1].trim(), "SEI");
        assert_eq!(lines.iter().filter(|l| l.trim() == "XCE").count(), 1);
    }

    #[test]
    fn test_render_header_and_globals() {
        let image = ProgramImage::new(vec![0xEA, 0x60], 0x8000).with_vector("RESET", 0x8000);
        let text = rewrite_single_bank(&image).render();

        assert!(text.starts_with("; bank 00: $8000-$8001\n.p816\n"));
        assert!(text.contains(".global RESET_HANDLER\n"));
    }

    #[test]
    fn test_source_text_has_labels_and_addresses() {
        let bytes = [0xA2, 0x00, 0xE8, 0xD0, 0xFD, 0x60];
        let image = ProgramImage::new(bytes.to_vec(), 0x8000).with_vector("RESET", 0x8000);
        let recovery = recursive::run(&image, &Mos6502Decoder, &HardwareTable::nes(), 0x4000);
        let flags = FlagSet::analyze(&recovery, &image);
        let hardware = HardwareTable::nes();
        let rewriter = Rewriter::new(&recovery, &hardware, &flags, Some(0x8000));

        let text = rewriter.source_text(recovery.function_at(0x8000).unwrap());
        assert!(text.starts_with("RESET_HANDLER:\n"));
        assert!(text.contains("L_8002:\n"));
        assert!(text.contains("BNE L_8002"));
        assert!(text.contains("; $8003"));
    }
}
