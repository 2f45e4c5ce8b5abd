//! Re-validation of oracle output before it may reach a listing.

use std::fs;
use std::process::Command;

/// Why a block of generated code was rejected.
#[derive(Debug, thiserror::Error)]
pub enum ValidationError {
    /// Nothing left after stripping comments and blank lines
    #[error("no code in output")]
    Empty,

    /// Not a 65816 mnemonic
    #[error("line {line}: unknown mnemonic '{mnemonic}'")]
    UnknownMnemonic { line: usize, mnemonic: String },

    /// A directive that is unknown or not allowed in isolation
    #[error("line {line}: unsupported directive '{directive}'")]
    UnsupportedDirective { line: usize, directive: String },

    /// Operand text that cannot be parsed
    #[error("line {line}: malformed operand '{operand}'")]
    MalformedOperand { line: usize, operand: String },

    /// A block directive (`.if`, `.proc`, `.scope`) is left open, closed
    /// without an opener, or continued outside its block
    #[error("line {line}: unbalanced '{directive}'")]
    UnbalancedBlock { line: usize, directive: String },

    /// The external assembler rejected the text
    #[error("assembler exited with {status}: {stderr}")]
    Assembler { status: String, stderr: String },

    /// The external assembler could not be run
    #[error("failed to run assembler: {0}")]
    Io(#[from] std::io::Error),
}

/// Checks that a block of 65816 assembly would assemble on its own.
pub trait Validator: Send + Sync {
    fn validate(&self, text: &str) -> Result<(), ValidationError>;
}

/// Instruction mnemonics accepted by ca65 in 65816 mode, including its aliases
const MNEMONICS_65816: &[&str] = &[
    "ADC", "AND", "ASL", "BCC", "BCS", "BEQ", "BIT", "BMI", "BNE", "BPL", "BRA", "BRK", "BRL",
    "BVC", "BVS", "CLC", "CLD", "CLI", "CLV", "CMP", "COP", "CPX", "CPY", "DEA", "DEC", "DEX",
    "DEY", "EOR", "INA", "INC", "INX", "INY", "JML", "JMP", "JSL", "JSR", "LDA", "LDX", "LDY",
    "LSR", "MVN", "MVP", "NOP", "ORA", "PEA", "PEI", "PER", "PHA", "PHB", "PHD", "PHK", "PHP",
    "PHX", "PHY", "PLA", "PLB", "PLD", "PLP", "PLX", "PLY", "REP", "ROL", "ROR", "RTI", "RTL",
    "RTS", "SBC", "SEC", "SED", "SEI", "SEP", "STA", "STP", "STX", "STY", "STZ", "SWA", "TAD",
    "TAS", "TAX", "TAY", "TCD", "TCS", "TDA", "TDC", "TRB", "TSA", "TSB", "TSC", "TSX", "TXA",
    "TXS", "TXY", "TYA", "TYX", "WAI", "WDM", "XBA", "XCE",
];

/// Directives a self-contained block may use
const DIRECTIVES: &[&str] = &[
    ".A8", ".A16", ".I8", ".I16", ".SMART", ".P816", ".BYTE", ".BYT", ".WORD", ".ADDR",
    ".FARADDR", ".DWORD", ".RES", ".PROC", ".ENDPROC", ".SCOPE", ".ENDSCOPE", ".GLOBAL",
    ".IMPORT", ".EXPORT", ".IF", ".IFDEF", ".IFNDEF", ".ELSE", ".ELSEIF", ".ENDIF", ".LOCAL",
];

/// Directive blocks that must open and close inside one oracle block
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Block {
    Conditional,
    Proc,
    Scope,
}

impl Block {
    fn opened_by(directive: &str) -> Option<Self> {
        match directive {
            ".IF" | ".IFDEF" | ".IFNDEF" => Some(Block::Conditional),
            ".PROC" => Some(Block::Proc),
            ".SCOPE" => Some(Block::Scope),
            _ => None,
        }
    }

    fn closed_by(directive: &str) -> Option<Self> {
        match directive {
            ".ENDIF" => Some(Block::Conditional),
            ".ENDPROC" => Some(Block::Proc),
            ".ENDSCOPE" => Some(Block::Scope),
            _ => None,
        }
    }
}

/// Built-in line checker: labels, assignments, known directives and 65816
/// mnemonics with well-formed operands.
#[derive(Debug, Default, Clone, Copy)]
pub struct SyntaxValidator;

impl SyntaxValidator {
    pub fn new() -> Self {
        SyntaxValidator
    }
}

impl Validator for SyntaxValidator {
    fn validate(&self, text: &str) -> Result<(), ValidationError> {
        let mut instructions = 0usize;
        let mut blocks: Vec<(Block, usize, String)> = Vec::new();

        for (idx, raw) in text.lines().enumerate() {
            let line = idx + 1;
            let mut rest = strip_comment(raw).trim();

            // Leading label definitions: `name:`, `@local:` or the anonymous `:`
            while let Some((label, tail)) = split_label(rest) {
                if !label.is_empty() && !is_symbol(label.trim_start_matches('@')) {
                    return Err(ValidationError::MalformedOperand {
                        line,
                        operand: label.to_string(),
                    });
                }
                rest = tail.trim_start();
            }
            if rest.is_empty() {
                continue;
            }

            let (head, operand) = match rest.find(char::is_whitespace) {
                Some(split) => (&rest[..split], rest[split..].trim()),
                None => (rest, ""),
            };

            if head.starts_with('.') {
                let directive = head.to_ascii_uppercase();
                if !DIRECTIVES.contains(&directive.as_str()) {
                    return Err(ValidationError::UnsupportedDirective {
                        line,
                        directive: head.to_string(),
                    });
                }
                let unbalanced = || ValidationError::UnbalancedBlock {
                    line,
                    directive: head.to_string(),
                };

                if let Some(block) = Block::opened_by(&directive) {
                    blocks.push((block, line, head.to_string()));
                } else if let Some(block) = Block::closed_by(&directive) {
                    match blocks.pop() {
                        Some((open, _, _)) if open == block => {}
                        _ => return Err(unbalanced()),
                    }
                } else if directive == ".ELSE" || directive == ".ELSEIF" {
                    // Only valid inside a conditional the block itself opened
                    if !matches!(blocks.last(), Some((Block::Conditional, _, _))) {
                        return Err(unbalanced());
                    }
                }
                continue;
            }

            if operand.starts_with('=') || operand.starts_with(":=") {
                if !is_symbol(head) {
                    return Err(ValidationError::MalformedOperand {
                        line,
                        operand: head.to_string(),
                    });
                }
                continue;
            }

            // Size suffixes such as `LDA.w` or `JMP.l`
            let mnemonic = head.split('.').next().unwrap_or(head).to_ascii_uppercase();
            if !MNEMONICS_65816.contains(&mnemonic.as_str()) {
                return Err(ValidationError::UnknownMnemonic {
                    line,
                    mnemonic: head.to_string(),
                });
            }
            if !operand_is_well_formed(operand) {
                return Err(ValidationError::MalformedOperand {
                    line,
                    operand: operand.to_string(),
                });
            }
            instructions += 1;
        }

        if let Some((_, line, directive)) = blocks.pop() {
            return Err(ValidationError::UnbalancedBlock { line, directive });
        }
        if instructions == 0 {
            return Err(ValidationError::Empty);
        }
        Ok(())
    }
}

/// Runs an external assembler over the block in a scratch directory.
///
/// The text is prefixed with the register-width directives every listing
/// starts with, so it is assembled in the context it will be emitted into.
#[derive(Debug, Clone)]
pub struct AssemblerValidator {
    program: String,
    args: Vec<String>,
}

impl AssemblerValidator {
    /// `program args... <source> -o <object>`
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    /// ca65 in 65816 mode, importing any symbol the block does not define
    pub fn ca65() -> Self {
        Self::new(
            "ca65",
            vec!["--cpu".into(), "65816".into(), "--auto-import".into()],
        )
    }
}

impl Validator for AssemblerValidator {
    fn validate(&self, text: &str) -> Result<(), ValidationError> {
        let scratch = tempfile::tempdir()?;
        let source = scratch.path().join("block.s");
        let object = scratch.path().join("block.o");
        fs::write(&source, format!(".smart\n.a8\n.i8\n{}\n", text))?;

        let output = Command::new(&self.program)
            .args(&self.args)
            .arg(&source)
            .arg("-o")
            .arg(&object)
            .output()?;

        if output.status.success() {
            Ok(())
        } else {
            Err(ValidationError::Assembler {
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            })
        }
    }
}

/// Drop a trailing `;` comment, ignoring semicolons inside quotes
fn strip_comment(line: &str) -> &str {
    let mut in_string = false;
    for (i, c) in line.char_indices() {
        match c {
            '"' => in_string = !in_string,
            ';' if !in_string => return &line[..i],
            _ => {}
        }
    }
    line
}

/// Split a leading `label:` off a line
fn split_label(line: &str) -> Option<(&str, &str)> {
    let colon = line.find(':')?;
    let label = &line[..colon];
    // `:=` is an assignment, not a label
    if line[colon + 1..].starts_with('=') || label.contains(char::is_whitespace) {
        return None;
    }
    Some((label, &line[colon + 1..]))
}

fn is_symbol(name: &str) -> bool {
    let mut chars = name.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Balanced brackets, and something after a `#`
fn operand_is_well_formed(operand: &str) -> bool {
    let mut stack = Vec::new();
    for c in operand.chars() {
        match c {
            '(' | '[' => stack.push(c),
            ')' => {
                if stack.pop() != Some('(') {
                    return false;
                }
            }
            ']' => {
                if stack.pop() != Some('[') {
                    return false;
                }
            }
            _ => {}
        }
    }
    if !stack.is_empty() {
        return false;
    }
    !(operand.starts_with('#') && operand[1..].trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accepts_typical_block() {
        let text = "\
NMI_HANDLER:
    PHA                 ; save A
    REP #$20
    LDA.w $0300,X
    JSL sub_C000
@loop: DEX
    BNE @loop
    ; REVIEW: check bank
    SEP #$30
    PLA
    RTI
";
        assert!(SyntaxValidator.validate(text).is_ok());
    }

    #[test]
    fn test_rejects_unknown_mnemonic() {
        let err = SyntaxValidator.validate("FOO:\n    LAX $00\n").unwrap_err();
        assert!(matches!(err, ValidationError::UnknownMnemonic { line: 2, .. }));
    }

    #[test]
    fn test_rejects_prose() {
        let err = SyntaxValidator.validate("Sure! Here is the code you asked for.").unwrap_err();
        assert!(matches!(err, ValidationError::UnknownMnemonic { .. }));
    }

    #[test]
    fn test_rejects_unbalanced_operand() {
        let err = SyntaxValidator.validate("    JMP ($0200\n").unwrap_err();
        assert!(matches!(err, ValidationError::MalformedOperand { .. }));
    }

    #[test]
    fn test_rejects_include() {
        let err = SyntaxValidator.validate(".include \"hw.inc\"\n    RTS\n").unwrap_err();
        assert!(matches!(err, ValidationError::UnsupportedDirective { .. }));
    }

    #[test]
    fn test_conditionals_must_balance() {
        assert!(SyntaxValidator.validate(".ifndef X\n    RTS\n").is_err());
        assert!(SyntaxValidator.validate(".ifndef X\nX = 1\n    RTS\n.endif\n").is_ok());
    }

    #[test]
    fn test_proc_and_scope_must_close() {
        let err = SyntaxValidator
            .validate(".proc inner\nNMI_HANDLER:\n    RTI\n")
            .unwrap_err();
        assert!(matches!(err, ValidationError::UnbalancedBlock { line: 1, .. }));

        assert!(SyntaxValidator.validate(".scope s\n    RTS\n").is_err());
        assert!(SyntaxValidator.validate("    RTS\n.endscope\n").is_err());
        assert!(SyntaxValidator
            .validate(".proc inner\n    RTS\n.endproc\n.scope s\n    RTS\n.endscope\n")
            .is_ok());
    }

    #[test]
    fn test_blocks_must_nest() {
        let err = SyntaxValidator
            .validate(".proc p\n.if 1\n    RTS\n.endproc\n.endif\n")
            .unwrap_err();
        assert!(matches!(err, ValidationError::UnbalancedBlock { line: 4, .. }));
    }

    #[test]
    fn test_else_outside_conditional() {
        let err = SyntaxValidator
            .validate("NMI_HANDLER:\n    RTI\n.else\n")
            .unwrap_err();
        assert!(matches!(err, ValidationError::UnbalancedBlock { line: 3, .. }));
        assert!(SyntaxValidator.validate(".elseif 1\n    RTS\n").is_err());
        assert!(SyntaxValidator.validate(".proc p\n.else\n    RTS\n.endproc\n").is_err());
        assert!(SyntaxValidator
            .validate(".ifdef X\n    RTS\n.elseif 1\n    RTI\n.else\n    NOP\n.endif\n")
            .is_ok());
    }

    #[test]
    fn test_comments_only_is_empty() {
        let err = SyntaxValidator.validate("; nothing\n\n").unwrap_err();
        assert!(matches!(err, ValidationError::Empty));
    }

    #[test]
    fn test_missing_assembler_is_an_error() {
        let validator = AssemblerValidator::new("definitely-not-an-assembler-binary", vec![]);
        assert!(matches!(validator.validate("    RTS\n"), Err(ValidationError::Io(_))));
    }
}
