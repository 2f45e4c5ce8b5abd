//! Native-mode initialization injected ahead of the reset handler body.

/// Switch to native mode, set the stack and direct page, then drop back to
/// the 8-bit register widths the legacy body expects.
pub const RESET_PREAMBLE: [&str; 10] = [
    "SEI",
    "CLC",
    "XCE",
    "REP #$30",
    "LDX #$01FF",
    "TXS",
    "REP #$20",
    "LDA #$0000",
    "TCD",
    "SEP #$30",
];

/// Insert the preamble after the line that defines `label`.
///
/// Used for oracle-sourced reset handlers, where the entry label comes from
/// generated text. Returns `None` if no line defines the label.
pub fn splice_after_label(text: &str, label: &str) -> Option<String> {
    let definition = format!("{}:", label);
    let mut out = String::with_capacity(text.len() + 128);
    let mut spliced = false;

    for line in text.lines() {
        out.push_str(line);
        out.push('\n');
        if !spliced && line.trim_start().starts_with(&definition) {
            for insn in RESET_PREAMBLE {
                out.push_str("    ");
                out.push_str(insn);
                out.push('\n');
            }
            spliced = true;
        }
    }

    spliced.then_some(out)
}
