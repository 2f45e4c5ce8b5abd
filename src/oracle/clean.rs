//! Strip the decoration an oracle wraps around its code block.

/// Extract the assembler text from an oracle reply.
///
/// If the reply contains a fenced block, only the first block's contents are
/// kept. Line endings are normalized and surrounding blank lines dropped.
pub fn strip_decoration(reply: &str) -> String {
    let normalized = reply.replace("\r\n", "\n");

    let body = match fenced_block(&normalized) {
        Some(block) => block,
        None => normalized.as_str(),
    };

    let lines: Vec<&str> = body.lines().map(str::trim_end).collect();
    let start = lines.iter().position(|l| !l.is_empty()).unwrap_or(lines.len());
    let end = lines.iter().rposition(|l| !l.is_empty()).map_or(start, |i| i + 1);

    let mut out = lines[start..end].join("\n");
    if !out.is_empty() {
        out.push('\n');
    }
    out
}

/// Contents of the first ```-fenced block, without the fence lines
fn fenced_block(text: &str) -> Option<&str> {
    let open = text.find("```")?;
    let after_open = &text[open + 3..];
    // The rest of the opening line is a language tag
    let content_start = after_open.find('\n')? + 1;
    let content = &after_open[content_start..];
    let close = content.find("```").unwrap_or(content.len());
    Some(&content[..close])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_code_passes_through() {
        assert_eq!(strip_decoration("FOO:\n    RTS\n"), "FOO:\n    RTS\n");
    }

    #[test]
    fn test_fenced_block_extracted() {
        let reply = "Here is the translation:\n```asm\nFOO:\n    RTS\n```\nLet me know!";
        assert_eq!(strip_decoration(reply), "FOO:\n    RTS\n");
    }

    #[test]
    fn test_unterminated_fence() {
        let reply = "```\r\nFOO:\r\n    RTS   \r\n";
        assert_eq!(strip_decoration(reply), "FOO:\n    RTS\n");
    }

    #[test]
    fn test_blank_reply() {
        assert_eq!(strip_decoration("\n\n  \n"), "");
    }
}
