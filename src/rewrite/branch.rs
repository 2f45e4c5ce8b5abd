//! Branch-range elimination.
//!
//! A relative branch only reaches +/-128 bytes, which no longer holds once
//! code is moved into the target's address layout. Every conditional branch
//! is rewritten as an inverted branch over an absolute jump:
//!
//! ```text
//!     BNE SKIP_n
//!     JMP target
//! SKIP_n:
//! ```

use serde::{Deserialize, Serialize};

use crate::rewrite::labels::SkipLabels;
use crate::{Instruction, Mnemonic};

/// A conditional branch rewritten into three lines.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BranchExpansion {
    /// Branch on the opposite condition
    pub inverted: Mnemonic,
    /// Fresh label placed right after the jump
    pub skip_label: String,
    /// Operand of the jump: a symbol or a numeric address
    pub target: String,
}

impl BranchExpansion {
    /// The three output lines
    pub fn lines(&self) -> [String; 3] {
        [
            format!("    {} {}", self.inverted, self.skip_label),
            format!("    JMP {}", self.target),
            format!("{}:", self.skip_label),
        ]
    }
}

/// Expand `insn` if it is a conditional branch.
///
/// `target` is the operand text for the original target.
pub fn expand(insn: &Instruction, target: String, labels: &mut SkipLabels<'_>) -> Option<BranchExpansion> {
    let inverted = insn.mnemonic.inverse_branch()?;
    Some(BranchExpansion {
        inverted,
        skip_label: labels.next_label(),
        target,
    })
}
