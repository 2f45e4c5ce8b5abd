//! Which functions the mechanical rewriter must hand to the oracle.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::flow::{Annotation, Recovery};
use crate::{Address, EntryVector, ProgramImage};

/// Why a function cannot be rewritten mechanically.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum FlagReason {
    /// The body jumps through a pointer
    IndirectJump,
    /// The body contains code patched at run time
    SelfModifying,
    /// The body calls into another bank
    CrossBankCall,
    /// The body writes a mapper register
    BankSwitchWrite,
    /// The body touches a hardware register with a read-modify-write
    UnsupportedIoAccess,
    /// The entry is the NMI or IRQ handler
    InterruptHandler(EntryVector),
}

impl FlagReason {
    fn from_annotation(annotation: Annotation) -> Self {
        match annotation {
            Annotation::SelfModifying => FlagReason::SelfModifying,
            Annotation::CrossBankCall => FlagReason::CrossBankCall,
            Annotation::BankSwitchWrite => FlagReason::BankSwitchWrite,
            Annotation::UnsupportedIoAccess => FlagReason::UnsupportedIoAccess,
        }
    }
}

impl fmt::Display for FlagReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FlagReason::IndirectJump => write!(f, "indirect jump"),
            FlagReason::SelfModifying => write!(f, "self-modifying code"),
            FlagReason::CrossBankCall => write!(f, "cross-bank call"),
            FlagReason::BankSwitchWrite => write!(f, "bank-switch write"),
            FlagReason::UnsupportedIoAccess => write!(f, "unsupported I/O access"),
            FlagReason::InterruptHandler(vector) => write!(f, "{} handler", vector),
        }
    }
}

/// Flagged functions by entry address, with every reason that applies.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FlagSet {
    flagged: BTreeMap<Address, BTreeSet<FlagReason>>,
    skipped: BTreeSet<Address>,
}

impl FlagSet {
    /// Scan every function body in `recovery`
    pub fn analyze(recovery: &Recovery, image: &ProgramImage) -> Self {
        let reset = image.vector(EntryVector::Reset);
        let interrupts: Vec<(EntryVector, Address)> = [EntryVector::Nmi, EntryVector::Irq]
            .into_iter()
            .filter_map(|v| image.vector(v).map(|addr| (v, addr)))
            .filter(|(_, addr)| Some(*addr) != reset)
            .collect();

        let mut flagged: BTreeMap<Address, BTreeSet<FlagReason>> = BTreeMap::new();

        for function in recovery.functions.values() {
            let mut reasons = BTreeSet::new();

            for (vector, addr) in &interrupts {
                if *addr == function.entry {
                    reasons.insert(FlagReason::InterruptHandler(*vector));
                }
            }

            for addr in &function.body {
                if recovery.indirect_jumps.contains(addr) {
                    reasons.insert(FlagReason::IndirectJump);
                }
                reasons.extend(recovery.annotations_at(*addr).map(FlagReason::from_annotation));
            }

            if !reasons.is_empty() {
                log::debug!(
                    "Flagging {} at 0x{:04x}: {}",
                    function.name,
                    function.entry,
                    reasons.iter().map(ToString::to_string).collect::<Vec<_>>().join(", ")
                );
                flagged.insert(function.entry, reasons);
            }
        }

        let skipped = skipped_instructions(recovery, &flagged);
        Self { flagged, skipped }
    }

    /// Returns true if the function at `entry` goes to the oracle
    pub fn is_flagged(&self, entry: Address) -> bool {
        self.flagged.contains_key(&entry)
    }

    /// Reasons recorded for one function
    pub fn reasons(&self, entry: Address) -> impl Iterator<Item = FlagReason> + '_ {
        self.flagged.get(&entry).into_iter().flatten().copied()
    }

    /// Entry addresses of all flagged functions
    pub fn entries(&self) -> impl Iterator<Item = Address> + '_ {
        self.flagged.keys().copied()
    }

    /// Returns true if the instruction at `addr` is left out of the mechanical stream
    pub fn is_skipped(&self, addr: Address) -> bool {
        self.skipped.contains(&addr)
    }

    /// Number of flagged functions
    pub fn len(&self) -> usize {
        self.flagged.len()
    }

    pub fn is_empty(&self) -> bool {
        self.flagged.is_empty()
    }
}

/// Instructions whose every owning function is flagged.
///
/// Tails shared with an unflagged function stay in the mechanical stream.
fn skipped_instructions(
    recovery: &Recovery,
    flagged: &BTreeMap<Address, BTreeSet<FlagReason>>,
) -> BTreeSet<Address> {
    let mut owners: BTreeMap<Address, (usize, usize)> = BTreeMap::new();
    for function in recovery.functions.values() {
        let is_flagged = flagged.contains_key(&function.entry);
        for addr in &function.body {
            let entry = owners.entry(*addr).or_default();
            entry.0 += 1;
            if is_flagged {
                entry.1 += 1;
            }
        }
    }

    owners
        .into_iter()
        .filter(|(_, (total, flagged))| *flagged > 0 && total == flagged)
        .map(|(addr, _)| addr)
        .collect()
}
