//! Symbol assignment for recovered targets and the run-wide skip-label counter.

use std::collections::BTreeMap;
use std::ops::Range;
use std::sync::atomic::{AtomicU32, Ordering};

use crate::flow::Recovery;
use crate::{Address, FlowClass, Instruction};

/// Prefix of labels generated by branch expansion
pub const SKIP_PREFIX: &str = "SKIP_";

/// Symbols for every decoded control-transfer target.
///
/// Function entries use the function name, any other target is `L_XXXX`.
/// Targets that were never decoded get no symbol and stay numeric.
#[derive(Debug, Clone, Default)]
pub struct SymbolTable {
    names: BTreeMap<Address, String>,
}

impl SymbolTable {
    /// Build the table from a recovery result
    pub fn build(recovery: &Recovery) -> Self {
        let mut names: BTreeMap<Address, String> = recovery
            .functions
            .values()
            .map(|f| (f.entry, f.name.clone()))
            .collect();

        for insn in recovery.instructions.values() {
            let target = match insn.flow() {
                FlowClass::Call(t) | FlowClass::Jump(t) | FlowClass::Branch { target: t, .. } => t,
                _ => continue,
            };
            if recovery.instructions.contains_key(&target) {
                names.entry(target).or_insert_with(|| local_label(target));
            }
        }

        Self { names }
    }

    /// Symbol defined at `addr`, if any
    pub fn label_at(&self, addr: Address) -> Option<&str> {
        self.names.get(&addr).map(String::as_str)
    }

    /// Symbol that replaces the numeric operand of a control transfer
    pub fn operand_symbol(&self, insn: &Instruction) -> Option<&str> {
        match insn.flow() {
            FlowClass::Call(t) | FlowClass::Jump(t) | FlowClass::Branch { target: t, .. } => {
                self.label_at(t)
            }
            _ => None,
        }
    }

    /// Number of symbols
    pub fn len(&self) -> usize {
        self.names.len()
    }

    /// Returns true if no target got a symbol
    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

/// Label given to a non-entry jump or branch target
pub fn local_label(addr: Address) -> String {
    format!("L_{:04X}", addr)
}

/// Monotonic counter behind every `SKIP_n` label of a run.
///
/// Shared by reference across banks; numbers are never handed out twice.
#[derive(Debug, Default)]
pub struct LabelCounter {
    next: AtomicU32,
}

impl LabelCounter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take one fresh number
    pub fn fetch(&self) -> u32 {
        self.next.fetch_add(1, Ordering::Relaxed)
    }

    /// Reserve `n` consecutive numbers
    pub fn reserve(&self, n: u32) -> Range<u32> {
        let start = self.next.fetch_add(n, Ordering::Relaxed);
        start..start + n
    }

    /// Numbers handed out so far
    pub fn issued(&self) -> u32 {
        self.next.load(Ordering::Relaxed)
    }
}

/// Skip-label source for one bank: a reserved block first, then the shared
/// counter once the block runs out.
#[derive(Debug)]
pub struct SkipLabels<'a> {
    reserved: Range<u32>,
    counter: &'a LabelCounter,
}

impl<'a> SkipLabels<'a> {
    /// Draw from `reserved` before falling back to `counter`
    pub fn new(counter: &'a LabelCounter, reserved: Range<u32>) -> Self {
        Self { reserved, counter }
    }

    /// Draw straight from the shared counter
    pub fn unreserved(counter: &'a LabelCounter) -> Self {
        Self::new(counter, 0..0)
    }

    /// The next unused skip label
    pub fn next_label(&mut self) -> String {
        let n = self.reserved.next().unwrap_or_else(|| self.counter.fetch());
        format!("{}{}", SKIP_PREFIX, n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Arc;

    use crate::flow::recursive;
    use crate::hardware::HardwareTable;
    use crate::{Mos6502Decoder, ProgramImage};

    #[test]
    fn test_symbols_for_targets() {
        // LDX #0; BEQ $8007; JMP $8000; RTS
        let bytes = [0xA2, 0x00, 0xF0, 0x03, 0x4C, 0x00, 0x80, 0x60];
        let image = ProgramImage::new(bytes.to_vec(), 0x8000).with_vector("RESET", 0x8000);
        let recovery = recursive::run(&image, &Mos6502Decoder, &HardwareTable::nes(), 0x4000);
        let symbols = SymbolTable::build(&recovery);

        assert_eq!(symbols.label_at(0x8000), Some("RESET_HANDLER"));
        assert_eq!(symbols.label_at(0x8007), Some("L_8007"));
        assert_eq!(symbols.label_at(0x8002), None);
        assert_eq!(symbols.len(), 2);

        let branch = &recovery.instructions[&0x8002];
        assert_eq!(symbols.operand_symbol(branch), Some("L_8007"));
        let load = &recovery.instructions[&0x8000];
        assert_eq!(symbols.operand_symbol(load), None);
    }

    #[test]
    fn test_reserved_block_then_counter() {
        let counter = LabelCounter::new();
        let block = counter.reserve(2);
        let mut labels = SkipLabels::new(&counter, block);

        assert_eq!(labels.next_label(), "SKIP_0");
        assert_eq!(labels.next_label(), "SKIP_1");
        assert_eq!(labels.next_label(), "SKIP_2");
        assert_eq!(counter.issued(), 3);
    }

    #[test]
    fn test_counter_unique_across_threads() {
        let counter = Arc::new(LabelCounter::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let counter = Arc::clone(&counter);
                std::thread::spawn(move || {
                    let mut labels = SkipLabels::unreserved(&counter);
                    (0..100).map(|_| labels.next_label()).collect::<Vec<_>>()
                })
            })
            .collect();

        let mut all = HashSet::new();
        for handle in handles {
            for label in handle.join().unwrap() {
                assert!(all.insert(label));
            }
        }
        assert_eq!(all.len(), 800);
    }
}
