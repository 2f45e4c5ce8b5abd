//! Function bodies: the instructions reachable from an entry without
//! following a call and without walking into another function's entry.

use std::collections::BTreeSet;

use crate::flow::Recovery;
use crate::{Address, FlowClass};

/// Fill in `body` and `callees` for every function in `recovery`
pub fn assign(recovery: &mut Recovery) {
    let entries: BTreeSet<Address> = recovery.functions.keys().copied().collect();

    for entry in &entries {
        let (body, callees) = walk(recovery, *entry, &entries);
        if let Some(function) = recovery.functions.get_mut(entry) {
            function.body = body;
            function.callees = callees;
        }
    }
}

fn walk(
    recovery: &Recovery,
    entry: Address,
    entries: &BTreeSet<Address>,
) -> (Vec<Address>, BTreeSet<Address>) {
    let mut body = BTreeSet::new();
    let mut callees = BTreeSet::new();
    let mut stack = vec![entry];

    while let Some(at) = stack.pop() {
        if at != entry && entries.contains(&at) {
            continue;
        }
        let Some(insn) = recovery.instructions.get(&at) else {
            continue;
        };
        if !body.insert(at) {
            continue;
        }

        match insn.flow() {
            FlowClass::Call(target) => {
                if entries.contains(&target) {
                    callees.insert(target);
                }
                stack.push(insn.fallthrough());
            }
            FlowClass::Jump(target) => stack.push(target),
            FlowClass::Branch { target, fallthrough } => {
                stack.push(fallthrough);
                stack.push(target);
            }
            FlowClass::IndirectJump | FlowClass::Terminator => {}
            FlowClass::Sequential => stack.push(insn.fallthrough()),
        }
    }

    (body.into_iter().collect(), callees)
}
