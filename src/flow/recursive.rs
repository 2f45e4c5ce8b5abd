//! Recursive-descent recovery over an explicit worklist

use std::collections::{BTreeSet, VecDeque};

use crate::flow::{body, Annotation, BankLayout, Function, RegisterAccessSite, Recovery};
use crate::hardware::{Direction, HardwareTable};
use crate::{Address, Decoder, EntryVector, FlowClass, Instruction, ProgramImage, PRG_BASE};

/// Recursive-descent recovery seeded from the image's entry vectors.
///
/// Follows calls, jumps and both sides of every conditional branch. Unknown
/// opcodes and out-of-range targets quietly end the current run, so the
/// result under-approximates the real control-flow graph but never contains
/// an address that was not reached.
///
/// # Arguments
/// * `image` - The program image to recover
/// * `decoder` - Decoder for the source ISA
/// * `hardware` - Register table used to classify I/O accesses
/// * `bank_size` - Size of the code windows used for emission
///
/// # Returns
/// The Instruction, Function and RegisterAccessSite tables
pub fn run(
    image: &ProgramImage,
    decoder: &dyn Decoder,
    hardware: &HardwareTable,
    bank_size: usize,
) -> Recovery {
    run_from(image, decoder, hardware, bank_size, &[])
}

/// Run recovery from the entry vectors plus extra entry points
pub fn run_from(
    image: &ProgramImage,
    decoder: &dyn Decoder,
    hardware: &HardwareTable,
    bank_size: usize,
    extra_entries: &[Address],
) -> Recovery {
    log::debug!(
        "Starting recursive descent over {} bytes at 0x{:04x}",
        image.size(),
        image.base()
    );

    let layout = BankLayout::new(image.base(), image.size(), bank_size);
    let mut recovery = Recovery::new(layout);
    let mut queue = VecDeque::new();

    for (entry, name) in entry_points(image, extra_entries) {
        if !image.contains(entry) {
            log::debug!("Entry {} at 0x{:04x} is outside the image", name, entry);
            continue;
        }
        recovery.upsert_function(entry, || name, None);
        queue.push_back(entry);
    }

    let mut seen = BTreeSet::new();

    while let Some(start) = queue.pop_front() {
        let mut at = start;

        loop {
            if !image.contains(at) || !seen.insert(at) {
                break;
            }

            let insn = match decoder.decode(image, at) {
                Ok(insn) => insn,
                Err(e) => {
                    log::trace!("Run from 0x{:04x} ends: {}", start, e);
                    break;
                }
            };

            classify_access(&mut recovery, hardware, &insn);

            let flow = insn.flow();
            let next = insn.fallthrough();
            recovery.instructions.insert(at, insn);

            match flow {
                FlowClass::Call(target) => {
                    if image.contains(target) {
                        recovery.upsert_function(target, || Function::default_name(target), Some(at));
                        if layout.bank_of(at) != layout.bank_of(target) {
                            recovery.annotate(at, Annotation::CrossBankCall);
                        }
                        queue.push_back(target);
                    } else {
                        log::debug!("Call at 0x{:04x} leaves the image (0x{:04x})", at, target);
                    }
                    at = next;
                }
                FlowClass::Jump(target) => {
                    queue.push_back(target);
                    break;
                }
                FlowClass::IndirectJump => {
                    recovery.indirect_jumps.insert(at);
                    break;
                }
                FlowClass::Branch { target, fallthrough } => {
                    queue.push_back(target);
                    queue.push_back(fallthrough);
                    at = fallthrough;
                }
                FlowClass::Terminator => break,
                FlowClass::Sequential => at = next,
            }
        }
    }

    body::assign(&mut recovery);

    log::debug!(
        "Recursive descent complete: {} instructions, {} functions, {} register accesses",
        recovery.instruction_count(),
        recovery.functions.len(),
        recovery.register_accesses.len()
    );

    recovery
}

/// Named seeds in a fixed order: platform vectors by priority, then any other
/// named vectors, then caller-supplied addresses.
fn entry_points(image: &ProgramImage, extra: &[Address]) -> Vec<(Address, String)> {
    let mut seeds = Vec::new();

    for vector in EntryVector::PRIORITY {
        if let Some(addr) = image.vector(vector) {
            seeds.push((addr, vector.handler_name().to_string()));
        }
    }

    for (name, addr) in image.vectors() {
        if EntryVector::from_key(name).is_none() {
            seeds.push((*addr, sanitize_symbol(name)));
        }
    }

    seeds.extend(extra.iter().map(|addr| (*addr, Function::default_name(*addr))));
    seeds
}

/// Record a hardware access site and flag accesses the rewriter cannot express.
fn classify_access(recovery: &mut Recovery, hardware: &HardwareTable, insn: &Instruction) {
    let Some(target) = insn.absolute_target() else {
        return;
    };

    if let Some(register) = hardware.get(target) {
        recovery.register_accesses.push(RegisterAccessSite {
            instruction_address: insn.address,
            hw_address: target,
            hw_name: register.name.clone(),
            subsystem: register.subsystem,
            direction: Direction::of(insn.mnemonic),
            mnemonic: insn.mnemonic,
        });

        if !insn.mnemonic.is_store() && !insn.mnemonic.is_load() {
            recovery.annotate(insn.address, Annotation::UnsupportedIoAccess);
        }
    } else if insn.mnemonic.is_store() && target >= PRG_BASE {
        recovery.annotate(insn.address, Annotation::BankSwitchWrite);
    }
}

/// Turn an arbitrary vector name into an assembler identifier
fn sanitize_symbol(name: &str) -> String {
    let mut out: String = name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
        .collect();
    if out.chars().next().map_or(true, |c| c.is_ascii_digit()) {
        out.insert(0, '_');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hardware::Subsystem;
    use crate::{Mnemonic, Mos6502Decoder};

    fn recover(bytes: &[u8], reset: Address) -> Recovery {
        let image = ProgramImage::new(bytes.to_vec(), 0x8000).with_vector("RESET", reset);
        run(&image, &Mos6502Decoder, &HardwareTable::nes(), 0x4000)
    }

    #[test]
    fn test_linear_run_to_return() {
        // LDA #$05; RTS; (unreached) NOP
        let recovery = recover(&[0xA9, 0x05, 0x60, 0xEA], 0x8000);

        assert_eq!(recovery.instruction_count(), 2);
        assert_eq!(recovery.instructions[&0x8000].mnemonic, Mnemonic::Lda);
        assert_eq!(recovery.instructions[&0x8002].mnemonic, Mnemonic::Rts);
        assert!(!recovery.instructions.contains_key(&0x8003));
        assert_eq!(recovery.function_at(0x8000).unwrap().name, "RESET_HANDLER");
    }

    #[test]
    fn test_call_creates_function_and_returns() {
        // $8000: JSR $8006; JMP $8000... ; $8006: RTS
        let bytes = [0x20, 0x06, 0x80, 0x4C, 0x00, 0x80, 0x60];
        let recovery = recover(&bytes, 0x8000);

        let callee = recovery.function_at(0x8006).unwrap();
        assert_eq!(callee.name, "sub_8006");
        assert!(callee.callers.contains(&0x8000));
        assert!(recovery.function_at(0x8000).unwrap().callees.contains(&0x8006));

        // The jump back to a visited address ends the run without re-emitting
        assert_eq!(recovery.instruction_count(), 3);
    }

    #[test]
    fn test_branch_follows_both_sides() {
        // $8000: BEQ +1; RTS; $8003: RTS
        let recovery = recover(&[0xF0, 0x01, 0x60, 0x60], 0x8000);
        assert_eq!(recovery.instruction_count(), 3);
        assert!(recovery.instructions.contains_key(&0x8002));
        assert!(recovery.instructions.contains_key(&0x8003));
    }

    #[test]
    fn test_unknown_opcode_ends_run() {
        let recovery = recover(&[0xEA, 0x02, 0xEA], 0x8000);
        assert_eq!(recovery.instruction_count(), 1);
    }

    #[test]
    fn test_out_of_range_targets_are_dropped() {
        // JMP $6000 (PRG-RAM) and a vector outside the image
        let image = ProgramImage::new(vec![0x4C, 0x00, 0x60], 0x8000)
            .with_vector("RESET", 0x8000)
            .with_vector("NMI", 0x9000);
        let recovery = run(&image, &Mos6502Decoder, &HardwareTable::nes(), 0x4000);

        assert_eq!(recovery.instruction_count(), 1);
        assert!(recovery.function_at(0x9000).is_none());
    }

    #[test]
    fn test_indirect_jump_recorded_not_followed() {
        let recovery = recover(&[0x6C, 0x00, 0x02, 0xEA], 0x8000);
        assert_eq!(recovery.instruction_count(), 1);
        assert!(recovery.indirect_jumps.contains(&0x8000));
    }

    #[test]
    fn test_register_access_sites() {
        // STA $2000; LDA $2002; STA $0300; RTS
        let bytes = [0x8D, 0x00, 0x20, 0xAD, 0x02, 0x20, 0x8D, 0x00, 0x03, 0x60];
        let recovery = recover(&bytes, 0x8000);

        assert_eq!(recovery.register_accesses.len(), 2);
        let write = &recovery.register_accesses[0];
        assert_eq!(write.instruction_address, 0x8000);
        assert_eq!(write.hw_name, "PPUCTRL");
        assert_eq!(write.direction, Direction::Write);
        assert_eq!(write.subsystem, Subsystem::VideoIo);

        let read = &recovery.register_accesses[1];
        assert_eq!(read.hw_address, 0x2002);
        assert_eq!(read.direction, Direction::Read);
    }

    #[test]
    fn test_mapper_and_rmw_annotations() {
        // STA $8000 (mapper write); INC $2000; RTS
        let bytes = [0x8D, 0x00, 0x80, 0xEE, 0x00, 0x20, 0x60];
        let recovery = recover(&bytes, 0x8000);

        assert!(recovery.annotations_at(0x8000).any(|a| a == Annotation::BankSwitchWrite));
        assert!(recovery.annotations_at(0x8003).any(|a| a == Annotation::UnsupportedIoAccess));
    }

    #[test]
    fn test_cross_bank_call_annotated() {
        let mut bytes = vec![0xEA; 0x8000];
        bytes[0] = 0x20; // JSR $C000
        bytes[1] = 0x00;
        bytes[2] = 0xC0;
        bytes[3] = 0x60;
        bytes[0x4000] = 0x60;

        let recovery = recover(&bytes, 0x8000);
        assert!(recovery.annotations_at(0x8000).any(|a| a == Annotation::CrossBankCall));
        assert!(recovery.function_at(0xC000).is_some());
    }

    #[test]
    fn test_vector_names_ignore_discovery_order() {
        // RESET calls the NMI handler before the NMI seed is processed
        let image = ProgramImage::new(vec![0x20, 0x04, 0x80, 0x60, 0x40], 0x8000)
            .with_vector("RESET", 0x8000)
            .with_vector("NMI", 0x8004);
        let recovery = run(&image, &Mos6502Decoder, &HardwareTable::nes(), 0x4000);

        let nmi = recovery.function_at(0x8004).unwrap();
        assert_eq!(nmi.name, "NMI_HANDLER");
        assert!(nmi.callers.contains(&0x8000));
    }

    #[test]
    fn test_deterministic() {
        let bytes = [
            0xA2, 0x00, 0xBD, 0x00, 0x03, 0x8D, 0x07, 0x20, 0xE8, 0xD0, 0xF7, 0x20, 0x11, 0x80,
            0x4C, 0x00, 0x80, 0x60,
        ];
        let a = recover(&bytes, 0x8000);
        let b = recover(&bytes, 0x8000);
        assert_eq!(a, b);
    }

    #[test]
    fn test_bounded_by_image_size() {
        // Every byte an opcode: at most one instruction per byte
        let bytes = vec![0xEA; 64];
        let recovery = recover(&bytes, 0x8000);
        assert!(recovery.instruction_count() <= bytes.len());
    }

    #[test]
    fn test_sanitize_symbol() {
        assert_eq!(sanitize_symbol("SCANLINE IRQ"), "SCANLINE_IRQ");
        assert_eq!(sanitize_symbol("1up"), "_1up");
    }
}
