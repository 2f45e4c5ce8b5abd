//! Hardware register accesses become calls to wrapper subroutines.

use serde::{Deserialize, Serialize};

use crate::hardware::{Direction, HardwareTable};
use crate::Instruction;

/// A raw register access replaced by a wrapper call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IoRewrite {
    /// Wrapper subroutine symbol
    pub wrapper: String,
    /// The replaced instruction as source text
    pub original: String,
}

/// Rewrite a plain load or store of a hardware register.
///
/// Returns `None` for instructions that do not touch the table, and for
/// read-modify-write accesses, which cannot be expressed as a single call.
pub fn rewrite(insn: &Instruction, hardware: &HardwareTable) -> Option<IoRewrite> {
    let register = hardware.get(insn.absolute_target()?)?;

    let direction = if insn.mnemonic.is_store() {
        Direction::Write
    } else if insn.mnemonic.is_load() {
        Direction::Read
    } else {
        return None;
    };

    Some(IoRewrite {
        wrapper: register.wrapper(direction).to_string(),
        original: insn.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Decoder, Mos6502Decoder, ProgramImage};
    use rstest::rstest;

    fn decode(bytes: &[u8]) -> Instruction {
        let image = ProgramImage::new(bytes.to_vec(), 0x8000);
        Mos6502Decoder.decode(&image, 0x8000).unwrap()
    }

    #[rstest]
    #[case(&[0x8D, 0x00, 0x20], "PPU_CTRL_WRITE", "STA $2000")]
    #[case(&[0x8E, 0x06, 0x20], "PPU_ADDR_WRITE", "STX $2006")]
    #[case(&[0x8C, 0x14, 0x40], "OAM_DMA_TRIGGER", "STY $4014")]
    #[case(&[0xAD, 0x02, 0x20], "PPU_STATUS_READ", "LDA $2002")]
    #[case(&[0x2C, 0x02, 0x20], "PPU_STATUS_READ", "BIT $2002")]
    #[case(&[0xAD, 0x16, 0x40], "JOYPAD1_READ", "LDA $4016")]
    #[case(&[0x9D, 0x07, 0x20], "PPU_DATA_WRITE", "STA $2007,X")]
    fn test_wrapper_selection(#[case] bytes: &[u8], #[case] wrapper: &str, #[case] original: &str) {
        let rewrite = rewrite(&decode(bytes), &HardwareTable::nes()).unwrap();
        assert_eq!(rewrite.wrapper, wrapper);
        assert_eq!(rewrite.original, original);
    }

    #[test]
    fn test_non_hardware_untouched() {
        let table = HardwareTable::nes();
        assert!(rewrite(&decode(&[0x8D, 0x00, 0x03]), &table).is_none());
        // Zero page never reaches the register window
        assert!(rewrite(&decode(&[0x85, 0x20]), &table).is_none());
    }

    #[test]
    fn test_read_modify_write_not_rewritten() {
        assert!(rewrite(&decode(&[0xEE, 0x00, 0x20]), &HardwareTable::nes()).is_none());
    }
}
