//! Table-driven MOS 6502 instruction decoder.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::{Address, Decoder, Instruction, ProgramImage};

/// Errors that can occur during decoding
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    /// The byte at `address` is not a documented opcode
    #[error("Unknown opcode 0x{opcode:02x} at 0x{address:04x}")]
    UnknownOpcode { address: Address, opcode: u8 },

    /// The address is not mapped by the image
    #[error("Address 0x{0:04x} is outside the image bounds")]
    OutOfBounds(Address),
}

/// 6502 instruction mnemonics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Mnemonic {
    Adc, And, Asl, Bcc, Bcs, Beq, Bit, Bmi, Bne, Bpl, Brk, Bvc, Bvs, Clc,
    Cld, Cli, Clv, Cmp, Cpx, Cpy, Dec, Dex, Dey, Eor, Inc, Inx, Iny, Jmp,
    Jsr, Lda, Ldx, Ldy, Lsr, Nop, Ora, Pha, Php, Pla, Plp, Rol, Ror, Rti,
    Rts, Sbc, Sec, Sed, Sei, Sta, Stx, Sty, Tax, Tay, Tsx, Txa, Txs, Tya,
}

impl Mnemonic {
    /// Upper-case assembler spelling
    pub fn as_str(self) -> &'static str {
        use Mnemonic::*;
        match self {
            Adc => "ADC", And => "AND", Asl => "ASL", Bcc => "BCC", Bcs => "BCS",
            Beq => "BEQ", Bit => "BIT", Bmi => "BMI", Bne => "BNE", Bpl => "BPL",
            Brk => "BRK", Bvc => "BVC", Bvs => "BVS", Clc => "CLC", Cld => "CLD",
            Cli => "CLI", Clv => "CLV", Cmp => "CMP", Cpx => "CPX", Cpy => "CPY",
            Dec => "DEC", Dex => "DEX", Dey => "DEY", Eor => "EOR", Inc => "INC",
            Inx => "INX", Iny => "INY", Jmp => "JMP", Jsr => "JSR", Lda => "LDA",
            Ldx => "LDX", Ldy => "LDY", Lsr => "LSR", Nop => "NOP", Ora => "ORA",
            Pha => "PHA", Php => "PHP", Pla => "PLA", Plp => "PLP", Rol => "ROL",
            Ror => "ROR", Rti => "RTI", Rts => "RTS", Sbc => "SBC", Sec => "SEC",
            Sed => "SED", Sei => "SEI", Sta => "STA", Stx => "STX", Sty => "STY",
            Tax => "TAX", Tay => "TAY", Tsx => "TSX", Txa => "TXA", Txs => "TXS",
            Tya => "TYA",
        }
    }

    /// Returns true for the eight conditional relative branches
    pub fn is_branch(self) -> bool {
        matches!(
            self,
            Mnemonic::Bpl | Mnemonic::Bmi | Mnemonic::Bvc | Mnemonic::Bvs
                | Mnemonic::Bcc | Mnemonic::Bcs | Mnemonic::Bne | Mnemonic::Beq
        )
    }

    /// The branch taken exactly when this one is not taken
    pub fn inverse_branch(self) -> Option<Mnemonic> {
        match self {
            Mnemonic::Bpl => Some(Mnemonic::Bmi),
            Mnemonic::Bmi => Some(Mnemonic::Bpl),
            Mnemonic::Bvc => Some(Mnemonic::Bvs),
            Mnemonic::Bvs => Some(Mnemonic::Bvc),
            Mnemonic::Bcc => Some(Mnemonic::Bcs),
            Mnemonic::Bcs => Some(Mnemonic::Bcc),
            Mnemonic::Bne => Some(Mnemonic::Beq),
            Mnemonic::Beq => Some(Mnemonic::Bne),
            _ => None,
        }
    }

    /// Returns true for instructions that end a linear run with no successor
    pub fn is_terminator(self) -> bool {
        matches!(self, Mnemonic::Rts | Mnemonic::Rti | Mnemonic::Brk)
    }

    /// Store-class instructions: their memory operand is written
    pub fn is_store(self) -> bool {
        matches!(self, Mnemonic::Sta | Mnemonic::Stx | Mnemonic::Sty)
    }

    /// Load/test-class instructions: their memory operand is only read
    pub fn is_load(self) -> bool {
        matches!(self, Mnemonic::Lda | Mnemonic::Ldx | Mnemonic::Ldy | Mnemonic::Bit)
    }
}

impl fmt::Display for Mnemonic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 6502 addressing modes.
///
/// The mode fixes the operand length and how a target address is derived.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AddressingMode {
    /// No operand (`CLC`)
    Implied,
    /// Operates on A (`ASL A`)
    Accumulator,
    /// 8-bit constant (`LDA #$10`)
    Immediate,
    /// Zero page (`LDA $80`)
    ZeroPage,
    /// Zero page indexed by X (`LDA $80,X`)
    ZeroPageX,
    /// Zero page indexed by Y (`LDX $80,Y`)
    ZeroPageY,
    /// Full 16-bit address (`LDA $2002`)
    Absolute,
    /// Absolute indexed by X (`STA $0300,X`)
    AbsoluteX,
    /// Absolute indexed by Y (`LDA $0300,Y`)
    AbsoluteY,
    /// Pointer, JMP only (`JMP ($0200)`)
    Indirect,
    /// `(zp,X)`
    IndexedIndirect,
    /// `(zp),Y`
    IndirectIndexed,
    /// Signed 8-bit displacement for branches
    Relative,
}

impl AddressingMode {
    /// Number of operand bytes following the opcode
    pub fn operand_len(self) -> usize {
        use AddressingMode::*;
        match self {
            Implied | Accumulator => 0,
            Immediate | ZeroPage | ZeroPageX | ZeroPageY | IndexedIndirect | IndirectIndexed
            | Relative => 1,
            Absolute | AbsoluteX | AbsoluteY | Indirect => 2,
        }
    }

    /// Absolute and absolute indexed modes
    pub fn is_absolute(self) -> bool {
        matches!(
            self,
            AddressingMode::Absolute | AddressingMode::AbsoluteX | AddressingMode::AbsoluteY
        )
    }
}

/// Look up an opcode in the documented 6502 instruction set.
pub fn lookup(opcode: u8) -> Option<(Mnemonic, AddressingMode)> {
    use AddressingMode::*;
    use Mnemonic as M;

    let entry = match opcode {
        0x00 => (M::Brk, Implied),
        0x01 => (M::Ora, IndexedIndirect),
        0x05 => (M::Ora, ZeroPage),
        0x06 => (M::Asl, ZeroPage),
        0x08 => (M::Php, Implied),
        0x09 => (M::Ora, Immediate),
        0x0A => (M::Asl, Accumulator),
        0x0D => (M::Ora, Absolute),
        0x0E => (M::Asl, Absolute),
        0x10 => (M::Bpl, Relative),
        0x11 => (M::Ora, IndirectIndexed),
        0x15 => (M::Ora, ZeroPageX),
        0x16 => (M::Asl, ZeroPageX),
        0x18 => (M::Clc, Implied),
        0x19 => (M::Ora, AbsoluteY),
        0x1D => (M::Ora, AbsoluteX),
        0x1E => (M::Asl, AbsoluteX),
        0x20 => (M::Jsr, Absolute),
        0x21 => (M::And, IndexedIndirect),
        0x24 => (M::Bit, ZeroPage),
        0x25 => (M::And, ZeroPage),
        0x26 => (M::Rol, ZeroPage),
        0x28 => (M::Plp, Implied),
        0x29 => (M::And, Immediate),
        0x2A => (M::Rol, Accumulator),
        0x2C => (M::Bit, Absolute),
        0x2D => (M::And, Absolute),
        0x2E => (M::Rol, Absolute),
        0x30 => (M::Bmi, Relative),
        0x31 => (M::And, IndirectIndexed),
        0x35 => (M::And, ZeroPageX),
        0x36 => (M::Rol, ZeroPageX),
        0x38 => (M::Sec, Implied),
        0x39 => (M::And, AbsoluteY),
        0x3D => (M::And, AbsoluteX),
        0x3E => (M::Rol, AbsoluteX),
        0x40 => (M::Rti, Implied),
        0x41 => (M::Eor, IndexedIndirect),
        0x45 => (M::Eor, ZeroPage),
        0x46 => (M::Lsr, ZeroPage),
        0x48 => (M::Pha, Implied),
        0x49 => (M::Eor, Immediate),
        0x4A => (M::Lsr, Accumulator),
        0x4C => (M::Jmp, Absolute),
        0x4D => (M::Eor, Absolute),
        0x4E => (M::Lsr, Absolute),
        0x50 => (M::Bvc, Relative),
        0x51 => (M::Eor, IndirectIndexed),
        0x55 => (M::Eor, ZeroPageX),
        0x56 => (M::Lsr, ZeroPageX),
        0x58 => (M::Cli, Implied),
        0x59 => (M::Eor, AbsoluteY),
        0x5D => (M::Eor, AbsoluteX),
        0x5E => (M::Lsr, AbsoluteX),
        0x60 => (M::Rts, Implied),
        0x61 => (M::Adc, IndexedIndirect),
        0x65 => (M::Adc, ZeroPage),
        0x66 => (M::Ror, ZeroPage),
        0x68 => (M::Pla, Implied),
        0x69 => (M::Adc, Immediate),
        0x6A => (M::Ror, Accumulator),
        0x6C => (M::Jmp, Indirect),
        0x6D => (M::Adc, Absolute),
        0x6E => (M::Ror, Absolute),
        0x70 => (M::Bvs, Relative),
        0x71 => (M::Adc, IndirectIndexed),
        0x75 => (M::Adc, ZeroPageX),
        0x76 => (M::Ror, ZeroPageX),
        0x78 => (M::Sei, Implied),
        0x79 => (M::Adc, AbsoluteY),
        0x7D => (M::Adc, AbsoluteX),
        0x7E => (M::Ror, AbsoluteX),
        0x81 => (M::Sta, IndexedIndirect),
        0x84 => (M::Sty, ZeroPage),
        0x85 => (M::Sta, ZeroPage),
        0x86 => (M::Stx, ZeroPage),
        0x88 => (M::Dey, Implied),
        0x8A => (M::Txa, Implied),
        0x8C => (M::Sty, Absolute),
        0x8D => (M::Sta, Absolute),
        0x8E => (M::Stx, Absolute),
        0x90 => (M::Bcc, Relative),
        0x91 => (M::Sta, IndirectIndexed),
        0x94 => (M::Sty, ZeroPageX),
        0x95 => (M::Sta, ZeroPageX),
        0x96 => (M::Stx, ZeroPageY),
        0x98 => (M::Tya, Implied),
        0x99 => (M::Sta, AbsoluteY),
        0x9A => (M::Txs, Implied),
        0x9D => (M::Sta, AbsoluteX),
        0xA0 => (M::Ldy, Immediate),
        0xA1 => (M::Lda, IndexedIndirect),
        0xA2 => (M::Ldx, Immediate),
        0xA4 => (M::Ldy, ZeroPage),
        0xA5 => (M::Lda, ZeroPage),
        0xA6 => (M::Ldx, ZeroPage),
        0xA8 => (M::Tay, Implied),
        0xA9 => (M::Lda, Immediate),
        0xAA => (M::Tax, Implied),
        0xAC => (M::Ldy, Absolute),
        0xAD => (M::Lda, Absolute),
        0xAE => (M::Ldx, Absolute),
        0xB0 => (M::Bcs, Relative),
        0xB1 => (M::Lda, IndirectIndexed),
        0xB4 => (M::Ldy, ZeroPageX),
        0xB5 => (M::Lda, ZeroPageX),
        0xB6 => (M::Ldx, ZeroPageY),
        0xB8 => (M::Clv, Implied),
        0xB9 => (M::Lda, AbsoluteY),
        0xBA => (M::Tsx, Implied),
        0xBC => (M::Ldy, AbsoluteX),
        0xBD => (M::Lda, AbsoluteX),
        0xBE => (M::Ldx, AbsoluteY),
        0xC0 => (M::Cpy, Immediate),
        0xC1 => (M::Cmp, IndexedIndirect),
        0xC4 => (M::Cpy, ZeroPage),
        0xC5 => (M::Cmp, ZeroPage),
        0xC6 => (M::Dec, ZeroPage),
        0xC8 => (M::Iny, Implied),
        0xC9 => (M::Cmp, Immediate),
        0xCA => (M::Dex, Implied),
        0xCC => (M::Cpy, Absolute),
        0xCD => (M::Cmp, Absolute),
        0xCE => (M::Dec, Absolute),
        0xD0 => (M::Bne, Relative),
        0xD1 => (M::Cmp, IndirectIndexed),
        0xD5 => (M::Cmp, ZeroPageX),
        0xD6 => (M::Dec, ZeroPageX),
        0xD8 => (M::Cld, Implied),
        0xD9 => (M::Cmp, AbsoluteY),
        0xDD => (M::Cmp, AbsoluteX),
        0xDE => (M::Dec, AbsoluteX),
        0xE0 => (M::Cpx, Immediate),
        0xE1 => (M::Sbc, IndexedIndirect),
        0xE4 => (M::Cpx, ZeroPage),
        0xE5 => (M::Sbc, ZeroPage),
        0xE6 => (M::Inc, ZeroPage),
        0xE8 => (M::Inx, Implied),
        0xE9 => (M::Sbc, Immediate),
        0xEA => (M::Nop, Implied),
        0xEC => (M::Cpx, Absolute),
        0xED => (M::Sbc, Absolute),
        0xEE => (M::Inc, Absolute),
        0xF0 => (M::Beq, Relative),
        0xF1 => (M::Sbc, IndirectIndexed),
        0xF5 => (M::Sbc, ZeroPageX),
        0xF6 => (M::Inc, ZeroPageX),
        0xF8 => (M::Sed, Implied),
        0xF9 => (M::Sbc, AbsoluteY),
        0xFD => (M::Sbc, AbsoluteX),
        0xFE => (M::Inc, AbsoluteX),
        _ => return None,
    };

    Some(entry)
}

/// Target of a relative branch at `pc`: `pc + 2 + sign_extend(disp)`, wrapping.
pub fn branch_target(pc: Address, displacement: u8) -> Address {
    pc.wrapping_add(2)
        .wrapping_add(displacement as i8 as i16 as u16)
}

/// Render an instruction operand in ca65 syntax.
///
/// When `symbol` is given it replaces the numeric target of relative and
/// absolute operands, keeping any index suffix.
pub fn format_operand(insn: &Instruction, symbol: Option<&str>) -> String {
    let lo = insn.operand[0];
    let word = insn.operand_word();

    // `a:` keeps a low absolute address from being shrunk to zero page
    let absolute = |word: u16| match symbol {
        Some(sym) => sym.to_string(),
        None if word < 0x100 => format!("a:${:04X}", word),
        None => format!("${:04X}", word),
    };

    match insn.mode {
        AddressingMode::Implied => String::new(),
        AddressingMode::Accumulator => "A".to_string(),
        AddressingMode::Immediate => format!("#${:02X}", lo),
        AddressingMode::ZeroPage => format!("${:02X}", lo),
        AddressingMode::ZeroPageX => format!("${:02X},X", lo),
        AddressingMode::ZeroPageY => format!("${:02X},Y", lo),
        AddressingMode::Absolute => absolute(word),
        AddressingMode::AbsoluteX => format!("{},X", absolute(word)),
        AddressingMode::AbsoluteY => format!("{},Y", absolute(word)),
        AddressingMode::Indirect => format!("(${:04X})", word),
        AddressingMode::IndexedIndirect => format!("(${:02X},X)", lo),
        AddressingMode::IndirectIndexed => format!("(${:02X}),Y", lo),
        AddressingMode::Relative => match symbol {
            Some(sym) => sym.to_string(),
            None => format!("${:04X}", branch_target(insn.address, lo)),
        },
    }
}

/// Decoder for the documented NMOS 6502 instruction set.
#[derive(Debug, Default, Clone, Copy)]
pub struct Mos6502Decoder;

impl Mos6502Decoder {
    /// Construct a new decoder
    pub fn new() -> Self {
        Mos6502Decoder
    }
}

impl fmt::Display for Mos6502Decoder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Mos6502Decoder")
    }
}

impl Decoder for Mos6502Decoder {
    fn decode(&self, image: &ProgramImage, at: Address) -> Result<Instruction, DecodeError> {
        let offset = image.offset_of(at).ok_or(DecodeError::OutOfBounds(at))?;
        let bytes = image.bytes();
        let opcode = bytes[offset];

        let (mnemonic, mode) = lookup(opcode)
            .ok_or(DecodeError::UnknownOpcode { address: at, opcode })?;

        // Operand bytes past the end of the image read as zero
        let mut operand = [0u8; 2];
        for (i, slot) in operand.iter_mut().enumerate().take(mode.operand_len()) {
            *slot = bytes.get(offset + 1 + i).copied().unwrap_or(0);
        }

        let target = match mode {
            AddressingMode::Relative => Some(branch_target(at, operand[0])),
            AddressingMode::Absolute | AddressingMode::AbsoluteX | AddressingMode::AbsoluteY => {
                Some(u16::from_le_bytes(operand))
            }
            _ => None,
        };

        Ok(Instruction {
            address: at,
            opcode,
            mnemonic,
            mode,
            operand,
            length: 1 + mode.operand_len() as u8,
            target,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn image(bytes: &[u8]) -> ProgramImage {
        ProgramImage::new(bytes.to_vec(), 0x8000)
    }

    #[test]
    fn test_table_covers_documented_set() {
        let count = (0u8..=255).filter(|op| lookup(*op).is_some()).count();
        assert_eq!(count, 151);
    }

    #[test]
    fn test_decode_load_immediate() {
        let insn = Mos6502Decoder.decode(&image(&[0xA9, 0x05]), 0x8000).unwrap();

        assert_eq!(insn.mnemonic, Mnemonic::Lda);
        assert_eq!(insn.mode, AddressingMode::Immediate);
        assert_eq!(insn.operand_bytes(), &[0x05]);
        assert_eq!(insn.length, 2);
        assert_eq!(insn.target, None);
    }

    #[rstest]
    #[case(&[0x8D, 0x00, 0x20], "STA $2000", Some(0x2000))]
    #[case(&[0x9D, 0x00, 0x03], "STA $0300,X", Some(0x0300))]
    #[case(&[0xB9, 0x10, 0x00], "LDA a:$0010,Y", Some(0x0010))]
    #[case(&[0x6C, 0xFC, 0xFF], "JMP ($FFFC)", None)]
    #[case(&[0xB1, 0x40], "LDA ($40),Y", None)]
    #[case(&[0x01, 0x40], "ORA ($40,X)", None)]
    #[case(&[0x96, 0x10], "STX $10,Y", None)]
    #[case(&[0x0A], "ASL A", None)]
    #[case(&[0x60], "RTS", None)]
    fn test_decode_and_render(
        #[case] bytes: &[u8],
        #[case] text: &str,
        #[case] target: Option<Address>,
    ) {
        let insn = Mos6502Decoder.decode(&image(bytes), 0x8000).unwrap();
        assert_eq!(insn.to_string(), text);
        assert_eq!(insn.target, target);
        assert_eq!(insn.length as usize, bytes.len());
    }

    #[test]
    fn test_relative_targets_wrap() {
        // BNE -2 at $8000 loops onto itself
        let insn = Mos6502Decoder.decode(&image(&[0xD0, 0xFE]), 0x8000).unwrap();
        assert_eq!(insn.target, Some(0x8000));

        assert_eq!(branch_target(0xFFF0, 0x7F), 0x0071);
        assert_eq!(branch_target(0x0002, 0x80), 0xFF84);
    }

    #[test]
    fn test_truncated_operand_reads_zero() {
        let insn = Mos6502Decoder.decode(&image(&[0xEA, 0x8D, 0x07]), 0x8001).unwrap();
        assert_eq!(insn.mnemonic, Mnemonic::Sta);
        assert_eq!(insn.operand, [0x07, 0x00]);
        assert_eq!(insn.target, Some(0x0007));
    }

    #[test]
    fn test_unknown_opcode() {
        let err = Mos6502Decoder.decode(&image(&[0x02]), 0x8000).unwrap_err();
        assert_eq!(err, DecodeError::UnknownOpcode { address: 0x8000, opcode: 0x02 });
    }

    #[test]
    fn test_out_of_bounds() {
        let err = Mos6502Decoder.decode(&image(&[0xEA]), 0x8001).unwrap_err();
        assert_eq!(err, DecodeError::OutOfBounds(0x8001));
    }

    #[test]
    fn test_inverse_branches_pair_up() {
        for op in 0u8..=255 {
            if let Some((m, _)) = lookup(op) {
                if m.is_branch() {
                    let inv = m.inverse_branch().unwrap();
                    assert_ne!(inv, m);
                    assert_eq!(inv.inverse_branch(), Some(m));
                }
            }
        }
    }

    #[test]
    fn test_symbol_substitution() {
        let insn = Mos6502Decoder.decode(&image(&[0x20, 0x10, 0x80]), 0x8000).unwrap();
        assert_eq!(format_operand(&insn, Some("sub_8010")), "sub_8010");

        let insn = Mos6502Decoder.decode(&image(&[0xBD, 0x10, 0x80]), 0x8000).unwrap();
        assert_eq!(format_operand(&insn, Some("L_8010")), "L_8010,X");
    }
}
