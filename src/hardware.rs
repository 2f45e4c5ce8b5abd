//! Memory-mapped I/O registers of the source platform and the wrapper
//! subroutines that stand in for them on the target.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::{Address, Mnemonic};

/// Hardware block a register belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Subsystem {
    /// Picture processing unit and sprite DMA
    VideoIo,
    /// Audio processing unit
    AudioIo,
    /// Controller ports
    InputIo,
}

impl fmt::Display for Subsystem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Subsystem::VideoIo => write!(f, "PPU"),
            Subsystem::AudioIo => write!(f, "APU"),
            Subsystem::InputIo => write!(f, "INPUT"),
        }
    }
}

/// Direction of a register access.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    Read,
    Write,
}

impl Direction {
    /// Stores write their operand; everything else is treated as a read
    pub fn of(mnemonic: Mnemonic) -> Self {
        if mnemonic.is_store() {
            Direction::Write
        } else {
            Direction::Read
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Read => write!(f, "read"),
            Direction::Write => write!(f, "write"),
        }
    }
}

/// One memory-mapped register and the wrapper symbols that replace raw
/// accesses to it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HardwareRegister {
    /// Source CPU address
    pub address: Address,
    /// Symbolic register name (e.g. "PPUCTRL")
    pub name: String,
    /// Owning hardware block
    pub subsystem: Subsystem,
    /// Subroutine called in place of a store
    pub writer: String,
    /// Subroutine called in place of a load
    pub reader: String,
}

impl HardwareRegister {
    /// Construct a register entry
    pub fn new(
        address: Address,
        name: &str,
        subsystem: Subsystem,
        writer: &str,
        reader: &str,
    ) -> Self {
        Self {
            address,
            name: name.to_string(),
            subsystem,
            writer: writer.to_string(),
            reader: reader.to_string(),
        }
    }

    /// The wrapper symbol for an access in `direction`
    pub fn wrapper(&self, direction: Direction) -> &str {
        match direction {
            Direction::Read => &self.reader,
            Direction::Write => &self.writer,
        }
    }
}

/// Static address → register table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Vec<HardwareRegister>", into = "Vec<HardwareRegister>")]
pub struct HardwareTable {
    registers: BTreeMap<Address, HardwareRegister>,
}

impl HardwareTable {
    /// An empty table: no address is treated as hardware
    pub fn empty() -> Self {
        Self {
            registers: BTreeMap::new(),
        }
    }

    /// The NES PPU, APU and controller registers
    pub fn nes() -> Self {
        use Subsystem::*;

        let entries = [
            (0x2000, "PPUCTRL", VideoIo, "PPU_CTRL_WRITE", "PPU_CTRL_READ"),
            (0x2001, "PPUMASK", VideoIo, "PPU_MASK_WRITE", "PPU_MASK_READ"),
            (0x2002, "PPUSTATUS", VideoIo, "PPU_STATUS_WRITE", "PPU_STATUS_READ"),
            (0x2003, "OAMADDR", VideoIo, "OAM_ADDR_WRITE", "OAM_ADDR_READ"),
            (0x2004, "OAMDATA", VideoIo, "OAM_DATA_WRITE", "OAM_DATA_READ"),
            (0x2005, "PPUSCROLL", VideoIo, "PPU_SCROLL_WRITE", "PPU_SCROLL_READ"),
            (0x2006, "PPUADDR", VideoIo, "PPU_ADDR_WRITE", "PPU_ADDR_READ"),
            (0x2007, "PPUDATA", VideoIo, "PPU_DATA_WRITE", "PPU_DATA_READ"),
            (0x4014, "OAMDMA", VideoIo, "OAM_DMA_TRIGGER", "OAM_DMA_READ"),
            (0x4000, "SQ1_VOL", AudioIo, "APU_SQ1_VOL", "APU_SQ1_VOL_READ"),
            (0x4001, "SQ1_SWEEP", AudioIo, "APU_SQ1_SWEEP", "APU_SQ1_SWEEP_READ"),
            (0x4002, "SQ1_LO", AudioIo, "APU_SQ1_LO", "APU_SQ1_LO_READ"),
            (0x4003, "SQ1_HI", AudioIo, "APU_SQ1_HI", "APU_SQ1_HI_READ"),
            (0x4004, "SQ2_VOL", AudioIo, "APU_SQ2_VOL", "APU_SQ2_VOL_READ"),
            (0x4005, "SQ2_SWEEP", AudioIo, "APU_SQ2_SWEEP", "APU_SQ2_SWEEP_READ"),
            (0x4006, "SQ2_LO", AudioIo, "APU_SQ2_LO", "APU_SQ2_LO_READ"),
            (0x4007, "SQ2_HI", AudioIo, "APU_SQ2_HI", "APU_SQ2_HI_READ"),
            (0x4008, "TRI_LINEAR", AudioIo, "APU_TRI_LINEAR", "APU_TRI_LINEAR_READ"),
            (0x400A, "TRI_LO", AudioIo, "APU_TRI_LO", "APU_TRI_LO_READ"),
            (0x400B, "TRI_HI", AudioIo, "APU_TRI_HI", "APU_TRI_HI_READ"),
            (0x400C, "NOISE_VOL", AudioIo, "APU_NOISE_VOL", "APU_NOISE_VOL_READ"),
            (0x400E, "NOISE_LO", AudioIo, "APU_NOISE_LO", "APU_NOISE_LO_READ"),
            (0x400F, "NOISE_HI", AudioIo, "APU_NOISE_HI", "APU_NOISE_HI_READ"),
            (0x4010, "DMC_FREQ", AudioIo, "APU_DMC_FREQ", "APU_DMC_FREQ_READ"),
            (0x4011, "DMC_RAW", AudioIo, "APU_DMC_RAW", "APU_DMC_RAW_READ"),
            (0x4012, "DMC_START", AudioIo, "APU_DMC_START", "APU_DMC_START_READ"),
            (0x4013, "DMC_LEN", AudioIo, "APU_DMC_LEN", "APU_DMC_LEN_READ"),
            (0x4015, "APU_STATUS", AudioIo, "APU_STATUS_WRITE", "APU_STATUS_READ"),
            (0x4016, "JOYPAD1", InputIo, "JOYPAD_STROBE_WRITE", "JOYPAD1_READ"),
            // $4017 is the frame counter when written and controller 2 when read
            (0x4017, "FRAME_CNT", AudioIo, "APU_FRAME_CNT", "JOYPAD2_READ"),
        ];

        entries
            .iter()
            .map(|&(addr, name, subsystem, writer, reader)| {
                HardwareRegister::new(addr, name, subsystem, writer, reader)
            })
            .collect::<Vec<_>>()
            .into()
    }

    /// Add or replace a register
    pub fn insert(&mut self, register: HardwareRegister) {
        self.registers.insert(register.address, register);
    }

    /// Look up the register at `address`
    pub fn get(&self, address: Address) -> Option<&HardwareRegister> {
        self.registers.get(&address)
    }

    /// Returns true if `address` is a hardware register
    pub fn contains(&self, address: Address) -> bool {
        self.registers.contains_key(&address)
    }

    /// Registers in address order
    pub fn iter(&self) -> impl Iterator<Item = &HardwareRegister> {
        self.registers.values()
    }

    /// Number of registers in the table
    pub fn len(&self) -> usize {
        self.registers.len()
    }

    /// Returns true if the table has no registers
    pub fn is_empty(&self) -> bool {
        self.registers.is_empty()
    }
}

impl Default for HardwareTable {
    fn default() -> Self {
        Self::nes()
    }
}

impl From<Vec<HardwareRegister>> for HardwareTable {
    fn from(entries: Vec<HardwareRegister>) -> Self {
        let mut table = Self::empty();
        for register in entries {
            table.insert(register);
        }
        table
    }
}

impl From<HardwareTable> for Vec<HardwareRegister> {
    fn from(table: HardwareTable) -> Self {
        table.registers.into_values().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nes_table_lookup() {
        let table = HardwareTable::nes();

        let ctrl = table.get(0x2000).unwrap();
        assert_eq!(ctrl.name, "PPUCTRL");
        assert_eq!(ctrl.subsystem, Subsystem::VideoIo);
        assert_eq!(ctrl.wrapper(Direction::Write), "PPU_CTRL_WRITE");

        let status = table.get(0x2002).unwrap();
        assert_eq!(status.wrapper(Direction::Read), "PPU_STATUS_READ");

        assert!(!table.contains(0x0200));
        assert!(!table.contains(0x4009));
    }

    #[test]
    fn test_shared_address_has_distinct_wrappers() {
        let table = HardwareTable::nes();
        let reg = table.get(0x4017).unwrap();
        assert_eq!(reg.wrapper(Direction::Write), "APU_FRAME_CNT");
        assert_eq!(reg.wrapper(Direction::Read), "JOYPAD2_READ");
    }

    #[test]
    fn test_direction_of_mnemonic() {
        assert_eq!(Direction::of(Mnemonic::Sta), Direction::Write);
        assert_eq!(Direction::of(Mnemonic::Stx), Direction::Write);
        assert_eq!(Direction::of(Mnemonic::Bit), Direction::Read);
        assert_eq!(Direction::of(Mnemonic::Inc), Direction::Read);
    }

    #[test]
    fn test_table_serde_round_trip() {
        let table = HardwareTable::nes();
        let json = serde_json::to_string(&table).unwrap();
        let back: HardwareTable = serde_json::from_str(&json).unwrap();
        assert_eq!(back, table);
        assert_eq!(back.len(), table.len());
    }
}
