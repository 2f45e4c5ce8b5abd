//! Thin PRG-ROM reader: maps raw PRG bytes into the CPU window and reads the
//! interrupt vectors from its last six bytes.

use std::fmt;

use crate::{Address, EntryVector, ProgramImage, RetargetError};

/// Size of one NES PRG bank
pub const PRG_BANK_SIZE: usize = 0x4000;

/// Size of the CPU window PRG-ROM is mapped into (`$8000-$FFFF`)
pub const PRG_WINDOW_SIZE: usize = 0x8000;

/// Offsets of the vectors from the end of the CPU window
const NMI_FROM_END: usize = 6;
const RESET_FROM_END: usize = 4;
const IRQ_FROM_END: usize = 2;

/// The three platform vectors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VectorTable {
    pub nmi: Address,
    pub reset: Address,
    pub irq: Address,
}

impl VectorTable {
    /// Iterate over `(vector, address)` pairs
    pub fn entries(&self) -> [(EntryVector, Address); 3] {
        [
            (EntryVector::Nmi, self.nmi),
            (EntryVector::Reset, self.reset),
            (EntryVector::Irq, self.irq),
        ]
    }
}

/// Raw PRG-ROM contents as extracted from the cartridge container.
#[derive(Debug, Clone)]
pub struct PrgImage {
    prg: Vec<u8>,
}

impl PrgImage {
    /// Wrap raw PRG bytes
    pub fn new(prg: Vec<u8>) -> Self {
        Self { prg }
    }

    /// The bytes visible in the CPU window at power-on.
    ///
    /// Images up to 32K are mapped flush against `$FFFF` (a 16K image appears
    /// at `$C000`). Larger images show their first bank at `$8000` and their
    /// last bank fixed at `$C000`; the other banks are only reachable through
    /// mapper writes and are not part of the static image.
    pub fn window(&self) -> (Address, Vec<u8>) {
        if self.prg.len() <= PRG_WINDOW_SIZE {
            let base = (0x10000 - self.prg.len()) as Address;
            (base, self.prg.clone())
        } else {
            log::info!(
                "PRG is {} KB; mapping bank 0 and the last bank into the CPU window",
                self.prg.len() / 1024
            );
            let mut bytes = Vec::with_capacity(PRG_WINDOW_SIZE);
            bytes.extend_from_slice(&self.prg[..PRG_BANK_SIZE]);
            bytes.extend_from_slice(&self.prg[self.prg.len() - PRG_BANK_SIZE..]);
            (0x8000, bytes)
        }
    }

    /// Read NMI, RESET and IRQ from the end of the window
    pub fn vectors(&self) -> Result<VectorTable, RetargetError> {
        let (_, bytes) = self.window();
        if bytes.len() < NMI_FROM_END {
            return Err(RetargetError::InvalidImage(format!(
                "PRG of {} bytes is too small to hold the vector table",
                bytes.len()
            )));
        }

        let read = |from_end: usize| {
            let at = bytes.len() - from_end;
            u16::from_le_bytes([bytes[at], bytes[at + 1]])
        };

        Ok(VectorTable {
            nmi: read(NMI_FROM_END),
            reset: read(RESET_FROM_END),
            irq: read(IRQ_FROM_END),
        })
    }

    /// Build the program image with all three vectors attached
    pub fn into_program_image(self) -> Result<ProgramImage, RetargetError> {
        let vectors = self.vectors()?;
        let (base, bytes) = self.window();

        let image = vectors
            .entries()
            .iter()
            .fold(ProgramImage::new(bytes, base), |image, (vector, addr)| {
                image.with_vector(vector.key(), *addr)
            });

        log::debug!(
            "PRG image at 0x{:04x}, {} bytes, NMI=0x{:04x} RESET=0x{:04x} IRQ=0x{:04x}",
            base,
            image.size(),
            vectors.nmi,
            vectors.reset,
            vectors.irq
        );

        Ok(image)
    }
}

impl fmt::Display for PrgImage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PrgImage({} KB)", self.prg.len() / 1024)
    }
}
