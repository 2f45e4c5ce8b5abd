//! Fixed-size code windows used to split the image for emission.

use serde::{Deserialize, Serialize};

use crate::Address;

/// Default bank size: one 16K NES PRG bank
pub const DEFAULT_BANK_SIZE: usize = 0x4000;

/// One code window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bank {
    /// Zero-based bank number
    pub index: usize,
    /// First address in the bank
    pub start: Address,
    /// One past the last address, widened so the top bank can end at `$10000`
    pub end: u32,
}

impl Bank {
    /// Returns true if `addr` falls inside this bank
    pub fn contains(&self, addr: Address) -> bool {
        addr >= self.start && (addr as u32) < self.end
    }
}

/// How an image is partitioned into banks.
///
/// A bank is a pure function of the address: `(addr - base) / bank_size`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BankLayout {
    pub base: Address,
    pub size: usize,
    pub bank_size: usize,
}

impl BankLayout {
    /// Partition `size` bytes at `base` into banks of `bank_size` bytes
    pub fn new(base: Address, size: usize, bank_size: usize) -> Self {
        Self {
            base,
            size,
            bank_size: bank_size.max(1),
        }
    }

    /// Number of banks; an empty image still has one
    pub fn bank_count(&self) -> usize {
        ((self.size + self.bank_size - 1) / self.bank_size).max(1)
    }

    /// Bank index of an address, or `None` outside the image
    pub fn bank_of(&self, addr: Address) -> Option<usize> {
        if addr < self.base || (addr - self.base) as usize >= self.size {
            return None;
        }
        Some((addr - self.base) as usize / self.bank_size)
    }

    /// The bank with number `index`
    pub fn bank(&self, index: usize) -> Bank {
        let start = self.base as u32 + (index * self.bank_size) as u32;
        let end = (start + self.bank_size as u32).min(self.base as u32 + self.size as u32);
        Bank {
            index,
            start: start as Address,
            end: end.max(start),
        }
    }

    /// All banks in order
    pub fn banks(&self) -> Vec<Bank> {
        (0..self.bank_count()).map(|i| self.bank(i)).collect()
    }
}

impl Default for BankLayout {
    fn default() -> Self {
        Self::new(crate::PRG_BASE, 0, DEFAULT_BANK_SIZE)
    }
}
