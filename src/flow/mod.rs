//! Control-flow recovery: function, instruction and register-access tables.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::hardware::{Direction, Subsystem};
use crate::{Address, Instruction, Mnemonic};

pub mod bank;
pub mod body;
pub mod recursive;

pub use self::bank::{Bank, BankLayout};

/// One recovered function.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Function {
    /// Entry address; unique per function
    pub entry: Address,
    /// Assembler symbol for the entry
    pub name: String,
    /// Addresses of the call sites that reach this function
    pub callers: BTreeSet<Address>,
    /// Entry addresses of functions this one calls
    pub callees: BTreeSet<Address>,
    /// Addresses of the instructions reachable without following a call
    pub body: Vec<Address>,
}

impl Function {
    /// Create a function with no known callers, callees or body
    pub fn new(entry: Address, name: impl Into<String>) -> Self {
        Self {
            entry,
            name: name.into(),
            callers: BTreeSet::new(),
            callees: BTreeSet::new(),
            body: Vec::new(),
        }
    }

    /// Default name for a function found through a call
    pub fn default_name(entry: Address) -> String {
        format!("sub_{:04X}", entry)
    }
}

/// A hardware register touched by an instruction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterAccessSite {
    /// Address of the accessing instruction
    pub instruction_address: Address,
    /// Register address
    pub hw_address: Address,
    /// Register name from the hardware table
    pub hw_name: String,
    /// Hardware block
    pub subsystem: Subsystem,
    /// Read or write
    pub direction: Direction,
    /// Accessing mnemonic
    pub mnemonic: Mnemonic,
}

/// Facts about an instruction that force its function through the oracle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Annotation {
    /// The instruction is patched at run time
    SelfModifying,
    /// A call whose target lives in another code bank
    CrossBankCall,
    /// A store into the ROM window (mapper register write)
    BankSwitchWrite,
    /// A hardware register access that is neither a plain load nor a plain store
    UnsupportedIoAccess,
}

impl fmt::Display for Annotation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Annotation::SelfModifying => write!(f, "self-modifying"),
            Annotation::CrossBankCall => write!(f, "cross-bank call"),
            Annotation::BankSwitchWrite => write!(f, "bank-switch write"),
            Annotation::UnsupportedIoAccess => write!(f, "unsupported I/O access"),
        }
    }
}

/// Everything the recoverer learned about one image.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Recovery {
    /// Decoded instructions keyed by address
    pub instructions: BTreeMap<Address, Instruction>,
    /// Functions keyed by entry address
    pub functions: BTreeMap<Address, Function>,
    /// Hardware accesses in discovery order
    pub register_accesses: Vec<RegisterAccessSite>,
    /// Per-instruction annotations
    pub annotations: BTreeMap<Address, BTreeSet<Annotation>>,
    /// Indirect jumps that were recorded but not followed
    pub indirect_jumps: BTreeSet<Address>,
    /// Bank partition of the image
    pub layout: BankLayout,
}

impl Recovery {
    /// Empty tables for an image partitioned by `layout`
    pub fn new(layout: BankLayout) -> Self {
        Self {
            layout,
            ..Self::default()
        }
    }

    /// Number of decoded instructions
    pub fn instruction_count(&self) -> usize {
        self.instructions.len()
    }

    /// The function whose entry is `addr`
    pub fn function_at(&self, addr: Address) -> Option<&Function> {
        self.functions.get(&addr)
    }

    /// Insert a function or merge a caller into an existing one.
    ///
    /// Returns true when the record is new.
    pub fn upsert_function(
        &mut self,
        entry: Address,
        name: impl FnOnce() -> String,
        caller: Option<Address>,
    ) -> bool {
        let mut created = false;
        let function = self.functions.entry(entry).or_insert_with(|| {
            created = true;
            Function::new(entry, name())
        });
        if let Some(caller) = caller {
            function.callers.insert(caller);
        }
        created
    }

    /// Attach an annotation to an instruction address
    pub fn annotate(&mut self, addr: Address, annotation: Annotation) {
        self.annotations.entry(addr).or_default().insert(annotation);
    }

    /// Annotations on one instruction
    pub fn annotations_at(&self, addr: Address) -> impl Iterator<Item = Annotation> + '_ {
        self.annotations.get(&addr).into_iter().flatten().copied()
    }

    /// Instructions that fall inside `bank`, in address order
    pub fn bank_instructions<'a>(&'a self, bank: &Bank) -> impl Iterator<Item = &'a Instruction> + 'a {
        let (start, end) = (bank.start, bank.end);
        self.instructions
            .range(start..)
            .take_while(move |(addr, _)| (**addr as u32) < end)
            .map(|(_, insn)| insn)
    }

    /// Functions whose entry falls inside `bank`
    pub fn bank_functions<'a>(&'a self, bank: &Bank) -> impl Iterator<Item = &'a Function> + 'a {
        let (start, end) = (bank.start, bank.end);
        self.functions
            .range(start..)
            .take_while(move |(addr, _)| (**addr as u32) < end)
            .map(|(_, func)| func)
    }
}
