//! Run configuration, loaded from JSON with a default for every field.

use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::flow::bank::DEFAULT_BANK_SIZE;
use crate::flow::Annotation;
use crate::hardware::HardwareTable;
use crate::oracle::command::CommandOracle;
use crate::oracle::validate::{AssemblerValidator, SyntaxValidator, Validator};
use crate::oracle::PlatformMetadata;
use crate::{Address, RetargetError};

/// Oracle call limits and the optional command backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OracleConfig {
    /// Per-call timeout in milliseconds
    pub timeout_ms: u64,
    /// Maximum calls in flight
    pub concurrency: usize,
    /// External program used as the oracle
    pub command: Option<CommandConfig>,
}

impl Default for OracleConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 30_000,
            concurrency: 4,
            command: None,
        }
    }
}

/// An external program and its arguments.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandConfig {
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
}

/// How oracle output is re-validated.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ValidatorConfig {
    /// Built-in mnemonic and directive check
    #[default]
    Syntax,
    /// Run an external assembler
    Assembler {
        program: String,
        #[serde(default)]
        args: Vec<String>,
    },
}

/// An annotation supplied by the caller for one instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnnotationOverride {
    pub address: Address,
    pub annotation: Annotation,
}

/// Everything a run can be tuned with.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetargetConfig {
    /// Size of one emitted code bank in bytes
    pub bank_size: usize,
    pub oracle: OracleConfig,
    pub validator: ValidatorConfig,
    pub platform: PlatformMetadata,
    /// Replaces the built-in NES register table when set
    pub hardware: Option<HardwareTable>,
    /// Extra instruction annotations, e.g. known self-modifying code
    pub annotations: Vec<AnnotationOverride>,
    /// Entry points to seed besides the vectors
    pub extra_entries: Vec<Address>,
}

impl Default for RetargetConfig {
    fn default() -> Self {
        Self {
            bank_size: DEFAULT_BANK_SIZE,
            oracle: OracleConfig::default(),
            validator: ValidatorConfig::default(),
            platform: PlatformMetadata::default(),
            hardware: None,
            annotations: Vec::new(),
            extra_entries: Vec::new(),
        }
    }
}

impl RetargetConfig {
    /// Parse and check a JSON document
    pub fn from_json_str(json: &str) -> Result<Self, RetargetError> {
        let config: RetargetConfig = serde_json::from_str(json)?;
        config.check()?;
        Ok(config)
    }

    /// Load a JSON config file
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, RetargetError> {
        let path = path.as_ref();
        log::debug!("Loading configuration from {}", path.display());
        Self::from_json_str(&fs::read_to_string(path)?)
    }

    /// Reject values no run can use
    pub fn check(&self) -> Result<(), RetargetError> {
        if self.bank_size == 0 || self.bank_size > 0x10000 {
            return Err(RetargetError::Config(format!(
                "bank_size must be between 1 and 65536, got {}",
                self.bank_size
            )));
        }
        if self.oracle.concurrency == 0 {
            return Err(RetargetError::Config("oracle.concurrency must be at least 1".into()));
        }
        if self.oracle.timeout_ms == 0 {
            return Err(RetargetError::Config("oracle.timeout_ms must be positive".into()));
        }
        Ok(())
    }

    pub fn oracle_timeout(&self) -> Duration {
        Duration::from_millis(self.oracle.timeout_ms)
    }

    /// The configured register table, or the NES default
    pub fn hardware_table(&self) -> HardwareTable {
        self.hardware.clone().unwrap_or_else(HardwareTable::nes)
    }

    /// The validator selected by `validator`
    pub fn build_validator(&self) -> Arc<dyn Validator> {
        match &self.validator {
            ValidatorConfig::Syntax => Arc::new(SyntaxValidator::new()),
            ValidatorConfig::Assembler { program, args } => {
                Arc::new(AssemblerValidator::new(program.clone(), args.clone()))
            }
        }
    }

    /// The command backend, if one is configured. The child is killed once
    /// the oracle timeout has passed.
    pub fn command_oracle(&self) -> Option<CommandOracle> {
        self.oracle.command.as_ref().map(|c| {
            CommandOracle::new(c.program.clone(), c.args.clone()).with_timeout(self.oracle_timeout())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_empty_document_gives_defaults() {
        let config = RetargetConfig::from_json_str("{}").unwrap();
        assert_eq!(config, RetargetConfig::default());
        assert_eq!(config.bank_size, 0x4000);
        assert_eq!(config.oracle_timeout(), Duration::from_secs(30));
        assert_eq!(config.hardware_table(), HardwareTable::nes());
        assert!(config.command_oracle().is_none());
    }

    #[test]
    fn test_full_document() {
        let json = r#"{
            "bank_size": 8192,
            "oracle": {"timeout_ms": 500, "concurrency": 2,
                       "command": {"program": "translate.sh", "args": ["--fast"]}},
            "validator": {"kind": "assembler", "program": "ca65", "args": ["--cpu", "65816"]},
            "platform": {"source_rom": "game.nes", "mapper_name": "MMC1"},
            "hardware": [{"address": 8192, "name": "PPUCTRL", "subsystem": "VideoIo",
                          "writer": "PPUCTRL_W", "reader": "PPUCTRL_R"}],
            "annotations": [{"address": 32768, "annotation": "SelfModifying"}],
            "extra_entries": [33024]
        }"#;
        let config = RetargetConfig::from_json_str(json).unwrap();

        assert_eq!(config.bank_size, 0x2000);
        assert_eq!(config.oracle.concurrency, 2);
        assert!(config.command_oracle().is_some());
        assert!(matches!(config.validator, ValidatorConfig::Assembler { .. }));
        assert_eq!(config.platform.mapper_name, "MMC1");
        let hardware = config.hardware_table();
        assert_eq!(hardware.len(), 1);
        assert_eq!(hardware.get(0x2000).unwrap().writer, "PPUCTRL_W");
        assert_eq!(config.annotations[0].annotation, Annotation::SelfModifying);
        assert_eq!(config.extra_entries, vec![0x8100]);
    }

    #[test]
    fn test_rejects_zero_bank_size() {
        let err = RetargetConfig::from_json_str(r#"{"bank_size": 0}"#).unwrap_err();
        assert!(matches!(err, RetargetError::Config(_)));
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"oracle": {{"concurrency": 8}}}}"#).unwrap();

        let config = RetargetConfig::from_json_file(file.path()).unwrap();
        assert_eq!(config.oracle.concurrency, 8);
        assert_eq!(config.oracle.timeout_ms, 30_000);
    }
}
