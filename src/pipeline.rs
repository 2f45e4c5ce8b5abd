//! One retargeting run: recover, flag, consult the oracle, rewrite banks.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use rayon::prelude::*;

use crate::config::{AnnotationOverride, RetargetConfig};
use crate::flow::{recursive, Annotation, Recovery};
use crate::format::{self, OutputFormat};
use crate::hardware::HardwareTable;
use crate::oracle::log::TranslationLogEntry;
use crate::oracle::{Oracle, OracleGateway, OracleRequest, PlatformMetadata, UnavailableOracle};
use crate::rewrite::flag::FlagSet;
use crate::rewrite::labels::{LabelCounter, SkipLabels};
use crate::rewrite::{BankListing, Rewriter};
use crate::{Address, Decoder, EntryVector, Mos6502Decoder, ProgramImage, RetargetError};

/// Everything a run produces.
#[derive(Debug)]
pub struct RetargetOutput {
    /// Instruction, function and register-access tables
    pub recovery: Recovery,
    /// One rewritten listing per bank, in bank order
    pub banks: Vec<BankListing>,
    /// One entry per flagged function, ordered by address
    pub translations: Vec<TranslationLogEntry>,
    /// Skip labels drawn during the run
    pub skip_labels: u32,
}

impl RetargetOutput {
    /// Write the bank listings and tables into `dir`
    pub fn write_artifacts(&self, dir: impl AsRef<Path>, format: OutputFormat) -> Result<(), RetargetError> {
        format::write_artifacts(dir.as_ref(), self, format)
    }
}

/// Runs the whole pipeline over one image.
pub struct Retargeter {
    decoder: Box<dyn Decoder>,
    hardware: HardwareTable,
    bank_size: usize,
    annotations: Vec<AnnotationOverride>,
    extra_entries: Vec<Address>,
    platform: PlatformMetadata,
    concurrency: usize,
    gateway: OracleGateway,
}

impl Retargeter {
    /// Build a run from `config`, translating flagged functions with `oracle`
    pub fn new(config: &RetargetConfig, oracle: impl Oracle + 'static) -> Result<Self, RetargetError> {
        config.check()?;

        let oracle: Arc<dyn Oracle> = Arc::new(oracle);
        let gateway = OracleGateway::new(oracle, config.build_validator(), config.oracle_timeout());

        Ok(Self {
            decoder: Box::new(Mos6502Decoder::new()),
            hardware: config.hardware_table(),
            bank_size: config.bank_size,
            annotations: config.annotations.clone(),
            extra_entries: config.extra_entries.clone(),
            platform: config.platform.clone(),
            concurrency: config.oracle.concurrency,
            gateway,
        })
    }

    /// Build a run whose oracle is the configured command, if any
    pub fn from_config(config: &RetargetConfig) -> Result<Self, RetargetError> {
        match config.command_oracle() {
            Some(command) => Self::new(config, command),
            None => Self::new(config, UnavailableOracle),
        }
    }

    /// Replace the source decoder
    pub fn with_decoder(mut self, decoder: impl Decoder + 'static) -> Self {
        self.decoder = Box::new(decoder);
        self
    }

    /// Attach an annotation to an instruction before flagging
    pub fn with_annotation(mut self, address: Address, annotation: Annotation) -> Self {
        self.annotations.push(AnnotationOverride { address, annotation });
        self
    }

    /// The gateway, and through it the cumulative translation log
    pub fn gateway(&self) -> &OracleGateway {
        &self.gateway
    }

    /// Control-flow recovery with caller-supplied annotations applied
    pub fn recover(&self, image: &ProgramImage) -> Recovery {
        let mut recovery = recursive::run_from(
            image,
            self.decoder.as_ref(),
            &self.hardware,
            self.bank_size,
            &self.extra_entries,
        );
        for AnnotationOverride { address, annotation } in &self.annotations {
            if recovery.instructions.contains_key(address) {
                recovery.annotate(*address, *annotation);
            } else {
                log::warn!("Annotation {} at 0x{:04x} matches no instruction", annotation, address);
            }
        }
        recovery
    }

    /// Run recovery, oracle translation and the per-bank rewrite
    pub fn run(&self, image: &ProgramImage) -> Result<RetargetOutput, RetargetError> {
        let recovery = self.recover(image);
        let flags = FlagSet::analyze(&recovery, image);
        let rewriter = Rewriter::new(&recovery, &self.hardware, &flags, image.vector(EntryVector::Reset));

        let requests: Vec<OracleRequest> = flags
            .entries()
            .filter_map(|entry| recovery.function_at(entry))
            .map(|function| {
                OracleRequest::for_function(function, rewriter.source_text(function), self.platform.clone())
            })
            .collect();
        let translations: BTreeMap<Address, TranslationLogEntry> =
            self.gateway.translate_all(&requests, self.concurrency)?;

        // Reserve each bank's skip labels in bank order so numbering does not
        // depend on thread scheduling
        let counter = LabelCounter::new();
        let banks = recovery.layout.banks();
        let reserved: Vec<_> = banks
            .iter()
            .map(|bank| counter.reserve(rewriter.branch_count(bank)))
            .collect();

        let listings: Vec<BankListing> = banks
            .into_par_iter()
            .zip(reserved)
            .map(|(bank, block)| {
                let mut labels = SkipLabels::new(&counter, block);
                rewriter.rewrite_bank(bank, &mut labels, &translations)
            })
            .collect();

        let accepted = translations.values().filter(|e| e.accepted()).count();
        log::info!(
            "Retargeted {} instructions in {} functions across {} bank(s); {} flagged, {} accepted from the oracle",
            recovery.instruction_count(),
            recovery.functions.len(),
            listings.len(),
            translations.len(),
            accepted
        );

        let skip_labels = counter.issued();
        Ok(RetargetOutput {
            recovery,
            banks: listings,
            translations: translations.into_values().collect(),
            skip_labels,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_without_oracle_stubs_flagged() {
        // reset: LDA #5; RTS   nmi: RTI
        let image = ProgramImage::new(vec![0xA9, 0x05, 0x60, 0x40], 0x8000)
            .with_vector("RESET", 0x8000)
            .with_vector("NMI", 0x8003);
        let retargeter = Retargeter::new(&RetargetConfig::default(), UnavailableOracle).unwrap();
        let output = retargeter.run(&image).unwrap();

        assert_eq!(output.banks.len(), 1);
        assert_eq!(output.translations.len(), 1);
        assert_eq!(output.translations[0].function_name, "NMI_HANDLER");
        assert_eq!(output.translations[0].confidence, 0.0);
        assert_eq!(retargeter.gateway().log().len(), 1);
    }

    #[test]
    fn test_supplied_annotation_flags_function() {
        let image = ProgramImage::new(vec![0xEA, 0x60], 0x8000).with_vector("RESET", 0x8000);
        let retargeter = Retargeter::new(&RetargetConfig::default(), UnavailableOracle)
            .unwrap()
            .with_annotation(0x8000, Annotation::SelfModifying);
        let output = retargeter.run(&image).unwrap();

        assert_eq!(output.translations.len(), 1);
        assert_eq!(output.translations[0].function_address, 0x8000);
    }

    #[test]
    fn test_invalid_config_rejected() {
        let config = RetargetConfig {
            bank_size: 0,
            ..RetargetConfig::default()
        };
        assert!(Retargeter::new(&config, UnavailableOracle).is_err());
    }
}
