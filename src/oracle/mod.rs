//! Oracle gateway: the only path by which generated code enters a listing.
//!
//! A flagged function is sent to an [`Oracle`] together with a fixed
//! instruction-set mapping brief. The reply is stripped of decoration and
//! re-validated; anything that fails, times out or does not define the
//! function's label is replaced by a stub. Every call appends exactly one
//! [`TranslationLogEntry`].

pub mod clean;
pub mod command;
pub mod log;
pub mod validate;

use std::collections::BTreeMap;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::flow::Function;
use crate::rewrite::{self, Provenance};
use crate::{Address, RetargetError};

use self::log::{TranslationLog, TranslationLogEntry};
use self::validate::Validator;

/// Comment oracles put on lines that need a human look
pub const REVIEW_MARKER: &str = "; REVIEW:";

/// Blocks below this confidence get a warning comment in the listing
pub const LOW_CONFIDENCE: f64 = 0.5;

/// Instruction-set mapping brief sent with every request.
pub const MAPPING_BRIEF: &str = "\
You translate NES 6502 functions into 65816 assembly for the SNES.
1. Reply with ca65 source for the 65816 only. No prose.
2. Keep the original behavior exactly.
3. Code runs with 8-bit A, X and Y (SEP #$30), matching the 6502.
4. The direct page register is $0000, so zero-page operands stay valid as direct-page operands.
5. Hardware registers ($2000-$401F) are reached through wrapper subroutines; never access them directly.
6. Mark every instruction you are unsure about with a comment: ; REVIEW: <reason>
7. Calls that cross a bank use JSL and return with RTL.
8. Self-modifying code keeps its patched bytes in WRAM bank $7E and is replaced by calls through pointer tables there.
9. Start with the function label given in the request.
10. Do not define labels starting with SKIP_, __ORACLE_ or __SCOPE_; those names are reserved.
";

/// Source program details passed along to the oracle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlatformMetadata {
    pub source_rom: String,
    pub mapper_name: String,
}

impl Default for PlatformMetadata {
    fn default() -> Self {
        Self {
            source_rom: "unknown".to_string(),
            mapper_name: "unknown".to_string(),
        }
    }
}

/// One translation request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OracleRequest {
    pub function_name: String,
    pub address: Address,
    pub caller_addresses: Vec<Address>,
    pub callee_addresses: Vec<Address>,
    /// 6502 source of the function body
    pub source_instruction_text: String,
    pub platform: PlatformMetadata,
    /// Fixed instruction-set mapping rules
    pub brief: String,
}

impl OracleRequest {
    /// Build the request for a recovered function
    pub fn for_function(function: &Function, source: String, platform: PlatformMetadata) -> Self {
        Self {
            function_name: function.name.clone(),
            address: function.entry,
            caller_addresses: function.callers.iter().copied().collect(),
            callee_addresses: function.callees.iter().copied().collect(),
            source_instruction_text: source,
            platform,
            brief: MAPPING_BRIEF.to_string(),
        }
    }
}

/// A translation backend. Replies are untrusted text.
pub trait Oracle: Send + Sync {
    fn translate(&self, request: &OracleRequest) -> anyhow::Result<String>;
}

/// Backend used when no oracle is configured; every call fails.
#[derive(Debug, Default, Clone, Copy)]
pub struct UnavailableOracle;

impl Oracle for UnavailableOracle {
    fn translate(&self, _request: &OracleRequest) -> anyhow::Result<String> {
        anyhow::bail!("no oracle configured")
    }
}

impl<T: Oracle + ?Sized> Oracle for Arc<T> {
    fn translate(&self, request: &OracleRequest) -> anyhow::Result<String> {
        (**self).translate(request)
    }
}

/// Why a call ended in the stub.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum OracleFailure {
    /// The backend returned an error
    #[error("oracle call failed: {0}")]
    Transport(String),

    /// No reply within the configured timeout
    #[error("oracle timed out after {0:?}")]
    Timeout(Duration),

    /// The reply did not pass validation
    #[error("rejected by validation: {0}")]
    Rejected(String),

    /// The reply never defines the requested label
    #[error("output does not define {0}")]
    MissingLabel(String),

    /// The reply defines a symbol the rewriter allocates itself
    #[error("output defines reserved symbol {0}")]
    ReservedSymbol(String),
}

/// Outcome of one gateway call.
#[derive(Debug, Clone, PartialEq)]
pub struct TranslationResult {
    /// The record appended to the log
    pub entry: TranslationLogEntry,
    /// Set when the stub was used
    pub failure: Option<OracleFailure>,
}

/// The fixed fallback body: trap, then return
pub fn stub_text(function_name: &str) -> String {
    format!("{}:\n    BRK\n    RTS\n", function_name)
}

/// Number of review markers in a reply
pub fn review_markers(text: &str) -> u32 {
    text.matches(REVIEW_MARKER).count() as u32
}

/// `max(0, 1 - 0.1 * markers)`, rounded to two decimals
pub fn confidence(review_markers: u32) -> f64 {
    let raw = (1.0 - 0.1 * review_markers as f64).max(0.0);
    (raw * 100.0).round() / 100.0
}

/// Symbols defined in `text`, as `name:` labels or `name =` / `name :=`
/// assignments, in order of appearance
pub fn defined_symbols(text: &str) -> Vec<&str> {
    text.lines()
        .filter_map(|line| {
            let line = line.trim_start();
            let end = line
                .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
                .unwrap_or(line.len());
            let (name, rest) = line.split_at(end);
            let rest = rest.trim_start();
            let defines = (rest.starts_with(':') && !rest.starts_with("::")) || rest.starts_with('=');
            (!name.is_empty() && defines).then_some(name)
        })
        .collect()
}

/// Returns true if some line of `text` defines `label`
pub fn defines_label(text: &str, label: &str) -> bool {
    defined_symbols(text).contains(&label)
}

/// Request/validate/score boundary around an [`Oracle`].
pub struct OracleGateway {
    oracle: Arc<dyn Oracle>,
    validator: Arc<dyn Validator>,
    timeout: Duration,
    log: TranslationLog,
}

impl OracleGateway {
    pub fn new(oracle: Arc<dyn Oracle>, validator: Arc<dyn Validator>, timeout: Duration) -> Self {
        Self {
            oracle,
            validator,
            timeout,
            log: TranslationLog::new(),
        }
    }

    /// Every entry appended so far
    pub fn log(&self) -> &TranslationLog {
        &self.log
    }

    /// Translate one function. Always returns a usable block and always
    /// appends one log entry.
    pub fn translate(&self, request: &OracleRequest) -> TranslationResult {
        let result = match self.call(request) {
            Ok(text) => {
                let markers = review_markers(&text);
                TranslationResult {
                    entry: TranslationLogEntry {
                        function_address: request.address,
                        function_name: request.function_name.clone(),
                        translated_text: text,
                        confidence: confidence(markers),
                        review_marker_count: markers,
                        provenance: Provenance::Oracle,
                        failure_reason: None,
                    },
                    failure: None,
                }
            }
            Err(failure) => {
                ::log::warn!(
                    "Using stub for {} at 0x{:04x}: {}",
                    request.function_name,
                    request.address,
                    failure
                );
                TranslationResult {
                    entry: TranslationLogEntry {
                        function_address: request.address,
                        function_name: request.function_name.clone(),
                        translated_text: stub_text(&request.function_name),
                        confidence: 0.0,
                        review_marker_count: 0,
                        provenance: Provenance::StubFallback,
                        failure_reason: Some(failure.to_string()),
                    },
                    failure: Some(failure),
                }
            }
        };

        self.log.append(result.entry.clone());
        result
    }

    /// Translate many functions on a pool of at most `concurrency` workers
    pub fn translate_all(
        &self,
        requests: &[OracleRequest],
        concurrency: usize,
    ) -> Result<BTreeMap<Address, TranslationLogEntry>, RetargetError> {
        if requests.is_empty() {
            return Ok(BTreeMap::new());
        }

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(concurrency.max(1))
            .thread_name(|i| format!("oracle-{}", i))
            .build()?;

        ::log::info!(
            "Sending {} function(s) to the oracle, {} at a time",
            requests.len(),
            concurrency.max(1)
        );

        let entries = pool.install(|| {
            requests
                .par_iter()
                .map(|request| {
                    let result = self.translate(request);
                    (request.address, result.entry)
                })
                .collect()
        });
        Ok(entries)
    }

    /// Call the backend with a timeout, then clean and validate the reply
    fn call(&self, request: &OracleRequest) -> Result<String, OracleFailure> {
        let reply = self.call_with_timeout(request)?;
        let text = clean::strip_decoration(&reply);

        self.validator
            .validate(&text)
            .map_err(|e| OracleFailure::Rejected(e.to_string()))?;

        if !defines_label(&text, &request.function_name) {
            return Err(OracleFailure::MissingLabel(request.function_name.clone()));
        }
        if let Some(reserved) = defined_symbols(&text)
            .into_iter()
            .find(|name| rewrite::is_reserved_symbol(name))
        {
            return Err(OracleFailure::ReservedSymbol(reserved.to_string()));
        }

        ::log::debug!(
            "Accepted oracle output for {} ({} lines)",
            request.function_name,
            text.lines().count()
        );
        Ok(text)
    }

    fn call_with_timeout(&self, request: &OracleRequest) -> Result<String, OracleFailure> {
        let (tx, rx) = mpsc::channel();
        let oracle = Arc::clone(&self.oracle);
        let owned = request.clone();

        // The worker is abandoned on timeout; its late reply is dropped
        thread::Builder::new()
            .name(format!("oracle-call-{:04x}", request.address))
            .spawn(move || {
                let _ = tx.send(oracle.translate(&owned));
            })
            .map_err(|e| OracleFailure::Transport(e.to_string()))?;

        match rx.recv_timeout(self.timeout) {
            Ok(Ok(reply)) => Ok(reply),
            Ok(Err(e)) => Err(OracleFailure::Transport(format!("{:#}", e))),
            Err(RecvTimeoutError::Timeout) => Err(OracleFailure::Timeout(self.timeout)),
            Err(RecvTimeoutError::Disconnected) => Err(OracleFailure::Transport(
                "oracle worker exited without replying".to_string(),
            )),
        }
    }
}
