//! Emitted artifacts: bank listings plus the recovered and translation tables

mod csv;
mod json;
pub mod rows;

pub use self::csv::*;
pub use self::json::*;
pub use self::rows::{FunctionRow, InstructionRow, LineRow, LineTag, RegisterAccessRow, TranslationRow};

use std::fmt;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;
use std::str::FromStr;

use clap::ValueEnum;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::flow::{Function, RegisterAccessSite};
use crate::oracle::log::TranslationLogEntry;
use crate::pipeline::RetargetOutput;
use crate::rewrite::TranslationLine;
use crate::{Instruction, RetargetError};

/// Supported encodings for the emitted tables
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable listing (not read back)
    Text,
    /// JSON array per table
    Json,
    /// JSON Lines format (one JSON object per line)
    JsonLines,
    /// CSV format (comma-separated values)
    Csv,
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutputFormat::Text => write!(f, "text"),
            OutputFormat::Json => write!(f, "json"),
            OutputFormat::JsonLines => write!(f, "jsonl"),
            OutputFormat::Csv => write!(f, "csv"),
        }
    }
}

impl FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "text" | "txt" => Ok(OutputFormat::Text),
            "json" => Ok(OutputFormat::Json),
            "jsonl" | "jsonlines" => Ok(OutputFormat::JsonLines),
            "csv" => Ok(OutputFormat::Csv),
            _ => Err(format!("Unknown output format: {}", s)),
        }
    }
}

impl Default for OutputFormat {
    fn default() -> Self {
        OutputFormat::Json
    }
}

impl OutputFormat {
    /// Get all available output formats
    pub fn available_formats() -> &'static [Self] {
        &[
            OutputFormat::Text,
            OutputFormat::Json,
            OutputFormat::JsonLines,
            OutputFormat::Csv,
        ]
    }

    /// File extension for tables in this format
    pub fn extension(&self) -> &'static str {
        match self {
            OutputFormat::Text => "txt",
            OutputFormat::Json => "json",
            OutputFormat::JsonLines => "jsonl",
            OutputFormat::Csv => "csv",
        }
    }

    /// Returns true if tables in this format can be loaded again
    pub fn is_lossless(&self) -> bool {
        !matches!(self, OutputFormat::Text)
    }
}

/// The tables written next to the bank listings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Table {
    Functions,
    Instructions,
    RegisterAccesses,
    TranslationLog,
}

impl Table {
    /// File name stem
    pub fn stem(&self) -> &'static str {
        match self {
            Table::Functions => "functions",
            Table::Instructions => "instructions",
            Table::RegisterAccesses => "register_accesses",
            Table::TranslationLog => "translation_log",
        }
    }

    /// File name in `format`
    pub fn file_name(&self, format: OutputFormat) -> String {
        format!("{}.{}", self.stem(), format.extension())
    }
}

/// File name of bank `index`'s line table in `format`
pub fn bank_lines_file_name(index: usize, format: OutputFormat) -> String {
    format!("bank_{:02}_lines.{}", index, format.extension())
}

/// Encode rows in `format`
pub fn write_table<R>(rows: &[R], format: OutputFormat, mut writer: impl Write) -> Result<(), RetargetError>
where
    R: Serialize + fmt::Display,
{
    match format {
        OutputFormat::Text => {
            for row in rows {
                writeln!(writer, "{}", row)?;
            }
            Ok(())
        }
        OutputFormat::Json => write_json(rows, writer),
        OutputFormat::JsonLines => write_json_lines(rows, writer),
        OutputFormat::Csv => write_csv(rows, writer),
    }
}

/// Decode rows written by [`write_table`]
pub fn read_table<R: DeserializeOwned>(format: OutputFormat, reader: impl std::io::Read) -> Result<Vec<R>, RetargetError> {
    match format {
        OutputFormat::Text => Err(RetargetError::Artifact(
            "text listings cannot be read back".to_string(),
        )),
        OutputFormat::Json => read_json(reader),
        OutputFormat::JsonLines => read_json_lines(reader),
        OutputFormat::Csv => read_csv(reader),
    }
}

fn write_table_file<R>(dir: &Path, table: Table, format: OutputFormat, rows: &[R]) -> Result<(), RetargetError>
where
    R: Serialize + fmt::Display,
{
    write_rows_file(dir, &table.file_name(format), format, rows)
}

fn write_rows_file<R>(dir: &Path, file_name: &str, format: OutputFormat, rows: &[R]) -> Result<(), RetargetError>
where
    R: Serialize + fmt::Display,
{
    let path = dir.join(file_name);
    let mut writer = BufWriter::new(File::create(&path)?);
    write_table(rows, format, &mut writer)?;
    writer.flush()?;
    log::debug!("Wrote {} row(s) to {}", rows.len(), path.display());
    Ok(())
}

fn read_table_file<R: DeserializeOwned>(dir: &Path, table: Table, format: OutputFormat) -> Result<Vec<R>, RetargetError> {
    let path = dir.join(table.file_name(format));
    read_table(format, BufReader::new(File::open(path)?))
}

/// Write `bank_NN.asm` and `bank_NN_lines` for every bank, and the four
/// tables, into `dir`
pub fn write_artifacts(dir: &Path, output: &RetargetOutput, format: OutputFormat) -> Result<(), RetargetError> {
    fs::create_dir_all(dir)?;

    for bank in &output.banks {
        fs::write(dir.join(bank.file_name()), bank.render())?;
        let rows: Vec<LineRow> = bank.lines.iter().map(LineRow::from).collect();
        write_rows_file(dir, &bank_lines_file_name(bank.bank.index, format), format, &rows)?;
    }

    let recovery = &output.recovery;
    let functions: Vec<FunctionRow> = recovery.functions.values().map(FunctionRow::from).collect();
    let instructions: Vec<InstructionRow> = recovery.instructions.values().map(InstructionRow::from).collect();
    let accesses: Vec<RegisterAccessRow> = recovery.register_accesses.iter().map(RegisterAccessRow::from).collect();
    let translations: Vec<TranslationRow> = output.translations.iter().map(TranslationRow::from).collect();

    write_table_file(dir, Table::Functions, format, &functions)?;
    write_table_file(dir, Table::Instructions, format, &instructions)?;
    write_table_file(dir, Table::RegisterAccesses, format, &accesses)?;
    write_table_file(dir, Table::TranslationLog, format, &translations)?;

    log::info!(
        "Wrote {} bank listing(s) and {} tables to {}",
        output.banks.len(),
        format,
        dir.display()
    );
    Ok(())
}

/// Load the function table from `dir`
pub fn load_functions(dir: &Path, format: OutputFormat) -> Result<Vec<Function>, RetargetError> {
    read_table_file::<FunctionRow>(dir, Table::Functions, format)?
        .into_iter()
        .map(Function::try_from)
        .collect()
}

/// Load the instruction table from `dir`
pub fn load_instructions(dir: &Path, format: OutputFormat) -> Result<Vec<Instruction>, RetargetError> {
    read_table_file::<InstructionRow>(dir, Table::Instructions, format)?
        .into_iter()
        .map(Instruction::try_from)
        .collect()
}

/// Load the register-access table from `dir`
pub fn load_register_accesses(dir: &Path, format: OutputFormat) -> Result<Vec<RegisterAccessSite>, RetargetError> {
    read_table_file::<RegisterAccessRow>(dir, Table::RegisterAccesses, format)?
        .into_iter()
        .map(RegisterAccessSite::try_from)
        .collect()
}

/// Load bank `index`'s emitted lines, with provenance, from `dir`
pub fn load_bank_lines(dir: &Path, index: usize, format: OutputFormat) -> Result<Vec<TranslationLine>, RetargetError> {
    let path = dir.join(bank_lines_file_name(index, format));
    read_table::<LineRow>(format, BufReader::new(File::open(path)?))?
        .into_iter()
        .map(TranslationLine::try_from)
        .collect()
}

/// Load the translation log from `dir`
pub fn load_translation_log(dir: &Path, format: OutputFormat) -> Result<Vec<TranslationLogEntry>, RetargetError> {
    read_table_file::<TranslationRow>(dir, Table::TranslationLog, format)?
        .into_iter()
        .map(TranslationLogEntry::try_from)
        .collect()
}
