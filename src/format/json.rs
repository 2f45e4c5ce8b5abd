//! JSON and JSON Lines table encoding

use std::io::{BufRead, BufReader, Read, Write};

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::RetargetError;

/// Write all rows as one pretty-printed JSON array
pub fn write_json<R: Serialize>(rows: &[R], mut writer: impl Write) -> Result<(), RetargetError> {
    serde_json::to_writer_pretty(&mut writer, rows)?;
    writer.write_all(b"\n")?;
    Ok(())
}

/// Write one JSON object per line
pub fn write_json_lines<R: Serialize>(rows: &[R], mut writer: impl Write) -> Result<(), RetargetError> {
    for row in rows {
        serde_json::to_writer(&mut writer, row)?;
        writer.write_all(b"\n")?;
    }
    Ok(())
}

/// Read a JSON array of rows
pub fn read_json<R: DeserializeOwned>(reader: impl Read) -> Result<Vec<R>, RetargetError> {
    Ok(serde_json::from_reader(reader)?)
}

/// Read one row per non-blank line
pub fn read_json_lines<R: DeserializeOwned>(reader: impl Read) -> Result<Vec<R>, RetargetError> {
    let mut rows = Vec::new();
    for line in BufReader::new(reader).lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        rows.push(serde_json::from_str(&line)?);
    }
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::rows::RegisterAccessRow;
    use crate::hardware::{Direction, Subsystem};
    use crate::Mnemonic;

    fn row() -> RegisterAccessRow {
        RegisterAccessRow {
            instruction_address: "0x8000".into(),
            hw_address: "0x2000".into(),
            hw_name: "PPUCTRL".into(),
            subsystem: Subsystem::VideoIo,
            direction: Direction::Write,
            mnemonic: Mnemonic::Sta,
        }
    }

    #[test]
    fn test_json_lines_one_object_per_line() {
        let mut out = Vec::new();
        write_json_lines(&[row(), row()], &mut out).unwrap();

        let text = String::from_utf8(out).unwrap();
        assert_eq!(text.lines().count(), 2);
        assert!(text.lines().next().unwrap().contains("\"mnemonic\":\"STA\""));
    }

    #[test]
    fn test_json_array() {
        let mut out = Vec::new();
        write_json(&[row()], &mut out).unwrap();

        let back: Vec<RegisterAccessRow> = read_json(out.as_slice()).unwrap();
        assert_eq!(back, vec![row()]);
    }
}
