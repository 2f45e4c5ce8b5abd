//! CSV table encoding

use std::io::{Read, Write};

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::RetargetError;

/// Write rows with a header line taken from the row's field names
pub fn write_csv<R: Serialize>(rows: &[R], writer: impl Write) -> Result<(), RetargetError> {
    let mut out = ::csv::Writer::from_writer(writer);
    for row in rows {
        out.serialize(row)?;
    }
    out.flush()?;
    Ok(())
}

/// Read rows from CSV with a header line
pub fn read_csv<R: DeserializeOwned>(reader: impl Read) -> Result<Vec<R>, RetargetError> {
    let mut input = ::csv::Reader::from_reader(reader);
    let mut rows = Vec::new();
    for row in input.deserialize() {
        rows.push(row?);
    }
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::rows::TranslationRow;
    use crate::rewrite::Provenance;

    #[test]
    fn test_multiline_text_and_missing_reason() {
        let rows = vec![
            TranslationRow {
                function_address: "0x8004".into(),
                function_name: "NMI_HANDLER".into(),
                confidence: 0.9,
                review_marker_count: 1,
                provenance: Provenance::Oracle,
                failure_reason: None,
                translated_text: "NMI_HANDLER:\n    PHA ; REVIEW: \"x\", y\n    RTI\n".into(),
            },
            TranslationRow {
                function_address: "0x8010".into(),
                function_name: "IRQ_HANDLER".into(),
                confidence: 0.0,
                review_marker_count: 0,
                provenance: Provenance::StubFallback,
                failure_reason: Some("oracle timed out".into()),
                translated_text: "IRQ_HANDLER:\n    BRK\n    RTS\n".into(),
            },
        ];

        let mut out = Vec::new();
        write_csv(&rows, &mut out).unwrap();
        let text = String::from_utf8(out.clone()).unwrap();
        assert!(text.starts_with("function_address,function_name,confidence"));

        let back: Vec<TranslationRow> = read_csv(out.as_slice()).unwrap();
        assert_eq!(back, rows);
    }
}
