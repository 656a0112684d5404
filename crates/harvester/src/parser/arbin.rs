//! Arbin cycler CSV exports.
//!
//! These carry a space inside `Date_Time`, which throws off generic
//! delimiter sniffing, so they are recognised by header instead.

use harvester_mapping::coerce::parse_datetime;
use serde_json::{Map, Value};
use std::path::Path;

use super::delimited::{sample_lines, split_fields, DelimitedInput};
use super::{FileMetadata, InputParser, ParseError, ParseResult, ParsedInput, TEST_DATE_KEY};

const HEADER_PREFIX: [&str; 3] = ["data_point", "date_time", "test_time(s)"];

#[derive(Debug, Clone, Copy, Default)]
pub struct ArbinCsvParser;

impl InputParser for ArbinCsvParser {
    fn name(&self) -> &'static str {
        "arbin_csv"
    }

    fn open(&self, path: &Path) -> ParseResult<Box<dyn ParsedInput>> {
        let lines = sample_lines(path, 2)?;
        let unsupported = |reason: &str| ParseError::Unsupported(format!("{}: {}", path.display(), reason));

        let header = lines
            .first()
            .map(|l| split_fields(l, b','))
            .ok_or_else(|| unsupported("empty file"))?;
        let prefix: Vec<String> = header
            .iter()
            .take(HEADER_PREFIX.len())
            .map(|h| h.trim().to_lowercase())
            .collect();
        if prefix != HEADER_PREFIX {
            return Err(unsupported("not an Arbin header"));
        }

        let first_row = lines
            .get(1)
            .map(|l| split_fields(l, b','))
            .ok_or_else(|| unsupported("no data rows"))?;
        if first_row.len() != header.len() {
            return Err(unsupported("first row does not match header width"));
        }

        let mut core = Map::new();
        core.insert("Machine Type".to_string(), Value::String("Arbin".to_string()));
        if let Some(started) = parse_datetime(first_row[1].trim()) {
            core.insert(
                TEST_DATE_KEY.to_string(),
                Value::String(started.and_utc().to_rfc3339()),
            );
        }

        Ok(Box::new(DelimitedInput {
            parser_name: self.name(),
            path: path.to_path_buf(),
            delimiter: b',',
            skip_lines: 1,
            columns: header.iter().map(|h| h.trim().to_string()).collect(),
            metadata: FileMetadata::new(core, Map::new()),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use harvester_mapping::Cell;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn write(contents: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_recognises_arbin_export() {
        let file = write(
            "\u{feff}Data_Point,Date_Time,Test_Time(s),Current(A),Voltage(V)\n\
             1,2024-05-31 12:30:00,0.0,0.5,3.7\n\
             2,2024-05-31 12:30:01,1.0,0.5,3.71\n",
        );
        let input = ArbinCsvParser.open(file.path()).unwrap();
        assert_eq!(input.columns().len(), 5);
        assert_eq!(input.columns()[0], "Data_Point");
        assert_eq!(
            input.metadata().test_date,
            Some(Value::String("2024-05-31T12:30:00+00:00".into()))
        );

        let rows: Vec<_> = input.rows().unwrap().collect::<Result<_, _>>().unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[1][1], Cell::Text("2024-05-31 12:30:01".into()));
    }

    #[test]
    fn test_declines_other_headers() {
        let file = write("time,voltage\n0,3.7\n");
        let err = ArbinCsvParser.open(file.path()).err().unwrap();
        assert!(matches!(err, ParseError::Unsupported(_)));
    }

    #[test]
    fn test_declines_width_mismatch() {
        let file = write("data_point,date_time,test_time(s),x\n1,2024-05-31 12:30:00,0.0\n");
        let err = ArbinCsvParser.open(file.path()).err().unwrap();
        assert!(matches!(err, ParseError::Unsupported(_)));
    }
}
