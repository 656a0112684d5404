//! Generic delimited-text reader with delimiter and preamble sniffing.

use serde_json::{Map, Value};
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

use super::{
    text_cell, FileMetadata, InputParser, ParseError, ParseResult, ParsedInput, RowIter,
};

const DELIMITERS: [u8; 4] = [b',', b';', b'\t', b'|'];
const MAX_PREAMBLE_LINES: usize = 500;
const CONSISTENCY_WINDOW: usize = 100;

/// Catch-all parser for CSV-like exports.
///
/// A table is found by looking for the first line (at most
/// `max_preamble` lines in) after which the next `window` non-blank lines
/// all split into the same number (> 1) of fields on one delimiter. Lines
/// before it are kept as `core.preamble`.
#[derive(Debug, Clone)]
pub struct DelimitedParser {
    max_preamble: usize,
    window: usize,
}

impl Default for DelimitedParser {
    fn default() -> Self {
        Self {
            max_preamble: MAX_PREAMBLE_LINES,
            window: CONSISTENCY_WINDOW,
        }
    }
}

struct Layout {
    delimiter: u8,
    /// Raw lines to skip before the first data row.
    skip_lines: usize,
    columns: Vec<String>,
    preamble: Vec<String>,
    has_header: bool,
}

impl DelimitedParser {
    fn detect(&self, lines: &[String]) -> Option<Layout> {
        let counts: Vec<Option<[usize; 4]>> = lines
            .iter()
            .map(|line| {
                if line.trim().is_empty() {
                    None
                } else {
                    Some(DELIMITERS.map(|d| split_fields(line, d).len()))
                }
            })
            .collect();

        let last_start = self.max_preamble.min(lines.len().saturating_sub(1));
        for start in 0..=last_start {
            let Some(first) = counts.get(start).copied().flatten() else {
                continue;
            };
            let window: Vec<usize> = (start..lines.len().min(start + self.window))
                .filter(|&i| counts[i].is_some())
                .collect();

            let best = (0..DELIMITERS.len())
                .filter(|&d| first[d] > 1)
                .filter(|&d| window.iter().all(|&i| counts[i].map(|c| c[d]) == Some(first[d])))
                .max_by_key(|&d| first[d]);

            if let Some(d) = best {
                return Some(self.layout(lines, &window, DELIMITERS[d]));
            }
        }
        None
    }

    fn layout(&self, lines: &[String], window: &[usize], delimiter: u8) -> Layout {
        let start = window[0];
        let first = split_fields(&lines[start], delimiter);
        let second = window.get(1).map(|&i| split_fields(&lines[i], delimiter));

        let has_header = first.iter().all(|f| !is_numeric(f))
            && second.as_ref().map_or(true, |row| row.iter().any(|f| is_numeric(f)));

        let (columns, skip_lines) = if has_header {
            (header_names(&first), start + 1)
        } else {
            ((0..first.len()).map(|i| format!("column_{}", i)).collect(), start)
        };

        let preamble = lines[..start]
            .iter()
            .map(|l| l.trim_end().to_string())
            .filter(|l| !l.is_empty())
            .collect();

        Layout {
            delimiter,
            skip_lines,
            columns,
            preamble,
            has_header,
        }
    }
}

impl InputParser for DelimitedParser {
    fn name(&self) -> &'static str {
        "delimited"
    }

    fn open(&self, path: &Path) -> ParseResult<Box<dyn ParsedInput>> {
        let lines = sample_lines(path, self.max_preamble + self.window + 1)?;
        let layout = self.detect(&lines).ok_or_else(|| {
            ParseError::Unsupported(format!("{}: no consistent delimited table", path.display()))
        })?;

        let mut core = Map::new();
        if !layout.preamble.is_empty() {
            core.insert(
                "preamble".to_string(),
                Value::Array(layout.preamble.into_iter().map(Value::String).collect()),
            );
        }
        let mut extra = Map::new();
        extra.insert(
            "delimiter".to_string(),
            Value::String((layout.delimiter as char).to_string()),
        );
        extra.insert("header_row".to_string(), Value::Bool(layout.has_header));

        Ok(Box::new(DelimitedInput {
            parser_name: self.name(),
            path: path.to_path_buf(),
            delimiter: layout.delimiter,
            skip_lines: layout.skip_lines,
            columns: layout.columns,
            metadata: FileMetadata::new(core, extra),
        }))
    }
}

/// A recognised delimited file. Shared by every text parser.
pub(super) struct DelimitedInput {
    pub(super) parser_name: &'static str,
    pub(super) path: PathBuf,
    pub(super) delimiter: u8,
    pub(super) skip_lines: usize,
    pub(super) columns: Vec<String>,
    pub(super) metadata: FileMetadata,
}

impl ParsedInput for DelimitedInput {
    fn parser_name(&self) -> &str {
        self.parser_name
    }

    fn columns(&self) -> &[String] {
        &self.columns
    }

    fn metadata(&self) -> &FileMetadata {
        &self.metadata
    }

    fn rows(&self) -> ParseResult<RowIter> {
        let file = File::open(&self.path).map_err(|e| ParseError::io(&self.path, e))?;
        let mut reader = BufReader::new(file);
        let mut line = String::new();
        for _ in 0..self.skip_lines {
            line.clear();
            let read = reader
                .read_line(&mut line)
                .map_err(|e| ParseError::io(&self.path, e))?;
            if read == 0 {
                break;
            }
        }

        let records = csv::ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .delimiter(self.delimiter)
            .from_reader(reader)
            .into_records();

        let path = self.path.clone();
        let width = self.columns.len();
        let offset = self.skip_lines as u64;
        Ok(Box::new(records.map(move |record| {
            let record = record?;
            if record.len() != width {
                let line = record.position().map(|p| p.line()).unwrap_or(0) + offset;
                return Err(ParseError::Malformed {
                    path: path.clone(),
                    line,
                    reason: format!("{} fields, expected {}", record.len(), width),
                });
            }
            Ok(record.iter().map(text_cell).collect())
        })))
    }
}

/// First `limit` lines, without line terminators.
pub(super) fn sample_lines(path: &Path, limit: usize) -> ParseResult<Vec<String>> {
    let file = File::open(path).map_err(|e| ParseError::io(path, e))?;
    let mut reader = BufReader::new(file);
    let mut lines = Vec::new();
    let mut buf = String::new();
    while lines.len() < limit {
        buf.clear();
        let read = reader
            .read_line(&mut buf)
            .map_err(|e| ParseError::io(path, e))?;
        if read == 0 {
            break;
        }
        if buf.contains('\0') {
            return Err(ParseError::Unsupported(format!(
                "{} contains binary data",
                path.display()
            )));
        }
        let line = buf.trim_end_matches(|c: char| c == '\r' || c == '\n');
        let line = if lines.is_empty() {
            line.trim_start_matches('\u{feff}')
        } else {
            line
        };
        lines.push(line.to_string());
    }
    Ok(lines)
}

pub(super) fn split_fields(line: &str, delimiter: u8) -> Vec<String> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .delimiter(delimiter)
        .from_reader(line.as_bytes());
    match reader.records().next() {
        Some(Ok(record)) => record.iter().map(str::to_string).collect(),
        _ => Vec::new(),
    }
}

fn is_numeric(field: &str) -> bool {
    field.trim().parse::<f64>().is_ok()
}

/// Blank names become `column_<i>`; repeats get a numeric suffix.
pub(super) fn header_names(fields: &[String]) -> Vec<String> {
    let mut names: Vec<String> = Vec::with_capacity(fields.len());
    for (i, field) in fields.iter().enumerate() {
        let base = match field.trim() {
            "" => format!("column_{}", i),
            name => name.to_string(),
        };
        let mut name = base.clone();
        let mut n = 1;
        while names.contains(&name) {
            name = format!("{}_{}", base, n);
            n += 1;
        }
        names.push(name);
    }
    names
}
