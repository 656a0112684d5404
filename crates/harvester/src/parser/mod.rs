//! Parser Capability
//!
//! A parser turns a path into column names, a metadata dictionary and a
//! restartable row sequence, or refuses the file. Parsers never talk to the
//! registry and never hold state between calls.

mod arbin;
mod delimited;

pub use arbin::ArbinCsvParser;
pub use delimited::DelimitedParser;

use harvester_mapping::{Cell, RawFrame};
use harvester_protocol::{DataPreview, FileMetadataReport};
use serde_json::{Map, Value};
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, warn};

/// Core metadata key holding the test start date.
pub const TEST_DATE_KEY: &str = "Date of Test";

#[derive(Error, Debug)]
pub enum ParseError {
    /// The parser does not recognise this file. Not an error for the
    /// registry as a whole; the next parser gets a try.
    #[error("Unsupported file: {0}")]
    Unsupported(String),

    #[error("Malformed file {path} at line {line}: {reason}")]
    Malformed {
        path: PathBuf,
        line: u64,
        reason: String,
    },

    #[error("IO error reading {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
}

impl ParseError {
    pub(crate) fn io(path: &Path, source: io::Error) -> Self {
        if source.kind() == io::ErrorKind::InvalidData {
            return ParseError::Unsupported(format!("{} is not valid UTF-8 text", path.display()));
        }
        ParseError::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

pub type ParseResult<T> = std::result::Result<T, ParseError>;

/// Parser-extracted metadata for one file.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FileMetadata {
    pub core: Map<String, Value>,
    pub extra: Map<String, Value>,
    pub test_date: Option<Value>,
}

impl FileMetadata {
    /// Build from core/extra maps, lifting `Date of Test` into `test_date`.
    pub fn new(core: Map<String, Value>, extra: Map<String, Value>) -> Self {
        let test_date = core.get(TEST_DATE_KEY).cloned();
        Self {
            core,
            extra,
            test_date,
        }
    }

    pub fn to_report(&self, parser: &str) -> FileMetadataReport {
        FileMetadataReport {
            core_metadata: self.core.clone(),
            extra_metadata: self.extra.clone(),
            test_date: self.test_date.clone(),
            parser: parser.to_string(),
        }
    }
}

pub type RowIter = Box<dyn Iterator<Item = ParseResult<Vec<Cell>>> + Send>;

/// An opened, successfully recognised file.
pub trait ParsedInput: Send {
    fn parser_name(&self) -> &str;

    fn columns(&self) -> &[String];

    fn metadata(&self) -> &FileMetadata;

    /// Fresh pass over the data rows, starting from the top of the file.
    fn rows(&self) -> ParseResult<RowIter>;
}

pub trait InputParser: Send + Sync {
    fn name(&self) -> &'static str;

    /// Inspect `path` and either recognise it or return
    /// [`ParseError::Unsupported`].
    fn open(&self, path: &Path) -> ParseResult<Box<dyn ParsedInput>>;
}

/// Ordered list of parsers; the first to recognise a file wins.
pub struct ParserRegistry {
    parsers: Vec<Box<dyn InputParser>>,
}

impl Default for ParserRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

impl ParserRegistry {
    pub fn empty() -> Self {
        Self {
            parsers: Vec::new(),
        }
    }

    /// Format-specific parsers first, the generic delimited reader last.
    pub fn with_defaults() -> Self {
        Self::empty()
            .with_parser(ArbinCsvParser)
            .with_parser(DelimitedParser::default())
    }

    pub fn with_parser(mut self, parser: impl InputParser + 'static) -> Self {
        self.parsers.push(Box::new(parser));
        self
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.parsers.iter().map(|p| p.name()).collect()
    }

    pub fn open(&self, path: &Path) -> ParseResult<Box<dyn ParsedInput>> {
        for parser in &self.parsers {
            match parser.open(path) {
                Ok(input) => {
                    debug!(path = %path.display(), parser = parser.name(), "Parser accepted file");
                    return Ok(input);
                }
                Err(ParseError::Unsupported(reason)) => {
                    debug!(path = %path.display(), parser = parser.name(), %reason, "Parser declined file");
                }
                Err(e) => {
                    warn!(path = %path.display(), parser = parser.name(), error = %e, "Parser failed");
                }
            }
        }
        Err(ParseError::Unsupported(format!(
            "no parser recognised {}",
            path.display()
        )))
    }
}

/// Pull up to `limit` rows into a frame. A short frame means the rows ran out.
pub fn read_frame(
    rows: &mut RowIter,
    columns: &[String],
    limit: usize,
) -> ParseResult<RawFrame> {
    let mut frame = RawFrame::new(columns.to_vec());
    for row in rows.by_ref().take(limit) {
        let row = row?;
        let line = frame.num_rows() as u64;
        frame
            .push_row(row)
            .map_err(|e| ParseError::Malformed {
                path: PathBuf::new(),
                line,
                reason: e.to_string(),
            })?;
    }
    Ok(frame)
}

/// Column-oriented preview of the first `limit` rows.
pub fn preview(input: &dyn ParsedInput, limit: usize) -> ParseResult<DataPreview> {
    let mut rows = input.rows()?;
    let frame = read_frame(&mut rows, input.columns(), limit)?;
    Ok(frame.preview(limit))
}

pub(crate) fn text_cell(field: &str) -> Cell {
    if field.trim().is_empty() {
        Cell::Null
    } else {
        Cell::Text(field.to_string())
    }
}
