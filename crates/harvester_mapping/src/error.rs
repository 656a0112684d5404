//! Error types for the mapping engine and artifact writer

use std::io;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum MappingError {
    #[error("Column '{column}' row {row}: cannot coerce {value:?} to {target}")]
    Coercion {
        column: String,
        row: usize,
        value: String,
        target: &'static str,
    },

    #[error("Mapped name '{new_name}' for column '{column}' collides with an existing column")]
    NameCollision { column: String, new_name: String },

    #[error("Row {row} has {found} cells, expected {expected}")]
    RaggedRow {
        row: usize,
        found: usize,
        expected: usize,
    },

    #[error("Arrow error: {0}")]
    Arrow(#[from] arrow::error::ArrowError),

    #[error("Parquet error: {0}")]
    Parquet(#[from] parquet::errors::ParquetError),

    #[error("IO error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl MappingError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        MappingError::Io {
            path: path.into(),
            source,
        }
    }

    /// Data-level failures (bad cell, bad spec) as opposed to local disk or
    /// encoder failures while writing the artifact.
    pub fn is_coercion(&self) -> bool {
        matches!(
            self,
            MappingError::Coercion { .. }
                | MappingError::NameCollision { .. }
                | MappingError::RaggedRow { .. }
        )
    }
}

pub type MappingResult<T> = std::result::Result<T, MappingError>;
