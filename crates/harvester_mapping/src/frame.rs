//! Raw tabular data as produced by parsers.

use serde::{Serialize, Serializer};
use std::fmt;

use crate::error::{MappingError, MappingResult};

/// One parsed cell. Text parsers produce `Text`; binary formats may produce
/// typed values directly.
#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl Cell {
    /// Null or whitespace-only text.
    pub fn is_missing(&self) -> bool {
        match self {
            Cell::Null => true,
            Cell::Text(s) => s.trim().is_empty(),
            _ => false,
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Cell::Null => serde_json::Value::Null,
            Cell::Bool(b) => serde_json::Value::Bool(*b),
            Cell::Int(i) => serde_json::Value::from(*i),
            Cell::Float(f) => serde_json::Number::from_f64(*f)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            Cell::Text(s) => serde_json::Value::String(s.replace('\0', "")),
        }
    }
}

impl fmt::Display for Cell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Cell::Null => write!(f, ""),
            Cell::Bool(b) => write!(f, "{}", b),
            Cell::Int(i) => write!(f, "{}", i),
            Cell::Float(v) => write!(f, "{}", v),
            Cell::Text(s) => write!(f, "{}", s),
        }
    }
}

impl Serialize for Cell {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_json().serialize(serializer)
    }
}

impl From<&str> for Cell {
    fn from(value: &str) -> Self {
        Cell::Text(value.to_string())
    }
}

impl From<String> for Cell {
    fn from(value: String) -> Self {
        Cell::Text(value)
    }
}

impl From<f64> for Cell {
    fn from(value: f64) -> Self {
        Cell::Float(value)
    }
}

impl From<i64> for Cell {
    fn from(value: i64) -> Self {
        Cell::Int(value)
    }
}

/// A rectangular chunk of rows sharing one header.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawFrame {
    columns: Vec<String>,
    rows: Vec<Vec<Cell>>,
}

impl RawFrame {
    pub fn new(columns: Vec<String>) -> Self {
        Self {
            columns,
            rows: Vec::new(),
        }
    }

    pub fn with_rows(columns: Vec<String>, rows: Vec<Vec<Cell>>) -> MappingResult<Self> {
        let mut frame = Self::new(columns);
        for row in rows {
            frame.push_row(row)?;
        }
        Ok(frame)
    }

    pub fn push_row(&mut self, row: Vec<Cell>) -> MappingResult<()> {
        if row.len() != self.columns.len() {
            return Err(MappingError::RaggedRow {
                row: self.rows.len(),
                found: row.len(),
                expected: self.columns.len(),
            });
        }
        self.rows.push(row);
        Ok(())
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn rows(&self) -> &[Vec<Cell>] {
        &self.rows
    }

    pub fn num_rows(&self) -> usize {
        self.rows.len()
    }

    pub fn num_columns(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn column_cells(&self, index: usize) -> impl Iterator<Item = &Cell> + '_ {
        self.rows.iter().map(move |row| &row[index])
    }

    /// Column name -> values of the first `limit` rows.
    pub fn preview(&self, limit: usize) -> harvester_protocol::DataPreview {
        self.columns
            .iter()
            .enumerate()
            .map(|(idx, name)| {
                let values = self
                    .rows
                    .iter()
                    .take(limit)
                    .map(|row| row[idx].to_json())
                    .collect();
                (name.clone(), values)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ragged_rows_rejected() {
        let mut frame = RawFrame::new(vec!["a".into(), "b".into()]);
        frame.push_row(vec!["1".into(), "2".into()]).unwrap();
        let err = frame.push_row(vec!["1".into()]).unwrap_err();
        assert!(matches!(
            err,
            MappingError::RaggedRow {
                row: 1,
                found: 1,
                expected: 2
            }
        ));
    }

    #[test]
    fn test_preview_is_column_oriented_and_bounded() {
        let rows = (0..20)
            .map(|i| vec![Cell::Int(i), Cell::Text(format!("n{}", i))])
            .collect();
        let frame = RawFrame::with_rows(vec!["idx".into(), "note".into()], rows).unwrap();
        let preview = frame.preview(10);
        assert_eq!(preview.len(), 2);
        assert_eq!(preview["idx"].len(), 10);
        assert_eq!(preview["note"][3], serde_json::json!("n3"));
    }

    #[test]
    fn test_missing_cells() {
        assert!(Cell::Null.is_missing());
        assert!(Cell::Text("  ".into()).is_missing());
        assert!(!Cell::Text("0".into()).is_missing());
        assert!(!Cell::Float(f64::NAN).is_missing());
    }
}
