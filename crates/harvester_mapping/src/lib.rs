//! Mapping Engine
//!
//! Turns raw parsed rows into normalized Arrow batches using the registry's
//! [`ColumnMappingSpec`], then writes them out as chunked Parquet artifacts.
//!
//! # Column rules
//!
//! | Column | Output name | Output type |
//! |--------|-------------|-------------|
//! | in spec, `bool`/`str`/`datetime64[ns]` | `new_name` | Boolean / Utf8 / Timestamp(ns) |
//! | in spec, `float` | `new_name` | Float64, `(v + addition) * multiplier` |
//! | in spec, `int`, identity scale | `new_name` | Int64 |
//! | in spec, `int`, non-identity scale | `new_name` | Float64, `(v + addition) * multiplier` |
//! | not in spec | raw name | Float64 |
//!
//! Any cell that cannot be coerced fails the whole frame. Empty cells are
//! nulls for every target type.
//!
//! [`ColumnMappingSpec`]: harvester_protocol::ColumnMappingSpec

pub mod artifact;
pub mod coerce;
pub mod engine;
pub mod error;
pub mod frame;

pub use artifact::{ArtifactDir, ArtifactSet, PartitionFile, PartitionWriter};
pub use engine::{plan_columns, ColumnPlan, MappingEngine, OutputKind};
pub use error::{MappingError, MappingResult};
pub use frame::{Cell, RawFrame};

/// Written into every Parquet footer under `harvester-version`.
pub const HARVESTER_VERSION: &str = env!("CARGO_PKG_VERSION");
