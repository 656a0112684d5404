//! Raw frame -> normalized Arrow batch.

use arrow::array::{
    ArrayRef, BooleanBuilder, Float64Builder, Int64Builder, StringBuilder,
    TimestampNanosecondBuilder,
};
use arrow::datatypes::{DataType, Field, Schema, SchemaRef, TimeUnit};
use arrow::record_batch::{RecordBatch, RecordBatchOptions};
use harvester_protocol::{ColumnMappingSpec, TargetType};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::coerce::{self, Unparseable, MAX_EXACT_F64_INT};
use crate::error::{MappingError, MappingResult};
use crate::frame::{Cell, RawFrame};

/// Physical output of one column.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum OutputKind {
    Boolean,
    Int64,
    /// `int` target with a non-identity scale: coerced as an integer, then
    /// promoted to f64 before `(v + addition) * multiplier`.
    IntAsFloat64 { addition: f64, multiplier: f64 },
    Float64 { addition: f64, multiplier: f64 },
    Utf8,
    Timestamp,
}

impl OutputKind {
    fn from_target(target: TargetType, addition: f64, multiplier: f64) -> Self {
        let identity = addition == 0.0 && multiplier == 1.0;
        match target {
            TargetType::Bool => OutputKind::Boolean,
            TargetType::Str => OutputKind::Utf8,
            TargetType::Timestamp => OutputKind::Timestamp,
            TargetType::Int if identity => OutputKind::Int64,
            TargetType::Int => OutputKind::IntAsFloat64 {
                addition,
                multiplier,
            },
            TargetType::Float => OutputKind::Float64 {
                addition,
                multiplier,
            },
        }
    }

    pub fn data_type(&self) -> DataType {
        match self {
            OutputKind::Boolean => DataType::Boolean,
            OutputKind::Int64 => DataType::Int64,
            OutputKind::IntAsFloat64 { .. } | OutputKind::Float64 { .. } => DataType::Float64,
            OutputKind::Utf8 => DataType::Utf8,
            OutputKind::Timestamp => DataType::Timestamp(TimeUnit::Nanosecond, None),
        }
    }

    fn label(&self) -> &'static str {
        match self {
            OutputKind::Boolean => "bool",
            OutputKind::Int64 | OutputKind::IntAsFloat64 { .. } => "int",
            OutputKind::Float64 { .. } => "float",
            OutputKind::Utf8 => "str",
            OutputKind::Timestamp => "datetime64[ns]",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ColumnPlan {
    pub source_index: usize,
    pub source_name: String,
    pub output_name: String,
    pub kind: OutputKind,
    /// False for columns absent from the spec (float policy).
    pub mapped: bool,
}

/// Resolve every input column to exactly one output column.
///
/// Spec entries naming columns the frame does not have are ignored.
pub fn plan_columns(columns: &[String], spec: &ColumnMappingSpec) -> MappingResult<Vec<ColumnPlan>> {
    let mut plans = Vec::with_capacity(columns.len());
    let mut seen = HashSet::with_capacity(columns.len());

    for (idx, name) in columns.iter().enumerate() {
        let plan = match spec.get(name) {
            Some(mapping) => ColumnPlan {
                source_index: idx,
                source_name: name.clone(),
                output_name: mapping.target_name(name).to_string(),
                kind: OutputKind::from_target(
                    mapping.data_type,
                    mapping.addition,
                    mapping.multiplier,
                ),
                mapped: true,
            },
            None => ColumnPlan {
                source_index: idx,
                source_name: name.clone(),
                output_name: name.clone(),
                kind: OutputKind::Float64 {
                    addition: 0.0,
                    multiplier: 1.0,
                },
                mapped: false,
            },
        };

        if !seen.insert(plan.output_name.clone()) {
            return Err(MappingError::NameCollision {
                column: plan.source_name,
                new_name: plan.output_name,
            });
        }
        plans.push(plan);
    }

    for (raw, _) in spec.iter() {
        if !columns.iter().any(|c| c == raw) {
            debug!(column = %raw, "Mapping names a column the file does not have; ignored");
        }
    }

    Ok(plans)
}

/// Applies one immutable [`ColumnMappingSpec`] to any number of frames.
#[derive(Debug, Clone, Default)]
pub struct MappingEngine {
    spec: ColumnMappingSpec,
}

impl MappingEngine {
    pub fn new(spec: ColumnMappingSpec) -> Self {
        Self { spec }
    }

    pub fn spec(&self) -> &ColumnMappingSpec {
        &self.spec
    }

    pub fn output_schema(&self, columns: &[String]) -> MappingResult<SchemaRef> {
        let plans = plan_columns(columns, &self.spec)?;
        Ok(schema_for(&plans))
    }

    /// Map a whole frame. Row and column counts are preserved; any cell that
    /// fails coercion fails the frame.
    pub fn apply(&self, frame: &RawFrame) -> MappingResult<RecordBatch> {
        let plans = plan_columns(frame.columns(), &self.spec)?;
        let schema = schema_for(&plans);

        let mut arrays: Vec<ArrayRef> = Vec::with_capacity(plans.len());
        for plan in &plans {
            arrays.push(build_column(frame, plan)?);
        }

        let options = RecordBatchOptions::new().with_row_count(Some(frame.num_rows()));
        Ok(RecordBatch::try_new_with_options(schema, arrays, &options)?)
    }
}

fn schema_for(plans: &[ColumnPlan]) -> SchemaRef {
    let fields: Vec<Field> = plans
        .iter()
        .map(|plan| Field::new(plan.output_name.as_str(), plan.kind.data_type(), true))
        .collect();
    Arc::new(Schema::new(fields))
}

fn coercion_error(plan: &ColumnPlan, row: usize, cell: &Cell) -> MappingError {
    MappingError::Coercion {
        column: plan.source_name.clone(),
        row,
        value: cell.to_string(),
        target: plan.kind.label(),
    }
}

fn build_column(frame: &RawFrame, plan: &ColumnPlan) -> MappingResult<ArrayRef> {
    let rows = frame.num_rows();
    let cells = frame.column_cells(plan.source_index).enumerate();
    let fail = |row: usize, cell: &Cell| coercion_error(plan, row, cell);

    let array: ArrayRef = match plan.kind {
        OutputKind::Boolean => {
            let mut builder = BooleanBuilder::with_capacity(rows);
            for (row, cell) in cells {
                let value = coerce::to_bool(cell).map_err(|Unparseable| fail(row, cell))?;
                builder.append_option(value);
            }
            Arc::new(builder.finish())
        }
        OutputKind::Int64 => {
            let mut builder = Int64Builder::with_capacity(rows);
            for (row, cell) in cells {
                let value = coerce::to_i64(cell).map_err(|Unparseable| fail(row, cell))?;
                builder.append_option(value);
            }
            Arc::new(builder.finish())
        }
        OutputKind::IntAsFloat64 {
            addition,
            multiplier,
        } => {
            let mut builder = Float64Builder::with_capacity(rows);
            let mut lossy = 0usize;
            for (row, cell) in cells {
                let value = coerce::to_i64(cell).map_err(|Unparseable| fail(row, cell))?;
                builder.append_option(value.map(|v| {
                    if v.unsigned_abs() > MAX_EXACT_F64_INT as u64 {
                        lossy += 1;
                    }
                    (v as f64 + addition) * multiplier
                }));
            }
            log_precision_loss(plan, lossy);
            Arc::new(builder.finish())
        }
        OutputKind::Float64 {
            addition,
            multiplier,
        } => {
            let mut builder = Float64Builder::with_capacity(rows);
            let mut lossy = 0usize;
            for (row, cell) in cells {
                let value = coerce::to_f64(cell).map_err(|Unparseable| fail(row, cell))?;
                if value.is_some() && coerce::loses_precision_as_f64(cell) {
                    lossy += 1;
                }
                builder.append_option(value.map(|v| (v + addition) * multiplier));
            }
            log_precision_loss(plan, lossy);
            Arc::new(builder.finish())
        }
        OutputKind::Utf8 => {
            let mut builder = StringBuilder::with_capacity(rows, rows * 8);
            for (_, cell) in cells {
                builder.append_option(coerce::to_text(cell));
            }
            Arc::new(builder.finish())
        }
        OutputKind::Timestamp => {
            let mut builder = TimestampNanosecondBuilder::with_capacity(rows);
            for (row, cell) in cells {
                let value =
                    coerce::to_timestamp_nanos(cell).map_err(|Unparseable| fail(row, cell))?;
                builder.append_option(value);
            }
            Arc::new(builder.finish())
        }
    };

    Ok(array)
}

fn log_precision_loss(plan: &ColumnPlan, cells: usize) {
    if cells > 0 {
        warn!(
            column = %plan.source_name,
            output = %plan.output_name,
            cells,
            "Integer values exceed the exact float64 range; precision lost"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow::array::{Array, BooleanArray, Float64Array, Int64Array, StringArray};
    use harvester_protocol::ColumnMapping;

    fn frame(columns: &[&str], rows: Vec<Vec<&str>>) -> RawFrame {
        RawFrame::with_rows(
            columns.iter().map(|c| c.to_string()).collect(),
            rows.into_iter()
                .map(|r| r.into_iter().map(Cell::from).collect())
                .collect(),
        )
        .unwrap()
    }

    fn f64_column<'a>(batch: &'a RecordBatch, name: &str) -> &'a Float64Array {
        batch
            .column_by_name(name)
            .unwrap()
            .as_any()
            .downcast_ref::<Float64Array>()
            .unwrap()
    }

    #[test]
    fn test_volts_scaled_to_voltage() {
        let spec = ColumnMappingSpec::new().with_column(
            "Volts",
            ColumnMapping::new("voltage", TargetType::Float).with_scale(0.001, 0.0),
        );
        let batch = MappingEngine::new(spec)
            .apply(&frame(&["Volts"], vec![vec!["3700"]]))
            .unwrap();

        assert_eq!(batch.schema().field(0).name(), "voltage");
        let voltage = f64_column(&batch, "voltage");
        assert!((voltage.value(0) - 3.7).abs() < 1e-12);
    }

    #[test]
    fn test_unmapped_text_column_becomes_float() {
        let batch = MappingEngine::default()
            .apply(&frame(&["Notes"], vec![vec!["12.5"], vec!["3"]]))
            .unwrap();
        assert_eq!(batch.schema().field(0).data_type(), &DataType::Float64);
        let notes = f64_column(&batch, "Notes");
        assert_eq!(notes.value(0), 12.5);
        assert_eq!(notes.value(1), 3.0);
    }

    #[test]
    fn test_unmapped_non_numeric_fails_whole_frame() {
        let err = MappingEngine::default()
            .apply(&frame(&["Notes"], vec![vec!["12.5"], vec!["n/a"]]))
            .unwrap_err();
        match err {
            MappingError::Coercion {
                column,
                row,
                value,
                target,
            } => {
                assert_eq!(column, "Notes");
                assert_eq!(row, 1);
                assert_eq!(value, "n/a");
                assert_eq!(target, "float");
            }
            other => panic!("expected coercion error, got {:?}", other),
        }
    }

    #[test]
    fn test_int_identity_stays_int64() {
        let spec = ColumnMappingSpec::new()
            .with_column("Cycle", ColumnMapping::new("cycle_number", TargetType::Int));
        let batch = MappingEngine::new(spec)
            .apply(&frame(&["Cycle"], vec![vec!["1"], vec!["2.0"], vec![""]]))
            .unwrap();
        let cycle = batch
            .column(0)
            .as_any()
            .downcast_ref::<Int64Array>()
            .unwrap();
        assert_eq!(cycle.value(0), 1);
        assert_eq!(cycle.value(1), 2);
        assert!(cycle.is_null(2));
    }

    #[test]
    fn test_int_with_scale_promotes_to_float() {
        let spec = ColumnMappingSpec::new().with_column(
            "Raw",
            ColumnMapping::new("scaled", TargetType::Int).with_scale(0.5, 1.0),
        );
        let batch = MappingEngine::new(spec)
            .apply(&frame(&["Raw"], vec![vec!["4"], vec!["4.9"]]))
            .unwrap();
        assert_eq!(batch.schema().field(0).data_type(), &DataType::Float64);
        let scaled = f64_column(&batch, "scaled");
        // (4 + 1) * 0.5; 4.9 truncates to 4 before scaling
        assert_eq!(scaled.value(0), 2.5);
        assert_eq!(scaled.value(1), 2.5);
    }

    #[test]
    fn test_bool_and_str_targets() {
        let spec = ColumnMappingSpec::new()
            .with_column("Flag", ColumnMapping::new("flag", TargetType::Bool))
            .with_column("Label", ColumnMapping::new("label", TargetType::Str));
        let batch = MappingEngine::new(spec)
            .apply(&frame(
                &["Flag", "Label"],
                vec![vec!["true", "charge"], vec!["0", "rest"]],
            ))
            .unwrap();
        let flag = batch
            .column_by_name("flag")
            .unwrap()
            .as_any()
            .downcast_ref::<BooleanArray>()
            .unwrap();
        assert!(flag.value(0));
        assert!(!flag.value(1));
        let label = batch
            .column_by_name("label")
            .unwrap()
            .as_any()
            .downcast_ref::<StringArray>()
            .unwrap();
        assert_eq!(label.value(1), "rest");
    }

    #[test]
    fn test_shape_preserved_and_extra_spec_keys_ignored() {
        let spec = ColumnMappingSpec::new()
            .with_column("A", ColumnMapping::new("a", TargetType::Float))
            .with_column("Missing", ColumnMapping::new("m", TargetType::Float));
        let input = frame(&["A", "B", "C"], vec![vec!["1", "2", "3"], vec!["4", "5", "6"]]);
        let batch = MappingEngine::new(spec).apply(&input).unwrap();
        assert_eq!(batch.num_columns(), input.num_columns());
        assert_eq!(batch.num_rows(), input.num_rows());
        assert!(batch.column_by_name("m").is_none());
    }

    #[test]
    fn test_rename_collision_rejected() {
        let spec = ColumnMappingSpec::new()
            .with_column("A", ColumnMapping::new("B", TargetType::Float));
        let err = MappingEngine::new(spec)
            .apply(&frame(&["A", "B"], vec![vec!["1", "2"]]))
            .unwrap_err();
        assert!(matches!(err, MappingError::NameCollision { .. }));
    }

    #[test]
    fn test_apply_is_idempotent() {
        let spec = ColumnMappingSpec::new().with_column(
            "I",
            ColumnMapping::new("current", TargetType::Float).with_scale(2.0, -1.0),
        );
        let engine = MappingEngine::new(spec);
        let input = frame(&["I", "V"], vec![vec!["1.5", "3.3"], vec!["", "3.4"]]);
        let first = engine.apply(&input).unwrap();
        let second = engine.apply(&input).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_empty_frame_keeps_schema() {
        let batch = MappingEngine::default()
            .apply(&RawFrame::new(vec!["x".into()]))
            .unwrap();
        assert_eq!(batch.num_rows(), 0);
        assert_eq!(batch.num_columns(), 1);
    }
}
