//! Harvester Protocol
//!
//! Wire types for Harvester <-> Registry communication. The registry is the
//! remote authority: it owns harvesting policy, decides what each file's
//! negotiation does next, and receives the uploaded columnar data.
//!
//! # Exchange
//!
//! ```text
//! harvester                              registry
//!    │── GET  config/ ──────────────────────▶│  HarvesterSettings
//!    │── POST report/ {task: file_size} ────▶│  {state: STABLE | WAITING | ...}
//!    │── POST report/ {stage: file metadata}▶│
//!    │── POST report/ {stage: data summary} ▶│  {mapping: null | url | spec}
//!    │── POST report/ multipart parquet ────▶│  (one per partition)
//!    │── POST report/ {stage: upload complete}▶│
//!    │── POST report/ {stage: harvest complete}▶│
//! ```
//!
//! Types here are serde-only; transport lives in the `harvester` crate.

pub mod defaults;
pub mod mapping;
pub mod report;
pub mod settings;
pub mod status;

pub use mapping::{ColumnMapping, ColumnMappingSpec, TargetType};
pub use report::{
    DataPreview, FileMetadataReport, ImportReport, MappingLocation, MappingResponse,
    PartitionUpload, ReportContent, ReportEnvelope, SizeReportResponse, SummaryResponse,
    UploadCompleteReport,
};
pub use settings::{HarvesterSettings, MonitoredPath};
pub use status::{FileState, ImportStage, ProtocolError, ReportStatus};
