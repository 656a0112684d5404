//! Report payloads (harvester -> registry) and their responses.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::mapping::ColumnMappingSpec;
use crate::status::{FileState, ImportStage, ReportStatus};

/// Column name -> first N values, in row order.
pub type DataPreview = BTreeMap<String, Vec<serde_json::Value>>;

/// Envelope wrapping every JSON report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportEnvelope {
    pub status: ReportStatus,
    pub path: String,
    pub monitored_path_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<ReportContent>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ReportEnvelope {
    pub fn success(
        path: impl Into<String>,
        monitored_path_id: impl Into<String>,
        content: ReportContent,
    ) -> Self {
        Self {
            status: ReportStatus::Success,
            path: path.into(),
            monitored_path_id: monitored_path_id.into(),
            content: Some(content),
            error: None,
        }
    }

    pub fn error(
        path: impl Into<String>,
        monitored_path_id: impl Into<String>,
        error: impl Into<String>,
    ) -> Self {
        Self {
            status: ReportStatus::Error,
            path: path.into(),
            monitored_path_id: monitored_path_id.into(),
            content: None,
            error: Some(error.into()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "task")]
pub enum ReportContent {
    #[serde(rename = "file_size")]
    FileSize { size: u64 },
    #[serde(rename = "import")]
    Import(ImportReport),
}

impl ReportContent {
    pub fn stage(&self) -> Option<ImportStage> {
        match self {
            ReportContent::FileSize { .. } => None,
            ReportContent::Import(report) => Some(report.stage()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "stage")]
pub enum ImportReport {
    #[serde(rename = "file metadata")]
    FileMetadata { data: FileMetadataReport },
    #[serde(rename = "data summary")]
    DataSummary { data: DataPreview },
    #[serde(rename = "upload complete")]
    UploadComplete { data: UploadCompleteReport },
    #[serde(rename = "harvest complete")]
    HarvestComplete,
    #[serde(rename = "harvest failed")]
    HarvestFailed { error: String },
}

impl ImportReport {
    pub fn stage(&self) -> ImportStage {
        match self {
            ImportReport::FileMetadata { .. } => ImportStage::FileMetadata,
            ImportReport::DataSummary { .. } => ImportStage::DataSummary,
            ImportReport::UploadComplete { .. } => ImportStage::UploadComplete,
            ImportReport::HarvestComplete => ImportStage::HarvestComplete,
            ImportReport::HarvestFailed { .. } => ImportStage::HarvestFailed,
        }
    }
}

/// Parser-extracted metadata, sent once per negotiation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FileMetadataReport {
    pub core_metadata: serde_json::Map<String, serde_json::Value>,
    pub extra_metadata: serde_json::Map<String, serde_json::Value>,
    pub test_date: Option<serde_json::Value>,
    pub parser: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UploadCompleteReport {
    pub successes: usize,
    /// Partition number -> error message.
    pub errors: BTreeMap<String, String>,
}

/// Form fields accompanying one multipart partition upload.
#[derive(Debug, Clone, PartialEq)]
pub struct PartitionUpload {
    pub path: String,
    pub monitored_path_id: String,
    pub total_row_count: u64,
    pub partition_number: usize,
    pub partition_count: usize,
    pub filename: String,
}

impl PartitionUpload {
    /// Flat key/value fields for the multipart form. The file part itself is
    /// attached by the transport.
    pub fn form_fields(&self) -> Vec<(&'static str, String)> {
        vec![
            ("format", "flat".to_string()),
            ("status", ReportStatus::Success.as_str().to_string()),
            ("path", self.path.clone()),
            ("monitored_path_id", self.monitored_path_id.clone()),
            ("task", "import".to_string()),
            ("stage", ImportStage::UploadParquet.as_str().to_string()),
            ("total_row_count", self.total_row_count.to_string()),
            ("partition_number", self.partition_number.to_string()),
            ("partition_count", self.partition_count.to_string()),
            ("filename", self.filename.clone()),
        ]
    }

    /// `<stem>.part_<n>.parquet`, zero-padded so partitions sort lexically.
    pub fn partition_filename(stem: &str, partition_number: usize, partition_count: usize) -> String {
        let width = partition_count / 10 + 1;
        format!("{}.part_{:0width$}.parquet", stem, partition_number, width = width)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SizeReportResponse {
    pub state: FileState,
}

/// Where the summary response says the mapping lives.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MappingLocation {
    /// Fetch with an authenticated GET; the body carries `rendered_map`.
    Url(String),
    Inline(serde_json::Value),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SummaryResponse {
    #[serde(default)]
    pub mapping: Option<MappingLocation>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MappingResponse {
    #[serde(default)]
    pub rendered_map: Option<serde_json::Value>,
}

impl MappingResponse {
    pub fn into_spec(self) -> Result<Option<ColumnMappingSpec>, serde_json::Error> {
        match self.rendered_map {
            Some(value) => ColumnMappingSpec::from_rendered(&value),
            None => Ok(None),
        }
    }
}
