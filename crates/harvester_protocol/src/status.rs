//! Status enums used on the wire.
//!
//! These are the CANONICAL spellings; the registry's strings must round-trip
//! through them unchanged.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("invalid file state: '{0}'")]
    InvalidFileState(String),
    #[error("invalid import stage: '{0}'")]
    InvalidStage(String),
}

/// Registry decision returned for a size report.
///
/// Only [`FileState::proceeds`] states let a negotiation continue past the
/// size report. Everything else ends the negotiation for the current cycle;
/// the file is re-evaluated from scratch on the next one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FileState {
    /// Size has not changed for long enough; import may start.
    #[serde(rename = "STABLE")]
    Stable,
    /// A previous import failed and the registry asked for another attempt.
    #[serde(rename = "RETRY IMPORT", alias = "RETRY_IMPORT")]
    RetryImport,
    /// A mapping has been assigned since the last attempt.
    #[serde(rename = "MAP ASSIGNED", alias = "MAP_ASSIGNED")]
    MapAssigned,
    /// Storage quota was exhausted previously and has been freed.
    #[serde(rename = "AWAITING STORAGE", alias = "AWAITING_STORAGE")]
    AwaitingStorage,
    /// The registry is not ready for this file yet.
    #[serde(rename = "WAITING")]
    Waiting,
    /// Already imported; nothing to do.
    #[serde(rename = "IMPORTED")]
    Imported,
    /// Size changed since the last report; the file is still being written.
    #[serde(rename = "UNSTABLE")]
    Unstable,
    /// Any status this harvester does not know. Never proceeds.
    #[serde(other)]
    Unrecognized,
}

impl FileState {
    pub fn as_str(&self) -> &'static str {
        match self {
            FileState::Stable => "STABLE",
            FileState::RetryImport => "RETRY IMPORT",
            FileState::MapAssigned => "MAP ASSIGNED",
            FileState::AwaitingStorage => "AWAITING STORAGE",
            FileState::Waiting => "WAITING",
            FileState::Imported => "IMPORTED",
            FileState::Unstable => "UNSTABLE",
            FileState::Unrecognized => "UNRECOGNIZED",
        }
    }

    /// Whether the negotiation may continue to the metadata report.
    pub fn proceeds(&self) -> bool {
        matches!(
            self,
            FileState::Stable
                | FileState::RetryImport
                | FileState::MapAssigned
                | FileState::AwaitingStorage
        )
    }
}

impl fmt::Display for FileState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for FileState {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().replace('_', " ").as_str() {
            "STABLE" => Ok(FileState::Stable),
            "RETRY IMPORT" => Ok(FileState::RetryImport),
            "MAP ASSIGNED" => Ok(FileState::MapAssigned),
            "AWAITING STORAGE" => Ok(FileState::AwaitingStorage),
            "WAITING" => Ok(FileState::Waiting),
            "IMPORTED" => Ok(FileState::Imported),
            "UNSTABLE" => Ok(FileState::Unstable),
            _ => Err(ProtocolError::InvalidFileState(s.to_string())),
        }
    }
}

/// Outcome flag carried by every report envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ReportStatus {
    #[default]
    Success,
    Error,
}

impl ReportStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReportStatus::Success => "success",
            ReportStatus::Error => "error",
        }
    }
}

impl fmt::Display for ReportStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Import stage names as the registry spells them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ImportStage {
    #[serde(rename = "file metadata")]
    FileMetadata,
    #[serde(rename = "data summary")]
    DataSummary,
    #[serde(rename = "upload parquet partitions")]
    UploadParquet,
    #[serde(rename = "upload complete")]
    UploadComplete,
    #[serde(rename = "harvest complete")]
    HarvestComplete,
    #[serde(rename = "harvest failed")]
    HarvestFailed,
}

impl ImportStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            ImportStage::FileMetadata => "file metadata",
            ImportStage::DataSummary => "data summary",
            ImportStage::UploadParquet => "upload parquet partitions",
            ImportStage::UploadComplete => "upload complete",
            ImportStage::HarvestComplete => "harvest complete",
            ImportStage::HarvestFailed => "harvest failed",
        }
    }
}

impl fmt::Display for ImportStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for ImportStage {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "file metadata" => Ok(ImportStage::FileMetadata),
            "data summary" => Ok(ImportStage::DataSummary),
            "upload parquet partitions" => Ok(ImportStage::UploadParquet),
            "upload complete" => Ok(ImportStage::UploadComplete),
            "harvest complete" => Ok(ImportStage::HarvestComplete),
            "harvest failed" => Ok(ImportStage::HarvestFailed),
            _ => Err(ProtocolError::InvalidStage(s.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_state_wire_spellings() {
        let cases = [
            ("\"STABLE\"", FileState::Stable),
            ("\"RETRY IMPORT\"", FileState::RetryImport),
            ("\"RETRY_IMPORT\"", FileState::RetryImport),
            ("\"MAP ASSIGNED\"", FileState::MapAssigned),
            ("\"AWAITING STORAGE\"", FileState::AwaitingStorage),
            ("\"WAITING\"", FileState::Waiting),
            ("\"IMPORTED\"", FileState::Imported),
            ("\"UNSTABLE\"", FileState::Unstable),
            ("\"SOMETHING NEW\"", FileState::Unrecognized),
        ];
        for (json, expected) in cases {
            let parsed: FileState = serde_json::from_str(json).unwrap();
            assert_eq!(parsed, expected, "{} should parse as {:?}", json, expected);
        }
    }

    #[test]
    fn test_only_ready_states_proceed() {
        assert!(FileState::Stable.proceeds());
        assert!(FileState::RetryImport.proceeds());
        assert!(FileState::MapAssigned.proceeds());
        assert!(FileState::AwaitingStorage.proceeds());
        assert!(!FileState::Waiting.proceeds());
        assert!(!FileState::Imported.proceeds());
        assert!(!FileState::Unstable.proceeds());
        assert!(!FileState::Unrecognized.proceeds());
    }

    #[test]
    fn test_file_state_from_str_is_lenient() {
        assert_eq!("retry_import".parse::<FileState>().unwrap(), FileState::RetryImport);
        assert_eq!(" stable ".parse::<FileState>().unwrap(), FileState::Stable);
        assert!("nope".parse::<FileState>().is_err());
    }

    #[test]
    fn test_import_stage_display_matches_serde() {
        for stage in [
            ImportStage::FileMetadata,
            ImportStage::DataSummary,
            ImportStage::UploadParquet,
            ImportStage::UploadComplete,
            ImportStage::HarvestComplete,
            ImportStage::HarvestFailed,
        ] {
            let json = serde_json::to_string(&stage).unwrap();
            assert_eq!(json, format!("\"{}\"", stage));
            assert_eq!(stage.as_str().parse::<ImportStage>().unwrap(), stage);
        }
    }
}
