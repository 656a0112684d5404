//! Error taxonomy for harvesting

use harvester_mapping::MappingError;
use std::io;
use std::path::PathBuf;
use thiserror::Error;

use crate::client::ClientError;
use crate::parser::ParseError;

#[derive(Error, Debug)]
pub enum HarvestError {
    /// Local, retried next cycle.
    #[error("Parse error: {0}")]
    Parse(#[from] ParseError),

    /// Retries exhausted.
    #[error("Network error: {0}")]
    TransientNetwork(ClientError),

    /// Fatal to the cycle.
    #[error("Authorization error: {0}")]
    Authorization(ClientError),

    #[error("Mapping error: {0}")]
    MappingCoercion(MappingError),

    /// Artifact is left on disk for inspection.
    #[error("Artifact IO error: {0}")]
    ArtifactIo(MappingError),

    #[error("Path {} is not inside any monitored path", .0.display())]
    PathNotMonitored(PathBuf),

    #[error("Config error: {0}")]
    Config(String),

    #[error("Registry error: {0}")]
    Remote(ClientError),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

impl HarvestError {
    pub fn is_authorization(&self) -> bool {
        matches!(self, HarvestError::Authorization(_))
    }

    /// Short label for logs and cycle summaries.
    pub fn kind(&self) -> &'static str {
        match self {
            HarvestError::Parse(_) => "parse",
            HarvestError::TransientNetwork(_) => "network",
            HarvestError::Authorization(_) => "authorization",
            HarvestError::MappingCoercion(_) => "mapping",
            HarvestError::ArtifactIo(_) => "artifact_io",
            HarvestError::PathNotMonitored(_) => "path_not_monitored",
            HarvestError::Config(_) => "config",
            HarvestError::Remote(_) => "remote",
            HarvestError::Io(_) => "io",
        }
    }
}

impl From<ClientError> for HarvestError {
    fn from(err: ClientError) -> Self {
        match err {
            ClientError::Unauthorized { .. } => HarvestError::Authorization(err),
            ClientError::Transient(_) => HarvestError::TransientNetwork(err),
            _ => HarvestError::Remote(err),
        }
    }
}

impl From<MappingError> for HarvestError {
    fn from(err: MappingError) -> Self {
        if err.is_coercion() {
            HarvestError::MappingCoercion(err)
        } else {
            HarvestError::ArtifactIo(err)
        }
    }
}

pub type Result<T> = std::result::Result<T, HarvestError>;
