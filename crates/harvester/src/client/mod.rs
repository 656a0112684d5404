//! Remote Authority Client
//!
//! [`RemoteAuthority`] is the seam between negotiation logic and transport.
//! [`HttpAuthority`] talks to the registry; [`Retrying`] wraps any authority
//! with the configured backoff policy so every call site gets the same
//! retry semantics.

mod error;
mod http;
mod retry;

pub use error::{ClientError, ClientResult};
pub use http::HttpAuthority;
pub use retry::RetryPolicy;

use async_trait::async_trait;
use harvester_protocol::{
    ColumnMappingSpec, DataPreview, FileMetadataReport, FileState, HarvesterSettings,
    ImportReport, PartitionUpload, UploadCompleteReport,
};
use serde_json::Value;
use std::sync::Arc;

/// Identifies one file to the registry.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FileKey {
    pub path: String,
    pub monitored_path_id: String,
}

impl FileKey {
    pub fn new(path: impl Into<String>, monitored_path_id: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            monitored_path_id: monitored_path_id.into(),
        }
    }
}

/// One method per negotiation round-trip. Each returns a typed decision or
/// a classified [`ClientError`].
#[async_trait]
pub trait RemoteAuthority: Send + Sync {
    async fn fetch_settings(&self) -> ClientResult<HarvesterSettings>;

    async fn report_size(&self, file: &FileKey, size: u64) -> ClientResult<FileState>;

    async fn report_metadata(&self, file: &FileKey, metadata: &FileMetadataReport) -> ClientResult<()>;

    /// `None` means no mapping has been assigned yet.
    async fn report_summary(
        &self,
        file: &FileKey,
        preview: &DataPreview,
    ) -> ClientResult<Option<ColumnMappingSpec>>;

    async fn upload_partition(&self, upload: &PartitionUpload, parquet: &[u8]) -> ClientResult<()>;

    async fn report_upload_complete(
        &self,
        file: &FileKey,
        report: &UploadCompleteReport,
    ) -> ClientResult<()>;

    /// `harvest complete` / `harvest failed`.
    async fn report_outcome(&self, file: &FileKey, outcome: &ImportReport) -> ClientResult<()>;

    /// Error envelope for failures not tied to an import stage.
    async fn report_error(&self, file: &FileKey, message: &str) -> ClientResult<()>;
}

#[async_trait]
impl<T: RemoteAuthority + ?Sized> RemoteAuthority for Arc<T> {
    async fn fetch_settings(&self) -> ClientResult<HarvesterSettings> {
        (**self).fetch_settings().await
    }

    async fn report_size(&self, file: &FileKey, size: u64) -> ClientResult<FileState> {
        (**self).report_size(file, size).await
    }

    async fn report_metadata(&self, file: &FileKey, metadata: &FileMetadataReport) -> ClientResult<()> {
        (**self).report_metadata(file, metadata).await
    }

    async fn report_summary(
        &self,
        file: &FileKey,
        preview: &DataPreview,
    ) -> ClientResult<Option<ColumnMappingSpec>> {
        (**self).report_summary(file, preview).await
    }

    async fn upload_partition(&self, upload: &PartitionUpload, parquet: &[u8]) -> ClientResult<()> {
        (**self).upload_partition(upload, parquet).await
    }

    async fn report_upload_complete(
        &self,
        file: &FileKey,
        report: &UploadCompleteReport,
    ) -> ClientResult<()> {
        (**self).report_upload_complete(file, report).await
    }

    async fn report_outcome(&self, file: &FileKey, outcome: &ImportReport) -> ClientResult<()> {
        (**self).report_outcome(file, outcome).await
    }

    async fn report_error(&self, file: &FileKey, message: &str) -> ClientResult<()> {
        (**self).report_error(file, message).await
    }
}

/// Applies a [`RetryPolicy`] to every call of the wrapped authority.
pub struct Retrying<A> {
    inner: A,
    policy: RetryPolicy,
}

impl<A: RemoteAuthority> Retrying<A> {
    pub fn new(inner: A, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }

    pub fn inner(&self) -> &A {
        &self.inner
    }
}

#[async_trait]
impl<A: RemoteAuthority> RemoteAuthority for Retrying<A> {
    async fn fetch_settings(&self) -> ClientResult<HarvesterSettings> {
        self.policy
            .run("fetch_settings", || self.inner.fetch_settings())
            .await
    }

    async fn report_size(&self, file: &FileKey, size: u64) -> ClientResult<FileState> {
        self.policy
            .run("report_size", || self.inner.report_size(file, size))
            .await
    }

    async fn report_metadata(&self, file: &FileKey, metadata: &FileMetadataReport) -> ClientResult<()> {
        self.policy
            .run("report_metadata", || self.inner.report_metadata(file, metadata))
            .await
    }

    async fn report_summary(
        &self,
        file: &FileKey,
        preview: &DataPreview,
    ) -> ClientResult<Option<ColumnMappingSpec>> {
        self.policy
            .run("report_summary", || self.inner.report_summary(file, preview))
            .await
    }

    async fn upload_partition(&self, upload: &PartitionUpload, parquet: &[u8]) -> ClientResult<()> {
        self.policy
            .run("upload_partition", || self.inner.upload_partition(upload, parquet))
            .await
    }

    async fn report_upload_complete(
        &self,
        file: &FileKey,
        report: &UploadCompleteReport,
    ) -> ClientResult<()> {
        self.policy
            .run("report_upload_complete", || {
                self.inner.report_upload_complete(file, report)
            })
            .await
    }

    async fn report_outcome(&self, file: &FileKey, outcome: &ImportReport) -> ClientResult<()> {
        self.policy
            .run("report_outcome", || self.inner.report_outcome(file, outcome))
            .await
    }

    async fn report_error(&self, file: &FileKey, message: &str) -> ClientResult<()> {
        self.policy
            .run("report_error", || self.inner.report_error(file, message))
            .await
    }
}

/// Remove NUL characters from every string and key. The registry's
/// database rejects them.
pub fn strip_nul(value: Value) -> Value {
    match value {
        Value::String(s) if s.contains('\0') => Value::String(s.replace('\0', "")),
        Value::Array(items) => Value::Array(items.into_iter().map(strip_nul).collect()),
        Value::Object(map) => Value::Object(
            map.into_iter()
                .map(|(k, v)| (k.replace('\0', ""), strip_nul(v)))
                .collect(),
        ),
        other => other,
    }
}

/// Decode a `rendered_map`. Rules the harvester cannot interpret are a
/// fatal protocol error rather than "no mapping".
pub fn decode_mapping(rendered: &Value) -> ClientResult<Option<ColumnMappingSpec>> {
    ColumnMappingSpec::from_rendered(rendered)
        .map_err(|e| ClientError::Fatal(format!("undecodable column mapping: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_decode_mapping_classifies_bad_rules_as_fatal() {
        assert!(decode_mapping(&json!(null)).unwrap().is_none());
        let spec = decode_mapping(&json!({"Volts": {"data_type": "float"}}))
            .unwrap()
            .unwrap();
        assert_eq!(spec.len(), 1);

        let err = decode_mapping(&json!({"Volts": {"data_type": "category"}})).unwrap_err();
        assert!(matches!(err, ClientError::Fatal(_)));
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_strip_nul_recurses() {
        let dirty = json!({"na\u{0}me": ["a\u{0}b", {"k": "\u{0}"}], "n": 1});
        assert_eq!(strip_nul(dirty), json!({"name": ["ab", {"k": ""}], "n": 1}));
    }
}
