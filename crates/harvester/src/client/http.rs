//! reqwest transport for the registry.

use async_trait::async_trait;
use harvester_protocol::defaults::{AUTH_SCHEME, CONFIG_ENDPOINT, PARQUET_FILE_FIELD, REPORT_ENDPOINT};
use harvester_protocol::{
    ColumnMappingSpec, DataPreview, FileMetadataReport, FileState, HarvesterSettings,
    ImportReport, MappingLocation, MappingResponse, PartitionUpload, ReportContent,
    ReportEnvelope, SizeReportResponse, SummaryResponse, UploadCompleteReport,
};
use reqwest::header::AUTHORIZATION;
use reqwest::multipart::{Form, Part};
use reqwest::{Client, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use std::time::Duration;
use tracing::debug;

use super::error::{ClientError, ClientResult};
use super::{decode_mapping, strip_nul, FileKey, RemoteAuthority};

/// One authenticated request per call; no retries here.
#[derive(Clone)]
pub struct HttpAuthority {
    client: Client,
    base_url: String,
    api_key: String,
}

impl HttpAuthority {
    pub fn new(base_url: &str, api_key: &str, timeout: Duration) -> ClientResult<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ClientError::Fatal(format!("failed to build HTTP client: {}", e)))?;
        let base_url = if base_url.ends_with('/') {
            base_url.to_string()
        } else {
            format!("{}/", base_url)
        };
        Ok(Self {
            client,
            base_url,
            api_key: api_key.to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        request.header(AUTHORIZATION, format!("{} {}", AUTH_SCHEME, self.api_key))
    }

    async fn send(&self, request: RequestBuilder) -> ClientResult<Response> {
        let response = self.authorized(request).send().await?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(ClientError::from_status(status.as_u16(), &body))
    }

    async fn decode<T: DeserializeOwned>(response: Response) -> ClientResult<T> {
        let bytes = response.bytes().await?;
        serde_json::from_slice(&bytes)
            .map_err(|e| ClientError::Fatal(format!("undecodable registry response: {}", e)))
    }

    async fn post_report(&self, envelope: &ReportEnvelope) -> ClientResult<Response> {
        let body = serde_json::to_value(envelope)
            .map(strip_nul)
            .map_err(|e| ClientError::Fatal(format!("failed to encode report: {}", e)))?;
        debug!(path = %envelope.path, "POST report");
        self.send(self.client.post(self.endpoint(REPORT_ENDPOINT)).json(&body))
            .await
    }

    async fn post_import(&self, file: &FileKey, report: ImportReport) -> ClientResult<Response> {
        let envelope = ReportEnvelope::success(
            file.path.clone(),
            file.monitored_path_id.clone(),
            ReportContent::Import(report),
        );
        self.post_report(&envelope).await
    }

    async fn fetch_mapping(&self, url: &str) -> ClientResult<Option<ColumnMappingSpec>> {
        debug!(%url, "Fetching column mapping");
        let response = self.send(self.client.get(url)).await?;
        let mapping: MappingResponse = Self::decode(response).await?;
        match mapping.rendered_map {
            Some(rendered) => decode_mapping(&rendered),
            None => Ok(None),
        }
    }
}

#[async_trait]
impl RemoteAuthority for HttpAuthority {
    async fn fetch_settings(&self) -> ClientResult<HarvesterSettings> {
        let response = self
            .send(self.client.get(self.endpoint(CONFIG_ENDPOINT)))
            .await?;
        Self::decode(response).await
    }

    async fn report_size(&self, file: &FileKey, size: u64) -> ClientResult<FileState> {
        let envelope = ReportEnvelope::success(
            file.path.clone(),
            file.monitored_path_id.clone(),
            ReportContent::FileSize { size },
        );
        let response = self.post_report(&envelope).await?;
        let decision: SizeReportResponse = Self::decode(response).await?;
        Ok(decision.state)
    }

    async fn report_metadata(&self, file: &FileKey, metadata: &FileMetadataReport) -> ClientResult<()> {
        self.post_import(
            file,
            ImportReport::FileMetadata {
                data: metadata.clone(),
            },
        )
        .await?;
        Ok(())
    }

    async fn report_summary(
        &self,
        file: &FileKey,
        preview: &DataPreview,
    ) -> ClientResult<Option<ColumnMappingSpec>> {
        let response = self
            .post_import(
                file,
                ImportReport::DataSummary {
                    data: preview.clone(),
                },
            )
            .await?;
        let summary: SummaryResponse = Self::decode(response).await?;
        match summary.mapping {
            None => Ok(None),
            Some(MappingLocation::Url(url)) => self.fetch_mapping(&url).await,
            Some(MappingLocation::Inline(value)) => {
                let rendered = value.get("rendered_map").unwrap_or(&value);
                decode_mapping(rendered)
            }
        }
    }

    async fn upload_partition(&self, upload: &PartitionUpload, parquet: &[u8]) -> ClientResult<()> {
        let part = Part::bytes(parquet.to_vec())
            .file_name(upload.filename.clone())
            .mime_str("application/octet-stream")
            .map_err(|e| ClientError::Fatal(e.to_string()))?;
        let form = upload
            .form_fields()
            .into_iter()
            .fold(Form::new(), |form, (name, value)| {
                form.text(name, value.replace('\0', ""))
            })
            .part(PARQUET_FILE_FIELD, part);

        debug!(
            filename = %upload.filename,
            partition = upload.partition_number,
            of = upload.partition_count,
            bytes = parquet.len(),
            "Uploading partition"
        );
        self.send(
            self.client
                .post(self.endpoint(REPORT_ENDPOINT))
                .multipart(form),
        )
        .await?;
        Ok(())
    }

    async fn report_upload_complete(
        &self,
        file: &FileKey,
        report: &UploadCompleteReport,
    ) -> ClientResult<()> {
        self.post_import(
            file,
            ImportReport::UploadComplete {
                data: report.clone(),
            },
        )
        .await?;
        Ok(())
    }

    async fn report_outcome(&self, file: &FileKey, outcome: &ImportReport) -> ClientResult<()> {
        self.post_import(file, outcome.clone()).await?;
        Ok(())
    }

    async fn report_error(&self, file: &FileKey, message: &str) -> ClientResult<()> {
        let envelope = ReportEnvelope::error(
            file.path.clone(),
            file.monitored_path_id.clone(),
            message.replace('\0', ""),
        );
        self.post_report(&envelope).await?;
        Ok(())
    }
}
