//! File State Machine
//!
//! One [`FileNegotiation`] per discovered file per cycle. States only move
//! forward along the transition table below; every terminal state is
//! "for this cycle" and the next scan starts again from `DISCOVERED`.
//!
//! ```text
//! DISCOVERED -> PARSE_ATTEMPTED -> SIZE_REPORTED -> METADATA_SENT -> SUMMARY_SENT -> MAPPED -> UPLOADED -> CLEANED_UP
//!                    |                  |                                 |            |
//!                    v                  v                                 v            v
//!              PARSE_FAILED      AWAITING_DECISION                     SKIPPED   UPLOAD_FAILED
//! ```
//!
//! Any step that talks to the registry may also end in `UPLOAD_FAILED`.

use harvester_mapping::{ArtifactDir, ArtifactSet, MappingEngine, MappingError, PartitionWriter};
use harvester_protocol::{FileState, ImportReport, PartitionUpload, UploadCompleteReport};
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

use crate::client::{FileKey, RemoteAuthority};
use crate::error::HarvestError;
use crate::parser::{self, ParsedInput, ParserRegistry};
use crate::scan::DiscoveredFile;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum NegotiationState {
    Discovered,
    ParseAttempted,
    SizeReported,
    /// Registry answered WAITING, UNSTABLE, IMPORTED or something unknown.
    AwaitingDecision,
    MetadataSent,
    SummarySent,
    /// No mapping assigned yet. Expected for new files.
    Skipped,
    Mapped,
    Uploaded,
    CleanedUp,
    ParseFailed,
    UploadFailed,
}

impl NegotiationState {
    pub fn as_str(&self) -> &'static str {
        match self {
            NegotiationState::Discovered => "DISCOVERED",
            NegotiationState::ParseAttempted => "PARSE_ATTEMPTED",
            NegotiationState::SizeReported => "SIZE_REPORTED",
            NegotiationState::AwaitingDecision => "AWAITING_DECISION",
            NegotiationState::MetadataSent => "METADATA_SENT",
            NegotiationState::SummarySent => "SUMMARY_SENT",
            NegotiationState::Skipped => "SKIPPED",
            NegotiationState::Mapped => "MAPPED",
            NegotiationState::Uploaded => "UPLOADED",
            NegotiationState::CleanedUp => "CLEANED_UP",
            NegotiationState::ParseFailed => "PARSE_FAILED",
            NegotiationState::UploadFailed => "UPLOAD_FAILED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            NegotiationState::AwaitingDecision
                | NegotiationState::Skipped
                | NegotiationState::CleanedUp
                | NegotiationState::ParseFailed
                | NegotiationState::UploadFailed
        )
    }

    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            NegotiationState::ParseFailed | NegotiationState::UploadFailed
        )
    }

    /// The transition table.
    pub fn can_transition_to(&self, next: NegotiationState) -> bool {
        use NegotiationState::*;
        matches!(
            (*self, next),
            (Discovered, ParseAttempted)
                | (ParseAttempted, SizeReported | ParseFailed | UploadFailed)
                | (SizeReported, AwaitingDecision | MetadataSent | UploadFailed)
                | (MetadataSent, SummarySent | UploadFailed)
                | (SummarySent, Skipped | Mapped | UploadFailed)
                | (Mapped, Uploaded | UploadFailed)
                | (Uploaded, CleanedUp)
        )
    }
}

impl fmt::Display for NegotiationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Shared, read-only inputs for every negotiation in a cycle.
pub struct NegotiationContext {
    pub authority: Arc<dyn RemoteAuthority>,
    pub parsers: Arc<ParserRegistry>,
    pub artifact_root: PathBuf,
    pub preview_rows: usize,
}

#[derive(Debug)]
pub struct NegotiationOutcome {
    pub path: PathBuf,
    pub monitored_path_id: String,
    pub state: NegotiationState,
    /// Every state visited, starting with `Discovered`.
    pub trail: Vec<NegotiationState>,
    pub remote_status: Option<FileState>,
    pub error: Option<HarvestError>,
    /// Artifact directory left on disk for inspection.
    pub retained_artifact: Option<PathBuf>,
    pub rows_uploaded: u64,
    pub elapsed: Duration,
}

impl NegotiationOutcome {
    pub fn is_success(&self) -> bool {
        matches!(
            self.state,
            NegotiationState::CleanedUp | NegotiationState::Uploaded
        )
    }

    /// Credentials were rejected; the rest of the cycle must stop.
    pub fn halts_cycle(&self) -> bool {
        self.error.as_ref().is_some_and(HarvestError::is_authorization)
    }

    pub fn visited(&self, state: NegotiationState) -> bool {
        self.trail.contains(&state)
    }
}

struct Failure {
    state: NegotiationState,
    error: HarvestError,
}

impl Failure {
    fn parse(error: impl Into<HarvestError>) -> Self {
        Self {
            state: NegotiationState::ParseFailed,
            error: error.into(),
        }
    }

    fn upload(error: impl Into<HarvestError>) -> Self {
        Self {
            state: NegotiationState::UploadFailed,
            error: error.into(),
        }
    }
}

fn join_error(err: tokio::task::JoinError) -> HarvestError {
    HarvestError::Io(io::Error::other(format!("worker task failed: {}", err)))
}

pub struct FileNegotiation {
    ctx: Arc<NegotiationContext>,
    file: DiscoveredFile,
    key: FileKey,
    partition_rows: usize,
    state: NegotiationState,
    trail: Vec<NegotiationState>,
    remote_status: Option<FileState>,
    error: Option<HarvestError>,
    retained_artifact: Option<PathBuf>,
    rows_uploaded: u64,
}

impl FileNegotiation {
    pub fn new(ctx: Arc<NegotiationContext>, file: DiscoveredFile, partition_rows: usize) -> Self {
        let key = FileKey::new(
            file.path.to_string_lossy().to_string(),
            file.monitored_path_id.clone(),
        );
        Self {
            ctx,
            file,
            key,
            partition_rows: partition_rows.max(1),
            state: NegotiationState::Discovered,
            trail: vec![NegotiationState::Discovered],
            remote_status: None,
            error: None,
            retained_artifact: None,
            rows_uploaded: 0,
        }
    }

    pub fn state(&self) -> NegotiationState {
        self.state
    }

    fn advance(&mut self, next: NegotiationState) {
        if !self.state.can_transition_to(next) {
            error!(
                path = %self.file.path.display(),
                from = %self.state,
                to = %next,
                "Illegal negotiation transition ignored"
            );
            return;
        }
        debug!(path = %self.file.path.display(), from = %self.state, to = %next, "Negotiation transition");
        self.state = next;
        self.trail.push(next);
    }

    fn retain(&mut self, dir: &mut ArtifactDir) {
        let path = dir.retain().to_path_buf();
        warn!(path = %path.display(), "Keeping artifact for inspection");
        self.retained_artifact = Some(path);
    }

    /// Drive this file to a terminal state. Never returns early on error;
    /// the error is carried in the outcome.
    pub async fn run(mut self) -> NegotiationOutcome {
        let started = Instant::now();

        if let Err(failure) = self.drive().await {
            self.advance(failure.state);
            self.report_failure(&failure.error).await;
            self.error = Some(failure.error);
        }

        let elapsed = started.elapsed();
        let path = self.file.path.display().to_string();
        match (&self.error, self.state.is_failure()) {
            (Some(e), true) => warn!(
                path = %path,
                state = %self.state,
                kind = e.kind(),
                error = %e,
                elapsed_ms = elapsed.as_millis() as u64,
                "Negotiation failed"
            ),
            _ => info!(
                path = %path,
                state = %self.state,
                status = ?self.remote_status,
                rows = self.rows_uploaded,
                elapsed_ms = elapsed.as_millis() as u64,
                "Negotiation finished"
            ),
        }

        NegotiationOutcome {
            path: self.file.path,
            monitored_path_id: self.file.monitored_path_id,
            state: self.state,
            trail: self.trail,
            remote_status: self.remote_status,
            error: self.error,
            retained_artifact: self.retained_artifact,
            rows_uploaded: self.rows_uploaded,
            elapsed,
        }
    }

    /// Best-effort `harvest failed` once the registry knows about the file.
    async fn report_failure(&self, error: &HarvestError) {
        if self.remote_status.is_none() || error.is_authorization() {
            return;
        }
        let outcome = ImportReport::HarvestFailed {
            error: error.to_string(),
        };
        if let Err(e) = self.ctx.authority.report_outcome(&self.key, &outcome).await {
            warn!(path = %self.file.path.display(), error = %e, "Failed to report harvest failure");
        }
    }

    async fn drive(&mut self) -> Result<(), Failure> {
        let authority = self.ctx.authority.clone();
        let key = self.key.clone();

        // Parse and preview off the async runtime.
        self.advance(NegotiationState::ParseAttempted);
        let step = Instant::now();
        let parsers = self.ctx.parsers.clone();
        let path = self.file.path.clone();
        let preview_rows = self.ctx.preview_rows;
        let (input, preview) = tokio::task::spawn_blocking(move || {
            let input = parsers.open(&path)?;
            let preview = parser::preview(input.as_ref(), preview_rows)?;
            Ok::<_, parser::ParseError>((input, preview))
        })
        .await
        .map_err(|e| Failure::parse(join_error(e)))?
        .map_err(Failure::parse)?;
        debug!(
            path = %self.file.path.display(),
            parser = input.parser_name(),
            elapsed_ms = step.elapsed().as_millis() as u64,
            "Parsed file"
        );

        let status = authority
            .report_size(&key, self.file.size)
            .await
            .map_err(Failure::upload)?;
        self.remote_status = Some(status);
        self.advance(NegotiationState::SizeReported);
        if !status.proceeds() {
            info!(path = %self.file.path.display(), %status, "Registry not ready for import");
            self.advance(NegotiationState::AwaitingDecision);
            return Ok(());
        }

        let step = Instant::now();
        let metadata = input.metadata().to_report(input.parser_name());
        authority
            .report_metadata(&key, &metadata)
            .await
            .map_err(Failure::upload)?;
        self.advance(NegotiationState::MetadataSent);
        debug!(elapsed_ms = step.elapsed().as_millis() as u64, "Metadata sent");

        let step = Instant::now();
        let mapping = authority
            .report_summary(&key, &preview)
            .await
            .map_err(Failure::upload)?;
        self.advance(NegotiationState::SummarySent);
        debug!(elapsed_ms = step.elapsed().as_millis() as u64, "Summary sent");

        let Some(spec) = mapping else {
            info!(path = %self.file.path.display(), "No column mapping assigned yet");
            self.advance(NegotiationState::Skipped);
            return Ok(());
        };

        let step = Instant::now();
        let stem = file_stem(&self.file.path);
        let dir = ArtifactDir::create(&self.ctx.artifact_root, &stem)
            .map_err(|e| Failure::upload(HarvestError::ArtifactIo(e)))?;
        let engine = MappingEngine::new(spec);
        let partition_rows = self.partition_rows;
        let (mut dir, result) = tokio::task::spawn_blocking(move || {
            let result = materialize(input.as_ref(), &engine, &dir, partition_rows);
            (dir, result)
        })
        .await
        .map_err(|e| Failure::upload(join_error(e)))?;

        let set = match result {
            Ok(set) => set,
            Err(e) => {
                if matches!(e, HarvestError::ArtifactIo(_)) {
                    self.retain(&mut dir);
                }
                return Err(Failure::upload(e));
            }
        };
        self.advance(NegotiationState::Mapped);
        debug!(
            partitions = set.len(),
            rows = set.total_rows,
            elapsed_ms = step.elapsed().as_millis() as u64,
            "Artifacts prepared"
        );

        let step = Instant::now();
        let partition_count = set.len();
        let mut report = UploadCompleteReport::default();
        let mut last_error: Option<HarvestError> = None;
        for part in &set.parts {
            let bytes = match tokio::fs::read(&part.path).await {
                Ok(bytes) => bytes,
                Err(source) => {
                    self.retain(&mut dir);
                    return Err(Failure::upload(HarvestError::ArtifactIo(MappingError::Io {
                        path: part.path.clone(),
                        source,
                    })));
                }
            };
            let upload = PartitionUpload {
                path: key.path.clone(),
                monitored_path_id: key.monitored_path_id.clone(),
                total_row_count: set.total_rows,
                partition_number: part.index,
                partition_count,
                filename: PartitionUpload::partition_filename(&stem, part.index, partition_count),
            };
            match authority.upload_partition(&upload, &bytes).await {
                Ok(()) => report.successes += 1,
                Err(e) if e.is_unauthorized() => {
                    self.retain(&mut dir);
                    return Err(Failure::upload(e));
                }
                Err(e) => {
                    warn!(filename = %upload.filename, error = %e, "Partition upload failed");
                    report.errors.insert(part.index.to_string(), e.to_string());
                    last_error = Some(e.into());
                }
            }
        }

        if let Err(e) = authority.report_upload_complete(&key, &report).await {
            self.retain(&mut dir);
            return Err(Failure::upload(e));
        }
        if let Some(e) = last_error {
            self.retain(&mut dir);
            return Err(Failure::upload(e));
        }
        self.rows_uploaded = set.total_rows;
        self.advance(NegotiationState::Uploaded);
        debug!(elapsed_ms = step.elapsed().as_millis() as u64, "Upload complete");

        match dir.cleanup() {
            Ok(()) => self.advance(NegotiationState::CleanedUp),
            Err(e) => warn!(error = %e, "Uploaded but failed to remove artifact"),
        }

        if let Err(e) = authority
            .report_outcome(&key, &ImportReport::HarvestComplete)
            .await
        {
            warn!(path = %self.file.path.display(), error = %e, "Failed to report harvest completion");
            if e.is_unauthorized() {
                self.error = Some(e.into());
            }
        }
        Ok(())
    }
}

fn file_stem(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| "data".to_string())
}

/// Map the full table in `partition_rows` chunks, one Parquet file each.
/// An empty table still produces one (empty) partition carrying the schema.
fn materialize(
    input: &dyn ParsedInput,
    engine: &MappingEngine,
    dir: &ArtifactDir,
    partition_rows: usize,
) -> Result<ArtifactSet, HarvestError> {
    let mut rows = input.rows()?;
    let mut writer = PartitionWriter::new(dir);
    let mut written = 0usize;
    loop {
        let frame = parser::read_frame(&mut rows, input.columns(), partition_rows)?;
        if frame.is_empty() && written > 0 {
            break;
        }
        let exhausted = frame.num_rows() < partition_rows;
        let batch = engine.apply(&frame)?;
        writer.write_partition(&batch)?;
        written += 1;
        if exhausted {
            break;
        }
    }
    Ok(writer.finish())
}
