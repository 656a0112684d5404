//! Scripted in-process registry for negotiation and loop tests.

#![allow(dead_code)]

use async_trait::async_trait;
use harvester::client::ClientResult;
use harvester::{ClientError, FileKey, HarvesterConfig, PathLocks, RemoteAuthority};
use harvester_protocol::{
    ColumnMapping, ColumnMappingSpec, DataPreview, FileMetadataReport, FileState,
    HarvesterSettings, ImportReport, ImportStage, MonitoredPath, PartitionUpload, TargetType,
    UploadCompleteReport,
};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;
use tempfile::TempDir;

#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    FetchSettings,
    Size(String),
    Metadata(String, FileMetadataReport),
    Summary(String, DataPreview),
    Upload {
        path: String,
        filename: String,
        partition_number: usize,
        partition_count: usize,
        total_row_count: u64,
        bytes: Vec<u8>,
    },
    UploadComplete(String, UploadCompleteReport),
    Outcome(String, ImportStage),
    Error(String, String),
}

/// What the fake registry answers.
#[derive(Debug, Clone)]
pub struct Script {
    pub settings: HarvesterSettings,
    pub fetch_error: Option<ClientError>,
    pub size_status: FileState,
    pub size_error: Option<ClientError>,
    /// Fail this many metadata reports with a transient error first.
    pub metadata_failures: u32,
    pub mapping: Option<ColumnMappingSpec>,
    /// Raw `rendered_map` decoded as the HTTP transport would; wins over `mapping`.
    pub rendered_map: Option<serde_json::Value>,
    pub upload_error: Option<ClientError>,
    pub upload_complete_error: Option<ClientError>,
    pub delay: Duration,
}

impl Default for Script {
    fn default() -> Self {
        Self {
            settings: HarvesterSettings::default(),
            fetch_error: None,
            size_status: FileState::Stable,
            size_error: None,
            metadata_failures: 0,
            mapping: None,
            rendered_map: None,
            upload_error: None,
            upload_complete_error: None,
            delay: Duration::ZERO,
        }
    }
}

#[derive(Default)]
pub struct MockAuthority {
    script: Mutex<Script>,
    calls: Mutex<Vec<Call>>,
    probe: Mutex<Option<PathLocks>>,
    unlocked_calls: Mutex<Vec<String>>,
    active: Mutex<HashMap<String, usize>>,
    max_active_per_path: Mutex<usize>,
    max_active_total: Mutex<usize>,
}

impl MockAuthority {
    pub fn new(script: Script) -> Self {
        Self {
            script: Mutex::new(script),
            ..Default::default()
        }
    }

    pub fn update(&self, f: impl FnOnce(&mut Script)) {
        f(&mut self.script.lock().unwrap());
    }

    fn script(&self) -> Script {
        self.script.lock().unwrap().clone()
    }

    /// Record any per-file call made while `locks` does not hold the path.
    pub fn probe_locks(&self, locks: PathLocks) {
        *self.probe.lock().unwrap() = Some(locks);
    }

    pub fn unlocked_calls(&self) -> Vec<String> {
        self.unlocked_calls.lock().unwrap().clone()
    }

    /// Highest number of overlapping size..summary spans for one path.
    pub fn max_active_per_path(&self) -> usize {
        *self.max_active_per_path.lock().unwrap()
    }

    /// Highest number of overlapping size..summary spans across all files.
    pub fn max_active_total(&self) -> usize {
        *self.max_active_total.lock().unwrap()
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn count(&self, pred: impl Fn(&Call) -> bool) -> usize {
        self.calls.lock().unwrap().iter().filter(|c| pred(c)).count()
    }

    pub fn size_reports(&self) -> usize {
        self.count(|c| matches!(c, Call::Size(_)))
    }

    pub fn metadata_reports(&self) -> usize {
        self.count(|c| matches!(c, Call::Metadata(..)))
    }

    pub fn uploads(&self) -> Vec<Call> {
        self.calls()
            .into_iter()
            .filter(|c| matches!(c, Call::Upload { .. }))
            .collect()
    }

    pub fn outcomes(&self) -> Vec<ImportStage> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::Outcome(_, stage) => Some(stage),
                _ => None,
            })
            .collect()
    }

    fn record(&self, call: Call) {
        self.calls.lock().unwrap().push(call);
    }

    fn check_locked(&self, path: &str) {
        if let Some(locks) = self.probe.lock().unwrap().as_ref() {
            if !locks.is_locked(Path::new(path)) {
                self.unlocked_calls.lock().unwrap().push(path.to_string());
            }
        }
    }

    fn enter(&self, path: &str) {
        let mut active = self.active.lock().unwrap();
        let n = active.entry(path.to_string()).or_default();
        *n += 1;
        let mut max = self.max_active_per_path.lock().unwrap();
        *max = (*max).max(*n);
        let total: usize = active.values().sum();
        let mut max_total = self.max_active_total.lock().unwrap();
        *max_total = (*max_total).max(total);
    }

    fn leave(&self, path: &str) {
        if let Some(n) = self.active.lock().unwrap().get_mut(path) {
            *n = n.saturating_sub(1);
        }
    }
}

#[async_trait]
impl RemoteAuthority for MockAuthority {
    async fn fetch_settings(&self) -> ClientResult<HarvesterSettings> {
        self.record(Call::FetchSettings);
        let script = self.script();
        match script.fetch_error {
            Some(e) => Err(e),
            None => Ok(script.settings),
        }
    }

    async fn report_size(&self, file: &FileKey, _size: u64) -> ClientResult<FileState> {
        self.check_locked(&file.path);
        self.enter(&file.path);
        self.record(Call::Size(file.path.clone()));
        let script = self.script();
        if !script.delay.is_zero() {
            tokio::time::sleep(script.delay).await;
        }
        if let Some(e) = script.size_error {
            self.leave(&file.path);
            return Err(e);
        }
        if !script.size_status.proceeds() {
            self.leave(&file.path);
        }
        Ok(script.size_status)
    }

    async fn report_metadata(&self, file: &FileKey, metadata: &FileMetadataReport) -> ClientResult<()> {
        self.check_locked(&file.path);
        self.record(Call::Metadata(file.path.clone(), metadata.clone()));
        let mut script = self.script.lock().unwrap();
        if script.metadata_failures > 0 {
            script.metadata_failures -= 1;
            return Err(ClientError::Transient("metadata endpoint unavailable".into()));
        }
        Ok(())
    }

    async fn report_summary(
        &self,
        file: &FileKey,
        preview: &DataPreview,
    ) -> ClientResult<Option<ColumnMappingSpec>> {
        self.check_locked(&file.path);
        self.record(Call::Summary(file.path.clone(), preview.clone()));
        self.leave(&file.path);
        let script = self.script();
        match script.rendered_map {
            Some(rendered) => harvester::client::decode_mapping(&rendered),
            None => Ok(script.mapping),
        }
    }

    async fn upload_partition(&self, upload: &PartitionUpload, parquet: &[u8]) -> ClientResult<()> {
        self.check_locked(&upload.path);
        self.record(Call::Upload {
            path: upload.path.clone(),
            filename: upload.filename.clone(),
            partition_number: upload.partition_number,
            partition_count: upload.partition_count,
            total_row_count: upload.total_row_count,
            bytes: parquet.to_vec(),
        });
        match self.script().upload_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    async fn report_upload_complete(
        &self,
        file: &FileKey,
        report: &UploadCompleteReport,
    ) -> ClientResult<()> {
        self.check_locked(&file.path);
        self.record(Call::UploadComplete(file.path.clone(), report.clone()));
        match self.script().upload_complete_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    async fn report_outcome(&self, file: &FileKey, outcome: &ImportReport) -> ClientResult<()> {
        self.check_locked(&file.path);
        self.record(Call::Outcome(file.path.clone(), outcome.stage()));
        Ok(())
    }

    async fn report_error(&self, file: &FileKey, message: &str) -> ClientResult<()> {
        self.record(Call::Error(file.path.clone(), message.to_string()));
        Ok(())
    }
}

pub const CYCLER_CSV: &str = "\
Volts,Cycle,Notes
3700,1,12.5
3710,1,12.0
3720,2,11.5
3730,2,11.0
3740,3,10.5
";

pub fn write_file(dir: &Path, name: &str, content: &str) -> PathBuf {
    let path = dir.join(name);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    std::fs::write(&path, content).unwrap();
    path
}

pub fn cycler_spec() -> ColumnMappingSpec {
    ColumnMappingSpec::new()
        .with_column(
            "Volts",
            ColumnMapping::new("voltage", TargetType::Float).with_scale(0.001, 0.0),
        )
        .with_column("Cycle", ColumnMapping::new("cycle_number", TargetType::Int))
}

/// Data directory plus a separate state directory.
pub struct Workspace {
    pub data: TempDir,
    pub state: TempDir,
}

impl Workspace {
    pub fn new() -> Self {
        Self {
            data: TempDir::new().unwrap(),
            state: TempDir::new().unwrap(),
        }
    }

    pub fn config(&self) -> HarvesterConfig {
        let mut config = HarvesterConfig::new("http://registry.test/harvesters/1/", "test-key")
            .with_state_dir(self.state.path());
        config.max_workers = 4;
        config.per_path_concurrency = 2;
        config.default_sleep_secs = 1;
        config
    }

    pub fn artifacts(&self) -> PathBuf {
        self.state.path().join("artifacts")
    }

    /// Artifact directories currently on disk.
    pub fn artifact_dirs(&self) -> Vec<PathBuf> {
        match std::fs::read_dir(self.artifacts()) {
            Ok(entries) => entries.map(|e| e.unwrap().path()).collect(),
            Err(_) => Vec::new(),
        }
    }

    pub fn monitored(&self, id: &str) -> MonitoredPath {
        MonitoredPath::new(id, self.data.path().to_string_lossy())
    }

    pub fn settings(&self) -> HarvesterSettings {
        HarvesterSettings {
            sleep_time: Some(1),
            monitored_paths: vec![self.monitored("1")],
            ..Default::default()
        }
    }
}
