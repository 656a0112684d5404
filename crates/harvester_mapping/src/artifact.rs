//! Local Parquet artifacts for one harvest.
//!
//! Every harvest gets its own `<stem>-<uuid>` directory under the artifact
//! root. Partitions are written to a hidden temp file and renamed into place
//! once the footer is flushed, so a `part.<i>.parquet` on disk is always
//! complete.

use arrow::record_batch::RecordBatch;
use parquet::arrow::ArrowWriter;
use parquet::basic::Compression;
use parquet::file::metadata::KeyValue;
use parquet::file::properties::WriterProperties;
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::{MappingError, MappingResult};
use crate::HARVESTER_VERSION;
use harvester_protocol::defaults::VERSION_METADATA_KEY;

/// Scoped artifact directory. Removed on drop unless [`retain`](Self::retain)
/// was called.
#[derive(Debug)]
pub struct ArtifactDir {
    path: PathBuf,
    retained: bool,
}

impl ArtifactDir {
    pub fn create(root: &Path, stem: &str) -> MappingResult<Self> {
        let name = format!("{}-{}", sanitize_stem(stem), Uuid::new_v4());
        let path = root.join(name);
        fs::create_dir_all(&path).map_err(|e| MappingError::io(&path, e))?;
        debug!(path = %path.display(), "Created artifact directory");
        Ok(Self {
            path,
            retained: false,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Keep the directory on disk after this guard goes away.
    pub fn retain(&mut self) -> &Path {
        self.retained = true;
        &self.path
    }

    pub fn is_retained(&self) -> bool {
        self.retained
    }

    /// Remove now and surface the error instead of logging it on drop.
    pub fn cleanup(mut self) -> MappingResult<()> {
        self.retained = true;
        remove_tree(&self.path)
    }
}

impl Drop for ArtifactDir {
    fn drop(&mut self) {
        if self.retained {
            return;
        }
        if let Err(e) = remove_tree(&self.path) {
            warn!(path = %self.path.display(), error = %e, "Failed to remove artifact directory");
        }
    }
}

fn remove_tree(path: &Path) -> MappingResult<()> {
    match fs::remove_dir_all(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(MappingError::io(path, e)),
    }
}

fn sanitize_stem(stem: &str) -> String {
    let cleaned: String = stem
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '\0' => '_',
            other => other,
        })
        .collect();
    if cleaned.is_empty() {
        "harvest".to_string()
    } else {
        cleaned
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionFile {
    pub index: usize,
    pub path: PathBuf,
    pub rows: usize,
}

/// Everything written for one file, in partition order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ArtifactSet {
    pub parts: Vec<PartitionFile>,
    pub total_rows: u64,
}

impl ArtifactSet {
    pub fn len(&self) -> usize {
        self.parts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.parts.is_empty()
    }
}

/// Writes one Parquet file per batch into an artifact directory.
pub struct PartitionWriter {
    dir: PathBuf,
    props: WriterProperties,
    set: ArtifactSet,
}

impl PartitionWriter {
    pub fn new(dir: &ArtifactDir) -> Self {
        let props = WriterProperties::builder()
            .set_compression(Compression::SNAPPY)
            .set_key_value_metadata(Some(vec![KeyValue::new(
                VERSION_METADATA_KEY.to_string(),
                HARVESTER_VERSION.to_string(),
            )]))
            .build();
        Self {
            dir: dir.path().to_path_buf(),
            props,
            set: ArtifactSet::default(),
        }
    }

    pub fn write_partition(&mut self, batch: &RecordBatch) -> MappingResult<&PartitionFile> {
        let index = self.set.parts.len();
        let final_path = self.dir.join(format!("part.{}.parquet", index));
        let temp_path = self.dir.join(format!(".part.{}.parquet.tmp", index));

        if let Err(e) = self.write_file(&temp_path, batch) {
            let _ = fs::remove_file(&temp_path);
            return Err(e);
        }
        fs::rename(&temp_path, &final_path).map_err(|e| MappingError::io(&final_path, e))?;

        debug!(
            path = %final_path.display(),
            rows = batch.num_rows(),
            "Wrote parquet partition"
        );
        self.set.total_rows += batch.num_rows() as u64;
        self.set.parts.push(PartitionFile {
            index,
            path: final_path,
            rows: batch.num_rows(),
        });
        Ok(&self.set.parts[index])
    }

    fn write_file(&self, path: &Path, batch: &RecordBatch) -> MappingResult<()> {
        let file = File::create(path).map_err(|e| MappingError::io(path, e))?;
        let mut writer = ArrowWriter::try_new(file, batch.schema(), Some(self.props.clone()))?;
        writer.write(batch)?;
        writer.close()?;
        Ok(())
    }

    pub fn finish(self) -> ArtifactSet {
        self.set
    }
}
