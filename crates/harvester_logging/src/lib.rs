//! Shared logging setup for the harvester binary.

use anyhow::{Context, Result};
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

const DEFAULT_LOG_FILTER: &str =
    "harvester=info,harvester_mapping=info,harvester_protocol=info";
/// Rotated generations kept next to the live file.
const LOG_GENERATIONS: usize = 4;
const MAX_LOG_BYTES: u64 = 10 * 1024 * 1024;

pub struct LogConfig<'a> {
    pub app_name: &'a str,
    pub verbose: bool,
}

/// Initialize tracing with a rolling file writer and stderr output.
///
/// `RUST_LOG` overrides the default filter for both layers. With `verbose`
/// the console also gets `debug` for harvester crates.
pub fn init_logging(config: LogConfig<'_>) -> Result<()> {
    let log_dir = ensure_logs_dir().context("Failed to ensure log directory")?;
    let file_writer = RollingWriter::open(log_dir, config.app_name, LOG_GENERATIONS, MAX_LOG_BYTES)
        .with_context(|| format!("Failed to open log file for {}", config.app_name))?;

    let file_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));

    let console_filter = if config.verbose {
        EnvFilter::new("harvester=debug,harvester_mapping=debug,harvester_protocol=debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER))
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(file_writer)
                .with_ansi(false)
                .with_filter(file_filter),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_filter(console_filter),
        )
        .try_init()
        .context("Failed to install tracing subscriber")?;

    Ok(())
}

/// Harvester home: `$HARVESTER_HOME`, else `~/.harvester`, else `./.harvester`.
pub fn harvester_home() -> PathBuf {
    if let Ok(override_path) = std::env::var("HARVESTER_HOME") {
        return PathBuf::from(override_path);
    }
    dirs::home_dir()
        .map(|home| home.join(".harvester"))
        .unwrap_or_else(|| PathBuf::from(".harvester"))
}

pub fn logs_dir() -> PathBuf {
    harvester_home().join("logs")
}

pub fn ensure_logs_dir() -> Result<PathBuf> {
    let logs = logs_dir();
    fs::create_dir_all(&logs)
        .with_context(|| format!("Failed to create logs directory: {}", logs.display()))?;
    Ok(logs)
}

/// `<name>.log` plus `<name>.log.1` (newest) .. `<name>.log.<generations>`.
struct LogFile {
    dir: PathBuf,
    name: String,
    generations: usize,
    max_bytes: u64,
    file: File,
    written: u64,
}

impl LogFile {
    fn live_path(&self) -> PathBuf {
        self.dir.join(format!("{}.log", self.name))
    }

    fn generation_path(&self, n: usize) -> PathBuf {
        self.dir.join(format!("{}.log.{}", self.name, n))
    }

    fn reopen(&mut self) -> io::Result<()> {
        self.file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.live_path())?;
        self.written = self.file.metadata()?.len();
        Ok(())
    }

    /// Shift every generation up by one; the oldest is overwritten.
    fn roll(&mut self) -> io::Result<()> {
        self.file.flush()?;
        for n in (1..self.generations).rev() {
            let from = self.generation_path(n);
            if from.exists() {
                fs::rename(&from, self.generation_path(n + 1))?;
            }
        }
        if self.generations > 0 {
            fs::rename(self.live_path(), self.generation_path(1))?;
        } else {
            fs::remove_file(self.live_path())?;
        }
        self.reopen()
    }

    fn append(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.written > 0 && self.written + buf.len() as u64 > self.max_bytes {
            self.roll()?;
        }
        let n = self.file.write(buf)?;
        self.written += n as u64;
        Ok(n)
    }
}

/// Size-rotated log file shared by every event the file layer formats.
#[derive(Clone)]
struct RollingWriter(Arc<Mutex<LogFile>>);

impl RollingWriter {
    fn open(dir: PathBuf, name: &str, generations: usize, max_bytes: u64) -> io::Result<Self> {
        fs::create_dir_all(&dir)?;
        let path = dir.join(format!("{}.log", name));
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        let written = file.metadata()?.len();
        let mut log = LogFile {
            dir,
            name: name.to_string(),
            generations,
            max_bytes,
            file,
            written,
        };
        if log.written > log.max_bytes {
            log.roll()?;
        }
        Ok(Self(Arc::new(Mutex::new(log))))
    }

    fn lock(&self) -> MutexGuard<'_, LogFile> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<'a> tracing_subscriber::fmt::MakeWriter<'a> for RollingWriter {
    type Writer = RollingWriter;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}

impl Write for RollingWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.lock().append(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.lock().file.flush()
    }
}
