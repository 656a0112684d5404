//! Harvest Loop
//!
//! Each cycle refreshes settings once, scans every active monitored path
//! and hands each file to a [`FileNegotiation`]. Negotiations run on a
//! bounded pool: `max_workers` overall, `per_path_concurrency` within one
//! monitored path, and never two at once for the same file.

use harvester_protocol::MonitoredPath;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{Mutex, OwnedSemaphorePermit, RwLock, Semaphore};
use tokio::task::{JoinError, JoinSet};
use tracing::{debug, error, info, warn};

use crate::cancel::CancellationToken;
use crate::client::{FileKey, HttpAuthority, RemoteAuthority, RetryPolicy, Retrying};
use crate::config::HarvesterConfig;
use crate::error::{HarvestError, Result};
use crate::locks::PathLocks;
use crate::machine::{FileNegotiation, NegotiationContext, NegotiationOutcome, NegotiationState};
use crate::parser::ParserRegistry;
use crate::scan::scan_monitored_path;
use crate::settings::{apply_environment, RuntimeSettings, SettingsCache};
use crate::tracker::{FileTracker, HarvestedFile};

/// Summary of one harvest cycle.
#[derive(Debug, Default)]
pub struct CycleReport {
    pub files_seen: usize,
    /// Terminal state counts.
    pub outcomes: BTreeMap<NegotiationState, usize>,
    /// Files skipped because another cycle was negotiating them.
    pub busy: usize,
    pub scan_errors: usize,
    pub settings_refreshed: bool,
    pub cancelled: bool,
    /// Authorization failure that stopped the cycle.
    pub halted: Option<HarvestError>,
}

impl CycleReport {
    pub fn count(&self, state: NegotiationState) -> usize {
        self.outcomes.get(&state).copied().unwrap_or(0)
    }

    pub fn is_halted(&self) -> bool {
        self.halted.is_some()
    }

    pub fn negotiated(&self) -> usize {
        self.outcomes.values().sum()
    }

    pub fn failures(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|(state, _)| state.is_failure())
            .map(|(_, n)| n)
            .sum()
    }
}

/// One monitored path to scan, optionally narrowed to a subtree or file.
type ScanJob = (MonitoredPath, Option<PathBuf>);

pub struct Harvester {
    config: HarvesterConfig,
    ctx: Arc<NegotiationContext>,
    settings: RwLock<Arc<RuntimeSettings>>,
    cache: SettingsCache,
    tracker: Mutex<FileTracker>,
    locks: PathLocks,
    workers: Arc<Semaphore>,
}

impl Harvester {
    pub fn new(
        config: HarvesterConfig,
        authority: Arc<dyn RemoteAuthority>,
        parsers: ParserRegistry,
    ) -> Result<Self> {
        config.validate()?;

        let cache = SettingsCache::new(config.settings_cache_path());
        let initial = match cache.load() {
            Ok(Some(remote)) => {
                info!(
                    path = %cache.path().display(),
                    monitored_paths = remote.monitored_paths.len(),
                    "Loaded cached settings"
                );
                RuntimeSettings::cached(remote)
            }
            Ok(None) => RuntimeSettings::default(),
            Err(e) => {
                warn!(error = %e, "Ignoring unreadable settings cache");
                RuntimeSettings::default()
            }
        };

        let ctx = NegotiationContext {
            authority,
            parsers: Arc::new(parsers),
            artifact_root: config.artifacts_dir(),
            preview_rows: config.preview_rows,
        };

        Ok(Self {
            workers: Arc::new(Semaphore::new(config.max_workers)),
            ctx: Arc::new(ctx),
            settings: RwLock::new(Arc::new(initial)),
            cache,
            tracker: Mutex::new(FileTracker::new()),
            locks: PathLocks::new(),
            config,
        })
    }

    /// Harvester talking to the registry over HTTP with the configured
    /// retry policy and the built-in parsers.
    pub fn connect(config: HarvesterConfig) -> Result<Self> {
        let http = HttpAuthority::new(&config.url, &config.api_key, config.request_timeout())?;
        let authority = Retrying::new(http, RetryPolicy::from_config(&config.retry));
        Self::new(config, Arc::new(authority), ParserRegistry::with_defaults())
    }

    pub fn config(&self) -> &HarvesterConfig {
        &self.config
    }

    pub fn locks(&self) -> &PathLocks {
        &self.locks
    }

    /// Settings in effect for the current cycle.
    pub async fn settings(&self) -> Arc<RuntimeSettings> {
        self.settings.read().await.clone()
    }

    pub async fn tracked(&self, path: &std::path::Path) -> Option<HarvestedFile> {
        self.tracker.lock().await.get(path).cloned()
    }

    /// The single refresh point: fetch, cache, apply environment, swap.
    pub async fn refresh_settings(&self) -> Result<Arc<RuntimeSettings>> {
        let remote = self.ctx.authority.fetch_settings().await?;
        match self.cache.store(&remote) {
            Ok(true) => debug!(path = %self.cache.path().display(), "Settings cache updated"),
            Ok(false) => {}
            Err(e) => warn!(error = %e, "Failed to write settings cache"),
        }
        apply_environment(&remote);

        let fresh = Arc::new(RuntimeSettings::fresh(remote));
        *self.settings.write().await = fresh.clone();
        Ok(fresh)
    }

    /// Refresh settings, fail-soft unless the registry rejects credentials.
    async fn begin_cycle(&self, report: &mut CycleReport) -> Option<Arc<RuntimeSettings>> {
        match self.refresh_settings().await {
            Ok(settings) => {
                report.settings_refreshed = true;
                Some(settings)
            }
            Err(e) if e.is_authorization() => {
                error!(error = %e, "Registry rejected credentials; halting cycle");
                report.halted = Some(e);
                None
            }
            Err(e) => {
                warn!(error = %e, "Settings refresh failed; using last-known monitored paths");
                Some(self.settings().await)
            }
        }
    }

    /// One full cycle over every active monitored path.
    pub async fn run_cycle(&self, cancel: &CancellationToken) -> CycleReport {
        let started = Instant::now();
        let mut report = CycleReport::default();
        let Some(settings) = self.begin_cycle(&mut report).await else {
            return report;
        };

        let jobs = active_jobs(&settings);
        let active_ids: HashSet<String> = jobs.iter().map(|(path, _)| path.id.clone()).collect();
        self.tracker.lock().await.retain_paths(&active_ids);

        self.negotiate(&settings, jobs, cancel, &mut report).await;
        log_cycle(&report, started);
        report
    }

    /// Manual cycle that bypasses the timer. An empty `subset` means every
    /// active monitored path; otherwise each entry must lie inside one.
    pub async fn harvest_now(
        &self,
        subset: &[PathBuf],
        cancel: &CancellationToken,
    ) -> Result<CycleReport> {
        let started = Instant::now();
        let mut report = CycleReport::default();
        let Some(settings) = self.begin_cycle(&mut report).await else {
            return Ok(report);
        };

        let jobs = if subset.is_empty() {
            active_jobs(&settings)
        } else {
            resolve_subset(&settings, subset)?
        };

        self.negotiate(&settings, jobs, cancel, &mut report).await;
        log_cycle(&report, started);
        Ok(report)
    }

    /// Alternate cycles and sleeps until `cancel` fires.
    pub async fn run_forever(&self, cancel: CancellationToken) {
        info!(url = %self.config.url, "Harvester started");
        while !cancel.is_cancelled() {
            let report = self.run_cycle(&cancel).await;
            if report.cancelled || cancel.is_cancelled() {
                break;
            }

            let sleep = self.settings().await.sleep_time(self.config.default_sleep());
            debug!(secs = sleep.as_secs(), "Sleeping until next cycle");
            tokio::select! {
                _ = tokio::time::sleep(sleep) => {}
                _ = cancel.cancelled() => break,
            }
        }
        info!("Harvester stopped");
    }

    async fn negotiate(
        &self,
        settings: &RuntimeSettings,
        jobs: Vec<ScanJob>,
        cancel: &CancellationToken,
        report: &mut CycleReport,
    ) {
        let mut tasks: JoinSet<NegotiationOutcome> = JoinSet::new();
        // One per-path budget per monitored path id for the whole cycle.
        let mut path_budgets: HashMap<String, Arc<Semaphore>> = HashMap::new();

        'paths: for (monitored, within) in jobs {
            if cancel.is_cancelled() {
                report.cancelled = true;
                break;
            }

            let scan = {
                let monitored = monitored.clone();
                let within = within.clone();
                tokio::task::spawn_blocking(move || scan_monitored_path(&monitored, within.as_deref()))
                    .await
            };
            let outcome = match scan {
                Ok(Ok(outcome)) => outcome,
                Ok(Err(e)) => {
                    warn!(monitored_path = %monitored.path, error = %e, "Scan failed");
                    report.scan_errors += 1;
                    if self.report_scan_error(&monitored, &e.to_string(), report).await {
                        break;
                    }
                    continue;
                }
                Err(e) => {
                    error!(monitored_path = %monitored.path, error = %e, "Scan task failed");
                    report.scan_errors += 1;
                    continue;
                }
            };
            if !outcome.errors.is_empty() {
                warn!(
                    monitored_path = %monitored.path,
                    errors = outcome.errors.len(),
                    "Some entries could not be read"
                );
                report.scan_errors += outcome.errors.len();
                let message = outcome.errors.join("; ");
                if self.report_scan_error(&monitored, &message, report).await {
                    break;
                }
            }

            {
                let mut tracker = self.tracker.lock().await;
                for file in &outcome.files {
                    tracker.observe(file);
                }
                if within.is_none() {
                    let seen: HashSet<PathBuf> =
                        outcome.files.iter().map(|f| f.path.clone()).collect();
                    tracker.retain_seen(&monitored.id, &seen);
                }
            }
            report.files_seen += outcome.files.len();

            let per_path = path_budgets
                .entry(monitored.id.clone())
                .or_insert_with(|| Arc::new(Semaphore::new(self.config.per_path_concurrency)))
                .clone();
            let partition_rows =
                settings.partition_line_count(&monitored, self.config.partition_line_count);

            for file in outcome.files {
                if cancel.is_cancelled() {
                    report.cancelled = true;
                    break 'paths;
                }
                while let Some(done) = tasks.try_join_next() {
                    self.absorb(done, report).await;
                }
                if report.is_halted() {
                    break 'paths;
                }

                let Some(guard) = self.locks.try_acquire(&file.path) else {
                    debug!(path = %file.path.display(), "Negotiation already in flight; skipping");
                    report.busy += 1;
                    continue;
                };
                let Some(path_permit) = acquire(&per_path, cancel).await else {
                    report.cancelled = true;
                    break 'paths;
                };
                let Some(worker_permit) = acquire(&self.workers, cancel).await else {
                    report.cancelled = true;
                    break 'paths;
                };

                let negotiation = FileNegotiation::new(self.ctx.clone(), file, partition_rows);
                tasks.spawn(async move {
                    let outcome = negotiation.run().await;
                    drop(worker_permit);
                    drop(path_permit);
                    drop(guard);
                    outcome
                });
            }
        }

        // Started negotiations always run to a terminal state.
        while let Some(done) = tasks.join_next().await {
            self.absorb(done, report).await;
        }
    }

    async fn absorb(
        &self,
        done: std::result::Result<NegotiationOutcome, JoinError>,
        report: &mut CycleReport,
    ) {
        let mut outcome = match done {
            Ok(outcome) => outcome,
            Err(e) => {
                error!(error = %e, "Negotiation task failed");
                return;
            }
        };
        self.tracker.lock().await.record(&outcome.path, outcome.state);
        *report.outcomes.entry(outcome.state).or_default() += 1;

        if outcome.halts_cycle() {
            error!(path = %outcome.path.display(), "Registry rejected credentials; halting cycle");
            if report.halted.is_none() {
                report.halted = outcome.error.take();
            }
        }
    }

    /// Returns true when the cycle must halt.
    async fn report_scan_error(
        &self,
        monitored: &MonitoredPath,
        message: &str,
        report: &mut CycleReport,
    ) -> bool {
        let key = FileKey::new(monitored.path.clone(), monitored.id.clone());
        match self.ctx.authority.report_error(&key, message).await {
            Ok(()) => false,
            Err(e) if e.is_unauthorized() => {
                error!(error = %e, "Registry rejected credentials; halting cycle");
                report.halted = Some(e.into());
                true
            }
            Err(e) => {
                warn!(monitored_path = %monitored.path, error = %e, "Failed to report scan error");
                false
            }
        }
    }
}

async fn acquire(semaphore: &Arc<Semaphore>, cancel: &CancellationToken) -> Option<OwnedSemaphorePermit> {
    tokio::select! {
        permit = semaphore.clone().acquire_owned() => permit.ok(),
        _ = cancel.cancelled() => None,
    }
}

fn active_jobs(settings: &RuntimeSettings) -> Vec<ScanJob> {
    settings
        .monitored_paths()
        .iter()
        .filter(|path| {
            if !path.active {
                info!(monitored_path = %path.path, "Skipping inactive monitored path");
            }
            path.active
        })
        .map(|path| (path.clone(), None))
        .collect()
}

/// Map each requested path to the deepest active monitored root holding it.
fn resolve_subset(settings: &RuntimeSettings, subset: &[PathBuf]) -> Result<Vec<ScanJob>> {
    subset
        .iter()
        .map(|requested| {
            settings
                .active_paths()
                .filter(|monitored| requested.starts_with(&monitored.path))
                .max_by_key(|monitored| monitored.path.len())
                .map(|monitored| (monitored.clone(), Some(requested.clone())))
                .ok_or_else(|| HarvestError::PathNotMonitored(requested.clone()))
        })
        .collect()
}

fn log_cycle(report: &CycleReport, started: Instant) {
    info!(
        files = report.files_seen,
        negotiated = report.negotiated(),
        uploaded = report.count(NegotiationState::CleanedUp) + report.count(NegotiationState::Uploaded),
        skipped = report.count(NegotiationState::Skipped),
        deferred = report.count(NegotiationState::AwaitingDecision),
        failed = report.failures(),
        busy = report.busy,
        scan_errors = report.scan_errors,
        halted = report.is_halted(),
        elapsed_ms = started.elapsed().as_millis() as u64,
        "Harvest cycle finished"
    );
}
