use std::collections::HashMap;
use std::error::Error as StdError;
use std::fs;
use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::config::CronConfig;
use crate::error::{JobError, Result};

/// Shared record of when each periodic job was last claimed.
///
/// Replicas call [`ClaimStore::try_claim`] before doing a cycle of work; a
/// lost claim means another replica already ran the job within the interval.
pub trait ClaimStore: Send + Sync {
    /// Claim `job_name` at `now` unless someone else claimed it less than
    /// `min_interval` ago. A successful claim advances the stored timestamp
    /// to `now` atomically with the check.
    fn try_claim(&self, job_name: &str, min_interval: Duration, now: DateTime<Utc>) -> bool;
}

/// A [`ClaimStore`] for runners sharing one process.
#[derive(Debug, Default)]
pub struct InMemoryClaimStore {
    claims: Mutex<HashMap<String, DateTime<Utc>>>,
}

impl InMemoryClaimStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// When `job_name` was last claimed.
    #[must_use]
    pub fn last_claimed(&self, job_name: &str) -> Option<DateTime<Utc>> {
        self.claims
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(job_name)
            .copied()
    }
}

impl ClaimStore for InMemoryClaimStore {
    fn try_claim(&self, job_name: &str, min_interval: Duration, now: DateTime<Utc>) -> bool {
        let mut claims = self.claims.lock().unwrap_or_else(PoisonError::into_inner);
        if claims
            .get(job_name)
            .is_some_and(|last| claimed_within(*last, min_interval, now))
        {
            return false;
        }
        claims.insert(job_name.to_string(), now);
        true
    }
}

fn claimed_within(last: DateTime<Utc>, min_interval: Duration, now: DateTime<Utc>) -> bool {
    let threshold = TimeDelta::from_std(min_interval)
        .ok()
        .and_then(|interval| now.checked_sub_signed(interval))
        .unwrap_or(DateTime::<Utc>::MIN_UTC);
    last > threshold
}

const CLAIM_EXTENSION: &str = "claim";
const LOCK_EXTENSION: &str = "lock";
const STALE_LOCK_AGE: Duration = Duration::from_secs(30);

/// The persisted `(job_name, last_claimed_at)` row of one job.
#[derive(Debug, Serialize, Deserialize)]
struct ClaimRow {
    job_name: String,
    last_claimed_at: DateTime<Utc>,
}

/// A [`ClaimStore`] shared by every process that can reach `dir`.
///
/// Each job has a `<job>.claim` file holding its last claim. A claim is
/// checked and advanced while holding `<job>.lock`, created exclusively, so
/// two processes never both win the same interval. A runner that finds the
/// lock taken loses the claim. A lock older than thirty seconds is treated as
/// left over from a crashed runner and removed.
#[derive(Debug, Clone)]
pub struct FileClaimStore {
    dir: PathBuf,
}

impl FileClaimStore {
    /// Open a claim directory, creating it if needed.
    ///
    /// # Errors
    ///
    /// Returns [`JobError::ClaimStore`] if the directory cannot be created.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir).map_err(|source| JobError::ClaimStore {
            path: dir.clone(),
            source,
        })?;
        Ok(Self { dir })
    }

    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// When `job_name` was last claimed, if its claim file can be read.
    #[must_use]
    pub fn last_claimed(&self, job_name: &str) -> Option<DateTime<Utc>> {
        self.read_row(job_name)
            .ok()
            .flatten()
            .map(|row| row.last_claimed_at)
    }

    fn file(&self, job_name: &str, extension: &str) -> PathBuf {
        self.dir.join(format!("{job_name}.{extension}"))
    }

    fn read_row(&self, job_name: &str) -> io::Result<Option<ClaimRow>> {
        let content = match fs::read_to_string(self.file(job_name, CLAIM_EXTENSION)) {
            Ok(content) => content,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err),
        };
        serde_json::from_str(&content)
            .map(Some)
            .map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err))
    }

    fn write_row(&self, row: &ClaimRow) -> io::Result<()> {
        let path = self.file(&row.job_name, CLAIM_EXTENSION);
        let temp = self.file(&row.job_name, "claim.tmp");
        let content = serde_json::to_string(row)
            .map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err))?;
        fs::write(&temp, content)?;
        fs::rename(&temp, &path)
    }

    fn lock(&self, job_name: &str) -> io::Result<Option<ClaimLock>> {
        let path = self.file(job_name, LOCK_EXTENSION);
        for _ in 0..2 {
            match fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&path)
            {
                Ok(_) => return Ok(Some(ClaimLock { path })),
                Err(err) if err.kind() == io::ErrorKind::AlreadyExists => {
                    if !is_stale(&path) {
                        return Ok(None);
                    }
                    warn!(path = %path.display(), "removing stale claim lock");
                    match fs::remove_file(&path) {
                        Ok(()) => {}
                        Err(err) if err.kind() == io::ErrorKind::NotFound => {}
                        Err(err) => return Err(err),
                    }
                }
                Err(err) => return Err(err),
            }
        }
        Ok(None)
    }

    fn claim_locked(
        &self,
        job_name: &str,
        min_interval: Duration,
        now: DateTime<Utc>,
    ) -> io::Result<bool> {
        let Some(_lock) = self.lock(job_name)? else {
            debug!(job = job_name, "claim lock held by another runner");
            return Ok(false);
        };
        if self
            .read_row(job_name)?
            .is_some_and(|row| claimed_within(row.last_claimed_at, min_interval, now))
        {
            return Ok(false);
        }
        self.write_row(&ClaimRow {
            job_name: job_name.to_string(),
            last_claimed_at: now,
        })?;
        Ok(true)
    }
}

fn is_stale(lock: &Path) -> bool {
    fs::metadata(lock)
        .and_then(|metadata| metadata.modified())
        .ok()
        .and_then(|modified| modified.elapsed().ok())
        .is_some_and(|age| age > STALE_LOCK_AGE)
}

fn is_valid_job_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_'))
}

/// Removes the lock file when the claim attempt ends.
struct ClaimLock {
    path: PathBuf,
}

impl Drop for ClaimLock {
    fn drop(&mut self) {
        if let Err(err) = fs::remove_file(&self.path) {
            error!(path = %self.path.display(), error = %err, "failed to release claim lock");
        }
    }
}

impl ClaimStore for FileClaimStore {
    fn try_claim(&self, job_name: &str, min_interval: Duration, now: DateTime<Utc>) -> bool {
        if !is_valid_job_name(job_name) {
            error!(job = job_name, "job name cannot be used as a claim file name");
            return false;
        }
        match self.claim_locked(job_name, min_interval, now) {
            Ok(claimed) => claimed,
            Err(err) => {
                error!(job = job_name, dir = %self.dir.display(), error = %err, "claim failed");
                false
            }
        }
    }
}

/// Error returned by the work of a periodic job.
pub type TaskError = Box<dyn StdError + Send + Sync + 'static>;

type Task = Arc<dyn Fn() -> std::result::Result<(), TaskError> + Send + Sync>;

/// What a single [`PeriodicJob::run_cycle`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    /// The job is disabled.
    Disabled,
    /// Another runner holds the claim for this interval.
    Skipped,
    Completed,
    /// The work returned an error, which was logged.
    Failed,
    /// The work panicked; the panic was caught and logged.
    Panicked,
}

/// Named maintenance work that runs on at most one runner per interval.
#[derive(Clone)]
pub struct PeriodicJob {
    name: String,
    config: CronConfig,
    claims: Arc<dyn ClaimStore>,
    task: Task,
}

impl PeriodicJob {
    pub fn new<F>(
        name: impl Into<String>,
        config: CronConfig,
        claims: Arc<dyn ClaimStore>,
        task: F,
    ) -> Self
    where
        F: Fn() -> std::result::Result<(), TaskError> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            config,
            claims,
            task: Arc::new(task),
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn config(&self) -> &CronConfig {
        &self.config
    }

    /// Claim the job and, if the claim succeeds, do one cycle of work.
    ///
    /// Neither an error nor a panic in the work escapes this call.
    pub fn run_cycle(&self) -> CycleOutcome {
        if !self.config.enabled() {
            return CycleOutcome::Disabled;
        }
        if !self
            .claims
            .try_claim(&self.name, self.config.claim_interval(), Utc::now())
        {
            debug!(job = %self.name, "claim held elsewhere, skipping cycle");
            return CycleOutcome::Skipped;
        }

        debug!(job = %self.name, "running periodic job");
        match panic::catch_unwind(AssertUnwindSafe(|| (self.task)())) {
            Ok(Ok(())) => CycleOutcome::Completed,
            Ok(Err(err)) => {
                error!(job = %self.name, error = %err, "periodic job failed");
                CycleOutcome::Failed
            }
            Err(_) => {
                error!(job = %self.name, "periodic job panicked");
                CycleOutcome::Panicked
            }
        }
    }

    /// Run cycles on a dedicated thread until the handle is stopped.
    ///
    /// The first cycle runs after the configured startup wait, later ones
    /// once per polling interval. A disabled job starts no thread.
    ///
    /// # Errors
    ///
    /// Returns [`JobError::Spawn`] if the thread cannot be started.
    pub fn spawn(self) -> Result<PeriodicHandle> {
        let (stop, stopped) = mpsc::channel::<()>();
        if !self.config.enabled() {
            info!(job = %self.name, "periodic job disabled");
            return Ok(PeriodicHandle { stop, thread: None });
        }

        let thread = thread::Builder::new()
            .name(format!("cron-{}", self.name))
            .spawn(move || {
                info!(job = %self.name, "periodic job started");
                let mut wait = self.config.startup_wait();
                loop {
                    match stopped.recv_timeout(wait) {
                        Err(RecvTimeoutError::Timeout) => {
                            self.run_cycle();
                        }
                        Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                    }
                    wait = self.config.polling_interval();
                }
                info!(job = %self.name, "periodic job stopped");
            })
            .map_err(JobError::Spawn)?;
        Ok(PeriodicHandle {
            stop,
            thread: Some(thread),
        })
    }
}

/// Handle to a running [`PeriodicJob`].
pub struct PeriodicHandle {
    stop: Sender<()>,
    thread: Option<JoinHandle<()>>,
}

impl PeriodicHandle {
    /// Stop the job and wait for a running cycle to finish.
    pub fn stop(self) {
        let _ = self.stop.send(());
        if let Some(thread) = self.thread {
            if thread.join().is_err() {
                error!("periodic job thread panicked");
            }
        }
    }
}
