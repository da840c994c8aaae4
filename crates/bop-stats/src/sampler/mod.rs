//! Background sampler that archives a registry on a fixed period.
//!
//! [`Sampler::start`] opens the archive synchronously so configuration and
//! file-system problems surface to the caller, then spawns one named thread.
//! Each period the thread:
//!
//! 1. publishes a [`ClientHealthStats`] snapshot when a publisher is set
//! 2. writes one sample under the session lock and flushes it
//! 3. rolls the active file and trims rolled files as the limits require
//!
//! A failed pass drops the session, waits out a backoff and reopens. After
//! `max_consecutive_failures` failures in a row the thread exits with
//! [`SamplerState::Failed`]; threads updating metrics never notice.

mod files;
mod health;
mod session;
mod stats;

use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam::channel::{self, RecvTimeoutError, Sender};
use parking_lot::{Mutex, RwLock};
use tracing::{debug, error, info, warn};

pub use files::{ARCHIVE_EXTENSION, ArchiveFiles, RolledFile};
pub use health::{CACHE_PERF_SCHEMA_NAME, ClientHealthStats, HealthPublisher};
pub use session::{ArchiveSession, SampleOutcome};
pub use stats::{SAMPLER_SCHEMA_NAME, SamplerStats, SamplerStatsSnapshot};

use crate::config::SamplerConfig;
use crate::error::{StatsError, StatsResult};
use crate::registry::{MetricsRegistry, now_millis};

pub const SAMPLER_THREAD_NAME: &str = "bop-stats-sampler";

const RETRY_BASE_DELAY_MS: u64 = 5;

/// Lifecycle of a [`Sampler`].
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SamplerState {
    Stopped = 0,
    Running = 1,
    /// Waiting to reopen the archive after a failed pass.
    Backoff = 2,
    StopRequested = 3,
    /// Gave up after too many consecutive failures.
    Failed = 4,
}

impl SamplerState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => SamplerState::Running,
            2 => SamplerState::Backoff,
            3 => SamplerState::StopRequested,
            4 => SamplerState::Failed,
            _ => SamplerState::Stopped,
        }
    }
}

impl fmt::Display for SamplerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SamplerState::Stopped => "stopped",
            SamplerState::Running => "running",
            SamplerState::Backoff => "backoff",
            SamplerState::StopRequested => "stop-requested",
            SamplerState::Failed => "failed",
        };
        f.write_str(name)
    }
}

struct Worker {
    stop_tx: Sender<()>,
    handle: JoinHandle<()>,
}

struct Shared {
    registry: Arc<MetricsRegistry>,
    config: SamplerConfig,
    session: Mutex<Option<ArchiveSession>>,
    state: AtomicU8,
    stats: SamplerStats,
    health: RwLock<Option<Arc<dyn HealthPublisher>>>,
    health_disabled: AtomicBool,
    attached: AtomicBool,
    last_failure_retryable: AtomicBool,
}

impl Shared {
    #[inline]
    fn state(&self) -> SamplerState {
        SamplerState::from_u8(self.state.load(Ordering::Acquire))
    }

    #[inline]
    fn set_state(&self, state: SamplerState) {
        self.state.store(state as u8, Ordering::Release);
    }

    /// Registers this sampler as an archiver of the registry, once.
    fn attach(&self) {
        if !self.attached.swap(true, Ordering::AcqRel) {
            self.registry.begin_archiving();
        }
    }

    fn detach(&self) {
        if self.attached.swap(false, Ordering::AcqRel) {
            self.registry.end_archiving();
        }
    }

    fn publish_health(&self) {
        if !self.config.publish_health || self.health_disabled.load(Ordering::Acquire) {
            return;
        }
        let Some(publisher) = self.health.read().clone() else {
            return;
        };
        let snapshot = ClientHealthStats::collect(&self.registry);
        if let Err(err) = publisher.publish(&snapshot) {
            self.health_disabled.store(true, Ordering::Release);
            warn!(error = %err, "health publish failed; publishing disabled");
        }
    }

    /// One archive pass. A failed pass drops the session so the next
    /// recovery starts from a fresh file.
    fn sample_once(&self) -> StatsResult<SampleOutcome> {
        self.publish_health();
        let mut guard = self.session.lock();
        let session = guard
            .as_mut()
            .ok_or_else(|| StatsError::InvalidState("statistics archive is not open".into()))?;
        let started = Instant::now();
        match session.sample(&self.registry, started) {
            Ok(outcome) => {
                self.stats.record_sample(started.elapsed())?;
                if outcome.rolled {
                    self.stats.record_rolled()?;
                }
                if outcome.deleted_files > 0 {
                    self.stats.record_deleted(outcome.deleted_files)?;
                }
                Ok(outcome)
            }
            Err(err) => {
                *guard = None;
                Err(err)
            }
        }
    }

    fn reopen(&self) -> StatsResult<()> {
        let session = ArchiveSession::open(&self.registry, &self.config)?;
        *self.session.lock() = Some(session);
        Ok(())
    }

    fn close_session(&self) -> StatsResult<()> {
        let Some(session) = self.session.lock().take() else {
            return Ok(());
        };
        session.close(&self.registry, Instant::now())
    }

    /// Records a failure and reports whether the sampler must give up.
    fn note_failure(&self, failures: u32, err: &StatsError) -> bool {
        if let Err(stats_err) = self.stats.record_failure() {
            debug!(error = %stats_err, "failed to count sampler failure");
        }
        let retryable = matches!(err, StatsError::Io(io_err) if is_retryable_io_error(io_err));
        self.last_failure_retryable.store(retryable, Ordering::Release);
        error!(
            error = %err,
            failures,
            max_failures = self.config.max_consecutive_failures,
            retryable,
            "statistics sample failed"
        );
        if failures >= self.config.max_consecutive_failures {
            self.detach();
            self.set_state(SamplerState::Failed);
            error!(failures, "statistics sampler giving up");
            return true;
        }
        false
    }
}

enum Step {
    Sample,
    Recover,
}

fn run(shared: Arc<Shared>, stop_rx: channel::Receiver<()>) {
    let interval = shared.config.sample_interval();
    let mut failures: u32 = 0;
    let mut step = Step::Sample;
    loop {
        match step {
            Step::Sample => {
                match stop_rx.recv_timeout(interval) {
                    Err(RecvTimeoutError::Timeout) => {}
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                }
                match shared.sample_once() {
                    Ok(_) => failures = 0,
                    Err(err) => {
                        failures = failures.saturating_add(1);
                        if shared.note_failure(failures, &err) {
                            return;
                        }
                        step = Step::Recover;
                    }
                }
            }
            Step::Recover => {
                shared.set_state(SamplerState::Backoff);
                let delay = recovery_delay(
                    shared.config.retry_backoff(),
                    failures,
                    shared.last_failure_retryable.load(Ordering::Acquire),
                );
                match stop_rx.recv_timeout(delay) {
                    Err(RecvTimeoutError::Timeout) => {}
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                }
                match shared.reopen() {
                    Ok(()) => {
                        info!(failures, "statistics archive reopened");
                        shared.set_state(SamplerState::Running);
                        step = Step::Sample;
                    }
                    Err(err) => {
                        failures = failures.saturating_add(1);
                        if shared.note_failure(failures, &err) {
                            return;
                        }
                    }
                }
            }
        }
    }
    debug!("statistics sampler thread exiting");
}

/// Archives every instance of a [`MetricsRegistry`] on a background thread.
pub struct Sampler {
    shared: Arc<Shared>,
    archive_path: PathBuf,
    worker: Mutex<Option<Worker>>,
}

impl Sampler {
    /// Registers the sampler's own statistics and validates the archive
    /// path. Nothing is written until [`start`](Self::start).
    pub fn new(registry: Arc<MetricsRegistry>, config: SamplerConfig) -> StatsResult<Self> {
        let config = config.normalized();
        let files = ArchiveFiles::new(
            &config.archive_path,
            registry.process_id(),
            config.file_size_limit_bytes,
            config.disk_space_limit_bytes,
        )?;
        let stats = SamplerStats::register(&registry)?;
        Ok(Self {
            archive_path: files.active_path().to_path_buf(),
            shared: Arc::new(Shared {
                registry,
                config,
                session: Mutex::new(None),
                state: AtomicU8::new(SamplerState::Stopped as u8),
                stats,
                health: RwLock::new(None),
                health_disabled: AtomicBool::new(false),
                attached: AtomicBool::new(false),
                last_failure_retryable: AtomicBool::new(false),
            }),
            worker: Mutex::new(None),
        })
    }

    pub fn with_health_publisher(self, publisher: Arc<dyn HealthPublisher>) -> Self {
        *self.shared.health.write() = Some(publisher);
        self
    }

    /// Opens the archive and spawns the sampling thread. Calling it on a
    /// running sampler does nothing; a failed sampler is restarted.
    pub fn start(&self) -> StatsResult<()> {
        let mut worker = self.worker.lock();
        if let Some(existing) = worker.as_ref() {
            if !existing.handle.is_finished() {
                return Ok(());
            }
        }
        if let Some(finished) = worker.take() {
            if finished.handle.join().is_err() {
                warn!("previous statistics sampler thread panicked");
            }
        }
        if !self.shared.config.enabled {
            debug!("statistics sampling disabled");
            return Ok(());
        }

        // Attach before describing live instances so none created in between
        // is missed.
        self.shared.attach();
        if let Err(err) = self.shared.reopen() {
            self.shared.detach();
            return Err(err);
        }
        self.shared.set_state(SamplerState::Running);
        let (stop_tx, stop_rx) = channel::bounded(1);
        let shared = Arc::clone(&self.shared);
        let handle = thread::Builder::new()
            .name(SAMPLER_THREAD_NAME.to_string())
            .spawn(move || run(shared, stop_rx))
            .map_err(|err| {
                self.shared.set_state(SamplerState::Stopped);
                self.shared.detach();
                StatsError::internal(format!("failed to spawn sampler thread: {err}"))
            })?;
        info!(
            path = %self.archive_path.display(),
            interval_ms = self.shared.config.sample_interval_ms,
            "statistics sampler started"
        );
        *worker = Some(Worker { stop_tx, handle });
        Ok(())
    }

    /// Stops the thread, then takes a final sample and closes the archive.
    ///
    /// A sampler that gave up keeps reporting [`SamplerState::Failed`].
    pub fn stop(&self) -> StatsResult<()> {
        let Some(worker) = self.worker.lock().take() else {
            return Ok(());
        };
        let failed = self.shared.state() == SamplerState::Failed;
        if !failed {
            self.shared.set_state(SamplerState::StopRequested);
        }
        let _ = worker.stop_tx.try_send(());
        drop(worker.stop_tx);
        if worker.handle.join().is_err() {
            warn!("statistics sampler thread panicked");
        }
        let result = self.shared.close_session();
        if let Err(err) = &result {
            warn!(error = %err, "final statistics sample failed");
        }
        self.shared.detach();
        if !failed {
            self.shared.set_state(SamplerState::Stopped);
        }
        info!(path = %self.archive_path.display(), "statistics sampler stopped");
        result
    }

    /// Takes a sample now, outside the period. Requires an open archive.
    pub fn force_sample(&self) -> StatsResult<SampleOutcome> {
        self.shared.sample_once()
    }

    pub fn state(&self) -> SamplerState {
        self.shared.state()
    }

    /// The active archive file, `<dir>/<stem>-<pid>.gfs`.
    pub fn archive_path(&self) -> &Path {
        &self.archive_path
    }

    pub fn registry(&self) -> &Arc<MetricsRegistry> {
        &self.shared.registry
    }

    pub fn config(&self) -> &SamplerConfig {
        &self.shared.config
    }

    pub fn stats_snapshot(&self) -> SamplerStatsSnapshot {
        self.shared.stats.snapshot()
    }

    /// Whether health publishing is still active.
    pub fn health_publishing(&self) -> bool {
        self.shared.health.read().is_some() && !self.shared.health_disabled.load(Ordering::Acquire)
    }
}

impl Drop for Sampler {
    fn drop(&mut self) {
        if let Err(err) = self.stop() {
            debug!(error = %err, "sampler stop during drop failed");
        }
        self.shared.stats.close();
    }
}

impl fmt::Debug for Sampler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Sampler")
            .field("archive_path", &self.archive_path)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

/// Backoff before reopening: doubles with each consecutive failure from a
/// small base, jittered, capped at `max`.
fn retry_backoff_delay(max: Duration, failures: u32) -> Duration {
    let max_ms = max.as_millis() as u64;
    if failures <= 1 {
        return Duration::from_millis(RETRY_BASE_DELAY_MS.min(max_ms));
    }
    let shift = failures.saturating_sub(1).min(16);
    let base = RETRY_BASE_DELAY_MS.saturating_mul(1u64 << shift);
    let jitter_seed = (now_millis() as u64) & 0x3f;
    let jitter = jitter_seed.min(base.max(1));
    Duration::from_millis(base.saturating_add(jitter).min(max_ms))
}

/// Wait before reopening. Transient I/O errors retry on the short doubling
/// schedule; anything else waits the full configured backoff.
fn recovery_delay(max: Duration, failures: u32, retryable: bool) -> Duration {
    if retryable {
        retry_backoff_delay(max, failures)
    } else {
        max
    }
}

/// Transient I/O errors worth a quick reopen.
fn is_retryable_io_error(err: &io::Error) -> bool {
    match err.kind() {
        io::ErrorKind::Interrupted | io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut => {
            return true;
        }
        _ => {}
    }
    if let Some(code) = err.raw_os_error() {
        if matches!(
            code,
            libc::EINTR | libc::EAGAIN | libc::EBUSY | libc::ETIMEDOUT
        ) {
            return true;
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;

    #[test]
    fn backoff_grows_and_respects_cap() {
        let cap = Duration::from_millis(1000);
        assert_eq!(retry_backoff_delay(cap, 1), Duration::from_millis(5));
        let third = retry_backoff_delay(cap, 3);
        assert!(third >= Duration::from_millis(20) && third <= Duration::from_millis(40));
        assert_eq!(retry_backoff_delay(cap, 30), cap);
        assert_eq!(retry_backoff_delay(Duration::ZERO, 2), Duration::ZERO);
    }

    #[test]
    fn only_transient_errors_take_the_short_backoff() {
        let cap = Duration::from_millis(1000);
        assert_eq!(recovery_delay(cap, 1, true), Duration::from_millis(5));
        assert_eq!(recovery_delay(cap, 1, false), cap);
        assert_eq!(recovery_delay(cap, 30, true), cap);
    }

    #[test]
    fn retryable_io_errors() {
        assert!(is_retryable_io_error(&io::Error::from(io::ErrorKind::Interrupted)));
        assert!(is_retryable_io_error(&io::Error::from_raw_os_error(libc::EAGAIN)));
        assert!(!is_retryable_io_error(&io::Error::from(io::ErrorKind::PermissionDenied)));
    }

    #[test]
    fn state_round_trips_through_u8() {
        for state in [
            SamplerState::Stopped,
            SamplerState::Running,
            SamplerState::Backoff,
            SamplerState::StopRequested,
            SamplerState::Failed,
        ] {
            assert_eq!(SamplerState::from_u8(state as u8), state);
        }
        assert_eq!(SamplerState::Backoff.to_string(), "backoff");
    }

    #[test]
    fn start_is_idempotent_and_stop_closes() {
        let dir = TempDir::new().unwrap();
        let registry = Arc::new(MetricsRegistry::new("sampler-unit"));
        let config = SamplerConfig {
            archive_path: dir.path().join("unit.gfs"),
            sample_interval_ms: 60_000,
            ..SamplerConfig::default()
        };
        let sampler = Sampler::new(Arc::clone(&registry), config).unwrap();
        assert_eq!(sampler.state(), SamplerState::Stopped);
        assert!(sampler.force_sample().is_err());

        sampler.start().unwrap();
        sampler.start().unwrap();
        assert_eq!(sampler.state(), SamplerState::Running);
        assert!(sampler.archive_path().exists());

        sampler.force_sample().unwrap();
        assert_eq!(sampler.stats_snapshot().sample_count, 1);

        assert!(registry.is_archiving());

        sampler.stop().unwrap();
        assert_eq!(sampler.state(), SamplerState::Stopped);
        assert!(!registry.is_archiving());
        sampler.stop().unwrap();
    }

    #[test]
    fn disabled_sampler_never_opens() {
        let dir = TempDir::new().unwrap();
        let registry = Arc::new(MetricsRegistry::new("sampler-disabled"));
        let config = SamplerConfig {
            enabled: false,
            archive_path: dir.path().join("off.gfs"),
            ..SamplerConfig::default()
        };
        let sampler = Sampler::new(registry, config).unwrap();
        sampler.start().unwrap();
        assert_eq!(sampler.state(), SamplerState::Stopped);
        assert!(!sampler.archive_path().exists());
    }
}
