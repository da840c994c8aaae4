use serde::{Deserialize, Serialize};
use std::fmt::{self, Display};
use std::path::PathBuf;
use std::time::Duration;

/// Largest single archive file before it is rolled (1 GiB).
pub const FILE_SIZE_LIMIT_MAX: u64 = 1024 * 1024 * 1024;

/// Default archive location, relative to the working directory.
const DEFAULT_ARCHIVE_PATH: &str = "./statArchive.gfs";

/// Default sampling period (milliseconds).
const DEFAULT_SAMPLE_INTERVAL_MS: u64 = 1000;

/// Default pause before reopening the archive after a failed sample (milliseconds).
const DEFAULT_RETRY_BACKOFF_MS: u64 = 1000;

/// Default number of consecutive failed samples before the sampler gives up.
const DEFAULT_MAX_CONSECUTIVE_FAILURES: u32 = 5;

const DEFAULT_PRODUCT_DESCRIPTION: &str = concat!("bop-stats ", env!("CARGO_PKG_VERSION"));

/// Configuration of the statistics sampler and its archive.
///
/// Size limits of zero mean "unlimited". Call [`SamplerConfig::normalized`]
/// after loading from an external source; the sampler normalizes again on
/// construction.
///
/// # Example
///
/// ```rust
/// use bop_stats::SamplerConfig;
///
/// let config = SamplerConfig {
///     archive_path: "/var/log/client/stats.gfs".into(),
///     file_size_limit_bytes: 8 * 1024 * 1024,
///     disk_space_limit_bytes: 64 * 1024 * 1024,
///     ..SamplerConfig::default()
/// }
/// .normalized();
/// assert_eq!(config.sample_interval_ms, 1000);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SamplerConfig {
    /// Whether the manager starts a sampler at all.
    pub enabled: bool,

    /// Requested archive path. The file actually written is
    /// `<dir>/<stem>-<pid>.gfs`.
    pub archive_path: PathBuf,

    /// Time between samples (milliseconds).
    pub sample_interval_ms: u64,

    /// Size at which the active file is rolled (bytes). 0 means unlimited,
    /// which is still capped at [`FILE_SIZE_LIMIT_MAX`].
    pub file_size_limit_bytes: u64,

    /// Budget for the active file plus every rolled file (bytes). 0 means
    /// unlimited.
    pub disk_space_limit_bytes: u64,

    /// Interruptible pause before reopening after a failure (milliseconds).
    pub retry_backoff_ms: u64,

    /// Consecutive failures after which the sampler thread stops.
    pub max_consecutive_failures: u32,

    /// Written into every archive header.
    pub product_description: String,

    /// Written into every archive header.
    pub system_directory: String,

    /// Publish client health counters before each sample.
    pub publish_health: bool,
}

impl Default for SamplerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            archive_path: PathBuf::from(DEFAULT_ARCHIVE_PATH),
            sample_interval_ms: DEFAULT_SAMPLE_INTERVAL_MS,
            file_size_limit_bytes: 0,
            disk_space_limit_bytes: 0,
            retry_backoff_ms: DEFAULT_RETRY_BACKOFF_MS,
            max_consecutive_failures: DEFAULT_MAX_CONSECUTIVE_FAILURES,
            product_description: DEFAULT_PRODUCT_DESCRIPTION.to_string(),
            system_directory: String::new(),
            publish_health: true,
        }
    }
}

impl SamplerConfig {
    /// Returns a copy with limits reconciled and zero values replaced.
    ///
    /// - an empty archive path or zero interval falls back to the default
    /// - the file limit is capped at [`FILE_SIZE_LIMIT_MAX`], and when a disk
    ///   limit is set it never exceeds that limit
    /// - `max_consecutive_failures` is at least 1
    pub fn normalized(mut self) -> Self {
        if self.archive_path.as_os_str().is_empty() {
            self.archive_path = PathBuf::from(DEFAULT_ARCHIVE_PATH);
        }
        if self.sample_interval_ms == 0 {
            self.sample_interval_ms = DEFAULT_SAMPLE_INTERVAL_MS;
        }
        if self.file_size_limit_bytes == 0 || self.file_size_limit_bytes > FILE_SIZE_LIMIT_MAX {
            self.file_size_limit_bytes = FILE_SIZE_LIMIT_MAX;
        }
        if self.disk_space_limit_bytes > 0 && self.file_size_limit_bytes > self.disk_space_limit_bytes
        {
            self.file_size_limit_bytes = self.disk_space_limit_bytes;
        }
        if self.max_consecutive_failures == 0 {
            self.max_consecutive_failures = 1;
        }
        self
    }

    #[inline]
    pub fn sample_interval(&self) -> Duration {
        Duration::from_millis(self.sample_interval_ms)
    }

    #[inline]
    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }
}

impl Display for SamplerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "SamplerConfig(enabled={}, archive_path={:?}, sample_interval_ms={}, file_size_limit_bytes={}, disk_space_limit_bytes={}, retry_backoff_ms={}, max_consecutive_failures={}, publish_health={})",
            self.enabled,
            self.archive_path,
            self.sample_interval_ms,
            self.file_size_limit_bytes,
            self.disk_space_limit_bytes,
            self.retry_backoff_ms,
            self.max_consecutive_failures,
            self.publish_health
        )
    }
}
