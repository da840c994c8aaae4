use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::Path;
use std::time::Instant;

use tracing::{debug, warn};

use super::files::ArchiveFiles;
use crate::archive::{ArchiveHeader, ArchiveWriter};
use crate::config::SamplerConfig;
use crate::error::StatsResult;
use crate::registry::MetricsRegistry;
use crate::test_support::{ArchiveWriteContext, archive_write_override};

/// What a sample pass did besides appending the sample.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SampleOutcome {
    pub rolled: bool,
    pub deleted_files: usize,
}

/// The open active archive file and the writer encoding into it.
pub struct ArchiveSession {
    files: ArchiveFiles,
    file: Option<File>,
    writer: ArchiveWriter,
    file_bytes: u64,
    system_directory: String,
    product_description: String,
}

impl ArchiveSession {
    /// Prepares the archive directory, starts a fresh active file and
    /// describes every live instance of `registry` in it.
    pub fn open(registry: &MetricsRegistry, config: &SamplerConfig) -> StatsResult<Self> {
        let mut files = ArchiveFiles::new(
            &config.archive_path,
            registry.process_id(),
            config.file_size_limit_bytes,
            config.disk_space_limit_bytes,
        )?;
        files.prepare()?;
        let file = create_file(files.active_path())?;
        let header = ArchiveHeader::capture(
            registry.process_id(),
            registry.start_time(),
            &config.system_directory,
            &config.product_description,
        );
        let mut session = Self {
            writer: ArchiveWriter::new(&header, Instant::now())?,
            files,
            file: Some(file),
            file_bytes: 0,
            system_directory: config.system_directory.clone(),
            product_description: config.product_description.clone(),
        };
        session.writer.describe_live(registry);
        session.flush()?;
        debug!(path = %session.active_path().display(), "opened statistics archive");
        Ok(session)
    }

    #[inline]
    pub fn active_path(&self) -> &Path {
        self.files.active_path()
    }

    /// Bytes written to the active file so far.
    #[inline]
    pub fn file_bytes(&self) -> u64 {
        self.file_bytes
    }

    #[inline]
    pub fn files(&self) -> &ArchiveFiles {
        &self.files
    }

    /// Writes buffered records to the active file.
    pub fn flush(&mut self) -> StatsResult<()> {
        let bytes = self.writer.take_buffer();
        if bytes.is_empty() {
            return Ok(());
        }
        let path = self.files.active_path();
        let ctx = ArchiveWriteContext {
            path,
            bytes: bytes.len(),
        };
        if let Some(result) = archive_write_override(&ctx) {
            result?;
        } else {
            let file = self
                .file
                .as_mut()
                .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "archive file is closed"))?;
            file.write_all(&bytes)?;
        }
        self.file_bytes += bytes.len() as u64;
        Ok(())
    }

    /// One archive pass: sample, flush, then roll and trim as the limits
    /// require.
    pub fn sample(&mut self, registry: &MetricsRegistry, now: Instant) -> StatsResult<SampleOutcome> {
        self.writer.sample_registry(registry, now)?;
        self.flush()?;

        let mut outcome = SampleOutcome::default();
        let last_sample_size = self.writer.last_sample_size() as u64;
        if self.files.should_roll(self.file_bytes, last_sample_size) {
            self.roll(registry)?;
            outcome.rolled = true;
        }
        outcome.deleted_files = self.files.enforce_disk_limit(self.file_bytes).len();
        Ok(outcome)
    }

    /// Closes the active file under its next roll index and starts a new one
    /// with a fresh header and every live instance redescribed.
    fn roll(&mut self, registry: &MetricsRegistry) -> StatsResult<()> {
        if let Some(file) = self.file.take() {
            if let Err(err) = file.sync_data() {
                warn!(path = %self.active_path().display(), error = %err, "archive sync before roll failed");
            }
        }
        self.files.roll_active(self.file_bytes)?;
        self.file = Some(create_file(self.files.active_path())?);
        self.file_bytes = 0;

        let header = ArchiveHeader::capture(
            registry.process_id(),
            registry.start_time(),
            &self.system_directory,
            &self.product_description,
        );
        self.writer = ArchiveWriter::new(&header, Instant::now())?;
        self.writer.describe_live(registry);
        self.flush()
    }

    /// Takes a last sample, flushes and syncs the file.
    pub fn close(mut self, registry: &MetricsRegistry, now: Instant) -> StatsResult<()> {
        self.writer.sample_registry(registry, now)?;
        self.flush()?;
        if let Some(file) = self.file.take() {
            file.sync_data()?;
        }
        debug!(path = %self.active_path().display(), bytes = self.file_bytes, "closed statistics archive");
        Ok(())
    }
}

fn create_file(path: &Path) -> io::Result<File> {
    OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(path)
}
