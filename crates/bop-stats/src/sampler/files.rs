//! Archive file naming, rolling and disk-space accounting.
//!
//! For a configured path `<dir>/<stem>.<ext>` and process id `pid`:
//!
//! - the active file is `<dir>/<stem>-<pid>.gfs`
//! - rolled files are `<dir>/<stem>-<pid>-<n>.gfs` with `n` starting at 1
//!
//! Roll indices only grow; a name already taken on disk is skipped.

use std::collections::VecDeque;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use crate::error::{StatsError, StatsResult};

pub const ARCHIVE_EXTENSION: &str = "gfs";

/// A closed archive file kept for the disk-space budget.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RolledFile {
    pub index: u32,
    pub path: PathBuf,
    pub bytes: u64,
}

#[derive(Debug)]
pub struct ArchiveFiles {
    dir: PathBuf,
    base: String,
    active: PathBuf,
    rolled: VecDeque<RolledFile>,
    next_index: u32,
    file_size_limit: u64,
    disk_space_limit: u64,
}

impl ArchiveFiles {
    /// Derives file names from `archive_path`. Does not touch the disk.
    pub fn new(
        archive_path: &Path,
        process_id: i64,
        file_size_limit: u64,
        disk_space_limit: u64,
    ) -> StatsResult<Self> {
        let stem = archive_path
            .file_stem()
            .and_then(|s| s.to_str())
            .filter(|s| !s.is_empty())
            .ok_or_else(|| {
                StatsError::invalid_config(format!(
                    "archive path {} has no usable file name",
                    archive_path.display()
                ))
            })?;
        let dir = match archive_path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        let base = format!("{stem}-{process_id}");
        let active = dir.join(format!("{base}.{ARCHIVE_EXTENSION}"));
        Ok(Self {
            dir,
            base,
            active,
            rolled: VecDeque::new(),
            next_index: 1,
            file_size_limit,
            disk_space_limit,
        })
    }

    #[inline]
    pub fn active_path(&self) -> &Path {
        &self.active
    }

    #[inline]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn rolled_files(&self) -> impl Iterator<Item = &RolledFile> {
        self.rolled.iter()
    }

    pub fn rolled_bytes(&self) -> u64 {
        self.rolled.iter().map(|f| f.bytes).sum()
    }

    #[inline]
    pub fn next_index(&self) -> u32 {
        self.next_index
    }

    fn rolled_path(&self, index: u32) -> PathBuf {
        self.dir
            .join(format!("{}-{index}.{ARCHIVE_EXTENSION}", self.base))
    }

    fn parse_roll_index(&self, name: &str) -> Option<u32> {
        name.strip_prefix(self.base.as_str())?
            .strip_prefix('-')?
            .strip_suffix(ARCHIVE_EXTENSION)?
            .strip_suffix('.')?
            .parse()
            .ok()
    }

    /// Creates the directory, records existing rolled files and moves a
    /// non-empty leftover active file out of the way.
    pub fn prepare(&mut self) -> StatsResult<()> {
        fs::create_dir_all(&self.dir)?;
        self.rolled.clear();
        let mut found = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let entry = entry?;
            let name = entry.file_name();
            let Some(index) = name.to_str().and_then(|n| self.parse_roll_index(n)) else {
                continue;
            };
            let bytes = entry.metadata().map(|m| m.len()).unwrap_or(0);
            found.push(RolledFile {
                index,
                path: entry.path(),
                bytes,
            });
        }
        found.sort_by_key(|f| f.index);
        self.next_index = found.last().map_or(1, |f| f.index.saturating_add(1));
        if !found.is_empty() {
            debug!(
                dir = %self.dir.display(),
                rolled = found.len(),
                next_index = self.next_index,
                "found existing archive files"
            );
        }
        self.rolled.extend(found);

        match fs::metadata(&self.active) {
            Ok(meta) if meta.len() > 0 => {
                self.roll_active(meta.len())?;
            }
            Ok(_) => {}
            Err(err) if err.kind() == io::ErrorKind::NotFound => {}
            Err(err) => return Err(err.into()),
        }
        Ok(())
    }

    /// Whether a file of `file_bytes` must roll before it grows by another
    /// sample of `last_sample_size` bytes.
    pub fn should_roll(&self, file_bytes: u64, last_sample_size: u64) -> bool {
        self.file_size_limit > 0 && file_bytes.saturating_add(last_sample_size) > self.file_size_limit
    }

    /// Renames the active file to the next free roll index.
    pub fn roll_active(&mut self, bytes: u64) -> StatsResult<PathBuf> {
        let mut index = self.next_index;
        let mut target = self.rolled_path(index);
        while target.exists() {
            index = index.saturating_add(1);
            target = self.rolled_path(index);
        }
        fs::rename(&self.active, &target)?;
        self.next_index = index.saturating_add(1);
        info!(
            from = %self.active.display(),
            to = %target.display(),
            bytes,
            "rolled statistics archive"
        );
        self.rolled.push_back(RolledFile {
            index,
            path: target.clone(),
            bytes,
        });
        Ok(target)
    }

    /// Deletes the oldest rolled files until rolled plus `active_bytes` fits
    /// the disk-space limit. Returns the deleted paths.
    ///
    /// The active file is never deleted. A file that cannot be removed stays
    /// accounted for and stops the pass.
    pub fn enforce_disk_limit(&mut self, active_bytes: u64) -> Vec<PathBuf> {
        let mut deleted = Vec::new();
        if self.disk_space_limit == 0 {
            return deleted;
        }
        let mut total = self.rolled_bytes().saturating_add(active_bytes);
        while total > self.disk_space_limit {
            let Some(oldest) = self.rolled.pop_front() else {
                break;
            };
            match fs::remove_file(&oldest.path) {
                Ok(()) => {}
                Err(err) if err.kind() == io::ErrorKind::NotFound => {}
                Err(err) => {
                    warn!(
                        path = %oldest.path.display(),
                        error = %err,
                        "failed to delete archive file over disk limit"
                    );
                    self.rolled.push_front(oldest);
                    break;
                }
            }
            info!(
                path = %oldest.path.display(),
                bytes = oldest.bytes,
                "deleted archive file to respect disk limit"
            );
            total = total.saturating_sub(oldest.bytes);
            deleted.push(oldest.path);
        }
        deleted
    }
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;

    fn files(dir: &TempDir, file_limit: u64, disk_limit: u64) -> ArchiveFiles {
        ArchiveFiles::new(&dir.path().join("stats.log"), 77, file_limit, disk_limit).unwrap()
    }

    #[test]
    fn names_replace_extension_and_add_pid() {
        let dir = TempDir::new().unwrap();
        let files = files(&dir, 0, 0);
        assert_eq!(files.active_path(), dir.path().join("stats-77.gfs"));
        assert_eq!(files.rolled_path(3), dir.path().join("stats-77-3.gfs"));
        assert_eq!(files.parse_roll_index("stats-77-12.gfs"), Some(12));
        assert_eq!(files.parse_roll_index("stats-78-12.gfs"), None);
        assert_eq!(files.parse_roll_index("stats-77.gfs"), None);
        assert_eq!(files.parse_roll_index("stats-77-x.gfs"), None);

        let bare = ArchiveFiles::new(Path::new("archive.gfs"), 1, 0, 0).unwrap();
        assert_eq!(bare.active_path(), Path::new("./archive-1.gfs"));
        assert!(ArchiveFiles::new(Path::new(""), 1, 0, 0).is_err());
    }

    #[test]
    fn prepare_scans_indices_and_rolls_leftover_active_file() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("stats-77-2.gfs"), b"ab").unwrap();
        fs::write(dir.path().join("stats-77-5.gfs"), b"abcd").unwrap();
        fs::write(dir.path().join("stats-77.gfs"), b"xyz").unwrap();
        fs::write(dir.path().join("other-77-9.gfs"), b"x").unwrap();

        let mut files = files(&dir, 0, 0);
        files.prepare().unwrap();
        let indices: Vec<u32> = files.rolled_files().map(|f| f.index).collect();
        assert_eq!(indices, vec![2, 5, 6]);
        assert_eq!(files.next_index(), 7);
        assert_eq!(files.rolled_bytes(), 2 + 4 + 3);
        assert!(!files.active_path().exists());
    }

    #[test]
    fn roll_skips_taken_names() {
        let dir = TempDir::new().unwrap();
        let mut files = files(&dir, 0, 0);
        files.prepare().unwrap();
        fs::write(files.rolled_path(1), b"foreign").unwrap();
        fs::write(files.active_path(), b"data").unwrap();
        let rolled = files.roll_active(4).unwrap();
        assert_eq!(rolled, dir.path().join("stats-77-2.gfs"));
        assert_eq!(files.next_index(), 3);
    }

    #[test]
    fn roll_condition_accounts_for_next_sample() {
        let dir = TempDir::new().unwrap();
        let files = files(&dir, 1000, 0);
        assert!(!files.should_roll(900, 100));
        assert!(files.should_roll(901, 100));
        let unlimited = ArchiveFiles::new(&dir.path().join("s.gfs"), 1, 0, 0).unwrap();
        assert!(!unlimited.should_roll(u64::MAX, 1));
    }

    #[test]
    fn disk_limit_deletes_oldest_first() {
        let dir = TempDir::new().unwrap();
        let mut files = files(&dir, 100, 250);
        files.prepare().unwrap();
        for _ in 0..3 {
            fs::write(files.active_path(), vec![0u8; 100]).unwrap();
            files.roll_active(100).unwrap();
        }
        let deleted = files.enforce_disk_limit(60);
        assert_eq!(
            deleted,
            vec![
                dir.path().join("stats-77-1.gfs"),
                dir.path().join("stats-77-2.gfs")
            ]
        );
        assert!(dir.path().join("stats-77-3.gfs").exists());
        assert_eq!(files.rolled_bytes(), 100);
    }
}
