//! Failure injection for archive writes.
//!
//! Hooks are compiled in only with `debug_assertions`; release builds see
//! no-op installers and never consult a hook. Hooks are process-wide, so
//! they should match on [`ArchiveWriteContext::path`] to leave other
//! archives alone.

use std::io;
use std::path::Path;
#[cfg(debug_assertions)]
use std::sync::atomic::{AtomicU64, Ordering};
#[cfg(debug_assertions)]
use std::sync::{Arc, OnceLock};

#[cfg(debug_assertions)]
use parking_lot::RwLock;

/// Context passed to archive write hooks.
#[derive(Debug, Clone, Copy)]
pub struct ArchiveWriteContext<'a> {
    /// Active archive file about to be written.
    pub path: &'a Path,
    /// Number of bytes in the pending write.
    pub bytes: usize,
}

/// Hook signature for archive write overrides. Returning `Some` replaces the
/// real write with the given outcome.
pub type ArchiveWriteHook =
    dyn for<'a> Fn(&ArchiveWriteContext<'a>) -> Option<io::Result<()>> + Send + Sync + 'static;

#[cfg(debug_assertions)]
type HookList = Vec<(u64, Arc<ArchiveWriteHook>)>;

#[cfg(debug_assertions)]
fn archive_hook_slot() -> &'static RwLock<HookList> {
    static SLOT: OnceLock<RwLock<HookList>> = OnceLock::new();
    SLOT.get_or_init(|| RwLock::new(Vec::new()))
}

/// Query the installed archive write hooks. The first hook returning `Some`
/// decides the outcome.
pub fn archive_write_override(ctx: &ArchiveWriteContext<'_>) -> Option<io::Result<()>> {
    #[cfg(debug_assertions)]
    {
        archive_hook_slot()
            .read()
            .iter()
            .find_map(|(_, hook)| hook(ctx))
    }

    #[cfg(not(debug_assertions))]
    {
        let _ = ctx;
        None
    }
}

/// Guard that uninstalls its hook when dropped.
///
/// Several hooks may be installed at once (tests run in parallel); each guard
/// removes only its own.
pub struct ArchiveWriteHookGuard {
    #[cfg(debug_assertions)]
    id: u64,
}

impl Drop for ArchiveWriteHookGuard {
    fn drop(&mut self) {
        #[cfg(debug_assertions)]
        {
            archive_hook_slot().write().retain(|(id, _)| *id != self.id);
        }
    }
}

/// Install an archive write hook, returning a guard that removes it when
/// dropped.
#[cfg(debug_assertions)]
pub fn install_archive_write_hook<F>(hook: F) -> ArchiveWriteHookGuard
where
    F: for<'a> Fn(&ArchiveWriteContext<'a>) -> Option<io::Result<()>> + Send + Sync + 'static,
{
    static NEXT_ID: AtomicU64 = AtomicU64::new(1);
    let id = NEXT_ID.fetch_add(1, Ordering::Relaxed);
    archive_hook_slot().write().push((id, Arc::new(hook)));
    ArchiveWriteHookGuard { id }
}

/// Install an archive write hook. No-op when failure injection is compiled out.
#[cfg(not(debug_assertions))]
pub fn install_archive_write_hook<F>(_hook: F) -> ArchiveWriteHookGuard
where
    F: for<'a> Fn(&ArchiveWriteContext<'a>) -> Option<io::Result<()>> + Send + Sync + 'static,
{
    ArchiveWriteHookGuard {}
}

/// Remove every installed archive write hook.
#[cfg(debug_assertions)]
pub fn clear_archive_write_hooks() {
    archive_hook_slot().write().clear();
}

/// Remove every archive write hook (no-op when compiled without failure injection support).
#[cfg(not(debug_assertions))]
pub fn clear_archive_write_hooks() {}
