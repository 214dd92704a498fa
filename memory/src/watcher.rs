//! Chunk directory watcher.
//!
//! Watches the top level of the chunk directory and forwards settled change
//! events into a channel. The debouncer's quiet period stands in for
//! write-settling: an event fires only after the path has been stable for
//! the settle duration, and continuous-write notifications are dropped.
//!
//! Events carry only the path. The consumer decides add/change vs unlink by
//! checking whether the file still exists; the debouncer does not
//! distinguish kinds, and the reconcile path is the same either way.
//! Self-initiated writes are not suppressed; reconciliation is idempotent.

use std::path::Path;
use std::path::PathBuf;
use std::time::Duration;

use notify::RecommendedWatcher;
use notify::RecursiveMode;
use notify::Watcher as _;
use notify_debouncer_mini::DebounceEventResult;
use notify_debouncer_mini::DebouncedEventKind;
use notify_debouncer_mini::Debouncer;
use notify_debouncer_mini::new_debouncer;
use tokio::sync::mpsc;

use crate::error::MemoryErr;
use crate::error::Result;

/// A settled filesystem event on the chunk directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchEvent {
    pub path: PathBuf,
}

/// Keeps the underlying watcher alive; dropping it stops the watch and
/// closes the event channel.
pub struct ChunkWatcher {
    _debouncer: Debouncer<RecommendedWatcher>,
}

impl std::fmt::Debug for ChunkWatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChunkWatcher").finish_non_exhaustive()
    }
}

/// Start watching `dir` (non-recursively). Dotfiles are ignored.
pub fn watch(dir: &Path, settle: Duration) -> Result<(ChunkWatcher, mpsc::UnboundedReceiver<WatchEvent>)> {
    let (tx, rx) = mpsc::unbounded_channel();
    let watch_dir = dir.to_path_buf();

    let mut debouncer = new_debouncer(settle, move |result: DebounceEventResult| match result {
        Ok(events) => {
            for event in events {
                // AnyContinuous means the path is still being written to;
                // a settled Any event will follow.
                if event.kind != DebouncedEventKind::Any {
                    continue;
                }
                if is_dotfile(&event.path) {
                    continue;
                }
                let _ = tx.send(WatchEvent { path: event.path });
            }
        }
        Err(e) => {
            tracing::warn!(error = %e, "watch error");
        }
    })
    .map_err(|e| MemoryErr::Watch {
        cause: e.to_string(),
    })?;

    debouncer
        .watcher()
        .watch(&watch_dir, RecursiveMode::NonRecursive)
        .map_err(|e| MemoryErr::Watch {
            cause: e.to_string(),
        })?;

    tracing::debug!(dir = %watch_dir.display(), "watching chunk directory");
    Ok((
        ChunkWatcher {
            _debouncer: debouncer,
        },
        rx,
    ))
}

fn is_dotfile(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .is_some_and(|n| n.starts_with('.'))
}
