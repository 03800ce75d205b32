//! State file watcher for cross-process change detection.

use notify::{Config, Event, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Watches one file through its parent directory.
///
/// Atomic replace (write temp, rename) swaps the inode, so the directory is
/// watched rather than the file itself.
pub struct StateFileWatcher {
    path: PathBuf,
    poll_interval: Duration,
}

impl StateFileWatcher {
    pub fn new(path: &Path, poll_interval: Duration) -> Self {
        Self {
            path: path.to_path_buf(),
            poll_interval,
        }
    }

    /// Start watching, calling `on_change` for every event touching the file.
    ///
    /// Watching stops when the returned watcher is dropped.
    pub fn run<F>(self, on_change: F) -> Result<RecommendedWatcher, notify::Error>
    where
        F: Fn() + Send + 'static,
    {
        let file_name = self.path.file_name().map(|n| n.to_os_string());
        let dir = watch_dir(&self.path);

        let mut watcher = RecommendedWatcher::new(
            move |res: notify::Result<Event>| match res {
                Ok(event) => {
                    let relevant = event.kind.is_modify()
                        || event.kind.is_create()
                        || event.kind.is_remove();
                    let touches_file = event
                        .paths
                        .iter()
                        .any(|p| p.file_name().map(|n| n.to_os_string()) == file_name);
                    if relevant && touches_file {
                        tracing::debug!(kind = ?event.kind, "State file change detected");
                        on_change();
                    }
                }
                Err(e) => tracing::error!("Watch error: {:?}", e),
            },
            Config::default().with_poll_interval(self.poll_interval),
        )?;

        watcher.watch(&dir, RecursiveMode::NonRecursive)?;

        tracing::info!(path = ?self.path, dir = ?dir, "State file watcher started");
        Ok(watcher)
    }
}

/// Directory to watch for `path`; the working directory for bare file names.
pub(crate) fn watch_dir(path: &Path) -> PathBuf {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    }
}
