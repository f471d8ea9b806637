use notify::{Event, EventKind, RecursiveMode, Watcher};
use parking_lot::Mutex;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::mpsc;
use walkdir::WalkDir;

use super::WatchError;

/// Ordered stream of changed paths.
pub type ChangeStream = mpsc::UnboundedReceiver<PathBuf>;

type Subscribers = Arc<Mutex<Vec<mpsc::UnboundedSender<PathBuf>>>>;

pub struct FileWatcher {
    root: PathBuf,
    recursive: bool,
    subscribers: Subscribers,
    watcher: Mutex<Option<notify::RecommendedWatcher>>,
}

impl std::fmt::Debug for FileWatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileWatcher")
            .field("root", &self.root)
            .field("recursive", &self.recursive)
            .field("subscribers", &self.subscribers.lock().len())
            .finish()
    }
}

impl FileWatcher {
    /// Watch a directory tree recursively.
    pub fn watch_tree(root: impl AsRef<Path>) -> Result<Self, WatchError> {
        let root = root.as_ref();
        let root = root
            .canonicalize()
            .map_err(|e| WatchError::PathWatchFailed {
                path: root.to_path_buf(),
                reason: e.to_string(),
            })?;
        Self::start(root.clone(), root, RecursiveMode::Recursive, None)
    }

    /// Watch a single file.
    ///
    /// The parent directory is watched instead of the file so editors that
    /// replace the file on save keep producing events.
    pub fn watch_file(path: impl AsRef<Path>) -> Result<Self, WatchError> {
        let path = path.as_ref();
        let path = path
            .canonicalize()
            .map_err(|e| WatchError::PathWatchFailed {
                path: path.to_path_buf(),
                reason: e.to_string(),
            })?;
        let parent = path
            .parent()
            .map(Path::to_path_buf)
            .ok_or_else(|| WatchError::PathWatchFailed {
                path: path.clone(),
                reason: "file has no parent directory".to_string(),
            })?;
        let name = path.file_name().map(|n| n.to_os_string());
        Self::start(path, parent, RecursiveMode::NonRecursive, name)
    }

    fn start(
        root: PathBuf,
        watch_path: PathBuf,
        mode: RecursiveMode,
        only: Option<OsString>,
    ) -> Result<Self, WatchError> {
        let subscribers: Subscribers = Arc::new(Mutex::new(Vec::new()));
        let fanout = Arc::clone(&subscribers);

        let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| {
            let event = match res {
                Ok(event) => event,
                Err(e) => {
                    tracing::warn!("[watcher] {}", WatchError::EventError {
                        details: e.to_string()
                    });
                    return;
                }
            };
            if !matches!(
                event.kind,
                EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_) | EventKind::Any
            ) {
                return;
            }

            let mut senders = fanout.lock();
            for path in event.paths {
                if let Some(name) = &only {
                    if path.file_name() != Some(name.as_os_str()) {
                        continue;
                    }
                }
                crate::debug_event!("watcher", "changed", "{}", path.display());
                senders.retain(|tx| tx.send(path.clone()).is_ok());
            }
        })?;

        watcher
            .watch(&watch_path, mode)
            .map_err(|e| WatchError::PathWatchFailed {
                path: watch_path.clone(),
                reason: e.to_string(),
            })?;

        crate::log_event!("watcher", "watching", "{}", root.display());

        Ok(Self {
            root,
            recursive: matches!(mode, RecursiveMode::Recursive),
            subscribers,
            watcher: Mutex::new(Some(watcher)),
        })
    }

    /// A new stream of every change seen from now on.
    pub fn subscribe(&self) -> Result<ChangeStream, WatchError> {
        if self.watcher.lock().is_none() {
            return Err(WatchError::Stopped);
        }
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers.lock().push(tx);
        Ok(rx)
    }

    /// The watched directory, or the watched file.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Every file currently under the watched root.
    pub fn all_paths(&self) -> Vec<PathBuf> {
        let depth = if self.recursive { usize::MAX } else { 0 };
        WalkDir::new(&self.root)
            .max_depth(depth)
            .into_iter()
            .filter_map(Result::ok)
            .filter(|entry| entry.file_type().is_file())
            .map(|entry| entry.into_path())
            .collect()
    }

    pub fn is_running(&self) -> bool {
        self.watcher.lock().is_some()
    }

    /// Stop watching and end every stream.
    pub fn stop(&self) {
        let watcher = self.watcher.lock().take();
        // Dropping the watcher joins its event thread, which may be waiting
        // on the subscriber lock, so neither lock is held here.
        drop(watcher);
        self.subscribers.lock().clear();
    }
}

impl Drop for FileWatcher {
    fn drop(&mut self) {
        self.stop();
    }
}
