//! File watching for live reload.

use std::path::{Path, PathBuf};
use std::sync::{mpsc, Arc, Mutex};

use notify::{EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc as async_mpsc;

/// Events emitted by the file watcher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchEvent {
    /// File was created
    Created(PathBuf),

    /// File was modified
    Modified(PathBuf),

    /// File was deleted
    Deleted(PathBuf),
}

impl WatchEvent {
    pub fn path(&self) -> &Path {
        match self {
            WatchEvent::Created(p) | WatchEvent::Modified(p) | WatchEvent::Deleted(p) => p,
        }
    }
}

/// File watcher for detecting changes.
///
/// Dropping the watcher ends the subscription and closes the event channel.
pub struct FileWatcher {
    _watcher: Arc<Mutex<RecommendedWatcher>>,
}

impl FileWatcher {
    /// Create a new file watcher for the given directories.
    ///
    /// A directory that does not exist yet is watched from the moment it is
    /// created; until then its nearest existing parent is watched
    /// non-recursively. Returns the watcher and a channel to receive events.
    pub fn new(
        paths: &[PathBuf],
    ) -> Result<(Self, async_mpsc::Receiver<WatchEvent>), std::io::Error> {
        let (sync_tx, sync_rx) = mpsc::channel();
        let (async_tx, async_rx) = async_mpsc::channel(256);

        let mut watcher = notify::recommended_watcher(move |res: Result<notify::Event, _>| {
            if let Ok(event) = res {
                let _ = sync_tx.send(event);
            }
        })
        .map_err(std::io::Error::other)?;

        let mut pending = Vec::new();
        for path in paths {
            if path.is_dir() {
                watcher
                    .watch(path, RecursiveMode::Recursive)
                    .map_err(std::io::Error::other)?;
                continue;
            }
            match path.ancestors().skip(1).find(|p| p.is_dir()) {
                Some(parent) => {
                    tracing::debug!("{} does not exist yet, watching {}", path.display(), parent.display());
                    watcher
                        .watch(parent, RecursiveMode::NonRecursive)
                        .map_err(std::io::Error::other)?;
                    pending.push(path.clone());
                }
                None => tracing::warn!("Not watching missing directory {}", path.display()),
            }
        }

        let watcher = Arc::new(Mutex::new(watcher));
        let handle = Arc::downgrade(&watcher);

        // Forward events; the thread ends when the watcher (and its sender) drops.
        std::thread::spawn(move || {
            while let Ok(event) = sync_rx.recv() {
                if !pending.is_empty() && matches!(event.kind, EventKind::Create(_)) {
                    if let Some(watcher) = handle.upgrade() {
                        attach_created(&watcher, &mut pending);
                    }
                }
                for path in event.paths {
                    if let Some(e) = classify_event(path, &event.kind) {
                        if async_tx.blocking_send(e).is_err() {
                            return;
                        }
                    }
                }
            }
        });

        Ok((Self { _watcher: watcher }, async_rx))
    }
}

/// Start recursive watches on pending directories that now exist.
fn attach_created(watcher: &Mutex<RecommendedWatcher>, pending: &mut Vec<PathBuf>) {
    let Ok(mut watcher) = watcher.lock() else {
        return;
    };
    pending.retain(|dir| {
        if !dir.is_dir() {
            return true;
        }
        match watcher.watch(dir, RecursiveMode::Recursive) {
            Ok(()) => {
                tracing::info!("Watching {}", dir.display());
                false
            }
            Err(e) => {
                tracing::warn!("Could not watch {}: {}", dir.display(), e);
                true
            }
        }
    });
}

/// Classify a notify event into a WatchEvent.
fn classify_event(path: PathBuf, kind: &EventKind) -> Option<WatchEvent> {
    match kind {
        EventKind::Create(_) => Some(WatchEvent::Created(path)),
        EventKind::Remove(_) => Some(WatchEvent::Deleted(path)),
        EventKind::Modify(_) => Some(WatchEvent::Modified(path)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::time::Duration;
    use tempfile::tempdir;

    #[tokio::test]
    async fn watches_file_changes() {
        let temp = tempdir().unwrap();
        let test_file = temp.path().join("main.scss");

        // Create the watcher first (so it catches file creation)
        let (watcher, mut rx) = FileWatcher::new(&[temp.path().to_path_buf()]).unwrap();

        // Give inotify time to set up
        tokio::time::sleep(Duration::from_millis(100)).await;

        fs::write(&test_file, ".a{color:red}").unwrap();

        let event = tokio::time::timeout(Duration::from_secs(3), rx.recv()).await;

        // Keep watcher alive until we're done
        drop(watcher);

        assert!(event.is_ok(), "timeout waiting for file watch event");
        let event = event.unwrap().expect("channel should not be closed");
        assert!(event.path().ends_with("main.scss"));
    }

    #[tokio::test]
    async fn picks_up_directory_created_later() {
        let temp = tempdir().unwrap();
        let fonts = temp.path().join("font");
        let (watcher, mut rx) = FileWatcher::new(&[fonts.clone()]).unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;

        fs::create_dir(&fonts).unwrap();
        tokio::time::sleep(Duration::from_millis(300)).await;
        fs::write(fonts.join("Inter.ttf"), b"font").unwrap();

        let found = tokio::time::timeout(Duration::from_secs(3), async {
            while let Some(event) = rx.recv().await {
                if event.path().ends_with("Inter.ttf") {
                    return true;
                }
            }
            false
        })
        .await;

        drop(watcher);
        assert!(matches!(found, Ok(true)), "no event from the late directory");
    }

    #[test]
    fn skips_missing_directories() {
        let temp = tempdir().unwrap();
        let missing = temp.path().join("nope");
        assert!(FileWatcher::new(&[missing]).is_ok());
    }

    #[test]
    fn classifies_event_kinds() {
        use notify::event::{CreateKind, ModifyKind, RemoveKind};

        let p = PathBuf::from("a.js");
        assert_eq!(
            classify_event(p.clone(), &EventKind::Create(CreateKind::File)),
            Some(WatchEvent::Created(p.clone()))
        );
        assert_eq!(
            classify_event(p.clone(), &EventKind::Modify(ModifyKind::Any)),
            Some(WatchEvent::Modified(p.clone()))
        );
        assert_eq!(
            classify_event(p.clone(), &EventKind::Remove(RemoveKind::File)),
            Some(WatchEvent::Deleted(p.clone()))
        );
        assert_eq!(classify_event(p, &EventKind::Access(notify::event::AccessKind::Any)), None);
    }
}
