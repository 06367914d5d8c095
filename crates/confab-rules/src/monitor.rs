//! File change notification.
//!
//! The engine never watches the filesystem itself; it consumes
//! [`MonitorEvent`]s pushed by a [`FileMonitor`] implementation. The event
//! model is five kinds: created / changed / deleted for live changes, plus
//! the synthetic initial-scan pair `Exists` (emitted per already-present
//! subscribed path) and `EndExist` (scan-complete marker, ignorable).
//!
//! [`NotifyMonitor`] is the production implementation over the `notify`
//! crate. It watches the *parent directory* of each subscribed path, since
//! a subscription may name a file that does not exist yet (an unmatched
//! include pattern). Consumers therefore receive events for sibling paths
//! they never subscribed to and must filter by path themselves.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::mpsc::Sender;

use notify::{RecommendedWatcher, RecursiveMode, Watcher};
use tracing::{debug, warn};

/// What happened to a watched path.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChangeKind {
    /// The path came into existence.
    Created,
    /// The path's content changed.
    Changed,
    /// The path was removed.
    Deleted,
    /// Synthetic: the path existed when the subscription was made.
    Exists,
    /// Synthetic: the initial scan for a subscription finished.
    EndExist,
}

/// One change notification.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MonitorEvent {
    /// The affected path.
    pub path: PathBuf,
    /// What happened.
    pub kind: ChangeKind,
}

/// Source of change notifications.
pub trait FileMonitor: Send {
    /// Register interest in a path (which need not exist yet).
    fn subscribe(&mut self, path: &Path) -> std::io::Result<()>;
}

/// Map a notify event kind onto the engine's model.
///
/// Access-only and metadata-only events are dropped.
pub fn map_kind(kind: &notify::EventKind) -> Option<ChangeKind> {
    use notify::EventKind;
    match kind {
        EventKind::Create(_) => Some(ChangeKind::Created),
        EventKind::Modify(_) => Some(ChangeKind::Changed),
        EventKind::Remove(_) => Some(ChangeKind::Deleted),
        EventKind::Access(_) | EventKind::Any | EventKind::Other => None,
    }
}

/// Production monitor over the `notify` crate.
pub struct NotifyMonitor {
    watcher: RecommendedWatcher,
    tx: Sender<MonitorEvent>,
    watched_dirs: HashSet<PathBuf>,
}

impl NotifyMonitor {
    /// Create a monitor delivering events into `tx`.
    pub fn new(tx: Sender<MonitorEvent>) -> notify::Result<Self> {
        let event_tx = tx.clone();
        let watcher = notify::recommended_watcher(move |result: notify::Result<notify::Event>| {
            match result {
                Ok(event) => {
                    let Some(kind) = map_kind(&event.kind) else {
                        return;
                    };
                    for path in event.paths {
                        if event_tx.send(MonitorEvent { path, kind }).is_err() {
                            // Receiver hung up; nothing left to deliver to.
                            return;
                        }
                    }
                }
                Err(e) => warn!(error = %e, "file watcher error"),
            }
        })?;

        Ok(Self {
            watcher,
            tx,
            watched_dirs: HashSet::new(),
        })
    }

    /// Emit the initial-scan-complete marker for a subscription root.
    pub fn end_initial_scan(&self, path: &Path) {
        let _ = self.tx.send(MonitorEvent {
            path: path.to_path_buf(),
            kind: ChangeKind::EndExist,
        });
    }
}

impl FileMonitor for NotifyMonitor {
    fn subscribe(&mut self, path: &Path) -> std::io::Result<()> {
        // Synthetic existence event before any live notifications.
        if path.exists() {
            let _ = self.tx.send(MonitorEvent {
                path: path.to_path_buf(),
                kind: ChangeKind::Exists,
            });
        }

        let dir = if path.is_dir() {
            path.to_path_buf()
        } else {
            path.parent().map_or_else(|| PathBuf::from("."), Path::to_path_buf)
        };

        if self.watched_dirs.contains(&dir) {
            return Ok(());
        }
        self.watcher
            .watch(&dir, RecursiveMode::NonRecursive)
            .map_err(|e| std::io::Error::other(e.to_string()))?;
        debug!(dir = %dir.display(), "watching directory");
        let _ = self.watched_dirs.insert(dir);
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::sync::mpsc;

    use super::*;

    #[test]
    fn map_kind_covers_lifecycle_events() {
        use notify::event::{CreateKind, DataChange, ModifyKind, RemoveKind};
        assert_eq!(
            map_kind(&notify::EventKind::Create(CreateKind::File)),
            Some(ChangeKind::Created)
        );
        assert_eq!(
            map_kind(&notify::EventKind::Modify(ModifyKind::Data(DataChange::Content))),
            Some(ChangeKind::Changed)
        );
        assert_eq!(
            map_kind(&notify::EventKind::Remove(RemoveKind::File)),
            Some(ChangeKind::Deleted)
        );
    }

    #[test]
    fn map_kind_drops_access_events() {
        use notify::event::AccessKind;
        assert_eq!(map_kind(&notify::EventKind::Access(AccessKind::Read)), None);
        assert_eq!(map_kind(&notify::EventKind::Any), None);
    }

    #[test]
    fn subscribe_emits_exists_for_present_file() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("groups.xml");
        std::fs::write(&file, "<Groups/>").unwrap();

        let (tx, rx) = mpsc::channel();
        let mut monitor = NotifyMonitor::new(tx).unwrap();
        monitor.subscribe(&file).unwrap();

        let event = rx.try_recv().unwrap();
        assert_eq!(event.kind, ChangeKind::Exists);
        assert_eq!(event.path, file);
    }

    #[test]
    fn subscribe_to_absent_file_watches_parent() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("not-yet.xml");

        let (tx, rx) = mpsc::channel();
        let mut monitor = NotifyMonitor::new(tx).unwrap();
        monitor.subscribe(&file).unwrap();

        // No synthetic Exists for a missing path.
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn end_initial_scan_emits_marker() {
        let dir = tempfile::tempdir().unwrap();
        let (tx, rx) = mpsc::channel();
        let monitor = NotifyMonitor::new(tx).unwrap();
        monitor.end_initial_scan(dir.path());

        let event = rx.try_recv().unwrap();
        assert_eq!(event.kind, ChangeKind::EndExist);
    }
}
