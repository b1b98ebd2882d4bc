// ==========================================
// CHANGE NOTIFIER
// ==========================================
// A payload-free "something changed, re-read the snapshot" signal.
//
// Out of process: the marker file's mtime is bumped after every save. A
// dashboard stats the marker each poll and only re-parses the JSON records
// when the mtime moved.
//
// In process: a watch channel carrying a change counter, for tasks that
// want to react to saves without touching the disk.

use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use tokio::sync::watch;
use tracing::warn;

pub struct ChangeNotifier {
    marker: PathBuf,
    changes: watch::Sender<u64>,
}

impl ChangeNotifier {
    pub fn new(marker: PathBuf) -> Self {
        let (changes, _) = watch::channel(0);
        ChangeNotifier { marker, changes }
    }

    pub fn marker(&self) -> &Path {
        &self.marker
    }

    // Blocking: touches the marker on disk
    pub fn notify(&self) {
        if let Err(e) = touch(&self.marker) {
            warn!(marker = %self.marker.display(), "Failed to touch change marker: {}", e);
        }
        self.changes.send_modify(|count| *count += 1);
    }

    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.changes.subscribe()
    }
}

// FAT keeps mtimes to 2 s
const COARSEST_MTIME: Duration = Duration::from_secs(2);

// Creates the marker if needed and moves its mtime forward. Contents stay
// empty.
//
// Normally the new mtime is simply now. If that did not move it past the
// previous value (two touches within one filesystem tick, or a marker
// stamped in the future), it is pushed one coarsest tick past the old one.
pub fn touch(path: &Path) -> std::io::Result<()> {
    let file = OpenOptions::new()
        .create(true)
        .truncate(false)
        .write(true)
        .open(path)?;
    let before = file.metadata()?.modified()?;

    file.set_modified(SystemTime::now())?;
    if file.metadata()?.modified()? <= before {
        file.set_modified(before + COARSEST_MTIME)?;
    }
    Ok(())
}

// ==========================================
// MARKER WATCHER
// ==========================================
// The reader side: remembers the last mtime seen and reports whether the
// marker moved since. A missing marker counts as "no change yet".
pub struct MarkerWatcher {
    path: PathBuf,
    last_seen: Option<SystemTime>,
}

impl MarkerWatcher {
    pub fn new(path: PathBuf) -> Self {
        MarkerWatcher {
            path,
            last_seen: None,
        }
    }

    pub fn changed(&mut self) -> bool {
        let modified = match std::fs::metadata(&self.path).and_then(|m| m.modified()) {
            Ok(modified) => modified,
            Err(_) => return false,
        };

        if self.last_seen == Some(modified) {
            return false;
        }
        self.last_seen = Some(modified);
        true
    }
}
