// ==========================================
// PERSISTENCE BRIDGE
// ==========================================
// Turns a PlaybackSnapshot into the files the dashboard reads, and back.
//
// Layout inside the data dir, for session key K:
//   snapshot_K.json           - the whole snapshot in one record:
//                               {"currently_playing", "next_song", "songs"}
//   queue_K.json              - [{"url", "title", "duration", "channel"}, ...]
//   currently_playing_K.json  - {"currently_playing": {..., "start_time"},
//                                "next_song": {...}} or {} when idle
//   queue_K.updated           - change marker (see notifier.rs)
//   requests/K/, responses/K/ - request inbox (see inbox.rs)
//
// Every write is write-temp-then-rename. queue_K.json and
// currently_playing_K.json are replaced one after the other, so a reader
// combining them can catch one from before a save and one from after it.
// snapshot_K.json is replaced in one rename and is what load() reads; the
// pair is kept for the dashboard and for data dirs that predate it.
//
// Loading fails open: a missing or unreadable file reads as "nothing there"
// so the bot can always start.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, warn};

use crate::error::Result;
use crate::persistence::write_atomic;
use crate::player::queue::Track;
use crate::player::session::SessionKey;
use crate::player::snapshot::PlaybackSnapshot;
use crate::player::state::NowPlaying;

// currently_playing_K.json as the dashboard expects it
#[derive(Debug, Default, Serialize, Deserialize)]
struct PlaybackRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    currently_playing: Option<CurrentRecord>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    next_song: Option<Track>,
}

// snapshot_K.json
#[derive(Debug, Serialize, Deserialize)]
struct SnapshotRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    currently_playing: Option<CurrentRecord>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    next_song: Option<Track>,
    #[serde(default)]
    songs: Vec<Track>,
}

impl SnapshotRecord {
    fn from_snapshot(snapshot: &PlaybackSnapshot) -> Self {
        SnapshotRecord {
            currently_playing: CurrentRecord::from_snapshot(snapshot),
            next_song: snapshot.next_song.clone(),
            songs: snapshot.songs.clone(),
        }
    }

    fn into_snapshot(self) -> PlaybackSnapshot {
        PlaybackSnapshot {
            currently_playing: self.currently_playing.map(CurrentRecord::into_now_playing),
            next_song: self.next_song,
            songs: self.songs,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct CurrentRecord {
    #[serde(flatten)]
    track: Track,
    // Unix seconds
    #[serde(with = "chrono::serde::ts_seconds")]
    start_time: DateTime<Utc>,
}

impl CurrentRecord {
    // Only the current track's record carries a start time; an idle
    // session writes no start time at all.
    fn from_snapshot(snapshot: &PlaybackSnapshot) -> Option<Self> {
        snapshot.currently_playing.as_ref().map(|p| CurrentRecord {
            track: p.track.clone(),
            start_time: p.start_time,
        })
    }

    fn into_now_playing(self) -> NowPlaying {
        NowPlaying {
            track: self.track,
            start_time: self.start_time,
        }
    }
}

impl PlaybackRecord {
    fn from_snapshot(snapshot: &PlaybackSnapshot) -> Self {
        PlaybackRecord {
            currently_playing: CurrentRecord::from_snapshot(snapshot),
            next_song: snapshot.next_song.clone(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SnapshotStore {
    dir: PathBuf,
}

impl SnapshotStore {
    // Does not touch the disk; see open()
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        SnapshotStore { dir: dir.into() }
    }

    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let store = SnapshotStore::new(dir);
        std::fs::create_dir_all(&store.dir)?;
        Ok(store)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn snapshot_path(&self, key: &SessionKey) -> PathBuf {
        self.dir.join(format!("snapshot_{}.json", key))
    }

    pub fn queue_path(&self, key: &SessionKey) -> PathBuf {
        self.dir.join(format!("queue_{}.json", key))
    }

    pub fn playback_path(&self, key: &SessionKey) -> PathBuf {
        self.dir.join(format!("currently_playing_{}.json", key))
    }

    pub fn marker_path(&self, key: &SessionKey) -> PathBuf {
        self.dir.join(format!("queue_{}.updated", key))
    }

    pub fn requests_dir(&self, key: &SessionKey) -> PathBuf {
        self.dir.join("requests").join(key.as_str())
    }

    pub fn responses_dir(&self, key: &SessionKey) -> PathBuf {
        self.dir.join("responses").join(key.as_str())
    }

    // ==========================================
    // SAVING
    // ==========================================
    // Never fails from the caller's point of view. The in-memory state stays
    // authoritative; a failed write only delays what the dashboard sees.
    pub fn save(&self, key: &SessionKey, snapshot: &PlaybackSnapshot) {
        if let Err(e) = self.try_save(key, snapshot) {
            error!(session = %key, dir = %self.dir.display(), "Failed to save queue snapshot: {}", e);
        }
    }

    // Combined record first, then queue record, then playback record. Each
    // one is replaced atomically on its own.
    pub fn try_save(&self, key: &SessionKey, snapshot: &PlaybackSnapshot) -> Result<()> {
        std::fs::create_dir_all(&self.dir)?;

        let combined = serde_json::to_vec_pretty(&SnapshotRecord::from_snapshot(snapshot))?;
        write_atomic(&self.snapshot_path(key), &combined)?;

        let queue_json = serde_json::to_vec_pretty(&snapshot.songs)?;
        write_atomic(&self.queue_path(key), &queue_json)?;

        let record = PlaybackRecord::from_snapshot(snapshot);
        let playback_json = serde_json::to_vec_pretty(&record)?;
        write_atomic(&self.playback_path(key), &playback_json)?;

        debug!(
            session = %key,
            queued = snapshot.songs.len(),
            playing = snapshot.currently_playing.is_some(),
            "Saved queue snapshot"
        );
        Ok(())
    }

    // ==========================================
    // LOADING
    // ==========================================
    // Reads the combined record, which always holds one save's worth of
    // state. Without it (older data dirs, or it is unreadable) falls back to
    // the legacy pair.
    pub fn load(&self, key: &SessionKey) -> PlaybackSnapshot {
        match self.read_json::<SnapshotRecord>(&self.snapshot_path(key)) {
            Some(record) => record.into_snapshot(),
            None => self.load_legacy(key),
        }
    }

    // Each file fails open on its own: a corrupt playback record does not
    // throw away a good queue record, and vice versa.
    fn load_legacy(&self, key: &SessionKey) -> PlaybackSnapshot {
        let songs: Vec<Track> = self
            .read_json(&self.queue_path(key))
            .unwrap_or_default();
        let record: PlaybackRecord = self
            .read_json(&self.playback_path(key))
            .unwrap_or_default();

        PlaybackSnapshot {
            currently_playing: record.currently_playing.map(CurrentRecord::into_now_playing),
            next_song: record.next_song,
            songs,
        }
    }

    fn read_json<T: serde::de::DeserializeOwned>(&self, path: &Path) -> Option<T> {
        let data = match std::fs::read(path) {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
            Err(e) => {
                warn!(path = %path.display(), "Could not read persisted state, starting empty: {}", e);
                return None;
            }
        };

        match serde_json::from_slice(&data) {
            Ok(value) => Some(value),
            Err(e) => {
                warn!(path = %path.display(), "Persisted state is corrupt, starting empty: {}", e);
                None
            }
        }
    }
}
