// ==========================================
// PLAYBACK SESSION
// ==========================================
// One session = one queue + one playback state, for one session key
// (a guild/channel id). Both live behind a single async mutex, so the
// playback loop advancing the queue and a dashboard deleting an entry are
// serialised and a snapshot always sees both halves at the same instant.
//
// Every mutation follows the same shape:
//   1. lock, mutate, copy a snapshot, unlock
//   2. write the snapshot to disk (no lock held)
//   3. touch the change marker
//
// Saves are ordered by revision: a save that finds a newer revision already
// on disk is dropped instead of overwriting it.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use chrono::{SubsecRound, Utc};
use rand::thread_rng;
use tokio::sync::{Mutex, Notify, OnceCell, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::error::{Error, Result};
use crate::persistence::notifier::ChangeNotifier;
use crate::persistence::store::SnapshotStore;
use crate::player::queue::{Queue, Track};
use crate::player::snapshot::PlaybackSnapshot;
use crate::player::state::PlaybackState;

// ==========================================
// SESSION KEY
// ==========================================
// External identifier, usually a chat guild or channel id. It ends up in
// file names, so only ASCII letters, digits, '-' and '_' are accepted.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionKey(String);

impl SessionKey {
    pub fn new(key: impl Into<String>) -> Result<Self> {
        let key = key.into();
        let valid = !key.is_empty()
            && key
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        if !valid {
            return Err(Error::Config(format!("invalid session key: {:?}", key)));
        }
        Ok(SessionKey(key))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// Whether a mutation changed anything worth saving
enum Outcome<T> {
    Changed(T),
    Unchanged(T),
}

struct SessionState {
    queue: Queue,
    playback: PlaybackState,
    // Cancelled by skip()/clear() to cut the current track short
    interrupt: Option<CancellationToken>,
    revision: u64,
}

impl SessionState {
    fn snapshot(&self) -> PlaybackSnapshot {
        PlaybackSnapshot {
            currently_playing: self.playback.current().cloned(),
            next_song: self.playback.next().cloned(),
            songs: self.queue.snapshot(),
        }
    }
}

pub struct Session {
    key: SessionKey,
    state: Mutex<SessionState>,
    store: Arc<SnapshotStore>,
    notifier: Arc<ChangeNotifier>,
    // Highest revision written to disk so far
    written: Mutex<u64>,
    // Wakes an idle playback loop when work arrives
    work: Notify,
}

impl Session {
    // ==========================================
    // RESTORE
    // ==========================================
    // Loads the last persisted snapshot. A track that was playing or
    // prefetched when the process died never finished, and it is no longer in
    // the queue record, so both go back to the head of the queue (current
    // first). Playback starts idle.
    pub async fn restore(key: SessionKey, store: Arc<SnapshotStore>) -> Arc<Session> {
        let loaded = {
            let store = Arc::clone(&store);
            let load_key = key.clone();
            tokio::task::spawn_blocking(move || store.load(&load_key))
                .await
                .unwrap_or_else(|e| {
                    error!(session = %key, "Snapshot load task failed: {}", e);
                    PlaybackSnapshot::empty()
                })
        };

        let mut queue = Queue::from_tracks(loaded.songs);
        let mut requeued = 0;
        if let Some(next) = loaded.next_song {
            queue.push_front(next);
            requeued += 1;
        }
        if let Some(playing) = loaded.currently_playing {
            queue.push_front(playing.track);
            requeued += 1;
        }

        info!(session = %key, queued = queue.len(), requeued, "Restored session");

        let notifier = Arc::new(ChangeNotifier::new(store.marker_path(&key)));
        let session = Arc::new(Session {
            key,
            state: Mutex::new(SessionState {
                queue,
                playback: PlaybackState::new(),
                interrupt: None,
                revision: 0,
            }),
            store,
            notifier,
            written: Mutex::new(0),
            work: Notify::new(),
        });

        if requeued > 0 {
            // Republish so readers stop showing the dead track as playing
            let _ = session
                .apply(|_| Ok(Outcome::Changed(())))
                .await;
        }
        session
    }

    pub fn key(&self) -> &SessionKey {
        &self.key
    }

    pub fn notifier(&self) -> &ChangeNotifier {
        &self.notifier
    }

    async fn apply<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut SessionState) -> Result<Outcome<T>>,
    {
        let (value, save) = {
            let mut state = self.state.lock().await;
            match f(&mut state)? {
                Outcome::Unchanged(value) => (value, None),
                Outcome::Changed(value) => {
                    state.revision += 1;
                    (value, Some((state.revision, state.snapshot())))
                }
            }
        };

        if let Some((revision, snapshot)) = save {
            self.persist(revision, snapshot).await;
        }
        Ok(value)
    }

    async fn persist(&self, revision: u64, snapshot: PlaybackSnapshot) {
        let mut written = self.written.lock().await;
        if *written >= revision {
            debug!(session = %self.key, revision, "Skipping stale save");
            return;
        }

        let store = Arc::clone(&self.store);
        let notifier = Arc::clone(&self.notifier);
        let key = self.key.clone();
        let result = tokio::task::spawn_blocking(move || {
            store.save(&key, &snapshot);
            notifier.notify();
        })
        .await;

        if let Err(e) = result {
            error!(session = %self.key, "Save task failed: {}", e);
        }
        *written = revision;
    }

    // ==========================================
    // READING
    // ==========================================
    // Holds the lock only long enough to clone.
    pub async fn snapshot(&self) -> PlaybackSnapshot {
        self.state.lock().await.snapshot()
    }

    pub async fn len(&self) -> usize {
        self.state.lock().await.queue.len()
    }

    // ==========================================
    // QUEUE MUTATIONS
    // ==========================================
    pub async fn enqueue(&self, track: Track) {
        self.enqueue_all(vec![track]).await;
    }

    pub async fn enqueue_all(&self, tracks: Vec<Track>) {
        if tracks.is_empty() {
            return;
        }
        let count = tracks.len();
        let _ = self
            .apply(|state| {
                state.queue.enqueue_all(tracks);
                Ok(Outcome::Changed(()))
            })
            .await;
        debug!(session = %self.key, count, "Enqueued tracks");
        self.work.notify_one();
    }

    pub async fn dequeue_head(&self) -> Option<Track> {
        self.apply(|state| {
            Ok(match state.queue.dequeue_head() {
                Some(track) => Outcome::Changed(Some(track)),
                None => Outcome::Unchanged(None),
            })
        })
        .await
        .ok()
        .flatten()
    }

    // Index is checked against the live queue length while the lock is held,
    // never against whatever copy the caller was looking at.
    pub async fn remove_at(&self, index: i64) -> Result<Track> {
        self.apply(|state| {
            let len = state.queue.len();
            let index = usize::try_from(index).map_err(|_| Error::OutOfRange { index, len })?;
            state.queue.remove_at(index).map(Outcome::Changed)
        })
        .await
    }

    // Empties the queue only; the current track and look-ahead stay
    pub async fn purge(&self) {
        let _ = self
            .apply(|state| {
                state.queue.purge();
                Ok(Outcome::Changed(()))
            })
            .await;
    }

    // The look-ahead goes back into the queue before shuffling, so it gets
    // shuffled too. The playback loop prefetches again on the next advance.
    pub async fn shuffle(&self) -> usize {
        self.apply(|state| {
            if let Some(next) = state.playback.take_next() {
                state.queue.enqueue(next);
            }
            state.queue.shuffle(&mut thread_rng());
            Ok(Outcome::Changed(state.queue.len()))
        })
        .await
        .unwrap_or(0)
    }

    // Stops the current track, drops the look-ahead and purges the queue.
    // Afterwards the records on disk are `[]` and `{}`.
    pub async fn clear(&self) {
        let _ = self
            .apply(|state| {
                if let Some(token) = state.interrupt.take() {
                    token.cancel();
                }
                state.playback.end();
                state.playback.set_next(None);
                state.queue.purge();
                Ok(Outcome::Changed(()))
            })
            .await;
        info!(session = %self.key, "Cleared queue and current song");
    }

    // Returns false when nothing is playing
    pub async fn skip(&self) -> bool {
        let state = self.state.lock().await;
        match &state.interrupt {
            Some(token) if state.playback.is_playing() => {
                token.cancel();
                true
            }
            _ => false,
        }
    }

    // ==========================================
    // PLAYBACK TRANSITIONS (playback loop only)
    // ==========================================
    // Starts the next track: the prefetched look-ahead if there is one,
    // otherwise the queue head. The new queue head is then prefetched into
    // the look-ahead. Returns the track plus a token that fires on skip.
    pub async fn advance(&self) -> Result<Option<(Track, CancellationToken)>> {
        self.apply(|state| {
            if let Some(playing) = state.playback.current() {
                return Err(Error::InvalidState(format!(
                    "advance while '{}' is still playing",
                    playing.track.title
                )));
            }

            let Some(track) = state
                .playback
                .take_next()
                .or_else(|| state.queue.dequeue_head())
            else {
                return Ok(Outcome::Unchanged(None));
            };

            state
                .playback
                .begin(track.clone(), Utc::now().trunc_subsecs(0))?;
            let prefetched = state.queue.dequeue_head();
            state.playback.set_next(prefetched);

            let token = CancellationToken::new();
            state.interrupt = Some(token.clone());
            Ok(Outcome::Changed(Some((track, token))))
        })
        .await
    }

    // Current track ended, errored or was skipped
    pub async fn finish(&self) -> Option<Track> {
        self.apply(|state| {
            state.interrupt = None;
            Ok(match state.playback.end() {
                Some(track) => Outcome::Changed(Some(track)),
                None => Outcome::Unchanged(None),
            })
        })
        .await
        .ok()
        .flatten()
    }

    // Resolves once enqueue() has been called since the last wait
    pub async fn work_available(&self) {
        self.work.notified().await;
    }
}

// ==========================================
// SESSION REGISTRY
// ==========================================
// Session key -> session. Sessions are restored from disk on first use and
// live as long as the registry. There is no removal: a playback loop or inbox
// may still hold a session, and a second Session for the same key would be a
// second writer of the same files. Session::clear() empties one instead.
//
// Each key gets its own OnceCell, so restoring one session (disk I/O) never
// blocks lookups of the others, and concurrent first uses of a key share one
// restore.
pub struct SessionRegistry {
    store: Arc<SnapshotStore>,
    sessions: RwLock<HashMap<SessionKey, Arc<OnceCell<Arc<Session>>>>>,
}

impl SessionRegistry {
    pub fn new(store: Arc<SnapshotStore>) -> Self {
        SessionRegistry {
            store,
            sessions: RwLock::new(HashMap::new()),
        }
    }

    pub fn store(&self) -> &Arc<SnapshotStore> {
        &self.store
    }

    // Only sessions that have finished restoring
    pub async fn get(&self, key: &SessionKey) -> Option<Arc<Session>> {
        self.sessions
            .read()
            .await
            .get(key)
            .and_then(|cell| cell.get().cloned())
    }

    pub async fn get_or_restore(&self, key: &SessionKey) -> Arc<Session> {
        if let Some(session) = self.get(key).await {
            return session;
        }

        // The map lock only covers finding the cell, not the restore
        let cell = {
            let mut sessions = self.sessions.write().await;
            Arc::clone(sessions.entry(key.clone()).or_default())
        };
        let store = Arc::clone(&self.store);
        let session = cell
            .get_or_init(|| Session::restore(key.clone(), store))
            .await;
        Arc::clone(session)
    }

    pub async fn keys(&self) -> Vec<SessionKey> {
        let mut keys: Vec<_> = self
            .sessions
            .read()
            .await
            .iter()
            .filter(|(_, cell)| cell.initialized())
            .map(|(key, _)| key.clone())
            .collect();
        keys.sort();
        keys
    }
}
