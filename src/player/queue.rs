// ==========================================
// QUEUE STORE
// ==========================================
// The ordered list of tracks waiting to be played for one session.
// It is the single source of truth for "what plays next".
//
// A track has no stable id: its identity is its position. Every removal
// shifts the later entries down by one, so positions are always 0..len-1.
//
// The queue itself is not synchronised. Sessions wrap it (together with the
// playback state) in one async mutex, see player::session.

use std::collections::VecDeque;

use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Deserializer, Serialize};

use crate::error::{Error, Result};

// ==========================================
// TRACK STRUCT
// ==========================================
// One queued item. Immutable once enqueued.
//
// The field names are the on-disk names read by the dashboard:
//   {"url": ..., "title": ..., "duration": 212, "channel": ...}
//
// duration: u64
//   - Length in seconds, 0 when unknown
//   - Older queue files wrote `null` for unknown durations
//
// is_direct_url: bool
//   - true for plain audio links (e.g. an .mp3) that skip yt-dlp
//   - only written when set
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Track {
    pub url: String,
    pub title: String,
    #[serde(default, deserialize_with = "null_as_zero")]
    pub duration: u64,
    #[serde(default = "unknown_channel")]
    pub channel: String,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub is_direct_url: bool,
}

fn unknown_channel() -> String {
    "Unknown".to_string()
}

fn null_as_zero<'de, D>(deserializer: D) -> std::result::Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<u64>::deserialize(deserializer)?.unwrap_or(0))
}

impl Track {
    pub fn new(url: String, title: String, duration: u64, channel: String) -> Self {
        Track {
            url,
            title,
            duration,
            channel,
            is_direct_url: false,
        }
    }

    // Direct audio link, played as-is without asking yt-dlp for a stream URL
    pub fn direct(url: String, title: String, duration: u64) -> Self {
        Track {
            url,
            title,
            duration,
            channel: unknown_channel(),
            is_direct_url: true,
        }
    }

    // "[3:32]" style label used in chat replies and status output.
    // Unknown durations (0) render as "[Unknown duration]".
    pub fn duration_label(&self) -> String {
        if self.duration == 0 {
            return "[Unknown duration]".to_string();
        }
        format!("[{}:{:02}]", self.duration / 60, self.duration % 60)
    }
}

// ==========================================
// QUEUE STRUCT
// ==========================================
// tracks: VecDeque<Track>
//   - Front = plays next, back = plays last
//   - push_back() to enqueue, pop_front() to advance
//   - push_front() only when putting an interrupted or prefetched
//     track back (crash recovery, shuffle)
#[derive(Debug, Clone, Default)]
pub struct Queue {
    tracks: VecDeque<Track>,
}

impl Queue {
    pub fn new() -> Self {
        Queue {
            tracks: VecDeque::new(),
        }
    }

    // Rebuilds a queue from persisted entries, keeping their order
    pub fn from_tracks(tracks: Vec<Track>) -> Self {
        Queue {
            tracks: tracks.into(),
        }
    }

    // ==========================================
    // ADDING TRACKS
    // ==========================================
    // Appends to the tail. No dedup, no reordering.
    //
    // Example:
    // - Queue: [A, B]
    // - enqueue(C)
    // - Queue: [A, B, C]
    pub fn enqueue(&mut self, track: Track) {
        self.tracks.push_back(track);
    }

    // Playlist imports land here; order is preserved
    pub fn enqueue_all(&mut self, tracks: Vec<Track>) {
        self.tracks.extend(tracks);
    }

    pub fn push_front(&mut self, track: Track) {
        self.tracks.push_front(track);
    }

    // ==========================================
    // ADVANCING: dequeue_head()
    // ==========================================
    // Removes and returns the entry at index 0.
    //
    // None is the normal "nothing to play next" signal, not an error.
    pub fn dequeue_head(&mut self) -> Option<Track> {
        self.tracks.pop_front()
    }

    // ==========================================
    // REMOVING: remove_at()
    // ==========================================
    // Removes the entry at `index` and returns it.
    //
    // Fails with OutOfRange if index is not within [0, len); the queue is
    // left untouched in that case.
    //
    // Example:
    // - Queue: [A, B, C, D]
    // - remove_at(1) -> Ok(B)
    // - Queue: [A, C, D] (C is now index 1)
    //
    // - remove_at(10) -> Err(OutOfRange { index: 10, len: 3 })
    // - Queue: [A, C, D] (unchanged)
    pub fn remove_at(&mut self, index: usize) -> Result<Track> {
        let len = self.tracks.len();
        self.tracks.remove(index).ok_or(Error::OutOfRange {
            index: i64::try_from(index).unwrap_or(i64::MAX),
            len,
        })
    }

    // Clears everything in one step
    pub fn purge(&mut self) {
        self.tracks.clear();
    }

    pub fn shuffle<R: Rng + ?Sized>(&mut self, rng: &mut R) {
        self.tracks.make_contiguous().shuffle(rng);
    }

    // ==========================================
    // READING: snapshot()
    // ==========================================
    // Owned copy of the current order. Nothing in the returned Vec aliases
    // the live queue, so a reader can never see a half-applied mutation.
    pub fn snapshot(&self) -> Vec<Track> {
        self.tracks.iter().cloned().collect()
    }

    pub fn peek(&self) -> Option<&Track> {
        self.tracks.front()
    }

    pub fn len(&self) -> usize {
        self.tracks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }
}
