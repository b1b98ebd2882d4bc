// ==========================================
// PLAYBACK STATE TRACKER
// ==========================================
// Holds what is playing right now, when it started, and the prefetched
// "up next" track.
//
// State machine:
//   Idle --begin()--> Playing --end()--> Idle
// begin() while Playing is a bug in the playback loop and is rejected with
// InvalidState. end() while Idle does nothing.
//
// next_song is a look-ahead cache. It is set by the loop when it prefetches
// the queue head and is independent of the Queue Store itself.

use chrono::{DateTime, Utc};

use crate::error::{Error, Result};
use crate::player::queue::Track;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NowPlaying {
    pub track: Track,
    pub start_time: DateTime<Utc>,
}

impl NowPlaying {
    // Seconds since start_time, clamped to [0, duration].
    //
    // - Clock skew (now before start_time) reads as 0
    // - Overruns read as the full duration
    // - Unknown durations (0) have no upper bound to clamp against
    pub fn elapsed_at(&self, now: DateTime<Utc>) -> u64 {
        let secs = (now - self.start_time).num_seconds().max(0) as u64;
        match self.track.duration {
            0 => secs,
            duration => secs.min(duration),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct PlaybackState {
    current: Option<NowPlaying>,
    next: Option<Track>,
}

impl PlaybackState {
    pub fn new() -> Self {
        PlaybackState::default()
    }

    pub fn begin(&mut self, track: Track, start_time: DateTime<Utc>) -> Result<()> {
        if let Some(playing) = &self.current {
            return Err(Error::InvalidState(format!(
                "cannot begin '{}' while '{}' is still playing",
                track.title, playing.track.title
            )));
        }
        self.current = Some(NowPlaying { track, start_time });
        Ok(())
    }

    // Returns the track that was playing, if any
    pub fn end(&mut self) -> Option<Track> {
        self.current.take().map(|playing| playing.track)
    }

    // Replaces the look-ahead and hands back whatever was cached before
    pub fn set_next(&mut self, track: Option<Track>) -> Option<Track> {
        std::mem::replace(&mut self.next, track)
    }

    pub fn take_next(&mut self) -> Option<Track> {
        self.next.take()
    }

    pub fn current(&self) -> Option<&NowPlaying> {
        self.current.as_ref()
    }

    pub fn next(&self) -> Option<&Track> {
        self.next.as_ref()
    }

    pub fn is_playing(&self) -> bool {
        self.current.is_some()
    }

    // Progress of the current track; 0 while idle
    pub fn elapsed_at(&self, now: DateTime<Utc>) -> u64 {
        self.current.as_ref().map_or(0, |playing| playing.elapsed_at(now))
    }

    pub fn elapsed(&self) -> u64 {
        self.elapsed_at(Utc::now())
    }
}
