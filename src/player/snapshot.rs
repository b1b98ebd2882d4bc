// Snapshot Reader: a self-consistent copy of one session's queue and
// playback state, taken under the session lock and read without it.

use chrono::{DateTime, Utc};

use crate::player::queue::Track;
use crate::player::state::NowPlaying;

/// Everything a status reader or the persistence layer needs, as of one instant.
///
/// `next_song` is the prefetched look-ahead and is *not* part of `songs`.
/// The start time lives inside `currently_playing`, so an idle snapshot has
/// no start time to misread.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PlaybackSnapshot {
    pub currently_playing: Option<NowPlaying>,
    pub next_song: Option<Track>,
    pub songs: Vec<Track>,
}

impl PlaybackSnapshot {
    pub fn empty() -> Self {
        PlaybackSnapshot::default()
    }

    pub fn start_time(&self) -> Option<DateTime<Utc>> {
        self.currently_playing.as_ref().map(|p| p.start_time)
    }

    pub fn is_empty(&self) -> bool {
        self.currently_playing.is_none() && self.next_song.is_none() && self.songs.is_empty()
    }

    /// Upcoming tracks in play order: the look-ahead first, then the queue.
    pub fn upcoming(&self) -> impl Iterator<Item = &Track> {
        self.next_song.iter().chain(self.songs.iter())
    }

    pub fn elapsed_at(&self, now: DateTime<Utc>) -> u64 {
        self.currently_playing
            .as_ref()
            .map_or(0, |playing| playing.elapsed_at(now))
    }

    /// The `!playlist` reply: now playing, then up to `limit` upcoming entries.
    pub fn render_status(&self, limit: usize) -> String {
        let mut message = String::new();

        if let Some(playing) = &self.currently_playing {
            message.push_str(&format!(
                "**Currently playing:** {} {}\n\n",
                playing.track.title,
                playing.track.duration_label()
            ));
        }

        let total = self.songs.len() + usize::from(self.next_song.is_some());
        if total > 0 {
            message.push_str(&format!(
                "**Next {} Songs ({} total):**\n",
                limit.min(total),
                total
            ));
            for (i, track) in self.upcoming().take(limit).enumerate() {
                message.push_str(&format!(
                    "{}. {} {}\n",
                    i + 1,
                    track.title,
                    track.duration_label()
                ));
            }
        } else if self.currently_playing.is_none() {
            message.push_str("The queue is currently empty.");
        }

        message
    }
}
