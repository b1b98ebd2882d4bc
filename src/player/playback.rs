// ==========================================
// PLAYBACK LOOP
// ==========================================
// One long-lived task per session. It is the only caller of
// advance()/finish(), so it alone moves tracks into and out of
// `currently_playing` / `next_song`.
//
// A track ends in one of three ways:
// - the voice output finishes (or fails, in which case it is skipped)
// - skip()/clear() cancel the track's token
// - shutdown: the loop stops WITHOUT finishing the track, so the playback
//   record still names it and the next start re-queues it

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::player::audio::VoiceOutput;
use crate::player::session::Session;

pub struct PlaybackLoop<O> {
    session: Arc<Session>,
    output: O,
    idle_timeout: Duration,
}

impl<O: VoiceOutput> PlaybackLoop<O> {
    pub fn new(session: Arc<Session>, output: O, idle_timeout: Duration) -> Self {
        PlaybackLoop {
            session,
            output,
            idle_timeout,
        }
    }

    pub async fn run(self, shutdown: CancellationToken) {
        let key = self.session.key().clone();
        info!(session = %key, "Playback loop started");

        loop {
            if shutdown.is_cancelled() {
                break;
            }

            let started = match self.session.advance().await {
                Ok(started) => started,
                Err(e) => {
                    // Only happens if something else left a track playing
                    error!(session = %key, "Cannot advance: {}", e);
                    self.session.finish().await;
                    continue;
                }
            };

            let Some((track, skipped)) = started else {
                if self.idle(&shutdown).await {
                    continue;
                }
                break;
            };

            info!(session = %key, "Now playing: {} {}", track.title, track.duration_label());

            let result = tokio::select! {
                _ = shutdown.cancelled() => {
                    info!(session = %key, title = %track.title, "Stopping playback");
                    break;
                }
                _ = skipped.cancelled() => {
                    debug!(session = %key, title = %track.title, "Track interrupted");
                    Ok(())
                }
                result = self.output.play(&track) => result,
            };

            if let Err(e) = result {
                warn!(session = %key, "Skipping song '{}' due to error: {}", track.title, e);
            }
            self.session.finish().await;
        }

        info!(session = %key, "Playback loop stopped");
    }

    // Waits for an enqueue. Returns false on shutdown.
    async fn idle(&self, shutdown: &CancellationToken) -> bool {
        tokio::select! {
            _ = shutdown.cancelled() => return false,
            _ = self.session.work_available() => return true,
            _ = tokio::time::sleep(self.idle_timeout) => {}
        }

        info!(
            session = %self.session.key(),
            idle_secs = self.idle_timeout.as_secs(),
            "Disconnected due to inactivity"
        );
        tokio::select! {
            _ = shutdown.cancelled() => false,
            _ = self.session.work_available() => true,
        }
    }
}
