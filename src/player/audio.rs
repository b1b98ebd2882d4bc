// ==========================================
// VOICE OUTPUT
// ==========================================
// The boundary to whatever actually streams audio (a voice connection in
// the chat bot, a local player when running standalone).
//
// Contract for play():
// - resolves when the track has finished playing
// - returns Err if the track could not be played at all
// - must stop playing when the returned future is dropped (that is how the
//   playback loop implements skip and shutdown)

use std::future::Future;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use tokio::process::Command;
use tracing::debug;

use crate::error::{Error, Result};
use crate::player::queue::Track;
use crate::youtube::extractor::YouTubeExtractor;

pub trait VoiceOutput: Send + Sync + 'static {
    fn play(&self, track: &Track) -> impl Future<Output = Result<()>> + Send;
}

// ==========================================
// SILENT OUTPUT
// ==========================================
// Plays nothing, just waits out the track's duration. Used by `serve
// --dry-run` to exercise queue/state/persistence without audio.
pub struct SilentOutput;

impl VoiceOutput for SilentOutput {
    async fn play(&self, track: &Track) -> Result<()> {
        debug!(title = %track.title, duration = track.duration, "Silently playing");
        tokio::time::sleep(Duration::from_secs(track.duration)).await;
        Ok(())
    }
}

// ==========================================
// FFPLAY OUTPUT
// ==========================================
// Resolves the stream URL through yt-dlp and hands it to ffplay.
//
// kill_on_drop(true) is what makes skipping work: dropping the play future
// drops the Child, which kills ffplay.
pub struct FfplayOutput {
    player: PathBuf,
    extractor: Arc<YouTubeExtractor>,
}

impl FfplayOutput {
    pub fn new(player: PathBuf, extractor: Arc<YouTubeExtractor>) -> Self {
        FfplayOutput { player, extractor }
    }
}

impl VoiceOutput for FfplayOutput {
    async fn play(&self, track: &Track) -> Result<()> {
        let stream_url = self.extractor.stream_url(track).await?;

        let status = Command::new(&self.player)
            .args(["-nodisp", "-autoexit", "-loglevel", "error"])
            // Same reconnect behaviour the bot's ffmpeg pipeline used
            .args(["-reconnect", "1", "-reconnect_streamed", "1", "-reconnect_delay_max", "5"])
            .arg(&stream_url)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .kill_on_drop(true)
            .status()
            .await
            .map_err(|e| {
                Error::Playback(format!("Failed to run {}: {}", self.player.display(), e))
            })?;

        if !status.success() {
            return Err(Error::Playback(format!(
                "{} exited with {}",
                self.player.display(),
                status
            )));
        }
        Ok(())
    }
}
