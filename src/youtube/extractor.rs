// YouTube extractor
// Resolves chat queries and URLs into queue entries, and queue entries into
// playable stream URLs, by running yt-dlp as a subprocess.

use std::future::Future;
use std::path::PathBuf;
use std::process::Command;
use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::player::queue::Track;

// Turns whatever a user typed after `!play` into tracks to enqueue.
// Implemented by YouTubeExtractor; tests plug in a canned resolver.
pub trait TrackResolver: Send + Sync + 'static {
    fn resolve(&self, query: &str) -> impl Future<Output = Result<Vec<Track>>> + Send;
}

impl<T: TrackResolver> TrackResolver for Arc<T> {
    fn resolve(&self, query: &str) -> impl Future<Output = Result<Vec<Track>>> + Send {
        T::resolve(self, query)
    }
}

const AUDIO_EXTENSIONS: &[&str] = &[".mp3", ".ogg", ".opus", ".flac", ".wav", ".m4a"];

pub struct YouTubeExtractor {
    ytdlp: PathBuf,
    cookies: Option<PathBuf>,
    playlist_limit: usize,
}

impl YouTubeExtractor {
    pub fn new(ytdlp: PathBuf, cookies: Option<PathBuf>, playlist_limit: usize) -> Self {
        YouTubeExtractor {
            ytdlp,
            cookies,
            playlist_limit,
        }
    }

    // Direct links are played as-is; everything else asks yt-dlp for the
    // best audio stream. Stream URLs expire after a few hours, so this is
    // called right before playback rather than at enqueue time.
    pub async fn stream_url(&self, track: &Track) -> Result<String> {
        if track.is_direct_url {
            return Ok(track.url.clone());
        }

        let mut args = vec![
            "--get-url".to_string(),
            "-f".to_string(),
            "bestaudio/best".to_string(),
            "--no-check-certificate".to_string(),
        ];
        if let Some(cookies) = &self.cookies {
            args.push("--cookies".to_string());
            args.push(cookies.to_string_lossy().into_owned());
        }
        args.push(track.url.clone());

        let stdout = self.run(args).await?;
        let url = stdout.lines().next().unwrap_or("").trim().to_string();
        if url.is_empty() {
            return Err(Error::Extractor("yt-dlp returned empty URL".to_string()));
        }
        Ok(url)
    }

    // Metadata only (--flat-playlist), one JSON object per line
    async fn dump_entries(&self, target: String) -> Result<Vec<Track>> {
        let mut args = vec![
            "--dump-json".to_string(),
            "--flat-playlist".to_string(),
            "--skip-download".to_string(),
            "--playlist-end".to_string(),
            self.playlist_limit.to_string(),
        ];
        if let Some(cookies) = &self.cookies {
            args.push("--cookies".to_string());
            args.push(cookies.to_string_lossy().into_owned());
        }
        args.push(target);

        let stdout = self.run(args).await?;
        let mut tracks = Vec::new();
        for line in stdout.lines().filter(|l| !l.trim().is_empty()) {
            let json: Value = serde_json::from_str(line)?;
            match track_from_json(&json) {
                Some(track) => tracks.push(track),
                None => warn!("Skipping yt-dlp entry without a URL"),
            }
        }
        Ok(tracks)
    }

    // yt-dlp is blocking; keep it off the async workers
    async fn run(&self, args: Vec<String>) -> Result<String> {
        let ytdlp = self.ytdlp.clone();
        debug!(?args, "Running yt-dlp");

        tokio::task::spawn_blocking(move || {
            let output = Command::new(&ytdlp).args(&args).output().map_err(|e| {
                Error::Extractor(format!(
                    "Failed to run {}: {}. Is yt-dlp installed?",
                    ytdlp.display(),
                    e
                ))
            })?;

            if !output.status.success() {
                let error = String::from_utf8_lossy(&output.stderr);
                return Err(Error::Extractor(format!("yt-dlp failed: {}", error.trim())));
            }

            String::from_utf8(output.stdout)
                .map_err(|e| Error::Extractor(format!("Invalid UTF-8 from yt-dlp: {}", e)))
        })
        .await
        .map_err(|e| Error::Extractor(format!("Task join error: {}", e)))?
    }
}

impl TrackResolver for YouTubeExtractor {
    // - direct audio links become a single direct track
    // - YouTube URLs (videos or playlists) are expanded, up to playlist_limit
    // - anything else is a search; the first hit wins
    async fn resolve(&self, query: &str) -> Result<Vec<Track>> {
        let query = normalize_youtube_music_url(query.trim());

        if is_direct_audio_url(&query) {
            let title = query
                .split('?')
                .next()
                .and_then(|path| path.rsplit('/').next())
                .unwrap_or("Direct audio")
                .to_string();
            return Ok(vec![Track::direct(query, title, 0)]);
        }

        let target = if is_youtube_url(&query) {
            query
        } else {
            format!("ytsearch1:{}", query)
        };
        let tracks = self.dump_entries(target).await?;
        if tracks.is_empty() {
            return Err(Error::Extractor("No results found.".to_string()));
        }
        Ok(tracks)
    }
}

// Builds a queue entry from one yt-dlp JSON object. Flat playlist entries
// only carry `url`/`id`; full entries carry `webpage_url`. Durations may be
// floats or missing.
pub fn track_from_json(json: &Value) -> Option<Track> {
    let url = json["webpage_url"]
        .as_str()
        .or_else(|| json["url"].as_str())
        .map(str::to_string)
        .or_else(|| {
            json["id"]
                .as_str()
                .map(|id| format!("https://www.youtube.com/watch?v={}", id))
        })?;

    let channel = json["uploader"]
        .as_str()
        .or_else(|| json["channel"].as_str())
        .unwrap_or("Unknown");

    Some(Track::new(
        url,
        json["title"].as_str().unwrap_or("Unknown").to_string(),
        json["duration"].as_f64().map(|d| d.max(0.0) as u64).unwrap_or(0),
        channel.to_string(),
    ))
}

// ==========================================
// URL HELPERS
// ==========================================
// YouTube Music share links carry radio/playlist/tracking parameters that
// make yt-dlp expand a whole mix. Watch URLs lose `list=...` and everything
// after it; all URLs lose `start_radio=1` and `si=...` (to the end); the
// music host becomes the regular one.
pub fn normalize_youtube_music_url(url: &str) -> String {
    let mut url = url.to_string();
    if url.contains("watch") {
        url = strip_param_to_end(&url, "list=");
    }
    url = strip_param(&url, "start_radio=1");
    url = strip_param_to_end(&url, "si=");
    url.replace("music.youtube.com", "www.youtube.com")
}

// Cuts from the first `?name` / `&name` to the end of the string
fn strip_param_to_end(url: &str, name: &str) -> String {
    for sep in ['?', '&'] {
        if let Some(pos) = url.find(&format!("{}{}", sep, name)) {
            return url[..pos].to_string();
        }
    }
    url.to_string()
}

// Removes every `?param` / `&param` occurrence
fn strip_param(url: &str, param: &str) -> String {
    url.replace(&format!("?{}", param), "")
        .replace(&format!("&{}", param), "")
}

pub fn is_youtube_url(url: &str) -> bool {
    ["youtube.com/", "youtu.be/", "youtube-nocookie.com/"]
        .iter()
        .any(|host| url.contains(host))
}

pub fn is_direct_audio_url(url: &str) -> bool {
    if !(url.starts_with("http://") || url.starts_with("https://")) {
        return false;
    }
    let path = url.split('?').next().unwrap_or(url).to_ascii_lowercase();
    AUDIO_EXTENSIONS.iter().any(|ext| path.ends_with(ext))
}
