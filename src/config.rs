// ==========================================
// CONFIGURATION
// ==========================================
// Resolution order, highest first:
//   1. command-line flags (applied by main)
//   2. YMB_* environment variables
//   3. <config_dir>/youtube-music-bot/config.toml (or --config)
//   4. compiled defaults

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use tracing::debug;

use crate::error::{Error, Result};

const APP_DIR: &str = "youtube-music-bot";

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    // Where queue_K.json, currently_playing_K.json and the inbox live
    pub data_dir: PathBuf,
    pub ytdlp_path: PathBuf,
    pub cookies_file: Option<PathBuf>,
    pub player_path: PathBuf,
    pub inbox_poll_ms: u64,
    pub idle_timeout_secs: u64,
    pub playlist_limit: usize,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            data_dir: default_data_dir(),
            ytdlp_path: PathBuf::from("yt-dlp"),
            cookies_file: default_cookies_file(),
            player_path: PathBuf::from("ffplay"),
            inbox_poll_ms: 500,
            idle_timeout_secs: 300,
            playlist_limit: 10,
        }
    }
}

impl Config {
    // An explicit path must exist; the default path is optional
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => match config_file_path() {
                Some(path) if path.exists() => Self::from_file(&path)?,
                _ => Config::default(),
            },
        };
        config.apply_env(|name| std::env::var(name).ok())?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        debug!(path = %path.display(), "Reading config file");
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("Cannot read {}: {}", path.display(), e))
        })?;
        Self::from_toml_str(&content)
            .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| Error::Config(e.to_string()))
    }

    // Takes the lookup as a parameter so tests don't touch the process env
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("YMB_DATA_DIR") {
            self.data_dir = PathBuf::from(v);
        }
        if let Some(v) = lookup("YMB_YTDLP_PATH") {
            self.ytdlp_path = PathBuf::from(v);
        }
        if let Some(v) = lookup("YMB_COOKIES_FILE") {
            self.cookies_file = Some(PathBuf::from(v));
        }
        if let Some(v) = lookup("YMB_PLAYER_PATH") {
            self.player_path = PathBuf::from(v);
        }
        if let Some(v) = lookup("YMB_INBOX_POLL_MS") {
            self.inbox_poll_ms = parse_number("YMB_INBOX_POLL_MS", &v)?;
        }
        if let Some(v) = lookup("YMB_IDLE_TIMEOUT_SECS") {
            self.idle_timeout_secs = parse_number("YMB_IDLE_TIMEOUT_SECS", &v)?;
        }
        if let Some(v) = lookup("YMB_PLAYLIST_LIMIT") {
            self.playlist_limit = parse_number("YMB_PLAYLIST_LIMIT", &v)?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.inbox_poll_ms == 0 {
            return Err(Error::Config("inbox_poll_ms must be greater than 0".to_string()));
        }
        if self.playlist_limit == 0 {
            return Err(Error::Config("playlist_limit must be greater than 0".to_string()));
        }
        Ok(())
    }

    pub fn inbox_poll_interval(&self) -> Duration {
        Duration::from_millis(self.inbox_poll_ms)
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }
}

fn parse_number<T: std::str::FromStr>(name: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| Error::Config(format!("{} is not a valid number: {:?}", name, value)))
}

pub fn config_file_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join(APP_DIR).join("config.toml"))
}

fn default_data_dir() -> PathBuf {
    dirs::data_dir()
        .map(|d| d.join(APP_DIR).join("queues"))
        .unwrap_or_else(|| PathBuf::from("data/queues"))
}

// Exported browser cookies help yt-dlp past age gates and bot checks
fn default_cookies_file() -> Option<PathBuf> {
    dirs::config_dir()
        .map(|d| d.join(APP_DIR).join("cookies.txt"))
        .filter(|path| path.exists())
}
