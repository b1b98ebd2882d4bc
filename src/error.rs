// Error types shared by the queue, persistence and extractor layers.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    /// A mutation referenced a queue position that does not exist (anymore).
    /// `index` is signed because remote requests may carry negative values.
    #[error("Queue index {index} out of range (queue length {len})")]
    OutOfRange { index: i64, len: usize },

    /// The playback state machine was driven out of order.
    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("File I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// yt-dlp failed or returned something unusable
    #[error("Extractor error: {0}")]
    Extractor(String),

    #[error("Configuration error: {0}")]
    Config(String),

    /// The voice output could not play a track
    #[error("Playback error: {0}")]
    Playback(String),
}

pub type Result<T> = std::result::Result<T, Error>;
