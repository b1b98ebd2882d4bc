// Main entry point for the YouTube music bot's queue service
//
// serve   runs the playback loop + request inbox for one or more sessions
// submit  drops a request into a session's inbox and waits for the answer
// status  prints a session's persisted state
// watch   re-prints status whenever the change marker moves

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use tokio::signal;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use youtube_music_bot::config::Config;
use youtube_music_bot::persistence::inbox::RequestInbox;
use youtube_music_bot::persistence::notifier::MarkerWatcher;
use youtube_music_bot::persistence::store::SnapshotStore;
use youtube_music_bot::persistence::write_atomic;
use youtube_music_bot::player::audio::{FfplayOutput, SilentOutput};
use youtube_music_bot::player::gateway::{MutationGateway, Request, Response};
use youtube_music_bot::player::playback::PlaybackLoop;
use youtube_music_bot::player::session::{SessionKey, SessionRegistry};
use youtube_music_bot::youtube::extractor::YouTubeExtractor;

#[derive(Parser, Debug)]
#[command(name = "youtube-music-bot")]
#[command(about = "Playback queue service for the YouTube music bot")]
#[command(version)]
struct Cli {
    /// Config file (default: <config dir>/youtube-music-bot/config.toml)
    #[arg(short, long, global = true, env = "YMB_CONFIG")]
    config: Option<PathBuf>,

    /// Directory holding the queue and playback records
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run playback and the request inbox until Ctrl+C
    Serve {
        /// Session key (guild id); repeat for several sessions
        #[arg(long = "session", required = true)]
        sessions: Vec<String>,

        /// Don't play audio, just wait out each track's duration
        #[arg(long)]
        dry_run: bool,
    },

    /// Send a request to a running `serve` and print the reply
    Submit {
        session: String,

        /// Seconds to wait for the reply
        #[arg(long, default_value_t = 10)]
        timeout: u64,

        #[command(subcommand)]
        action: Action,
    },

    /// Print what a session is playing and what is queued
    Status { session: String },

    /// Like status, but re-printed on every change
    Watch {
        session: String,

        /// How often to check the change marker, in milliseconds
        #[arg(long, default_value_t = 500)]
        interval: u64,
    },
}

#[derive(Subcommand, Debug)]
enum Action {
    /// Remove the queue entry at a zero-based index
    Delete {
        #[arg(allow_negative_numbers = true)]
        index: i64,
    },
    /// Search YouTube or add a URL/playlist
    Enqueue {
        #[arg(required = true, num_args = 1..)]
        query: Vec<String>,
    },
    Skip,
    Shuffle,
    Clear,
}

impl From<Action> for Request {
    fn from(action: Action) -> Self {
        match action {
            Action::Delete { index } => Request::Delete { index },
            Action::Enqueue { query } => Request::Enqueue {
                query: query.join(" "),
            },
            Action::Skip => Request::Skip,
            Action::Shuffle => Request::Shuffle,
            Action::Clear => Request::Clear,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Logs go to stderr so status/submit output stays clean on stdout
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "youtube_music_bot=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    let mut config = Config::load(cli.config.as_deref()).context("Failed to load configuration")?;
    if let Some(data_dir) = cli.data_dir {
        config.data_dir = data_dir;
    }

    match cli.command {
        Command::Serve { sessions, dry_run } => serve(config, sessions, dry_run).await,
        Command::Submit {
            session,
            timeout,
            action,
        } => submit(&config, &session, action.into(), Duration::from_secs(timeout)).await,
        Command::Status { session } => status(&config, &session),
        Command::Watch { session, interval } => {
            watch(&config, &session, Duration::from_millis(interval)).await
        }
    }
}

// ==========================================
// SERVE
// ==========================================
async fn serve(config: Config, sessions: Vec<String>, dry_run: bool) -> Result<()> {
    let keys = sessions
        .into_iter()
        .map(SessionKey::new)
        .collect::<youtube_music_bot::Result<Vec<_>>>()?;

    info!(data_dir = %config.data_dir.display(), dry_run, "Starting queue service");
    let store = Arc::new(
        SnapshotStore::open(&config.data_dir).context("Failed to open data directory")?,
    );
    let registry = Arc::new(SessionRegistry::new(store));
    let extractor = Arc::new(YouTubeExtractor::new(
        config.ytdlp_path.clone(),
        config.cookies_file.clone(),
        config.playlist_limit,
    ));
    let gateway = Arc::new(MutationGateway::new(
        Arc::clone(&registry),
        Arc::clone(&extractor),
    ));

    let shutdown = CancellationToken::new();
    let mut tasks = JoinSet::new();

    for key in keys {
        let session = registry.get_or_restore(&key).await;

        let inbox = RequestInbox::new(Arc::clone(&gateway), key, config.inbox_poll_interval());
        tasks.spawn(inbox.run(shutdown.clone()));

        if dry_run {
            let playback = PlaybackLoop::new(session, SilentOutput, config.idle_timeout());
            tasks.spawn(playback.run(shutdown.clone()));
        } else {
            let output = FfplayOutput::new(config.player_path.clone(), Arc::clone(&extractor));
            let playback = PlaybackLoop::new(session, output, config.idle_timeout());
            tasks.spawn(playback.run(shutdown.clone()));
        }
    }

    shutdown_signal().await;
    shutdown.cancel();

    while let Some(result) = tasks.join_next().await {
        if let Err(e) = result {
            error!("Task failed during shutdown: {}", e);
        }
    }
    info!("Shutdown complete");
    Ok(())
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to install signal handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down");
        },
        _ = terminate => {
            info!("Received terminate signal, shutting down");
        },
    }
}

// ==========================================
// CLIENT COMMANDS
// ==========================================
async fn submit(config: &Config, session: &str, request: Request, timeout: Duration) -> Result<()> {
    let key = SessionKey::new(session)?;
    let store = SnapshotStore::new(&config.data_dir);

    // Zero-padded millis keep the inbox's name order equal to submission order
    let name = format!(
        "{:013}-{}.json",
        Utc::now().timestamp_millis(),
        std::process::id()
    );
    let requests = store.requests_dir(&key);
    std::fs::create_dir_all(&requests)
        .with_context(|| format!("Failed to create {}", requests.display()))?;
    write_atomic(&requests.join(&name), &serde_json::to_vec(&request)?)
        .context("Failed to write request")?;

    let reply = store.responses_dir(&key).join(&name);
    let deadline = tokio::time::Instant::now() + timeout;
    let data = loop {
        match tokio::fs::read(&reply).await {
            Ok(data) => break data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e).context("Failed to read response"),
        }
        if tokio::time::Instant::now() >= deadline {
            bail!(
                "No response within {}s. Is `serve --session {}` running?",
                timeout.as_secs(),
                key
            );
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    };
    let _ = tokio::fs::remove_file(&reply).await;

    match serde_json::from_slice::<Response>(&data).context("Malformed response")? {
        Response::Ok { message, .. } => {
            println!("{}", message);
            Ok(())
        }
        Response::OutOfRange { index, len } => {
            bail!("Index {} is out of range, the queue has {} entries", index, len)
        }
        Response::Invalid { reason } => bail!("Invalid request: {}", reason),
        Response::Failed { reason } => bail!("Request failed: {}", reason),
    }
}

fn status(config: &Config, session: &str) -> Result<()> {
    let key = SessionKey::new(session)?;
    let store = SnapshotStore::new(&config.data_dir);
    print_status(&store, &key, config.playlist_limit);
    Ok(())
}

async fn watch(config: &Config, session: &str, interval: Duration) -> Result<()> {
    let key = SessionKey::new(session)?;
    let store = SnapshotStore::new(&config.data_dir);
    let mut watcher = MarkerWatcher::new(store.marker_path(&key));
    watcher.changed();

    print_status(&store, &key, config.playlist_limit);
    let mut ticker = tokio::time::interval(interval);
    loop {
        tokio::select! {
            _ = signal::ctrl_c() => return Ok(()),
            _ = ticker.tick() => {
                // Only re-read the records when the marker moved
                if watcher.changed() {
                    println!("----------------------------------------");
                    print_status(&store, &key, config.playlist_limit);
                }
            }
        }
    }
}

fn print_status(store: &SnapshotStore, key: &SessionKey, limit: usize) {
    let snapshot = store.load(key);
    println!("{}", snapshot.render_status(limit).trim_end());
    if let Some(playing) = &snapshot.currently_playing {
        let elapsed = playing.elapsed_at(Utc::now());
        println!("Elapsed: {}:{:02}", elapsed / 60, elapsed % 60);
    }
}
