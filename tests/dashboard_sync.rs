//! End-to-end: a dashboard that only shares the data directory with the bot
//!
//! The bot side runs the playback loop and the request inbox. The dashboard
//! side reads the JSON records, watches the change marker and drops request
//! files, the same way the web dashboard does.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use youtube_music_bot::persistence::inbox::RequestInbox;
use youtube_music_bot::persistence::notifier::MarkerWatcher;
use youtube_music_bot::persistence::store::SnapshotStore;
use youtube_music_bot::persistence::write_atomic;
use youtube_music_bot::player::audio::VoiceOutput;
use youtube_music_bot::player::gateway::MutationGateway;
use youtube_music_bot::player::playback::PlaybackLoop;
use youtube_music_bot::player::queue::Track;
use youtube_music_bot::player::session::{SessionKey, SessionRegistry};
use youtube_music_bot::youtube::extractor::TrackResolver;
use youtube_music_bot::{Error, Result};

/// "A,B" resolves to tracks A and B
struct ListResolver;

impl TrackResolver for ListResolver {
    async fn resolve(&self, query: &str) -> Result<Vec<Track>> {
        if query == "nothing" {
            return Err(Error::Extractor("No results found.".to_string()));
        }
        Ok(query
            .split(',')
            .map(|title| {
                Track::new(
                    format!("https://www.youtube.com/watch?v={}", title),
                    title.to_string(),
                    200,
                    "Dashboard".to_string(),
                )
            })
            .collect())
    }
}

/// Plays each track until it is skipped or the loop shuts down
struct HoldingOutput {
    started: mpsc::UnboundedSender<String>,
}

impl VoiceOutput for HoldingOutput {
    async fn play(&self, track: &Track) -> Result<()> {
        let _ = self.started.send(track.title.clone());
        std::future::pending::<()>().await;
        Ok(())
    }
}

struct Bot {
    shutdown: CancellationToken,
    tasks: Vec<tokio::task::JoinHandle<()>>,
    started: mpsc::UnboundedReceiver<String>,
}

impl Bot {
    async fn start(data_dir: &Path, key: &SessionKey) -> Bot {
        let store = Arc::new(SnapshotStore::open(data_dir).unwrap());
        let registry = Arc::new(SessionRegistry::new(store));
        let gateway = Arc::new(MutationGateway::new(Arc::clone(&registry), ListResolver));
        let session = registry.get_or_restore(key).await;

        let (tx, rx) = mpsc::unbounded_channel();
        let shutdown = CancellationToken::new();
        let inbox = RequestInbox::new(gateway, key.clone(), Duration::from_millis(10));
        let playback = PlaybackLoop::new(
            session,
            HoldingOutput { started: tx },
            Duration::from_secs(300),
        );

        let tasks = vec![
            tokio::spawn(inbox.run(shutdown.clone())),
            tokio::spawn(playback.run(shutdown.clone())),
        ];
        Bot {
            shutdown,
            tasks,
            started: rx,
        }
    }

    async fn next_started(&mut self) -> String {
        tokio::time::timeout(Duration::from_secs(5), self.started.recv())
            .await
            .expect("no track started")
            .expect("playback loop stopped")
    }

    async fn stop(self) {
        self.shutdown.cancel();
        for task in self.tasks {
            task.await.unwrap();
        }
    }
}

/// The dashboard's view of the data directory
struct Dashboard {
    store: SnapshotStore,
    key: SessionKey,
    marker: MarkerWatcher,
    sent: u32,
}

impl Dashboard {
    fn new(data_dir: &Path, key: &SessionKey) -> Dashboard {
        let store = SnapshotStore::new(data_dir);
        let marker = MarkerWatcher::new(store.marker_path(key));
        Dashboard {
            store,
            key: key.clone(),
            marker,
            sent: 0,
        }
    }

    fn read(&self, path: PathBuf) -> Value {
        serde_json::from_str(&std::fs::read_to_string(path).unwrap()).unwrap()
    }

    fn queue_titles(&self) -> Vec<String> {
        self.read(self.store.queue_path(&self.key))
            .as_array()
            .unwrap()
            .iter()
            .map(|t| t["title"].as_str().unwrap().to_string())
            .collect()
    }

    fn playback(&self) -> Value {
        self.read(self.store.playback_path(&self.key))
    }

    async fn send(&mut self, request: Value) -> Value {
        self.sent += 1;
        let name = format!("{:04}.json", self.sent);
        let requests = self.store.requests_dir(&self.key);
        std::fs::create_dir_all(&requests).unwrap();
        write_atomic(&requests.join(&name), request.to_string().as_bytes()).unwrap();

        let reply = self.store.responses_dir(&self.key).join(&name);
        for _ in 0..500 {
            if let Ok(data) = std::fs::read_to_string(&reply) {
                std::fs::remove_file(&reply).unwrap();
                return serde_json::from_str(&data).unwrap();
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("no response to {}", request);
    }
}

#[tokio::test]
async fn dashboard_sees_and_edits_live_state() {
    let dir = tempfile::tempdir().unwrap();
    let key = SessionKey::new("424242").unwrap();
    let mut bot = Bot::start(dir.path(), &key).await;
    let mut dashboard = Dashboard::new(dir.path(), &key);

    let reply = dashboard
        .send(serde_json::json!({"action": "enqueue", "query": "A,B,C,D"}))
        .await;
    assert_eq!(reply["status"], "ok");
    assert_eq!(bot.next_started().await, "A");
    assert!(dashboard.marker.changed());

    // Playing A, B prefetched, C and D waiting
    let playback = dashboard.playback();
    assert_eq!(playback["currently_playing"]["title"], "A");
    assert!(playback["currently_playing"]["start_time"].is_i64());
    assert_eq!(playback["next_song"]["title"], "B");
    assert_eq!(dashboard.queue_titles(), vec!["C", "D"]);

    // Index 0 of the queue record is C
    let reply = dashboard
        .send(serde_json::json!({"action": "delete", "index": 0}))
        .await;
    assert_eq!(reply["removed"]["title"], "C");
    assert_eq!(dashboard.queue_titles(), vec!["D"]);
    assert!(dashboard.marker.changed());

    // A delete computed from an old view is refused
    let reply = dashboard
        .send(serde_json::json!({"action": "delete", "index": 1}))
        .await;
    assert_eq!(reply["status"], "out_of_range");
    assert_eq!(reply["len"], 1);
    assert_eq!(dashboard.queue_titles(), vec!["D"]);

    let reply = dashboard.send(serde_json::json!({"action": "skip"})).await;
    assert_eq!(reply["status"], "ok");
    assert_eq!(bot.next_started().await, "B");
    let playback = dashboard.playback();
    assert_eq!(playback["currently_playing"]["title"], "B");
    assert_eq!(playback["next_song"]["title"], "D");
    assert!(dashboard.queue_titles().is_empty());

    let reply = dashboard
        .send(serde_json::json!({"action": "enqueue", "query": "nothing"}))
        .await;
    assert_eq!(reply["status"], "failed");

    let reply = dashboard.send(serde_json::json!({"action": "clear"})).await;
    assert_eq!(reply["status"], "ok");
    assert_eq!(dashboard.playback(), serde_json::json!({}));
    assert!(dashboard.queue_titles().is_empty());

    bot.stop().await;
}

#[tokio::test]
async fn restart_resumes_the_interrupted_track() {
    let dir = tempfile::tempdir().unwrap();
    let key = SessionKey::new("7").unwrap();

    let mut bot = Bot::start(dir.path(), &key).await;
    let mut dashboard = Dashboard::new(dir.path(), &key);
    dashboard
        .send(serde_json::json!({"action": "enqueue", "query": "A,B,C"}))
        .await;
    assert_eq!(bot.next_started().await, "A");
    bot.stop().await;

    // Nothing lost, nothing duplicated: A starts over, B is prefetched again
    let mut bot = Bot::start(dir.path(), &key).await;
    assert_eq!(bot.next_started().await, "A");
    let playback = dashboard.playback();
    assert_eq!(playback["next_song"]["title"], "B");
    assert_eq!(dashboard.queue_titles(), vec!["C"]);
    bot.stop().await;
}
