// ==========================================
// REQUEST INBOX
// ==========================================
// File-based channel for processes that share nothing with the bot but
// the data dir (the web dashboard, the `submit` subcommand).
//
// A client writes requests/K/<id>.json (ideally via temp file + rename) and
// waits for responses/K/<id>.json. Requests are picked up in file-name order,
// so ids should sort by submission time. Anything not ending in .json is
// ignored, which covers in-flight temp files.
//
// A request file is deleted before it is applied: after a crash a request is
// at worst lost (the client times out), never applied twice.
//
// An entry that cannot be read or deleted is renamed to <id>.json.rejected
// and answered as invalid, so it cannot hold up the requests behind it.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::Result;
use crate::persistence::write_atomic;
use crate::player::gateway::{MutationGateway, Request, Response};
use crate::player::session::SessionKey;
use crate::youtube::extractor::TrackResolver;

pub struct RequestInbox<R> {
    gateway: Arc<MutationGateway<R>>,
    key: SessionKey,
    requests: PathBuf,
    responses: PathBuf,
    poll_interval: Duration,
}

impl<R: TrackResolver> RequestInbox<R> {
    pub fn new(gateway: Arc<MutationGateway<R>>, key: SessionKey, poll_interval: Duration) -> Self {
        let store = gateway.registry().store();
        let requests = store.requests_dir(&key);
        let responses = store.responses_dir(&key);
        RequestInbox {
            gateway,
            key,
            requests,
            responses,
            poll_interval,
        }
    }

    pub async fn run(self, shutdown: CancellationToken) {
        info!(session = %self.key, dir = %self.requests.display(), "Watching request inbox");
        let mut ticker = tokio::time::interval(self.poll_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    if let Err(e) = self.poll_once().await {
                        warn!(session = %self.key, "Request inbox poll failed: {}", e);
                    }
                }
            }
        }
        debug!(session = %self.key, "Request inbox stopped");
    }

    // Applies every pending request, returns how many were handled
    pub async fn poll_once(&self) -> Result<usize> {
        tokio::fs::create_dir_all(&self.requests).await?;
        tokio::fs::create_dir_all(&self.responses).await?;

        let mut pending = Vec::new();
        let mut entries = tokio::fs::read_dir(&self.requests).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let is_request = path.extension().is_some_and(|ext| ext == "json")
                && !entry.file_name().to_string_lossy().starts_with('.');
            if is_request {
                pending.push(path);
            }
        }
        pending.sort();

        for path in &pending {
            self.handle(path).await;
        }
        Ok(pending.len())
    }

    async fn handle(&self, path: &Path) {
        let response = match take_request(path).await {
            Ok(data) => match serde_json::from_slice::<Request>(&data) {
                Ok(request) => {
                    debug!(session = %self.key, ?request, "Applying inbox request");
                    self.gateway.apply(&self.key, request).await
                }
                Err(e) => {
                    warn!(session = %self.key, path = %path.display(), "Invalid request: {}", e);
                    Response::Invalid {
                        reason: e.to_string(),
                    }
                }
            },
            Err(e) => {
                warn!(session = %self.key, path = %path.display(), "Unreadable request, rejecting it: {}", e);
                reject(path).await;
                Response::Invalid {
                    reason: format!("unreadable request: {}", e),
                }
            }
        };

        if let Err(e) = self.respond(path, &response).await {
            warn!(session = %self.key, path = %path.display(), "Failed to write response: {}", e);
        }
    }

    async fn respond(&self, request: &Path, response: &Response) -> Result<()> {
        let Some(name) = request.file_name() else {
            return Ok(());
        };
        let target = self.responses.join(name);
        let body = serde_json::to_vec_pretty(response)?;
        tokio::task::spawn_blocking(move || write_atomic(&target, &body))
            .await
            .map_err(std::io::Error::other)??;
        Ok(())
    }
}

// Reads the request and removes it. Nothing is applied unless both worked.
async fn take_request(path: &Path) -> std::io::Result<Vec<u8>> {
    let data = tokio::fs::read(path).await?;
    tokio::fs::remove_file(path).await?;
    Ok(data)
}

// Moves a bad entry out of the way; <id>.json.rejected no longer matches
async fn reject(path: &Path) {
    let mut rejected = path.as_os_str().to_owned();
    rejected.push(".rejected");
    if let Err(e) = tokio::fs::rename(path, &rejected).await {
        error!(path = %path.display(), "Failed to set rejected request aside: {}", e);
    }
}
