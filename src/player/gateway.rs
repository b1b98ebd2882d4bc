// ==========================================
// MUTATION GATEWAY
// ==========================================
// The only way for something outside the playback loop (a dashboard, a chat
// command) to change a session. Requests are validated against the live
// session at the moment they are applied. A mutation has completed once the
// session has saved the new snapshot and touched the change marker, which
// happens before the session call returns.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{Error, Result};
use crate::player::queue::Track;
use crate::player::session::{SessionKey, SessionRegistry};
use crate::youtube::extractor::TrackResolver;

// One externally submitted request, e.g. {"action": "delete", "index": 2}
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "lowercase")]
pub enum Request {
    // Zero-based position in the queue (the look-ahead is not addressable)
    Delete { index: i64 },
    Enqueue { query: String },
    Skip,
    Shuffle,
    Clear,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Response {
    Ok {
        message: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        removed: Option<Track>,
    },
    OutOfRange {
        index: i64,
        len: usize,
    },
    // Malformed request, nothing was attempted
    Invalid {
        reason: String,
    },
    // Well-formed request that could not be carried out
    Failed {
        reason: String,
    },
}

impl Response {
    fn ok(message: impl Into<String>) -> Self {
        Response::Ok {
            message: message.into(),
            removed: None,
        }
    }
}

pub struct MutationGateway<R> {
    registry: Arc<SessionRegistry>,
    resolver: R,
}

impl<R: TrackResolver> MutationGateway<R> {
    pub fn new(registry: Arc<SessionRegistry>, resolver: R) -> Self {
        MutationGateway { registry, resolver }
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    // Fails with OutOfRange when the index is negative or no longer inside
    // the live queue; the queue is untouched in that case.
    pub async fn delete_at(&self, key: &SessionKey, index: i64) -> Result<Track> {
        let session = self.registry.get_or_restore(key).await;
        let removed = session.remove_at(index).await?;
        info!(session = %key, index, title = %removed.title, "Removed queue entry");
        Ok(removed)
    }

    pub async fn apply(&self, key: &SessionKey, request: Request) -> Response {
        let session = self.registry.get_or_restore(key).await;

        match request {
            Request::Delete { index } => match self.delete_at(key, index).await {
                Ok(track) => Response::Ok {
                    message: format!("Removed {} from the queue.", track.title),
                    removed: Some(track),
                },
                Err(Error::OutOfRange { index, len }) => {
                    warn!(session = %key, index, len, "Rejected stale delete request");
                    Response::OutOfRange { index, len }
                }
                Err(e) => Response::Failed {
                    reason: e.to_string(),
                },
            },

            Request::Enqueue { query } => {
                if query.trim().is_empty() {
                    return Response::Invalid {
                        reason: "empty query".to_string(),
                    };
                }
                // Resolution can take seconds; no session lock is held here
                match self.resolver.resolve(&query).await {
                    Ok(tracks) => {
                        let message = match tracks.as_slice() {
                            [track] => {
                                format!("Added to queue: {} {}", track.title, track.duration_label())
                            }
                            many => format!("Added {} tracks to the queue.", many.len()),
                        };
                        session.enqueue_all(tracks).await;
                        Response::ok(message)
                    }
                    Err(e) => {
                        warn!(session = %key, %query, "Could not resolve query: {}", e);
                        Response::Failed {
                            reason: e.to_string(),
                        }
                    }
                }
            }

            Request::Skip => {
                if session.skip().await {
                    Response::ok("Skipping the current song...")
                } else {
                    Response::ok("There is no song playing right now.")
                }
            }

            Request::Shuffle => {
                let snapshot = session.snapshot().await;
                if snapshot.songs.is_empty() && snapshot.next_song.is_none() {
                    return Response::ok("The queue is currently empty.");
                }
                session.shuffle().await;
                Response::ok("The queue has been shuffled.")
            }

            Request::Clear => {
                session.clear().await;
                Response::ok("The queue has been cleared and the current song has been stopped.")
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::persistence::store::SnapshotStore;

    // Resolves "a,b,c" into tracks a, b and c; "fail" into an error
    pub(crate) struct CannedResolver;

    impl TrackResolver for CannedResolver {
        async fn resolve(&self, query: &str) -> Result<Vec<Track>> {
            if query == "fail" {
                return Err(Error::Extractor("No results found.".to_string()));
            }
            Ok(query
                .split(',')
                .map(|title| {
                    Track::new(
                        format!("https://youtu.be/{}", title),
                        title.to_string(),
                        60,
                        "Canned".to_string(),
                    )
                })
                .collect())
        }
    }

    fn gateway(dir: &tempfile::TempDir) -> MutationGateway<CannedResolver> {
        let store = Arc::new(SnapshotStore::open(dir.path()).unwrap());
        MutationGateway::new(Arc::new(SessionRegistry::new(store)), CannedResolver)
    }

    fn key() -> SessionKey {
        SessionKey::new("99").unwrap()
    }

    async fn titles(gateway: &MutationGateway<CannedResolver>) -> Vec<String> {
        let session = gateway.registry().get_or_restore(&key()).await;
        session
            .snapshot()
            .await
            .songs
            .into_iter()
            .map(|t| t.title)
            .collect()
    }

    #[tokio::test]
    async fn delete_saves_and_signals() {
        let dir = tempfile::tempdir().unwrap();
        let gateway = gateway(&dir);
        gateway
            .apply(&key(), Request::Enqueue { query: "A,B,C".to_string() })
            .await;

        let session = gateway.registry().get_or_restore(&key()).await;
        let mut changes = session.notifier().subscribe();
        let _ = changes.borrow_and_update();

        let removed = gateway.delete_at(&key(), 1).await.unwrap();
        assert_eq!(removed.title, "B");
        assert!(changes.has_changed().unwrap());

        let on_disk = gateway.registry().store().load(&key());
        let titles_on_disk: Vec<_> = on_disk.songs.iter().map(|t| t.title.as_str()).collect();
        assert_eq!(titles_on_disk, vec!["A", "C"]);
    }

    #[tokio::test]
    async fn out_of_range_delete_changes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let gateway = gateway(&dir);
        gateway
            .apply(&key(), Request::Enqueue { query: "A,B,C".to_string() })
            .await;

        assert_eq!(
            gateway.apply(&key(), Request::Delete { index: 5 }).await,
            Response::OutOfRange { index: 5, len: 3 }
        );
        assert_eq!(
            gateway.apply(&key(), Request::Delete { index: -2 }).await,
            Response::OutOfRange { index: -2, len: 3 }
        );
        assert_eq!(titles(&gateway).await, vec!["A", "B", "C"]);
    }

    // The dashboard saw [A, B, C] and asks to delete index 2, but the loop
    // has consumed A meanwhile: index 2 no longer exists.
    #[tokio::test]
    async fn stale_index_is_rejected_not_misapplied() {
        let dir = tempfile::tempdir().unwrap();
        let gateway = gateway(&dir);
        gateway
            .apply(&key(), Request::Enqueue { query: "A,B,C".to_string() })
            .await;

        let session = gateway.registry().get_or_restore(&key()).await;
        assert_eq!(session.dequeue_head().await.unwrap().title, "A");

        assert!(matches!(
            gateway.delete_at(&key(), 2).await,
            Err(Error::OutOfRange { index: 2, len: 2 })
        ));
        assert_eq!(titles(&gateway).await, vec!["B", "C"]);
    }

    #[tokio::test]
    async fn enqueue_reports_resolution_failures() {
        let dir = tempfile::tempdir().unwrap();
        let gateway = gateway(&dir);

        assert!(matches!(
            gateway.apply(&key(), Request::Enqueue { query: "fail".to_string() }).await,
            Response::Failed { .. }
        ));
        assert!(matches!(
            gateway.apply(&key(), Request::Enqueue { query: "  ".to_string() }).await,
            Response::Invalid { .. }
        ));
        assert!(titles(&gateway).await.is_empty());

        assert_eq!(
            gateway.apply(&key(), Request::Enqueue { query: "A".to_string() }).await,
            Response::ok("Added to queue: A [1:00]")
        );
    }

    #[tokio::test]
    async fn shuffle_skip_and_clear() {
        let dir = tempfile::tempdir().unwrap();
        let gateway = gateway(&dir);

        assert_eq!(
            gateway.apply(&key(), Request::Shuffle).await,
            Response::ok("The queue is currently empty.")
        );
        assert_eq!(
            gateway.apply(&key(), Request::Skip).await,
            Response::ok("There is no song playing right now.")
        );

        gateway
            .apply(&key(), Request::Enqueue { query: "A,B".to_string() })
            .await;
        assert_eq!(
            gateway.apply(&key(), Request::Shuffle).await,
            Response::ok("The queue has been shuffled.")
        );

        gateway.apply(&key(), Request::Clear).await;
        assert!(titles(&gateway).await.is_empty());
    }

    #[test]
    fn request_and_response_wire_format() {
        let request: Request = serde_json::from_str(r#"{"action": "delete", "index": 3}"#).unwrap();
        assert_eq!(request, Request::Delete { index: 3 });
        let request: Request = serde_json::from_str(r#"{"action": "skip"}"#).unwrap();
        assert_eq!(request, Request::Skip);
        assert!(serde_json::from_str::<Request>(r#"{"action": "explode"}"#).is_err());

        let json = serde_json::to_value(Response::OutOfRange { index: 4, len: 2 }).unwrap();
        assert_eq!(json["status"], "out_of_range");
        assert_eq!(json["len"], 2);
    }
}
