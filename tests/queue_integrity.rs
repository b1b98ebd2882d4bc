//! Queue integrity under concurrent mutation
//!
//! The playback loop (dequeue_head) and a dashboard (remove_at) work on the
//! same session at the same time. Every entry must come out exactly once,
//! and a reader polling the records on disk must never see a torn file or
//! a state stitched together from two different saves.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use youtube_music_bot::persistence::store::SnapshotStore;
use youtube_music_bot::player::queue::Track;
use youtube_music_bot::player::session::{Session, SessionKey};
use youtube_music_bot::Error;

fn track(i: usize) -> Track {
    Track::new(
        format!("https://www.youtube.com/watch?v=track{:03}", i),
        format!("Track {}", i),
        120,
        "Integrity".to_string(),
    )
}

async fn session_with(dir: &tempfile::TempDir, key: &str, count: usize) -> Arc<Session> {
    let store = Arc::new(SnapshotStore::open(dir.path()).unwrap());
    let session = Session::restore(SessionKey::new(key).unwrap(), store).await;
    session.enqueue_all((0..count).map(track).collect()).await;
    session
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_remove_and_dequeue_never_duplicate_or_skip() {
    const N: usize = 200;
    let dir = tempfile::tempdir().unwrap();
    let session = session_with(&dir, "race", N).await;

    let player = {
        let session = Arc::clone(&session);
        tokio::spawn(async move {
            let mut taken = Vec::new();
            while let Some(track) = session.dequeue_head().await {
                taken.push(track.url);
                tokio::task::yield_now().await;
            }
            taken
        })
    };

    let dashboard = {
        let session = Arc::clone(&session);
        tokio::spawn(async move {
            let mut rng = StdRng::seed_from_u64(0x5eed);
            let mut removed = Vec::new();
            let mut rejected = 0;
            loop {
                let len = session.len().await;
                if len == 0 {
                    break;
                }
                // Deliberately overshoot sometimes: the view is stale by design
                let index = rng.gen_range(-1..len as i64 + 2);
                match session.remove_at(index).await {
                    Ok(track) => removed.push(track.url),
                    Err(Error::OutOfRange { .. }) => rejected += 1,
                    Err(e) => panic!("unexpected error: {}", e),
                }
                tokio::task::yield_now().await;
            }
            (removed, rejected)
        })
    };

    let taken = player.await.unwrap();
    let (removed, rejected) = dashboard.await.unwrap();
    assert!(rejected > 0);

    let mut seen = HashSet::new();
    for url in taken.iter().chain(removed.iter()) {
        assert!(seen.insert(url.clone()), "{} came out twice", url);
    }
    let expected: HashSet<_> = (0..N).map(|i| track(i).url).collect();
    assert_eq!(seen, expected, "some entries were skipped");

    // The last save wins on disk: nothing left
    let on_disk = SnapshotStore::new(dir.path()).load(session.key());
    assert!(on_disk.songs.is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn dequeue_order_is_preserved_under_concurrent_removal() {
    const N: usize = 100;
    let dir = tempfile::tempdir().unwrap();
    let session = session_with(&dir, "order", N).await;

    let remover = {
        let session = Arc::clone(&session);
        tokio::spawn(async move {
            for _ in 0..N / 4 {
                let len = session.len().await;
                if len > 1 {
                    let _ = session.remove_at(len as i64 - 1).await;
                }
                tokio::task::yield_now().await;
            }
        })
    };

    let mut taken = Vec::new();
    while let Some(track) = session.dequeue_head().await {
        taken.push(track.title);
        tokio::task::yield_now().await;
    }
    remover.await.unwrap();

    // Whatever the interleaving, the head always came out in queue order
    let positions: Vec<usize> = taken
        .iter()
        .map(|title| title.trim_start_matches("Track ").parse().unwrap())
        .collect();
    assert!(positions.windows(2).all(|w| w[0] < w[1]));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn readers_never_see_a_partial_record() {
    let dir = tempfile::tempdir().unwrap();
    let session = session_with(&dir, "reader", 20).await;
    let store = SnapshotStore::new(dir.path());
    let queue_file = store.queue_path(session.key());
    let playback_file = store.playback_path(session.key());

    let done = Arc::new(AtomicBool::new(false));
    let reads = Arc::new(AtomicUsize::new(0));
    let reader = {
        let done = Arc::clone(&done);
        let reads = Arc::clone(&reads);
        tokio::task::spawn_blocking(move || {
            while !done.load(Ordering::Acquire) {
                if let Ok(data) = std::fs::read_to_string(&queue_file) {
                    serde_json::from_str::<Vec<serde_json::Value>>(&data)
                        .unwrap_or_else(|e| panic!("torn queue record {:?}: {}", data, e));
                }
                if let Ok(data) = std::fs::read_to_string(&playback_file) {
                    serde_json::from_str::<serde_json::Value>(&data)
                        .unwrap_or_else(|e| panic!("torn playback record {:?}: {}", data, e));
                }
                reads.fetch_add(1, Ordering::AcqRel);
            }
        })
    };

    while reads.load(Ordering::Acquire) == 0 {
        tokio::task::yield_now().await;
    }

    for round in 0..50 {
        session.enqueue(track(100 + round)).await;
        if let Ok(Some(_)) = session.advance().await {
            session.finish().await;
        }
    }
    done.store(true, Ordering::Release);

    reader.await.unwrap();
    assert!(reads.load(Ordering::Acquire) > 1);
}

fn track_number(track: &Track) -> usize {
    track.title.trim_start_matches("Track ").parse().unwrap()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn loaded_snapshots_never_mix_two_saves() {
    const N: usize = 300;
    let dir = tempfile::tempdir().unwrap();
    let session = session_with(&dir, "consistent", N).await;
    let store = SnapshotStore::new(dir.path());
    let key = session.key().clone();

    let done = Arc::new(AtomicBool::new(false));
    let reads = Arc::new(AtomicUsize::new(0));
    let reader = {
        let done = Arc::clone(&done);
        let reads = Arc::clone(&reads);
        tokio::task::spawn_blocking(move || {
            while !done.load(Ordering::Acquire) {
                let snapshot = store.load(&key);
                // current, next, then the queue: always a run of consecutive tracks
                let order: Vec<usize> = snapshot
                    .currently_playing
                    .iter()
                    .map(|playing| track_number(&playing.track))
                    .chain(snapshot.next_song.iter().map(track_number))
                    .chain(snapshot.songs.iter().map(track_number))
                    .collect();
                assert!(
                    order.windows(2).all(|w| w[1] == w[0] + 1),
                    "inconsistent snapshot: {:?}",
                    &order[..order.len().min(6)]
                );
                reads.fetch_add(1, Ordering::AcqRel);
            }
        })
    };

    while reads.load(Ordering::Acquire) == 0 {
        tokio::task::yield_now().await;
    }

    while session.advance().await.unwrap().is_some() {
        session.finish().await;
    }
    done.store(true, Ordering::Release);

    reader.await.unwrap();
    assert!(session.snapshot().await.is_empty());
}
