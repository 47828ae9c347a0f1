//! Broadcaster lifecycle tests against a real directory.

use std::fs;
use std::sync::Arc;
use std::time::Duration;

use donna_files::{FileWatchBroadcaster, Subscription, WatchConfig};
use donna_protocol::FileWatchMessage;
use tempfile::TempDir;
use tokio::time::timeout;

const EVENT_WAIT: Duration = Duration::from_secs(5);
const QUIET_WAIT: Duration = Duration::from_millis(400);

fn broadcaster(dir: &TempDir) -> Arc<FileWatchBroadcaster> {
    Arc::new(FileWatchBroadcaster::new(dir.path(), &WatchConfig::default()))
}

async fn next(sub: &mut Subscription) -> FileWatchMessage {
    timeout(EVENT_WAIT, sub.recv())
        .await
        .expect("timed out waiting for file watch message")
        .expect("subscription closed")
}

async fn expect_connected(sub: &mut Subscription) {
    assert!(matches!(next(sub).await, FileWatchMessage::Connected { .. }));
}

async fn expect_quiet(sub: &mut Subscription) {
    if let Ok(Some(message)) = timeout(QUIET_WAIT, sub.recv()).await {
        panic!("unexpected extra message: {message:?}");
    }
}

#[tokio::test]
async fn test_connected_ack_goes_to_new_subscriber_only() {
    let dir = TempDir::new().unwrap();
    let broadcaster = broadcaster(&dir);

    let mut first = broadcaster.subscribe().await.unwrap();
    match next(&mut first).await {
        FileWatchMessage::Connected { watching } => {
            assert_eq!(watching, broadcaster.root().display().to_string());
        }
        other => panic!("expected connected, got {other:?}"),
    }

    let mut second = broadcaster.subscribe().await.unwrap();
    expect_connected(&mut second).await;
    expect_quiet(&mut first).await;

    broadcaster.unsubscribe(first.id()).await;
    broadcaster.unsubscribe(second.id()).await;
}

#[tokio::test]
async fn test_watcher_runs_while_any_subscriber_remains() {
    let dir = TempDir::new().unwrap();
    let broadcaster = broadcaster(&dir);
    assert!(!broadcaster.is_running().await);

    let a = broadcaster.subscribe().await.unwrap();
    let b = broadcaster.subscribe().await.unwrap();
    let c = broadcaster.subscribe().await.unwrap();
    assert!(broadcaster.is_running().await);
    assert_eq!(broadcaster.subscriber_count(), 3);

    broadcaster.unsubscribe(a.id()).await;
    broadcaster.unsubscribe(b.id()).await;
    assert!(broadcaster.is_running().await);

    broadcaster.unsubscribe(c.id()).await;
    assert!(!broadcaster.is_running().await);
    assert_eq!(broadcaster.subscriber_count(), 0);

    // Unsubscribing twice is harmless.
    broadcaster.unsubscribe(c.id()).await;
    assert!(!broadcaster.is_running().await);
}

#[tokio::test]
async fn test_restart_delivers_each_event_once() {
    let dir = TempDir::new().unwrap();
    fs::write(dir.path().join("plan.md"), "# plan\n").unwrap();
    let broadcaster = broadcaster(&dir);

    let first = broadcaster.subscribe().await.unwrap();
    broadcaster.unsubscribe(first.id()).await;
    assert!(!broadcaster.is_running().await);

    let mut second = broadcaster.subscribe().await.unwrap();
    expect_connected(&mut second).await;

    fs::remove_file(dir.path().join("plan.md")).unwrap();
    assert_eq!(
        next(&mut second).await,
        FileWatchMessage::FileDeleted {
            path: "plan.md".to_string()
        }
    );
    expect_quiet(&mut second).await;

    broadcaster.unsubscribe(second.id()).await;
}

#[tokio::test]
async fn test_rename_is_delete_then_create_for_every_subscriber() {
    let dir = TempDir::new().unwrap();
    fs::write(dir.path().join("a.md"), "hello\n").unwrap();
    let broadcaster = broadcaster(&dir);

    let mut one = broadcaster.subscribe().await.unwrap();
    let mut two = broadcaster.subscribe().await.unwrap();
    expect_connected(&mut one).await;
    expect_connected(&mut two).await;

    fs::rename(dir.path().join("a.md"), dir.path().join("b.md")).unwrap();

    for sub in [&mut one, &mut two] {
        assert_eq!(
            next(sub).await,
            FileWatchMessage::FileDeleted {
                path: "a.md".to_string()
            }
        );
        assert_eq!(
            next(sub).await,
            FileWatchMessage::FileCreated {
                path: "b.md".to_string()
            }
        );
        expect_quiet(sub).await;
    }

    broadcaster.unsubscribe(one.id()).await;
    broadcaster.unsubscribe(two.id()).await;
}

#[tokio::test]
async fn test_hidden_and_non_document_files_are_filtered() {
    let dir = TempDir::new().unwrap();
    fs::create_dir(dir.path().join(".obsidian")).unwrap();
    let broadcaster = broadcaster(&dir);

    let mut sub = broadcaster.subscribe().await.unwrap();
    expect_connected(&mut sub).await;

    fs::write(dir.path().join(".hidden.md"), "x").unwrap();
    fs::write(dir.path().join(".obsidian").join("workspace.md"), "x").unwrap();
    fs::write(dir.path().join("notes.txt"), "x").unwrap();
    fs::write(dir.path().join("visible.md"), "x").unwrap();

    assert_eq!(
        next(&mut sub).await,
        FileWatchMessage::FileCreated {
            path: "visible.md".to_string()
        }
    );

    broadcaster.unsubscribe(sub.id()).await;
}

#[tokio::test]
async fn test_nested_paths_use_forward_slashes() {
    let dir = TempDir::new().unwrap();
    fs::create_dir_all(dir.path().join("projects").join("garden")).unwrap();
    let broadcaster = broadcaster(&dir);

    let mut sub = broadcaster.subscribe().await.unwrap();
    expect_connected(&mut sub).await;

    fs::write(
        dir.path().join("projects").join("garden").join("seeds.md"),
        "tomatoes\n",
    )
    .unwrap();

    assert_eq!(
        next(&mut sub).await,
        FileWatchMessage::FileCreated {
            path: "projects/garden/seeds.md".to_string()
        }
    );

    broadcaster.unsubscribe(sub.id()).await;
}

#[tokio::test]
async fn test_watcher_stops_when_last_subscriber_is_pruned() {
    let dir = TempDir::new().unwrap();
    let broadcaster = broadcaster(&dir);

    let mut sub = broadcaster.subscribe().await.unwrap();
    expect_connected(&mut sub).await;
    // Dropped without unsubscribing, as a cancelled socket task would.
    drop(sub);
    assert!(broadcaster.is_running().await);

    fs::write(dir.path().join("note.md"), "hello").unwrap();

    let stopped = timeout(EVENT_WAIT, async {
        while broadcaster.is_running().await {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await;
    assert!(stopped.is_ok(), "watcher kept running without subscribers");
    assert_eq!(broadcaster.subscriber_count(), 0);

    // A later subscriber restarts it.
    let mut again = broadcaster.subscribe().await.unwrap();
    expect_connected(&mut again).await;
    assert!(broadcaster.is_running().await);
    broadcaster.unsubscribe(again.id()).await;
    assert!(!broadcaster.is_running().await);
}
