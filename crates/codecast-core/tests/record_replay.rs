//! End-to-end tests: record through a session actor, persist to a file store,
//! reopen the journal, and replay.

use codecast_core::{
    AudioDevice, FileStore, GeneratorDevice, GeneratorKind, ManualClock, Phase, PlayerConfig,
    SessionHandle, SessionOptions, SessionPlayer,
};
use codecast_proto::{EventStore, Position, Selection, SessionId, Snapshot, TimedEvent};
use std::sync::Arc;
use tempfile::TempDir;

async fn record_session(store: Arc<dyn EventStore>, id: &SessionId, edits: &[&str]) -> u64 {
    let clock = ManualClock::new(5_000);
    let options = SessionOptions::new("tester").with_clock(Arc::new(clock.clone()));
    let device: Box<dyn AudioDevice> = Box::new(GeneratorDevice::new(GeneratorKind::Tone, 8_000, 1));
    let session = SessionHandle::open(store, id.clone(), Some(device), options)
        .await
        .unwrap();
    session.ready().await.unwrap();

    session.rename("integration").await.unwrap();
    session.edit(Snapshot::new("# start", "")).await.unwrap();
    session.record().await.unwrap();

    for (i, code) in edits.iter().enumerate() {
        clock.advance(100);
        session
            .edit(Snapshot::new(*code, format!("h{i}")))
            .await
            .unwrap();
        session
            .cursor(Selection::cursor(Position::new(0, code.len() as u32)))
            .await
            .unwrap();
    }

    clock.advance(100);
    let outcome = session.stop().await.unwrap();
    let clip = outcome.clip.wait().await.unwrap();
    assert!(!clip.is_empty());
    assert!(clip.to_data_url().starts_with("data:audio/wav;base64,"));
    session.shutdown().await;
    outcome.done_ms
}

#[tokio::test]
async fn test_recorded_code_replays_in_order_after_reopen() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("store.jsonl");
    let id = SessionId::parse("e2e").unwrap();
    let edits = ["p", "pr", "print(1)", "print(1+1)"];

    {
        let store: Arc<dyn EventStore> = Arc::new(FileStore::open(&path).await.unwrap());
        let done = record_session(store, &id, &edits).await;
        assert_eq!(done, 500);
    }

    let store = FileStore::open(&path).await.unwrap();
    let player = SessionPlayer::load(&store, &id)
        .await
        .unwrap()
        .with_config(PlayerConfig::instant());

    assert_eq!(player.meta().name.as_deref(), Some("integration"));
    assert_eq!(player.meta().owner.as_deref(), Some("tester"));
    assert_eq!(player.meta().done, Some(500));
    assert_eq!(player.code_sequence(), edits.to_vec());
    assert_eq!(player.state_at(0).document.code, "# start");
    assert_eq!(player.state_at(250).document.code, "pr");

    let mut offsets = Vec::new();
    let mut kinds = Vec::new();
    player
        .play(|event| {
            offsets.push(event.offset_ms());
            kinds.push(matches!(event, TimedEvent::Code { .. }));
        })
        .await;
    assert!(offsets.windows(2).all(|w| w[0] <= w[1]));
    assert_eq!(kinds, vec![true, false, true, false, true, false, true, false]);
}

#[tokio::test]
async fn test_reopened_recording_is_read_only() {
    let dir = TempDir::new().unwrap();
    let store: Arc<dyn EventStore> =
        Arc::new(FileStore::open(dir.path().join("store.jsonl")).await.unwrap());
    let id = SessionId::parse("done-once").unwrap();
    record_session(Arc::clone(&store), &id, &["x"]).await;

    let session = SessionHandle::open(store, id, None, SessionOptions::new("viewer"))
        .await
        .unwrap();
    assert_eq!(session.state().phase, Phase::Stopped);
    assert!(session.edit(Snapshot::new("y", "")).await.is_err());
    assert!(session.record().await.is_err());
    session.shutdown().await;
}
