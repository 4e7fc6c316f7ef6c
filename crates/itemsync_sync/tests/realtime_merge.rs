use chrono::Utc;
use itemsync_common::{Item, ItemDraft, ItemFilter, ItemPatch};
use itemsync_sync::memory_remote::Broadcast;
use itemsync_sync::resolver::IgnoreReason;
use itemsync_sync::{
    ChannelEvent, InMemoryRemote, LocalStore, RemoteEvent, Resolution, SyncConfig, SyncEngine,
};
use itemsync_test_helpers::logging::suppress_logs;
use std::sync::Arc;
use tokio::sync::broadcast;

fn item(id: i64, text: &str) -> Item {
    Item {
        id,
        text: text.to_string(),
        completed: false,
        version: 1,
        due_date: None,
        user_id: Some(2),
        created_at: Utc::now(),
        updated_at: Utc::now(),
    }
}

async fn connected_engine(remote: &Arc<InMemoryRemote>, connection_id: &str) -> SyncEngine {
    suppress_logs();
    let mut engine =
        SyncEngine::new(SyncConfig::default(), LocalStore::in_memory(), remote.clone());
    engine.set_online(true).await.unwrap();
    engine.refresh(ItemFilter::default(), 1).await.unwrap();
    engine
        .handle_channel_event(ChannelEvent::Authenticated {
            connection_id: connection_id.to_string(),
            user_id: Some(1),
        })
        .unwrap();
    engine
}

/// Deliver every broadcast waiting on `events` to `engine`
fn drain(engine: &mut SyncEngine, events: &mut broadcast::Receiver<Broadcast>) -> Vec<Resolution> {
    let mut resolutions = Vec::new();
    while let Ok(broadcast) = events.try_recv() {
        resolutions.push(engine.apply_remote_event(&broadcast.event).unwrap());
    }
    resolutions
}

#[tokio::test]
async fn test_deleted_event_is_idempotent() {
    let remote = Arc::new(InMemoryRemote::new());
    remote.seed(vec![item(1, "Keep me"), item(5, "Delete me")]);
    let mut engine = connected_engine(&remote, "c-1").await;

    let event = RemoteEvent::deleted(5);
    assert_eq!(engine.apply_remote_event(&event).unwrap(), Resolution::Removed);
    let after_first = engine.items().to_vec();

    assert_eq!(
        engine.apply_remote_event(&event).unwrap(),
        Resolution::Ignored(IgnoreReason::NotInView)
    );
    assert_eq!(engine.items(), after_first.as_slice());
    assert_eq!(engine.store().read_cached_collection(), after_first);
}

#[tokio::test]
async fn test_created_event_never_duplicates() {
    let remote = Arc::new(InMemoryRemote::new());
    remote.seed(vec![item(3, "Already here")]);
    let mut engine = connected_engine(&remote, "c-1").await;

    let event = RemoteEvent::created(item(3, "Already here"));
    assert_eq!(
        engine.apply_remote_event(&event).unwrap(),
        Resolution::Ignored(IgnoreReason::AlreadyPresent)
    );
    assert_eq!(engine.items().iter().filter(|i| i.id == 3).count(), 1);

    let fresh = RemoteEvent::created(item(4, "Brand new"));
    assert_eq!(engine.apply_remote_event(&fresh).unwrap(), Resolution::Inserted);
    assert_eq!(
        engine.apply_remote_event(&fresh).unwrap(),
        Resolution::Ignored(IgnoreReason::AlreadyPresent)
    );
    assert_eq!(engine.items()[0].id, 4);
}

#[tokio::test]
async fn test_peer_changes_flow_and_own_echoes_are_dropped() {
    let remote = Arc::new(InMemoryRemote::new());
    let mut alice = connected_engine(&remote, "alice-1").await;
    let mut bob = connected_engine(&remote, "bob-1").await;
    let mut alice_events = remote.subscribe();
    let mut bob_events = remote.subscribe();

    let created = alice.create(ItemDraft::new("Shared groceries")).await.unwrap();

    assert_eq!(
        drain(&mut alice, &mut alice_events),
        vec![Resolution::Ignored(IgnoreReason::Echo)]
    );
    assert_eq!(drain(&mut bob, &mut bob_events), vec![Resolution::Inserted]);
    assert_eq!(bob.items()[0], created);

    let mut patch = ItemPatch::from_item(&bob.items()[0]);
    patch.completed = true;
    let updated = bob.update(created.id, patch).await.unwrap();

    assert_eq!(
        drain(&mut bob, &mut bob_events),
        vec![Resolution::Ignored(IgnoreReason::Echo)]
    );
    assert_eq!(drain(&mut alice, &mut alice_events), vec![Resolution::Replaced]);
    assert_eq!(alice.items()[0], updated);

    alice.delete(created.id).await.unwrap();
    drain(&mut alice, &mut alice_events);
    assert_eq!(drain(&mut bob, &mut bob_events), vec![Resolution::Removed]);
    assert!(bob.items().is_empty());
}

#[tokio::test]
async fn test_mutations_are_attributed_to_connection() {
    let remote = Arc::new(InMemoryRemote::new());
    let mut engine = connected_engine(&remote, "conn-42").await;
    let mut events = remote.subscribe();

    engine.create(ItemDraft::new("Attributed item")).await.unwrap();
    let broadcast = events.try_recv().unwrap();
    assert_eq!(broadcast.origin.as_deref(), Some("conn-42"));

    engine.handle_channel_event(ChannelEvent::Disconnected).unwrap();
    engine.create(ItemDraft::new("Anonymous item")).await.unwrap();
    let broadcast = events.try_recv().unwrap();
    assert_eq!(broadcast.origin, None);
}

#[tokio::test]
async fn test_confirmed_create_after_echo_keeps_single_entry() {
    let remote = Arc::new(InMemoryRemote::new());
    let mut engine = SyncEngine::new(
        SyncConfig::default(),
        LocalStore::in_memory(),
        remote.clone(),
    );
    let provisional = engine.create(ItemDraft::new("Queued first")).await.unwrap();

    // the server copy shows up through the channel before replay finishes
    let early = RemoteEvent::created(item(1, "Queued first"));
    engine.apply_remote_event(&early).unwrap();
    assert_eq!(engine.items().len(), 2);

    engine.set_online(true).await.unwrap();
    let ids: Vec<i64> = engine.items().iter().map(|i| i.id).collect();
    assert_eq!(ids, vec![1]);
    assert!(!ids.contains(&provisional.id));
}
