use std::sync::Arc;

use dialogue_core::constants::ACTION_LISTEN_NAME;
use dialogue_core::{
    create_tracker_store, Domain, Event, InMemoryEventBroker, InMemoryTrackerStore,
    IntentPrediction, TrackerStore,
};

fn domain() -> Domain {
    Domain::from_yaml(
        r#"
intents: [greet]
slots:
  city:
    type: text
responses:
  utter_greet:
    - text: "Hey there!"
"#,
    )
    .unwrap()
}

#[tokio::test]
async fn test_get_or_create_persists_a_started_session() {
    let store = InMemoryTrackerStore::new(domain(), None);

    let tracker = store.get_or_create_tracker("sender-1").await.unwrap();
    let types: Vec<&str> = tracker.events().iter().map(Event::type_name).collect();
    assert_eq!(types, vec!["session_started", "action"]);

    // A second call returns the stored tracker instead of a new one.
    let again = store.get_or_create_tracker("sender-1").await.unwrap();
    assert_eq!(again.events(), tracker.events());
}

#[tokio::test]
async fn test_saved_tracker_survives_retrieval_with_derived_state() {
    let store = InMemoryTrackerStore::new(domain(), None);
    let mut tracker = store.get_or_create_tracker("sender-1").await.unwrap();
    tracker.update(Event::user("hi", IntentPrediction::new("greet", 1.0), vec![]));
    tracker.update(Event::slot("city", "Berlin"));
    store.save(&tracker).await.unwrap();

    let restored = store.retrieve("sender-1").await.unwrap().unwrap();
    assert_eq!(restored.events(), tracker.events());
    assert_eq!(restored.get_slot("city"), tracker.get_slot("city"));
    assert_eq!(restored.latest_message(), tracker.latest_message());
}

#[tokio::test]
async fn test_each_event_is_streamed_exactly_once() {
    let broker = Arc::new(InMemoryEventBroker::new());
    let store = InMemoryTrackerStore::new(domain(), Some(broker.clone()));

    let mut tracker = store.get_or_create_tracker("sender-1").await.unwrap();
    assert_eq!(broker.published().await.len(), 2);

    tracker.update(Event::user("hi", IntentPrediction::new("greet", 1.0), vec![]));
    store.save(&tracker).await.unwrap();

    let published = broker.published().await;
    assert_eq!(published.len(), 3);
    assert!(published
        .iter()
        .all(|body| body["sender_id"] == "sender-1"));
    assert_eq!(published[0]["event"], "session_started");
    assert_eq!(published[1]["event"], "action");
    assert_eq!(published[1]["action_name"], ACTION_LISTEN_NAME);
    assert_eq!(published[2]["event"], "user");

    // Saving again without new events publishes nothing.
    store.save(&tracker).await.unwrap();
    assert_eq!(broker.published().await.len(), 3);
}

#[tokio::test]
async fn test_keys_lists_stored_senders() {
    let store = InMemoryTrackerStore::new(domain(), None);
    store.get_or_create_tracker("b").await.unwrap();
    store.get_or_create_tracker("a").await.unwrap();

    assert_eq!(store.keys().await.unwrap(), vec!["a", "b"]);
    assert!(store.exists("a").await.unwrap());
    assert!(!store.exists("c").await.unwrap());
}

#[tokio::test]
async fn test_factory_defaults_to_the_in_memory_store() {
    let store = create_tracker_store(None, domain(), None).unwrap();

    assert!(store.keys().await.unwrap().is_empty());
    let tracker = store.get_or_create_tracker("sender-1").await.unwrap();
    assert_eq!(tracker.events().len(), 2);
}

#[tokio::test]
async fn test_sender_lock_serializes_conversation_processing() {
    let store = Arc::new(InMemoryTrackerStore::new(domain(), None));

    let lock = store.lock_for_sender("sender-1");
    let guard = lock.lock().await;

    let same = store.lock_for_sender("sender-1");
    assert!(same.try_lock().is_err());

    let other = store.lock_for_sender("sender-2");
    assert!(other.try_lock().is_ok());

    drop(guard);
    assert!(store.lock_for_sender("sender-1").try_lock().is_ok());
}
