//! Tracker persistence
//!
//! A tracker store persists conversations keyed by sender id. Trackers are
//! stored as the JSON dict form of their dialogue; every newly appended
//! event is streamed to the configured event broker before the tracker is
//! written.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::constants::ACTION_LISTEN_NAME;
use crate::domain::Domain;
use crate::error::{DialogueError, Result};
use crate::events::{Dialogue, Event};
use crate::tracker::DialogueStateTracker;

pub mod broker;

pub use broker::{EventBroker, InMemoryEventBroker};

/// Serialize a tracker to its stored representation: the JSON dict form of
/// its dialogue.
pub fn serialise_tracker(tracker: &DialogueStateTracker) -> Result<String> {
    let dict = tracker.as_dialogue().as_dict();
    serde_json::to_string(&dict).map_err(DialogueError::from)
}

/// Stores and retrieves conversation trackers.
///
/// Implementations provide the raw `save`/`retrieve`/`keys` primitives; the
/// provided methods build the shared behavior on top (tracker creation,
/// event streaming, deserialization with legacy-format detection).
#[async_trait]
pub trait TrackerStore: Send + Sync {
    fn domain(&self) -> &Domain;

    fn event_broker(&self) -> Option<&dyn EventBroker>;

    /// Persist the tracker, streaming new events to the broker first.
    async fn save(&self, tracker: &DialogueStateTracker) -> Result<()>;

    /// The stored tracker for this sender, if any.
    async fn retrieve(&self, sender_id: &str) -> Result<Option<DialogueStateTracker>>;

    /// All sender ids with a stored tracker.
    async fn keys(&self) -> Result<Vec<String>>;

    /// The complete history of a conversation. Stores that truncate on
    /// retrieval override this; the default is plain `retrieve`.
    async fn retrieve_full_tracker(
        &self,
        sender_id: &str,
    ) -> Result<Option<DialogueStateTracker>> {
        self.retrieve(sender_id).await
    }

    async fn exists(&self, sender_id: &str) -> Result<bool> {
        Ok(self.retrieve(sender_id).await?.is_some())
    }

    /// An empty tracker seeded with the domain's slot schema.
    fn init_tracker(&self, sender_id: &str) -> DialogueStateTracker {
        DialogueStateTracker::from_domain(sender_id, self.domain(), None)
    }

    /// Retrieve the sender's tracker, creating and persisting a fresh one
    /// with an opened session and an initial listen if none exists.
    async fn get_or_create_tracker(&self, sender_id: &str) -> Result<DialogueStateTracker> {
        if let Some(tracker) = self.retrieve(sender_id).await? {
            return Ok(tracker);
        }

        debug!(sender_id, "no tracker found, creating a new one");
        let mut tracker = self.init_tracker(sender_id);
        tracker.update(Event::session_started());
        tracker.update(Event::action(ACTION_LISTEN_NAME));
        self.save(&tracker).await?;
        Ok(tracker)
    }

    /// How many events of this sender are already persisted. Used as the
    /// streaming offset so each event is published exactly once.
    async fn number_of_existing_events(&self, sender_id: &str) -> Result<usize> {
        Ok(self
            .retrieve(sender_id)
            .await?
            .map(|tracker| tracker.events().len())
            .unwrap_or(0))
    }

    /// Publish every event past the stored offset to the broker, as the
    /// event's dict form extended with the sender id.
    async fn stream_events(&self, tracker: &DialogueStateTracker) -> Result<()> {
        let Some(broker) = self.event_broker() else {
            return Ok(());
        };

        let offset = self.number_of_existing_events(tracker.sender_id()).await?;
        for event in tracker.events().iter().skip(offset) {
            let mut body = json!({ "sender_id": tracker.sender_id() });
            if let (Value::Object(body_map), Value::Object(event_map)) =
                (&mut body, event.as_dict())
            {
                body_map.extend(event_map);
            }
            broker.publish(body).await?;
        }
        Ok(())
    }

    /// Rebuild a tracker from its stored bytes.
    ///
    /// Pre-JSON deployments stored Python pickles; those cannot be read
    /// anymore and surface as a distinct error so callers can migrate.
    fn deserialise_tracker(
        &self,
        sender_id: &str,
        serialized: &[u8],
    ) -> Result<DialogueStateTracker> {
        let Ok(text) = std::str::from_utf8(serialized) else {
            warn!(
                sender_id,
                "found pickled tracker data; the pickle serialization is \
                 deprecated and can no longer be read, re-create the tracker \
                 from its event export"
            );
            return Err(DialogueError::LegacyTrackerFormat {
                sender_id: sender_id.to_string(),
            });
        };

        let parameters: Value = serde_json::from_str(text)?;
        let dialogue = Dialogue::from_parameters(&parameters)?;

        let mut tracker = self.init_tracker(sender_id);
        tracker.recreate_from_dialogue(dialogue);
        Ok(tracker)
    }
}

/// Tracker store backed by a process-local map. The default when no
/// endpoint is configured.
pub struct InMemoryTrackerStore {
    domain: Domain,
    event_broker: Option<Arc<dyn EventBroker>>,
    store: Arc<RwLock<HashMap<String, String>>>,
    locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl InMemoryTrackerStore {
    pub fn new(domain: Domain, event_broker: Option<Arc<dyn EventBroker>>) -> Self {
        Self {
            domain,
            event_broker,
            store: Arc::new(RwLock::new(HashMap::new())),
            locks: Mutex::new(HashMap::new()),
        }
    }

    /// Advisory per-sender lock. Callers hold it across a
    /// retrieve/update/save sequence to serialize concurrent processing of
    /// the same conversation.
    pub fn lock_for_sender(&self, sender_id: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = match self.locks.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        locks
            .entry(sender_id.to_string())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }
}

#[async_trait]
impl TrackerStore for InMemoryTrackerStore {
    fn domain(&self) -> &Domain {
        &self.domain
    }

    fn event_broker(&self) -> Option<&dyn EventBroker> {
        self.event_broker.as_deref()
    }

    async fn save(&self, tracker: &DialogueStateTracker) -> Result<()> {
        self.stream_events(tracker).await?;

        let serialized = serialise_tracker(tracker)?;
        self.store
            .write()
            .await
            .insert(tracker.sender_id().to_string(), serialized);
        Ok(())
    }

    async fn retrieve(&self, sender_id: &str) -> Result<Option<DialogueStateTracker>> {
        let stored = self.store.read().await.get(sender_id).cloned();
        match stored {
            Some(serialized) => self
                .deserialise_tracker(sender_id, serialized.as_bytes())
                .map(Some),
            None => {
                debug!(sender_id, "could not find tracker");
                Ok(None)
            }
        }
    }

    async fn keys(&self) -> Result<Vec<String>> {
        let mut keys: Vec<String> = self.store.read().await.keys().cloned().collect();
        keys.sort();
        Ok(keys)
    }
}

/// Connection settings for an external tracker store.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct EndpointConfig {
    #[serde(rename = "type", default)]
    pub store_type: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub params: HashMap<String, Value>,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    /// `(username, password)` pair for basic auth.
    #[serde(default)]
    pub basic_auth: Option<(String, String)>,
    #[serde(default)]
    pub token: Option<String>,
}

/// Create the tracker store named by the endpoint configuration. No
/// configuration, or an in-memory type, yields the process-local store;
/// unknown types are a connection error rather than a silent fallback.
pub fn create_tracker_store(
    config: Option<&EndpointConfig>,
    domain: Domain,
    event_broker: Option<Arc<dyn EventBroker>>,
) -> Result<Arc<dyn TrackerStore>> {
    let store_type = config
        .and_then(|config| config.store_type.as_deref())
        .unwrap_or("in_memory");

    match store_type {
        "in_memory" | "memory" => Ok(Arc::new(InMemoryTrackerStore::new(domain, event_broker))),
        other => Err(DialogueError::Connection(format!(
            "unknown tracker store type '{other}'"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::IntentPrediction;

    fn store() -> InMemoryTrackerStore {
        InMemoryTrackerStore::new(Domain::empty(), None)
    }

    #[tokio::test]
    async fn test_retrieve_of_unknown_sender_is_none() {
        assert!(store().retrieve("nobody").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_save_then_retrieve_round_trips_events() {
        let store = store();
        let mut tracker = store.init_tracker("sender-1");
        tracker.update(Event::action(ACTION_LISTEN_NAME));
        tracker.update(Event::user(
            "hello",
            IntentPrediction::new("greet", 1.0),
            vec![],
        ));
        store.save(&tracker).await.unwrap();

        let restored = store.retrieve("sender-1").await.unwrap().unwrap();
        assert_eq!(restored.events(), tracker.events());
        assert_eq!(restored.latest_message(), tracker.latest_message());
    }

    #[tokio::test]
    async fn test_get_or_create_seeds_session_start() {
        let store = store();
        let tracker = store.get_or_create_tracker("sender-1").await.unwrap();

        let types: Vec<&str> = tracker.events().iter().map(Event::type_name).collect();
        assert_eq!(types, vec!["session_started", "action"]);
        assert!(store.exists("sender-1").await.unwrap());
    }

    #[tokio::test]
    async fn test_pickled_tracker_data_is_rejected() {
        let store = store();
        let result = store.deserialise_tracker("sender-1", &[0x80, 0x04, 0x95]);

        assert!(matches!(
            result,
            Err(DialogueError::LegacyTrackerFormat { .. })
        ));
    }

    #[tokio::test]
    async fn test_unknown_store_type_is_a_connection_error() {
        let config = EndpointConfig {
            store_type: Some("carrier_pigeon".to_string()),
            ..EndpointConfig::default()
        };
        let result = create_tracker_store(Some(&config), Domain::empty(), None);

        assert!(matches!(result, Err(DialogueError::Connection(_))));
    }
}
