//! Conversation events
//!
//! Every mutation of a conversation is recorded as an immutable, timestamped
//! event. The ordered event log is the sole source of truth for a
//! conversation; all tracker state is a replay of it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use tracing::warn;
use uuid::Uuid;

use crate::error::{DialogueError, Result};

/// Free-form metadata attached to an event.
pub type EventMetadata = HashMap<String, Value>;

/// An entity extracted from a user message by the NLU layer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Entity {
    pub entity: String,
    pub value: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group: Option<String>,
}

impl Entity {
    pub fn new(entity: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            entity: entity.into(),
            value: value.into(),
            role: None,
            group: None,
        }
    }

    pub fn with_role(mut self, role: impl Into<String>) -> Self {
        self.role = Some(role.into());
        self
    }

    pub fn with_group(mut self, group: impl Into<String>) -> Self {
        self.group = Some(group.into());
        self
    }

    /// Labels this entity contributes to a user sub-state: the plain name
    /// plus role/group qualified variants.
    pub fn labels(&self) -> Vec<String> {
        let mut labels = vec![self.entity.clone()];
        if let Some(role) = &self.role {
            labels.push(format!(
                "{}{}{}",
                self.entity,
                crate::constants::ENTITY_LABEL_SEPARATOR,
                role
            ));
        }
        if let Some(group) = &self.group {
            labels.push(format!(
                "{}{}{}",
                self.entity,
                crate::constants::ENTITY_LABEL_SEPARATOR,
                group
            ));
        }
        labels
    }
}

/// The intent the NLU layer predicted for a user message.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IntentPrediction {
    pub name: String,
    #[serde(default)]
    pub confidence: f64,
}

impl IntentPrediction {
    pub fn new(name: impl Into<String>, confidence: f64) -> Self {
        Self {
            name: name.into(),
            confidence,
        }
    }
}

/// A single conversation event, tagged by its `event` field on the wire.
///
/// Events are immutable once appended to a tracker; insertion order is
/// significant and never reordered.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "event")]
pub enum Event {
    /// The user sent a message, already parsed by the NLU layer.
    #[serde(rename = "user")]
    UserUttered {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        text: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        intent: Option<IntentPrediction>,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        entities: Vec<Entity>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message_id: Option<String>,
        #[serde(default)]
        hide_rule_turn: bool,
        timestamp: DateTime<Utc>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        metadata: Option<EventMetadata>,
    },

    /// The bot executed an action. Exactly one of `action_name` and
    /// `action_text` is set; the latter carries end-to-end response text.
    #[serde(rename = "action")]
    ActionExecuted {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        action_name: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        action_text: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        policy: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        confidence: Option<f64>,
        #[serde(default)]
        hide_rule_turn: bool,
        timestamp: DateTime<Utc>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        metadata: Option<EventMetadata>,
    },

    /// A slot received a new value.
    #[serde(rename = "slot")]
    SlotSet {
        name: String,
        #[serde(default)]
        value: Value,
        timestamp: DateTime<Utc>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        metadata: Option<EventMetadata>,
    },

    /// A new conversation session began. Resets the tracker's derived
    /// state; slot carry-over is expressed as explicit `SlotSet` events
    /// appended after this one.
    #[serde(rename = "session_started")]
    SessionStarted {
        timestamp: DateTime<Utc>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        metadata: Option<EventMetadata>,
    },

    /// The conversation was reset by the user.
    #[serde(rename = "restart")]
    Restarted {
        timestamp: DateTime<Utc>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        metadata: Option<EventMetadata>,
    },

    /// A form/loop was activated (`name` set) or deactivated (`name`
    /// cleared).
    #[serde(rename = "active_loop")]
    ActiveLoop {
        #[serde(default)]
        name: Option<String>,
        timestamp: DateTime<Utc>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        metadata: Option<EventMetadata>,
    },

    /// Forces the next action instead of asking the policy.
    #[serde(rename = "followup")]
    FollowupAction {
        name: String,
        timestamp: DateTime<Utc>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        metadata: Option<EventMetadata>,
    },
}

impl Event {
    /// A parsed user message with a fresh message id.
    pub fn user(
        text: impl Into<String>,
        intent: IntentPrediction,
        entities: Vec<Entity>,
    ) -> Self {
        Event::UserUttered {
            text: Some(text.into()),
            intent: Some(intent),
            entities,
            message_id: Some(Uuid::new_v4().to_string()),
            hide_rule_turn: false,
            timestamp: Utc::now(),
            metadata: None,
        }
    }

    /// An executed action referenced by name.
    pub fn action(name: impl Into<String>) -> Self {
        Event::ActionExecuted {
            action_name: Some(name.into()),
            action_text: None,
            policy: None,
            confidence: None,
            hide_rule_turn: false,
            timestamp: Utc::now(),
            metadata: None,
        }
    }

    /// An executed end-to-end action referenced by its response text.
    pub fn action_text(text: impl Into<String>) -> Self {
        Event::ActionExecuted {
            action_name: None,
            action_text: Some(text.into()),
            policy: None,
            confidence: None,
            hide_rule_turn: false,
            timestamp: Utc::now(),
            metadata: None,
        }
    }

    pub fn slot(name: impl Into<String>, value: impl Into<Value>) -> Self {
        Event::SlotSet {
            name: name.into(),
            value: value.into(),
            timestamp: Utc::now(),
            metadata: None,
        }
    }

    pub fn session_started() -> Self {
        Event::SessionStarted {
            timestamp: Utc::now(),
            metadata: None,
        }
    }

    pub fn restarted() -> Self {
        Event::Restarted {
            timestamp: Utc::now(),
            metadata: None,
        }
    }

    pub fn active_loop(name: Option<String>) -> Self {
        Event::ActiveLoop {
            name,
            timestamp: Utc::now(),
            metadata: None,
        }
    }

    pub fn followup(name: impl Into<String>) -> Self {
        Event::FollowupAction {
            name: name.into(),
            timestamp: Utc::now(),
            metadata: None,
        }
    }

    /// The wire tag stored in the `event` field.
    pub fn type_name(&self) -> &'static str {
        match self {
            Event::UserUttered { .. } => "user",
            Event::ActionExecuted { .. } => "action",
            Event::SlotSet { .. } => "slot",
            Event::SessionStarted { .. } => "session_started",
            Event::Restarted { .. } => "restart",
            Event::ActiveLoop { .. } => "active_loop",
            Event::FollowupAction { .. } => "followup",
        }
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            Event::UserUttered { timestamp, .. }
            | Event::ActionExecuted { timestamp, .. }
            | Event::SlotSet { timestamp, .. }
            | Event::SessionStarted { timestamp, .. }
            | Event::Restarted { timestamp, .. }
            | Event::ActiveLoop { timestamp, .. }
            | Event::FollowupAction { timestamp, .. } => *timestamp,
        }
    }

    /// Dict form of the event, with its `event` type tag.
    pub fn as_dict(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }

    pub fn from_parameters(parameters: Value) -> Result<Self> {
        serde_json::from_value(parameters).map_err(DialogueError::from)
    }
}

/// Convert a list of dict representations to typed events.
///
/// Unknown or malformed entries are skipped with a warning instead of
/// failing the whole batch, so one corrupted event cannot lose an entire
/// conversation history.
pub fn deserialise_events(serialized_events: &[Value]) -> Vec<Event> {
    let mut deserialised = Vec::with_capacity(serialized_events.len());

    for raw in serialized_events {
        if raw.get("event").is_none() {
            warn!(entry = %raw, "skipping entry without an 'event' tag while deserialising");
            continue;
        }
        match Event::from_parameters(raw.clone()) {
            Ok(event) => deserialised.push(event),
            Err(error) => {
                warn!(
                    entry = %raw,
                    %error,
                    "unable to parse event while deserialising, the event will be ignored"
                );
            }
        }
    }

    deserialised
}

/// A named, ordered sequence of events: the serializable unit exchanged
/// with storage.
#[derive(Debug, Clone, PartialEq)]
pub struct Dialogue {
    pub name: String,
    pub events: Vec<Event>,
}

impl Dialogue {
    pub fn new(name: impl Into<String>, events: Vec<Event>) -> Self {
        Self {
            name: name.into(),
            events,
        }
    }

    /// Dict representation: `{"name": ..., "events": [...]}`.
    pub fn as_dict(&self) -> Value {
        serde_json::json!({
            "name": self.name,
            "events": self.events.iter().map(Event::as_dict).collect::<Vec<_>>(),
        })
    }

    /// Rebuild a dialogue from its dict representation. Malformed events
    /// are skipped, matching [`deserialise_events`].
    pub fn from_parameters(parameters: &Value) -> Result<Self> {
        let name = parameters
            .get("name")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();

        let raw_events = parameters
            .get("events")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();

        Ok(Self {
            name,
            events: deserialise_events(&raw_events),
        })
    }
}

impl std::fmt::Display for Dialogue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Dialogue with name '{}' and {} events",
            self.name,
            self.events.len()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_event_round_trip() {
        let events = vec![
            Event::session_started(),
            Event::action(crate::constants::ACTION_LISTEN_NAME),
            Event::user(
                "hello",
                IntentPrediction::new("greet", 0.97),
                vec![Entity::new("city", "Berlin").with_role("destination")],
            ),
            Event::slot("city", "Berlin"),
            Event::active_loop(Some("booking_form".to_string())),
            Event::active_loop(None),
            Event::followup("utter_greet"),
            Event::restarted(),
        ];

        for event in events {
            let round_tripped = Event::from_parameters(event.as_dict()).unwrap();
            assert_eq!(round_tripped, event);
        }
    }

    #[test]
    fn test_dialogue_round_trip() {
        let dialogue = Dialogue::new(
            "sender-1",
            vec![
                Event::action(crate::constants::ACTION_LISTEN_NAME),
                Event::user("hi", IntentPrediction::new("greet", 1.0), vec![]),
            ],
        );

        let restored = Dialogue::from_parameters(&dialogue.as_dict()).unwrap();
        assert_eq!(restored, dialogue);
    }

    #[test]
    fn test_deserialise_events_skips_malformed_entries() {
        let raw = vec![
            json!({"event": "slot", "name": "city", "value": "Berlin",
                   "timestamp": "2024-01-01T00:00:00Z"}),
            json!({"no_event_tag": true}),
            json!({"event": "not_a_known_event", "timestamp": "2024-01-01T00:00:00Z"}),
            json!({"event": "restart", "timestamp": "2024-01-01T00:00:01Z"}),
        ];

        let events = deserialise_events(&raw);
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].type_name(), "slot");
        assert_eq!(events[1].type_name(), "restart");
    }

    #[test]
    fn test_entity_labels_include_role_and_group() {
        let entity = Entity::new("city", "Berlin")
            .with_role("destination")
            .with_group("first");

        assert_eq!(
            entity.labels(),
            vec![
                "city".to_string(),
                "city#destination".to_string(),
                "city#first".to_string()
            ]
        );
    }
}
