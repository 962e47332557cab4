//! Dialogue state tracker
//!
//! A tracker owns one conversation's event log plus derived, recomputable
//! caches. Applying an event transitions the derived state as a pure
//! function of (previous derived state, event); replaying the log from
//! scratch reproduces the same caches.

use serde_json::Value;
use std::collections::HashMap;
use tracing::debug;

use crate::constants::{ACTION_LISTEN_NAME, REQUESTED_SLOT, SESSION_START_METADATA_SLOT};
use crate::domain::Domain;
use crate::events::{Dialogue, Entity, Event, IntentPrediction};
use crate::slots::Slot;

/// Derived cache of the last user message.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct LatestMessage {
    pub text: Option<String>,
    pub intent: Option<IntentPrediction>,
    pub entities: Vec<Entity>,
    /// Whether the message arrived in a rule-hidden turn.
    pub hidden: bool,
}

/// Derived cache of the last executed action.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct LatestAction {
    pub action_name: Option<String>,
    pub action_text: Option<String>,
}

/// Maintains the state of one conversation by replaying its event log.
#[derive(Debug, Clone)]
pub struct DialogueStateTracker {
    sender_id: String,
    events: Vec<Event>,
    max_event_history: Option<usize>,
    slots: HashMap<String, Slot>,
    latest_message: Option<LatestMessage>,
    latest_action: Option<LatestAction>,
    active_loop: Option<String>,
    followup_action: Option<String>,
    last_action_hidden: bool,
}

impl DialogueStateTracker {
    pub fn new(
        sender_id: impl Into<String>,
        slots: impl IntoIterator<Item = Slot>,
        max_event_history: Option<usize>,
    ) -> Self {
        Self {
            sender_id: sender_id.into(),
            events: Vec::new(),
            max_event_history,
            slots: slots
                .into_iter()
                .map(|slot| (slot.name().to_string(), slot))
                .collect(),
            latest_message: None,
            latest_action: None,
            active_loop: None,
            followup_action: None,
            last_action_hidden: false,
        }
    }

    /// A tracker seeded with the domain's slot schema.
    pub fn from_domain(
        sender_id: impl Into<String>,
        domain: &Domain,
        max_event_history: Option<usize>,
    ) -> Self {
        Self::new(sender_id, domain.slots().to_vec(), max_event_history)
    }

    pub fn sender_id(&self) -> &str {
        &self.sender_id
    }

    pub fn events(&self) -> &[Event] {
        &self.events
    }

    /// Events after the most recent `Restarted`, i.e. the ones that shape
    /// the current conversation.
    pub fn applied_events(&self) -> &[Event] {
        let start = self
            .events
            .iter()
            .rposition(|event| matches!(event, Event::Restarted { .. }))
            .map(|index| index + 1)
            .unwrap_or(0);
        &self.events[start..]
    }

    pub fn latest_message(&self) -> Option<&LatestMessage> {
        self.latest_message.as_ref()
    }

    pub fn latest_action(&self) -> Option<&LatestAction> {
        self.latest_action.as_ref()
    }

    pub fn latest_action_name(&self) -> Option<&str> {
        self.latest_action
            .as_ref()
            .and_then(|action| action.action_name.as_deref())
    }

    pub fn active_loop(&self) -> Option<&str> {
        self.active_loop.as_deref()
    }

    pub fn followup_action(&self) -> Option<&str> {
        self.followup_action.as_deref()
    }

    /// Whether the last applied action belonged to a rule-hidden turn.
    pub fn last_action_hidden(&self) -> bool {
        self.last_action_hidden
    }

    pub fn slots(&self) -> impl Iterator<Item = &Slot> {
        self.slots.values()
    }

    pub fn get_slot(&self, name: &str) -> Option<&Value> {
        self.slots.get(name).map(Slot::value)
    }

    pub fn has_slot(&self, name: &str) -> bool {
        self.slots.contains_key(name)
    }

    pub fn current_slot_values(&self) -> HashMap<String, Value> {
        self.slots
            .iter()
            .filter(|(_, slot)| slot.has_been_set())
            .map(|(name, slot)| (name.clone(), slot.value().clone()))
            .collect()
    }

    /// Append an event and apply it to the derived state.
    pub fn update(&mut self, event: Event) {
        self.apply(&event);
        self.events.push(event);

        if let Some(max) = self.max_event_history {
            if self.events.len() > max {
                let excess = self.events.len() - max;
                self.events.drain(..excess);
            }
        }
    }

    pub fn update_with_events(&mut self, events: impl IntoIterator<Item = Event>) {
        for event in events {
            self.update(event);
        }
    }

    /// Transition the derived caches. Deterministic and exclusively a
    /// function of the previous derived state and the event.
    fn apply(&mut self, event: &Event) {
        match event {
            Event::UserUttered {
                text,
                intent,
                entities,
                hide_rule_turn,
                ..
            } => {
                self.latest_message = Some(LatestMessage {
                    text: text.clone(),
                    intent: intent.clone(),
                    entities: entities.clone(),
                    hidden: *hide_rule_turn,
                });
                self.auto_fill_slots(entities);
            }
            Event::ActionExecuted {
                action_name,
                action_text,
                hide_rule_turn,
                ..
            } => {
                self.latest_action = Some(LatestAction {
                    action_name: action_name.clone(),
                    action_text: action_text.clone(),
                });
                self.last_action_hidden = *hide_rule_turn;
                if self.followup_action.as_deref() == action_name.as_deref() {
                    self.followup_action = None;
                }
            }
            Event::SlotSet { name, value, .. } => {
                self.slot_or_default(name).set_value(value.clone());
            }
            Event::SessionStarted { .. } | Event::Restarted { .. } => {
                self.reset_derived_state();
            }
            Event::ActiveLoop { name, .. } => {
                self.active_loop = name.clone();
            }
            Event::FollowupAction { name, .. } => {
                self.followup_action = Some(name.clone());
            }
        }
    }

    /// Entities matching an auto-fill slot by name populate it directly.
    fn auto_fill_slots(&mut self, entities: &[Entity]) {
        for entity in entities {
            if let Some(slot) = self.slots.get_mut(&entity.entity) {
                if slot.auto_fill {
                    slot.set_value(entity.value.clone());
                }
            }
        }
    }

    /// Get-or-default slot access: an unknown name materializes a generic
    /// unfeaturized slot instead of failing. This is a deliberate leniency
    /// against domain/tracker version skew; it also masks typos, so it is
    /// logged.
    fn slot_or_default(&mut self, name: &str) -> &mut Slot {
        self.slots.entry(name.to_string()).or_insert_with(|| {
            debug!(
                slot = name,
                "tried to set a slot which is not present in the schema, \
                 creating a generic unfeaturized slot"
            );
            Slot::any(name)
        })
    }

    fn reset_derived_state(&mut self) {
        for slot in self.slots.values_mut() {
            slot.reset();
        }
        self.latest_message = None;
        self.latest_action = None;
        self.active_loop = None;
        self.followup_action = None;
        self.last_action_hidden = false;
    }

    /// An empty tracker with the same configuration and slot schema.
    pub fn init_copy(&self) -> Self {
        let mut slots: Vec<Slot> = self.slots.values().cloned().collect();
        for slot in &mut slots {
            slot.reset();
        }
        Self::new(self.sender_id.clone(), slots, self.max_event_history)
    }

    /// Recompute every derived cache from the event log alone.
    pub fn replay(&mut self) {
        let events = std::mem::take(&mut self.events);
        let fresh = self.init_copy();
        self.slots = fresh.slots;
        self.latest_message = None;
        self.latest_action = None;
        self.active_loop = None;
        self.followup_action = None;
        self.last_action_hidden = false;
        for event in &events {
            self.apply(event);
        }
        self.events = events;
    }

    pub fn as_dialogue(&self) -> Dialogue {
        Dialogue::new(self.sender_id.clone(), self.events.clone())
    }

    /// Replace the tracker's history with a persisted dialogue.
    pub fn recreate_from_dialogue(&mut self, dialogue: Dialogue) {
        self.events = dialogue.events;
        self.replay();
    }

    /// One tracker snapshot per executed action, plus the final state.
    /// The flag marks whether the upcoming action belongs to a
    /// rule-hidden turn.
    pub fn generate_all_prior_trackers(&self) -> Vec<(DialogueStateTracker, bool)> {
        let mut tracker = self.init_copy();
        let mut prior = Vec::new();

        for event in &self.events {
            if let Event::ActionExecuted { hide_rule_turn, .. } = event {
                prior.push((tracker.clone(), *hide_rule_turn));
            }
            tracker.update(event.clone());
        }

        prior.push((tracker, false));
        prior
    }

    /// The event sequence opening a new conversation session: the session
    /// boundary, carried-over slot values if the domain allows them, and
    /// the initial listen.
    pub fn create_session_start_events(&self, domain: &Domain) -> Vec<Event> {
        let mut events = vec![Event::session_started()];

        if domain.session_config().carry_over_slots_to_new_session {
            let mut carried: Vec<(&String, &Slot)> = self
                .slots
                .iter()
                .filter(|(name, slot)| {
                    slot.has_been_set()
                        && !slot.value().is_null()
                        && name.as_str() != REQUESTED_SLOT
                        && name.as_str() != SESSION_START_METADATA_SLOT
                })
                .collect();
            carried.sort_by(|a, b| a.0.cmp(b.0));
            for (name, slot) in carried {
                events.push(Event::slot(name.clone(), slot.value().clone()));
            }
        }

        events.push(Event::action(ACTION_LISTEN_NAME));
        events
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::slots::SlotKind;
    use serde_json::json;

    fn tracker_with_slots() -> DialogueStateTracker {
        DialogueStateTracker::new(
            "sender-1",
            vec![
                Slot::text("name"),
                Slot::new("confirmed", SlotKind::Bool).unwrap(),
            ],
            None,
        )
    }

    #[test]
    fn test_update_applies_slot_events() {
        let mut tracker = tracker_with_slots();
        tracker.update(Event::slot("name", "Sara"));

        assert_eq!(tracker.get_slot("name"), Some(&json!("Sara")));
        assert_eq!(tracker.events().len(), 1);
    }

    #[test]
    fn test_unknown_slot_is_materialized_as_unfeaturized() {
        let mut tracker = tracker_with_slots();
        tracker.update(Event::slot("not_in_schema", 42));

        assert_eq!(tracker.get_slot("not_in_schema"), Some(&json!(42)));
        let slot = tracker
            .slots()
            .find(|slot| slot.name() == "not_in_schema")
            .unwrap();
        assert_eq!(slot.feature_dimensionality(), 0);
    }

    #[test]
    fn test_user_message_auto_fills_matching_slot() {
        let mut tracker = tracker_with_slots();
        tracker.update(Event::user(
            "I am Sara",
            IntentPrediction::new("introduce", 0.9),
            vec![Entity::new("name", "Sara")],
        ));

        assert_eq!(tracker.get_slot("name"), Some(&json!("Sara")));
    }

    #[test]
    fn test_session_start_resets_slots() {
        let mut tracker = tracker_with_slots();
        tracker.update(Event::slot("name", "Sara"));
        tracker.update(Event::session_started());

        assert_eq!(tracker.get_slot("name"), Some(&Value::Null));
        assert!(tracker.latest_message().is_none());
    }

    #[test]
    fn test_replay_reproduces_derived_state() {
        let mut tracker = tracker_with_slots();
        tracker.update(Event::action(ACTION_LISTEN_NAME));
        tracker.update(Event::user(
            "hello",
            IntentPrediction::new("greet", 1.0),
            vec![],
        ));
        tracker.update(Event::slot("name", "Sara"));
        tracker.update(Event::active_loop(Some("booking_form".to_string())));

        let mut replayed = tracker.clone();
        replayed.replay();

        assert_eq!(replayed.get_slot("name"), tracker.get_slot("name"));
        assert_eq!(replayed.latest_message(), tracker.latest_message());
        assert_eq!(replayed.active_loop(), tracker.active_loop());
    }

    #[test]
    fn test_applied_events_truncate_at_restart() {
        let mut tracker = tracker_with_slots();
        tracker.update(Event::action(ACTION_LISTEN_NAME));
        tracker.update(Event::restarted());
        tracker.update(Event::action(ACTION_LISTEN_NAME));

        assert_eq!(tracker.applied_events().len(), 1);
        assert_eq!(tracker.events().len(), 3);
    }

    #[test]
    fn test_max_event_history_bounds_the_log() {
        let mut tracker = DialogueStateTracker::new("sender-1", vec![], Some(2));
        tracker.update(Event::action(ACTION_LISTEN_NAME));
        tracker.update(Event::restarted());
        tracker.update(Event::action(ACTION_LISTEN_NAME));

        assert_eq!(tracker.events().len(), 2);
    }

    #[test]
    fn test_followup_action_is_cleared_when_executed() {
        let mut tracker = tracker_with_slots();
        tracker.update(Event::followup("utter_greet"));
        assert_eq!(tracker.followup_action(), Some("utter_greet"));

        tracker.update(Event::action("utter_greet"));
        assert_eq!(tracker.followup_action(), None);
    }

    #[test]
    fn test_prior_trackers_snapshot_before_each_action() {
        let mut tracker = tracker_with_slots();
        tracker.update(Event::action(ACTION_LISTEN_NAME));
        tracker.update(Event::user(
            "hello",
            IntentPrediction::new("greet", 1.0),
            vec![],
        ));
        tracker.update(Event::action("utter_greet"));

        let prior = tracker.generate_all_prior_trackers();
        // one per action plus the final state
        assert_eq!(prior.len(), 3);
        assert!(prior[0].0.latest_action().is_none());
        assert_eq!(prior[2].0.latest_action_name(), Some("utter_greet"));
    }
}
