use chrono::Utc;
use serde_json::json;

use dialogue_core::constants::ACTION_LISTEN_NAME;
use dialogue_core::{
    Dialogue, DialogueStateTracker, Domain, Entity, Event, IntentPrediction,
};

const TRAVEL_DOMAIN: &str = r#"
version: "2.0"
intents:
  - greet
  - inform:
      use_entities:
        - city
entities:
  - city:
      roles:
        - destination
  - name
slots:
  city:
    type: text
responses:
  utter_greet:
    - text: "Hey there!"
"#;

fn greet_tracker(domain: &Domain) -> DialogueStateTracker {
    let mut tracker = DialogueStateTracker::from_domain("sender-1", domain, None);
    tracker.update(Event::action(ACTION_LISTEN_NAME));
    tracker.update(Event::user("hello", IntentPrediction::new("greet", 1.0), vec![]));
    tracker.update(Event::action("utter_greet"));
    tracker
}

#[test]
fn test_greet_turn_projects_intent_and_previous_action() {
    let domain = Domain::from_yaml(TRAVEL_DOMAIN).unwrap();
    let tracker = greet_tracker(&domain);

    let state = domain.get_active_states(&tracker, false);
    assert_eq!(
        serde_json::to_value(&state).unwrap(),
        json!({
            "user": { "intent": "greet" },
            "prev_action": { "action_name": "utter_greet" }
        })
    );
}

#[test]
fn test_history_states_one_per_turn() {
    let domain = Domain::from_yaml(TRAVEL_DOMAIN).unwrap();
    let tracker = greet_tracker(&domain);

    let states = domain.states_for_tracker_history(&tracker, false, false, None);

    assert_eq!(states.len(), 3);
    assert!(states[0].is_empty());
    assert_eq!(
        states[1].prev_action.as_ref().unwrap().action_name.as_deref(),
        Some(ACTION_LISTEN_NAME)
    );
    assert_eq!(
        states[2].prev_action.as_ref().unwrap().action_name.as_deref(),
        Some("utter_greet")
    );
}

#[test]
fn test_unset_slots_contribute_no_features() {
    let domain = Domain::from_yaml(TRAVEL_DOMAIN).unwrap();
    let mut tracker = DialogueStateTracker::from_domain("sender-1", &domain, None);

    let state = domain.get_active_states(&tracker, false);
    assert!(state.slots.is_none());

    tracker.update(Event::slot("city", "Berlin"));
    let state = domain.get_active_states(&tracker, false);
    assert_eq!(state.slots.unwrap()["city"], vec![1.0]);
}

#[test]
fn test_omit_unset_slots_hides_untouched_initial_values() {
    let domain = Domain::from_yaml(
        r#"
slots:
  city:
    type: text
    initial_value: Berlin
"#,
    )
    .unwrap();
    let mut tracker = DialogueStateTracker::from_domain("sender-1", &domain, None);

    // The initial value alone features the slot, but it was never set.
    let state = domain.get_active_states(&tracker, false);
    assert_eq!(state.slots.unwrap()["city"], vec![1.0]);
    let state = domain.get_active_states(&tracker, true);
    assert!(state.slots.is_none());

    tracker.update(Event::slot("city", "Hamburg"));
    let state = domain.get_active_states(&tracker, true);
    assert_eq!(state.slots.unwrap()["city"], vec![1.0]);
}

#[test]
fn test_entities_are_filtered_by_the_intent() {
    let domain = Domain::from_yaml(TRAVEL_DOMAIN).unwrap();
    let mut tracker = DialogueStateTracker::from_domain("sender-1", &domain, None);
    tracker.update(Event::user(
        "to Berlin, I'm Sara",
        IntentPrediction::new("inform", 1.0),
        vec![
            Entity::new("city", "Berlin").with_role("destination"),
            Entity::new("name", "Sara"),
        ],
    ));

    let state = domain.get_active_states(&tracker, false);
    assert_eq!(
        state.user.unwrap().entities,
        vec!["city".to_string(), "city#destination".to_string()]
    );
}

#[test]
fn test_tracker_round_trips_through_stored_dialogue() {
    let domain = Domain::from_yaml(TRAVEL_DOMAIN).unwrap();
    let mut tracker = greet_tracker(&domain);
    tracker.update(Event::slot("city", "Berlin"));

    let serialized = serde_json::to_string(&tracker.as_dialogue().as_dict()).unwrap();
    let parameters: serde_json::Value = serde_json::from_str(&serialized).unwrap();
    let dialogue = Dialogue::from_parameters(&parameters).unwrap();

    let mut restored = DialogueStateTracker::from_domain("sender-1", &domain, None);
    restored.recreate_from_dialogue(dialogue);

    assert_eq!(restored.events(), tracker.events());
    assert_eq!(restored.current_slot_values(), tracker.current_slot_values());
    assert_eq!(
        domain.get_active_states(&restored, false),
        domain.get_active_states(&tracker, false)
    );
}

#[test]
fn test_rule_only_turns_are_elided_from_history() {
    let domain = Domain::from_yaml(TRAVEL_DOMAIN).unwrap();
    let mut tracker = DialogueStateTracker::from_domain("sender-1", &domain, None);
    tracker.update(Event::action(ACTION_LISTEN_NAME));
    tracker.update(Event::user("hello", IntentPrediction::new("greet", 1.0), vec![]));
    tracker.update(Event::ActionExecuted {
        action_name: Some("utter_rule_response".to_string()),
        action_text: None,
        policy: None,
        confidence: None,
        hide_rule_turn: true,
        timestamp: Utc::now(),
        metadata: None,
    });
    tracker.update(Event::action("utter_greet"));

    let full = domain.states_for_tracker_history(&tracker, false, false, None);
    let visible = domain.states_for_tracker_history(&tracker, false, true, None);

    assert_eq!(full.len(), 4);
    assert_eq!(visible.len(), 3);
    assert!(visible.iter().all(|state| {
        state
            .prev_action
            .as_ref()
            .and_then(|action| action.action_name.as_deref())
            != Some("utter_rule_response")
    }));
    // The hidden action is replaced by the last visible one.
    assert_eq!(
        visible[2].prev_action.as_ref().unwrap().action_name.as_deref(),
        Some("utter_greet")
    );
}

#[test]
fn test_session_start_events_honor_carry_over() {
    let carrying = Domain::from_yaml(TRAVEL_DOMAIN).unwrap();
    let mut tracker = DialogueStateTracker::from_domain("sender-1", &carrying, None);
    tracker.update(Event::slot("city", "Berlin"));

    let events = tracker.create_session_start_events(&carrying);
    let types: Vec<&str> = events.iter().map(Event::type_name).collect();
    assert_eq!(types, vec!["session_started", "slot", "action"]);

    let isolated = Domain::from_yaml(
        r#"
slots:
  city:
    type: text
session_config:
  session_expiration_time: 60
  carry_over_slots_to_new_session: false
"#,
    )
    .unwrap();
    let mut tracker = DialogueStateTracker::from_domain("sender-1", &isolated, None);
    tracker.update(Event::slot("city", "Berlin"));

    let events = tracker.create_session_start_events(&isolated);
    let types: Vec<&str> = events.iter().map(Event::type_name).collect();
    assert_eq!(types, vec!["session_started", "action"]);
}

#[test]
fn test_end_to_end_action_projects_its_text() {
    let domain = Domain::from_yaml(TRAVEL_DOMAIN).unwrap();
    let mut tracker = DialogueStateTracker::from_domain("sender-1", &domain, None);
    tracker.update(Event::action_text("Sure, I can do that."));

    let state = domain.get_active_states(&tracker, false);
    let prev_action = state.prev_action.unwrap();
    assert_eq!(prev_action.action_text.as_deref(), Some("Sure, I can do that."));
    assert!(prev_action.action_name.is_none());
}

#[test]
fn test_restart_truncates_applied_events_but_not_the_log() {
    let domain = Domain::from_yaml(TRAVEL_DOMAIN).unwrap();
    let mut tracker = greet_tracker(&domain);
    tracker.update(Event::slot("city", "Berlin"));
    tracker.update(Event::restarted());
    tracker.update(Event::action(ACTION_LISTEN_NAME));

    assert_eq!(tracker.applied_events().len(), 1);
    assert_eq!(tracker.events().len(), 6);
    // The restart reset the slot along with the rest of the state.
    assert_eq!(tracker.get_slot("city"), Some(&serde_json::Value::Null));
}
