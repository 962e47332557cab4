//! State projection
//!
//! Projects a tracker's event log into the bounded, model-ready `State`
//! snapshots a policy consumes: up to four sub-states (`user`, `slots`,
//! `prev_action`, `active_loop`), with empty sub-states omitted entirely.

use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashSet};

use crate::domain::Domain;
use crate::tracker::DialogueStateTracker;

/// The last user message, reduced to what influences prediction.
#[derive(Debug, Clone, PartialEq, Serialize, Default)]
pub struct UserSubState {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub intent: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub entities: Vec<String>,
}

impl UserSubState {
    fn is_empty(&self) -> bool {
        self.intent.is_none() && self.text.is_none() && self.entities.is_empty()
    }
}

/// The previously executed action, by name or end-to-end text.
#[derive(Debug, Clone, PartialEq, Serialize, Default)]
pub struct ActionSubState {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub action_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub action_text: Option<String>,
}

impl ActionSubState {
    fn is_empty(&self) -> bool {
        self.action_name.is_none() && self.action_text.is_none()
    }
}

/// The currently active form/loop.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LoopSubState {
    pub name: String,
}

/// A point-in-time view of a conversation. Sub-states that would be empty
/// are `None` and absent from the serialized form.
#[derive(Debug, Clone, PartialEq, Serialize, Default)]
pub struct State {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<UserSubState>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub slots: Option<BTreeMap<String, Vec<f64>>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prev_action: Option<ActionSubState>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub active_loop: Option<LoopSubState>,
}

impl State {
    pub fn is_empty(&self) -> bool {
        self.user.is_none()
            && self.slots.is_none()
            && self.prev_action.is_none()
            && self.active_loop.is_none()
    }
}

/// Slots and loops that only ever appear in rule-type stories. Their
/// traces are stripped from training states so story-based policies never
/// see them.
#[derive(Debug, Clone, Default)]
pub struct RuleOnlyData {
    pub rule_only_slots: HashSet<String>,
    pub rule_only_loops: HashSet<String>,
}

impl Domain {
    /// Project the tracker's current derived state into a `State`.
    ///
    /// Entities are filtered to those the last intent's configuration says
    /// should be used; slots whose feature vector is all zero contribute
    /// nothing and are omitted (sparsity, not data loss).
    pub fn get_active_states(
        &self,
        tracker: &DialogueStateTracker,
        omit_unset_slots: bool,
    ) -> State {
        State {
            user: self.user_sub_state(tracker),
            slots: self.slots_sub_state(tracker, omit_unset_slots),
            prev_action: prev_action_sub_state(tracker),
            active_loop: tracker
                .active_loop()
                .map(|name| LoopSubState {
                    name: name.to_string(),
                }),
        }
    }

    fn user_sub_state(&self, tracker: &DialogueStateTracker) -> Option<UserSubState> {
        let message = tracker.latest_message()?;

        let intent = message.intent.as_ref().map(|intent| intent.name.clone());

        let entities = match &intent {
            Some(intent_name) => {
                let used = self
                    .intent_properties(intent_name)
                    .map(|properties| &properties.used_entities);
                let mut labels: BTreeSet<String> = BTreeSet::new();
                if let Some(used) = used {
                    for entity in &message.entities {
                        for label in entity.labels() {
                            if used.contains(&label) {
                                labels.insert(label);
                            }
                        }
                    }
                }
                labels.into_iter().collect()
            }
            None => Vec::new(),
        };

        // Text stands in for the intent only on end-to-end turns.
        let text = if intent.is_none() {
            message.text.clone()
        } else {
            None
        };

        let sub_state = UserSubState {
            intent,
            text,
            entities,
        };
        (!sub_state.is_empty()).then_some(sub_state)
    }

    fn slots_sub_state(
        &self,
        tracker: &DialogueStateTracker,
        omit_unset_slots: bool,
    ) -> Option<BTreeMap<String, Vec<f64>>> {
        let mut slots = BTreeMap::new();

        for slot in tracker.slots() {
            if omit_unset_slots && !slot.has_been_set() {
                continue;
            }
            let feature = slot.as_feature();
            if feature.iter().any(|&value| value != 0.0) {
                slots.insert(slot.name().to_string(), feature);
            }
        }

        (!slots.is_empty()).then_some(slots)
    }

    /// Replay a tracker's full history into one `State` per turn.
    ///
    /// With `ignore_rule_only_turns`, turns that exist only to satisfy
    /// rules are elided: their states are dropped, rule-only slots/loops
    /// are stripped everywhere, and the last ML-visible action and user
    /// sub-state are carried forward so policy training data stays
    /// consistent.
    pub fn states_for_tracker_history(
        &self,
        tracker: &DialogueStateTracker,
        omit_unset_slots: bool,
        ignore_rule_only_turns: bool,
        rule_only_data: Option<&RuleOnlyData>,
    ) -> Vec<State> {
        let mut states = Vec::new();
        let mut last_ml_action: Option<ActionSubState> = None;
        let mut last_ml_user: Option<UserSubState> = None;

        for (prior, turn_hidden) in tracker.generate_all_prior_trackers() {
            let mut state = self.get_active_states(&prior, omit_unset_slots);

            if ignore_rule_only_turns {
                if let Some(data) = rule_only_data {
                    strip_rule_only_features(&mut state, data);
                }

                // Substitute hidden user input with the last input seen in
                // a visible turn.
                let user_hidden = prior
                    .latest_message()
                    .map(|message| message.hidden)
                    .unwrap_or(false);
                if user_hidden {
                    state.user = last_ml_user.clone();
                } else if state.user.is_some() {
                    last_ml_user = state.user.clone();
                }

                // Same carry-forward for the previous action.
                if prior.last_action_hidden() {
                    state.prev_action = last_ml_action.clone();
                } else if state.prev_action.is_some() {
                    last_ml_action = state.prev_action.clone();
                }

                if turn_hidden {
                    continue;
                }
            }

            states.push(state);
        }

        states
    }
}

fn prev_action_sub_state(tracker: &DialogueStateTracker) -> Option<ActionSubState> {
    let action = tracker.latest_action()?;
    let sub_state = ActionSubState {
        action_name: action.action_name.clone(),
        action_text: action.action_text.clone(),
    };
    (!sub_state.is_empty()).then_some(sub_state)
}

fn strip_rule_only_features(state: &mut State, data: &RuleOnlyData) {
    if let Some(slots) = &mut state.slots {
        slots.retain(|name, _| !data.rule_only_slots.contains(name));
        if slots.is_empty() {
            state.slots = None;
        }
    }

    if let Some(active_loop) = &state.active_loop {
        if data.rule_only_loops.contains(&active_loop.name) {
            state.active_loop = None;
        }
    }
}
