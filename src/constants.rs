//! Names and defaults shared across the crate.

/// The action that pauses the bot and waits for user input. Always at
/// index 0 of a domain's action ordering.
pub const ACTION_LISTEN_NAME: &str = "action_listen";

pub const ACTION_RESTART_NAME: &str = "action_restart";
pub const ACTION_SESSION_START_NAME: &str = "action_session_start";
pub const ACTION_DEFAULT_FALLBACK_NAME: &str = "action_default_fallback";
pub const ACTION_DEACTIVATE_LOOP_NAME: &str = "action_deactivate_loop";
pub const ACTION_REVERT_FALLBACK_EVENTS_NAME: &str = "action_revert_fallback_events";
pub const ACTION_DEFAULT_ASK_AFFIRMATION_NAME: &str = "action_default_ask_affirmation";
pub const ACTION_DEFAULT_ASK_REPHRASE_NAME: &str = "action_default_ask_rephrase";
pub const ACTION_TWO_STAGE_FALLBACK_NAME: &str = "action_two_stage_fallback";
pub const ACTION_UNLIKELY_INTENT_NAME: &str = "action_unlikely_intent";
pub const ACTION_BACK_NAME: &str = "action_back";

/// Placeholder action marking the unpredictable part of a rule.
pub const RULE_SNIPPET_ACTION_NAME: &str = "...";

/// Built-in actions, in their canonical order. User-declared actions are
/// appended after these.
pub const DEFAULT_ACTION_NAMES: &[&str] = &[
    ACTION_LISTEN_NAME,
    ACTION_RESTART_NAME,
    ACTION_SESSION_START_NAME,
    ACTION_DEFAULT_FALLBACK_NAME,
    ACTION_DEACTIVATE_LOOP_NAME,
    ACTION_REVERT_FALLBACK_EVENTS_NAME,
    ACTION_DEFAULT_ASK_AFFIRMATION_NAME,
    ACTION_DEFAULT_ASK_REPHRASE_NAME,
    ACTION_TWO_STAGE_FALLBACK_NAME,
    ACTION_UNLIKELY_INTENT_NAME,
    ACTION_BACK_NAME,
    RULE_SNIPPET_ACTION_NAME,
];

pub const USER_INTENT_RESTART: &str = "restart";
pub const USER_INTENT_BACK: &str = "back";
pub const USER_INTENT_OUT_OF_SCOPE: &str = "out_of_scope";
pub const USER_INTENT_SESSION_START: &str = "session_start";
pub const NLU_FALLBACK_INTENT_NAME: &str = "nlu_fallback";

/// Intents every domain understands without declaring them.
pub const DEFAULT_INTENTS: &[&str] = &[
    USER_INTENT_RESTART,
    USER_INTENT_BACK,
    USER_INTENT_OUT_OF_SCOPE,
    USER_INTENT_SESSION_START,
    NLU_FALLBACK_INTENT_NAME,
];

/// Catch-all bucket appended to every categorical slot.
pub const DEFAULT_CATEGORICAL_SLOT_VALUE: &str = "__other__";

/// Slot a form uses to remember which slot it is currently asking for.
pub const REQUESTED_SLOT: &str = "requested_slot";

/// Slot holding the metadata of the message that started the session.
pub const SESSION_START_METADATA_SLOT: &str = "session_started_metadata";

pub const DEFAULT_KNOWLEDGE_BASE_ACTION: &str = "action_query_knowledge_base";
pub const SLOT_LISTED_ITEMS: &str = "knowledge_base_listed_objects";
pub const SLOT_LAST_OBJECT: &str = "knowledge_base_last_object";
pub const SLOT_LAST_OBJECT_TYPE: &str = "knowledge_base_last_object_type";

/// Separator between an entity name and a role or group in a state label,
/// e.g. `city#destination`.
pub const ENTITY_LABEL_SEPARATOR: &str = "#";

pub const DEFAULT_SESSION_EXPIRATION_TIME_IN_MINUTES: u64 = 60;
pub const DEFAULT_CARRY_OVER_SLOTS_TO_NEW_SESSION: bool = true;
