//! Domain - the static schema of a bot's capabilities
//!
//! A domain describes the vocabulary a tracker projects against: intents,
//! entities (with roles and groups), slots, actions, forms, responses and
//! the session policy. Domains are immutable after construction; every
//! derived value (action ordering, input-state vocabulary) is computed once
//! in the construction pipeline and stored as a field.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use tracing::warn;

use crate::constants::{
    DEFAULT_ACTION_NAMES, DEFAULT_CARRY_OVER_SLOTS_TO_NEW_SESSION,
    DEFAULT_CATEGORICAL_SLOT_VALUE, DEFAULT_INTENTS, DEFAULT_KNOWLEDGE_BASE_ACTION,
    DEFAULT_SESSION_EXPIRATION_TIME_IN_MINUTES, ENTITY_LABEL_SEPARATOR, REQUESTED_SLOT,
    SESSION_START_METADATA_SLOT, SLOT_LAST_OBJECT, SLOT_LAST_OBJECT_TYPE, SLOT_LISTED_ITEMS,
};
use crate::error::{DialogueError, Result};
use crate::slots::{Slot, SlotKind};

pub mod state;

pub use state::{ActionSubState, LoopSubState, RuleOnlyData, State, UserSubState};

pub const DOMAIN_VERSION: &str = "2.0";

const DOMAIN_SPECIFICATION_FILENAME: &str = "domain.json";

fn default_version() -> String {
    DOMAIN_VERSION.to_string()
}

/// When and how conversation sessions expire.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Session expiration time in minutes. `0` disables expiration.
    #[serde(default = "SessionConfig::default_expiration_time")]
    pub session_expiration_time: f64,
    /// Whether set slots are carried over into a new session.
    #[serde(default = "SessionConfig::default_carry_over_slots")]
    pub carry_over_slots_to_new_session: bool,
}

impl SessionConfig {
    fn default_expiration_time() -> f64 {
        DEFAULT_SESSION_EXPIRATION_TIME_IN_MINUTES as f64
    }

    fn default_carry_over_slots() -> bool {
        DEFAULT_CARRY_OVER_SLOTS_TO_NEW_SESSION
    }

    pub fn are_sessions_enabled(&self) -> bool {
        self.session_expiration_time > 0.0
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            session_expiration_time: Self::default_expiration_time(),
            carry_over_slots_to_new_session: Self::default_carry_over_slots(),
        }
    }
}

/// Resolved properties of a single intent.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct IntentProperties {
    /// Entity labels (incl. role/group variants) this intent uses.
    pub used_entities: BTreeSet<String>,
    /// Action executed directly when this intent is predicted.
    pub triggers: Option<String>,
    /// Whether the intent was declared without an explicit entity list and
    /// therefore tracks the full entity set through merges.
    pub uses_all_entities: bool,
}

/// Role/group sub-labels declared for an entity.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct EntityProperties {
    pub roles: Vec<String>,
    pub groups: Vec<String>,
}

/// Raw slot declarations in file order. Kept as an ordered list rather
/// than a map so duplicate names survive parsing and can be reported.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SlotDeclarations(pub Vec<(String, Value)>);

impl Serialize for SlotDeclarations {
    fn serialize<S: serde::Serializer>(
        &self,
        serializer: S,
    ) -> std::result::Result<S::Ok, S::Error> {
        use serde::ser::SerializeMap;
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (name, config) in &self.0 {
            map.serialize_entry(name, config)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for SlotDeclarations {
    fn deserialize<D: serde::Deserializer<'de>>(
        deserializer: D,
    ) -> std::result::Result<Self, D::Error> {
        struct DeclarationsVisitor;

        impl<'de> serde::de::Visitor<'de> for DeclarationsVisitor {
            type Value = SlotDeclarations;

            fn expecting(&self, formatter: &mut std::fmt::Formatter) -> std::fmt::Result {
                formatter.write_str("a mapping of slot names to slot configs")
            }

            fn visit_map<A: serde::de::MapAccess<'de>>(
                self,
                mut access: A,
            ) -> std::result::Result<Self::Value, A::Error> {
                let mut declarations = Vec::with_capacity(access.size_hint().unwrap_or(0));
                while let Some((name, config)) = access.next_entry::<String, Value>()? {
                    declarations.push((name, config));
                }
                Ok(SlotDeclarations(declarations))
            }
        }

        deserializer.deserialize_map(DeclarationsVisitor)
    }
}

/// The serializable top-level shape of a domain file: `intents`,
/// `entities`, `slots`, `responses`, `actions`, `forms`, `e2e_actions`,
/// `config`, `session_config`. The version key is written first.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DomainDict {
    #[serde(default = "default_version")]
    pub version: String,
    #[serde(default)]
    pub intents: Vec<Value>,
    #[serde(default)]
    pub entities: Vec<Value>,
    #[serde(default)]
    pub slots: SlotDeclarations,
    #[serde(default)]
    pub responses: BTreeMap<String, Vec<Value>>,
    #[serde(default)]
    pub actions: Vec<String>,
    #[serde(default)]
    pub forms: Value,
    #[serde(default)]
    pub e2e_actions: Vec<String>,
    #[serde(default)]
    pub config: BTreeMap<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_config: Option<SessionConfig>,
}

impl Default for DomainDict {
    fn default() -> Self {
        Self {
            version: default_version(),
            intents: Vec::new(),
            entities: Vec::new(),
            slots: SlotDeclarations::default(),
            responses: BTreeMap::new(),
            actions: Vec::new(),
            forms: Value::Null,
            e2e_actions: Vec::new(),
            config: BTreeMap::new(),
            session_config: None,
        }
    }
}

/// The static, immutable description of a bot's vocabulary.
#[derive(Debug, Clone)]
pub struct Domain {
    intents: BTreeMap<String, IntentProperties>,
    entity_properties: BTreeMap<String, EntityProperties>,
    slots: Vec<Slot>,
    responses: BTreeMap<String, Vec<Value>>,
    user_actions: Vec<String>,
    forms: BTreeMap<String, Value>,
    action_texts: Vec<String>,
    config: BTreeMap<String, Value>,
    session_config: SessionConfig,
    session_config_declared: bool,

    // Derived once at construction.
    action_names_or_texts: Vec<String>,
    input_states: Vec<String>,
}

impl Domain {
    /// The domain with no user-declared content. Identity element of
    /// [`Domain::merge`].
    pub fn empty() -> Self {
        // An all-empty dict has no malformed entries to reject.
        Self::from_dict(DomainDict::default()).expect("empty domain is valid")
    }

    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let dict: DomainDict = serde_yaml::from_str(yaml)?;
        Self::from_dict(dict)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// Load a domain by folding [`Domain::merge`] over every path, starting
    /// from the empty domain.
    pub fn load<P: AsRef<Path>>(paths: &[P]) -> Result<Self> {
        let mut domain = Self::empty();
        for path in paths {
            let other = Self::from_path(path)?;
            domain = domain.merge(&other, false)?;
        }
        Ok(domain)
    }

    /// Construction pipeline. Validation problems are collected across all
    /// steps and reported as a single `InvalidDomain`.
    pub fn from_dict(dict: DomainDict) -> Result<Self> {
        let mut problems: Vec<String> = Vec::new();

        // (1) entity properties incl. role/group sub-labels
        let entity_properties = collect_entity_properties(&dict.entities, &mut problems);
        let entity_labels = labels_for_entities(&entity_properties);

        // (4) forms, normalized early so intents/slots can rely on them
        let forms = normalize_forms(&dict.forms, &mut problems);

        // (2) intent properties with resolved `used_entities`
        let mut intents = collect_intent_properties(&dict.intents, &entity_labels, &mut problems);

        // (3) default intents that are not already user-declared
        for default_intent in DEFAULT_INTENTS {
            intents
                .entry(default_intent.to_string())
                .or_insert_with(|| IntentProperties {
                    used_entities: entity_labels.iter().cloned().collect(),
                    triggers: None,
                    uses_all_entities: true,
                });
        }

        // (5) canonical action ordering: defaults always occupy the head
        let user_actions = dict.actions.clone();
        let mut action_names_or_texts: Vec<String> = DEFAULT_ACTION_NAMES
            .iter()
            .map(|name| name.to_string())
            .collect();
        for name in user_actions
            .iter()
            .chain(dict.responses.keys())
            .chain(forms.keys())
        {
            if !action_names_or_texts.iter().any(|existing| existing == name) {
                action_names_or_texts.push(name.clone());
            }
        }
        for text in &dict.e2e_actions {
            if !action_names_or_texts.iter().any(|existing| existing == text) {
                action_names_or_texts.push(text.clone());
            }
        }

        // (6) slots, then the synthetic defaults
        let mut slots = collect_slots(&dict.slots, &mut problems);
        add_default_slots(&mut slots, &forms, &user_actions);

        // (7) sanity checks
        check_duplicates(&user_actions, "actions", &mut problems);
        check_duplicate_slots(&slots, &mut problems);
        check_duplicate_entities(&dict.entities, &mut problems);
        for (intent, properties) in &intents {
            if let Some(trigger) = &properties.triggers {
                if !action_names_or_texts.iter().any(|a| a == trigger) {
                    problems.push(format!(
                        "the intent '{intent}' triggers the unknown action '{trigger}'"
                    ));
                }
            }
        }

        if !problems.is_empty() {
            return Err(DialogueError::InvalidDomain(problems.join("; ")));
        }

        let session_config = dict.session_config.unwrap_or_default();
        let input_states = compute_input_states(
            &intents,
            &entity_labels,
            &slots,
            &action_names_or_texts,
            &forms,
        );

        Ok(Self {
            intents,
            entity_properties,
            slots,
            responses: dict.responses,
            user_actions,
            forms,
            action_texts: dict.e2e_actions,
            config: dict.config,
            session_config,
            session_config_declared: dict.session_config.is_some(),
            action_names_or_texts,
            input_states,
        })
    }

    /// Canonical dict representation; `Domain::from_dict` on the result
    /// reproduces an equal domain.
    pub fn as_dict(&self) -> DomainDict {
        let intents = self
            .intents
            .iter()
            .map(|(name, properties)| {
                let mut props = serde_json::Map::new();
                props.insert(
                    "used_entities".to_string(),
                    json!(properties.used_entities.iter().collect::<Vec<_>>()),
                );
                if let Some(trigger) = &properties.triggers {
                    props.insert("triggers".to_string(), json!(trigger));
                }
                json!({ name.clone(): Value::Object(props) })
            })
            .collect();

        let entities = self
            .entity_properties
            .iter()
            .map(|(name, properties)| {
                if properties.roles.is_empty() && properties.groups.is_empty() {
                    json!(name)
                } else {
                    let mut props = serde_json::Map::new();
                    if !properties.roles.is_empty() {
                        props.insert("roles".to_string(), json!(properties.roles));
                    }
                    if !properties.groups.is_empty() {
                        props.insert("groups".to_string(), json!(properties.groups));
                    }
                    json!({ name.clone(): Value::Object(props) })
                }
            })
            .collect();

        let slots = SlotDeclarations(
            self.slots
                .iter()
                .map(|slot| (slot.name().to_string(), slot_as_dict(slot)))
                .collect(),
        );

        DomainDict {
            version: default_version(),
            intents,
            entities,
            slots,
            responses: self.responses.clone(),
            actions: self.user_actions.clone(),
            forms: json!(self.forms),
            e2e_actions: self.action_texts.clone(),
            config: self.config.clone(),
            session_config: self
                .session_config_declared
                .then_some(self.session_config),
        }
    }

    pub fn as_yaml(&self) -> Result<String> {
        serde_yaml::to_string(&self.as_dict()).map_err(DialogueError::from)
    }

    pub fn is_empty(&self) -> bool {
        let empty = Self::empty();
        json!(self.as_dict()) == json!(empty.as_dict())
    }

    /// Merge two domains. List-valued fields are unioned and sorted;
    /// dict-valued fields are merged left-biased unless `override_existing`
    /// is set; merging with the empty domain returns the other domain
    /// unchanged.
    pub fn merge(&self, other: &Domain, override_existing: bool) -> Result<Domain> {
        if self.is_empty() {
            return Ok(other.clone());
        }
        if other.is_empty() {
            return Ok(self.clone());
        }

        let ours = self.as_dict();
        let theirs = other.as_dict();

        let intents = merge_intent_lists(
            &self.intents_for_merge(),
            &other.intents_for_merge(),
            override_existing,
        );
        let entities = merge_entity_lists(&ours.entities, &theirs.entities);
        let actions = merge_sorted_union(&ours.actions, &theirs.actions);
        let e2e_actions = merge_sorted_union(&ours.e2e_actions, &theirs.e2e_actions);
        let slots = merge_slot_declarations(&ours.slots, &theirs.slots, override_existing);
        let responses = merge_maps(&ours.responses, &theirs.responses, override_existing);
        let config = merge_maps(&ours.config, &theirs.config, override_existing);
        let forms = {
            let our_forms: BTreeMap<String, Value> =
                serde_json::from_value(ours.forms.clone()).unwrap_or_default();
            let their_forms: BTreeMap<String, Value> =
                serde_json::from_value(theirs.forms.clone()).unwrap_or_default();
            json!(merge_maps(&our_forms, &their_forms, override_existing))
        };

        let session_config = if override_existing || ours.session_config.is_none() {
            theirs.session_config.or(ours.session_config)
        } else {
            ours.session_config
        };

        Domain::from_dict(DomainDict {
            version: default_version(),
            intents,
            entities,
            slots,
            responses,
            actions,
            forms,
            e2e_actions,
            config,
            session_config,
        })
    }

    /// Intent declarations for merging. Implicitly declared intents are
    /// emitted as `use_entities: true` so they pick up entities the other
    /// domain contributes; explicit entity lists stay frozen.
    fn intents_for_merge(&self) -> Vec<Value> {
        self.intents
            .iter()
            .map(|(name, properties)| {
                let mut props = serde_json::Map::new();
                if properties.uses_all_entities {
                    props.insert("use_entities".to_string(), json!(true));
                } else {
                    props.insert(
                        "used_entities".to_string(),
                        json!(properties.used_entities.iter().collect::<Vec<_>>()),
                    );
                }
                if let Some(trigger) = &properties.triggers {
                    props.insert("triggers".to_string(), json!(trigger));
                }
                json!({ name.clone(): Value::Object(props) })
            })
            .collect()
    }

    pub fn intents(&self) -> &BTreeMap<String, IntentProperties> {
        &self.intents
    }

    pub fn intent_properties(&self, intent: &str) -> Option<&IntentProperties> {
        self.intents.get(intent)
    }

    /// All entity labels: plain names plus role/group qualified variants.
    pub fn entities(&self) -> Vec<String> {
        labels_for_entities(&self.entity_properties)
    }

    pub fn slots(&self) -> &[Slot] {
        &self.slots
    }

    pub fn slot(&self, name: &str) -> Option<&Slot> {
        self.slots.iter().find(|slot| slot.name() == name)
    }

    pub fn responses(&self) -> &BTreeMap<String, Vec<Value>> {
        &self.responses
    }

    pub fn forms(&self) -> &BTreeMap<String, Value> {
        &self.forms
    }

    pub fn form_names(&self) -> Vec<&str> {
        self.forms.keys().map(String::as_str).collect()
    }

    pub fn action_texts(&self) -> &[String] {
        &self.action_texts
    }

    pub fn session_config(&self) -> SessionConfig {
        self.session_config
    }

    /// The full action list: default actions (head, fixed order), user
    /// actions, response utterances, forms, end-to-end texts.
    pub fn action_names_or_texts(&self) -> &[String] {
        &self.action_names_or_texts
    }

    pub fn num_actions(&self) -> usize {
        self.action_names_or_texts.len()
    }

    pub fn index_for_action(&self, name: &str) -> Result<usize> {
        self.action_names_or_texts
            .iter()
            .position(|action| action == name)
            .ok_or_else(|| DialogueError::ActionNotFound {
                name: name.to_string(),
                available: self.action_names_or_texts.clone(),
            })
    }

    pub fn action_for_index(&self, index: usize) -> Result<&str> {
        self.action_names_or_texts
            .get(index)
            .map(String::as_str)
            .ok_or(DialogueError::ActionIndexOutOfRange {
                index,
                num_actions: self.action_names_or_texts.len(),
            })
    }

    /// The vocabulary used to size and index the prediction input vector.
    pub fn input_states(&self) -> &[String] {
        &self.input_states
    }

    /// Specification snapshot persisted alongside a trained model.
    pub fn specification(&self) -> Value {
        json!({ "states": self.input_states })
    }

    pub fn persist_specification(&self, model_path: impl AsRef<Path>) -> Result<()> {
        let path = model_path.as_ref().join(DOMAIN_SPECIFICATION_FILENAME);
        std::fs::write(path, serde_json::to_string_pretty(&self.specification())?)?;
        Ok(())
    }

    pub fn load_specification(model_path: impl AsRef<Path>) -> Result<Vec<String>> {
        let path = model_path.as_ref().join(DOMAIN_SPECIFICATION_FILENAME);
        let content = std::fs::read_to_string(path)?;
        let value: Value = serde_json::from_str(&content)?;
        Ok(value
            .get("states")
            .and_then(Value::as_array)
            .map(|states| {
                states
                    .iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default())
    }

    /// Compare the live input-state vocabulary against a persisted
    /// snapshot; any set difference forces retraining.
    pub fn compare_with_specification(&self, states: &[String]) -> Result<()> {
        let live: BTreeSet<&String> = self.input_states.iter().collect();
        let persisted: BTreeSet<&String> = states.iter().collect();

        if live == persisted {
            return Ok(());
        }

        Err(DialogueError::SpecificationMismatch {
            added: live
                .difference(&persisted)
                .map(|s| s.to_string())
                .collect(),
            removed: persisted
                .difference(&live)
                .map(|s| s.to_string())
                .collect(),
        })
    }
}

impl PartialEq for Domain {
    fn eq(&self, other: &Self) -> bool {
        json!(self.as_dict()) == json!(other.as_dict())
    }
}

fn base_entity_of(label: &str) -> &str {
    label
        .split(ENTITY_LABEL_SEPARATOR)
        .next()
        .unwrap_or(label)
}

fn labels_for_entities(entity_properties: &BTreeMap<String, EntityProperties>) -> Vec<String> {
    let mut labels = Vec::new();
    for (name, properties) in entity_properties {
        labels.push(name.clone());
        for role in &properties.roles {
            labels.push(format!("{name}{ENTITY_LABEL_SEPARATOR}{role}"));
        }
        for group in &properties.groups {
            labels.push(format!("{name}{ENTITY_LABEL_SEPARATOR}{group}"));
        }
    }
    labels
}

fn string_list(value: &Value) -> Vec<String> {
    value
        .as_array()
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

fn collect_entity_properties(
    raw_entities: &[Value],
    problems: &mut Vec<String>,
) -> BTreeMap<String, EntityProperties> {
    let mut entity_properties = BTreeMap::new();

    for raw in raw_entities {
        match raw {
            Value::String(name) => {
                entity_properties
                    .entry(name.clone())
                    .or_insert_with(EntityProperties::default);
            }
            Value::Object(map) if map.len() == 1 => {
                // Single-key map: name -> {roles, groups}
                let Some((name, props)) = map.iter().next() else {
                    continue;
                };
                let mut roles = props
                    .get("roles")
                    .map(string_list)
                    .unwrap_or_default();
                let mut groups = props
                    .get("groups")
                    .map(string_list)
                    .unwrap_or_default();
                roles.sort();
                groups.sort();
                entity_properties
                    .entry(name.clone())
                    .or_insert(EntityProperties { roles, groups });
            }
            other => {
                problems.push(format!("invalid entity declaration: {other}"));
            }
        }
    }

    entity_properties
}

fn collect_intent_properties(
    raw_intents: &[Value],
    entity_labels: &[String],
    problems: &mut Vec<String>,
) -> BTreeMap<String, IntentProperties> {
    let mut intents = BTreeMap::new();
    let all_entities: BTreeSet<String> = entity_labels.iter().cloned().collect();

    for raw in raw_intents {
        match raw {
            Value::String(name) => {
                intents.insert(
                    name.clone(),
                    IntentProperties {
                        used_entities: all_entities.clone(),
                        triggers: None,
                        uses_all_entities: true,
                    },
                );
            }
            Value::Object(map) if map.len() == 1 => {
                let Some((name, props)) = map.iter().next() else {
                    continue;
                };
                let properties =
                    resolve_intent_properties(name, props, entity_labels, &all_entities);
                intents.insert(name.clone(), properties);
            }
            other => {
                problems.push(format!("invalid intent declaration: {other}"));
            }
        }
    }

    intents
}

/// Resolve `use_entities`/`ignore_entities` into the single canonical
/// `used_entities` set. Ambiguous overlap logs a warning and excluding
/// wins. A canonical `used_entities` list is taken as-is.
fn resolve_intent_properties(
    intent: &str,
    props: &Value,
    entity_labels: &[String],
    all_entities: &BTreeSet<String>,
) -> IntentProperties {
    let triggers = props
        .get("triggers")
        .and_then(Value::as_str)
        .map(str::to_string);

    if let Some(canonical) = props.get("used_entities") {
        return IntentProperties {
            used_entities: string_list(canonical).into_iter().collect(),
            triggers,
            uses_all_entities: false,
        };
    }

    let use_entities = props.get("use_entities");
    let ignored: BTreeSet<String> = props
        .get("ignore_entities")
        .map(string_list)
        .unwrap_or_default()
        .into_iter()
        .collect();

    let used_base: BTreeSet<String> = match use_entities {
        None | Some(Value::Bool(true)) | Some(Value::Null) => all_entities
            .iter()
            .map(|label| base_entity_of(label).to_string())
            .collect(),
        Some(Value::Bool(false)) => BTreeSet::new(),
        Some(listed) => string_list(listed).into_iter().collect(),
    };

    let ambiguous: Vec<&String> = used_base.intersection(&ignored).collect();
    if !ambiguous.is_empty() {
        warn!(
            intent,
            entities = ?ambiguous,
            "entities are listed in both 'use_entities' and 'ignore_entities', \
             they will be ignored"
        );
    }

    let used_entities = entity_labels
        .iter()
        .filter(|label| {
            let base = base_entity_of(label);
            used_base.contains(base) && !ignored.contains(base)
        })
        .cloned()
        .collect();

    let uses_all_entities = matches!(
        use_entities,
        None | Some(Value::Bool(true)) | Some(Value::Null)
    ) && ignored.is_empty();

    IntentProperties {
        used_entities,
        triggers,
        uses_all_entities,
    }
}

/// Normalize the two accepted `forms` shapes into a mapping of form name
/// to slot mappings. The deprecated bare-list shape is accepted with a
/// forward-compatibility warning.
fn normalize_forms(raw_forms: &Value, problems: &mut Vec<String>) -> BTreeMap<String, Value> {
    match raw_forms {
        Value::Null => BTreeMap::new(),
        Value::Object(map) => map
            .iter()
            .map(|(name, mapping)| {
                let mapping = if mapping.is_null() {
                    json!({})
                } else {
                    mapping.clone()
                };
                (name.clone(), mapping)
            })
            .collect(),
        Value::Array(names) => {
            warn!(
                "the declaration of forms as a list of names is deprecated, \
                 declare forms as a mapping of form names to their slot mappings"
            );
            names
                .iter()
                .filter_map(Value::as_str)
                .map(|name| (name.to_string(), json!({})))
                .collect()
        }
        other => {
            problems.push(format!(
                "forms must be a mapping of form names to slot mappings, got: {other}"
            ));
            BTreeMap::new()
        }
    }
}

fn collect_slots(raw_slots: &SlotDeclarations, problems: &mut Vec<String>) -> Vec<Slot> {
    let mut slots = Vec::new();

    for (name, config) in &raw_slots.0 {
        // The `type` key selects the kind and is consumed here; the rest
        // of the config is interpreted by the kind itself.
        let type_name = match config.get("type").and_then(Value::as_str) {
            Some(type_name) => type_name,
            None => {
                problems.push(format!("slot '{name}' is missing a 'type' key"));
                continue;
            }
        };

        let kind = match SlotKind::resolve(type_name, config) {
            Ok(kind) => kind,
            Err(error) => {
                problems.push(error.to_string());
                continue;
            }
        };

        let mut slot = match Slot::new(name.clone(), kind) {
            Ok(slot) => slot,
            Err(error) => {
                problems.push(error.to_string());
                continue;
            }
        };

        if let Some(initial_value) = config.get("initial_value") {
            if !initial_value.is_null() {
                slot = slot.with_initial_value(initial_value.clone());
            }
        }
        if let Some(auto_fill) = config.get("auto_fill").and_then(Value::as_bool) {
            slot = slot.with_auto_fill(auto_fill);
        }
        if let Some(influence) = config
            .get("influence_conversation")
            .and_then(Value::as_bool)
        {
            slot = slot.with_influence_conversation(influence);
        }

        slots.push(slot);
    }

    slots
}

/// Append the synthetic default slots and the implicit categorical bucket.
fn add_default_slots(
    slots: &mut Vec<Slot>,
    forms: &BTreeMap<String, Value>,
    user_actions: &[String],
) {
    let has_slot = |slots: &[Slot], name: &str| slots.iter().any(|slot| slot.name() == name);

    if !forms.is_empty() && !has_slot(slots, REQUESTED_SLOT) {
        slots.push(Slot::text(REQUESTED_SLOT).with_influence_conversation(false));
    }

    if user_actions.iter().any(|a| a == DEFAULT_KNOWLEDGE_BASE_ACTION) {
        for name in [SLOT_LISTED_ITEMS, SLOT_LAST_OBJECT, SLOT_LAST_OBJECT_TYPE] {
            if !has_slot(slots, name) {
                slots.push(Slot::text(name).with_influence_conversation(false));
            }
        }
    }

    if !has_slot(slots, SESSION_START_METADATA_SLOT) {
        slots.push(Slot::any(SESSION_START_METADATA_SLOT));
    }

    for slot in slots.iter_mut() {
        if let SlotKind::Categorical { values } = slot.kind() {
            if !values.iter().any(|v| v == DEFAULT_CATEGORICAL_SLOT_VALUE) {
                let mut values = values.clone();
                values.push(DEFAULT_CATEGORICAL_SLOT_VALUE.to_string());
                *slot = replace_kind(slot, SlotKind::Categorical { values });
            }
        }
    }
}

fn replace_kind(slot: &Slot, kind: SlotKind) -> Slot {
    // Construction cannot fail: the kind is categorical.
    let mut replaced = Slot::new(slot.name().to_string(), kind)
        .unwrap_or_else(|_| Slot::text(slot.name()))
        .with_auto_fill(slot.auto_fill)
        .with_influence_conversation(slot.influence_conversation)
        .with_initial_value(slot.initial_value().clone());
    if slot.has_been_set() {
        replaced.set_value(slot.value().clone());
    }
    replaced
}

fn check_duplicates(names: &[String], what: &str, problems: &mut Vec<String>) {
    let mut seen = BTreeSet::new();
    let mut duplicates = BTreeSet::new();
    for name in names {
        if !seen.insert(name) {
            duplicates.insert(name.clone());
        }
    }
    if !duplicates.is_empty() {
        problems.push(format!("duplicate {what}: {duplicates:?}"));
    }
}

fn check_duplicate_slots(slots: &[Slot], problems: &mut Vec<String>) {
    let names: Vec<String> = slots.iter().map(|slot| slot.name().to_string()).collect();
    check_duplicates(&names, "slots", problems);
}

fn check_duplicate_entities(raw_entities: &[Value], problems: &mut Vec<String>) {
    let names: Vec<String> = raw_entities
        .iter()
        .filter_map(|raw| match raw {
            Value::String(name) => Some(name.clone()),
            Value::Object(map) if map.len() == 1 => map.keys().next().cloned(),
            _ => None,
        })
        .collect();
    check_duplicates(&names, "entities", problems);
}

/// The input-state vocabulary: intents, entity labels, per-dimension slot
/// feature names, actions and form names, deduplicated in that order.
fn compute_input_states(
    intents: &BTreeMap<String, IntentProperties>,
    entity_labels: &[String],
    slots: &[Slot],
    action_names_or_texts: &[String],
    forms: &BTreeMap<String, Value>,
) -> Vec<String> {
    let mut states: Vec<String> = Vec::new();
    let mut seen = BTreeSet::new();

    let mut push = |states: &mut Vec<String>, state: String| {
        if seen.insert(state.clone()) {
            states.push(state);
        }
    };

    for intent in intents.keys() {
        push(&mut states, intent.clone());
    }
    for label in entity_labels {
        push(&mut states, label.clone());
    }
    for slot in slots {
        for index in 0..slot.feature_dimensionality() {
            push(&mut states, format!("{}_{index}", slot.name()));
        }
    }
    for action in action_names_or_texts {
        push(&mut states, action.clone());
    }
    for form in forms.keys() {
        push(&mut states, form.clone());
    }

    states
}

fn slot_as_dict(slot: &Slot) -> Value {
    let mut dict = serde_json::Map::new();
    dict.insert("type".to_string(), json!(slot.kind().type_name()));
    if !slot.initial_value().is_null() {
        dict.insert("initial_value".to_string(), slot.initial_value().clone());
    }
    dict.insert("auto_fill".to_string(), json!(slot.auto_fill));
    dict.insert(
        "influence_conversation".to_string(),
        json!(slot.influence_conversation),
    );
    match slot.kind() {
        SlotKind::Float {
            min_value,
            max_value,
        } => {
            dict.insert("min_value".to_string(), json!(min_value));
            dict.insert("max_value".to_string(), json!(max_value));
        }
        SlotKind::Categorical { values } => {
            dict.insert("values".to_string(), json!(values));
        }
        _ => {}
    }
    Value::Object(dict)
}

fn merge_sorted_union(ours: &[String], theirs: &[String]) -> Vec<String> {
    let mut union: BTreeSet<String> = ours.iter().cloned().collect();
    union.extend(theirs.iter().cloned());
    union.into_iter().collect()
}

/// Left-biased merge of slot declarations, preserving declaration order.
fn merge_slot_declarations(
    ours: &SlotDeclarations,
    theirs: &SlotDeclarations,
    override_existing: bool,
) -> SlotDeclarations {
    let mut merged = ours.0.clone();
    for (name, config) in &theirs.0 {
        match merged.iter_mut().find(|(existing, _)| existing == name) {
            Some(entry) if override_existing => entry.1 = config.clone(),
            Some(_) => {}
            None => merged.push((name.clone(), config.clone())),
        }
    }
    SlotDeclarations(merged)
}

fn merge_maps<V: Clone>(
    ours: &BTreeMap<String, V>,
    theirs: &BTreeMap<String, V>,
    override_existing: bool,
) -> BTreeMap<String, V> {
    let mut merged = ours.clone();
    for (key, value) in theirs {
        if override_existing || !merged.contains_key(key) {
            merged.insert(key.clone(), value.clone());
        }
    }
    merged
}

/// Intents stay a list of single-key dicts; collisions are resolved per
/// the override flag.
fn merge_intent_lists(ours: &[Value], theirs: &[Value], override_existing: bool) -> Vec<Value> {
    let to_map = |raw: &[Value]| -> BTreeMap<String, Value> {
        raw.iter()
            .filter_map(|entry| match entry {
                Value::String(name) => Some((name.clone(), json!({}))),
                Value::Object(map) if map.len() == 1 => map
                    .iter()
                    .next()
                    .map(|(name, props)| (name.clone(), props.clone())),
                _ => None,
            })
            .collect()
    };

    merge_maps(&to_map(ours), &to_map(theirs), override_existing)
        .into_iter()
        .map(|(name, props)| json!({ name: props }))
        .collect()
}

fn merge_entity_lists(ours: &[Value], theirs: &[Value]) -> Vec<Value> {
    let mut problems = Vec::new();
    let mut merged = collect_entity_properties(ours, &mut problems);
    for (name, properties) in collect_entity_properties(theirs, &mut problems) {
        let entry = merged.entry(name).or_insert_with(EntityProperties::default);
        for role in properties.roles {
            if !entry.roles.contains(&role) {
                entry.roles.push(role);
            }
        }
        for group in properties.groups {
            if !entry.groups.contains(&group) {
                entry.groups.push(group);
            }
        }
        entry.roles.sort();
        entry.groups.sort();
    }

    merged
        .into_iter()
        .map(|(name, properties)| {
            if properties.roles.is_empty() && properties.groups.is_empty() {
                json!(name)
            } else {
                let mut props = serde_json::Map::new();
                if !properties.roles.is_empty() {
                    props.insert("roles".to_string(), json!(properties.roles));
                }
                if !properties.groups.is_empty() {
                    props.insert("groups".to_string(), json!(properties.groups));
                }
                json!({ name: Value::Object(props) })
            }
        })
        .collect()
}
