//! Typed conversation slots
//!
//! A slot is a named memory cell holding a fact learned during a
//! conversation. Each slot kind knows how to turn its value into a
//! fixed-size feature vector for the prediction model. Featurization never
//! fails: invalid or out-of-range values degrade to a correctly-sized
//! all-zero vector.

use serde_json::Value;
use tracing::warn;

use crate::constants::DEFAULT_CATEGORICAL_SLOT_VALUE;
use crate::error::{DialogueError, Result};

/// The closed set of slot kinds. Type names in a domain file resolve
/// against this registry.
#[derive(Debug, Clone, PartialEq)]
pub enum SlotKind {
    /// 1-dim presence feature.
    Text,
    /// 2-dim: set?, truth value.
    Bool,
    /// 2-dim: set?, value normalized into `[min, max]`.
    Float { min_value: f64, max_value: f64 },
    /// 1-dim: non-empty?
    List,
    /// One-hot over the declared values plus the `__other__` bucket.
    Categorical { values: Vec<String> },
    /// Unfeaturized passthrough.
    Any,
}

impl SlotKind {
    /// The type name used in domain files.
    pub fn type_name(&self) -> &'static str {
        match self {
            SlotKind::Text => "text",
            SlotKind::Bool => "bool",
            SlotKind::Float { .. } => "float",
            SlotKind::List => "list",
            SlotKind::Categorical { .. } => "categorical",
            SlotKind::Any => "any",
        }
    }

    /// Resolve a declared type name against the registry, reading any
    /// kind-specific configuration (float range, categorical values) from
    /// the raw slot declaration.
    pub fn resolve(type_name: &str, raw_config: &Value) -> Result<Self> {
        match type_name {
            "text" => Ok(SlotKind::Text),
            "bool" => Ok(SlotKind::Bool),
            "float" => {
                let min_value = raw_config
                    .get("min_value")
                    .and_then(Value::as_f64)
                    .unwrap_or(0.0);
                let max_value = raw_config
                    .get("max_value")
                    .and_then(Value::as_f64)
                    .unwrap_or(1.0);
                Ok(SlotKind::Float {
                    min_value,
                    max_value,
                })
            }
            "list" => Ok(SlotKind::List),
            "categorical" => {
                let values = raw_config
                    .get("values")
                    .and_then(Value::as_array)
                    .map(|values| {
                        values
                            .iter()
                            .map(|v| match v {
                                Value::String(s) => s.clone(),
                                other => other.to_string(),
                            })
                            .collect()
                    })
                    .unwrap_or_default();
                Ok(SlotKind::Categorical { values })
            }
            "any" => Ok(SlotKind::Any),
            _ => Err(DialogueError::InvalidSlotType {
                type_name: type_name.to_string(),
            }),
        }
    }
}

/// Key-value store for one piece of information tracked during a
/// conversation.
#[derive(Debug, Clone, PartialEq)]
pub struct Slot {
    name: String,
    kind: SlotKind,
    value: Value,
    initial_value: Value,
    /// Whether entity extraction auto-populates this slot.
    pub auto_fill: bool,
    /// Whether the slot is featurized and hence influences predictions.
    pub influence_conversation: bool,
    has_been_set: bool,
}

impl Slot {
    pub fn new(name: impl Into<String>, kind: SlotKind) -> Result<Self> {
        let name = name.into();

        if let SlotKind::Float {
            min_value,
            max_value,
        } = &kind
        {
            if min_value >= max_value {
                return Err(DialogueError::InvalidSlotConfig {
                    slot: name,
                    message: format!(
                        "invalid range using min ({min_value}) and max ({max_value}) \
                         values, min must be smaller than max"
                    ),
                });
            }
        }

        Ok(Self::unchecked(name, kind))
    }

    fn unchecked(name: String, kind: SlotKind) -> Self {
        // Any slots cannot be featurized.
        let influence_conversation = !matches!(kind, SlotKind::Any);

        Self {
            name,
            kind,
            value: Value::Null,
            initial_value: Value::Null,
            auto_fill: true,
            influence_conversation,
            has_been_set: false,
        }
    }

    pub fn text(name: impl Into<String>) -> Self {
        Self::unchecked(name.into(), SlotKind::Text)
    }

    pub fn any(name: impl Into<String>) -> Self {
        Self::unchecked(name.into(), SlotKind::Any)
    }

    pub fn with_initial_value(mut self, initial_value: Value) -> Self {
        if let SlotKind::Float {
            min_value,
            max_value,
        } = &self.kind
        {
            if let Some(number) = initial_value.as_f64() {
                if number < *min_value || number > *max_value {
                    warn!(
                        slot = %self.name,
                        value = number,
                        min = min_value,
                        max = max_value,
                        "float slot created with an initial value outside its configured range"
                    );
                }
            }
        }

        self.initial_value = initial_value.clone();
        self.value = initial_value;
        self
    }

    pub fn with_auto_fill(mut self, auto_fill: bool) -> Self {
        self.auto_fill = auto_fill;
        self
    }

    pub fn with_influence_conversation(mut self, influence_conversation: bool) -> Self {
        // Any slots stay unfeaturized regardless.
        self.influence_conversation =
            influence_conversation && !matches!(self.kind, SlotKind::Any);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> &SlotKind {
        &self.kind
    }

    pub fn value(&self) -> &Value {
        &self.value
    }

    pub fn initial_value(&self) -> &Value {
        &self.initial_value
    }

    pub fn has_been_set(&self) -> bool {
        self.has_been_set
    }

    pub fn set_value(&mut self, value: Value) {
        self.value = value;
        self.has_been_set = true;
    }

    /// Restore the initial value and clear the set flag.
    pub fn reset(&mut self) {
        self.value = self.initial_value.clone();
        self.has_been_set = false;
    }

    /// How many features this slot contributes. `0` if the slot is
    /// unfeaturized; always equals `as_feature().len()`.
    pub fn feature_dimensionality(&self) -> usize {
        if !self.influence_conversation {
            return 0;
        }

        match &self.kind {
            SlotKind::Text | SlotKind::List => 1,
            SlotKind::Bool | SlotKind::Float { .. } => 2,
            SlotKind::Categorical { values } => values.len(),
            SlotKind::Any => 0,
        }
    }

    pub fn has_features(&self) -> bool {
        self.feature_dimensionality() != 0
    }

    /// Feature vector for the current value. Never fails: values that
    /// cannot be interpreted for the slot's kind produce zeros.
    pub fn as_feature(&self) -> Vec<f64> {
        if !self.influence_conversation {
            return vec![];
        }

        match &self.kind {
            SlotKind::Text => {
                vec![if self.value.is_null() { 0.0 } else { 1.0 }]
            }
            SlotKind::Bool => match bool_from_any(&self.value) {
                Some(truth) => vec![1.0, if truth { 1.0 } else { 0.0 }],
                None => vec![0.0, 0.0],
            },
            SlotKind::Float {
                min_value,
                max_value,
            } => match float_from_any(&self.value) {
                Some(number) => {
                    let capped = number.clamp(*min_value, *max_value);
                    let covered_range = max_value - min_value;
                    vec![1.0, (capped - min_value) / covered_range]
                }
                None => vec![0.0, 0.0],
            },
            SlotKind::List => {
                let non_empty = self
                    .value
                    .as_array()
                    .map(|items| !items.is_empty())
                    .unwrap_or(false);
                vec![if non_empty { 1.0 } else { 0.0 }]
            }
            SlotKind::Categorical { values } => {
                let mut features = vec![0.0; values.len()];
                if self.value.is_null() {
                    return features;
                }

                let current = match &self.value {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                };

                let hit = values
                    .iter()
                    .position(|v| v.eq_ignore_ascii_case(&current))
                    .or_else(|| {
                        values
                            .iter()
                            .position(|v| v == DEFAULT_CATEGORICAL_SLOT_VALUE)
                    });

                if let Some(index) = hit {
                    features[index] = 1.0;
                }
                features
            }
            SlotKind::Any => vec![],
        }
    }
}

impl std::fmt::Display for Slot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}Slot({}: {})", self.kind.type_name(), self.name, self.value)
    }
}

/// Interpret a json value as a boolean. Accepts booleans, 0/1 numerics and
/// "true"/"false" strings.
fn bool_from_any(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(b) => Some(*b),
        Value::Number(n) => n.as_f64().map(|f| f == 1.0),
        Value::String(s) => {
            let trimmed = s.trim();
            if let Ok(number) = trimmed.parse::<f64>() {
                Some(number == 1.0)
            } else {
                match trimmed.to_lowercase().as_str() {
                    "true" => Some(true),
                    "false" => Some(false),
                    _ => None,
                }
            }
        }
        _ => None,
    }
}

/// Interpret a json value as a float. Accepts numbers and numeric strings.
fn float_from_any(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
}
