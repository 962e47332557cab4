//! Crate-wide error type.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, DialogueError>;

#[derive(Debug, Error)]
pub enum DialogueError {
    /// The domain description is malformed. The message aggregates every
    /// problem found during construction.
    #[error("the domain is invalid: {0}")]
    InvalidDomain(String),

    #[error("'{type_name}' is not a known slot type")]
    InvalidSlotType { type_name: String },

    #[error("slot '{slot}' is misconfigured: {message}")]
    InvalidSlotConfig { slot: String, message: String },

    #[error("cannot access action '{name}', only the following are known: {available:?}")]
    ActionNotFound { name: String, available: Vec<String> },

    #[error("cannot access action at index {index}, domain has {num_actions} actions")]
    ActionIndexOutOfRange { index: usize, num_actions: usize },

    /// The loaded domain no longer matches the specification a model was
    /// trained with.
    #[error(
        "domain specification has changed, states were added: {added:?}, removed: {removed:?}"
    )]
    SpecificationMismatch {
        added: Vec<String>,
        removed: Vec<String>,
    },

    #[error("cannot connect to tracker store: {0}")]
    Connection(String),

    #[error("cannot publish event: {0}")]
    Publishing(String),

    /// Stored tracker data in the deprecated pickle serialization.
    #[error("tracker for sender '{sender_id}' uses the deprecated pickle serialization")]
    LegacyTrackerFormat { sender_id: String },

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
