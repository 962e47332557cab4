//! Dialogue state tracking core
//!
//! This crate maintains conversational state for dialogue systems. It
//! provides:
//! - An append-only, replayable event log as the sole source of truth for
//!   a conversation
//! - Typed slots with failure-free featurization for prediction models
//! - An immutable domain describing a bot's vocabulary (intents, entities,
//!   slots, actions, forms, responses) with validated construction and
//!   mergeable multi-file loading
//! - State projection from trackers into bounded, model-ready snapshots
//! - Pluggable tracker persistence with event streaming
//!
//! A tracker is always a pure function of its event log: every derived
//! value can be recomputed by replaying the events in order.

pub mod constants;
pub mod domain;
pub mod error;
pub mod events;
pub mod slots;
pub mod store;
pub mod tracker;

// Re-export main types
pub use domain::{
    ActionSubState, Domain, DomainDict, EntityProperties, IntentProperties,
    LoopSubState, RuleOnlyData, SessionConfig, SlotDeclarations, State, UserSubState,
};
pub use error::{DialogueError, Result};
pub use events::{
    deserialise_events, Dialogue, Entity, Event, EventMetadata, IntentPrediction,
};
pub use slots::{Slot, SlotKind};
pub use store::{
    create_tracker_store, serialise_tracker, EndpointConfig, EventBroker,
    InMemoryEventBroker, InMemoryTrackerStore, TrackerStore,
};
pub use tracker::{DialogueStateTracker, LatestAction, LatestMessage};
