//! Chat session core
//!
//! This module contains the pieces that turn one user message into a
//! persisted exchange:
//!
//! - `message`: conversation and message data model
//! - `accumulator`: folds streamed fragments into a placeholder reply
//! - `reconciler`: single owner of the visible message list
//! - `collaborators`: store and realtime-feed interfaces
//! - `orchestrator`: the [`ChatSession`] that runs each turn

pub mod accumulator;
pub mod collaborators;
pub mod message;
pub mod orchestrator;
pub mod reconciler;

pub use accumulator::{FinishedReply, ReplyAccumulator};
pub use collaborators::{ChatStore, RealtimeFeed, Subscription};
pub use message::{derive_title, Conversation, LocalId, Message, MessageIdentity, Role};
pub use orchestrator::{ChatSession, TurnOutcome};
pub use reconciler::{
    spawn_reconciler, InsertSource, ReconcileEvent, Reconciler, ReconcilerHandle,
    ReconcilerState, ReconcilerTask,
};
