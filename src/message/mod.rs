//! Message domain: the entity, its normalization and fingerprint, the state
//! machine, and the service that persists transitions.

mod error;
mod hash;
pub mod normalize;
mod service;
mod state;
mod types;

pub use error::MessageError;
pub use hash::{compute_hash, inbound_fingerprint, HashFields};
pub use normalize::NormalizeOptions;
pub use service::{Ingested, MessageService};
pub use state::Transition;
pub use types::{
    Direction, Message, MessageBuilder, MessageDraft, MessageState, MessageType, Mime, Priority,
    SendMode, SendResult,
};
