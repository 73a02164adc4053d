pub mod api;
pub mod models;
pub mod service;

pub use models::{Conversation, ConversationPrefs};
pub use service::{ConversationBook, InboundOutcome};
