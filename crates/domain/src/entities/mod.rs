//! 领域实体定义

pub mod conversation;
pub mod message;
pub mod user_match;

pub use conversation::{Conversation, MessageDraft};
pub use message::{Message, MessageStatus, Recipient};
pub use user_match::{Match, MatchOutcome};
