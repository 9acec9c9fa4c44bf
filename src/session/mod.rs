//! Conversation session layer — state, audio exchange, and the controller
//! loop that drives both.

pub mod controller;
pub mod conversation;
pub mod exchange;

pub use controller::{DisplayEvent, SessionCommand, SessionController};
pub use conversation::{Conversation, ConversationSession, Message, Role, SessionError};
pub use exchange::{AudioExchange, RetryPolicy};
