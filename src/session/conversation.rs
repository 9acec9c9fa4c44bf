//! Conversation state and the ordered message log.
//!
//! [`ConversationSession`] is the client-side view of one conversation: the
//! remote id plus the append-only log of user and assistant messages, in
//! the order they were committed.  Messaging goes through the
//! [`ConversationApi`] seam; this layer owns *what* the log says, never
//! *how* bytes move.

use std::sync::Arc;

use thiserror::Error;

use crate::api::{ApiError, ConversationApi};
use crate::session::exchange::AudioExchange;

// ---------------------------------------------------------------------------
// Data model
// ---------------------------------------------------------------------------

/// Who authored a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    User,
    Assistant,
}

/// An active conversation bound to its server-assigned id.
#[derive(Debug, Clone)]
pub struct Conversation {
    pub id: String,
    pub display_name: String,
}

/// One entry in the message log.
///
/// `id` is present only for messages the server has acknowledged with an
/// id of its own (audio messages); text echoes and replies carry none.
/// `audio_ref` points at the server message whose synthesized audio
/// belongs to this entry.
#[derive(Debug, Clone)]
pub struct Message {
    pub id: Option<String>,
    pub role: Role,
    pub content: String,
    pub audio_ref: Option<String>,
}

impl Message {
    fn text(role: Role, content: impl Into<String>) -> Self {
        Self {
            id: None,
            role,
            content: content.into(),
            audio_ref: None,
        }
    }
}

// ---------------------------------------------------------------------------
// SessionError
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum SessionError {
    /// A message operation was attempted before any conversation exists.
    #[error("no active conversation")]
    NotReady,

    #[error(transparent)]
    Api(#[from] ApiError),
}

// ---------------------------------------------------------------------------
// ConversationSession
// ---------------------------------------------------------------------------

/// Client-side conversation state over the remote API.
pub struct ConversationSession {
    api: Arc<dyn ConversationApi>,
    conversation: Option<Conversation>,
    log: Vec<Message>,
}

impl ConversationSession {
    pub fn new(api: Arc<dyn ConversationApi>) -> Self {
        Self {
            api,
            conversation: None,
            log: Vec::new(),
        }
    }

    pub fn conversation(&self) -> Option<&Conversation> {
        self.conversation.as_ref()
    }

    /// The committed message log, oldest first.
    pub fn messages(&self) -> &[Message] {
        &self.log
    }

    /// Create the conversation on the server.
    ///
    /// Starting twice is idempotent: the existing conversation is returned
    /// unchanged and the second name is ignored with a warning.
    pub async fn start(&mut self, name: &str) -> Result<Conversation, SessionError> {
        if let Some(existing) = &self.conversation {
            log::warn!(
                "conversation '{}' already active, ignoring start('{name}')",
                existing.display_name
            );
            return Ok(existing.clone());
        }

        let id = self.api.create_conversation(name).await?;
        log::info!("conversation '{name}' created with id {id}");
        let conversation = Conversation {
            id,
            display_name: name.to_string(),
        };
        self.conversation = Some(conversation.clone());
        Ok(conversation)
    }

    /// Send a text message and append both sides to the log.
    ///
    /// The user's message is echoed into the log *before* the request is
    /// made, so a failed send still shows what the user said; only the
    /// assistant reply is missing.
    pub async fn send_text(&mut self, content: &str) -> Result<Message, SessionError> {
        let conversation_id = self.require_conversation()?.id.clone();

        self.log.push(Message::text(Role::User, content));

        let reply = self.api.send_message(&conversation_id, content).await?;
        let message = Message::text(Role::Assistant, reply);
        self.log.push(message.clone());
        Ok(message)
    }

    /// Upload a finalized recording and commit the user-side message with
    /// the server's authoritative transcription.
    ///
    /// The returned message carries the server message id in `audio_ref`,
    /// which is what the reply-audio fetch keys on.
    pub async fn send_audio(
        &mut self,
        exchange: &AudioExchange,
        wav: Vec<u8>,
    ) -> Result<Message, SessionError> {
        let conversation_id = self.require_conversation()?.id.clone();

        let upload = exchange.upload(&conversation_id, wav).await?;
        let message = Message {
            id: Some(upload.message_id.clone()),
            role: Role::User,
            content: upload.content,
            audio_ref: Some(upload.message_id),
        };
        self.log.push(message.clone());
        Ok(message)
    }

    fn require_conversation(&self) -> Result<&Conversation, SessionError> {
        self.conversation.as_ref().ok_or(SessionError::NotReady)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
