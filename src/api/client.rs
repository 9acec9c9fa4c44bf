//! Remote conversation API client.
//!
//! [`ConversationApi`] is the async seam the session layer talks through;
//! [`HttpConversationApi`] is the reqwest implementation of the four
//! endpoints:
//!
//! * `POST /conversations`                                  `{name}` -> `{id}`
//! * `POST /conversations/{id}/messages`                 `{content}` -> `{reply}`
//! * `POST /conversations/{id}/messages/audio`   multipart `recording` -> `{id, content}`
//! * `GET  /conversations/{id}/messages/{messageId}/audio`            -> binary audio
//!
//! Every call runs under the client-level timeout from [`ApiConfig`].

use async_trait::async_trait;
use serde::Deserialize;
use thiserror::Error;

use crate::config::ApiConfig;

// ---------------------------------------------------------------------------
// ApiError
// ---------------------------------------------------------------------------

/// Errors surfaced by the remote conversation API.
#[derive(Debug, Clone, Error)]
pub enum ApiError {
    /// Transport-level failure: connection refused, DNS, broken pipe.
    #[error("network error: {0}")]
    Network(String),

    /// The request did not complete within the configured timeout.
    #[error("request timed out")]
    Timeout,

    /// The server answered, but not in the shape the protocol promises
    /// (unexpected status, malformed JSON, missing id).
    #[error("malformed server response: {0}")]
    Protocol(String),

    /// The server reports no audio for the given message id.
    #[error("no reply audio for message {0}")]
    NotFound(String),
}

impl From<reqwest::Error> for ApiError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            ApiError::Timeout
        } else if e.is_decode() {
            ApiError::Protocol(e.to_string())
        } else {
            ApiError::Network(e.to_string())
        }
    }
}

// ---------------------------------------------------------------------------
// ConversationApi trait
// ---------------------------------------------------------------------------

/// Result of a successful audio upload: the server-assigned message id and
/// the authoritative transcription of the utterance.
#[derive(Debug, Clone)]
pub struct AudioUpload {
    pub message_id: String,
    pub content: String,
}

/// Async seam over the remote conversation API.
///
/// Implementors must be `Send + Sync` so they can be shared as
/// `Arc<dyn ConversationApi>` between the session and the audio exchange.
#[async_trait]
pub trait ConversationApi: Send + Sync {
    /// Create a conversation and return its server-assigned id.
    async fn create_conversation(&self, name: &str) -> Result<String, ApiError>;

    /// Send a text message and return the assistant's reply text.
    async fn send_message(&self, conversation_id: &str, content: &str)
        -> Result<String, ApiError>;

    /// Upload a finalized WAV recording as a multipart form.
    async fn upload_recording(
        &self,
        conversation_id: &str,
        wav: Vec<u8>,
    ) -> Result<AudioUpload, ApiError>;

    /// Fetch the synthesized reply audio for a message.
    async fn fetch_message_audio(
        &self,
        conversation_id: &str,
        message_id: &str,
    ) -> Result<Vec<u8>, ApiError>;
}

// ---------------------------------------------------------------------------
// HttpConversationApi
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct CreatedConversation {
    id: String,
}

#[derive(Debug, Deserialize)]
struct MessageReply {
    reply: String,
}

#[derive(Debug, Deserialize)]
struct UploadedMessage {
    id: String,
    content: String,
}

/// Reject the empty-string ids some backends emit instead of an error.
fn require_id(id: String, what: &str) -> Result<String, ApiError> {
    if id.is_empty() {
        Err(ApiError::Protocol(format!("server returned empty {what}")))
    } else {
        Ok(id)
    }
}

/// reqwest-backed [`ConversationApi`].
pub struct HttpConversationApi {
    client: reqwest::Client,
    base_url: String,
}

impl HttpConversationApi {
    /// Build a client from application config.
    ///
    /// The per-request timeout comes from `config.timeout_secs`; a default
    /// (no-timeout) client is the last-resort fallback if the builder fails.
    pub fn from_config(config: &ApiConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(config.timeout_secs))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    /// Map a non-success status to the right [`ApiError`], consuming the
    /// response body for the message.
    async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, ApiError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(ApiError::Protocol(format!("unexpected status {status}: {body}")))
    }
}

#[async_trait]
impl ConversationApi for HttpConversationApi {
    async fn create_conversation(&self, name: &str) -> Result<String, ApiError> {
        let response = self
            .client
            .post(self.url("/conversations"))
            .json(&serde_json::json!({ "name": name }))
            .send()
            .await?;

        let created: CreatedConversation = Self::check_status(response).await?.json().await?;
        require_id(created.id, "conversation id")
    }

    async fn send_message(
        &self,
        conversation_id: &str,
        content: &str,
    ) -> Result<String, ApiError> {
        let response = self
            .client
            .post(self.url(&format!("/conversations/{conversation_id}/messages")))
            .json(&serde_json::json!({ "content": content }))
            .send()
            .await?;

        let reply: MessageReply = Self::check_status(response).await?.json().await?;
        Ok(reply.reply)
    }

    async fn upload_recording(
        &self,
        conversation_id: &str,
        wav: Vec<u8>,
    ) -> Result<AudioUpload, ApiError> {
        let part = reqwest::multipart::Part::bytes(wav)
            .file_name("recording.wav")
            .mime_str("audio/wav")
            .map_err(|e| ApiError::Protocol(e.to_string()))?;
        let form = reqwest::multipart::Form::new().part("recording", part);

        let response = self
            .client
            .post(self.url(&format!("/conversations/{conversation_id}/messages/audio")))
            .multipart(form)
            .send()
            .await?;

        let uploaded: UploadedMessage = Self::check_status(response).await?.json().await?;
        Ok(AudioUpload {
            message_id: require_id(uploaded.id, "message id")?,
            content: uploaded.content,
        })
    }

    async fn fetch_message_audio(
        &self,
        conversation_id: &str,
        message_id: &str,
    ) -> Result<Vec<u8>, ApiError> {
        let response = self
            .client
            .get(self.url(&format!(
                "/conversations/{conversation_id}/messages/{message_id}/audio"
            )))
            .send()
            .await?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(ApiError::NotFound(message_id.to_string()));
        }

        let bytes = Self::check_status(response).await?.bytes().await?;
        Ok(bytes.to_vec())
    }
}

// ---------------------------------------------------------------------------
// MockApi  (test-only)
// ---------------------------------------------------------------------------


// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
