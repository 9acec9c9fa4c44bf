//! Audio round trip: upload a recording, fetch the reply audio, play it.
//!
//! Retry applies only to the reply-audio fetch, and only to transient
//! failures (network, timeout).  Uploads are never retried: a retried
//! upload could create a duplicate message on the server.

use std::sync::Arc;
use std::time::Duration;

use crate::api::{ApiError, AudioUpload, ConversationApi};
use crate::audio::{AudioSink, PlaybackError};

// ---------------------------------------------------------------------------
// RetryPolicy
// ---------------------------------------------------------------------------

/// Bounded exponential backoff for the reply-audio fetch.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub max_attempts: u32,
    /// Delay before the second attempt; doubles each retry.
    pub initial_backoff: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &crate::config::ApiConfig) -> Self {
        Self {
            max_attempts: config.fetch_retry_attempts.max(1),
            initial_backoff: Duration::from_millis(config.fetch_retry_backoff_ms),
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(250),
        }
    }
}

fn is_transient(err: &ApiError) -> bool {
    matches!(err, ApiError::Network(_) | ApiError::Timeout)
}

// ---------------------------------------------------------------------------
// AudioExchange
// ---------------------------------------------------------------------------

/// Coordinates the upload / fetch / play sequence over the API seam and
/// the local audio sink.
pub struct AudioExchange {
    api: Arc<dyn ConversationApi>,
    sink: Arc<dyn AudioSink>,
    retry: RetryPolicy,
}

impl AudioExchange {
    pub fn new(api: Arc<dyn ConversationApi>, sink: Arc<dyn AudioSink>, retry: RetryPolicy) -> Self {
        Self { api, sink, retry }
    }

    /// Upload a finalized WAV recording.  Single attempt.
    pub async fn upload(
        &self,
        conversation_id: &str,
        wav: Vec<u8>,
    ) -> Result<AudioUpload, ApiError> {
        log::debug!("uploading {} byte recording", wav.len());
        self.api.upload_recording(conversation_id, wav).await
    }

    /// Fetch the synthesized reply audio, retrying transient failures with
    /// exponential backoff.
    ///
    /// `NotFound` and protocol errors fail immediately; an empty payload is
    /// a protocol error, not silence.
    pub async fn fetch_reply_audio(
        &self,
        conversation_id: &str,
        message_id: &str,
    ) -> Result<Vec<u8>, ApiError> {
        // The policy fields are public; tolerate a zero by always making at
        // least one attempt.
        let max_attempts = self.retry.max_attempts.max(1);
        let mut backoff = self.retry.initial_backoff;

        for attempt in 1..=max_attempts {
            match self.api.fetch_message_audio(conversation_id, message_id).await {
                Ok(bytes) => {
                    if bytes.is_empty() {
                        return Err(ApiError::Protocol("empty audio payload".into()));
                    }
                    return Ok(bytes);
                }
                Err(err) if is_transient(&err) && attempt < max_attempts => {
                    log::warn!(
                        "reply audio fetch attempt {attempt}/{max_attempts} failed: {err}, \
                         retrying in {backoff:?}"
                    );
                    tokio::time::sleep(backoff).await;
                    backoff *= 2;
                }
                Err(err) => return Err(err),
            }
        }

        unreachable!("retry loop always returns")
    }

    /// Play reply audio to completion on the blocking pool.
    ///
    /// The rodio sink blocks until playback finishes, so it must not run on
    /// an async worker thread.
    pub async fn play(&self, bytes: Vec<u8>) -> Result<(), PlaybackError> {
        let sink = Arc::clone(&self.sink);
        tokio::task::spawn_blocking(move || sink.play(&bytes))
            .await
            .map_err(|e| PlaybackError::Device(format!("playback task failed: {e}")))?
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::MockApi;
    use std::sync::Mutex;

    /// Sink that records what it was asked to play.
    struct RecordingSink {
        played: Mutex<Vec<Vec<u8>>>,
    }

    impl RecordingSink {
        fn new() -> Self {
            Self {
                played: Mutex::new(Vec::new()),
            }
        }

        fn played(&self) -> Vec<Vec<u8>> {
            self.played.lock().unwrap().clone()
        }
    }

    impl AudioSink for RecordingSink {
        fn play(&self, bytes: &[u8]) -> Result<(), PlaybackError> {
            self.played.lock().unwrap().push(bytes.to_vec());
            Ok(())
        }
    }

    fn fast_retry() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(1),
        }
    }

    fn exchange_with(api: Arc<MockApi>, retry: RetryPolicy) -> AudioExchange {
        AudioExchange::new(api, Arc::new(RecordingSink::new()), retry)
    }

    #[tokio::test]
    async fn fetch_succeeds_first_try() {
        let api = Arc::new(MockApi::new("42"));
        let exchange = exchange_with(api.clone(), fast_retry());

        let bytes = exchange.fetch_reply_audio("42", "m1").await.unwrap();
        assert_eq!(bytes, vec![1, 2, 3]);
        assert_eq!(api.count("fetch_message_audio"), 1);
    }

    #[tokio::test]
    async fn transient_failures_are_retried() {
        let mock = MockApi::new("42");
        *mock.fetch_failures.lock().unwrap() = 2;
        let api = Arc::new(mock);
        let exchange = exchange_with(api.clone(), fast_retry());

        let bytes = exchange.fetch_reply_audio("42", "m1").await.unwrap();
        assert_eq!(bytes, vec![1, 2, 3]);
        assert_eq!(api.count("fetch_message_audio"), 3);
    }

    #[tokio::test]
    async fn retries_are_exhausted() {
        let mock = MockApi::new("42");
        *mock.fetch_failures.lock().unwrap() = 5;
        let api = Arc::new(mock);
        let exchange = exchange_with(api.clone(), fast_retry());

        let err = exchange.fetch_reply_audio("42", "m1").await.unwrap_err();
        assert!(matches!(err, ApiError::Network(_)));
        assert_eq!(api.count("fetch_message_audio"), 3);
    }

    #[tokio::test]
    async fn not_found_is_not_retried() {
        let mut mock = MockApi::new("42");
        mock.audio = Err(ApiError::NotFound("m1".into()));
        let api = Arc::new(mock);
        let exchange = exchange_with(api.clone(), fast_retry());

        let err = exchange.fetch_reply_audio("42", "m1").await.unwrap_err();
        assert!(matches!(err, ApiError::NotFound(_)));
        assert_eq!(api.count("fetch_message_audio"), 1);
    }

    #[tokio::test]
    async fn empty_payload_is_a_protocol_error() {
        let mut mock = MockApi::new("42");
        mock.audio = Ok(Vec::new());
        let api = Arc::new(mock);
        let exchange = exchange_with(api.clone(), fast_retry());

        let err = exchange.fetch_reply_audio("42", "m1").await.unwrap_err();
        assert!(matches!(err, ApiError::Protocol(_)));
        // Empty payload is final, no point retrying.
        assert_eq!(api.count("fetch_message_audio"), 1);
    }

    #[tokio::test]
    async fn play_reaches_the_sink() {
        let sink = Arc::new(RecordingSink::new());
        let exchange = AudioExchange::new(
            Arc::new(MockApi::new("42")),
            sink.clone(),
            RetryPolicy::default(),
        );

        exchange.play(vec![9, 8, 7]).await.unwrap();
        assert_eq!(sink.played(), vec![vec![9, 8, 7]]);
    }

    #[tokio::test]
    async fn zero_attempt_policy_still_fetches_once() {
        let mock = MockApi::new("42");
        *mock.fetch_failures.lock().unwrap() = 5;
        let api = Arc::new(mock);
        let exchange = exchange_with(
            api.clone(),
            RetryPolicy {
                max_attempts: 0,
                initial_backoff: Duration::from_millis(1),
            },
        );

        let err = exchange.fetch_reply_audio("42", "m1").await.unwrap_err();
        assert!(matches!(err, ApiError::Network(_)));
        assert_eq!(api.count("fetch_message_audio"), 1);
    }

    #[test]
    fn retry_policy_from_config_enforces_at_least_one_attempt() {
        let mut config = crate::config::ApiConfig::default();
        config.fetch_retry_attempts = 0;
        let policy = RetryPolicy::from_config(&config);
        assert_eq!(policy.max_attempts, 1);
    }
}
