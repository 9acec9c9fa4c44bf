//! Session controller: the single async loop that owns all mutable state.
//!
//! Commands come in on one channel, display events go out on another, and
//! captured audio chunks arrive on a third.  The loop is the only place
//! the conversation log and the recorder are touched, so no locking is
//! needed anywhere in the session layer.
//!
//! The select is biased toward the chunk channel: queued audio is always
//! drained before a stop command is acted on, so every chunk delivered
//! before the stop makes it into the finalized recording.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc;

use crate::api::ConversationApi;
use crate::audio::{AudioSink, CaptureDevice, CapturedChunk};
use crate::recording::{FinalizedRecording, RecordError, RecordingSession};
use crate::session::conversation::{Conversation, ConversationSession, Role};
use crate::session::exchange::{AudioExchange, RetryPolicy};
use crate::stt::Transcriber;

// ---------------------------------------------------------------------------
// Commands and display events
// ---------------------------------------------------------------------------

/// Requests from the user interface into the session loop.
#[derive(Debug, Clone)]
pub enum SessionCommand {
    StartConversation { name: String },
    SendText { content: String },
    StartRecording,
    StopRecording,
}

/// Everything the user interface needs to render, in commit order.
#[derive(Debug, Clone)]
pub enum DisplayEvent {
    ConversationReady { conversation: Conversation },
    Message { role: Role, content: String },
    /// Advisory live transcript of the in-progress recording.  Display
    /// only; the server transcription that arrives with the upload is the
    /// one that goes into the log.
    TranscriptionUpdate { text: String },
    RecordingStarted,
    RecordingStopped { duration_secs: f32 },
    Error { message: String },
}

// ---------------------------------------------------------------------------
// SessionController
// ---------------------------------------------------------------------------

/// Owns the conversation, the recorder, and the audio exchange, and drives
/// them from a command channel.
pub struct SessionController {
    session: ConversationSession,
    recorder: RecordingSession,
    exchange: AudioExchange,
    transcriber: Arc<Transcriber>,
    device: Arc<dyn CaptureDevice>,
    chunk_tx: mpsc::Sender<CapturedChunk>,
    chunk_rx: mpsc::Receiver<CapturedChunk>,
    advisory_tx: mpsc::Sender<String>,
    advisory_rx: mpsc::Receiver<String>,
    advisory_busy: Arc<AtomicBool>,
    display_tx: mpsc::Sender<DisplayEvent>,
}

impl SessionController {
    pub fn new(
        api: Arc<dyn ConversationApi>,
        device: Arc<dyn CaptureDevice>,
        sink: Arc<dyn AudioSink>,
        transcriber: Arc<Transcriber>,
        retry: RetryPolicy,
        chunk_capacity: usize,
        display_tx: mpsc::Sender<DisplayEvent>,
    ) -> Self {
        let (chunk_tx, chunk_rx) = mpsc::channel(chunk_capacity.max(1));
        let (advisory_tx, advisory_rx) = mpsc::channel(4);

        Self {
            session: ConversationSession::new(Arc::clone(&api)),
            recorder: RecordingSession::new(),
            exchange: AudioExchange::new(api, sink, retry),
            transcriber,
            device,
            chunk_tx,
            chunk_rx,
            advisory_tx,
            advisory_rx,
            advisory_busy: Arc::new(AtomicBool::new(false)),
            display_tx,
        }
    }

    /// Drive the session until the command channel closes.
    pub async fn run(mut self, mut command_rx: mpsc::Receiver<SessionCommand>) {
        loop {
            // `chunk_tx` and `advisory_tx` live in `self`, so those two
            // receivers never close; only the command channel can end the
            // loop.
            tokio::select! {
                biased;

                Some(chunk) = self.chunk_rx.recv() => {
                    self.handle_chunk(chunk);
                }

                Some(text) = self.advisory_rx.recv() => {
                    self.display(DisplayEvent::TranscriptionUpdate { text }).await;
                }

                command = command_rx.recv() => {
                    match command {
                        Some(command) => self.handle_command(command).await,
                        None => break,
                    }
                }
            }
        }
        log::info!("session loop shutting down");
    }

    // ---- Audio chunks -----------------------------------------------------

    fn handle_chunk(&mut self, chunk: CapturedChunk) {
        match self.recorder.append(chunk) {
            Ok(()) => self.spawn_advisory(),
            // Chunks in flight when the recording stopped.
            Err(RecordError::NotRecording) => {
                log::debug!("dropping chunk delivered after stop");
            }
            Err(err) => log::warn!("chunk rejected: {err}"),
        }
    }

    /// Kick off one advisory transcription pass over the audio so far.
    ///
    /// Single-flight: while a pass is running, new chunks accumulate but do
    /// not start another one, so a slow model can never pile up inference
    /// jobs.  Advisory failures are logged and swallowed.
    fn spawn_advisory(&self) {
        if self.advisory_busy.swap(true, Ordering::SeqCst) {
            return;
        }

        let snapshot = self.recorder.samples_snapshot();
        let transcriber = Arc::clone(&self.transcriber);
        let busy = Arc::clone(&self.advisory_busy);
        let tx = self.advisory_tx.clone();

        tokio::task::spawn_blocking(move || {
            let result = transcriber.transcribe(&snapshot);
            busy.store(false, Ordering::SeqCst);
            match result {
                Ok(result) if !result.text.trim().is_empty() => {
                    // Loop gone means shutdown; nothing to do.
                    let _ = tx.blocking_send(result.text);
                }
                Ok(_) => {}
                Err(err) => log::debug!("advisory transcription skipped: {err}"),
            }
        });
    }

    // ---- Commands ---------------------------------------------------------

    async fn handle_command(&mut self, command: SessionCommand) {
        match command {
            SessionCommand::StartConversation { name } => {
                match self.session.start(&name).await {
                    Ok(conversation) => {
                        self.display(DisplayEvent::ConversationReady { conversation })
                            .await;
                    }
                    Err(err) => self.display_error(format!("could not start: {err}")).await,
                }
            }

            SessionCommand::SendText { content } => {
                self.display(DisplayEvent::Message {
                    role: Role::User,
                    content: content.clone(),
                })
                .await;

                match self.session.send_text(&content).await {
                    Ok(reply) => {
                        self.display(DisplayEvent::Message {
                            role: Role::Assistant,
                            content: reply.content,
                        })
                        .await;
                    }
                    Err(err) => self.display_error(format!("send failed: {err}")).await,
                }
            }

            SessionCommand::StartRecording => {
                match self.recorder.start(self.device.as_ref(), self.chunk_tx.clone()) {
                    Ok(()) => self.display(DisplayEvent::RecordingStarted).await,
                    Err(err) => {
                        self.display_error(format!("recording failed: {err}")).await;
                    }
                }
            }

            SessionCommand::StopRecording => match self.recorder.stop() {
                Some(finalized) => {
                    self.display(DisplayEvent::RecordingStopped {
                        duration_secs: finalized.duration_secs(),
                    })
                    .await;
                    self.send_recording(finalized).await;
                }
                None => log::debug!("stop with no active recording"),
            },
        }
    }

    /// Upload the finalized recording, then fetch and play the reply audio.
    ///
    /// The recorder returns to idle as soon as the upload settles, whatever
    /// the outcome; the fetch and playback legs only affect what is
    /// displayed.
    async fn send_recording(&mut self, finalized: FinalizedRecording) {
        let wav = match finalized.to_wav() {
            Ok(wav) => wav,
            Err(err) => {
                self.recorder.finish();
                self.display_error(format!("could not encode recording: {err}"))
                    .await;
                return;
            }
        };

        let result = self.session.send_audio(&self.exchange, wav).await;
        self.recorder.finish();

        let message = match result {
            Ok(message) => message,
            Err(err) => {
                self.display_error(format!("upload failed: {err}")).await;
                return;
            }
        };

        self.display(DisplayEvent::Message {
            role: Role::User,
            content: message.content.clone(),
        })
        .await;

        let (conversation_id, message_id) = match (self.session.conversation(), &message.audio_ref)
        {
            (Some(conversation), Some(id)) => (conversation.id.clone(), id.clone()),
            _ => return,
        };

        let bytes = match self
            .exchange
            .fetch_reply_audio(&conversation_id, &message_id)
            .await
        {
            Ok(bytes) => bytes,
            Err(err) => {
                self.display_error(format!("no reply audio: {err}")).await;
                return;
            }
        };

        if let Err(err) = self.exchange.play(bytes).await {
            self.display_error(format!("playback failed: {err}")).await;
        }
    }

    // ---- Display ----------------------------------------------------------

    async fn display(&self, event: DisplayEvent) {
        if self.display_tx.send(event).await.is_err() {
            log::debug!("display channel closed");
        }
    }

    async fn display_error(&self, message: String) {
        log::error!("{message}");
        self.display(DisplayEvent::Error { message }).await;
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::{ApiError, MockApi};
    use crate::audio::{AudioSink, CaptureError, CaptureHandle, PlaybackError};
    use crate::session::exchange::RetryPolicy;
    use crate::stt::{MockSttEngine, SttEngine};
    use std::sync::Mutex;
    use std::time::Duration;

    /// Capture device stub that hands the chunk sender back to the test.
    struct MockDevice {
        tx: Mutex<Option<mpsc::Sender<CapturedChunk>>>,
    }

    impl MockDevice {
        fn new() -> Self {
            Self {
                tx: Mutex::new(None),
            }
        }

        fn chunk_sender(&self) -> mpsc::Sender<CapturedChunk> {
            self.tx.lock().unwrap().clone().expect("capture not started")
        }
    }

    impl CaptureDevice for MockDevice {
        fn acquire(
            &self,
            tx: mpsc::Sender<CapturedChunk>,
        ) -> Result<CaptureHandle, CaptureError> {
            *self.tx.lock().unwrap() = Some(tx);
            Ok(CaptureHandle::noop())
        }
    }

    struct CountingSink {
        played: Mutex<Vec<Vec<u8>>>,
    }

    impl CountingSink {
        fn new() -> Self {
            Self {
                played: Mutex::new(Vec::new()),
            }
        }

        fn played(&self) -> Vec<Vec<u8>> {
            self.played.lock().unwrap().clone()
        }
    }

    impl AudioSink for CountingSink {
        fn play(&self, bytes: &[u8]) -> Result<(), PlaybackError> {
            self.played.lock().unwrap().push(bytes.to_vec());
            Ok(())
        }
    }

    struct Harness {
        command_tx: mpsc::Sender<SessionCommand>,
        display_rx: mpsc::Receiver<DisplayEvent>,
        api: Arc<MockApi>,
        device: Arc<MockDevice>,
        sink: Arc<CountingSink>,
    }

    fn harness(api: MockApi) -> Harness {
        let api = Arc::new(api);
        let device = Arc::new(MockDevice::new());
        let sink = Arc::new(CountingSink::new());
        let transcriber = Arc::new(Transcriber::with_loader(Box::new(|| {
            Ok(Arc::new(MockSttEngine::ok("partial words")) as Arc<dyn SttEngine>)
        })));

        let (command_tx, command_rx) = mpsc::channel(16);
        let (display_tx, display_rx) = mpsc::channel(32);

        let controller = SessionController::new(
            api.clone(),
            device.clone(),
            sink.clone(),
            transcriber,
            RetryPolicy {
                max_attempts: 2,
                initial_backoff: Duration::from_millis(1),
            },
            64,
            display_tx,
        );
        tokio::spawn(controller.run(command_rx));

        Harness {
            command_tx,
            display_rx,
            api,
            device,
            sink,
        }
    }

    async fn next_event(rx: &mut mpsc::Receiver<DisplayEvent>) -> DisplayEvent {
        tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("timed out waiting for display event")
            .expect("display channel closed")
    }

    /// Skip advisory transcript updates, which arrive at unpredictable
    /// points relative to the committed events.
    async fn next_committed(rx: &mut mpsc::Receiver<DisplayEvent>) -> DisplayEvent {
        loop {
            match next_event(rx).await {
                DisplayEvent::TranscriptionUpdate { .. } => continue,
                event => return event,
            }
        }
    }

    fn chunk(seq: u64, len: usize) -> CapturedChunk {
        CapturedChunk {
            seq,
            samples: vec![0.01; len],
        }
    }

    #[tokio::test]
    async fn text_conversation_flows_in_order() {
        let mut mock = MockApi::new("42");
        mock.reply = Ok("hi Alice".into());
        let mut h = harness(mock);

        h.command_tx
            .send(SessionCommand::StartConversation {
                name: "Alice".into(),
            })
            .await
            .unwrap();

        match next_committed(&mut h.display_rx).await {
            DisplayEvent::ConversationReady { conversation } => {
                assert_eq!(conversation.id, "42");
                assert_eq!(conversation.display_name, "Alice");
            }
            other => panic!("unexpected event: {other:?}"),
        }

        h.command_tx
            .send(SessionCommand::SendText {
                content: "hello".into(),
            })
            .await
            .unwrap();

        match next_committed(&mut h.display_rx).await {
            DisplayEvent::Message { role, content } => {
                assert_eq!(role, Role::User);
                assert_eq!(content, "hello");
            }
            other => panic!("unexpected event: {other:?}"),
        }
        match next_committed(&mut h.display_rx).await {
            DisplayEvent::Message { role, content } => {
                assert_eq!(role, Role::Assistant);
                assert_eq!(content, "hi Alice");
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn send_text_without_conversation_reports_error() {
        let mut h = harness(MockApi::new("42"));

        h.command_tx
            .send(SessionCommand::SendText {
                content: "hello".into(),
            })
            .await
            .unwrap();

        // User echo is displayed, then the failure.
        assert!(matches!(
            next_committed(&mut h.display_rx).await,
            DisplayEvent::Message { role: Role::User, .. }
        ));
        assert!(matches!(
            next_committed(&mut h.display_rx).await,
            DisplayEvent::Error { .. }
        ));
        assert_eq!(h.api.count("send_message"), 0);
    }

    #[tokio::test]
    async fn recording_round_trip_plays_reply_audio() {
        let mut mock = MockApi::new("42");
        mock.audio = Ok(vec![7, 7, 7]);
        let mut h = harness(mock);

        h.command_tx
            .send(SessionCommand::StartConversation {
                name: "Alice".into(),
            })
            .await
            .unwrap();
        let _ = next_committed(&mut h.display_rx).await;

        h.command_tx.send(SessionCommand::StartRecording).await.unwrap();
        assert!(matches!(
            next_committed(&mut h.display_rx).await,
            DisplayEvent::RecordingStarted
        ));

        let chunk_tx = h.device.chunk_sender();
        for seq in 0..3 {
            chunk_tx.send(chunk(seq, 3_200)).await.unwrap();
        }
        h.command_tx.send(SessionCommand::StopRecording).await.unwrap();

        // 3 * 3200 samples at 16 kHz is 0.6 s.
        match next_committed(&mut h.display_rx).await {
            DisplayEvent::RecordingStopped { duration_secs } => {
                assert!((duration_secs - 0.6).abs() < 1e-3);
            }
            other => panic!("unexpected event: {other:?}"),
        }

        // The log commits the server transcription, not the advisory one.
        match next_committed(&mut h.display_rx).await {
            DisplayEvent::Message { role, content } => {
                assert_eq!(role, Role::User);
                assert_eq!(content, "transcribed");
            }
            other => panic!("unexpected event: {other:?}"),
        }

        assert_eq!(h.api.count("upload_recording"), 1);
        assert_eq!(h.api.count("fetch_message_audio"), 1);

        // Playback happens after the fetch; give the blocking task a beat.
        tokio::time::timeout(Duration::from_secs(2), async {
            loop {
                if h.sink.played() == vec![vec![7, 7, 7]] {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("reply audio never played");
    }

    #[tokio::test]
    async fn failed_upload_skips_fetch_and_playback() {
        let mut mock = MockApi::new("42");
        mock.upload = Err(ApiError::Network("refused".into()));
        let mut h = harness(mock);

        h.command_tx
            .send(SessionCommand::StartConversation {
                name: "Alice".into(),
            })
            .await
            .unwrap();
        let _ = next_committed(&mut h.display_rx).await;

        h.command_tx.send(SessionCommand::StartRecording).await.unwrap();
        let _ = next_committed(&mut h.display_rx).await;

        h.device
            .chunk_sender()
            .send(chunk(0, 16_000))
            .await
            .unwrap();
        h.command_tx.send(SessionCommand::StopRecording).await.unwrap();

        assert!(matches!(
            next_committed(&mut h.display_rx).await,
            DisplayEvent::RecordingStopped { .. }
        ));
        assert!(matches!(
            next_committed(&mut h.display_rx).await,
            DisplayEvent::Error { .. }
        ));

        assert_eq!(h.api.count("fetch_message_audio"), 0);
        assert!(h.sink.played().is_empty());

        // Upload failure still returns the recorder to idle.
        h.command_tx.send(SessionCommand::StartRecording).await.unwrap();
        assert!(matches!(
            next_committed(&mut h.display_rx).await,
            DisplayEvent::RecordingStarted
        ));
    }

    #[tokio::test]
    async fn failed_fetch_short_circuits_playback() {
        let mut mock = MockApi::new("42");
        mock.audio = Err(ApiError::NotFound("m1".into()));
        let mut h = harness(mock);

        h.command_tx
            .send(SessionCommand::StartConversation {
                name: "Alice".into(),
            })
            .await
            .unwrap();
        let _ = next_committed(&mut h.display_rx).await;

        h.command_tx.send(SessionCommand::StartRecording).await.unwrap();
        let _ = next_committed(&mut h.display_rx).await;

        h.device
            .chunk_sender()
            .send(chunk(0, 16_000))
            .await
            .unwrap();
        h.command_tx.send(SessionCommand::StopRecording).await.unwrap();

        assert!(matches!(
            next_committed(&mut h.display_rx).await,
            DisplayEvent::RecordingStopped { .. }
        ));
        // The upload itself succeeded, so the user message commits.
        assert!(matches!(
            next_committed(&mut h.display_rx).await,
            DisplayEvent::Message { role: Role::User, .. }
        ));
        assert!(matches!(
            next_committed(&mut h.display_rx).await,
            DisplayEvent::Error { .. }
        ));

        assert_eq!(h.api.count("upload_recording"), 1);
        assert_eq!(h.api.count("fetch_message_audio"), 1);
        assert!(h.sink.played().is_empty());
    }

    #[tokio::test]
    async fn double_start_recording_reports_error() {
        let mut h = harness(MockApi::new("42"));

        h.command_tx.send(SessionCommand::StartRecording).await.unwrap();
        assert!(matches!(
            next_committed(&mut h.display_rx).await,
            DisplayEvent::RecordingStarted
        ));

        h.command_tx.send(SessionCommand::StartRecording).await.unwrap();
        assert!(matches!(
            next_committed(&mut h.display_rx).await,
            DisplayEvent::Error { .. }
        ));
    }

    #[tokio::test]
    async fn advisory_transcript_is_displayed_while_recording() {
        let mut h = harness(MockApi::new("42"));

        h.command_tx
            .send(SessionCommand::StartConversation {
                name: "Alice".into(),
            })
            .await
            .unwrap();
        let _ = next_committed(&mut h.display_rx).await;

        h.command_tx.send(SessionCommand::StartRecording).await.unwrap();
        let _ = next_committed(&mut h.display_rx).await;

        // One second of audio clears the engine's minimum-length gate.
        h.device
            .chunk_sender()
            .send(chunk(0, 16_000))
            .await
            .unwrap();

        let text = tokio::time::timeout(Duration::from_secs(2), async {
            loop {
                if let DisplayEvent::TranscriptionUpdate { text } =
                    next_event(&mut h.display_rx).await
                {
                    return text;
                }
            }
        })
        .await
        .expect("no advisory transcript arrived");
        assert_eq!(text, "partial words");
    }
}
