//! Voice-enabled chat client.
//!
//! Connects a terminal chat session to a remote conversation backend:
//! text messages go over plain JSON, voice messages are captured from the
//! microphone, uploaded as WAV, transcribed server-side, and answered
//! with synthesized audio that is fetched and played back locally.  While
//! a recording is in progress, a local Whisper model produces an advisory
//! live transcript for display.

pub mod api;
pub mod audio;
pub mod config;
pub mod recording;
pub mod session;
pub mod stt;
