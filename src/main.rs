//! Application entry point — voice-enabled chat client.
//!
//! # Startup sequence
//!
//! 1. Initialise logging.
//! 2. Load [`AppConfig`] from disk (returns default on first run).
//! 3. Create [`tokio`] runtime (multi-thread, 2 workers).
//! 4. Build the HTTP conversation client from config.
//! 5. Build the lazy Whisper transcriber (model loads on first recording).
//! 6. Create session channels (`command`, `display`) and spawn the
//!    [`SessionController`] loop plus the display printer on the runtime.
//! 7. Run the stdin REPL on the main thread until `/quit` or EOF.

use std::io::{BufRead, Write};
use std::sync::Arc;

use tokio::sync::mpsc;
use voicechat::{
    api::HttpConversationApi,
    audio::{CpalCaptureDevice, RodioSink},
    config::{AppConfig, AppPaths},
    session::{DisplayEvent, RetryPolicy, Role, SessionCommand, SessionController},
    stt::{TranscribeParams, Transcriber},
};

// ---------------------------------------------------------------------------
// REPL command parsing
// ---------------------------------------------------------------------------

enum Input {
    Command(SessionCommand),
    Quit,
    Help,
    Empty,
}

fn parse_input(line: &str) -> Input {
    let line = line.trim();
    if line.is_empty() {
        return Input::Empty;
    }

    match line.split_once(' ') {
        Some(("/start", name)) if !name.trim().is_empty() => {
            Input::Command(SessionCommand::StartConversation {
                name: name.trim().to_string(),
            })
        }
        _ => match line {
            "/start" => Input::Help,
            "/record" => Input::Command(SessionCommand::StartRecording),
            "/stop" => Input::Command(SessionCommand::StopRecording),
            "/quit" => Input::Quit,
            "/help" => Input::Help,
            _ if line.starts_with('/') => Input::Help,
            _ => Input::Command(SessionCommand::SendText {
                content: line.to_string(),
            }),
        },
    }
}

fn print_help() {
    println!("  /start <name>   create a conversation");
    println!("  /record         start recording a voice message");
    println!("  /stop           stop recording and send it");
    println!("  /quit           exit");
    println!("  anything else is sent as a text message");
}

// ---------------------------------------------------------------------------
// Display printer
// ---------------------------------------------------------------------------

/// Renders display events to stdout as they arrive.
async fn run_display(mut display_rx: mpsc::Receiver<DisplayEvent>) {
    while let Some(event) = display_rx.recv().await {
        match event {
            DisplayEvent::ConversationReady { conversation } => {
                println!("* conversation '{}' ready", conversation.display_name);
            }
            DisplayEvent::Message { role, content } => {
                let who = match role {
                    Role::User => "you",
                    Role::Assistant => "assistant",
                };
                println!("{who}: {content}");
            }
            DisplayEvent::TranscriptionUpdate { text } => {
                println!("  [hearing] {text}");
            }
            DisplayEvent::RecordingStarted => {
                println!("* recording... (/stop to send)");
            }
            DisplayEvent::RecordingStopped { duration_secs } => {
                println!("* recorded {duration_secs:.1} s, sending...");
            }
            DisplayEvent::Error { message } => {
                println!("! {message}");
            }
        }
        let _ = std::io::stdout().flush();
    }
}

// ---------------------------------------------------------------------------
// main
// ---------------------------------------------------------------------------

fn main() -> anyhow::Result<()> {
    // 1. Logging
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    log::info!("voicechat starting up");

    // 2. Configuration
    let config = AppConfig::load().unwrap_or_else(|e| {
        log::warn!("Failed to load config ({e}); using defaults");
        AppConfig::default()
    });

    // 3. Tokio runtime (2 workers — session loop + display printer)
    let rt = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .enable_all()
        .build()?;

    // 4. Remote API client
    let api = Arc::new(HttpConversationApi::from_config(&config.api));

    // 5. Advisory transcriber — the model file loads lazily on the first
    //    recording, so startup works with no model present.
    let model_path = AppPaths::resolve()
        .models_dir()
        .join(format!("{}.bin", config.stt.model));
    let params = TranscribeParams {
        language: config.stt.language.clone(),
        ..TranscribeParams::default()
    };
    let transcriber = Arc::new(Transcriber::whisper(model_path, params));

    // 6. Session loop + display printer
    let (command_tx, command_rx) = mpsc::channel::<SessionCommand>(16);
    let (display_tx, display_rx) = mpsc::channel::<DisplayEvent>(32);

    let controller = SessionController::new(
        api,
        Arc::new(CpalCaptureDevice::new()),
        Arc::new(RodioSink::new()),
        transcriber,
        RetryPolicy::from_config(&config.api),
        config.audio.chunk_channel_capacity,
        display_tx,
    );
    rt.spawn(controller.run(command_rx));
    rt.spawn(run_display(display_rx));

    // 7. stdin REPL — blocks the main thread
    println!("voicechat — connected to {}", config.api.base_url);
    print_help();

    let stdin = std::io::stdin();
    for line in stdin.lock().lines() {
        let line = line?;
        match parse_input(&line) {
            Input::Command(command) => {
                if command_tx.blocking_send(command).is_err() {
                    log::error!("session loop is gone, exiting");
                    break;
                }
            }
            Input::Quit => break,
            Input::Help => print_help(),
            Input::Empty => {}
        }
    }

    // Dropping the command sender ends the session loop.
    drop(command_tx);
    log::info!("voicechat shutting down");
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
