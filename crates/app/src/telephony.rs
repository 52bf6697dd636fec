//! Telephony mode: one websocket connection per phone call.

use std::error::Error;
use std::path::PathBuf;
use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::Response;
use axum::routing::get;
use axum::Router;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;

use voicewire_config::Settings;
use voicewire_core::{
    debug_dump, CaptureSource, Conversation, PlaybackSink, Role,
};
use voicewire_pipeline::{
    run_player, run_submit_loop, run_transcription_stage, run_tts_stage, CHAT_TOKEN_QUEUE,
    PLAYBACK_QUEUE,
};
use voicewire_telephony::StreamHandler;

use crate::Services;

const SESSION_QUEUE: usize = 1024;

const GREETING: &str = "Hi, this is the voicewire assistant. Ask me anything.";

const SYSTEM_PROMPT: &str = "You are an agent on a phone call, be concise.";

#[derive(Clone)]
struct AppState {
    settings: Arc<Settings>,
    services: Arc<Services>,
}

pub async fn run(settings: Settings, services: Services) -> Result<(), Box<dyn Error>> {
    let addr = format!("{}:{}", settings.server.host, settings.server.port);
    let ws_path = settings.server.ws_path.clone();
    let state = AppState {
        settings: Arc::new(settings),
        services: Arc::new(services),
    };

    let app = Router::new().route(&ws_path, get(upgrade)).with_state(state);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(addr = %addr, ws_path = %ws_path, "telephony server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    tracing::info!("telephony server shut down");
    Ok(())
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    tracing::info!("shutdown signal received");
}

async fn upgrade(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| handle_stream(socket, state))
}

/// One inbound connection is one session: wire the stream handler into the
/// pipeline, pump frames both ways, drain on close.
async fn handle_stream(socket: WebSocket, state: AppState) {
    let session_id = uuid::Uuid::new_v4();
    tracing::info!(%session_id, "stream connected");

    let (handler, mut write_rx) = StreamHandler::new();
    let handler = Arc::new(handler);
    let dump_dir = state
        .settings
        .debug
        .dump_audio
        .then(|| PathBuf::from(&state.settings.debug.output_dir));

    // Session plumbing: inbound media → segments → transcripts → submit
    // loop → chat tokens → TTS → outbound media.
    let (segment_tx, segment_rx) = mpsc::channel(SESSION_QUEUE);
    let (text_tx, text_rx) = mpsc::channel(SESSION_QUEUE);
    // Telephony runs without the filler task; the slot is still wired so
    // the transcription stage behaves identically on both legs.
    let (early_tx, _early_rx) = mpsc::channel(1);
    let (chat_tx, chat_rx) = mpsc::channel(CHAT_TOKEN_QUEUE);
    let (audio_tx, audio_rx) = mpsc::channel(PLAYBACK_QUEUE);

    if let Err(err) = handler.start(segment_tx).await {
        tracing::error!(%err, "cannot start telephony capture");
        return;
    }

    tokio::spawn(run_transcription_stage(
        state.services.transcriber.clone(),
        segment_rx,
        text_tx,
        early_tx,
    ));
    tokio::spawn(run_tts_stage(
        state.services.synthesizer.clone(),
        chat_rx,
        audio_tx,
        state.settings.openai.reply_speed,
        None,
    ));

    let mut conversation = Conversation::new();
    conversation.add(Role::System, SYSTEM_PROMPT);
    tokio::spawn(run_submit_loop(
        state.services.agent.clone(),
        text_rx,
        chat_tx.clone(),
        conversation,
    ));

    let sink: Arc<dyn PlaybackSink> = handler.clone();
    tokio::spawn(run_player(sink, audio_rx, dump_dir.clone()));

    // Greet the caller while they are still settling in.
    if chat_tx.send(GREETING.to_string()).await.is_err() {
        tracing::warn!("tts stage gone before greeting");
    }
    drop(chat_tx);

    let (mut ws_tx, mut ws_rx) = socket.split();

    // Writer pump: outbound frames until the handler closes its queue,
    // then a graceful close frame.
    let writer = tokio::spawn(async move {
        while let Some(frame) = write_rx.recv().await {
            if ws_tx.send(Message::Text(frame)).await.is_err() {
                tracing::info!("websocket gone, writer pump stopping");
                return;
            }
        }
        tracing::info!("outbound queue closed, closing websocket gracefully");
        let _ = ws_tx.send(Message::Close(None)).await;
    });

    // Reader pump: inbound frames into the handler until the peer hangs up
    // or violates the protocol.
    while let Some(message) = ws_rx.next().await {
        match message {
            Ok(Message::Text(text)) => {
                if handler.handle_message(&text).await.is_err() {
                    tracing::error!("protocol violation, closing session");
                    break;
                }
            }
            Ok(Message::Close(_)) => {
                tracing::info!("stream closed by peer");
                break;
            }
            Ok(_) => {}
            Err(err) => {
                tracing::error!(%err, "websocket read failed");
                break;
            }
        }
    }

    // Teardown: flush the segmenter and close the segment channel, which
    // cascades through transcription → submit loop → TTS → player.
    match CaptureSource::stop(&*handler).await {
        Ok(recording) => {
            tracing::info!(recording_bytes = recording.len(), "stream recording finalized");
            if let Some(dir) = &dump_dir {
                debug_dump(dir.join("entire-phone-recording.wav"), &recording);
            }
        }
        Err(err) => tracing::error!(%err, "cannot finalize stream recording"),
    }
    handler.close();
    let _ = writer.await;
    tracing::info!(%session_id, "stream finished");
}
