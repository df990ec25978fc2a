//! WebSocket session for streaming clients.
//!
//! One task per connection owns both halves of the socket. Heartbeats and
//! forced closes arrive from the [`LivenessMonitor`] through a command
//! channel; frames are read, decoded and detected strictly one at a time.

use std::borrow::Cow;
use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{
        ws::{CloseFrame, Message, WebSocket},
        ConnectInfo, State, WebSocketUpgrade,
    },
    response::IntoResponse,
};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::time::timeout;

use ppe_common::{ClientMessage, ServerMessage};

use super::liveness::{CloseReason, LivenessMonitor, SessionCommand};
use super::registry::ConnectionHandle;
use crate::decode::{decode_base64, decode_bytes, DecodedImage};
use crate::error::GatewayError;
use crate::limiter::ResourceLimiter;
use crate::AppState;

/// Per-session timing and defaults.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SessionSettings {
    /// Bound on a single socket read. Expiry is not an error.
    pub read_timeout: Duration,
    /// Bound on waiting for one detection.
    pub request_timeout: Duration,
    /// Threshold for frames that do not carry one.
    pub default_confidence: f32,
}

/// Lifecycle of one streaming connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    Connecting,
    Active,
    Draining,
    Closed,
}

impl fmt::Display for SessionPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SessionPhase::Connecting => "connecting",
            SessionPhase::Active => "active",
            SessionPhase::Draining => "draining",
            SessionPhase::Closed => "closed",
        };
        f.write_str(s)
    }
}

/// What the read loop does after handling one inbound message.
enum Flow {
    Continue,
    Drain,
}

/// Raw image as it arrived on the wire.
enum FramePayload {
    Base64(String),
    Bytes(Vec<u8>),
}

/// WebSocket upgrade handler.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
    connect_info: Option<ConnectInfo<SocketAddr>>,
) -> impl IntoResponse {
    let peer = connect_info.map(|ConnectInfo(addr)| addr);
    tracing::debug!(peer = ?peer, "Streaming connection attempt");

    ws.max_message_size(state.limiter.max_message_bytes())
        .on_upgrade(move |socket| run_session(socket, state, peer))
}

/// Check the size of an encoded image and decode it.
pub fn prepare_image(limiter: &ResourceLimiter, image: &str) -> Result<DecodedImage, GatewayError> {
    limiter.validate_payload_size(image.len())?;
    Ok(decode_base64(image)?)
}

fn prepare_payload(limiter: &ResourceLimiter, payload: FramePayload) -> Result<DecodedImage, GatewayError> {
    match payload {
        FramePayload::Base64(image) => prepare_image(limiter, &image),
        FramePayload::Bytes(bytes) => {
            limiter.validate_payload_size(bytes.len())?;
            Ok(decode_bytes(bytes)?)
        }
    }
}

async fn run_session(socket: WebSocket, state: Arc<AppState>, peer: Option<SocketAddr>) {
    let (mut ws_tx, mut ws_rx) = socket.split();
    tracing::debug!(peer = ?peer, phase = %SessionPhase::Connecting, "Session phase");

    let handle = match state.registry.admit(peer).await {
        Ok(handle) => handle,
        Err(rejected) => {
            let err = GatewayError::from(rejected);
            tracing::warn!(peer = ?peer, code = err.code(), "Connection rejected: {}", err);
            if let Some((code, reason)) = err.close_frame() {
                let _ = ws_tx.send(close_message(code, reason)).await;
            }
            tracing::debug!(peer = ?peer, phase = %SessionPhase::Closed, "Session phase");
            return;
        }
    };

    tracing::info!(connection = %handle, peer = ?peer, "Connection admitted");

    if !state.pool.engine().is_ready() {
        tracing::warn!(
            connection = %handle,
            detector = state.pool.engine().detector_name(),
            "Detector not ready, closing connection"
        );
        let _ = send_error(&mut ws_tx, &GatewayError::ServiceUnavailable).await;
        let _ = send_close(&mut ws_tx, CloseReason::ServiceUnavailable).await;
        state.registry.evict(&handle).await;
        tracing::debug!(connection = %handle, phase = %SessionPhase::Closed, "Session phase");
        return;
    }

    if let Err(e) = send_message(&mut ws_tx, &ServerMessage::connected(handle.to_string())).await {
        tracing::warn!(connection = %handle, "Failed to send connected message: {}", e);
        state.registry.evict(&handle).await;
        return;
    }

    let (tx, mut rx) = mpsc::channel::<SessionCommand>(32);
    let liveness = LivenessMonitor::start(handle, state.registry.clone(), state.limiter.config(), tx);
    tracing::debug!(connection = %handle, phase = %SessionPhase::Active, "Session phase");

    loop {
        tokio::select! {
            Some(command) = rx.recv() => {
                match command {
                    SessionCommand::Send(msg) => {
                        if let Err(e) = send_message(&mut ws_tx, &msg).await {
                            tracing::debug!(connection = %handle, "Send failed: {}", e);
                            break;
                        }
                    }
                    SessionCommand::Close(reason) => {
                        let _ = send_close(&mut ws_tx, reason).await;
                        break;
                    }
                }
            }

            read = timeout(state.settings.read_timeout, ws_rx.next()) => {
                let message = match read {
                    // read timeout, keep waiting
                    Err(_) => continue,
                    Ok(None) => {
                        tracing::debug!(connection = %handle, "Stream ended");
                        break;
                    }
                    Ok(Some(Err(e))) => {
                        tracing::warn!(connection = %handle, "WebSocket error: {}", e);
                        break;
                    }
                    Ok(Some(Ok(message))) => message,
                };

                state.registry.touch(&handle).await;

                match handle_message(message, handle, &state, &mut ws_tx).await {
                    Flow::Continue => {}
                    Flow::Drain => break,
                }
            }
        }
    }

    tracing::debug!(connection = %handle, phase = %SessionPhase::Draining, "Session phase");
    liveness.shutdown().await;
    state.registry.evict(&handle).await;
    tracing::info!(connection = %handle, phase = %SessionPhase::Closed, "Connection closed");
}

async fn handle_message<S>(
    message: Message,
    handle: ConnectionHandle,
    state: &AppState,
    ws_tx: &mut S,
) -> Flow
where
    S: SinkExt<Message> + Unpin,
    S::Error: std::error::Error + Send + Sync + 'static,
{
    let sent = match message {
        Message::Text(text) => match ClientMessage::parse(&text) {
            Ok(ClientMessage::Frame { image, confidence }) => {
                let confidence = confidence.unwrap_or(state.settings.default_confidence);
                return process_frame(FramePayload::Base64(image), confidence, handle, state, ws_tx).await;
            }
            Ok(ClientMessage::Ping) => send_message(ws_tx, &ServerMessage::pong()).await,
            Ok(ClientMessage::Pong) | Ok(ClientMessage::Connected) => Ok(()),
            Err(e) => {
                tracing::debug!(connection = %handle, "Malformed message: {}", e);
                send_error(ws_tx, &GatewayError::from(e)).await
            }
        },
        Message::Binary(bytes) => {
            let confidence = state.settings.default_confidence;
            return process_frame(FramePayload::Bytes(bytes), confidence, handle, state, ws_tx).await;
        }
        Message::Ping(data) => ws_tx
            .send(Message::Pong(data))
            .await
            .map_err(|e| Box::new(e) as Box<dyn std::error::Error + Send + Sync>),
        Message::Pong(_) => Ok(()),
        Message::Close(frame) => {
            tracing::debug!(connection = %handle, frame = ?frame, "Client sent close frame");
            // pushes out the queued close reply
            let _ = ws_tx.close().await;
            return Flow::Drain;
        }
    };

    match sent {
        Ok(()) => Flow::Continue,
        Err(e) => {
            tracing::debug!(connection = %handle, "Send failed: {}", e);
            Flow::Drain
        }
    }
}

async fn process_frame<S>(
    payload: FramePayload,
    confidence: f32,
    handle: ConnectionHandle,
    state: &AppState,
    ws_tx: &mut S,
) -> Flow
where
    S: SinkExt<Message> + Unpin,
    S::Error: std::error::Error + Send + Sync + 'static,
{
    let outcome = match prepare_payload(&state.limiter, payload) {
        Ok(image) => {
            if let Err(e) = send_message(ws_tx, &ServerMessage::processing()).await {
                tracing::debug!(connection = %handle, "Send failed: {}", e);
                return Flow::Drain;
            }
            tracing::debug!(
                connection = %handle,
                format = %image.format(),
                bytes = image.byte_len(),
                "Frame accepted"
            );
            state
                .pool
                .submit(image, confidence, state.settings.request_timeout)
                .await
        }
        Err(e) => Err(e),
    };

    let sent = match outcome {
        Ok(result) => {
            tracing::debug!(
                connection = %handle,
                compliant = result.is_compliant,
                processing_ms = result.processing_time,
                "Frame processed"
            );
            send_message(ws_tx, &ServerMessage::Result(result)).await
        }
        Err(e) => {
            tracing::debug!(connection = %handle, code = e.code(), "Frame failed: {}", e);
            send_error(ws_tx, &e).await
        }
    };

    match sent {
        Ok(()) => Flow::Continue,
        Err(e) => {
            tracing::debug!(connection = %handle, "Send failed: {}", e);
            Flow::Drain
        }
    }
}

fn close_message(code: u16, reason: &'static str) -> Message {
    Message::Close(Some(CloseFrame {
        code,
        reason: Cow::Borrowed(reason),
    }))
}

/// Send a ServerMessage over WebSocket.
async fn send_message<S>(
    sink: &mut S,
    msg: &ServerMessage,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>>
where
    S: SinkExt<Message> + Unpin,
    S::Error: std::error::Error + Send + Sync + 'static,
{
    let json = serde_json::to_string(msg)?;
    sink.send(Message::Text(json)).await?;
    Ok(())
}

/// Send a GatewayError as an `error` message.
async fn send_error<S>(
    sink: &mut S,
    err: &GatewayError,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>>
where
    S: SinkExt<Message> + Unpin,
    S::Error: std::error::Error + Send + Sync + 'static,
{
    send_message(sink, &ServerMessage::error(err.code(), err.to_string())).await
}

async fn send_close<S>(sink: &mut S, reason: CloseReason) -> Result<(), Box<dyn std::error::Error + Send + Sync>>
where
    S: SinkExt<Message> + Unpin,
    S::Error: std::error::Error + Send + Sync + 'static,
{
    sink.send(close_message(reason.code(), reason.reason())).await?;
    Ok(())
}
