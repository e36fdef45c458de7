//! WebSocket lifecycle for display screens: authenticate by token + device,
//! join the server-derived school group, keep the connection alive on pings
//! and forward invalidation events until either side hangs up.

use std::time::Duration;

use axum::extract::ws::{CloseFrame, Message, WebSocket};
use chrono::Utc;
use futures::{SinkExt, StreamExt};
use serde::Serialize;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::dto::ws::{ChannelEvent, DisplayInboundMessage, DisplayOutboundMessage};
use crate::error::ServiceError;
use crate::services::binding;
use crate::state::{ConnectionInfo, SharedState};

/// Close codes on the auth handshake; clients treat 44xx as permanent.
pub const CLOSE_BAD_PARAMS: u16 = 4400;
pub const CLOSE_UNKNOWN_SCREEN: u16 = 4403;
pub const CLOSE_DEVICE_BOUND: u16 = 4408;
pub const CLOSE_INTERNAL: u16 = 4500;
/// Instance at capacity; transient, clients may retry.
pub const CLOSE_TRY_AGAIN_LATER: u16 = 1013;

#[derive(Debug, Clone, Default)]
pub struct WsParams {
    pub token: Option<String>,
    pub device_id: Option<String>,
}

/// Handle the full lifecycle of one display WebSocket connection.
pub async fn handle_socket(state: SharedState, socket: WebSocket, params: WsParams) {
    let (mut sender, mut receiver) = socket.split();
    let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<Message>();

    // Dedicated writer task keeps invalidations flowing while we await
    // inbound frames.
    let writer_task = tokio::spawn(async move {
        while let Some(message) = outbound_rx.recv().await {
            if sender.send(message).await.is_err() {
                break;
            }
        }
    });

    let token = params.token.filter(|token| !token.is_empty());
    let device_id = params.device_id.filter(|dk| !dk.is_empty());
    let (Some(token), Some(device_id)) = (token, device_id) else {
        warn!("ws connect rejected: missing token or dk");
        state.metrics().connection_failed();
        close(&outbound_tx, CLOSE_BAD_PARAMS, "token and dk are required");
        finalize(writer_task, outbound_tx).await;
        return;
    };

    let screen = match binding::bind_device_atomic(
        &state.directory(),
        &token,
        &device_id,
        state.config().allow_multi_device,
    )
    .await
    {
        Ok(screen) => screen,
        Err(err) => {
            let (code, reason) = match err {
                ServiceError::ScreenUnknown => (CLOSE_UNKNOWN_SCREEN, "unknown or inactive screen"),
                ServiceError::ScreenBound => (CLOSE_DEVICE_BOUND, "screen bound to another device"),
                _ => (CLOSE_INTERNAL, "connect failed"),
            };
            warn!(code, error = %err, "ws connect rejected");
            state.metrics().connection_failed();
            close(&outbound_tx, code, reason);
            finalize(writer_task, outbound_tx).await;
            return;
        }
    };

    if state.connections().len() >= state.config().ws_channel_capacity {
        warn!(
            capacity = state.config().ws_channel_capacity,
            "ws connect rejected: instance at capacity"
        );
        state.metrics().connection_failed();
        close(&outbound_tx, CLOSE_TRY_AGAIN_LATER, "instance at capacity");
        finalize(writer_task, outbound_tx).await;
        return;
    }

    // Tenant isolation: the group is derived from the screen row, never from
    // anything the client sent.
    let school_id = screen.school_id;
    let mut group_rx = state.groups().subscribe(school_id);

    let connection_id = Uuid::new_v4();
    state.connections().insert(
        connection_id,
        ConnectionInfo {
            screen_id: screen.id,
            school_id,
            device_id,
            opened_at: Utc::now(),
        },
    );
    state.metrics().connection_opened();
    state
        .metrics()
        .log_if_needed(state.config().ws_metrics_log_interval);
    info!(screen_id = screen.id, school_id, "ws connected");

    // Three missed client pings and the connection is presumed dead.
    let idle_timeout =
        Duration::from_secs(state.config().ws_ping_interval_seconds.max(10) * 3);

    loop {
        tokio::select! {
            _ = tokio::time::sleep(idle_timeout) => {
                debug!(screen_id = screen.id, "ws idle timeout");
                break;
            }
            inbound = receiver.next() => {
                match inbound {
                    Some(Ok(Message::Text(text))) => handle_text(&outbound_tx, &text),
                    Some(Ok(Message::Ping(payload))) => {
                        let _ = outbound_tx.send(Message::Pong(payload));
                    }
                    Some(Ok(Message::Close(frame))) => {
                        debug!(screen_id = screen.id, "ws closed by client");
                        let _ = outbound_tx.send(Message::Close(frame));
                        break;
                    }
                    Some(Ok(Message::Binary(_))) | Some(Ok(Message::Pong(_))) => {}
                    Some(Err(err)) => {
                        warn!(screen_id = screen.id, error = %err, "ws receive error");
                        break;
                    }
                    None => break,
                }
            }
            event = group_rx.recv() => {
                match event {
                    Ok(event) => {
                        if !forward_invalidate(&state, &outbound_tx, &event, school_id) {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        // Missed invalidations are harmless: polling recovers
                        // and any newer event carries a newer revision.
                        warn!(screen_id = screen.id, skipped, "ws group receiver lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        }
    }

    state.connections().remove(&connection_id);
    state.metrics().connection_closed();
    info!(screen_id = screen.id, school_id, "ws disconnected");

    finalize(writer_task, outbound_tx).await;
}

/// Client messages: only `{"type":"ping"}` is recognized. Unknown types are
/// logged, malformed JSON is dropped.
fn handle_text(outbound_tx: &mpsc::UnboundedSender<Message>, text: &str) {
    match serde_json::from_str::<DisplayInboundMessage>(text) {
        Ok(DisplayInboundMessage::Ping) => {
            send_json(outbound_tx, &DisplayOutboundMessage::Pong);
        }
        Ok(DisplayInboundMessage::Unknown) => {
            debug!(payload = %truncate(text), "ws ignoring unknown message type");
        }
        Err(err) => {
            warn!(error = %err, payload = %truncate(text), "ws received invalid JSON");
        }
    }
}

/// Forward an invalidation to this client, updating broadcast metrics.
/// Returns false when the writer is gone and the connection should die.
fn forward_invalidate(
    state: &SharedState,
    outbound_tx: &mpsc::UnboundedSender<Message>,
    event: &ChannelEvent,
    school_id: i64,
) -> bool {
    // The hub is keyed per school already; the check guards wiring mistakes.
    if event.school_id() != school_id {
        warn!(
            expected = school_id,
            got = event.school_id(),
            "ws broadcast school mismatch"
        );
        return true;
    }

    let latency_ms = match event {
        ChannelEvent::Invalidate { ts, .. } => {
            (Utc::now().timestamp_millis() - ts).max(0) as f64
        }
    };

    let message = DisplayOutboundMessage::Invalidate {
        revision: event.revision(),
    };
    if send_json(outbound_tx, &message) {
        state.metrics().broadcast_sent(latency_ms);
        true
    } else {
        state.metrics().broadcast_failed();
        false
    }
}

fn send_json<T: Serialize>(outbound_tx: &mpsc::UnboundedSender<Message>, value: &T) -> bool {
    let payload = match serde_json::to_string(value) {
        Ok(payload) => payload,
        Err(err) => {
            warn!(error = %err, "ws outbound serialization failed");
            return true;
        }
    };
    outbound_tx.send(Message::Text(payload.into())).is_ok()
}

fn close(outbound_tx: &mpsc::UnboundedSender<Message>, code: u16, reason: &'static str) {
    let _ = outbound_tx.send(Message::Close(Some(CloseFrame {
        code,
        reason: reason.into(),
    })));
}

fn truncate(text: &str) -> &str {
    match text.char_indices().nth(100) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

/// Ensure the writer task winds down before we return from the handler.
async fn finalize(writer_task: JoinHandle<()>, outbound_tx: mpsc::UnboundedSender<Message>) {
    drop(outbound_tx);
    let _ = writer_task.await;
}
