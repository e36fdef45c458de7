//! WebSocket consumer: a pure latency optimization layered over polling.
//! Connects once the first snapshot enabled it, pings on the keepalive
//! cadence, forwards invalidations to the runtime, and reconnects with
//! capped backoff. Polling never pauses because of anything in here.

use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

use classboard_back::dto::ws::{DisplayInboundMessage, DisplayOutboundMessage};

use crate::backoff;

/// Reconnection gives up after this many consecutive failures.
const MAX_RECONNECT_ATTEMPTS: u32 = 10;
/// Keepalive ping cadence.
const PING_INTERVAL: Duration = Duration::from_secs(30);

/// Close codes the server uses for permanent rejections.
const PERMANENT_CLOSE_CODES: [u16; 3] = [4400, 4403, 4408];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SocketEvent {
    Invalidate { revision: i64 },
    /// Auth-level rejection; reconnecting would only repeat it.
    PermanentlyRejected { code: u16 },
    /// Reconnect budget exhausted; polling carries on alone.
    GaveUp,
}

enum SessionEnd {
    Permanent(u16),
    Transient,
}

/// Drive the socket until permanently rejected or out of attempts.
pub async fn run(url: String, events: mpsc::UnboundedSender<SocketEvent>) {
    let mut attempt: u32 = 0;

    loop {
        match session(&url, &events).await {
            SessionEnd::Permanent(code) => {
                warn!(code, "socket permanently rejected; stopping");
                let _ = events.send(SocketEvent::PermanentlyRejected { code });
                return;
            }
            SessionEnd::Transient => {
                attempt += 1;
                if attempt > MAX_RECONNECT_ATTEMPTS {
                    warn!("socket reconnect attempts exhausted");
                    let _ = events.send(SocketEvent::GaveUp);
                    return;
                }
                let delay = backoff::ws_reconnect_delay(attempt - 1);
                let delay = backoff::with_jitter(delay, &mut rand::thread_rng());
                debug!(attempt, ?delay, "socket reconnecting");
                tokio::time::sleep(delay).await;
            }
        }
    }
}

async fn session(url: &str, events: &mpsc::UnboundedSender<SocketEvent>) -> SessionEnd {
    let (stream, _response) = match connect_async(url).await {
        Ok(connected) => connected,
        Err(err) => {
            warn!(error = %err, "socket connect failed");
            return SessionEnd::Transient;
        }
    };
    info!("socket connected");
    let (mut sink, mut source) = stream.split();

    let mut ping_timer = tokio::time::interval(PING_INTERVAL);
    ping_timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    ping_timer.reset();

    loop {
        tokio::select! {
            _ = ping_timer.tick() => {
                let ping = serde_json::to_string(&DisplayInboundMessage::Ping)
                    .expect("ping serializes");
                if sink.send(Message::Text(ping.into())).await.is_err() {
                    return SessionEnd::Transient;
                }
            }
            message = source.next() => {
                match message {
                    Some(Ok(Message::Text(text))) => handle_text(&text, events),
                    Some(Ok(Message::Ping(payload))) => {
                        let _ = sink.send(Message::Pong(payload)).await;
                    }
                    Some(Ok(Message::Close(frame))) => {
                        if let Some(frame) = frame {
                            let code = u16::from(frame.code);
                            debug!(code, reason = %frame.reason, "socket closed by server");
                            if PERMANENT_CLOSE_CODES.contains(&code) {
                                return SessionEnd::Permanent(code);
                            }
                            // 1006/1011 and friends are transient.
                        }
                        return SessionEnd::Transient;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(err)) => {
                        warn!(error = %err, "socket receive error");
                        return SessionEnd::Transient;
                    }
                    None => return SessionEnd::Transient,
                }
            }
        }
    }
}

fn handle_text(text: &str, events: &mpsc::UnboundedSender<SocketEvent>) {
    match serde_json::from_str::<DisplayOutboundMessage>(text) {
        Ok(DisplayOutboundMessage::Invalidate { revision }) => {
            debug!(revision, "socket invalidate received");
            let _ = events.send(SocketEvent::Invalidate { revision });
        }
        Ok(DisplayOutboundMessage::Pong) => {}
        Err(err) => {
            warn!(error = %err, "unrecognized socket payload");
        }
    }
}

/// Build the connection URL from the HTTP base, token and device id.
pub fn socket_url(server_url: &str, token: &str, device_id: &str) -> String {
    let ws_base = if let Some(rest) = server_url.strip_prefix("https://") {
        format!("wss://{rest}")
    } else if let Some(rest) = server_url.strip_prefix("http://") {
        format!("ws://{rest}")
    } else {
        format!("ws://{server_url}")
    };
    format!(
        "{}/ws/display/?token={token}&dk={device_id}",
        ws_base.trim_end_matches('/')
    )
}
