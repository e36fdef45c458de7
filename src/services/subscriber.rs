//! Redis pub/sub subscriber: one task per process listening on every school
//! channel and feeding the local group hubs. Reconnects with capped backoff
//! when the store connection drops; polling keeps clients correct meanwhile.

use std::time::Duration;

use futures::StreamExt;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::dto::ws::ChannelEvent;
use crate::state::SharedState;
use crate::store::keys;

const INITIAL_DELAY: Duration = Duration::from_secs(1);
const MAX_DELAY: Duration = Duration::from_secs(10);

/// Run forever, forwarding published invalidations into the local hubs.
pub async fn run(state: SharedState, client: redis::Client) {
    let mut delay = INITIAL_DELAY;

    loop {
        match subscribe_and_forward(&state, &client).await {
            Ok(()) => {
                // Stream ended without an error; treat like a dropped link.
                warn!("invalidation subscriber stream ended; reconnecting");
                delay = INITIAL_DELAY;
            }
            Err(err) => {
                warn!(error = %err, "invalidation subscriber failed; reconnecting");
            }
        }
        sleep(delay).await;
        delay = (delay * 2).min(MAX_DELAY);
    }
}

async fn subscribe_and_forward(
    state: &SharedState,
    client: &redis::Client,
) -> redis::RedisResult<()> {
    let mut pubsub = client.get_async_pubsub().await?;
    pubsub.psubscribe(keys::SCHOOL_CHANNEL_PATTERN).await?;
    info!(pattern = keys::SCHOOL_CHANNEL_PATTERN, "invalidation subscriber online");

    let mut stream = pubsub.on_message();
    while let Some(message) = stream.next().await {
        let channel: String = message.get_channel_name().to_string();
        let Some(school_id) = keys::school_from_channel(&channel) else {
            warn!(channel = %channel, "message on unexpected channel");
            continue;
        };
        let payload: String = match message.get_payload() {
            Ok(payload) => payload,
            Err(err) => {
                warn!(channel = %channel, error = %err, "unreadable pub/sub payload");
                continue;
            }
        };
        match serde_json::from_str::<ChannelEvent>(&payload) {
            Ok(event) => {
                let delivered = state.groups().send(school_id, event);
                debug!(school_id, delivered, "invalidation forwarded");
            }
            Err(err) => {
                warn!(channel = %channel, error = %err, "malformed invalidation event");
            }
        }
    }
    Ok(())
}
