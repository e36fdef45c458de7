//! Invalidation broadcaster: turns a committed revision bump into a push
//! notification on the school's channel. Delivery is best-effort and
//! at-most-once; polling remains the source of truth.

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, warn};

use crate::config::AppConfig;
use crate::dto::ws::ChannelEvent;
use crate::services::metrics::DisplayMetrics;
use crate::store::{KeyValueStore, keys};

#[derive(Clone)]
pub struct Broadcaster {
    kv: Arc<dyn KeyValueStore>,
    metrics: Arc<DisplayMetrics>,
    ws_enabled: bool,
}

impl Broadcaster {
    pub fn new(kv: Arc<dyn KeyValueStore>, metrics: Arc<DisplayMetrics>, config: &AppConfig) -> Self {
        Self {
            kv,
            metrics,
            ws_enabled: config.ws_enabled,
        }
    }

    /// Publish `{invalidate, school_id, revision}` to `school:<id>`. Must only
    /// be called after the data transaction producing `revision` committed.
    /// Failures are logged and counted, never propagated.
    pub async fn broadcast(&self, school_id: i64, revision: i64) {
        if !self.ws_enabled {
            return;
        }

        let event = ChannelEvent::Invalidate {
            school_id,
            revision,
            ts: Utc::now().timestamp_millis(),
        };
        let payload = match serde_json::to_string(&event) {
            Ok(payload) => payload,
            Err(err) => {
                warn!(school_id, revision, error = %err, "invalidate serialization failed");
                self.metrics.broadcast_failed();
                return;
            }
        };

        match self
            .kv
            .publish(&keys::school_channel(school_id), payload)
            .await
        {
            Ok(()) => {
                debug!(school_id, revision, "invalidate published");
            }
            Err(err) => {
                warn!(school_id, revision, error = %err, "invalidate publish failed");
                self.metrics.broadcast_failed();
            }
        }
    }
}
