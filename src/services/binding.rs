//! Atomic device binding: a screen token belongs to at most one device. The
//! decisive step is a conditional UPDATE in the authoritative store, so
//! concurrent binds resolve to exactly one winner with no request-spanning
//! locks.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::error::ServiceError;
use crate::store::{DirectoryStore, models::Screen};

/// Resolve a token and bind `device_id` to it. Idempotent for the device that
/// already owns the screen; losers observe `ScreenBound` deterministically.
pub async fn bind_device_atomic(
    directory: &Arc<dyn DirectoryStore>,
    token: &str,
    device_id: &str,
    allow_multi_device: bool,
) -> Result<Screen, ServiceError> {
    let Some(screen) = directory.screen_by_token(token).await? else {
        warn!(token = %redact(token), "bind: token not found or inactive");
        return Err(ServiceError::ScreenUnknown);
    };

    // Multi-device mode skips enforcement and records nothing.
    if allow_multi_device {
        debug!(screen_id = screen.id, "multi-device enabled; skipping binding");
        return Ok(screen);
    }

    match screen.bound_device_id.as_deref() {
        Some(bound) if bound == device_id => {
            debug!(screen_id = screen.id, "already bound to this device");
            return Ok(screen);
        }
        Some(_) => {
            warn!(
                screen_id = screen.id,
                device = %redact(device_id),
                "screen bound to another device"
            );
            return Err(ServiceError::ScreenBound);
        }
        None => {}
    }

    if directory.bind_screen_if_unbound(screen.id, device_id).await? {
        info!(screen_id = screen.id, device = %redact(device_id), "screen newly bound");
        return refreshed(directory, screen.id).await;
    }

    // Zero rows updated: somebody bound it between our read and the UPDATE.
    let current = refreshed(directory, screen.id).await?;
    if current.bound_device_id.as_deref() == Some(device_id) {
        info!(screen_id = current.id, "bind race resolved in our favor");
        Ok(current)
    } else {
        warn!(
            screen_id = current.id,
            device = %redact(device_id),
            "bind race lost to another device"
        );
        Err(ServiceError::ScreenBound)
    }
}

/// Admin/debug helper: release a screen so a new device can claim it.
pub async fn unbind_device(
    directory: &Arc<dyn DirectoryStore>,
    screen_id: i64,
) -> Result<bool, ServiceError> {
    let released = directory.unbind_screen(screen_id).await?;
    if released {
        info!(screen_id, "screen unbound");
    }
    Ok(released)
}

async fn refreshed(
    directory: &Arc<dyn DirectoryStore>,
    screen_id: i64,
) -> Result<Screen, ServiceError> {
    directory
        .screen_by_id(screen_id)
        .await?
        .ok_or(ServiceError::ScreenUnknown)
}

/// Tokens and device ids are secrets; log only a prefix.
fn redact(value: &str) -> String {
    let prefix: String = value.chars().take(8).collect();
    format!("{prefix}…")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::MemoryDirectory;
    use crate::store::models::Screen;

    fn unbound_screen(id: i64, token: &str) -> Screen {
        Screen {
            id,
            school_id: 40,
            name: format!("شاشة {id}"),
            token: token.to_string(),
            bound_device_id: None,
            bound_at: None,
            is_active: true,
            last_seen: None,
        }
    }

    fn directory_with(screen: Screen) -> Arc<dyn DirectoryStore> {
        let directory = MemoryDirectory::new();
        directory.insert_screen(screen);
        directory
    }

    #[tokio::test]
    async fn unknown_token_is_rejected() {
        let directory = directory_with(unbound_screen(1, "TK"));
        let err = bind_device_atomic(&directory, "nope", "D1", false)
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::ScreenUnknown));
    }

    #[tokio::test]
    async fn first_bind_wins_and_is_idempotent() {
        let directory = directory_with(unbound_screen(1, "TK"));

        let bound = bind_device_atomic(&directory, "TK", "D1", false)
            .await
            .unwrap();
        assert_eq!(bound.bound_device_id.as_deref(), Some("D1"));
        assert!(bound.bound_at.is_some());

        let again = bind_device_atomic(&directory, "TK", "D1", false)
            .await
            .unwrap();
        assert_eq!(again.bound_device_id.as_deref(), Some("D1"));
    }

    #[tokio::test]
    async fn second_device_is_rejected() {
        let directory = directory_with(unbound_screen(1, "TK"));
        bind_device_atomic(&directory, "TK", "D1", false)
            .await
            .unwrap();

        let err = bind_device_atomic(&directory, "TK", "D2", false)
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::ScreenBound));
    }

    #[tokio::test]
    async fn concurrent_binds_have_exactly_one_winner() {
        let directory = directory_with(unbound_screen(1, "TK"));

        let (a, b) = tokio::join!(
            bind_device_atomic(&directory, "TK", "Da", false),
            bind_device_atomic(&directory, "TK", "Db", false),
        );
        let winners = [a.is_ok(), b.is_ok()].iter().filter(|ok| **ok).count();
        assert_eq!(winners, 1);

        let loser = if a.is_ok() { b } else { a };
        assert!(matches!(loser.unwrap_err(), ServiceError::ScreenBound));
    }

    #[tokio::test]
    async fn multi_device_mode_skips_binding_entirely() {
        let directory = directory_with(unbound_screen(1, "TK"));
        bind_device_atomic(&directory, "TK", "D1", true)
            .await
            .unwrap();

        let screen = bind_device_atomic(&directory, "TK", "D2", true)
            .await
            .unwrap();
        assert_eq!(screen.bound_device_id, None);
    }

    #[tokio::test]
    async fn unbind_frees_the_screen_for_a_new_device() {
        let directory = directory_with(unbound_screen(1, "TK"));
        bind_device_atomic(&directory, "TK", "D1", false)
            .await
            .unwrap();

        assert!(unbind_device(&directory, 1).await.unwrap());
        let rebound = bind_device_atomic(&directory, "TK", "D2", false)
            .await
            .unwrap();
        assert_eq!(rebound.bound_device_id.as_deref(), Some("D2"));
    }
}
