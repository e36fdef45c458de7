//! Client configuration from the environment: where the back-end lives, who
//! this screen is, and where to persist the clock offset.

use std::env;
use std::path::PathBuf;

use rand::Rng;
use rand::distributions::Alphanumeric;
use tracing::info;

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub server_url: String,
    pub token: String,
    pub device_id: String,
    /// Known school id for the deterministic boundary spread, when the
    /// operator configured one.
    pub school_id_hint: Option<i64>,
    pub state_path: Option<PathBuf>,
    /// Weak hardware: cap the frame rate and skip heavy effects.
    pub lite_mode: bool,
}

impl ClientConfig {
    /// Read the client environment. `DISPLAY_TOKEN` is mandatory; the device
    /// id is generated once and persisted next to the clock state.
    pub fn from_env() -> Result<Self, String> {
        let server_url = env::var("DISPLAY_SERVER_URL")
            .unwrap_or_else(|_| "http://127.0.0.1:8080".to_string());
        let token = env::var("DISPLAY_TOKEN").map_err(|_| "DISPLAY_TOKEN is required")?;

        let state_dir = env::var("DISPLAY_STATE_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| env::temp_dir().join("display-client"));
        let _ = std::fs::create_dir_all(&state_dir);

        let device_id = match env::var("DISPLAY_DEVICE_ID") {
            Ok(id) if !id.trim().is_empty() => id,
            _ => load_or_create_device_id(&state_dir),
        };

        let school_id_hint = env::var("DISPLAY_SCHOOL_ID")
            .ok()
            .and_then(|raw| raw.parse().ok());
        let lite_mode = env::var("DISPLAY_LITE")
            .map(|raw| matches!(raw.trim(), "1" | "true" | "yes"))
            .unwrap_or(false);

        Ok(Self {
            server_url,
            token,
            device_id,
            school_id_hint,
            state_path: Some(state_dir.join("clock.json")),
            lite_mode,
        })
    }
}

/// The device id survives restarts so the binding outlives the process.
fn load_or_create_device_id(state_dir: &PathBuf) -> String {
    let path = state_dir.join("device-id");
    if let Ok(existing) = std::fs::read_to_string(&path) {
        let existing = existing.trim().to_string();
        if !existing.is_empty() {
            return existing;
        }
    }
    let generated: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(32)
        .map(char::from)
        .collect();
    let _ = std::fs::write(&path, &generated);
    info!(path = %path.display(), "generated new device id");
    generated
}
