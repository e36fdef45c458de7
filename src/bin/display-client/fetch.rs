//! HTTP access to the display endpoints: status-first polling with the
//! cache-buster, snapshot fetches with ETag revalidation, and the error
//! taxonomy the runtime switches on.

use std::time::Duration;

use rand::Rng;
use rand::distributions::Alphanumeric;
use reqwest::StatusCode;
use serde::Deserialize;
use tracing::debug;

use classboard_back::dto::snapshot::SnapshotDoc;
use classboard_back::dto::status::StatusResponse;

/// Generous timeout while the screen still shows "loading".
const FIRST_LOAD_TIMEOUT: Duration = Duration::from_secs(15);
/// Steady-state timeout; a hung fetch is rescheduled quickly.
const STEADY_TIMEOUT: Duration = Duration::from_secs(9);

#[derive(Debug)]
pub enum FetchError {
    /// Terminal 403: the screen is unusable until an operator intervenes.
    Blocked { code: String },
    RateLimited { retry_after: Duration },
    Transient(String),
}

#[derive(Debug)]
pub enum StatusOutcome {
    NotModified {
        revision: i64,
    },
    FetchRequired {
        revision: i64,
    },
}

#[derive(Debug)]
pub enum SnapshotOutcome {
    NotModified,
    Fresh {
        doc: Box<SnapshotDoc>,
        etag: Option<String>,
    },
}

pub struct Api {
    http: reqwest::Client,
    base: String,
    token: String,
    device_id: String,
}

/// Server time header parsed off every response, fed into the clock sync.
pub struct Reply<T> {
    pub outcome: T,
    pub server_time_ms: Option<i64>,
}

impl Api {
    pub fn new(base: &str, token: &str, device_id: &str) -> Self {
        Self {
            http: reqwest::Client::new(),
            base: base.trim_end_matches('/').to_string(),
            token: token.to_string(),
            device_id: device_id.to_string(),
        }
    }

    /// `GET /api/display/status/<token>/?v=&dk=&cb=`.
    pub async fn status(&self, revision_hint: Option<i64>) -> Result<Reply<StatusOutcome>, FetchError> {
        let cb: String = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(8)
            .map(char::from)
            .collect();
        let mut request = self
            .http
            .get(format!("{}/api/display/status/{}/", self.base, self.token))
            .timeout(STEADY_TIMEOUT)
            .query(&[("dk", self.device_id.as_str()), ("cb", cb.as_str())]);
        if let Some(v) = revision_hint {
            request = request.query(&[("v", v)]);
        }

        let response = request
            .send()
            .await
            .map_err(|err| FetchError::Transient(err.to_string()))?;
        let server_time_ms = header_i64(&response, "x-server-time-ms");
        let schedule_revision = header_i64(&response, "x-schedule-revision");

        match response.status() {
            StatusCode::NOT_MODIFIED => Ok(Reply {
                outcome: StatusOutcome::NotModified {
                    revision: schedule_revision.unwrap_or_default(),
                },
                server_time_ms,
            }),
            StatusCode::OK => {
                let body: StatusResponse = response
                    .json()
                    .await
                    .map_err(|err| FetchError::Transient(err.to_string()))?;
                Ok(Reply {
                    outcome: StatusOutcome::FetchRequired {
                        revision: body.schedule_revision,
                    },
                    server_time_ms,
                })
            }
            status => Err(classify(status, response).await),
        }
    }

    /// `GET /api/display/snapshot/<token>/?rev=&dk=&transition=`.
    pub async fn snapshot(
        &self,
        revision_hint: Option<i64>,
        etag: Option<&str>,
        transition: bool,
        first_load: bool,
    ) -> Result<Reply<SnapshotOutcome>, FetchError> {
        let timeout = if first_load {
            FIRST_LOAD_TIMEOUT
        } else {
            STEADY_TIMEOUT
        };
        let mut request = self
            .http
            .get(format!("{}/api/display/snapshot/{}/", self.base, self.token))
            .timeout(timeout)
            .query(&[("dk", self.device_id.as_str())]);
        if let Some(rev) = revision_hint {
            request = request.query(&[("rev", rev)]);
        }
        if transition {
            request = request.query(&[("transition", 1)]);
        }
        // The very first paint must not be a 304 against a dead cache entry.
        if let Some(etag) = etag.filter(|_| !first_load) {
            request = request.header(reqwest::header::IF_NONE_MATCH, etag);
        }

        let response = request
            .send()
            .await
            .map_err(|err| FetchError::Transient(err.to_string()))?;
        let server_time_ms = header_i64(&response, "x-server-time-ms");
        let etag = response
            .headers()
            .get(reqwest::header::ETAG)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string);

        match response.status() {
            StatusCode::NOT_MODIFIED => Ok(Reply {
                outcome: SnapshotOutcome::NotModified,
                server_time_ms,
            }),
            StatusCode::OK => {
                let doc: SnapshotDoc = response
                    .json()
                    .await
                    .map_err(|err| FetchError::Transient(err.to_string()))?;
                debug!(
                    revision = doc.meta.schedule_revision,
                    stale = doc.meta.is_stale.unwrap_or(false),
                    "snapshot received"
                );
                Ok(Reply {
                    outcome: SnapshotOutcome::Fresh {
                        doc: Box::new(doc),
                        etag,
                    },
                    server_time_ms,
                })
            }
            status => Err(classify(status, response).await),
        }
    }
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    code: String,
}

async fn classify(status: StatusCode, response: reqwest::Response) -> FetchError {
    match status {
        StatusCode::TOO_MANY_REQUESTS => {
            let retry_after = response
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|value| value.to_str().ok())
                .and_then(|value| value.parse::<u64>().ok())
                .map(Duration::from_secs)
                .unwrap_or(Duration::from_secs(15));
            FetchError::RateLimited { retry_after }
        }
        StatusCode::FORBIDDEN => {
            let code = response
                .json::<ErrorBody>()
                .await
                .map(|body| body.code)
                .unwrap_or_else(|_| "screen_unknown".to_string());
            FetchError::Blocked { code }
        }
        other => FetchError::Transient(format!("unexpected status {other}")),
    }
}

fn header_i64(response: &reqwest::Response, name: &str) -> Option<i64> {
    response
        .headers()
        .get(name)?
        .to_str()
        .ok()?
        .parse()
        .ok()
}
