use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

#[derive(Debug, Serialize, Deserialize, ToSchema)]
/// Body of the cheap polling endpoint when the client is out of date. An
/// up-to-date client gets `304 Not Modified` and no body at all.
pub struct StatusResponse {
    pub schedule_revision: i64,
    pub fetch_required: bool,
}
