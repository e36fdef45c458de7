//! Change-signal entry point for the out-of-process admin application. Any
//! upstream mutation lands here after its transaction commits: debounced
//! revision bump first, broadcast second, and no error ever reaches the
//! caller's write path.

use tracing::{debug, info};

use crate::state::SharedState;

/// React to a committed upstream mutation for `school_id`. Returns the new
/// revision when this call won the debounce window.
pub async fn school_data_changed(state: &SharedState, school_id: i64) -> Option<i64> {
    let Some(revision) = state.registry().bump_debounced(school_id).await else {
        debug!(school_id, "change signal debounced");
        return None;
    };

    info!(school_id, revision, "schedule revision bumped");
    state.broadcaster().broadcast(school_id, revision).await;
    Some(revision)
}
