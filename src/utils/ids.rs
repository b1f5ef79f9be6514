//! Time-ordered identifier generation for call sessions.
//!
//! Identifiers embed a millisecond timestamp followed by a random suffix, so
//! they sort by creation time and the creation instant can be recovered for
//! diagnostics.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use uuid::Uuid;

const PREFIX: &str = "cs";
const TIMESTAMP_HEX_LEN: usize = 13;
const SUFFIX_LEN: usize = 12;

/// Generate an opaque, time-ordered call session identifier.
pub fn call_session_id() -> String {
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64;
    let suffix = Uuid::new_v4().simple().to_string();
    format!("{PREFIX}{millis:013x}{}", &suffix[..SUFFIX_LEN])
}

/// Recover the embedded creation timestamp from a session identifier.
///
/// Returns `None` if the id was not produced by [`call_session_id`].
pub fn timestamp_of(id: &str) -> Option<SystemTime> {
    let rest = id.strip_prefix(PREFIX)?;
    if rest.len() != TIMESTAMP_HEX_LEN + SUFFIX_LEN {
        return None;
    }
    let millis = u64::from_str_radix(&rest[..TIMESTAMP_HEX_LEN], 16).ok()?;
    Some(UNIX_EPOCH + Duration::from_millis(millis))
}
