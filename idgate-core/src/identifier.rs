//! ID generation utilities.

use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Generate a unique id for a queued request.
///
/// # Example
///
/// ```rust
/// use idgate_core::identifier::generate_request_id;
///
/// let id = generate_request_id();
/// assert!(id.starts_with("req_"));
/// assert_eq!(id.len(), 36); // "req_" + 32 hex chars
/// ```
#[must_use]
pub fn generate_request_id() -> String {
    format!("req_{}", Uuid::new_v4().simple())
}

/// Get the current UTC timestamp.
#[must_use]
pub fn now_utc() -> DateTime<Utc> {
    Utc::now()
}
