//! Common types used across intent broker modules.

use std::collections::HashMap;

/// Identifier of an in-flight intent request.
pub type RequestId = uuid::Uuid;

/// Named parameters carried by requests, replies and parameter matches.
pub type ParameterMap = HashMap<String, serde_json::Value>;

/// Timestamp wrapper for consistent serialization.
pub type Timestamp = chrono::DateTime<chrono::Utc>;

/// Get current UTC timestamp.
pub fn now() -> Timestamp {
    chrono::Utc::now()
}

/// Generate a fresh request identifier.
pub fn new_request_id() -> RequestId {
    uuid::Uuid::new_v4()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_ids_are_unique() {
        assert_ne!(new_request_id(), new_request_id());
    }

    #[test]
    fn test_now_is_monotonic_enough() {
        let a = now();
        let b = now();
        assert!(b >= a);
    }
}
