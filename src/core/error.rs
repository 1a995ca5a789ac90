//! Error types for the intent broker.

use thiserror::Error;
use uuid::Uuid;

/// Result type alias for intent broker operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in intent broker operations.
#[derive(Error, Debug)]
pub enum Error {
    // Registry errors
    #[error("Invalid intent: {0}")]
    InvalidIntent(String),

    #[error("Unknown application: {0}")]
    UnknownApplication(String),

    // Admission errors
    #[error("Intent {intent_id} was requested from unknown application {application_id}")]
    UnknownRequester {
        intent_id: String,
        application_id: String,
    },

    #[error("Unknown intent {intent_id} was requested from application {application_id}")]
    UnknownIntent {
        intent_id: String,
        application_id: String,
    },

    #[error("Inaccessible intent {intent_id} was requested from application {application_id}")]
    InaccessibleIntent {
        intent_id: String,
        application_id: String,
    },

    // Dispatch errors
    #[error("Request {0} is not pending at this stage")]
    RequestNotPending(Uuid),

    // Configuration errors
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Logging initialisation failed: {0}")]
    Logging(String),

    // Runtime errors
    #[error("Intent server stopped")]
    ServerStopped,

    #[error("No tokio runtime available: {0}")]
    NoRuntime(String),

    // Serialization errors
    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::SerializationError(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let err = Error::UnknownIntent {
            intent_id: "open".to_string(),
            application_id: "com.example.b".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Unknown intent open was requested from application com.example.b"
        );

        let id = Uuid::new_v4();
        assert!(Error::RequestNotPending(id).to_string().contains(&id.to_string()));
    }

    #[test]
    fn test_from_serde_error() {
        let parse = serde_json::from_str::<serde_json::Value>("{not json");
        let err: Error = parse.unwrap_err().into();
        assert!(matches!(err, Error::SerializationError(_)));
    }
}
