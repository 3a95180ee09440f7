//! Error types for the relay client

use thiserror::Error;

/// Result type for relay operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error returned by a message handler
///
/// Handlers may fail with any error type; the consumption loop only logs it.
pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

/// Result returned by a message handler
pub type HandlerResult = std::result::Result<(), HandlerError>;

/// Errors that can occur when talking to the broker and its collaborators
#[derive(Debug, Error)]
pub enum Error {
    /// Broker unreachable or the connection dropped
    #[error("Transport error: {0}")]
    TransportError(String),

    /// The broker rejected a create-topic request
    #[error("Failed to create topic '{topic}': {reason}")]
    TopicCreationError { topic: String, reason: String },

    /// Payload does not match the expected encoding or schema
    #[error("Serialization error on {topic}[{partition}]@{offset}: {reason}")]
    SerializationError {
        topic: String,
        partition: i32,
        offset: i64,
        reason: String,
    },

    /// Outbound record could not be encoded or validated
    #[error("Encoding error: {0}")]
    EncodingError(String),

    /// Flush on close left records unacknowledged or some deliveries failed
    #[error("Flush incomplete: {remaining} unacknowledged, {failed} failed")]
    FlushError { remaining: usize, failed: usize },

    /// A single record could not be delivered
    #[error("Delivery error: {0}")]
    DeliveryError(String),

    /// Invalid input such as an empty topic name or malformed endpoint
    #[error("Validation error: {0}")]
    ValidationError(String),

    /// Non-success response from a REST collaborator
    #[error("HTTP error (status {status}): {body}")]
    HttpError { status: u16, body: String },

    /// Operation attempted on a closed client
    #[error("Client closed: {0}")]
    ClosedError(String),
}

impl Error {
    /// Whether this error means the broker itself could not be reached
    pub fn is_transport(&self) -> bool {
        matches!(self, Error::TransportError(_))
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::EncodingError(format!("JSON error: {}", err))
    }
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        if let Some(status) = err.status() {
            Error::HttpError {
                status: status.as_u16(),
                body: err.to_string(),
            }
        } else {
            Error::TransportError(err.to_string())
        }
    }
}

#[cfg(feature = "kafka")]
impl From<rdkafka::error::KafkaError> for Error {
    fn from(err: rdkafka::error::KafkaError) -> Self {
        Error::TransportError(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serialization_error_context() {
        let err = Error::SerializationError {
            topic: "stations".to_string(),
            partition: 2,
            offset: 41,
            reason: "missing field".to_string(),
        };
        let text = err.to_string();
        assert!(text.contains("stations[2]@41"));
        assert!(text.contains("missing field"));
    }

    #[test]
    fn test_flush_error() {
        let err = Error::FlushError {
            remaining: 3,
            failed: 1,
        };
        assert!(err.to_string().contains("3 unacknowledged"));
        assert!(err.to_string().contains("1 failed"));
    }

    #[test]
    fn test_is_transport() {
        assert!(Error::TransportError("down".to_string()).is_transport());
        assert!(!Error::ValidationError("bad".to_string()).is_transport());
    }

    #[test]
    fn test_from_serde_error() {
        let json_err = serde_json::from_str::<serde_json::Value>("{not json").unwrap_err();
        let err: Error = json_err.into();
        assert!(matches!(err, Error::EncodingError(_)));
    }
}
