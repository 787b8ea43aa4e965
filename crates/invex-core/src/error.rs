//! Error types for the invex-core library.

use std::time::Duration;

use thiserror::Error;

/// Main error type for the invex library.
#[derive(Error, Debug)]
pub enum InvexError {
    /// Template loading or compilation error.
    #[error("template error: {0}")]
    Template(#[from] TemplateError),

    /// Registry setup error.
    #[error("registry error: {0}")]
    Registry(#[from] RegistryError),

    /// Vision client error.
    #[error("vision error: {0}")]
    Vision(#[from] VisionError),

    /// JSON (de)serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors related to the template repository.
#[derive(Error, Debug)]
pub enum TemplateError {
    /// A pattern in a template failed to compile.
    #[error("template {template}: invalid pattern for {field}: {source}")]
    Pattern {
        template: String,
        field: String,
        #[source]
        source: regex::Error,
    },

    /// A template file could not be decoded.
    #[error("invalid template file {path}: {reason}")]
    InvalidFile { path: String, reason: String },

    /// Two templates share the same id.
    #[error("duplicate template id: {0}")]
    DuplicateId(String),

    /// I/O error while scanning the template directory.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors raised by a strategy while parsing.
///
/// Soft failures ("no header row found") are not errors; they come back as an
/// unsuccessful `ParserResult`. This type is for faults.
#[derive(Error, Debug)]
pub enum ParserError {
    /// A caller-supplied hint could not be used.
    #[error("invalid hint {hint}: {reason}")]
    InvalidHint { hint: String, reason: String },

    /// Unexpected internal failure.
    #[error("internal error: {0}")]
    Internal(String),
}

/// Errors related to registry setup.
#[derive(Error, Debug)]
pub enum RegistryError {
    /// A parser with this name is already registered.
    #[error("parser already registered: {0}")]
    DuplicateParser(String),
}

/// Errors from the vision language-model call.
#[derive(Error, Debug)]
pub enum VisionError {
    /// The request did not complete within the configured timeout.
    #[error("vision request timed out after {0:?}")]
    Timeout(Duration),

    /// The endpoint could not be reached or is temporarily overloaded.
    #[error("vision service unavailable: {0}")]
    Unavailable(String),

    /// The circuit breaker is open and the call was not attempted.
    #[error("circuit open, retry in {} seconds", retry_in.as_secs().max(1))]
    CircuitOpen { retry_in: Duration },

    /// The circuit is half-open and its single probe call is still running.
    #[error("circuit half-open, probe in flight")]
    ProbeInFlight,

    /// The service answered with a non-retryable error.
    #[error("vision API error: {0}")]
    Api(String),

    /// The service answered, but the body could not be understood.
    #[error("malformed vision response: {0}")]
    MalformedResponse(String),

    /// The image could not be read.
    #[error("failed to read image: {0}")]
    Io(#[from] std::io::Error),

    /// The client is not configured (missing key, unknown image type).
    #[error("vision client configuration error: {0}")]
    Config(String),
}

impl VisionError {
    /// Whether retrying the same request may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, VisionError::Timeout(_) | VisionError::Unavailable(_))
    }

    /// Whether this failure counts against the circuit breaker.
    pub fn is_dependency_fault(&self) -> bool {
        self.is_retryable()
    }
}

/// Errors locating or validating the structured payload in a model response.
#[derive(Error, Debug)]
pub enum PayloadError {
    /// Nothing resembling a structured payload was found.
    #[error("no structured payload found in response")]
    NotFound,

    /// A payload candidate was found but is not valid JSON.
    #[error("structured payload has a syntax error: {0}")]
    Syntax(String),

    /// The payload is valid JSON but does not have the expected shape.
    #[error("structured payload does not match the invoice schema: {0}")]
    Schema(String),
}

/// Result type for the invex library.
pub type Result<T> = std::result::Result<T, InvexError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(VisionError::Timeout(Duration::from_secs(1)).is_retryable());
        assert!(VisionError::Unavailable("refused".into()).is_retryable());
        assert!(!VisionError::MalformedResponse("bad".into()).is_retryable());
        assert!(!VisionError::Api("400".into()).is_retryable());
        assert!(
            !VisionError::CircuitOpen {
                retry_in: Duration::from_secs(5)
            }
            .is_retryable()
        );
        assert!(!VisionError::ProbeInFlight.is_retryable());
        assert!(!VisionError::ProbeInFlight.is_dependency_fault());
    }

    #[test]
    fn test_circuit_open_message() {
        let err = VisionError::CircuitOpen {
            retry_in: Duration::from_secs(42),
        };
        assert_eq!(err.to_string(), "circuit open, retry in 42 seconds");
    }
}
