//! Error types for registry operations

use reqwest::StatusCode;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, RegistryError>;

#[derive(Error, Debug)]
pub enum RegistryError {
    /// Network or TLS failure talking to the registry itself
    #[error("transport error: {0}")]
    Transport(#[source] reqwest::Error),

    /// `WWW-Authenticate` header that cannot be parsed
    #[error("malformed authentication challenge {header:?}: {reason}")]
    Challenge { header: String, reason: String },

    /// The token authority named by a challenge could not be reached
    #[error("token endpoint {realm} unreachable: {source}")]
    TokenEndpoint {
        realm: String,
        #[source]
        source: reqwest::Error,
    },

    /// The token authority answered but did not hand out a usable token
    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("{operation} failed with HTTP {status}: {message}")]
    Status {
        operation: String,
        status: StatusCode,
        message: String,
    },

    #[error("invalid window: start ({start}) is greater than end ({end})")]
    InvalidWindow { start: usize, end: usize },

    #[error("{operation} timed out after {seconds}s")]
    Timeout { operation: String, seconds: u64 },

    #[error("chunk {index} failed: {source}")]
    Chunk {
        index: usize,
        #[source]
        source: Box<RegistryError>,
    },

    #[error("layer {index} ({digest}) failed: {source}")]
    Layer {
        index: usize,
        digest: String,
        #[source]
        source: Box<RegistryError>,
    },

    #[error("incomplete body: expected {expected} bytes, received {actual}")]
    Incomplete { expected: u64, actual: u64 },

    #[error("stopped after {0} redirects")]
    TooManyRedirects(usize),

    #[error("manifest error: {0}")]
    Manifest(String),

    #[error("credential error: {0}")]
    Credentials(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("digest mismatch: expected {expected}, got {actual}")]
    DigestMismatch { expected: String, actual: String },

    #[error("background task failed: {0}")]
    Task(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid URL: {0}")]
    Url(#[from] url::ParseError),
}

impl From<reqwest::Error> for RegistryError {
    fn from(err: reqwest::Error) -> Self {
        if let Some(hops) = crate::registry::transport::redirect_limit_hit(&err) {
            return RegistryError::TooManyRedirects(hops);
        }
        RegistryError::Transport(err)
    }
}

impl From<tokio::task::JoinError> for RegistryError {
    fn from(err: tokio::task::JoinError) -> Self {
        RegistryError::Task(err.to_string())
    }
}

impl RegistryError {
    /// Builds a [`RegistryError::Status`] from a failed response, consuming its body
    pub async fn from_response(operation: impl Into<String>, response: reqwest::Response) -> Self {
        let status = response.status();
        let message = response
            .text()
            .await
            .unwrap_or_else(|_| "Failed to read error response".to_string());
        RegistryError::Status {
            operation: operation.into(),
            status,
            message,
        }
    }

    /// True when the error came from the registry transport rather than the token authority
    pub fn is_transport(&self) -> bool {
        matches!(self, RegistryError::Transport(_) | RegistryError::TooManyRedirects(_))
    }
}
