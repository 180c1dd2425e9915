//! Error types shared by the caches, the socket layer and the repositories.

use thiserror::Error;

/// Failure reading or writing a JSON file in the cache or data directories.
#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Failure of a single HTTP fetch, including unexpected statuses.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("unexpected status {code}: {body}")]
    Status { code: u16, body: String },
    #[error("failed to decode response: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("failed to update cached data")]
    NotModifiedWithoutData,
    #[error("invalid url: {0}")]
    Url(#[from] url::ParseError),
}

impl FetchError {
    pub fn status_code(&self) -> Option<u16> {
        match self {
            FetchError::Status { code, .. } => Some(*code),
            FetchError::Http(error) => error.status().map(|status| status.as_u16()),
            _ => None,
        }
    }
}

/// Outcome of a channel subscription that did not produce data.
#[derive(Clone, Copy, Debug, Error, PartialEq, Eq)]
pub enum SocketError {
    #[error("channel failure")]
    Failure,
    #[error("received error reply")]
    ReceivedError,
    #[error("failed to parse message")]
    FailedToParse,
    #[error("push timed out")]
    Timeout,
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("connection failed: {0}")]
    Connection(String),
    #[error("send failed: {0}")]
    Send(String),
    #[error("receive failed: {0}")]
    Receive(String),
}

/// Error half of the result handed to repository and usecase callbacks.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ApiError {
    #[error(transparent)]
    Socket(#[from] SocketError),
    #[error("{message}")]
    Fetch { code: Option<u16>, message: String },
}

impl From<FetchError> for ApiError {
    fn from(error: FetchError) -> Self {
        ApiError::Fetch {
            code: error.status_code(),
            message: error.to_string(),
        }
    }
}

pub type ApiResult<T> = Result<T, ApiError>;
