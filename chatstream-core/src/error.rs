use thiserror::Error;

/// Core error type for chatstream.
/// Internally, modules can use `anyhow::Result<T>` for convenience,
/// but public boundaries should expose `CoreResult<T>` with this error.
#[derive(Debug, Error)]
pub enum ChatError {
    #[error("validation failed: {0}")]
    Validation(String),

    /// A data frame carried something that is not JSON. Fatal for the response.
    #[error("malformed event payload: {message}")]
    MalformedPayload { message: String, payload: String },

    #[error("endpoint unavailable: {endpoint}")]
    Unavailable { endpoint: String },

    #[error("rate limited by {endpoint}")]
    RateLimited {
        endpoint: String,
        retry_after: Option<u64>,
    },

    #[error("request to {endpoint} failed: {code} {message}")]
    Status {
        endpoint: String,
        code: u16,
        message: String,
    },

    #[error("the response body is empty")]
    EmptyBody,

    #[error("stream interrupted: {0}")]
    StreamInterrupted(String),

    #[error("request cancelled")]
    Cancelled,

    #[error("a request is already in flight for this conversation")]
    Busy,

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl ChatError {
    /// Connection-level failures, bad statuses and missing bodies.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            Self::Unavailable { .. }
                | Self::RateLimited { .. }
                | Self::Status { .. }
                | Self::EmptyBody
                | Self::StreamInterrupted(_)
        )
    }

    /// Short stable label used in traces.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation",
            Self::MalformedPayload { .. } => "malformed_payload",
            Self::Unavailable { .. } => "unavailable",
            Self::RateLimited { .. } => "rate_limited",
            Self::Status { .. } => "status",
            Self::EmptyBody => "empty_body",
            Self::StreamInterrupted(_) => "stream_interrupted",
            Self::Cancelled => "cancelled",
            Self::Busy => "busy",
            Self::Io(_) => "io",
            Self::Other(_) => "other",
        }
    }
}

pub type CoreResult<T> = std::result::Result<T, ChatError>;
