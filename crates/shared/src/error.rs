use std::time::Duration;

/// Errors raised inside the pipeline components.
///
/// Most of these never leave the component that produced them: a failed
/// candidate is logged and dropped, a failed image is replaced by the
/// placeholder. Only configuration errors are meant to abort a run.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("unexpected HTTP status {status} for {url}")]
    Status { status: u16, url: String },

    #[error("timed out after {0:?}")]
    Timeout(Duration),

    #[error("{url} is larger than {limit} bytes")]
    TooLarge { url: String, limit: u64 },

    #[error("render failed: {0}")]
    Render(String),

    #[error("parse error: {0}")]
    Parse(String),

    #[error("model error: {0}")]
    Model(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("not configured: {0}")]
    Config(String),
}

impl Error {
    /// True for failures worth retrying on an idempotent request:
    /// throttling, server errors, dropped connections and timeouts.
    pub fn is_transient(&self) -> bool {
        match self {
            Error::Http(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            Error::Status { status, .. } => matches!(status, 429 | 500 | 502 | 503 | 504),
            Error::Timeout(_) => true,
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
