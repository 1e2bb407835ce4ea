use std::sync::Arc;

use thiserror::Error;

#[derive(Error, Debug, Clone)]
pub enum MpxError {
    /// A malformed proxy request path. The message is the full error text
    /// surfaced to the client, so variants of this error carry it verbatim.
    #[error("{0}")]
    InvalidRequest(String),

    #[error("invalid fetch operation")]
    InvalidFetchOps,

    /// The distinguished not-found value for cache lookups. Expired and
    /// missing entries both report this; real I/O failures never do.
    #[error("cache entry not found: {0}")]
    CacheMiss(String),

    #[error("I/O Error: {0}")]
    Io(#[from] Arc<std::io::Error>),

    #[error("JSON Parsing Error: {0}")]
    Json(#[from] Arc<serde_json::Error>),

    #[error("Semantic Versioning Error: {0}")]
    SemVer(#[from] Arc<semver::Error>),

    #[error("Driver Error: {0}")]
    Driver(String),

    #[error("Configuration Error: {0}")]
    Config(String),
}

impl MpxError {
    pub fn invalid_request(msg: impl Into<String>) -> Self {
        MpxError::InvalidRequest(msg.into())
    }

    pub fn is_cache_miss(&self) -> bool {
        matches!(self, MpxError::CacheMiss(_))
    }
}

impl From<std::io::Error> for MpxError {
    fn from(err: std::io::Error) -> Self {
        MpxError::Io(Arc::new(err))
    }
}

impl From<serde_json::Error> for MpxError {
    fn from(err: serde_json::Error) -> Self {
        MpxError::Json(Arc::new(err))
    }
}

impl From<semver::Error> for MpxError {
    fn from(err: semver::Error) -> Self {
        MpxError::SemVer(Arc::new(err))
    }
}

pub type Result<T> = std::result::Result<T, MpxError>;
