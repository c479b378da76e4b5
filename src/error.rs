//! The crate's error taxonomy.
//!
//! Each component recovers only what it can locally (the session retries a
//! bounded number of times, the locator wraps download failures, the
//! producer aggregates boundary errors into its result rather than
//! propagating partway) — see the module docs in `producer` for the
//! aggregation policy.

use std::io;
use std::path::PathBuf;

use crate::catalog::BroadcastStatus;

/// The crate's single error type.
#[derive(thiserror::Error, Debug)]
pub enum RewindError {
    #[error("not a valid YouTube-style stream identifier: {0}")]
    BadStreamIdentifier(String),

    #[error("stream is not live (status: {0:?})")]
    BroadcastNotActive(BroadcastStatus),

    #[error("base URL has expired: {0}")]
    BaseUrlExpired(String),

    #[error("malformed query: {0}")]
    QuerySyntaxError(String),

    #[error("unknown attribute '{attribute}' in query{suggestion}",
            suggestion = .suggestion.as_ref().map(|s| format!(" (did you mean '{s}'?)")).unwrap_or_default())]
    UnknownAttributeError {
        attribute: String,
        suggestion: Option<String>,
    },

    #[error("alias resolution failed: {0}")]
    AliasResolutionError(String),

    #[error("format spec matched more than one representation: {0}")]
    AmbiguousFormatSpec(String),

    #[error("format spec matched no representation: {0}")]
    EmptyFormatSpec(String),

    #[error("malformed segment metadata: missing field '{0}'")]
    MalformedMetadata(String),

    #[error("failed to download segment {sequence}: {reason}")]
    SegmentDownload { sequence: i64, reason: String },

    #[error("sequence locating failed: {0}")]
    SequenceLocating(Box<RewindError>),

    #[error("maximum number of retries exceeded, last status: {status}")]
    MaxRetry { status: u16 },

    #[error("inconsistent rewind interval: {0}")]
    Interval(String),

    #[error("upstream protocol violation: {0}")]
    Protocol(String),

    #[error("muxer failed at stage '{stage}': {stderr}")]
    Muxer { stage: String, stderr: String },

    #[error("unknown representation itag '{0}' while refreshing manifest")]
    UnknownRepresentation(String),

    #[error("operation was cancelled")]
    Cancelled,

    #[error("I/O error on {path}: {source}")]
    Io {
        #[source]
        source: io::Error,
        path: PathBuf,
    },

    #[error("network error: {0}")]
    Network(String),

    #[error("XML error: {0}")]
    Xml(String),
}

impl RewindError {
    pub(crate) fn io(source: io::Error, path: impl Into<PathBuf>) -> Self {
        RewindError::Io { source, path: path.into() }
    }
}

impl From<reqwest::Error> for RewindError {
    fn from(e: reqwest::Error) -> Self {
        RewindError::Network(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, RewindError>;
