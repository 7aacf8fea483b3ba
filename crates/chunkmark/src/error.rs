//! Typed error hierarchy for document conversion.
//!
//! [`ConvertError`] is the single error surfaced to callers. Its variants
//! follow the stages of a conversion:
//! - `Config`: credentials or sizes rejected before any work starts
//! - `Segmentation`: the document could not be read or split
//! - `Transport`: the oracle call failed or broke the one-reply protocol
//! - `Schema`: the reply could not be parsed, twice in a row
//! - `Invariant`: the reply parsed but asked for an impossible window

use std::path::PathBuf;
use thiserror::Error;

use crate::controller::state::Window;

/// Configuration rejected before processing starts.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing credential: {0}")]
    MissingCredential(&'static str),

    #[error("invalid endpoint URL '{endpoint}': {reason}")]
    InvalidEndpoint { endpoint: String, reason: String },

    #[error("invalid segment sizes: chunk_size={chunk_size}, overlap={overlap}")]
    InvalidSegmentSizes { chunk_size: usize, overlap: usize },

    #[error("failed to build HTTP client: {0}")]
    HttpClient(String),
}

/// The document could not be turned into segments.
#[derive(Debug, Error)]
pub enum SegmentationError {
    #[error("failed to read document at {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("document is empty")]
    EmptyDocument,

    #[error("segmenter produced no segments")]
    NoSegments,
}

/// The oracle call failed at the network or protocol layer.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("request failed: {0}")]
    Request(#[source] reqwest::Error),

    #[error("HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("failed to parse response: {0}")]
    Decode(String),

    #[error("API error: {0}")]
    Api(String),

    #[error("expected exactly one reply, received {count}")]
    ReplyCount { count: usize },

    #[error("expected a call to `{expected}`, received `{actual}`")]
    UnexpectedFunction { expected: String, actual: String },

    #[error("{0}")]
    Other(String),
}

impl TransportError {
    /// Whether the failure is worth retrying at the transport layer
    /// (rate limits, gateway errors, timeouts, dropped connections).
    pub fn is_transient(&self) -> bool {
        match self {
            TransportError::Status { status, .. } => {
                matches!(status, 408 | 429 | 500 | 502 | 503 | 504)
            }
            TransportError::Request(e) => e.is_timeout() || e.is_connect(),
            _ => false,
        }
    }
}

/// A reply that parsed but broke an index invariant.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InvariantViolation {
    #[error("next end index {end} is larger than max index {max_index}")]
    EndBeyondMax { end: i64, max_index: usize },

    #[error("next start index {start} is larger than next end index {end}")]
    StartAfterEnd { start: i64, end: i64 },

    #[error("next start index {start} is negative")]
    NegativeStart { start: i64 },
}

/// Any failure of a document conversion. There is no partial success: a
/// conversion either returns every stored passage or one of these.
#[derive(Debug, Error)]
pub enum ConvertError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Segmentation(#[from] SegmentationError),

    #[error("oracle call failed at iteration {iteration}, window {window}: {source}")]
    Transport {
        iteration: u32,
        window: Window,
        #[source]
        source: TransportError,
    },

    #[error(
        "unable to parse reply at iteration {iteration}, window {window} after {attempts} attempt(s): {message}"
    )]
    Schema {
        iteration: u32,
        window: Window,
        attempts: u32,
        message: String,
        raw: String,
    },

    #[error("invalid reply at iteration {iteration}, window {window}: {violation}")]
    Invariant {
        iteration: u32,
        window: Window,
        violation: InvariantViolation,
        raw: String,
    },

    #[error("no finished reply after {limit} iterations")]
    IterationLimit { limit: u32 },

    #[error("conversion cancelled at iteration {iteration}")]
    Cancelled { iteration: u32 },
}

impl ConvertError {
    /// Short name of the stage that failed, for diagnostics.
    pub fn stage(&self) -> &'static str {
        match self {
            ConvertError::Config(_) => "config",
            ConvertError::Segmentation(_) => "segmentation",
            ConvertError::Transport { .. } => "transport",
            ConvertError::Schema { .. } => "schema",
            ConvertError::Invariant { .. } => "invariant",
            ConvertError::IterationLimit { .. } => "iteration-limit",
            ConvertError::Cancelled { .. } => "cancelled",
        }
    }

    /// The raw reply that caused the failure, when there was one.
    pub fn raw_reply(&self) -> Option<&str> {
        match self {
            ConvertError::Schema { raw, .. } | ConvertError::Invariant { raw, .. } => Some(raw),
            _ => None,
        }
    }
}
