//! Convenience re-exports for common `chunkmark` types.
//!
//! ```ignore
//! use chunkmark::prelude::*;
//! ```
//!
//! Covers the client, configuration, segmentation, the controller and its
//! event handlers. Wire types and state machine internals are left out;
//! import those from their modules when needed.

// ── Client and configuration ────────────────────────────────────────
pub use crate::api::RetryConfig;
pub use crate::config::{ConvertConfig, Credentials, Provider};
pub use crate::{ChatClient, json_schema_for};

// ── Pipeline ────────────────────────────────────────────────────────
pub use crate::controller::{
    ControllerConfig, ControllerEvent, ConversionResult, EventHandler, FnEventHandler,
    LoggingHandler, NoopHandler, WindowController,
};
pub use crate::convert::convert_document;
pub use crate::oracle::{ChatOracle, Oracle, OracleCall, OracleFuture, ScriptedOracle};
pub use crate::segment::{Segmenter, TokenSegmenter, load_document};

// ── Errors ──────────────────────────────────────────────────────────
pub use crate::error::{ConfigError, ConvertError, SegmentationError, TransportError};
