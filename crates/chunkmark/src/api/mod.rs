//! Transport support for the chat client: retry and run accounting.
//!
//! - [`retry`]: transient error detection (408, 429, 5xx, network timeouts)
//!   with configurable exponential backoff and jitter. Never retries 4xx
//!   client errors or protocol violations.
//! - [`tracing`]: correlation IDs (`trace_id` / `span_id`) and cumulative
//!   [`UsageTracker`] token accounting.

pub mod retry;
pub mod tracing;

pub use retry::RetryConfig;
pub use self::tracing::{UsageTracker, generate_span_id, generate_trace_id};
