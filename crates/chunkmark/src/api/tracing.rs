//! Correlation IDs and token accounting for conversion runs.
//!
//! Each conversion gets a `trace_id`; each oracle call within it a `span_id`
//! derived from the iteration and attempt. Token usage reported by the API is
//! summed in a [`UsageTracker`].

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::SystemTime;

use crate::UsageInfo;

/// Generate a unique trace ID for a conversion run.
pub fn generate_trace_id() -> String {
    let ts = SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos();
    static COUNTER: AtomicU64 = AtomicU64::new(0);
    let count = COUNTER.fetch_add(1, Ordering::Relaxed);
    format!("cm-{ts:x}-{count:04x}")
}

/// Span ID for one oracle call. `attempt` is 0 for the first send of an
/// iteration and 1 for its retry.
pub fn generate_span_id(trace_id: &str, iteration: u32, attempt: u32) -> String {
    format!("{trace_id}:i{iteration}.{attempt}")
}

/// Cumulative token usage across the oracle calls of one conversion.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct UsageTracker {
    pub calls: u32,
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
}

impl UsageTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one oracle call and its usage, if the API reported any.
    pub fn record(&mut self, usage: Option<&UsageInfo>) {
        self.calls += 1;
        if let Some(u) = usage {
            self.prompt_tokens += u64::from(u.prompt_tokens.unwrap_or(0));
            self.completion_tokens += u64::from(u.completion_tokens.unwrap_or(0));
        }
    }

    pub fn total_tokens(&self) -> u64 {
        self.prompt_tokens + self.completion_tokens
    }

    /// Format as a short summary string.
    pub fn summary(&self) -> String {
        format!(
            "{} call(s), tokens: {} prompt + {} completion = {} total",
            self.calls,
            self.prompt_tokens,
            self.completion_tokens,
            self.total_tokens(),
        )
    }
}
