//! Window state machine.
//!
//! A conversion is a sequence of [`ControllerState`] values. `Running` and
//! `AwaitingRetry` carry the live [`IterationState`]; `Finished` and `Failed`
//! are terminal. [`IterationState::transition`] is pure: given the outcome of
//! one oracle reply it returns the next state, so every edge of the machine
//! can be tested without an oracle.

use std::fmt;

use crate::error::{ConvertError, InvariantViolation};
use crate::schema::{WindowReply, WindowRequest};

/// Consecutive unparsable replies tolerated before failing. One retry.
pub const MAX_SCHEMA_RETRIES: u32 = 1;

/// Inclusive range of segment indices, `start <= end <= max_index`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Window {
    pub start: usize,
    pub end: usize,
}

impl Window {
    /// The first window: up to three segments from the top.
    pub fn initial(max_index: usize) -> Self {
        Self {
            start: 0,
            end: max_index.min(2),
        }
    }

    /// Validate the next window requested by a reply.
    pub fn from_reply(start: i64, end: i64, max_index: usize) -> Result<Self, InvariantViolation> {
        if end > max_index as i64 {
            return Err(InvariantViolation::EndBeyondMax { end, max_index });
        }
        if start > end {
            return Err(InvariantViolation::StartAfterEnd { start, end });
        }
        if start < 0 {
            return Err(InvariantViolation::NegativeStart { start });
        }
        Ok(Self {
            start: start as usize,
            end: end as usize,
        })
    }

    /// Number of segments in the window.
    pub fn segment_count(&self) -> usize {
        self.end - self.start + 1
    }
}

impl fmt::Display for Window {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {}]", self.start, self.end)
    }
}

/// The result of interpreting one raw reply.
#[derive(Debug, Clone)]
pub enum ReplyOutcome {
    /// The reply matched the schema.
    Parsed { reply: WindowReply, raw: String },
    /// The reply did not match the schema.
    Malformed { raw: String, message: String },
}

/// Live state of one conversion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IterationState {
    pub iteration: u32,
    pub retry_requested: bool,
    pub retry_count: u32,
    pub window: Window,
    pub accumulated: Vec<String>,
    max_index: usize,
}

/// Tagged state of the controller.
#[derive(Debug)]
pub enum ControllerState {
    Running(IterationState),
    /// Same window and iteration will be resent with the retry flag set.
    AwaitingRetry(IterationState),
    Finished(Vec<String>),
    Failed(Box<ConvertError>),
}

impl ControllerState {
    /// Short state name for logs.
    pub fn name(&self) -> &'static str {
        match self {
            ControllerState::Running(_) => "running",
            ControllerState::AwaitingRetry(_) => "awaiting-retry",
            ControllerState::Finished(_) => "finished",
            ControllerState::Failed(_) => "failed",
        }
    }
}

impl IterationState {
    /// Fresh state for a document whose last segment index is `max_index`.
    pub fn new(max_index: usize) -> Self {
        Self {
            iteration: 0,
            retry_requested: false,
            retry_count: 0,
            window: Window::initial(max_index),
            accumulated: Vec::new(),
            max_index,
        }
    }

    /// Build the request for the current window. The retry flag is a one-shot
    /// signal: it goes out on this request and is cleared.
    pub fn next_request<'s>(&mut self, segments: &'s [String]) -> WindowRequest<'s> {
        let retry = std::mem::take(&mut self.retry_requested);
        WindowRequest {
            iteration: self.iteration,
            retry_last_iteration: retry,
            max_index: self.max_index,
            start_index: self.window.start,
            end_index: self.window.end,
            chunks: &segments[self.window.start..=self.window.end],
        }
    }

    /// Apply one reply outcome and return the next state.
    pub fn transition(mut self, outcome: ReplyOutcome) -> ControllerState {
        match outcome {
            ReplyOutcome::Malformed { raw, message } => {
                if self.retry_count >= MAX_SCHEMA_RETRIES {
                    return ControllerState::Failed(Box::new(ConvertError::Schema {
                        iteration: self.iteration,
                        window: self.window,
                        attempts: self.retry_count + 1,
                        message,
                        raw,
                    }));
                }
                self.retry_requested = true;
                self.retry_count += 1;
                ControllerState::AwaitingRetry(self)
            }
            ReplyOutcome::Parsed { reply, raw } => {
                self.retry_count = 0;

                // A finishing reply conventionally carries -1 indices, so it
                // is honoured before any bounds check.
                if reply.finished {
                    return ControllerState::Finished(self.accumulated);
                }

                let next = match Window::from_reply(
                    reply.next_start_index,
                    reply.next_end_index,
                    self.max_index,
                ) {
                    Ok(next) => next,
                    Err(violation) => {
                        return ControllerState::Failed(Box::new(ConvertError::Invariant {
                            iteration: self.iteration,
                            window: self.window,
                            violation,
                            raw,
                        }));
                    }
                };

                if reply.store {
                    self.accumulated.push(reply.markdown);
                }
                self.window = next;
                self.iteration += 1;
                ControllerState::Running(self)
            }
        }
    }
}
