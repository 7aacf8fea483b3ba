//! Events and handlers for observing a controller run.
//!
//! The [`WindowController`](super::runner::WindowController) reports every
//! step of a conversion as a [`ControllerEvent`]. Handlers are purely
//! observational; they cannot steer the loop.
//!
//! | Handler | Use case |
//! |---------|----------|
//! | [`NoopHandler`] | Tests or fire-and-forget runs |
//! | [`LoggingHandler`] | Structured logging via `tracing` |
//! | [`FnEventHandler`] | Quick closures for simple callbacks |
//! | Custom `impl EventHandler` | Progress bars, metrics |

use super::state::Window;
use crate::error::ConvertError;
use tracing::{debug, info, warn};

/// Events emitted by the controller during a run.
#[derive(Debug)]
pub enum ControllerEvent<'a> {
    /// A run is starting.
    Started {
        trace_id: &'a str,
        segments: usize,
        max_index: usize,
    },
    /// A request is about to be sent to the oracle.
    RequestSent {
        iteration: u32,
        window: Window,
        retry: bool,
        span_id: &'a str,
    },
    /// Token usage reported for the last call.
    TokenUsage {
        prompt_tokens: u32,
        completion_tokens: u32,
    },
    /// The reply could not be parsed; the same window will be resent.
    RetryRequested {
        iteration: u32,
        window: Window,
        message: &'a str,
    },
    /// A markdown passage was appended to the output.
    PassageStored {
        iteration: u32,
        /// Position of the passage in the output.
        index: usize,
        markdown: &'a str,
    },
    /// The controller moved to the window requested by the reply.
    WindowAdvanced {
        iteration: u32,
        from: Window,
        to: Window,
    },
    /// The oracle declared the document finished.
    Finished { iterations: u32, passages: usize },
    /// The run failed.
    Failed { error: &'a ConvertError },
}

/// Handler for controller events.
pub trait EventHandler: Send + Sync {
    /// Called for each event during the run. Default: ignore.
    fn on_event(&self, event: &ControllerEvent<'_>) {
        let _ = event;
    }
}

/// A no-op event handler.
pub struct NoopHandler;
impl EventHandler for NoopHandler {}

/// An event handler backed by a closure.
///
/// ```ignore
/// let handler = FnEventHandler::new(|event| {
///     if let ControllerEvent::PassageStored { index, .. } = event {
///         eprintln!("stored passage #{index}");
///     }
/// });
/// ```
pub struct FnEventHandler<F>(F)
where
    F: Fn(&ControllerEvent<'_>) + Send + Sync;

impl<F> FnEventHandler<F>
where
    F: Fn(&ControllerEvent<'_>) + Send + Sync,
{
    pub fn new(f: F) -> Self {
        Self(f)
    }
}

impl<F> EventHandler for FnEventHandler<F>
where
    F: Fn(&ControllerEvent<'_>) + Send + Sync,
{
    fn on_event(&self, event: &ControllerEvent<'_>) {
        (self.0)(event)
    }
}

/// Logs every event through `tracing`.
pub struct LoggingHandler;

impl EventHandler for LoggingHandler {
    fn on_event(&self, event: &ControllerEvent<'_>) {
        match event {
            ControllerEvent::Started {
                trace_id,
                segments,
                max_index,
            } => {
                info!("Conversion started: trace_id={trace_id}, segments={segments}, max_index={max_index}");
            }
            ControllerEvent::RequestSent {
                iteration,
                window,
                retry,
                span_id,
            } => {
                info!(
                    "[iteration {iteration}] window {window}{}",
                    if *retry { " (retry)" } else { "" }
                );
                debug!("  span_id={span_id}");
            }
            ControllerEvent::TokenUsage {
                prompt_tokens,
                completion_tokens,
            } => {
                debug!("Tokens: prompt={prompt_tokens}, completion={completion_tokens}");
            }
            ControllerEvent::RetryRequested {
                iteration,
                window,
                message,
            } => {
                warn!("Unparsable reply at iteration {iteration}, window {window}: {message}. Retrying once.");
            }
            ControllerEvent::PassageStored {
                iteration,
                index,
                markdown,
            } => {
                let preview: String = markdown.chars().take(80).collect();
                info!(
                    "Stored passage #{index} at iteration {iteration}: {preview}{}",
                    if markdown.chars().count() > 80 { "..." } else { "" }
                );
            }
            ControllerEvent::WindowAdvanced {
                iteration,
                from,
                to,
            } => {
                debug!("Window {from} -> {to} after iteration {iteration}");
            }
            ControllerEvent::Finished {
                iterations,
                passages,
            } => {
                info!("Conversion finished after {iterations} iteration(s), {passages} passage(s)");
            }
            ControllerEvent::Failed { error } => {
                warn!("Conversion failed ({}): {error}", error.stage());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn fn_event_handler_receives_events() {
        let seen = Mutex::new(Vec::new());
        let handler = FnEventHandler::new(|event| {
            if let ControllerEvent::PassageStored { index, .. } = event {
                seen.lock().unwrap().push(*index);
            }
        });
        handler.on_event(&ControllerEvent::PassageStored {
            iteration: 0,
            index: 0,
            markdown: "# A",
        });
        handler.on_event(&ControllerEvent::Finished {
            iterations: 1,
            passages: 1,
        });
        assert_eq!(*seen.lock().unwrap(), vec![0]);
    }

    #[test]
    fn logging_handler_accepts_every_event() {
        let window = Window { start: 0, end: 2 };
        let error = ConvertError::IterationLimit { limit: 1 };
        let events = [
            ControllerEvent::Started {
                trace_id: "cm-1",
                segments: 3,
                max_index: 2,
            },
            ControllerEvent::RequestSent {
                iteration: 0,
                window,
                retry: true,
                span_id: "cm-1:i0.1",
            },
            ControllerEvent::TokenUsage {
                prompt_tokens: 1,
                completion_tokens: 2,
            },
            ControllerEvent::RetryRequested {
                iteration: 0,
                window,
                message: "invalid JSON",
            },
            ControllerEvent::PassageStored {
                iteration: 0,
                index: 0,
                markdown: &"é".repeat(100),
            },
            ControllerEvent::WindowAdvanced {
                iteration: 0,
                from: window,
                to: window,
            },
            ControllerEvent::Finished {
                iterations: 1,
                passages: 1,
            },
            ControllerEvent::Failed { error: &error },
        ];
        for event in &events {
            LoggingHandler.on_event(event);
            NoopHandler.on_event(event);
        }
    }
}
