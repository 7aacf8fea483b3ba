//! The async control loop.
//!
//! [`WindowController`] sends the current window to the [`Oracle`], checks
//! that exactly one `output` call came back, parses it against the reply
//! schema and feeds the outcome to the state machine in [`super::state`].
//! It stops on the first terminal state.

use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::config::ControllerConfig;
use super::events::{ControllerEvent, EventHandler, NoopHandler};
use super::state::{ControllerState, IterationState, ReplyOutcome};
use crate::api::tracing::{UsageTracker, generate_span_id, generate_trace_id};
use crate::error::{ConvertError, SegmentationError, TransportError};
use crate::oracle::{Oracle, OracleCall, RawReply};
use crate::schema::ReplySchema;

// ── Result ─────────────────────────────────────────────────────────

/// A successful conversion.
#[derive(Debug, Clone)]
pub struct ConversionResult {
    /// Stored markdown passages, in the order they were accepted.
    pub passages: Vec<String>,
    /// Accepted iterations, including the finishing one.
    pub iterations: u32,
    /// Resends caused by unparsable replies.
    pub retries: u32,
    /// Token usage summed across every oracle call.
    pub usage: UsageTracker,
    pub trace_id: String,
}

// ── Controller ─────────────────────────────────────────────────────

/// Drives one document through the oracle, window by window.
///
/// ```ignore
/// let oracle = ScriptedOracle::new().reply(finished_json);
/// let result = WindowController::new(&oracle, ControllerConfig::default())
///     .with_event_handler(&LoggingHandler)
///     .run(&segments)
///     .await?;
/// ```
///
/// Like the oracle, the event handler is borrowed and must outlive `run()`.
pub struct WindowController<'a> {
    oracle: &'a dyn Oracle,
    config: ControllerConfig,
    event_handler: &'a dyn EventHandler,
    cancel: CancellationToken,
}

impl<'a> WindowController<'a> {
    pub fn new(oracle: &'a dyn Oracle, config: ControllerConfig) -> Self {
        Self {
            oracle,
            config,
            event_handler: &NoopHandler,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_event_handler(mut self, handler: &'a dyn EventHandler) -> Self {
        self.event_handler = handler;
        self
    }

    /// Abort the run when `token` is cancelled. An in-flight oracle call is
    /// dropped and the run fails with [`ConvertError::Cancelled`].
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Convert `segments` into markdown passages.
    pub async fn run(self, segments: &[String]) -> Result<ConversionResult, ConvertError> {
        let result = self.drive(segments).await;
        if let Err(ref error) = result {
            self.event_handler
                .on_event(&ControllerEvent::Failed { error });
        }
        result
    }

    async fn drive(&self, segments: &[String]) -> Result<ConversionResult, ConvertError> {
        let Some(max_index) = segments.len().checked_sub(1) else {
            return Err(SegmentationError::NoSegments.into());
        };

        // One schema for the whole run: every call carries the same tool.
        let schema = ReplySchema::new();
        let trace_id = generate_trace_id();
        let mut usage = UsageTracker::new();
        let mut retries = 0u32;

        self.event_handler.on_event(&ControllerEvent::Started {
            trace_id: &trace_id,
            segments: segments.len(),
            max_index,
        });

        let mut state = IterationState::new(max_index);
        loop {
            if state.iteration >= self.config.max_iterations {
                return Err(ConvertError::IterationLimit {
                    limit: self.config.max_iterations,
                });
            }

            let iteration = state.iteration;
            let window = state.window;
            let attempt = state.retry_count;
            let request = state.next_request(segments);
            let payload = serde_json::to_value(&request).map_err(|e| ConvertError::Transport {
                iteration,
                window,
                source: TransportError::Other(format!("failed to encode request: {e}")),
            })?;

            let span_id = generate_span_id(&trace_id, iteration, attempt);
            self.event_handler.on_event(&ControllerEvent::RequestSent {
                iteration,
                window,
                retry: request.retry_last_iteration,
                span_id: &span_id,
            });

            let call = OracleCall {
                system_prompt: &self.config.system_prompt,
                payload: &payload,
                reply_tool: schema.tool(),
            };
            let response = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {
                    return Err(ConvertError::Cancelled { iteration });
                }
                response = self.oracle.complete(call) => response,
            };
            let response = response.map_err(|source| ConvertError::Transport {
                iteration,
                window,
                source,
            })?;

            usage.record(response.usage.as_ref());
            if let Some(ref u) = response.usage {
                self.event_handler.on_event(&ControllerEvent::TokenUsage {
                    prompt_tokens: u.prompt_tokens.unwrap_or(0),
                    completion_tokens: u.completion_tokens.unwrap_or(0),
                });
            }

            let raw = single_reply(response.replies, schema.tool().name()).map_err(|source| {
                ConvertError::Transport {
                    iteration,
                    window,
                    source,
                }
            })?;

            let outcome = match schema.parse(&raw) {
                Ok(reply) => ReplyOutcome::Parsed { reply, raw },
                Err(message) => ReplyOutcome::Malformed { raw, message },
            };
            let retry_message = match outcome {
                ReplyOutcome::Malformed { ref message, .. } => Some(message.clone()),
                ReplyOutcome::Parsed { .. } => None,
            };
            let stored_before = state.accumulated.len();

            let next = state.transition(outcome);
            debug!("[{span_id}] -> {}", next.name());
            match next {
                ControllerState::Running(next) => {
                    if next.accumulated.len() > stored_before
                        && let Some(markdown) = next.accumulated.last()
                    {
                        self.event_handler.on_event(&ControllerEvent::PassageStored {
                            iteration,
                            index: stored_before,
                            markdown,
                        });
                    }
                    self.event_handler.on_event(&ControllerEvent::WindowAdvanced {
                        iteration,
                        from: window,
                        to: next.window,
                    });
                    state = next;
                }
                ControllerState::AwaitingRetry(next) => {
                    retries += 1;
                    self.event_handler
                        .on_event(&ControllerEvent::RetryRequested {
                            iteration,
                            window,
                            message: retry_message.as_deref().unwrap_or_default(),
                        });
                    state = next;
                }
                ControllerState::Finished(passages) => {
                    let iterations = iteration + 1;
                    self.event_handler.on_event(&ControllerEvent::Finished {
                        iterations,
                        passages: passages.len(),
                    });
                    return Ok(ConversionResult {
                        passages,
                        iterations,
                        retries,
                        usage,
                        trace_id,
                    });
                }
                ControllerState::Failed(error) => return Err(*error),
            }
        }
    }
}

/// Enforce the one-reply protocol: exactly one call, to the reply function.
fn single_reply(replies: Vec<RawReply>, expected: &str) -> Result<String, TransportError> {
    let [reply]: [RawReply; 1] = replies
        .try_into()
        .map_err(|replies: Vec<RawReply>| TransportError::ReplyCount {
            count: replies.len(),
        })?;
    if reply.function != expected {
        return Err(TransportError::UnexpectedFunction {
            expected: expected.to_string(),
            actual: reply.function,
        });
    }
    Ok(reply.arguments)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::UsageInfo;
    use crate::controller::events::FnEventHandler;
    use crate::controller::state::Window;
    use crate::error::InvariantViolation;
    use crate::oracle::{OracleFuture, OracleResponse, ScriptedOracle};
    use std::sync::Mutex;

    fn segments(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("segment {i}")).collect()
    }

    fn step(store: bool, markdown: &str, start: i64, end: i64) -> String {
        serde_json::json!({
            "finished": false,
            "store": store,
            "markdown": markdown,
            "next_start_index": start,
            "next_end_index": end,
        })
        .to_string()
    }

    fn finish() -> String {
        serde_json::json!({
            "finished": true,
            "store": false,
            "markdown": "",
            "next_start_index": -1,
            "next_end_index": -1,
        })
        .to_string()
    }

    async fn run(oracle: &ScriptedOracle, n: usize) -> Result<ConversionResult, ConvertError> {
        WindowController::new(oracle, ControllerConfig::default())
            .run(&segments(n))
            .await
    }

    #[tokio::test]
    async fn widens_then_stores_then_finishes() {
        let oracle = ScriptedOracle::new()
            .reply(step(false, "", 0, 3))
            .reply(step(true, "## A", 4, 4))
            .reply(finish());

        let result = run(&oracle, 5).await.unwrap();
        assert_eq!(result.passages, vec!["## A".to_string()]);
        assert_eq!(result.iterations, 3);
        assert_eq!(result.retries, 0);

        let calls = oracle.calls();
        assert_eq!(calls.len(), 3);
        assert_eq!(calls[0].payload["start_index"], 0);
        assert_eq!(calls[0].payload["end_index"], 2);
        assert_eq!(calls[0].payload["max_index"], 4);
        assert_eq!(calls[1].payload["end_index"], 3);
        assert_eq!(calls[1].payload["chunks"].as_array().unwrap().len(), 4);
        assert_eq!(calls[2].payload["start_index"], 4);
        assert_eq!(calls[2].payload["iteration"], 2);
    }

    #[tokio::test]
    async fn unparsable_reply_resends_same_window_with_retry_flag() {
        let oracle = ScriptedOracle::new().reply("{not json").reply(finish());

        let result = run(&oracle, 5).await.unwrap();
        assert!(result.passages.is_empty());
        assert_eq!(result.retries, 1);

        let calls = oracle.calls();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].payload["retry_last_iteration"], false);
        assert_eq!(calls[1].payload["retry_last_iteration"], true);
        assert_eq!(calls[0].payload["iteration"], calls[1].payload["iteration"]);
        assert_eq!(calls[0].payload["chunks"], calls[1].payload["chunks"]);
    }

    #[tokio::test]
    async fn two_unparsable_replies_fail_after_two_attempts() {
        let oracle = ScriptedOracle::new()
            .reply("{not json")
            .reply(r#"{"finished": false}"#)
            .reply(finish());

        let err = run(&oracle, 5).await.unwrap_err();
        match err {
            ConvertError::Schema {
                attempts,
                iteration,
                ref raw,
                ..
            } => {
                assert_eq!(attempts, 2);
                assert_eq!(iteration, 0);
                assert_eq!(raw, r#"{"finished": false}"#);
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(oracle.calls().len(), 2);
        assert_eq!(oracle.remaining(), 1);
    }

    #[tokio::test]
    async fn end_beyond_max_index_fails_without_retry() {
        let oracle = ScriptedOracle::new()
            .reply(step(true, "## A", 2, 5))
            .reply(finish());

        let err = run(&oracle, 5).await.unwrap_err();
        assert!(matches!(
            err,
            ConvertError::Invariant {
                violation: InvariantViolation::EndBeyondMax { end: 5, max_index: 4 },
                ..
            }
        ));
        assert_eq!(oracle.calls().len(), 1);
    }

    #[tokio::test]
    async fn passages_keep_acceptance_order() {
        let oracle = ScriptedOracle::new()
            .reply(step(true, "one", 2, 4))
            .reply(step(false, "", 2, 6))
            .reply(step(true, "two", 6, 7))
            .reply(step(true, "three", 7, 7))
            .reply(finish());

        let result = run(&oracle, 8).await.unwrap();
        assert_eq!(result.passages, vec!["one", "two", "three"]);
        assert_eq!(result.iterations, 5);
    }

    #[tokio::test]
    async fn single_segment_document_uses_window_zero() {
        let oracle = ScriptedOracle::new()
            .reply(step(true, "only", 0, 0))
            .reply(finish());

        let result = run(&oracle, 1).await.unwrap();
        assert_eq!(result.passages, vec!["only"]);
        let calls = oracle.calls();
        assert_eq!(calls[0].payload["max_index"], 0);
        assert_eq!(calls[0].payload["end_index"], 0);
    }

    #[tokio::test]
    async fn no_segments_is_rejected_before_any_call() {
        let oracle = ScriptedOracle::new().reply(finish());
        let err = run(&oracle, 0).await.unwrap_err();
        assert!(matches!(
            err,
            ConvertError::Segmentation(SegmentationError::NoSegments)
        ));
        assert!(oracle.calls().is_empty());
    }

    #[tokio::test]
    async fn every_call_carries_identical_reply_tool() {
        let oracle = ScriptedOracle::new()
            .reply(step(false, "", 0, 3))
            .reply("broken")
            .reply(finish());

        run(&oracle, 5).await.unwrap();
        let calls = oracle.calls();
        assert_eq!(calls.len(), 3);
        assert_eq!(calls[0].reply_tool.name(), "output");
        assert!(calls.iter().all(|c| c.reply_tool == calls[0].reply_tool));
        assert!(calls.iter().all(|c| c.system_prompt == calls[0].system_prompt));
    }

    #[tokio::test]
    async fn zero_or_many_replies_are_protocol_errors() {
        let oracle = ScriptedOracle::new().respond(OracleResponse::default());
        let err = run(&oracle, 3).await.unwrap_err();
        assert!(matches!(
            err,
            ConvertError::Transport {
                source: TransportError::ReplyCount { count: 0 },
                ..
            }
        ));

        let oracle = ScriptedOracle::new().respond(OracleResponse {
            replies: vec![RawReply::output(finish()), RawReply::output(finish())],
            usage: None,
        });
        let err = run(&oracle, 3).await.unwrap_err();
        assert!(matches!(
            err,
            ConvertError::Transport {
                source: TransportError::ReplyCount { count: 2 },
                ..
            }
        ));
    }

    #[tokio::test]
    async fn wrong_function_name_is_a_protocol_error() {
        let oracle = ScriptedOracle::new().respond(OracleResponse {
            replies: vec![RawReply {
                function: "answer".into(),
                arguments: finish(),
            }],
            usage: None,
        });
        let err = run(&oracle, 3).await.unwrap_err();
        assert_eq!(err.stage(), "transport");
        assert!(err.to_string().contains("answer"));
    }

    #[tokio::test]
    async fn transport_failure_is_not_retried() {
        let oracle = ScriptedOracle::new()
            .fail(TransportError::Status {
                status: 500,
                body: "boom".into(),
            })
            .reply(finish());

        let err = run(&oracle, 3).await.unwrap_err();
        match err {
            ConvertError::Transport {
                iteration, window, ..
            } => {
                assert_eq!(iteration, 0);
                assert_eq!(window, Window { start: 0, end: 2 });
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(oracle.calls().len(), 1);
    }

    #[tokio::test]
    async fn iteration_limit_stops_a_looping_oracle() {
        let mut oracle = ScriptedOracle::new();
        for _ in 0..5 {
            oracle = oracle.reply(step(false, "", 0, 2));
        }
        let err = WindowController::new(&oracle, ControllerConfig::default().with_max_iterations(3))
            .run(&segments(5))
            .await
            .unwrap_err();
        assert!(matches!(err, ConvertError::IterationLimit { limit: 3 }));
        assert_eq!(oracle.calls().len(), 3);
    }

    #[tokio::test]
    async fn cancelled_token_aborts_before_calling() {
        let oracle = ScriptedOracle::new().reply(finish());
        let token = CancellationToken::new();
        token.cancel();

        let err = WindowController::new(&oracle, ControllerConfig::default())
            .with_cancellation(token)
            .run(&segments(3))
            .await
            .unwrap_err();
        assert!(matches!(err, ConvertError::Cancelled { iteration: 0 }));
    }

    /// Oracle whose calls never complete.
    struct StalledOracle;

    impl Oracle for StalledOracle {
        fn complete<'a>(&'a self, _call: OracleCall<'a>) -> OracleFuture<'a> {
            Box::pin(std::future::pending())
        }
    }

    #[tokio::test]
    async fn cancellation_interrupts_call_in_flight() {
        let token = CancellationToken::new();
        let trigger = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
            trigger.cancel();
        });

        let err = WindowController::new(&StalledOracle, ControllerConfig::default())
            .with_cancellation(token)
            .run(&segments(3))
            .await
            .unwrap_err();
        assert!(matches!(err, ConvertError::Cancelled { iteration: 0 }));
    }

    #[tokio::test]
    async fn usage_is_summed_across_calls() {
        let usage = || UsageInfo {
            prompt_tokens: Some(100),
            completion_tokens: Some(20),
            total_tokens: Some(120),
        };
        let oracle = ScriptedOracle::new()
            .respond(OracleResponse {
                replies: vec![RawReply::output(step(true, "x", 2, 2))],
                usage: Some(usage()),
            })
            .respond(OracleResponse {
                replies: vec![RawReply::output(finish())],
                usage: Some(usage()),
            });

        let result = run(&oracle, 3).await.unwrap();
        assert_eq!(result.usage.calls, 2);
        assert_eq!(result.usage.prompt_tokens, 200);
        assert_eq!(result.usage.total_tokens(), 240);
        assert!(result.trace_id.starts_with("cm-"));
    }

    #[tokio::test]
    async fn events_follow_the_run() {
        let seen = Mutex::new(Vec::new());
        let handler = FnEventHandler::new(|event| {
            let name = match event {
                ControllerEvent::Started { .. } => "started",
                ControllerEvent::RequestSent { .. } => "request",
                ControllerEvent::TokenUsage { .. } => "usage",
                ControllerEvent::RetryRequested { .. } => "retry",
                ControllerEvent::PassageStored { .. } => "stored",
                ControllerEvent::WindowAdvanced { .. } => "advanced",
                ControllerEvent::Finished { .. } => "finished",
                ControllerEvent::Failed { .. } => "failed",
            };
            seen.lock().unwrap().push(name);
        });
        let oracle = ScriptedOracle::new()
            .reply("oops")
            .reply(step(true, "# A", 2, 2))
            .reply(finish());

        WindowController::new(&oracle, ControllerConfig::default())
            .with_event_handler(&handler)
            .run(&segments(3))
            .await
            .unwrap();

        assert_eq!(
            *seen.lock().unwrap(),
            vec![
                "started", "request", "retry", "request", "stored", "advanced", "request",
                "finished"
            ]
        );
    }

    #[tokio::test]
    async fn failure_is_reported_to_handler() {
        let failed = Mutex::new(None);
        let handler = FnEventHandler::new(|event| {
            if let ControllerEvent::Failed { error } = event {
                *failed.lock().unwrap() = Some(error.stage());
            }
        });
        let oracle = ScriptedOracle::new().reply(step(false, "", 2, 1));

        let _ = WindowController::new(&oracle, ControllerConfig::default())
            .with_event_handler(&handler)
            .run(&segments(3))
            .await;
        assert_eq!(*failed.lock().unwrap(), Some("invariant"));
    }

    #[test]
    fn single_reply_accepts_exactly_one_output_call() {
        assert_eq!(
            single_reply(vec![RawReply::output("{}")], "output").unwrap(),
            "{}"
        );
    }
}
