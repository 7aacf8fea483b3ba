//! The oracle capability: send one window request, get back raw replies.
//!
//! The controller only depends on the [`Oracle`] trait. [`ChatOracle`] backs
//! it with a chat completions endpoint and a forced `output` function call;
//! [`ScriptedOracle`] replays canned replies for tests and offline runs.
//!
//! An oracle returns *every* function call the model produced. Enforcing the
//! one-reply protocol is the controller's job, so a misbehaving endpoint is
//! reported the same way whatever backs the trait.

use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Mutex, PoisonError};

use crate::error::TransportError;
use crate::schema::REPLY_FUNCTION;
use crate::{ChatClient, ChatCompletion, ChatRequest, Message, ToolChoice, ToolDef, UsageInfo};

/// The future returned by [`Oracle::complete`].
pub type OracleFuture<'a> =
    Pin<Box<dyn Future<Output = Result<OracleResponse, TransportError>> + Send + 'a>>;

/// One request to the oracle.
#[derive(Debug, Clone, Copy)]
pub struct OracleCall<'a> {
    /// System instructions describing the request payload.
    pub system_prompt: &'a str,
    /// The serialized [`WindowRequest`](crate::schema::WindowRequest).
    pub payload: &'a serde_json::Value,
    /// The function the oracle must answer with.
    pub reply_tool: &'a ToolDef,
}

/// A function call produced by the oracle, arguments still unparsed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawReply {
    pub function: String,
    pub arguments: String,
}

impl RawReply {
    /// A reply calling the `output` function.
    pub fn output(arguments: impl Into<String>) -> Self {
        Self {
            function: REPLY_FUNCTION.to_string(),
            arguments: arguments.into(),
        }
    }
}

/// Everything the oracle returned for one call.
#[derive(Debug, Clone, Default)]
pub struct OracleResponse {
    pub replies: Vec<RawReply>,
    pub usage: Option<UsageInfo>,
}

/// Something that answers window requests.
///
/// Implementations return boxed futures so the trait stays object-safe:
///
/// ```ignore
/// impl Oracle for MyOracle {
///     fn complete<'a>(&'a self, call: OracleCall<'a>) -> OracleFuture<'a> {
///         Box::pin(async move {
///             let arguments = self.answer(call.payload).await?;
///             Ok(OracleResponse {
///                 replies: vec![RawReply::output(arguments)],
///                 usage: None,
///             })
///         })
///     }
/// }
/// ```
pub trait Oracle: Send + Sync {
    fn complete<'a>(&'a self, call: OracleCall<'a>) -> OracleFuture<'a>;
}

// ── Chat-backed oracle ─────────────────────────────────────────────

/// Oracle backed by a [`ChatClient`]. Every request is a two-message
/// conversation (system prompt, JSON payload) with the reply function as the
/// only tool and `tool_choice` forcing a call to it.
pub struct ChatOracle {
    client: ChatClient,
    model: String,
    max_tokens: u32,
    temperature: f32,
}

impl ChatOracle {
    pub fn new(client: ChatClient, model: impl Into<String>) -> Self {
        Self {
            client,
            model: model.into(),
            max_tokens: 0,
            temperature: 0.0,
        }
    }

    /// Cap on completion tokens. `0` leaves it to the endpoint.
    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    fn request_for(&self, call: &OracleCall<'_>) -> ChatRequest {
        ChatRequest {
            model: Some(self.model.clone()),
            messages: vec![
                Message::system(call.system_prompt),
                Message::user(call.payload.to_string()),
            ],
            max_tokens: self.max_tokens,
            temperature: self.temperature,
            tools: Some(vec![call.reply_tool.clone()]),
            tool_choice: Some(ToolChoice::function(call.reply_tool.name())),
        }
    }
}

/// Flatten the function calls of every choice, in order.
fn response_from(completion: ChatCompletion) -> OracleResponse {
    let replies = completion
        .choices
        .into_iter()
        .flat_map(|choice| choice.tool_calls)
        .map(|call| RawReply {
            function: call.function.name,
            arguments: call.function.arguments,
        })
        .collect();
    OracleResponse {
        replies,
        usage: completion.usage,
    }
}

impl Oracle for ChatOracle {
    fn complete<'a>(&'a self, call: OracleCall<'a>) -> OracleFuture<'a> {
        Box::pin(async move {
            let request = self.request_for(&call);
            let completion = self.client.chat(&request).await?;
            Ok(response_from(completion))
        })
    }
}

// ── Scripted oracle ────────────────────────────────────────────────

/// A request as seen by a [`ScriptedOracle`].
#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub system_prompt: String,
    pub payload: serde_json::Value,
    pub reply_tool: ToolDef,
}

/// Oracle that replays a fixed script and records every request.
///
/// Once the script runs out every further call fails with a transport error.
///
/// ```ignore
/// let oracle = ScriptedOracle::new()
///     .reply(r#"{"finished":false,"store":true,"markdown":"# A","next_start_index":2,"next_end_index":3}"#)
///     .reply(r#"{"finished":true,"store":false,"markdown":"","next_start_index":-1,"next_end_index":-1}"#);
/// ```
#[derive(Debug, Default)]
pub struct ScriptedOracle {
    script: Mutex<VecDeque<Result<OracleResponse, TransportError>>>,
    calls: Mutex<Vec<RecordedCall>>,
}

impl ScriptedOracle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a single `output` call with these arguments.
    pub fn reply(self, arguments: impl Into<String>) -> Self {
        self.respond(OracleResponse {
            replies: vec![RawReply::output(arguments)],
            usage: None,
        })
    }

    /// Queue an arbitrary response.
    pub fn respond(self, response: OracleResponse) -> Self {
        self.push(Ok(response))
    }

    /// Queue a transport failure.
    pub fn fail(self, error: TransportError) -> Self {
        self.push(Err(error))
    }

    fn push(self, entry: Result<OracleResponse, TransportError>) -> Self {
        self.script
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(entry);
        self
    }

    /// Every request received so far, in order.
    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Script entries not yet consumed.
    pub fn remaining(&self) -> usize {
        self.script
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

impl Oracle for ScriptedOracle {
    fn complete<'a>(&'a self, call: OracleCall<'a>) -> OracleFuture<'a> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(RecordedCall {
                system_prompt: call.system_prompt.to_string(),
                payload: call.payload.clone(),
                reply_tool: call.reply_tool.clone(),
            });
        let next = self
            .script
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front()
            .unwrap_or_else(|| Err(TransportError::Other("oracle script exhausted".into())));
        Box::pin(async move { next })
    }
}
