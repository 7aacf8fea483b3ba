//! Convert large plain-text documents into markdown passages with an LLM.
//!
//! `chunkmark` splits a document into small overlapping segments and then
//! drives a sliding-window loop against an OpenAI-compatible chat completions
//! endpoint. Each round the model receives a window of segments and answers
//! with a single forced function call (`output`) that says whether to store a
//! markdown passage, which window to look at next, and whether the document is
//! done. The [`WindowController`](controller::WindowController) validates every
//! reply before acting on it, so a misbehaving model can never corrupt the
//! output order or keep the loop spinning.
//!
//! # Getting started
//!
//! ```ignore
//! use chunkmark::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), ConvertError> {
//!     let credentials = Credentials::new(
//!         std::env::var("CHUNKMARK_API_KEY").unwrap_or_default(),
//!         "https://my-resource.openai.azure.com/",
//!     )?;
//!     let config = ConvertConfig::default();
//!
//!     let client = ChatClient::new(&credentials, Provider::Azure, &config.api_version)?;
//!     let oracle = config.build_oracle(client);
//!     let segmenter = config.build_segmenter()?;
//!
//!     let controller = WindowController::new(&oracle, config.build_controller_config())
//!         .with_event_handler(&LoggingHandler);
//!
//!     let document = load_document("rfc8193.txt")?;
//!     let result = convert_document(&document, &segmenter, controller).await?;
//!     for passage in &result.passages {
//!         println!("{passage}");
//!     }
//!     Ok(())
//! }
//! ```
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`segment`] | [`Segmenter`](segment::Segmenter) trait and the token-estimating overlap splitter |
//! | [`schema`] | Request/reply wire types and the reply function schema |
//! | [`oracle`] | [`Oracle`](oracle::Oracle) capability, the chat-backed adapter, and a scripted fake |
//! | [`controller`] | Window state machine, events, and the async control loop |
//! | [`api`] | Transport retry with backoff, trace IDs, token accounting |
//! | [`config`] | Credentials, provider selection, and conversion defaults |
//! | [`convert`] | One-call document conversion used by the CLI |

pub mod api;
pub mod config;
pub mod controller;
pub mod convert;
pub mod error;
pub mod oracle;
pub mod prelude;
pub mod prompt;
pub mod schema;
pub mod segment;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tracing::{debug, trace};

use crate::api::retry::{RetryConfig, retry_call};
use crate::config::{Credentials, Provider};
use crate::error::{ConfigError, TransportError};

// Re-export schemars for downstream crates.
pub use schemars;

// ── Constants ──────────────────────────────────────────────────────

/// Default chat model (for Azure, the deployment name).
pub const DEFAULT_MODEL: &str = "gpt-4";

/// Default Azure OpenAI API version. Function calling needs 2023-07-01 or later.
pub const DEFAULT_API_VERSION: &str = "2023-07-01-preview";

/// Request timeout for a single chat completion.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(120);

// ── Schema generation ──────────────────────────────────────────────

/// Generate a JSON Schema `serde_json::Value` from a type that implements
/// `schemars::JsonSchema`. This is the bridge between strong Rust types
/// and the `serde_json::Value` that the function-calling API expects.
///
/// # Example
///
/// ```
/// use chunkmark::json_schema_for;
/// use schemars::JsonSchema;
/// use serde::Deserialize;
///
/// #[derive(Deserialize, JsonSchema)]
/// struct Span {
///     start: i64,
///     #[serde(default)]
///     label: Option<String>,
/// }
///
/// let schema = json_schema_for::<Span>();
/// assert_eq!(schema["type"], "object");
/// assert!(schema["required"].as_array().unwrap().contains(&"start".into()));
/// ```
pub fn json_schema_for<T: JsonSchema>() -> serde_json::Value {
    let schema = schemars::schema_for!(T);
    serde_json::to_value(schema)
        .unwrap_or_else(|_| serde_json::json!({"type": "object", "properties": {}}))
}

// ── Request types ──────────────────────────────────────────────────

/// Chat completion request body. Unused optional fields are omitted from
/// serialization.
#[derive(Serialize, Debug, Default, Clone)]
pub struct ChatRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,

    pub messages: Vec<Message>,

    #[serde(skip_serializing_if = "is_zero_u32")]
    pub max_tokens: u32,
    #[serde(skip_serializing_if = "is_zero_f32")]
    pub temperature: f32,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<ToolDef>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_choice: Option<ToolChoice>,
}

fn is_zero_u32(v: &u32) -> bool {
    *v == 0
}
fn is_zero_f32(v: &f32) -> bool {
    *v == 0.0
}

// ── Message types ──────────────────────────────────────────────────

/// Role of a request message. Only system and user turns are ever sent.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    System,
    User,
}

/// A message in the conversation.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct Message {
    pub role: MessageRole,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::System,
            content: Some(content.into()),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::User,
            content: Some(content.into()),
        }
    }
}

// ── Tool types ─────────────────────────────────────────────────────

/// The type of a tool definition. Currently always `Function`.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub enum ToolType {
    #[serde(rename = "function")]
    Function,
}

/// Tool definition sent to the API (OpenAI function-calling format).
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct ToolDef {
    #[serde(rename = "type")]
    pub tool_type: ToolType,
    pub function: FunctionDef,
}

impl ToolDef {
    /// Create a function-calling tool definition.
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        parameters: serde_json::Value,
    ) -> Self {
        Self {
            tool_type: ToolType::Function,
            function: FunctionDef {
                name: name.into(),
                description: description.into(),
                parameters,
            },
        }
    }

    /// The function name declared by this tool.
    pub fn name(&self) -> &str {
        &self.function.name
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct FunctionDef {
    pub name: String,
    pub description: String,
    pub parameters: serde_json::Value,
}

/// Forces the model to answer through one specific function.
#[derive(Serialize, Clone, Debug)]
pub struct ToolChoice {
    #[serde(rename = "type")]
    pub choice_type: ToolType,
    pub function: ToolChoiceFunction,
}

#[derive(Serialize, Clone, Debug)]
pub struct ToolChoiceFunction {
    pub name: String,
}

impl ToolChoice {
    pub fn function(name: impl Into<String>) -> Self {
        Self {
            choice_type: ToolType::Function,
            function: ToolChoiceFunction { name: name.into() },
        }
    }
}

/// A tool call returned by the model.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct ToolCall {
    #[serde(default)]
    pub id: String,
    pub function: FunctionCallData,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct FunctionCallData {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub arguments: String,
}

// ── Response types ─────────────────────────────────────────────────

/// Raw API response (internal deserialization target).
#[derive(Deserialize, Debug)]
struct RawChatResponse {
    choices: Option<Vec<RawChoice>>,
    error: Option<ApiErrorResponse>,
    #[serde(default)]
    usage: Option<UsageInfo>,
}

#[derive(Deserialize, Debug)]
struct RawChoice {
    message: RawResponseMessage,
    finish_reason: Option<String>,
}

#[derive(Deserialize, Debug)]
struct RawResponseMessage {
    content: Option<String>,
    tool_calls: Option<Vec<ToolCall>>,
    /// Legacy `functions` API (older Azure API versions).
    function_call: Option<FunctionCallData>,
}

#[derive(Deserialize, Debug)]
struct ApiErrorResponse {
    message: String,
}

/// One choice of a chat completion.
#[derive(Debug, Clone)]
pub struct Choice {
    pub content: Option<String>,
    /// Function calls in this choice. Legacy `function_call` replies are
    /// folded in here as a single call with an empty ID.
    pub tool_calls: Vec<ToolCall>,
    pub finish_reason: Option<String>,
}

/// Clean return type from [`ChatClient::chat()`].
#[derive(Debug, Clone)]
pub struct ChatCompletion {
    pub choices: Vec<Choice>,
    pub usage: Option<UsageInfo>,
}

/// Token usage statistics.
#[derive(Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct UsageInfo {
    pub prompt_tokens: Option<u32>,
    pub completion_tokens: Option<u32>,
    pub total_tokens: Option<u32>,
}

// ── Client ─────────────────────────────────────────────────────────

/// Async HTTP client for an OpenAI-compatible chat completions API.
///
/// Azure endpoints are addressed per deployment
/// (`{endpoint}/openai/deployments/{model}/chat/completions?api-version=...`)
/// and authenticate with an `api-key` header. OpenAI-style endpoints append
/// `/chat/completions` to the base URL and use a bearer token.
pub struct ChatClient {
    pub(crate) client: reqwest::Client,
    pub(crate) endpoint: String,
    pub(crate) api_key: String,
    pub(crate) provider: Provider,
    pub(crate) api_version: String,
    pub(crate) retry: RetryConfig,
}

impl ChatClient {
    /// Create a new client for the given credentials and provider style.
    pub fn new(
        credentials: &Credentials,
        provider: Provider,
        api_version: impl Into<String>,
    ) -> Result<Self, ConfigError> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("chunkmark/", env!("CARGO_PKG_VERSION")))
            .timeout(DEFAULT_TIMEOUT)
            .build()
            .map_err(|e| ConfigError::HttpClient(e.to_string()))?;
        Ok(Self {
            client,
            endpoint: credentials.endpoint().trim_end_matches('/').to_string(),
            api_key: credentials.api_key().to_string(),
            provider,
            api_version: api_version.into(),
            retry: RetryConfig::default(),
        })
    }

    /// Retry transient HTTP failures with backoff. Default: no retries.
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// The URL a request for `model` is posted to.
    pub fn completions_url(&self, model: &str) -> String {
        match self.provider {
            Provider::Azure => format!(
                "{}/openai/deployments/{}/chat/completions?api-version={}",
                self.endpoint,
                azure_deployment_name(model),
                self.api_version
            ),
            Provider::OpenAi => format!("{}/chat/completions", self.endpoint),
        }
    }

    /// Send a chat completion request, retrying transient failures according
    /// to the client's [`RetryConfig`].
    pub async fn chat(&self, body: &ChatRequest) -> Result<ChatCompletion, TransportError> {
        retry_call(&self.retry, || self.chat_once(body)).await
    }

    async fn chat_once(&self, body: &ChatRequest) -> Result<ChatCompletion, TransportError> {
        let model = body.model.as_deref().unwrap_or(DEFAULT_MODEL);
        let tool_count = body.tools.as_ref().map_or(0, |t| t.len());
        debug!(
            "LLM request: model={}, messages={}, tools={}, max_tokens={}, temp={}",
            model,
            body.messages.len(),
            tool_count,
            body.max_tokens,
            body.temperature,
        );
        trace!(
            "Request payload size: {} bytes",
            serde_json::to_string(body).map_or(0, |s| s.len())
        );

        let start = Instant::now();

        let request = self.client.post(self.completions_url(model)).json(body);
        let request = match self.provider {
            Provider::Azure => request.header("api-key", &self.api_key),
            Provider::OpenAi => request.bearer_auth(&self.api_key),
        };
        let resp = request.send().await.map_err(TransportError::Request)?;

        let status = resp.status();
        let text = resp.text().await.map_err(TransportError::Request)?;

        debug!(
            "LLM response: HTTP {} in {:.1}s ({} bytes)",
            status,
            start.elapsed().as_secs_f64(),
            text.len()
        );

        if !status.is_success() {
            return Err(TransportError::Status {
                status: status.as_u16(),
                body: text,
            });
        }

        parse_chat_response(&text)
    }
}

/// Azure deployment names cannot contain dots (`gpt-3.5-turbo` is deployed
/// as `gpt-35-turbo`).
fn azure_deployment_name(model: &str) -> String {
    model.replace('.', "")
}

/// Decode a chat completions response body.
pub(crate) fn parse_chat_response(text: &str) -> Result<ChatCompletion, TransportError> {
    let parsed: RawChatResponse =
        serde_json::from_str(text).map_err(|e| TransportError::Decode(e.to_string()))?;

    if let Some(err) = parsed.error {
        return Err(TransportError::Api(err.message));
    }

    if let Some(ref usage) = parsed.usage {
        debug!(
            "Token usage: prompt={}, completion={}, total={}",
            usage.prompt_tokens.unwrap_or(0),
            usage.completion_tokens.unwrap_or(0),
            usage.total_tokens.unwrap_or(0),
        );
    }

    let choices: Vec<Choice> = parsed
        .choices
        .unwrap_or_default()
        .into_iter()
        .map(|c| {
            let mut tool_calls = c.message.tool_calls.unwrap_or_default();
            if let Some(call) = c.message.function_call {
                tool_calls.push(ToolCall {
                    id: String::new(),
                    function: call,
                });
            }
            Choice {
                content: c.message.content,
                tool_calls,
                finish_reason: c.finish_reason,
            }
        })
        .collect();

    debug!(
        "LLM output: {} choice(s), {} function call(s)",
        choices.len(),
        choices.iter().map(|c| c.tool_calls.len()).sum::<usize>()
    );

    Ok(ChatCompletion {
        choices,
        usage: parsed.usage,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn credentials(endpoint: &str) -> Credentials {
        Credentials::new("secret", endpoint).unwrap()
    }

    #[test]
    fn message_constructors() {
        let sys = Message::system("hello");
        assert_eq!(sys.role, MessageRole::System);
        assert_eq!(sys.content.as_deref(), Some("hello"));

        let user = Message::user("world");
        assert_eq!(user.role, MessageRole::User);
    }

    #[test]
    fn chat_request_default_skips_none_fields() {
        let req = ChatRequest {
            model: Some("gpt-4".into()),
            messages: vec![Message::user("hi")],
            ..Default::default()
        };
        let json = serde_json::to_value(&req).unwrap();
        assert!(json.get("tools").is_none());
        assert!(json.get("tool_choice").is_none());
        assert!(json.get("max_tokens").is_none());
        assert!(json.get("temperature").is_none());
    }

    #[test]
    fn tool_choice_serializes_forced_function() {
        let choice = ToolChoice::function("output");
        let json = serde_json::to_value(&choice).unwrap();
        assert_eq!(json["type"], "function");
        assert_eq!(json["function"]["name"], "output");
    }

    #[test]
    fn azure_url_uses_deployment_and_version() {
        let client = ChatClient::new(
            &credentials("https://res.openai.azure.com/"),
            Provider::Azure,
            DEFAULT_API_VERSION,
        )
        .unwrap();
        assert_eq!(
            client.completions_url("gpt-3.5-turbo"),
            "https://res.openai.azure.com/openai/deployments/gpt-35-turbo/chat/completions?api-version=2023-07-01-preview"
        );
    }

    #[test]
    fn openai_url_appends_path() {
        let client = ChatClient::new(
            &credentials("https://api.openai.com/v1"),
            Provider::OpenAi,
            DEFAULT_API_VERSION,
        )
        .unwrap();
        assert_eq!(
            client.completions_url("gpt-4"),
            "https://api.openai.com/v1/chat/completions"
        );
    }

    #[test]
    fn parse_response_collects_tool_calls_and_usage() {
        let body = r#"{
            "choices": [{
                "message": {
                    "content": null,
                    "tool_calls": [{
                        "id": "call_1",
                        "type": "function",
                        "function": {"name": "output", "arguments": "{\"finished\":true}"}
                    }]
                },
                "finish_reason": "tool_calls"
            }],
            "usage": {"prompt_tokens": 10, "completion_tokens": 5, "total_tokens": 15}
        }"#;
        let completion = parse_chat_response(body).unwrap();
        assert_eq!(completion.choices.len(), 1);
        assert_eq!(completion.choices[0].tool_calls[0].function.name, "output");
        assert_eq!(completion.usage.unwrap().total_tokens, Some(15));
    }

    #[test]
    fn parse_response_folds_legacy_function_call() {
        let body = r#"{
            "choices": [{
                "message": {"function_call": {"name": "output", "arguments": "{}"}},
                "finish_reason": "function_call"
            }]
        }"#;
        let completion = parse_chat_response(body).unwrap();
        assert_eq!(completion.choices[0].tool_calls.len(), 1);
        assert_eq!(completion.choices[0].tool_calls[0].id, "");
    }

    #[test]
    fn parse_response_surfaces_api_error() {
        let err = parse_chat_response(r#"{"error": {"message": "quota exceeded"}}"#).unwrap_err();
        assert!(matches!(err, TransportError::Api(ref m) if m == "quota exceeded"));
    }

    #[test]
    fn parse_response_rejects_garbage() {
        let err = parse_chat_response("<html>").unwrap_err();
        assert!(matches!(err, TransportError::Decode(_)));
    }
}
