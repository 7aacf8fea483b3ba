//! Wire types of the window protocol and the reply function schema.
//!
//! Every oracle call carries a [`WindowRequest`] as the user message and the
//! `output` function definition generated from [`WindowReply`]. The model
//! must answer by calling that function; its arguments are checked against
//! the same JSON Schema before they are deserialized.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::{ToolDef, json_schema_for};

/// Name of the function the model must call.
pub const REPLY_FUNCTION: &str = "output";

const REPLY_FUNCTION_DESCRIPTION: &str = "Drives the external loop that feeds document chunks \
     to the AI. Every answer must be a call to this function.";

/// Payload sent to the oracle for one window.
#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct WindowRequest<'a> {
    /// Iteration counter of the external loop.
    pub iteration: u32,
    /// Set when the previous reply for this same window could not be parsed.
    pub retry_last_iteration: bool,
    /// Highest valid chunk index.
    pub max_index: usize,
    /// Index of the first chunk in `chunks`.
    pub start_index: usize,
    /// Index of the last chunk in `chunks`.
    pub end_index: usize,
    /// Chunk texts from `start_index` to `end_index`, in order.
    pub chunks: &'a [String],
}

/// The oracle's answer for one window. All fields are required.
#[derive(Deserialize, Serialize, JsonSchema, Debug, Clone, PartialEq, Eq)]
pub struct WindowReply {
    /// False by default. Set to true to exit the external loop; every stored
    /// markdown chunk is then returned.
    pub finished: bool,
    /// True by default. Set to false when the chunks received so far are not
    /// enough to produce a contextual markdown text; `markdown` is then
    /// ignored and you should request the same next_start_index with a
    /// larger next_end_index.
    pub store: bool,
    /// The markdown text to store. Leave empty when `store` is false. Must
    /// be valid inside a JSON string.
    pub markdown: String,
    /// The start_index to send next time. Must be smaller than or equal to
    /// next_end_index. Set to -1 when `finished` is true.
    pub next_start_index: i64,
    /// The end_index to send next time. Must be larger than or equal to
    /// next_start_index and never larger than max_index. Set to -1 when
    /// `finished` is true.
    pub next_end_index: i64,
}

/// The reply contract: the tool definition sent on every call and a
/// validator compiled from the same schema.
pub struct ReplySchema {
    tool: ToolDef,
    validator: Option<jsonschema::Validator>,
}

impl ReplySchema {
    pub fn new() -> Self {
        Self::with_parameters(json_schema_for::<WindowReply>())
    }

    /// Without a compiled validator, typed deserialization alone guards the
    /// reply.
    fn with_parameters(parameters: serde_json::Value) -> Self {
        let validator = match jsonschema::validator_for(&parameters) {
            Ok(v) => Some(v),
            Err(e) => {
                warn!("Reply schema does not compile, validating by type only: {e}");
                None
            }
        };
        Self {
            tool: ToolDef::new(REPLY_FUNCTION, REPLY_FUNCTION_DESCRIPTION, parameters),
            validator,
        }
    }

    /// The `output` function definition.
    pub fn tool(&self) -> &ToolDef {
        &self.tool
    }

    /// Parse raw function-call arguments into a [`WindowReply`].
    ///
    /// The error string names every failing field so it can be logged and
    /// carried in the final error.
    pub fn parse(&self, raw: &str) -> Result<WindowReply, String> {
        let value: serde_json::Value =
            serde_json::from_str(raw).map_err(|e| format!("invalid JSON: {e}"))?;

        if let Some(ref validator) = self.validator {
            let errors: Vec<String> = validator
                .iter_errors(&value)
                .map(|e| format!("{}: {e}", e.instance_path()))
                .collect();
            if !errors.is_empty() {
                return Err(format!("schema validation failed: {}", errors.join("; ")));
            }
        }

        serde_json::from_value(value).map_err(|e| format!("invalid reply: {e}"))
    }
}

impl Default for ReplySchema {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ReplySchema {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReplySchema")
            .field("tool", &self.tool.function.name)
            .field("validating", &self.validator.is_some())
            .finish()
    }
}
