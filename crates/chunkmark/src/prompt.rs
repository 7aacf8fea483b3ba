//! System instructions for the window protocol.

/// Sent as the system message on every request. Describes the request
/// payload; the reply contract travels separately as the `output` function
/// schema.
pub const SYSTEM_PROMPT: &str = r#"You are converting a long plain-text document into markdown, a few chunks at a time.

Each user message is a JSON object with these properties:
{
    "iteration": {
        "type": "integer",
        "description": "Counter of the external loop."
    },
    "retry_last_iteration": {
        "type": "boolean",
        "description": "False by default. True means your previous function call for this same window could not be parsed. Make sure the arguments are valid JSON this time, and that the markdown text is escaped properly inside its JSON string."
    },
    "max_index": {
        "type": "integer",
        "description": "Highest chunk index. next_end_index may never be larger than this."
    },
    "start_index": {
        "type": "integer",
        "description": "Index of the first chunk in chunks."
    },
    "end_index": {
        "type": "integer",
        "description": "Index of the last chunk in chunks."
    },
    "chunks": {
        "type": "array",
        "items": { "type": "string" },
        "description": "Document chunks in order, from start_index to end_index. Neighbouring chunks overlap slightly."
    }
}

Convert the chunks into markdown. Each stored markdown text must be a self-contained, contextual part of the document. If the chunks you have are not enough for that, set store to false, keep the same next_start_index and ask for a larger next_end_index.

Drop page headers, page footers and other text that adds nothing to the content.

Answer only by calling the function output. Aim for windows of about 3 chunks between next_start_index and next_end_index, and never more than 6. When the whole document up to max_index has been stored, set finished to true."#;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prompt_describes_every_request_field() {
        for field in [
            "iteration",
            "retry_last_iteration",
            "max_index",
            "start_index",
            "end_index",
            "chunks",
        ] {
            assert!(SYSTEM_PROMPT.contains(field), "prompt must mention {field}");
        }
    }
}
