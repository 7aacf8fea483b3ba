//! Credentials, provider selection, and conversion defaults.
//!
//! [`ConvertConfig`] captures every knob a conversion needs and turns it
//! into the pieces the pipeline runs with:
//! [`build_segmenter`](ConvertConfig::build_segmenter),
//! [`build_oracle`](ConvertConfig::build_oracle) and
//! [`build_controller_config`](ConvertConfig::build_controller_config).
//!
//! ```ignore
//! let config = ConvertConfig::default()
//!     .with_model("gpt-4o")
//!     .with_chunk_size(400)
//!     .with_transport_retries(2);
//! ```

use crate::api::retry::RetryConfig;
use crate::controller::config::ControllerConfig;
use crate::error::ConfigError;
use crate::oracle::ChatOracle;
use crate::segment::TokenSegmenter;
use crate::{ChatClient, DEFAULT_API_VERSION, DEFAULT_MODEL};

/// Which flavour of chat completions endpoint the credentials point at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Provider {
    /// Azure OpenAI resource: per-deployment URLs and an `api-key` header.
    #[default]
    Azure,
    /// OpenAI-compatible base URL with bearer authentication.
    OpenAi,
}

/// Validated API key and endpoint URL.
#[derive(Clone)]
pub struct Credentials {
    api_key: String,
    endpoint: String,
}

impl Credentials {
    /// Validate and wrap the credentials. Both values must be non-blank and
    /// the endpoint must be an absolute http(s) URL.
    pub fn new(
        api_key: impl Into<String>,
        endpoint: impl Into<String>,
    ) -> Result<Self, ConfigError> {
        let api_key = api_key.into().trim().to_string();
        let endpoint = endpoint.into().trim().to_string();

        if api_key.is_empty() {
            return Err(ConfigError::MissingCredential("api key"));
        }
        if endpoint.is_empty() {
            return Err(ConfigError::MissingCredential("endpoint"));
        }

        let url = reqwest::Url::parse(&endpoint).map_err(|e| ConfigError::InvalidEndpoint {
            endpoint: endpoint.clone(),
            reason: e.to_string(),
        })?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(ConfigError::InvalidEndpoint {
                endpoint,
                reason: format!("unsupported scheme '{}'", url.scheme()),
            });
        }

        Ok(Self { api_key, endpoint })
    }

    pub fn api_key(&self) -> &str {
        &self.api_key
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("api_key", &"<redacted>")
            .field("endpoint", &self.endpoint)
            .finish()
    }
}

/// Settings for one document conversion.
#[derive(Debug, Clone)]
pub struct ConvertConfig {
    /// Model identifier (Azure: deployment name). Default: `"gpt-4"`.
    pub model: String,
    /// Azure API version. Default: `"2023-07-01-preview"`.
    pub api_version: String,
    /// Target segment size in estimated tokens. Default: `500`.
    pub chunk_size: usize,
    /// Overlap between neighbouring segments in estimated tokens. Default: `50`.
    pub chunk_overlap: usize,
    /// Maximum tokens per reply. `0` leaves it to the API. Default: `0`.
    pub max_tokens: u32,
    /// Sampling temperature. `0.0` leaves it to the API. Default: `0.0`.
    pub temperature: f32,
    /// Ceiling on accepted iterations. Default: `1000`.
    pub max_iterations: u32,
    /// Transport-level retries for transient HTTP failures. Default: `0`.
    pub transport_retries: u32,
}

impl Default for ConvertConfig {
    fn default() -> Self {
        Self {
            model: DEFAULT_MODEL.to_string(),
            api_version: DEFAULT_API_VERSION.to_string(),
            chunk_size: 500,
            chunk_overlap: 50,
            max_tokens: 0,
            temperature: 0.0,
            max_iterations: ControllerConfig::DEFAULT_MAX_ITERATIONS,
            transport_retries: 0,
        }
    }
}

impl ConvertConfig {
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size;
        self
    }

    pub fn with_chunk_overlap(mut self, overlap: usize) -> Self {
        self.chunk_overlap = overlap;
        self
    }

    pub fn with_max_iterations(mut self, max: u32) -> Self {
        self.max_iterations = max;
        self
    }

    pub fn with_transport_retries(mut self, retries: u32) -> Self {
        self.transport_retries = retries;
        self
    }

    /// Build the segmenter, rejecting impossible sizes.
    pub fn build_segmenter(&self) -> Result<TokenSegmenter, ConfigError> {
        TokenSegmenter::new(self.chunk_size, self.chunk_overlap)
    }

    /// Wrap a chat client into the oracle used by the controller.
    pub fn build_oracle(&self, client: ChatClient) -> ChatOracle {
        let client = client.with_retry(RetryConfig::with_retries(self.transport_retries));
        ChatOracle::new(client, self.model.clone())
            .with_max_tokens(self.max_tokens)
            .with_temperature(self.temperature)
    }

    pub fn build_controller_config(&self) -> ControllerConfig {
        ControllerConfig::default().with_max_iterations(self.max_iterations)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn credentials_accept_https_endpoint() {
        let creds = Credentials::new(" key ", "https://res.openai.azure.com/").unwrap();
        assert_eq!(creds.api_key(), "key");
        assert_eq!(creds.endpoint(), "https://res.openai.azure.com/");
    }

    #[test]
    fn credentials_reject_missing_values() {
        assert!(matches!(
            Credentials::new("", "https://example.com"),
            Err(ConfigError::MissingCredential("api key"))
        ));
        assert!(matches!(
            Credentials::new("key", "   "),
            Err(ConfigError::MissingCredential("endpoint"))
        ));
    }

    #[test]
    fn credentials_reject_bad_urls() {
        assert!(matches!(
            Credentials::new("key", "not a url"),
            Err(ConfigError::InvalidEndpoint { .. })
        ));
        assert!(matches!(
            Credentials::new("key", "ftp://example.com"),
            Err(ConfigError::InvalidEndpoint { .. })
        ));
    }

    #[test]
    fn credentials_debug_redacts_key() {
        let creds = Credentials::new("super-secret", "https://example.com").unwrap();
        let debug = format!("{creds:?}");
        assert!(!debug.contains("super-secret"));
        assert!(debug.contains("example.com"));
    }

    #[test]
    fn defaults_match_segmenting_contract() {
        let config = ConvertConfig::default();
        assert_eq!(config.chunk_size, 500);
        assert_eq!(config.chunk_overlap, 50);
        assert_eq!(config.model, "gpt-4");
        assert_eq!(config.transport_retries, 0);
        assert!(config.build_segmenter().is_ok());
    }

    #[test]
    fn build_segmenter_rejects_overlap_not_below_size() {
        let config = ConvertConfig::default()
            .with_chunk_size(50)
            .with_chunk_overlap(50);
        assert!(matches!(
            config.build_segmenter(),
            Err(ConfigError::InvalidSegmentSizes { .. })
        ));
    }

    #[test]
    fn build_controller_config_carries_iteration_limit() {
        let config = ConvertConfig::default().with_max_iterations(7);
        assert_eq!(config.build_controller_config().max_iterations, 7);
    }
}
