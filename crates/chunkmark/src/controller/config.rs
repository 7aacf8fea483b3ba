//! Configuration for the [`WindowController`](super::runner::WindowController).

use crate::prompt::SYSTEM_PROMPT;

/// Settings for one controller run.
///
/// ```ignore
/// let config = ControllerConfig::default()
///     .with_max_iterations(200)
///     .with_system_prompt(my_prompt);
/// ```
#[derive(Debug, Clone)]
pub struct ControllerConfig {
    /// System instructions sent with every request.
    pub system_prompt: String,
    /// Ceiling on accepted iterations before the run fails. Default: `1000`.
    pub max_iterations: u32,
}

impl ControllerConfig {
    pub const DEFAULT_MAX_ITERATIONS: u32 = 1000;

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = prompt.into();
        self
    }

    pub fn with_max_iterations(mut self, max: u32) -> Self {
        self.max_iterations = max;
        self
    }
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            system_prompt: SYSTEM_PROMPT.to_string(),
            max_iterations: Self::DEFAULT_MAX_ITERATIONS,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_uses_window_prompt() {
        let config = ControllerConfig::default();
        assert_eq!(config.max_iterations, 1000);
        assert!(config.system_prompt.contains("retry_last_iteration"));
    }

    #[test]
    fn builder_overrides() {
        let config = ControllerConfig::default()
            .with_max_iterations(3)
            .with_system_prompt("custom");
        assert_eq!(config.max_iterations, 3);
        assert_eq!(config.system_prompt, "custom");
    }
}
