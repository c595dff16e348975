// Configuration for the Antigravity OpenAI proxy

use once_cell::sync::Lazy;

// Antigravity desktop app OAuth credentials; intentionally public.
const DEFAULT_CLIENT_ID: &str =
    "1071006060591-tmhssin2h21lcre235vtolojh4g403ep.apps.googleusercontent.com";
const DEFAULT_CLIENT_SECRET: &str = "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";

const DEFAULT_PORT: u16 = 8000;
const DEFAULT_THINKING_BUDGET: u32 = 16000;

static CONFIG: Lazy<AppConfig> = Lazy::new(AppConfig::from_env);

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub port: u16,
    pub client_id: String,
    pub client_secret: String,
    /// Overrides loadCodeAssist project discovery when set.
    pub project_id: Option<String>,
    /// When true, thought-tagged text parts are forwarded instead of dropped.
    pub keep_thinking: bool,
    /// Thinking token budget applied when the client sends no reasoning_effort.
    pub thinking_budget: u32,
}

impl AppConfig {
    fn from_env() -> Self {
        let port = std::env::var("PORT")
            .ok()
            .and_then(|v| v.parse::<u16>().ok())
            .unwrap_or(DEFAULT_PORT);

        let client_id = std::env::var("ANTIGRAVITY_CLIENT_ID")
            .ok()
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| DEFAULT_CLIENT_ID.to_string());

        let client_secret = std::env::var("ANTIGRAVITY_CLIENT_SECRET")
            .ok()
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| DEFAULT_CLIENT_SECRET.to_string());

        let project_id = std::env::var("ANTIGRAVITY_PROJECT_ID")
            .ok()
            .filter(|v| !v.trim().is_empty());

        let keep_thinking = std::env::var("KEEP_THINKING")
            .map(|v| v == "true")
            .unwrap_or(false);

        let thinking_budget = std::env::var("THINKING_BUDGET")
            .ok()
            .and_then(|v| v.parse::<u32>().ok())
            .unwrap_or(DEFAULT_THINKING_BUDGET);

        Self {
            port,
            client_id,
            client_secret,
            project_id,
            keep_thinking,
            thinking_budget,
        }
    }
}

pub fn get_config() -> &'static AppConfig {
    &CONFIG
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_without_env() {
        let config = AppConfig {
            port: DEFAULT_PORT,
            client_id: DEFAULT_CLIENT_ID.to_string(),
            client_secret: DEFAULT_CLIENT_SECRET.to_string(),
            project_id: None,
            keep_thinking: false,
            thinking_budget: DEFAULT_THINKING_BUDGET,
        };
        assert_eq!(config.port, 8000);
        assert_eq!(config.thinking_budget, 16000);
        assert!(!config.keep_thinking);
    }
}
