// Reasoning-effort mapping
//
// The upstream folds reasoning effort into three different carriers
// depending on the model family: a model-name suffix (Gemini 3 Pro /
// Flash), a numeric token budget (Claude), or a generic thinkingBudget.

use serde_json::{json, Value};

const TIER_SUFFIXES: [&str; 4] = ["-low", "-medium", "-high", "-minimal"];

pub const CLAUDE_THINKING_MAX_OUTPUT_TOKENS: u64 = 64000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReasoningEffort {
    Minimal,
    Low,
    Medium,
    High,
}

impl ReasoningEffort {
    pub fn parse(value: Option<&str>) -> Option<Self> {
        match value? {
            "minimal" => Some(ReasoningEffort::Minimal),
            "low" => Some(ReasoningEffort::Low),
            "medium" => Some(ReasoningEffort::Medium),
            "high" => Some(ReasoningEffort::High),
            _ => None,
        }
    }
}

/// Thinking level carried in the Gemini 3 Pro model-name suffix.
pub fn pro_level(effort: Option<ReasoningEffort>) -> &'static str {
    match effort {
        Some(ReasoningEffort::High) => "high",
        _ => "low",
    }
}

/// Thinking level carried in the Gemini 3 Flash thinkingConfig.
pub fn flash_level(effort: Option<ReasoningEffort>) -> &'static str {
    match effort {
        Some(ReasoningEffort::Minimal) => "minimal",
        Some(ReasoningEffort::Low) => "low",
        Some(ReasoningEffort::High) => "high",
        Some(ReasoningEffort::Medium) | None => "medium",
    }
}

/// Numeric thinking budget for models addressed by token count.
/// The absent case falls back to the configured default budget.
pub fn token_budget(effort: Option<ReasoningEffort>, default_budget: u32) -> u32 {
    match effort {
        Some(ReasoningEffort::Minimal) | Some(ReasoningEffort::Low) => 8192,
        Some(ReasoningEffort::Medium) => 16384,
        Some(ReasoningEffort::High) => 32768,
        None => default_budget,
    }
}

pub fn is_claude_model(model: &str) -> bool {
    let lower = model.to_lowercase();
    lower.contains("claude") || lower.contains("opus")
}

pub fn is_thinking_model(model: &str) -> bool {
    let lower = model.to_lowercase();
    lower.contains("thinking") || lower.contains("gemini-3") || lower.contains("opus")
}

pub fn is_gemini3_pro(model: &str) -> bool {
    model.to_lowercase().contains("gemini-3-pro")
}

pub fn is_gemini3_flash(model: &str) -> bool {
    model.to_lowercase().contains("gemini-3-flash")
}

fn has_tier_suffix(model: &str) -> bool {
    let lower = model.to_lowercase();
    TIER_SUFFIXES.iter().any(|s| lower.ends_with(s))
}

fn strip_tier_suffix(model: &str) -> &str {
    let lower = model.to_lowercase();
    for suffix in TIER_SUFFIXES {
        if lower.ends_with(suffix) {
            return &model[..model.len() - suffix.len()];
        }
    }
    model
}

/// Gemini 3 Pro carries its effort tier in the model identifier itself.
/// A suffix already present in the client's model string wins over the
/// reasoning_effort parameter.
pub fn normalize_model_for_antigravity(model: &str, effort: Option<ReasoningEffort>) -> String {
    let lower = model.to_lowercase();
    if lower.starts_with("gemini-3-pro") && !has_tier_suffix(model) {
        return format!("{}-{}", model, pro_level(effort));
    }
    model.to_string()
}

/// Restores the canonical model identifier for a given header style.
/// The gemini-cli surface expects `-preview` identifiers without tiers.
pub fn resolve_model_for_header_style(model: &str, style: &str) -> String {
    if style != "gemini-cli" {
        return model.to_string();
    }
    let stripped = strip_tier_suffix(model);
    if stripped.to_lowercase().contains("gemini-3") && !stripped.to_lowercase().ends_with("-preview")
    {
        return format!("{}-preview", stripped);
    }
    stripped.to_string()
}

/// Injects the thinking configuration into a generationConfig object.
pub fn apply_thinking_config(
    generation_config: &mut Value,
    model: &str,
    effort: Option<ReasoningEffort>,
    default_budget: u32,
) {
    if !is_thinking_model(model) {
        return;
    }

    if is_gemini3_pro(model) {
        generation_config["thinkingConfig"] = json!({
            "thinkingLevel": pro_level(effort),
            "includeThoughts": true
        });
        return;
    }

    if is_gemini3_flash(model) {
        generation_config["thinkingConfig"] = json!({
            "thinkingLevel": flash_level(effort),
            "includeThoughts": true
        });
        return;
    }

    let budget = token_budget(effort, default_budget);

    if is_claude_model(model) {
        // Claude-on-Antigravity speaks the snake_case variant and rejects
        // maxOutputTokens at or below the thinking budget.
        generation_config["thinkingConfig"] = json!({
            "include_thoughts": true,
            "thinking_budget": budget
        });
        let max_output = generation_config
            .get("maxOutputTokens")
            .and_then(|v| v.as_u64());
        if max_output.map(|m| m <= budget as u64).unwrap_or(true) {
            generation_config["maxOutputTokens"] = json!(CLAUDE_THINKING_MAX_OUTPUT_TOKENS);
        }
        return;
    }

    generation_config["thinkingConfig"] = json!({
        "thinkingBudget": budget,
        "includeThoughts": true
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_effort_parse() {
        assert_eq!(ReasoningEffort::parse(Some("high")), Some(ReasoningEffort::High));
        assert_eq!(ReasoningEffort::parse(Some("minimal")), Some(ReasoningEffort::Minimal));
        assert_eq!(ReasoningEffort::parse(Some("unknown")), None);
        assert_eq!(ReasoningEffort::parse(None), None);
    }

    #[test]
    fn test_pro_level_mapping() {
        assert_eq!(pro_level(Some(ReasoningEffort::Minimal)), "low");
        assert_eq!(pro_level(Some(ReasoningEffort::Low)), "low");
        assert_eq!(pro_level(Some(ReasoningEffort::Medium)), "low");
        assert_eq!(pro_level(Some(ReasoningEffort::High)), "high");
        assert_eq!(pro_level(None), "low");
    }

    #[test]
    fn test_flash_level_mapping() {
        assert_eq!(flash_level(Some(ReasoningEffort::Minimal)), "minimal");
        assert_eq!(flash_level(Some(ReasoningEffort::Low)), "low");
        assert_eq!(flash_level(Some(ReasoningEffort::Medium)), "medium");
        assert_eq!(flash_level(Some(ReasoningEffort::High)), "high");
        assert_eq!(flash_level(None), "medium");
    }

    #[test]
    fn test_token_budget_mapping() {
        assert_eq!(token_budget(Some(ReasoningEffort::Minimal), 16000), 8192);
        assert_eq!(token_budget(Some(ReasoningEffort::Low), 16000), 8192);
        assert_eq!(token_budget(Some(ReasoningEffort::Medium), 16000), 16384);
        assert_eq!(token_budget(Some(ReasoningEffort::High), 16000), 32768);
        assert_eq!(token_budget(None, 16000), 16000);
    }

    #[test]
    fn test_model_tags() {
        assert!(is_claude_model("claude-sonnet-4-5-thinking"));
        assert!(is_claude_model("claude-opus-4-5"));
        assert!(is_claude_model("OPUS-next"));
        assert!(!is_claude_model("gemini-3-flash"));

        assert!(is_thinking_model("gemini-3-pro"));
        assert!(is_thinking_model("gemini-3-flash"));
        assert!(is_thinking_model("claude-sonnet-4-5-thinking"));
        assert!(is_thinking_model("claude-opus-4-5"));
        assert!(!is_thinking_model("gemini-2.5-flash"));
        assert!(!is_thinking_model("gpt-4"));
    }

    #[test]
    fn test_normalize_model_for_antigravity() {
        assert_eq!(
            normalize_model_for_antigravity("gemini-3-pro", Some(ReasoningEffort::High)),
            "gemini-3-pro-high"
        );
        assert_eq!(
            normalize_model_for_antigravity("gemini-3-pro", None),
            "gemini-3-pro-low"
        );
        assert_eq!(
            normalize_model_for_antigravity("gemini-3-flash", Some(ReasoningEffort::High)),
            "gemini-3-flash"
        );
        assert_eq!(
            normalize_model_for_antigravity("gpt-4", Some(ReasoningEffort::High)),
            "gpt-4"
        );
    }

    #[test]
    fn test_normalize_is_idempotent_on_suffixed_models() {
        let once = normalize_model_for_antigravity("gemini-3-pro", Some(ReasoningEffort::High));
        let twice = normalize_model_for_antigravity(&once, Some(ReasoningEffort::Medium));
        assert_eq!(once, twice);
    }

    #[test]
    fn test_resolve_model_for_header_style() {
        assert_eq!(
            resolve_model_for_header_style("gemini-3-pro-high", "antigravity"),
            "gemini-3-pro-high"
        );
        assert_eq!(
            resolve_model_for_header_style("gemini-3-pro-high", "gemini-cli"),
            "gemini-3-pro-preview"
        );
        assert_eq!(
            resolve_model_for_header_style("gemini-3-flash", "gemini-cli"),
            "gemini-3-flash-preview"
        );
        assert_eq!(
            resolve_model_for_header_style("gemini-3-pro-preview", "gemini-cli"),
            "gemini-3-pro-preview"
        );
        assert_eq!(
            resolve_model_for_header_style("claude-sonnet-4-5", "gemini-cli"),
            "claude-sonnet-4-5"
        );
    }

    #[test]
    fn test_apply_thinking_config_pro() {
        let mut config = json!({});
        apply_thinking_config(&mut config, "gemini-3-pro", Some(ReasoningEffort::High), 16000);
        assert_eq!(config["thinkingConfig"]["thinkingLevel"], "high");
        assert_eq!(config["thinkingConfig"]["includeThoughts"], true);
    }

    #[test]
    fn test_apply_thinking_config_flash() {
        let mut config = json!({});
        apply_thinking_config(&mut config, "gemini-3-flash", None, 16000);
        assert_eq!(config["thinkingConfig"]["thinkingLevel"], "medium");
    }

    #[test]
    fn test_apply_thinking_config_claude_raises_max_tokens() {
        let mut config = json!({ "maxOutputTokens": 4096 });
        apply_thinking_config(
            &mut config,
            "claude-opus-4-5-thinking",
            Some(ReasoningEffort::Medium),
            16000,
        );
        assert_eq!(config["thinkingConfig"]["thinking_budget"], 16384);
        assert_eq!(config["thinkingConfig"]["include_thoughts"], true);
        assert_eq!(config["maxOutputTokens"], 64000);
    }

    #[test]
    fn test_apply_thinking_config_claude_keeps_large_max_tokens() {
        let mut config = json!({ "maxOutputTokens": 100000 });
        apply_thinking_config(
            &mut config,
            "claude-opus-4-5-thinking",
            Some(ReasoningEffort::Low),
            16000,
        );
        assert_eq!(config["maxOutputTokens"], 100000);
    }

    #[test]
    fn test_apply_thinking_config_skips_non_thinking_models() {
        let mut config = json!({});
        apply_thinking_config(&mut config, "gemini-2.5-flash", Some(ReasoningEffort::High), 16000);
        assert!(config.get("thinkingConfig").is_none());
    }

    #[test]
    fn test_apply_thinking_config_generic_thinking_model() {
        let mut config = json!({});
        apply_thinking_config(&mut config, "some-thinking-model", None, 16000);
        assert_eq!(config["thinkingConfig"]["thinkingBudget"], 16000);
        assert_eq!(config["thinkingConfig"]["includeThoughts"], true);
    }
}
