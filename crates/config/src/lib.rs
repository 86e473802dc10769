//! Configuration loading, validation, and management for huddle.
//!
//! Loads configuration from a TOML file (default `huddle.toml`), applies
//! environment variable overrides, then validates. Environment variable
//! names match the ones the bot has always been deployed with.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Default config file, relative to the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "huddle.toml";

/// The root configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Chat server connection
    #[serde(default)]
    pub mattermost: MattermostConfig,

    /// The bot's identity and reply behaviour
    #[serde(default)]
    pub bot: BotConfig,

    /// Main LLM used for replies
    #[serde(default)]
    pub llm: LlmConfig,

    /// LLM used to judge whether to speak in active threads
    #[serde(default)]
    pub decision: DecisionConfig,

    /// Task-tracker tools; disabled without an API key
    #[serde(default)]
    pub asana: AsanaConfig,

    /// Health endpoint
    #[serde(default)]
    pub gateway: GatewayConfig,

    /// Event-stream reconnection
    #[serde(default)]
    pub supervisor: SupervisorConfig,

    /// Active-thread cleanup
    #[serde(default)]
    pub sweeper: SweeperConfig,
}

/// Redact a secret for Debug output.
fn redact(s: &Option<String>) -> &'static str {
    match s {
        Some(_) => "[REDACTED]",
        None => "None",
    }
}

#[derive(Clone, Default, Serialize, Deserialize)]
pub struct MattermostConfig {
    /// Base URL, e.g. `https://chat.example.com`
    #[serde(default)]
    pub server_url: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_token: Option<String>,

    /// Resolved from `/users/me` at startup when empty
    #[serde(default)]
    pub bot_user_id: String,
}

impl std::fmt::Debug for MattermostConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MattermostConfig")
            .field("server_url", &self.server_url)
            .field("access_token", &redact(&self.access_token))
            .field("bot_user_id", &self.bot_user_id)
            .finish()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BotConfig {
    #[serde(default = "default_username")]
    pub username: String,

    #[serde(default = "default_display_name")]
    pub display_name: String,

    /// Stream replies by editing a placeholder post
    #[serde(default = "default_true")]
    pub streaming: bool,

    /// How often a streaming reply is flushed to the post
    #[serde(default = "default_stream_tick_ms")]
    pub stream_tick_ms: u64,

    /// Hard limit on one streaming reply
    #[serde(default = "default_stream_deadline_secs")]
    pub stream_deadline_secs: u64,

    /// Extra system prompt for the main LLM
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,
}

fn default_username() -> String {
    "agent-bot".into()
}
fn default_display_name() -> String {
    "Assistant".into()
}
fn default_true() -> bool {
    true
}
fn default_stream_tick_ms() -> u64 {
    1000
}
fn default_stream_deadline_secs() -> u64 {
    300
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            username: default_username(),
            display_name: default_display_name(),
            streaming: true,
            stream_tick_ms: default_stream_tick_ms(),
            stream_deadline_secs: default_stream_deadline_secs(),
            system_prompt: None,
        }
    }
}

#[derive(Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Override for the Anthropic API base URL
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_url: Option<String>,

    #[serde(default = "default_model")]
    pub model: String,

    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    /// Per-request cap on provider-side web searches; 0 disables the tool
    #[serde(default = "default_web_search_max_uses")]
    pub web_search_max_uses: u32,

    /// Upper bound on model/tool round trips for one reply
    #[serde(default = "default_max_tool_rounds")]
    pub max_tool_rounds: usize,
}

fn default_model() -> String {
    "claude-sonnet-4-20250514".into()
}
fn default_max_tokens() -> u32 {
    4096
}
fn default_web_search_max_uses() -> u32 {
    3
}
fn default_max_tool_rounds() -> usize {
    10
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            api_url: None,
            model: default_model(),
            max_tokens: default_max_tokens(),
            web_search_max_uses: default_web_search_max_uses(),
            max_tool_rounds: default_max_tool_rounds(),
        }
    }
}

impl std::fmt::Debug for LlmConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LlmConfig")
            .field("api_key", &redact(&self.api_key))
            .field("api_url", &self.api_url)
            .field("model", &self.model)
            .field("max_tokens", &self.max_tokens)
            .field("web_search_max_uses", &self.web_search_max_uses)
            .field("max_tool_rounds", &self.max_tool_rounds)
            .finish()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionConfig {
    #[serde(default = "default_decision_model")]
    pub model: String,

    #[serde(default = "default_decision_max_tokens")]
    pub max_tokens: u32,
}

fn default_decision_model() -> String {
    "claude-3-5-haiku-20241022".into()
}
fn default_decision_max_tokens() -> u32 {
    512
}

impl Default for DecisionConfig {
    fn default() -> Self {
        Self {
            model: default_decision_model(),
            max_tokens: default_decision_max_tokens(),
        }
    }
}

#[derive(Clone, Serialize, Deserialize)]
pub struct AsanaConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    #[serde(default = "default_asana_url")]
    pub api_url: String,
}

fn default_asana_url() -> String {
    "https://app.asana.com/api/1.0".into()
}

impl Default for AsanaConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            api_url: default_asana_url(),
        }
    }
}

impl std::fmt::Debug for AsanaConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AsanaConfig")
            .field("api_key", &redact(&self.api_key))
            .field("api_url", &self.api_url)
            .finish()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_host() -> String {
    "0.0.0.0".into()
}
fn default_port() -> u16 {
    8081
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SupervisorConfig {
    #[serde(default = "default_reconnect_interval_secs")]
    pub reconnect_interval_secs: u64,
}

fn default_reconnect_interval_secs() -> u64 {
    10
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            reconnect_interval_secs: default_reconnect_interval_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SweeperConfig {
    #[serde(default = "default_sweep_interval_secs")]
    pub interval_secs: u64,

    /// Threads probed per sweep
    #[serde(default = "default_sample_size")]
    pub sample_size: usize,
}

fn default_sweep_interval_secs() -> u64 {
    600
}
fn default_sample_size() -> usize {
    5
}

impl Default for SweeperConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_sweep_interval_secs(),
            sample_size: default_sample_size(),
        }
    }
}

impl AppConfig {
    /// Load from `path`, apply process environment overrides, validate.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let mut config = Self::load_from(path)?;
        config.apply_env(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file path without validating.
    ///
    /// A missing file yields defaults.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::info!("No config file found at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })
    }

    /// Apply environment overrides read through `lookup`.
    ///
    /// Empty values are ignored; unparsable numbers are ignored with a warning.
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(v) = get("MATTERMOST_SERVER_URL") {
            self.mattermost.server_url = v;
        }
        if let Some(v) = get("MATTERMOST_ACCESS_TOKEN") {
            self.mattermost.access_token = Some(v);
        }
        if let Some(v) = get("MATTERMOST_BOT_USER_ID") {
            self.mattermost.bot_user_id = v;
        }
        if let Some(v) = get("BOT_USERNAME") {
            self.bot.username = v;
        }
        if let Some(v) = get("BOT_DISPLAY_NAME") {
            self.bot.display_name = v;
        }
        if let Some(v) = get("ANTHROPIC_API_KEY") {
            self.llm.api_key = Some(v);
        }
        if let Some(v) = get("ANTHROPIC_MODEL") {
            self.llm.model = v;
        }
        if let Some(v) = parse_env(&get, "LLM_MAX_TOKENS") {
            self.llm.max_tokens = v;
        }
        if let Some(v) = parse_env(&get, "WEB_SEARCH_MAX_USES") {
            self.llm.web_search_max_uses = v;
        }
        if let Some(v) = get("DECISION_MODEL") {
            self.decision.model = v;
        }
        if let Some(v) = parse_env(&get, "DECISION_MAX_TOKENS") {
            self.decision.max_tokens = v;
        }
        if let Some(v) = get("ASANA_API_KEY") {
            self.asana.api_key = Some(v);
        }
        if let Some(v) = parse_env(&get, "PORT") {
            self.gateway.port = v;
        }
    }

    /// Validate the configuration. Any failure here is fatal at startup.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.mattermost.server_url.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "MATTERMOST_SERVER_URL is required".into(),
            ));
        }
        if self.mattermost.access_token.as_deref().is_none_or(str::is_empty) {
            return Err(ConfigError::ValidationError(
                "MATTERMOST_ACCESS_TOKEN is required".into(),
            ));
        }
        if self.llm.api_key.as_deref().is_none_or(str::is_empty) {
            return Err(ConfigError::ValidationError(
                "ANTHROPIC_API_KEY is required".into(),
            ));
        }
        if self.bot.username.trim().is_empty() {
            return Err(ConfigError::ValidationError("bot.username must not be empty".into()));
        }

        let non_zero = [
            ("llm.max_tokens", self.llm.max_tokens as u64),
            ("llm.max_tool_rounds", self.llm.max_tool_rounds as u64),
            ("decision.max_tokens", self.decision.max_tokens as u64),
            ("bot.stream_tick_ms", self.bot.stream_tick_ms),
            ("bot.stream_deadline_secs", self.bot.stream_deadline_secs),
            ("supervisor.reconnect_interval_secs", self.supervisor.reconnect_interval_secs),
            ("sweeper.interval_secs", self.sweeper.interval_secs),
            ("sweeper.sample_size", self.sweeper.sample_size as u64),
            ("gateway.port", self.gateway.port as u64),
        ];
        if let Some((name, _)) = non_zero.iter().find(|(_, v)| *v == 0) {
            return Err(ConfigError::ValidationError(format!("{name} must be greater than 0")));
        }

        Ok(())
    }

    /// Whether the task-tracker tools should be registered.
    pub fn asana_enabled(&self) -> bool {
        self.asana.api_key.as_deref().is_some_and(|k| !k.is_empty())
    }

    /// Generate a default config TOML string.
    pub fn default_toml() -> String {
        toml::to_string_pretty(&Self::default()).unwrap_or_default()
    }
}

fn parse_env<T, G>(get: &G, key: &str) -> Option<T>
where
    T: std::str::FromStr,
    G: Fn(&str) -> Option<String>,
{
    let raw = get(key)?;
    match raw.trim().parse() {
        Ok(v) => Some(v),
        Err(_) => {
            tracing::warn!(key, value = %raw, "Ignoring unparsable environment override");
            None
        }
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {reason}")]
    ReadError { path: PathBuf, reason: String },

    #[error("Failed to parse config file at {path}: {reason}")]
    ParseError { path: PathBuf, reason: String },

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    fn required() -> Vec<(&'static str, &'static str)> {
        vec![
            ("MATTERMOST_SERVER_URL", "https://chat.example.com"),
            ("MATTERMOST_ACCESS_TOKEN", "tok"),
            ("ANTHROPIC_API_KEY", "sk-ant"),
        ]
    }

    #[test]
    fn defaults_match_deployment() {
        let config = AppConfig::default();
        assert_eq!(config.bot.username, "agent-bot");
        assert_eq!(config.bot.display_name, "Assistant");
        assert_eq!(config.llm.model, "claude-sonnet-4-20250514");
        assert_eq!(config.llm.max_tokens, 4096);
        assert_eq!(config.llm.web_search_max_uses, 3);
        assert_eq!(config.llm.max_tool_rounds, 10);
        assert_eq!(config.decision.model, "claude-3-5-haiku-20241022");
        assert_eq!(config.decision.max_tokens, 512);
        assert_eq!(config.gateway.port, 8081);
        assert_eq!(config.supervisor.reconnect_interval_secs, 10);
        assert_eq!(config.sweeper.interval_secs, 600);
        assert_eq!(config.sweeper.sample_size, 5);
        assert!(config.bot.streaming);
    }

    #[test]
    fn defaults_alone_fail_validation() {
        let err = AppConfig::default().validate().unwrap_err();
        assert!(err.to_string().contains("MATTERMOST_SERVER_URL"));
    }

    #[test]
    fn env_overrides_apply() {
        let mut pairs = required();
        pairs.extend([
            ("BOT_USERNAME", "helper"),
            ("LLM_MAX_TOKENS", "2048"),
            ("WEB_SEARCH_MAX_USES", "5"),
            ("PORT", "9000"),
            ("ASANA_API_KEY", "asana"),
        ]);
        let mut config = AppConfig::default();
        config.apply_env(env(&pairs));

        assert_eq!(config.mattermost.server_url, "https://chat.example.com");
        assert_eq!(config.bot.username, "helper");
        assert_eq!(config.llm.max_tokens, 2048);
        assert_eq!(config.llm.web_search_max_uses, 5);
        assert_eq!(config.gateway.port, 9000);
        assert!(config.asana_enabled());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn bad_numbers_and_blank_values_are_ignored() {
        let mut config = AppConfig::default();
        config.apply_env(env(&[("LLM_MAX_TOKENS", "lots"), ("BOT_USERNAME", "  ")]));
        assert_eq!(config.llm.max_tokens, 4096);
        assert_eq!(config.bot.username, "agent-bot");
    }

    #[test]
    fn missing_anthropic_key_is_fatal() {
        let mut config = AppConfig::default();
        config.apply_env(env(&required()[..2]));
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("ANTHROPIC_API_KEY"));
    }

    #[test]
    fn zero_knob_is_rejected() {
        let mut config = AppConfig::default();
        config.apply_env(env(&required()));
        config.sweeper.sample_size = 0;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("sweeper.sample_size"));
    }

    #[test]
    fn missing_config_file_returns_defaults() {
        let config = AppConfig::load_from(Path::new("/nonexistent/huddle.toml")).unwrap();
        assert_eq!(config.gateway.port, 8081);
    }

    #[test]
    fn toml_sections_parse() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("huddle.toml");
        std::fs::write(
            &path,
            r#"
[mattermost]
server_url = "https://chat.example.com"
access_token = "tok"

[bot]
username = "helper"
streaming = false
stream_tick_ms = 250

[llm]
api_key = "sk"
max_tool_rounds = 4

[sweeper]
sample_size = 2
"#,
        )
        .unwrap();

        let config = AppConfig::load_from(&path).unwrap();
        assert_eq!(config.bot.username, "helper");
        assert!(!config.bot.streaming);
        assert_eq!(config.bot.stream_tick_ms, 250);
        assert_eq!(config.bot.display_name, "Assistant");
        assert_eq!(config.llm.max_tool_rounds, 4);
        assert_eq!(config.sweeper.sample_size, 2);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn malformed_file_is_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("huddle.toml");
        std::fs::write(&path, "[bot\nusername = 1").unwrap();
        let err = AppConfig::load_from(&path).unwrap_err();
        assert!(matches!(err, ConfigError::ParseError { .. }));
    }

    #[test]
    fn debug_redacts_secrets() {
        let mut config = AppConfig::default();
        config.apply_env(env(&[
            ("MATTERMOST_ACCESS_TOKEN", "very-secret-token"),
            ("ANTHROPIC_API_KEY", "sk-ant-secret"),
            ("ASANA_API_KEY", "asana-secret"),
        ]));
        let debug = format!("{config:?}");
        assert!(!debug.contains("very-secret-token"));
        assert!(!debug.contains("sk-ant-secret"));
        assert!(!debug.contains("asana-secret"));
        assert!(debug.contains("[REDACTED]"));
    }

    #[test]
    fn default_toml_generation() {
        let toml_str = AppConfig::default_toml();
        assert!(toml_str.contains("[bot]"));
        assert!(toml_str.contains("agent-bot"));
    }
}
