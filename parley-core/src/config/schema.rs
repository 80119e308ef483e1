//! Configuration schema definitions

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Root configuration for parley
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Gemini API access
    #[serde(default)]
    pub gemini: GeminiConfig,
    /// Generation parameters sent with every request
    #[serde(default)]
    pub generation: GenerationConfig,
    /// Conversation database
    #[serde(default)]
    pub storage: StorageConfig,
    /// Chat behavior and priming
    #[serde(default)]
    pub chat: ChatConfig,
    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Log format (text, json)
    #[serde(default = "default_log_format")]
    pub format: String,
    /// Directory for log files
    #[serde(default = "default_log_dir")]
    pub dir: String,
    /// Module-specific overrides
    #[serde(default)]
    pub overrides: HashMap<String, String>,
    /// Mirror log records to stderr. Off by default so records do not
    /// interleave with the interactive menu.
    #[serde(default)]
    pub console: bool,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "text".to_string()
}

fn default_log_dir() -> String {
    "~/.parley/logs".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
            dir: default_log_dir(),
            overrides: HashMap::new(),
            console: false,
        }
    }
}

/// Gemini API access
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeminiConfig {
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_api_base")]
    pub api_base: String,
    /// Request timeout in seconds, 0 disables the timeout
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_api_base() -> String {
    "https://generativelanguage.googleapis.com/v1beta".to_string()
}

fn default_timeout_secs() -> u64 {
    120
}

impl Default for GeminiConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            api_base: default_api_base(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

/// Blocking threshold applied to every harm category
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HarmBlockThreshold {
    BlockNone,
    #[default]
    BlockLowAndAbove,
    BlockMediumAndAbove,
    BlockOnlyHigh,
}

/// Generation parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationConfig {
    #[serde(default = "default_max_output_tokens")]
    pub max_output_tokens: u32,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_top_p")]
    pub top_p: f32,
    #[serde(default)]
    pub safety_threshold: HarmBlockThreshold,
}

fn default_max_output_tokens() -> u32 {
    2048
}

fn default_temperature() -> f32 {
    0.7
}

fn default_top_p() -> f32 {
    0.9
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            max_output_tokens: default_max_output_tokens(),
            temperature: default_temperature(),
            top_p: default_top_p(),
            safety_threshold: HarmBlockThreshold::default(),
        }
    }
}

/// Conversation database location
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// SQLite file; relative paths resolve against the config directory
    #[serde(default = "default_database_path")]
    pub database_path: String,
}

fn default_database_path() -> String {
    "convo.db".to_string()
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
        }
    }
}

/// Chat behavior
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatConfig {
    /// Instruction turn sent ahead of every history
    #[serde(default = "default_system_prompt")]
    pub system_prompt: String,
    /// Model acknowledgement paired with the instruction turn
    #[serde(default = "default_acknowledgement")]
    pub acknowledgement: String,
    /// Input that ends the chat loop
    #[serde(default = "default_exit_token")]
    pub exit_token: String,
    /// Per-character delay when echoing replies, 0 prints fragments as they arrive
    #[serde(default = "default_typing_delay_ms")]
    pub typing_delay_ms: u64,
    /// Preselected model in the start menu
    #[serde(default)]
    pub default_model: Option<String>,
}

fn default_system_prompt() -> String {
    "You are a helpful Chatbot, that helps users by answering their questions. \
     The responses should be short, and precise."
        .to_string()
}

fn default_acknowledgement() -> String {
    "Understood. I will do my best to be helpful!".to_string()
}

fn default_exit_token() -> String {
    "/bye".to_string()
}

fn default_typing_delay_ms() -> u64 {
    15
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            system_prompt: default_system_prompt(),
            acknowledgement: default_acknowledgement(),
            exit_token: default_exit_token(),
            typing_delay_ms: default_typing_delay_ms(),
            default_model: None,
        }
    }
}
