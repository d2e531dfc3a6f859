//! Configuration loading and validation.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Top-level VoiceBridge configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub server: Option<ServerConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub translation: Option<TranslationConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub defaults: Option<DefaultsConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub audio: Option<AudioConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub logging: Option<LoggingConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub bind: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranslationConfig {
    /// Base URL of the OpenAI-compatible completions endpoint.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,

    /// Environment variable holding the upstream API key.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key_env: Option<String>,

    /// Deadline for a single translation request, in seconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
}

/// Language and voice defaults for sessions created by a leg attaching
/// without up-front configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DefaultsConfig {
    #[serde(default = "default_source_language")]
    pub source_language: String,

    #[serde(default = "default_target_language")]
    pub target_language: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_voice: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_voice: Option<String>,
}

/// Side-channel audio sources played to a leg while it waits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioConfig {
    /// Played to the originating leg while its utterance is being translated.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hold_source: Option<String>,

    /// Played to a lone leg until its counterpart attaches.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub waiting_source: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log format: "plain" (default) or "json".
    #[serde(default = "default_log_format")]
    pub format: String,

    /// Log level override (trace/debug/info/warn/error).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub level: Option<String>,

    /// Per-crate log level overrides (e.g. "voicebridge_relay=debug").
    #[serde(default)]
    pub filters: Vec<String>,
}

fn default_port() -> u16 {
    8080
}

fn default_source_language() -> String {
    "en-US".to_string()
}

fn default_target_language() -> String {
    "de-DE".to_string()
}

fn default_log_format() -> String {
    "plain".to_string()
}

fn substitute_env_vars(input: &str) -> String {
    let re = regex::Regex::new(r"\$\{([^}]+)\}").unwrap();
    re.replace_all(input, |caps: &regex::Captures| {
        let var_name = &caps[1];
        std::env::var(var_name).unwrap_or_default()
    })
    .into_owned()
}

impl Config {
    /// Load config from a JSON5 file, substituting `${ENV_VAR}` references.
    pub fn load(path: &Path) -> crate::error::Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let raw = std::fs::read_to_string(path).map_err(crate::error::VoiceBridgeError::Io)?;
        let substituted = substitute_env_vars(&raw);

        let config: Config = json5::from_str(&substituted)
            .map_err(|e| crate::error::VoiceBridgeError::Config(e.to_string()))?;

        Ok(config)
    }

    /// Default config file path.
    pub fn config_path() -> PathBuf {
        data_dir().join("config.json")
    }

    pub fn server_port(&self) -> u16 {
        self.server.as_ref().map(|s| s.port).unwrap_or_else(default_port)
    }

    pub fn server_bind(&self) -> String {
        self.server
            .as_ref()
            .and_then(|s| s.bind.clone())
            .unwrap_or_else(|| "0.0.0.0".to_string())
    }

    pub fn default_source_language(&self) -> String {
        self.defaults
            .as_ref()
            .map(|d| d.source_language.clone())
            .unwrap_or_else(default_source_language)
    }

    pub fn default_target_language(&self) -> String {
        self.defaults
            .as_ref()
            .map(|d| d.target_language.clone())
            .unwrap_or_else(default_target_language)
    }
}

/// VoiceBridge data directory (`~/.voicebridge`).
pub fn data_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".voicebridge")
}
