use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

use crate::capture::OpenOptions;
use crate::packet::FilterCriteria;

fn empty_string_none<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let opt = Option::<String>::deserialize(deserializer)?;
    Ok(opt.filter(|s| !s.trim().is_empty()))
}

#[derive(Debug)]
pub enum ConfigError {
    Io(std::io::Error),
    Parse(toml::de::Error),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Io(err) => write!(f, "config io error: {}", err),
            ConfigError::Parse(err) => write!(f, "config parse error: {}", err),
        }
    }
}

impl std::error::Error for ConfigError {}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub capture: CaptureConfig,
    pub assistant: AssistantConfig,
    pub filter: FilterCriteria,
    pub display: DisplayConfig,
}

impl Config {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(ConfigError::Io)?;
        Self::parse(&raw)
    }

    pub fn parse(raw: &str) -> Result<Self, ConfigError> {
        toml::from_str(raw).map_err(ConfigError::Parse)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    #[serde(deserialize_with = "empty_string_none")]
    pub interface: Option<String>,
    pub promiscuous: bool,
    pub snaplen: i32,
    pub timeout_ms: i32,
    pub channel_capacity: usize,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        CaptureConfig {
            interface: None,
            promiscuous: true,
            snaplen: 1600,
            timeout_ms: 100,
            channel_capacity: 128,
        }
    }
}

impl CaptureConfig {
    pub fn open_options(&self) -> OpenOptions {
        OpenOptions {
            promiscuous: self.promiscuous,
            snaplen: self.snaplen,
            timeout_ms: self.timeout_ms,
            channel_capacity: self.channel_capacity,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AssistantConfig {
    /// Explicit API key. Takes precedence over `api_key_env`.
    #[serde(deserialize_with = "empty_string_none")]
    pub api_key: Option<String>,
    /// Environment variable read for the key when `api_key` is unset.
    pub api_key_env: String,
    pub model: String,
    /// Base URL of the generative language API.
    pub endpoint: String,
    pub request_timeout_secs: u64,
    /// Number of visible packet summaries appended to each question (0 = none).
    pub context_packets: usize,
    /// Exchanges kept in the chat history.
    pub max_history: usize,
}

impl Default for AssistantConfig {
    fn default() -> Self {
        AssistantConfig {
            api_key: None,
            api_key_env: "API_KEY".into(),
            model: "gemini-1.5-flash".into(),
            endpoint: "https://generativelanguage.googleapis.com/v1beta".into(),
            request_timeout_secs: 30,
            context_packets: 0,
            max_history: 20,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DisplayConfig {
    /// Rows printed when the whole view is redrawn.
    pub max_rows: usize,
}

impl Default for DisplayConfig {
    fn default() -> Self {
        DisplayConfig { max_rows: 50 }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_gives_defaults() {
        let config = Config::parse("").unwrap();
        assert_eq!(config.capture.snaplen, 1600);
        assert_eq!(config.capture.timeout_ms, 100);
        assert!(config.capture.promiscuous);
        assert_eq!(config.assistant.api_key_env, "API_KEY");
        assert!(config.filter.is_wildcard());
        assert_eq!(config.display.max_rows, 50);
    }

    #[test]
    fn sections_override_defaults() {
        let config = Config::parse(
            r#"
            [capture]
            interface = "eth0"
            promiscuous = false

            [assistant]
            api_key = ""
            model = "gemini-2.0-flash"
            context_packets = 10

            [filter]
            protocol = "udp"
            limit = 5
            "#,
        )
        .unwrap();
        assert_eq!(config.capture.interface.as_deref(), Some("eth0"));
        assert!(!config.capture.promiscuous);
        assert_eq!(config.capture.channel_capacity, 128);
        assert_eq!(config.assistant.api_key, None, "blank key is unset");
        assert_eq!(config.assistant.model, "gemini-2.0-flash");
        assert_eq!(config.assistant.context_packets, 10);
        assert_eq!(config.filter.protocol, "udp");
        assert_eq!(config.filter.limit, 5);
    }

    #[test]
    fn bad_toml_is_parse_error() {
        assert!(matches!(
            Config::parse("[capture\nsnaplen = 1"),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn open_options_follow_capture_section() {
        let capture = CaptureConfig {
            snaplen: 9000,
            timeout_ms: 250,
            ..CaptureConfig::default()
        };
        let opts = capture.open_options();
        assert_eq!(opts.snaplen, 9000);
        assert_eq!(opts.timeout_ms, 250);
        assert_eq!(opts.channel_capacity, 128);
    }
}
