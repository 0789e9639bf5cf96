//! Configuration file handling

use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use super::paths::config_path;
use super::Result;

/// Main configuration structure
#[derive(Debug, Deserialize, Default)]
pub struct Config {
    /// Debug adapter configurations
    #[serde(default)]
    pub adapters: HashMap<String, AdapterConfig>,

    /// Default settings
    #[serde(default)]
    pub defaults: Defaults,

    /// Timeout settings
    #[serde(default)]
    pub timeouts: Timeouts,

    /// Command history settings
    #[serde(default)]
    pub history: HistoryConfig,

    /// Local prompt settings
    #[serde(default)]
    pub prompt: PromptConfig,

    /// Remote session server settings
    #[serde(default)]
    pub remote: RemoteConfig,
}

/// Configuration for a debug adapter
#[derive(Debug, Deserialize, Clone)]
pub struct AdapterConfig {
    /// Path to the adapter executable
    pub path: PathBuf,

    /// Additional arguments to pass to the adapter
    #[serde(default)]
    pub args: Vec<String>,
}

/// Default settings
#[derive(Debug, Deserialize)]
pub struct Defaults {
    /// Default adapter to use
    #[serde(default = "default_adapter")]
    pub adapter: String,
}

impl Default for Defaults {
    fn default() -> Self {
        Self {
            adapter: default_adapter(),
        }
    }
}

fn default_adapter() -> String {
    "lldb-dap".to_string()
}

/// Timeout settings in seconds
#[derive(Debug, Deserialize)]
pub struct Timeouts {
    /// Timeout for DAP initialize request
    #[serde(default = "default_dap_initialize")]
    pub dap_initialize_secs: u64,

    /// Timeout for general DAP requests
    #[serde(default = "default_dap_request")]
    pub dap_request_secs: u64,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            dap_initialize_secs: default_dap_initialize(),
            dap_request_secs: default_dap_request(),
        }
    }
}

fn default_dap_initialize() -> u64 {
    10
}
fn default_dap_request() -> u64 {
    30
}

/// Command history configuration
#[derive(Debug, Deserialize)]
pub struct HistoryConfig {
    /// History file, relative paths resolve against the working directory
    #[serde(default = "default_history_file")]
    pub file: PathBuf,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            file: default_history_file(),
        }
    }
}

fn default_history_file() -> PathBuf {
    PathBuf::from(".dbg_history")
}

/// Local prompt configuration
#[derive(Debug, Deserialize)]
pub struct PromptConfig {
    #[serde(default = "default_prompt")]
    pub text: String,
}

impl Default for PromptConfig {
    fn default() -> Self {
        Self {
            text: default_prompt(),
        }
    }
}

fn default_prompt() -> String {
    "(dbg) ".to_string()
}

/// Remote session server configuration
#[derive(Debug, Clone, Deserialize)]
pub struct RemoteConfig {
    /// Text frame sent once right after the upgrade
    #[serde(default = "default_greeting")]
    pub greeting: String,

    /// Treat any end of the remote connection as fatal to the whole process
    #[serde(default = "default_true")]
    pub fatal_transport_errors: bool,

    /// Free the connection slot when the client goes away, allowing a new one
    #[serde(default)]
    pub release_slot_on_disconnect: bool,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            greeting: default_greeting(),
            fatal_transport_errors: true,
            release_slot_on_disconnect: false,
        }
    }
}

fn default_greeting() -> String {
    "Connected to debugger".to_string()
}

fn default_true() -> bool {
    true
}

impl Config {
    /// Load configuration from the default config file
    ///
    /// Returns default configuration if file doesn't exist
    pub fn load() -> Result<Self> {
        match config_path() {
            Some(path) if path.exists() => Self::load_from(&path),
            _ => Ok(Self::default()),
        }
    }

    /// Load configuration from an explicit file
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| super::Error::FileRead {
            path: path.display().to_string(),
            error: e.to_string(),
        })?;
        Self::parse(&content)
    }

    /// Parse configuration from TOML text
    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| super::Error::ConfigParse(e.to_string()))
    }

    /// Get adapter configuration by name
    ///
    /// Falls back to searching PATH if not explicitly configured
    pub fn get_adapter(&self, name: &str) -> Option<AdapterConfig> {
        if let Some(config) = self.adapters.get(name) {
            return Some(config.clone());
        }

        which::which(name).ok().map(|path| AdapterConfig {
            path,
            args: Vec::new(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = Config::parse("").unwrap();
        assert_eq!(config.defaults.adapter, "lldb-dap");
        assert_eq!(config.history.file, PathBuf::from(".dbg_history"));
        assert_eq!(config.prompt.text, "(dbg) ");
        assert!(config.remote.fatal_transport_errors);
        assert!(!config.remote.release_slot_on_disconnect);
        assert_eq!(config.timeouts.dap_request_secs, 30);
    }

    #[test]
    fn test_remote_and_adapter_sections() {
        let config = Config::parse(
            r#"
[adapters.dlv]
path = "/usr/local/bin/dlv"
args = ["dap"]

[defaults]
adapter = "dlv"

[remote]
greeting = "hello"
fatal_transport_errors = false
release_slot_on_disconnect = true
"#,
        )
        .unwrap();

        let adapter = config.get_adapter("dlv").unwrap();
        assert_eq!(adapter.path, PathBuf::from("/usr/local/bin/dlv"));
        assert_eq!(adapter.args, vec!["dap".to_string()]);
        assert_eq!(config.defaults.adapter, "dlv");
        assert_eq!(config.remote.greeting, "hello");
        assert!(!config.remote.fatal_transport_errors);
        assert!(config.remote.release_slot_on_disconnect);
    }

    #[test]
    fn test_invalid_toml_is_config_parse_error() {
        let err = Config::parse("[remote\ngreeting = 1").unwrap_err();
        assert!(matches!(err, crate::common::Error::ConfigParse(_)));
    }
}
