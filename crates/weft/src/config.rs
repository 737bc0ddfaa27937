//! Service configuration.
//!
//! Settings come from an optional TOML file layered under `WEFT_`-prefixed
//! environment variables; every field has a workable default so the service
//! starts with no configuration at all.

use std::fmt;
use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::Deserialize;

use crate::convert::ToolOutputStyle;

/// Hostname suffix of the canonical model provider. Only this provider
/// reliably round-trips native function-call history, which drives the
/// `auto` tool-output mode.
const CANONICAL_PROVIDER_SUFFIX: &str = "openai.com";

const DEFAULT_MODEL: &str = "gpt-5.2";
const DEFAULT_INSTRUCTIONS: &str = "You are an agent powering a workspace with a desktop and python panel.\n\
    Use sandbox_desktop_start to open a desktop when needed, and sandbox_python_run for code.\n\
    Use ui_open_tab to switch panels, ui_notify for status updates.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreMode {
    #[serde(alias = "mem", alias = "inmemory", alias = "in-memory")]
    Memory,
    Sqlite,
}

impl fmt::Display for StoreMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Memory => write!(f, "memory"),
            Self::Sqlite => write!(f, "sqlite"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolOutputMode {
    Auto,
    Function,
    Text,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WeftConfig {
    pub host: String,
    pub port: u16,
    pub store: StoreMode,
    /// Database file for the sqlite store; defaults under the platform
    /// data directory.
    pub sqlite_path: Option<PathBuf>,
    pub upload_dir: Option<PathBuf>,
    pub max_upload_size_mb: usize,
    pub model: String,
    pub instructions: String,
    pub tool_output_mode: ToolOutputMode,
    /// OpenAI-compatible endpoint base; unset means the canonical provider.
    pub api_base_url: Option<String>,
    pub api_key: Option<String>,
    /// Base URL clients can reach this service on, used in attachment
    /// preview/upload URLs.
    pub public_base_url: Option<String>,
    pub allowed_origins: Vec<String>,
}

impl Default for WeftConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8787,
            store: StoreMode::Sqlite,
            sqlite_path: None,
            upload_dir: None,
            max_upload_size_mb: 50,
            model: DEFAULT_MODEL.to_string(),
            instructions: DEFAULT_INSTRUCTIONS.to_string(),
            tool_output_mode: ToolOutputMode::Auto,
            api_base_url: None,
            api_key: None,
            public_base_url: None,
            allowed_origins: vec!["http://localhost:3000".to_string()],
        }
    }
}

impl WeftConfig {
    pub fn load(config_file: Option<&Path>) -> anyhow::Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = config_file {
            builder = builder.add_source(
                config::File::from(path).format(config::FileFormat::Toml),
            );
        }
        let settings = builder
            .add_source(config::Environment::with_prefix("WEFT").separator("__"))
            .build()
            .context("building configuration")?;
        settings
            .try_deserialize()
            .context("deserializing configuration")
    }

    fn data_dir() -> PathBuf {
        dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("weft")
    }

    pub fn sqlite_path(&self) -> PathBuf {
        self.sqlite_path
            .clone()
            .unwrap_or_else(|| Self::data_dir().join("weft.db"))
    }

    pub fn upload_dir(&self) -> PathBuf {
        self.upload_dir
            .clone()
            .unwrap_or_else(|| Self::data_dir().join("uploads"))
    }

    pub fn max_upload_size(&self) -> usize {
        self.max_upload_size_mb * 1024 * 1024
    }

    pub fn public_base_url(&self) -> String {
        self.public_base_url
            .clone()
            .unwrap_or_else(|| format!("http://{}:{}", self.host, self.port))
    }

    /// Resolve the tool-output representation. `auto` picks the native
    /// function-call form only when talking to the canonical provider;
    /// third-party-compatible endpoints get the exchange inlined as text.
    pub fn tool_output_style(&self) -> ToolOutputStyle {
        match self.tool_output_mode {
            ToolOutputMode::Function => ToolOutputStyle::Function,
            ToolOutputMode::Text => ToolOutputStyle::Text,
            ToolOutputMode::Auto => match self.api_base_url.as_deref() {
                None => ToolOutputStyle::Function,
                Some(base_url) => {
                    let host = reqwest::Url::parse(base_url)
                        .ok()
                        .and_then(|url| url.host_str().map(str::to_string))
                        .unwrap_or_default();
                    if host == CANONICAL_PROVIDER_SUFFIX
                        || host.ends_with(&format!(".{CANONICAL_PROVIDER_SUFFIX}"))
                    {
                        ToolOutputStyle::Function
                    } else {
                        ToolOutputStyle::Text
                    }
                }
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_serviceable() {
        let config = WeftConfig::default();
        assert_eq!(config.store, StoreMode::Sqlite);
        assert_eq!(config.max_upload_size(), 50 * 1024 * 1024);
        assert_eq!(config.public_base_url(), "http://127.0.0.1:8787");
    }

    #[test]
    fn auto_mode_resolves_by_endpoint_host() {
        let mut config = WeftConfig::default();
        assert_eq!(config.tool_output_style(), ToolOutputStyle::Function);

        config.api_base_url = Some("https://api.openai.com/v1".to_string());
        assert_eq!(config.tool_output_style(), ToolOutputStyle::Function);

        config.api_base_url = Some("https://llm.example.dev/v1".to_string());
        assert_eq!(config.tool_output_style(), ToolOutputStyle::Text);

        // A host that merely contains the provider name does not count.
        config.api_base_url = Some("https://fakeopenai.com/v1".to_string());
        assert_eq!(config.tool_output_style(), ToolOutputStyle::Text);
    }

    #[test]
    fn explicit_mode_overrides_host_detection() {
        let mut config = WeftConfig {
            tool_output_mode: ToolOutputMode::Text,
            ..Default::default()
        };
        assert_eq!(config.tool_output_style(), ToolOutputStyle::Text);

        config.tool_output_mode = ToolOutputMode::Function;
        config.api_base_url = Some("https://llm.example.dev/v1".to_string());
        assert_eq!(config.tool_output_style(), ToolOutputStyle::Function);
    }
}
