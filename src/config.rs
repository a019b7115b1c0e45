use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{PipelineError, Result};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ModelConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub base_url: Option<String>,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: default_model(),
            api_key: None,
            base_url: None,
        }
    }
}

fn default_provider() -> String {
    "stub".into()
}

fn default_model() -> String {
    "gemini-2.5-flash".into()
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolsConfig {
    /// Directory that relative `write_to_disk` paths are resolved against.
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
    #[serde(default = "default_market_data_url")]
    pub market_data_url: String,
    #[serde(default = "default_http_timeout")]
    pub http_timeout_secs: u64,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            output_dir: default_output_dir(),
            market_data_url: default_market_data_url(),
            http_timeout_secs: default_http_timeout(),
        }
    }
}

fn default_output_dir() -> PathBuf {
    PathBuf::from(".")
}

fn default_market_data_url() -> String {
    "https://query1.finance.yahoo.com".into()
}

fn default_http_timeout() -> u64 {
    30
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LoggingConfig {
    #[serde(default = "default_log_filter")]
    pub filter: String,
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: default_log_filter(),
            json: false,
        }
    }
}

fn default_log_filter() -> String {
    "info".into()
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct AppConfig {
    #[serde(default)]
    pub model: ModelConfig,
    #[serde(default)]
    pub tools: ToolsConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl AppConfig {
    pub fn from_toml(raw: &str) -> Result<Self> {
        toml::from_str(raw)
            .map_err(|err| PipelineError::Config(format!("Failed to parse configuration: {err}")))
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let raw = fs::read_to_string(path)?;
        Self::from_toml(&raw)
    }

    /// Load `path` if it exists (defaults otherwise) and apply environment overrides.
    pub fn from_env_or_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let mut cfg = if path.exists() {
            Self::from_file(path)?
        } else {
            Self::default()
        };
        cfg.apply_env();
        Ok(cfg)
    }

    pub fn apply_env(&mut self) {
        if let Ok(provider) = env::var("PIPELINES_PROVIDER") {
            self.model.provider = provider;
        }
        if let Ok(model) = env::var("PIPELINES_MODEL") {
            self.model.model = model;
        }
        if let Ok(key) = env::var("PIPELINES_API_KEY") {
            self.model.api_key = Some(key);
        } else if self.model.api_key.is_none() {
            if let Ok(key) = env::var("GEMINI_API_KEY") {
                self.model.api_key = Some(key);
            }
        }
        if let Ok(url) = env::var("PIPELINES_BASE_URL") {
            self.model.base_url = Some(url);
        }
        if let Ok(dir) = env::var("PIPELINES_OUTPUT_DIR") {
            self.tools.output_dir = PathBuf::from(dir);
        }
        if let Ok(url) = env::var("PIPELINES_MARKET_DATA_URL") {
            self.tools.market_data_url = url;
        }
        if let Ok(filter) = env::var("PIPELINES_LOG") {
            self.logging.filter = filter;
        }
        if let Ok(json) = env::var("PIPELINES_LOG_JSON") {
            if let Ok(parsed) = json.parse::<bool>() {
                self.logging.json = parsed;
            }
        }
    }
}
