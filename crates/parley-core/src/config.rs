use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use anyhow::{Result, anyhow};

/// Where the conversation lives.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// History kept on this machine and sent with each message.
    #[default]
    Local,
    /// Server-side sessions; each message carries a session id.
    Server,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(default)]
pub struct Config {
    pub base_url: String,
    pub default_model: Option<String>,
    pub mode: Mode,
    pub persist_history: bool,
    pub request_timeout_secs: u64,
    pub max_attempts: u32,
    pub retry_base_delay_ms: u64,
    pub username: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self::new()
    }
}

impl Config {
    pub const DEFAULT_MODEL: &'static str = "anthropic.claude-3-haiku-20240307-v1:0";

    pub fn new() -> Self {
        Self {
            base_url: "http://localhost:5000".to_string(),
            default_model: None,
            mode: Mode::Local,
            persist_history: true,
            request_timeout_secs: 60,
            max_attempts: 3,
            retry_base_delay_ms: 2000,
            username: None,
        }
    }

    /// Load from the config file, then apply environment overrides.
    pub fn load() -> Result<Self> {
        let config_path = Self::get_config_path()?;

        let mut config = if config_path.exists() {
            Self::parse(&fs::read_to_string(&config_path)?)?
        } else {
            Self::new()
        };

        config.apply_env();
        Ok(config)
    }

    fn parse(content: &str) -> Result<Self> {
        serde_json::from_str(content).map_err(|e| anyhow!("Invalid config file: {}", e))
    }

    pub fn save(&self) -> Result<()> {
        let config_path = Self::get_config_path()?;

        if let Some(parent) = config_path.parent() {
            fs::create_dir_all(parent)?;
        }

        let config_content = serde_json::to_string_pretty(self)?;
        fs::write(&config_path, config_content)?;
        Ok(())
    }

    pub fn save_default_model(model: &str) -> Result<()> {
        let mut config = Self::load().unwrap_or_else(|_| Self::new());
        config.default_model = Some(model.to_string());
        config.save()
    }

    /// Local history is only kept in local mode; server sessions live on the
    /// server.
    pub fn keeps_local_history(&self) -> bool {
        self.persist_history && self.mode == Mode::Local
    }

    pub fn model(&self) -> &str {
        self.default_model.as_deref().unwrap_or(Self::DEFAULT_MODEL)
    }

    /// Password comes from the environment only and is never written to disk.
    pub fn password() -> Option<String> {
        std::env::var("PARLEY_PASSWORD").ok().filter(|p| !p.is_empty())
    }

    fn apply_env(&mut self) {
        if let Ok(url) = std::env::var("PARLEY_BASE_URL") {
            if !url.is_empty() {
                self.base_url = url;
            }
        }
        if let Ok(model) = std::env::var("PARLEY_MODEL") {
            if !model.is_empty() {
                self.default_model = Some(model);
            }
        }
    }

    fn get_config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow!("Could not determine config directory"))?;

        Ok(config_dir.join("parley").join("config.json"))
    }

    /// Directory for local history and logs.
    pub fn data_dir() -> Result<PathBuf> {
        let data_dir = dirs::data_dir()
            .ok_or_else(|| anyhow!("Could not determine data directory"))?;

        Ok(data_dir.join("parley"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_config_fills_defaults() {
        let config: Config =
            serde_json::from_str(r#"{"base_url":"http://chat.local","mode":"server"}"#).unwrap();
        assert_eq!(config.base_url, "http://chat.local");
        assert_eq!(config.mode, Mode::Server);
        assert_eq!(config.max_attempts, 3);
        assert_eq!(config.request_timeout_secs, 60);
        assert!(config.persist_history);
        assert_eq!(config.model(), Config::DEFAULT_MODEL);
    }

    #[test]
    fn test_corrupt_config_is_an_error() {
        let err = Config::parse("{\"base_url\": ").unwrap_err();
        assert!(err.to_string().starts_with("Invalid config file"));
        assert_eq!(Config::parse("{}").unwrap().base_url, Config::new().base_url);
    }

    #[test]
    fn test_server_mode_keeps_no_local_history() {
        let mut config = Config::new();
        assert!(config.keeps_local_history());

        config.mode = Mode::Server;
        assert!(!config.keeps_local_history());

        config.mode = Mode::Local;
        config.persist_history = false;
        assert!(!config.keeps_local_history());
    }
}
