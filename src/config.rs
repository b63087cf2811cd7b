use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use anyhow::{Result, anyhow, Context};

pub const DEFAULT_MODEL: &str = "gemini-2.5-flash";
pub const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";
pub const DEFAULT_TIMEOUT_SECS: u64 = 120;

/// Environment variables checked for the API key, in order.
pub const API_KEY_VARS: [&str; 2] = ["GEMINI_API_KEY", "API_KEY"];

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
#[serde(default)]
pub struct Config {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_instruction: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_timeout_secs: Option<u64>,
}

impl Config {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn load() -> Result<Self> {
        Self::load_from(&Self::get_config_path()?)
    }

    /// Missing file means defaults; a file that does not parse is an error.
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::new());
        }

        let config_content = fs::read_to_string(path)?;
        let config: Config = serde_json::from_str(&config_content)
            .with_context(|| format!("invalid config file {}", path.display()))?;
        Ok(config)
    }

    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::get_config_path()?)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        // Create config directory if it doesn't exist
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let config_content = serde_json::to_string_pretty(self)?;
        fs::write(path, config_content)?;
        Ok(())
    }

    pub fn get_config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow!("Could not determine config directory"))?;

        Ok(config_dir.join("vision-chat").join("config.json"))
    }

    pub fn model(&self) -> &str {
        non_blank(self.model.as_deref()).unwrap_or(DEFAULT_MODEL)
    }

    pub fn base_url(&self) -> &str {
        non_blank(self.base_url.as_deref()).unwrap_or(DEFAULT_BASE_URL)
    }

    pub fn system_instruction(&self) -> Option<&str> {
        non_blank(self.system_instruction.as_deref())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs.unwrap_or(DEFAULT_TIMEOUT_SECS))
    }

    /// API key from the environment first, then the config file.
    pub fn resolve_api_key(&self) -> Option<String> {
        self.resolve_api_key_with(|name| std::env::var(name).ok())
            .map(|(key, _)| key)
    }

    /// Where the API key comes from: "env", "config", or None
    pub fn key_source(&self) -> Option<&'static str> {
        self.resolve_api_key_with(|name| std::env::var(name).ok())
            .map(|(_, source)| source)
    }

    fn resolve_api_key_with(
        &self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Option<(String, &'static str)> {
        API_KEY_VARS
            .iter()
            .filter_map(|name| lookup(name))
            .find(|value| !value.trim().is_empty())
            .map(|key| (key.trim().to_string(), "env"))
            .or_else(|| {
                non_blank(self.api_key.as_deref()).map(|key| (key.trim().to_string(), "config"))
            })
    }
}

/// Show only the last four characters of a key.
pub fn mask_key(key: &str) -> String {
    let count = key.chars().count();
    if count <= 4 {
        return "*".repeat(count);
    }
    let last_four: String = key.chars().skip(count - 4).collect();
    format!("{}...{}", "*".repeat((count - 4).min(20)), last_four)
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.filter(|v| !v.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn no_env(_: &str) -> Option<String> {
        None
    }

    #[test]
    fn test_defaults() {
        let config = Config::new();
        assert_eq!(config.model(), DEFAULT_MODEL);
        assert_eq!(config.base_url(), DEFAULT_BASE_URL);
        assert_eq!(config.request_timeout(), Duration::from_secs(120));
        assert_eq!(config.system_instruction(), None);
        assert_eq!(config.resolve_api_key_with(no_env), None);
    }

    #[test]
    fn test_env_key_wins_over_config() {
        let config = Config {
            api_key: Some("from-file".to_string()),
            ..Config::new()
        };

        let resolved = config.resolve_api_key_with(|name| match name {
            "API_KEY" => Some("from-env".to_string()),
            _ => None,
        });
        assert_eq!(resolved, Some(("from-env".to_string(), "env")));

        let resolved = config.resolve_api_key_with(|name| match name {
            "GEMINI_API_KEY" => Some("  ".to_string()),
            _ => None,
        });
        assert_eq!(resolved, Some(("from-file".to_string(), "config")));
    }

    #[test]
    fn test_gemini_var_checked_first() {
        let config = Config::new();
        let resolved = config.resolve_api_key_with(|name| Some(format!("{}-value", name)));
        assert_eq!(resolved.unwrap().0, "GEMINI_API_KEY-value");
    }

    #[test]
    fn test_blank_config_values_fall_back() {
        let config = Config {
            api_key: Some(" ".to_string()),
            model: Some("".to_string()),
            ..Config::new()
        };
        assert_eq!(config.resolve_api_key_with(no_env), None);
        assert_eq!(config.model(), DEFAULT_MODEL);
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.json");

        let config = Config {
            api_key: Some("secret".to_string()),
            model: Some("gemini-2.5-pro".to_string()),
            request_timeout_secs: Some(30),
            ..Config::new()
        };
        config.save_to(&path).unwrap();

        let loaded = Config::load_from(&path).unwrap();
        assert_eq!(loaded, config);
        assert_eq!(loaded.request_timeout(), Duration::from_secs(30));
    }

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let loaded = Config::load_from(&dir.path().join("absent.json")).unwrap();
        assert_eq!(loaded, Config::new());
    }

    #[test]
    fn test_malformed_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, "{ not json").unwrap();
        assert!(Config::load_from(&path).is_err());
    }

    #[test]
    fn test_mask_key() {
        assert_eq!(mask_key("abc"), "***");
        assert_eq!(mask_key("AIzaSyExample1234"), "*************...1234");
    }
}
