use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

pub const API_KEY_ENV: &str = "HEYGEN_API_KEY";
pub const CONFIG_FILE: &str = "config.yml";

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Config {
    #[serde(default = "default_cache")]
    pub cache_folder: String,

    #[serde(default = "default_output")]
    pub output_folder: String,

    #[serde(default)]
    pub unattended: bool,

    /// Voice list filter, matched as a prefix of the voice language.
    #[serde(default)]
    pub language: Option<String>,

    #[serde(default)]
    pub heygen: HeyGenConfig,

    #[serde(default)]
    pub polling: PollingConfig,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct HeyGenConfig {
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_heygen_base_url")]
    pub base_url: String,
    #[serde(default)]
    pub dimension: Dimension,
    #[serde(default = "default_avatar_style")]
    pub avatar_style: String,
}

impl Default for HeyGenConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            base_url: default_heygen_base_url(),
            dimension: Dimension::default(),
            avatar_style: default_avatar_style(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
pub struct Dimension {
    pub width: u32,
    pub height: u32,
}

impl Default for Dimension {
    fn default() -> Self {
        Self {
            width: 1280,
            height: 720,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct PollingConfig {
    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            interval_ms: default_interval_ms(),
        }
    }
}

fn default_cache() -> String {
    "cache".to_string()
}
fn default_output() -> String {
    "output".to_string()
}
fn default_heygen_base_url() -> String {
    "https://api.heygen.com".to_string()
}
fn default_avatar_style() -> String {
    "normal".to_string()
}
fn default_interval_ms() -> u64 {
    5000
}

impl Default for Config {
    fn default() -> Self {
        Self {
            cache_folder: default_cache(),
            output_folder: default_output(),
            unattended: false,
            language: None,
            heygen: HeyGenConfig::default(),
            polling: PollingConfig::default(),
        }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        Self::load_from(Path::new(CONFIG_FILE))
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            anyhow::bail!("{} not found. Please create one.", path.display());
        }

        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let mut config = Self::parse(&content)
            .with_context(|| format!("Failed to parse {}", path.display()))?;
        config.apply_env();
        Ok(config)
    }

    pub fn parse(content: &str) -> Result<Self> {
        Ok(serde_yaml_ng::from_str(content)?)
    }

    /// Fills the API key from the environment when the file leaves it empty.
    pub fn apply_env(&mut self) {
        if self.heygen.api_key.trim().is_empty() {
            if let Ok(key) = std::env::var(API_KEY_ENV) {
                self.heygen.api_key = key;
            }
        }
    }

    pub fn save(&self) -> Result<()> {
        self.save_to(Path::new(CONFIG_FILE))
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        let content = serde_yaml_ng::to_string(self)?;
        fs::write(path, content).with_context(|| format!("Failed to write {}", path.display()))?;
        Ok(())
    }

    pub fn ensure_directories(&self) -> Result<()> {
        fs::create_dir_all(&self.cache_folder)?;
        fs::create_dir_all(&self.output_folder)?;
        Ok(())
    }
}
