//! Server configuration.

use memshuttle_sdk::EngineConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Default listen address
const DEFAULT_BIND: &str = "127.0.0.1:7420";

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Path the configuration was read from
    #[serde(skip)]
    pub config_path: PathBuf,
    /// Listen address for the REST API
    pub bind: String,
    /// Emit JSON log lines instead of human-readable ones
    pub log_json: bool,
    /// Store, remote client and shuttle settings (`[stm]`, `[ltm]`, `[shuttle]`)
    #[serde(flatten)]
    pub engine: EngineConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            config_path: memshuttle_dir().join("config.toml"),
            bind: DEFAULT_BIND.to_string(),
            log_json: false,
            engine: EngineConfig::default(),
        }
    }
}

/// `$MEMSHUTTLE_DIR`, or `~/.memshuttle`
fn memshuttle_dir() -> PathBuf {
    std::env::var("MEMSHUTTLE_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join(".memshuttle")
        })
}

impl Config {
    /// Load configuration from file or defaults, then apply environment
    /// overrides
    ///
    /// Standard directory structure:
    /// ```text
    /// ~/.memshuttle/
    /// └── config.toml           # Main configuration
    /// ```
    pub fn load() -> anyhow::Result<Self> {
        let path = memshuttle_dir().join("config.toml");
        let mut config = Self::from_path(&path)?;
        config.apply_overrides(|key| std::env::var(key).ok());
        config.engine.validate()?;
        Ok(config)
    }

    /// Read a config file; a missing file yields the defaults
    pub fn from_path(path: &Path) -> anyhow::Result<Self> {
        let mut config = if path.exists() {
            let raw = std::fs::read_to_string(path)?;
            toml::from_str::<Config>(&raw)
                .map_err(|e| anyhow::anyhow!("Invalid config {}: {}", path.display(), e))?
        } else {
            Config::default()
        };
        config.config_path = path.to_path_buf();
        Ok(config)
    }

    /// Apply `MEMSHUTTLE_LTM_URL`, `MEMSHUTTLE_LTM_API_KEY` and
    /// `MEMSHUTTLE_BIND` from `lookup`
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(url) = lookup("MEMSHUTTLE_LTM_URL") {
            self.engine.ltm.base_url = url;
        }
        if let Some(key) = lookup("MEMSHUTTLE_LTM_API_KEY") {
            self.engine.ltm.api_key = Some(key);
        }
        if let Some(bind) = lookup("MEMSHUTTLE_BIND") {
            self.bind = bind;
        }
    }
}
