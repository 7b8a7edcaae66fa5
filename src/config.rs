use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::client::AnalysisModel;

/// Overrides the configured backend address when set.
pub const BACKEND_URL_ENV: &str = "NUTRILENS_BACKEND_URL";

fn default_backend_url() -> String {
    "http://127.0.0.1:5000".to_string()
}

fn default_model_id() -> String {
    AnalysisModel::default().id().to_string()
}

#[derive(Debug, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub backend: BackendConfig,
    #[serde(default)]
    pub window: WindowConfig,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct BackendConfig {
    #[serde(default = "default_backend_url")]
    pub url: String,
    #[serde(default = "default_model_id")]
    pub default_model: String,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct WindowConfig {
    pub width: u32,
    pub height: u32,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            backend: BackendConfig::default(),
            window: WindowConfig::default(),
        }
    }
}

impl Default for BackendConfig {
    fn default() -> Self {
        BackendConfig {
            url: default_backend_url(),
            default_model: default_model_id(),
        }
    }
}

impl Default for WindowConfig {
    fn default() -> Self {
        WindowConfig {
            width: 560,
            height: 800,
        }
    }
}

impl Config {
    pub fn load() -> Self {
        let config_path = Self::get_config_path();

        let mut config = if config_path.exists() {
            Self::read_from(&config_path).unwrap_or_default()
        } else {
            if let Some(parent) = config_path.parent() {
                let _ = fs::create_dir_all(parent);
            }
            Config::default()
        };

        if let Ok(url) = std::env::var(BACKEND_URL_ENV) {
            config.backend.url = url;
        }

        config
    }

    fn read_from(path: &Path) -> Option<Config> {
        match fs::read_to_string(path) {
            Ok(contents) => match toml::from_str(&contents) {
                Ok(config) => Some(config),
                Err(e) => {
                    tracing::warn!("error parsing {}: {e}. Using defaults.", path.display());
                    None
                }
            },
            Err(e) => {
                tracing::warn!("error reading {}: {e}. Using defaults.", path.display());
                None
            }
        }
    }

    /// The model the session starts with; unknown ids fall back to the
    /// nutrition-specialized one.
    pub fn default_model(&self) -> AnalysisModel {
        AnalysisModel::from_id(&self.backend.default_model).unwrap_or_default()
    }

    pub fn get_config_path() -> PathBuf {
        if let Some(home) = std::env::var_os("HOME") {
            PathBuf::from(home).join(".config/nutrilens/config.toml")
        } else {
            PathBuf::from("config.toml")
        }
    }
}
