use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

const DEFAULT_CONFIG_PATH: &str = "config.toml";

#[derive(Debug, Deserialize, Clone, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub network: NetworkConfig,
    #[serde(default)]
    pub cmp: CmpConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StorageConfig {
    #[serde(default = "default_inventory_path")]
    pub inventory_path: PathBuf,
    #[serde(default = "default_devid_store_path")]
    pub devid_store_path: PathBuf,
    /// Parent of the scratch directories used for CMP requests
    #[serde(default)]
    pub work_dir: Option<PathBuf>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            inventory_path: default_inventory_path(),
            devid_store_path: default_devid_store_path(),
            work_dir: None,
        }
    }
}

fn default_inventory_path() -> PathBuf {
    PathBuf::from("trustpoint/inventory.json")
}

fn default_devid_store_path() -> PathBuf {
    PathBuf::from("trustpoint/devid_store.json")
}

#[derive(Debug, Deserialize, Clone)]
pub struct NetworkConfig {
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_port")]
    pub default_port: u16,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout_secs(),
            default_port: default_port(),
        }
    }
}

impl NetworkConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

fn default_timeout_secs() -> u64 {
    10
}

fn default_port() -> u16 {
    443
}

#[derive(Debug, Deserialize, Clone)]
pub struct CmpConfig {
    #[serde(default = "default_openssl_binary")]
    pub openssl_binary: PathBuf,
}

impl Default for CmpConfig {
    fn default() -> Self {
        Self {
            openssl_binary: default_openssl_binary(),
        }
    }
}

fn default_openssl_binary() -> PathBuf {
    PathBuf::from("openssl")
}

impl AppConfig {
    /// Load configuration from a TOML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let config_str = fs::read_to_string(path)
            .context(format!("Failed to read config file: {}", path.display()))?;

        let config: AppConfig =
            toml::from_str(&config_str).context("Failed to parse config file")?;

        Ok(config)
    }

    /// Load `config.toml` if present, defaults otherwise
    pub fn load() -> Result<Self> {
        if Path::new(DEFAULT_CONFIG_PATH).exists() {
            Self::from_file(DEFAULT_CONFIG_PATH)
        } else {
            Ok(Self::default())
        }
    }
}
