//! Configuration system for farm.
//!
//! Resolution order: environment variables → config file → defaults.
//!
//! Config file location:
//!   1. $FARM_CONFIG (explicit override)
//!   2. $XDG_CONFIG_HOME/farm/config.toml
//!   3. ~/.config/farm/config.toml

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FarmConfig {
    pub cluster: ClusterConfig,
    pub deployer: DeployerConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterConfig {
    /// Name this node announces as the origin of its messages.
    pub member_name: String,
    /// TCP address the member listener binds to.
    pub listen_addr: String,
    /// Static membership: every other node of the cluster.
    pub peers: Vec<PeerConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeerConfig {
    pub name: String,
    pub addr: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DeployerConfig {
    /// Relative directories below are resolved against this one.
    pub base_dir: PathBuf,
    /// Source of local change events.
    pub watch_dir: PathBuf,
    /// Final resting place of artifacts.
    pub deploy_dir: PathBuf,
    /// Scratch space for in-flight reassembly.
    pub temp_dir: PathBuf,
    /// Where bare deployment descriptors (`<base>.xml`) live.
    pub config_base: PathBuf,
    pub watch_enabled: bool,
    /// The watch check runs once every this-many ticks. Must be positive.
    pub process_deploy_frequency: u32,
    /// Seconds a transfer may stay incomplete before it is pruned. 0 = never.
    pub max_valid_time: u64,
    pub tick_interval_ms: u64,
    /// Archive suffix without the dot.
    pub archive_suffix: String,
}

// ── Defaults ──────────────────────────────────────────────────────────────────

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            member_name: "farm-node".to_string(),
            listen_addr: "0.0.0.0:4050".to_string(),
            peers: Vec::new(),
        }
    }
}

impl Default for DeployerConfig {
    fn default() -> Self {
        Self {
            base_dir: data_dir(),
            watch_dir: PathBuf::from("watch"),
            deploy_dir: PathBuf::from("webapps"),
            temp_dir: PathBuf::from("temp"),
            config_base: PathBuf::from("conf"),
            watch_enabled: false,
            process_deploy_frequency: 2,
            max_valid_time: 5 * 60,
            tick_interval_ms: 10_000,
            archive_suffix: "war".to_string(),
        }
    }
}

impl DeployerConfig {
    /// Update the watch frequency. Non-positive values are rejected and the
    /// prior value is kept; returns whether the value was applied.
    pub fn set_process_deploy_frequency(&mut self, frequency: i64) -> bool {
        if frequency <= 0 {
            return false;
        }
        match u32::try_from(frequency) {
            Ok(f) => {
                self.process_deploy_frequency = f;
                true
            }
            Err(_) => false,
        }
    }

    pub fn watch_dir_path(&self) -> PathBuf {
        resolve_against(&self.base_dir, &self.watch_dir)
    }

    pub fn deploy_dir_path(&self) -> PathBuf {
        resolve_against(&self.base_dir, &self.deploy_dir)
    }

    pub fn temp_dir_path(&self) -> PathBuf {
        resolve_against(&self.base_dir, &self.temp_dir)
    }

    pub fn config_base_path(&self) -> PathBuf {
        resolve_against(&self.base_dir, &self.config_base)
    }
}

/// Resolve `path` against `base` unless it is already absolute, then
/// canonicalize when the target exists.
pub fn resolve_against(base: &Path, path: &Path) -> PathBuf {
    let joined = if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    };
    joined.canonicalize().unwrap_or(joined)
}

// ── Path helpers ──────────────────────────────────────────────────────────────

fn config_dir() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| dirs_or_home().join(".config"))
        .join("farm")
}

pub fn data_dir() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| dirs_or_home().join(".local").join("share"))
        .join("farm")
}

fn dirs_or_home() -> PathBuf {
    std::env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/tmp"))
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {0}: {1}")]
    ReadFailed(PathBuf, std::io::Error),
    #[error("failed to parse {0}: {1}")]
    ParseFailed(PathBuf, toml::de::Error),
    #[error("failed to write {0}: {1}")]
    WriteFailed(PathBuf, std::io::Error),
    #[error("failed to serialize: {0}")]
    SerializeFailed(toml::ser::Error),
}

// ── Loading ───────────────────────────────────────────────────────────────────

impl FarmConfig {
    /// Load config: env vars → file → defaults.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(&Self::file_path())
    }

    /// Load from an explicit path, falling back to defaults when it is absent.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let mut config = if path.exists() {
            let text = std::fs::read_to_string(path)
                .map_err(|e| ConfigError::ReadFailed(path.to_path_buf(), e))?;
            Self::parse(&text).map_err(|e| ConfigError::ParseFailed(path.to_path_buf(), e))?
        } else {
            FarmConfig::default()
        };
        config.apply_env_overrides();
        Ok(config)
    }

    /// Parse TOML text. A zero `process_deploy_frequency` is treated like the
    /// setter treats it: rejected, default kept.
    pub fn parse(text: &str) -> Result<Self, toml::de::Error> {
        let mut config: FarmConfig = toml::from_str(text)?;
        if config.deployer.process_deploy_frequency == 0 {
            config.deployer.process_deploy_frequency =
                DeployerConfig::default().process_deploy_frequency;
        }
        Ok(config)
    }

    /// Config file path.
    pub fn file_path() -> PathBuf {
        std::env::var("FARM_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| config_dir().join("config.toml"))
    }

    /// Write default config if none exists. Returns the path.
    pub fn write_default_if_missing() -> Result<PathBuf, ConfigError> {
        let path = Self::file_path();
        if !path.exists() {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| ConfigError::WriteFailed(path.clone(), e))?;
            }
            let text = toml::to_string_pretty(&FarmConfig::default())
                .map_err(ConfigError::SerializeFailed)?;
            std::fs::write(&path, text).map_err(|e| ConfigError::WriteFailed(path.clone(), e))?;
        }
        Ok(path)
    }

    /// Apply FARM_* env var overrides.
    fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("FARM_CLUSTER__MEMBER_NAME") {
            self.cluster.member_name = v;
        }
        if let Ok(v) = std::env::var("FARM_CLUSTER__LISTEN_ADDR") {
            self.cluster.listen_addr = v;
        }
        if let Ok(v) = std::env::var("FARM_DEPLOYER__WATCH_ENABLED") {
            self.deployer.watch_enabled = v == "true" || v == "1";
        }
        if let Ok(v) = std::env::var("FARM_DEPLOYER__PROCESS_DEPLOY_FREQUENCY") {
            if let Ok(f) = v.parse::<i64>() {
                self.deployer.set_process_deploy_frequency(f);
            }
        }
        if let Ok(v) = std::env::var("FARM_DEPLOYER__MAX_VALID_TIME") {
            if let Ok(secs) = v.parse() {
                self.deployer.max_valid_time = secs;
            }
        }
    }
}
