use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
  #[serde(default)]
  pub api: ApiConfig,
  #[serde(default)]
  pub storage: StorageConfig,
  #[serde(default)]
  pub network: NetworkConfig,
  #[serde(default)]
  pub snapshot: SnapshotConfig,
  #[serde(default)]
  pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
  /// Server root, e.g. http://localhost:3001
  pub base_url: String,
  /// Sent as x-user-id on every request
  pub user_id: String,
  pub request_timeout_secs: u64,
}

impl Default for ApiConfig {
  fn default() -> Self {
    Self {
      base_url: "http://localhost:3001".to_string(),
      user_id: String::new(),
      request_timeout_secs: 30,
    }
  }
}

impl ApiConfig {
  pub fn request_timeout(&self) -> Duration {
    Duration::from_secs(self.request_timeout_secs)
  }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
  /// Database file (defaults to $XDG_DATA_HOME/kcsync/offline.db)
  pub path: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
  pub health_path: String,
  pub probe_interval_secs: u64,
  /// Assume offline until the first successful probe
  pub start_offline: bool,
}

impl Default for NetworkConfig {
  fn default() -> Self {
    Self {
      health_path: "/health".to_string(),
      probe_interval_secs: 15,
      start_offline: false,
    }
  }
}

impl NetworkConfig {
  pub fn probe_interval(&self) -> Duration {
    Duration::from_secs(self.probe_interval_secs.max(1))
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SnapshotConfig {
  /// Snapshots older than this are discarded; 0 keeps them forever
  pub max_age_hours: u64,
  /// Bump to invalidate snapshots written by an older build
  pub buster: String,
}

impl Default for SnapshotConfig {
  fn default() -> Self {
    Self {
      max_age_hours: 24,
      buster: String::new(),
    }
  }
}

impl SnapshotConfig {
  pub fn max_age(&self) -> Option<chrono::Duration> {
    match self.max_age_hours {
      0 => None,
      hours => i64::try_from(hours).ok().map(chrono::Duration::hours),
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
  /// Default filter when RUST_LOG is unset
  pub level: String,
  /// Directory for daily log files; stderr when unset
  pub file: Option<PathBuf>,
}

impl Default for LoggingConfig {
  fn default() -> Self {
    Self {
      level: "info".to_string(),
      file: None,
    }
  }
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./kcsync.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/kcsync/config.yaml
  ///
  /// Without any file, defaults are used.
  pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
    let path = if let Some(p) = explicit_path {
      if p.exists() {
        Some(p.to_path_buf())
      } else {
        return Err(eyre!("Config file not found: {}", p.display()));
      }
    } else {
      Self::find_config_file()
    };

    match path {
      Some(p) => Self::load_from_path(&p),
      None => Ok(Self::default()),
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    // Check current directory
    let local = PathBuf::from("kcsync.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("kcsync").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    Self::parse(&contents)
      .map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))
  }

  fn parse(contents: &str) -> Result<Self, serde_yaml::Error> {
    // An empty document deserializes as null
    if contents.trim().is_empty() {
      return Ok(Self::default());
    }
    serde_yaml::from_str(contents)
  }

  /// Get the access token from environment variables.
  ///
  /// Checks KC_ACCESS_TOKEN first, then KITCHENCOACH_TOKEN as fallback.
  /// Requests are sent without Authorization when neither is set.
  pub fn access_token() -> Option<String> {
    std::env::var("KC_ACCESS_TOKEN")
      .or_else(|_| std::env::var("KITCHENCOACH_TOKEN"))
      .ok()
      .filter(|token| !token.is_empty())
  }
}
