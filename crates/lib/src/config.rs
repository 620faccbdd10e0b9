//! Runner configuration.
//!
//! Settings come from an optional JSON file in the platform config directory
//! (`~/.config/adhoc/config.json` on Linux) and are then overridden by CLI flags.
//! Every field has a default, so an empty object is a valid file.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::consts::{CODEGEN_DIR, CONFIG_FILE, DIST_DIR, FINGERPRINT_TIMEOUT_SECS};
use crate::platform::os::Os;
use crate::platform::paths::{config_dir, default_search_paths};

#[derive(Debug, Error)]
pub enum ConfigError {
  #[error("failed to read config {path}: {source}")]
  Read {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },

  #[error("failed to parse config {path}: {source}")]
  Parse {
    path: PathBuf,
    #[source]
    source: serde_json::Error,
  },

  #[error("invalid config: {0}")]
  Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RunnerConfig {
  /// Directory all sandbox paths are relative to.
  pub build_root: PathBuf,

  /// Distribution directory, relative to the build root unless absolute.
  pub dist_dir: PathBuf,

  /// Replaces the platform's default binary search directories when set.
  pub search_paths: Option<Vec<PathBuf>>,

  /// Whether the ambient `PATH` is searched after the defaults.
  pub search_ambient_path: bool,

  pub fingerprint_timeout_secs: u64,

  /// Maximum number of codegen producers running at once.
  pub codegen_concurrency: usize,
}

impl Default for RunnerConfig {
  fn default() -> Self {
    Self {
      build_root: PathBuf::from("."),
      dist_dir: PathBuf::from(DIST_DIR),
      search_paths: None,
      search_ambient_path: false,
      fingerprint_timeout_secs: FINGERPRINT_TIMEOUT_SECS,
      codegen_concurrency: num_cpus(),
    }
  }
}

impl RunnerConfig {
  /// Load configuration from `path`.
  pub fn load(path: &Path) -> Result<Self, ConfigError> {
    let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
      path: path.to_path_buf(),
      source,
    })?;
    let config: RunnerConfig = serde_json::from_str(&content).map_err(|source| ConfigError::Parse {
      path: path.to_path_buf(),
      source,
    })?;
    config.validate()?;
    debug!(path = %path.display(), "loaded config");
    Ok(config)
  }

  /// Load the user's config file, or defaults if there is none.
  pub fn load_default() -> Result<Self, ConfigError> {
    match Self::default_path() {
      Some(path) if path.is_file() => Self::load(&path),
      _ => Ok(Self::default()),
    }
  }

  /// Location of the user's config file, if a config directory is known.
  pub fn default_path() -> Option<PathBuf> {
    config_dir().map(|dir| dir.join(CONFIG_FILE))
  }

  pub fn validate(&self) -> Result<(), ConfigError> {
    if self.fingerprint_timeout_secs == 0 {
      return Err(ConfigError::Invalid("fingerprint_timeout_secs must be positive".to_string()));
    }
    if self.codegen_concurrency == 0 {
      return Err(ConfigError::Invalid("codegen_concurrency must be positive".to_string()));
    }
    Ok(())
  }

  pub fn fingerprint_timeout(&self) -> Duration {
    Duration::from_secs(self.fingerprint_timeout_secs)
  }

  /// The configured search paths, or the platform defaults for `os`.
  pub fn default_search_paths(&self, os: Os) -> Vec<PathBuf> {
    self.search_paths.clone().unwrap_or_else(|| default_search_paths(os))
  }

  pub fn dist_path(&self) -> PathBuf {
    if self.dist_dir.is_absolute() {
      self.dist_dir.clone()
    } else {
      self.build_root.join(&self.dist_dir)
    }
  }

  /// Where `export-codegen` writes its merged tree.
  pub fn codegen_path(&self) -> PathBuf {
    self.dist_path().join(CODEGEN_DIR)
  }
}

fn num_cpus() -> usize {
  std::thread::available_parallelism().map(|p| p.get()).unwrap_or(4)
}
