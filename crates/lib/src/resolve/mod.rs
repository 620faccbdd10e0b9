//! Locating executables on a host whose layout the build does not control.
//!
//! Resolution scans an ordered list of directories. In each one, files named
//! after the binary (per platform naming rules) that are executable become
//! candidates. A configured fingerprint test then runs each candidate; the
//! first one accepted wins.
//!
//! # Search order
//!
//! Explicit extra directories, then the default system directories, then the
//! ambient `PATH` when enabled. Duplicates keep their first position.

pub mod toolchain;
pub mod types;

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace};

use crate::config::RunnerConfig;
use crate::consts::{APP_NAME, CHROOT_PLACEHOLDER, FINGERPRINT_TIMEOUT_SECS, PATH_PLACEHOLDER};
use crate::platform::host_os;
use crate::platform::os::Os;
use crate::platform::paths::{default_search_paths, expand_search_path, is_executable_file};
use crate::process::{RunOutcome, exit_code, run_bounded};
use crate::sandbox::compose_runnables;
use crate::util::hash::hash_file;

pub use toolchain::{ToolchainBinaryResolver, ToolchainCache, ToolchainError, ToolchainKey, toolchain_process};
pub use types::{BinaryPath, BinaryPathRequest, BinaryPathTest, BinaryPaths, Rejection, ResolveError};

/// Finds binaries on the host.
#[derive(Debug, Clone)]
pub struct BinaryResolver {
  os: Os,
  default_search_paths: Vec<PathBuf>,
  search_ambient_path: bool,
  ambient_path: Option<OsString>,
  fingerprint_timeout: Duration,
  cancel: CancellationToken,
}

impl Default for BinaryResolver {
  fn default() -> Self {
    let os = host_os();
    Self {
      os,
      default_search_paths: default_search_paths(os),
      search_ambient_path: false,
      ambient_path: std::env::var_os("PATH"),
      fingerprint_timeout: Duration::from_secs(FINGERPRINT_TIMEOUT_SECS),
      cancel: CancellationToken::new(),
    }
  }
}

impl BinaryResolver {
  pub fn new() -> Self {
    Self::default()
  }

  /// A resolver using the search settings of `config`.
  pub fn from_config(config: &RunnerConfig) -> Self {
    let mut resolver = Self::default();
    resolver.default_search_paths = config.default_search_paths(resolver.os);
    resolver.search_ambient_path = config.search_ambient_path;
    resolver.fingerprint_timeout = config.fingerprint_timeout();
    resolver
  }

  pub fn with_default_search_paths(mut self, paths: Vec<PathBuf>) -> Self {
    self.default_search_paths = paths;
    self
  }

  pub fn with_ambient_path(mut self, search: bool, path: Option<OsString>) -> Self {
    self.search_ambient_path = search;
    self.ambient_path = path;
    self
  }

  pub fn with_fingerprint_timeout(mut self, timeout: Duration) -> Self {
    self.fingerprint_timeout = timeout;
    self
  }

  /// Stop fingerprint tests, and the search, when `cancel` fires.
  pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
    self.cancel = cancel;
    self
  }

  pub fn cancel_token(&self) -> &CancellationToken {
    &self.cancel
  }

  pub fn default_search_paths(&self) -> &[PathBuf] {
    &self.default_search_paths
  }

  /// Build the standard search path: `extra`, defaults, then `<PATH>` if enabled.
  pub fn search_path_with(&self, extra: &[PathBuf]) -> Vec<PathBuf> {
    let mut search_path: Vec<PathBuf> = extra.to_vec();
    search_path.extend(self.default_search_paths.iter().cloned());
    if self.search_ambient_path {
      search_path.push(PathBuf::from(PATH_PLACEHOLDER));
    }
    search_path
  }

  /// A request for `binary_name` using the standard search path.
  pub fn request(&self, binary_name: impl Into<String>, extra: &[PathBuf]) -> BinaryPathRequest {
    BinaryPathRequest::new(binary_name, self.search_path_with(extra))
  }

  /// Resolve a request to its first accepted binary.
  pub async fn resolve(&self, request: &BinaryPathRequest, rationale: &str) -> Result<BinaryPath, ResolveError> {
    let found = self.find(request, true).await?;
    let path = found.first_path_or_raise(rationale)?;
    info!(binary = %request.binary_name, path = %path.path.display(), "resolved binary");
    Ok(path)
  }

  /// Scan the whole search path, collecting every accepted binary in order.
  pub async fn find_all(&self, request: &BinaryPathRequest) -> Result<BinaryPaths, ResolveError> {
    self.find(request, false).await
  }

  async fn find(&self, request: &BinaryPathRequest, stop_at_first: bool) -> Result<BinaryPaths, ResolveError> {
    let searched = expand_search_path(&request.search_path, self.ambient_path.as_deref());
    let names = self.os.executable_names(&request.binary_name);
    let fingerprint_env = match &request.test {
      Some(test) if !test.runnable_dependencies.is_empty() => Some(FingerprintSandbox::prepare(test)?),
      _ => None,
    };

    debug!(binary = %request.binary_name, dirs = searched.len(), "searching for binary");

    let mut paths = Vec::new();
    let mut rejected = Vec::new();

    'dirs: for dir in &searched {
      for name in &names {
        if self.cancel.is_cancelled() {
          return Err(ResolveError::Cancelled {
            binary: request.binary_name.clone(),
          });
        }
        let candidate = dir.join(name);
        if !is_executable_file(&candidate) {
          continue;
        }
        trace!(candidate = %candidate.display(), "found candidate");

        if let Some(test) = &request.test {
          let path_dirs = match &fingerprint_env {
            Some(sandbox) => sandbox.path_dirs.clone(),
            None => Vec::new(),
          };
          if let Err(reason) = self.run_test(&candidate, test, path_dirs).await {
            debug!(candidate = %candidate.display(), reason = %reason, "rejected candidate");
            rejected.push(Rejection { path: candidate, reason });
            continue;
          }
        }

        let fingerprint = match hash_file(&candidate) {
          Ok(fingerprint) => fingerprint,
          Err(e) => {
            debug!(candidate = %candidate.display(), error = %e, "rejected unreadable candidate");
            rejected.push(Rejection {
              path: candidate,
              reason: format!("failed to fingerprint: {}", e),
            });
            continue;
          }
        };
        paths.push(BinaryPath {
          path: candidate,
          fingerprint,
        });
        if stop_at_first {
          break 'dirs;
        }
      }
    }

    if self.cancel.is_cancelled() {
      return Err(ResolveError::Cancelled {
        binary: request.binary_name.clone(),
      });
    }

    Ok(BinaryPaths {
      binary_name: request.binary_name.clone(),
      paths,
      searched,
      rejected,
    })
  }

  /// Run the fingerprint test; `Err` carries the rejection reason.
  async fn run_test(&self, candidate: &Path, test: &BinaryPathTest, mut path_dirs: Vec<PathBuf>) -> Result<(), String> {
    path_dirs.extend(self.default_search_paths.iter().cloned());

    let mut command = Command::new(candidate);
    command.args(&test.args).env_clear();
    if !path_dirs.is_empty()
      && let Ok(path) = std::env::join_paths(&path_dirs)
    {
      command.env("PATH", path);
    }

    let outcome = run_bounded(command, self.fingerprint_timeout, &self.cancel)
      .await
      .map_err(|e| format!("failed to run: {}", e))?;

    let (status, stdout) = match outcome {
      RunOutcome::Exited { status, stdout, .. } => (status, stdout),
      RunOutcome::TimedOut { .. } => {
        return Err(format!(
          "fingerprint test timed out after {}s",
          self.fingerprint_timeout.as_secs()
        ));
      }
      RunOutcome::Cancelled => return Err("fingerprint test was cancelled".to_string()),
    };

    if !status.success() {
      return Err(format!("fingerprint test exited with code {}", exit_code(&status)));
    }
    let Some(pattern) = &test.pattern else {
      return Ok(());
    };
    let stdout = String::from_utf8(stdout).map_err(|_| "fingerprint output was not valid UTF-8".to_string())?;
    if pattern.is_match(&stdout) {
      Ok(())
    } else {
      Err(format!("fingerprint output did not match `{}`", pattern.as_str()))
    }
  }
}

/// Scratch directory holding a fingerprint test's runnable dependencies.
struct FingerprintSandbox {
  _dir: tempfile::TempDir,
  path_dirs: Vec<PathBuf>,
}

impl FingerprintSandbox {
  fn prepare(test: &BinaryPathTest) -> Result<Self, ResolveError> {
    let dir = tempfile::Builder::new()
      .prefix(&format!("{}-fingerprint-", APP_NAME))
      .tempdir()?;
    let root = dunce::canonicalize(dir.path())?;

    let (tree, entries) = compose_runnables(&test.runnable_dependencies)?;
    tree.materialize(&root)?;

    let chroot = root.to_string_lossy();
    let path_dirs = entries
      .iter()
      .map(|entry| PathBuf::from(entry.replace(CHROOT_PLACEHOLDER, &chroot)))
      .collect();
    Ok(Self { _dir: dir, path_dirs })
  }
}
