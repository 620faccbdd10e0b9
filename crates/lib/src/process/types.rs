//! Types for process execution.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::consts::DEFAULT_TIMEOUT_SECS;
use crate::sandbox::Sandbox;
use crate::tree::{Tree, TreeDigest, TreeError};

/// When the result of a process may be reused instead of re-running it.
///
/// The executor only reports the scope; honoring it belongs to the caller's cache.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CacheScope {
  /// Reuse regardless of exit code.
  Always,
  /// Reuse only results with exit code 0.
  #[default]
  #[serde(alias = "successful")]
  OnlyOnSuccess,
  /// Reuse within the current session only, never persisted.
  PerSession,
}

impl CacheScope {
  /// Whether a result with `exit_code` may be reused under this scope.
  pub fn may_reuse(&self, exit_code: i32) -> bool {
    match self {
      CacheScope::Always | CacheScope::PerSession => true,
      CacheScope::OnlyOnSuccess => exit_code == 0,
    }
  }

  /// Whether a reusable result may outlive the session.
  pub fn is_persistent(&self) -> bool {
    !matches!(self, CacheScope::PerSession)
  }
}

/// A fully prepared process invocation.
///
/// Paths inside the sandbox are relative to the sandbox root. Arguments, env
/// values and `path_entries` may contain `{chroot}`.
#[derive(Debug, Clone)]
pub struct ProcessRequest {
  /// Human-readable summary, used in logs and errors.
  pub description: String,
  pub binary: PathBuf,
  pub args: Vec<String>,
  pub input_tree: Tree,
  pub workdir: String,
  pub env: BTreeMap<String, String>,
  /// Directories prepended to `PATH`, in order.
  pub path_entries: Vec<String>,
  pub output_files: Vec<String>,
  pub output_directories: Vec<String>,
  pub stdout_file: Option<String>,
  pub stderr_file: Option<String>,
  pub timeout: Duration,
  pub log_output: bool,
  pub cache_scope: CacheScope,
}

impl ProcessRequest {
  /// A request with an empty sandbox and default timeout.
  pub fn new(description: impl Into<String>, binary: impl Into<PathBuf>, args: Vec<String>) -> Self {
    Self {
      description: description.into(),
      binary: binary.into(),
      args,
      input_tree: Tree::new(),
      workdir: String::new(),
      env: BTreeMap::new(),
      path_entries: Vec::new(),
      output_files: Vec::new(),
      output_directories: Vec::new(),
      stdout_file: None,
      stderr_file: None,
      timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
      log_output: false,
      cache_scope: CacheScope::default(),
    }
  }

  /// A request that runs `binary` inside a prepared sandbox.
  pub fn in_sandbox(
    description: impl Into<String>,
    binary: impl Into<PathBuf>,
    args: Vec<String>,
    sandbox: Sandbox,
  ) -> Self {
    Self {
      description: description.into(),
      binary: binary.into(),
      args,
      input_tree: sandbox.tree,
      workdir: sandbox.workdir,
      env: sandbox.env,
      path_entries: sandbox.path_entries,
      output_files: sandbox.output_files,
      output_directories: sandbox.output_directories,
      stdout_file: sandbox.stdout_file,
      stderr_file: sandbox.stderr_file,
      timeout: sandbox.timeout,
      log_output: sandbox.log_output,
      cache_scope: CacheScope::default(),
    }
  }

  pub fn with_cache_scope(mut self, cache_scope: CacheScope) -> Self {
    self.cache_scope = cache_scope;
    self
  }
}

/// Result of a process that ran to completion.
#[derive(Debug, Clone)]
pub struct ExecutionResult {
  pub exit_code: i32,
  pub stdout: Vec<u8>,
  pub stderr: Vec<u8>,
  /// Declared outputs plus any capture files, keyed relative to the sandbox root.
  pub output_tree: Tree,
  pub output_digest: TreeDigest,
  pub duration: Duration,
  pub cache_scope: CacheScope,
}

impl ExecutionResult {
  pub fn success(&self) -> bool {
    self.exit_code == 0
  }

  pub fn may_reuse(&self) -> bool {
    self.cache_scope.may_reuse(self.exit_code)
  }

  pub fn stdout_lossy(&self) -> String {
    String::from_utf8_lossy(&self.stdout).into_owned()
  }

  pub fn stderr_lossy(&self) -> String {
    String::from_utf8_lossy(&self.stderr).into_owned()
  }
}

/// Errors that can occur while executing a process.
#[derive(Debug, Error)]
pub enum ProcessError {
  /// The process outlived its timeout and its process group was killed.
  #[error("process `{description}` timed out after {}s", .timeout.as_secs())]
  Timeout {
    description: String,
    timeout: Duration,
    stdout: Vec<u8>,
    stderr: Vec<u8>,
  },

  /// The build was cancelled while the process was running.
  #[error("process `{description}` was cancelled")]
  Cancelled { description: String },

  /// A declared output file or directory was not produced.
  #[error("process `{description}` exited with code {exit_code} but did not produce declared output `{path}`")]
  MissingDeclaredOutput {
    description: String,
    path: String,
    exit_code: i32,
  },

  /// A stdout/stderr capture file lands on a path the process already produced.
  #[error("process `{description}` capture file `{path}` collides with a declared output")]
  CaptureCollision { description: String, path: String },

  #[error("failed to spawn `{binary}`: {source}")]
  Spawn {
    binary: String,
    #[source]
    source: std::io::Error,
  },

  #[error("io error while {context}: {source}")]
  Io {
    context: String,
    #[source]
    source: std::io::Error,
  },

  #[error("sandbox tree error: {0}")]
  Tree(#[from] TreeError),
}

impl ProcessError {
  pub(crate) fn io(context: impl Into<String>, source: std::io::Error) -> Self {
    ProcessError::Io {
      context: context.into(),
      source,
    }
  }
}
