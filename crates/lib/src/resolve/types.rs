//! Types for binary resolution.

use std::fmt;
use std::path::PathBuf;

use regex::Regex;
use thiserror::Error;

use crate::sandbox::{RunnableDependency, SandboxError};
use crate::tree::TreeError;
use crate::util::hash::ContentHash;

/// A check run against each candidate before it is accepted.
#[derive(Debug, Clone, Default)]
pub struct BinaryPathTest {
  pub args: Vec<String>,
  /// Must match somewhere in stdout when set.
  pub pattern: Option<Regex>,
  /// Made available on `PATH` while the test runs.
  pub runnable_dependencies: Vec<RunnableDependency>,
}

impl BinaryPathTest {
  /// A test that accepts any candidate exiting successfully with `args`.
  pub fn new<S: Into<String>>(args: impl IntoIterator<Item = S>) -> Self {
    Self {
      args: args.into_iter().map(Into::into).collect(),
      ..Default::default()
    }
  }

  /// Require stdout to match `pattern`.
  pub fn with_pattern(mut self, pattern: &str) -> Result<Self, regex::Error> {
    self.pattern = Some(Regex::new(pattern)?);
    Ok(self)
  }

  pub fn with_runnable_dependencies(mut self, deps: Vec<RunnableDependency>) -> Self {
    self.runnable_dependencies = deps;
    self
  }
}

/// A request to locate one binary.
///
/// `search_path` is scanned in order and may contain `<PATH>`.
#[derive(Debug, Clone)]
pub struct BinaryPathRequest {
  pub binary_name: String,
  pub search_path: Vec<PathBuf>,
  pub test: Option<BinaryPathTest>,
}

impl BinaryPathRequest {
  pub fn new(binary_name: impl Into<String>, search_path: Vec<PathBuf>) -> Self {
    Self {
      binary_name: binary_name.into(),
      search_path,
      test: None,
    }
  }

  pub fn with_test(mut self, test: BinaryPathTest) -> Self {
    self.test = Some(test);
    self
  }
}

/// An accepted binary on the host.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BinaryPath {
  pub path: PathBuf,
  /// SHA-256 of the file contents.
  pub fingerprint: ContentHash,
}

impl fmt::Display for BinaryPath {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{} ({})", self.path.display(), self.fingerprint.short(12))
  }
}

/// A candidate that was found but failed its test.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rejection {
  pub path: PathBuf,
  pub reason: String,
}

impl fmt::Display for Rejection {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}: {}", self.path.display(), self.reason)
  }
}

/// The outcome of a search: the accepted binaries in search order plus what was looked at.
#[derive(Debug, Clone)]
pub struct BinaryPaths {
  pub binary_name: String,
  pub paths: Vec<BinaryPath>,
  pub searched: Vec<PathBuf>,
  pub rejected: Vec<Rejection>,
}

impl BinaryPaths {
  pub fn first_path(&self) -> Option<&BinaryPath> {
    self.paths.first()
  }

  /// The first accepted binary, or `NoBinaryFound` naming why it was needed.
  pub fn first_path_or_raise(self, rationale: &str) -> Result<BinaryPath, ResolveError> {
    let BinaryPaths {
      binary_name,
      paths,
      searched,
      rejected,
    } = self;
    paths.into_iter().next().ok_or_else(|| ResolveError::NoBinaryFound {
      binary: binary_name,
      rationale: rationale.to_string(),
      searched,
      rejected,
    })
  }
}

/// Errors that can occur while resolving a binary.
#[derive(Debug, Error)]
pub enum ResolveError {
  /// No candidate in any searched directory was accepted.
  #[error(
    "cannot find `{binary}` on the search path, which is needed to {rationale}; searched: [{}]{}",
    display_dirs(.searched),
    display_rejections(.rejected)
  )]
  NoBinaryFound {
    binary: String,
    rationale: String,
    searched: Vec<PathBuf>,
    rejected: Vec<Rejection>,
  },

  /// The build was cancelled while searching.
  #[error("search for `{binary}` was cancelled")]
  Cancelled { binary: String },

  #[error("invalid fingerprint pattern: {0}")]
  InvalidPattern(#[from] regex::Error),

  #[error("failed to prepare fingerprint sandbox: {0}")]
  Sandbox(#[from] SandboxError),

  #[error("failed to materialize fingerprint sandbox: {0}")]
  Tree(#[from] TreeError),

  #[error("io error: {0}")]
  Io(#[from] std::io::Error),
}

fn display_dirs(dirs: &[PathBuf]) -> String {
  dirs
    .iter()
    .map(|dir| dir.display().to_string())
    .collect::<Vec<_>>()
    .join(", ")
}

fn display_rejections(rejected: &[Rejection]) -> String {
  if rejected.is_empty() {
    return String::new();
  }
  let lines: Vec<String> = rejected.iter().map(|r| format!("\n  rejected {}", r)).collect();
  lines.concat()
}
