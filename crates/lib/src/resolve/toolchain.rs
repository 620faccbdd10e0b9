//! Binary resolution delegated to a toolchain manager such as `rustup`.
//!
//! The manager is itself resolved on the host, then asked where a toolchain
//! keeps a given binary. Answers are memoized per session in a `ToolchainCache`.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use thiserror::Error;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::consts::DEFAULT_TIMEOUT_SECS;
use crate::process::{CacheScope, ProcessRequest, RunOutcome, exit_code, run_bounded};
use crate::resolve::{BinaryPath, BinaryPathRequest, BinaryPathTest, BinaryResolver, ResolveError};

/// Environment variables copied from this process into the manager invocation.
const MANAGER_ENV: &[&str] = &["RUSTUP_HOME", "HOME"];

/// Identifies one toolchain lookup.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ToolchainKey {
  pub manager: PathBuf,
  pub toolchain: String,
  pub binary: String,
}

/// Session-wide memo of toolchain lookups.
///
/// Clones share the same map. The lock is never held across an await.
#[derive(Debug, Clone, Default)]
pub struct ToolchainCache {
  entries: Arc<Mutex<HashMap<ToolchainKey, BinaryPath>>>,
}

impl ToolchainCache {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn get(&self, key: &ToolchainKey) -> Option<BinaryPath> {
    let entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
    entries.get(key).cloned()
  }

  /// Insert `value` unless another lookup already stored one; returns the stored entry.
  pub fn insert(&self, key: ToolchainKey, value: BinaryPath) -> BinaryPath {
    let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
    entries.entry(key).or_insert(value).clone()
  }

  pub fn len(&self) -> usize {
    self.entries.lock().unwrap_or_else(PoisonError::into_inner).len()
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }
}

/// Errors that can occur while asking a toolchain manager for a binary.
#[derive(Debug, Error)]
pub enum ToolchainError {
  #[error(transparent)]
  Resolve(#[from] ResolveError),

  /// The manager exited unsuccessfully.
  #[error("toolchain manager failed to locate `{binary}` for toolchain `{toolchain}` (exit code {exit_code}): {stderr}")]
  ManagerFailure {
    toolchain: String,
    binary: String,
    exit_code: i32,
    stderr: String,
  },

  /// The manager succeeded but did not print a single absolute path.
  #[error("toolchain manager returned unexpected output for `{binary}` in toolchain `{toolchain}`: {output:?}")]
  UnexpectedOutput {
    toolchain: String,
    binary: String,
    output: String,
  },

  #[error("toolchain manager timed out after {}s", .0.as_secs())]
  ManagerTimeout(Duration),

  #[error("toolchain lookup was cancelled")]
  Cancelled,

  #[error("failed to run toolchain manager: {0}")]
  Io(#[from] std::io::Error),
}

/// Resolves binaries through a toolchain manager.
#[derive(Debug, Clone)]
pub struct ToolchainBinaryResolver {
  resolver: BinaryResolver,
  manager_name: String,
  extra_search_paths: Vec<PathBuf>,
  cache: ToolchainCache,
  timeout: Duration,
}

impl ToolchainBinaryResolver {
  pub fn new(resolver: BinaryResolver, cache: ToolchainCache) -> Self {
    Self {
      resolver,
      manager_name: "rustup".to_string(),
      extra_search_paths: Vec::new(),
      cache,
      timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
    }
  }

  pub fn with_manager(mut self, name: impl Into<String>, extra_search_paths: Vec<PathBuf>) -> Self {
    self.manager_name = name.into();
    self.extra_search_paths = extra_search_paths;
    self
  }

  /// Share the caller's cancellation with the manager and every fingerprint test.
  pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
    self.resolver = self.resolver.with_cancel(cancel);
    self
  }

  pub fn cache(&self) -> &ToolchainCache {
    &self.cache
  }

  /// Locate the manager, accepting any candidate that answers `-V` successfully.
  pub async fn resolve_manager(&self) -> Result<BinaryPath, ToolchainError> {
    let request = self
      .resolver
      .request(self.manager_name.clone(), &self.extra_search_paths)
      .with_test(BinaryPathTest::new(["-V"]));
    let rationale = format!("invoke {}", self.manager_name);
    Ok(self.resolver.resolve(&request, &rationale).await?)
  }

  /// Locate `binary` inside `toolchain`.
  pub async fn resolve(&self, toolchain: &str, binary: &str) -> Result<BinaryPath, ToolchainError> {
    let manager = self.resolve_manager().await?;
    let key = ToolchainKey {
      manager: manager.path.clone(),
      toolchain: toolchain.to_string(),
      binary: binary.to_string(),
    };
    if let Some(hit) = self.cache.get(&key) {
      debug!(toolchain, binary, "toolchain cache hit");
      return Ok(hit);
    }

    let reported = self.ask_manager(&manager.path, toolchain, binary).await?;
    let (Some(parent), Some(file_name)) = (reported.parent(), reported.file_name()) else {
      return Err(ToolchainError::UnexpectedOutput {
        toolchain: toolchain.to_string(),
        binary: binary.to_string(),
        output: reported.display().to_string(),
      });
    };

    let request = BinaryPathRequest::new(file_name.to_string_lossy(), vec![parent.to_path_buf()]);
    let rationale = format!("run `{}` from toolchain `{}`", binary, toolchain);
    let found = self.resolver.resolve(&request, &rationale).await?;

    info!(toolchain, binary, path = %found.path.display(), "resolved toolchain binary");
    Ok(self.cache.insert(key, found))
  }

  async fn ask_manager(&self, manager: &Path, toolchain: &str, binary: &str) -> Result<PathBuf, ToolchainError> {
    let mut command = Command::new(manager);
    command
      .arg("which")
      .arg(format!("--toolchain={}", toolchain))
      .arg(binary)
      .env_clear();
    for key in MANAGER_ENV {
      if let Some(value) = std::env::var_os(key) {
        command.env(key, value);
      }
    }

    debug!(manager = %manager.display(), toolchain, binary, "asking toolchain manager");
    let (status, stdout, stderr) = match run_bounded(command, self.timeout, self.resolver.cancel_token()).await? {
      RunOutcome::Exited { status, stdout, stderr } => (status, stdout, stderr),
      RunOutcome::TimedOut { .. } => return Err(ToolchainError::ManagerTimeout(self.timeout)),
      RunOutcome::Cancelled => return Err(ToolchainError::Cancelled),
    };

    if !status.success() {
      return Err(ToolchainError::ManagerFailure {
        toolchain: toolchain.to_string(),
        binary: binary.to_string(),
        exit_code: exit_code(&status),
        stderr: String::from_utf8_lossy(&stderr).trim().to_string(),
      });
    }

    let output = String::from_utf8_lossy(&stdout).trim().to_string();
    let path = PathBuf::from(&output);
    if output.is_empty() || output.contains('\n') || !path.is_absolute() {
      return Err(ToolchainError::UnexpectedOutput {
        toolchain: toolchain.to_string(),
        binary: binary.to_string(),
        output,
      });
    }
    Ok(path)
  }
}

/// A process request for a toolchain binary.
///
/// Results are reusable only on success unless `cache_scope` says otherwise.
pub fn toolchain_process(
  binary: &BinaryPath,
  args: Vec<String>,
  description: impl Into<String>,
  cache_scope: Option<CacheScope>,
) -> ProcessRequest {
  ProcessRequest::new(description, binary.path.clone(), args)
    .with_cache_scope(cache_scope.unwrap_or(CacheScope::OnlyOnSuccess))
}

#[cfg(all(test, unix))]
mod tests {
  use super::*;
  use crate::util::testutil::write_script;
  use std::fs;
  use tempfile::tempdir;

  /// A fake manager that logs each `which` call to `calls.log` and answers
  /// with `answer`.
  fn fake_manager(dir: &Path, answer: &str, which_exit: i32) -> PathBuf {
    let log = dir.join("calls.log");
    let body = format!(
      "case \"$1\" in\n  -V) echo 'fake-manager 1.0' ;;\n  which) echo \"$2 $3\" >> '{}'; echo '{}'; echo 'manager says no' >&2; exit {} ;;\nesac",
      log.display(),
      answer,
      which_exit
    );
    write_script(&dir.join("bin"), "fakeup", &body)
  }

  fn calls(dir: &Path) -> Vec<String> {
    fs::read_to_string(dir.join("calls.log"))
      .unwrap_or_default()
      .lines()
      .map(str::to_string)
      .collect()
  }

  fn toolchain_resolver(dir: &Path) -> ToolchainBinaryResolver {
    let resolver = BinaryResolver::new()
      .with_default_search_paths(vec![])
      .with_ambient_path(false, None);
    ToolchainBinaryResolver::new(resolver, ToolchainCache::new()).with_manager("fakeup", vec![dir.join("bin")])
  }

  #[tokio::test]
  async fn resolves_via_manager_and_caches() {
    let temp = tempdir().unwrap();
    let cargo = write_script(&temp.path().join("toolchains/stable/bin"), "cargo", "echo cargo");
    fake_manager(temp.path(), &cargo.display().to_string(), 0);
    let resolver = toolchain_resolver(temp.path());

    let first = resolver.resolve("stable", "cargo").await.unwrap();
    let second = resolver.resolve("stable", "cargo").await.unwrap();

    assert_eq!(first.path, cargo);
    assert_eq!(first, second);
    assert_eq!(calls(temp.path()), vec!["--toolchain=stable cargo"]);
    assert_eq!(resolver.cache().len(), 1);
  }

  #[tokio::test]
  async fn different_toolchain_is_a_different_key() {
    let temp = tempdir().unwrap();
    let cargo = write_script(&temp.path().join("tc/bin"), "cargo", "echo cargo");
    fake_manager(temp.path(), &cargo.display().to_string(), 0);
    let resolver = toolchain_resolver(temp.path());

    resolver.resolve("stable", "cargo").await.unwrap();
    resolver.resolve("nightly", "cargo").await.unwrap();

    assert_eq!(calls(temp.path()).len(), 2);
    assert_eq!(resolver.cache().len(), 2);
  }

  #[tokio::test]
  async fn manager_failure_carries_stderr() {
    let temp = tempdir().unwrap();
    fake_manager(temp.path(), "", 1);
    let resolver = toolchain_resolver(temp.path());

    let err = resolver.resolve("stable", "cargo").await.unwrap_err();
    match err {
      ToolchainError::ManagerFailure { exit_code, stderr, .. } => {
        assert_eq!(exit_code, 1);
        assert_eq!(stderr, "manager says no");
      }
      other => panic!("unexpected error: {:?}", other),
    }
    assert!(resolver.cache().is_empty());
  }

  #[tokio::test]
  async fn relative_answer_is_unexpected_output() {
    let temp = tempdir().unwrap();
    fake_manager(temp.path(), "not/absolute", 0);
    let resolver = toolchain_resolver(temp.path());

    assert!(matches!(
      resolver.resolve("stable", "cargo").await,
      Err(ToolchainError::UnexpectedOutput { .. })
    ));
  }

  #[tokio::test]
  async fn missing_manager_is_no_binary_found() {
    let temp = tempdir().unwrap();
    let resolver = toolchain_resolver(temp.path());

    let err = resolver.resolve("stable", "cargo").await.unwrap_err();
    assert!(matches!(
      err,
      ToolchainError::Resolve(ResolveError::NoBinaryFound { .. })
    ));
    assert!(err.to_string().contains("invoke fakeup"));
  }

  #[tokio::test]
  async fn cancelling_the_build_stops_the_manager_query() {
    let temp = tempdir().unwrap();
    write_script(
      &temp.path().join("bin"),
      "fakeup",
      "case \"$1\" in\n  -V) echo 'fake-manager 1.0' ;;\n  which) sleep 30 ;;\nesac",
    );
    let cancel = CancellationToken::new();
    let resolver = toolchain_resolver(temp.path()).with_cancel(cancel.clone());
    tokio::spawn(async move {
      tokio::time::sleep(Duration::from_millis(500)).await;
      cancel.cancel();
    });

    let start = std::time::Instant::now();
    let err = resolver.resolve("stable", "cargo").await.unwrap_err();

    assert!(matches!(
      err,
      ToolchainError::Cancelled | ToolchainError::Resolve(ResolveError::Cancelled { .. })
    ));
    assert!(start.elapsed() < Duration::from_secs(10));
    assert!(resolver.cache().is_empty());
  }

  #[test]
  fn first_insert_wins() {
    let cache = ToolchainCache::new();
    let key = ToolchainKey {
      manager: PathBuf::from("/bin/rustup"),
      toolchain: "stable".to_string(),
      binary: "cargo".to_string(),
    };
    let first = BinaryPath {
      path: PathBuf::from("/a/cargo"),
      fingerprint: crate::util::hash::hash_bytes(b"a"),
    };
    let second = BinaryPath {
      path: PathBuf::from("/b/cargo"),
      fingerprint: crate::util::hash::hash_bytes(b"b"),
    };

    assert_eq!(cache.insert(key.clone(), first.clone()), first);
    assert_eq!(cache.insert(key.clone(), second), first);
    assert_eq!(cache.get(&key), Some(first));
  }

  #[test]
  fn toolchain_process_defaults_to_only_on_success() {
    let binary = BinaryPath {
      path: PathBuf::from("/tc/bin/cargo"),
      fingerprint: crate::util::hash::hash_bytes(b"cargo"),
    };
    let request = toolchain_process(&binary, vec!["build".to_string()], "cargo build", None);
    assert_eq!(request.cache_scope, CacheScope::OnlyOnSuccess);
    assert_eq!(request.binary, PathBuf::from("/tc/bin/cargo"));

    let request = toolchain_process(&binary, vec![], "cargo", Some(CacheScope::PerSession));
    assert_eq!(request.cache_scope, CacheScope::PerSession);
  }
}
