//! Process execution inside a materialized sandbox.
//!
//! `execute_process` writes the request's input tree into a fresh temporary
//! directory, runs the binary from the resolved workdir with a cleared
//! environment, and collects the declared outputs back into a tree.

mod run;
pub mod types;

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::time::Instant;

use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::consts::{APP_NAME, CHROOT_PLACEHOLDER};
use crate::tree::Tree;

pub(crate) use run::{RunOutcome, exit_code, run_bounded};
pub use types::{CacheScope, ExecutionResult, ProcessError, ProcessRequest};

/// Execute a process request.
///
/// The sandbox directory lives only for the duration of the call.
///
/// # Errors
///
/// - `Timeout` with partial output when the timeout elapses
/// - `Cancelled` when `cancel` fires first
/// - `MissingDeclaredOutput` when a declared output is absent, whatever the exit code
pub async fn execute_process(
  request: &ProcessRequest,
  cancel: &CancellationToken,
) -> Result<ExecutionResult, ProcessError> {
  let sandbox_dir = tempfile::Builder::new()
    .prefix(&format!("{}-sandbox-", APP_NAME))
    .tempdir()
    .map_err(|e| ProcessError::io("creating sandbox directory", e))?;
  let root = dunce::canonicalize(sandbox_dir.path()).map_err(|e| ProcessError::io("resolving sandbox directory", e))?;

  request.input_tree.materialize(&root)?;

  let workdir = if request.workdir.is_empty() {
    root.clone()
  } else {
    root.join(&request.workdir)
  };
  tokio::fs::create_dir_all(&workdir)
    .await
    .map_err(|e| ProcessError::io(format!("creating workdir {}", workdir.display()), e))?;

  let chroot = root.to_string_lossy().into_owned();
  let command = build_command(request, &workdir, &chroot)?;

  info!(process = %request.description, binary = %request.binary.display(), "executing process");
  debug!(sandbox = %root.display(), workdir = %request.workdir, args = ?request.args, "spawning process");

  let start = Instant::now();
  let outcome = run_bounded(command, request.timeout, cancel)
    .await
    .map_err(|source| ProcessError::Spawn {
      binary: request.binary.display().to_string(),
      source,
    })?;
  let duration = start.elapsed();

  let (status, stdout, stderr) = match outcome {
    RunOutcome::Exited { status, stdout, stderr } => (status, stdout, stderr),
    RunOutcome::TimedOut { stdout, stderr } => {
      return Err(ProcessError::Timeout {
        description: request.description.clone(),
        timeout: request.timeout,
        stdout,
        stderr,
      });
    }
    RunOutcome::Cancelled => {
      return Err(ProcessError::Cancelled {
        description: request.description.clone(),
      });
    }
  };
  let exit_code = exit_code(&status);

  log_output(request, &stdout, &stderr);

  let mut output_tree = collect_outputs(request, &root, exit_code)?;
  if let Some(path) = &request.stdout_file {
    add_capture(request, &mut output_tree, path, &stdout)?;
  }
  if let Some(path) = &request.stderr_file {
    add_capture(request, &mut output_tree, path, &stderr)?;
  }

  let output_digest = output_tree.digest();
  debug!(
    process = %request.description,
    exit_code,
    outputs = output_tree.len(),
    digest = %output_digest.0.short(12),
    elapsed_ms = duration.as_millis() as u64,
    "process finished"
  );

  Ok(ExecutionResult {
    exit_code,
    stdout,
    stderr,
    output_tree,
    output_digest,
    duration,
    cache_scope: request.cache_scope,
  })
}

/// Replace every `{chroot}` in `value` with the sandbox root.
pub fn substitute_chroot(value: &str, chroot: &str) -> String {
  value.replace(CHROOT_PLACEHOLDER, chroot)
}

fn build_command(request: &ProcessRequest, workdir: &Path, chroot: &str) -> Result<Command, ProcessError> {
  let binary = substitute_chroot(&request.binary.to_string_lossy(), chroot);
  let mut command = Command::new(binary);
  command
    .args(request.args.iter().map(|arg| substitute_chroot(arg, chroot)))
    .current_dir(workdir)
    .env_clear();

  for (key, value) in &request.env {
    if key != "PATH" {
      command.env(key, substitute_chroot(value, chroot));
    }
  }

  if let Some(path) = compose_path(request, chroot)? {
    command.env("PATH", path);
  }
  Ok(command)
}

/// Runnable directories first, then any `PATH` the environment directives set.
fn compose_path(request: &ProcessRequest, chroot: &str) -> Result<Option<OsString>, ProcessError> {
  let mut entries: Vec<PathBuf> = request
    .path_entries
    .iter()
    .map(|entry| PathBuf::from(substitute_chroot(entry, chroot)))
    .collect();
  if let Some(path) = request.env.get("PATH") {
    entries.extend(std::env::split_paths(&substitute_chroot(path, chroot)));
  }
  if entries.is_empty() {
    return Ok(None);
  }

  std::env::join_paths(entries).map(Some).map_err(|e| {
    ProcessError::io(
      "composing PATH",
      std::io::Error::new(std::io::ErrorKind::InvalidInput, e),
    )
  })
}

fn collect_outputs(request: &ProcessRequest, root: &Path, exit_code: i32) -> Result<Tree, ProcessError> {
  let missing = |path: &str| ProcessError::MissingDeclaredOutput {
    description: request.description.clone(),
    path: path.to_string(),
    exit_code,
  };

  let mut tree = Tree::new();
  for file in &request.output_files {
    if !tree.capture_file(root, file)? {
      return Err(missing(file));
    }
  }
  for dir in &request.output_directories {
    if !tree.capture_dir(root, dir)? {
      return Err(missing(dir));
    }
  }
  Ok(tree)
}

fn add_capture(request: &ProcessRequest, tree: &mut Tree, path: &str, content: &[u8]) -> Result<(), ProcessError> {
  if tree.overlaps(path) {
    return Err(ProcessError::CaptureCollision {
      description: request.description.clone(),
      path: path.to_string(),
    });
  }
  tree.add_file(path, content.to_vec(), false)?;
  Ok(())
}

fn log_output(request: &ProcessRequest, stdout: &[u8], stderr: &[u8]) {
  let stdout = String::from_utf8_lossy(stdout);
  let stderr = String::from_utf8_lossy(stderr);
  if request.log_output {
    if !stdout.is_empty() {
      info!(process = %request.description, stdout = %stdout.trim_end(), "process stdout");
    }
    if !stderr.is_empty() {
      info!(process = %request.description, stderr = %stderr.trim_end(), "process stderr");
    }
  } else {
    if !stdout.is_empty() {
      debug!(process = %request.description, stdout = %stdout.trim_end(), "process stdout");
    }
    if !stderr.is_empty() {
      debug!(process = %request.description, stderr = %stderr.trim_end(), "process stderr");
    }
  }
}

#[cfg(all(test, unix))]
mod tests {
  use super::*;
  use crate::util::testutil::{shell_cmd, tree_of};
  use std::time::Duration;

  fn shell_request(script: &str) -> ProcessRequest {
    let (shell, args) = shell_cmd(script);
    let mut request = ProcessRequest::new("test", shell, args);
    request.env.insert("PATH".to_string(), "/usr/bin:/bin".to_string());
    request
  }

  #[tokio::test]
  async fn runs_in_workdir_and_collects_outputs() {
    let mut request = shell_request("pwd > where.txt; mkdir -p gen/sub; echo x > gen/sub/a.txt");
    request.workdir = "pkg".to_string();
    request.output_files = vec!["pkg/where.txt".to_string()];
    request.output_directories = vec!["pkg/gen".to_string()];

    let result = execute_process(&request, &CancellationToken::new()).await.unwrap();

    assert!(result.success());
    assert!(result.output_tree.get("pkg/gen/sub/a.txt").is_some());
    let where_file = match result.output_tree.get("pkg/where.txt") {
      Some(crate::tree::TreeEntry::File(file)) => String::from_utf8_lossy(&file.content).into_owned(),
      other => panic!("expected file, got {:?}", other),
    };
    assert!(where_file.trim_end().ends_with("/pkg"));
  }

  #[tokio::test]
  async fn input_tree_is_visible() {
    let mut request = shell_request("cat input.txt > copy.txt");
    request.input_tree = tree_of(&[("input.txt", "hello")]);
    request.output_files = vec!["copy.txt".to_string()];

    let result = execute_process(&request, &CancellationToken::new()).await.unwrap();
    assert_eq!(
      result.output_tree.get("copy.txt"),
      tree_of(&[("copy.txt", "hello")]).get("copy.txt")
    );
  }

  #[tokio::test]
  async fn missing_output_fails_even_on_success() {
    let mut request = shell_request("true");
    request.output_files = vec!["never.txt".to_string()];

    let err = execute_process(&request, &CancellationToken::new()).await.unwrap_err();
    assert!(matches!(err, ProcessError::MissingDeclaredOutput { ref path, exit_code: 0, .. } if path == "never.txt"));
  }

  #[tokio::test]
  async fn missing_output_reported_with_failing_exit_code() {
    let mut request = shell_request("exit 4");
    request.output_directories = vec!["out".to_string()];

    let err = execute_process(&request, &CancellationToken::new()).await.unwrap_err();
    assert!(matches!(err, ProcessError::MissingDeclaredOutput { exit_code: 4, .. }));
  }

  #[tokio::test]
  async fn stdout_and_stderr_capture_files_land_in_output_tree() {
    let mut request = shell_request("echo out; echo err >&2");
    request.workdir = "w".to_string();
    request.stdout_file = Some("w/stdout.log".to_string());
    request.stderr_file = Some("w/stderr.log".to_string());

    let result = execute_process(&request, &CancellationToken::new()).await.unwrap();

    assert_eq!(result.stdout, b"out\n");
    assert_eq!(result.output_tree.len(), 2);
    assert!(result.output_tree.get("w/stdout.log").is_some());
    assert!(result.output_tree.get("w/stderr.log").is_some());
  }

  #[tokio::test]
  async fn capture_file_colliding_with_declared_output_fails() {
    let mut request = shell_request("echo out; echo mine > log.txt");
    request.output_files = vec!["log.txt".to_string()];
    request.stdout_file = Some("log.txt".to_string());

    let err = execute_process(&request, &CancellationToken::new()).await.unwrap_err();
    assert!(matches!(err, ProcessError::CaptureCollision { ref path, .. } if path == "log.txt"));
  }

  #[tokio::test]
  async fn stdout_and_stderr_sharing_a_capture_file_fails() {
    let mut request = shell_request("echo out; echo err >&2");
    request.stdout_file = Some("both.log".to_string());
    request.stderr_file = Some("both.log".to_string());

    let err = execute_process(&request, &CancellationToken::new()).await.unwrap_err();
    assert!(matches!(err, ProcessError::CaptureCollision { .. }));
  }

  #[tokio::test]
  async fn environment_is_cleared_and_directives_apply() {
    let mut request = shell_request("printf '%s|%s' \"$GREETING\" \"$HOME\"");
    request.env.insert("GREETING".to_string(), "hi".to_string());

    let result = execute_process(&request, &CancellationToken::new()).await.unwrap();
    assert_eq!(result.stdout_lossy(), "hi|");
  }

  #[tokio::test]
  async fn chroot_placeholder_is_substituted() {
    let mut request = shell_request("printf '%s' \"$ROOT\" > root.txt; printf '%s' \"$PATH\" > path.txt");
    request.env.insert("ROOT".to_string(), "{chroot}/sub".to_string());
    request.env.insert("PATH".to_string(), "/usr/bin".to_string());
    request.path_entries = vec!["{chroot}/_runnable_dependencies/tool".to_string()];
    request.output_files = vec!["root.txt".to_string(), "path.txt".to_string()];

    let result = execute_process(&request, &CancellationToken::new()).await.unwrap();

    let read = |path: &str| match result.output_tree.get(path) {
      Some(crate::tree::TreeEntry::File(file)) => String::from_utf8_lossy(&file.content).into_owned(),
      other => panic!("expected file, got {:?}", other),
    };
    let root = read("root.txt");
    assert!(root.ends_with("/sub"));
    assert!(!root.contains("{chroot}"));
    let path = read("path.txt");
    assert!(path.ends_with("/_runnable_dependencies/tool:/usr/bin"));
  }

  #[tokio::test]
  async fn runnable_on_path_is_invoked_by_name() {
    let mut tree = Tree::new();
    tree
      .add_file("_runnable_dependencies/greeter/greet", b"#!/bin/sh\necho greeted\n".to_vec(), true)
      .unwrap();
    let mut request = shell_request("greet");
    request.input_tree = tree;
    request.path_entries = vec!["{chroot}/_runnable_dependencies/greeter".to_string()];

    let result = execute_process(&request, &CancellationToken::new()).await.unwrap();
    assert_eq!(result.stdout_lossy(), "greeted\n");
  }

  #[tokio::test]
  async fn timeout_fails_with_partial_output() {
    let mut request = shell_request("echo partial; sleep 30");
    request.timeout = Duration::from_millis(300);

    let err = execute_process(&request, &CancellationToken::new()).await.unwrap_err();
    match err {
      ProcessError::Timeout { stdout, .. } => assert_eq!(stdout, b"partial\n"),
      other => panic!("unexpected error: {:?}", other),
    }
  }

  #[tokio::test]
  async fn background_process_outliving_timeout_is_a_timeout() {
    let mut request = shell_request("sleep 6 & echo done > out.txt");
    request.output_files = vec!["out.txt".to_string()];
    request.timeout = Duration::from_secs(1);

    let start = std::time::Instant::now();
    let err = execute_process(&request, &CancellationToken::new()).await.unwrap_err();

    assert!(start.elapsed() < Duration::from_secs(5));
    assert!(matches!(err, ProcessError::Timeout { .. }));
  }

  #[tokio::test]
  async fn cancelled_before_start_reports_cancelled() {
    let cancel = CancellationToken::new();
    cancel.cancel();

    let err = execute_process(&shell_request("sleep 30"), &cancel).await.unwrap_err();
    assert!(matches!(err, ProcessError::Cancelled { .. }));
  }

  #[tokio::test]
  async fn cache_scope_is_reported() {
    let request = shell_request("exit 1").with_cache_scope(CacheScope::OnlyOnSuccess);
    let result = execute_process(&request, &CancellationToken::new()).await.unwrap();
    assert_eq!(result.exit_code, 1);
    assert!(!result.may_reuse());
  }
}
