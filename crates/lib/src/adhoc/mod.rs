//! Ad-hoc tool runner.
//!
//! Glues the pieces together for one tool invocation: prepare the sandbox,
//! run the runnable inside it, fail on a non-zero exit, and re-root the
//! output tree at the requested root output directory.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::consts::CHROOT_PLACEHOLDER;
use crate::process::{CacheScope, ExecutionResult, ProcessError, ProcessRequest, execute_process};
use crate::resolve::BinaryPath;
use crate::sandbox::{SandboxError, SandboxSpec, build_sandbox};
use crate::tree::{MergeError, Tree, TreeError, merge_trees};

/// What to execute.
#[derive(Debug, Clone)]
pub enum Runnable {
  /// A binary resolved on the host.
  Binary(BinaryPath),
  /// A file shipped into the sandbox, at `path` within `tree`.
  Sandboxed { path: String, tree: Tree },
}

impl fmt::Display for Runnable {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Runnable::Binary(binary) => write!(f, "{}", binary.path.display()),
      Runnable::Sandboxed { path, .. } => f.write_str(path),
    }
  }
}

/// One ad-hoc tool invocation.
#[derive(Debug, Clone)]
pub struct AdhocToolRequest {
  /// Name of the declaring target, used in logs and errors.
  pub address: String,
  pub runnable: Runnable,
  pub args: Vec<String>,
  pub sandbox: SandboxSpec,
  pub cache_scope: CacheScope,
  /// Guidance shown on failure, by exit code; overrides `exit_code_hint`.
  pub exit_code_hints: BTreeMap<i32, String>,
}

/// A successful run and its outputs re-rooted at the root output directory.
#[derive(Debug, Clone)]
pub struct AdhocProcessResult {
  pub result: ExecutionResult,
  pub adjusted_tree: Tree,
}

#[derive(Debug, Error)]
pub enum AdhocError {
  #[error("failed to prepare sandbox for `{address}`: {source}")]
  Sandbox {
    address: String,
    #[source]
    source: SandboxError,
  },

  #[error("runnable for `{address}` conflicts with its sandbox: {source}")]
  RunnableConflict {
    address: String,
    #[source]
    source: MergeError,
  },

  #[error(transparent)]
  Process(#[from] ProcessError),

  /// The tool ran but exited non-zero.
  #[error("{}", render_failure(.address, .exit_code, .stdout, .stderr, .hint))]
  ProcessFailed {
    address: String,
    exit_code: i32,
    stdout: String,
    stderr: String,
    hint: Option<String>,
  },

  /// An output landed outside the root output directory.
  #[error("output `{path}` of `{address}` is outside the root output directory `{root}`")]
  OutputOutsideRoot { address: String, path: String, root: String },

  #[error(transparent)]
  Tree(TreeError),
}

/// Extra guidance for well-known exit codes.
pub fn exit_code_hint(exit_code: i32) -> Option<&'static str> {
  match exit_code {
    127 => Some(
      "exit code 127 usually means a command was not found; add the missing tool to `runnable_dependencies` \
       so it is placed on the PATH",
    ),
    126 => Some("exit code 126 usually means a command was found but is not executable"),
    _ => None,
  }
}

fn render_failure(address: &str, exit_code: &i32, stdout: &str, stderr: &str, hint: &Option<String>) -> String {
  let mut message = format!("process for `{}` failed with exit code {}.", address, exit_code);
  if !stdout.is_empty() {
    message.push_str(&format!("\nstdout:\n{}", stdout.trim_end()));
  }
  if !stderr.is_empty() {
    message.push_str(&format!("\nstderr:\n{}", stderr.trim_end()));
  }
  if let Some(hint) = hint {
    message.push_str(&format!("\n\n{}", hint));
  }
  message
}

/// Run one ad-hoc tool request.
pub async fn run_adhoc_tool(
  request: AdhocToolRequest,
  cancel: &CancellationToken,
) -> Result<AdhocProcessResult, AdhocError> {
  let address = request.address.clone();
  let mut sandbox = build_sandbox(request.sandbox).map_err(|source| AdhocError::Sandbox {
    address: address.clone(),
    source,
  })?;
  let root_output_directory = sandbox.root_output_directory.clone();

  let binary = match request.runnable {
    Runnable::Binary(binary) => binary.path,
    Runnable::Sandboxed { path, tree } => {
      let inputs = std::mem::take(&mut sandbox.tree);
      sandbox.tree = merge_trees([("sandbox", inputs), ("runnable", tree)]).map_err(|source| {
        AdhocError::RunnableConflict {
          address: address.clone(),
          source,
        }
      })?;
      PathBuf::from(format!("{}/{}", CHROOT_PLACEHOLDER, path))
    }
  };

  info!(address = %address, runnable = %binary.display(), "running adhoc tool");
  let process = ProcessRequest::in_sandbox(format!("adhoc_tool {}", address), binary, request.args, sandbox)
    .with_cache_scope(request.cache_scope);
  let result = execute_process(&process, cancel).await?;

  if !result.success() {
    let hint = request
      .exit_code_hints
      .get(&result.exit_code)
      .cloned()
      .or_else(|| exit_code_hint(result.exit_code).map(str::to_string));
    return Err(AdhocError::ProcessFailed {
      address,
      exit_code: result.exit_code,
      stdout: result.stdout_lossy(),
      stderr: result.stderr_lossy(),
      hint,
    });
  }

  let adjusted_tree = result
    .output_tree
    .remove_prefix(&root_output_directory)
    .map_err(|e| match e {
      TreeError::OutsidePrefix { path, prefix } => AdhocError::OutputOutsideRoot {
        address: address.clone(),
        path,
        root: prefix,
      },
      other => AdhocError::Tree(other),
    })?;

  Ok(AdhocProcessResult { result, adjusted_tree })
}
