//! Sandbox construction.
//!
//! A sandbox is the input tree a process runs in plus everything needed to
//! interpret paths inside it. Building one:
//! - resolves the workdir and root output directory against the build root
//! - places execution dependencies at the sandbox root
//! - places each runnable dependency under `_runnable_dependencies/<name>` and
//!   records that directory for the process `PATH`
//! - falls back to output dependencies when no execution dependencies exist
//! - validates output declarations, timeout and environment directives

pub mod env;
pub mod path;

use std::collections::BTreeMap;
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, warn};

use crate::consts::{CHROOT_PLACEHOLDER, DEFAULT_ROOT_OUTPUT_DIR, DEFAULT_TIMEOUT_SECS, DEFAULT_WORKDIR, RUNNABLE_DEPS_DIR};
use crate::tree::{MergeError, Tree, TreeError, merge_trees};

pub use env::{EnvDirective, parse_directives, resolve_env};
pub use path::{resolve_relative_path, resolve_workdir_relative};

/// Errors that can occur while building a sandbox.
#[derive(Debug, Error)]
pub enum SandboxError {
  /// A workdir, output root or output path climbs above the build root.
  #[error("path `{path}` (relative to `{base}`) escapes the build root")]
  PathEscapesBuildRoot { path: String, base: String },

  /// Neither output files nor output directories were declared.
  #[error("at least one of output_files or output_directories must be specified")]
  AmbiguousOutputDeclaration,

  /// Legacy `outputs` was combined with `output_files`/`output_directories`.
  #[error(
    "both new-style output_files/output_directories and old-style outputs were specified; \
     move all values from outputs to output_files or output_directories"
  )]
  MixedOutputDeclaration,

  #[error("invalid output path `{0}`")]
  InvalidOutputPath(String),

  #[error("timeout must be a positive number of seconds, got {0}")]
  InvalidTimeout(u64),

  #[error("invalid environment directive `{0}`: expected KEY or KEY=VALUE")]
  InvalidEnvDirective(String),

  #[error("invalid runnable dependency name `{0}`: must be a single path component")]
  InvalidRunnableName(String),

  #[error("sandbox inputs conflict: {0}")]
  Conflict(#[from] MergeError),

  #[error("tree error: {0}")]
  Tree(#[from] TreeError),
}

/// A dependency that must be reachable on `PATH` under its declared name.
#[derive(Debug, Clone)]
pub struct RunnableDependency {
  pub name: String,
  pub tree: Tree,
}

/// Everything needed to prepare one tool invocation.
///
/// Paths are raw strings; `base_dir` is the build-root-relative directory of
/// the declaring manifest, used to interpret `.`-relative values.
#[derive(Debug, Clone)]
pub struct SandboxSpec {
  pub base_dir: String,
  pub workdir: String,
  pub root_output_directory: String,
  pub output_files: Vec<String>,
  pub output_directories: Vec<String>,
  pub stdout_file: Option<String>,
  pub stderr_file: Option<String>,
  pub timeout_secs: u64,
  pub env: Vec<String>,
  pub log_output: bool,
  pub execution_dependencies: Tree,
  pub output_dependencies: Tree,
  pub runnable_dependencies: Vec<RunnableDependency>,
}

impl Default for SandboxSpec {
  fn default() -> Self {
    Self {
      base_dir: String::new(),
      workdir: DEFAULT_WORKDIR.to_string(),
      root_output_directory: DEFAULT_ROOT_OUTPUT_DIR.to_string(),
      output_files: Vec::new(),
      output_directories: Vec::new(),
      stdout_file: None,
      stderr_file: None,
      timeout_secs: DEFAULT_TIMEOUT_SECS,
      env: Vec::new(),
      log_output: false,
      execution_dependencies: Tree::new(),
      output_dependencies: Tree::new(),
      runnable_dependencies: Vec::new(),
    }
  }
}

/// A prepared sandbox.
///
/// All paths are normalized and relative to the sandbox root, which stands in
/// for the build root. `path_entries` still contain the `{chroot}` placeholder;
/// the executor substitutes the materialized location.
#[derive(Debug, Clone)]
pub struct Sandbox {
  pub tree: Tree,
  pub workdir: String,
  pub root_output_directory: String,
  pub path_entries: Vec<String>,
  pub output_files: Vec<String>,
  pub output_directories: Vec<String>,
  pub stdout_file: Option<String>,
  pub stderr_file: Option<String>,
  pub timeout: Duration,
  pub env: BTreeMap<String, String>,
  pub log_output: bool,
}

/// Build a sandbox, resolving inherited environment variables from this process.
pub fn build_sandbox(spec: SandboxSpec) -> Result<Sandbox, SandboxError> {
  build_sandbox_with_env(spec, |key| std::env::var(key).ok())
}

/// Build a sandbox with an explicit lookup for inherited environment variables.
pub fn build_sandbox_with_env(
  spec: SandboxSpec,
  lookup: impl Fn(&str) -> Option<String>,
) -> Result<Sandbox, SandboxError> {
  if spec.output_files.is_empty() && spec.output_directories.is_empty() {
    return Err(SandboxError::AmbiguousOutputDeclaration);
  }
  if spec.timeout_secs == 0 {
    return Err(SandboxError::InvalidTimeout(spec.timeout_secs));
  }

  let workdir = resolve_relative_path(&spec.workdir, &spec.base_dir)?;
  let root_output_directory = resolve_relative_path(&spec.root_output_directory, &spec.base_dir)?;

  let output_files = resolve_all(&workdir, &spec.output_files)?;
  let output_directories = resolve_all(&workdir, &spec.output_directories)?;
  let stdout_file = spec
    .stdout_file
    .as_deref()
    .map(|file| resolve_workdir_relative(&workdir, file))
    .transpose()?;
  let stderr_file = spec
    .stderr_file
    .as_deref()
    .map(|file| resolve_workdir_relative(&workdir, file))
    .transpose()?;

  let directives = parse_directives(&spec.env)?;
  let env = resolve_env(&directives, lookup);

  let (runnables, path_entries) = compose_runnables(&spec.runnable_dependencies)?;

  let mut inputs: Vec<(String, Tree)> = Vec::new();
  if spec.execution_dependencies.is_empty() {
    if !spec.output_dependencies.is_empty() {
      warn!(
        "materializing output dependencies in the execution sandbox because no execution dependencies \
         were given; this fallback is deprecated, declare execution_dependencies instead"
      );
      inputs.push(("output_dependencies".to_string(), spec.output_dependencies));
    }
  } else {
    inputs.push(("execution_dependencies".to_string(), spec.execution_dependencies));
  }
  inputs.push(("runnable_dependencies".to_string(), runnables));

  let tree = merge_trees(inputs)?;

  debug!(
    workdir = %workdir,
    entries = tree.len(),
    runnables = path_entries.len(),
    "built sandbox"
  );

  Ok(Sandbox {
    tree,
    workdir,
    root_output_directory,
    path_entries,
    output_files,
    output_directories,
    stdout_file,
    stderr_file,
    timeout: Duration::from_secs(spec.timeout_secs),
    env,
    log_output: spec.log_output,
  })
}

/// Place each runnable dependency under its own directory.
///
/// Returns the combined tree and the `{chroot}`-relative `PATH` entries, in
/// declaration order.
pub fn compose_runnables(deps: &[RunnableDependency]) -> Result<(Tree, Vec<String>), SandboxError> {
  let mut placed = Vec::with_capacity(deps.len());
  let mut path_entries = Vec::with_capacity(deps.len());

  for dep in deps {
    if dep.name.is_empty() || dep.name.contains(['/', '\\']) || dep.name == "." || dep.name == ".." {
      return Err(SandboxError::InvalidRunnableName(dep.name.clone()));
    }
    let dir = format!("{}/{}", RUNNABLE_DEPS_DIR, dep.name);
    placed.push((dep.name.clone(), dep.tree.add_prefix(&dir)?));
    path_entries.push(format!("{}/{}", CHROOT_PLACEHOLDER, dir));
  }

  Ok((merge_trees(placed)?, path_entries))
}

/// Split legacy `outputs` into files and directories.
///
/// Entries ending in `/` are directories. Legacy and new-style declarations
/// cannot be mixed.
pub fn split_legacy_outputs(
  outputs: &[String],
  output_files: Vec<String>,
  output_directories: Vec<String>,
) -> Result<(Vec<String>, Vec<String>), SandboxError> {
  if outputs.is_empty() {
    return Ok((output_files, output_directories));
  }
  if !output_files.is_empty() || !output_directories.is_empty() {
    return Err(SandboxError::MixedOutputDeclaration);
  }

  let (dirs, files): (Vec<String>, Vec<String>) = outputs.iter().cloned().partition(|o| o.ends_with('/'));
  Ok((files, dirs))
}

fn resolve_all(workdir: &str, paths: &[String]) -> Result<Vec<String>, SandboxError> {
  paths.iter().map(|p| resolve_workdir_relative(workdir, p)).collect()
}
