//! Target declarations read from `BUILD.json`.
//!
//! # Example
//!
//! ```json
//! {
//!   "targets": [
//!     { "type": "files", "name": "schema", "sources": ["schema.json"] },
//!     { "type": "system_binary", "name": "python", "binary_name": "python3",
//!       "fingerprint": "3\\.1[0-9]", "fingerprint_args": ["--version"] },
//!     { "type": "adhoc_tool", "name": "gen", "runnable": "python",
//!       "args": ["gen.py"], "execution_dependencies": ["schema"],
//!       "output_directories": ["out/"], "root_output_directory": "./out" },
//!     { "type": "shell_command", "name": "stamp", "command": "date > stamp.txt",
//!       "tools": ["date"], "output_files": ["stamp.txt"] }
//!   ]
//! }
//! ```

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::consts::{DEFAULT_ROOT_OUTPUT_DIR, DEFAULT_TIMEOUT_SECS, DEFAULT_WORKDIR};
use crate::process::CacheScope;

/// Contents of one manifest file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BuildFile {
  pub targets: Vec<TargetDef>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TargetDef {
  Files(FilesTarget),
  SystemBinary(SystemBinaryTarget),
  ToolchainBinary(ToolchainBinaryTarget),
  AdhocTool(AdhocToolTarget),
  ShellCommand(ShellCommandTarget),
}

impl TargetDef {
  pub fn name(&self) -> &str {
    match self {
      TargetDef::Files(t) => &t.name,
      TargetDef::SystemBinary(t) => &t.name,
      TargetDef::ToolchainBinary(t) => &t.name,
      TargetDef::AdhocTool(t) => &t.name,
      TargetDef::ShellCommand(t) => &t.name,
    }
  }

  /// The `type` tag of this target.
  pub fn kind(&self) -> &'static str {
    match self {
      TargetDef::Files(_) => "files",
      TargetDef::SystemBinary(_) => "system_binary",
      TargetDef::ToolchainBinary(_) => "toolchain_binary",
      TargetDef::AdhocTool(_) => "adhoc_tool",
      TargetDef::ShellCommand(_) => "shell_command",
    }
  }

  /// Names of the targets this one refers to.
  pub fn dependencies(&self) -> Vec<&str> {
    match self {
      TargetDef::Files(_) | TargetDef::ToolchainBinary(_) => Vec::new(),
      TargetDef::SystemBinary(t) => t.fingerprint_dependencies.iter().map(String::as_str).collect(),
      TargetDef::AdhocTool(t) => std::iter::once(t.runnable.as_str())
        .chain(t.execution_dependencies.iter().flatten().map(String::as_str))
        .chain(t.output_dependencies.iter().map(String::as_str))
        .chain(t.runnable_dependencies.iter().map(String::as_str))
        .collect(),
      TargetDef::ShellCommand(t) => t
        .execution_dependencies
        .iter()
        .flatten()
        .chain(&t.output_dependencies)
        .chain(&t.runnable_dependencies)
        .map(String::as_str)
        .collect(),
    }
  }
}

/// Plain files, relative to the manifest's directory. Directories are taken recursively.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilesTarget {
  pub name: String,
  #[serde(default)]
  pub sources: Vec<String>,
}

/// A binary located on the host.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemBinaryTarget {
  pub name: String,
  pub binary_name: String,
  /// Searched before the default search paths.
  #[serde(default)]
  pub extra_search_paths: Vec<PathBuf>,
  /// Regex matched against the fingerprint run's stdout.
  #[serde(default)]
  pub fingerprint: Option<String>,
  #[serde(default)]
  pub fingerprint_args: Vec<String>,
  /// Targets placed on `PATH` while fingerprinting, under their own names.
  #[serde(default)]
  pub fingerprint_dependencies: Vec<String>,
}

/// A binary provided by a toolchain manager.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolchainBinaryTarget {
  pub name: String,
  pub toolchain: String,
  pub binary_name: String,
  #[serde(default = "default_manager")]
  pub manager: String,
  #[serde(default)]
  pub manager_search_paths: Vec<PathBuf>,
}

fn default_manager() -> String {
  "rustup".to_string()
}

/// Runs a runnable target in a sandbox for its outputs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdhocToolTarget {
  pub name: String,
  pub runnable: String,
  #[serde(default)]
  pub args: Vec<String>,
  /// When absent or resolving to nothing, `output_dependencies` are used instead.
  #[serde(default)]
  pub execution_dependencies: Option<Vec<String>>,
  #[serde(default)]
  pub output_dependencies: Vec<String>,
  #[serde(default)]
  pub runnable_dependencies: Vec<String>,
  #[serde(default)]
  pub log_output: bool,
  #[serde(default)]
  pub output_files: Vec<String>,
  #[serde(default)]
  pub output_directories: Vec<String>,
  /// Legacy output list; entries ending in `/` are directories.
  #[serde(default)]
  pub outputs: Vec<String>,
  #[serde(default = "default_timeout")]
  pub timeout: u64,
  #[serde(default)]
  pub extra_env_vars: Vec<String>,
  #[serde(default = "default_workdir")]
  pub workdir: String,
  #[serde(default = "default_root_output_directory")]
  pub root_output_directory: String,
  #[serde(default)]
  pub stdout: Option<String>,
  #[serde(default)]
  pub stderr: Option<String>,
  #[serde(default)]
  pub cache_scope: CacheScope,
}

/// Runs a bash command line in a sandbox for its outputs.
///
/// The command runs as `bash -c <command> <address>`. Host commands it calls
/// must be listed in `tools`; each becomes a shim on `PATH`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShellCommandTarget {
  pub name: String,
  pub command: String,
  /// Bash builtins listed here are ignored.
  #[serde(default)]
  pub tools: Vec<String>,
  #[serde(default)]
  pub execution_dependencies: Option<Vec<String>>,
  #[serde(default)]
  pub output_dependencies: Vec<String>,
  #[serde(default)]
  pub runnable_dependencies: Vec<String>,
  #[serde(default)]
  pub log_output: bool,
  #[serde(default)]
  pub output_files: Vec<String>,
  #[serde(default)]
  pub output_directories: Vec<String>,
  #[serde(default)]
  pub outputs: Vec<String>,
  #[serde(default = "default_timeout")]
  pub timeout: u64,
  #[serde(default)]
  pub extra_env_vars: Vec<String>,
  #[serde(default = "default_workdir")]
  pub workdir: String,
  #[serde(default = "default_root_output_directory")]
  pub root_output_directory: String,
  #[serde(default)]
  pub cache_scope: CacheScope,
}

fn default_timeout() -> u64 {
  DEFAULT_TIMEOUT_SECS
}

fn default_workdir() -> String {
  DEFAULT_WORKDIR.to_string()
}

fn default_root_output_directory() -> String {
  DEFAULT_ROOT_OUTPUT_DIR.to_string()
}
