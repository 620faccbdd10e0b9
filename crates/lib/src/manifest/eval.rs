//! Evaluating manifest targets.
//!
//! An `Evaluator` walks a target's dependencies in topological order and
//! memoizes what each one yields: a resolved binary for `system_binary` and
//! `toolchain_binary`, a file tree for `files`, and the adjusted output tree
//! for `adhoc_tool` and `shell_command`.

use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::adhoc::{AdhocProcessResult, AdhocToolRequest, Runnable, run_adhoc_tool};
use crate::codegen::{CodegenInput, CodegenTarget};
use crate::config::RunnerConfig;
use crate::consts::PATH_PLACEHOLDER;
use crate::manifest::shell::{self, MISSING_TOOL_HINT, SHELL};
use crate::manifest::{
  AdhocToolTarget, FilesTarget, Manifest, ManifestError, ShellCommandTarget, SystemBinaryTarget, TargetDef,
  ToolchainBinaryTarget,
};
use crate::resolve::{BinaryPath, BinaryPathRequest, BinaryPathTest, BinaryResolver, ToolchainBinaryResolver, ToolchainCache};
use crate::sandbox::{RunnableDependency, SandboxSpec, split_legacy_outputs};
use crate::tree::{Tree, merge_trees};
use crate::util::path::join_relative;

/// Session-wide state shared by every evaluation.
#[derive(Debug, Clone)]
pub struct BuildContext {
  pub config: RunnerConfig,
  pub resolver: BinaryResolver,
  pub toolchains: ToolchainCache,
  pub cancel: CancellationToken,
}

impl BuildContext {
  pub fn new(config: RunnerConfig, cancel: CancellationToken) -> Self {
    let resolver = BinaryResolver::from_config(&config).with_cancel(cancel.clone());
    Self {
      config,
      resolver,
      toolchains: ToolchainCache::new(),
      cancel,
    }
  }
}

const TOOL_KINDS: &str = "adhoc_tool or shell_command";

pub struct Evaluator<'a> {
  manifest: &'a Manifest,
  ctx: &'a BuildContext,
  binaries: HashMap<String, BinaryPath>,
  /// Host binaries found by name for `shell_command`, not by target.
  host_binaries: HashMap<String, BinaryPath>,
  trees: HashMap<String, Tree>,
  results: HashMap<String, AdhocProcessResult>,
}

/// The sandbox fields `adhoc_tool` and `shell_command` share.
struct ToolFields<'t> {
  name: &'t str,
  execution_dependencies: Option<&'t [String]>,
  output_dependencies: &'t [String],
  runnable_dependencies: &'t [String],
  outputs: &'t [String],
  output_files: &'t [String],
  output_directories: &'t [String],
  workdir: &'t str,
  root_output_directory: &'t str,
  timeout: u64,
  extra_env_vars: &'t [String],
  log_output: bool,
  stdout: Option<&'t str>,
  stderr: Option<&'t str>,
}

impl<'t> From<&'t AdhocToolTarget> for ToolFields<'t> {
  fn from(tool: &'t AdhocToolTarget) -> Self {
    Self {
      name: &tool.name,
      execution_dependencies: tool.execution_dependencies.as_deref(),
      output_dependencies: &tool.output_dependencies,
      runnable_dependencies: &tool.runnable_dependencies,
      outputs: &tool.outputs,
      output_files: &tool.output_files,
      output_directories: &tool.output_directories,
      workdir: &tool.workdir,
      root_output_directory: &tool.root_output_directory,
      timeout: tool.timeout,
      extra_env_vars: &tool.extra_env_vars,
      log_output: tool.log_output,
      stdout: tool.stdout.as_deref(),
      stderr: tool.stderr.as_deref(),
    }
  }
}

impl<'t> From<&'t ShellCommandTarget> for ToolFields<'t> {
  fn from(command: &'t ShellCommandTarget) -> Self {
    Self {
      name: &command.name,
      execution_dependencies: command.execution_dependencies.as_deref(),
      output_dependencies: &command.output_dependencies,
      runnable_dependencies: &command.runnable_dependencies,
      outputs: &command.outputs,
      output_files: &command.output_files,
      output_directories: &command.output_directories,
      workdir: &command.workdir,
      root_output_directory: &command.root_output_directory,
      timeout: command.timeout,
      extra_env_vars: &command.extra_env_vars,
      log_output: command.log_output,
      stdout: None,
      stderr: None,
    }
  }
}

impl<'a> Evaluator<'a> {
  pub fn new(manifest: &'a Manifest, ctx: &'a BuildContext) -> Self {
    Self {
      manifest,
      ctx,
      binaries: HashMap::new(),
      host_binaries: HashMap::new(),
      trees: HashMap::new(),
      results: HashMap::new(),
    }
  }

  /// Resolve a `system_binary` or `toolchain_binary` target.
  pub async fn which(&mut self, name: &str) -> Result<BinaryPath, ManifestError> {
    let target = self.manifest.target(name)?;
    if !matches!(target, TargetDef::SystemBinary(_) | TargetDef::ToolchainBinary(_)) {
      return Err(ManifestError::WrongKind {
        name: name.to_string(),
        expected: "system_binary or toolchain_binary",
        actual: target.kind(),
      });
    }
    self.evaluate_with_dependencies(name).await?;
    self.binary(name)
  }

  /// Run an `adhoc_tool` or `shell_command` target and everything it depends on.
  pub async fn run(&mut self, name: &str) -> Result<AdhocProcessResult, ManifestError> {
    self.expect_tool(name)?;
    self.evaluate_with_dependencies(name).await?;
    self
      .results
      .get(name)
      .cloned()
      .ok_or_else(|| ManifestError::NoSuchTarget(name.to_string()))
  }

  /// Prepare the tool request of an `adhoc_tool` or `shell_command` target without running it.
  ///
  /// Dependencies are evaluated, which runs upstream tool targets.
  pub async fn adhoc_request(&mut self, name: &str) -> Result<AdhocToolRequest, ManifestError> {
    let target = self.expect_tool(name)?;
    for dep in self.manifest.dependency_order(&[name])? {
      if dep != name {
        self.evaluate(&dep).await?;
      }
    }
    self.tool_request(target).await
  }

  /// Every target of the manifest in the form codegen export consumes.
  pub async fn codegen_targets(&mut self) -> Result<Vec<CodegenTarget>, ManifestError> {
    let manifest = self.manifest;
    let mut targets = Vec::new();
    for target in manifest.targets() {
      let input = match target {
        TargetDef::AdhocTool(_) | TargetDef::ShellCommand(_) => {
          CodegenInput::AdhocTool(Box::new(self.adhoc_request(target.name()).await?))
        }
        TargetDef::Files(files) => CodegenInput::Sources(self.files_tree(files)?),
        TargetDef::SystemBinary(_) | TargetDef::ToolchainBinary(_) => continue,
      };
      targets.push(CodegenTarget {
        address: manifest.address(target.name()),
        kind: target.kind().to_string(),
        input,
      });
    }
    Ok(targets)
  }

  fn expect_tool(&self, name: &str) -> Result<&'a TargetDef, ManifestError> {
    match self.manifest.target(name)? {
      target @ (TargetDef::AdhocTool(_) | TargetDef::ShellCommand(_)) => Ok(target),
      other => Err(ManifestError::WrongKind {
        name: name.to_string(),
        expected: TOOL_KINDS,
        actual: other.kind(),
      }),
    }
  }

  async fn evaluate_with_dependencies(&mut self, name: &str) -> Result<(), ManifestError> {
    for dep in self.manifest.dependency_order(&[name])? {
      self.evaluate(&dep).await?;
    }
    Ok(())
  }

  /// Evaluate one target whose dependencies are already evaluated.
  async fn evaluate(&mut self, name: &str) -> Result<(), ManifestError> {
    if self.binaries.contains_key(name) || self.trees.contains_key(name) {
      return Ok(());
    }
    debug!(target = %self.manifest.address(name), "evaluating target");

    match self.manifest.target(name)? {
      TargetDef::Files(files) => {
        let tree = self.files_tree(files)?;
        self.trees.insert(name.to_string(), tree);
      }
      TargetDef::SystemBinary(binary) => {
        let path = self.resolve_system_binary(binary).await?;
        self.binaries.insert(name.to_string(), path);
      }
      TargetDef::ToolchainBinary(binary) => {
        let path = self.resolve_toolchain_binary(binary).await?;
        self.binaries.insert(name.to_string(), path);
      }
      target @ (TargetDef::AdhocTool(_) | TargetDef::ShellCommand(_)) => {
        let request = self.tool_request(target).await?;
        let result = run_adhoc_tool(request, &self.ctx.cancel).await?;
        info!(
          target = %self.manifest.address(name),
          kind = target.kind(),
          outputs = result.adjusted_tree.len(),
          "tool finished"
        );
        self.trees.insert(name.to_string(), result.adjusted_tree.clone());
        self.results.insert(name.to_string(), result);
      }
    }
    Ok(())
  }

  fn files_tree(&self, files: &FilesTarget) -> Result<Tree, ManifestError> {
    let root = self.manifest.build_root();
    let mut tree = Tree::new();
    for source in &files.sources {
      let rel = join_relative(self.manifest.base_dir(), source);
      if !tree.capture_file(root, &rel)? {
        return Err(ManifestError::MissingSource {
          name: files.name.clone(),
          source_path: rel,
        });
      }
    }
    Ok(tree)
  }

  async fn resolve_system_binary(&self, target: &SystemBinaryTarget) -> Result<BinaryPath, ManifestError> {
    let resolver = &self.ctx.resolver;
    let extra: Vec<PathBuf> = target
      .extra_search_paths
      .iter()
      .map(|dir| {
        if dir.is_relative() && dir.as_os_str() != PATH_PLACEHOLDER {
          self.manifest.build_root().join(dir)
        } else {
          dir.clone()
        }
      })
      .collect();
    let mut request: BinaryPathRequest = resolver.request(target.binary_name.clone(), &extra);

    if target.fingerprint.is_some() || !target.fingerprint_args.is_empty() {
      let mut test = BinaryPathTest::new(target.fingerprint_args.clone());
      if let Some(pattern) = &target.fingerprint {
        test = test.with_pattern(pattern).map_err(|source| ManifestError::InvalidPattern {
          name: target.name.clone(),
          source,
        })?;
      }
      let deps = target
        .fingerprint_dependencies
        .iter()
        .map(|dep| self.runnable_dependency(dep))
        .collect::<Result<Vec<_>, _>>()?;
      request = request.with_test(test.with_runnable_dependencies(deps));
    }

    let rationale = format!("satisfy the `system_binary` target `{}`", target.name);
    Ok(resolver.resolve(&request, &rationale).await?)
  }

  async fn resolve_toolchain_binary(&self, target: &ToolchainBinaryTarget) -> Result<BinaryPath, ManifestError> {
    let toolchains = ToolchainBinaryResolver::new(self.ctx.resolver.clone(), self.ctx.toolchains.clone())
      .with_manager(target.manager.clone(), target.manager_search_paths.clone());
    Ok(toolchains.resolve(&target.toolchain, &target.binary_name).await?)
  }

  fn binary(&self, name: &str) -> Result<BinaryPath, ManifestError> {
    self
      .binaries
      .get(name)
      .cloned()
      .ok_or_else(|| ManifestError::NoSuchTarget(name.to_string()))
  }

  fn tree(&self, name: &str) -> Tree {
    self.trees.get(name).cloned().unwrap_or_default()
  }

  /// What a target contributes when placed on `PATH` under its own name.
  fn runnable_dependency(&self, name: &str) -> Result<RunnableDependency, ManifestError> {
    let tree = match self.manifest.target(name)? {
      TargetDef::SystemBinary(_) | TargetDef::ToolchainBinary(_) => binary_shim(name, &self.binary(name)?)?,
      TargetDef::Files(_) | TargetDef::AdhocTool(_) | TargetDef::ShellCommand(_) => self.tree(name),
    };
    Ok(RunnableDependency {
      name: name.to_string(),
      tree,
    })
  }

  fn runnable(&self, name: &str) -> Result<Runnable, ManifestError> {
    match self.manifest.target(name)? {
      TargetDef::SystemBinary(_) | TargetDef::ToolchainBinary(_) => Ok(Runnable::Binary(self.binary(name)?)),
      TargetDef::Files(_) | TargetDef::AdhocTool(_) | TargetDef::ShellCommand(_) => {
        let tree = self.tree(name);
        let mut files = tree.files();
        match (files.next(), files.next()) {
          (Some((path, file)), None) if file.executable => Ok(Runnable::Sandboxed {
            path: path.to_string(),
            tree: tree.clone(),
          }),
          (Some(_), None) => Err(ManifestError::NotRunnable {
            name: name.to_string(),
            reason: "its only file is not executable".to_string(),
          }),
          _ => Err(ManifestError::NotRunnable {
            name: name.to_string(),
            reason: "it must provide exactly one executable file".to_string(),
          }),
        }
      }
    }
  }

  /// Trees of `names` merged; binaries contribute nothing.
  fn dependency_tree(&self, owner: &str, names: &[String]) -> Result<Tree, ManifestError> {
    let trees = names.iter().filter_map(|name| {
      self
        .trees
        .get(name)
        .map(|tree| (self.manifest.address(name), tree.clone()))
    });
    merge_trees(trees).map_err(|source| ManifestError::Conflict {
      name: owner.to_string(),
      source,
    })
  }

  async fn tool_request(&mut self, target: &'a TargetDef) -> Result<AdhocToolRequest, ManifestError> {
    match target {
      TargetDef::AdhocTool(tool) => self.adhoc_tool_request(tool),
      TargetDef::ShellCommand(command) => self.shell_command_request(command).await,
      other => Err(ManifestError::WrongKind {
        name: other.name().to_string(),
        expected: TOOL_KINDS,
        actual: other.kind(),
      }),
    }
  }

  fn adhoc_tool_request(&self, tool: &AdhocToolTarget) -> Result<AdhocToolRequest, ManifestError> {
    Ok(AdhocToolRequest {
      address: self.manifest.address(&tool.name),
      runnable: self.runnable(&tool.runnable)?,
      args: tool.args.clone(),
      sandbox: self.sandbox_spec(ToolFields::from(tool), Vec::new())?,
      cache_scope: tool.cache_scope,
      exit_code_hints: BTreeMap::new(),
    })
  }

  /// `bash -c <command> <address>`, with each external tool shimmed onto `PATH`
  /// ahead of the runnable dependencies.
  async fn shell_command_request(&mut self, command: &ShellCommandTarget) -> Result<AdhocToolRequest, ManifestError> {
    if command.command.trim().is_empty() {
      return Err(ManifestError::MissingCommand(command.name.clone()));
    }
    let address = self.manifest.address(&command.name);
    let rationale = format!("execute the `shell_command` target `{}`", address);

    let bash = self.host_binary(SHELL, &rationale).await?;
    let mut tools = Vec::new();
    for tool in shell::external_tools(&command.tools) {
      let binary = self.host_binary(tool, &rationale).await?;
      tools.push(RunnableDependency {
        name: tool.to_string(),
        tree: binary_shim(tool, &binary)?,
      });
    }
    debug!(target = %address, tools = tools.len(), "resolved shell tools");

    Ok(AdhocToolRequest {
      args: shell::shell_args(&command.command, &address),
      address,
      runnable: Runnable::Binary(bash),
      sandbox: self.sandbox_spec(ToolFields::from(command), tools)?,
      cache_scope: command.cache_scope,
      exit_code_hints: BTreeMap::from([(127, MISSING_TOOL_HINT.to_string())]),
    })
  }

  /// Find `name` on the configured search path, once per evaluator.
  async fn host_binary(&mut self, name: &str, rationale: &str) -> Result<BinaryPath, ManifestError> {
    if let Some(found) = self.host_binaries.get(name) {
      return Ok(found.clone());
    }
    let request = self.ctx.resolver.request(name, &[]);
    let found = self.ctx.resolver.resolve(&request, rationale).await?;
    self.host_binaries.insert(name.to_string(), found.clone());
    Ok(found)
  }

  /// `leading` runnables come before the target's own runnable dependencies.
  fn sandbox_spec(
    &self,
    fields: ToolFields<'_>,
    mut leading: Vec<RunnableDependency>,
  ) -> Result<SandboxSpec, ManifestError> {
    let (output_files, output_directories) = split_legacy_outputs(
      fields.outputs,
      fields.output_files.to_vec(),
      fields.output_directories.to_vec(),
    )?;

    let execution_dependencies = match fields.execution_dependencies {
      Some(deps) => self.dependency_tree(fields.name, deps)?,
      None => Tree::new(),
    };
    let output_dependencies = self.dependency_tree(fields.name, fields.output_dependencies)?;
    for dep in fields.runnable_dependencies {
      leading.push(self.runnable_dependency(dep)?);
    }

    Ok(SandboxSpec {
      base_dir: self.manifest.base_dir().to_string(),
      workdir: fields.workdir.to_string(),
      root_output_directory: fields.root_output_directory.to_string(),
      output_files,
      output_directories,
      stdout_file: fields.stdout.map(str::to_string),
      stderr_file: fields.stderr.map(str::to_string),
      timeout_secs: fields.timeout,
      env: fields.extra_env_vars.to_vec(),
      log_output: fields.log_output,
      execution_dependencies,
      output_dependencies,
      runnable_dependencies: leading,
    })
  }
}

/// A one-file tree holding an executable `name` that forwards to `binary`.
fn binary_shim(name: &str, binary: &BinaryPath) -> Result<Tree, ManifestError> {
  let script = format!(
    "#!/bin/sh\nexec {} \"$@\"\n",
    shell_quote(&binary.path.to_string_lossy())
  );
  let mut tree = Tree::new();
  tree.add_file(name, script.into_bytes(), true)?;
  Ok(tree)
}

fn shell_quote(value: &str) -> String {
  format!("'{}'", value.replace('\'', r"'\''"))
}
