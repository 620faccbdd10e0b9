//! `BUILD.json` manifests.
//!
//! A manifest declares named targets in one directory of the build root. The
//! directory is the base for `.`-relative paths in its targets. Targets refer to
//! each other by name; `dependency_order` yields a topological order over those
//! references and rejects unknown names and cycles.

mod eval;
mod shell;
mod types;

use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};

use petgraph::algo::toposort;
use petgraph::graph::{DiGraph, NodeIndex};
use thiserror::Error;
use tracing::debug;

use crate::adhoc::AdhocError;
use crate::resolve::{ResolveError, ToolchainError};
use crate::sandbox::SandboxError;
use crate::tree::{MergeError, TreeError};

pub use eval::{BuildContext, Evaluator};
pub use types::*;

#[derive(Debug, Error)]
pub enum ManifestError {
  #[error("failed to read manifest {path}: {source}")]
  Read {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },

  #[error("failed to parse manifest {path}: {source}")]
  Parse {
    path: PathBuf,
    #[source]
    source: serde_json::Error,
  },

  #[error("manifest {path} is not inside the build root {build_root}")]
  OutsideBuildRoot { path: PathBuf, build_root: PathBuf },

  #[error("target `{0}` is declared more than once")]
  DuplicateTarget(String),

  #[error("unknown target `{name}` referenced by `{referenced_by}`")]
  UnknownTarget { name: String, referenced_by: String },

  #[error("no target named `{0}`")]
  NoSuchTarget(String),

  #[error("dependency cycle detected involving `{0}`")]
  Cycle(String),

  #[error("target `{name}` is a {actual}, expected {expected}")]
  WrongKind {
    name: String,
    expected: &'static str,
    actual: &'static str,
  },

  #[error("`shell_command` target `{0}` has an empty `command`")]
  MissingCommand(String),

  #[error("target `{name}` cannot be run: {reason}")]
  NotRunnable { name: String, reason: String },

  #[error("source `{source_path}` of `{name}` does not exist")]
  MissingSource { name: String, source_path: String },

  #[error("invalid fingerprint pattern for `{name}`: {source}")]
  InvalidPattern {
    name: String,
    #[source]
    source: regex::Error,
  },

  #[error(transparent)]
  Resolve(#[from] ResolveError),

  #[error(transparent)]
  Toolchain(#[from] ToolchainError),

  #[error(transparent)]
  Sandbox(#[from] SandboxError),

  #[error(transparent)]
  Adhoc(#[from] AdhocError),

  #[error("dependencies of `{name}` conflict: {source}")]
  Conflict {
    name: String,
    #[source]
    source: MergeError,
  },

  #[error(transparent)]
  Tree(#[from] TreeError),
}

/// A loaded manifest.
#[derive(Debug, Clone)]
pub struct Manifest {
  path: PathBuf,
  build_root: PathBuf,
  base_dir: String,
  targets: Vec<TargetDef>,
  index: HashMap<String, usize>,
}

impl Manifest {
  /// Load a manifest file that lives somewhere below `build_root`.
  pub fn load(path: &Path, build_root: &Path) -> Result<Self, ManifestError> {
    let content = fs::read_to_string(path).map_err(|source| ManifestError::Read {
      path: path.to_path_buf(),
      source,
    })?;
    let file: BuildFile = serde_json::from_str(&content).map_err(|source| ManifestError::Parse {
      path: path.to_path_buf(),
      source,
    })?;

    let canonical = |p: &Path| {
      dunce::canonicalize(p).map_err(|source| ManifestError::Read {
        path: p.to_path_buf(),
        source,
      })
    };
    let build_root = canonical(build_root)?;
    let manifest_path = canonical(path)?;
    let dir = manifest_path.parent().unwrap_or(&build_root);
    let base_dir = dir
      .strip_prefix(&build_root)
      .map_err(|_| ManifestError::OutsideBuildRoot {
        path: manifest_path.clone(),
        build_root: build_root.clone(),
      })?
      .components()
      .map(|c| c.as_os_str().to_string_lossy())
      .collect::<Vec<_>>()
      .join("/");

    debug!(path = %manifest_path.display(), base_dir = %base_dir, targets = file.targets.len(), "loaded manifest");
    Self::new(file, manifest_path, build_root, base_dir)
  }

  /// Build a manifest from already parsed contents.
  pub fn new(file: BuildFile, path: PathBuf, build_root: PathBuf, base_dir: String) -> Result<Self, ManifestError> {
    let mut index = HashMap::new();
    for (i, target) in file.targets.iter().enumerate() {
      if index.insert(target.name().to_string(), i).is_some() {
        return Err(ManifestError::DuplicateTarget(target.name().to_string()));
      }
    }
    Ok(Self {
      path,
      build_root,
      base_dir,
      targets: file.targets,
      index,
    })
  }

  pub fn path(&self) -> &Path {
    &self.path
  }

  pub fn build_root(&self) -> &Path {
    &self.build_root
  }

  /// Directory of the manifest relative to the build root; empty at the root.
  pub fn base_dir(&self) -> &str {
    &self.base_dir
  }

  pub fn targets(&self) -> &[TargetDef] {
    &self.targets
  }

  pub fn get(&self, name: &str) -> Option<&TargetDef> {
    self.index.get(name).map(|&i| &self.targets[i])
  }

  pub fn target(&self, name: &str) -> Result<&TargetDef, ManifestError> {
    self.get(name).ok_or_else(|| ManifestError::NoSuchTarget(name.to_string()))
  }

  /// Display form of a target name, e.g. `//pkg:gen`.
  pub fn address(&self, name: &str) -> String {
    format!("//{}:{}", self.base_dir, name)
  }

  /// `roots` and everything they depend on, dependencies first.
  pub fn dependency_order(&self, roots: &[&str]) -> Result<Vec<String>, ManifestError> {
    let mut graph: DiGraph<&str, ()> = DiGraph::new();
    let nodes: HashMap<&str, NodeIndex> = self
      .targets
      .iter()
      .map(|target| (target.name(), graph.add_node(target.name())))
      .collect();

    for target in &self.targets {
      let dependent = nodes[target.name()];
      for dep in target.dependencies() {
        let Some(&dep_idx) = nodes.get(dep) else {
          return Err(ManifestError::UnknownTarget {
            name: dep.to_string(),
            referenced_by: target.name().to_string(),
          });
        };
        graph.add_edge(dep_idx, dependent, ());
      }
    }

    let sorted = toposort(&graph, None).map_err(|cycle| ManifestError::Cycle(graph[cycle.node_id()].to_string()))?;

    let mut needed: HashSet<&str> = HashSet::new();
    let mut stack: Vec<&str> = Vec::new();
    for root in roots {
      stack.push(self.target(root)?.name());
    }
    while let Some(name) = stack.pop() {
      if needed.insert(name) {
        stack.extend(self.target(name)?.dependencies());
      }
    }

    Ok(
      sorted
        .into_iter()
        .map(|idx| graph[idx])
        .filter(|name| needed.contains(name))
        .map(str::to_string)
        .collect(),
    )
  }
}
