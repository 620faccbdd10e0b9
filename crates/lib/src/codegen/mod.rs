//! Codegen export.
//!
//! Generators are registered in an explicit table of
//! `(input kind, output kind, generator)` rules. Exporting runs every rule whose
//! input kind equals a target's kind, concurrently, merges all produced trees
//! and writes the result to `<dist>/codegen`.

mod adhoc;

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::adhoc::{AdhocError, AdhocToolRequest};
use crate::tree::{MergeError, Tree, TreeError, merge_trees};

pub use adhoc::AdhocToolGenerator;

/// Input handed to a generator.
#[derive(Debug, Clone)]
pub enum CodegenInput {
  /// Plain source files.
  Sources(Tree),
  /// A fully described ad-hoc tool invocation.
  AdhocTool(Box<AdhocToolRequest>),
}

/// A target eligible for codegen, identified by its kind.
#[derive(Debug, Clone)]
pub struct CodegenTarget {
  pub address: String,
  pub kind: String,
  pub input: CodegenInput,
}

/// Produces an output tree from one target.
#[async_trait]
pub trait Generator: Send + Sync {
  fn name(&self) -> &str;

  async fn generate(&self, target: &CodegenTarget, cancel: &CancellationToken) -> Result<Tree, CodegenError>;
}

/// One registered rule.
#[derive(Clone)]
pub struct CodegenRule {
  pub input_kind: String,
  pub output_kind: String,
  pub generator: Arc<dyn Generator>,
}

impl fmt::Debug for CodegenRule {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("CodegenRule")
      .field("input_kind", &self.input_kind)
      .field("output_kind", &self.output_kind)
      .field("generator", &self.generator.name())
      .finish()
  }
}

/// The explicit table of codegen rules.
#[derive(Debug, Clone, Default)]
pub struct CodegenRegistry {
  rules: Vec<CodegenRule>,
}

impl CodegenRegistry {
  pub fn new() -> Self {
    Self::default()
  }

  /// The registry with every built-in generator.
  pub fn builtin() -> Self {
    let mut registry = Self::new();
    registry.register("adhoc_tool", "files", Arc::new(AdhocToolGenerator));
    registry.register("shell_command", "files", Arc::new(AdhocToolGenerator));
    registry
  }

  pub fn register(&mut self, input_kind: impl Into<String>, output_kind: impl Into<String>, generator: Arc<dyn Generator>) {
    self.rules.push(CodegenRule {
      input_kind: input_kind.into(),
      output_kind: output_kind.into(),
      generator,
    });
  }

  /// Rules whose input kind equals `kind`, in registration order.
  pub fn rules_for<'a>(&'a self, kind: &'a str) -> impl Iterator<Item = &'a CodegenRule> + 'a {
    self.rules.iter().filter(move |rule| rule.input_kind == kind)
  }

  /// Every registered input kind, sorted and deduplicated.
  pub fn input_kinds(&self) -> Vec<String> {
    let mut kinds: Vec<String> = self.rules.iter().map(|rule| rule.input_kind.clone()).collect();
    kinds.sort();
    kinds.dedup();
    kinds
  }
}

#[derive(Debug, Error)]
pub enum CodegenError {
  #[error("codegen for `{address}` failed: {source}")]
  Adhoc {
    address: String,
    #[source]
    source: Box<AdhocError>,
  },

  #[error("generator `{generator}` cannot handle `{address}`")]
  UnsupportedInput { generator: String, address: String },

  #[error("generator `{generator}` failed for `{address}`: {message}")]
  Generator {
    generator: String,
    address: String,
    message: String,
  },

  #[error(transparent)]
  Conflict(#[from] MergeError),

  #[error("failed to write codegen output: {0}")]
  Write(#[from] TreeError),

  #[error("codegen task failed: {0}")]
  Task(String),
}

/// What an export did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExportOutcome {
  /// Nothing matched; nothing was written.
  NothingMatched { registered_kinds: Vec<String> },
  Written {
    path: PathBuf,
    files: usize,
    producers: Vec<String>,
  },
}

/// Run all matching generators and write the merged result to `dest`.
///
/// The first failing generator cancels the rest.
pub async fn export_codegen(
  targets: &[CodegenTarget],
  registry: &CodegenRegistry,
  dest: &Path,
  concurrency: usize,
  cancel: &CancellationToken,
) -> Result<ExportOutcome, CodegenError> {
  let mut jobs = Vec::new();
  for target in targets {
    for rule in registry.rules_for(&target.kind) {
      jobs.push((target.clone(), rule.clone()));
    }
  }

  if jobs.is_empty() {
    let registered_kinds = registry.input_kinds();
    warn!(
      "no codegen files/targets matched; all codegen target types: {}",
      registered_kinds.join(", ")
    );
    return Ok(ExportOutcome::NothingMatched { registered_kinds });
  }

  info!(jobs = jobs.len(), "running codegen");

  let cancel = cancel.child_token();
  let semaphore = Arc::new(Semaphore::new(concurrency.max(1)));
  let mut join_set = JoinSet::new();

  for (target, rule) in jobs {
    let semaphore = semaphore.clone();
    let cancel = cancel.clone();

    join_set.spawn(async move {
      let _permit = semaphore
        .acquire_owned()
        .await
        .map_err(|e| CodegenError::Task(e.to_string()))?;
      let producer = format!("{} ({} -> {})", target.address, rule.input_kind, rule.output_kind);
      debug!(producer = %producer, generator = rule.generator.name(), "generating");
      let tree = rule.generator.generate(&target, &cancel).await?;
      Ok::<_, CodegenError>((producer, tree))
    });
  }

  let mut produced = Vec::new();
  while let Some(join_result) = join_set.join_next().await {
    let outcome = match join_result {
      Ok(outcome) => outcome,
      Err(e) => Err(CodegenError::Task(e.to_string())),
    };
    match outcome {
      Ok(entry) => produced.push(entry),
      Err(e) => {
        error!(error = %e, "codegen failed, cancelling remaining generators");
        cancel.cancel();
        join_set.abort_all();
        return Err(e);
      }
    }
  }

  let producers: Vec<String> = produced.iter().map(|(producer, _)| producer.clone()).collect();
  let merged = merge_trees(produced)?;
  if merged.is_empty() {
    warn!("codegen produced no files");
  }
  merged.materialize(dest)?;

  info!(path = %dest.display(), files = merged.len(), "wrote codegen output");
  Ok(ExportOutcome::Written {
    path: dest.to_path_buf(),
    files: merged.len(),
    producers,
  })
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::util::testutil::tree_of;
  use std::time::Duration;
  use tempfile::tempdir;

  /// Prefixes every source with a header.
  struct Header;

  #[async_trait]
  impl Generator for Header {
    fn name(&self) -> &str {
      "header"
    }

    async fn generate(&self, target: &CodegenTarget, _cancel: &CancellationToken) -> Result<Tree, CodegenError> {
      let CodegenInput::Sources(sources) = &target.input else {
        return Err(CodegenError::UnsupportedInput {
          generator: self.name().to_string(),
          address: target.address.clone(),
        });
      };
      let mut out = Tree::new();
      for (path, file) in sources.files() {
        let mut content = b"// generated\n".to_vec();
        content.extend_from_slice(&file.content);
        out.add_file(&format!("gen/{}", path), content, false)?;
      }
      Ok(out)
    }
  }

  /// Writes the same path with target-specific content.
  struct Clobber;

  #[async_trait]
  impl Generator for Clobber {
    fn name(&self) -> &str {
      "clobber"
    }

    async fn generate(&self, target: &CodegenTarget, _cancel: &CancellationToken) -> Result<Tree, CodegenError> {
      Ok(tree_of(&[("gen/shared.rs", target.address.as_str())]))
    }
  }

  /// Fails immediately.
  struct Broken;

  #[async_trait]
  impl Generator for Broken {
    fn name(&self) -> &str {
      "broken"
    }

    async fn generate(&self, target: &CodegenTarget, _cancel: &CancellationToken) -> Result<Tree, CodegenError> {
      Err(CodegenError::Generator {
        generator: self.name().to_string(),
        address: target.address.clone(),
        message: "boom".to_string(),
      })
    }
  }

  /// Waits until cancelled.
  struct Slow;

  #[async_trait]
  impl Generator for Slow {
    fn name(&self) -> &str {
      "slow"
    }

    async fn generate(&self, _target: &CodegenTarget, cancel: &CancellationToken) -> Result<Tree, CodegenError> {
      tokio::select! {
        _ = cancel.cancelled() => Ok(Tree::new()),
        _ = tokio::time::sleep(Duration::from_secs(30)) => Ok(tree_of(&[("late.txt", "late")])),
      }
    }
  }

  fn target(address: &str, kind: &str, files: &[(&str, &str)]) -> CodegenTarget {
    CodegenTarget {
      address: address.to_string(),
      kind: kind.to_string(),
      input: CodegenInput::Sources(tree_of(files)),
    }
  }

  #[tokio::test]
  async fn merges_outputs_of_all_matching_targets() {
    let mut registry = CodegenRegistry::new();
    registry.register("proto", "rust", Arc::new(Header));
    let dist = tempdir().unwrap();
    let dest = dist.path().join("codegen");

    let targets = vec![
      target("//a:proto", "proto", &[("a.proto", "message A {}")]),
      target("//b:proto", "proto", &[("b.proto", "message B {}")]),
      target("//c:lib", "rust_library", &[("lib.rs", "")]),
    ];
    let outcome = export_codegen(&targets, &registry, &dest, 2, &CancellationToken::new())
      .await
      .unwrap();

    match outcome {
      ExportOutcome::Written { files, producers, .. } => {
        assert_eq!(files, 2);
        assert_eq!(producers.len(), 2);
      }
      other => panic!("unexpected outcome: {:?}", other),
    }
    let written = std::fs::read_to_string(dest.join("gen/a.proto")).unwrap();
    assert_eq!(written, "// generated\nmessage A {}");
    assert!(!dest.join("gen/lib.rs").exists());
  }

  #[tokio::test]
  async fn nothing_matched_lists_registered_kinds() {
    let mut registry = CodegenRegistry::new();
    registry.register("proto", "rust", Arc::new(Header));
    registry.register("avro", "java", Arc::new(Header));
    registry.register("proto", "python", Arc::new(Header));
    let dist = tempdir().unwrap();
    let dest = dist.path().join("codegen");

    let outcome = export_codegen(
      &[target("//c:lib", "rust_library", &[("lib.rs", "")])],
      &registry,
      &dest,
      1,
      &CancellationToken::new(),
    )
    .await
    .unwrap();

    assert_eq!(
      outcome,
      ExportOutcome::NothingMatched {
        registered_kinds: vec!["avro".to_string(), "proto".to_string()]
      }
    );
    assert!(!dest.exists());
  }

  #[tokio::test]
  async fn conflicting_outputs_fail() {
    let mut registry = CodegenRegistry::new();
    registry.register("proto", "rust", Arc::new(Clobber));
    let dist = tempdir().unwrap();
    let dest = dist.path().join("codegen");

    let targets = vec![target("//a", "proto", &[]), target("//b", "proto", &[])];
    let err = export_codegen(&targets, &registry, &dest, 4, &CancellationToken::new())
      .await
      .unwrap_err();

    assert!(matches!(err, CodegenError::Conflict(MergeError::ConflictingOutput { ref path, .. }) if path == "gen/shared.rs"));
    assert!(!dest.exists());
  }

  #[tokio::test]
  async fn first_failure_cancels_the_rest() {
    let mut registry = CodegenRegistry::new();
    registry.register("slow", "files", Arc::new(Slow));
    registry.register("broken", "files", Arc::new(Broken));
    let dist = tempdir().unwrap();

    let targets = vec![target("//slow", "slow", &[]), target("//broken", "broken", &[])];
    let start = std::time::Instant::now();
    let err = export_codegen(&targets, &registry, dist.path(), 4, &CancellationToken::new())
      .await
      .unwrap_err();

    assert!(matches!(err, CodegenError::Generator { ref address, .. } if address == "//broken"));
    assert!(start.elapsed() < Duration::from_secs(10));
  }

  #[tokio::test]
  async fn one_target_may_match_several_rules() {
    let mut registry = CodegenRegistry::new();
    registry.register("proto", "rust", Arc::new(Header));
    registry.register("proto", "marker", Arc::new(Clobber));
    let dist = tempdir().unwrap();

    let outcome = export_codegen(
      &[target("//a", "proto", &[("a.proto", "x")])],
      &registry,
      dist.path(),
      1,
      &CancellationToken::new(),
    )
    .await
    .unwrap();
    assert!(matches!(outcome, ExportOutcome::Written { files: 2, .. }));
  }

  #[test]
  fn builtin_registry_handles_tool_targets() {
    assert_eq!(CodegenRegistry::builtin().input_kinds(), vec!["adhoc_tool", "shell_command"]);
  }
}
