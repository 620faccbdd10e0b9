//! Implementation of the `adhoc export-codegen` command.

use std::path::PathBuf;
use std::time::Instant;

use anyhow::Result;
use serde::Serialize;

use adhoc_lib::codegen::{CodegenRegistry, ExportOutcome, export_codegen};
use adhoc_lib::manifest::Evaluator;

use super::{Overrides, load_config, load_manifest, with_session};
use crate::output::{OutputFormat, format_duration, print_json, print_stat, print_success, print_warning};

#[derive(Debug, Serialize)]
struct ExportOutput {
  path: Option<String>,
  files: usize,
  producers: Vec<String>,
  registered_kinds: Vec<String>,
}

/// Collect codegen targets from every manifest and write the merged result.
pub fn cmd_export_codegen(overrides: &Overrides, manifests: &[PathBuf], output: OutputFormat) -> Result<()> {
  let start = Instant::now();
  let config = load_config(overrides)?;
  let manifests = manifests
    .iter()
    .map(|path| load_manifest(path, &config))
    .collect::<Result<Vec<_>>>()?;
  let dest = config.codegen_path();
  let concurrency = config.codegen_concurrency;

  let outcome = with_session(config, |ctx| async move {
    let mut targets = Vec::new();
    for manifest in &manifests {
      targets.extend(Evaluator::new(manifest, &ctx).codegen_targets().await?);
    }
    let registry = CodegenRegistry::builtin();
    Ok(export_codegen(&targets, &registry, &dest, concurrency, &ctx.cancel).await?)
  })?;

  let summary = match outcome {
    ExportOutcome::NothingMatched { registered_kinds } => ExportOutput {
      path: None,
      files: 0,
      producers: Vec::new(),
      registered_kinds,
    },
    ExportOutcome::Written { path, files, producers } => ExportOutput {
      path: Some(path.display().to_string()),
      files,
      producers,
      registered_kinds: Vec::new(),
    },
  };

  if output.is_json() {
    print_json(&summary)?;
    return Ok(());
  }

  match &summary.path {
    None => print_warning(&format!(
      "No codegen targets matched; known target types: {}",
      summary.registered_kinds.join(", ")
    )),
    Some(path) => {
      print_success(&format!("Wrote codegen to {}", path));
      print_stat("Files", &summary.files.to_string());
      print_stat("Producers", &summary.producers.len().to_string());
      print_stat("Duration", &format_duration(start.elapsed()));
    }
  }

  Ok(())
}
