//! Implementation of the `adhoc which` command.

use std::path::Path;

use anyhow::Result;
use serde::Serialize;

use adhoc_lib::manifest::Evaluator;

use super::{Overrides, load_config, load_manifest, with_session};
use crate::output::{OutputFormat, print_json};

#[derive(Debug, Serialize)]
struct WhichOutput {
  target: String,
  path: String,
  fingerprint: String,
}

/// Resolve a binary target and print where it was found.
///
/// Text output is the bare path so the command composes in shell scripts.
pub fn cmd_which(overrides: &Overrides, manifest: &Path, target: &str, output: OutputFormat) -> Result<()> {
  let config = load_config(overrides)?;
  let manifest = load_manifest(manifest, &config)?;

  let (address, binary) = with_session(config, |ctx| async move {
    let mut evaluator = Evaluator::new(&manifest, &ctx);
    let binary = evaluator.which(target).await?;
    Ok((manifest.address(target), binary))
  })?;

  if output.is_json() {
    print_json(&WhichOutput {
      target: address,
      path: binary.path.display().to_string(),
      fingerprint: binary.fingerprint.to_string(),
    })?;
  } else {
    println!("{}", binary.path.display());
  }

  Ok(())
}
