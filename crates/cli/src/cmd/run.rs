//! Implementation of the `adhoc run` command.
//!
//! Runs one `adhoc_tool` or `shell_command` target, after running every upstream tool it
//! depends on, and reports the tree it produced relative to its
//! `root_output_directory`.

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Serialize;
use tracing::info;

use adhoc_lib::adhoc::run_adhoc_tool;
use adhoc_lib::manifest::Evaluator;
use adhoc_lib::process::CacheScope;

use super::{Overrides, load_config, load_manifest, with_session};
use crate::output::{OutputFormat, format_duration, print_item, print_json, print_stat, print_success, truncate_hash};

#[derive(Debug, Serialize)]
struct RunOutput {
  target: String,
  exit_code: i32,
  duration_ms: u128,
  digest: String,
  cache_scope: CacheScope,
  outputs: Vec<String>,
  stdout: String,
  stderr: String,
}

/// Parse a `--timeout` value. Sandboxes time out in whole seconds, so any
/// fraction rounds up; zero is rejected.
pub fn parse_timeout(value: &str) -> Result<Duration, String> {
  let duration = humantime::parse_duration(value).map_err(|e| e.to_string())?;
  if duration.is_zero() {
    return Err("timeout must be greater than zero".to_string());
  }
  let secs = duration.as_secs() + u64::from(duration.subsec_nanos() > 0);
  Ok(Duration::from_secs(secs))
}

pub fn cmd_run(
  overrides: &Overrides,
  manifest: &Path,
  target: &str,
  timeout: Option<Duration>,
  out: Option<&Path>,
  output: OutputFormat,
) -> Result<()> {
  let config = load_config(overrides)?;
  let manifest = load_manifest(manifest, &config)?;
  let address = manifest.address(target);

  let result = with_session(config, |ctx| async move {
    let mut evaluator = Evaluator::new(&manifest, &ctx);
    let result = match timeout {
      Some(timeout) => {
        let mut request = evaluator.adhoc_request(target).await?;
        request.sandbox.timeout_secs = timeout.as_secs();
        run_adhoc_tool(request, &ctx.cancel).await?
      }
      None => evaluator.run(target).await?,
    };
    Ok(result)
  })?;

  if let Some(dest) = out {
    result
      .adjusted_tree
      .materialize(dest)
      .with_context(|| format!("Failed to write outputs to {}", dest.display()))?;
    info!(path = %dest.display(), files = result.adjusted_tree.len(), "wrote outputs");
  }

  let outputs: Vec<String> = result.adjusted_tree.iter().map(|(path, _)| path.to_string()).collect();
  let execution = &result.result;

  if output.is_json() {
    print_json(&RunOutput {
      target: address,
      exit_code: execution.exit_code,
      duration_ms: execution.duration.as_millis(),
      digest: execution.output_digest.to_string(),
      cache_scope: execution.cache_scope,
      outputs,
      stdout: execution.stdout_lossy(),
      stderr: execution.stderr_lossy(),
    })?;
  } else {
    print_success(&format!("Ran {}", address));
    print_stat("Duration", &format_duration(execution.duration));
    print_stat("Digest", truncate_hash(&execution.output_digest.to_string()));
    print_stat("Outputs", &outputs.len().to_string());
    for path in &outputs {
      print_item(path);
    }
    if let Some(dest) = out {
      print_stat("Written to", &dest.display().to_string());
    }
  }

  Ok(())
}
