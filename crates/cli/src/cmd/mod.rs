mod export_codegen;
mod info;
mod run;
mod which;

pub use export_codegen::cmd_export_codegen;
pub use info::cmd_info;
pub use run::{cmd_run, parse_timeout};
pub use which::cmd_which;

use std::future::Future;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use adhoc_lib::config::RunnerConfig;
use adhoc_lib::consts::MANIFEST_FILE;
use adhoc_lib::manifest::{BuildContext, Manifest};

/// Global flags that take precedence over the config file.
#[derive(Debug, Default)]
pub struct Overrides {
  pub config: Option<PathBuf>,
  pub build_root: Option<PathBuf>,
  pub dist_dir: Option<PathBuf>,
}

/// Load the config file and apply command-line overrides.
pub fn load_config(overrides: &Overrides) -> Result<RunnerConfig> {
  let mut config = match &overrides.config {
    Some(path) => RunnerConfig::load(path)?,
    None => RunnerConfig::load_default()?,
  };
  if let Some(root) = &overrides.build_root {
    config.build_root = root.clone();
  }
  if let Some(dist) = &overrides.dist_dir {
    config.dist_dir = dist.clone();
  }
  config.build_root = dunce::canonicalize(&config.build_root)
    .with_context(|| format!("Build root {} does not exist", config.build_root.display()))?;
  Ok(config)
}

/// Load a manifest; a directory argument means its `BUILD.json`.
pub fn load_manifest(path: &Path, config: &RunnerConfig) -> Result<Manifest> {
  let path = if path.is_dir() {
    path.join(MANIFEST_FILE)
  } else {
    path.to_path_buf()
  };
  Manifest::load(&path, &config.build_root).with_context(|| format!("Failed to load {}", path.display()))
}

/// Run `f` on a fresh runtime with Ctrl-C wired to the session's cancellation token.
pub fn with_session<T, F, Fut>(config: RunnerConfig, f: F) -> Result<T>
where
  F: FnOnce(BuildContext) -> Fut,
  Fut: Future<Output = Result<T>>,
{
  let rt = tokio::runtime::Runtime::new().context("Failed to create async runtime")?;
  let cancel = CancellationToken::new();
  let ctx = BuildContext::new(config, cancel.clone());

  rt.block_on(async move {
    let watcher = tokio::spawn({
      let cancel = cancel.clone();
      async move {
        if tokio::signal::ctrl_c().await.is_ok() {
          warn!("interrupted, cancelling running processes");
          cancel.cancel();
        }
      }
    });
    debug!("session started");
    let result = f(ctx).await;
    watcher.abort();
    result
  })
}
