use anyhow::Result;
use serde::Serialize;

use adhoc_lib::config::RunnerConfig;
use adhoc_lib::platform::{host_os, platform_triple};

use super::{Overrides, load_config};
use crate::output::{OutputFormat, print_json, print_stat};

#[derive(Debug, Serialize)]
struct InfoOutput {
  platform: Option<String>,
  config_file: Option<String>,
  build_root: String,
  codegen_dir: String,
  search_paths: Vec<String>,
  search_ambient_path: bool,
  fingerprint_timeout_secs: u64,
  codegen_concurrency: usize,
}

pub fn cmd_info(overrides: &Overrides, output: OutputFormat) -> Result<()> {
  let config = load_config(overrides)?;
  let config_file = overrides
    .config
    .clone()
    .or_else(|| RunnerConfig::default_path().filter(|path| path.is_file()));

  let info = InfoOutput {
    platform: platform_triple(),
    config_file: config_file.map(|path| path.display().to_string()),
    build_root: config.build_root.display().to_string(),
    codegen_dir: config.codegen_path().display().to_string(),
    search_paths: config
      .default_search_paths(host_os())
      .iter()
      .map(|path| path.display().to_string())
      .collect(),
    search_ambient_path: config.search_ambient_path,
    fingerprint_timeout_secs: config.fingerprint_timeout_secs,
    codegen_concurrency: config.codegen_concurrency,
  };

  if output.is_json() {
    return print_json(&info);
  }

  println!("System:");
  match &info.platform {
    Some(triple) => print_stat("Platform", triple),
    None => print_stat("Platform", "unknown"),
  }
  println!("Configuration:");
  print_stat("Config file", info.config_file.as_deref().unwrap_or("(defaults)"));
  print_stat("Build root", &info.build_root);
  print_stat("Codegen dir", &info.codegen_dir);
  print_stat("Search paths", &info.search_paths.join(", "));
  print_stat("Search PATH", &info.search_ambient_path.to_string());
  print_stat("Fingerprint timeout", &format!("{}s", info.fingerprint_timeout_secs));
  print_stat("Codegen concurrency", &info.codegen_concurrency.to_string());
  Ok(())
}
