mod cmd;
mod output;

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use crate::cmd::{Overrides, cmd_export_codegen, cmd_info, cmd_run, cmd_which, parse_timeout};
use crate::output::{OutputFormat, print_error};

/// adhoc - resolve host binaries and run ad-hoc tools in sandboxes
#[derive(Parser)]
#[command(name = "adhoc")]
#[command(author, version, about, long_about = None)]
struct Cli {
  /// Enable debug logging (overridden by RUST_LOG)
  #[arg(short, long, global = true)]
  verbose: bool,

  /// Config file (default: <config dir>/adhoc/config.json)
  #[arg(long, global = true)]
  config: Option<PathBuf>,

  /// Directory all target paths are relative to
  #[arg(long, global = true)]
  build_root: Option<PathBuf>,

  /// Distribution directory, relative to the build root unless absolute
  #[arg(long, global = true)]
  dist_dir: Option<PathBuf>,

  /// Output format
  #[arg(short = 'o', long, global = true, value_enum, default_value = "text")]
  output: OutputFormat,

  #[command(subcommand)]
  command: Commands,
}

#[derive(Subcommand)]
enum Commands {
  /// Resolve a system_binary or toolchain_binary target and print its path
  Which {
    /// Path to the BUILD.json manifest
    manifest: PathBuf,

    /// Target name within the manifest
    target: String,
  },

  /// Run an adhoc_tool or shell_command target and report its outputs
  Run {
    /// Path to the BUILD.json manifest
    manifest: PathBuf,

    /// Target name within the manifest
    target: String,

    /// Override the target's timeout (e.g., "90s", "5m"); rounded up to whole seconds
    #[arg(long, value_parser = parse_timeout)]
    timeout: Option<Duration>,

    /// Write the output tree into this directory
    #[arg(long)]
    out: Option<PathBuf>,
  },

  /// Run every codegen producer and write the merged tree to <dist>/codegen
  ExportCodegen {
    /// BUILD.json manifests to collect targets from
    #[arg(required = true)]
    manifests: Vec<PathBuf>,
  },

  /// Show platform and configuration details
  Info,
}

fn main() -> ExitCode {
  let cli = Cli::parse();

  let filter = EnvFilter::try_from_default_env()
    .unwrap_or_else(|_| EnvFilter::new(if cli.verbose { "debug" } else { "warn" }));
  tracing_subscriber::fmt()
    .with_env_filter(filter)
    .with_writer(std::io::stderr)
    .without_time()
    .init();

  let overrides = Overrides {
    config: cli.config,
    build_root: cli.build_root,
    dist_dir: cli.dist_dir,
  };

  let result = match cli.command {
    Commands::Which { manifest, target } => cmd_which(&overrides, &manifest, &target, cli.output),
    Commands::Run {
      manifest,
      target,
      timeout,
      out,
    } => cmd_run(&overrides, &manifest, &target, timeout, out.as_deref(), cli.output),
    Commands::ExportCodegen { manifests } => cmd_export_codegen(&overrides, &manifests, cli.output),
    Commands::Info => cmd_info(&overrides, cli.output),
  };

  match result {
    Ok(()) => ExitCode::SUCCESS,
    Err(err) => {
      print_error(&format!("{:#}", err));
      ExitCode::FAILURE
    }
  }
}
