//! Shared test helpers for CLI integration tests.

use std::path::{Path, PathBuf};

use assert_cmd::Command;
use assert_cmd::cargo::cargo_bin_cmd;
use tempfile::TempDir;

/// Isolated build root.
///
/// Each test gets its own temporary directory acting as the build root, with
/// a private config directory so the user's config file is never read.
pub struct TestEnv {
  pub temp: TempDir,
}

impl TestEnv {
  pub fn new() -> Self {
    Self {
      temp: TempDir::new().unwrap(),
    }
  }

  /// Canonical build root path.
  pub fn root(&self) -> PathBuf {
    dunce::canonicalize(self.temp.path()).unwrap()
  }

  /// Write a file relative to the build root.
  pub fn write_file(&self, relative_path: &str, content: &str) -> PathBuf {
    let path = self.temp.path().join(relative_path);
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent).unwrap();
    }
    std::fs::write(&path, content).unwrap();
    path
  }

  /// Write an executable `#!/bin/sh` script relative to the build root.
  #[cfg(unix)]
  pub fn write_script(&self, relative_path: &str, body: &str) -> PathBuf {
    use std::os::unix::fs::PermissionsExt;

    let path = self.write_file(relative_path, &format!("#!/bin/sh\n{}\n", body));
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path
  }

  /// Write `dir/BUILD.json` and return its path.
  pub fn manifest(&self, dir: &str, json: &str) -> PathBuf {
    let rel = if dir.is_empty() {
      "BUILD.json".to_string()
    } else {
      format!("{}/BUILD.json", dir)
    };
    self.write_file(&rel, json)
  }

  pub fn read(&self, relative_path: &str) -> String {
    std::fs::read_to_string(self.temp.path().join(relative_path)).unwrap()
  }

  pub fn exists(&self, relative_path: &str) -> bool {
    self.temp.path().join(relative_path).exists()
  }

  /// Get a pre-configured Command for the adhoc binary.
  ///
  /// - `XDG_CONFIG_HOME`: isolated, empty config directory
  /// - `--build-root`: this environment's root
  pub fn adhoc_cmd(&self) -> Command {
    let mut cmd: Command = cargo_bin_cmd!("adhoc");
    cmd.env("XDG_CONFIG_HOME", self.temp.path().join(".config"));
    cmd.env_remove("RUST_LOG");
    cmd.current_dir(self.temp.path());
    cmd.arg("--build-root").arg(self.root());
    cmd
  }

  pub fn path(&self, relative_path: &str) -> PathBuf {
    Path::new(self.temp.path()).join(relative_path)
  }
}
