//! Test utilities for adhoc-lib.
//!
//! Helpers for tests that need fake executables on disk. Scripts are written
//! through a temporary name and renamed into place so no writable handle is
//! open when another test thread forks.

use std::fs;
use std::path::{Path, PathBuf};

use crate::tree::Tree;

/// Write an executable `#!/bin/sh` script named `name` into `dir`.
#[cfg(unix)]
pub fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
  use std::os::unix::fs::PermissionsExt;

  fs::create_dir_all(dir).unwrap();
  let staging = dir.join(format!(".{}.tmp", name));
  fs::write(&staging, format!("#!/bin/sh\n{}\n", body)).unwrap();
  fs::set_permissions(&staging, fs::Permissions::from_mode(0o755)).unwrap();

  let path = dir.join(name);
  fs::rename(&staging, &path).unwrap();
  path
}

/// Write a plain, non-executable file named `name` into `dir`.
pub fn write_plain(dir: &Path, name: &str, content: &str) -> PathBuf {
  fs::create_dir_all(dir).unwrap();
  let path = dir.join(name);
  fs::write(&path, content).unwrap();
  path
}

/// Build a tree from `(path, content)` pairs of non-executable files.
pub fn tree_of(files: &[(&str, &str)]) -> Tree {
  let mut tree = Tree::new();
  for (path, content) in files {
    tree.add_file(path, content.as_bytes().to_vec(), false).unwrap();
  }
  tree
}

/// Returns the command and args to run a shell script.
#[cfg(unix)]
pub fn shell_cmd(script: &str) -> (&'static str, Vec<String>) {
  ("/bin/sh", vec!["-c".to_string(), script.to_string()])
}
