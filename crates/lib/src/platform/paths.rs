//! Host filesystem conventions: configuration location and binary search paths.

use std::collections::HashSet;
use std::ffi::OsStr;
use std::path::{Path, PathBuf};

use crate::consts::{APP_NAME, PATH_PLACEHOLDER};
use crate::platform::os::Os;

/// Returns the user's home directory, if the environment names one
#[cfg(windows)]
pub fn home_dir() -> Option<PathBuf> {
  std::env::var_os("USERPROFILE").map(PathBuf::from)
}

/// Returns the user's home directory, if the environment names one
#[cfg(not(windows))]
pub fn home_dir() -> Option<PathBuf> {
  std::env::var_os("HOME").map(PathBuf::from)
}

/// Returns the directory for configuration files for the application
#[cfg(windows)]
pub fn config_dir() -> Option<PathBuf> {
  std::env::var_os("APPDATA").map(|appdata| PathBuf::from(appdata).join(APP_NAME))
}

/// Returns the directory for configuration files for the application
#[cfg(not(windows))]
pub fn config_dir() -> Option<PathBuf> {
  let config_home = std::env::var_os("XDG_CONFIG_HOME")
    .map(PathBuf::from)
    .or_else(|| home_dir().map(|home| home.join(".config")))?;
  Some(config_home.join(APP_NAME))
}

/// System directories searched for binaries after any explicit search paths.
pub fn default_search_paths(os: Os) -> Vec<PathBuf> {
  match os {
    Os::Linux => vec![
      PathBuf::from("/usr/bin"),
      PathBuf::from("/bin"),
      PathBuf::from("/usr/local/bin"),
    ],
    Os::MacOs => vec![
      PathBuf::from("/usr/bin"),
      PathBuf::from("/bin"),
      PathBuf::from("/usr/local/bin"),
      PathBuf::from("/opt/homebrew/bin"),
    ],
    Os::Windows => {
      let root = std::env::var_os("SYSTEMROOT")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(r"C:\Windows"));
      vec![root.join("System32"), root.clone()]
    }
  }
}

/// Expand a configured search path into the ordered list of directories to scan.
///
/// Entries equal to `<PATH>` are replaced in place by the directories of
/// `ambient_path`. Duplicates are dropped, keeping the first occurrence, so
/// an explicit entry keeps its priority even if `PATH` repeats it later.
pub fn expand_search_path(entries: &[PathBuf], ambient_path: Option<&OsStr>) -> Vec<PathBuf> {
  let mut seen = HashSet::new();
  let mut expanded = Vec::new();

  for entry in entries {
    if entry.as_os_str() == PATH_PLACEHOLDER {
      if let Some(path_var) = ambient_path {
        for dir in std::env::split_paths(path_var) {
          if !dir.as_os_str().is_empty() && seen.insert(dir.clone()) {
            expanded.push(dir);
          }
        }
      }
    } else if seen.insert(entry.clone()) {
      expanded.push(entry.clone());
    }
  }

  expanded
}

/// Returns true if `path` is a regular file the current user may execute.
///
/// Symlinks are followed. On Windows any regular file qualifies since the
/// extension already decided executability.
pub fn is_executable_file(path: &Path) -> bool {
  let Ok(metadata) = std::fs::metadata(path) else {
    return false;
  };
  if !metadata.is_file() {
    return false;
  }

  #[cfg(unix)]
  {
    rustix::fs::access(path, rustix::fs::Access::EXEC_OK).is_ok()
  }

  #[cfg(not(unix))]
  {
    true
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::ffi::OsString;

  #[test]
  fn path_placeholder_expands_in_place() {
    let ambient = std::env::join_paths(["/opt/a", "/opt/b"]).unwrap();
    let entries = vec![
      PathBuf::from("/first"),
      PathBuf::from(PATH_PLACEHOLDER),
      PathBuf::from("/last"),
    ];

    let expanded = expand_search_path(&entries, Some(&ambient));
    assert_eq!(
      expanded,
      vec![
        PathBuf::from("/first"),
        PathBuf::from("/opt/a"),
        PathBuf::from("/opt/b"),
        PathBuf::from("/last"),
      ]
    );
  }

  #[test]
  fn duplicates_keep_first_position() {
    let ambient = OsString::from("/usr/bin");
    let entries = vec![
      PathBuf::from("/usr/bin"),
      PathBuf::from("/custom"),
      PathBuf::from(PATH_PLACEHOLDER),
    ];

    let expanded = expand_search_path(&entries, Some(&ambient));
    assert_eq!(expanded, vec![PathBuf::from("/usr/bin"), PathBuf::from("/custom")]);
  }

  #[test]
  fn missing_ambient_path_expands_to_nothing() {
    let entries = vec![PathBuf::from(PATH_PLACEHOLDER)];
    assert!(expand_search_path(&entries, None).is_empty());
  }

  #[test]
  fn default_search_paths_are_absolute() {
    for os in [Os::Linux, Os::MacOs] {
      assert!(default_search_paths(os).iter().all(|p| p.is_absolute()));
    }
  }

  #[cfg(unix)]
  #[test]
  fn executable_bit_is_required() {
    use crate::util::testutil::{write_plain, write_script};

    let temp = tempfile::tempdir().unwrap();
    let script = write_script(temp.path(), "tool", "exit 0");
    let plain = write_plain(temp.path(), "data", "not a program");

    assert!(is_executable_file(&script));
    assert!(!is_executable_file(&plain));
    assert!(!is_executable_file(temp.path()));
    assert!(!is_executable_file(&temp.path().join("absent")));
  }
}
