//! Workdir and output-root resolution.
//!
//! Both the process working directory and the root output directory are given
//! as raw strings relative to either the build root or the directory of the
//! declaring manifest:
//!
//! - `.` is the manifest directory; `./x` is relative to it
//! - `/` or the empty string is the build root; `/x` is relative to the root
//! - anything else is relative to the build root
//!
//! Results are normalized build-root-relative paths (`""` is the root).

use crate::sandbox::SandboxError;
use crate::util::path::{join_relative, normalize_relative};

/// Resolve `raw` against the manifest directory `base` (itself build-root-relative).
pub fn resolve_relative_path(raw: &str, base: &str) -> Result<String, SandboxError> {
  let joined = if raw == "." {
    base.to_string()
  } else if let Some(rest) = raw.strip_prefix("./") {
    join_relative(base, rest)
  } else if let Some(rest) = raw.strip_prefix('/') {
    rest.to_string()
  } else {
    raw.to_string()
  };

  normalize_relative(&joined).ok_or_else(|| SandboxError::PathEscapesBuildRoot {
    path: raw.to_string(),
    base: base.to_string(),
  })
}

/// Resolve a path declared relative to the working directory into a
/// build-root-relative path.
pub fn resolve_workdir_relative(workdir: &str, raw: &str) -> Result<String, SandboxError> {
  match normalize_relative(&join_relative(workdir, raw)) {
    Some(path) if !path.is_empty() => Ok(path),
    Some(_) => Err(SandboxError::InvalidOutputPath(raw.to_string())),
    None => Err(SandboxError::PathEscapesBuildRoot {
      path: raw.to_string(),
      base: workdir.to_string(),
    }),
  }
}
