//! Lexical handling of `/`-separated relative paths.
//!
//! All paths inside trees and sandboxes are relative to a root and use `/` as
//! separator regardless of platform. The root itself is the empty string.

/// Normalize a relative path lexically.
///
/// Empty and `.` segments are dropped, `..` pops the previous segment. A leading
/// `/` is ignored. Returns `None` if a `..` would climb above the root.
pub fn normalize_relative(path: &str) -> Option<String> {
  let mut parts: Vec<&str> = Vec::new();
  for segment in path.split('/') {
    match segment {
      "" | "." => {}
      ".." => {
        parts.pop()?;
      }
      other => parts.push(other),
    }
  }
  Some(parts.join("/"))
}

/// Join two relative paths, where an empty side means the root.
pub fn join_relative(base: &str, rest: &str) -> String {
  match (base.is_empty(), rest.is_empty()) {
    (true, _) => rest.to_string(),
    (_, true) => base.to_string(),
    _ => format!("{}/{}", base, rest),
  }
}

/// Returns each proper ancestor of a normalized relative path, shortest first.
///
/// `"a/b/c"` yields `"a"` and `"a/b"`.
pub fn ancestors(path: &str) -> impl Iterator<Item = &str> {
  path.match_indices('/').map(move |(idx, _)| &path[..idx])
}

/// Strip `prefix` from `path` on a segment boundary.
pub fn strip_prefix<'a>(path: &'a str, prefix: &str) -> Option<&'a str> {
  if prefix.is_empty() {
    return Some(path);
  }
  if path == prefix {
    return Some("");
  }
  path.strip_prefix(prefix)?.strip_prefix('/')
}
