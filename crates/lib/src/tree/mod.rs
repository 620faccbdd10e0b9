//! In-memory content-addressed file trees.
//!
//! A `Tree` is the unit that flows between the sandbox builder, the process
//! executor and the merger: a set of files (and explicitly empty directories)
//! keyed by normalized `/`-separated relative paths. Trees are cheap to clone;
//! file contents are shared.
//!
//! # Digest format
//!
//! The digest hashes one line per entry, sorted by path:
//! - `F:<path>:<content-hash>:<x|->` for files
//! - `D:<path>` for directories

pub mod merge;

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::sync::Arc;

use thiserror::Error;
use walkdir::WalkDir;

use crate::util::hash::{ContentHash, hash_bytes, hash_lines};
use crate::util::path::{self, normalize_relative};

pub use merge::{MergeError, merge_trees};

/// Errors from building, reshaping or materializing trees.
#[derive(Debug, Error)]
pub enum TreeError {
  /// The path is absolute after normalization, empty, or climbs out of the root.
  #[error("invalid tree path: {0:?}")]
  InvalidPath(String),

  /// An entry lies outside the prefix being removed.
  #[error("path {path} is not under {prefix}")]
  OutsidePrefix { path: String, prefix: String },

  /// A symlink resolves to somewhere outside the capture root.
  #[error("link {path} points outside the capture root, to {target}")]
  EscapingLink { path: String, target: String },

  #[error("failed to walk {path}: {message}")]
  Walk { path: String, message: String },

  #[error("io error at {path}: {source}")]
  Io {
    path: String,
    #[source]
    source: std::io::Error,
  },
}

impl TreeError {
  fn io(path: &Path, source: std::io::Error) -> Self {
    TreeError::Io {
      path: path.display().to_string(),
      source,
    }
  }
}

/// A file stored in a tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileEntry {
  pub content: Arc<[u8]>,
  pub hash: ContentHash,
  pub executable: bool,
}

impl FileEntry {
  pub fn new(content: Vec<u8>, executable: bool) -> Self {
    let hash = hash_bytes(&content);
    Self {
      content: content.into(),
      hash,
      executable,
    }
  }

  /// Two files are interchangeable when content and mode agree.
  pub fn same_content(&self, other: &FileEntry) -> bool {
    self.hash == other.hash && self.executable == other.executable
  }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TreeEntry {
  File(FileEntry),
  Directory,
}

/// Opaque handle identifying a tree by content.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TreeDigest(pub ContentHash);

impl std::fmt::Display for TreeDigest {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(f, "{}", self.0)
  }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Tree {
  entries: BTreeMap<String, TreeEntry>,
}

impl Tree {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn is_empty(&self) -> bool {
    self.entries.is_empty()
  }

  pub fn len(&self) -> usize {
    self.entries.len()
  }

  pub fn get(&self, path: &str) -> Option<&TreeEntry> {
    self.entries.get(path)
  }

  /// Iterate entries in path order.
  pub fn iter(&self) -> impl Iterator<Item = (&str, &TreeEntry)> {
    self.entries.iter().map(|(path, entry)| (path.as_str(), entry))
  }

  /// Iterate only the files, in path order.
  pub fn files(&self) -> impl Iterator<Item = (&str, &FileEntry)> {
    self.entries.iter().filter_map(|(path, entry)| match entry {
      TreeEntry::File(file) => Some((path.as_str(), file)),
      TreeEntry::Directory => None,
    })
  }

  pub fn add_file(&mut self, path: &str, content: Vec<u8>, executable: bool) -> Result<(), TreeError> {
    let path = checked_path(path)?;
    self.entries.insert(path, TreeEntry::File(FileEntry::new(content, executable)));
    Ok(())
  }

  pub fn add_directory(&mut self, path: &str) -> Result<(), TreeError> {
    let path = checked_path(path)?;
    self.entries.insert(path, TreeEntry::Directory);
    Ok(())
  }

  /// Whether a file at `path` would replace, or sit under, an existing entry.
  ///
  /// Empty-directory ancestors are not an overlap.
  pub fn overlaps(&self, path: &str) -> bool {
    let Some(path) = normalize_relative(path) else {
      return false;
    };
    self.entries.keys().any(|p| path::strip_prefix(p, &path).is_some())
      || path::ancestors(&path).any(|a| matches!(self.entries.get(a), Some(TreeEntry::File(_))))
  }

  pub(crate) fn insert_entry(&mut self, path: String, entry: TreeEntry) {
    self.entries.insert(path, entry);
  }

  /// Content digest of the whole tree. Equal trees have equal digests.
  pub fn digest(&self) -> TreeDigest {
    let lines: Vec<String> = self
      .entries
      .iter()
      .map(|(path, entry)| match entry {
        TreeEntry::File(file) => format!("F:{}:{}:{}", path, file.hash, if file.executable { "x" } else { "-" }),
        TreeEntry::Directory => format!("D:{}", path),
      })
      .collect();
    TreeDigest(hash_lines(lines.iter().map(String::as_str)))
  }

  /// Move every entry under `prefix`.
  pub fn add_prefix(&self, prefix: &str) -> Result<Tree, TreeError> {
    let prefix = normalize_relative(prefix).ok_or_else(|| TreeError::InvalidPath(prefix.to_string()))?;
    if prefix.is_empty() {
      return Ok(self.clone());
    }

    let entries = self
      .entries
      .iter()
      .map(|(path, entry)| (path::join_relative(&prefix, path), entry.clone()))
      .collect();
    Ok(Tree { entries })
  }

  /// Re-root the tree at `prefix`.
  ///
  /// Every file must live under `prefix`; directory entries that are ancestors
  /// of the prefix are dropped. The prefix directory itself disappears.
  pub fn remove_prefix(&self, prefix: &str) -> Result<Tree, TreeError> {
    let prefix = normalize_relative(prefix).ok_or_else(|| TreeError::InvalidPath(prefix.to_string()))?;
    if prefix.is_empty() {
      return Ok(self.clone());
    }

    let mut entries = BTreeMap::new();
    for (path, entry) in &self.entries {
      match path::strip_prefix(path, &prefix) {
        Some("") => {}
        Some(rest) => {
          entries.insert(rest.to_string(), entry.clone());
        }
        None if matches!(entry, TreeEntry::Directory) && path::strip_prefix(&prefix, path).is_some() => {}
        None => {
          return Err(TreeError::OutsidePrefix {
            path: path.clone(),
            prefix,
          });
        }
      }
    }
    Ok(Tree { entries })
  }

  /// Capture everything below `root` into a new tree.
  pub fn from_dir(root: &Path) -> Result<Tree, TreeError> {
    let mut tree = Tree::new();
    tree.capture_dir(root, "")?;
    Ok(tree)
  }

  /// Capture a single file at `root/rel` into the tree under `rel`.
  ///
  /// Returns `Ok(false)` if nothing exists at that path.
  pub fn capture_file(&mut self, root: &Path, rel: &str) -> Result<bool, TreeError> {
    let rel = checked_path(rel)?;
    let real_root = canonical_root(root)?;
    let full = root.join(&rel);
    if !confined(&real_root, &full)? {
      return Ok(false);
    }
    let metadata = fs::metadata(&full).map_err(|e| TreeError::io(&full, e))?;

    if metadata.is_dir() {
      self.capture_dir(root, &rel)?;
    } else {
      let content = fs::read(&full).map_err(|e| TreeError::io(&full, e))?;
      self.insert_entry(rel, TreeEntry::File(FileEntry::new(content, is_executable(&metadata))));
    }
    Ok(true)
  }

  /// Capture the directory `root/rel` recursively, keyed by paths relative to `root`.
  ///
  /// Empty directories are recorded so they survive materialization. Links
  /// are followed only while they resolve inside `root`; one that leaves it is
  /// an error. Returns `Ok(false)` if the directory does not exist.
  pub fn capture_dir(&mut self, root: &Path, rel: &str) -> Result<bool, TreeError> {
    let rel = normalize_relative(rel).ok_or_else(|| TreeError::InvalidPath(rel.to_string()))?;
    let real_root = canonical_root(root)?;
    let dir = if rel.is_empty() { root.to_path_buf() } else { root.join(&rel) };
    if !confined(&real_root, &dir)? || !dir.is_dir() {
      return Ok(false);
    }

    for entry in WalkDir::new(&dir).follow_links(true).sort_by_file_name() {
      let entry = match entry {
        Ok(entry) => entry,
        Err(e) if e.io_error().is_some_and(|io| io.kind() == std::io::ErrorKind::NotFound) => continue,
        Err(e) => {
          return Err(TreeError::Walk {
            path: dir.display().to_string(),
            message: e.to_string(),
          });
        }
      };
      if entry.path_is_symlink() && !confined(&real_root, entry.path())? {
        continue;
      }
      let entry_rel = entry
        .path()
        .strip_prefix(root)
        .map_err(|_| TreeError::InvalidPath(entry.path().display().to_string()))?
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/");
      if entry_rel.is_empty() {
        continue;
      }

      let file_type = entry.file_type();
      if file_type.is_dir() {
        let has_children = fs::read_dir(entry.path())
          .map_err(|e| TreeError::io(entry.path(), e))?
          .next()
          .is_some();
        if !has_children {
          self.insert_entry(entry_rel, TreeEntry::Directory);
        }
      } else if file_type.is_file() {
        let content = fs::read(entry.path()).map_err(|e| TreeError::io(entry.path(), e))?;
        let metadata = entry.metadata().map_err(|e| TreeError::Walk {
          path: entry.path().display().to_string(),
          message: e.to_string(),
        })?;
        self.insert_entry(entry_rel, TreeEntry::File(FileEntry::new(content, is_executable(&metadata))));
      }
      // Sockets, devices and dangling links are skipped.
    }

    if rel.is_empty() {
      return Ok(true);
    }
    let has_entries = self.entries.keys().any(|p| path::strip_prefix(p, &rel).is_some());
    if !has_entries {
      self.insert_entry(rel, TreeEntry::Directory);
    }
    Ok(true)
  }

  /// Write the tree below `dest`, creating directories as needed.
  ///
  /// Existing files at the same paths are overwritten.
  pub fn materialize(&self, dest: &Path) -> Result<(), TreeError> {
    fs::create_dir_all(dest).map_err(|e| TreeError::io(dest, e))?;

    for (rel, entry) in &self.entries {
      let target = dest.join(rel);
      match entry {
        TreeEntry::Directory => {
          fs::create_dir_all(&target).map_err(|e| TreeError::io(&target, e))?;
        }
        TreeEntry::File(file) => {
          if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).map_err(|e| TreeError::io(parent, e))?;
          }
          fs::write(&target, &file.content).map_err(|e| TreeError::io(&target, e))?;
          set_executable(&target, file.executable).map_err(|e| TreeError::io(&target, e))?;
        }
      }
    }
    Ok(())
  }
}

fn canonical_root(root: &Path) -> Result<std::path::PathBuf, TreeError> {
  dunce::canonicalize(root).map_err(|e| TreeError::io(root, e))
}

/// Resolve `path` and require it to stay under `real_root`.
///
/// Returns `Ok(false)` for paths that do not exist, including dangling links.
fn confined(real_root: &Path, path: &Path) -> Result<bool, TreeError> {
  match dunce::canonicalize(path) {
    Ok(real) if real.starts_with(real_root) => Ok(true),
    Ok(real) => Err(TreeError::EscapingLink {
      path: path.display().to_string(),
      target: real.display().to_string(),
    }),
    Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
    Err(e) => Err(TreeError::io(path, e)),
  }
}

fn checked_path(path: &str) -> Result<String, TreeError> {
  match normalize_relative(path) {
    Some(normalized) if !normalized.is_empty() => Ok(normalized),
    _ => Err(TreeError::InvalidPath(path.to_string())),
  }
}

#[cfg(unix)]
fn is_executable(metadata: &fs::Metadata) -> bool {
  use std::os::unix::fs::PermissionsExt;
  metadata.permissions().mode() & 0o111 != 0
}

#[cfg(not(unix))]
fn is_executable(_metadata: &fs::Metadata) -> bool {
  false
}

#[cfg(unix)]
fn set_executable(path: &Path, executable: bool) -> std::io::Result<()> {
  use std::os::unix::fs::PermissionsExt;
  let mode = if executable { 0o755 } else { 0o644 };
  fs::set_permissions(path, fs::Permissions::from_mode(mode))
}

#[cfg(not(unix))]
fn set_executable(_path: &Path, _executable: bool) -> std::io::Result<()> {
  Ok(())
}
