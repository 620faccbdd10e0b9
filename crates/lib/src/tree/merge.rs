//! Conflict-checked union of independently produced trees.
//!
//! Merging is order-independent: the same set of inputs always yields the same
//! tree or fails on the same path. Identical content at one path from several
//! producers is fine; anything else at a shared path is a conflict, including a
//! file in one tree sitting where another tree needs a directory.

use std::collections::BTreeMap;

use thiserror::Error;
use tracing::debug;

use crate::tree::{Tree, TreeEntry};
use crate::util::path::ancestors;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum MergeError {
  /// Two producers disagree about the content at `path`.
  #[error("conflicting output at `{path}`: produced differently by `{first}` and `{second}`")]
  ConflictingOutput {
    path: String,
    first: String,
    second: String,
  },
}

/// Merge labeled trees into one.
///
/// Each input carries the name of its producer so a conflict can name both
/// sides. An empty input yields an empty tree.
///
/// # Example
///
/// ```ignore
/// let merged = merge_trees([("//gen:a", tree_a), ("//gen:b", tree_b)])?;
/// ```
pub fn merge_trees<I, S>(inputs: I) -> Result<Tree, MergeError>
where
  I: IntoIterator<Item = (S, Tree)>,
  S: Into<String>,
{
  let mut inputs: Vec<(String, Tree)> = inputs.into_iter().map(|(name, tree)| (name.into(), tree)).collect();
  // Sorting by producer makes conflict reports stable regardless of caller order.
  inputs.sort_by(|a, b| a.0.cmp(&b.0));

  let mut merged: BTreeMap<String, (TreeEntry, &str)> = BTreeMap::new();

  for (producer, tree) in &inputs {
    for (path, entry) in tree.iter() {
      match merged.get(path) {
        None => {
          merged.insert(path.to_string(), (entry.clone(), producer.as_str()));
        }
        Some((existing, first)) => {
          let compatible = match (existing, entry) {
            (TreeEntry::Directory, TreeEntry::Directory) => true,
            (TreeEntry::File(a), TreeEntry::File(b)) => a.same_content(b),
            _ => false,
          };
          if !compatible {
            return Err(MergeError::ConflictingOutput {
              path: path.to_string(),
              first: first.to_string(),
              second: producer.clone(),
            });
          }
        }
      }
    }
  }

  // A file may not stand where another entry needs a parent directory.
  for (path, (_, producer)) in &merged {
    for ancestor in ancestors(path) {
      if let Some((TreeEntry::File(_), owner)) = merged.get(ancestor) {
        return Err(MergeError::ConflictingOutput {
          path: ancestor.to_string(),
          first: owner.to_string(),
          second: producer.to_string(),
        });
      }
    }
  }

  debug!(inputs = inputs.len(), entries = merged.len(), "merged trees");

  let mut tree = Tree::new();
  for (path, (entry, _)) in merged {
    tree.insert_entry(path, entry);
  }
  Ok(tree)
}
