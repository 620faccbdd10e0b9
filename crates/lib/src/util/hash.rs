//! Hashing utilities for content addressing and binary fingerprints.
//!
//! This module provides:
//! - `ContentHash`: a full 64-character SHA-256 hash
//! - `hash_file()`: single file hashing, used for binary fingerprints
//! - `hash_bytes()`: arbitrary byte hashing, used for tree entries

use std::fs;
use std::io::Read;
use std::path::Path;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// A full 64-character SHA-256 hash.
///
/// # Format
///
/// The hash is a lowercase hexadecimal string (64 characters).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ContentHash(pub String);

impl ContentHash {
  /// Returns the first `len` characters, for log lines and diagnostics.
  pub fn short(&self, len: usize) -> &str {
    &self.0[..len.min(self.0.len())]
  }
}

impl std::fmt::Display for ContentHash {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(f, "{}", self.0)
  }
}

/// Error while hashing a file.
#[derive(Debug, thiserror::Error)]
#[error("failed to read file {path}: {message}")]
pub struct HashError {
  pub path: String,
  pub message: String,
}

/// Hash a file's contents.
///
/// Returns the full 64-character SHA-256 hash of the file.
pub fn hash_file(path: &Path) -> Result<ContentHash, HashError> {
  let read_error = |e: std::io::Error| HashError {
    path: path.display().to_string(),
    message: e.to_string(),
  };

  let mut file = fs::File::open(path).map_err(read_error)?;
  let mut hasher = Sha256::new();
  let mut buffer = [0u8; 8192];

  loop {
    let bytes_read = file.read(&mut buffer).map_err(read_error)?;
    if bytes_read == 0 {
      break;
    }
    hasher.update(&buffer[..bytes_read]);
  }

  Ok(ContentHash(hex::encode(hasher.finalize())))
}

/// Hash arbitrary bytes.
pub fn hash_bytes(data: &[u8]) -> ContentHash {
  let mut hasher = Sha256::new();
  hasher.update(data);
  ContentHash(hex::encode(hasher.finalize()))
}

/// Hash a sequence of lines, each terminated by `\n`.
///
/// Callers are responsible for ordering the lines deterministically.
pub fn hash_lines<'a>(lines: impl IntoIterator<Item = &'a str>) -> ContentHash {
  let mut hasher = Sha256::new();
  for line in lines {
    hasher.update(line.as_bytes());
    hasher.update(b"\n");
  }
  ContentHash(hex::encode(hasher.finalize()))
}
