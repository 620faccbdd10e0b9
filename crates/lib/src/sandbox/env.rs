//! Environment variable directives.
//!
//! A directive is either `KEY=VALUE`, setting a literal value, or a bare `KEY`,
//! copying the value from the environment of this process. Directives apply in
//! declaration order, so a later entry for the same key wins.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::sandbox::SandboxError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnvDirective {
  Literal { key: String, value: String },
  Inherit { key: String },
}

impl EnvDirective {
  pub fn key(&self) -> &str {
    match self {
      EnvDirective::Literal { key, .. } | EnvDirective::Inherit { key } => key,
    }
  }
}

impl FromStr for EnvDirective {
  type Err = SandboxError;

  fn from_str(raw: &str) -> Result<Self, Self::Err> {
    let (key, value) = match raw.split_once('=') {
      Some((key, value)) => (key, Some(value)),
      None => (raw, None),
    };

    if key.is_empty() || key.contains(char::is_whitespace) {
      return Err(SandboxError::InvalidEnvDirective(raw.to_string()));
    }

    Ok(match value {
      Some(value) => EnvDirective::Literal {
        key: key.to_string(),
        value: value.to_string(),
      },
      None => EnvDirective::Inherit { key: key.to_string() },
    })
  }
}

impl fmt::Display for EnvDirective {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      EnvDirective::Literal { key, value } => write!(f, "{}={}", key, value),
      EnvDirective::Inherit { key } => f.write_str(key),
    }
  }
}

/// Parse raw directive strings, failing on the first malformed entry.
pub fn parse_directives<S: AsRef<str>>(raw: &[S]) -> Result<Vec<EnvDirective>, SandboxError> {
  raw.iter().map(|entry| entry.as_ref().parse()).collect()
}

/// Resolve directives into concrete variables.
///
/// `lookup` supplies values for inherited keys; keys it does not know are left
/// unset rather than set to an empty string.
pub fn resolve_env(directives: &[EnvDirective], lookup: impl Fn(&str) -> Option<String>) -> BTreeMap<String, String> {
  let mut env = BTreeMap::new();
  for directive in directives {
    match directive {
      EnvDirective::Literal { key, value } => {
        env.insert(key.clone(), value.clone());
      }
      EnvDirective::Inherit { key } => match lookup(key) {
        Some(value) => {
          env.insert(key.clone(), value);
        }
        None => {
          env.remove(key);
        }
      },
    }
  }
  env
}
