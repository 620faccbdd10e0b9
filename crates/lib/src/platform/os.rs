use std::fmt;

/// Operating system variants the resolver knows how to search
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Os {
  Linux,
  MacOs,
  Windows,
}

/// Extensions tried, in order, for a bare binary name on Windows
const WINDOWS_EXECUTABLE_EXTENSIONS: &[&str] = &["exe", "cmd", "bat", "com"];

impl Os {
  /// Detect the current operating system at runtime
  pub fn current() -> Option<Self> {
    match std::env::consts::OS {
      "linux" => Some(Self::Linux),
      "macos" => Some(Self::MacOs),
      "windows" => Some(Self::Windows),
      _ => None,
    }
  }

  /// Returns the lowercase string identifier for this OS
  pub fn as_str(&self) -> &'static str {
    match self {
      Self::Linux => "linux",
      Self::MacOs => "darwin",
      Self::Windows => "windows",
    }
  }

  /// File names a binary called `name` may have on disk, in preference order.
  ///
  /// On Windows a bare name expands to each executable extension; a name that
  /// already carries an extension is used as-is. Elsewhere only `name` matches.
  pub fn executable_names(&self, name: &str) -> Vec<String> {
    match self {
      Self::Windows if !name.contains('.') => WINDOWS_EXECUTABLE_EXTENSIONS
        .iter()
        .map(|ext| format!("{}.{}", name, ext))
        .collect(),
      _ => vec![name.to_string()],
    }
  }
}

impl fmt::Display for Os {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}", self.as_str())
  }
}
