//! Helpers for `shell_command` targets.

/// The interpreter every `shell_command` runs under.
pub const SHELL: &str = "bash";

/// Commands bash provides itself. They are never resolved on the host.
pub const BASH_BUILTINS: &[&str] = &[
  ".", ":", "[", "alias", "bg", "bind", "break", "builtin", "caller", "cd", "command", "compgen", "complete",
  "compopt", "continue", "declare", "dirs", "disown", "echo", "enable", "eval", "exec", "exit", "export", "false",
  "fc", "fg", "getopts", "hash", "help", "history", "jobs", "kill", "let", "local", "logout", "mapfile", "popd",
  "printf", "pushd", "pwd", "read", "readarray", "readonly", "return", "set", "shift", "shopt", "source", "suspend",
  "test", "times", "trap", "true", "type", "typeset", "ulimit", "umask", "unalias", "unset", "wait",
];

/// Shown when a `shell_command` exits with 127.
pub const MISSING_TOOL_HINT: &str = "`shell_command` requires the names of any external commands used by this \
  shell command to be listed in its `tools` field. If bash cannot find a tool, add it to `tools`.";

pub fn is_bash_builtin(name: &str) -> bool {
  BASH_BUILTINS.contains(&name)
}

/// The entries of `tools` that must be found on the host, deduplicated in order.
pub fn external_tools(tools: &[String]) -> Vec<&str> {
  let mut external: Vec<&str> = Vec::new();
  for tool in tools {
    if !is_bash_builtin(tool) && !external.contains(&tool.as_str()) {
      external.push(tool);
    }
  }
  external
}

/// Arguments to the shell; the address becomes `$0`.
pub fn shell_args(command: &str, address: &str) -> Vec<String> {
  vec!["-c".to_string(), command.to_string(), address.to_string()]
}
