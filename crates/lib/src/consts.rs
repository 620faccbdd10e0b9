//! Application-wide constants.

pub const APP_NAME: &str = "adhoc";

/// Default wall-clock budget for an ad-hoc process, in seconds.
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Budget for a single fingerprint test run during binary search.
pub const FINGERPRINT_TIMEOUT_SECS: u64 = 10;

/// Budget for reading the remaining stdout/stderr after a process was killed.
pub const OUTPUT_DRAIN_TIMEOUT_MS: u64 = 2_000;

pub const DEFAULT_WORKDIR: &str = ".";
pub const DEFAULT_ROOT_OUTPUT_DIR: &str = "/";

/// Sandbox directory under which runnable dependencies are materialized.
pub const RUNNABLE_DEPS_DIR: &str = "_runnable_dependencies";

/// Replaced with the absolute sandbox root in process arguments and environment values.
pub const CHROOT_PLACEHOLDER: &str = "{chroot}";

/// Search-path entry that expands to the directories of the ambient `PATH`.
pub const PATH_PLACEHOLDER: &str = "<PATH>";

pub const DIST_DIR: &str = "dist";
pub const CODEGEN_DIR: &str = "codegen";
pub const MANIFEST_FILE: &str = "BUILD.json";
pub const CONFIG_FILE: &str = "config.json";
