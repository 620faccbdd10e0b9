//! adhoc-lib: binary resolution and sandboxed ad-hoc process execution.
//!
//! The crate is organised leaves first:
//! - `resolve`: locate executables on the host, optionally fingerprinting them
//! - `sandbox`: compose dependency trees into one execution root
//! - `process`: run a resolved binary inside a sandbox under a timeout
//! - `tree`: in-memory content-addressed file trees and conflict-checked merging
//! - `adhoc` / `codegen`: the ad-hoc tool runner and the codegen export built on top
//! - `manifest`: the thin `BUILD.json` target declaration used by the CLI

pub mod adhoc;
pub mod codegen;
pub mod config;
pub mod consts;
pub mod manifest;
pub mod platform;
pub mod process;
pub mod resolve;
pub mod sandbox;
pub mod tree;
pub mod util;
