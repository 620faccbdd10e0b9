mod common;

#[cfg(unix)]
mod codegen_tests;
#[cfg(unix)]
mod run_tests;
#[cfg(unix)]
mod which_tests;
