//! Command line interface module
//!
//! Argument parsing and the runner behind the `reglib` binary.

pub mod args;
pub mod runner;

pub use args::{Args, Command};
pub use runner::Runner;
