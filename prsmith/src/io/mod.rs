//! Side-effecting adapters: filesystem, subprocesses, HTTP, and the brain.

pub mod brain;
pub mod code_host;
pub mod config;
pub mod git;
pub mod model;
pub mod process;
pub mod progress;
pub mod prompt;
pub mod workspace;
