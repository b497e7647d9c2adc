//! Turns a free-text task into a reviewed, branch-isolated pull request.
//!
//! A language model proposes a plan of commands; the plan runs under a strict
//! command allowlist in an ephemeral clone, and the result is pushed and
//! opened as a pull request. The architecture keeps a strict separation:
//!
//! - **[`core`]**: Pure, deterministic logic (allowlist, plan parsing and
//!   repair, naming, rate limiting). No I/O.
//! - **[`io`]**: Side-effecting adapters (git, subprocesses, HTTP clients, the
//!   brain state store, configuration). Behind traits where tests need fakes.
//!
//! Orchestration modules ([`planner`], [`engine`], [`submit`], [`job`]) compose
//! the two into the job pipeline.

pub mod context;
pub mod core;
pub mod engine;
pub mod error;
pub mod exit_codes;
pub mod io;
pub mod job;
pub mod logging;
pub mod planner;
pub mod submit;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
