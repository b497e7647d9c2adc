//! Stable exit codes for prsmith CLI commands.

/// Command succeeded (job submitted, command allowed, record printed).
pub const OK: i32 = 0;
/// Job failed in planning, execution, git, or pull request creation.
pub const FAILED: i32 = 1;
/// Missing credentials or invalid configuration.
pub const CONFIG: i32 = 2;
/// A command was refused by the allowlist.
pub const REJECTED: i32 = 3;
/// The plan ran cleanly but changed nothing.
pub const NO_CHANGES: i32 = 4;
/// The requester is over quota.
pub const RATE_LIMITED: i32 = 5;
/// `prsmith state` found no record for the key.
pub const NOT_FOUND: i32 = 6;
