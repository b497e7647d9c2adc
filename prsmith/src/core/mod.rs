//! Deterministic, pure logic shared by the job pipeline.
//!
//! Core modules must be free of I/O side effects. They operate on in-memory
//! data structures and return deterministic outputs suitable for tests.

pub mod body;
pub mod command;
pub mod extract;
pub mod naming;
pub mod plan;
pub mod rate_limit;
pub mod text;
pub mod types;
