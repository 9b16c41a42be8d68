//! Shared types for the PedroCLI agent execution core.
//!
//! Everything in this crate is a plain data type: job identity and status,
//! the journal's round/artifact shapes, tool schemas, and the budget
//! descriptor. No I/O lives here — that belongs to `pedro-journal`,
//! `pedro-executor`, and friends.

pub mod error;
pub mod job;
pub mod round;
pub mod schema;
pub mod sentinel;

pub use error::JobError;
pub use job::{Job, JobId, JobStatus};
pub use round::{Round, ToolInvocation, ToolResult};
pub use schema::{ToolParameter, ToolSchema};
