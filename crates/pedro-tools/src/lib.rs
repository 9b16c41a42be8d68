//! Tool registry & dispatch plus a minimal illustrative set of built-in
//! tools (file, bash, search) sufficient to exercise the registry
//! end-to-end.

pub mod registry;
pub mod tools;

pub use registry::{dispatch_batch, Tool, ToolContext, ToolRegistry};
pub use tools::{BashTool, FileTool, SearchTool};
