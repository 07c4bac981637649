/// Error types for the mockmcp crate.  Typed failures that clients get to see live next to the
/// code that raises them ([`crate::mcp::ToolError`], [`crate::streaming::ControlError`]);
/// everything else is plumbing and uses anyhow.
pub type Result<T> = anyhow::Result<T>;
