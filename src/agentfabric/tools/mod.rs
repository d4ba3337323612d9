//! Built-in tools shipped with the runtime.
//!
//! Each tool is a [`ToolProtocol`](crate::agentfabric::tool_protocol::ToolProtocol)
//! implementation that can be registered into a
//! [`ToolRegistry`](crate::agentfabric::tool_protocol::ToolRegistry).

pub mod calculator;

pub use calculator::CalculatorTool;
