// src/lib.rs

// Import the top-level `agentfabric` module.
pub mod agentfabric;

// If you want to provide direct access (without having to navigate through the whole hierarchy) to certain types or functionalities at the crate level, you can use re-exports:

// Re-export the submodule namespaces so callers write `agentfabric::fabric::...`
// instead of `agentfabric::agentfabric::fabric::...`.
pub use agentfabric::{
    agent, agents, aggregator, client_wrapper, clients, config, cost, fabric, graph, mcts,
    message, planner, runtime, similarity, tool_protocol, tools, voting,
};

// Re-exporting key items for easier external access.
pub use agentfabric::agent::{Agent, AgentError, AgentLifecycle};
pub use agentfabric::client_wrapper::{ClientWrapper, CompletionRequest, CompletionResponse, Role};
pub use agentfabric::config::AgentDef;
pub use agentfabric::fabric::ChannelFabric;
pub use agentfabric::message::Message;
pub use agentfabric::runtime::{AgentContext, Runtime};
