//! The agent capability set and the shared lifecycle value.
//!
//! Every compute node in the runtime implements [`Agent`]: a name, a role,
//! a readiness flag, a long-running [`start`](Agent::start), an optional
//! synchronous [`execute`](Agent::execute), and a [`stop`](Agent::stop).
//! Shared lifecycle state (name, role, readiness, the cancel handle) lives
//! in an [`AgentLifecycle`] value that concrete agents hold as a field and
//! delegate to explicitly.

use crate::agentfabric::client_wrapper::LLMError;
use crate::agentfabric::config::{ConfigError, StrategyError};
use crate::agentfabric::fabric::FabricError;
use crate::agentfabric::message::{Message, ValidationError};
use crate::agentfabric::runtime::AgentContext;
use crate::agentfabric::tool_protocol::ToolError;
use async_trait::async_trait;
use std::error::Error;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use tokio_util::sync::CancellationToken;

/// Errors surfaced by agent operations.
///
/// Inside an agent's main loop, per-message errors are logged and skipped;
/// these values surface to callers of [`Agent::execute`] and to the runtime
/// when startup fails.
#[derive(Debug)]
pub enum AgentError {
    /// The agent does not support synchronous execution.
    NotImplemented { agent: String, operation: String },
    /// `execute` was called before the agent reported ready.
    NotReady { agent: String },
    Validation(ValidationError),
    Fabric(FabricError),
    Llm(LLMError),
    Tool(ToolError),
    Strategy(StrategyError),
    Config(ConfigError),
    /// An operation ran past its deadline.
    Timeout { operation: String },
    /// The agent's context was cancelled.
    Cancelled,
    /// Fatal startup failure; aborts the run.
    Startup { agent: String, reason: String },
}

impl fmt::Display for AgentError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AgentError::NotImplemented { agent, operation } => {
                write!(f, "agent '{}' does not implement {}", agent, operation)
            }
            AgentError::NotReady { agent } => write!(f, "agent '{}' is not ready", agent),
            AgentError::Validation(e) => write!(f, "validation: {}", e),
            AgentError::Fabric(e) => write!(f, "fabric: {}", e),
            AgentError::Llm(e) => write!(f, "{}", e),
            AgentError::Tool(e) => write!(f, "{}", e),
            AgentError::Strategy(e) => write!(f, "{}", e),
            AgentError::Config(e) => write!(f, "{}", e),
            AgentError::Timeout { operation } => write!(f, "{} timed out", operation),
            AgentError::Cancelled => write!(f, "cancelled"),
            AgentError::Startup { agent, reason } => {
                write!(f, "agent '{}' failed to start: {}", agent, reason)
            }
        }
    }
}

impl Error for AgentError {}

impl From<ValidationError> for AgentError {
    fn from(e: ValidationError) -> Self {
        AgentError::Validation(e)
    }
}

impl From<FabricError> for AgentError {
    fn from(e: FabricError) -> Self {
        AgentError::Fabric(e)
    }
}

impl From<LLMError> for AgentError {
    fn from(e: LLMError) -> Self {
        AgentError::Llm(e)
    }
}

impl From<ToolError> for AgentError {
    fn from(e: ToolError) -> Self {
        AgentError::Tool(e)
    }
}

impl From<StrategyError> for AgentError {
    fn from(e: StrategyError) -> Self {
        AgentError::Strategy(e)
    }
}

impl From<ConfigError> for AgentError {
    fn from(e: ConfigError) -> Self {
        AgentError::Config(e)
    }
}

/// Shared lifecycle state held by every concrete agent.
pub struct AgentLifecycle {
    name: String,
    role: String,
    ready: AtomicBool,
    cancel: Mutex<Option<CancellationToken>>,
}

impl AgentLifecycle {
    pub fn new(name: impl Into<String>, role: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            role: role.into(),
            ready: AtomicBool::new(false),
            cancel: Mutex::new(None),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn role(&self) -> &str {
        &self.role
    }

    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    pub fn set_ready(&self, ready: bool) {
        self.ready.store(ready, Ordering::SeqCst);
    }

    /// Remember the token driving this agent's current `start` call so that
    /// `stop` can fire it.
    pub fn bind_cancel(&self, token: CancellationToken) {
        *self.cancel.lock().unwrap() = Some(token);
    }

    /// Cancel the bound token (if any) and clear readiness.
    pub fn trigger_stop(&self) {
        self.set_ready(false);
        if let Some(token) = self.cancel.lock().unwrap().take() {
            token.cancel();
        }
    }
}

/// The capability set every agent exposes to the runtime.
#[async_trait]
pub trait Agent: Send + Sync {
    fn name(&self) -> &str;

    fn role(&self) -> &str;

    /// True once the agent's receive loop is armed.
    fn ready(&self) -> bool;

    /// Long-running main loop.  Returns when the context is cancelled or the
    /// input stream ends.  Per-message errors are logged and skipped inside
    /// the loop; only startup failures are returned.
    async fn start(&self, ctx: AgentContext) -> Result<(), AgentError>;

    /// Synchronous single-shot processing.  Purely asynchronous agents
    /// return [`AgentError::NotImplemented`].
    async fn execute(&self, ctx: AgentContext, msg: Message) -> Result<Message, AgentError>;

    /// Request the agent to wind down; idempotent.
    async fn stop(&self) -> Result<(), AgentError>;
}
