//! The runtime: agent construction, dependency-ordered startup, cancellation
//! propagation, and graceful shutdown.
//!
//! # Architecture
//!
//! ```text
//! Runtime
//!   ├─ ChannelFabric (named bounded channels)
//!   ├─ Factory registry (role -> factory)
//!   ├─ Client registry (model -> ClientWrapper)
//!   ├─ ToolRegistry (shared tool namespace)
//!   └─ Agents, one tokio task each
//! ```
//!
//! Startup resolves the agent dependency graph into topological levels and
//! starts one level at a time: every agent in a level is spawned on a fresh
//! task, and the runtime waits (up to 5 s) for the whole level to report
//! ready before advancing.  Dependencies are derived from channel wiring: an
//! agent depends on every agent whose declared outputs feed one of its
//! inputs.
//!
//! Shutdown cancels the root token; each agent observes the cancellation at
//! its next suspension point and returns.  Tasks still running when the
//! grace period (default 30 s) expires are abandoned with a warning.
//!
//! # Example
//!
//! ```rust,no_run
//! use agentfabric::{AgentDef, Runtime};
//! use agentfabric::clients::mock::MockClient;
//! use std::sync::Arc;
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let runtime = Arc::new(Runtime::new());
//! runtime.install_default_factories();
//! runtime.register_default_client(Arc::new(MockClient::new("mock-model")));
//!
//! runtime.add_agent(
//!     AgentDef::new("source", "producer")
//!         .with_interval_ms(500)
//!         .with_output("events"),
//! )?;
//! runtime.add_agent(AgentDef::new("sink", "logger").with_input("events"))?;
//!
//! runtime.start().await?;
//! // ... let it run, then:
//! runtime.shutdown().await;
//! # Ok(())
//! # }
//! ```

use crate::agentfabric::agent::{Agent, AgentError};
use crate::agentfabric::agents::{ClassifierAgent, LoggerAgent, ProducerAgent, ReactAgent};
use crate::agentfabric::aggregator::AggregatorAgent;
use crate::agentfabric::client_wrapper::ClientWrapper;
use crate::agentfabric::config::{AgentDef, ConfigError};
use crate::agentfabric::fabric::{ChannelFabric, FabricError};
use crate::agentfabric::graph::{DependencyGraph, GraphError};
use crate::agentfabric::message::Message;
use crate::agentfabric::planner::PlannerAgent;
use crate::agentfabric::tool_protocol::ToolRegistry;
use crate::agentfabric::tools::CalculatorTool;
use std::collections::HashMap;
use std::error::Error;
use std::fmt;
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::sync::Mutex as TokioMutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// How long a startup level may take to report ready.
pub const DEFAULT_READY_TIMEOUT: Duration = Duration::from_secs(5);

/// How long shutdown waits for agent tasks before abandoning them.
pub const DEFAULT_GRACE_PERIOD: Duration = Duration::from_secs(30);

/// Errors produced by runtime orchestration.
#[derive(Debug)]
pub enum RuntimeError {
    Graph(GraphError),
    Config(ConfigError),
    /// A level did not become ready within the ready timeout.
    ReadyTimeout { agent: String },
    /// The run was aborted (an agent failed fatally during startup).
    Aborted,
}

impl fmt::Display for RuntimeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RuntimeError::Graph(e) => write!(f, "{}", e),
            RuntimeError::Config(e) => write!(f, "{}", e),
            RuntimeError::ReadyTimeout { agent } => {
                write!(f, "agent '{}' did not become ready in time", agent)
            }
            RuntimeError::Aborted => write!(f, "runtime aborted during startup"),
        }
    }
}

impl Error for RuntimeError {}

impl From<GraphError> for RuntimeError {
    fn from(e: GraphError) -> Self {
        RuntimeError::Graph(e)
    }
}

impl From<ConfigError> for RuntimeError {
    fn from(e: ConfigError) -> Self {
        RuntimeError::Config(e)
    }
}

/// The context handed to every agent at start.
///
/// Carries the runtime handle (weakly, so agents never keep the runtime
/// alive) and the agent's cancellation token.  This is the explicit-passing
/// rendition of a context-injected runtime pointer: agents reach the fabric
/// through the context instead of capturing a reference at construction.
#[derive(Clone)]
pub struct AgentContext {
    runtime: Weak<Runtime>,
    cancel: CancellationToken,
}

impl AgentContext {
    /// Context for driving an agent outside a runtime (tests, `execute`
    /// callers).
    pub fn detached() -> Self {
        Self {
            runtime: Weak::new(),
            cancel: CancellationToken::new(),
        }
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// The owning runtime, if it is still alive.
    pub fn runtime(&self) -> Option<Arc<Runtime>> {
        self.runtime.upgrade()
    }

    /// Non-blocking send through the runtime's fabric.
    pub fn send(&self, target: &str, msg: Message) -> Result<(), FabricError> {
        match self.runtime() {
            Some(runtime) => runtime.fabric().send(target, msg),
            None => Err(FabricError::Closed {
                channel: target.to_string(),
            }),
        }
    }

    /// Take the receiving endpoint of `source` from the runtime's fabric.
    pub fn receive(&self, source: &str) -> Result<mpsc::Receiver<Message>, FabricError> {
        match self.runtime() {
            Some(runtime) => runtime.fabric().receive(source),
            None => Err(FabricError::UnknownChannel {
                channel: source.to_string(),
            }),
        }
    }
}

/// Builds one agent from its definition.  Installed per role.
pub type AgentFactory =
    Arc<dyn Fn(&AgentDef, &Runtime) -> Result<Arc<dyn Agent>, ConfigError> + Send + Sync>;

struct RegisteredAgent {
    def: AgentDef,
    agent: Arc<dyn Agent>,
}

/// Owns every channel and every registered agent; orchestrates their
/// lifecycle.
pub struct Runtime {
    fabric: ChannelFabric,
    factories: Mutex<HashMap<String, AgentFactory>>,
    clients: Mutex<HashMap<String, Arc<dyn ClientWrapper>>>,
    default_client: Mutex<Option<Arc<dyn ClientWrapper>>>,
    tools: Arc<ToolRegistry>,
    agents: Mutex<Vec<RegisteredAgent>>,
    handles: TokioMutex<Vec<(String, JoinHandle<()>)>>,
    cancel: CancellationToken,
    ready_timeout: Duration,
    grace_period: Duration,
}

impl Runtime {
    pub fn new() -> Self {
        Self {
            fabric: ChannelFabric::new(),
            factories: Mutex::new(HashMap::new()),
            clients: Mutex::new(HashMap::new()),
            default_client: Mutex::new(None),
            tools: Arc::new(ToolRegistry::new()),
            agents: Mutex::new(Vec::new()),
            handles: TokioMutex::new(Vec::new()),
            cancel: CancellationToken::new(),
            ready_timeout: DEFAULT_READY_TIMEOUT,
            grace_period: DEFAULT_GRACE_PERIOD,
        }
    }

    pub fn with_ready_timeout(mut self, timeout: Duration) -> Self {
        self.ready_timeout = timeout;
        self
    }

    pub fn with_grace_period(mut self, grace: Duration) -> Self {
        self.grace_period = grace;
        self
    }

    pub fn fabric(&self) -> &ChannelFabric {
        &self.fabric
    }

    pub fn tool_registry(&self) -> Arc<ToolRegistry> {
        self.tools.clone()
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Install a factory for `role`, replacing any previous one.
    pub fn register_factory(&self, role: impl Into<String>, factory: AgentFactory) {
        self.factories.lock().unwrap().insert(role.into(), factory);
    }

    /// Register a client for an exact model identifier.
    pub fn register_client(&self, model: impl Into<String>, client: Arc<dyn ClientWrapper>) {
        self.clients.lock().unwrap().insert(model.into(), client);
    }

    /// Register the client used when no model-specific client matches.
    pub fn register_default_client(&self, client: Arc<dyn ClientWrapper>) {
        *self.default_client.lock().unwrap() = Some(client);
    }

    /// Resolve the client for `model`, falling back to the default client.
    pub fn client_for(&self, agent: &str, model: &str) -> Result<Arc<dyn ClientWrapper>, ConfigError> {
        if let Some(client) = self.clients.lock().unwrap().get(model) {
            return Ok(client.clone());
        }
        if let Some(client) = self.default_client.lock().unwrap().as_ref() {
            return Ok(client.clone());
        }
        Err(ConfigError::NoClientForModel {
            agent: agent.to_string(),
            model: model.to_string(),
        })
    }

    /// Explicit registration step installing the six built-in roles:
    /// `producer`, `logger`, `classifier`, `aggregator`, `planner`, `react`.
    ///
    /// Call once during runtime construction, before
    /// [`add_agent`](Self::add_agent).  Pair with
    /// [`install_builtin_tools`](Self::install_builtin_tools) when `react`
    /// agents should see the bundled tools.
    pub fn install_default_factories(&self) {
        self.register_factory(
            "producer",
            Arc::new(|def, _runtime| Ok(Arc::new(ProducerAgent::from_def(def)?) as Arc<dyn Agent>)),
        );
        self.register_factory(
            "logger",
            Arc::new(|def, _runtime| Ok(Arc::new(LoggerAgent::from_def(def)?) as Arc<dyn Agent>)),
        );
        self.register_factory(
            "classifier",
            Arc::new(|def, runtime| {
                let client = runtime.client_for(&def.name, &def.model)?;
                Ok(Arc::new(ClassifierAgent::from_def(def, client)?) as Arc<dyn Agent>)
            }),
        );
        self.register_factory(
            "aggregator",
            Arc::new(|def, runtime| {
                // Voting strategies never call the model, so a missing client
                // is only fatal for the LLM-backed strategies.
                let strategy = def
                    .aggregator_config
                    .as_ref()
                    .map(|c| c.strategy.clone())
                    .unwrap_or_else(|| "consensus".to_string());
                let client = if strategy.starts_with("voting_") {
                    runtime.client_for(&def.name, &def.model).ok()
                } else {
                    Some(runtime.client_for(&def.name, &def.model)?)
                };
                Ok(Arc::new(AggregatorAgent::from_def(def, client)?) as Arc<dyn Agent>)
            }),
        );
        self.register_factory(
            "planner",
            Arc::new(|def, runtime| {
                let client = runtime.client_for(&def.name, &def.model)?;
                Ok(Arc::new(PlannerAgent::from_def(def, client)?) as Arc<dyn Agent>)
            }),
        );
        self.register_factory(
            "react",
            Arc::new(|def, runtime| {
                let client = runtime.client_for(&def.name, &def.model)?;
                let tools = runtime.tool_registry();
                Ok(Arc::new(ReactAgent::from_def(def, client, tools)?) as Arc<dyn Agent>)
            }),
        );
    }

    /// Register the built-in calculator into the shared tool registry.
    ///
    /// Separate from factory installation because it is async (tool
    /// discovery) and optional.
    pub async fn install_builtin_tools(&self) -> Result<(), AgentError> {
        self.tools
            .register_protocol(Arc::new(CalculatorTool::new()))
            .await?;
        Ok(())
    }

    /// Validate `def`, construct the agent via its role factory, and record
    /// it.  Fails on duplicate names and unknown roles; both are fatal
    /// configuration errors.
    pub fn add_agent(&self, def: AgentDef) -> Result<(), RuntimeError> {
        def.validate()?;
        {
            let agents = self.agents.lock().unwrap();
            if agents.iter().any(|a| a.def.name == def.name) {
                return Err(RuntimeError::Config(ConfigError::DuplicateName {
                    name: def.name,
                }));
            }
        }
        let factory = {
            let factories = self.factories.lock().unwrap();
            factories
                .get(&def.role)
                .cloned()
                .ok_or_else(|| ConfigError::UnknownRole {
                    agent: def.name.clone(),
                    role: def.role.clone(),
                })?
        };
        let agent = factory(&def, self)?;
        self.agents
            .lock()
            .unwrap()
            .push(RegisteredAgent { def, agent });
        Ok(())
    }

    /// Look up a registered agent by name.
    pub fn agent(&self, name: &str) -> Option<Arc<dyn Agent>> {
        self.agents
            .lock()
            .unwrap()
            .iter()
            .find(|a| a.def.name == name)
            .map(|a| a.agent.clone())
    }

    /// Names of every registered agent, in registration order.
    pub fn agent_names(&self) -> Vec<String> {
        self.agents
            .lock()
            .unwrap()
            .iter()
            .map(|a| a.def.name.clone())
            .collect()
    }

    // Channel wiring determines dependencies: B depends on A when one of A's
    // output targets is one of B's input sources.
    fn build_graph(&self) -> Result<DependencyGraph, GraphError> {
        let agents = self.agents.lock().unwrap();
        let mut graph = DependencyGraph::new();
        for entry in agents.iter() {
            let mut deps: Vec<String> = Vec::new();
            for input in &entry.def.inputs {
                for other in agents.iter() {
                    if other.def.name == entry.def.name {
                        continue;
                    }
                    let feeds = other.def.outputs.iter().any(|o| o.target == input.source);
                    if feeds && !deps.contains(&other.def.name) {
                        deps.push(other.def.name.clone());
                    }
                }
            }
            deps.sort();
            graph.add_node(entry.def.name.clone(), deps)?;
        }
        Ok(graph)
    }

    /// Startup cohorts for the registered agents.
    pub fn topological_levels(&self) -> Result<Vec<Vec<String>>, RuntimeError> {
        Ok(self.build_graph()?.topological_levels()?)
    }

    /// Start every agent in dependency order.
    ///
    /// Aborts before starting anything if the graph is invalid.  A fatal
    /// error inside any agent's `start` cancels the root token, which aborts
    /// the remainder of startup and winds down agents already running.
    pub async fn start(self: &Arc<Self>) -> Result<(), RuntimeError> {
        let levels = self.topological_levels()?;
        log::info!(
            "starting {} agents across {} levels",
            self.agents.lock().unwrap().len(),
            levels.len()
        );

        for (index, level) in levels.iter().enumerate() {
            log::debug!("starting level {}: {:?}", index, level);
            for name in level {
                let agent = self
                    .agent(name)
                    .expect("level names come from registered agents");
                let ctx = AgentContext {
                    runtime: Arc::downgrade(self),
                    cancel: self.cancel.child_token(),
                };
                let root_cancel = self.cancel.clone();
                let task_name = name.clone();
                let handle = tokio::spawn(async move {
                    if let Err(e) = agent.start(ctx).await {
                        log::error!("agent '{}' failed: {}", task_name, e);
                        // Startup/config failures are fatal to the run.
                        root_cancel.cancel();
                    }
                });
                self.handles.lock().await.push((name.clone(), handle));
            }
            self.wait_level_ready(level).await?;
        }
        Ok(())
    }

    async fn wait_level_ready(&self, level: &[String]) -> Result<(), RuntimeError> {
        let deadline = tokio::time::Instant::now() + self.ready_timeout;
        loop {
            if self.cancel.is_cancelled() {
                return Err(RuntimeError::Aborted);
            }
            let laggard = level.iter().find(|name| {
                self.agent(name)
                    .map(|agent| !agent.ready())
                    .unwrap_or(false)
            });
            match laggard {
                None => return Ok(()),
                Some(name) => {
                    if tokio::time::Instant::now() >= deadline {
                        return Err(RuntimeError::ReadyTimeout { agent: name.clone() });
                    }
                }
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    /// Block until the runtime is cancelled.
    pub async fn run(&self) {
        self.cancel.cancelled().await;
    }

    /// Cancel the root token and join agent tasks within the grace period.
    ///
    /// Tasks still running at grace expiry are abandoned with a warning;
    /// their pending work is dropped.
    pub async fn shutdown(&self) {
        log::info!("shutting down runtime");
        self.cancel.cancel();

        let deadline = tokio::time::Instant::now() + self.grace_period;
        let mut handles = self.handles.lock().await;
        for (name, handle) in handles.drain(..) {
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            match tokio::time::timeout(remaining, handle).await {
                Ok(Ok(())) => log::debug!("agent task '{}' joined", name),
                Ok(Err(e)) => log::warn!("agent task '{}' panicked: {}", name, e),
                Err(_) => {
                    log::warn!(
                        "agent task '{}' still running after grace period; abandoning it",
                        name
                    );
                }
            }
        }
    }
}

impl Default for Runtime {
    fn default() -> Self {
        Self::new()
    }
}
