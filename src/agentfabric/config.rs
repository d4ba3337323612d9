//! Static agent declarations and role-specific configuration blobs.
//!
//! An [`AgentDef`] is everything the runtime needs to construct one agent:
//! its name, the role that selects a factory, channel wiring, and an
//! optional role-specific config block.  The types derive `Deserialize`, so
//! callers can load them from YAML or JSON with whatever loader they prefer;
//! no file parsing happens in this crate.  Tests and embedders construct
//! definitions directly with the `with_*` builders.
//!
//! # Example
//!
//! ```rust
//! use agentfabric::AgentDef;
//!
//! let def = AgentDef::new("burst-source", "producer")
//!     .with_interval_ms(250)
//!     .with_output("bursts");
//! assert!(def.validate().is_ok());
//! ```

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::error::Error;
use std::fmt;

/// Configuration errors; always fatal to agent startup.
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigError {
    MissingField { agent: String, field: String },
    InvalidValue { agent: String, field: String, reason: String },
    DuplicateName { name: String },
    UnknownRole { agent: String, role: String },
    NoClientForModel { agent: String, model: String },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::MissingField { agent, field } => {
                write!(f, "agent '{}': missing required field '{}'", agent, field)
            }
            ConfigError::InvalidValue { agent, field, reason } => {
                write!(f, "agent '{}': invalid '{}': {}", agent, field, reason)
            }
            ConfigError::DuplicateName { name } => {
                write!(f, "duplicate agent name '{}'", name)
            }
            ConfigError::UnknownRole { agent, role } => {
                write!(f, "agent '{}': unknown role '{}'", agent, role)
            }
            ConfigError::NoClientForModel { agent, model } => {
                write!(f, "agent '{}': no client registered for model '{}'", agent, model)
            }
        }
    }
}

impl Error for ConfigError {}

/// An unrecognised strategy name reached a dispatch point.
#[derive(Debug, Clone, PartialEq)]
pub struct StrategyError {
    pub strategy: String,
}

impl StrategyError {
    pub fn new(strategy: impl Into<String>) -> Self {
        Self {
            strategy: strategy.into(),
        }
    }
}

impl fmt::Display for StrategyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown strategy '{}'", self.strategy)
    }
}

impl Error for StrategyError {}

/// One input channel binding: the agent reads from `source`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct InputRef {
    pub source: String,
}

/// One output channel binding: the agent writes to `target`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OutputRef {
    pub target: String,
}

/// Declaration of a tool an agent may call, as carried in config.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDef {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default = "default_tool_schema")]
    pub input_schema: serde_json::Value,
}

fn default_tool_schema() -> serde_json::Value {
    serde_json::json!({"type": "object", "properties": {}})
}

/// Classifier role configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassifierConfig {
    /// Candidate categories, in priority order.
    pub categories: Vec<String>,
    /// Classifications below this confidence are labelled `uncertain`.
    #[serde(default = "default_min_confidence")]
    pub min_confidence: f64,
}

fn default_min_confidence() -> f64 {
    0.5
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            categories: Vec::new(),
            min_confidence: default_min_confidence(),
        }
    }
}

/// Aggregator role configuration.
///
/// `consensus_similarity_weight` and `pairwise_similarity_weight` expose the
/// two hard-coded blend constants of the consensus score; the 0.6/0.4
/// defaults are what production runs use.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregatorConfig {
    /// One of `consensus`, `weighted`, `semantic`, `hierarchical`, `rag`,
    /// `voting_majority`, `voting_unanimous`, `voting_weighted`,
    /// `voting_confidence`.
    #[serde(default = "default_aggregator_strategy")]
    pub strategy: String,
    /// Window length in milliseconds.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    /// Per-source weights for the `weighted` strategy.
    #[serde(default)]
    pub weights: HashMap<String, f64>,
    #[serde(default = "default_semantic_threshold")]
    pub semantic_similarity_threshold: f64,
    #[serde(default = "default_consensus_similarity_weight")]
    pub consensus_similarity_weight: f64,
    #[serde(default = "default_pairwise_similarity_weight")]
    pub pairwise_similarity_weight: f64,
    /// Group size for the `hierarchical` strategy.
    #[serde(default = "default_group_size")]
    pub group_size: usize,
}

fn default_aggregator_strategy() -> String {
    "consensus".to_string()
}

fn default_timeout_ms() -> u64 {
    5000
}

fn default_semantic_threshold() -> f64 {
    0.85
}

fn default_consensus_similarity_weight() -> f64 {
    0.6
}

fn default_pairwise_similarity_weight() -> f64 {
    0.4
}

fn default_group_size() -> usize {
    3
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self {
            strategy: default_aggregator_strategy(),
            timeout_ms: default_timeout_ms(),
            weights: HashMap::new(),
            semantic_similarity_threshold: default_semantic_threshold(),
            consensus_similarity_weight: default_consensus_similarity_weight(),
            pairwise_similarity_weight: default_pairwise_similarity_weight(),
            group_size: default_group_size(),
        }
    }
}

/// Planner role configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlannerConfig {
    /// One of `chain_of_thought`, `tree_of_thought`, `react`,
    /// `backward_chaining`, `hierarchical`, `mcts`.
    #[serde(default = "default_planner_strategy")]
    pub strategy: String,
    /// Branch count for tree-of-thought.
    #[serde(default = "default_reasoning_depth")]
    pub reasoning_depth: usize,
    /// Step budget (also the MCTS depth bound and ReAct iteration bound).
    #[serde(default = "default_max_steps")]
    pub max_steps: usize,
    #[serde(default)]
    pub enable_self_critique: bool,
    /// When set, plans are analysed for parallel step groups.
    #[serde(default = "default_parallelizable_steps")]
    pub parallelizable_steps: bool,
}

fn default_planner_strategy() -> String {
    "chain_of_thought".to_string()
}

fn default_reasoning_depth() -> usize {
    3
}

fn default_max_steps() -> usize {
    10
}

fn default_parallelizable_steps() -> bool {
    true
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            strategy: default_planner_strategy(),
            reasoning_depth: default_reasoning_depth(),
            max_steps: default_max_steps(),
            enable_self_critique: false,
            parallelizable_steps: default_parallelizable_steps(),
        }
    }
}

/// Static declaration of one agent.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AgentDef {
    pub name: String,
    /// Selects the factory: `producer`, `logger`, `classifier`,
    /// `aggregator`, `planner` or `react`.
    pub role: String,
    /// Opaque model identifier used to pick a registered client.
    #[serde(default)]
    pub model: String,
    /// System prompt for LLM-backed roles.
    #[serde(default)]
    pub prompt: String,
    /// Tick period for the producer role.
    #[serde(default)]
    pub interval_ms: Option<u64>,
    #[serde(default)]
    pub inputs: Vec<InputRef>,
    #[serde(default)]
    pub outputs: Vec<OutputRef>,
    #[serde(default)]
    pub tools: Vec<ToolDef>,
    #[serde(default)]
    pub classifier_config: Option<ClassifierConfig>,
    #[serde(default)]
    pub aggregator_config: Option<AggregatorConfig>,
    #[serde(default)]
    pub planner_config: Option<PlannerConfig>,
}

impl AgentDef {
    pub fn new(name: impl Into<String>, role: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            role: role.into(),
            ..Default::default()
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.prompt = prompt.into();
        self
    }

    pub fn with_interval_ms(mut self, interval_ms: u64) -> Self {
        self.interval_ms = Some(interval_ms);
        self
    }

    pub fn with_input(mut self, source: impl Into<String>) -> Self {
        self.inputs.push(InputRef {
            source: source.into(),
        });
        self
    }

    pub fn with_output(mut self, target: impl Into<String>) -> Self {
        self.outputs.push(OutputRef {
            target: target.into(),
        });
        self
    }

    pub fn with_tool(mut self, tool: ToolDef) -> Self {
        self.tools.push(tool);
        self
    }

    pub fn with_classifier_config(mut self, config: ClassifierConfig) -> Self {
        self.classifier_config = Some(config);
        self
    }

    pub fn with_aggregator_config(mut self, config: AggregatorConfig) -> Self {
        self.aggregator_config = Some(config);
        self
    }

    pub fn with_planner_config(mut self, config: PlannerConfig) -> Self {
        self.planner_config = Some(config);
        self
    }

    /// Input channel names, in declaration order.
    pub fn input_sources(&self) -> Vec<&str> {
        self.inputs.iter().map(|i| i.source.as_str()).collect()
    }

    /// Output channel names, in declaration order.
    pub fn output_targets(&self) -> Vec<&str> {
        self.outputs.iter().map(|o| o.target.as_str()).collect()
    }

    /// Structural validation; role-specific requirements included.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.name.is_empty() {
            return Err(ConfigError::MissingField {
                agent: "<unnamed>".to_string(),
                field: "name".to_string(),
            });
        }
        if self.role.is_empty() {
            return Err(ConfigError::MissingField {
                agent: self.name.clone(),
                field: "role".to_string(),
            });
        }
        match self.role.as_str() {
            "producer" => {
                match self.interval_ms {
                    None => {
                        return Err(ConfigError::MissingField {
                            agent: self.name.clone(),
                            field: "interval_ms".to_string(),
                        })
                    }
                    Some(0) => {
                        return Err(ConfigError::InvalidValue {
                            agent: self.name.clone(),
                            field: "interval_ms".to_string(),
                            reason: "must be greater than zero".to_string(),
                        })
                    }
                    Some(_) => {}
                }
                if self.outputs.is_empty() {
                    return Err(ConfigError::MissingField {
                        agent: self.name.clone(),
                        field: "outputs".to_string(),
                    });
                }
            }
            "logger" | "aggregator" | "classifier" | "planner" | "react" => {
                if self.inputs.is_empty() {
                    return Err(ConfigError::MissingField {
                        agent: self.name.clone(),
                        field: "inputs".to_string(),
                    });
                }
                if self.role == "classifier" {
                    let categories_empty = self
                        .classifier_config
                        .as_ref()
                        .map(|c| c.categories.is_empty())
                        .unwrap_or(true);
                    if categories_empty {
                        return Err(ConfigError::MissingField {
                            agent: self.name.clone(),
                            field: "classifier_config.categories".to_string(),
                        });
                    }
                }
            }
            // Unknown roles are reported by the runtime, which knows the
            // installed factories.
            _ => {}
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_blob_deserialization_by_key() {
        let json = serde_json::json!({
            "name": "fuser",
            "role": "aggregator",
            "model": "mock-model",
            "inputs": [{"source": "a"}, {"source": "b"}],
            "outputs": [{"target": "out"}],
            "aggregator_config": {"strategy": "voting_majority", "timeout_ms": 100}
        });
        let def: AgentDef = serde_json::from_value(json).unwrap();
        let config = def.aggregator_config.unwrap();
        assert_eq!(config.strategy, "voting_majority");
        assert_eq!(config.timeout_ms, 100);
        // Unspecified keys take defaults.
        assert_eq!(config.semantic_similarity_threshold, 0.85);
        assert_eq!(config.consensus_similarity_weight, 0.6);
    }

    #[test]
    fn test_producer_requires_interval_and_output() {
        let def = AgentDef::new("p", "producer").with_output("out");
        match def.validate() {
            Err(ConfigError::MissingField { field, .. }) => assert_eq!(field, "interval_ms"),
            other => panic!("expected missing interval, got {:?}", other),
        }

        let def = AgentDef::new("p", "producer").with_interval_ms(100);
        match def.validate() {
            Err(ConfigError::MissingField { field, .. }) => assert_eq!(field, "outputs"),
            other => panic!("expected missing outputs, got {:?}", other),
        }

        let def = AgentDef::new("p", "producer")
            .with_interval_ms(100)
            .with_output("out");
        assert!(def.validate().is_ok());
    }

    #[test]
    fn test_zero_interval_rejected() {
        let def = AgentDef::new("p", "producer")
            .with_interval_ms(0)
            .with_output("out");
        match def.validate() {
            Err(ConfigError::InvalidValue { field, .. }) => assert_eq!(field, "interval_ms"),
            other => panic!("expected invalid interval, got {:?}", other),
        }
    }

    #[test]
    fn test_classifier_requires_categories() {
        let def = AgentDef::new("c", "classifier").with_input("in");
        match def.validate() {
            Err(ConfigError::MissingField { field, .. }) => {
                assert_eq!(field, "classifier_config.categories")
            }
            other => panic!("expected missing categories, got {:?}", other),
        }
    }

    #[test]
    fn test_planner_config_defaults() {
        let config = PlannerConfig::default();
        assert_eq!(config.strategy, "chain_of_thought");
        assert_eq!(config.reasoning_depth, 3);
        assert_eq!(config.max_steps, 10);
        assert!(!config.enable_self_critique);
        assert!(config.parallelizable_steps);
    }
}
