//! Windowed multi-input fusion engine.
//!
//! An [`AggregatorAgent`] reads from *multiple* input channels, buffers the
//! latest arrival per source, and fuses the buffered inputs into a single
//! output message on a timer.  Nine strategies are available: five LLM-backed
//! (`consensus`, `weighted`, `semantic`, `hierarchical`, `rag`) and four
//! deterministic votes (`voting_majority`, `voting_unanimous`,
//! `voting_weighted`, `voting_confidence`; see [`crate::agentfabric::voting`]).
//!
//! # Windowing
//!
//! The buffer is a map keyed by source channel; a new arrival from the same
//! source **overwrites** the previous value.  Every `timeout_ms`
//! (default 5000) the buffer is snapshotted and cleared atomically; a
//! non-empty snapshot is dispatched to the strategy and the result emitted
//! on every declared output.  Empty windows are skipped.  An LLM failure
//! drops that window's snapshot; the same inputs are never retried, new
//! arrivals accumulate for the next window.
//!
//! # Consensus level
//!
//! LLM strategies report a `consensus_level` in `[0, 1]`.  For `consensus`
//! and `weighted` it blends (a) the mean similarity of each input to the
//! synthesized output and (b) the mean pairwise input similarity, weighted
//! 0.6/0.4 by default (tunable via
//! [`AggregatorConfig`](crate::agentfabric::config::AggregatorConfig)).

use crate::agentfabric::agent::{Agent, AgentError, AgentLifecycle};
use crate::agentfabric::client_wrapper::{
    ClientWrapper, CompletionRequest, LLMError, LLMErrorKind,
};
use crate::agentfabric::clients::common::{send_structured_with_retry, send_with_retry};
use crate::agentfabric::config::{AgentDef, AggregatorConfig, ConfigError, StrategyError};
use crate::agentfabric::message::{validate_payload, Message};
use crate::agentfabric::runtime::AgentContext;
use crate::agentfabric::similarity::{
    cluster_by_similarity, mean_pairwise_similarity, similarity, SemanticCluster,
};
use crate::agentfabric::voting;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::error::Error;
use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// One buffered input awaiting the next window.
#[derive(Debug, Clone)]
pub struct AgentInput {
    /// Source channel the input arrived on.
    pub agent_name: String,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    /// Parsed from payload metadata when present; strategies fall back to
    /// their own defaults when absent.
    pub confidence: Option<f64>,
    /// The payload parsed as JSON, or `Null` for plain-text payloads.
    pub metadata: serde_json::Value,
}

impl AgentInput {
    /// Build an input from an arriving message, extracting `confidence`
    /// from the payload when it decodes as a JSON object.
    pub fn from_message(source: &str, msg: &Message) -> Self {
        let metadata: serde_json::Value =
            serde_json::from_str(&msg.payload).unwrap_or(serde_json::Value::Null);
        let confidence = metadata
            .get("confidence")
            .and_then(|v| v.as_f64())
            .filter(|c| (0.0..=1.0).contains(c));
        Self {
            agent_name: source.to_string(),
            content: msg.payload.clone(),
            timestamp: msg.timestamp,
            confidence,
            metadata,
        }
    }
}

/// Errors produced by aggregation.
#[derive(Debug)]
pub enum AggregationError {
    /// A strategy was dispatched with an empty input set.
    NoInputs,
    /// `voting_unanimous` found a dissenting input.
    NoUnanimousAgreement { dissenter: String, first: String },
    Strategy(StrategyError),
    Llm(LLMError),
    /// The model's structured response did not match the expected shape.
    MalformedResponse(String),
}

impl fmt::Display for AggregationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AggregationError::NoInputs => write!(f, "no inputs to aggregate"),
            AggregationError::NoUnanimousAgreement { dissenter, first } => write!(
                f,
                "no unanimous agreement: '{}' disagrees with '{}'",
                dissenter, first
            ),
            AggregationError::Strategy(e) => write!(f, "{}", e),
            AggregationError::Llm(e) => write!(f, "{}", e),
            AggregationError::MalformedResponse(reason) => {
                write!(f, "malformed aggregation response: {}", reason)
            }
        }
    }
}

impl Error for AggregationError {}

impl From<LLMError> for AggregationError {
    fn from(e: LLMError) -> Self {
        AggregationError::Llm(e)
    }
}

/// One conflict the model resolved while synthesizing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConflictResolution {
    pub topic: String,
    pub sources: Vec<String>,
    pub resolution: String,
    pub reasoning: String,
}

/// The fused output of one window.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregationResult {
    pub aggregated_content: String,
    /// Source channels that contributed, sorted.
    pub sources: Vec<String>,
    pub strategy_used: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub conflicts_resolved: Option<Vec<ConflictResolution>>,
    /// Agreement score in `[0, 1]`.
    pub consensus_level: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary_insights: Option<String>,
    pub tokens_used: usize,
    pub processing_time_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub semantic_clusters: Option<Vec<SemanticCluster>>,
}

// Shape of the structured response requested from the model by the
// consensus and weighted strategies.
#[derive(Debug, Deserialize)]
struct SynthesisResponse {
    aggregated_content: String,
    #[serde(default)]
    conflicts_resolved: Vec<ConflictResolution>,
    #[serde(default)]
    summary_insights: String,
}

fn synthesis_schema() -> serde_json::Value {
    serde_json::json!({
        "type": "object",
        "properties": {
            "aggregated_content": {"type": "string"},
            "conflicts_resolved": {
                "type": "array",
                "items": {
                    "type": "object",
                    "properties": {
                        "topic": {"type": "string"},
                        "sources": {"type": "array", "items": {"type": "string"}},
                        "resolution": {"type": "string"},
                        "reasoning": {"type": "string"}
                    },
                    "required": ["topic", "sources", "resolution", "reasoning"]
                }
            },
            "summary_insights": {"type": "string"}
        },
        "required": ["aggregated_content"]
    })
}

#[derive(Default)]
struct AggregatorStats {
    total: usize,
    consensus_sum: f64,
    conflicts_resolved: usize,
    time_sum_ms: u64,
    tokens_used: usize,
}

impl AggregatorStats {
    fn record(&mut self, agent: &str, result: &AggregationResult) {
        self.total += 1;
        self.consensus_sum += result.consensus_level;
        self.conflicts_resolved += result
            .conflicts_resolved
            .as_ref()
            .map(|c| c.len())
            .unwrap_or(0);
        self.time_sum_ms += result.processing_time_ms;
        self.tokens_used += result.tokens_used;

        if self.total % 10 == 0 {
            log::info!(
                "aggregator '{}' stats: total={} avg_consensus={:.3} conflicts_resolved={} avg_time={}ms tokens_used={}",
                agent,
                self.total,
                self.consensus_sum / self.total as f64,
                self.conflicts_resolved,
                self.time_sum_ms / self.total as u64,
                self.tokens_used
            );
        }
    }
}

/// Fuses messages arriving on multiple input channels into a single output
/// message per window.
pub struct AggregatorAgent {
    lifecycle: AgentLifecycle,
    inputs: Vec<String>,
    outputs: Vec<String>,
    prompt: String,
    model: String,
    config: AggregatorConfig,
    client: Option<Arc<dyn ClientWrapper>>,
    buffer: Arc<Mutex<HashMap<String, AgentInput>>>,
    stats: Mutex<AggregatorStats>,
}

impl AggregatorAgent {
    /// Build from a definition.  `client` may be `None` only for the voting
    /// strategies, which never call the model.
    pub fn from_def(
        def: &AgentDef,
        client: Option<Arc<dyn ClientWrapper>>,
    ) -> Result<Self, ConfigError> {
        let config = def.aggregator_config.clone().unwrap_or_default();
        Ok(Self {
            lifecycle: AgentLifecycle::new(def.name.clone(), "aggregator"),
            inputs: def.inputs.iter().map(|i| i.source.clone()).collect(),
            outputs: def.outputs.iter().map(|o| o.target.clone()).collect(),
            prompt: def.prompt.clone(),
            model: def.model.clone(),
            config,
            client,
            buffer: Arc::new(Mutex::new(HashMap::new())),
            stats: Mutex::new(AggregatorStats::default()),
        })
    }

    /// The configured window length.
    pub fn window(&self) -> Duration {
        Duration::from_millis(self.config.timeout_ms)
    }

    /// Number of inputs currently buffered for the next window.
    pub fn buffered_inputs(&self) -> usize {
        self.buffer.lock().unwrap().len()
    }

    fn client(&self) -> Result<&Arc<dyn ClientWrapper>, AggregationError> {
        self.client.as_ref().ok_or_else(|| {
            AggregationError::Llm(LLMError::new(
                LLMErrorKind::InvalidRequest,
                format!("strategy '{}' requires a model client", self.config.strategy),
            ))
        })
    }

    /// Dispatch one window's inputs to the configured strategy.
    ///
    /// Inputs are sorted by source name first so prompts, clustering and
    /// grouping are deterministic for a given snapshot.
    pub async fn aggregate(
        &self,
        mut inputs: Vec<AgentInput>,
    ) -> Result<AggregationResult, AggregationError> {
        if inputs.is_empty() {
            return Err(AggregationError::NoInputs);
        }
        inputs.sort_by(|a, b| a.agent_name.cmp(&b.agent_name));

        let started = std::time::Instant::now();
        let mut result = match self.config.strategy.as_str() {
            "consensus" => self.aggregate_consensus(&inputs).await?,
            "weighted" => self.aggregate_weighted(&inputs).await?,
            "semantic" => self.aggregate_semantic(&inputs).await?,
            "hierarchical" => self.aggregate_hierarchical(&inputs).await?,
            "rag" => self.aggregate_rag(&inputs).await?,
            "voting_majority" => vote_result(voting::majority_vote(&inputs)?, &inputs),
            "voting_unanimous" => vote_result(voting::unanimous_vote(&inputs)?, &inputs),
            "voting_weighted" => vote_result(voting::weighted_vote(&inputs)?, &inputs),
            "voting_confidence" => vote_result(voting::confidence_vote(&inputs)?, &inputs),
            other => return Err(AggregationError::Strategy(StrategyError::new(other))),
        };
        result.processing_time_ms = started.elapsed().as_millis() as u64;
        result.consensus_level = result.consensus_level.max(0.0).min(1.0);
        Ok(result)
    }

    // 0.6/0.4 blend of similarity-to-output and pairwise similarity, with
    // per-input confidence weighting on the first term.
    fn consensus_level(&self, inputs: &[AgentInput], aggregated: &str) -> f64 {
        let mut weighted_sum = 0.0;
        let mut weight_total = 0.0;
        for input in inputs {
            let weight = input.confidence.unwrap_or(1.0);
            weighted_sum += weight * similarity(&input.content, aggregated);
            weight_total += weight;
        }
        let to_output = if weight_total > 0.0 {
            weighted_sum / weight_total
        } else {
            0.0
        };

        let contents: Vec<&str> = inputs.iter().map(|i| i.content.as_str()).collect();
        let pairwise = mean_pairwise_similarity(&contents);

        let blended = self.config.consensus_similarity_weight * to_output
            + self.config.pairwise_similarity_weight * pairwise;
        blended.max(0.0).min(1.0)
    }

    // Pairwise similarity weighted by confidence products; used by the
    // weighted strategy.
    fn weighted_consensus_level(&self, inputs: &[AgentInput], aggregated: &str) -> f64 {
        let mut weighted_sum = 0.0;
        let mut weight_total = 0.0;
        for input in inputs {
            let weight = input.confidence.unwrap_or(1.0);
            weighted_sum += weight * similarity(&input.content, aggregated);
            weight_total += weight;
        }
        let to_output = if weight_total > 0.0 {
            weighted_sum / weight_total
        } else {
            0.0
        };

        let mut pair_sum = 0.0;
        let mut pair_weight = 0.0;
        for i in 0..inputs.len() {
            for j in (i + 1)..inputs.len() {
                let product =
                    inputs[i].confidence.unwrap_or(1.0) * inputs[j].confidence.unwrap_or(1.0);
                pair_sum += product * similarity(&inputs[i].content, &inputs[j].content);
                pair_weight += product;
            }
        }
        let pairwise = if pair_weight > 0.0 {
            pair_sum / pair_weight
        } else {
            1.0
        };

        let blended = self.config.consensus_similarity_weight * to_output
            + self.config.pairwise_similarity_weight * pairwise;
        blended.max(0.0).min(1.0)
    }

    async fn synthesize(
        &self,
        system: &str,
        user: String,
    ) -> Result<(SynthesisResponse, usize), AggregationError> {
        let client = self.client()?;
        let request = CompletionRequest::new(&self.model)
            .with_system(system)
            .with_user(&user)
            .with_max_tokens(2048);
        let response =
            send_structured_with_retry(client.as_ref(), request, synthesis_schema(), true).await?;
        let tokens = response.completion.usage.total_tokens;
        let parsed: SynthesisResponse = serde_json::from_value(response.data)
            .map_err(|e| AggregationError::MalformedResponse(e.to_string()))?;
        Ok((parsed, tokens))
    }

    async fn aggregate_consensus(
        &self,
        inputs: &[AgentInput],
    ) -> Result<AggregationResult, AggregationError> {
        let mut user = String::from(
            "Synthesize the following agent outputs into a single consensus view. \
             Resolve conflicts explicitly.\n\n",
        );
        for input in inputs {
            user.push_str(&format!("Agent {}: {}\n", input.agent_name, input.content));
        }

        let (parsed, tokens) = self.synthesize(&self.prompt, user).await?;
        let consensus_level = self.consensus_level(inputs, &parsed.aggregated_content);
        Ok(AggregationResult {
            aggregated_content: parsed.aggregated_content,
            sources: source_names(inputs),
            strategy_used: "consensus".to_string(),
            conflicts_resolved: Some(parsed.conflicts_resolved),
            consensus_level,
            summary_insights: Some(parsed.summary_insights).filter(|s| !s.is_empty()),
            tokens_used: tokens,
            processing_time_ms: 0,
            semantic_clusters: None,
        })
    }

    async fn aggregate_weighted(
        &self,
        inputs: &[AgentInput],
    ) -> Result<AggregationResult, AggregationError> {
        // Configured weights overwrite whatever confidence arrived with the
        // input, then entries are presented heaviest-first.
        let mut weighted: Vec<AgentInput> = inputs.to_vec();
        for input in &mut weighted {
            if let Some(weight) = self.config.weights.get(&input.agent_name) {
                input.confidence = Some(*weight);
            }
        }
        weighted.sort_by(|a, b| {
            b.confidence
                .unwrap_or(1.0)
                .partial_cmp(&a.confidence.unwrap_or(1.0))
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        let mut user = String::from(
            "Synthesize the following agent outputs, giving each the indicated weight.\n\n",
        );
        for input in &weighted {
            user.push_str(&format!(
                "Agent {} (weight {:.2}): {}\n",
                input.agent_name,
                input.confidence.unwrap_or(1.0),
                input.content
            ));
        }

        let (parsed, tokens) = self.synthesize(&self.prompt, user).await?;
        let consensus_level = self.weighted_consensus_level(&weighted, &parsed.aggregated_content);
        Ok(AggregationResult {
            aggregated_content: parsed.aggregated_content,
            sources: source_names(inputs),
            strategy_used: "weighted".to_string(),
            conflicts_resolved: Some(parsed.conflicts_resolved),
            consensus_level,
            summary_insights: Some(parsed.summary_insights).filter(|s| !s.is_empty()),
            tokens_used: tokens,
            processing_time_ms: 0,
            semantic_clusters: None,
        })
    }

    async fn aggregate_semantic(
        &self,
        inputs: &[AgentInput],
    ) -> Result<AggregationResult, AggregationError> {
        let pairs: Vec<(String, String)> = inputs
            .iter()
            .map(|i| (i.agent_name.clone(), i.content.clone()))
            .collect();
        let clusters = cluster_by_similarity(&pairs, self.config.semantic_similarity_threshold);

        let mut user = String::from(
            "The following clusters group agent outputs by similarity. \
             Synthesize them into a single coherent answer.\n\n",
        );
        for cluster in &clusters {
            user.push_str(&format!(
                "Cluster {} ({} members: {}): {}\n",
                cluster.id,
                cluster.members.len(),
                cluster.members.join(", "),
                cluster.core_concept
            ));
        }

        let client = self.client()?;
        let request = CompletionRequest::new(&self.model)
            .with_system(&self.prompt)
            .with_user(&user)
            .with_max_tokens(2048);
        let response = send_with_retry(client.as_ref(), request).await?;
        let consensus_level = if clusters.is_empty() {
            0.0
        } else {
            clusters.iter().map(|c| c.avg_similarity).sum::<f64>() / clusters.len() as f64
        };

        Ok(AggregationResult {
            aggregated_content: response.content,
            sources: source_names(inputs),
            strategy_used: "semantic".to_string(),
            conflicts_resolved: None,
            consensus_level,
            summary_insights: None,
            tokens_used: response.usage.total_tokens,
            processing_time_ms: 0,
            semantic_clusters: Some(clusters),
        })
    }

    async fn aggregate_hierarchical(
        &self,
        inputs: &[AgentInput],
    ) -> Result<AggregationResult, AggregationError> {
        let client = self.client()?;
        let group_size = self.config.group_size.max(1);
        let mut tokens = 0usize;

        let mut summaries: Vec<String> = Vec::new();
        for group in inputs.chunks(group_size) {
            let mut user = String::from("Summarize the key points of these analyses:\n\n");
            for input in group {
                user.push_str(&format!("{}: {}\n", input.agent_name, input.content));
            }
            let request = CompletionRequest::new(&self.model)
                .with_system(&self.prompt)
                .with_user(&user)
                .with_temperature(0.3)
                .with_max_tokens(200);
            let response = send_with_retry(client.as_ref(), request).await?;
            tokens += response.usage.total_tokens;
            summaries.push(response.content);
        }

        let mut user =
            String::from("Combine these group summaries into a single final synthesis:\n\n");
        for (index, summary) in summaries.iter().enumerate() {
            user.push_str(&format!("Group {}: {}\n", index + 1, summary));
        }
        let request = CompletionRequest::new(&self.model)
            .with_system(&self.prompt)
            .with_user(&user)
            .with_max_tokens(2048);
        let response = send_with_retry(client.as_ref(), request).await?;
        tokens += response.usage.total_tokens;

        Ok(AggregationResult {
            aggregated_content: response.content,
            sources: source_names(inputs),
            strategy_used: "hierarchical".to_string(),
            conflicts_resolved: None,
            consensus_level: 0.8,
            summary_insights: None,
            tokens_used: tokens,
            processing_time_ms: 0,
            semantic_clusters: None,
        })
    }

    async fn aggregate_rag(
        &self,
        inputs: &[AgentInput],
    ) -> Result<AggregationResult, AggregationError> {
        let client = self.client()?;
        let mut user = String::from(
            "Using the following source excerpts, synthesize a grounded answer. \
             Cite sources by name where relevant.\n\n",
        );
        for input in inputs {
            user.push_str(&format!("[{}]: {}\n", input.agent_name, input.content));
        }
        let request = CompletionRequest::new(&self.model)
            .with_system(&self.prompt)
            .with_user(&user)
            .with_max_tokens(2048);
        let response = send_with_retry(client.as_ref(), request).await?;

        Ok(AggregationResult {
            aggregated_content: response.content,
            sources: source_names(inputs),
            strategy_used: "rag".to_string(),
            conflicts_resolved: None,
            consensus_level: 0.85,
            summary_insights: None,
            tokens_used: response.usage.total_tokens,
            processing_time_ms: 0,
            semantic_clusters: None,
        })
    }

    async fn run_window(&self, ctx: &AgentContext) {
        // Snapshot-and-clear must be atomic with respect to the reader
        // tasks, hence the single lock acquisition.
        let snapshot: Vec<AgentInput> = {
            let mut buffer = self.buffer.lock().unwrap();
            buffer.drain().map(|(_, input)| input).collect()
        };
        if snapshot.is_empty() {
            return;
        }

        match self.aggregate(snapshot).await {
            Ok(result) => {
                self.stats.lock().unwrap().record(self.lifecycle.name(), &result);
                let payload = match serde_json::to_string(&result) {
                    Ok(payload) => payload,
                    Err(e) => {
                        log::error!(
                            "aggregator '{}' failed to serialize result: {}",
                            self.lifecycle.name(),
                            e
                        );
                        return;
                    }
                };
                for target in &self.outputs {
                    let msg = Message::new("aggregation", payload.clone());
                    if let Err(e) = ctx.send(target, msg) {
                        log::warn!(
                            "aggregator '{}' could not emit to '{}': {}",
                            self.lifecycle.name(),
                            target,
                            e
                        );
                    }
                }
            }
            Err(e) => {
                // This window's inputs are gone; new arrivals accumulate for
                // the next tick.
                log::warn!(
                    "aggregator '{}' window failed ({}), skipping",
                    self.lifecycle.name(),
                    e
                );
            }
        }
    }
}

fn source_names(inputs: &[AgentInput]) -> Vec<String> {
    let mut names: Vec<String> = inputs.iter().map(|i| i.agent_name.clone()).collect();
    names.sort();
    names
}

fn vote_result(outcome: voting::VoteOutcome, inputs: &[AgentInput]) -> AggregationResult {
    AggregationResult {
        aggregated_content: outcome.content,
        sources: source_names(inputs),
        strategy_used: outcome.strategy.to_string(),
        conflicts_resolved: None,
        consensus_level: outcome.agreement,
        summary_insights: None,
        tokens_used: 0,
        processing_time_ms: 0,
        semantic_clusters: None,
    }
}

#[async_trait]
impl Agent for AggregatorAgent {
    fn name(&self) -> &str {
        self.lifecycle.name()
    }

    fn role(&self) -> &str {
        self.lifecycle.role()
    }

    fn ready(&self) -> bool {
        self.lifecycle.is_ready()
    }

    async fn start(&self, ctx: AgentContext) -> Result<(), AgentError> {
        self.lifecycle.bind_cancel(ctx.cancel_token().clone());

        // One reader task per input channel; all of them funnel into the
        // shared buffer.  Failing to claim a receiver is a startup error.
        for source in &self.inputs {
            let mut receiver = ctx.receive(source)?;
            let buffer = self.buffer.clone();
            let source = source.clone();
            let cancel = ctx.cancel_token().clone();
            let agent_name = self.lifecycle.name().to_string();
            tokio::spawn(async move {
                loop {
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        received = receiver.recv() => match received {
                            Some(msg) => {
                                if let Err(e) = validate_payload(&msg.payload) {
                                    log::warn!(
                                        "aggregator '{}' dropping invalid message from '{}': {}",
                                        agent_name, source, e
                                    );
                                    continue;
                                }
                                let input = AgentInput::from_message(&source, &msg);
                                buffer.lock().unwrap().insert(source.clone(), input);
                            }
                            None => break,
                        },
                    }
                }
            });
        }

        self.lifecycle.set_ready(true);
        log::info!(
            "aggregator '{}' ready: strategy={} window={}ms inputs={:?}",
            self.lifecycle.name(),
            self.config.strategy,
            self.config.timeout_ms,
            self.inputs
        );

        let mut ticker = tokio::time::interval(self.window());
        // The first interval tick completes immediately; swallow it so the
        // first window spans a full timeout_ms.
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = ctx.cancel_token().cancelled() => break,
                _ = ticker.tick() => self.run_window(&ctx).await,
            }
        }

        self.lifecycle.set_ready(false);
        Ok(())
    }

    async fn execute(&self, _ctx: AgentContext, _msg: Message) -> Result<Message, AgentError> {
        Err(AgentError::NotImplemented {
            agent: self.lifecycle.name().to_string(),
            operation: "execute".to_string(),
        })
    }

    async fn stop(&self) -> Result<(), AgentError> {
        self.lifecycle.trigger_stop();
        Ok(())
    }
}
