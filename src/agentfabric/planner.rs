//! Multi-strategy plan synthesis with caching and metacognitive feedback.
//!
//! A [`PlannerAgent`] turns a natural-language problem statement into a
//! [`ReasoningPlan`]: an analysed problem, numbered steps with prerequisite
//! edges, a critical path, parallel groups, and token accounting.  Six
//! strategies are available:
//!
//! - `chain_of_thought`: one structured-schema model call (the default)
//! - `tree_of_thought`: several branches at rising temperature with
//!   rotating emphases, each scored by a separate evaluation call
//! - `react`: a Thought/Action/Observation transcript folded into a
//!   single-step plan
//! - `backward_chaining`: goal extraction, recursive subgoal decomposition
//!   (depth-bounded), and a reversal pass that turns the goal tree into
//!   forward steps
//! - `hierarchical`: a chain-of-thought high-level plan whose steps are
//!   deterministically decomposed into execute/verify sub-steps
//! - `mcts`: Monte-Carlo Tree Search (see [`crate::agentfabric::mcts`])
//!
//! # Cache and learning
//!
//! Plans are cached by the *verbatim* problem string; a repeat problem
//! returns the cached plan without any model call.  The cache is unbounded
//! (acceptable for the intended workloads; it clears on restart).  Every
//! plan appends a history record (bounded to the last 100); every ten plans
//! the planner re-derives feature weights from the successful history via an
//! exponential moving average, and problems that match a high-weight feature
//! get a small confidence boost on every step.

use crate::agentfabric::agent::{Agent, AgentError, AgentLifecycle};
use crate::agentfabric::client_wrapper::{ClientWrapper, CompletionRequest, LLMError};
use crate::agentfabric::clients::common::{send_structured_with_retry, send_with_retry};
use crate::agentfabric::config::{AgentDef, ConfigError, PlannerConfig, StrategyError};
use crate::agentfabric::mcts::MctsSearch;
use crate::agentfabric::message::{validate_payload, Message};
use crate::agentfabric::runtime::AgentContext;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::error::Error;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use uuid::Uuid;

/// Depth bound for backward-chaining goal decomposition.
pub const MAX_GOAL_DEPTH: usize = 3;

/// History records kept per planner.
pub const HISTORY_LIMIT: usize = 100;

/// Plans between learning-insight refreshes.
pub const LEARNING_INTERVAL: usize = 10;

/// Feature keywords the learning loop tracks in problem statements.
pub const FEATURE_KEYWORDS: [&str; 6] =
    ["optimize", "analyze", "implement", "design", "debug", "refactor"];

const EMPHASES: [&str; 4] = ["efficiency", "robustness", "creativity", "scalability"];

/// Errors produced by plan synthesis.
#[derive(Debug)]
pub enum PlannerError {
    Strategy(StrategyError),
    Llm(LLMError),
    /// The model's output did not yield a usable plan.
    MalformedPlan(String),
}

impl fmt::Display for PlannerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PlannerError::Strategy(e) => write!(f, "{}", e),
            PlannerError::Llm(e) => write!(f, "{}", e),
            PlannerError::MalformedPlan(reason) => write!(f, "malformed plan: {}", reason),
        }
    }
}

impl Error for PlannerError {}

impl From<LLMError> for PlannerError {
    fn from(e: LLMError) -> Self {
        PlannerError::Llm(e)
    }
}

/// Step cost classification.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Complexity {
    Low,
    Medium,
    High,
}

impl Default for Complexity {
    fn default() -> Self {
        Complexity::Medium
    }
}

/// How the plan's steps should be scheduled by an executor.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStrategy {
    Sequential,
    ParallelOptimized,
}

/// The model's reading of the problem.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProblemAnalysis {
    #[serde(rename = "type", default)]
    pub problem_type: String,
    #[serde(default)]
    pub domain: String,
    #[serde(default)]
    pub constraints: Vec<String>,
    #[serde(default)]
    pub challenges: Vec<String>,
    #[serde(default)]
    pub assumptions: Vec<String>,
}

/// One plan step.  Step numbers are 1-based and unique within a plan;
/// prerequisites may only reference lower step numbers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanStep {
    pub step_number: usize,
    pub action: String,
    #[serde(default)]
    pub reasoning: String,
    #[serde(default)]
    pub prerequisites: Vec<usize>,
    #[serde(default)]
    pub expected_outcome: String,
    #[serde(default)]
    pub complexity: Complexity,
    #[serde(default)]
    pub can_parallelize: bool,
    #[serde(default = "default_step_confidence")]
    pub confidence: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alternatives: Option<Vec<String>>,
}

fn default_step_confidence() -> f64 {
    0.8
}

/// A complete synthesized plan.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReasoningPlan {
    pub problem: String,
    pub analysis: ProblemAnalysis,
    pub steps: Vec<PlanStep>,
    pub execution_strategy: ExecutionStrategy,
    /// Steps with no prerequisites.  An approximation of the true critical
    /// path, kept for compatibility with downstream consumers.
    pub critical_path: Vec<usize>,
    pub parallel_groups: Vec<Vec<usize>>,
    #[serde(default)]
    pub success_criteria: Vec<String>,
    pub planning_strategy: String,
    pub tokens_used: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub self_critique: Option<String>,
}

/// One entry in the planner's bounded history.
#[derive(Debug, Clone)]
pub struct PlanRecord {
    pub plan_id: String,
    pub problem: String,
    pub total_steps: usize,
    pub tokens_used: usize,
    /// `Some(true)` once synthesis succeeded; callers that execute plans can
    /// overwrite the outcome via [`PlannerAgent::record_outcome`].
    pub success: Option<bool>,
}

// History, insights and the plan counter share one lock; none of the
// critical sections await.
#[derive(Default)]
struct PlannerMemory {
    history: VecDeque<PlanRecord>,
    insights: HashMap<String, f64>,
    total_plans: usize,
}

// Wire shapes for the structured chain-of-thought call.
#[derive(Debug, Deserialize)]
struct CotResponse {
    #[serde(default)]
    analysis: ProblemAnalysis,
    steps: Vec<PlanStep>,
    #[serde(default)]
    success_criteria: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct BranchScore {
    #[serde(default)]
    completeness: f64,
    #[serde(default)]
    feasibility: f64,
    #[serde(default)]
    efficiency: f64,
    #[serde(default)]
    clarity: f64,
    #[serde(default)]
    overall: f64,
}

#[derive(Debug, Deserialize)]
struct SubgoalEntry {
    subgoal: String,
    #[serde(default)]
    preconditions: Vec<String>,
    #[serde(default)]
    action: String,
}

struct GoalNode {
    goal: String,
    action: Option<String>,
    children: Vec<GoalNode>,
}

fn plan_schema() -> serde_json::Value {
    serde_json::json!({
        "type": "object",
        "properties": {
            "problem": {"type": "string"},
            "analysis": {
                "type": "object",
                "properties": {
                    "type": {"type": "string"},
                    "domain": {"type": "string"},
                    "constraints": {"type": "array", "items": {"type": "string"}},
                    "challenges": {"type": "array", "items": {"type": "string"}},
                    "assumptions": {"type": "array", "items": {"type": "string"}}
                }
            },
            "steps": {
                "type": "array",
                "items": {
                    "type": "object",
                    "properties": {
                        "step_number": {"type": "integer"},
                        "action": {"type": "string"},
                        "reasoning": {"type": "string"},
                        "prerequisites": {"type": "array", "items": {"type": "integer"}},
                        "expected_outcome": {"type": "string"},
                        "complexity": {"enum": ["low", "medium", "high"]},
                        "confidence": {"type": "number"},
                        "can_parallelize": {"type": "boolean"}
                    },
                    "required": ["step_number", "action"]
                }
            },
            "success_criteria": {"type": "array", "items": {"type": "string"}},
            "total_complexity": {"type": "string"}
        },
        "required": ["steps"]
    })
}

fn score_schema() -> serde_json::Value {
    serde_json::json!({
        "type": "object",
        "properties": {
            "completeness": {"type": "number"},
            "feasibility": {"type": "number"},
            "efficiency": {"type": "number"},
            "clarity": {"type": "number"},
            "overall": {"type": "number"}
        },
        "required": ["overall"]
    })
}

/// Produces [`ReasoningPlan`]s from natural-language problem statements.
pub struct PlannerAgent {
    lifecycle: AgentLifecycle,
    inputs: Vec<String>,
    outputs: Vec<String>,
    prompt: String,
    model: String,
    config: PlannerConfig,
    client: Arc<dyn ClientWrapper>,
    // Verbatim problem -> latest plan.  Unbounded; cleared on restart.
    cache: Mutex<HashMap<String, Arc<ReasoningPlan>>>,
    memory: Mutex<PlannerMemory>,
}

impl PlannerAgent {
    pub fn from_def(def: &AgentDef, client: Arc<dyn ClientWrapper>) -> Result<Self, ConfigError> {
        let config = def.planner_config.clone().unwrap_or_default();
        Ok(Self {
            lifecycle: AgentLifecycle::new(def.name.clone(), "planner"),
            inputs: def.inputs.iter().map(|i| i.source.clone()).collect(),
            outputs: def.outputs.iter().map(|o| o.target.clone()).collect(),
            prompt: def.prompt.clone(),
            model: def.model.clone(),
            config,
            client,
            cache: Mutex::new(HashMap::new()),
            memory: Mutex::new(PlannerMemory::default()),
        })
    }

    /// Cached plan for a verbatim problem, if any.
    pub fn cached_plan(&self, problem: &str) -> Option<Arc<ReasoningPlan>> {
        self.cache.lock().unwrap().get(problem).cloned()
    }

    pub fn history_len(&self) -> usize {
        self.memory.lock().unwrap().history.len()
    }

    /// Copy of the current learning-insight weights.
    pub fn insights(&self) -> HashMap<String, f64> {
        self.memory.lock().unwrap().insights.clone()
    }

    /// Overwrite the recorded outcome of a past plan (e.g. after executing
    /// it).  Unknown ids are ignored.
    pub fn record_outcome(&self, plan_id: &str, success: bool) {
        let mut memory = self.memory.lock().unwrap();
        if let Some(record) = memory.history.iter_mut().find(|r| r.plan_id == plan_id) {
            record.success = Some(success);
        }
    }

    /// Produce a plan for `problem`, consulting the cache first.
    ///
    /// A primary-strategy model failure aborts planning; only the optional
    /// self-critique call is allowed to fail silently.
    pub async fn plan(&self, problem: &str) -> Result<Arc<ReasoningPlan>, PlannerError> {
        if let Some(cached) = self.cached_plan(problem) {
            log::debug!(
                "planner '{}' cache hit for problem ({} chars)",
                self.lifecycle.name(),
                problem.len()
            );
            return Ok(cached);
        }

        let mut plan = match self.config.strategy.as_str() {
            "chain_of_thought" => self.plan_chain_of_thought(problem).await?,
            "tree_of_thought" => self.plan_tree_of_thought(problem).await?,
            "react" => self.plan_react(problem).await?,
            "backward_chaining" => self.plan_backward_chaining(problem).await?,
            "hierarchical" => self.plan_hierarchical(problem).await?,
            "mcts" => self.plan_mcts(problem).await?,
            other => {
                return Err(PlannerError::Strategy(StrategyError::new(other)));
            }
        };

        normalize_steps(&mut plan.steps);
        self.analyze_plan_structure(&mut plan);
        self.apply_learning_boost(&mut plan);

        if self.config.enable_self_critique {
            match self.critique(&plan).await {
                Ok(critique) => plan.self_critique = Some(critique),
                // Self-critique is an optional enhancement; a failure here
                // must not lose the plan.
                Err(e) => log::warn!(
                    "planner '{}' self-critique failed: {}",
                    self.lifecycle.name(),
                    e
                ),
            }
        }

        self.record_plan(&plan);
        let plan = Arc::new(plan);
        self.cache
            .lock()
            .unwrap()
            .insert(problem.to_string(), plan.clone());
        Ok(plan)
    }

    // ── Strategies ──────────────────────────────────────────────────────

    async fn structured_plan(
        &self,
        problem: &str,
        extra_guidance: &str,
        temperature: f32,
    ) -> Result<(CotResponse, usize), PlannerError> {
        let user = format!(
            "Problem: {}\n\nProduce a complete step-by-step plan.{}",
            problem, extra_guidance
        );
        let request = CompletionRequest::new(&self.model)
            .with_system(&self.prompt)
            .with_user(&user)
            .with_temperature(temperature)
            .with_max_tokens(2048);
        let response =
            send_structured_with_retry(self.client.as_ref(), request, plan_schema(), true).await?;
        let tokens = response.completion.usage.total_tokens;
        let parsed: CotResponse = serde_json::from_value(response.data)
            .map_err(|e| PlannerError::MalformedPlan(e.to_string()))?;
        if parsed.steps.is_empty() {
            return Err(PlannerError::MalformedPlan("no steps returned".to_string()));
        }
        Ok((parsed, tokens))
    }

    fn assemble(
        &self,
        problem: &str,
        analysis: ProblemAnalysis,
        steps: Vec<PlanStep>,
        success_criteria: Vec<String>,
        strategy: &str,
        tokens_used: usize,
    ) -> ReasoningPlan {
        ReasoningPlan {
            problem: problem.to_string(),
            analysis,
            steps,
            execution_strategy: ExecutionStrategy::Sequential,
            critical_path: Vec::new(),
            parallel_groups: Vec::new(),
            success_criteria,
            planning_strategy: strategy.to_string(),
            tokens_used,
            self_critique: None,
        }
    }

    async fn plan_chain_of_thought(&self, problem: &str) -> Result<ReasoningPlan, PlannerError> {
        let (parsed, tokens) = self.structured_plan(problem, "", 0.7).await?;
        Ok(self.assemble(
            problem,
            parsed.analysis,
            parsed.steps,
            parsed.success_criteria,
            "chain_of_thought",
            tokens,
        ))
    }

    async fn plan_tree_of_thought(&self, problem: &str) -> Result<ReasoningPlan, PlannerError> {
        let branches = self.config.reasoning_depth.max(1);
        let mut total_tokens = 0usize;
        let mut best: Option<(f64, CotResponse)> = None;

        for branch in 0..branches {
            let temperature = 0.6 + 0.2 * branch as f32;
            let emphasis = EMPHASES[branch % EMPHASES.len()];
            let guidance = format!(" Emphasize {} in this plan.", emphasis);
            let (candidate, tokens) = self
                .structured_plan(problem, &guidance, temperature)
                .await?;
            total_tokens += tokens;

            let score = self.score_branch(problem, &candidate, &mut total_tokens).await?;
            log::debug!(
                "planner '{}' branch {} ({}) scored {:.2}",
                self.lifecycle.name(),
                branch,
                emphasis,
                score
            );
            let better = best.as_ref().map(|(s, _)| score > *s).unwrap_or(true);
            if better {
                best = Some((score, candidate));
            }
        }

        let (_, winner) = best.expect("at least one branch runs");
        Ok(self.assemble(
            problem,
            winner.analysis,
            winner.steps,
            winner.success_criteria,
            "tree_of_thought",
            total_tokens,
        ))
    }

    async fn score_branch(
        &self,
        problem: &str,
        candidate: &CotResponse,
        total_tokens: &mut usize,
    ) -> Result<f64, PlannerError> {
        let outline: Vec<String> = candidate
            .steps
            .iter()
            .map(|s| format!("{}. {}", s.step_number, s.action))
            .collect();
        let user = format!(
            "Problem: {}\n\nCandidate plan:\n{}\n\nRate the plan 0-10 on completeness, feasibility, efficiency, clarity, and overall.",
            problem,
            outline.join("\n")
        );
        let request = CompletionRequest::new(&self.model)
            .with_system("You are a strict plan evaluator.")
            .with_user(&user)
            .with_temperature(0.2)
            .with_max_tokens(256);
        let response =
            send_structured_with_retry(self.client.as_ref(), request, score_schema(), true).await?;
        *total_tokens += response.completion.usage.total_tokens;
        let score: BranchScore = serde_json::from_value(response.data)
            .map_err(|e| PlannerError::MalformedPlan(e.to_string()))?;
        log::trace!(
            "branch scores: completeness={} feasibility={} efficiency={} clarity={} overall={}",
            score.completeness,
            score.feasibility,
            score.efficiency,
            score.clarity,
            score.overall
        );
        Ok((score.overall / 10.0).max(0.0).min(1.0))
    }

    async fn plan_react(&self, problem: &str) -> Result<ReasoningPlan, PlannerError> {
        let user = format!(
            "Problem: {}\n\nReason through this problem in alternating Thought / Action / Observation lines. \
             Use at most {} iterations and finish with a concluding Thought.",
            problem, self.config.max_steps
        );
        let request = CompletionRequest::new(&self.model)
            .with_system(&self.prompt)
            .with_user(&user)
            .with_max_tokens(2048);
        let response = send_with_retry(self.client.as_ref(), request).await?;

        // The transcript is preserved verbatim as the single step's action.
        let step = PlanStep {
            step_number: 1,
            action: response.content.clone(),
            reasoning: "ReAct transcript".to_string(),
            prerequisites: Vec::new(),
            expected_outcome: String::new(),
            complexity: Complexity::Medium,
            can_parallelize: false,
            confidence: default_step_confidence(),
            alternatives: None,
        };
        Ok(self.assemble(
            problem,
            ProblemAnalysis::default(),
            vec![step],
            Vec::new(),
            "react",
            response.usage.total_tokens,
        ))
    }

    async fn plan_backward_chaining(&self, problem: &str) -> Result<ReasoningPlan, PlannerError> {
        let mut tokens = 0usize;

        let request = CompletionRequest::new(&self.model)
            .with_system(&self.prompt)
            .with_user(&format!(
                "State the goal state of this problem in one concise sentence: {}",
                problem
            ))
            .with_temperature(0.3)
            .with_max_tokens(128);
        let response = send_with_retry(self.client.as_ref(), request).await?;
        tokens += response.usage.total_tokens;
        let goal = response.content.trim().to_string();

        let tree = self.decompose_goal(goal.clone(), 0, &mut tokens).await?;

        // Reverse the goal tree depth-first: leaves are numbered before
        // their parents, and every parent lists its children as
        // prerequisites.
        let mut steps = Vec::new();
        flatten_goal_tree(&tree, &mut steps);

        Ok(self.assemble(
            problem,
            ProblemAnalysis {
                problem_type: "goal_decomposition".to_string(),
                domain: String::new(),
                constraints: Vec::new(),
                challenges: Vec::new(),
                assumptions: vec![format!("Goal state: {}", goal)],
            },
            steps,
            vec![goal],
            "backward_chaining",
            tokens,
        ))
    }

    // Recursive decomposition bounded by MAX_GOAL_DEPTH.  Boxed future
    // because the recursion is async.
    fn decompose_goal<'a>(
        &'a self,
        goal: String,
        depth: usize,
        tokens: &'a mut usize,
    ) -> Pin<Box<dyn Future<Output = Result<GoalNode, PlannerError>> + Send + 'a>> {
        Box::pin(async move {
            if depth >= MAX_GOAL_DEPTH {
                return Ok(GoalNode {
                    goal: goal.clone(),
                    action: Some(goal),
                    children: Vec::new(),
                });
            }

            let request = CompletionRequest::new(&self.model)
                .with_system(&self.prompt)
                .with_user(&format!(
                    "Decompose this goal into 2-4 subgoals. Respond with ONLY a JSON array of \
                     objects with keys \"subgoal\", \"preconditions\", \"action\": {}",
                    goal
                ))
                .with_max_tokens(512);
            let response = send_with_retry(self.client.as_ref(), request).await?;
            *tokens += response.usage.total_tokens;

            match parse_subgoals(&response.content) {
                Some(entries) if !entries.is_empty() => {
                    let mut children = Vec::new();
                    for entry in entries.into_iter().take(4) {
                        let mut child = self
                            .decompose_goal(entry.subgoal.clone(), depth + 1, tokens)
                            .await?;
                        if child.children.is_empty() && !entry.action.is_empty() {
                            child.action = Some(entry.action);
                        }
                        let _ = entry.preconditions;
                        children.push(child);
                    }
                    Ok(GoalNode {
                        goal,
                        action: None,
                        children,
                    })
                }
                // Unparsable output: the raw text becomes the primitive
                // action and recursion stops at this level.
                _ => Ok(GoalNode {
                    goal,
                    action: Some(response.content.trim().to_string()),
                    children: Vec::new(),
                }),
            }
        })
    }

    async fn plan_hierarchical(&self, problem: &str) -> Result<ReasoningPlan, PlannerError> {
        let (high_level, tokens) = self.structured_plan(problem, "", 0.7).await?;

        // Deterministic decomposition: each high-level step becomes an
        // execute sub-step followed by a verify sub-step; prerequisites are
        // remapped onto the verify step of each prerequisite group.
        let mut steps: Vec<PlanStep> = Vec::new();
        let mut group_tail: HashMap<usize, usize> = HashMap::new();
        for hl in &high_level.steps {
            let prerequisites: Vec<usize> = hl
                .prerequisites
                .iter()
                .filter_map(|p| group_tail.get(p))
                .copied()
                .collect();

            let execute_number = steps.len() + 1;
            steps.push(PlanStep {
                step_number: execute_number,
                action: hl.action.clone(),
                reasoning: hl.reasoning.clone(),
                prerequisites,
                expected_outcome: hl.expected_outcome.clone(),
                complexity: hl.complexity,
                can_parallelize: hl.can_parallelize,
                confidence: hl.confidence,
                alternatives: hl.alternatives.clone(),
            });

            let verify_number = steps.len() + 1;
            let checked = if hl.expected_outcome.is_empty() {
                hl.action.clone()
            } else {
                hl.expected_outcome.clone()
            };
            steps.push(PlanStep {
                step_number: verify_number,
                action: format!("Verify: {}", checked),
                reasoning: format!("Confirms step {} achieved its outcome", execute_number),
                prerequisites: vec![execute_number],
                expected_outcome: String::new(),
                complexity: Complexity::Low,
                can_parallelize: false,
                confidence: hl.confidence,
                alternatives: None,
            });
            group_tail.insert(hl.step_number, verify_number);
        }

        Ok(self.assemble(
            problem,
            high_level.analysis,
            steps,
            high_level.success_criteria,
            "hierarchical",
            tokens,
        ))
    }

    async fn plan_mcts(&self, problem: &str) -> Result<ReasoningPlan, PlannerError> {
        let search = MctsSearch::new(
            self.client.as_ref(),
            &self.model,
            &self.prompt,
            self.config.max_steps,
        );
        let outcome = search.run(problem).await?;
        if outcome.steps.is_empty() {
            return Err(PlannerError::MalformedPlan(
                "search produced no steps".to_string(),
            ));
        }

        let steps: Vec<PlanStep> = outcome
            .steps
            .iter()
            .enumerate()
            .map(|(index, search_step)| PlanStep {
                step_number: index + 1,
                action: search_step.action.clone(),
                reasoning: "most-visited search path".to_string(),
                prerequisites: if index == 0 { vec![] } else { vec![index] },
                expected_outcome: String::new(),
                complexity: Complexity::Medium,
                can_parallelize: false,
                confidence: search_step.confidence.max(0.0).min(1.0),
                alternatives: None,
            })
            .collect();

        Ok(self.assemble(
            problem,
            ProblemAnalysis::default(),
            steps,
            Vec::new(),
            "mcts",
            outcome.tokens_used,
        ))
    }

    // ── Post-processing ─────────────────────────────────────────────────

    fn analyze_plan_structure(&self, plan: &mut ReasoningPlan) {
        // Critical path, simplified to "steps with no prerequisites".
        plan.critical_path = plan
            .steps
            .iter()
            .filter(|s| s.prerequisites.is_empty())
            .map(|s| s.step_number)
            .collect();

        plan.parallel_groups.clear();
        if self.config.parallelizable_steps {
            let mut groups: Vec<Vec<usize>> = Vec::new();
            for step in plan.steps.iter().filter(|s| s.can_parallelize) {
                let placed = groups.iter_mut().find(|group| {
                    group.iter().all(|&member| {
                        !depends_on(&plan.steps, step.step_number, member)
                            && !depends_on(&plan.steps, member, step.step_number)
                    })
                });
                match placed {
                    Some(group) => group.push(step.step_number),
                    None => groups.push(vec![step.step_number]),
                }
            }
            // Singleton groups add nothing to scheduling.
            plan.parallel_groups = groups.into_iter().filter(|g| g.len() > 1).collect();
        }

        plan.execution_strategy = if plan.parallel_groups.iter().any(|g| g.len() > 1) {
            ExecutionStrategy::ParallelOptimized
        } else {
            ExecutionStrategy::Sequential
        };
    }

    fn apply_learning_boost(&self, plan: &mut ReasoningPlan) {
        let memory = self.memory.lock().unwrap();
        let problem = plan.problem.to_lowercase();
        for (feature, weight) in &memory.insights {
            if *weight > 0.7 && problem.contains(feature.as_str()) {
                let factor = 1.0 + weight / 10.0;
                for step in &mut plan.steps {
                    step.confidence = (step.confidence * factor).min(1.0);
                }
                log::debug!(
                    "planner '{}' boosted confidences by {:.3} for feature '{}'",
                    self.lifecycle.name(),
                    factor,
                    feature
                );
            }
        }
    }

    async fn critique(&self, plan: &ReasoningPlan) -> Result<String, PlannerError> {
        let outline: Vec<String> = plan
            .steps
            .iter()
            .map(|s| format!("{}. {}", s.step_number, s.action))
            .collect();
        let request = CompletionRequest::new(&self.model)
            .with_system(&self.prompt)
            .with_user(&format!(
                "Critically evaluate this plan for completeness, efficiency, risks, and improvements:\n\nProblem: {}\n\n{}",
                plan.problem,
                outline.join("\n")
            ))
            .with_temperature(0.3)
            .with_max_tokens(500);
        let response = send_with_retry(self.client.as_ref(), request).await?;
        Ok(response.content)
    }

    fn record_plan(&self, plan: &ReasoningPlan) {
        let mut memory = self.memory.lock().unwrap();
        memory.history.push_back(PlanRecord {
            plan_id: Uuid::new_v4().to_string(),
            problem: plan.problem.clone(),
            total_steps: plan.steps.len(),
            tokens_used: plan.tokens_used,
            success: Some(true),
        });
        while memory.history.len() > HISTORY_LIMIT {
            memory.history.pop_front();
        }
        memory.total_plans += 1;

        if memory.total_plans % LEARNING_INTERVAL == 0 {
            refresh_insights(&mut memory);
            log::info!(
                "planner '{}' refreshed learning insights after {} plans: {:?}",
                self.lifecycle.name(),
                memory.total_plans,
                memory.insights
            );
        }
    }
}

// Exponential moving average over the successful history: every matching
// feature keyword pulls its weight toward 1.0 by a 0.1 step.
fn refresh_insights(memory: &mut PlannerMemory) {
    let mut snapshot: Vec<String> = Vec::new();
    for record in &memory.history {
        if record.success == Some(true) {
            snapshot.push(record.problem.to_lowercase());
        }
    }
    for problem in snapshot {
        for feature in FEATURE_KEYWORDS.iter() {
            if problem.contains(feature) {
                let weight = memory.insights.entry(feature.to_string()).or_insert(0.0);
                *weight = 0.9 * *weight + 0.1;
            }
        }
    }
}

// Direct-prerequisite check: does step `a` list `b` as a prerequisite?
fn depends_on(steps: &[PlanStep], a: usize, b: usize) -> bool {
    steps
        .iter()
        .find(|s| s.step_number == a)
        .map(|s| s.prerequisites.contains(&b))
        .unwrap_or(false)
}

/// Renumber steps to `1..n` in order and repair prerequisite references so
/// the plan invariants hold: unique step numbers, and prerequisites that
/// only point at lower-numbered steps.  Confidences are clamped to `[0, 1]`.
pub fn normalize_steps(steps: &mut Vec<PlanStep>) {
    let mut remap: HashMap<usize, usize> = HashMap::new();
    for (index, step) in steps.iter().enumerate() {
        remap.entry(step.step_number).or_insert(index + 1);
    }
    for (index, step) in steps.iter_mut().enumerate() {
        let new_number = index + 1;
        let prerequisites: Vec<usize> = step
            .prerequisites
            .iter()
            .filter_map(|p| remap.get(p).copied())
            .filter(|&p| p < new_number)
            .collect();
        step.step_number = new_number;
        step.prerequisites = prerequisites;
        step.confidence = step.confidence.max(0.0).min(1.0);
    }
}

fn flatten_goal_tree(node: &GoalNode, steps: &mut Vec<PlanStep>) -> usize {
    let child_numbers: Vec<usize> = node
        .children
        .iter()
        .map(|child| flatten_goal_tree(child, steps))
        .collect();
    let number = steps.len() + 1;
    let action = node
        .action
        .clone()
        .unwrap_or_else(|| format!("Achieve: {}", node.goal));
    steps.push(PlanStep {
        step_number: number,
        action,
        reasoning: format!("Works toward goal: {}", node.goal),
        prerequisites: child_numbers,
        expected_outcome: node.goal.clone(),
        complexity: Complexity::Medium,
        can_parallelize: false,
        confidence: default_step_confidence(),
        alternatives: None,
    });
    number
}

fn parse_subgoals(content: &str) -> Option<Vec<SubgoalEntry>> {
    if let Ok(entries) = serde_json::from_str::<Vec<SubgoalEntry>>(content) {
        return Some(entries);
    }
    // Models often wrap the array in prose; try the widest bracketed slice.
    let start = content.find('[')?;
    let end = content.rfind(']')?;
    if end <= start {
        return None;
    }
    serde_json::from_str::<Vec<SubgoalEntry>>(&content[start..=end]).ok()
}

#[async_trait]
impl Agent for PlannerAgent {
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
        let mut merged = crate::agentfabric::agents::merge_inputs(&ctx, &self.inputs)?;
        self.lifecycle.set_ready(true);
        log::info!(
            "planner '{}' ready: strategy={} inputs={:?}",
            self.lifecycle.name(),
            self.config.strategy,
            self.inputs
        );

        loop {
            let received = tokio::select! {
                _ = ctx.cancel_token().cancelled() => break,
                received = merged.recv() => received,
            };
            let (source, msg) = match received {
                Some(pair) => pair,
                None => break,
            };

            if let Err(e) = validate_payload(&msg.payload) {
                log::warn!(
                    "planner '{}' dropping invalid message from '{}': {}",
                    self.lifecycle.name(),
                    source,
                    e
                );
                continue;
            }

            match self.plan(&msg.payload).await {
                Ok(plan) => {
                    let payload = match serde_json::to_string(plan.as_ref()) {
                        Ok(payload) => payload,
                        Err(e) => {
                            log::error!(
                                "planner '{}' failed to serialize plan: {}",
                                self.lifecycle.name(),
                                e
                            );
                            continue;
                        }
                    };
                    for target in &self.outputs {
                        let out = Message::new("reasoning_plan", payload.clone()).with_id(msg.id.clone());
                        if let Err(e) = ctx.send(target, out) {
                            log::warn!(
                                "planner '{}' could not emit to '{}': {}",
                                self.lifecycle.name(),
                                target,
                                e
                            );
                        }
                    }
                }
                // Per-message planning failures do not stop the loop.
                Err(e) => log::error!(
                    "planner '{}' failed to plan message {}: {}",
                    self.lifecycle.name(),
                    msg.id,
                    e
                ),
            }
        }

        self.lifecycle.set_ready(false);
        Ok(())
    }

    async fn execute(&self, _ctx: AgentContext, msg: Message) -> Result<Message, AgentError> {
        if !self.ready() {
            return Err(AgentError::NotReady {
                agent: self.lifecycle.name().to_string(),
            });
        }
        validate_payload(&msg.payload)?;
        let plan = self
            .plan(&msg.payload)
            .await
            .map_err(|e| match e {
                PlannerError::Llm(llm) => AgentError::Llm(llm),
                PlannerError::Strategy(s) => AgentError::Strategy(s),
                PlannerError::MalformedPlan(reason) => AgentError::Startup {
                    agent: self.lifecycle.name().to_string(),
                    reason,
                },
            })?;
        let payload = serde_json::to_string(plan.as_ref()).map_err(|e| AgentError::Startup {
            agent: self.lifecycle.name().to_string(),
            reason: e.to_string(),
        })?;
        Ok(Message::new("reasoning_plan", payload).with_id(msg.id))
    }

    async fn stop(&self) -> Result<(), AgentError> {
        self.lifecycle.trigger_stop();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agentfabric::clients::mock::MockClient;

    fn planner_with(strategy: &str, client: MockClient) -> PlannerAgent {
        let mut config = PlannerConfig::default();
        config.strategy = strategy.to_string();
        let def = AgentDef::new("brain", "planner")
            .with_model("mock-model")
            .with_prompt("You are a careful planner.")
            .with_input("problems")
            .with_output("plans")
            .with_planner_config(config);
        PlannerAgent::from_def(&def, Arc::new(client)).unwrap()
    }

    fn cot_json(steps: &[(usize, &str, &[usize], bool)]) -> String {
        let steps: Vec<serde_json::Value> = steps
            .iter()
            .map(|(n, action, prereqs, parallel)| {
                serde_json::json!({
                    "step_number": n,
                    "action": action,
                    "prerequisites": prereqs,
                    "can_parallelize": parallel,
                    "confidence": 0.9
                })
            })
            .collect();
        serde_json::json!({
            "analysis": {"type": "design", "domain": "software"},
            "steps": steps,
            "success_criteria": ["it works"]
        })
        .to_string()
    }

    #[tokio::test]
    async fn test_chain_of_thought_basic_plan() {
        let client = MockClient::new("mock-model").with_response(&cot_json(&[
            (1, "Analyze requirements", &[], false),
            (2, "Choose the algorithm", &[1], false),
        ]));
        let planner = planner_with("chain_of_thought", client);
        let plan = planner
            .plan("Design a recommendation system for an e-commerce platform")
            .await
            .unwrap();

        assert_eq!(plan.planning_strategy, "chain_of_thought");
        assert_eq!(plan.steps.len(), 2);
        assert_eq!(plan.critical_path, vec![1]);
        assert_eq!(plan.execution_strategy, ExecutionStrategy::Sequential);
        assert_eq!(plan.analysis.problem_type, "design");
        assert!(plan.tokens_used > 0);
    }

    #[tokio::test]
    async fn test_cache_hit_returns_same_object() {
        let client = MockClient::new("mock-model")
            .with_response(&cot_json(&[(1, "Only step", &[], false)]));
        let planner = planner_with("chain_of_thought", client);

        let first = planner.plan("same problem").await.unwrap();
        let second = planner.plan("same problem").await.unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(planner.history_len(), 1);
    }

    #[tokio::test]
    async fn test_plan_invariants_hold_after_normalization() {
        // Model returns duplicate numbers and a forward prerequisite; the
        // released plan must still satisfy the invariants.
        let client = MockClient::new("mock-model").with_response(
            &serde_json::json!({
                "steps": [
                    {"step_number": 7, "action": "first", "prerequisites": [9]},
                    {"step_number": 7, "action": "second", "prerequisites": [7]},
                    {"step_number": 9, "action": "third", "prerequisites": [7]}
                ]
            })
            .to_string(),
        );
        let planner = planner_with("chain_of_thought", client);
        let plan = planner.plan("messy output").await.unwrap();

        let numbers: Vec<usize> = plan.steps.iter().map(|s| s.step_number).collect();
        assert_eq!(numbers, vec![1, 2, 3]);
        for step in &plan.steps {
            for prerequisite in &step.prerequisites {
                assert!(*prerequisite < step.step_number);
            }
            assert!((0.0..=1.0).contains(&step.confidence));
        }
    }

    #[tokio::test]
    async fn test_parallel_groups_flip_execution_strategy() {
        let client = MockClient::new("mock-model").with_response(&cot_json(&[
            (1, "Fetch data", &[], true),
            (2, "Fetch config", &[], true),
            (3, "Join results", &[1, 2], false),
        ]));
        let planner = planner_with("chain_of_thought", client);
        let plan = planner.plan("parallel problem").await.unwrap();

        assert_eq!(plan.execution_strategy, ExecutionStrategy::ParallelOptimized);
        assert_eq!(plan.parallel_groups, vec![vec![1, 2]]);
    }

    #[tokio::test]
    async fn test_tree_of_thought_picks_best_branch() {
        let mut config = PlannerConfig::default();
        config.strategy = "tree_of_thought".to_string();
        config.reasoning_depth = 2;
        // branch 0 plan, branch 0 score, branch 1 plan, branch 1 score.
        let client = MockClient::new("mock-model").with_responses(vec![
            cot_json(&[(1, "mediocre plan step", &[], false)]),
            r#"{"completeness": 5, "feasibility": 5, "efficiency": 5, "clarity": 5, "overall": 5}"#
                .to_string(),
            cot_json(&[(1, "excellent plan step", &[], false)]),
            r#"{"completeness": 9, "feasibility": 9, "efficiency": 9, "clarity": 9, "overall": 9}"#
                .to_string(),
        ]);
        let def = AgentDef::new("brain", "planner")
            .with_model("mock-model")
            .with_input("problems")
            .with_planner_config(config);
        let planner = PlannerAgent::from_def(&def, Arc::new(client)).unwrap();

        let plan = planner.plan("pick the best").await.unwrap();
        assert_eq!(plan.planning_strategy, "tree_of_thought");
        assert_eq!(plan.steps[0].action, "excellent plan step");
    }

    #[tokio::test]
    async fn test_react_preserves_transcript_as_single_step() {
        let transcript = "Thought: consider options\nAction: compare\nObservation: B is better";
        let client = MockClient::new("mock-model").with_response(transcript);
        let planner = planner_with("react", client);
        let plan = planner.plan("quick question").await.unwrap();

        assert_eq!(plan.steps.len(), 1);
        assert_eq!(plan.steps[0].action, transcript);
        assert_eq!(plan.critical_path, vec![1]);
    }

    #[tokio::test]
    async fn test_backward_chaining_reverses_goal_tree() {
        // Goal extraction, one parsable decomposition, then unparsable
        // leaves that end recursion.
        let client = MockClient::new("mock-model").with_responses(vec![
            "System is deployed".to_string(),
            r#"[{"subgoal": "Build artifact", "preconditions": [], "action": "run the build"},
                {"subgoal": "Provision infra", "preconditions": [], "action": "apply terraform"}]"#
                .to_string(),
            "compile and package the code".to_string(),
            "create the cluster".to_string(),
        ]);
        let planner = planner_with("backward_chaining", client);
        let plan = planner.plan("ship the service").await.unwrap();

        assert_eq!(plan.planning_strategy, "backward_chaining");
        // Two leaves plus the root goal step.
        assert_eq!(plan.steps.len(), 3);
        let root = plan.steps.last().unwrap();
        assert_eq!(root.step_number, 3);
        assert_eq!(root.prerequisites, vec![1, 2]);
        for step in &plan.steps {
            for p in &step.prerequisites {
                assert!(*p < step.step_number);
            }
        }
        assert_eq!(plan.success_criteria, vec!["System is deployed".to_string()]);
    }

    #[tokio::test]
    async fn test_hierarchical_decomposes_into_execute_verify_pairs() {
        let client = MockClient::new("mock-model").with_response(&cot_json(&[
            (1, "Design schema", &[], false),
            (2, "Implement API", &[1], false),
        ]));
        let planner = planner_with("hierarchical", client);
        let plan = planner.plan("build the backend").await.unwrap();

        assert_eq!(plan.planning_strategy, "hierarchical");
        assert_eq!(plan.steps.len(), 4);
        assert_eq!(plan.steps[1].prerequisites, vec![1]);
        assert!(plan.steps[1].action.starts_with("Verify:"));
        // "Implement API" depends on the verify step of group 1.
        assert_eq!(plan.steps[2].prerequisites, vec![2]);
    }

    #[tokio::test]
    async fn test_mcts_strategy_builds_sequential_plan() {
        let client = MockClient::new("mock-model").with_default_response("take the next step");
        let planner = planner_with("mcts", client);
        let plan = planner.plan("search for a plan").await.unwrap();

        assert_eq!(plan.planning_strategy, "mcts");
        assert!(!plan.steps.is_empty());
        for (index, step) in plan.steps.iter().enumerate() {
            if index == 0 {
                assert!(step.prerequisites.is_empty());
            } else {
                assert_eq!(step.prerequisites, vec![index]);
            }
        }
    }

    #[tokio::test]
    async fn test_unknown_strategy_errors() {
        let client = MockClient::new("mock-model");
        let planner = planner_with("clairvoyance", client);
        match planner.plan("anything").await {
            Err(PlannerError::Strategy(e)) => assert_eq!(e.strategy, "clairvoyance"),
            other => panic!("expected strategy error, got {:?}", other.map(|_| ())),
        }
    }

    #[tokio::test]
    async fn test_primary_llm_failure_aborts_planning() {
        let client = MockClient::new("mock-model").with_error(
            crate::agentfabric::client_wrapper::LLMErrorKind::Authentication,
            "bad key",
        );
        let planner = planner_with("chain_of_thought", client);
        assert!(planner.plan("will fail").await.is_err());
        assert_eq!(planner.history_len(), 0);
    }

    #[tokio::test]
    async fn test_self_critique_failure_is_swallowed() {
        let mut config = PlannerConfig::default();
        config.enable_self_critique = true;
        let client = MockClient::new("mock-model")
            .with_response(&cot_json(&[(1, "step", &[], false)]))
            .with_error(
                crate::agentfabric::client_wrapper::LLMErrorKind::InvalidRequest,
                "critique rejected",
            );
        let def = AgentDef::new("brain", "planner")
            .with_model("mock-model")
            .with_input("problems")
            .with_planner_config(config);
        let planner = PlannerAgent::from_def(&def, Arc::new(client)).unwrap();

        let plan = planner.plan("critique me").await.unwrap();
        assert!(plan.self_critique.is_none());
        assert_eq!(plan.steps.len(), 1);
    }

    #[tokio::test]
    async fn test_self_critique_recorded_when_it_succeeds() {
        let mut config = PlannerConfig::default();
        config.enable_self_critique = true;
        let client = MockClient::new("mock-model")
            .with_response(&cot_json(&[(1, "step", &[], false)]))
            .with_response("solid plan, consider a rollback path");
        let def = AgentDef::new("brain", "planner")
            .with_model("mock-model")
            .with_input("problems")
            .with_planner_config(config);
        let planner = PlannerAgent::from_def(&def, Arc::new(client)).unwrap();

        let plan = planner.plan("critique me").await.unwrap();
        assert_eq!(
            plan.self_critique.as_deref(),
            Some("solid plan, consider a rollback path")
        );
    }

    #[tokio::test]
    async fn test_learning_insights_update_every_ten_plans() {
        let responses: Vec<String> =
            (0..10).map(|_| cot_json(&[(1, "step", &[], false)])).collect();
        let client = MockClient::new("mock-model").with_responses(responses);
        let planner = planner_with("chain_of_thought", client);

        for index in 0..10 {
            planner
                .plan(&format!("optimize query path number {}", index))
                .await
                .unwrap();
        }

        let insights = planner.insights();
        let weight = insights.get("optimize").copied().unwrap_or(0.0);
        // Ten successful "optimize" problems: EMA reaches 1 - 0.9^10.
        assert!((weight - (1.0 - 0.9f64.powi(10))).abs() < 1e-9);
        assert_eq!(planner.history_len(), 10);
    }

    #[tokio::test]
    async fn test_high_weight_feature_boosts_confidence() {
        // Drive the "optimize" weight above 0.7 (needs > 12 EMA steps, i.e.
        // two refreshes over 20 plans), then plan a fresh optimize problem.
        let responses: Vec<String> =
            (0..21).map(|_| cot_json(&[(1, "step", &[], false)])).collect();
        let client = MockClient::new("mock-model").with_responses(responses);
        let planner = planner_with("chain_of_thought", client);

        for index in 0..20 {
            planner
                .plan(&format!("optimize subsystem {}", index))
                .await
                .unwrap();
        }
        let weight = planner.insights().get("optimize").copied().unwrap();
        assert!(weight > 0.7, "weight {} should exceed 0.7", weight);

        let plan = planner.plan("optimize the final hot loop").await.unwrap();
        let expected = (0.9 * (1.0 + weight / 10.0)).min(1.0);
        assert!((plan.steps[0].confidence - expected).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_history_is_bounded() {
        let responses: Vec<String> =
            (0..110).map(|_| cot_json(&[(1, "step", &[], false)])).collect();
        let client = MockClient::new("mock-model").with_responses(responses);
        let planner = planner_with("chain_of_thought", client);

        for index in 0..110 {
            planner.plan(&format!("problem {}", index)).await.unwrap();
        }
        assert_eq!(planner.history_len(), HISTORY_LIMIT);
    }

    #[test]
    fn test_normalize_steps_repairs_numbering() {
        let mut steps = vec![
            PlanStep {
                step_number: 3,
                action: "a".to_string(),
                reasoning: String::new(),
                prerequisites: vec![],
                expected_outcome: String::new(),
                complexity: Complexity::Low,
                can_parallelize: false,
                confidence: 1.4,
                alternatives: None,
            },
            PlanStep {
                step_number: 8,
                action: "b".to_string(),
                reasoning: String::new(),
                prerequisites: vec![3],
                expected_outcome: String::new(),
                complexity: Complexity::Low,
                can_parallelize: false,
                confidence: -0.2,
                alternatives: None,
            },
        ];
        normalize_steps(&mut steps);
        assert_eq!(steps[0].step_number, 1);
        assert_eq!(steps[1].step_number, 2);
        assert_eq!(steps[1].prerequisites, vec![1]);
        assert_eq!(steps[0].confidence, 1.0);
        assert_eq!(steps[1].confidence, 0.0);
    }
}
