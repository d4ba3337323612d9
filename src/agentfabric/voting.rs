//! Deterministic voting strategies for the aggregator.
//!
//! These four strategies never call a model: `tokens_used` is always zero
//! and identical inputs produce identical outcomes on every run.  Contents
//! are compared after normalization (trim, lowercase, collapse internal
//! whitespace); the returned winner keeps its original casing.
//!
//! Tie-breaking is fixed per strategy:
//!
//! | Strategy | Winner | Tie-break |
//! |---|---|---|
//! | majority | most votes | highest mean confidence |
//! | unanimous | the single value | n/a (dissent is an error) |
//! | weighted | highest confidence sum | lexicographically smallest content |
//! | confidence | highest confidence | lexicographically smallest source |

use crate::agentfabric::aggregator::{AgentInput, AggregationError};
use std::collections::BTreeMap;

/// Confidence assumed when an input does not carry one.
pub const DEFAULT_VOTE_CONFIDENCE: f64 = 0.5;

/// Outcome of a deterministic vote.
#[derive(Debug, Clone, PartialEq)]
pub struct VoteOutcome {
    /// Winning content, in its original (un-normalized) form.
    pub content: String,
    /// Source names that voted for the winner, in input order.
    pub supporters: Vec<String>,
    /// Agreement score in `[0, 1]`; formula varies per strategy.
    pub agreement: f64,
    pub strategy: &'static str,
}

/// Trim, lowercase, and collapse whitespace runs.
pub fn normalize_content(content: &str) -> String {
    content
        .trim()
        .to_lowercase()
        .split_whitespace()
        .collect::<Vec<&str>>()
        .join(" ")
}

fn confidence_of(input: &AgentInput) -> f64 {
    input.confidence.unwrap_or(DEFAULT_VOTE_CONFIDENCE)
}

// Group inputs by normalized content, preserving first-seen order inside
// each group.  BTreeMap keys give the deterministic sorted-content order
// the tie-breaks below rely on.
fn group_by_content(inputs: &[AgentInput]) -> BTreeMap<String, Vec<&AgentInput>> {
    let mut groups: BTreeMap<String, Vec<&AgentInput>> = BTreeMap::new();
    for input in inputs {
        groups
            .entry(normalize_content(&input.content))
            .or_insert_with(Vec::new)
            .push(input);
    }
    groups
}

fn supporters(group: &[&AgentInput]) -> Vec<String> {
    group.iter().map(|input| input.agent_name.clone()).collect()
}

/// Most votes wins; ties broken by the highest mean confidence among the
/// tied contents.  Agreement is `winning_count / total`.
pub fn majority_vote(inputs: &[AgentInput]) -> Result<VoteOutcome, AggregationError> {
    if inputs.is_empty() {
        return Err(AggregationError::NoInputs);
    }
    let groups = group_by_content(inputs);

    let mut best: Option<(&String, &Vec<&AgentInput>, f64)> = None;
    for (content, group) in &groups {
        let mean_confidence =
            group.iter().map(|i| confidence_of(i)).sum::<f64>() / group.len() as f64;
        let better = match &best {
            None => true,
            Some((_, best_group, best_mean)) => {
                group.len() > best_group.len()
                    || (group.len() == best_group.len() && mean_confidence > *best_mean)
            }
        };
        if better {
            best = Some((content, group, mean_confidence));
        }
    }

    let (_, group, _) = best.expect("non-empty inputs always produce a group");
    Ok(VoteOutcome {
        content: group[0].content.clone(),
        supporters: supporters(group),
        agreement: group.len() as f64 / inputs.len() as f64,
        strategy: "majority",
    })
}

/// All inputs must normalize to the same value; the first dissenter fails
/// the vote.
pub fn unanimous_vote(inputs: &[AgentInput]) -> Result<VoteOutcome, AggregationError> {
    if inputs.is_empty() {
        return Err(AggregationError::NoInputs);
    }
    let reference = normalize_content(&inputs[0].content);
    for input in &inputs[1..] {
        if normalize_content(&input.content) != reference {
            return Err(AggregationError::NoUnanimousAgreement {
                dissenter: input.agent_name.clone(),
                first: inputs[0].agent_name.clone(),
            });
        }
    }
    Ok(VoteOutcome {
        content: inputs[0].content.clone(),
        supporters: inputs.iter().map(|i| i.agent_name.clone()).collect(),
        agreement: 1.0,
        strategy: "unanimous",
    })
}

/// Score per content is the sum of its supporters' confidences; highest
/// score wins, ties broken by sorted content order.  Agreement is
/// `winning_score / total_weight`.
pub fn weighted_vote(inputs: &[AgentInput]) -> Result<VoteOutcome, AggregationError> {
    if inputs.is_empty() {
        return Err(AggregationError::NoInputs);
    }
    let groups = group_by_content(inputs);
    let total_weight: f64 = inputs.iter().map(|i| confidence_of(i)).sum();

    // Iterating the BTreeMap in key order means a strict `>` comparison
    // resolves ties toward the smallest content.
    let mut best: Option<(&String, &Vec<&AgentInput>, f64)> = None;
    for (content, group) in &groups {
        let score: f64 = group.iter().map(|i| confidence_of(i)).sum();
        let better = match &best {
            None => true,
            Some((_, _, best_score)) => score > *best_score,
        };
        if better {
            best = Some((content, group, score));
        }
    }

    let (_, group, score) = best.expect("non-empty inputs always produce a group");
    let agreement = if total_weight > 0.0 {
        (score / total_weight).min(1.0)
    } else {
        0.0
    };
    Ok(VoteOutcome {
        content: group[0].content.clone(),
        supporters: supporters(group),
        agreement,
        strategy: "weighted",
    })
}

/// The single most confident input wins; ties broken by sorted source name.
/// Agreement is `max_confidence / (sum_confidence * n)`, clamped to `[0, 1]`.
pub fn confidence_vote(inputs: &[AgentInput]) -> Result<VoteOutcome, AggregationError> {
    if inputs.is_empty() {
        return Err(AggregationError::NoInputs);
    }

    let mut winner = &inputs[0];
    for input in &inputs[1..] {
        let wins = confidence_of(input) > confidence_of(winner)
            || (confidence_of(input) == confidence_of(winner)
                && input.agent_name < winner.agent_name);
        if wins {
            winner = input;
        }
    }

    let total: f64 = inputs.iter().map(|i| confidence_of(i)).sum();
    let denominator = total * inputs.len() as f64;
    let agreement = if denominator > 0.0 {
        (confidence_of(winner) / denominator).min(1.0)
    } else {
        0.0
    };
    Ok(VoteOutcome {
        content: winner.content.clone(),
        supporters: vec![winner.agent_name.clone()],
        agreement,
        strategy: "confidence",
    })
}
