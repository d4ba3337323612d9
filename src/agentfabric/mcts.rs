//! Monte-Carlo Tree Search over candidate plan steps.
//!
//! The tree is rooted at the problem statement.  Each simulation runs the
//! classic four phases:
//!
//! 1. **Selection**: descend by UCB1
//!    (`value/visits + sqrt(2 * ln(parent_visits) / visits)`), treating
//!    unvisited nodes as infinitely attractive.
//! 2. **Expansion**: a visited leaf with fewer than
//!    [`MAX_CHILDREN`] children and depth below the step bound grows one new
//!    child, generated by a short model call (temperature 0.8, 100 tokens).
//! 3. **Simulation**: reward is `min(depth / max_steps, 1)` scaled by a
//!    *deterministic* factor in `[0.5, 1.0)` seeded from the simulation
//!    index, so two identical runs build identical trees.
//! 4. **Backpropagation**: visits and value accumulate up to the root.
//!
//! The final plan follows the most-visited child path from the root; each
//! step's confidence is `visits / root_visits`.

use crate::agentfabric::client_wrapper::{ClientWrapper, CompletionRequest, LLMError};
use crate::agentfabric::clients::common::{send_with_retry, splitmix64};

/// Simulations per search.
pub const SIMULATIONS: usize = 10;

/// Branching factor bound.
pub const MAX_CHILDREN: usize = 3;

struct Node {
    step: String,
    parent: Option<usize>,
    children: Vec<usize>,
    visits: u64,
    value: f64,
    depth: usize,
}

/// One step of the extracted best path.
#[derive(Debug, Clone)]
pub struct SearchStep {
    pub action: String,
    /// `visits / root_visits` for the node this step came from.
    pub confidence: f64,
}

/// Outcome of a search: the most-visited path plus token accounting.
#[derive(Debug, Clone)]
pub struct SearchOutcome {
    pub steps: Vec<SearchStep>,
    pub tokens_used: usize,
}

/// Tree search bounded by `max_steps` depth.
pub struct MctsSearch<'a> {
    client: &'a dyn ClientWrapper,
    model: &'a str,
    system_prompt: &'a str,
    max_steps: usize,
}

impl<'a> MctsSearch<'a> {
    pub fn new(
        client: &'a dyn ClientWrapper,
        model: &'a str,
        system_prompt: &'a str,
        max_steps: usize,
    ) -> Self {
        Self {
            client,
            model,
            system_prompt,
            max_steps: max_steps.max(1),
        }
    }

    fn ucb1(&self, nodes: &[Node], index: usize) -> f64 {
        let node = &nodes[index];
        if node.visits == 0 {
            return f64::INFINITY;
        }
        let parent_visits = node
            .parent
            .map(|p| nodes[p].visits.max(1))
            .unwrap_or(1);
        node.value / node.visits as f64
            + (2.0 * (parent_visits as f64).ln() / node.visits as f64).sqrt()
    }

    fn select(&self, nodes: &[Node]) -> usize {
        let mut current = 0;
        loop {
            if nodes[current].children.is_empty() {
                return current;
            }
            // Argmax over UCB1; ties resolve to the earliest child, which
            // keeps the search deterministic.
            let mut best = nodes[current].children[0];
            let mut best_score = self.ucb1(nodes, best);
            for &child in &nodes[current].children[1..] {
                let score = self.ucb1(nodes, child);
                if score > best_score {
                    best = child;
                    best_score = score;
                }
            }
            current = best;
        }
    }

    async fn expand(
        &self,
        nodes: &mut Vec<Node>,
        index: usize,
        tokens: &mut usize,
    ) -> Result<usize, LLMError> {
        let mut path = Vec::new();
        let mut walk = Some(index);
        while let Some(i) = walk {
            path.push(nodes[i].step.clone());
            walk = nodes[i].parent;
        }
        path.reverse();

        let user = format!(
            "Problem: {}\nSteps so far:\n{}\nPropose the single next logical step. Answer with the step only.",
            path.first().map(|s| s.as_str()).unwrap_or(""),
            path.iter()
                .skip(1)
                .enumerate()
                .map(|(i, s)| format!("{}. {}", i + 1, s))
                .collect::<Vec<String>>()
                .join("\n")
        );
        let request = CompletionRequest::new(self.model)
            .with_system(self.system_prompt)
            .with_user(&user)
            .with_temperature(0.8)
            .with_max_tokens(100);
        let response = send_with_retry(self.client, request).await?;
        *tokens += response.usage.total_tokens;

        let depth = nodes[index].depth + 1;
        let child = nodes.len();
        nodes.push(Node {
            step: response.content.trim().to_string(),
            parent: Some(index),
            children: Vec::new(),
            visits: 0,
            value: 0.0,
            depth,
        });
        nodes[index].children.push(child);
        Ok(child)
    }

    // Deterministic stand-in for a rollout: depth ratio scaled into
    // [0.5, 1.0) by a hash of the simulation index.
    fn simulate(&self, nodes: &[Node], index: usize, simulation: usize) -> f64 {
        let depth_score = (nodes[index].depth as f64 / self.max_steps as f64).min(1.0);
        let unit = (splitmix64(simulation as u64) >> 11) as f64 / (1u64 << 53) as f64;
        depth_score * (0.5 + 0.5 * unit)
    }

    fn backpropagate(&self, nodes: &mut [Node], index: usize, reward: f64) {
        let mut walk = Some(index);
        while let Some(i) = walk {
            nodes[i].visits += 1;
            nodes[i].value += reward;
            walk = nodes[i].parent;
        }
    }

    /// Run [`SIMULATIONS`] simulations and extract the most-visited path.
    pub async fn run(&self, problem: &str) -> Result<SearchOutcome, LLMError> {
        let mut nodes = vec![Node {
            step: problem.to_string(),
            parent: None,
            children: Vec::new(),
            visits: 0,
            value: 0.0,
            depth: 0,
        }];
        let mut tokens = 0usize;

        for simulation in 0..SIMULATIONS {
            let mut selected = self.select(&nodes);
            let expandable = nodes[selected].visits > 0
                && nodes[selected].children.len() < MAX_CHILDREN
                && nodes[selected].depth < self.max_steps;
            if expandable {
                selected = self.expand(&mut nodes, selected, &mut tokens).await?;
            }
            let reward = self.simulate(&nodes, selected, simulation);
            self.backpropagate(&mut nodes, selected, reward);
        }

        // Follow the most-visited child chain from the root.
        let root_visits = nodes[0].visits.max(1);
        let mut steps = Vec::new();
        let mut current = 0;
        while !nodes[current].children.is_empty() {
            let mut best = nodes[current].children[0];
            for &child in &nodes[current].children[1..] {
                if nodes[child].visits > nodes[best].visits {
                    best = child;
                }
            }
            steps.push(SearchStep {
                action: nodes[best].step.clone(),
                confidence: nodes[best].visits as f64 / root_visits as f64,
            });
            current = best;
        }

        Ok(SearchOutcome {
            steps,
            tokens_used: tokens,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agentfabric::clients::mock::MockClient;

    fn scripted_client(steps: usize) -> MockClient {
        let responses: Vec<String> = (1..=steps).map(|i| format!("candidate step {}", i)).collect();
        MockClient::new("mock-model")
            .with_responses(responses)
            .with_default_response("fallback step")
    }

    #[tokio::test]
    async fn test_search_produces_a_path() {
        let client = scripted_client(12);
        let search = MctsSearch::new(&client, "mock-model", "plan well", 5);
        let outcome = search.run("Design a recommendation system").await.unwrap();

        assert!(!outcome.steps.is_empty());
        assert!(outcome.tokens_used > 0);
        for step in &outcome.steps {
            assert!((0.0..=1.0).contains(&step.confidence));
            assert!(!step.action.is_empty());
        }
    }

    #[tokio::test]
    async fn test_search_is_deterministic() {
        let first = {
            let client = scripted_client(12);
            MctsSearch::new(&client, "mock-model", "plan well", 5)
                .run("Same problem")
                .await
                .unwrap()
        };
        let second = {
            let client = scripted_client(12);
            MctsSearch::new(&client, "mock-model", "plan well", 5)
                .run("Same problem")
                .await
                .unwrap()
        };
        let first_actions: Vec<&str> = first.steps.iter().map(|s| s.action.as_str()).collect();
        let second_actions: Vec<&str> = second.steps.iter().map(|s| s.action.as_str()).collect();
        assert_eq!(first_actions, second_actions);
    }

    #[tokio::test]
    async fn test_depth_never_exceeds_max_steps() {
        let client = scripted_client(30);
        let search = MctsSearch::new(&client, "mock-model", "plan well", 2);
        let outcome = search.run("Shallow problem").await.unwrap();
        assert!(outcome.steps.len() <= 2);
    }
}
