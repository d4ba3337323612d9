//! Edit-distance similarity and greedy semantic clustering.
//!
//! All agreement scoring in the aggregator reduces to the normalized
//! similarity `1 - levenshtein(a, b) / max(|a|, |b|)`, a value in `[0, 1]`.
//! Clustering is a single greedy pass: each unclustered input seeds a
//! cluster, and remaining inputs join when their mean similarity to the
//! current members reaches the threshold.

use serde::{Deserialize, Serialize};
use std::cmp::min;

/// Levenshtein distance over characters.
///
/// Single-row dynamic programming, loosely based on the implementation in
/// the [strsim](https://crates.io/crates/strsim) crate (MIT).
pub fn levenshtein(a: &str, b: &str) -> usize {
    let a_length = a.chars().count();
    let b_length = b.chars().count();

    if a_length == 0 {
        return b_length;
    }
    if b_length == 0 {
        return a_length;
    }

    let mut distance = b_length;
    let mut cost_cache: Vec<usize> = (1..=b_length).collect();

    for (i, a_char) in a.chars().enumerate() {
        let mut cost = i;
        distance = cost + 1;
        for (j, b_char) in b.chars().enumerate() {
            let substitution_cost = cost + usize::from(a_char != b_char);
            cost = cost_cache[j];

            let deletion_cost = cost + 1;
            let insertion_cost = distance + 1;

            distance = min(insertion_cost, min(substitution_cost, deletion_cost));

            cost_cache[j] = distance;
        }
    }

    distance
}

/// Normalized similarity in `[0, 1]`.  Two empty strings are identical.
pub fn similarity(a: &str, b: &str) -> f64 {
    let longest = a.chars().count().max(b.chars().count());
    if longest == 0 {
        return 1.0;
    }
    1.0 - levenshtein(a, b) as f64 / longest as f64
}

/// Mean pairwise similarity across `texts`; 1.0 for fewer than two entries.
pub fn mean_pairwise_similarity(texts: &[&str]) -> f64 {
    if texts.len() < 2 {
        return 1.0;
    }
    let mut total = 0.0;
    let mut pairs = 0usize;
    for i in 0..texts.len() {
        for j in (i + 1)..texts.len() {
            total += similarity(texts[i], texts[j]);
            pairs += 1;
        }
    }
    total / pairs as f64
}

/// A group of inputs that read alike.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SemanticCluster {
    pub id: usize,
    /// Source names of the cluster members.
    pub members: Vec<String>,
    /// Representative phrase: the leading words of the seed member.
    pub core_concept: String,
    /// Mean pairwise similarity among members (1.0 for singletons).
    pub avg_similarity: f64,
}

/// Greedy single-pass clustering of `(source, content)` pairs.
///
/// Each unclustered input seeds a new cluster; every remaining unclustered
/// input joins when its *mean* similarity to the current members is at
/// least `threshold`.  Membership therefore depends on input order, which is
/// exactly the behaviour callers rely on for determinism.
pub fn cluster_by_similarity(inputs: &[(String, String)], threshold: f64) -> Vec<SemanticCluster> {
    let mut clustered = vec![false; inputs.len()];
    let mut clusters = Vec::new();

    for seed in 0..inputs.len() {
        if clustered[seed] {
            continue;
        }
        clustered[seed] = true;
        let mut member_indices = vec![seed];

        for candidate in (seed + 1)..inputs.len() {
            if clustered[candidate] {
                continue;
            }
            let mean: f64 = member_indices
                .iter()
                .map(|&m| similarity(&inputs[m].1, &inputs[candidate].1))
                .sum::<f64>()
                / member_indices.len() as f64;
            if mean >= threshold {
                clustered[candidate] = true;
                member_indices.push(candidate);
            }
        }

        let contents: Vec<&str> = member_indices.iter().map(|&m| inputs[m].1.as_str()).collect();
        clusters.push(SemanticCluster {
            id: clusters.len(),
            members: member_indices
                .iter()
                .map(|&m| inputs[m].0.clone())
                .collect(),
            core_concept: leading_words(&inputs[seed].1, 8),
            avg_similarity: mean_pairwise_similarity(&contents),
        });
    }

    clusters
}

fn leading_words(text: &str, count: usize) -> String {
    text.split_whitespace()
        .take(count)
        .collect::<Vec<&str>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_levenshtein_known_distances() {
        assert_eq!(levenshtein("", ""), 0);
        assert_eq!(levenshtein("kitten", "sitting"), 3);
        assert_eq!(levenshtein("", "sitting"), 7);
        assert_eq!(levenshtein("kitten", ""), 6);
        assert_eq!(levenshtein("öঙ香", "abc"), 3);
    }

    #[test]
    fn test_similarity_bounds() {
        assert_eq!(similarity("", ""), 1.0);
        assert_eq!(similarity("same", "same"), 1.0);
        assert_eq!(similarity("abc", "xyz"), 0.0);
        let s = similarity("kitten", "sitting");
        assert!(s > 0.0 && s < 1.0);
    }

    #[test]
    fn test_mean_pairwise() {
        assert_eq!(mean_pairwise_similarity(&[]), 1.0);
        assert_eq!(mean_pairwise_similarity(&["one"]), 1.0);
        assert_eq!(mean_pairwise_similarity(&["aa", "aa", "aa"]), 1.0);
    }

    #[test]
    fn test_identical_inputs_form_one_cluster() {
        let inputs = vec![
            ("a1".to_string(), "the same answer".to_string()),
            ("a2".to_string(), "the same answer".to_string()),
            ("a3".to_string(), "the same answer".to_string()),
        ];
        let clusters = cluster_by_similarity(&inputs, 0.85);
        assert_eq!(clusters.len(), 1);
        assert_eq!(clusters[0].members.len(), 3);
        assert_eq!(clusters[0].avg_similarity, 1.0);
    }

    #[test]
    fn test_dissimilar_inputs_split() {
        let inputs = vec![
            ("a1".to_string(), "use a relational database".to_string()),
            ("a2".to_string(), "zzzz qqqq completely different".to_string()),
        ];
        let clusters = cluster_by_similarity(&inputs, 0.85);
        assert_eq!(clusters.len(), 2);
        assert_eq!(clusters[0].id, 0);
        assert_eq!(clusters[1].id, 1);
    }

    #[test]
    fn test_core_concept_is_seed_prefix() {
        let inputs = vec![(
            "a1".to_string(),
            "one two three four five six seven eight nine ten".to_string(),
        )];
        let clusters = cluster_by_similarity(&inputs, 0.85);
        assert_eq!(
            clusters[0].core_concept,
            "one two three four five six seven eight"
        );
    }
}
