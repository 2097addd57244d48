//! Stage reconciliation.
//!
//! Every contributing source declares a stage order. The composed
//! pipeline needs a single order that honors all of them, with the
//! reserved policy stages pinned to the boundaries:
//!
//! ```text
//! .pipeline-policy-pre, .pre, <merged stages>, .post, .pipeline-policy-post
//! ```
//!
//! Each source's declared list contributes precedence edges between
//! consecutive stages; the merged order is a topological sort over the
//! union. Ties are broken deterministically by first appearance across
//! sources in priority order: project stages first, then each policy's
//! stages in application order. Under the stages-first experiment the
//! priority is flipped, placing policy custom stages ahead of the
//! project's.
//!
//! Sources that declare contradictory relative orders cannot be merged;
//! that is reported as a cycle.

use std::collections::{BTreeMap, BTreeSet};

use crate::ci::{RESERVED_STAGE_POST, RESERVED_STAGE_PRE};
use crate::error::ComposeError;

/// Stages that are pinned rather than sorted.
fn is_pinned(stage: &str) -> bool {
    stage == ".pre"
        || stage == ".post"
        || stage == RESERVED_STAGE_PRE
        || stage == RESERVED_STAGE_POST
}

/// Merges declared stage orders into the final pipeline stage list.
///
/// `sources` are the declared stage lists of every contributing source,
/// in priority order (the caller applies the experiment flip before
/// calling). The result always contains the four pinned stages at their
/// fixed positions; callers prune stages that end up with no jobs.
///
/// # Errors
///
/// Returns [`ComposeError::CyclicStages`] when the declared orders
/// contradict each other.
pub fn reconcile(sources: &[Vec<String>]) -> Result<Vec<String>, ComposeError> {
    // Priority: the sequence number of each stage's first appearance.
    let mut priority: BTreeMap<&str, usize> = BTreeMap::new();
    let mut sequence = 0usize;
    for source in sources {
        for stage in source {
            if is_pinned(stage) {
                continue;
            }
            priority.entry(stage.as_str()).or_insert_with(|| {
                sequence += 1;
                sequence
            });
        }
    }

    // Precedence edges from each source's consecutive declarations.
    let mut successors: BTreeMap<&str, BTreeSet<&str>> = BTreeMap::new();
    let mut indegree: BTreeMap<&str, usize> = BTreeMap::new();
    for stage in priority.keys() {
        successors.entry(stage).or_default();
        indegree.entry(stage).or_insert(0);
    }
    for source in sources {
        let ordered: Vec<&str> = source
            .iter()
            .map(String::as_str)
            .filter(|stage| !is_pinned(stage))
            .collect();
        for pair in ordered.windows(2) {
            let (before, after) = (pair[0], pair[1]);
            if successors.get_mut(before).is_some_and(|set| set.insert(after)) {
                *indegree.get_mut(after).expect("known stage") += 1;
            }
        }
    }

    // Kahn's algorithm; the ready set is keyed by first-appearance
    // priority so the merge is deterministic.
    let mut ready: BTreeSet<(usize, &str)> = indegree
        .iter()
        .filter(|(_, degree)| **degree == 0)
        .map(|(stage, _)| (priority[stage], *stage))
        .collect();
    let mut merged = Vec::with_capacity(priority.len());
    while let Some(&(rank, stage)) = ready.iter().next() {
        ready.remove(&(rank, stage));
        merged.push(stage.to_string());
        if let Some(next) = successors.get(stage) {
            for successor in next.clone() {
                let degree = indegree.get_mut(successor).expect("known stage");
                *degree -= 1;
                if *degree == 0 {
                    ready.insert((priority[successor], successor));
                }
            }
        }
    }
    if merged.len() != priority.len() {
        return Err(ComposeError::CyclicStages);
    }

    let mut stages = Vec::with_capacity(merged.len() + 4);
    stages.push(RESERVED_STAGE_PRE.to_string());
    stages.push(".pre".to_string());
    stages.extend(merged);
    stages.push(".post".to_string());
    stages.push(RESERVED_STAGE_POST.to_string());
    Ok(stages)
}

/// Checks that two override policies declare compatible stage orders:
/// every pair of stages they share must appear in the same relative
/// order in both.
#[must_use]
pub fn compatible_orders(first: &[String], second: &[String]) -> bool {
    let positions: BTreeMap<&str, usize> = first
        .iter()
        .enumerate()
        .map(|(index, stage)| (stage.as_str(), index))
        .collect();
    let shared: Vec<usize> = second
        .iter()
        .filter_map(|stage| positions.get(stage.as_str()).copied())
        .collect();
    shared.windows(2).all(|pair| pair[0] < pair[1])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn list(stages: &[&str]) -> Vec<String> {
        stages.iter().map(|s| (*s).to_string()).collect()
    }

    #[test]
    fn single_source_keeps_declared_order() {
        let merged = reconcile(&[list(&["build", "test", "deploy"])]).unwrap();
        assert_eq!(
            merged,
            list(&[
                ".pipeline-policy-pre",
                ".pre",
                "build",
                "test",
                "deploy",
                ".post",
                ".pipeline-policy-post",
            ])
        );
    }

    #[test]
    fn policy_custom_stages_append_after_project_stages() {
        let merged = reconcile(&[
            list(&["build", "test"]),
            list(&["build", "policy-scan"]),
        ])
        .unwrap();
        let build = merged.iter().position(|s| s == "build").unwrap();
        let test = merged.iter().position(|s| s == "test").unwrap();
        let scan = merged.iter().position(|s| s == "policy-scan").unwrap();
        assert!(build < test);
        assert!(test < scan, "policy stage should sort after project stages");
    }

    #[test]
    fn stages_first_priority_moves_policy_stages_forward() {
        // Caller flips priority by putting policy sources first.
        let merged = reconcile(&[
            list(&["policy-scan"]),
            list(&["build", "test"]),
        ])
        .unwrap();
        let scan = merged.iter().position(|s| s == "policy-scan").unwrap();
        let build = merged.iter().position(|s| s == "build").unwrap();
        assert!(scan < build);
    }

    #[test]
    fn shared_stage_edges_are_honored() {
        // Policy squeezes its stage between the project's build and test.
        let merged = reconcile(&[
            list(&["build", "test"]),
            list(&["build", "policy-scan", "test"]),
        ])
        .unwrap();
        let build = merged.iter().position(|s| s == "build").unwrap();
        let scan = merged.iter().position(|s| s == "policy-scan").unwrap();
        let test = merged.iter().position(|s| s == "test").unwrap();
        assert!(build < scan);
        assert!(scan < test);
    }

    #[test]
    fn contradictory_orders_are_cyclic() {
        let err = reconcile(&[
            list(&["policy-test", "test"]),
            list(&["test", "policy-test"]),
        ])
        .unwrap_err();
        assert_eq!(err.to_string(), "cyclic dependencies detected");
    }

    #[test]
    fn pinned_stages_never_participate_in_sorting() {
        let merged = reconcile(&[
            list(&[".pre", "build", ".post"]),
            list(&[".pipeline-policy-pre", "scan"]),
        ])
        .unwrap();
        assert_eq!(merged[0], ".pipeline-policy-pre");
        assert_eq!(merged[1], ".pre");
        assert_eq!(merged[merged.len() - 2], ".post");
        assert_eq!(merged[merged.len() - 1], ".pipeline-policy-post");
        let build = merged.iter().position(|s| s == "build").unwrap();
        let scan = merged.iter().position(|s| s == "scan").unwrap();
        assert!(build < scan);
    }

    #[test]
    fn reconcile_is_idempotent() {
        let sources = [
            list(&["build", "test"]),
            list(&["verify", "build"]),
            list(&["test", "publish"]),
        ];
        let first = reconcile(&sources).unwrap();
        let second = reconcile(&sources).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn compatible_orders_accepts_consistent_subsets() {
        assert!(compatible_orders(
            &list(&["build", "test", "deploy"]),
            &list(&["build", "deploy"]),
        ));
        assert!(compatible_orders(&list(&["a"]), &list(&["b"])));
    }

    #[test]
    fn compatible_orders_rejects_contradictions() {
        assert!(!compatible_orders(
            &list(&["build", "test"]),
            &list(&["test", "build"]),
        ));
    }
}
