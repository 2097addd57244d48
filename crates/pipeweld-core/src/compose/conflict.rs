//! Job-name conflict resolution.
//!
//! When a policy job shares a name with a job from any other source, the
//! policy job is renamed `"<name>:policy-<project>-<index>"` and the
//! project's job keeps the bare name. The rename is visible to `needs:`
//! references, which resolve scope-locally: references inside a policy
//! document follow that document's renames, references in project
//! configuration never do.
//!
//! A policy configured with `suffix: never` turns any collision into a
//! fatal, deterministic error instead.

use std::collections::{BTreeMap, BTreeSet};

use super::ComposedJob;
use crate::error::ComposeError;
use crate::policy::{PolicySource, SuffixStrategy};

/// Jobs contributed by one source, before conflict resolution.
#[derive(Debug)]
pub(super) struct SourceBundle {
    /// `None` for the project's own jobs; policy identity and suffix
    /// strategy otherwise.
    pub policy: Option<(PolicySource, SuffixStrategy)>,

    /// The source's surviving jobs, bare-named.
    pub jobs: Vec<ComposedJob>,
}

/// Resolves all cross-source name collisions and validates the final
/// job set.
///
/// # Errors
///
/// Returns [`ComposeError::JobNameConflict`] when a collision cannot be
/// suffixed away, and [`ComposeError::UndefinedNeed`] when a `needs:`
/// reference does not resolve after renaming.
pub(super) fn resolve(bundles: Vec<SourceBundle>) -> Result<Vec<ComposedJob>, ComposeError> {
    let mut occurrences: BTreeMap<&str, usize> = BTreeMap::new();
    for bundle in &bundles {
        for job in &bundle.jobs {
            *occurrences.entry(job.name.as_str()).or_insert(0) += 1;
        }
    }
    let conflicted: BTreeSet<String> = occurrences
        .into_iter()
        .filter(|(_, count)| *count > 1)
        .map(|(name, _)| name.to_string())
        .collect();

    let mut resolved = Vec::new();
    for bundle in bundles {
        let mut renames: BTreeMap<String, String> = BTreeMap::new();
        if let Some((source, suffix)) = &bundle.policy {
            for job in &bundle.jobs {
                if !conflicted.contains(&job.name) {
                    continue;
                }
                if *suffix == SuffixStrategy::Never {
                    return Err(ComposeError::JobNameConflict {
                        name: job.name.clone(),
                    });
                }
                renames.insert(
                    job.name.clone(),
                    format!("{}:{}", job.name, source.conflict_suffix()),
                );
            }
        }
        for mut job in bundle.jobs {
            if let Some(renamed) = renames.get(&job.name) {
                job.name = renamed.clone();
            }
            for need in &mut job.needs {
                if let Some(renamed) = renames.get(need) {
                    *need = renamed.clone();
                }
            }
            resolved.push(job);
        }
    }

    let mut names = BTreeSet::new();
    for job in &resolved {
        if !names.insert(job.name.as_str()) {
            return Err(ComposeError::JobNameConflict {
                name: job.name.clone(),
            });
        }
    }
    for job in &resolved {
        for need in &job.needs {
            if !names.contains(need.as_str()) {
                return Err(ComposeError::UndefinedNeed {
                    job: job.name.clone(),
                    need: need.clone(),
                });
            }
        }
    }
    Ok(resolved)
}
