//! Pipeline composition.
//!
//! The composer merges the project's own CI configuration with the
//! loaded pipeline execution policies into one stage/job graph. The
//! algorithm is synchronous and deterministic: identical inputs always
//! produce a structurally identical composite, including stage order
//! and conflict-suffixed job names.
//!
//! Composition order:
//!
//! 1. Validate the project configuration (reserved stages are a hard
//!    error there).
//! 2. Resolve the merge strategy. Any `override_project_ci` policy
//!    discards the project's jobs, stages, and workflow.
//! 3. Evaluate what the project contributes (workflow rules, job
//!    rules), then decide per policy whether it applies
//!    ([`applicability`]).
//! 4. Reconcile stage orders ([`stages`]), resolve name conflicts
//!    ([`conflict`]), and resolve variables ([`variables`]).
//! 5. Prune stages that ended up with no jobs.

mod applicability;
mod conflict;
pub mod stages;
pub mod variables;

use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;
use tracing::debug;

use self::applicability::ProjectOutcome;
use self::conflict::SourceBundle;
use crate::ci::rules::When;
use crate::ci::{CiConfig, CiConfigError, ConfigOrigin, RESERVED_STAGE_POST, RESERVED_STAGE_PRE};
use crate::error::{ComposeError, FailureReason};
use crate::policy::{EmptyPipelinePolicy, LoadedPolicy, PolicySource, Strategy};

/// Explicit, per-run composer state. Nothing in the engine is ambient:
/// feature toggles and the project identity travel through this value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ComposeContext {
    /// The project whose pipeline is being composed.
    pub project_id: u64,

    /// Experiment: sort policy custom stages ahead of project stages.
    pub policy_stages_first: bool,

    /// Kill switch for differentiated `apply_on_empty_pipeline`
    /// behavior; when `false`, every policy is treated as `always`.
    pub differentiated_empty_pipeline: bool,
}

impl ComposeContext {
    /// Creates a context with default toggles.
    #[must_use]
    pub const fn new(project_id: u64) -> Self {
        Self {
            project_id,
            policy_stages_first: false,
            differentiated_empty_pipeline: true,
        }
    }
}

impl Default for ComposeContext {
    fn default() -> Self {
        Self::new(0)
    }
}

/// How the composed pipeline came to exist.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfigSource {
    /// The project's repository configuration produced jobs.
    Repository,
    /// Only policy contributions kept the pipeline from being empty.
    PipelineExecutionPolicyForced,
}

impl ConfigSource {
    /// Returns the string representation of this source.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Repository => "repository",
            Self::PipelineExecutionPolicyForced => "pipeline_execution_policy_forced",
        }
    }
}

/// Which source a composed job came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobOrigin {
    /// The project's own configuration.
    Project,
    /// A pipeline execution policy.
    Policy {
        /// The policy's source identity.
        source: PolicySource,
        /// The policy's manifest name.
        policy_name: String,
    },
}

/// One job of the composed pipeline.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ComposedJob {
    /// Final job name, after any conflict suffixing.
    pub name: String,

    /// Stage the job runs in.
    pub stage: String,

    /// Shell commands.
    pub script: Vec<String>,

    /// Dependencies, rewritten to post-suffix names.
    pub needs: Vec<String>,

    /// Fully resolved and expanded variables.
    pub variables: BTreeMap<String, String>,

    /// Effective `when` after rule evaluation.
    pub when: When,

    /// Where the job came from.
    pub origin: JobOrigin,
}

/// The composed pipeline: the engine's sole output.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ComposedPipeline {
    /// Final stage order; stages without jobs are pruned.
    pub stages: Vec<String>,

    /// Jobs ordered by stage, then by name.
    pub jobs: Vec<ComposedJob>,

    /// Pipeline display name, if any source provided one.
    pub workflow_name: Option<String>,

    /// How the pipeline came to exist.
    pub config_source: ConfigSource,
}

impl ComposedPipeline {
    /// Returns the names of all composed jobs, in pipeline order.
    #[must_use]
    pub fn job_names(&self) -> Vec<&str> {
        self.jobs.iter().map(|job| job.name.as_str()).collect()
    }
}

/// The pipeline composer.
#[derive(Debug, Clone, Default)]
pub struct Composer {
    context: ComposeContext,
}

impl Composer {
    /// Creates a composer with the given run context.
    #[must_use]
    pub const fn new(context: ComposeContext) -> Self {
        Self { context }
    }

    /// Composes the project configuration and the loaded policies into
    /// a single pipeline.
    ///
    /// `project` is `None` when the project has no CI file.
    /// `run_variables` are the pipeline/trigger variables of this run.
    ///
    /// # Errors
    ///
    /// Returns [`ComposeError`] for validation failures, irreconcilable
    /// stage or name conflicts, and empty pipelines (the latter carry a
    /// [`FailureReason`]).
    pub fn compose(
        &self,
        project: Option<&CiConfig>,
        policies: &[LoadedPolicy],
        run_variables: &BTreeMap<String, String>,
    ) -> Result<ComposedPipeline, ComposeError> {
        debug!(
            project_id = self.context.project_id,
            policies = policies.len(),
            has_project_config = project.is_some(),
            "composing pipeline"
        );

        if let Some(config) = project {
            validate_project_config(config)?;
        }

        let override_policies: Vec<&LoadedPolicy> = policies
            .iter()
            .filter(|policy| policy.document.strategy == Strategy::OverrideProjectCi)
            .collect();
        let override_active = !override_policies.is_empty();
        for (position, first) in override_policies.iter().enumerate() {
            for second in &override_policies[position + 1..] {
                let compatible = stages::compatible_orders(
                    &first.document.content.declared_stages(),
                    &second.document.content.declared_stages(),
                );
                if !compatible {
                    return Err(ComposeError::IncompatibleOverrideStages {
                        first: first.document.name.clone(),
                        second: second.document.name.clone(),
                    });
                }
            }
        }

        let project_outcome = applicability::evaluate_project(project, run_variables)?;

        let project_globals: BTreeMap<String, String> = if override_active {
            BTreeMap::new()
        } else {
            project.map(|config| config.variables.clone()).unwrap_or_default()
        };

        let mut bundles: Vec<SourceBundle> = Vec::new();
        let mut project_stage_list: Option<Vec<String>> = None;
        let mut policy_stage_lists: Vec<Vec<String>> = Vec::new();

        if !override_active {
            if let ProjectOutcome::Jobs(kept) = &project_outcome {
                let config = project.expect("project outcome implies configuration");
                let jobs = kept
                    .iter()
                    .map(|filtered| ComposedJob {
                        name: filtered.name.clone(),
                        stage: filtered.job.stage.clone(),
                        script: filtered.job.script.clone(),
                        needs: filtered.job.needs.clone(),
                        variables: variables::project_job_variables(
                            &config.variables,
                            &filtered.job.variables,
                            run_variables,
                        ),
                        when: filtered.when,
                        origin: JobOrigin::Project,
                    })
                    .collect();
                bundles.push(SourceBundle {
                    policy: None,
                    jobs,
                });
                project_stage_list = Some(config.declared_stages());
            }
        }

        for policy in policies {
            let document = &policy.document;
            let effective = if self.context.differentiated_empty_pipeline {
                document.apply_on_empty_pipeline
            } else {
                EmptyPipelinePolicy::Always
            };
            if !applicability::policy_applies(effective, &project_outcome) {
                debug!(
                    policy = %document.name,
                    apply_on_empty_pipeline = document.apply_on_empty_pipeline.as_str(),
                    "policy does not apply to an empty pipeline"
                );
                continue;
            }
            if !applicability::workflow_allows(&document.content, run_variables)? {
                debug!(policy = %document.name, "policy workflow rules did not match");
                continue;
            }
            let kept = applicability::filter_config_jobs(&document.content, run_variables)?;
            if kept.is_empty() {
                debug!(policy = %document.name, "policy jobs all filtered by rules");
                continue;
            }
            let jobs = kept
                .iter()
                .map(|filtered| ComposedJob {
                    name: filtered.name.clone(),
                    stage: filtered.job.stage.clone(),
                    script: filtered.job.script.clone(),
                    needs: filtered.job.needs.clone(),
                    variables: variables::policy_job_variables(
                        &project_globals,
                        &document.content.variables,
                        &filtered.job.variables,
                        run_variables,
                        document.variables_override.as_ref(),
                    ),
                    when: filtered.when,
                    origin: JobOrigin::Policy {
                        source: policy.source,
                        policy_name: document.name.clone(),
                    },
                })
                .collect();
            bundles.push(SourceBundle {
                policy: Some((policy.source, document.suffix)),
                jobs,
            });
            policy_stage_lists.push(document.content.declared_stages());
        }

        if bundles.iter().all(|bundle| bundle.jobs.is_empty()) {
            let reason = match project_outcome {
                ProjectOutcome::FilteredByWorkflowRules => FailureReason::FilteredByWorkflowRules,
                ProjectOutcome::FilteredByRules | ProjectOutcome::Jobs(_) => {
                    FailureReason::FilteredByRules
                }
                ProjectOutcome::NoConfig => FailureReason::ConfigError,
            };
            return Err(ComposeError::EmptyPipeline { reason });
        }

        let config_source = if project_outcome.has_jobs() {
            ConfigSource::Repository
        } else {
            ConfigSource::PipelineExecutionPolicyForced
        };

        let mut stage_sources: Vec<Vec<String>> = Vec::new();
        if self.context.policy_stages_first {
            stage_sources.extend(policy_stage_lists);
            stage_sources.extend(project_stage_list);
        } else {
            stage_sources.extend(project_stage_list);
            stage_sources.extend(policy_stage_lists);
        }
        let stage_order = stages::reconcile(&stage_sources)?;

        let mut jobs = conflict::resolve(bundles)?;
        let stage_rank: BTreeMap<&str, usize> = stage_order
            .iter()
            .enumerate()
            .map(|(rank, stage)| (stage.as_str(), rank))
            .collect();
        jobs.sort_by(|a, b| {
            stage_rank[a.stage.as_str()]
                .cmp(&stage_rank[b.stage.as_str()])
                .then_with(|| a.name.cmp(&b.name))
        });

        let used: BTreeSet<&str> = jobs.iter().map(|job| job.stage.as_str()).collect();
        let pruned: Vec<String> = stage_order
            .iter()
            .filter(|stage| used.contains(stage.as_str()))
            .cloned()
            .collect();

        let workflow_name = if override_active {
            override_policies
                .first()
                .and_then(|policy| policy.document.content.workflow.as_ref())
                .and_then(|workflow| workflow.name.clone())
        } else {
            project
                .and_then(|config| config.workflow.as_ref())
                .and_then(|workflow| workflow.name.clone())
        };

        debug!(
            stages = pruned.len(),
            jobs = jobs.len(),
            config_source = config_source.as_str(),
            "composed pipeline"
        );
        Ok(ComposedPipeline {
            stages: pruned,
            jobs,
            workflow_name,
            config_source,
        })
    }
}

/// Project-side hard validation: reserved stages may not be declared or
/// targeted, and the configuration must define at least one job.
fn validate_project_config(config: &CiConfig) -> Result<(), ComposeError> {
    if let Some(declared) = &config.stages {
        for stage in declared {
            if stage == RESERVED_STAGE_PRE || stage == RESERVED_STAGE_POST {
                return Err(ComposeError::ReservedStageDeclared {
                    stage: stage.clone(),
                });
            }
        }
    }
    for (name, job) in &config.jobs {
        if job.stage == RESERVED_STAGE_PRE || job.stage == RESERVED_STAGE_POST {
            return Err(ComposeError::ReservedStageJob {
                job: name.clone(),
                stage: job.stage.clone(),
            });
        }
    }
    config.validate(ConfigOrigin::Project)?;
    if !config.has_jobs() {
        return Err(CiConfigError::Validation(
            "configuration contains no jobs".to_string(),
        )
        .into());
    }
    Ok(())
}
