//! Error types for pipeline composition.
//!
//! Composition distinguishes three failure classes:
//!
//! - **Fatal, user-visible**: reserved-stage misuse, job-name conflicts
//!   under `suffix: never`, contradictory stage orderings, incompatible
//!   override policies, denied access to a policy repository.
//! - **Pipeline-level non-creation**: rule filtering left nothing to run.
//!   This is not an application error; it carries a [`FailureReason`]
//!   symbol so callers can report why no pipeline was created.
//! - **Ignored**: a policy whose content fails schema validation is
//!   skipped with a warning at load time and never reaches the composer.

use thiserror::Error;

use crate::ci::CiConfigError;
use crate::ci::rules::RulesError;

/// Why pipeline creation produced nothing to run.
///
/// These symbols are part of the caller-facing contract: they are stable
/// strings reported alongside the human-readable error message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureReason {
    /// Every job was removed by job-level `rules:` evaluation.
    FilteredByRules,
    /// The pipeline was removed by `workflow:rules` evaluation.
    FilteredByWorkflowRules,
    /// The configuration itself was missing or unusable.
    ConfigError,
}

impl FailureReason {
    /// Returns the stable string symbol for this reason.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::FilteredByRules => "filtered_by_rules",
            Self::FilteredByWorkflowRules => "filtered_by_workflow_rules",
            Self::ConfigError => "config_error",
        }
    }
}

impl std::fmt::Display for FailureReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Errors produced while composing a pipeline from project and policy
/// configuration.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ComposeError {
    /// A project job was assigned directly to a reserved stage.
    #[error("job '{job}' uses reserved stage '{stage}'; reserved stages accept policy jobs only")]
    ReservedStageJob {
        /// The offending job name.
        job: String,
        /// The reserved stage that was used.
        stage: String,
    },

    /// The project declared a reserved stage name in its `stages:` list.
    #[error("stage '{stage}' is reserved and cannot be declared in project configuration")]
    ReservedStageDeclared {
        /// The reserved stage that was declared.
        stage: String,
    },

    /// Stage declarations from different sources contradict each other.
    #[error("cyclic dependencies detected")]
    CyclicStages,

    /// A job name collides across sources and the owning policy forbids
    /// suffixing.
    #[error("job name '{name}' conflicts across pipeline sources and suffixing is disabled")]
    JobNameConflict {
        /// The conflicting job name.
        name: String,
    },

    /// Two `override_project_ci` policies declared incompatible stages.
    #[error(
        "override policies '{first}' and '{second}' declare incompatible stage orderings"
    )]
    IncompatibleOverrideStages {
        /// Name of the first override policy.
        first: String,
        /// Name of the second override policy.
        second: String,
    },

    /// A `needs:` entry points at a job that does not exist in the
    /// composed pipeline.
    #[error("job '{job}' needs '{need}', which is not defined in the composed pipeline")]
    UndefinedNeed {
        /// The job carrying the reference.
        job: String,
        /// The unresolvable `needs:` target.
        need: String,
    },

    /// Nothing remained to run; no pipeline is created.
    #[error("pipeline would be empty: {reason}")]
    EmptyPipeline {
        /// The machine-readable reason symbol.
        reason: FailureReason,
    },

    /// The triggering user may not read a policy repository.
    #[error("Project {project_id} not found or access denied")]
    AccessDenied {
        /// The policy-management project that could not be read.
        project_id: u64,
    },

    /// The project configuration failed parsing or validation.
    #[error(transparent)]
    InvalidConfig(#[from] CiConfigError),

    /// A rules expression could not be evaluated.
    #[error(transparent)]
    InvalidRules(#[from] RulesError),
}

impl ComposeError {
    /// Returns the failure-reason symbol for callers that report
    /// pipeline non-creation, if this error carries one.
    #[must_use]
    pub const fn failure_reason(&self) -> Option<FailureReason> {
        match self {
            Self::EmptyPipeline { reason } => Some(*reason),
            Self::InvalidConfig(_) | Self::InvalidRules(_) => Some(FailureReason::ConfigError),
            _ => None,
        }
    }

    /// Returns `true` if this error is a pipeline-level non-creation
    /// rather than a configuration defect.
    #[must_use]
    pub const fn is_empty_pipeline(&self) -> bool {
        matches!(self, Self::EmptyPipeline { .. })
    }
}
