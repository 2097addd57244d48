//! Pipeline execution policy documents.
//!
//! A policy is a namespace- or project-scoped configuration unit that
//! injects CI jobs and stages into every pipeline run in its scope. The
//! on-disk form is a manifest file inside a policy-management project
//! listing one or more policies; each policy's CI content is an included
//! YAML file resolved through [`loader`].
//!
//! # Manifest schema
//!
//! ```yaml
//! pipeline_execution_policies:
//!   - name: secret-detection
//!     strategy: inject_policy
//!     suffix: on_conflict
//!     apply_on_empty_pipeline: always
//!     variables_override:
//!       allowed: true
//!       exceptions: [SECURE_TOKEN]
//!     content:
//!       include:
//!         - file: policies/secret-detection.yml
//! ```

pub mod loader;

use serde::{Deserialize, Serialize};

use crate::ci::CiConfig;

/// Fixed path of the policy manifest inside a policy-management project.
pub const POLICY_MANIFEST_PATH: &str = ".pipeline-policies/policy.yml";

/// How a policy's content is combined with the project's pipeline.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    /// Add policy jobs alongside the project's jobs.
    #[default]
    InjectPolicy,
    /// Replace the project's configuration entirely.
    OverrideProjectCi,
}

impl Strategy {
    /// Returns the string representation of this strategy.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::InjectPolicy => "inject_policy",
            Self::OverrideProjectCi => "override_project_ci",
        }
    }
}

/// How job-name collisions with other sources are handled.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SuffixStrategy {
    /// Rename the policy's colliding job with a deterministic suffix.
    #[default]
    OnConflict,
    /// Treat any collision as a fatal configuration error.
    Never,
}

/// Whether run-time (pipeline/trigger) variables may override the values
/// a policy declares for its own jobs.
///
/// `exceptions` inverts the blanket decision per variable name: with
/// `allowed: false` the named variables may still be overridden, with
/// `allowed: true` the named variables keep their policy value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct VariablesOverride {
    /// The blanket decision for run-time overrides.
    pub allowed: bool,

    /// Variable names exempted from the blanket decision.
    #[serde(default)]
    pub exceptions: Vec<String>,
}

impl VariablesOverride {
    /// Returns `true` when a run-time value for `name` applies to the
    /// policy's jobs.
    #[must_use]
    pub fn permits(&self, name: &str) -> bool {
        let excepted = self.exceptions.iter().any(|entry| entry == name);
        self.allowed != excepted
    }
}

/// Whether a policy still contributes when the project pipeline would
/// otherwise be empty.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmptyPipelinePolicy {
    /// Contribute regardless, forcing pipeline creation if necessary.
    #[default]
    Always,
    /// Contribute only when the project has no CI configuration at all.
    /// A configuration filtered to nothing by rules does not count.
    IfNoConfig,
    /// Never rescue an otherwise-empty pipeline.
    Never,
}

impl EmptyPipelinePolicy {
    /// Returns the string representation of this setting.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Always => "always",
            Self::IfNoConfig => "if_no_config",
            Self::Never => "never",
        }
    }
}

/// Where a policy configuration is attached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicyScope {
    /// Attached to an ancestor namespace of the project.
    Namespace,
    /// Attached to the project itself.
    Project,
}

/// Identity of one loaded policy within a composition run.
///
/// The pair of `policy_project_id` and `index` is unique across a run
/// and parameterizes conflict-suffix names, so composition stays
/// deterministic for identical inputs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PolicySource {
    /// Scope the policy configuration is attached to.
    pub scope: PolicyScope,

    /// The policy-management project the manifest was read from.
    pub policy_project_id: u64,

    /// Position of the policy within its manifest.
    pub index: usize,
}

impl PolicySource {
    /// Returns the rename suffix for this source's colliding jobs.
    #[must_use]
    pub fn conflict_suffix(&self) -> String {
        format!("policy-{}-{}", self.policy_project_id, self.index)
    }
}

/// One entry of the policy manifest, before content resolution.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PolicyEntry {
    /// Human-readable policy name, unique within the manifest.
    pub name: String,

    /// Merge strategy.
    #[serde(default)]
    pub strategy: Strategy,

    /// Collision handling for this policy's job names.
    #[serde(default)]
    pub suffix: SuffixStrategy,

    /// Run-time variable override permission.
    #[serde(default)]
    pub variables_override: Option<VariablesOverride>,

    /// Empty-pipeline applicability.
    #[serde(default)]
    pub apply_on_empty_pipeline: EmptyPipelinePolicy,

    /// Reference to the policy's CI content.
    pub content: PolicyContent,
}

/// The `content:` section of a manifest entry.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PolicyContent {
    /// Included CI fragments. Exactly one include is supported.
    pub include: Vec<IncludeRef>,
}

/// A reference to a CI fragment in a policy-management repository.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct IncludeRef {
    /// Project to read the file from; defaults to the policy-management
    /// project the manifest lives in.
    #[serde(default)]
    pub project_id: Option<u64>,

    /// Repository path of the CI fragment.
    pub file: String,
}

/// The parsed policy manifest file.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PolicyManifest {
    /// The policies, in application order.
    pub pipeline_execution_policies: Vec<PolicyEntry>,
}

/// A fully loaded policy: manifest metadata plus resolved CI content.
#[derive(Debug, Clone, PartialEq)]
pub struct PolicyDocument {
    /// Human-readable policy name.
    pub name: String,

    /// Merge strategy.
    pub strategy: Strategy,

    /// Collision handling for this policy's job names.
    pub suffix: SuffixStrategy,

    /// Run-time variable override permission.
    pub variables_override: Option<VariablesOverride>,

    /// Empty-pipeline applicability.
    pub apply_on_empty_pipeline: EmptyPipelinePolicy,

    /// The policy's CI content.
    pub content: CiConfig,
}

/// A policy document paired with its source identity.
#[derive(Debug, Clone, PartialEq)]
pub struct LoadedPolicy {
    /// Where the policy came from.
    pub source: PolicySource,

    /// The policy itself.
    pub document: PolicyDocument,
}
