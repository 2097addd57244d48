//! CI configuration model.
//!
//! This module defines the parsed form of a CI configuration document:
//! the project's own pipeline file, and the content fragment carried by
//! a pipeline execution policy. Both share one shape: a stage list, a
//! global variable block, an optional `workflow:` section, and a set of
//! named jobs.
//!
//! Parsing is fail-closed: unknown job-level keys and unsupported
//! top-level sections are rejected rather than ignored. Top-level keys
//! beginning with a dot are hidden templates and are skipped.

pub mod rules;
pub mod variables;

use std::collections::BTreeMap;

use serde::{Deserialize, Deserializer};
use thiserror::Error;

use self::rules::{Rule, When, check_expression};

/// Reserved stage pinned to the front of every composed pipeline.
pub const RESERVED_STAGE_PRE: &str = ".pipeline-policy-pre";

/// Reserved stage pinned to the back of every composed pipeline.
pub const RESERVED_STAGE_POST: &str = ".pipeline-policy-post";

/// Stage list used when a configuration declares none.
pub const DEFAULT_STAGES: [&str; 5] = [".pre", "build", "test", "deploy", ".post"];

/// Stage assigned to jobs that do not name one.
pub const DEFAULT_JOB_STAGE: &str = "test";

/// Top-level sections this engine deliberately does not support.
const UNSUPPORTED_KEYS: [&str; 2] = ["default", "include"];

/// A parsed CI configuration document.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CiConfig {
    /// Declared stage order, if the document has a `stages:` section.
    pub stages: Option<Vec<String>>,

    /// Document-global variables.
    pub variables: BTreeMap<String, String>,

    /// Pipeline-wide workflow section.
    pub workflow: Option<Workflow>,

    /// Jobs keyed by name. `BTreeMap` keeps iteration deterministic.
    pub jobs: BTreeMap<String, Job>,
}

/// The `workflow:` section of a configuration.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Workflow {
    /// Pipeline-wide rules; a non-match suppresses the whole pipeline.
    #[serde(default)]
    pub rules: Vec<Rule>,

    /// Display name for pipelines created from this document.
    #[serde(default)]
    pub name: Option<String>,
}

/// A single job definition.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Job {
    /// Stage this job runs in.
    #[serde(default = "default_job_stage")]
    pub stage: String,

    /// Shell commands; accepts a single string or a list.
    #[serde(default, deserialize_with = "one_or_many")]
    pub script: Vec<String>,

    /// Jobs this one depends on; accepts a single string or a list.
    #[serde(default, deserialize_with = "one_or_many")]
    pub needs: Vec<String>,

    /// Job-level variables.
    #[serde(default, deserialize_with = "scalar_variables")]
    pub variables: BTreeMap<String, String>,

    /// Job-level rules.
    #[serde(default)]
    pub rules: Vec<Rule>,

    /// Explicit `when:` for jobs without rules.
    #[serde(default)]
    pub when: Option<When>,
}

fn default_job_stage() -> String {
    DEFAULT_JOB_STAGE.to_string()
}

/// Whether a document is a project pipeline file or policy content.
///
/// The distinction only affects which stages a job may use: policy
/// content may target the reserved policy stages, project configuration
/// may not.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigOrigin {
    /// The project's own pipeline file.
    Project,
    /// The content fragment of a pipeline execution policy.
    PolicyContent,
}

/// Errors from parsing or validating a CI configuration document.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum CiConfigError {
    /// The YAML could not be parsed into the expected shape.
    #[error("failed to parse configuration: {0}")]
    Parse(#[from] serde_yaml::Error),

    /// The document parsed but violates a structural rule.
    #[error("configuration validation failed: {0}")]
    Validation(String),
}

impl CiConfig {
    /// Parses a configuration document from YAML text.
    ///
    /// Top-level keys other than `stages`, `variables`, and `workflow`
    /// are job definitions; keys starting with `.` are hidden templates
    /// and are skipped. The `default:` and `include:` sections are not
    /// supported and are rejected outright.
    ///
    /// # Errors
    ///
    /// Returns [`CiConfigError`] if the YAML is malformed, a section
    /// fails to deserialize, or an unsupported section is present.
    pub fn from_yaml(source: &str) -> Result<Self, CiConfigError> {
        let value: serde_yaml::Value = serde_yaml::from_str(source)?;
        let mapping = value.as_mapping().ok_or_else(|| {
            CiConfigError::Validation("configuration must be a YAML mapping".to_string())
        })?;

        let mut config = Self::default();
        for (key, entry) in mapping {
            let Some(key) = key.as_str() else {
                return Err(CiConfigError::Validation(
                    "top-level keys must be strings".to_string(),
                ));
            };
            if UNSUPPORTED_KEYS.contains(&key) {
                return Err(CiConfigError::Validation(format!(
                    "'{key}:' is not supported by this engine"
                )));
            }
            match key {
                "stages" => config.stages = Some(serde_yaml::from_value(entry.clone())?),
                "variables" => {
                    config.variables = deserialize_scalar_map(entry.clone())?;
                }
                "workflow" => config.workflow = Some(serde_yaml::from_value(entry.clone())?),
                name if name.starts_with('.') => {}
                name => {
                    let job: Job = serde_yaml::from_value(entry.clone()).map_err(|err| {
                        CiConfigError::Validation(format!("job '{name}': {err}"))
                    })?;
                    config.jobs.insert(name.to_string(), job);
                }
            }
        }
        Ok(config)
    }

    /// Returns the declared stage order, or the default stages when the
    /// document declares none.
    #[must_use]
    pub fn declared_stages(&self) -> Vec<String> {
        self.stages.clone().unwrap_or_else(|| {
            DEFAULT_STAGES.iter().map(|s| (*s).to_string()).collect()
        })
    }

    /// Validates document structure.
    ///
    /// Checks stage-list sanity, that every job names a usable stage and
    /// a non-empty script, and that every reachable rules expression
    /// parses. Reserved policy stages are usable only from policy
    /// content.
    ///
    /// # Errors
    ///
    /// Returns [`CiConfigError::Validation`] describing the first
    /// violation found.
    pub fn validate(&self, origin: ConfigOrigin) -> Result<(), CiConfigError> {
        let declared = self.declared_stages();
        let mut seen = std::collections::BTreeSet::new();
        for stage in &declared {
            if stage.is_empty() {
                return Err(CiConfigError::Validation(
                    "stage names must be non-empty".to_string(),
                ));
            }
            if !seen.insert(stage.as_str()) {
                return Err(CiConfigError::Validation(format!(
                    "stage '{stage}' is declared more than once"
                )));
            }
        }

        let mut allowed: std::collections::BTreeSet<&str> =
            declared.iter().map(String::as_str).collect();
        allowed.insert(".pre");
        allowed.insert(".post");
        if origin == ConfigOrigin::PolicyContent {
            allowed.insert(RESERVED_STAGE_PRE);
            allowed.insert(RESERVED_STAGE_POST);
        }

        for (name, job) in &self.jobs {
            if job.script.is_empty() {
                return Err(CiConfigError::Validation(format!(
                    "job '{name}' has no script"
                )));
            }
            if !allowed.contains(job.stage.as_str()) {
                return Err(CiConfigError::Validation(format!(
                    "job '{name}' uses undeclared stage '{}'",
                    job.stage
                )));
            }
            for rule in &job.rules {
                if let Some(expr) = &rule.if_expr {
                    check_expression(expr).map_err(|err| {
                        CiConfigError::Validation(format!("job '{name}': {err}"))
                    })?;
                }
            }
            for need in &job.needs {
                if need.is_empty() {
                    return Err(CiConfigError::Validation(format!(
                        "job '{name}' has an empty needs entry"
                    )));
                }
            }
        }

        if let Some(workflow) = &self.workflow {
            for rule in &workflow.rules {
                if let Some(expr) = &rule.if_expr {
                    check_expression(expr).map_err(|err| {
                        CiConfigError::Validation(format!("workflow: {err}"))
                    })?;
                }
            }
        }
        Ok(())
    }

    /// Returns `true` when any top-level key is a job section.
    #[must_use]
    pub fn has_jobs(&self) -> bool {
        !self.jobs.is_empty()
    }
}

fn one_or_many<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        One(String),
        Many(Vec<String>),
    }
    Ok(match OneOrMany::deserialize(deserializer)? {
        OneOrMany::One(single) => vec![single],
        OneOrMany::Many(list) => list,
    })
}

/// YAML scalars used as variable values are coerced to strings, the way
/// CI systems treat `RETRIES: 3` and `FLAG: true`.
#[derive(Deserialize)]
#[serde(untagged)]
enum ScalarVar {
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
}

impl ScalarVar {
    fn into_string(self) -> String {
        match self {
            Self::Bool(value) => value.to_string(),
            Self::Int(value) => value.to_string(),
            Self::Float(value) => value.to_string(),
            Self::Str(value) => value,
        }
    }
}

fn scalar_variables<'de, D>(deserializer: D) -> Result<BTreeMap<String, String>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = BTreeMap::<String, ScalarVar>::deserialize(deserializer)?;
    Ok(raw
        .into_iter()
        .map(|(name, value)| (name, value.into_string()))
        .collect())
}

fn deserialize_scalar_map(value: serde_yaml::Value) -> Result<BTreeMap<String, String>, CiConfigError> {
    let raw: BTreeMap<String, ScalarVar> = serde_yaml::from_value(value)?;
    Ok(raw
        .into_iter()
        .map(|(name, value)| (name, value.into_string()))
        .collect())
}
