//! Rule filtering and empty-pipeline applicability.
//!
//! Two questions are answered here. First, what does a configuration
//! actually contribute once `workflow:rules` and per-job `rules:` have
//! run? Second, when the project side contributes nothing, which
//! policies still apply?
//!
//! The second question distinguishes *why* the project side is empty:
//! a project with no CI file at all is different from a project whose
//! configuration was filtered to nothing. `apply_on_empty_pipeline:
//! if_no_config` rescues only the former.

use std::collections::BTreeMap;

use super::variables::rule_context;
use crate::ci::rules::{RuleOutcome, RulesError, When, evaluate_rules};
use crate::ci::{CiConfig, Job};
use crate::policy::EmptyPipelinePolicy;

/// A job that survived rule filtering, with its effective `when`.
#[derive(Debug, Clone)]
pub(super) struct FilteredJob {
    pub name: String,
    pub job: Job,
    pub when: When,
}

/// What the project configuration contributes to the pipeline.
#[derive(Debug)]
pub(super) enum ProjectOutcome {
    /// The project has no CI configuration at all.
    NoConfig,
    /// `workflow:rules` suppressed the whole pipeline.
    FilteredByWorkflowRules,
    /// Every job was removed by job-level rules.
    FilteredByRules,
    /// The surviving jobs.
    Jobs(Vec<FilteredJob>),
}

impl ProjectOutcome {
    /// Returns `true` when the project contributes at least one job.
    pub(super) fn has_jobs(&self) -> bool {
        matches!(self, Self::Jobs(jobs) if !jobs.is_empty())
    }
}

/// Evaluates what the project configuration contributes.
pub(super) fn evaluate_project(
    config: Option<&CiConfig>,
    run: &BTreeMap<String, String>,
) -> Result<ProjectOutcome, RulesError> {
    let Some(config) = config else {
        return Ok(ProjectOutcome::NoConfig);
    };
    if !workflow_allows(config, run)? {
        return Ok(ProjectOutcome::FilteredByWorkflowRules);
    }
    let kept = filter_config_jobs(config, run)?;
    if kept.is_empty() {
        return Ok(ProjectOutcome::FilteredByRules);
    }
    Ok(ProjectOutcome::Jobs(kept))
}

/// Evaluates a configuration's `workflow:rules` section.
pub(super) fn workflow_allows(
    config: &CiConfig,
    run: &BTreeMap<String, String>,
) -> Result<bool, RulesError> {
    let Some(workflow) = &config.workflow else {
        return Ok(true);
    };
    let context = rule_context(&config.variables, run);
    Ok(evaluate_rules(&workflow.rules, &context)?.is_kept())
}

/// Applies per-job rules, returning the surviving jobs in name order.
pub(super) fn filter_config_jobs(
    config: &CiConfig,
    run: &BTreeMap<String, String>,
) -> Result<Vec<FilteredJob>, RulesError> {
    let context = rule_context(&config.variables, run);
    let mut kept = Vec::new();
    for (name, job) in &config.jobs {
        let when = if job.rules.is_empty() {
            match job.when {
                Some(When::Never) => continue,
                Some(explicit) => explicit,
                None => When::default(),
            }
        } else {
            match evaluate_rules(&job.rules, &context)? {
                RuleOutcome::Keep(when) => when,
                RuleOutcome::Drop => continue,
            }
        };
        kept.push(FilteredJob {
            name: name.clone(),
            job: job.clone(),
            when,
        });
    }
    Ok(kept)
}

/// Decides whether a policy applies given the project outcome.
///
/// `effective` is the policy's `apply_on_empty_pipeline` after the
/// global differentiation toggle has been applied by the caller.
pub(super) fn policy_applies(effective: EmptyPipelinePolicy, outcome: &ProjectOutcome) -> bool {
    if outcome.has_jobs() {
        return true;
    }
    match effective {
        EmptyPipelinePolicy::Always => true,
        EmptyPipelinePolicy::IfNoConfig => matches!(outcome, ProjectOutcome::NoConfig),
        EmptyPipelinePolicy::Never => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run_vars(entries: &[(&str, &str)]) -> BTreeMap<String, String> {
        entries
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect()
    }

    fn config(yaml: &str) -> CiConfig {
        CiConfig::from_yaml(yaml).unwrap()
    }

    #[test]
    fn missing_config_is_no_config() {
        let outcome = evaluate_project(None, &BTreeMap::new()).unwrap();
        assert!(matches!(outcome, ProjectOutcome::NoConfig));
    }

    #[test]
    fn workflow_rules_suppress_the_pipeline() {
        let cfg = config(
            r#"
workflow:
  rules:
    - if: '$RUN_IT == "yes"'

job:
  script: echo hi
"#,
        );
        let outcome = evaluate_project(Some(&cfg), &BTreeMap::new()).unwrap();
        assert!(matches!(outcome, ProjectOutcome::FilteredByWorkflowRules));

        let outcome = evaluate_project(Some(&cfg), &run_vars(&[("RUN_IT", "yes")])).unwrap();
        assert!(outcome.has_jobs());
    }

    #[test]
    fn job_rules_filter_to_empty() {
        let cfg = config(
            r"
job:
  script: echo hi
  rules:
    - if: '$NEVER_SET'
",
        );
        let outcome = evaluate_project(Some(&cfg), &BTreeMap::new()).unwrap();
        assert!(matches!(outcome, ProjectOutcome::FilteredByRules));
    }

    #[test]
    fn surviving_jobs_carry_effective_when() {
        let cfg = config(
            r"
always-job:
  script: echo hi
  rules:
    - when: always

manual-free-job:
  script: echo hi
",
        );
        let outcome = evaluate_project(Some(&cfg), &BTreeMap::new()).unwrap();
        let ProjectOutcome::Jobs(jobs) = outcome else {
            panic!("expected jobs");
        };
        assert_eq!(jobs.len(), 2);
        assert_eq!(jobs[0].name, "always-job");
        assert_eq!(jobs[0].when, When::Always);
        assert_eq!(jobs[1].when, When::OnSuccess);
    }

    #[test]
    fn when_never_without_rules_drops_the_job() {
        let cfg = config(
            r"
skipped:
  script: echo hi
  when: never

kept:
  script: echo hi
",
        );
        let jobs = filter_config_jobs(&cfg, &BTreeMap::new()).unwrap();
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].name, "kept");
    }

    #[test]
    fn always_applies_to_empty_pipeline() {
        assert!(policy_applies(
            EmptyPipelinePolicy::Always,
            &ProjectOutcome::NoConfig
        ));
        assert!(policy_applies(
            EmptyPipelinePolicy::Always,
            &ProjectOutcome::FilteredByRules
        ));
    }

    #[test]
    fn if_no_config_requires_truly_absent_config() {
        assert!(policy_applies(
            EmptyPipelinePolicy::IfNoConfig,
            &ProjectOutcome::NoConfig
        ));
        assert!(!policy_applies(
            EmptyPipelinePolicy::IfNoConfig,
            &ProjectOutcome::FilteredByRules
        ));
        assert!(!policy_applies(
            EmptyPipelinePolicy::IfNoConfig,
            &ProjectOutcome::FilteredByWorkflowRules
        ));
    }

    #[test]
    fn never_does_not_rescue() {
        assert!(!policy_applies(
            EmptyPipelinePolicy::Never,
            &ProjectOutcome::NoConfig
        ));
    }

    #[test]
    fn any_policy_applies_when_project_has_jobs() {
        let outcome = ProjectOutcome::Jobs(vec![FilteredJob {
            name: "job".to_string(),
            job: config("job:\n  script: echo hi\n").jobs["job"].clone(),
            when: When::OnSuccess,
        }]);
        assert!(policy_applies(EmptyPipelinePolicy::Never, &outcome));
        assert!(policy_applies(EmptyPipelinePolicy::IfNoConfig, &outcome));
    }
}
