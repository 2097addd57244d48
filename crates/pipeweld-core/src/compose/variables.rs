//! Variable precedence resolution.
//!
//! Project jobs keep the ordinary chain: global variables, overlaid by
//! job variables, overlaid by run-time (pipeline/trigger) variables.
//!
//! Policy jobs are different: the policy author's declared values are
//! authoritative, and run-time values apply only where the policy's
//! `variables_override` permits. Without a `variables_override` section
//! no run-time value reaches a policy job at all.
//!
//! All resolution happens on raw values; interpolation runs once at the
//! end over the effective map.

use std::collections::BTreeMap;

use crate::ci::variables::expand_variables;
use crate::policy::VariablesOverride;

/// Resolves the effective variables of a project-sourced job.
#[must_use]
pub fn project_job_variables(
    global: &BTreeMap<String, String>,
    job: &BTreeMap<String, String>,
    run: &BTreeMap<String, String>,
) -> BTreeMap<String, String> {
    let mut effective = global.clone();
    effective.extend(job.iter().map(|(k, v)| (k.clone(), v.clone())));
    effective.extend(run.iter().map(|(k, v)| (k.clone(), v.clone())));
    expand_variables(&effective)
}

/// Resolves the effective variables of a policy-sourced job.
///
/// Precedence, lowest first: project globals, policy globals, policy job
/// variables, then run-time variables filtered through the policy's
/// `variables_override` permission.
#[must_use]
pub fn policy_job_variables(
    project_global: &BTreeMap<String, String>,
    policy_global: &BTreeMap<String, String>,
    job: &BTreeMap<String, String>,
    run: &BTreeMap<String, String>,
    variables_override: Option<&VariablesOverride>,
) -> BTreeMap<String, String> {
    let mut effective = project_global.clone();
    effective.extend(policy_global.iter().map(|(k, v)| (k.clone(), v.clone())));
    effective.extend(job.iter().map(|(k, v)| (k.clone(), v.clone())));
    for (name, value) in run {
        let permitted = variables_override.is_some_and(|vo| vo.permits(name));
        if permitted {
            effective.insert(name.clone(), value.clone());
        }
    }
    expand_variables(&effective)
}

/// The variable context rules are evaluated against: globals overlaid by
/// run-time variables.
#[must_use]
pub fn rule_context(
    global: &BTreeMap<String, String>,
    run: &BTreeMap<String, String>,
) -> BTreeMap<String, String> {
    let mut context = global.clone();
    context.extend(run.iter().map(|(k, v)| (k.clone(), v.clone())));
    context
}
