//! The `pipeweld compose` subcommand.

use std::collections::BTreeMap;
use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use clap::Args;
use pipeweld_core::prelude::*;
use tracing::debug;

use crate::repository::FileRepository;

/// Arguments for `pipeweld compose`.
#[derive(Debug, Args)]
pub struct ComposeArgs {
    /// Path to the project's CI configuration file (omit for projects
    /// without one)
    #[arg(long)]
    pub project_config: Option<PathBuf>,

    /// Root directory with policy-management project content, laid out
    /// as <root>/<project-id>/<path>
    #[arg(long)]
    pub repo_root: Option<PathBuf>,

    /// Namespace-scoped policy project id (repeatable, application order)
    #[arg(long = "namespace-policy")]
    pub namespace_policies: Vec<u64>,

    /// Project-scoped policy project id (repeatable, application order)
    #[arg(long = "project-policy")]
    pub project_policies: Vec<u64>,

    /// Run-time variable as KEY=VALUE (repeatable)
    #[arg(long = "variable", short = 'v')]
    pub variables: Vec<String>,

    /// Project id recorded in composition diagnostics
    #[arg(long, default_value_t = 0)]
    pub project_id: u64,

    /// Experiment: sort policy custom stages ahead of project stages
    #[arg(long)]
    pub policy_stages_first: bool,

    /// Treat every policy as `apply_on_empty_pipeline: always`
    #[arg(long)]
    pub no_empty_pipeline_differentiation: bool,

    /// Deny the repository access gate at project scope
    #[arg(long)]
    pub deny_policy_repository_access: bool,

    /// Emit JSON instead of YAML
    #[arg(long)]
    pub json: bool,
}

/// Runs the compose subcommand.
///
/// # Errors
///
/// Returns an error for unreadable inputs, invalid configuration, and
/// composition failures; empty-pipeline failures include their
/// `failure_reason` symbol.
pub fn run(args: &ComposeArgs) -> Result<()> {
    let project = match &args.project_config {
        Some(path) => {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("read project configuration {}", path.display()))?;
            Some(
                CiConfig::from_yaml(&text)
                    .with_context(|| format!("parse project configuration {}", path.display()))?,
            )
        }
        None => None,
    };

    let mut references = Vec::new();
    for id in &args.namespace_policies {
        references.push(PolicyConfigurationRef {
            scope: PolicyScope::Namespace,
            policy_project_id: *id,
        });
    }
    for id in &args.project_policies {
        references.push(PolicyConfigurationRef {
            scope: PolicyScope::Project,
            policy_project_id: *id,
        });
    }

    let policies = if references.is_empty() {
        Vec::new()
    } else {
        let root = args
            .repo_root
            .clone()
            .context("--repo-root is required when policy projects are given")?;
        let access = if args.deny_policy_repository_access {
            AccessSettings {
                project: Some(false),
                ..AccessSettings::allow_all()
            }
        } else {
            AccessSettings::allow_all()
        };
        load_policies(&FileRepository::new(root), &references, &access)?
    };

    debug!(policies = policies.len(), "loaded policies");

    let run_variables = parse_variables(&args.variables)?;
    let mut context = ComposeContext::new(args.project_id);
    context.policy_stages_first = args.policy_stages_first;
    context.differentiated_empty_pipeline = !args.no_empty_pipeline_differentiation;

    let pipeline = match Composer::new(context).compose(project.as_ref(), &policies, &run_variables)
    {
        Ok(pipeline) => pipeline,
        Err(err) => match err.failure_reason() {
            Some(reason) => bail!("{err} (failure_reason: {reason})"),
            None => return Err(err.into()),
        },
    };

    let rendered = if args.json {
        serde_json::to_string_pretty(&pipeline).context("serialize composed pipeline")?
    } else {
        serde_yaml::to_string(&pipeline).context("serialize composed pipeline")?
    };
    print!("{rendered}");
    Ok(())
}

fn parse_variables(entries: &[String]) -> Result<BTreeMap<String, String>> {
    let mut variables = BTreeMap::new();
    for entry in entries {
        let Some((key, value)) = entry.split_once('=') else {
            bail!("invalid variable '{entry}': expected KEY=VALUE");
        };
        if key.is_empty() {
            bail!("invalid variable '{entry}': empty name");
        }
        variables.insert(key.to_string(), value.to_string());
    }
    Ok(variables)
}
