//! End-to-end composition: manifests and CI content loaded through the
//! repository seam, then composed with a project configuration.

use std::collections::BTreeMap;

use pipeweld_core::policy::POLICY_MANIFEST_PATH;
use pipeweld_core::prelude::*;
use pipeweld_core::{ComposedJob, JobOrigin};

const PROJECT_CONFIG: &str = r#"
stages: [build, test]

variables:
  LEVEL: project-default

workflow:
  name: main-pipeline

build-job:
  stage: build
  script: make build

test-job:
  stage: test
  script: make check
  needs: build-job
  variables:
    LEVEL: test-level
"#;

const NAMESPACE_MANIFEST: &str = r"
pipeline_execution_policies:
  - name: secret-detection
    suffix: on_conflict
    variables_override:
      allowed: true
      exceptions: [TOKEN]
    content:
      include:
        - file: policies/secrets.yml
";

const NAMESPACE_CONTENT: &str = r"
stages: [build, policy-report]

build-job:
  stage: build
  script: scan --secrets
  variables:
    TOKEN: policy-secret
    LEVEL: policy-level

report:
  stage: policy-report
  script: scan --report
  needs: build-job
";

fn seeded_repository() -> InMemoryRepository {
    let mut repo = InMemoryRepository::new();
    repo.insert(5, POLICY_MANIFEST_PATH, NAMESPACE_MANIFEST);
    repo.insert(5, "policies/secrets.yml", NAMESPACE_CONTENT);
    repo
}

fn namespace_refs() -> Vec<PolicyConfigurationRef> {
    vec![PolicyConfigurationRef {
        scope: PolicyScope::Namespace,
        policy_project_id: 5,
    }]
}

fn compose_with(
    run_variables: &BTreeMap<String, String>,
) -> pipeweld_core::ComposedPipeline {
    let project = CiConfig::from_yaml(PROJECT_CONFIG).unwrap();
    let policies = load_policies(
        &seeded_repository(),
        &namespace_refs(),
        &AccessSettings::allow_all(),
    )
    .unwrap();
    Composer::new(ComposeContext::new(1))
        .compose(Some(&project), &policies, run_variables)
        .unwrap()
}

fn find<'a>(pipeline: &'a pipeweld_core::ComposedPipeline, name: &str) -> &'a ComposedJob {
    pipeline
        .jobs
        .iter()
        .find(|job| job.name == name)
        .unwrap_or_else(|| panic!("job '{name}' not found"))
}

#[test]
fn colliding_policy_job_is_suffixed_and_needs_follow() {
    let pipeline = compose_with(&BTreeMap::new());

    // The project's job keeps the bare name; the policy's collides and
    // is renamed by policy project id and manifest index.
    assert_eq!(
        pipeline.job_names(),
        vec![
            "build-job",
            "build-job:policy-5-0",
            "test-job",
            "report",
        ]
    );

    let report = find(&pipeline, "report");
    assert_eq!(report.needs, vec!["build-job:policy-5-0"]);

    // The project's own reference still points at the project job.
    let test_job = find(&pipeline, "test-job");
    assert_eq!(test_job.needs, vec!["build-job"]);
}

#[test]
fn stage_order_honors_both_sources() {
    let pipeline = compose_with(&BTreeMap::new());
    assert_eq!(pipeline.stages, vec!["build", "test", "policy-report"]);
}

#[test]
fn workflow_name_comes_from_the_project() {
    let pipeline = compose_with(&BTreeMap::new());
    assert_eq!(pipeline.workflow_name.as_deref(), Some("main-pipeline"));
    assert_eq!(pipeline.config_source, ConfigSource::Repository);
}

#[test]
fn run_variables_respect_variables_override_exceptions() {
    let mut run = BTreeMap::new();
    run.insert("TOKEN".to_string(), "run-token".to_string());
    run.insert("LEVEL".to_string(), "run-level".to_string());
    let pipeline = compose_with(&run);

    // Policy job: TOKEN is excepted from the allowed override, so the
    // policy value wins; LEVEL is overridable.
    let policy_job = find(&pipeline, "build-job:policy-5-0");
    assert!(matches!(policy_job.origin, JobOrigin::Policy { .. }));
    assert_eq!(policy_job.variables.get("TOKEN").unwrap(), "policy-secret");
    assert_eq!(policy_job.variables.get("LEVEL").unwrap(), "run-level");

    // Project jobs keep ordinary precedence: run beats job beats global,
    // untouched by the policy's override configuration.
    let test_job = find(&pipeline, "test-job");
    assert_eq!(test_job.origin, JobOrigin::Project);
    assert_eq!(test_job.variables.get("LEVEL").unwrap(), "run-level");
    assert_eq!(test_job.variables.get("TOKEN").unwrap(), "run-token");
}

#[test]
fn project_globals_flow_into_policy_jobs() {
    let pipeline = compose_with(&BTreeMap::new());
    let policy_job = find(&pipeline, "build-job:policy-5-0");
    // Declared by the policy job itself.
    assert_eq!(policy_job.variables.get("LEVEL").unwrap(), "policy-level");
    let report = find(&pipeline, "report");
    // Inherited from the project's globals.
    assert_eq!(report.variables.get("LEVEL").unwrap(), "project-default");
}

#[test]
fn composition_is_reproducible_through_the_full_stack() {
    let first = compose_with(&BTreeMap::new());
    let second = compose_with(&BTreeMap::new());
    assert_eq!(first, second);
}

#[test]
fn suffix_never_collision_fails_composition() {
    let mut repo = InMemoryRepository::new();
    repo.insert(
        5,
        POLICY_MANIFEST_PATH,
        r"
pipeline_execution_policies:
  - name: strict-scan
    suffix: never
    content:
      include:
        - file: policies/strict.yml
",
    );
    repo.insert(
        5,
        "policies/strict.yml",
        r"
build-job:
  stage: build
  script: scan
",
    );
    let project = CiConfig::from_yaml(PROJECT_CONFIG).unwrap();
    let policies =
        load_policies(&repo, &namespace_refs(), &AccessSettings::allow_all()).unwrap();
    let err = Composer::new(ComposeContext::new(1))
        .compose(Some(&project), &policies, &BTreeMap::new())
        .unwrap_err();
    assert!(err.to_string().contains("build-job"));
    assert!(err.to_string().contains("suffixing is disabled"));
}

#[test]
fn denied_access_short_circuits_loading() {
    let access = AccessSettings {
        namespace: Some(false),
        ..AccessSettings::allow_all()
    };
    let err = load_policies(&seeded_repository(), &namespace_refs(), &access).unwrap_err();
    assert_eq!(err.to_string(), "Project 5 not found or access denied");
}

#[test]
fn invalid_policy_content_degrades_to_ignored() {
    let mut repo = seeded_repository();
    repo.insert(
        5,
        POLICY_MANIFEST_PATH,
        r"
pipeline_execution_policies:
  - name: broken
    content:
      include:
        - file: policies/broken.yml
  - name: secret-detection
    content:
      include:
        - file: policies/secrets.yml
",
    );
    repo.insert(5, "policies/broken.yml", "not-a-job: [1, 2\n");
    let policies =
        load_policies(&repo, &namespace_refs(), &AccessSettings::allow_all()).unwrap();
    assert_eq!(policies.len(), 1);
    assert_eq!(policies[0].document.name, "secret-detection");

    let project = CiConfig::from_yaml(PROJECT_CONFIG).unwrap();
    let pipeline = Composer::new(ComposeContext::new(1))
        .compose(Some(&project), &policies, &BTreeMap::new())
        .unwrap();
    assert!(pipeline.job_names().contains(&"build-job:policy-5-1"));
}
