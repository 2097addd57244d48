//! Policy loading and repository access control.
//!
//! Loading is the only step of composition that touches external
//! content. It reads each policy manifest from its policy-management
//! project, resolves the manifest's `content.include` reference, and
//! returns fully parsed [`LoadedPolicy`] values for the composer.
//!
//! Failure handling follows two distinct rules:
//!
//! - A manifest or include file that cannot be **read** (missing, or the
//!   access gate denies the triggering user) is fatal and short-circuits
//!   composition. Silently omitting a policy would defeat its purpose.
//! - Content that reads fine but fails **schema validation** degrades to
//!   "policy ignored": the policy is skipped with a warning and the
//!   remaining valid sources are merged.

use tracing::warn;

use super::{
    LoadedPolicy, POLICY_MANIFEST_PATH, PolicyDocument, PolicyManifest, PolicyScope, PolicySource,
};
use crate::ci::{CiConfig, ConfigOrigin};

/// Read access to repository content of policy-management projects.
///
/// Implementations are expected to be cheap and synchronous; the engine
/// performs no retries or caching of its own.
pub trait PolicyRepository {
    /// Reads a file from a project's repository.
    ///
    /// Returns `Ok(None)` when the project or path does not exist.
    ///
    /// # Errors
    ///
    /// Returns [`RepositoryError`] for infrastructure failures, which
    /// are never treated as "file absent".
    fn read_file(&self, project_id: u64, path: &str) -> Result<Option<String>, RepositoryError>;
}

/// Infrastructure failure while reading repository content.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("repository read of {path} in project {project_id} failed: {reason}")]
pub struct RepositoryError {
    /// The project being read.
    pub project_id: u64,
    /// The path being read.
    pub path: String,
    /// What went wrong.
    pub reason: String,
}

/// In-memory repository, used by tests and small front ends.
#[derive(Debug, Clone, Default)]
pub struct InMemoryRepository {
    files: std::collections::BTreeMap<(u64, String), String>,
}

impl InMemoryRepository {
    /// Creates an empty repository.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a file to a project.
    pub fn insert(
        &mut self,
        project_id: u64,
        path: impl Into<String>,
        content: impl Into<String>,
    ) {
        self.files.insert((project_id, path.into()), content.into());
    }
}

impl PolicyRepository for InMemoryRepository {
    fn read_file(&self, project_id: u64, path: &str) -> Result<Option<String>, RepositoryError> {
        Ok(self.files.get(&(project_id, path.to_string())).cloned())
    }
}

/// The repository access gate, resolvable at three scopes.
///
/// The most specific configured scope wins: project over namespace over
/// instance. An unconfigured gate allows access.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AccessSettings {
    /// Instance-wide setting.
    pub instance: Option<bool>,
    /// Namespace-level setting.
    pub namespace: Option<bool>,
    /// Project-level setting.
    pub project: Option<bool>,
}

impl AccessSettings {
    /// Gate that allows access at every scope.
    #[must_use]
    pub const fn allow_all() -> Self {
        Self {
            instance: None,
            namespace: None,
            project: None,
        }
    }

    /// Resolves the effective setting, most specific scope first.
    #[must_use]
    pub const fn resolve(&self) -> bool {
        match (self.project, self.namespace, self.instance) {
            (Some(value), _, _) | (None, Some(value), _) | (None, None, Some(value)) => value,
            (None, None, None) => true,
        }
    }
}

/// A pointer to one policy-management project to load policies from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PolicyConfigurationRef {
    /// Scope this configuration is attached to.
    pub scope: PolicyScope,

    /// The policy-management project holding the manifest.
    pub policy_project_id: u64,
}

/// Errors from policy loading.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[non_exhaustive]
pub enum LoadError {
    /// The triggering user may not read a policy repository, or the
    /// referenced file does not exist.
    #[error("Project {project_id} not found or access denied")]
    AccessDenied {
        /// The unreadable project.
        project_id: u64,
    },

    /// Infrastructure failure reading repository content.
    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

/// Loads every policy reachable from the given configuration refs, in
/// application order.
///
/// Schema-invalid manifests and policy contents are skipped with a
/// warning; unreadable ones are fatal (see module docs).
///
/// # Errors
///
/// Returns [`LoadError`] when the access gate denies the run or a
/// manifest/include file cannot be read.
pub fn load_policies(
    repository: &dyn PolicyRepository,
    configurations: &[PolicyConfigurationRef],
    access: &AccessSettings,
) -> Result<Vec<LoadedPolicy>, LoadError> {
    let mut loaded = Vec::new();
    for configuration in configurations {
        let project_id = configuration.policy_project_id;
        if !access.resolve() {
            return Err(LoadError::AccessDenied { project_id });
        }
        let manifest_text = repository
            .read_file(project_id, POLICY_MANIFEST_PATH)?
            .ok_or(LoadError::AccessDenied { project_id })?;
        let manifest: PolicyManifest = match serde_yaml::from_str(&manifest_text) {
            Ok(manifest) => manifest,
            Err(err) => {
                warn!(
                    policy_project_id = project_id,
                    error = %err,
                    "policy manifest failed schema validation; ignoring its policies"
                );
                continue;
            }
        };
        for (index, entry) in manifest.pipeline_execution_policies.into_iter().enumerate() {
            let source = PolicySource {
                scope: configuration.scope,
                policy_project_id: project_id,
                index,
            };
            if entry.content.include.len() != 1 {
                warn!(
                    policy = %entry.name,
                    policy_project_id = project_id,
                    includes = entry.content.include.len(),
                    "policy content must have exactly one include; ignoring policy"
                );
                continue;
            }
            let include = &entry.content.include[0];
            let content_project = include.project_id.unwrap_or(project_id);
            let content_text = repository
                .read_file(content_project, &include.file)?
                .ok_or(LoadError::AccessDenied {
                    project_id: content_project,
                })?;
            let content = match parse_policy_content(&content_text) {
                Ok(content) => content,
                Err(reason) => {
                    warn!(
                        policy = %entry.name,
                        policy_project_id = project_id,
                        file = %include.file,
                        error = %reason,
                        "policy content failed schema validation; ignoring policy"
                    );
                    continue;
                }
            };
            loaded.push(LoadedPolicy {
                source,
                document: PolicyDocument {
                    name: entry.name,
                    strategy: entry.strategy,
                    suffix: entry.suffix,
                    variables_override: entry.variables_override,
                    apply_on_empty_pipeline: entry.apply_on_empty_pipeline,
                    content,
                },
            });
        }
    }
    Ok(loaded)
}

fn parse_policy_content(text: &str) -> Result<CiConfig, String> {
    let content = CiConfig::from_yaml(text).map_err(|err| err.to_string())?;
    content
        .validate(ConfigOrigin::PolicyContent)
        .map_err(|err| err.to_string())?;
    if !content.has_jobs() {
        return Err("policy content defines no jobs".to_string());
    }
    Ok(content)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::{EmptyPipelinePolicy, Strategy, SuffixStrategy};

    const MANIFEST: &str = r"
pipeline_execution_policies:
  - name: secret-detection
    strategy: inject_policy
    apply_on_empty_pipeline: if_no_config
    content:
      include:
        - file: policies/secrets.yml
  - name: enforce-scan
    suffix: never
    content:
      include:
        - project_id: 9
          file: shared/scan.yml
";

    const SECRETS_CONTENT: &str = r"
secret-scan:
  stage: test
  script: scan --secrets
";

    const SCAN_CONTENT: &str = r"
deep-scan:
  stage: .pipeline-policy-post
  script: scan --deep
";

    fn repository() -> InMemoryRepository {
        let mut repo = InMemoryRepository::new();
        repo.insert(5, POLICY_MANIFEST_PATH, MANIFEST);
        repo.insert(5, "policies/secrets.yml", SECRETS_CONTENT);
        repo.insert(9, "shared/scan.yml", SCAN_CONTENT);
        repo
    }

    fn refs() -> Vec<PolicyConfigurationRef> {
        vec![PolicyConfigurationRef {
            scope: PolicyScope::Namespace,
            policy_project_id: 5,
        }]
    }

    #[test]
    fn loads_policies_in_manifest_order() {
        let loaded =
            load_policies(&repository(), &refs(), &AccessSettings::allow_all()).unwrap();
        assert_eq!(loaded.len(), 2);

        let first = &loaded[0];
        assert_eq!(first.document.name, "secret-detection");
        assert_eq!(first.source.index, 0);
        assert_eq!(first.source.policy_project_id, 5);
        assert_eq!(
            first.document.apply_on_empty_pipeline,
            EmptyPipelinePolicy::IfNoConfig
        );
        assert!(first.document.content.jobs.contains_key("secret-scan"));

        let second = &loaded[1];
        assert_eq!(second.document.suffix, SuffixStrategy::Never);
        assert_eq!(second.source.index, 1);
        assert_eq!(second.document.strategy, Strategy::InjectPolicy);
        assert!(second.document.content.jobs.contains_key("deep-scan"));
    }

    #[test]
    fn denied_gate_is_fatal() {
        let access = AccessSettings {
            project: Some(false),
            ..AccessSettings::allow_all()
        };
        let err = load_policies(&repository(), &refs(), &access).unwrap_err();
        assert_eq!(err, LoadError::AccessDenied { project_id: 5 });
        assert_eq!(err.to_string(), "Project 5 not found or access denied");
    }

    #[test]
    fn most_specific_scope_wins() {
        let access = AccessSettings {
            instance: Some(false),
            namespace: Some(false),
            project: Some(true),
        };
        assert!(access.resolve());
        let access = AccessSettings {
            instance: Some(true),
            namespace: Some(false),
            project: None,
        };
        assert!(!access.resolve());
        assert!(AccessSettings::allow_all().resolve());
    }

    #[test]
    fn missing_manifest_is_fatal() {
        let repo = InMemoryRepository::new();
        let err = load_policies(&repo, &refs(), &AccessSettings::allow_all()).unwrap_err();
        assert_eq!(err, LoadError::AccessDenied { project_id: 5 });
    }

    #[test]
    fn missing_include_is_fatal() {
        let mut repo = repository();
        repo.files.remove(&(9, "shared/scan.yml".to_string()));
        let err = load_policies(&repo, &refs(), &AccessSettings::allow_all()).unwrap_err();
        assert_eq!(err, LoadError::AccessDenied { project_id: 9 });
    }

    #[test]
    fn invalid_content_is_ignored_not_fatal() {
        let mut repo = repository();
        repo.insert(5, "policies/secrets.yml", "secret-scan: [not, a, job]");
        let loaded = load_policies(&repo, &refs(), &AccessSettings::allow_all()).unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].document.name, "enforce-scan");
        // Manifest position is preserved even when a sibling is skipped.
        assert_eq!(loaded[0].source.index, 1);
    }

    #[test]
    fn invalid_manifest_is_ignored_not_fatal() {
        let mut repo = repository();
        repo.insert(5, POLICY_MANIFEST_PATH, "pipeline_execution_policies: 7");
        let loaded = load_policies(&repo, &refs(), &AccessSettings::allow_all()).unwrap();
        assert!(loaded.is_empty());
    }

    #[test]
    fn jobless_content_is_ignored() {
        let mut repo = repository();
        repo.insert(5, "policies/secrets.yml", "stages: [test]\n");
        let loaded = load_policies(&repo, &refs(), &AccessSettings::allow_all()).unwrap();
        assert_eq!(loaded.len(), 1);
    }
}
