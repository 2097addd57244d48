//! # pipeweld-core
//!
//! Deterministic composition of CI pipelines from a project's own
//! configuration and any number of *pipeline execution policies*:
//! namespace- or project-scoped configuration units that inject CI jobs
//! and stages into every pipeline run in their scope.
//!
//! The engine is a pure, synchronous computation. Given the same
//! project configuration, the same loaded policies, and the same
//! run-time variables, composition always produces a structurally
//! identical pipeline. The only external touchpoint is the
//! [`policy::loader::PolicyRepository`] trait, through which policy
//! manifests and their included CI content are read.
//!
//! ## Core Concepts
//!
//! - **Merge strategy**: `inject_policy` adds policy jobs alongside the
//!   project's; `override_project_ci` replaces the project's
//!   configuration entirely.
//! - **Reserved stages**: `.pipeline-policy-pre` and
//!   `.pipeline-policy-post` bracket every composed pipeline and accept
//!   policy jobs only.
//! - **Suffixing**: a policy job colliding with another source's job
//!   name is renamed `"<name>:policy-<project>-<index>"`, with `needs:`
//!   references rewritten scope-locally.
//! - **Applicability**: `apply_on_empty_pipeline` decides whether a
//!   policy still fires when the project side contributes nothing.
//!
//! ## Example
//!
//! ```rust
//! use std::collections::BTreeMap;
//!
//! use pipeweld_core::ci::CiConfig;
//! use pipeweld_core::compose::{ComposeContext, Composer};
//!
//! let project = CiConfig::from_yaml(
//!     r"
//! stages: [build, test]
//!
//! build-job:
//!   stage: build
//!   script: make
//! ",
//! )
//! .unwrap();
//!
//! let composer = Composer::new(ComposeContext::new(42));
//! let pipeline = composer
//!     .compose(Some(&project), &[], &BTreeMap::new())
//!     .unwrap();
//! assert_eq!(pipeline.stages, vec!["build"]);
//! assert_eq!(pipeline.job_names(), vec!["build-job"]);
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![forbid(unsafe_code)]

pub mod ci;
pub mod compose;
pub mod error;
pub mod policy;

pub use ci::CiConfig;
pub use compose::{
    ComposeContext, ComposedJob, ComposedPipeline, Composer, ConfigSource, JobOrigin,
};
pub use error::{ComposeError, FailureReason};
pub use policy::loader::{
    AccessSettings, InMemoryRepository, LoadError, PolicyConfigurationRef, PolicyRepository,
    load_policies,
};
pub use policy::{
    EmptyPipelinePolicy, LoadedPolicy, PolicyDocument, PolicyScope, PolicySource, Strategy,
    SuffixStrategy, VariablesOverride,
};

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::ci::CiConfig;
    pub use crate::compose::{ComposeContext, ComposedPipeline, Composer, ConfigSource};
    pub use crate::error::{ComposeError, FailureReason};
    pub use crate::policy::loader::{
        AccessSettings, InMemoryRepository, PolicyConfigurationRef, load_policies,
    };
    pub use crate::policy::{LoadedPolicy, PolicyScope, Strategy};
}
