//! The `pipeweld validate` subcommand.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Args, ValueEnum};
use pipeweld_core::ci::{CiConfig, ConfigOrigin};
use pipeweld_core::policy::PolicyManifest;

/// Arguments for `pipeweld validate`.
#[derive(Debug, Args)]
pub struct ValidateArgs {
    /// Kind of document to validate
    #[arg(long, value_enum, default_value_t = DocumentKind::Project)]
    pub kind: DocumentKind,

    /// Path to the document
    pub path: PathBuf,
}

/// The document kinds this tool can validate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum DocumentKind {
    /// A project's CI configuration file.
    Project,
    /// The CI content fragment included by a policy.
    PolicyContent,
    /// A policy manifest file.
    PolicyManifest,
}

impl DocumentKind {
    const fn describe(self) -> &'static str {
        match self {
            Self::Project => "project configuration",
            Self::PolicyContent => "policy content",
            Self::PolicyManifest => "policy manifest",
        }
    }
}

/// Runs the validate subcommand.
///
/// # Errors
///
/// Returns an error when the file cannot be read or the document fails
/// parsing or validation.
pub fn run(args: &ValidateArgs) -> Result<()> {
    let text = std::fs::read_to_string(&args.path)
        .with_context(|| format!("read {}", args.path.display()))?;
    match args.kind {
        DocumentKind::Project => {
            let config = CiConfig::from_yaml(&text)?;
            config.validate(ConfigOrigin::Project)?;
        }
        DocumentKind::PolicyContent => {
            let config = CiConfig::from_yaml(&text)?;
            config.validate(ConfigOrigin::PolicyContent)?;
        }
        DocumentKind::PolicyManifest => {
            let _: PolicyManifest = serde_yaml::from_str(&text)
                .with_context(|| format!("parse policy manifest {}", args.path.display()))?;
        }
    }
    println!("OK: {} is a valid {}", args.path.display(), args.kind.describe());
    Ok(())
}
