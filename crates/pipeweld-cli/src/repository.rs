//! Filesystem-backed policy repository.
//!
//! Policy-management projects are laid out under a root directory, one
//! subdirectory per project id:
//!
//! ```text
//! <root>/5/.pipeline-policies/policy.yml
//! <root>/5/policies/scan.yml
//! <root>/9/shared/scan.yml
//! ```

use std::path::PathBuf;

use pipeweld_core::policy::loader::{PolicyRepository, RepositoryError};

/// Reads policy content from `<root>/<project_id>/<path>`.
#[derive(Debug, Clone)]
pub struct FileRepository {
    root: PathBuf,
}

impl FileRepository {
    /// Creates a repository rooted at `root`.
    #[must_use]
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }
}

impl PolicyRepository for FileRepository {
    fn read_file(&self, project_id: u64, path: &str) -> Result<Option<String>, RepositoryError> {
        let full = self.root.join(project_id.to_string()).join(path);
        match std::fs::read_to_string(&full) {
            Ok(content) => Ok(Some(content)),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(RepositoryError {
                project_id,
                path: path.to_string(),
                reason: err.to_string(),
            }),
        }
    }
}
