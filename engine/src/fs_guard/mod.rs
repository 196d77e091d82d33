use sdk::errors::EngineError;
use std::path::{Component, Path, PathBuf};

/// Keeps file tool access inside the workspace and away from secrets.
///
/// Every path a task hands to `file_operations` goes through the guard:
/// 1. Deny list check on the raw path
/// 2. Canonicalization (of the path, or of its nearest existing ancestor
///    when the path is about to be created)
/// 3. Deny list check on the canonical path, which catches symlinks
/// 4. Workspace boundary check
#[derive(Debug)]
pub struct FileSystemGuard {
    workspace: PathBuf,
    deny_list: Vec<PathBuf>,
}

impl FileSystemGuard {
    /// Creates a guard rooted at `workspace`.
    ///
    /// # Errors
    ///
    /// `EngineError::PathCanonicalization` if the workspace does not exist or
    /// cannot be resolved.
    pub fn new(workspace: impl AsRef<Path>) -> Result<Self, EngineError> {
        let workspace = workspace.as_ref();
        let workspace = workspace
            .canonicalize()
            .map_err(|e| EngineError::PathCanonicalization(workspace.to_path_buf(), e.to_string()))?;

        let deny_list = [
            ".ssh",
            ".env",
            ".aws/credentials",
            ".config/gcloud",
            "id_rsa",
            "id_ed25519",
            ".gnupg",
            ".kube/config",
            "credentials",
            "private_key",
            ".npmrc",
            ".pypirc",
        ]
        .iter()
        .map(PathBuf::from)
        .collect();

        Ok(Self {
            workspace,
            deny_list,
        })
    }

    /// Resolve a task-supplied path for reading. The target must exist.
    ///
    /// Relative paths are taken relative to the workspace.
    pub fn validate_path(&self, path: &Path) -> Result<PathBuf, EngineError> {
        let path = self.absolute(path);

        if self.is_denied(&path) {
            return Err(EngineError::PathDenied(path));
        }

        let canonical = path
            .canonicalize()
            .map_err(|e| EngineError::PathCanonicalization(path.clone(), e.to_string()))?;

        self.check_canonical(canonical)
    }

    /// Resolve a path that may not exist yet, for writes and creates.
    ///
    /// The nearest existing ancestor is canonicalized and the missing tail is
    /// re-appended; `..` in the missing tail is rejected.
    pub fn validate_new_path(&self, path: &Path) -> Result<PathBuf, EngineError> {
        let path = self.absolute(path);

        if self.is_denied(&path) {
            return Err(EngineError::PathDenied(path));
        }

        let mut existing = path.as_path();
        let mut tail = Vec::new();
        while !existing.exists() {
            match (existing.parent(), existing.file_name()) {
                (Some(parent), Some(name)) => {
                    tail.push(name.to_os_string());
                    existing = parent;
                }
                _ => {
                    return Err(EngineError::PathCanonicalization(
                        path.clone(),
                        "no existing ancestor".to_string(),
                    ))
                }
            }
        }

        let mut canonical = existing
            .canonicalize()
            .map_err(|e| EngineError::PathCanonicalization(path.clone(), e.to_string()))?;
        for name in tail.into_iter().rev() {
            canonical.push(name);
        }

        if canonical
            .components()
            .any(|c| matches!(c, Component::ParentDir))
        {
            return Err(EngineError::PathOutsideWorkspace(canonical));
        }

        self.check_canonical(canonical)
    }

    pub fn workspace(&self) -> &Path {
        &self.workspace
    }

    pub fn deny_list(&self) -> &[PathBuf] {
        &self.deny_list
    }

    fn absolute(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.workspace.join(path)
        }
    }

    fn check_canonical(&self, canonical: PathBuf) -> Result<PathBuf, EngineError> {
        if self.is_denied(&canonical) {
            return Err(EngineError::PathDenied(canonical));
        }
        if !canonical.starts_with(&self.workspace) {
            return Err(EngineError::PathOutsideWorkspace(canonical));
        }
        Ok(canonical)
    }

    /// A path is denied when it ends with a deny entry or contains one as a
    /// single component.
    fn is_denied(&self, path: &Path) -> bool {
        self.deny_list.iter().any(|denied| {
            path.ends_with(denied)
                || path
                    .components()
                    .any(|c| c.as_os_str() == denied.as_os_str())
        })
    }
}
