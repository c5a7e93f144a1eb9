//! Per-session working directories.
//!
//! Each session id maps to exactly one directory, `{root}/{id}`. Ids are
//! validated on construction, so they are always a single safe path segment.

use codecast_proto::SessionId;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info, warn};

/// Errors from workspace operations.
#[derive(Debug, Error)]
pub enum WorkspaceError {
    #[error("failed to create {path}: {source}")]
    Create {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Root directory holding one working directory per session.
#[derive(Debug, Clone)]
pub struct Workspace {
    root: PathBuf,
}

impl Workspace {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory for `id`. Does not touch the filesystem.
    pub fn dir_for(&self, id: &SessionId) -> PathBuf {
        self.root.join(id.as_str())
    }

    pub fn exists(&self, id: &SessionId) -> bool {
        self.dir_for(id).is_dir()
    }

    /// Creates the directory for `id` if it is missing. Idempotent.
    pub async fn ensure(&self, id: &SessionId) -> Result<PathBuf, WorkspaceError> {
        let dir = self.dir_for(id);
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|source| WorkspaceError::Create {
                path: dir.clone(),
                source,
            })?;
        debug!(session = %id, dir = %dir.display(), "Session directory ready");
        Ok(dir)
    }

    /// Writes `contents` to `file_name` inside the session directory.
    pub async fn write_file(
        &self,
        id: &SessionId,
        file_name: &str,
        contents: &str,
    ) -> Result<PathBuf, WorkspaceError> {
        let dir = self.ensure(id).await?;
        let path = dir.join(file_name);
        tokio::fs::write(&path, contents)
            .await
            .map_err(|source| WorkspaceError::Write {
                path: path.clone(),
                source,
            })?;
        Ok(path)
    }

    /// Recursively removes the directory for `id`.
    ///
    /// Best effort: failures are logged and not retried. Returns true if the
    /// directory is gone afterwards.
    pub async fn remove(&self, id: &SessionId) -> bool {
        let dir = self.dir_for(id);
        match tokio::fs::remove_dir_all(&dir).await {
            Ok(()) => {
                info!(session = %id, dir = %dir.display(), "Removed session directory");
                true
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => true,
            Err(e) => {
                warn!(session = %id, dir = %dir.display(), error = %e, "Failed to remove session directory");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn sid(s: &str) -> SessionId {
        SessionId::parse(s).unwrap()
    }

    #[tokio::test]
    async fn test_ensure_is_idempotent() {
        let temp = TempDir::new().unwrap();
        let workspace = Workspace::new(temp.path().join("root"));

        let first = workspace.ensure(&sid("s1")).await.unwrap();
        std::fs::write(first.join("keep.txt"), "x").unwrap();
        let second = workspace.ensure(&sid("s1")).await.unwrap();

        assert_eq!(first, second);
        assert!(second.join("keep.txt").exists());
    }

    #[tokio::test]
    async fn test_write_file_creates_directory() {
        let temp = TempDir::new().unwrap();
        let workspace = Workspace::new(temp.path());
        let path = workspace
            .write_file(&sid("s2"), "main.py", "print(1)")
            .await
            .unwrap();
        assert_eq!(path, temp.path().join("s2/main.py"));
        assert_eq!(std::fs::read_to_string(path).unwrap(), "print(1)");
    }

    #[tokio::test]
    async fn test_remove_is_recursive_and_tolerates_missing() {
        let temp = TempDir::new().unwrap();
        let workspace = Workspace::new(temp.path());
        let dir = workspace.ensure(&sid("s3")).await.unwrap();
        std::fs::create_dir_all(dir.join("nested/deeper")).unwrap();
        std::fs::write(dir.join("nested/deeper/f"), "x").unwrap();

        assert!(workspace.remove(&sid("s3")).await);
        assert!(!workspace.exists(&sid("s3")));
        assert!(workspace.remove(&sid("s3")).await);
    }
}
