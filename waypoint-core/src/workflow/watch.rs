//! Polling watcher for the workflow state file

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::path::{Path, PathBuf};

use crate::{Error, Result};

/// Detects changes to the state file by polling its content
///
/// The file is small and rewritten wholesale, so a content hash is used
/// rather than modification times, which can be too coarse to see two
/// writes within the same second.
#[derive(Debug)]
pub struct StateFileWatcher {
    path: PathBuf,
    /// `None` until the first poll; inner `None` while the file is absent
    last: Option<Option<u64>>,
}

impl StateFileWatcher {
    /// Create a watcher for a path
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            last: None,
        }
    }

    /// Watched path
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Poll the file, returning true if it changed since the last poll
    ///
    /// The first poll always reports a change so the initial state is
    /// observed.
    pub async fn poll(&mut self) -> Result<bool> {
        let current = match tokio::fs::read(&self.path).await {
            Ok(bytes) => {
                let mut hasher = DefaultHasher::new();
                bytes.hash(&mut hasher);
                Some(hasher.finish())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
            Err(e) => return Err(Error::Io(e)),
        };

        let changed = self.last != Some(current);
        self.last = Some(current);
        Ok(changed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_detects_create_modify_delete() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("state.yaml");
        let mut watcher = StateFileWatcher::new(&path);

        assert!(watcher.poll().await.unwrap(), "first poll reports a change");
        assert!(!watcher.poll().await.unwrap());

        std::fs::write(&path, "Phase: discussion\n").unwrap();
        assert!(watcher.poll().await.unwrap());
        assert!(!watcher.poll().await.unwrap());

        std::fs::write(&path, "Phase: planning\n").unwrap();
        assert!(watcher.poll().await.unwrap());

        std::fs::remove_file(&path).unwrap();
        assert!(watcher.poll().await.unwrap());
        assert!(!watcher.poll().await.unwrap());
    }
}
