//! Per-workspace, per-scope directory allocator for intermediate files.

use std::path::{Path, PathBuf};

use uuid::Uuid;

use crate::environment::Environment;

/// Root directory + `get_location(environment, scope)` allocator.
/// Creates subdirectories on demand; writes a `.gitignore` containing
/// `*` at root creation so cache contents never leak into source
/// control.
#[derive(Debug, Clone)]
pub struct Cache {
    root: PathBuf,
}

impl Cache {
    pub fn new(root: impl Into<PathBuf>) -> std::io::Result<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root)?;
        let gitignore = root.join(".gitignore");
        if !gitignore.exists() {
            std::fs::write(&gitignore, "*\n")?;
        }
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn subtree_for(&self, environment: &Environment, scope: &str) -> PathBuf {
        let name = Uuid::new_v5(&environment.workspace_id, scope.as_bytes());
        self.root.join(name.to_string())
    }

    /// Returns `<root>/uuid5(workspace_id, scope)`, creating it on demand.
    pub fn get_location(&self, environment: &Environment, scope: &str) -> std::io::Result<PathBuf> {
        let path = self.subtree_for(environment, scope);
        std::fs::create_dir_all(&path)?;
        Ok(path)
    }

    /// Removes the subtree for `(environment, scope)`.
    pub fn clear_scope(&self, environment: &Environment, scope: &str) -> std::io::Result<()> {
        let path = self.subtree_for(environment, scope);
        if path.exists() {
            std::fs::remove_dir_all(path)?;
        }
        Ok(())
    }

    /// Removes every subtree, preserving the root (and its `.gitignore`).
    pub fn clear_all(&self) -> std::io::Result<()> {
        for entry in std::fs::read_dir(&self.root)? {
            let entry = entry?;
            if entry.file_name() == ".gitignore" {
                continue;
            }
            if entry.file_type()?.is_dir() {
                std::fs::remove_dir_all(entry.path())?;
            } else {
                std::fs::remove_file(entry.path())?;
            }
        }
        Ok(())
    }

    /// A fresh subdirectory under the cache root, removed when the
    /// returned guard is dropped.
    pub fn temporary_location(&self) -> std::io::Result<tempfile::TempDir> {
        tempfile::Builder::new().prefix(".tmp-").tempdir_in(&self.root)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn env() -> Environment {
        Environment::new("https://hub.example.com", Uuid::new_v4(), Uuid::new_v4())
    }

    #[test]
    fn get_location_is_stable_for_the_same_scope() {
        let dir = tempfile::tempdir().unwrap();
        let cache = Cache::new(dir.path()).unwrap();
        let environment = env();
        let a = cache.get_location(&environment, "objects").unwrap();
        let b = cache.get_location(&environment, "objects").unwrap();
        assert_eq!(a, b);
        assert!(a.exists());
    }

    #[test]
    fn different_scopes_get_different_directories() {
        let dir = tempfile::tempdir().unwrap();
        let cache = Cache::new(dir.path()).unwrap();
        let environment = env();
        let a = cache.get_location(&environment, "objects").unwrap();
        let b = cache.get_location(&environment, "blocksync").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn root_creation_writes_gitignore() {
        let dir = tempfile::tempdir().unwrap();
        let cache = Cache::new(dir.path()).unwrap();
        let contents = std::fs::read_to_string(cache.root().join(".gitignore")).unwrap();
        assert_eq!(contents, "*\n");
    }

    #[test]
    fn clear_all_preserves_root() {
        let dir = tempfile::tempdir().unwrap();
        let cache = Cache::new(dir.path()).unwrap();
        let environment = env();
        let location = cache.get_location(&environment, "objects").unwrap();
        assert!(location.exists());
        cache.clear_all().unwrap();
        assert!(!location.exists());
        assert!(cache.root().exists());
        assert!(cache.root().join(".gitignore").exists());
    }
}
