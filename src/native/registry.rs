use std::{
    collections::HashMap,
    path::{Component, Path, PathBuf},
    sync::{Arc, Mutex, OnceLock, PoisonError},
};

use crate::Error;

/// Counts live instances per shared library path, enforcing
/// `canBeInstantiatedOnlyOncePerProcess`.
#[derive(Debug, Default)]
pub struct LibraryRegistry {
    counts: Mutex<HashMap<PathBuf, usize>>,
}

impl LibraryRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// The registry shared by every [`crate::Fmu`] that was not given its own.
    pub fn process() -> Arc<Self> {
        static PROCESS: OnceLock<Arc<LibraryRegistry>> = OnceLock::new();
        PROCESS.get_or_init(LibraryRegistry::new).clone()
    }

    /// Register a new instance of the library at `path`.
    ///
    /// Fails with [`Error::SingleInstanceViolation`] if `only_once` is set and another instance of
    /// the same library is still alive.
    pub fn acquire(self: &Arc<Self>, path: &Path, only_once: bool) -> Result<InstanceLease, Error> {
        let path = normalize(path);
        let mut counts = self.counts.lock().unwrap_or_else(PoisonError::into_inner);
        let count = counts.entry(path.clone()).or_default();
        if only_once && *count > 0 {
            return Err(Error::SingleInstanceViolation(path));
        }
        *count += 1;
        Ok(InstanceLease {
            registry: Arc::clone(self),
            path,
        })
    }

    /// Number of live instances of the library at `path`.
    pub fn instance_count(&self, path: &Path) -> usize {
        self.counts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&normalize(path))
            .copied()
            .unwrap_or(0)
    }

    fn release(&self, path: &Path) {
        let mut counts = self.counts.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(count) = counts.get_mut(path) {
            *count = count.saturating_sub(1);
            if *count == 0 {
                counts.remove(path);
            }
        }
    }
}

/// Registry key for `path`: the canonical path if it exists, otherwise the lexically cleaned
/// absolute path.
fn normalize(path: &Path) -> PathBuf {
    if let Ok(canonical) = std::fs::canonicalize(path) {
        return canonical;
    }
    let absolute = match std::env::current_dir() {
        Ok(cwd) if path.is_relative() => cwd.join(path),
        _ => path.to_path_buf(),
    };
    let mut cleaned = PathBuf::new();
    for component in absolute.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                cleaned.pop();
            }
            other => cleaned.push(other),
        }
    }
    cleaned
}

/// Keeps one instance registered until dropped.
#[derive(Debug)]
pub struct InstanceLease {
    registry: Arc<LibraryRegistry>,
    path: PathBuf,
}

impl Drop for InstanceLease {
    fn drop(&mut self) {
        self.registry.release(&self.path);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_once() {
        let registry = LibraryRegistry::new();
        let path = Path::new("/tmp/lib.so");

        let lease = registry.acquire(path, true).unwrap();
        assert_eq!(registry.instance_count(path), 1);
        assert!(matches!(
            registry.acquire(path, true),
            Err(Error::SingleInstanceViolation(_))
        ));

        drop(lease);
        assert_eq!(registry.instance_count(path), 0);
        let _lease = registry.acquire(path, true).unwrap();
    }

    #[test]
    fn test_path_spellings() {
        let registry = LibraryRegistry::new();
        let _lease = registry.acquire(Path::new("once.so"), true).unwrap();
        assert!(matches!(
            registry.acquire(Path::new("./once.so"), true),
            Err(Error::SingleInstanceViolation(_))
        ));
        assert!(matches!(
            registry.acquire(Path::new("sub/../once.so"), true),
            Err(Error::SingleInstanceViolation(_))
        ));
        let cwd = std::env::current_dir().unwrap();
        assert_eq!(registry.instance_count(&cwd.join("once.so")), 1);
    }

    #[cfg(unix)]
    #[test]
    fn test_symlinked_library() {
        let dir = tempfile::tempdir().unwrap();
        let library = dir.path().join("lib.so");
        let link = dir.path().join("link.so");
        std::fs::write(&library, b"").unwrap();
        std::os::unix::fs::symlink(&library, &link).unwrap();

        let registry = LibraryRegistry::new();
        let _lease = registry.acquire(&library, true).unwrap();
        assert!(matches!(
            registry.acquire(&link, true),
            Err(Error::SingleInstanceViolation(_))
        ));
    }

    #[test]
    fn test_multiple_instances() {
        let registry = LibraryRegistry::new();
        let path = Path::new("/tmp/lib.so");
        let a = registry.acquire(path, false).unwrap();
        let b = registry.acquire(path, false).unwrap();
        assert_eq!(registry.instance_count(path), 2);
        drop(a);
        drop(b);
        assert_eq!(registry.instance_count(path), 0);
    }
}
