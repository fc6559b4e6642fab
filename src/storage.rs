//! File storage for report exports.
//!
//! Execution rows store paths relative to the storage root so the root can
//! move (or become a bucket) without rewriting history.

use std::io;
use std::path::{Path, PathBuf};

/// Minimal file-storage surface the report engine needs.
pub trait Storage {
    fn put(&self, relative_path: &str, contents: &[u8]) -> io::Result<()>;
    fn exists(&self, relative_path: &str) -> bool;
    fn delete(&self, relative_path: &str) -> io::Result<()>;
}

/// Local-disk storage rooted at the configured export directory.
pub struct LocalStorage {
    root: PathBuf,
}

impl LocalStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, relative_path: &str) -> PathBuf {
        self.root.join(relative_path)
    }
}

impl Storage for LocalStorage {
    fn put(&self, relative_path: &str, contents: &[u8]) -> io::Result<()> {
        let path = self.resolve(relative_path);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, contents)
    }

    fn exists(&self, relative_path: &str) -> bool {
        self.resolve(relative_path).exists()
    }

    fn delete(&self, relative_path: &str) -> io::Result<()> {
        std::fs::remove_file(self.resolve(relative_path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_put_exists_delete() {
        let dir = tempfile::tempdir().unwrap();
        let storage = LocalStorage::new(dir.path());

        assert!(!storage.exists("report_1.csv"));
        storage.put("report_1.csv", b"a,b\n1,2\n").unwrap();
        assert!(storage.exists("report_1.csv"));
        assert_eq!(
            std::fs::read_to_string(dir.path().join("report_1.csv")).unwrap(),
            "a,b\n1,2\n"
        );

        storage.delete("report_1.csv").unwrap();
        assert!(!storage.exists("report_1.csv"));
    }

    #[test]
    fn test_put_creates_parent_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let storage = LocalStorage::new(dir.path().join("exports"));
        storage.put("2026/report_2.json", b"[]").unwrap();
        assert!(storage.exists("2026/report_2.json"));
    }

    #[test]
    fn test_delete_missing_file_errors() {
        let dir = tempfile::tempdir().unwrap();
        let storage = LocalStorage::new(dir.path());
        assert!(storage.delete("never_written.csv").is_err());
    }
}
