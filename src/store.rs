//! Artifact store collaborator.
//!
//! Listing feeds resumability; upload publishes a finished artifact. The
//! filesystem implementation treats a directory as the bucket; artifact
//! names with slashes become nested directories.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

pub trait ArtifactStore: Send + Sync {
    /// Names of all artifacts already present.
    fn list(&self) -> std::io::Result<HashSet<String>>;
    /// Publish a finished local artifact under `name`.
    fn upload(&self, name: &str, local: &Path) -> std::io::Result<()>;
}

pub struct FsStore {
    root: PathBuf,
}

impl FsStore {
    pub fn new(root: &Path) -> Self {
        Self {
            root: root.to_path_buf(),
        }
    }
}

impl ArtifactStore for FsStore {
    fn list(&self) -> std::io::Result<HashSet<String>> {
        let mut names = HashSet::new();
        if !self.root.exists() {
            return Ok(names);
        }
        let mut stack = vec![self.root.clone()];
        while let Some(dir) = stack.pop() {
            for entry in std::fs::read_dir(&dir)? {
                let entry = entry?;
                let path = entry.path();
                if path.is_dir() {
                    stack.push(path);
                } else if let Ok(rel) = path.strip_prefix(&self.root) {
                    names.insert(rel.to_string_lossy().replace('\\', "/"));
                }
            }
        }
        Ok(names)
    }

    fn upload(&self, name: &str, local: &Path) -> std::io::Result<()> {
        let dest = self.root.join(name);
        if let Some(parent) = dest.parent() {
            std::fs::create_dir_all(parent)?;
        }
        // Stage under a temporary name and rename into place, so a torn
        // copy can never sit under the final name and read as complete.
        let mut tmp = dest.clone().into_os_string();
        tmp.push(".part");
        let tmp = PathBuf::from(tmp);
        std::fs::copy(local, &tmp)?;
        std::fs::rename(&tmp, &dest)?;
        Ok(())
    }
}

// ── Tests ──

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn upload_then_list_round_trips_nested_names() {
        let bucket = tempdir().unwrap();
        let staging = tempdir().unwrap();
        let store = FsStore::new(bucket.path());

        let local = staging.path().join("part1.parquet");
        std::fs::write(&local, b"bytes").unwrap();
        store
            .upload("enwiki/20170901/part1.parquet", &local)
            .unwrap();

        let names = store.list().unwrap();
        assert!(names.contains("enwiki/20170901/part1.parquet"));
        assert_eq!(names.len(), 1);
    }

    #[test]
    fn missing_bucket_lists_empty() {
        let dir = tempdir().unwrap();
        let store = FsStore::new(&dir.path().join("nope"));
        assert!(store.list().unwrap().is_empty());
    }

    #[test]
    fn upload_of_missing_local_file_fails_and_records_nothing() {
        let bucket = tempdir().unwrap();
        let store = FsStore::new(bucket.path());
        assert!(store
            .upload("x.parquet", Path::new("/no/such/file"))
            .is_err());
        assert!(store.list().unwrap().is_empty());
    }

    #[test]
    fn upload_leaves_no_staging_residue() {
        let bucket = tempdir().unwrap();
        let staging = tempdir().unwrap();
        let store = FsStore::new(bucket.path());

        let local = staging.path().join("part1.parquet");
        std::fs::write(&local, b"bytes").unwrap();
        store
            .upload("enwiki/20170901/part1.parquet", &local)
            .unwrap();

        let names = store.list().unwrap();
        assert!(names.contains("enwiki/20170901/part1.parquet"));
        assert!(!names.iter().any(|n| n.ends_with(".part")));
    }

    #[test]
    fn interrupted_copy_residue_is_not_a_completion_marker() {
        let bucket = tempdir().unwrap();
        let store = FsStore::new(bucket.path());

        let dir = bucket.path().join("enwiki/20170901");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("part1.parquet.part"), b"tru").unwrap();

        assert!(!store
            .list()
            .unwrap()
            .contains("enwiki/20170901/part1.parquet"));
    }
}
