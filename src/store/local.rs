use std::fs;
use std::path::{Component, Path, PathBuf};

use bytes::Bytes;

use super::{ObjectStore, StoreError};

/// A directory tree standing in for an object store: `<root>/<bucket>/<name>`.
/// Object names use `/` separators regardless of platform.
#[derive(Debug, Clone)]
pub struct LocalStore {
    root: PathBuf,
}

impl LocalStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        LocalStore { root: root.into() }
    }

    fn bucket_dir(&self, bucket: &str) -> Result<PathBuf, StoreError> {
        let dir = self.root.join(checked_relative(bucket)?);
        if !dir.is_dir() {
            return Err(StoreError::BucketNotFound(bucket.to_string()));
        }
        Ok(dir)
    }
}

/// Reject names that would escape the bucket directory.
fn checked_relative(name: &str) -> Result<PathBuf, StoreError> {
    let path = Path::new(name);
    let clean = !name.is_empty()
        && path
            .components()
            .all(|c| matches!(c, Component::Normal(_)));
    if clean {
        Ok(path.to_path_buf())
    } else {
        Err(StoreError::InvalidName(name.to_string()))
    }
}

fn walk(dir: &Path, prefix: &str, out: &mut Vec<String>) -> Result<(), StoreError> {
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().into_owned();
        let key = if prefix.is_empty() {
            name
        } else {
            format!("{prefix}/{name}")
        };
        if entry.file_type()?.is_dir() {
            walk(&entry.path(), &key, out)?;
        } else {
            out.push(key);
        }
    }
    Ok(())
}

impl ObjectStore for LocalStore {
    fn list_objects(&self, bucket: &str) -> Result<Vec<String>, StoreError> {
        let dir = self.bucket_dir(bucket)?;
        let mut names = Vec::new();
        walk(&dir, "", &mut names)?;
        names.sort();
        Ok(names)
    }

    fn get_object(&self, bucket: &str, name: &str) -> Result<Bytes, StoreError> {
        let path = self.bucket_dir(bucket)?.join(checked_relative(name)?);
        match fs::read(&path) {
            Ok(content) => Ok(Bytes::from(content)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(StoreError::NotFound(name.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }
}
