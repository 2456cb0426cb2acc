//! Upload directory bookkeeping.
//!
//! The upload directory is flat: one file per accepted upload, keyed by file
//! name, so uploading a name that already exists replaces the old file.
//! Files are first copied to a hidden `.staging-*` name and only renamed
//! into place once the index write for them succeeds.

use std::io;
use std::path::{Path, PathBuf};

use tracing::warn;
use uuid::Uuid;
use walkdir::WalkDir;

use crate::models::{display_extension, StorageUsage, StoredFile};

const STAGING_PREFIX: &str = ".staging-";

pub struct UploadStore {
    dir: PathBuf,
}

/// A copy of an upload waiting to be committed into the upload directory.
#[derive(Debug)]
pub struct StagedUpload {
    staging: Option<PathBuf>,
    destination: PathBuf,
}

impl StagedUpload {
    /// Path the upload will have once committed.
    pub fn destination(&self) -> &Path {
        &self.destination
    }

    /// Move the staged copy into place, replacing any file with the same name.
    pub fn commit(self) -> io::Result<PathBuf> {
        if let Some(staging) = &self.staging {
            std::fs::rename(staging, &self.destination)?;
        }
        Ok(self.destination)
    }

    pub fn discard(self) {
        if let Some(staging) = &self.staging {
            if let Err(e) = std::fs::remove_file(staging) {
                warn!(path = %staging.display(), error = %e, "failed to remove staged upload");
            }
        }
    }
}

impl UploadStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn ensure_dir(&self) -> io::Result<()> {
        std::fs::create_dir_all(&self.dir)
    }

    /// Files directly in the upload directory, sorted by name. Staging
    /// leftovers are ignored and a missing directory is empty.
    pub fn list(&self) -> io::Result<Vec<StoredFile>> {
        if !self.dir.exists() {
            return Ok(Vec::new());
        }
        if !self.dir.is_dir() {
            return Err(io::Error::other(format!(
                "upload path {} is not a directory",
                self.dir.display()
            )));
        }

        let mut files = Vec::new();
        for entry in WalkDir::new(&self.dir).min_depth(1).max_depth(1) {
            let entry = entry.map_err(io::Error::from)?;
            if !entry.file_type().is_file() {
                continue;
            }
            let file_name = entry.file_name().to_string_lossy().to_string();
            if file_name.starts_with(STAGING_PREFIX) {
                continue;
            }
            let byte_size = entry.metadata().map_err(io::Error::from)?.len();
            files.push(StoredFile {
                extension: display_extension(&file_name),
                file_name,
                path: entry.path().to_path_buf(),
                byte_size,
            });
        }
        files.sort_by(|a, b| a.file_name.cmp(&b.file_name));
        Ok(files)
    }

    pub fn usage(&self) -> io::Result<StorageUsage> {
        let files = self.list()?;
        Ok(StorageUsage {
            total_bytes: files.iter().map(|f| f.byte_size).sum(),
            file_count: files.len(),
        })
    }

    /// Copy `source` next to its final location under `file_name`.
    pub fn stage(&self, source: &Path, file_name: &str) -> io::Result<StagedUpload> {
        self.ensure_dir()?;
        let destination = self.dir.join(file_name);

        if is_same_file(source, &destination) {
            return Ok(StagedUpload {
                staging: None,
                destination,
            });
        }

        let staging = self
            .dir
            .join(format!("{}{}-{}", STAGING_PREFIX, Uuid::new_v4(), file_name));
        if let Err(e) = std::fs::copy(source, &staging) {
            let _ = std::fs::remove_file(&staging);
            return Err(e);
        }
        Ok(StagedUpload {
            staging: Some(staging),
            destination,
        })
    }

    /// Delete `file_name` from the upload directory. Returns whether it existed.
    /// Only the final path component is used.
    pub fn remove(&self, file_name: &str) -> io::Result<bool> {
        let Some(name) = Path::new(file_name).file_name() else {
            return Ok(false);
        };
        let path = self.dir.join(name);
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e),
        }
    }
}

fn is_same_file(a: &Path, b: &Path) -> bool {
    match (a.canonicalize(), b.canonicalize()) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn missing_dir_has_no_usage() {
        let tmp = TempDir::new().unwrap();
        let store = UploadStore::new(tmp.path().join("nope"));
        assert_eq!(store.usage().unwrap(), StorageUsage::default());
    }

    #[test]
    fn usage_counts_top_level_files_only() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(tmp.path().join("a.txt"), vec![b'a'; 100]).unwrap();
        std::fs::write(tmp.path().join("b.pdf"), vec![b'b'; 50]).unwrap();
        std::fs::write(tmp.path().join(".staging-x-c.txt"), vec![b'c'; 10]).unwrap();
        std::fs::create_dir(tmp.path().join("sub")).unwrap();
        std::fs::write(tmp.path().join("sub").join("d.txt"), vec![b'd'; 10]).unwrap();

        let store = UploadStore::new(tmp.path());
        let usage = store.usage().unwrap();
        assert_eq!(usage.total_bytes, 150);
        assert_eq!(usage.file_count, 2);

        let names: Vec<String> = store.list().unwrap().into_iter().map(|f| f.file_name).collect();
        assert_eq!(names, ["a.txt", "b.pdf"]);
    }

    #[test]
    fn stage_commit_replaces_same_name() {
        let tmp = TempDir::new().unwrap();
        let uploads = UploadStore::new(tmp.path().join("uploads"));
        let src = tmp.path().join("incoming.txt");

        std::fs::write(&src, "first").unwrap();
        uploads.stage(&src, "notes.txt").unwrap().commit().unwrap();
        std::fs::write(&src, "second").unwrap();
        let path = uploads.stage(&src, "notes.txt").unwrap().commit().unwrap();

        assert_eq!(std::fs::read_to_string(path).unwrap(), "second");
        assert_eq!(uploads.usage().unwrap().file_count, 1);
    }

    #[test]
    fn discard_leaves_nothing_behind() {
        let tmp = TempDir::new().unwrap();
        let uploads = UploadStore::new(tmp.path().join("uploads"));
        let src = tmp.path().join("incoming.txt");
        std::fs::write(&src, "data").unwrap();

        uploads.stage(&src, "notes.txt").unwrap().discard();
        let leftovers = std::fs::read_dir(uploads.dir()).unwrap().count();
        assert_eq!(leftovers, 0);
    }

    #[test]
    fn staging_a_file_already_in_place_is_a_no_op() {
        let tmp = TempDir::new().unwrap();
        let uploads = UploadStore::new(tmp.path());
        let existing = tmp.path().join("notes.txt");
        std::fs::write(&existing, "data").unwrap();

        let staged = uploads.stage(&existing, "notes.txt").unwrap();
        assert_eq!(staged.commit().unwrap(), existing);
        assert_eq!(std::fs::read_to_string(&existing).unwrap(), "data");
    }

    #[test]
    fn upload_path_that_is_a_file_is_an_error() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("uploads");
        std::fs::write(&path, "not a dir").unwrap();
        assert!(UploadStore::new(path).usage().is_err());
    }

    #[test]
    fn remove_reports_missing() {
        let tmp = TempDir::new().unwrap();
        let uploads = UploadStore::new(tmp.path());
        std::fs::write(tmp.path().join("a.txt"), "x").unwrap();
        assert!(uploads.remove("a.txt").unwrap());
        assert!(!uploads.remove("a.txt").unwrap());
    }
}
