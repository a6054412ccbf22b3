//! Local artifact pool (spec §3 "Artifact pool", §4.9 phase 9, §5, §6).
//! On-disk directory tree mirroring the archive layout the in-chroot
//! builder consumes. Writes are atomic per artifact (temp+rename);
//! indexing is serialized by a filesystem lock, generalizing the
//! `fcntl.flock` locking in original_source's gitfetch.py via `fd-lock`.

use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use fd_lock::RwLock as FileRwLock;

use crate::collaborators::RepositoryIndexer;
use crate::error::{CoreError, FailureKind};

pub struct ArtifactPool {
    root: PathBuf,
}

impl ArtifactPool {
    pub fn new(root: impl Into<PathBuf>) -> std::io::Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(ArtifactPool { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Publish one artifact by copying `source` into the pool under
    /// `relative_name`, atomically (temp file + rename). Returns the final
    /// path. At-most-once per (package, version) is the caller's
    /// responsibility (spec P10) via `published_marker` below.
    pub fn publish_artifact(&self, source: &Path, relative_name: &str) -> Result<PathBuf, CoreError> {
        let final_path = self.root.join(relative_name);
        if let Some(parent) = final_path.parent() {
            fs::create_dir_all(parent)
                .map_err(|e| CoreError::new(FailureKind::BuildFailed, format!("creating pool directory: {e}")))?;
        }
        let tmp_path = final_path.with_extension("tmp-upload");
        fs::copy(source, &tmp_path)
            .map_err(|e| CoreError::new(FailureKind::BuildFailed, format!("staging artifact: {e}")))?;
        fs::rename(&tmp_path, &final_path)
            .map_err(|e| CoreError::new(FailureKind::BuildFailed, format!("publishing artifact: {e}")))?;
        Ok(final_path)
    }

    /// At-most-once publish marker for (package, version): creates a marker
    /// file exclusively, returning `false` if it already existed (spec P10).
    pub fn claim_publish(&self, package: &str, version: &str) -> Result<bool, CoreError> {
        let markers_dir = self.root.join(".published");
        fs::create_dir_all(&markers_dir)
            .map_err(|e| CoreError::new(FailureKind::BuildFailed, format!("creating marker directory: {e}")))?;
        let marker_path = markers_dir.join(format!("{package}_{version}"));
        match fs::OpenOptions::new().write(true).create_new(true).open(&marker_path) {
            Ok(_) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => Ok(false),
            Err(e) => Err(CoreError::new(FailureKind::BuildFailed, format!("claiming publish marker: {e}"))),
        }
    }

    /// Re-index the pool under an exclusive filesystem lock, then delegate
    /// to the injected `RepositoryIndexer`. Readers never see a partial
    /// index: the lock is released only after `indexer.reindex` returns.
    pub fn reindex(&self, indexer: &dyn RepositoryIndexer) -> Result<(), CoreError> {
        let lock_path = self.root.join(".pool.lock");
        let lock_file = File::create(&lock_path)
            .map_err(|e| CoreError::new(FailureKind::BuildFailed, format!("opening pool lock file: {e}")))?;
        let mut lock = FileRwLock::new(lock_file);
        let mut guard = lock.write().map_err(|e| {
            CoreError::new(FailureKind::BuildFailed, format!("acquiring exclusive pool lock: {e}"))
        })?;
        guard.write_all(b"").ok();
        indexer.reindex(&self.root)
    }
}
