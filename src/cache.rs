//! Upstream tarball cache and archive index cache (spec §3 "Caches", §5).
//!
//! The tarball cache is content-addressed by (project, version); entries
//! expire after a configured age unless pinned, and a cached tarball is
//! acceptable iff its header deserializes. Content addressing uses `sha2`.
//! Archive index cache entries carry ETag/Last-Modified/fetched_at/sha256
//! for TTL-based conditional refresh.

use std::fs::{self, File};
use std::io::Read;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use sha2::{Digest, Sha256};

use crate::error::{CoreError, FailureKind};

fn content_key(project: &str, version: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(project.as_bytes());
    hasher.update(b"\0");
    hasher.update(version.as_bytes());
    format!("{:x}", hasher.finalize())
}

pub struct TarballCache {
    root: PathBuf,
    max_age: Duration,
}

impl TarballCache {
    pub fn new(root: impl Into<PathBuf>, max_age: Duration) -> std::io::Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(TarballCache { root, max_age })
    }

    fn entry_dir(&self, project: &str, version: &str) -> PathBuf {
        self.root.join(content_key(project, version))
    }

    /// A cached tarball is acceptable iff its header deserializes as a
    /// gzip-compressed tar stream (spec §3 Caches, "Validation").
    fn header_is_valid(path: &Path) -> bool {
        let Ok(mut file) = File::open(path) else { return false };
        let mut header = [0u8; 2];
        if file.read_exact(&mut header).is_err() {
            return false;
        }
        header == [0x1f, 0x8b] // gzip magic
    }

    /// Returns the cached path if present, fresh (or pinned), and valid.
    pub fn lookup(&self, project: &str, version: &str, pinned: bool) -> Option<PathBuf> {
        let dir = self.entry_dir(project, version);
        let tarball_path = dir.join("upstream.tar.gz");
        if !tarball_path.exists() {
            return None;
        }
        if !Self::header_is_valid(&tarball_path) {
            return None;
        }
        if !pinned {
            let modified = fs::metadata(&tarball_path).ok()?.modified().ok()?;
            if SystemTime::now().duration_since(modified).unwrap_or(Duration::ZERO) > self.max_age {
                return None;
            }
        }
        Some(tarball_path)
    }

    /// Store `bytes` atomically (write to temp, rename) so readers never
    /// observe a partial entry.
    pub fn store(&self, project: &str, version: &str, bytes: &[u8]) -> Result<PathBuf, CoreError> {
        let dir = self.entry_dir(project, version);
        fs::create_dir_all(&dir)
            .map_err(|e| CoreError::new(FailureKind::FetchFailed, format!("creating cache dir: {e}")))?;
        let final_path = dir.join("upstream.tar.gz");
        let tmp_path = dir.join("upstream.tar.gz.tmp");
        fs::write(&tmp_path, bytes)
            .map_err(|e| CoreError::new(FailureKind::FetchFailed, format!("writing cache entry: {e}")))?;
        fs::rename(&tmp_path, &final_path)
            .map_err(|e| CoreError::new(FailureKind::FetchFailed, format!("committing cache entry: {e}")))?;
        Ok(final_path)
    }
}

/// Archive index cache entry metadata (spec §3).
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct ArchiveIndexCacheEntry {
    pub series: String,
    pub pocket: String,
    pub component: String,
    pub architecture: String,
    pub etag: Option<String>,
    pub last_modified: Option<String>,
    pub fetched_at: chrono::DateTime<chrono::Utc>,
    pub sha256: String,
    pub byte_size: u64,
}

impl ArchiveIndexCacheEntry {
    pub fn key(&self) -> (String, String, String, String) {
        (self.series.clone(), self.pocket.clone(), self.component.clone(), self.architecture.clone())
    }

    /// Whether this entry is due for a conditional-refresh check under the
    /// given TTL.
    pub fn is_stale(&self, ttl: Duration) -> bool {
        let elapsed = chrono::Utc::now().signed_duration_since(self.fetched_at);
        match elapsed.to_std() {
            Ok(elapsed) => elapsed > ttl,
            Err(_) => false, // fetched_at is in the future; treat as fresh
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_then_lookup_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let cache = TarballCache::new(dir.path(), Duration::from_secs(3600)).unwrap();
        let mut gzip_bytes = vec![0x1f, 0x8b];
        gzip_bytes.extend_from_slice(b"fake-rest-of-tarball");
        cache.store("nova", "29.0.0", &gzip_bytes).unwrap();

        let found = cache.lookup("nova", "29.0.0", false);
        assert!(found.is_some());
    }

    #[test]
    fn invalid_header_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let cache = TarballCache::new(dir.path(), Duration::from_secs(3600)).unwrap();
        cache.store("nova", "29.0.0", b"not a gzip file at all").unwrap();
        assert!(cache.lookup("nova", "29.0.0", false).is_none());
    }

    #[test]
    fn expired_entry_rejected_unless_pinned() {
        let dir = tempfile::tempdir().unwrap();
        let cache = TarballCache::new(dir.path(), Duration::from_secs(0)).unwrap();
        let mut gzip_bytes = vec![0x1f, 0x8b];
        gzip_bytes.extend_from_slice(b"fake");
        cache.store("nova", "29.0.0", &gzip_bytes).unwrap();
        std::thread::sleep(Duration::from_millis(10));

        assert!(cache.lookup("nova", "29.0.0", false).is_none());
        assert!(cache.lookup("nova", "29.0.0", true).is_some());
    }

    #[test]
    fn archive_cache_entry_staleness() {
        let entry = ArchiveIndexCacheEntry {
            series: "2024.1".to_string(),
            pocket: "release".to_string(),
            component: "main".to_string(),
            architecture: "amd64".to_string(),
            etag: None,
            last_modified: None,
            fetched_at: chrono::Utc::now() - chrono::Duration::hours(2),
            sha256: "deadbeef".to_string(),
            byte_size: 1024,
        };
        assert!(entry.is_stale(Duration::from_secs(3600)));
        assert!(!entry.is_stale(Duration::from_secs(3600 * 4)));
    }
}
