//! External-collaborator trait boundary (spec §1, §6, SPEC_FULL §1(f)/§6).
//! Narrow traits for the systems explicitly out of scope. Offline/default
//! implementations exist so the core is independently testable without
//! real network, chroot, or VCS access; production wiring is left to the
//! CLI.

use std::cmp::Ordering;
use std::path::{Path, PathBuf};

use crate::error::CoreError;
use crate::version::VersionString;

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignatureOutcome {
    Valid,
    Missing,
    Invalid,
    NotRequested,
}

/// The in-chroot binary builder (spec §6): a black-box process consuming a
/// source artifact and a bind-mounted artifact pool.
pub trait InChrootBuilder: Send + Sync {
    fn build(
        &self,
        source_artifact: &Path,
        series: &str,
        pool_mount: &Path,
    ) -> Result<Vec<PathBuf>, CoreError>;
}

/// Upstream tarball acquisition (spec §1): content-addressed cache lookup
/// plus a fetch fallback returning a local path and signature outcome.
pub trait TarballFetcher: Send + Sync {
    fn fetch(&self, project: &str, version: &str) -> Result<(PathBuf, SignatureOutcome), CoreError>;
}

/// Version comparison (spec §1, §4.1): re-exported here for discoverability
/// alongside the other four collaborators; the authoritative definition
/// lives in `version.rs`.
pub use crate::version::VersionComparator;

/// Repository indexing (spec §1): the local pool signer/indexer invoked on
/// demand after a publish.
pub trait RepositoryIndexer: Send + Sync {
    fn reindex(&self, pool_root: &Path) -> Result<(), CoreError>;
}

/// Debian patch-queue application (spec §4.9 phase 4): a black-box
/// patch-queue tool (e.g. `gbp pq`) that applies `debian/patches` on top of
/// the fetched upstream tree. `output` carries the combined stdout/stderr
/// for the pipeline to classify into a `PatchFailureKind`.
pub struct PatchQueueOutcome {
    pub success: bool,
    pub output: String,
}

pub trait PatchApplier: Send + Sync {
    fn apply_patch_queue(&self, repo_path: &Path) -> Result<PatchQueueOutcome, CoreError>;
    /// Regenerate `debian/patches` from the patch-queue branch after an
    /// offset/fuzz-only failure, before a single retry of `apply_patch_queue`.
    fn refresh_patch_queue(&self, repo_path: &Path) -> Result<(), CoreError>;
}

/// Native source-package construction (spec §4.9 phase 7): produces the
/// `.dsc` consumed by `InChrootBuilder::build`.
pub trait SourceBuilder: Send + Sync {
    fn build_source(&self, repo_path: &Path, series: &str) -> Result<PathBuf, CoreError>;
}

/// Archive-index parsing of the *raw* apt wire format (spec §1). The
/// in-core parser in `archive.rs` handles the lightweight, already-
/// decompressed case; this trait exists only for a production wiring that
/// wants to shell out to a native apt_pkg-backed fetch+decompress step
/// before handing bytes to `ArchiveIndex::load_compressed`.
pub trait ArchiveFetcher: Send + Sync {
    fn fetch_compressed(&self, series: &str, pocket: &str, component: &str) -> Result<Vec<u8>, CoreError>;
}

/// Offline default: every fetch fails with `CoreError`. Good enough for
/// unit tests that never reach the network suspension points.
#[derive(Debug, Default, Clone, Copy)]
pub struct OfflineOnly;

impl InChrootBuilder for OfflineOnly {
    fn build(&self, _: &Path, _: &str, _: &Path) -> Result<Vec<PathBuf>, CoreError> {
        Err(CoreError::new(crate::error::FailureKind::ToolMissing, "no in-chroot builder configured"))
    }
}

impl TarballFetcher for OfflineOnly {
    fn fetch(&self, _: &str, _: &str) -> Result<(PathBuf, SignatureOutcome), CoreError> {
        Err(CoreError::new(crate::error::FailureKind::FetchFailed, "offline: no tarball fetcher configured"))
    }
}

impl PatchApplier for OfflineOnly {
    fn apply_patch_queue(&self, _: &Path) -> Result<PatchQueueOutcome, CoreError> {
        Err(CoreError::new(crate::error::FailureKind::ToolMissing, "offline: no patch-queue tool configured"))
    }

    fn refresh_patch_queue(&self, _: &Path) -> Result<(), CoreError> {
        Err(CoreError::new(crate::error::FailureKind::ToolMissing, "offline: no patch-queue tool configured"))
    }
}

impl SourceBuilder for OfflineOnly {
    fn build_source(&self, _: &Path, _: &str) -> Result<PathBuf, CoreError> {
        Err(CoreError::new(crate::error::FailureKind::ToolMissing, "offline: no source builder configured"))
    }
}

impl RepositoryIndexer for OfflineOnly {
    fn reindex(&self, _: &Path) -> Result<(), CoreError> {
        Err(CoreError::new(crate::error::FailureKind::RegistryError, "offline: no repository indexer configured"))
    }
}

impl ArchiveFetcher for OfflineOnly {
    fn fetch_compressed(&self, _: &str, _: &str, _: &str) -> Result<Vec<u8>, CoreError> {
        Err(CoreError::new(crate::error::FailureKind::FetchFailed, "offline: no archive fetcher configured"))
    }
}

impl VersionComparatorOffline {
    pub fn new() -> Self {
        VersionComparatorOffline
    }
}

/// Re-exports `LexicographicComparator` under the name this module's other
/// offline collaborators use, for symmetry at call sites that build an
/// all-offline collaborator bundle for tests.
#[derive(Debug, Default, Clone, Copy)]
pub struct VersionComparatorOffline;

impl VersionComparator for VersionComparatorOffline {
    fn compare(&self, a: &VersionString, b: &VersionString) -> Ordering {
        crate::version::LexicographicComparator.compare(a, b)
    }
}
