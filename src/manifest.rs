//! Build manifest (spec §4.6). Computed once from inputs and never mutated
//! after emission; every consumer receives an immutable snapshot.

use std::collections::HashMap;

use crate::graph::DependencyGraph;
use crate::identity::Name;
use crate::types::{BuildType, ReleaseMetadata, TypeSelection};
use crate::version::{VersionComparator, VersionString};

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CycleStage {
    PreFinal,
    PostFinal,
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct PackageVersion {
    pub source_package: Name,
    pub deliverable: Name,
    pub upstream_version: String,
    pub revision: String,
    pub epoch: u32,
    pub build_type: BuildType,
    pub full_version: String,
    pub source_label: String,
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct BuildManifest {
    pub series: String,
    pub cycle_stage: CycleStage,
    pub packages: HashMap<Name, PackageVersion>,
    pub build_order: Vec<Name>,
    pub edges: HashMap<Name, Vec<Name>>,
    pub type_selections: HashMap<Name, TypeSelection>,
    pub warnings: Vec<String>,
}

/// Per-package input to the manifest constructor.
pub struct PackageInput {
    pub source_package: Name,
    pub deliverable: Name,
    /// Existing changelog-derived revision, used as the fallback when the
    /// build type doesn't determine one itself.
    pub existing_revision: Option<String>,
    /// Epoch preserved from the existing changelog.
    pub existing_epoch: u32,
    /// Used only for snapshot builds: a short VCS identity and a date used
    /// to synthesize `<base>~git<yyyymmdd>.<short-sha>`.
    pub vcs_head_short_sha: Option<String>,
    pub vcs_head_date_yyyymmdd: Option<String>,
    pub snapshot_base: String,
}

fn resolve_version(
    input: &PackageInput,
    selection: &TypeSelection,
    series: &str,
    metadata: &dyn ReleaseMetadata,
) -> PackageVersion {
    let revision = input.existing_revision.clone().unwrap_or_else(|| "0ubuntu1".to_string());

    let upstream_version = match selection.build_type {
        BuildType::Release | BuildType::Milestone => metadata
            .released_version(&input.deliverable, series)
            .map(|v| v.as_str().to_string())
            .unwrap_or_else(|| input.snapshot_base.clone()),
        BuildType::Snapshot => {
            let sha = input.vcs_head_short_sha.as_deref().unwrap_or("unknown");
            let date = input.vcs_head_date_yyyymmdd.as_deref().unwrap_or("00000000");
            format!("{}~git{}.{}", input.snapshot_base, date, sha)
        },
    };

    let full_version = if input.existing_epoch > 0 {
        format!("{}:{}-{}", input.existing_epoch, upstream_version, revision)
    } else {
        format!("{upstream_version}-{revision}")
    };

    PackageVersion {
        source_package: input.source_package.clone(),
        deliverable: input.deliverable.clone(),
        upstream_version,
        revision,
        epoch: input.existing_epoch,
        build_type: selection.build_type,
        full_version,
        source_label: selection.reason.clone(),
    }
}

/// Build the manifest. Steps 1-3 of spec §4.6.
pub fn build_manifest(
    series: &str,
    cycle_stage: CycleStage,
    inputs: &[PackageInput],
    type_selections: &HashMap<Name, TypeSelection>,
    graph: &DependencyGraph,
    metadata: &dyn ReleaseMetadata,
) -> BuildManifest {
    let mut warnings = Vec::new();

    let build_order = match graph.topological_sort() {
        Ok(order) => order.into_iter().filter(|n| inputs.iter().any(|i| &i.source_package == n)).collect(),
        Err(_) => {
            let cycles = graph.detect_cycles();
            warnings.push(format!("build order is not a strict topological sort; cycles present: {cycles:?}"));
            inputs.iter().map(|i| i.source_package.clone()).collect::<Vec<_>>()
        },
    };

    let mut packages = HashMap::new();
    let mut edges = HashMap::new();
    for input in inputs {
        let selection = type_selections
            .get(&input.source_package)
            .cloned()
            .unwrap_or(TypeSelection { build_type: BuildType::Snapshot, reason: "no selection provided".into() });
        let version = resolve_version(input, &selection, series, metadata);
        packages.insert(input.source_package.clone(), version);
    }

    for input in inputs {
        let dep_names: Vec<Name> = graph_dependencies(graph, &input.source_package);
        edges.insert(input.source_package.clone(), dep_names);
    }

    BuildManifest {
        series: series.to_string(),
        cycle_stage,
        packages,
        build_order,
        edges,
        type_selections: type_selections.clone(),
        warnings,
    }
}

fn graph_dependencies(graph: &DependencyGraph, name: &Name) -> Vec<Name> {
    graph.direct_dependencies(name)
}

/// Clamp a candidate upstream version to a prior-LTS floor, never below it
/// (spec §9 "normalize-to-prior-LTS floor"). Because the manifest is
/// immutable once emitted, this must be applied to a `PackageInput`'s
/// `snapshot_base` (or the caller's resolved version) *before*
/// `build_manifest` runs, never as a pass over an already-built manifest.
pub fn normalize_to_prior_lts_floor(
    candidate: &str,
    floor: Option<&str>,
    comparator: &dyn VersionComparator,
) -> String {
    let Some(floor) = floor else { return candidate.to_string() };
    let candidate_version = VersionString::new(candidate);
    let floor_version = VersionString::new(floor);
    match comparator.compare(&candidate_version, &floor_version) {
        std::cmp::Ordering::Less => floor.to_string(),
        _ => candidate.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::DependencyGraph;
    use crate::types::InMemoryReleaseMetadata;
    use std::collections::HashSet;

    fn control_with_build_deps(source: &str, binaries: &[&str], build_deps: &str) -> String {
        let mut text = format!("Source: {source}\nBuild-Depends: {build_deps}\n\n");
        for bin in binaries {
            text.push_str(&format!("Package: {bin}\n\n"));
        }
        text
    }

    #[test]
    fn p5_manifest_precedence_holds() {
        let mut sources = HashMap::new();
        sources.insert(Name::new("a"), control_with_build_deps("a", &["a"], "libb-dev"));
        sources.insert(Name::new("b"), control_with_build_deps("b", &["libb-dev"], ""));
        let graph = DependencyGraph::from_control(&sources, &HashSet::new());

        let inputs = vec![
            PackageInput {
                source_package: Name::new("a"),
                deliverable: Name::new("a"),
                existing_revision: None,
                existing_epoch: 0,
                vcs_head_short_sha: None,
                vcs_head_date_yyyymmdd: None,
                snapshot_base: "1.0.0".to_string(),
            },
            PackageInput {
                source_package: Name::new("b"),
                deliverable: Name::new("b"),
                existing_revision: None,
                existing_epoch: 0,
                vcs_head_short_sha: None,
                vcs_head_date_yyyymmdd: None,
                snapshot_base: "1.0.0".to_string(),
            },
        ];

        let selections = HashMap::new();
        let metadata = InMemoryReleaseMetadata::default();
        let manifest = build_manifest("2024.1", CycleStage::PreFinal, &inputs, &selections, &graph, &metadata);

        let pos_a = manifest.build_order.iter().position(|n| n == &Name::new("a")).unwrap();
        let pos_b = manifest.build_order.iter().position(|n| n == &Name::new("b")).unwrap();
        assert!(pos_b < pos_a, "dependency b must precede dependent a");
        assert_eq!(manifest.packages.len(), 2);
    }

    #[test]
    fn no_package_has_two_versions() {
        let graph = DependencyGraph::new();
        let inputs = vec![PackageInput {
            source_package: Name::new("solo"),
            deliverable: Name::new("solo"),
            existing_revision: Some("0ubuntu1".to_string()),
            existing_epoch: 0,
            vcs_head_short_sha: None,
            vcs_head_date_yyyymmdd: None,
            snapshot_base: "2.0.0".to_string(),
        }];
        let selections = HashMap::new();
        let metadata = InMemoryReleaseMetadata::default();
        let manifest = build_manifest("2024.1", CycleStage::PreFinal, &inputs, &selections, &graph, &metadata);
        assert_eq!(manifest.packages.len(), 1);
    }

    #[test]
    fn lts_floor_clamps_only_when_candidate_is_lower() {
        let cmp = crate::version::LexicographicComparator;
        assert_eq!(normalize_to_prior_lts_floor("1.5.0", Some("2.0.0"), &cmp), "2.0.0");
        assert_eq!(normalize_to_prior_lts_floor("2.5.0", Some("2.0.0"), &cmp), "2.5.0");
        assert_eq!(normalize_to_prior_lts_floor("1.5.0", None, &cmp), "1.5.0");
    }
}
