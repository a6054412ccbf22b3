//! Reports (spec §4.11). Deterministic machine- and human-readable
//! summaries. JSON via `serde_json::to_writer_pretty` with keys sorted
//! explicitly before serializing (matching spec §6's "pretty-printed with
//! two-space indent and sorted keys" — `serde_json::Map` is
//! insertion-ordered by default, so this module sorts first).

use std::collections::BTreeMap;
use std::io::Write;

use serde_json::Value;

use crate::error::FailureKind;
use crate::identity::{Kind, Name, Origin};
use crate::orchestrator::{PackageState, PackageStatus, RunState};
use crate::satisfaction::SatisfactionSummary;
use crate::target::Tier;
use crate::types::TypeSelection;

/// Recursively sort object keys so two semantically-equal values serialize
/// byte-identically (spec §4.11 "Determinism").
fn sort_keys(value: Value) -> Value {
    match value {
        Value::Object(map) => {
            let sorted: BTreeMap<String, Value> = map.into_iter().map(|(k, v)| (k, sort_keys(v))).collect();
            serde_json::to_value(sorted).expect("BTreeMap<String, Value> always serializes")
        },
        Value::Array(items) => Value::Array(items.into_iter().map(sort_keys).collect()),
        other => other,
    }
}

pub fn to_sorted_pretty_json<T: serde::Serialize>(value: &T) -> serde_json::Result<String> {
    let raw = serde_json::to_value(value)?;
    serde_json::to_string_pretty(&sort_keys(raw))
}

pub fn write_sorted_pretty_json<T: serde::Serialize, W: Write>(value: &T, mut writer: W) -> std::io::Result<()> {
    let text = to_sorted_pretty_json(value)?;
    writer.write_all(text.as_bytes())
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct TargetExplanation {
    pub source_package: Name,
    pub canonical_upstream: Name,
    pub kind: Kind,
    pub origin: Origin,
    pub resolution_tier: Tier,
    pub type_selection: Option<TypeSelection>,
    pub satisfaction_summary: Option<SatisfactionSummary>,
    pub cloud_archive_required: Vec<String>,
    pub mir_warnings: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct BuildAllSummary {
    pub counts_by_status: BTreeMap<String, usize>,
    pub longest_builds: Vec<(Name, f64)>,
    pub failures_by_kind: BTreeMap<String, Vec<Name>>,
    pub missing_deps: BTreeMap<String, Vec<Name>>,
    pub cycles: Vec<Vec<Name>>,
}

/// Build-all summary: counts per terminal status; top-N longest builds;
/// failures grouped by kind; missing deps with required_by; cycles.
pub fn summarize_run(run: &RunState, top_n: usize) -> BuildAllSummary {
    let mut counts_by_status: BTreeMap<String, usize> = BTreeMap::new();
    let mut failures_by_kind: BTreeMap<String, Vec<Name>> = BTreeMap::new();
    let mut durations: Vec<(Name, f64)> = Vec::new();

    let mut sorted_names: Vec<&Name> = run.packages.keys().collect();
    sorted_names.sort();

    for name in sorted_names {
        let state: &PackageState = &run.packages[name];
        *counts_by_status.entry(status_label(state.status).to_string()).or_insert(0) += 1;
        if let Some(kind) = state.failure_kind {
            failures_by_kind.entry(kind.label().to_string()).or_default().push(name.clone());
        }
        if let Some(duration) = state.duration_seconds {
            durations.push((name.clone(), duration));
        }
    }

    durations.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
    durations.truncate(top_n);

    let missing_deps: BTreeMap<String, Vec<Name>> = run
        .missing_deps
        .values()
        .map(|dep| {
            let mut required_by = dep.required_by.clone();
            required_by.sort();
            (dep.name.clone(), required_by)
        })
        .collect();

    let mut cycles = run.cycles.clone();
    for cycle in cycles.iter_mut() {
        cycle.sort();
    }
    cycles.sort();

    BuildAllSummary {
        counts_by_status,
        longest_builds: durations,
        failures_by_kind,
        missing_deps,
        cycles,
    }
}

fn status_label(status: PackageStatus) -> &'static str {
    match status {
        PackageStatus::Pending => "pending",
        PackageStatus::Running => "running",
        PackageStatus::Success => "success",
        PackageStatus::Failed => "failed",
        PackageStatus::Skipped => "skipped",
        PackageStatus::Blocked => "blocked",
    }
}

#[derive(Debug, Clone, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct PlanDependencySummary {
    pub per_package: BTreeMap<Name, PlanDependencyCounts>,
}

#[derive(Debug, Clone, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct PlanDependencyCounts {
    pub satisfied: usize,
    pub cloud_archive_required: usize,
    pub mir_warnings: usize,
}

pub fn plan_dependency_summary(
    per_package_results: &BTreeMap<Name, Vec<crate::satisfaction::ConstraintResult>>,
) -> PlanDependencySummary {
    let mut summary = PlanDependencySummary::default();
    for (name, results) in per_package_results {
        let counts = PlanDependencyCounts {
            satisfied: results.iter().filter(|r| r.dev_result.satisfied).count(),
            cloud_archive_required: results.iter().filter(|r| r.cloud_archive_required).count(),
            mir_warnings: results.iter().filter(|r| r.mir_warning).count(),
        };
        summary.per_package.insert(name.clone(), counts);
    }
    summary
}

/// Human-readable rendering of a build-all summary. Lines are produced in a
/// fixed, sorted order so identical inputs always produce byte-identical
/// text (spec §4.11 "Determinism").
pub fn render_build_all_summary_text(summary: &BuildAllSummary) -> String {
    let mut out = String::new();
    out.push_str("=== Build-all summary ===\n");
    for (status, count) in &summary.counts_by_status {
        out.push_str(&format!("{status}: {count}\n"));
    }
    if !summary.longest_builds.is_empty() {
        out.push_str("\nLongest builds:\n");
        for (name, seconds) in &summary.longest_builds {
            out.push_str(&format!("  {name}: {seconds:.1}s\n"));
        }
    }
    if !summary.failures_by_kind.is_empty() {
        out.push_str("\nFailures by kind:\n");
        for (kind, names) in &summary.failures_by_kind {
            out.push_str(&format!("  {kind}: {}\n", names.iter().map(Name::to_string).collect::<Vec<_>>().join(", ")));
        }
    }
    if !summary.missing_deps.is_empty() {
        out.push_str("\nMissing dependencies:\n");
        for (name, required_by) in &summary.missing_deps {
            out.push_str(&format!(
                "  {name} (required by {})\n",
                required_by.iter().map(Name::to_string).collect::<Vec<_>>().join(", ")
            ));
        }
    }
    if !summary.cycles.is_empty() {
        out.push_str("\nCycles:\n");
        for cycle in &summary.cycles {
            out.push_str(&format!("  {}\n", cycle.iter().map(Name::to_string).collect::<Vec<_>>().join(" -> ")));
        }
    }
    out
}
