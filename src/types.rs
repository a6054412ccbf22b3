//! Type selector (spec §4.5). Per-package choice of {release, milestone,
//! snapshot}; derives the version source per package. Pure decision
//! function over an injected read-only `ReleaseMetadata` collaborator.

use crate::identity::Name;
use crate::version::VersionString;

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BuildType {
    Release,
    Milestone,
    Snapshot,
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct TypeSelection {
    pub build_type: BuildType,
    pub reason: String,
}

/// Read-only external source listing released versions for a deliverable
/// per series (spec §4.5). Production implementations query the real
/// release-metadata service; a default in-memory implementation is
/// provided for tests.
pub trait ReleaseMetadata: Send + Sync {
    /// The version released for `deliverable` in `series`, if any.
    fn released_version(&self, deliverable: &Name, series: &str) -> Option<VersionString>;
    /// Pre-release tags (milestones/betas/rcs) known for `deliverable` in
    /// `series`, most-recent-first by the caller's convention.
    fn milestone_tags(&self, deliverable: &Name, series: &str) -> Vec<String>;
}

#[derive(Debug, Default)]
pub struct InMemoryReleaseMetadata {
    pub released: std::collections::HashMap<(Name, String), VersionString>,
    pub milestones: std::collections::HashMap<(Name, String), Vec<String>>,
}

impl ReleaseMetadata for InMemoryReleaseMetadata {
    fn released_version(&self, deliverable: &Name, series: &str) -> Option<VersionString> {
        self.released.get(&(deliverable.clone(), series.to_string())).cloned()
    }

    fn milestone_tags(&self, deliverable: &Name, series: &str) -> Vec<String> {
        self.milestones.get(&(deliverable.clone(), series.to_string())).cloned().unwrap_or_default()
    }
}

/// Per spec §4.5 precedence: explicit override, then post-final/pre-final
/// release rules, then milestone, then snapshot as the final fallback.
pub fn select_build_type(
    deliverable: &Name,
    series: &str,
    post_final: bool,
    metadata: &dyn ReleaseMetadata,
    explicit_override: Option<BuildType>,
) -> TypeSelection {
    if let Some(build_type) = explicit_override {
        return TypeSelection { build_type, reason: "explicit caller override".to_string() };
    }

    if post_final {
        if let Some(version) = metadata.released_version(deliverable, series) {
            return TypeSelection {
                build_type: BuildType::Release,
                reason: format!("post-final series; release metadata names {version}"),
            };
        }
    } else if let Some(version) = metadata.released_version(deliverable, series) {
        return TypeSelection {
            build_type: BuildType::Release,
            reason: format!("pre-final series with a released version {version} for this series"),
        };
    }

    let tags = metadata.milestone_tags(deliverable, series);
    if let Some(highest) = tags.into_iter().max() {
        return TypeSelection {
            build_type: BuildType::Milestone,
            reason: format!("pre-final series; highest milestone tag {highest}"),
        };
    }

    TypeSelection {
        build_type: BuildType::Snapshot,
        reason: "no released or milestone version; synthesizing from upstream VCS HEAD".to_string(),
    }
}

/// Advisory-only retirement signal (spec §9): a deliverable not observed in
/// release metadata for three consecutive cycles is "possibly retired".
/// Callers must treat this as informational and never use it to block or
/// skip a build.
pub fn is_possibly_retired(last_seen_cycle: Option<u32>, current_cycle: u32) -> bool {
    match last_seen_cycle {
        None => false,
        Some(last_seen) => current_cycle.saturating_sub(last_seen) >= 3,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn possibly_retired_after_three_unobserved_cycles() {
        assert!(!is_possibly_retired(Some(10), 12));
        assert!(is_possibly_retired(Some(10), 13));
        assert!(!is_possibly_retired(None, 13));
    }

    #[test]
    fn explicit_override_wins() {
        let meta = InMemoryReleaseMetadata::default();
        let selection =
            select_build_type(&Name::new("nova"), "2024.1", false, &meta, Some(BuildType::Snapshot));
        assert_eq!(selection.build_type, BuildType::Snapshot);
        assert!(selection.reason.contains("override"));
    }

    #[test]
    fn post_final_prefers_release() {
        let mut meta = InMemoryReleaseMetadata::default();
        meta.released.insert((Name::new("nova"), "2024.1".to_string()), VersionString::new("29.0.0"));
        let selection = select_build_type(&Name::new("nova"), "2024.1", true, &meta, None);
        assert_eq!(selection.build_type, BuildType::Release);
    }

    #[test]
    fn pre_final_falls_back_to_milestone_then_snapshot() {
        let mut meta = InMemoryReleaseMetadata::default();
        meta.milestones.insert(
            (Name::new("nova"), "2024.2".to_string()),
            vec!["b1".to_string(), "b2".to_string()],
        );
        let selection = select_build_type(&Name::new("nova"), "2024.2", false, &meta, None);
        assert_eq!(selection.build_type, BuildType::Milestone);
        assert!(selection.reason.contains("b2"));

        let empty_meta = InMemoryReleaseMetadata::default();
        let snapshot = select_build_type(&Name::new("cinder"), "2024.2", false, &empty_meta, None);
        assert_eq!(snapshot.build_type, BuildType::Snapshot);
    }
}
