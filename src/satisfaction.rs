//! Dependency satisfaction evaluator (spec §4.7).

use crate::archive::{ArchiveIndex, Component};
use crate::version::{satisfies, Constraint, VersionComparator, VersionString};

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MinVersionPolicy {
    Enforce,
    Warn,
    Off,
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct IndexResult {
    pub found: bool,
    pub version: Option<VersionString>,
    pub component: Option<Component>,
    pub satisfied: bool,
    pub reason: String,
}

impl IndexResult {
    fn not_found() -> Self {
        IndexResult { found: false, version: None, component: None, satisfied: false, reason: "not found".into() }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct ConstraintResult {
    pub constraint: Constraint,
    pub dev_result: IndexResult,
    pub prev_lts_result: IndexResult,
    pub cloud_archive_required: bool,
    pub mir_warning: bool,
    pub chosen_alternative: Option<Constraint>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct SatisfactionSummary {
    pub total: usize,
    pub dev_satisfied: usize,
    pub prev_lts_satisfied: usize,
    pub cloud_archive_required: usize,
    pub mir_warnings: usize,
}

fn evaluate_against_index(
    comparator: &dyn VersionComparator,
    constraint: &Constraint,
    index: Option<&ArchiveIndex>,
) -> IndexResult {
    let Some(index) = index else { return IndexResult::not_found() };
    let Some(record) = index.find_package(&crate::identity::Name::new(&constraint.name)) else {
        return IndexResult::not_found();
    };
    let ok = satisfies(comparator, Some(&record.version), constraint.relation, constraint.version.as_ref());
    IndexResult {
        found: true,
        version: Some(record.version.clone()),
        component: Some(record.component),
        satisfied: ok,
        reason: if ok { "version requirement met".to_string() } else { "version requirement unmet".to_string() },
    }
}

/// Evaluate one constraint against the dev/prev_lts/cloud_archive indices
/// per spec §4.7, recursing through alternatives when the primary is
/// unsatisfied.
pub fn evaluate_constraint(
    comparator: &dyn VersionComparator,
    constraint: &Constraint,
    dev: Option<&ArchiveIndex>,
    prev_lts: Option<&ArchiveIndex>,
    cloud_archive: Option<&ArchiveIndex>,
) -> ConstraintResult {
    let dev_result = evaluate_against_index(comparator, constraint, dev);
    let prev_lts_result = evaluate_against_index(comparator, constraint, prev_lts);

    let mut chosen_alternative = None;
    let (mut dev_result, mut prev_lts_result) = (dev_result, prev_lts_result);
    if !dev_result.satisfied && !prev_lts_result.satisfied {
        for alt in &constraint.alternatives {
            let alt_dev = evaluate_against_index(comparator, alt, dev);
            let alt_prev = evaluate_against_index(comparator, alt, prev_lts);
            if alt_dev.satisfied || alt_prev.satisfied {
                dev_result = alt_dev;
                prev_lts_result = alt_prev;
                chosen_alternative = Some(alt.clone());
                break;
            }
        }
    }

    let cloud_archive_required = !prev_lts_result.satisfied
        && evaluate_against_index(comparator, constraint, cloud_archive).satisfied;

    let mir_warning = dev_result.satisfied && dev_result.component != Some(Component::Main);

    ConstraintResult {
        constraint: constraint.clone(),
        dev_result,
        prev_lts_result,
        cloud_archive_required,
        mir_warning,
        chosen_alternative,
    }
}

pub fn summarize(results: &[ConstraintResult]) -> SatisfactionSummary {
    let mut summary = SatisfactionSummary { total: results.len(), ..Default::default() };
    for result in results {
        if result.dev_result.satisfied {
            summary.dev_satisfied += 1;
        }
        if result.prev_lts_result.satisfied {
            summary.prev_lts_satisfied += 1;
        }
        if result.cloud_archive_required {
            summary.cloud_archive_required += 1;
        }
        if result.mir_warning {
            summary.mir_warnings += 1;
        }
    }
    summary
}

/// Applies `policy` to a single result: `Enforce` turns an unsatisfied dev
/// result into an error message; `Warn` turns it into a non-fatal message;
/// `Off` never produces anything.
pub fn apply_policy(policy: MinVersionPolicy, result: &ConstraintResult) -> Option<(bool, String)> {
    if result.dev_result.satisfied {
        return None;
    }
    match policy {
        MinVersionPolicy::Enforce => {
            Some((true, format!("{} is unsatisfied in dev and policy is enforce", result.constraint.name)))
        },
        MinVersionPolicy::Warn => {
            Some((false, format!("{} is unsatisfied in dev (warn only)", result.constraint.name)))
        },
        MinVersionPolicy::Off => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::version::{LexicographicComparator, Relation};

    fn index_with(name: &str, version: &str, component_section: &str) -> ArchiveIndex {
        let mut idx = ArchiveIndex::new();
        let text = format!("Package: {name}\nVersion: {version}\nSection: {component_section}/libs\n");
        idx.load_text(&text, &LexicographicComparator);
        idx
    }

    #[test]
    fn s4_satisfaction_with_mir_warning() {
        let cmp = LexicographicComparator;
        let constraint = Constraint {
            name: "libbar".to_string(),
            relation: Relation::Ge,
            version: Some(VersionString::new("2.0")),
            arch_qualifiers: Vec::new(),
            alternatives: Vec::new(),
        };
        let dev = index_with("libbar", "2.1", "universe");
        let prev_lts = index_with("libbar", "1.9", "main");

        let result = evaluate_constraint(&cmp, &constraint, Some(&dev), Some(&prev_lts), None);
        assert!(result.dev_result.satisfied);
        assert_eq!(result.dev_result.component, Some(Component::Universe));
        assert!(!result.prev_lts_result.satisfied);
        assert!(result.mir_warning);
        assert!(!result.cloud_archive_required);
    }

    #[test]
    fn cloud_archive_required_when_only_overlay_satisfies() {
        let cmp = LexicographicComparator;
        let constraint = Constraint {
            name: "libbaz".to_string(),
            relation: Relation::Ge,
            version: Some(VersionString::new("3.0")),
            arch_qualifiers: Vec::new(),
            alternatives: Vec::new(),
        };
        let prev_lts = index_with("libbaz", "2.0", "main");
        let cloud_archive = index_with("libbaz", "3.5", "main");

        let result = evaluate_constraint(&cmp, &constraint, None, Some(&prev_lts), Some(&cloud_archive));
        assert!(result.cloud_archive_required);
    }

    #[test]
    fn unsatisfied_primary_falls_back_to_alternative() {
        let cmp = LexicographicComparator;
        let primary = Constraint {
            name: "libold".to_string(),
            relation: Relation::Ge,
            version: Some(VersionString::new("9.0")),
            arch_qualifiers: Vec::new(),
            alternatives: vec![Constraint::bare("libalt")],
        };
        let dev = index_with("libalt", "1.0", "main");
        let result = evaluate_constraint(&cmp, &primary, Some(&dev), None, None);
        assert!(result.dev_result.satisfied);
        assert_eq!(result.chosen_alternative.unwrap().name, "libalt");
    }

    #[test]
    fn policy_enforce_fails_unsatisfied() {
        let result = ConstraintResult {
            constraint: Constraint::bare("foo"),
            dev_result: IndexResult::not_found(),
            prev_lts_result: IndexResult::not_found(),
            cloud_archive_required: false,
            mir_warning: false,
            chosen_alternative: None,
        };
        assert_eq!(apply_policy(MinVersionPolicy::Enforce, &result).unwrap().0, true);
        assert_eq!(apply_policy(MinVersionPolicy::Warn, &result).unwrap().0, false);
        assert!(apply_policy(MinVersionPolicy::Off, &result).is_none());
    }
}
