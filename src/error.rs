//! Structured failure taxonomy (spec §7) and its exit-code mapping (spec §6).

use std::fmt;

use thiserror::Error;

/// The opaque small integers callers may observe (spec §6 exit code taxonomy).
/// Never pattern-match on the numeric value outside of this module; use
/// [`FailureKind`] instead.
pub type ExitCode = i32;

/// One entry per row of the exit code taxonomy table in spec.md §6.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    ConfigError,
    ToolMissing,
    FetchFailed,
    PatchFailed,
    MissingDep,
    Cycle,
    BuildFailed,
    PolicyBlocked,
    RegistryError,
    Retired,
    Timeout,
    Unknown,
}

impl FailureKind {
    /// The opaque exit code this kind maps to, per spec.md §6.
    pub const fn exit_code(self) -> ExitCode {
        match self {
            FailureKind::ConfigError => 1,
            FailureKind::ToolMissing => 2,
            FailureKind::FetchFailed => 3,
            FailureKind::PatchFailed => 4,
            FailureKind::MissingDep => 5,
            FailureKind::Cycle => 6,
            FailureKind::BuildFailed => 7,
            FailureKind::PolicyBlocked => 8,
            FailureKind::RegistryError => 9,
            FailureKind::Retired => 10,
            FailureKind::Timeout => 124,
            FailureKind::Unknown => 125,
        }
    }

    /// Stable string label, used in reports and persisted run state.
    pub const fn label(self) -> &'static str {
        match self {
            FailureKind::ConfigError => "CONFIG_ERROR",
            FailureKind::ToolMissing => "TOOL_MISSING",
            FailureKind::FetchFailed => "FETCH_FAILED",
            FailureKind::PatchFailed => "PATCH_FAILED",
            FailureKind::MissingDep => "MISSING_DEP",
            FailureKind::Cycle => "CYCLE",
            FailureKind::BuildFailed => "BUILD_FAILED",
            FailureKind::PolicyBlocked => "POLICY_BLOCKED",
            FailureKind::RegistryError => "REGISTRY_ERROR",
            FailureKind::Retired => "RETIRED",
            FailureKind::Timeout => "TIMEOUT",
            FailureKind::Unknown => "UNKNOWN",
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// A core error carrying its taxonomy kind. Call sites that need richer
/// context should wrap this in `anyhow::Context` rather than add fields here.
#[derive(Debug, Error)]
#[error("{kind}: {message}")]
pub struct CoreError {
    pub kind: FailureKind,
    pub message: String,
}

impl CoreError {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        CoreError { kind, message: message.into() }
    }
}

/// Worst-kind-wins ordering used by the orchestrator to pick the run's exit
/// code (spec.md §7 "User-visible behavior"). Larger means "worse" for the
/// purposes of summarizing a batch outcome; the exact numeric exit code is
/// still taken from `FailureKind::exit_code`.
pub fn worst_of(a: Option<FailureKind>, b: Option<FailureKind>) -> Option<FailureKind> {
    match (a, b) {
        (None, x) | (x, None) => x,
        (Some(a), Some(b)) => {
            // BUILD_FAILED is treated as worse than other single-package
            // failures when summarizing a keep-going run, per spec.md §7.
            if a == FailureKind::BuildFailed || b == FailureKind::BuildFailed {
                Some(FailureKind::BuildFailed)
            } else if a.exit_code() >= b.exit_code() {
                Some(a)
            } else {
                Some(b)
            }
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_codes_are_opaque_small_integers() {
        for kind in [
            FailureKind::ConfigError,
            FailureKind::ToolMissing,
            FailureKind::FetchFailed,
            FailureKind::PatchFailed,
            FailureKind::MissingDep,
            FailureKind::Cycle,
            FailureKind::BuildFailed,
            FailureKind::PolicyBlocked,
            FailureKind::RegistryError,
            FailureKind::Retired,
        ] {
            assert!(kind.exit_code() > 0 && kind.exit_code() < 11);
        }
    }

    #[test]
    fn worst_of_prefers_build_failed() {
        assert_eq!(
            worst_of(Some(FailureKind::ConfigError), Some(FailureKind::BuildFailed)),
            Some(FailureKind::BuildFailed)
        );
        assert_eq!(worst_of(None, Some(FailureKind::Timeout)), Some(FailureKind::Timeout));
        assert_eq!(worst_of(None, None), None);
    }
}
