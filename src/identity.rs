//! Identities and names (spec §3). Keys are case-insensitive; canonical form
//! is lowercase.

use std::collections::BTreeSet;
use std::fmt;

/// A case-insensitive package/deliverable name. Canonical form is lowercase;
/// the original casing is not retained since spec.md §3 only requires the
/// canonical form.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize)]
pub struct Name(String);

impl Name {
    pub fn new(s: impl AsRef<str>) -> Self {
        Name(s.as_ref().to_lowercase())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Name {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Name {
    fn from(s: &str) -> Self {
        Name::new(s)
    }
}

impl From<String> for Name {
    fn from(s: String) -> Self {
        Name::new(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Kind {
    Service,
    Client,
    Library,
    Unknown,
}

/// Pure-function kind inference, used only when no explicit kind is given
/// (spec §4.3).
pub fn infer_kind(canonical_upstream: &Name) -> Kind {
    let s = canonical_upstream.as_str();
    if s.ends_with("client") {
        Kind::Client
    } else if s.contains("oslo.") {
        Kind::Library
    } else {
        Kind::Service
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Origin {
    Registry,
    Releases,
    Local,
    Heuristic,
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Identity {
    pub source_package: Name,
    pub canonical_upstream: Name,
    pub deliverable_name: Option<Name>,
    pub governed: bool,
    pub kind: Kind,
    pub aliases: BTreeSet<Name>,
    pub origin: Origin,
}

impl Identity {
    pub fn new(source_package: impl Into<Name>, canonical_upstream: impl Into<Name>) -> Self {
        let canonical_upstream = canonical_upstream.into();
        Identity {
            source_package: source_package.into(),
            kind: infer_kind(&canonical_upstream),
            canonical_upstream,
            deliverable_name: None,
            governed: false,
            aliases: BTreeSet::new(),
            origin: Origin::Heuristic,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_are_case_insensitive() {
        assert_eq!(Name::new("Nova-API"), Name::new("nova-api"));
    }

    #[test]
    fn kind_inference_rules() {
        assert_eq!(infer_kind(&Name::new("novaclient")), Kind::Client);
        assert_eq!(infer_kind(&Name::new("oslo.config")), Kind::Library);
        assert_eq!(infer_kind(&Name::new("nova")), Kind::Service);
    }
}
