//! Version & dependency expression parser (spec §4.1).
//!
//! Version comparison itself is an external collaborator (spec §1): this
//! module never invents comparison rules. It exposes `VersionComparator`,
//! with `LexicographicComparator` provided only for offline unit tests
//! (spec.md explicitly calls that fallback acceptable in that context only).

use std::cmp::Ordering;

use regex::Regex;

/// An opaque, externally-ordered version string.
#[derive(Debug, Clone, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct VersionString(pub String);

impl VersionString {
    pub fn new(s: impl Into<String>) -> Self {
        VersionString(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for VersionString {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Parsed components of a version string, per spec.md §4.1.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct ParsedVersion {
    pub epoch: u32,
    pub upstream: String,
    pub revision: String,
}

impl ParsedVersion {
    /// Parse `[epoch:]upstream[-revision]`. Epoch defaults to 0 when absent;
    /// an unparsable epoch coerces to 0 rather than erroring. Revision is
    /// empty for "native" versions (no hyphen).
    pub fn parse(input: &str) -> Self {
        let (epoch_part, rest) = match input.split_once(':') {
            Some((e, r)) => (Some(e), r),
            None => (None, input),
        };
        let epoch = epoch_part.and_then(|e| e.parse::<u32>().ok()).unwrap_or(0);

        let (upstream, revision) = match rest.rfind('-') {
            Some(idx) => (rest[..idx].to_string(), rest[idx + 1..].to_string()),
            None => (rest.to_string(), String::new()),
        };

        ParsedVersion { epoch, upstream, revision }
    }

    /// Reserialize to the canonical full version string.
    pub fn to_full_string(&self) -> String {
        let mut out = String::new();
        if self.epoch > 0 {
            out.push_str(&self.epoch.to_string());
            out.push(':');
        }
        out.push_str(&self.upstream);
        if !self.revision.is_empty() {
            out.push('-');
            out.push_str(&self.revision);
        }
        out
    }
}

/// Delegated version comparison (spec §1, §4.1). Implementations of this
/// trait are the "external collaborator"; the core only consumes it.
pub trait VersionComparator: Send + Sync {
    fn compare(&self, a: &VersionString, b: &VersionString) -> Ordering;
}

/// Offline-only fallback: lexicographic comparison of the normalized
/// serialization. Spec.md §4.1 permits this only for offline unit testing;
/// production callers must supply a real comparator.
#[derive(Debug, Default, Clone, Copy)]
pub struct LexicographicComparator;

impl VersionComparator for LexicographicComparator {
    fn compare(&self, a: &VersionString, b: &VersionString) -> Ordering {
        let pa = ParsedVersion::parse(a.as_str());
        let pb = ParsedVersion::parse(b.as_str());
        (pa.epoch, &pa.upstream, &pa.revision).cmp(&(pb.epoch, &pb.upstream, &pb.revision))
    }
}

/// Relation operators recognised in a dependency field (spec §4.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum Relation {
    None,
    Ge,
    Le,
    Eq,
    Gt,
    Lt,
}

impl Relation {
    fn from_token(s: &str) -> Relation {
        match s {
            ">=" => Relation::Ge,
            "<=" => Relation::Le,
            "=" => Relation::Eq,
            ">>" => Relation::Gt,
            "<<" => Relation::Lt,
            _ => Relation::None,
        }
    }
}

/// A single dependency constraint, possibly with alternatives (spec §3, §4.1).
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Constraint {
    pub name: String,
    pub relation: Relation,
    pub version: Option<VersionString>,
    pub arch_qualifiers: Vec<String>,
    pub alternatives: Vec<Constraint>,
}

impl Constraint {
    pub fn bare(name: impl Into<String>) -> Self {
        Constraint {
            name: name.into(),
            relation: Relation::None,
            version: None,
            arch_qualifiers: Vec::new(),
            alternatives: Vec::new(),
        }
    }
}

fn name_and_arch_re() -> Regex {
    // <name>( ( <rel> <ver> ) )?( [<arches>] )?
    Regex::new(
        r"^(?P<name>[a-z0-9][a-z0-9+\-.]+)(?::(?:any|native))?(?:\s*\((?P<rel>>=|<=|=|>>|<<)\s*(?P<ver>[^)]+)\))?(?:\s*\[(?P<arches>[^\]]+)\])?$",
    )
    .expect("static pattern")
}

/// Parse one dependency atom (no commas/pipes), per spec §4.1. Falls through
/// to a bare-name constraint if the atom does not match the grammar.
pub fn parse_atom(atom: &str) -> Constraint {
    let atom = atom.trim();
    let re = name_and_arch_re();
    if let Some(caps) = re.captures(atom) {
        let name = caps.name("name").map(|m| m.as_str().to_string()).unwrap_or_default();
        let (relation, version) = match (caps.name("rel"), caps.name("ver")) {
            (Some(r), Some(v)) => {
                (Relation::from_token(r.as_str()), Some(VersionString::new(v.as_str().trim())))
            },
            _ => (Relation::None, None),
        };
        let arch_qualifiers = caps
            .name("arches")
            .map(|m| m.as_str().split(' ').filter(|s| !s.is_empty()).map(String::from).collect())
            .unwrap_or_default();
        Constraint { name, relation, version, arch_qualifiers, alternatives: Vec::new() }
    } else {
        Constraint::bare(atom)
    }
}

/// Parse a full dependency field value (e.g. a `Depends:` or `Build-Depends:`
/// value) into a list of constraints, each possibly carrying alternatives.
pub fn parse_dependency_field(field: &str) -> Vec<Constraint> {
    field
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|group| {
            let mut parts = group.split('|').map(parse_atom);
            let mut primary = parts.next().expect("split always yields at least one item");
            primary.alternatives = parts.collect();
            primary
        })
        .collect()
}

/// Relation table lookup: is `available` acceptable given `relation required`?
/// Empty sides are always satisfied (spec §4.1); unknown relations are
/// permissive by construction since `Relation::None` always returns true.
pub fn satisfies(
    comparator: &dyn VersionComparator,
    available: Option<&VersionString>,
    relation: Relation,
    required: Option<&VersionString>,
) -> bool {
    let (available, required) = match (available, required) {
        (Some(a), Some(r)) => (a, r),
        _ => return true,
    };
    let ord = comparator.compare(available, required);
    match relation {
        Relation::None => true,
        Relation::Ge => ord != Ordering::Less,
        Relation::Le => ord != Ordering::Greater,
        Relation::Eq => ord == Ordering::Equal,
        Relation::Gt => ord == Ordering::Greater,
        Relation::Lt => ord == Ordering::Less,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_epoch_upstream_revision() {
        let v = ParsedVersion::parse("1:29.0.0-0ubuntu1");
        assert_eq!(v.epoch, 1);
        assert_eq!(v.upstream, "29.0.0");
        assert_eq!(v.revision, "0ubuntu1");
    }

    #[test]
    fn native_version_has_empty_revision() {
        let v = ParsedVersion::parse("2.5.0");
        assert_eq!(v.revision, "");
        assert_eq!(v.epoch, 0);
    }

    #[test]
    fn invalid_epoch_coerces_to_zero() {
        let v = ParsedVersion::parse("x:1.0-1");
        assert_eq!(v.epoch, 0);
        // the whole "x" becomes part of upstream since split_once(':') still
        // splits on the first colon even if the left side isn't numeric
        assert_eq!(v.upstream, "1.0");
    }

    #[test]
    fn parse_simple_constraint() {
        let c = parse_atom("libbar (>= 2.0)");
        assert_eq!(c.name, "libbar");
        assert_eq!(c.relation, Relation::Ge);
        assert_eq!(c.version.unwrap().as_str(), "2.0");
    }

    #[test]
    fn parse_bare_name_falls_through() {
        let c = parse_atom("some_weird_thing!!");
        assert_eq!(c.name, "some_weird_thing!!");
        assert_eq!(c.relation, Relation::None);
    }

    #[test]
    fn parse_field_splits_commas_and_alternatives() {
        let cs = parse_dependency_field("libfoo (>= 1.0), libbar | libbaz (= 2.0)");
        assert_eq!(cs.len(), 2);
        assert_eq!(cs[0].name, "libfoo");
        assert!(cs[1].alternatives.len() == 1);
        assert_eq!(cs[1].alternatives[0].name, "libbaz");
    }

    #[test]
    fn strips_arch_any_native_suffix() {
        let c = parse_atom("libfoo:any (>= 1.0)");
        assert_eq!(c.name, "libfoo");
    }

    #[test]
    fn empty_sides_always_satisfy() {
        let cmp = LexicographicComparator;
        assert!(satisfies(&cmp, None, Relation::Ge, Some(&VersionString::new("1.0"))));
        assert!(satisfies(&cmp, Some(&VersionString::new("1.0")), Relation::Ge, None));
    }

    #[test]
    fn ge_relation_respects_order() {
        let cmp = LexicographicComparator;
        let a = VersionString::new("2.0");
        let r = VersionString::new("1.0");
        assert!(satisfies(&cmp, Some(&a), Relation::Ge, Some(&r)));
        assert!(!satisfies(&cmp, Some(&r), Relation::Gt, Some(&a)));
    }
}
