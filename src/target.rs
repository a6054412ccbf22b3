//! Target resolver (spec §4.3). Parses target expressions and resolves them
//! against a universe of identities through a tiered match, mirroring the
//! teacher's `make_pkg_predicate` closure-composition style in cli.rs.

use regex::Regex;

use crate::identity::{Identity, Name, Origin};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    Source,
    Canonical,
    Upstream,
    Deliverable,
    Repo,
}

impl Scope {
    fn from_token(s: &str) -> Option<Scope> {
        match s {
            "source" => Some(Scope::Source),
            "canonical" | "upstream" => Some(Scope::Canonical),
            "deliverable" => Some(Scope::Deliverable),
            "repo" => Some(Scope::Repo),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mode {
    Exact(String),
    Prefix(String),
    Substring(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetExpr {
    pub scope: Option<Scope>,
    pub mode: Mode,
}

fn ident_re() -> Regex {
    Regex::new(r"^[A-Za-z0-9._+\-/]+$").expect("static pattern")
}

/// Parse one target expression per the grammar in spec §4.3.
pub fn parse_target(input: &str) -> Result<TargetExpr, String> {
    let (scope, body) = match input.split_once(':') {
        Some((s, b)) if Scope::from_token(s).is_some() => (Scope::from_token(s), b),
        _ => (None, input),
    };

    let ident_ok = |s: &str| ident_re().is_match(s);

    let mode = if let Some(rest) = body.strip_prefix('^') {
        if !ident_ok(rest) {
            return Err(format!("invalid prefix target identifier: {rest}"));
        }
        Mode::Prefix(rest.to_string())
    } else if let Some(rest) = body.strip_prefix('~') {
        if !ident_ok(rest) {
            return Err(format!("invalid substring target identifier: {rest}"));
        }
        Mode::Substring(rest.to_string())
    } else if let Some(rest) = body.strip_suffix('*') {
        if !ident_ok(rest) {
            return Err(format!("invalid glob target identifier: {rest}"));
        }
        Mode::Prefix(rest.to_string())
    } else {
        if !ident_ok(body) {
            return Err(format!("invalid target identifier: {body}"));
        }
        Mode::Exact(body.to_string())
    };

    Ok(TargetExpr { scope, mode })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    ExactSource,
    ExactCanonical,
    ExactDeliverable,
    ExactAlias,
    Prefix,
    Substring,
}

#[derive(Debug, thiserror::Error)]
pub enum ResolveError {
    #[error("no match for target expression")]
    NoMatch,
    #[error("ambiguous match: {0} candidates in an exact tier")]
    Ambiguous(usize),
}

fn in_scope(identity: &Identity, scope: Option<Scope>) -> bool {
    match scope {
        None => true,
        Some(Scope::Source) => true,
        Some(Scope::Canonical) | Some(Scope::Upstream) => true,
        Some(Scope::Deliverable) => identity.deliverable_name.is_some(),
        Some(Scope::Repo) => identity.origin == Origin::Local,
    }
}

fn field_for_scope<'a>(identity: &'a Identity, scope: Option<Scope>) -> Vec<&'a str> {
    let aliases = identity.aliases.iter().map(Name::as_str);
    match scope {
        Some(Scope::Source) => std::iter::once(identity.source_package.as_str()).chain(aliases).collect(),
        Some(Scope::Canonical) | Some(Scope::Upstream) => {
            std::iter::once(identity.canonical_upstream.as_str()).chain(aliases).collect()
        },
        Some(Scope::Deliverable) => identity
            .deliverable_name
            .as_ref()
            .map(|n| std::iter::once(n.as_str()).chain(aliases.clone()).collect())
            .unwrap_or_default(),
        Some(Scope::Repo) => std::iter::once(identity.source_package.as_str()).chain(aliases).collect(),
        None => {
            let mut fields = vec![identity.source_package.as_str(), identity.canonical_upstream.as_str()];
            if let Some(d) = &identity.deliverable_name {
                fields.push(d.as_str());
            }
            fields.extend(aliases);
            fields
        },
    }
}

fn exact_tier<'a>(universe: &'a [Identity], expr: &TargetExpr, needle: &str) -> (Tier, Vec<&'a Identity>) {
    let candidates: Vec<&Identity> = universe.iter().filter(|id| in_scope(id, expr.scope)).collect();

    let source_hits: Vec<&Identity> =
        candidates.iter().filter(|id| id.source_package.as_str() == needle).copied().collect();
    if !source_hits.is_empty() {
        return (Tier::ExactSource, source_hits);
    }

    let canonical_hits: Vec<&Identity> =
        candidates.iter().filter(|id| id.canonical_upstream.as_str() == needle).copied().collect();
    if !canonical_hits.is_empty() {
        return (Tier::ExactCanonical, canonical_hits);
    }

    let deliverable_hits: Vec<&Identity> = candidates
        .iter()
        .filter(|id| id.governed && id.deliverable_name.as_ref().map(Name::as_str) == Some(needle))
        .copied()
        .collect();
    if !deliverable_hits.is_empty() {
        return (Tier::ExactDeliverable, deliverable_hits);
    }

    let alias_hits: Vec<&Identity> =
        candidates.iter().filter(|id| id.aliases.iter().any(|a| a.as_str() == needle)).copied().collect();
    (Tier::ExactAlias, alias_hits)
}

/// Resolve a single target expression against `universe`. Returns the sole
/// match unless `allow_ambiguous`, in which case all matches in the winning
/// tier are returned.
pub fn resolve<'a>(
    universe: &'a [Identity],
    expr: &TargetExpr,
    allow_ambiguous: bool,
) -> Result<(Tier, Vec<&'a Identity>), ResolveError> {
    match &expr.mode {
        Mode::Exact(needle) => {
            let (tier, hits) = exact_tier(universe, expr, needle);
            if hits.is_empty() {
                return Err(ResolveError::NoMatch);
            }
            if hits.len() > 1 && !allow_ambiguous {
                return Err(ResolveError::Ambiguous(hits.len()));
            }
            Ok((tier, hits))
        },
        Mode::Prefix(needle) => {
            let hits: Vec<&Identity> = universe
                .iter()
                .filter(|id| in_scope(id, expr.scope))
                .filter(|id| field_for_scope(id, expr.scope).iter().any(|f| f.starts_with(needle.as_str())))
                .collect();
            if hits.is_empty() {
                return Err(ResolveError::NoMatch);
            }
            if hits.len() > 1 && !allow_ambiguous {
                return Err(ResolveError::Ambiguous(hits.len()));
            }
            Ok((Tier::Prefix, hits))
        },
        Mode::Substring(needle) => {
            let hits: Vec<&Identity> = universe
                .iter()
                .filter(|id| in_scope(id, expr.scope))
                .filter(|id| field_for_scope(id, expr.scope).iter().any(|f| f.contains(needle.as_str())))
                .collect();
            if hits.is_empty() {
                return Err(ResolveError::NoMatch);
            }
            if hits.len() > 1 && !allow_ambiguous {
                return Err(ResolveError::Ambiguous(hits.len()));
            }
            Ok((Tier::Substring, hits))
        },
    }
}

/// Advisory-only shell-expansion warning (spec §4.3). Returns a message when
/// several bare positional arguments look like an un-quoted glob the shell
/// already expanded.
pub fn detect_shell_expansion(args: &[String]) -> Option<String> {
    if args.len() < 2 {
        return None;
    }
    let none_special = args.iter().all(|a| !a.contains('^') && !a.contains('~') && !a.contains(':'));
    if !none_special {
        return None;
    }
    let first = args.first()?;
    let mut common_len = first.len();
    for arg in &args[1..] {
        common_len = first
            .chars()
            .zip(arg.chars())
            .take_while(|(a, b)| a == b)
            .count()
            .min(common_len);
    }
    if common_len >= 2 {
        Some(format!(
            "{} arguments share a common prefix of {} characters; did your shell expand a glob?",
            args.len(),
            common_len
        ))
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::{Kind, Origin};
    use std::collections::BTreeSet;

    fn id(source: &str, canonical: &str, alias: Option<&str>) -> Identity {
        Identity {
            source_package: Name::new(source),
            canonical_upstream: Name::new(canonical),
            deliverable_name: None,
            governed: false,
            kind: Kind::Unknown,
            aliases: alias.map(|a| BTreeSet::from([Name::new(a)])).unwrap_or_default(),
            origin: Origin::Heuristic,
        }
    }

    #[test]
    fn parses_all_grammar_forms() {
        assert_eq!(parse_target("foo").unwrap().mode, Mode::Exact("foo".into()));
        assert_eq!(parse_target("^foo").unwrap().mode, Mode::Prefix("foo".into()));
        assert_eq!(parse_target("~foo").unwrap().mode, Mode::Substring("foo".into()));
        assert_eq!(parse_target("foo*").unwrap().mode, Mode::Prefix("foo".into()));
        let scoped = parse_target("source:foo").unwrap();
        assert_eq!(scoped.scope, Some(Scope::Source));
        assert_eq!(scoped.mode, Mode::Exact("foo".into()));
    }

    #[test]
    fn s3_prefix_matches_alias_exactly_once() {
        let universe = vec![
            id("x-foo", "org/x-foo", Some("foo")),
            id("y-bar", "org/y-bar", None),
        ];
        let expr = parse_target("^foo").unwrap();
        let (tier, hits) = resolve(&universe, &expr, false).unwrap();
        assert_eq!(tier, Tier::Prefix);
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].source_package, Name::new("x-foo"));
    }

    #[test]
    fn exact_source_wins_over_exact_canonical() {
        let universe = vec![id("foo", "org/other", None), id("other", "org/foo-canon", None)];
        let expr = parse_target("foo").unwrap();
        let (tier, hits) = resolve(&universe, &expr, false).unwrap();
        assert_eq!(tier, Tier::ExactSource);
        assert_eq!(hits.len(), 1);
    }

    #[test]
    fn ambiguous_exact_tier_errors_without_opt_in() {
        let universe = vec![id("foo", "a", None), id("foo", "b", None)];
        // two identities sharing the same source name is degenerate but the
        // resolver must still surface ambiguity rather than silently pick one
        let expr = parse_target("foo").unwrap();
        assert!(matches!(resolve(&universe, &expr, false), Err(ResolveError::Ambiguous(2))));
        assert!(resolve(&universe, &expr, true).is_ok());
    }

    #[test]
    fn shell_expansion_warns_on_common_prefix() {
        let args = vec!["nova-common".to_string(), "nova-api".to_string()];
        assert!(detect_shell_expansion(&args).is_some());
    }

    #[test]
    fn shell_expansion_silent_with_explicit_operator() {
        let args = vec!["^nova-common".to_string(), "nova-api".to_string()];
        assert!(detect_shell_expansion(&args).is_none());
    }
}
