//! Universe assembly (spec §4.3 "Universe"). Merges explicit registry
//! entries, local packaging repositories, and heuristically-inferred
//! identities into one candidate list for the target resolver — the same
//! "merge several lightly-structured sources into one candidate list"
//! pattern the teacher's `cli::run` uses to assemble a cargo `Workspace`
//! from on-disk crate manifests.

use std::collections::{BTreeSet, HashMap};
use std::path::Path;

use toml_edit::Document;

use crate::error::{CoreError, FailureKind};
use crate::identity::{infer_kind, Identity, Kind, Name, Origin};

fn parse_kind(s: &str) -> Kind {
    match s {
        "service" => Kind::Service,
        "client" => Kind::Client,
        "library" => Kind::Library,
        _ => Kind::Unknown,
    }
}

/// Explicit registry entries declared in `<workspace>/registry.toml` (spec
/// §4.3 "explicit registry entries"). A missing file is an empty universe
/// contribution, not an error — only a malformed one is `REGISTRY_ERROR`.
pub fn load_registry_file(path: &Path) -> Result<Vec<Identity>, CoreError> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let text = std::fs::read_to_string(path)
        .map_err(|e| CoreError::new(FailureKind::RegistryError, format!("reading registry file: {e}")))?;
    let doc: Document =
        text.parse().map_err(|e: toml_edit::TomlError| CoreError::new(FailureKind::RegistryError, e.to_string()))?;

    let Some(entries) = doc.get("entry").and_then(|i| i.as_array_of_tables()) else {
        return Ok(Vec::new());
    };

    let mut identities = Vec::new();
    for table in entries.iter() {
        let Some(source_package) = table.get("source_package").and_then(|i| i.as_str()) else {
            return Err(CoreError::new(FailureKind::RegistryError, "registry entry missing source_package"));
        };
        let canonical_upstream = table.get("canonical_upstream").and_then(|i| i.as_str()).unwrap_or(source_package);
        let deliverable_name = table.get("deliverable_name").and_then(|i| i.as_str()).map(Name::new);
        let governed = table.get("governed").and_then(|i| i.as_bool()).unwrap_or(true);
        let kind = table
            .get("kind")
            .and_then(|i| i.as_str())
            .map(parse_kind)
            .unwrap_or_else(|| infer_kind(&Name::new(canonical_upstream)));
        let aliases: BTreeSet<Name> = table
            .get("aliases")
            .and_then(|i| i.as_array())
            .map(|arr| arr.iter().filter_map(|v| v.as_str()).map(Name::new).collect())
            .unwrap_or_default();

        identities.push(Identity {
            source_package: Name::new(source_package),
            canonical_upstream: Name::new(canonical_upstream),
            deliverable_name,
            governed,
            kind,
            aliases,
            origin: Origin::Registry,
        });
    }
    Ok(identities)
}

/// Local packaging repositories (spec §4.3): one `Identity` per subdirectory
/// of `repo_cache_root`, named after the directory itself. Absence of the
/// directory contributes nothing rather than failing — it just means no
/// package has been fetched into the cache yet.
pub fn local_repo_identities(repo_cache_root: &Path) -> Vec<Identity> {
    let Ok(entries) = std::fs::read_dir(repo_cache_root) else { return Vec::new() };
    let mut identities = Vec::new();
    for entry in entries.flatten() {
        if !entry.path().is_dir() {
            continue;
        }
        let Some(name) = entry.file_name().to_str().map(Name::new) else { continue };
        let mut identity = Identity::new(name.clone(), name);
        identity.origin = Origin::Local;
        identities.push(identity);
    }
    identities
}

fn origin_rank(origin: Origin) -> u8 {
    match origin {
        Origin::Registry => 0,
        Origin::Releases => 1,
        Origin::Local => 2,
        Origin::Heuristic => 3,
    }
}

/// Merge explicit registry entries, local packaging repos, and
/// heuristically-inferred identities into one universe. On a
/// `source_package` collision the most authoritative origin wins: registry
/// over releases over local over heuristic (spec §4.3).
pub fn assemble_universe(
    registry_entries: Vec<Identity>,
    local_entries: Vec<Identity>,
    heuristic_entries: Vec<Identity>,
) -> Vec<Identity> {
    let mut by_source: HashMap<Name, Identity> = HashMap::new();
    for identity in registry_entries.into_iter().chain(local_entries).chain(heuristic_entries) {
        match by_source.get(&identity.source_package) {
            Some(existing) if origin_rank(existing.origin) <= origin_rank(identity.origin) => continue,
            _ => {
                by_source.insert(identity.source_package.clone(), identity);
            },
        }
    }
    let mut universe: Vec<Identity> = by_source.into_values().collect();
    universe.sort_by(|a, b| a.source_package.cmp(&b.source_package));
    universe
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_file_parses_explicit_entries() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("registry.toml");
        std::fs::write(
            &path,
            r#"
[[entry]]
source_package = "nova"
canonical_upstream = "openstack/nova"
deliverable_name = "nova"
governed = true
kind = "service"
aliases = ["compute"]
"#,
        )
        .unwrap();

        let identities = load_registry_file(&path).unwrap();
        assert_eq!(identities.len(), 1);
        assert_eq!(identities[0].source_package, Name::new("nova"));
        assert_eq!(identities[0].origin, Origin::Registry);
        assert!(identities[0].aliases.contains(&Name::new("compute")));
    }

    #[test]
    fn missing_registry_file_is_empty_not_an_error() {
        let identities = load_registry_file(Path::new("/nonexistent/registry.toml")).unwrap();
        assert!(identities.is_empty());
    }

    #[test]
    fn registry_entries_outrank_local_on_conflict() {
        let mut registry = Identity::new("nova", "openstack/nova");
        registry.origin = Origin::Registry;
        let mut local = Identity::new("nova", "openstack/nova");
        local.origin = Origin::Local;

        let universe = assemble_universe(vec![registry], vec![local], Vec::new());
        assert_eq!(universe.len(), 1);
        assert_eq!(universe[0].origin, Origin::Registry);
    }
}
