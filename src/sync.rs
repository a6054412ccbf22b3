//! Version-sync engine (spec §4.8). Merges upstream-declared dependency
//! constraints into the packaging-control declared dependencies, computing
//! additions and bumps. The "apply bumps" step generalizes the teacher's
//! `check_for_update`/`edit_each_dep` match-and-rewrite pattern in
//! commands/version.rs, rewriting `Constraint` values in place of
//! `toml_edit` table entries.

use std::collections::HashMap;

use crate::archive::ArchiveIndex;
use crate::identity::Name;
use crate::manifest::BuildManifest;
use crate::version::{Constraint, ParsedVersion, Relation, VersionString};

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct UpstreamDeclaration {
    pub project_name: String,
    /// Raw spec such as `>=8.0.0` or `==7.0.0`.
    pub version_spec: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VersionSource {
    Manifest,
    Lts,
    Dev,
    ParsedMinimum,
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct VersionBump {
    pub name: String,
    pub old: String,
    pub new: String,
    pub source: VersionSource,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct SyncResult {
    pub additions: Vec<Constraint>,
    pub version_bumps: Vec<VersionBump>,
    pub unresolved: Vec<String>,
    pub warnings: Vec<String>,
}

/// Maps an upstream project name to the native (Debian-style) package name
/// used in control files and the manifest, e.g. `oslo-config` ->
/// `python3-oslo.config`.
pub trait NameMapper: Send + Sync {
    fn native_name(&self, upstream_project: &str) -> Name;
}

/// Parse a `requirements.txt`-style upstream dependency list (spec §4.8
/// input), grounded on `original_source/src/packastack/planning/deploop.py`'s
/// `parse_requirements_txt`: one `name constraint` pair per non-blank,
/// non-comment line; `-r`/`-c`/`-e`/`-f`/`--` directive lines are skipped.
pub fn parse_requirements_txt(text: &str) -> Vec<UpstreamDeclaration> {
    let name_re = regex::Regex::new(r"^([a-zA-Z0-9_.\-]+)\s*(.*)$").expect("static pattern");
    let mut declarations = Vec::new();
    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        if line.starts_with("-r")
            || line.starts_with("-c")
            || line.starts_with("-e")
            || line.starts_with("-f")
            || line.starts_with("--")
        {
            continue;
        }
        if let Some(caps) = name_re.captures(line) {
            let project_name = caps.get(1).map(|m| m.as_str().to_string()).unwrap_or_default();
            let version_spec = caps.get(2).map(|m| m.as_str().trim().to_string()).unwrap_or_default();
            declarations.push(UpstreamDeclaration { project_name, version_spec });
        }
    }
    declarations
}

fn parse_spec_minimum(spec: &str) -> Option<String> {
    let spec = spec.trim();
    for prefix in [">=", "=="] {
        if let Some(rest) = spec.strip_prefix(prefix) {
            return Some(rest.trim().to_string());
        }
    }
    None
}

fn resolve_declared_version(
    declaration: &UpstreamDeclaration,
    native_name: &Name,
    manifest: Option<&BuildManifest>,
    prev_lts: Option<&ArchiveIndex>,
    dev: Option<&ArchiveIndex>,
) -> Option<(String, VersionSource)> {
    if let Some(manifest) = manifest {
        if let Some(version) = manifest.packages.get(native_name) {
            return Some((version.upstream_version.clone(), VersionSource::Manifest));
        }
    }
    if let Some(index) = prev_lts {
        if let Some(record) = index.find_package(native_name) {
            return Some((ParsedVersion::parse(record.version.as_str()).upstream, VersionSource::Lts));
        }
    }
    if let Some(index) = dev {
        if let Some(record) = index.find_package(native_name) {
            return Some((ParsedVersion::parse(record.version.as_str()).upstream, VersionSource::Dev));
        }
    }
    parse_spec_minimum(&declaration.version_spec).map(|v| (v, VersionSource::ParsedMinimum))
}

/// Resolution order per spec §4.8: manifest, then prior-LTS/dev index, then
/// the parsed minimum from the upstream spec, finally unresolved.
pub fn synchronize(
    declarations: &[UpstreamDeclaration],
    existing: &[Constraint],
    mapper: &dyn NameMapper,
    manifest: Option<&BuildManifest>,
    prev_lts: Option<&ArchiveIndex>,
    dev: Option<&ArchiveIndex>,
) -> SyncResult {
    let mut result = SyncResult::default();
    let existing_by_name: HashMap<&str, &Constraint> =
        existing.iter().map(|c| (c.name.as_str(), c)).collect();

    for declaration in declarations {
        let native_name = mapper.native_name(&declaration.project_name);
        let Some((resolved_version, source)) =
            resolve_declared_version(declaration, &native_name, manifest, prev_lts, dev)
        else {
            result.unresolved.push(declaration.project_name.clone());
            continue;
        };

        match existing_by_name.get(native_name.as_str()) {
            None => {
                result.additions.push(Constraint {
                    name: native_name.as_str().to_string(),
                    relation: Relation::Ge,
                    version: Some(VersionString::new(resolved_version)),
                    arch_qualifiers: Vec::new(),
                    alternatives: Vec::new(),
                });
            },
            Some(existing_constraint) => {
                let current = existing_constraint.version.as_ref().map(|v| v.as_str().to_string());
                if current.as_deref() != Some(resolved_version.as_str())
                    && current.as_deref().map(|c| c < resolved_version.as_str()).unwrap_or(true)
                {
                    result.version_bumps.push(VersionBump {
                        name: native_name.as_str().to_string(),
                        old: current.unwrap_or_default(),
                        new: resolved_version,
                        source,
                    });
                }
            },
        }
    }

    result
}

/// Pure rewrite: replace each matched name's entry with a new `>=` entry at
/// the resolved version, preserving arch qualifiers and alternatives.
pub fn apply_bumps(existing: &[Constraint], bumps: &[VersionBump]) -> Vec<Constraint> {
    let bump_by_name: HashMap<&str, &VersionBump> = bumps.iter().map(|b| (b.name.as_str(), b)).collect();
    existing
        .iter()
        .map(|constraint| match bump_by_name.get(constraint.name.as_str()) {
            Some(bump) => Constraint {
                name: constraint.name.clone(),
                relation: Relation::Ge,
                version: Some(VersionString::new(bump.new.clone())),
                arch_qualifiers: constraint.arch_qualifiers.clone(),
                alternatives: constraint.alternatives.clone(),
            },
            None => constraint.clone(),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::version::LexicographicComparator;

    struct DirectMapper;
    impl NameMapper for DirectMapper {
        fn native_name(&self, upstream_project: &str) -> Name {
            match upstream_project {
                "oslo-config" => Name::new("python3-oslo.config"),
                other => Name::new(other),
            }
        }
    }

    #[test]
    fn s5_version_sync_bump() {
        let declarations =
            vec![UpstreamDeclaration { project_name: "oslo-config".to_string(), version_spec: ">=8.0.0".to_string() }];
        let existing = vec![Constraint {
            name: "python3-oslo.config".to_string(),
            relation: Relation::Ge,
            version: Some(VersionString::new("7.0.0")),
            arch_qualifiers: Vec::new(),
            alternatives: Vec::new(),
        }];

        let mut dev_index = ArchiveIndex::new();
        dev_index.load_text(
            "Package: python3-oslo.config\nVersion: 8.0.0-0ubuntu1\n",
            &LexicographicComparator,
        );

        let result = synchronize(&declarations, &existing, &DirectMapper, None, Some(&dev_index), None);
        assert_eq!(result.version_bumps.len(), 1);
        assert_eq!(result.version_bumps[0].old, "7.0.0");
        assert_eq!(result.version_bumps[0].new, "8.0.0");
        assert_eq!(result.version_bumps[0].source, VersionSource::Lts);

        let rewritten = apply_bumps(&existing, &result.version_bumps);
        assert_eq!(rewritten[0].version.as_ref().unwrap().as_str(), "8.0.0");
        assert_eq!(rewritten[0].relation, Relation::Ge);
    }

    #[test]
    fn p8_sync_idempotence() {
        let declarations =
            vec![UpstreamDeclaration { project_name: "foo".to_string(), version_spec: ">=1.0".to_string() }];
        let existing = Vec::new();
        let mut dev_index = ArchiveIndex::new();
        dev_index.load_text("Package: foo\nVersion: 1.0\n", &LexicographicComparator);

        let first = synchronize(&declarations, &existing, &DirectMapper, None, Some(&dev_index), None);
        let applied_existing: Vec<Constraint> = first.additions.clone();
        let second = synchronize(&declarations, &applied_existing, &DirectMapper, None, Some(&dev_index), None);
        assert!(second.additions.is_empty());
        assert!(second.version_bumps.is_empty());
    }

    #[test]
    fn requirements_txt_skips_comments_and_directives() {
        let text = "# top comment\n-r base.txt\noslo.config>=8.0.0\n\npbr\n";
        let declarations = parse_requirements_txt(text);
        assert_eq!(declarations.len(), 2);
        assert_eq!(declarations[0].project_name, "oslo.config");
        assert_eq!(declarations[0].version_spec, ">=8.0.0");
        assert_eq!(declarations[1].project_name, "pbr");
        assert_eq!(declarations[1].version_spec, "");
    }

    #[test]
    fn unresolved_when_no_source_available() {
        let declarations =
            vec![UpstreamDeclaration { project_name: "ghost".to_string(), version_spec: "latest".to_string() }];
        let result = synchronize(&declarations, &[], &DirectMapper, None, None, None);
        assert_eq!(result.unresolved, vec!["ghost".to_string()]);
    }
}
