//! Archive index (spec §4.2). Builds an in-memory index from a sequence of
//! compressed package-list streams. Fully in-core; see SPEC_FULL.md §1 for
//! why this does not contradict the "archive-index parsing" OUT OF SCOPE
//! bullet in spec.md §1 (that bullet means native apt_pkg/libapt
//! integration, which this module never uses).

use std::collections::HashMap;
use std::io::Read;

use flate2::read::GzDecoder;

use crate::control::{parse_stanzas, split_commas, strip_version_suffix};
use crate::identity::Name;
use crate::version::{parse_dependency_field, Constraint, VersionComparator, VersionString};

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Component {
    Main,
    Universe,
    Other,
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct BinaryRecord {
    pub name: Name,
    pub version: VersionString,
    pub architecture: String,
    pub source_name: Name,
    pub depends: Vec<Constraint>,
    pub pre_depends: Vec<Constraint>,
    pub provides: Vec<Name>,
    pub component: Component,
    pub pocket: Name,
}

#[derive(Debug, Default)]
pub struct ArchiveIndex {
    by_name: HashMap<Name, BinaryRecord>,
    by_source: HashMap<Name, Vec<Name>>,
    by_virtual: HashMap<Name, Vec<Name>>,
}

impl ArchiveIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a single gzip-compressed package-list stream and fold its
    /// records into this index (keep-highest-version on collision).
    pub fn load_compressed(
        &mut self,
        gz_bytes: &[u8],
        comparator: &dyn VersionComparator,
    ) -> std::io::Result<()> {
        let mut decoder = GzDecoder::new(gz_bytes);
        let mut text = String::new();
        decoder.read_to_string(&mut text)?;
        self.load_text(&text, comparator);
        Ok(())
    }

    /// Parse already-decompressed package-list text.
    pub fn load_text(&mut self, text: &str, comparator: &dyn VersionComparator) {
        for stanza in parse_stanzas(text) {
            let Some(package) = stanza.get("Package") else {
                continue; // reject stanzas missing `Package`
            };
            let name = Name::new(package);
            let source_name = stanza
                .get("Source")
                .map(strip_version_suffix)
                .map(Name::new)
                .unwrap_or_else(|| name.clone());
            let version = VersionString::new(stanza.get("Version").unwrap_or_default());
            let architecture = stanza.get("Architecture").unwrap_or("all").to_string();
            let depends = stanza
                .get("Depends")
                .map(parse_dependency_field)
                .unwrap_or_default();
            let pre_depends = stanza
                .get("Pre-Depends")
                .map(parse_dependency_field)
                .unwrap_or_default();
            let provides = stanza
                .get("Provides")
                .map(split_commas)
                .unwrap_or_default()
                .into_iter()
                .map(Name::new)
                .collect::<Vec<_>>();
            let component = match stanza.get("Section").map(|s| s.split('/').next().unwrap_or(s)) {
                Some("universe") => Component::Universe,
                Some("main") | None => Component::Main,
                Some(_) => Component::Other,
            };
            let pocket = Name::new(stanza.get("Pocket").unwrap_or("release"));

            let record = BinaryRecord {
                name: name.clone(),
                version,
                architecture,
                source_name,
                depends,
                pre_depends,
                provides,
                component,
                pocket,
            };
            self.add(record, comparator);
        }
    }

    fn add(&mut self, record: BinaryRecord, comparator: &dyn VersionComparator) {
        let keep = match self.by_name.get(&record.name) {
            Some(existing) => comparator.compare(&record.version, &existing.version).is_gt(),
            None => true,
        };
        if !keep {
            return;
        }

        self.by_source.entry(record.source_name.clone()).or_default();
        if let Some(names) = self.by_source.get_mut(&record.source_name) {
            if !names.contains(&record.name) {
                names.push(record.name.clone());
            }
        }
        for provided in &record.provides {
            let list = self.by_virtual.entry(provided.clone()).or_default();
            if !list.contains(&record.name) {
                list.push(record.name.clone());
            }
        }

        self.by_name.insert(record.name.clone(), record);
    }

    /// Return the matching real package, or the first real provider of the
    /// virtual name in insertion order, per spec §4.2.
    pub fn find_package(&self, name: &Name) -> Option<&BinaryRecord> {
        if let Some(record) = self.by_name.get(name) {
            return Some(record);
        }
        let providers = self.by_virtual.get(name)?;
        let first = providers.first()?;
        self.by_name.get(first)
    }

    pub fn get_binaries_for_source(&self, source: &Name) -> &[Name] {
        self.by_source.get(source).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn component_of(&self, name: &Name) -> Option<Component> {
        self.find_package(name).map(|r| r.component)
    }

    pub fn len(&self) -> usize {
        self.by_name.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_name.is_empty()
    }
}
