//! Shared paragraph/stanza reader for packaging-control files and archive
//! package lists (spec §4.2, §4.4, §6). Both formats are multi-paragraph,
//! key/value, RFC822-like text; paragraphs are separated by blank lines and
//! a field's value may continue on indented following lines.

use std::collections::HashMap;

/// One parsed paragraph: field name (as written) -> joined value.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Stanza {
    fields: HashMap<String, String>,
}

impl Stanza {
    pub fn get(&self, key: &str) -> Option<&str> {
        self.fields.get(key).map(String::as_str)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.fields.contains_key(key)
    }
}

/// Split `text` into stanzas separated by one or more blank lines. Within a
/// stanza, `Key: value` starts a field; a following line starting with
/// whitespace is a continuation of the previous field's value, joined with a
/// single space.
pub fn parse_stanzas(text: &str) -> Vec<Stanza> {
    let mut stanzas = Vec::new();
    let mut current = Stanza::default();
    let mut last_key: Option<String> = None;

    for line in text.lines() {
        if line.trim().is_empty() {
            if !current.fields.is_empty() {
                stanzas.push(std::mem::take(&mut current));
            }
            last_key = None;
            continue;
        }
        if (line.starts_with(' ') || line.starts_with('\t')) && last_key.is_some() {
            let key = last_key.clone().expect("checked above");
            let entry = current.fields.entry(key).or_default();
            if !entry.is_empty() {
                entry.push(' ');
            }
            entry.push_str(line.trim());
            continue;
        }
        if let Some((key, value)) = line.split_once(':') {
            let key = key.trim().to_string();
            current.fields.insert(key.clone(), value.trim().to_string());
            last_key = Some(key);
        }
        // Lines matching neither pattern are ignored (malformed input).
    }
    if !current.fields.is_empty() {
        stanzas.push(current);
    }
    stanzas
}

/// Split a comma-separated field value into trimmed, non-empty items.
pub fn split_commas(value: &str) -> Vec<String> {
    value.split(',').map(str::trim).filter(|s| !s.is_empty()).map(String::from).collect()
}

/// Strip a trailing `(version)` annotation sometimes present on a `Source:`
/// field, e.g. `Source: foo (1.2.3)` -> `foo`.
pub fn strip_version_suffix(value: &str) -> String {
    match value.find('(') {
        Some(idx) => value[..idx].trim().to_string(),
        None => value.trim().to_string(),
    }
}
