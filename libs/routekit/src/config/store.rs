//! Layered, case-insensitive configuration store.
//!
//! Readers work on immutable snapshots; writers clone the current snapshot,
//! mutate the copy, rebuild its lookup table and swap it in. A failed mutation
//! therefore never leaves a half-applied state behind.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use arc_swap::ArcSwap;
use parking_lot::{Condvar, Mutex};

use super::error::ConfigError;
use super::same_name;
use super::parser::{self, ParsedSection};
use super::value::ConfigValue;
use crate::resolver::KeyProvider;

/// Keys starting with this marker carry construction metadata (`__class`, `__shared`).
pub const META_PREFIX: &str = "__";

#[derive(Debug, Clone)]
struct Entry {
    key: String,
    raw: String,
    value: ConfigValue,
}

impl Entry {
    fn new(key: String, raw: String) -> Self {
        let value = ConfigValue::parse(&raw);
        Self { key, raw, value }
    }
}

#[derive(Debug, Clone)]
struct Section {
    name: String,
    entries: Vec<Entry>,
}

/// One merged source, remembered so it can be removed again.
#[derive(Debug, Clone)]
struct Source {
    name: String,
    sections: Vec<ParsedSection>,
}

#[derive(Debug, Clone, Default)]
struct State {
    sections: Vec<Section>,
    sources: Vec<Source>,
    /// lower(section) -> section position
    section_lookup: HashMap<String, usize>,
    /// (lower(section), lower(key)) -> (section position, entry position)
    key_lookup: HashMap<(String, String), (usize, usize)>,
}

impl State {
    fn rebuild_lookup(&mut self) {
        self.section_lookup.clear();
        self.key_lookup.clear();
        for (si, section) in self.sections.iter().enumerate() {
            let section_lc = section.name.to_lowercase();
            for (ei, entry) in section.entries.iter().enumerate() {
                self.key_lookup
                    .insert((section_lc.clone(), entry.key.to_lowercase()), (si, ei));
            }
            self.section_lookup.insert(section_lc, si);
        }
    }

    fn section(&self, name: &str) -> Option<&Section> {
        self.section_lookup
            .get(&name.to_lowercase())
            .and_then(|&si| self.sections.get(si))
    }

    fn entry(&self, key: &str, section: &str) -> Option<&Entry> {
        self.key_lookup
            .get(&(section.to_lowercase(), key.to_lowercase()))
            .and_then(|&(si, ei)| self.sections.get(si)?.entries.get(ei))
    }

    fn section_mut_or_insert(&mut self, name: &str) -> &mut Section {
        let pos = match self
            .sections
            .iter()
            .position(|s| same_name(&s.name, name))
        {
            Some(pos) => pos,
            None => {
                self.sections.push(Section {
                    name: name.to_string(),
                    entries: Vec::new(),
                });
                self.sections.len() - 1
            }
        };
        &mut self.sections[pos]
    }

    fn upsert(&mut self, section: &str, key: &str, raw: &str) {
        let section = self.section_mut_or_insert(section);
        match section
            .entries
            .iter_mut()
            .find(|e| same_name(&e.key, key))
        {
            Some(entry) => *entry = Entry::new(entry.key.clone(), raw.to_string()),
            None => section
                .entries
                .push(Entry::new(key.to_string(), raw.to_string())),
        }
    }

    fn merge(&mut self, sections: &[ParsedSection]) {
        for parsed in sections {
            if parsed.entries.is_empty() {
                self.section_mut_or_insert(&parsed.name);
            }
            for (key, raw) in &parsed.entries {
                self.upsert(&parsed.name, key, raw);
            }
        }
    }
}

/// Process-wide configuration: named sections of `key = value` pairs merged
/// from several sources, last writer wins.
pub struct Configuration {
    state: ArcSwap<State>,
    /// Serialises writers; holds the mutation generation.
    writer: Mutex<u64>,
    changed: Condvar,
}

impl Default for Configuration {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Configuration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.load();
        f.debug_struct("Configuration")
            .field(
                "sources",
                &state.sources.iter().map(|s| &s.name).collect::<Vec<_>>(),
            )
            .field(
                "sections",
                &state.sections.iter().map(|s| &s.name).collect::<Vec<_>>(),
            )
            .finish()
    }
}

impl Configuration {
    pub fn new() -> Self {
        Self {
            state: ArcSwap::from_pointee(State::default()),
            writer: Mutex::new(0),
            changed: Condvar::new(),
        }
    }

    /// A configuration pre-loaded with the built-in component defaults.
    pub fn with_defaults() -> Result<Self, ConfigError> {
        let cfg = Self::new();
        cfg.add_configuration_str(super::DEFAULTS_SOURCE, super::DEFAULT_CONFIGURATION)?;
        Ok(cfg)
    }

    /// Run `op` against a private copy of the state and publish it on success.
    fn mutate<T>(
        &self,
        op: &'static str,
        f: impl FnOnce(&mut State) -> Result<T, ConfigError>,
    ) -> Result<T, ConfigError> {
        let mut generation = self.writer.lock();
        let mut next = State::clone(&self.state.load());
        let out = f(&mut next)?;
        next.rebuild_lookup();
        self.state.store(Arc::new(next));
        *generation += 1;
        self.changed.notify_all();
        tracing::debug!(op, generation = *generation, "configuration updated");
        Ok(out)
    }

    /// Read a configuration file and merge it over the current state.
    pub fn add_configuration(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let path = path.as_ref();
        if !path.is_file() {
            return Err(ConfigError::SourceNotFound(path.display().to_string()));
        }
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        self.add_configuration_str(&path.display().to_string(), &text)
    }

    /// Merge an in-memory source. Re-adding a name replaces its record.
    pub fn add_configuration_str(&self, name: &str, text: &str) -> Result<(), ConfigError> {
        let sections = parser::parse(text).map_err(|e| ConfigError::Parse {
            source_name: name.to_string(),
            line: e.line,
            message: e.message,
        })?;
        self.mutate("add_configuration", |state| {
            state.merge(&sections);
            state.sources.retain(|s| s.name != name);
            state.sources.push(Source {
                name: name.to_string(),
                sections,
            });
            Ok(())
        })?;
        tracing::info!(source = name, "configuration source merged");
        Ok(())
    }

    /// Remove what `name` contributed, keeping entries a later source overrode.
    pub fn remove_configuration(&self, name: &str) -> Result<(), ConfigError> {
        self.mutate("remove_configuration", |state| {
            let pos = state
                .sources
                .iter()
                .position(|s| s.name == name)
                .ok_or_else(|| ConfigError::SourceNotFound(name.to_string()))?;
            let source = state.sources.remove(pos);
            for parsed in &source.sections {
                let Some(section) = state
                    .sections
                    .iter_mut()
                    .find(|s| same_name(&s.name, &parsed.name))
                else {
                    continue;
                };
                section.entries.retain(|entry| {
                    !parsed
                        .entries
                        .iter()
                        .any(|(k, raw)| same_name(k, &entry.key) && *raw == entry.raw)
                });
            }
            state.sections.retain(|section| {
                !section.entries.is_empty()
                    || !source
                        .sections
                        .iter()
                        .any(|p| same_name(&p.name, &section.name))
            });
            Ok(())
        })
    }

    /// Write the merged state to `path` in the same text format.
    pub fn save_configuration(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let path = path.as_ref();
        let state = self.state.load();
        let text = parser::render(state.sections.iter().map(|s| {
            (
                s.name.as_str(),
                s.entries.iter().map(|e| (e.key.as_str(), e.raw.as_str())),
            )
        }));
        std::fs::write(path, text).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        tracing::debug!(path = %path.display(), "configuration saved");
        Ok(())
    }

    pub fn has_section(&self, name: &str) -> bool {
        self.state.load().section(name).is_some()
    }

    pub fn has_value(&self, key: &str, section: &str) -> bool {
        self.state.load().entry(key, section).is_some()
    }

    /// Typed value of `key` in `section`.
    pub fn get_value(&self, key: &str, section: &str) -> Result<ConfigValue, ConfigError> {
        self.state
            .load()
            .entry(key, section)
            .map(|e| e.value.clone())
            .ok_or_else(|| ConfigError::KeyNotFound {
                section: section.to_string(),
                key: key.to_string(),
            })
    }

    /// Raw text of `key` in `section`.
    pub fn get_raw(&self, key: &str, section: &str) -> Result<String, ConfigError> {
        self.state
            .load()
            .entry(key, section)
            .map(|e| e.raw.clone())
            .ok_or_else(|| ConfigError::KeyNotFound {
                section: section.to_string(),
                key: key.to_string(),
            })
    }

    /// Typed entries of a section; `__`-prefixed keys only with `include_meta`.
    pub fn get_section(
        &self,
        name: &str,
        include_meta: bool,
    ) -> Result<Vec<(String, ConfigValue)>, ConfigError> {
        let state = self.state.load();
        let section = state
            .section(name)
            .ok_or_else(|| ConfigError::SectionNotFound(name.to_string()))?;
        Ok(section
            .entries
            .iter()
            .filter(|e| include_meta || !e.key.starts_with(META_PREFIX))
            .map(|e| (e.key.clone(), e.value.clone()))
            .collect())
    }

    /// Raw entries of a section, metadata included.
    pub fn get_section_raw(&self, name: &str) -> Result<Vec<(String, String)>, ConfigError> {
        let state = self.state.load();
        let section = state
            .section(name)
            .ok_or_else(|| ConfigError::SectionNotFound(name.to_string()))?;
        Ok(section
            .entries
            .iter()
            .map(|e| (e.key.clone(), e.raw.clone()))
            .collect())
    }

    /// Set `key` in `section`, creating the section when needed.
    pub fn set_value(&self, key: &str, section: &str, raw: &str) -> Result<(), ConfigError> {
        validate_name(section)?;
        validate_name(key)?;
        if raw.contains('\n') && !raw.trim_start().starts_with('[') {
            return Err(ConfigError::InvalidEntry(format!("{key} = {raw}")));
        }
        self.mutate("set_value", |state| {
            state.upsert(section, key, raw);
            Ok(())
        })
    }

    pub fn remove_key(&self, key: &str, section: &str) -> Result<(), ConfigError> {
        self.mutate("remove_key", |state| {
            let &(si, ei) = state
                .key_lookup
                .get(&(section.to_lowercase(), key.to_lowercase()))
                .ok_or_else(|| ConfigError::KeyNotFound {
                    section: section.to_string(),
                    key: key.to_string(),
                })?;
            state.sections[si].entries.remove(ei);
            Ok(())
        })
    }

    pub fn remove_section(&self, name: &str) -> Result<(), ConfigError> {
        self.mutate("remove_section", |state| {
            let &si = state
                .section_lookup
                .get(&name.to_lowercase())
                .ok_or_else(|| ConfigError::SectionNotFound(name.to_string()))?;
            state.sections.remove(si);
            Ok(())
        })
    }

    /// Section names in merge order, original casing.
    pub fn sections(&self) -> Vec<String> {
        self.state
            .load()
            .sections
            .iter()
            .map(|s| s.name.clone())
            .collect()
    }

    pub fn keys(&self, section: &str) -> Result<Vec<String>, ConfigError> {
        let state = self.state.load();
        let section = state
            .section(section)
            .ok_or_else(|| ConfigError::SectionNotFound(section.to_string()))?;
        Ok(section.entries.iter().map(|e| e.key.clone()).collect())
    }

    /// Names of merged sources in the order they were added.
    pub fn configurations(&self) -> Vec<String> {
        self.state
            .load()
            .sources
            .iter()
            .map(|s| s.name.clone())
            .collect()
    }

    /// Number of successful mutations so far.
    pub fn generation(&self) -> u64 {
        *self.writer.lock()
    }

    /// Block until the generation moves past `since` or `timeout` elapses.
    /// Returns the generation observed last.
    pub fn wait_for_change(&self, since: u64, timeout: Duration) -> u64 {
        // No deadline when the timeout does not fit in an `Instant`.
        let deadline = Instant::now().checked_add(timeout);
        let mut generation = self.writer.lock();
        while *generation <= since {
            match deadline {
                Some(deadline) => {
                    if self
                        .changed
                        .wait_until(&mut generation, deadline)
                        .timed_out()
                    {
                        break;
                    }
                }
                None => self.changed.wait(&mut generation),
            }
        }
        *generation
    }

    /// A consistent view of one section for key resolution.
    pub fn section_keys(&self, section: &str) -> SectionKeys {
        SectionKeys {
            state: self.state.load_full(),
            section: section.to_lowercase(),
        }
    }
}

fn validate_name(name: &str) -> Result<(), ConfigError> {
    let bad = name.trim().is_empty()
        || name.contains(['\n', '\r', '=', '[', ']'])
        || name.starts_with([';', '#']);
    if bad {
        return Err(ConfigError::InvalidName(name.to_string()));
    }
    Ok(())
}

/// Snapshot of one section used as a key space by the resolver.
pub struct SectionKeys {
    state: Arc<State>,
    section: String,
}

impl SectionKeys {
    pub fn raw(&self, key: &str) -> Option<&str> {
        self.state
            .entry(key, &self.section)
            .map(|e| e.raw.as_str())
    }
}

impl KeyProvider for SectionKeys {
    fn contains_key(&self, key: &str) -> bool {
        self.state
            .key_lookup
            .contains_key(&(self.section.clone(), key.to_lowercase()))
    }
}
