use std::collections::HashMap;
use std::sync::{Arc, LazyLock};

use moka::Entry;
use moka::sync::Cache;
use regex::Regex;
use tracing::debug;

use crate::error::{Error, Result};

/// Compiled matcher per placeholder key, shared by every concurrent fill.
///
/// Entries are built by the first caller that needs a key and never evicted.
static PATTERNS: LazyLock<Cache<String, Regex>> = LazyLock::new(|| Cache::builder().build());

/// Look up the matcher of `key`, compiling it if no caller has yet.
///
/// The returned entry is fresh only for the call that compiled it.
fn cached_pattern(key: &str) -> std::result::Result<Entry<String, Regex>, Arc<regex::Error>> {
    PATTERNS.entry_by_ref(key).or_try_insert_with(|| {
        debug!("Compiling placeholder pattern for {}", key);
        Regex::new(&format!(r"\{{\{{[ \t]*{}[ \t]*\}}\}}", regex::escape(key)))
    })
}

fn pattern_for(key: &str) -> std::result::Result<Regex, Arc<regex::Error>> {
    cached_pattern(key).map(Entry::into_value)
}

/// Number of compiled placeholder patterns held process-wide.
pub fn cached_pattern_count() -> u64 {
    PATTERNS.run_pending_tasks();
    PATTERNS.entry_count()
}

/// Replacement values keyed by placeholder identifier.
///
/// Keys are case-sensitive and may be given as `name` or `{{name}}`.
/// Values may contain line breaks; `\r\n` and `\r` are stored as `\n`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PlaceholderMap {
    values: HashMap<String, String>,
}

impl PlaceholderMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: impl AsRef<str>, value: impl AsRef<str>) -> Option<String> {
        let value = value.as_ref().replace("\r\n", "\n").replace('\r', "\n");
        self.values.insert(normalize_key(key.as_ref()), value)
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(&normalize_key(key)).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Resolve the cached matcher of every key.
    pub(crate) fn compile(&self) -> Result<Placeholders<'_>> {
        let entries = self
            .values
            .iter()
            .filter(|(key, _)| !key.is_empty())
            .map(|(key, value)| {
                pattern_for(key)
                    .map(|pattern| (pattern, value.as_str()))
                    .map_err(|e| Error::TemplatePackage(format!("placeholder {key}: {e}")))
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Placeholders { entries })
    }
}

impl<K: AsRef<str>, V: AsRef<str>> FromIterator<(K, V)> for PlaceholderMap {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut map = Self::new();
        for (key, value) in iter {
            map.insert(key, value);
        }
        map
    }
}

fn normalize_key(key: &str) -> String {
    let trimmed = key.trim();
    trimmed
        .strip_prefix("{{")
        .and_then(|inner| inner.strip_suffix("}}"))
        .map_or(trimmed, str::trim)
        .to_string()
}

/// A located placeholder and the value replacing it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Match<'m> {
    pub start: usize,
    pub end: usize,
    pub value: &'m str,
}

/// Matchers for one fill call.
#[derive(Debug)]
pub(crate) struct Placeholders<'m> {
    entries: Vec<(Regex, &'m str)>,
}

impl<'m> Placeholders<'m> {
    /// Leftmost placeholder starting at or after `from`; ties go to the longer match.
    pub fn find_at(&self, text: &str, from: usize) -> Option<Match<'m>> {
        if from >= text.len() || !text[from..].contains("{{") {
            return None;
        }
        self.entries
            .iter()
            .filter_map(|(pattern, value)| {
                pattern.find_at(text, from).map(|m| Match {
                    start: m.start(),
                    end: m.end(),
                    value,
                })
            })
            .min_by(|a, b| a.start.cmp(&b.start).then(b.end.cmp(&a.end)))
    }
}
