//! Flag values threaded down the phase tree.

use std::collections::BTreeMap;

/// A flag owned by a phase, visible to the phase and to descendants that
/// inherit it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalFlag {
    pub name: String,
    pub default: String,
}

/// Named flag values, ordered by name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FlagSet {
    values: BTreeMap<String, String>,
}

impl FlagSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert.
    #[must_use]
    pub fn with(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.insert(name, value);
        self
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.values.insert(name.into(), value.into());
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.values.get(name).map(String::as_str)
    }

    /// Boolean view of a flag. Absent or unparsable values read as false.
    pub fn get_bool(&self, name: &str) -> bool {
        self.get(name)
            .is_some_and(|v| v.trim().eq_ignore_ascii_case("true"))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.values.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Subset of this set containing only the given names.
    #[must_use]
    pub fn restrict<S: AsRef<str>>(&self, names: &[S]) -> Self {
        names
            .iter()
            .filter_map(|n| {
                self.values
                    .get_key_value(n.as_ref())
                    .map(|(k, v)| (k.clone(), v.clone()))
            })
            .collect()
    }

    /// Values from `other` replace values with the same name.
    #[must_use]
    pub fn overlay(mut self, other: &Self) -> Self {
        for (k, v) in &other.values {
            self.values.insert(k.clone(), v.clone());
        }
        self
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for FlagSet {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            values: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}

/// Values of a phase's local flags: the command-line value when one was
/// supplied, otherwise the declared default.
pub(crate) fn local_values(locals: &[LocalFlag], supplied: &FlagSet) -> FlagSet {
    locals
        .iter()
        .map(|f| {
            let value = supplied.get(&f.name).unwrap_or(f.default.as_str()).to_string();
            (f.name.clone(), value)
        })
        .collect()
}

/// Effective flags of a phase: what its ancestors provide, restricted to the
/// flags it inherits, plus its own local flags.
pub(crate) fn resolve_flags<S: AsRef<str>>(
    provided: &FlagSet,
    inherited: &[S],
    locals: &FlagSet,
) -> FlagSet {
    provided.restrict(inherited).overlay(locals)
}
