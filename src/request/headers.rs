//! Ordered, case-insensitive header multimap

use serde::{Deserialize, Serialize};

/// HTTP headers in insertion order
///
/// Names are lower-cased on insert, so lookups are case-insensitive and a
/// stored response always comes back with the same normalised names.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(
    from = "Vec<(String, Vec<String>)>",
    into = "Vec<(String, Vec<String>)>"
)]
pub struct Headers {
    entries: Vec<(String, Vec<String>)>,
}

impl Headers {
    /// Creates an empty header map
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets a header, replacing any existing values
    pub fn insert(&mut self, name: impl AsRef<str>, value: impl Into<String>) {
        let name = normalize_name(name.as_ref());
        match self.position(&name) {
            Some(index) => self.entries[index].1 = vec![value.into()],
            None => self.entries.push((name, vec![value.into()])),
        }
    }

    /// Adds a value to a header, keeping existing values
    pub fn append(&mut self, name: impl AsRef<str>, value: impl Into<String>) {
        let name = normalize_name(name.as_ref());
        match self.position(&name) {
            Some(index) => self.entries[index].1.push(value.into()),
            None => self.entries.push((name, vec![value.into()])),
        }
    }

    /// Returns the first value of a header
    pub fn get(&self, name: &str) -> Option<&str> {
        self.get_all(name).first().map(String::as_str)
    }

    /// Returns all values of a header
    pub fn get_all(&self, name: &str) -> &[String] {
        self.position(&normalize_name(name))
            .map(|index| self.entries[index].1.as_slice())
            .unwrap_or(&[])
    }

    /// Returns true if the header is present
    pub fn contains(&self, name: &str) -> bool {
        self.position(&normalize_name(name)).is_some()
    }

    /// Iterates over `(name, values)` pairs in insertion order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &[String])> {
        self.entries
            .iter()
            .map(|(name, values)| (name.as_str(), values.as_slice()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn position(&self, normalized: &str) -> Option<usize> {
        self.entries.iter().position(|(name, _)| name == normalized)
    }
}

fn normalize_name(name: &str) -> String {
    name.trim().to_ascii_lowercase()
}

impl From<Vec<(String, Vec<String>)>> for Headers {
    fn from(entries: Vec<(String, Vec<String>)>) -> Self {
        let mut headers = Headers::new();
        for (name, values) in entries {
            for value in values {
                headers.append(&name, value);
            }
        }
        headers
    }
}

impl From<Headers> for Vec<(String, Vec<String>)> {
    fn from(headers: Headers) -> Self {
        headers.entries
    }
}

impl<K: AsRef<str>, V: Into<String>> FromIterator<(K, V)> for Headers {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut headers = Headers::new();
        for (name, value) in iter {
            headers.append(name, value);
        }
        headers
    }
}
