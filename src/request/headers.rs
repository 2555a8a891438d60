//! Request headers.
//!
//! Names match without regard to ASCII case and entries keep the order they
//! were added in, which is the order a transport sees them. Fingerprints use
//! [`Headers::canonical`] instead, so reordering never changes a key.

/// Ordered header entries with case-insensitive names.
///
/// ```
/// use courier::request::Headers;
///
/// let mut headers: Headers = [("Accept", "application/json")].into_iter().collect();
/// headers.append("X-Trace", "a1");
/// headers.set("accept", "text/plain");
///
/// assert_eq!(headers.get("ACCEPT"), Some("text/plain"));
/// assert!(headers.contains("x-trace"));
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Headers {
    entries: Vec<(String, String)>,
}

impl Headers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an entry, keeping any existing values under the same name.
    pub fn append(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.entries.push((name.into(), value.into()));
    }

    /// Drops every value stored under `name` and stores `value` alone.
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        self.remove(&name);
        self.entries.push((name, value.into()));
    }

    /// First value stored under `name`.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find_map(|(key, value)| same_name(key, name).then_some(value.as_str()))
    }

    /// Drops every value stored under `name`, reporting whether there were any.
    pub fn remove(&mut self, name: &str) -> bool {
        let count = self.entries.len();
        self.entries.retain(|(key, _)| !same_name(key, name));
        self.entries.len() != count
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries
            .iter()
            .map(|(name, value)| (name.as_str(), value.as_str()))
    }

    /// The entries `keep` accepts, with lower-cased names, sorted by name and
    /// then value.
    pub fn canonical(&self, keep: impl Fn(&str) -> bool) -> Vec<(String, String)> {
        let mut canonical: Vec<_> = self
            .entries
            .iter()
            .filter(|(name, _)| keep(name))
            .map(|(name, value)| (name.to_ascii_lowercase(), value.clone()))
            .collect();
        canonical.sort();
        canonical
    }
}

fn same_name(a: &str, b: &str) -> bool {
    a.eq_ignore_ascii_case(b)
}

impl<K, V> FromIterator<(K, V)> for Headers
where
    K: Into<String>,
    V: Into<String>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut headers = Self::new();
        for (name, value) in iter {
            headers.append(name, value);
        }
        headers
    }
}
