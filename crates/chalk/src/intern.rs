//! Deduplicated string tables.
//!
//! A [`StringTable`] is bidirectional: strings are stored in a vector for ordered
//! access by index, and a hash map from string to index makes interning cheap.
//! Modules use one table for their variable names and one for their string pool
//! (string literals and method signatures); class compilers use one for field names.

use ahash::AHashMap;

/// Index into a [`StringTable`].
///
/// Uses `u32` to save space. Bytecode operands referencing tables are at most
/// 16 bits wide; the emitter checks that bound where it matters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
pub struct StringId(u32);

impl StringId {
    /// Creates a StringId from a raw index value.
    ///
    /// Used when decoding bytecode operands. The caller is responsible for
    /// ensuring the index is valid for the table it is used with.
    #[inline]
    #[must_use]
    pub fn from_index(index: usize) -> Self {
        Self(u32::try_from(index).unwrap_or(u32::MAX))
    }

    /// Returns the raw index value.
    #[inline]
    #[must_use]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// An ordered, deduplicated set of strings.
///
/// Serializes as the plain list of strings; the lookup map is rebuilt on load.
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
#[serde(from = "Vec<String>", into = "Vec<String>")]
pub struct StringTable {
    strings: Vec<String>,
    map: AHashMap<String, StringId>,
}

impl StringTable {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Interns `s`, returning the existing index or appending a new entry.
    pub fn ensure(&mut self, s: &str) -> StringId {
        if let Some(&id) = self.map.get(s) {
            return id;
        }
        let id = StringId::from_index(self.strings.len());
        self.strings.push(s.to_owned());
        self.map.insert(s.to_owned(), id);
        id
    }

    /// Appends `s` without checking for an existing entry.
    ///
    /// The map keeps pointing at the first occurrence, so `find` keeps returning
    /// the older index. Used for hidden compiler names that may legitimately repeat.
    pub fn push(&mut self, s: &str) -> StringId {
        let id = StringId::from_index(self.strings.len());
        self.strings.push(s.to_owned());
        self.map.entry(s.to_owned()).or_insert(id);
        id
    }

    /// Looks up `s` without inserting it.
    #[must_use]
    pub fn find(&self, s: &str) -> Option<StringId> {
        self.map.get(s).copied()
    }

    /// Returns the string stored at `id`.
    #[must_use]
    pub fn get(&self, id: StringId) -> Option<&str> {
        self.strings.get(id.index()).map(String::as_str)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.strings.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.strings.is_empty()
    }

    /// Drops every entry at or beyond `len`.
    pub fn truncate(&mut self, len: usize) {
        if len >= self.strings.len() {
            return;
        }
        for s in self.strings.drain(len..) {
            if self.map.get(&s).is_some_and(|id| id.index() >= len) {
                self.map.remove(&s);
            }
        }
    }

    /// Iterates over the strings in index order.
    pub fn iter(&self) -> impl Iterator<Item = (StringId, &str)> {
        self.strings
            .iter()
            .enumerate()
            .map(|(index, s)| (StringId::from_index(index), s.as_str()))
    }

    /// Approximate heap footprint, used for allocation accounting.
    #[must_use]
    pub fn estimate_size(&self) -> usize {
        self.strings.iter().map(|s| s.len() * 2 + 48).sum()
    }
}

impl From<Vec<String>> for StringTable {
    fn from(strings: Vec<String>) -> Self {
        let mut table = Self::default();
        for s in strings {
            table.push(&s);
        }
        table
    }
}

impl From<StringTable> for Vec<String> {
    fn from(table: StringTable) -> Self {
        table.strings
    }
}
