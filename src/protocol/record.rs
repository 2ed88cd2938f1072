use indexmap::IndexMap;
use std::fmt;

/// An ordered mapping from column name to value. The runtime is column-agnostic
/// except at explicit projection, filter, and sharding points (spec §3).
///
/// Backed by `IndexMap` so that iteration order matches insertion order, which
/// keeps the wire encoding of a record deterministic.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Record(IndexMap<String, String>);

impl Record {
    pub fn new() -> Self {
        Self(IndexMap::new())
    }

    pub fn get(&self, column: &str) -> Option<&str> {
        self.0.get(column).map(String::as_str)
    }

    pub fn set(&mut self, column: impl Into<String>, value: impl Into<String>) {
        self.0.insert(column.into(), value.into());
    }

    pub fn remove(&mut self, column: &str) -> Option<String> {
        self.0.shift_remove(column)
    }

    pub fn contains(&self, column: &str) -> bool {
        self.0.contains_key(column)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Project down to the given column subset, preserving the order of `columns`.
    pub fn project(&self, columns: &[&str]) -> Record {
        let mut out = Record::new();
        for &column in columns {
            if let Some(value) = self.get(column) {
                out.set(column, value);
            }
        }
        out
    }
}

impl FromIterator<(String, String)> for Record {
    fn from_iter<T: IntoIterator<Item = (String, String)>>(iter: T) -> Self {
        Record(iter.into_iter().collect())
    }
}

impl fmt::Display for Record {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for (k, v) in self.iter() {
            if !first {
                write!(f, ", ")?;
            }
            write!(f, "{k}={v}")?;
            first = false;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn preserves_insertion_order() {
        let mut r = Record::new();
        r.set("b", "2");
        r.set("a", "1");
        let cols: Vec<_> = r.iter().map(|(k, _)| k).collect();
        assert_eq!(cols, vec!["b", "a"]);
    }

    #[test]
    fn project_keeps_requested_order() {
        let mut r = Record::new();
        r.set("a", "1");
        r.set("b", "2");
        r.set("c", "3");
        let projected = r.project(&["c", "a"]);
        let cols: Vec<_> = projected.iter().map(|(k, _)| k).collect();
        assert_eq!(cols, vec!["c", "a"]);
    }
}
