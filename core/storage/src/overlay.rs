// tessera/core/storage/src/overlay.rs

// Copy-on-write change set keyed by (table, row key)
use crate::entry::Entry;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Pending writes of one frame, or of a whole block at the top level.
/// Deletions are kept as tombstones so they shadow lower layers.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Overlay {
    rows: BTreeMap<String, BTreeMap<String, Entry>>,
}

impl Overlay {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, table: &str, key: &str) -> Option<&Entry> {
        self.rows.get(table).and_then(|rows| rows.get(key))
    }

    pub fn put(&mut self, table: &str, key: &str, entry: Entry) {
        self.rows
            .entry(table.to_string())
            .or_default()
            .insert(key.to_string(), entry);
    }

    /// Rows recorded for `table`, tombstones included, in key order.
    pub fn table_rows(&self, table: &str) -> impl Iterator<Item = (&String, &Entry)> {
        self.rows.get(table).into_iter().flat_map(|rows| rows.iter())
    }

    /// Every (table, key, entry) triple in table then key order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str, &Entry)> {
        self.rows.iter().flat_map(|(table, rows)| {
            rows.iter()
                .map(move |(key, entry)| (table.as_str(), key.as_str(), entry))
        })
    }

    /// Applies `child` on top of this overlay; child entries win.
    pub fn merge(&mut self, child: Overlay) {
        for (table, rows) in child.rows {
            self.rows.entry(table).or_default().extend(rows);
        }
    }

    pub fn len(&self) -> usize {
        self.rows.values().map(BTreeMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&mut self) {
        self.rows.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_merge_child_wins_and_keeps_tombstones() {
        let mut parent = Overlay::new();
        parent.put("t", "a", Entry::new(vec!["1".into()]));
        parent.put("t", "b", Entry::new(vec!["2".into()]));

        let mut child = Overlay::new();
        child.put("t", "a", Entry::new(vec!["10".into()]));
        child.put("t", "b", Entry::deleted());
        child.put("u", "x", Entry::new(vec![]));

        parent.merge(child);
        assert_eq!(parent.get("t", "a").unwrap().field(0), "10");
        assert!(parent.get("t", "b").unwrap().is_deleted());
        assert!(parent.get("u", "x").is_some());
        assert_eq!(parent.len(), 3);
    }

    #[test]
    fn test_iter_is_ordered() {
        let mut overlay = Overlay::new();
        overlay.put("b", "2", Entry::default());
        overlay.put("a", "9", Entry::default());
        overlay.put("a", "10", Entry::default());
        let keys: Vec<_> = overlay.iter().map(|(t, k, _)| format!("{t}/{k}")).collect();
        assert_eq!(keys, vec!["a/10", "a/9", "b/2"]);
    }
}
