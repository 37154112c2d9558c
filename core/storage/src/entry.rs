// tessera/core/storage/src/entry.rs

use crate::error::{Result, StorageError};
use serde::{Deserialize, Serialize};

/// System table holding one schema row per table, keyed by table name.
pub const SYS_TABLES: &str = "s_tables";

/// Separator used when the value columns of a schema are stored in one field.
pub const SYS_TABLE_VALUE_FIELDS_SEPARATOR: char = ',';

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum EntryStatus {
    #[default]
    Normal,
    /// Tombstone: shadows whatever lower layers hold for the key.
    Deleted,
}

/// A row: ordered field values matching the table's value columns
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Entry {
    fields: Vec<String>,
    status: EntryStatus,
}

impl Entry {
    pub fn new(fields: Vec<String>) -> Self {
        Self {
            fields,
            status: EntryStatus::Normal,
        }
    }

    pub fn deleted() -> Self {
        Self {
            fields: Vec::new(),
            status: EntryStatus::Deleted,
        }
    }

    pub fn status(&self) -> EntryStatus {
        self.status
    }

    pub fn is_deleted(&self) -> bool {
        self.status == EntryStatus::Deleted
    }

    /// Value at `index`, or `""` for columns appended after the row was written.
    pub fn field(&self, index: usize) -> &str {
        self.fields.get(index).map(String::as_str).unwrap_or("")
    }

    pub fn fields(&self) -> &[String] {
        &self.fields
    }

    pub fn set_field(&mut self, index: usize, value: impl Into<String>) {
        if self.fields.len() <= index {
            self.fields.resize(index + 1, String::new());
        }
        self.fields[index] = value.into();
    }

    /// Pads the row with empty values up to `width` columns.
    pub fn padded(mut self, width: usize) -> Self {
        if self.fields.len() < width {
            self.fields.resize(width, String::new());
        }
        self
    }

    pub fn into_fields(self) -> Vec<String> {
        self.fields
    }
}

/// Schema of a table: primary key column plus ordered value columns
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableInfo {
    pub name: String,
    pub key_column: String,
    pub value_columns: Vec<String>,
}

impl TableInfo {
    pub fn new(name: impl Into<String>, key_column: impl Into<String>, value_columns: Vec<String>) -> Self {
        Self {
            name: name.into(),
            key_column: key_column.into(),
            value_columns,
        }
    }

    pub fn field_index(&self, column: &str) -> Option<usize> {
        self.value_columns.iter().position(|c| c == column)
    }

    /// Row stored in [`SYS_TABLES`] for this schema.
    pub fn to_entry(&self) -> Entry {
        let separator = SYS_TABLE_VALUE_FIELDS_SEPARATOR.to_string();
        Entry::new(vec![
            self.key_column.clone(),
            self.value_columns.join(&separator),
        ])
    }

    pub fn from_entry(name: &str, entry: &Entry) -> Result<Self> {
        if entry.fields().is_empty() {
            return Err(StorageError::CorruptSchema(name.to_string()));
        }
        let value_columns = entry
            .field(1)
            .split(SYS_TABLE_VALUE_FIELDS_SEPARATOR)
            .filter(|c| !c.is_empty())
            .map(str::to_string)
            .collect();
        Ok(Self {
            name: name.to_string(),
            key_column: entry.field(0).to_string(),
            value_columns,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_fields_read_as_empty() {
        let mut entry = Entry::new(vec!["a".into()]);
        assert_eq!(entry.field(0), "a");
        assert_eq!(entry.field(3), "");

        entry.set_field(2, "c");
        assert_eq!(entry.fields(), &["a".to_string(), String::new(), "c".to_string()]);
    }

    #[test]
    fn test_schema_row_layout() {
        let info = TableInfo::new("t_test", "id", vec!["item_name".into(), "item_id".into()]);
        let entry = info.to_entry();
        assert_eq!(entry.fields(), &["id".to_string(), "item_name,item_id".to_string()]);
        assert_eq!(TableInfo::from_entry("t_test", &entry).unwrap(), info);
    }

    #[test]
    fn test_schema_without_value_columns() {
        let info = TableInfo::new("/apps/x", "key", vec![]);
        let back = TableInfo::from_entry("/apps/x", &info.to_entry()).unwrap();
        assert!(back.value_columns.is_empty());
        assert!(TableInfo::from_entry("bad", &Entry::default()).is_err());
    }
}
