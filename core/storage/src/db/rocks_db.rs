use super::column_families::all_column_families;
use crate::error::{Result, StorageError};
use rocksdb::{ColumnFamilyDescriptor, Direction, IteratorMode, Options, WriteBatch, DB};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

type KvItem = (Box<[u8]>, Box<[u8]>);

/// RocksDB handle shared by the storage backend
pub struct RocksDB {
    db: Arc<DB>,
}

impl RocksDB {
    /// Open database with default options
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let mut db_opts = Options::default();
        db_opts.create_if_missing(true);
        db_opts.create_missing_column_families(true);
        // Use compression in prod; disable in tests or when feature `no-compression` is set
        let compression = if cfg!(any(test, feature = "no-compression")) {
            rocksdb::DBCompressionType::None
        } else {
            rocksdb::DBCompressionType::Lz4
        };
        db_opts.set_compression_type(compression);
        db_opts.set_write_buffer_size(64 * 1024 * 1024);
        let parallelism = std::thread::available_parallelism()
            .map(|n| n.get() as i32)
            .unwrap_or(2);
        db_opts.increase_parallelism(parallelism);

        let cfs: Vec<ColumnFamilyDescriptor> = all_column_families()
            .into_iter()
            .map(|name| {
                let mut cf_opts = Options::default();
                cf_opts.set_compression_type(compression);
                ColumnFamilyDescriptor::new(name, cf_opts)
            })
            .collect();

        let db = DB::open_cf_descriptors(&db_opts, path, cfs)?;

        info!("RocksDB opened successfully");
        Ok(Self { db: Arc::new(db) })
    }

    pub fn get_cf(&self, cf: &str, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let cf_handle = self.cf_handle(cf)?;
        Ok(self.db.get_cf(cf_handle, key)?)
    }

    pub fn put_cf(&self, cf: &str, key: &[u8], value: &[u8]) -> Result<()> {
        let cf_handle = self.cf_handle(cf)?;
        self.db.put_cf(cf_handle, key, value)?;
        Ok(())
    }

    pub fn delete_cf(&self, cf: &str, key: &[u8]) -> Result<()> {
        let cf_handle = self.cf_handle(cf)?;
        self.db.delete_cf(cf_handle, key)?;
        Ok(())
    }

    /// Write a batch of operations atomically
    pub fn write_batch(&self, batch: WriteBatch) -> Result<()> {
        self.db.write(batch)?;
        Ok(())
    }

    pub fn batch(&self) -> WriteBatch {
        WriteBatch::default()
    }

    pub fn batch_put_cf(
        &self,
        batch: &mut WriteBatch,
        cf: &str,
        key: &[u8],
        value: &[u8],
    ) -> Result<()> {
        let cf_handle = self.cf_handle(cf)?;
        batch.put_cf(cf_handle, key, value);
        Ok(())
    }

    pub fn batch_delete_cf(&self, batch: &mut WriteBatch, cf: &str, key: &[u8]) -> Result<()> {
        let cf_handle = self.cf_handle(cf)?;
        batch.delete_cf(cf_handle, key);
        Ok(())
    }

    /// All pairs whose key starts with `prefix`, in key order.
    pub fn scan_prefix_cf(&self, cf: &str, prefix: &[u8]) -> Result<Vec<KvItem>> {
        let cf_handle = self.cf_handle(cf)?;
        let mut items = Vec::new();
        for item in self
            .db
            .iterator_cf(cf_handle, IteratorMode::From(prefix, Direction::Forward))
        {
            let (key, value) = item?;
            if !key.starts_with(prefix) {
                break;
            }
            items.push((key, value));
        }
        Ok(items)
    }

    fn cf_handle(&self, name: &str) -> Result<&rocksdb::ColumnFamily> {
        self.db.cf_handle(name).ok_or_else(|| StorageError::Backend {
            code: -2001,
            message: format!("Column family {} not found", name),
        })
    }

    /// Flush all column families
    pub fn flush(&self) -> Result<()> {
        for cf_name in all_column_families() {
            if let Ok(cf) = self.cf_handle(cf_name) {
                self.db.flush_cf(cf)?;
            }
        }
        debug!("RocksDB flushed");
        Ok(())
    }
}

impl Clone for RocksDB {
    fn clone(&self) -> Self {
        Self {
            db: Arc::clone(&self.db),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::column_families::{CF_META, CF_ROWS};
    use tempfile::TempDir;

    #[test]
    fn test_basic_operations() {
        let temp_dir = TempDir::new().unwrap();
        let db = RocksDB::open(temp_dir.path()).unwrap();

        db.put_cf(CF_META, b"key1", b"value1").unwrap();
        assert_eq!(db.get_cf(CF_META, b"key1").unwrap(), Some(b"value1".to_vec()));

        db.delete_cf(CF_META, b"key1").unwrap();
        assert!(db.get_cf(CF_META, b"key1").unwrap().is_none());
        assert!(db.get_cf("missing", b"key1").is_err());
    }

    #[test]
    fn test_prefix_scan_stops_at_prefix_end() {
        let temp_dir = TempDir::new().unwrap();
        let db = RocksDB::open(temp_dir.path()).unwrap();

        let mut batch = db.batch();
        db.batch_put_cf(&mut batch, CF_ROWS, b"a\0k1", b"1").unwrap();
        db.batch_put_cf(&mut batch, CF_ROWS, b"a\0k2", b"2").unwrap();
        db.batch_put_cf(&mut batch, CF_ROWS, b"ab\0k1", b"3").unwrap();
        db.write_batch(batch).unwrap();

        let items = db.scan_prefix_cf(CF_ROWS, b"a\0").unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(&*items[1].1, b"2");
    }
}
