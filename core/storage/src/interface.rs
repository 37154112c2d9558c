// tessera/core/storage/src/interface.rs

use crate::entry::{Entry, TableInfo};
use crate::error::Result;
use crate::overlay::Overlay;
use async_trait::async_trait;
use tessera_primitives::TwoPCParams;

/// Durable storage as seen by the executor.
///
/// Reads always observe the last committed block. Writes produced by block
/// execution reach the backend only through the two-phase `prepare`/`commit`
/// pair; `set_row` and `create_table` exist for bootstrapping (genesis, tools).
#[async_trait]
pub trait StorageInterface: Send + Sync {
    async fn get_row(&self, table: &str, key: &str) -> Result<Option<Entry>>;

    /// Primary keys of `table` in ascending byte order.
    async fn get_primary_keys(&self, table: &str) -> Result<Vec<String>>;

    async fn set_row(&self, table: &str, key: &str, entry: Entry) -> Result<()>;

    async fn create_table(
        &self,
        name: &str,
        key_column: &str,
        value_columns: Vec<String>,
    ) -> Result<TableInfo>;

    async fn open_table(&self, name: &str) -> Result<Option<TableInfo>>;

    /// First phase: stage `changes` for block `params.number` without making
    /// them visible.
    async fn prepare(&self, params: &TwoPCParams, changes: Overlay) -> Result<()>;

    /// Second phase: atomically publish the staged changes.
    async fn commit(&self, params: &TwoPCParams) -> Result<()>;

    /// Drops the staged changes, if any.
    async fn rollback(&self, params: &TwoPCParams) -> Result<()>;
}
