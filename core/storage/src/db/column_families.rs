/// Column family definitions for RocksDB
pub const CF_DEFAULT: &str = "default";
/// Committed table rows, keyed `table \0 key`
pub const CF_ROWS: &str = "rows";
/// Two-phase commit bookkeeping
pub const CF_META: &str = "meta";

/// Get all column families
pub fn all_column_families() -> Vec<&'static str> {
    vec![CF_DEFAULT, CF_ROWS, CF_META]
}
