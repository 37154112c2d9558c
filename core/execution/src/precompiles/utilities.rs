// tessera/core/execution/src/precompiles/utilities.rs

// Name validation, path helpers and selector dispatch shared by the table contracts
use crate::abi::function_selector;
use crate::crypto::CryptoSuite;
use crate::types::{ExecutorError, Result};
use std::collections::HashMap;
use tessera_primitives::Address;

pub const TABLE_NAME_MAX_LENGTH: usize = 50;
pub const TABLE_FIELD_NAME_MAX_LENGTH: usize = 64;
pub const TABLE_VALUE_FIELD_MAX_LENGTH: usize = 1024;
pub const USER_TABLE_KEY_VALUE_MAX_LENGTH: usize = 255;
pub const USER_TABLE_FIELD_VALUE_MAX_LENGTH: usize = 16 * 1024 * 1024 - 1;
pub const USER_TABLE_MAX_LIMIT_COUNT: u32 = 500;

pub const USER_TABLE_PREFIX: &str = "/tables/";
pub const USER_APPS_PREFIX: &str = "/apps/";

/// Maps 4-byte selectors to a handler's method enum.
#[derive(Debug, Clone)]
pub struct SelectorTable<M: Copy> {
    methods: HashMap<[u8; 4], M>,
}

impl<M: Copy> SelectorTable<M> {
    pub fn new(suite: &dyn CryptoSuite, signatures: &[(&str, M)]) -> Self {
        let methods = signatures
            .iter()
            .map(|(signature, method)| (function_selector(suite, signature), *method))
            .collect();
        Self { methods }
    }

    /// Splits call data into method and argument bytes.
    pub fn dispatch<'a>(&self, input: &'a [u8]) -> Result<(M, &'a [u8])> {
        if input.len() < 4 {
            return Err(ExecutorError::Precompiled("call data shorter than a selector".into()));
        }
        let mut selector = [0u8; 4];
        selector.copy_from_slice(&input[..4]);
        match self.methods.get(&selector) {
            Some(method) => Ok((*method, &input[4..])),
            None => Err(ExecutorError::Precompiled(format!(
                "unknown selector 0x{}",
                hex::encode(selector)
            ))),
        }
    }
}

pub fn user_table_path(name: &str) -> String {
    format!("{}{}", USER_TABLE_PREFIX, name)
}

pub fn contract_table_path(address: &Address) -> String {
    format!("{}{}", USER_APPS_PREFIX, address.to_hex())
}

/// Address at which the contract bound to table `path` is called.
pub fn table_address(suite: &dyn CryptoSuite, path: &str) -> Address {
    Address::from_hash(&suite.hash(path.as_bytes()))
}

pub fn check_table_name(name: &str) -> Result<()> {
    if name.is_empty() || name.len() > TABLE_NAME_MAX_LENGTH {
        return Err(ExecutorError::Precompiled(format!(
            "table name length must be 1..={}, got {}",
            TABLE_NAME_MAX_LENGTH,
            name.len()
        )));
    }
    if let Some(c) = name
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || *c == '_'))
    {
        return Err(ExecutorError::Precompiled(format!(
            "invalid character {:?} in table name {}",
            c, name
        )));
    }
    Ok(())
}

pub fn check_field_name(field: &str) -> Result<()> {
    if field.is_empty() || field.len() > TABLE_FIELD_NAME_MAX_LENGTH {
        return Err(ExecutorError::Precompiled(format!(
            "field name length must be 1..={}, got {}",
            TABLE_FIELD_NAME_MAX_LENGTH,
            field.len()
        )));
    }
    if field.starts_with('_') {
        return Err(ExecutorError::Precompiled(format!(
            "field name {} must not start with '_'",
            field
        )));
    }
    if let Some(c) = field
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '_' | '$' | '@')))
    {
        return Err(ExecutorError::Precompiled(format!(
            "invalid character {:?} in field name {}",
            c, field
        )));
    }
    Ok(())
}

/// Validates a full column list: each name, no duplicates, and the joined
/// value columns within the schema row limit.
pub fn check_columns(key_column: &str, value_columns: &[String]) -> Result<()> {
    check_field_name(key_column)?;
    let mut seen = std::collections::HashSet::new();
    seen.insert(key_column);
    for column in value_columns {
        check_field_name(column)?;
        if !seen.insert(column.as_str()) {
            return Err(ExecutorError::Precompiled(format!(
                "duplicate field {}",
                column
            )));
        }
    }
    check_value_columns_length(value_columns)
}

pub fn check_value_columns_length(value_columns: &[String]) -> Result<()> {
    let joined = value_columns.iter().map(String::len).sum::<usize>()
        + value_columns.len().saturating_sub(1);
    if joined > TABLE_VALUE_FIELD_MAX_LENGTH {
        return Err(ExecutorError::Precompiled(format!(
            "value fields take {} bytes, limit {}",
            joined, TABLE_VALUE_FIELD_MAX_LENGTH
        )));
    }
    Ok(())
}

pub fn check_key(key: &str) -> Result<()> {
    if key.is_empty() || key.len() > USER_TABLE_KEY_VALUE_MAX_LENGTH {
        return Err(ExecutorError::Precompiled(format!(
            "key length must be 1..={}, got {}",
            USER_TABLE_KEY_VALUE_MAX_LENGTH,
            key.len()
        )));
    }
    Ok(())
}

pub fn check_value(value: &str) -> Result<()> {
    if value.len() > USER_TABLE_FIELD_VALUE_MAX_LENGTH {
        return Err(ExecutorError::Precompiled(format!(
            "value of {} bytes exceeds limit {}",
            value.len(),
            USER_TABLE_FIELD_VALUE_MAX_LENGTH
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::Keccak256Secp256k1;

    #[derive(Debug, Clone, Copy, PartialEq)]
    enum Method {
        Insert,
        Desc,
    }

    #[test]
    fn test_selector_dispatch() {
        let suite = Keccak256Secp256k1;
        let table = SelectorTable::new(
            &suite,
            &[("insert((string,string[]))", Method::Insert), ("desc()", Method::Desc)],
        );
        let mut input = function_selector(&suite, "desc()").to_vec();
        input.extend_from_slice(&[7, 7]);
        let (method, args) = table.dispatch(&input).unwrap();
        assert_eq!(method, Method::Desc);
        assert_eq!(args, &[7, 7]);

        assert!(table.dispatch(&[1, 2]).is_err());
        assert!(table.dispatch(&[0, 0, 0, 0]).is_err());
    }

    #[test]
    fn test_table_name_boundaries() {
        assert!(check_table_name(&"a".repeat(TABLE_NAME_MAX_LENGTH)).is_ok());
        assert!(check_table_name(&"a".repeat(TABLE_NAME_MAX_LENGTH + 1)).is_err());
        assert!(check_table_name("t_test").is_ok());
        assert!(check_table_name("").is_err());
        assert!(check_table_name("a/b").is_err());
        assert!(check_table_name("a&b").is_err());
    }

    #[test]
    fn test_field_rules() {
        assert!(check_field_name("item$name@1").is_ok());
        assert!(check_field_name("_hidden").is_err());
        assert!(check_field_name(&"f".repeat(TABLE_FIELD_NAME_MAX_LENGTH)).is_ok());
        assert!(check_field_name(&"f".repeat(TABLE_FIELD_NAME_MAX_LENGTH + 1)).is_err());

        assert!(check_columns("id", &["a".into(), "b".into()]).is_ok());
        assert!(check_columns("id", &["a".into(), "a".into()]).is_err());
        assert!(check_columns("id", &["id".into()]).is_err());
    }

    #[test]
    fn test_joined_value_columns_limit() {
        // 16 names of 63 bytes plus 15 separators is 1023 bytes
        let ok: Vec<String> = (0..16).map(|i| format!("{:0>63}", i)).collect();
        assert!(check_value_columns_length(&ok).is_ok());
        let mut over = ok.clone();
        over[0].push('x');
        over[1].push('x');
        assert!(check_value_columns_length(&over).is_err());
    }

    #[test]
    fn test_key_and_value_limits() {
        assert!(check_key(&"k".repeat(USER_TABLE_KEY_VALUE_MAX_LENGTH)).is_ok());
        assert!(check_key(&"k".repeat(USER_TABLE_KEY_VALUE_MAX_LENGTH + 1)).is_err());
        assert!(check_key("").is_err());
        assert!(check_value("").is_ok());
    }
}
