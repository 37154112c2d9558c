// tessera/core/execution/src/precompiles/kv_table.rs

// Single-value key/value table contract
use super::gas::{InterfaceOpcode, PrecompiledGas};
use super::utilities::{check_key, check_value, SelectorTable};
use super::{Precompiled, PrecompiledContext, PrecompiledOutcome};
use crate::abi::{decode, encode};
use crate::crypto::CryptoSuite;
use crate::types::{ExecutorError, Result};
use async_trait::async_trait;
use std::sync::Arc;
use tessera_storage::Entry;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KvTableMethod {
    Get,
    Set,
    Desc,
}

pub struct KvTableMethods(SelectorTable<KvTableMethod>);

impl KvTableMethods {
    pub fn new(suite: &dyn CryptoSuite) -> Self {
        Self(SelectorTable::new(
            suite,
            &[
                ("get(string)", KvTableMethod::Get),
                ("set(string,string)", KvTableMethod::Set),
                ("desc()", KvTableMethod::Desc),
            ],
        ))
    }
}

pub struct KvTablePrecompiled {
    path: String,
    methods: Arc<KvTableMethods>,
}

impl KvTablePrecompiled {
    pub fn new(path: impl Into<String>, methods: Arc<KvTableMethods>) -> Self {
        Self {
            path: path.into(),
            methods,
        }
    }
}

#[async_trait]
impl Precompiled for KvTablePrecompiled {
    fn name(&self) -> &'static str {
        "kv_table"
    }

    async fn call(
        &self,
        ctx: &mut PrecompiledContext<'_>,
        input: &[u8],
    ) -> Result<PrecompiledOutcome> {
        let (method, args) = self.methods.0.dispatch(input)?;
        let info = ctx.open_table(&self.path).await?.ok_or_else(|| {
            ExecutorError::Precompiled(format!("{} does not exist", self.path))
        })?;
        let mut gas = PrecompiledGas::new();
        gas.add_memory(input.len());

        let output = match method {
            KvTableMethod::Get => {
                let (key,): (String,) = decode(args)?;
                gas.append_operation(InterfaceOpcode::Select, 1);
                match ctx.get_row(&self.path, &key).await? {
                    Some(entry) => encode(&(true, entry.field(0).to_string())),
                    None => encode(&(false, String::new())),
                }
            }
            KvTableMethod::Set => {
                let (key, value): (String, String) = decode(args)?;
                check_key(&key)?;
                check_value(&value)?;
                ctx.set_row(&self.path, &key, Entry::new(vec![value]))?;
                gas.append_operation(InterfaceOpcode::Insert, 1);
                encode(&(1i32,))
            }
            KvTableMethod::Desc => {
                gas.append_operation(InterfaceOpcode::OpenTable, 1);
                let value_column = info.value_columns.first().cloned().unwrap_or_default();
                encode(&(info.key_column.clone(), value_column))
            }
        };
        gas.add_memory(output.len());
        Ok(PrecompiledOutcome::finished(output, gas.total_gas()))
    }
}
