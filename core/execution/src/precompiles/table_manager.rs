// tessera/core/execution/src/precompiles/table_manager.rs

// Table lifecycle contract: create, extend and describe user tables
use super::bfs::FS_TYPE_TABLE;
use super::codes::{
    CODE_SUCCESS, CODE_TABLE_DUPLICATE_FIELD, CODE_TABLE_NAME_ALREADY_EXIST, CODE_TABLE_NOT_EXIST,
};
use super::gas::{InterfaceOpcode, PrecompiledGas};
use super::utilities::{
    check_columns, check_field_name, check_table_name, check_value_columns_length,
    user_table_path, SelectorTable,
};
use super::{
    addresses, OutboundCall, Precompiled, PrecompiledContext, PrecompiledOutcome, ResumeState,
    TableKind, S_TABLE_ADDRESS,
};
use crate::abi::{decode, encode, encode_with_selector, function_selector};
use crate::crypto::CryptoSuite;
use crate::types::{ExecutorError, Result};
use async_trait::async_trait;
use std::collections::HashSet;
use tessera_primitives::{Address, ExecutionMessage, MessageType};
use tessera_storage::{Entry, TableInfo, SYS_TABLES};
use tracing::{debug, info};

/// `(keyColumn, valueColumns)` as passed to `createTable`.
pub type TableInfoTuple = (String, Vec<String>);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableManagerMethod {
    CreateTable,
    CreateKvTable,
    AppendColumns,
    OpenTable,
    Desc,
}

pub struct TableManagerPrecompiled {
    methods: SelectorTable<TableManagerMethod>,
    touch_selector: [u8; 4],
}

fn trimmed(values: Vec<String>) -> Vec<String> {
    values.into_iter().map(|v| v.trim().to_string()).collect()
}

/// Accepts a bare table name or a full `/tables/...` path.
fn table_path(name: &str) -> String {
    let name = name.trim();
    if name.starts_with('/') {
        name.to_string()
    } else {
        user_table_path(name)
    }
}

impl TableManagerPrecompiled {
    pub fn new(suite: &dyn CryptoSuite) -> Self {
        Self {
            methods: SelectorTable::new(
                suite,
                &[
                    (
                        "createTable(string,(string,string[]))",
                        TableManagerMethod::CreateTable,
                    ),
                    (
                        "createKVTable(string,string,string)",
                        TableManagerMethod::CreateKvTable,
                    ),
                    (
                        "appendColumns(string,string[])",
                        TableManagerMethod::AppendColumns,
                    ),
                    ("openTable(string)", TableManagerMethod::OpenTable),
                    ("desc(string)", TableManagerMethod::Desc),
                ],
            ),
            touch_selector: function_selector(suite, "touch(string,string)"),
        }
    }

    /// Writes the schema and address rows, then hands the path to BFS.
    async fn create(
        &self,
        ctx: &mut PrecompiledContext<'_>,
        name: String,
        key_column: String,
        value_columns: Vec<String>,
        kind: TableKind,
        gas: &mut PrecompiledGas,
    ) -> Result<PrecompiledOutcome> {
        let name = name.trim().to_string();
        let key_column = key_column.trim().to_string();
        let value_columns = trimmed(value_columns);
        check_table_name(&name)?;
        check_columns(&key_column, &value_columns)?;

        let path = user_table_path(&name);
        if ctx.get_row(SYS_TABLES, &path).await?.is_some() {
            debug!("Table {} already exists", path);
            gas.append_operation(InterfaceOpcode::OpenTable, 1);
            return Ok(PrecompiledOutcome::finished(
                encode(&(CODE_TABLE_NAME_ALREADY_EXIST,)),
                gas.total_gas(),
            ));
        }

        ctx.create_table(&path, &key_column, value_columns).await?;
        let address = ctx.table_address(&path);
        ctx.set_row(
            S_TABLE_ADDRESS,
            &address.to_hex(),
            Entry::new(vec![path.clone(), kind.as_str().to_string()]),
        )?;
        gas.append_operation(InterfaceOpcode::CreateTable, 1);
        info!(
            "Context {} created {} table {} at {}",
            ctx.context_id(),
            kind.as_str(),
            path,
            address
        );

        let data = encode_with_selector(
            self.touch_selector,
            &(path.clone(), FS_TYPE_TABLE.to_string()),
        );
        Ok(PrecompiledOutcome::Suspend {
            call: OutboundCall {
                to: addresses::BFS,
                data,
            },
            state: ResumeState::RegisterTable { path, kind },
            gas_used: gas.total_gas(),
        })
    }

    async fn append_columns(
        &self,
        ctx: &mut PrecompiledContext<'_>,
        name: &str,
        columns: Vec<String>,
        gas: &mut PrecompiledGas,
    ) -> Result<i32> {
        let path = table_path(name);
        let columns = trimmed(columns);
        let mut info = match ctx.get_row(SYS_TABLES, &path).await? {
            Some(entry) => TableInfo::from_entry(&path, &entry)?,
            None => return Ok(CODE_TABLE_NOT_EXIST),
        };
        let mut seen: HashSet<&str> = info.value_columns.iter().map(String::as_str).collect();
        seen.insert(info.key_column.as_str());
        for column in &columns {
            check_field_name(column)?;
            if !seen.insert(column.as_str()) {
                debug!("Column {} already in {}", column, path);
                return Ok(CODE_TABLE_DUPLICATE_FIELD);
            }
        }
        info.value_columns.extend(columns);
        check_value_columns_length(&info.value_columns)?;
        ctx.update_table_info(&info)?;
        gas.append_operation(InterfaceOpcode::CreateTable, 1);
        Ok(CODE_SUCCESS)
    }
}

#[async_trait]
impl Precompiled for TableManagerPrecompiled {
    fn name(&self) -> &'static str {
        "table_manager"
    }

    async fn call(
        &self,
        ctx: &mut PrecompiledContext<'_>,
        input: &[u8],
    ) -> Result<PrecompiledOutcome> {
        let (method, args) = self.methods.dispatch(input)?;
        let mut gas = PrecompiledGas::new();
        gas.add_memory(input.len());

        let output = match method {
            TableManagerMethod::CreateTable => {
                let (name, (key_column, value_columns)): (String, TableInfoTuple) = decode(args)?;
                return self
                    .create(ctx, name, key_column, value_columns, TableKind::Table, &mut gas)
                    .await;
            }
            TableManagerMethod::CreateKvTable => {
                let (name, key_column, value_column): (String, String, String) = decode(args)?;
                return self
                    .create(ctx, name, key_column, vec![value_column], TableKind::Kv, &mut gas)
                    .await;
            }
            TableManagerMethod::AppendColumns => {
                let (name, columns): (String, Vec<String>) = decode(args)?;
                encode(&(self.append_columns(ctx, &name, columns, &mut gas).await?,))
            }
            TableManagerMethod::OpenTable => {
                let (name,): (String,) = decode(args)?;
                gas.append_operation(InterfaceOpcode::OpenTable, 1);
                let path = table_path(&name);
                let address = match ctx.open_table(&path).await? {
                    Some(_) => ctx.table_address(&path),
                    None => Address::zero(),
                };
                encode(&(address,))
            }
            TableManagerMethod::Desc => {
                let (name,): (String,) = decode(args)?;
                gas.append_operation(InterfaceOpcode::OpenTable, 1);
                let schema: TableInfoTuple = match ctx.open_table(&table_path(&name)).await? {
                    Some(info) => (info.key_column, info.value_columns),
                    None => (String::new(), Vec::new()),
                };
                encode(&(schema,))
            }
        };
        gas.add_memory(output.len());
        Ok(PrecompiledOutcome::finished(output, gas.total_gas()))
    }

    async fn resume(
        &self,
        _ctx: &mut PrecompiledContext<'_>,
        state: ResumeState,
        reply: &ExecutionMessage,
    ) -> Result<PrecompiledOutcome> {
        let ResumeState::RegisterTable { path, kind } = state;
        let registered = reply.message_type == MessageType::Finished
            && matches!(decode::<(i32,)>(&reply.data), Ok((CODE_SUCCESS,)));
        if !registered {
            return Err(ExecutorError::Precompiled(format!(
                "registering {} table {} in BFS failed",
                kind.as_str(),
                path
            )));
        }
        let output = encode(&(CODE_SUCCESS,));
        let mut gas = PrecompiledGas::new();
        gas.add_memory(output.len());
        Ok(PrecompiledOutcome::finished(output, gas.total_gas()))
    }
}
