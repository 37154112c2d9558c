// tessera/core/execution/src/precompiles/table.rs

// Relational table contract bound to one table path
use super::codes::{CODE_INSERT_KEY_EXIST, CODE_UPDATE_KEY_NOT_EXIST};
use super::condition::{Condition, ConditionTuple, LimitTuple};
use super::gas::{InterfaceOpcode, PrecompiledGas};
use super::utilities::{check_key, check_value, SelectorTable};
use super::{Precompiled, PrecompiledContext, PrecompiledOutcome};
use crate::abi::{decode, encode};
use crate::crypto::CryptoSuite;
use crate::types::{ExecutorError, Result};
use async_trait::async_trait;
use std::sync::Arc;
use tessera_storage::{Entry, TableInfo};
use tracing::debug;

/// `(key, values)` as exchanged with contracts.
pub type EntryTuple = (String, Vec<String>);
/// `(column name, new value)`.
pub type UpdateFieldTuple = (String, String);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableMethod {
    Insert,
    SelectByKey,
    SelectByCondition,
    Count,
    UpdateByKey,
    UpdateByCondition,
    RemoveByKey,
    RemoveByCondition,
    Desc,
}

pub struct TableMethods(SelectorTable<TableMethod>);

impl TableMethods {
    pub fn new(suite: &dyn CryptoSuite) -> Self {
        Self(SelectorTable::new(
            suite,
            &[
                ("insert((string,string[]))", TableMethod::Insert),
                ("select(string)", TableMethod::SelectByKey),
                (
                    "select((uint8,uint32,string)[],(uint32,uint32))",
                    TableMethod::SelectByCondition,
                ),
                ("count((uint8,uint32,string)[])", TableMethod::Count),
                ("update(string,(string,string)[])", TableMethod::UpdateByKey),
                (
                    "update((uint8,uint32,string)[],(uint32,uint32),(string,string)[])",
                    TableMethod::UpdateByCondition,
                ),
                ("remove(string)", TableMethod::RemoveByKey),
                (
                    "remove((uint8,uint32,string)[],(uint32,uint32))",
                    TableMethod::RemoveByCondition,
                ),
                ("desc()", TableMethod::Desc),
            ],
        ))
    }
}

pub struct TablePrecompiled {
    path: String,
    methods: Arc<TableMethods>,
}

impl TablePrecompiled {
    pub fn new(path: impl Into<String>, methods: Arc<TableMethods>) -> Self {
        Self {
            path: path.into(),
            methods,
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// Rows matching `cond` in key order, windowed by its limit.
    async fn scan(
        &self,
        ctx: &PrecompiledContext<'_>,
        info: &TableInfo,
        cond: &Condition,
    ) -> Result<Vec<(String, Entry)>> {
        if cond.count() == 0 {
            return Ok(Vec::new());
        }
        let wanted = cond.offset().saturating_add(cond.count());
        let mut matched = Vec::new();
        for key in ctx.primary_keys(&self.path).await? {
            if !cond.matches_key(&key) {
                continue;
            }
            let entry = match ctx.get_row(&self.path, &key).await? {
                Some(entry) => entry.padded(info.value_columns.len()),
                None => continue,
            };
            if cond.matches(&key, &entry) {
                matched.push((key, entry));
                if matched.len() >= wanted {
                    break;
                }
            }
        }
        Ok(cond.window(matched))
    }

    fn resolve_updates(
        info: &TableInfo,
        updates: Vec<UpdateFieldTuple>,
    ) -> Result<Vec<(usize, String)>> {
        updates
            .into_iter()
            .map(|(field, value)| {
                let index = info.field_index(&field).ok_or_else(|| {
                    ExecutorError::Precompiled(format!(
                        "field {} does not exist in {}",
                        field, info.name
                    ))
                })?;
                check_value(&value)?;
                Ok((index, value))
            })
            .collect()
    }

    async fn insert(
        &self,
        ctx: &mut PrecompiledContext<'_>,
        info: &TableInfo,
        args: &[u8],
        gas: &mut PrecompiledGas,
    ) -> Result<Vec<u8>> {
        let ((key, values),): (EntryTuple,) = decode(args)?;
        if values.len() != info.value_columns.len() {
            return Err(ExecutorError::Precompiled(format!(
                "insert entry fields number mismatch: expected {}, got {}",
                info.value_columns.len(),
                values.len()
            )));
        }
        check_key(&key)?;
        for value in &values {
            check_value(value)?;
        }
        if ctx.get_row(&self.path, &key).await?.is_some() {
            debug!("Insert into {} hit existing key {}", self.path, key);
            return Ok(encode(&(CODE_INSERT_KEY_EXIST,)));
        }
        ctx.set_row(&self.path, &key, Entry::new(values))?;
        gas.append_operation(InterfaceOpcode::Insert, 1);
        Ok(encode(&(1i32,)))
    }

    async fn select_by_key(
        &self,
        ctx: &PrecompiledContext<'_>,
        info: &TableInfo,
        args: &[u8],
        gas: &mut PrecompiledGas,
    ) -> Result<Vec<u8>> {
        let (key,): (String,) = decode(args)?;
        gas.append_operation(InterfaceOpcode::Select, 1);
        let entry: EntryTuple = match ctx.get_row(&self.path, &key).await? {
            Some(entry) => (key, entry.padded(info.value_columns.len()).into_fields()),
            None => (String::new(), Vec::new()),
        };
        Ok(encode(&(entry,)))
    }

    async fn select_by_condition(
        &self,
        ctx: &PrecompiledContext<'_>,
        info: &TableInfo,
        args: &[u8],
        gas: &mut PrecompiledGas,
    ) -> Result<Vec<u8>> {
        let (conditions, limit): (Vec<ConditionTuple>, LimitTuple) = decode(args)?;
        let cond = Condition::build(&conditions, Some(limit), info.value_columns.len())?;
        cond.charge(gas);
        gas.append_operation(InterfaceOpcode::Select, 1);
        let entries: Vec<EntryTuple> = self
            .scan(ctx, info, &cond)
            .await?
            .into_iter()
            .map(|(key, entry)| (key, entry.into_fields()))
            .collect();
        Ok(encode(&(entries,)))
    }

    async fn count(
        &self,
        ctx: &PrecompiledContext<'_>,
        info: &TableInfo,
        args: &[u8],
        gas: &mut PrecompiledGas,
    ) -> Result<Vec<u8>> {
        let (conditions,): (Vec<ConditionTuple>,) = decode(args)?;
        let cond = Condition::build(&conditions, None, info.value_columns.len())?;
        cond.charge(gas);
        gas.append_operation(InterfaceOpcode::Select, 1);
        let total = self.scan(ctx, info, &cond).await?.len();
        Ok(encode(&(total as u32,)))
    }

    async fn update_by_key(
        &self,
        ctx: &mut PrecompiledContext<'_>,
        info: &TableInfo,
        args: &[u8],
        gas: &mut PrecompiledGas,
    ) -> Result<Vec<u8>> {
        let (key, updates): (String, Vec<UpdateFieldTuple>) = decode(args)?;
        let mut entry = match ctx.get_row(&self.path, &key).await? {
            Some(entry) => entry.padded(info.value_columns.len()),
            None => {
                debug!("Update of {} missed key {}", self.path, key);
                return Ok(encode(&(CODE_UPDATE_KEY_NOT_EXIST,)));
            }
        };
        for (index, value) in Self::resolve_updates(info, updates)? {
            entry.set_field(index, value);
        }
        ctx.set_row(&self.path, &key, entry)?;
        gas.append_operation(InterfaceOpcode::Update, 1);
        Ok(encode(&(1i32,)))
    }

    async fn update_by_condition(
        &self,
        ctx: &mut PrecompiledContext<'_>,
        info: &TableInfo,
        args: &[u8],
        gas: &mut PrecompiledGas,
    ) -> Result<Vec<u8>> {
        let (conditions, limit, updates): (Vec<ConditionTuple>, LimitTuple, Vec<UpdateFieldTuple>) =
            decode(args)?;
        let updates = Self::resolve_updates(info, updates)?;
        let cond = Condition::build(&conditions, Some(limit), info.value_columns.len())?;
        cond.charge(gas);
        let rows = self.scan(ctx, info, &cond).await?;
        let modified = rows.len();
        for (key, mut entry) in rows {
            for (index, value) in &updates {
                entry.set_field(*index, value.clone());
            }
            ctx.set_row(&self.path, &key, entry)?;
        }
        gas.append_operation(InterfaceOpcode::Update, modified as u64);
        Ok(encode(&(modified as i32,)))
    }

    async fn remove_by_key(
        &self,
        ctx: &mut PrecompiledContext<'_>,
        args: &[u8],
        gas: &mut PrecompiledGas,
    ) -> Result<Vec<u8>> {
        let (key,): (String,) = decode(args)?;
        if ctx.get_row(&self.path, &key).await?.is_none() {
            return Ok(encode(&(0i32,)));
        }
        ctx.remove_row(&self.path, &key)?;
        gas.append_operation(InterfaceOpcode::Remove, 1);
        Ok(encode(&(1i32,)))
    }

    async fn remove_by_condition(
        &self,
        ctx: &mut PrecompiledContext<'_>,
        info: &TableInfo,
        args: &[u8],
        gas: &mut PrecompiledGas,
    ) -> Result<Vec<u8>> {
        let (conditions, limit): (Vec<ConditionTuple>, LimitTuple) = decode(args)?;
        let cond = Condition::build(&conditions, Some(limit), info.value_columns.len())?;
        cond.charge(gas);
        let rows = self.scan(ctx, info, &cond).await?;
        for (key, _) in &rows {
            ctx.remove_row(&self.path, key)?;
        }
        gas.append_operation(InterfaceOpcode::Remove, rows.len() as u64);
        Ok(encode(&(rows.len() as i32,)))
    }
}

#[async_trait]
impl Precompiled for TablePrecompiled {
    fn name(&self) -> &'static str {
        "table"
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
            TableMethod::Insert => self.insert(ctx, &info, args, &mut gas).await?,
            TableMethod::SelectByKey => self.select_by_key(ctx, &info, args, &mut gas).await?,
            TableMethod::SelectByCondition => {
                self.select_by_condition(ctx, &info, args, &mut gas).await?
            }
            TableMethod::Count => self.count(ctx, &info, args, &mut gas).await?,
            TableMethod::UpdateByKey => self.update_by_key(ctx, &info, args, &mut gas).await?,
            TableMethod::UpdateByCondition => {
                self.update_by_condition(ctx, &info, args, &mut gas).await?
            }
            TableMethod::RemoveByKey => self.remove_by_key(ctx, args, &mut gas).await?,
            TableMethod::RemoveByCondition => {
                self.remove_by_condition(ctx, &info, args, &mut gas).await?
            }
            TableMethod::Desc => {
                gas.append_operation(InterfaceOpcode::OpenTable, 1);
                encode(&((info.key_column.clone(), info.value_columns.clone()),))
            }
        };
        gas.add_memory(output.len());
        Ok(PrecompiledOutcome::finished(output, gas.total_gas()))
    }
}
