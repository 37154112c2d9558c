// tessera/core/execution/src/precompiles/condition.rs

//! Row filters for range select, count, update and remove.
//!
//! Wire shape of one clause: `(uint8 comparator, uint32 columnIndex, string value)`.
//! Column 0 is the key column; column `i >= 1` is value column `i - 1`.
//! Comparisons are bytewise on the stored strings.

use super::gas::{InterfaceOpcode, PrecompiledGas};
use super::utilities::USER_TABLE_MAX_LIMIT_COUNT;
use crate::types::{ExecutorError, Result};
use tessera_storage::Entry;

pub type ConditionTuple = (u8, u32, String);
pub type LimitTuple = (u32, u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Comparator {
    GT,
    GE,
    LT,
    LE,
    EQ,
    NE,
    StartsWith,
    EndsWith,
    Contains,
}

impl Comparator {
    pub fn from_code(code: u8) -> Result<Self> {
        Ok(match code {
            0 => Comparator::GT,
            1 => Comparator::GE,
            2 => Comparator::LT,
            3 => Comparator::LE,
            4 => Comparator::EQ,
            5 => Comparator::NE,
            6 => Comparator::StartsWith,
            7 => Comparator::EndsWith,
            8 => Comparator::Contains,
            other => {
                return Err(ExecutorError::Precompiled(format!(
                    "condition comparator {} does not exist",
                    other
                )))
            }
        })
    }

    pub fn code(&self) -> u8 {
        *self as u8
    }

    fn opcode(&self) -> InterfaceOpcode {
        match self {
            Comparator::GT => InterfaceOpcode::GT,
            Comparator::GE => InterfaceOpcode::GE,
            Comparator::LT => InterfaceOpcode::LT,
            Comparator::LE => InterfaceOpcode::LE,
            Comparator::NE => InterfaceOpcode::NE,
            _ => InterfaceOpcode::EQ,
        }
    }

    fn test(&self, actual: &str, expected: &str) -> bool {
        match self {
            Comparator::GT => actual > expected,
            Comparator::GE => actual >= expected,
            Comparator::LT => actual < expected,
            Comparator::LE => actual <= expected,
            Comparator::EQ => actual == expected,
            Comparator::NE => actual != expected,
            Comparator::StartsWith => actual.starts_with(expected),
            Comparator::EndsWith => actual.ends_with(expected),
            Comparator::Contains => actual.contains(expected),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Clause {
    comparator: Comparator,
    column: usize,
    value: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Condition {
    clauses: Vec<Clause>,
    offset: usize,
    count: usize,
}

impl Condition {
    /// Builds a filter for a table with `value_columns` value columns.
    pub fn build(
        conditions: &[ConditionTuple],
        limit: Option<LimitTuple>,
        value_columns: usize,
    ) -> Result<Self> {
        let mut clauses = Vec::with_capacity(conditions.len());
        for (code, column, value) in conditions {
            let comparator = Comparator::from_code(*code)?;
            let column = *column as usize;
            if column > value_columns {
                return Err(ExecutorError::Precompiled(format!(
                    "condition column index {} out of range",
                    column
                )));
            }
            clauses.push(Clause {
                comparator,
                column,
                value: value.clone(),
            });
        }
        let (offset, count) = match limit {
            Some((offset, count)) => {
                if count > USER_TABLE_MAX_LIMIT_COUNT || offset.checked_add(count).is_none() {
                    return Err(ExecutorError::Precompiled(format!(
                        "limit overflow: offset {} count {}",
                        offset, count
                    )));
                }
                (offset as usize, count as usize)
            }
            None => (0, usize::MAX),
        };
        Ok(Self {
            clauses,
            offset,
            count,
        })
    }

    pub fn offset(&self) -> usize {
        self.offset
    }

    pub fn count(&self) -> usize {
        self.count
    }

    /// Checks only the key column clauses.
    pub fn matches_key(&self, key: &str) -> bool {
        self.clauses
            .iter()
            .filter(|c| c.column == 0)
            .all(|c| c.comparator.test(key, &c.value))
    }

    pub fn has_value_clauses(&self) -> bool {
        self.clauses.iter().any(|c| c.column > 0)
    }

    pub fn matches(&self, key: &str, entry: &Entry) -> bool {
        self.clauses.iter().all(|c| {
            let actual = if c.column == 0 {
                key
            } else {
                entry.field(c.column - 1)
            };
            c.comparator.test(actual, &c.value)
        })
    }

    /// Applies offset and count to matches produced in key order.
    pub fn window<T>(&self, matches: impl IntoIterator<Item = T>) -> Vec<T> {
        matches
            .into_iter()
            .skip(self.offset)
            .take(self.count)
            .collect()
    }

    pub fn charge(&self, gas: &mut PrecompiledGas) {
        for clause in &self.clauses {
            gas.append_operation(clause.comparator.opcode(), 1);
        }
        if self.count != usize::MAX {
            gas.append_operation(InterfaceOpcode::Limit, 1);
        }
    }
}
