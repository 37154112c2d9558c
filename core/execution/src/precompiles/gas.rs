// tessera/core/execution/src/precompiles/gas.rs

// Gas pricing for table operations
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum InterfaceOpcode {
    EQ,
    GE,
    GT,
    LE,
    LT,
    NE,
    Limit,
    OpenTable,
    Select,
    Insert,
    Update,
    Remove,
    CreateTable,
}

impl InterfaceOpcode {
    pub fn cost(&self) -> u64 {
        match self {
            InterfaceOpcode::EQ
            | InterfaceOpcode::GE
            | InterfaceOpcode::GT
            | InterfaceOpcode::LE
            | InterfaceOpcode::LT
            | InterfaceOpcode::NE
            | InterfaceOpcode::Limit => 3,
            InterfaceOpcode::OpenTable | InterfaceOpcode::Select => 200,
            InterfaceOpcode::Insert | InterfaceOpcode::Update => 10_000,
            InterfaceOpcode::Remove => 2_500,
            InterfaceOpcode::CreateTable => 16_000,
        }
    }
}

/// Accumulates the cost of one precompiled call
#[derive(Debug, Clone, Default)]
pub struct PrecompiledGas {
    operations: BTreeMap<InterfaceOpcode, u64>,
    memory_bytes: u64,
}

impl PrecompiledGas {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append_operation(&mut self, op: InterfaceOpcode, times: u64) {
        *self.operations.entry(op).or_insert(0) += times;
    }

    /// Adds touched bytes (input, output, row payloads).
    pub fn add_memory(&mut self, bytes: usize) {
        self.memory_bytes = self.memory_bytes.saturating_add(bytes as u64);
    }

    pub fn memory_gas(&self) -> u64 {
        let words = self.memory_bytes.div_ceil(32);
        words
            .saturating_mul(3)
            .saturating_add(words.saturating_mul(words) / 512)
    }

    pub fn total_gas(&self) -> u64 {
        self.operations
            .iter()
            .map(|(op, times)| op.cost().saturating_mul(*times))
            .fold(self.memory_gas(), u64::saturating_add)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_operation_costs_accumulate() {
        let mut gas = PrecompiledGas::new();
        gas.append_operation(InterfaceOpcode::Insert, 1);
        gas.append_operation(InterfaceOpcode::GE, 2);
        assert_eq!(gas.total_gas(), 10_006);
    }

    #[test]
    fn test_memory_gas_is_quadratic() {
        let mut gas = PrecompiledGas::new();
        gas.add_memory(33);
        // two words
        assert_eq!(gas.memory_gas(), 6);

        let mut big = PrecompiledGas::new();
        big.add_memory(32 * 1024);
        assert_eq!(big.memory_gas(), 1024 * 3 + 1024 * 1024 / 512);
        assert_eq!(PrecompiledGas::new().total_gas(), 0);
    }
}
