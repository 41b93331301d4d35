//! Main simulator harness for deterministic simulation testing.
//!
//! Drives a table with generated operations, mirrors every effect in a model
//! of expected ordinals, and checks invariants after each operation.

// Offsets within a batch always fit in an ordinal.
#![allow(clippy::cast_possible_truncation)]

use std::sync::Arc;

use super::invariants::{ExpectedOrdinals, InvariantChecker, InvariantViolation};
use super::op_gen::{OpGenConfig, OpGenerator, Operation, SimKey};
use crate::config::HashTableConfig;
use crate::error::Result;
use crate::layout::{KeyRef, PivotLayout};
use crate::listener::{RecordMove, ResizeListener};
use crate::memory::BufferAllocator;
use crate::table::BlockHashTable;

/// Configuration for the simulator.
#[derive(Debug, Clone)]
pub struct SimulatorConfig {
    /// Random seed for reproducibility.
    pub seed: u64,
    pub table_config: HashTableConfig,
    pub op_config: OpGenConfig,
}

impl SimulatorConfig {
    /// Fixed-only keys in small batches.
    #[must_use]
    pub fn new(seed: u64) -> Self {
        Self {
            seed,
            table_config: HashTableConfig::default()
                .with_initial_capacity(16)
                .with_batch_size(64),
            op_config: OpGenConfig::default(),
        }
    }

    /// Generate keys with variable tails up to `max_tail_length` bytes.
    #[must_use]
    pub const fn with_variable_tails(mut self, max_tail_length: usize) -> Self {
        self.op_config.max_tail_length = max_tail_length;
        self
    }

    #[must_use]
    pub fn with_table_config(mut self, table_config: HashTableConfig) -> Self {
        self.table_config = table_config;
        self
    }

    #[must_use]
    pub const fn with_splice_rate(mut self, rate: f64) -> Self {
        self.op_config.splice_rate = rate;
        self
    }

    #[must_use]
    pub const fn with_reset_rate(mut self, rate: f64) -> Self {
        self.op_config.reset_rate = rate;
        self
    }
}

/// Results from a simulation run.
#[derive(Debug)]
pub struct SimulationResult {
    pub seed: u64,
    pub operations: usize,
    pub inserted: usize,
    pub matched: usize,
    pub splices: usize,
    pub resets: usize,
    pub final_size: usize,
    pub invariant_violations: Vec<InvariantViolation>,
    /// Error that stopped the run early.
    pub error: Option<String>,
}

impl SimulationResult {
    #[must_use]
    pub fn passed(&self) -> bool {
        self.error.is_none() && self.invariant_violations.is_empty()
    }

    /// Seed, stopping error and violations, one per line.
    #[must_use]
    pub fn report(&self) -> String {
        let mut lines = vec![format!(
            "seed {} after {} operations",
            self.seed, self.operations
        )];
        if let Some(error) = &self.error {
            lines.push(error.clone());
        }
        lines.extend(self.invariant_violations.iter().map(ToString::to_string));
        lines.join("\n")
    }
}

/// Stand-in for the accumulator store: tracks batch parity and moved records.
#[derive(Debug, Default)]
struct AccumulatorModel {
    batches: usize,
    pending: bool,
    moved_records: usize,
}

impl ResizeListener for AccumulatorModel {
    fn add_batch(&mut self) -> Result<()> {
        self.batches += 1;
        self.pending = true;
        Ok(())
    }

    fn commit_resize(&mut self) {
        self.pending = false;
    }

    fn revert_resize(&mut self) {
        if self.pending {
            self.batches -= 1;
            self.pending = false;
        }
    }

    fn verify_batch_count(&self, batches: usize) {
        assert_eq!(self.batches, batches, "accumulator batches out of step");
    }

    fn move_fixed_values_and_free_space(&mut self, record_move: RecordMove) {
        self.moved_records += record_move.count;
    }

    fn move_variable_values_and_free_space(&mut self, _record_move: RecordMove) {}
}

/// The main simulator harness.
pub struct Simulator {
    seed: u64,
    generator: OpGenerator,
    checker: InvariantChecker,
    expected: ExpectedOrdinals,
    accumulators: AccumulatorModel,
    allocator: Arc<BufferAllocator>,
    table: BlockHashTable,
    inserted: usize,
    matched: usize,
    splices: usize,
    resets: usize,
}

impl Simulator {
    pub fn new(config: SimulatorConfig) -> Result<Self> {
        let layout = if config.op_config.max_tail_length == 0 {
            PivotLayout::fixed(8)
        } else {
            PivotLayout::variable(12, 1)
        };
        let allocator = BufferAllocator::unbounded();
        let table =
            BlockHashTable::new(layout, config.table_config, Arc::clone(&allocator))?;
        Ok(Self {
            seed: config.seed,
            generator: OpGenerator::with_config(config.seed, config.op_config),
            checker: InvariantChecker::new(),
            expected: ExpectedOrdinals::new(),
            accumulators: AccumulatorModel::default(),
            allocator,
            table,
            inserted: 0,
            matched: 0,
            splices: 0,
            resets: 0,
        })
    }

    /// Run `operation_count` generated operations.
    pub fn run(&mut self, operation_count: usize) -> SimulationResult {
        let mut error = None;
        for index in 0..operation_count {
            let operation = self.generator.next_operation();
            if let Err(e) = self.apply(&operation, index) {
                error = Some(format!("operation {index} ({operation:?}) failed: {e}"));
                break;
            }
            self.checker.check_shape(&self.table, &self.allocator, index);
            self.checker.check_contents(&self.table, &self.expected, index);
            if self.accumulators.batches != self.table.blocks() {
                self.checker.add_violation(
                    "Accumulator batches differ from table batches",
                    index,
                    format!(
                        "accumulators: {}, table: {}",
                        self.accumulators.batches,
                        self.table.blocks()
                    ),
                );
            }
        }

        SimulationResult {
            seed: self.seed,
            operations: operation_count,
            inserted: self.inserted,
            matched: self.matched,
            splices: self.splices,
            resets: self.resets,
            final_size: self.table.size(),
            invariant_violations: self.checker.violations().to_vec(),
            error,
        }
    }

    fn apply(&mut self, operation: &Operation, index: usize) -> Result<()> {
        match operation {
            Operation::Add(key) => {
                let key_hash = self.table.hash_key(key.key_ref(), 0);
                let result = self.table.get_or_insert_with_retry(
                    key_hash,
                    key.key_ref(),
                    &mut self.accumulators,
                )?;
                if let Some(ordinal) = result.ordinal() {
                    self.record_ordinal(key, ordinal, index);
                }
            }
            Operation::AddBatch(keys) => {
                let refs: Vec<KeyRef<'_>> = keys.iter().map(SimKey::key_ref).collect();
                let hashes: Vec<u64> = refs.iter().map(|&key| self.table.hash_key(key, 0)).collect();
                let mut ordinals = vec![0; keys.len()];
                self.table
                    .get_or_insert_all(&refs, &hashes, &mut ordinals, &mut self.accumulators)
                    .map_err(|e| e.source)?;
                for (key, ordinal) in keys.iter().zip(ordinals) {
                    self.record_ordinal(key, ordinal, index);
                }
            }
            Operation::Find(key) => {
                let key_ref = key.key_ref();
                let found = self.table.find(self.table.hash_key(key_ref, 0), key_ref);
                let expected = self.expected.get(key).copied();
                if found != expected {
                    self.checker.add_violation(
                        "Lookup disagrees with model",
                        index,
                        format!("{key:?}: expected {expected:?}, found {found:?}"),
                    );
                }
            }
            Operation::Splice { batch_hint } => {
                if self.table.blocks() > 0 {
                    self.splice(batch_hint % self.table.blocks(), index)?;
                }
            }
            Operation::Reset => {
                self.table.reset_to_minimum_size()?;
                self.accumulators.batches = self.table.blocks();
                self.expected.clear();
                self.resets += 1;
            }
        }
        Ok(())
    }

    fn record_ordinal(&mut self, key: &SimKey, ordinal: u32, index: usize) {
        match self.expected.get(key) {
            Some(&expected) => {
                self.matched += 1;
                if expected != ordinal {
                    self.checker.add_violation(
                        "Existing key got a different ordinal",
                        index,
                        format!("{key:?}: expected {expected}, got {ordinal}"),
                    );
                }
            }
            None => {
                self.inserted += 1;
                self.expected.insert(key.clone(), ordinal);
            }
        }
    }

    /// Splice `batch` and move the model's ordinals the way the table does.
    fn splice(&mut self, batch: usize, index: usize) -> Result<()> {
        let records = self.table.records_in_batch(batch).unwrap_or(0);
        if records < 2 {
            return Ok(());
        }
        let per_batch = self.table.max_values_per_batch();
        let moved_from = batch * per_batch + records / 2;
        let moved_to = batch * per_batch + records;
        let moved_before = self.accumulators.moved_records;

        let target = self.table.splice(batch, 0, &mut self.accumulators)?;
        self.splices += 1;

        #[allow(clippy::expect_used)] // The table only hands out ordinals that fit
        let target_start = u32::try_from(target * per_batch).expect("ordinal overflow");
        for ordinal in self.expected.values_mut() {
            let old = *ordinal as usize;
            if (moved_from..moved_to).contains(&old) {
                *ordinal = target_start + (old - moved_from) as u32;
            }
        }
        if self.accumulators.moved_records - moved_before != moved_to - moved_from {
            self.checker.add_violation(
                "Accumulators were not moved with their keys",
                index,
                format!("batch {batch} into {target}"),
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(config: SimulatorConfig, operations: usize) -> SimulationResult {
        let mut simulator = Simulator::new(config).expect("create simulator");
        simulator.run(operations)
    }

    #[test]
    fn test_simulator_fixed_keys() {
        let result = run(SimulatorConfig::new(12345), 400);

        assert!(result.passed(), "{}", result.report());
        assert!(result.inserted > 0);
        assert!(result.matched > 0);
    }

    #[test]
    fn test_simulator_variable_keys() {
        let result = run(SimulatorConfig::new(777).with_variable_tails(24), 400);

        assert!(result.passed(), "{}", result.report());
    }

    #[test]
    fn test_simulator_strict_variable_limit() {
        let table_config = HashTableConfig::default()
            .with_initial_capacity(16)
            .with_batch_size(16)
            .with_enforce_var_width_buffer_limit(true)
            .with_variable_block_max_length(96);
        let config = SimulatorConfig::new(4242)
            .with_variable_tails(40)
            .with_table_config(table_config);
        let result = run(config, 400);

        assert!(result.passed(), "{}", result.report());
    }

    #[test]
    fn test_simulator_frequent_splices() {
        let config = SimulatorConfig::new(31337)
            .with_variable_tails(8)
            .with_splice_rate(0.2);
        let result = run(config, 300);

        assert!(result.passed(), "{}", result.report());
        assert!(result.splices > 0);
    }

    #[test]
    fn test_simulator_resets() {
        let config = SimulatorConfig::new(8086)
            .with_variable_tails(12)
            .with_reset_rate(0.05);
        let result = run(config, 400);

        assert!(result.passed(), "{}", result.report());
        assert!(result.resets > 0);
        assert_eq!(result.operations, 400);
    }

    #[test]
    fn test_simulator_deterministic() {
        let first = run(SimulatorConfig::new(2024).with_variable_tails(16), 200);
        let second = run(SimulatorConfig::new(2024).with_variable_tails(16), 200);

        assert_eq!(first.inserted, second.inserted);
        assert_eq!(first.matched, second.matched);
        assert_eq!(first.splices, second.splices);
        assert_eq!(first.resets, second.resets);
        assert_eq!(first.final_size, second.final_size);
    }

    #[test]
    #[ignore] // Long running test
    fn test_simulator_stress() {
        let config = SimulatorConfig::new(99999)
            .with_variable_tails(32)
            .with_splice_rate(0.05);
        let result = run(config, 20_000);

        assert!(result.passed(), "{}", result.report());
    }
}
