//! Deterministic Simulation Testing (DST) infrastructure.
//!
//! This module drives a table with long, seeded sequences of inserts,
//! lookups, splices and resets, and after every operation compares it against
//! a plain `HashMap` model of the ordinals it should hand out.
//!
//! # Design Principles
//!
//! 1. All randomness is seeded for reproducibility
//! 2. The accumulator store is modelled, so batch parity is checked too
//! 3. Given the same seed, execution is identical
//!
//! # Usage
//!
//! ```ignore
//! use simulator::{Simulator, SimulatorConfig};
//!
//! let config = SimulatorConfig::new(12345) // seed
//!     .with_variable_tails(16)
//!     .with_splice_rate(0.05);
//!
//! let mut sim = Simulator::new(config)?;
//! let result = sim.run(1000); // Run 1000 operations
//!
//! assert!(result.passed(), "{}", result.report());
//! ```

mod op_gen;
mod simulator;
