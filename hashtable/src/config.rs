//! Hash table configuration.
//!
//! Every tunable of the table lives here, with defaults that can be
//! overridden programmatically or from environment variables.
//!
//! # Environment Variables
//!
//! - `HASHTABLE_INITIAL_CAPACITY`: expected number of keys (default: `16384`)
//! - `HASHTABLE_LOAD_FACTOR`: fill ratio that triggers growth (default: `0.75`)
//! - `HASHTABLE_MAX_CAPACITY`: largest slot count, a power of two (default: `2^30`)
//! - `HASHTABLE_BATCH_SIZE`: records per batch (default: `4096`)
//! - `HASHTABLE_ENFORCE_VAR_WIDTH_LIMIT`: skip to the next batch instead of
//!   growing a full variable block (default: `false`)
//! - `HASHTABLE_VARIABLE_FIELD_SIZE_ESTIMATE`: expected bytes per variable
//!   component, used to size variable blocks (default: `15`)
//! - `HASHTABLE_VARIABLE_BLOCK_MAX_LENGTH`: explicit variable block size,
//!   overriding the estimate (default: unset)
//!
//! # Invariants
//!
//! After `validate()` succeeds:
//! - `0 < load_factor < 1`
//! - `max_capacity` is a power of two no smaller than `max_values_per_batch()`
//!   and no larger than `MAX_SUPPORTED_CAPACITY`
//! - `batch_size > 0`

// Capacity math goes through f64 for the load factor; all values are far below 2^52.
#![allow(
    clippy::cast_possible_truncation,
    clippy::cast_precision_loss,
    clippy::cast_sign_loss
)]

use std::str::FromStr;

use crate::layout::PivotLayout;
use crate::memory::LENGTH_PREFIX;

/// Tunables for a [`BlockHashTable`](crate::BlockHashTable).
#[derive(Debug, Clone, PartialEq)]
pub struct HashTableConfig {
    /// Expected number of keys; sizes the initial (and minimum) capacity.
    pub initial_capacity: usize,
    /// Fraction of slots that may be occupied before the table grows.
    pub load_factor: f64,
    /// Largest capacity the table may grow to.
    pub max_capacity: usize,
    /// Records per batch. Rounded up to a power of two for chunk addressing;
    /// the rounding slack of each chunk is left as gaps.
    pub batch_size: usize,
    /// Skip to the next batch when the variable block is full instead of
    /// growing it.
    pub enforce_var_width_buffer_limit: bool,
    /// Expected bytes per variable-width key component.
    pub variable_field_size_estimate: usize,
    /// Explicit variable block size in bytes.
    pub variable_block_max_length: Option<usize>,
}

/// Error returned when loading or validating configuration fails.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// A setting has an invalid value.
    InvalidValue { name: String, message: String },
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidValue { name, message } => {
                write!(f, "invalid value for {name}: {message}")
            }
        }
    }
}

impl std::error::Error for ConfigError {}

impl Default for HashTableConfig {
    fn default() -> Self {
        Self {
            initial_capacity: Self::DEFAULT_INITIAL_CAPACITY,
            load_factor: Self::DEFAULT_LOAD_FACTOR,
            max_capacity: Self::DEFAULT_MAX_CAPACITY,
            batch_size: Self::DEFAULT_BATCH_SIZE,
            enforce_var_width_buffer_limit: false,
            variable_field_size_estimate: Self::DEFAULT_VARIABLE_FIELD_SIZE_ESTIMATE,
            variable_block_max_length: None,
        }
    }
}

impl HashTableConfig {
    pub const DEFAULT_INITIAL_CAPACITY: usize = 16_384;
    pub const DEFAULT_LOAD_FACTOR: f64 = 0.75;
    pub const DEFAULT_MAX_CAPACITY: usize = 1 << 30;
    pub const DEFAULT_BATCH_SIZE: usize = 4096;
    pub const DEFAULT_VARIABLE_FIELD_SIZE_ESTIMATE: usize = 15;
    /// Ordinals are 32-bit; gaps may push them past the slot count, so keep headroom.
    pub const MAX_SUPPORTED_CAPACITY: usize = 1 << 30;

    /// Load configuration from environment variables, falling back to defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if a variable is set but unparsable, or the resulting
    /// configuration fails [`validate`](Self::validate).
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let config = Self {
            initial_capacity: load_var("HASHTABLE_INITIAL_CAPACITY", defaults.initial_capacity)?,
            load_factor: load_var("HASHTABLE_LOAD_FACTOR", defaults.load_factor)?,
            max_capacity: load_var("HASHTABLE_MAX_CAPACITY", defaults.max_capacity)?,
            batch_size: load_var("HASHTABLE_BATCH_SIZE", defaults.batch_size)?,
            enforce_var_width_buffer_limit: load_var(
                "HASHTABLE_ENFORCE_VAR_WIDTH_LIMIT",
                defaults.enforce_var_width_buffer_limit,
            )?,
            variable_field_size_estimate: load_var(
                "HASHTABLE_VARIABLE_FIELD_SIZE_ESTIMATE",
                defaults.variable_field_size_estimate,
            )?,
            variable_block_max_length: match std::env::var("HASHTABLE_VARIABLE_BLOCK_MAX_LENGTH") {
                Ok(value) => Some(parse_value("HASHTABLE_VARIABLE_BLOCK_MAX_LENGTH", &value)?),
                Err(_) => None,
            },
        };
        config.validate()?;
        Ok(config)
    }

    #[must_use]
    pub const fn with_initial_capacity(mut self, initial_capacity: usize) -> Self {
        self.initial_capacity = initial_capacity;
        self
    }

    #[must_use]
    pub const fn with_load_factor(mut self, load_factor: f64) -> Self {
        self.load_factor = load_factor;
        self
    }

    #[must_use]
    pub const fn with_max_capacity(mut self, max_capacity: usize) -> Self {
        self.max_capacity = max_capacity;
        self
    }

    #[must_use]
    pub const fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    #[must_use]
    pub const fn with_enforce_var_width_buffer_limit(mut self, enforce: bool) -> Self {
        self.enforce_var_width_buffer_limit = enforce;
        self
    }

    #[must_use]
    pub const fn with_variable_field_size_estimate(mut self, estimate: usize) -> Self {
        self.variable_field_size_estimate = estimate;
        self
    }

    #[must_use]
    pub const fn with_variable_block_max_length(mut self, length: usize) -> Self {
        self.variable_block_max_length = Some(length);
        self
    }

    /// Check the configuration for consistency.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.load_factor > 0.0 && self.load_factor < 1.0) {
            return Err(invalid(
                "load_factor",
                format!("{} must be strictly between 0 and 1", self.load_factor),
            ));
        }
        if self.initial_capacity == 0 {
            return Err(invalid("initial_capacity", "must be positive".to_string()));
        }
        if self.batch_size == 0 {
            return Err(invalid("batch_size", "must be positive".to_string()));
        }
        if !self.max_capacity.is_power_of_two() {
            return Err(invalid(
                "max_capacity",
                format!("{} is not a power of two", self.max_capacity),
            ));
        }
        if self.max_capacity > Self::MAX_SUPPORTED_CAPACITY {
            return Err(invalid(
                "max_capacity",
                format!(
                    "{} exceeds the supported maximum of {}",
                    self.max_capacity,
                    Self::MAX_SUPPORTED_CAPACITY
                ),
            ));
        }
        if self.max_capacity < self.max_values_per_batch() {
            return Err(invalid(
                "max_capacity",
                format!(
                    "{} is smaller than one batch ({} slots)",
                    self.max_capacity,
                    self.max_values_per_batch()
                ),
            ));
        }
        if self.variable_block_max_length == Some(0) {
            return Err(invalid(
                "variable_block_max_length",
                "must be positive".to_string(),
            ));
        }
        Ok(())
    }

    /// Rows addressable per chunk: the batch size rounded up to a power of two.
    #[must_use]
    pub const fn max_values_per_batch(&self) -> usize {
        self.batch_size.next_power_of_two()
    }

    /// Capacity the table starts with and resets to.
    #[must_use]
    pub fn min_capacity(&self) -> usize {
        let wanted = (self.initial_capacity as f64 / self.load_factor).ceil() as usize;
        wanted
            .next_power_of_two()
            .max(self.max_values_per_batch())
            .min(self.max_capacity)
    }

    /// Insertion threshold for a table of `capacity` slots.
    #[must_use]
    pub fn max_size_for(&self, capacity: usize) -> usize {
        (capacity as f64 * self.load_factor).floor() as usize
    }

    /// Initial size of each chunk's variable block for `layout`.
    #[must_use]
    pub fn variable_block_max_length(&self, layout: &PivotLayout) -> usize {
        if layout.is_fixed_only() {
            return 0;
        }
        self.variable_block_max_length.unwrap_or_else(|| {
            let per_component = self.variable_field_size_estimate + LENGTH_PREFIX;
            self.batch_size * (LENGTH_PREFIX + layout.variable_count() * per_component)
        })
    }
}

fn invalid(name: &str, message: String) -> ConfigError {
    ConfigError::InvalidValue {
        name: name.to_string(),
        message,
    }
}

/// Load a setting from the environment, returning `default` if it is not set.
fn load_var<T: FromStr>(name: &str, default: T) -> Result<T, ConfigError> {
    match std::env::var(name) {
        Ok(value) => parse_value(name, &value),
        Err(_) => Ok(default),
    }
}

fn parse_value<T: FromStr>(name: &str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse::<T>().map_err(|_| ConfigError::InvalidValue {
        name: name.to_string(),
        message: format!("'{value}' could not be parsed"),
    })
}
