// Forbid unwrap() in production code to prevent panics from bad input.
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
use std::str::FromStr;
use std::sync::Arc;

use hashtable::{
    BlockHashTable, BufferAllocator, HashTableConfig, KeyRef, NoopResizeListener, PivotLayout,
};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Keys hashed and inserted per vectorized call.
const CALL_SIZE: usize = 1024;

/// Drive the table with random keys and report what it did.
///
/// # Environment Variables
///
/// - `HASHTABLE_MEMORY_LIMIT`: allocator budget in bytes (default: unbounded)
/// - `HASHTABLE_KEY_COUNT`: number of keys to insert (default: `1000000`)
/// - `HASHTABLE_SEED`: seed for key generation (default: `42`)
///
/// Table tunables are read by [`HashTableConfig::from_env`].
fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "hashtable=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration from environment variables
    let config = match HashTableConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            tracing::error!("Failed to load configuration: {e}");
            std::process::exit(1);
        }
    };
    let memory_limit = env_or_exit("HASHTABLE_MEMORY_LIMIT", usize::MAX);
    let key_count = env_or_exit("HASHTABLE_KEY_COUNT", 1_000_000_usize);
    let seed = env_or_exit("HASHTABLE_SEED", 42_u64);

    tracing::info!(
        "Loaded configuration: batch_size={}, initial_capacity={}, load_factor={}",
        config.batch_size,
        config.initial_capacity,
        config.load_factor
    );

    let allocator = BufferAllocator::new(memory_limit);
    let mut table =
        match BlockHashTable::new(PivotLayout::fixed(8), config, Arc::clone(&allocator)) {
            Ok(table) => table,
            Err(e) => {
                tracing::error!("Failed to create hash table: {e}");
                std::process::exit(1);
            }
        };

    // Half as many distinct values as keys, so roughly half the inserts match.
    let key_space = (key_count / 2).max(1) as u64;
    let mut rng = StdRng::seed_from_u64(seed);
    let mut inserted = 0;
    while inserted < key_count {
        let len = CALL_SIZE.min(key_count - inserted);
        let values: Vec<[u8; 8]> = (0..len)
            .map(|_| rng.random_range(0..key_space).to_le_bytes())
            .collect();
        let keys: Vec<KeyRef<'_>> = values.iter().map(|v| KeyRef::fixed(v)).collect();
        let hashes: Vec<u64> = keys.iter().map(|&key| table.hash_key(key, 0)).collect();
        let mut ordinals = vec![0; len];

        if let Err(e) = table.add_all(&keys, &hashes, &mut ordinals) {
            tracing::error!("Stopped after {} keys: {e}", inserted + e.processed);
            break;
        }
        inserted += len;
    }

    if table.records_in_batch(0).unwrap_or(0) >= 2 {
        match table.splice(0, 0, &mut NoopResizeListener) {
            Ok(target) => tracing::info!("Spliced batch 0 into batch {target}"),
            Err(e) => tracing::warn!("Splice failed: {e}"),
        }
    }

    tracing::info!("{}", table.stats());
    tracing::info!(
        "Allocator: {} bytes in use, {} bytes peak",
        allocator.allocated(),
        allocator.peak()
    );
}

/// Read a numeric setting from the environment, exiting on a malformed value.
fn env_or_exit<T: FromStr>(name: &str, default: T) -> T {
    let Ok(value) = std::env::var(name) else {
        return default;
    };
    value.parse().unwrap_or_else(|_| {
        tracing::error!("Invalid value for {name}: {value:?}");
        std::process::exit(1);
    })
}
