//! Runtime tunables, loaded once at [`crate::runtime::Runtime`] construction.
//!
//! Loading hierarchy mirrors the sibling `knhk-config` crate's
//! `env > file > defaults`: there is no on-disk config file in this
//! crate's scope (no persisted state is a stated non-goal), so the file
//! tier is a no-op and only `env > defaults` applies in practice.

use thiserror::Error;

/// Config-loading failure. Distinct from [`crate::error::FabricError`]
/// because a malformed environment variable is a startup-configuration
/// problem, not one of the runtime error kinds the fixed taxonomy covers.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("invalid value for {name}: {value}")]
    InvalidValue { name: &'static str, value: String },
}

/// Default mapped-heap cap before page-alignment, 16 MiB.
pub const DEFAULT_MAX_HEAP_BYTES: u64 = 16 * 1024 * 1024;
/// Default arena region size, 4 KiB.
pub const DEFAULT_ARENA_POOL_BYTES: usize = 4 * 1024;
/// Default element count per typed-arena region.
pub const DEFAULT_TYPED_ARENA_POOL_COUNT: usize = 64;
/// Default ordered-queue spin rounds before blocking.
pub const DEFAULT_QUEUE_SPIN_ROUNDS: u32 = 32;
/// Default pause-acknowledgment timeout, milliseconds.
pub const DEFAULT_PAUSE_WAIT_MS: u64 = 60_000;

#[derive(Debug, Clone, Copy)]
pub struct Config {
    pub max_heap_bytes: u64,
    pub arena_pool_bytes: usize,
    pub typed_arena_pool_count: usize,
    pub queue_spin_rounds: u32,
    pub pause_wait_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_heap_bytes: DEFAULT_MAX_HEAP_BYTES,
            arena_pool_bytes: DEFAULT_ARENA_POOL_BYTES,
            typed_arena_pool_count: DEFAULT_TYPED_ARENA_POOL_COUNT,
            queue_spin_rounds: DEFAULT_QUEUE_SPIN_ROUNDS,
            pause_wait_ms: DEFAULT_PAUSE_WAIT_MS,
        }
    }
}

impl Config {
    /// Build a `Config` from defaults overridden by recognized environment
    /// variables (`VEIL_FABRIC_MAX_HEAP_BYTES`, `VEIL_FABRIC_ARENA_POOL_BYTES`,
    /// `VEIL_FABRIC_TYPED_ARENA_POOL_COUNT`, `VEIL_FABRIC_QUEUE_SPIN_ROUNDS`,
    /// `VEIL_FABRIC_PAUSE_WAIT_MS`), all optional.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(v) = env_u64("VEIL_FABRIC_MAX_HEAP_BYTES")? {
            config.max_heap_bytes = v;
        }
        if let Some(v) = env_usize("VEIL_FABRIC_ARENA_POOL_BYTES")? {
            config.arena_pool_bytes = v;
        }
        if let Some(v) = env_usize("VEIL_FABRIC_TYPED_ARENA_POOL_COUNT")? {
            config.typed_arena_pool_count = v;
        }
        if let Some(v) = env_u32("VEIL_FABRIC_QUEUE_SPIN_ROUNDS")? {
            config.queue_spin_rounds = v;
        }
        if let Some(v) = env_u64("VEIL_FABRIC_PAUSE_WAIT_MS")? {
            config.pause_wait_ms = v;
        }

        Ok(config)
    }
}

fn env_u64(name: &'static str) -> Result<Option<u64>, ConfigError> {
    match std::env::var(name) {
        Ok(value) => value
            .parse::<u64>()
            .map(Some)
            .map_err(|_| ConfigError::InvalidValue { name, value }),
        Err(_) => Ok(None),
    }
}

fn env_u32(name: &'static str) -> Result<Option<u32>, ConfigError> {
    match std::env::var(name) {
        Ok(value) => value
            .parse::<u32>()
            .map(Some)
            .map_err(|_| ConfigError::InvalidValue { name, value }),
        Err(_) => Ok(None),
    }
}

fn env_usize(name: &'static str) -> Result<Option<usize>, ConfigError> {
    match std::env::var(name) {
        Ok(value) => value
            .parse::<usize>()
            .map(Some)
            .map_err(|_| ConfigError::InvalidValue { name, value }),
        Err(_) => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec() {
        let config = Config::default();
        assert_eq!(config.max_heap_bytes, 16 * 1024 * 1024);
        assert_eq!(config.arena_pool_bytes, 4 * 1024);
        assert_eq!(config.typed_arena_pool_count, 64);
        assert_eq!(config.queue_spin_rounds, 32);
        assert_eq!(config.pause_wait_ms, 60_000);
    }

    #[test]
    fn env_override() {
        std::env::set_var("VEIL_FABRIC_QUEUE_SPIN_ROUNDS", "7");
        let config = Config::from_env().unwrap();
        assert_eq!(config.queue_spin_rounds, 7);
        std::env::remove_var("VEIL_FABRIC_QUEUE_SPIN_ROUNDS");
    }
}
