//! Configuration of the transaction listener subsystem.

use std::env;
use std::time::Duration;

fn env_parse<T: std::str::FromStr>(name: &str, default: T) -> T {
    env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

/// Chain listener sessions
#[derive(Debug, Clone)]
pub struct ListenerConfig {
    /// Consecutive ticks without pending work before a session stops itself
    pub empty_tick_threshold: u32,
    /// Upper bound on concurrent block fetches per tick
    pub max_in_flight_blocks: usize,
    /// Polling period for chains that do not declare a block time
    pub default_block_time: Duration,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            empty_tick_threshold: 3,
            max_in_flight_blocks: 10,
            default_block_time: Duration::from_millis(1_000),
        }
    }
}

impl ListenerConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            empty_tick_threshold: env_parse(
                "LISTENER_EMPTY_TICK_THRESHOLD",
                defaults.empty_tick_threshold,
            ),
            max_in_flight_blocks: env_parse(
                "LISTENER_MAX_IN_FLIGHT_BLOCKS",
                defaults.max_in_flight_blocks,
            )
            .max(1),
            default_block_time: Duration::from_millis(env_parse(
                "LISTENER_DEFAULT_BLOCK_TIME_MS",
                1_000,
            )),
        }
    }
}

/// Receipt retrieval of mined jobs
#[derive(Debug, Clone)]
pub struct MinedJobConfig {
    pub receipt_max_retries: u32,
    /// Constant delay between receipt lookups
    pub receipt_retry_interval: Duration,
}

impl Default for MinedJobConfig {
    fn default() -> Self {
        Self {
            receipt_max_retries: 5,
            receipt_retry_interval: Duration::from_millis(1_000),
        }
    }
}

impl MinedJobConfig {
    pub fn from_env() -> Self {
        Self {
            receipt_max_retries: env_parse("MINED_RECEIPT_MAX_RETRIES", 5),
            receipt_retry_interval: Duration::from_millis(env_parse(
                "MINED_RECEIPT_RETRY_INTERVAL_MS",
                1_000,
            )),
        }
    }
}

/// Tx-sentry sessions
#[derive(Debug, Clone)]
pub struct SentryConfig {
    /// Maximum retries per job lineage, counting children and resends
    pub max_retries: u32,
}

impl Default for SentryConfig {
    fn default() -> Self {
        Self { max_retries: 10 }
    }
}

impl SentryConfig {
    pub fn from_env() -> Self {
        Self {
            max_retries: env_parse("SENTRY_MAX_RETRIES", 10),
        }
    }
}

/// Inbound message handling
#[derive(Debug, Clone)]
pub struct ConsumerConfig {
    pub max_attempts: u32,
    pub backoff_base: Duration,
    pub max_backoff: Duration,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_base: Duration::from_millis(200),
            max_backoff: Duration::from_millis(5_000),
        }
    }
}

impl ConsumerConfig {
    pub fn from_env() -> Self {
        Self {
            max_attempts: env_parse("CONSUMER_MAX_ATTEMPTS", 3_u32).max(1),
            backoff_base: Duration::from_millis(env_parse("CONSUMER_BACKOFF_BASE_MS", 200)),
            max_backoff: Duration::from_millis(env_parse("CONSUMER_MAX_BACKOFF_MS", 5_000)),
        }
    }
}

/// Everything the listener subsystem needs
#[derive(Debug, Clone, Default)]
pub struct TxListenerConfig {
    pub listener: ListenerConfig,
    pub mined: MinedJobConfig,
    pub sentry: SentryConfig,
    pub consumer: ConsumerConfig,
}

impl TxListenerConfig {
    pub fn from_env() -> Self {
        Self {
            listener: ListenerConfig::from_env(),
            mined: MinedJobConfig::from_env(),
            sentry: SentryConfig::from_env(),
            consumer: ConsumerConfig::from_env(),
        }
    }
}
