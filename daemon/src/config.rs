use std::time::Duration;

use folio_common::chain::ChainId;
use serde::{Deserialize, Serialize};

// How often the sync loop wakes up and how many wallets it works at once
pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 300;
pub const DEFAULT_CONCURRENT_WALLETS: usize = 3;

// Block range policy: first sync looks this far back, incremental syncs are
// capped so one cycle stays bounded
pub const DEFAULT_INITIAL_LOOKBACK_BLOCKS: u64 = 1_000_000;
pub const DEFAULT_MAX_BLOCKS_PER_CYCLE: u64 = 10_000;

// A wallet stuck in `syncing` longer than this is considered abandoned by a
// crashed worker and may be re-claimed
pub const DEFAULT_STALE_CLAIM_SECS: u64 = 900;

// Exponential error backoff is capped at this many poll intervals
pub const MAX_ERROR_BACKOFF_MULTIPLIER: u32 = 8;

// Price cache TTLs
pub const HOT_PRICE_TTL_SECS: u64 = 60;
pub const STALE_PRICE_TTL_SECS: u64 = 24 * 60 * 60;
// A history snapshot younger than this still counts as a fresh price
pub const RECENT_PRICE_WINDOW_SECS: u64 = 300;

// Circuit breaker: consecutive failures before opening, and how long it
// stays open before a half-open probe
pub const BREAKER_FAILURE_THRESHOLD: u32 = 3;
pub const BREAKER_OPEN_SECS: u64 = 300;

// Background price refresher
pub const DEFAULT_REFRESH_INTERVAL_SECS: u64 = 300;
pub const DEFAULT_REFRESH_BATCH_SIZE: usize = 50;

// In-memory price cache capacity (entries per namespace)
pub const PRICE_CACHE_CAPACITY: usize = 4096;

// How long a transaction waits on a balance row lock before the attempt is
// reported as a transient conflict
pub const BALANCE_LOCK_TIMEOUT_SECS: u64 = 5;

// Grace period for background tasks to observe shutdown
pub const SHUTDOWN_GRACE_SECS: u64 = 10;

// Native coin symbol per supported EVM chain
pub fn native_symbol(chain_id: ChainId) -> Option<&'static str> {
    match chain_id {
        1 | 10 | 42161 | 8453 => Some("ETH"),
        137 => Some("MATIC"),
        56 => Some("BNB"),
        43114 => Some("AVAX"),
        _ => None,
    }
}

fn default_poll_interval() -> u64 {
    DEFAULT_POLL_INTERVAL_SECS
}

fn default_concurrent_wallets() -> usize {
    DEFAULT_CONCURRENT_WALLETS
}

fn default_initial_lookback() -> u64 {
    DEFAULT_INITIAL_LOOKBACK_BLOCKS
}

fn default_max_blocks() -> u64 {
    DEFAULT_MAX_BLOCKS_PER_CYCLE
}

fn default_stale_claim() -> u64 {
    DEFAULT_STALE_CLAIM_SECS
}

fn default_enabled() -> bool {
    true
}

#[derive(Debug, Clone, clap::Args, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Seconds between sync cycles
    #[clap(long, default_value_t = DEFAULT_POLL_INTERVAL_SECS)]
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,
    /// How many wallets are synced concurrently
    #[clap(long, default_value_t = DEFAULT_CONCURRENT_WALLETS)]
    #[serde(default = "default_concurrent_wallets")]
    pub concurrent_wallets: usize,
    /// Blocks to look back on a wallet's first sync
    #[clap(long, default_value_t = DEFAULT_INITIAL_LOOKBACK_BLOCKS)]
    #[serde(default = "default_initial_lookback")]
    pub initial_lookback_blocks: u64,
    /// Maximum block span fetched in one cycle
    #[clap(long, default_value_t = DEFAULT_MAX_BLOCKS_PER_CYCLE)]
    #[serde(default = "default_max_blocks")]
    pub max_blocks_per_cycle: u64,
    /// Seconds after which a syncing claim is considered stale
    #[clap(long, default_value_t = DEFAULT_STALE_CLAIM_SECS)]
    #[serde(default = "default_stale_claim")]
    pub stale_claim_secs: u64,
    /// Disable the sync loop entirely
    #[clap(long = "disable-sync", action = clap::ArgAction::SetFalse)]
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: DEFAULT_POLL_INTERVAL_SECS,
            concurrent_wallets: DEFAULT_CONCURRENT_WALLETS,
            initial_lookback_blocks: DEFAULT_INITIAL_LOOKBACK_BLOCKS,
            max_blocks_per_cycle: DEFAULT_MAX_BLOCKS_PER_CYCLE,
            stale_claim_secs: DEFAULT_STALE_CLAIM_SECS,
            enabled: true,
        }
    }
}

impl SyncConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn stale_claim_threshold(&self) -> Duration {
        Duration::from_secs(self.stale_claim_secs)
    }
}

fn default_refresh_interval() -> u64 {
    DEFAULT_REFRESH_INTERVAL_SECS
}

fn default_refresh_batch() -> usize {
    DEFAULT_REFRESH_BATCH_SIZE
}

#[derive(Debug, Clone, clap::Args, Serialize, Deserialize)]
pub struct OracleConfig {
    /// Seconds between background price refresh runs
    #[clap(long, default_value_t = DEFAULT_REFRESH_INTERVAL_SECS)]
    #[serde(default = "default_refresh_interval")]
    pub refresh_interval_secs: u64,
    /// Assets refreshed per provider call
    #[clap(long, default_value_t = DEFAULT_REFRESH_BATCH_SIZE)]
    #[serde(default = "default_refresh_batch")]
    pub refresh_batch_size: usize,
}

impl Default for OracleConfig {
    fn default() -> Self {
        Self {
            refresh_interval_secs: DEFAULT_REFRESH_INTERVAL_SECS,
            refresh_batch_size: DEFAULT_REFRESH_BATCH_SIZE,
        }
    }
}

impl OracleConfig {
    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_interval_secs)
    }

    pub fn hot_ttl(&self) -> Duration {
        Duration::from_secs(HOT_PRICE_TTL_SECS)
    }

    pub fn stale_ttl(&self) -> Duration {
        Duration::from_secs(STALE_PRICE_TTL_SECS)
    }

    pub fn recent_window(&self) -> Duration {
        Duration::from_secs(RECENT_PRICE_WINDOW_SECS)
    }
}
