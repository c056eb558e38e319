use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// How the one-shot "data fetched" flag behaves across connectivity loss.
///
/// Watchers start locally before the first successful sync confirms network
/// reachability; the flag gates when they get connected to peers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataFetchPolicy {
    /// Flip once per login and never again.
    #[default]
    OncePerLogin,
    /// Clear the flag on `resume()`, so watchers reconnect only after the next
    /// successful sync.
    RearmOnResume,
}

/// Timing and sizing knobs for an [`AccountEngine`](crate::AccountEngine).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Delay between the end of one data-sync cycle and the next.
    pub sync_interval_secs: u64,
    /// Delay between exchange-rate refreshes.
    pub exchange_interval_secs: u64,
    /// Trailing debounce for balance-update / incoming-payment bursts.
    pub balance_debounce_ms: u64,
    /// Fallback after a balance update before `wallets_loaded` fires anyway.
    pub wallets_loaded_fallback_secs: u64,
    /// Capacity of the channel native events are posted into.
    pub event_queue_capacity: usize,
    pub data_fetch_policy: DataFetchPolicy,
    /// Worker threads of the engine's runtime.
    pub worker_threads: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            sync_interval_secs: 30,
            exchange_interval_secs: 60,
            balance_debounce_ms: 1_000,
            wallets_loaded_fallback_secs: 60,
            event_queue_capacity: 1_024,
            data_fetch_policy: DataFetchPolicy::OncePerLogin,
            worker_threads: 2,
        }
    }
}

impl EngineConfig {
    /// Load a config from a JSON file. Missing fields fall back to defaults.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let data = std::fs::read(path)
            .with_context(|| format!("read engine config {}", path.display()))?;
        let config: Self = serde_json::from_slice(&data)
            .with_context(|| format!("parse engine config {}", path.display()))?;
        log::info!("[CONFIG] loaded engine config from {:?}", path);
        Ok(config)
    }

    pub fn sync_interval(&self) -> Duration {
        Duration::from_secs(self.sync_interval_secs)
    }

    pub fn exchange_interval(&self) -> Duration {
        Duration::from_secs(self.exchange_interval_secs)
    }

    pub fn balance_debounce(&self) -> Duration {
        Duration::from_millis(self.balance_debounce_ms)
    }

    pub fn wallets_loaded_fallback(&self) -> Duration {
        Duration::from_secs(self.wallets_loaded_fallback_secs)
    }
}
