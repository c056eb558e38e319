//! Account synchronization and watcher-coordination engine.
//!
//! The crate wraps an opaque, blocking wallet core ([`backend::WalletCore`]) with
//! the orchestration shell an application needs after login:
//!
//! * one blockchain watcher per wallet, started, connected and joined on demand,
//! * periodic account/wallet data sync and exchange-rate refresh,
//! * an atomically published cache of wallet snapshots,
//! * normalization of native async events onto a single delivery thread.
//!
//! # Wiring
//! ```rust,ignore
//! use std::sync::Arc;
//! use account_sync_engine::prelude::*;
//!
//! let core = Arc::new(MockWalletCore::new().with_wallets(3));
//! let account = Account::new(core, "alice", Some("hunter2"), EngineConfig::default())?;
//! account.set_callbacks(Arc::new(MyCallbacks));
//! account.start_background_tasks();
//! // ... native events are posted through `account.event_sink()` ...
//! account.logout();
//! ```

pub mod account;
pub mod backend;
pub mod config;
pub mod domain;
pub mod engine;
pub mod error;
pub mod runtime;

#[cfg(test)]
pub(crate) mod testing;

pub use account::Account;
pub use config::{DataFetchPolicy, EngineConfig};
pub use engine::{AccountEngine, EngineState};
pub use error::Error;

/// Convenience prelude for applications embedding the engine.
pub mod prelude {
    pub use crate::backend::{CoreError, Credentials, MockWalletCore, ResultCode, WalletCore};
    pub use crate::domain::{Settings, TxId, WalletId, WalletSnapshot};
    pub use crate::engine::{AccountCallbacks, CoreEvent, Notification};
    pub use crate::runtime::EventSink;
    pub use crate::{Account, AccountEngine, EngineConfig, EngineState, Error};
}
