use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};

use bitcoin::SignedAmount;

/// Core-assigned wallet identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WalletId(String);

impl WalletId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for WalletId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for WalletId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for WalletId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Transaction identifier as reported by the core's watcher callbacks.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TxId(String);

impl TxId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TxId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TxId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

/// Immutable view of one wallet as of the last cache rebuild.
#[derive(Debug, Clone, PartialEq)]
pub struct WalletSnapshot {
    pub id: WalletId,
    pub name: String,
    /// `None` until the core can report the wallet's currency.
    pub currency: Option<String>,
    pub balance: SignedAmount,
    pub archived: bool,
    /// Currency and balance were both loaded.
    pub synced: bool,
}

impl WalletSnapshot {
    pub fn unsynced(id: WalletId, name: String, archived: bool) -> Self {
        Self {
            id,
            name,
            currency: None,
            balance: SignedAmount::ZERO,
            archived,
            synced: false,
        }
    }
}

/// Atomically replaced list of wallet snapshots.
///
/// Readers clone the `Arc` and keep a complete snapshot even while a rebuild
/// publishes a new one.
#[derive(Debug, Default)]
pub struct WalletCache {
    current: RwLock<Option<Arc<Vec<WalletSnapshot>>>>,
}

impl WalletCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Latest published list, or `None` before the first rebuild.
    pub fn current(&self) -> Option<Arc<Vec<WalletSnapshot>>> {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Replace the list wholesale, returning the one it supersedes.
    pub fn publish(&self, wallets: Vec<WalletSnapshot>) -> Option<Arc<Vec<WalletSnapshot>>> {
        let next = Arc::new(wallets);
        let mut slot = self.current.write().unwrap_or_else(PoisonError::into_inner);
        slot.replace(next)
    }

    pub fn get(&self, id: &WalletId) -> Option<WalletSnapshot> {
        self.current()?.iter().find(|w| &w.id == id).cloned()
    }

    /// Non-archived wallets in core order.
    pub fn active(&self) -> Option<Vec<WalletSnapshot>> {
        self.current()
            .map(|list| list.iter().filter(|w| !w.archived).cloned().collect())
    }

    pub fn clear(&self) {
        self.current
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
    }
}
