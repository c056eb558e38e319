use std::fmt;

use bitcoin::SignedAmount;

use crate::backend::error::CoreResult;
use crate::domain::{Settings, WalletId};

/// Login identity handed to every account-scoped core call.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: Option<String>,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: Option<String>) -> Self {
        Self {
            username: username.into(),
            password,
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// Outcome of an account-level data sync.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncStatus {
    /// Remote data differed from local state.
    pub dirty: bool,
    pub password_changed: bool,
}

/// Parameters for creating a new wallet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewWallet {
    pub name: String,
    pub currency: String,
}

/// The opaque native wallet engine.
///
/// Every call is synchronous and may block for a long time (network, disk,
/// key derivation). Implementations must be callable from any thread.
pub trait WalletCore: Send + Sync {
    // --- wallets ---

    fn list_wallet_ids(&self, creds: &Credentials) -> CoreResult<Vec<WalletId>>;

    /// Decrypt and load a wallet's metadata into the core.
    fn wallet_load(&self, creds: &Credentials, wallet: &WalletId) -> CoreResult<()>;

    fn wallet_name(&self, creds: &Credentials, wallet: &WalletId) -> CoreResult<String>;

    /// ISO currency code of the wallet. Fails until the wallet is loaded.
    fn wallet_currency(&self, creds: &Credentials, wallet: &WalletId) -> CoreResult<String>;

    fn wallet_balance(&self, creds: &Credentials, wallet: &WalletId) -> CoreResult<SignedAmount>;

    fn wallet_archived(&self, creds: &Credentials, wallet: &WalletId) -> CoreResult<bool>;

    fn create_wallet(&self, creds: &Credentials, wallet: &NewWallet) -> CoreResult<WalletId>;

    // --- watchers ---

    /// Initialize native watcher state for a wallet.
    fn watcher_start(&self, creds: &Credentials, wallet: &WalletId) -> CoreResult<()>;

    /// Run the watcher loop. Blocks the calling thread until `watcher_stop`.
    fn watcher_loop(&self, wallet: &WalletId) -> CoreResult<()>;

    fn watcher_connect(&self, wallet: &WalletId) -> CoreResult<()>;

    fn watcher_disconnect(&self, wallet: &WalletId) -> CoreResult<()>;

    /// Ask a running loop to return.
    fn watcher_stop(&self, wallet: &WalletId) -> CoreResult<()>;

    /// Release native watcher state after the loop has returned.
    fn watcher_delete(&self, wallet: &WalletId) -> CoreResult<()>;

    /// Drop cached blockchain data for a wallet.
    fn watcher_delete_cache(&self, wallet: &WalletId) -> CoreResult<()>;

    // --- sync ---

    fn data_sync_account(&self, creds: &Credentials) -> CoreResult<SyncStatus>;

    /// Returns `true` if remote wallet data changed.
    fn data_sync_wallet(&self, creds: &Credentials, wallet: &WalletId) -> CoreResult<bool>;

    /// Refresh server-wide info (fees, server lists).
    fn general_info_update(&self) -> CoreResult<()>;

    fn is_otp_reset_pending(&self, creds: &Credentials) -> CoreResult<bool>;

    fn request_exchange_rate_update(&self, currency: &str) -> CoreResult<()>;

    // --- account ---

    fn account_settings(&self, creds: &Credentials) -> CoreResult<Settings>;

    /// Forget decrypted key material held for this user.
    fn clear_key_cache(&self, creds: &Credentials) -> CoreResult<()>;
}
