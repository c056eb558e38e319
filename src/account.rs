use std::sync::Arc;

use log::{info, warn};

use crate::backend::{Credentials, NewWallet, WalletCore};
use crate::config::EngineConfig;
use crate::domain::{Session, Settings, WalletId, WalletSnapshot};
use crate::engine::{AccountCallbacks, AccountEngine, EngineState, Notification};
use crate::error::Error;
use crate::runtime::EventSink;

/// A logged-in account and its background engine.
///
/// Dropping the account stops the engine but does not log out; call
/// [`Account::logout`] to also clear the core's key cache.
pub struct Account {
    core: Arc<dyn WalletCore>,
    session: Arc<Session>,
    engine: AccountEngine,
}

impl Account {
    pub fn new(
        core: Arc<dyn WalletCore>,
        username: &str,
        password: Option<&str>,
        config: EngineConfig,
    ) -> Result<Self, Error> {
        if username.trim().is_empty() {
            return Err(Error::InvalidCredentials("username is empty"));
        }
        if password.is_some_and(str::is_empty) {
            return Err(Error::InvalidCredentials("password is empty"));
        }

        let credentials = Credentials::new(username, password.map(str::to_string));
        let session = Arc::new(Session::new(credentials));
        let engine = AccountEngine::new(core.clone(), session.clone(), config)?;
        let account = Self {
            core,
            session,
            engine,
        };

        if let Err(e) = account.settings() {
            warn!("[ACCOUNT] initial settings load failed: {e}");
        }
        info!("[ACCOUNT] {} logged in", username);
        Ok(account)
    }

    pub fn username(&self) -> &str {
        self.session.username()
    }

    pub fn is_logged_in(&self) -> bool {
        self.session.is_logged_in()
    }

    pub fn engine(&self) -> &AccountEngine {
        &self.engine
    }

    pub fn set_callbacks(&self, callbacks: Arc<dyn AccountCallbacks>) {
        self.engine.set_callbacks(Some(callbacks));
    }

    pub fn clear_callbacks(&self) {
        self.engine.set_callbacks(None);
    }

    pub fn event_sink(&self) -> EventSink {
        self.engine.event_sink()
    }

    // --- OTP ---

    pub fn otp_secret(&self) -> Option<String> {
        self.session.otp_secret()
    }

    pub fn set_otp_secret(&self, secret: Option<String>) {
        self.session.set_otp_secret(secret);
    }

    // --- cached state ---

    /// Account settings, loaded from the core on first access after login or
    /// after a remote change.
    pub fn settings(&self) -> Result<Settings, Error> {
        if !self.is_logged_in() {
            return Err(Error::NotLoggedIn);
        }
        Ok(self.session.settings(self.core.as_ref())?)
    }

    /// Every wallet with a running watcher, as of the last rebuild.
    pub fn wallets(&self) -> Option<Arc<Vec<WalletSnapshot>>> {
        self.session.wallets().current()
    }

    pub fn active_wallets(&self) -> Option<Vec<WalletSnapshot>> {
        self.session.wallets().active()
    }

    pub fn wallet(&self, id: &WalletId) -> Option<WalletSnapshot> {
        self.session.wallets().get(id)
    }

    pub fn wallet_ids(&self) -> Result<Vec<WalletId>, Error> {
        Ok(self.core.list_wallet_ids(self.session.credentials())?)
    }

    // --- engine lifecycle ---

    pub fn start_background_tasks(&self) {
        self.engine.start();
    }

    pub fn stop_background_tasks(&self) {
        self.engine.stop();
    }

    pub fn lost_connectivity(&self) {
        self.engine.pause();
    }

    pub fn restore_connectivity(&self) {
        self.engine.resume();
    }

    pub fn reload_wallets(&self) -> bool {
        self.engine.reload_wallets()
    }

    pub fn update_exchange_rates(&self) -> bool {
        self.engine.update_exchange_rates()
    }

    /// Create a wallet, then start its watcher, request its currency's rate and
    /// refresh the wallet cache.
    pub fn create_wallet(&self, name: &str, currency: &str) -> Result<WalletId, Error> {
        if !self.is_logged_in() {
            return Err(Error::NotLoggedIn);
        }
        let request = NewWallet {
            name: name.to_string(),
            currency: currency.to_string(),
        };
        let id = self.core.create_wallet(self.session.credentials(), &request)?;
        info!("[ACCOUNT] created wallet {id} ({currency})");

        self.engine.start_watchers();
        self.engine.request_exchange_rate(currency);
        self.engine.reload_wallets();
        Ok(id)
    }

    /// Drop cached blockchain data. The engine must be stopped.
    pub fn clear_blockchain_cache(&self) -> Result<(), Error> {
        self.engine.delete_watcher_cache()
    }

    // --- auto-logout ---

    pub fn background(&self) {
        self.session.mark_backgrounded();
    }

    /// Back in foreground. Returns `true` if the session expired while in
    /// background, in which case the account has been logged out.
    pub fn foreground(&self) -> bool {
        let elapsed = self.session.take_background_time();
        if self.expired_after(elapsed) {
            info!("[ACCOUNT] session expired in background");
            self.logout();
            return true;
        }
        false
    }

    /// Whether the time spent in background exceeds the auto-logout setting.
    pub fn is_expired(&self) -> bool {
        self.expired_after(self.session.background_time())
    }

    fn expired_after(&self, elapsed: Option<std::time::Duration>) -> bool {
        let Some(elapsed) = elapsed else {
            return false;
        };
        if !self.is_logged_in() {
            return false;
        }
        match self.session.settings(self.core.as_ref()) {
            Ok(settings) => elapsed > settings.auto_logout(),
            Err(e) => {
                warn!("[ACCOUNT] settings unavailable for auto-logout check: {e}");
                false
            }
        }
    }

    // --- logout ---

    /// Stop the engine, deliver `logged_out` as the last notification and
    /// clear the core's key cache. Idempotent.
    pub fn logout(&self) {
        if !self.is_logged_in() && self.engine.state() == EngineState::Stopped {
            return;
        }
        info!("[ACCOUNT] {} logging out", self.username());
        self.session.mark_logged_out();
        self.engine.shutdown(Some(Notification::LoggedOut));

        if let Err(e) = self.core.clear_key_cache(self.session.credentials()) {
            warn!("[ACCOUNT] clearing key cache failed: {e}");
        }
        self.session.invalidate_settings();
        self.session.wallets().clear();
    }
}
