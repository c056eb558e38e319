use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::{Duration, Instant};

use crate::backend::{CoreResult, Credentials, WalletCore};
use crate::domain::settings::Settings;
use crate::domain::wallet::WalletCache;
use crate::engine::AccountCallbacks;

/// Account state shared between the account handle and its engine.
///
/// The engine only reads credentials and callbacks and writes the caches; the
/// account owns the login lifecycle.
pub struct Session {
    credentials: Credentials,
    otp_secret: RwLock<Option<String>>,
    logged_in: AtomicBool,
    settings: RwLock<Option<Settings>>,
    wallets: WalletCache,
    callbacks: RwLock<Option<Arc<dyn AccountCallbacks>>>,
    backgrounded_at: Mutex<Option<Instant>>,
}

impl Session {
    pub fn new(credentials: Credentials) -> Self {
        Self {
            credentials,
            otp_secret: RwLock::new(None),
            logged_in: AtomicBool::new(true),
            settings: RwLock::new(None),
            wallets: WalletCache::new(),
            callbacks: RwLock::new(None),
            backgrounded_at: Mutex::new(None),
        }
    }

    pub fn credentials(&self) -> &Credentials {
        &self.credentials
    }

    pub fn username(&self) -> &str {
        &self.credentials.username
    }

    pub fn is_logged_in(&self) -> bool {
        self.logged_in.load(Ordering::Acquire)
    }

    pub(crate) fn mark_logged_out(&self) {
        self.logged_in.store(false, Ordering::Release);
    }

    pub fn otp_secret(&self) -> Option<String> {
        self.otp_secret
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn has_otp_secret(&self) -> bool {
        self.otp_secret
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    pub fn set_otp_secret(&self, secret: Option<String>) {
        *self.otp_secret.write().unwrap_or_else(PoisonError::into_inner) = secret;
    }

    // --- settings ---

    pub fn cached_settings(&self) -> Option<Settings> {
        self.settings
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Cached settings, loading them from the core on a miss. Blocking.
    pub fn settings(&self, core: &dyn WalletCore) -> CoreResult<Settings> {
        if let Some(settings) = self.cached_settings() {
            return Ok(settings);
        }
        let loaded = core.account_settings(&self.credentials)?;
        *self.settings.write().unwrap_or_else(PoisonError::into_inner) = Some(loaded.clone());
        Ok(loaded)
    }

    pub fn invalidate_settings(&self) {
        self.settings
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
    }

    pub fn wallets(&self) -> &WalletCache {
        &self.wallets
    }

    // --- callbacks ---

    pub fn callbacks(&self) -> Option<Arc<dyn AccountCallbacks>> {
        self.callbacks
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn set_callbacks(&self, callbacks: Option<Arc<dyn AccountCallbacks>>) {
        *self.callbacks.write().unwrap_or_else(PoisonError::into_inner) = callbacks;
    }

    // --- auto-logout ---

    pub(crate) fn mark_backgrounded(&self) {
        *self.backgrounded_at.lock().unwrap_or_else(PoisonError::into_inner) = Some(Instant::now());
    }

    /// Time spent in background since the last `mark_backgrounded`, clearing it.
    pub(crate) fn take_background_time(&self) -> Option<Duration> {
        self.backgrounded_at
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .map(|since| since.elapsed())
    }

    pub(crate) fn background_time(&self) -> Option<Duration> {
        self.backgrounded_at
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .map(|since| since.elapsed())
    }
}
