use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::Duration;

use bitcoin::SignedAmount;

use crate::backend::api::{Credentials, NewWallet, SyncStatus, WalletCore};
use crate::backend::error::{CoreError, CoreResult, ResultCode};
use crate::domain::{Settings, WalletId};

/// A wallet as held by the mock core.
#[derive(Debug, Clone, PartialEq)]
pub struct MockWallet {
    pub name: String,
    pub currency: String,
    pub balance: SignedAmount,
    pub archived: bool,
}

impl MockWallet {
    pub fn new(name: impl Into<String>, currency: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            currency: currency.into(),
            balance: SignedAmount::ZERO,
            archived: false,
        }
    }

    pub fn with_balance(mut self, sats: i64) -> Self {
        self.balance = SignedAmount::from_sat(sats);
        self
    }

    pub fn archived(mut self) -> Self {
        self.archived = true;
        self
    }
}

#[derive(Default)]
struct MockState {
    wallets: Vec<(WalletId, MockWallet)>,
    loaded: HashSet<WalletId>,
    account_sync: VecDeque<CoreResult<SyncStatus>>,
    dirty_wallets: HashSet<WalletId>,
    failing_watchers: HashSet<WalletId>,
    failing_currency: HashSet<WalletId>,
    otp_reset_pending: bool,
    settings: Settings,
    sync_delay: Duration,
    disconnect_delay: Duration,
    exchange_requests: Vec<String>,
    connected: BTreeSet<WalletId>,
    deleted_caches: Vec<WalletId>,
    key_cache_cleared: bool,
    next_wallet: u32,
}

/// In-memory wallet core for tests and the demo binary.
///
/// Watcher loops block on a condition variable until `watcher_stop`, so thread
/// joins behave like the native engine's. Every call is counted.
pub struct MockWalletCore {
    state: Mutex<MockState>,
    /// wallet id -> stop requested
    watchers: Mutex<HashMap<WalletId, bool>>,
    watch_cv: Condvar,
    running_loops: AtomicUsize,
    syncs_in_flight: AtomicUsize,
    max_syncs_in_flight: AtomicUsize,
    calls: Mutex<HashMap<&'static str, usize>>,
}

impl Default for MockWalletCore {
    fn default() -> Self {
        Self::new()
    }
}

impl MockWalletCore {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(MockState::default()),
            watchers: Mutex::new(HashMap::new()),
            watch_cv: Condvar::new(),
            running_loops: AtomicUsize::new(0),
            syncs_in_flight: AtomicUsize::new(0),
            max_syncs_in_flight: AtomicUsize::new(0),
            calls: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_wallet(self, id: impl Into<WalletId>, wallet: MockWallet) -> Self {
        self.state().wallets.push((id.into(), wallet));
        self
    }

    /// `n` USD wallets named `wallet-1` .. `wallet-n`.
    pub fn with_wallets(self, n: usize) -> Self {
        {
            let mut state = self.state();
            for i in 1..=n {
                let id = WalletId::new(format!("wallet-{i}"));
                let wallet = MockWallet::new(format!("Wallet {i}"), "USD").with_balance(10_000 * i as i64);
                state.wallets.push((id, wallet));
            }
        }
        self
    }

    pub fn with_settings(self, settings: Settings) -> Self {
        self.state().settings = settings;
        self
    }

    /// Delay every account-level sync by `delay`.
    pub fn with_sync_delay(self, delay: Duration) -> Self {
        self.state().sync_delay = delay;
        self
    }

    /// Delay every watcher disconnect by `delay`.
    pub fn with_disconnect_delay(self, delay: Duration) -> Self {
        self.state().disconnect_delay = delay;
        self
    }

    // --- scripting ---

    /// Queue the result of the next account-level sync. Unscripted syncs succeed clean.
    pub fn push_account_sync(&self, result: CoreResult<SyncStatus>) {
        self.state().account_sync.push_back(result);
    }

    /// The next wallet sync for `id` reports a remote change.
    pub fn mark_wallet_dirty(&self, id: impl Into<WalletId>) {
        self.state().dirty_wallets.insert(id.into());
    }

    pub fn add_wallet(&self, id: impl Into<WalletId>, wallet: MockWallet) {
        self.state().wallets.push((id.into(), wallet));
    }

    pub fn set_balance(&self, id: &WalletId, sats: i64) {
        let mut state = self.state();
        if let Some((_, w)) = state.wallets.iter_mut().find(|(wid, _)| wid == id) {
            w.balance = SignedAmount::from_sat(sats);
        }
    }

    pub fn set_settings(&self, settings: Settings) {
        self.state().settings = settings;
    }

    pub fn set_otp_reset_pending(&self, pending: bool) {
        self.state().otp_reset_pending = pending;
    }

    pub fn fail_watcher_start(&self, id: impl Into<WalletId>) {
        self.state().failing_watchers.insert(id.into());
    }

    pub fn fail_currency(&self, id: impl Into<WalletId>) {
        self.state().failing_currency.insert(id.into());
    }

    // --- inspection ---

    pub fn calls(&self, name: &str) -> usize {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .copied()
            .unwrap_or(0)
    }

    /// Watcher loops currently blocked inside `watcher_loop`.
    pub fn running_loops(&self) -> usize {
        self.running_loops.load(Ordering::SeqCst)
    }

    /// Highest number of account syncs observed running at once.
    pub fn max_concurrent_syncs(&self) -> usize {
        self.max_syncs_in_flight.load(Ordering::SeqCst)
    }

    pub fn exchange_requests(&self) -> Vec<String> {
        self.state().exchange_requests.clone()
    }

    pub fn clear_exchange_requests(&self) {
        self.state().exchange_requests.clear();
    }

    pub fn connected(&self) -> BTreeSet<WalletId> {
        self.state().connected.clone()
    }

    /// Native watcher state that was started and not yet deleted.
    pub fn live_watchers(&self) -> usize {
        self.watchers.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn deleted_caches(&self) -> Vec<WalletId> {
        self.state().deleted_caches.clone()
    }

    pub fn key_cache_cleared(&self) -> bool {
        self.state().key_cache_cleared
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn count(&self, name: &'static str) {
        *self
            .calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(name)
            .or_insert(0) += 1;
    }

    fn with_known_wallet<T>(
        &self,
        id: &WalletId,
        f: impl FnOnce(&MockState, &MockWallet) -> CoreResult<T>,
    ) -> CoreResult<T> {
        let state = self.state();
        match state.wallets.iter().find(|(wid, _)| wid == id) {
            Some((_, wallet)) => f(&state, wallet),
            None => Err(unknown_wallet(id)),
        }
    }
}

fn unknown_wallet(id: &WalletId) -> CoreError {
    CoreError::new(ResultCode::InvalidWalletId, format!("unknown wallet {id}"))
}

impl WalletCore for MockWalletCore {
    fn list_wallet_ids(&self, _creds: &Credentials) -> CoreResult<Vec<WalletId>> {
        self.count("list_wallet_ids");
        Ok(self.state().wallets.iter().map(|(id, _)| id.clone()).collect())
    }

    fn wallet_load(&self, _creds: &Credentials, wallet: &WalletId) -> CoreResult<()> {
        self.count("wallet_load");
        self.with_known_wallet(wallet, |_, _| Ok(()))?;
        self.state().loaded.insert(wallet.clone());
        Ok(())
    }

    fn wallet_name(&self, _creds: &Credentials, wallet: &WalletId) -> CoreResult<String> {
        self.count("wallet_name");
        self.with_known_wallet(wallet, |_, w| Ok(w.name.clone()))
    }

    fn wallet_currency(&self, _creds: &Credentials, wallet: &WalletId) -> CoreResult<String> {
        self.count("wallet_currency");
        self.with_known_wallet(wallet, |state, w| {
            if state.failing_currency.contains(wallet) || !state.loaded.contains(wallet) {
                Err(CoreError::new(ResultCode::Synchronizing, "wallet not loaded"))
            } else {
                Ok(w.currency.clone())
            }
        })
    }

    fn wallet_balance(&self, _creds: &Credentials, wallet: &WalletId) -> CoreResult<SignedAmount> {
        self.count("wallet_balance");
        self.with_known_wallet(wallet, |_, w| Ok(w.balance))
    }

    fn wallet_archived(&self, _creds: &Credentials, wallet: &WalletId) -> CoreResult<bool> {
        self.count("wallet_archived");
        self.with_known_wallet(wallet, |_, w| Ok(w.archived))
    }

    fn create_wallet(&self, _creds: &Credentials, wallet: &NewWallet) -> CoreResult<WalletId> {
        self.count("create_wallet");
        let mut state = self.state();
        if wallet.name.trim().is_empty() {
            return Err(CoreError::new(ResultCode::Error, "wallet name is empty"));
        }
        if state.wallets.iter().any(|(_, w)| w.name == wallet.name) {
            return Err(CoreError::new(
                ResultCode::WalletAlreadyExists,
                format!("wallet {:?} already exists", wallet.name),
            ));
        }
        state.next_wallet += 1;
        let id = WalletId::new(format!("created-{}", state.next_wallet));
        state
            .wallets
            .push((id.clone(), MockWallet::new(wallet.name.clone(), wallet.currency.clone())));
        state.loaded.insert(id.clone());
        log::debug!("[MOCK] created wallet {id}");
        Ok(id)
    }

    fn watcher_start(&self, _creds: &Credentials, wallet: &WalletId) -> CoreResult<()> {
        self.count("watcher_start");
        if self.state().failing_watchers.contains(wallet) {
            return Err(CoreError::new(ResultCode::Error, "watcher refused to start"));
        }
        self.watchers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(wallet.clone(), false);
        Ok(())
    }

    fn watcher_loop(&self, wallet: &WalletId) -> CoreResult<()> {
        self.count("watcher_loop");
        let mut watchers = self.watchers.lock().unwrap_or_else(PoisonError::into_inner);
        if !watchers.contains_key(wallet) {
            return Err(unknown_wallet(wallet));
        }
        self.running_loops.fetch_add(1, Ordering::SeqCst);
        log::debug!("[MOCK] watcher loop {wallet} running");
        while !watchers.get(wallet).copied().unwrap_or(true) {
            watchers = self
                .watch_cv
                .wait(watchers)
                .unwrap_or_else(PoisonError::into_inner);
        }
        self.running_loops.fetch_sub(1, Ordering::SeqCst);
        log::debug!("[MOCK] watcher loop {wallet} returned");
        Ok(())
    }

    fn watcher_connect(&self, wallet: &WalletId) -> CoreResult<()> {
        self.count("watcher_connect");
        self.state().connected.insert(wallet.clone());
        Ok(())
    }

    fn watcher_disconnect(&self, wallet: &WalletId) -> CoreResult<()> {
        self.count("watcher_disconnect");
        let delay = self.state().disconnect_delay;
        if !delay.is_zero() {
            thread::sleep(delay);
        }
        self.state().connected.remove(wallet);
        Ok(())
    }

    fn watcher_stop(&self, wallet: &WalletId) -> CoreResult<()> {
        self.count("watcher_stop");
        let mut watchers = self.watchers.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(stopped) = watchers.get_mut(wallet) {
            *stopped = true;
        }
        self.watch_cv.notify_all();
        Ok(())
    }

    fn watcher_delete(&self, wallet: &WalletId) -> CoreResult<()> {
        self.count("watcher_delete");
        self.watchers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(wallet);
        self.state().connected.remove(wallet);
        Ok(())
    }

    fn watcher_delete_cache(&self, wallet: &WalletId) -> CoreResult<()> {
        self.count("watcher_delete_cache");
        self.state().deleted_caches.push(wallet.clone());
        Ok(())
    }

    fn data_sync_account(&self, _creds: &Credentials) -> CoreResult<SyncStatus> {
        self.count("data_sync_account");
        let in_flight = self.syncs_in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_syncs_in_flight.fetch_max(in_flight, Ordering::SeqCst);

        let (delay, result) = {
            let mut state = self.state();
            let result = state.account_sync.pop_front().unwrap_or(Ok(SyncStatus::default()));
            (state.sync_delay, result)
        };
        if !delay.is_zero() {
            thread::sleep(delay);
        }

        self.syncs_in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }

    fn data_sync_wallet(&self, _creds: &Credentials, wallet: &WalletId) -> CoreResult<bool> {
        self.count("data_sync_wallet");
        Ok(self.state().dirty_wallets.remove(wallet))
    }

    fn general_info_update(&self) -> CoreResult<()> {
        self.count("general_info_update");
        Ok(())
    }

    fn is_otp_reset_pending(&self, _creds: &Credentials) -> CoreResult<bool> {
        self.count("is_otp_reset_pending");
        Ok(self.state().otp_reset_pending)
    }

    fn request_exchange_rate_update(&self, currency: &str) -> CoreResult<()> {
        self.count("request_exchange_rate_update");
        self.state().exchange_requests.push(currency.to_string());
        Ok(())
    }

    fn account_settings(&self, _creds: &Credentials) -> CoreResult<Settings> {
        self.count("account_settings");
        Ok(self.state().settings.clone())
    }

    fn clear_key_cache(&self, _creds: &Credentials) -> CoreResult<()> {
        self.count("clear_key_cache");
        self.state().key_cache_cleared = true;
        Ok(())
    }
}
