//! Shared helpers for unit tests.

use std::collections::HashSet;
use std::sync::{Arc, Condvar, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use bitcoin::Amount;

use crate::config::EngineConfig;
use crate::domain::{TxId, WalletId};
use crate::engine::{AccountCallbacks, Notification};

pub(crate) const WAIT: Duration = Duration::from_secs(5);

pub(crate) fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Long intervals so only the initial cycles run, short debounce.
pub(crate) fn fast_config() -> EngineConfig {
    EngineConfig {
        sync_interval_secs: 3_600,
        exchange_interval_secs: 3_600,
        balance_debounce_ms: 100,
        wallets_loaded_fallback_secs: 3_600,
        event_queue_capacity: 64,
        worker_threads: 2,
        ..EngineConfig::default()
    }
}

/// Poll `cond` until it holds or `timeout` elapses.
pub(crate) fn wait_until(timeout: Duration, cond: impl Fn() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    cond()
}

/// Callbacks that record every notification in delivery order.
#[derive(Default)]
pub(crate) struct Recorder {
    notes: Mutex<Vec<Notification>>,
    cv: Condvar,
    /// Thread each callback ran on.
    threads: Mutex<Vec<thread::ThreadId>>,
}

impl Recorder {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub(crate) fn notes(&self) -> Vec<Notification> {
        self.notes.lock().unwrap().clone()
    }

    pub(crate) fn count(&self, pred: impl Fn(&Notification) -> bool) -> usize {
        self.notes.lock().unwrap().iter().filter(|n| pred(n)).count()
    }

    pub(crate) fn count_of(&self, note: &Notification) -> usize {
        self.count(|n| n == note)
    }

    /// Block until at least `n` notifications match `pred`.
    pub(crate) fn wait_for_n(&self, n: usize, pred: impl Fn(&Notification) -> bool) -> bool {
        let deadline = Instant::now() + WAIT;
        let mut notes = self.notes.lock().unwrap();
        loop {
            if notes.iter().filter(|x| pred(x)).count() >= n {
                return true;
            }
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            notes = self.cv.wait_timeout(notes, deadline - now).unwrap().0;
        }
    }

    pub(crate) fn wait_for(&self, note: &Notification) -> bool {
        self.wait_for_n(1, |n| n == note)
    }

    /// Distinct threads callbacks ran on.
    pub(crate) fn delivery_threads(&self) -> HashSet<thread::ThreadId> {
        self.threads.lock().unwrap().iter().copied().collect()
    }

    pub(crate) fn clear(&self) {
        self.notes.lock().unwrap().clear();
    }

    fn record(&self, note: Notification) {
        self.threads.lock().unwrap().push(thread::current().id());
        self.notes.lock().unwrap().push(note);
        self.cv.notify_all();
    }
}

impl AccountCallbacks for Recorder {
    fn wallets_loading(&self) {
        self.record(Notification::WalletsLoading);
    }
    fn wallets_loaded(&self) {
        self.record(Notification::WalletsLoaded);
    }
    fn wallets_changed(&self) {
        self.record(Notification::WalletsChanged);
    }
    fn wallet_changed(&self, wallet: &WalletId) {
        self.record(Notification::WalletChanged(wallet.clone()));
    }
    fn account_changed(&self) {
        self.record(Notification::AccountChanged);
    }
    fn remote_password_change(&self) {
        self.record(Notification::RemotePasswordChange);
    }
    fn otp_skew(&self) {
        self.record(Notification::OtpSkew);
    }
    fn otp_required(&self) {
        self.record(Notification::OtpRequired);
    }
    fn otp_reset_pending(&self) {
        self.record(Notification::OtpResetPending);
    }
    fn exchange_rate_changed(&self) {
        self.record(Notification::ExchangeRateChanged);
    }
    fn block_height_changed(&self) {
        self.record(Notification::BlockHeightChanged);
    }
    fn balance_update(&self, wallet: &WalletId, tx: &TxId) {
        self.record(Notification::BalanceUpdate {
            wallet: wallet.clone(),
            tx: tx.clone(),
        });
    }
    fn incoming_payment(&self, wallet: &WalletId, tx: &TxId) {
        self.record(Notification::IncomingPayment {
            wallet: wallet.clone(),
            tx: tx.clone(),
        });
    }
    fn sweep_complete(&self, wallet: &WalletId, tx: Option<&TxId>, amount: Amount) {
        self.record(Notification::SweepComplete {
            wallet: wallet.clone(),
            tx: tx.cloned(),
            amount,
        });
    }
    fn logged_out(&self) {
        self.record(Notification::LoggedOut);
    }
}
