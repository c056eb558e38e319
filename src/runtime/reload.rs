use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use bitcoin::SignedAmount;
use log::{debug, info, trace};

use crate::backend::{CoreResult, Credentials, WalletCore};
use crate::domain::{WalletId, WalletSnapshot};
use crate::engine::state::Shared;
use crate::engine::Notification;
use crate::runtime::log_failure;

/// Rebuilds the wallet snapshot list off the caller's thread.
///
/// At most one rebuild runs at a time. A request arriving mid-rebuild is
/// folded into one extra pass of the running rebuild.
pub struct WalletCacheReloader {
    in_flight: AtomicBool,
    rerun: AtomicBool,
    passes: AtomicU64,
}

impl Default for WalletCacheReloader {
    fn default() -> Self {
        Self::new()
    }
}

impl WalletCacheReloader {
    pub fn new() -> Self {
        Self {
            in_flight: AtomicBool::new(false),
            rerun: AtomicBool::new(false),
            passes: AtomicU64::new(0),
        }
    }

    /// Request a rebuild. Returns `true` if a new rebuild task was spawned.
    pub(crate) fn reload(&self, shared: &Arc<Shared>) -> bool {
        if !shared.session.is_logged_in() {
            debug!("[RELOAD] logged out, reload ignored");
            return false;
        }
        if !shared.is_active() {
            return false;
        }

        self.rerun.store(true, Ordering::Release);
        if self.in_flight.swap(true, Ordering::AcqRel) {
            trace!("[RELOAD] rebuild in flight, request folded in");
            return false;
        }

        let shared_task = shared.clone();
        shared.spawn(async move {
            shared_task.reloader.drain(&shared_task).await;
        });
        true
    }

    pub fn is_in_flight(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }

    /// Completed rebuild passes.
    pub fn passes(&self) -> u64 {
        self.passes.load(Ordering::Relaxed)
    }

    async fn drain(&self, shared: &Arc<Shared>) {
        loop {
            while self.rerun.swap(false, Ordering::AcqRel) {
                if shared.token().is_cancelled() {
                    break;
                }
                self.rebuild(shared).await;
            }
            self.in_flight.store(false, Ordering::Release);

            // A request that raced the release above would otherwise be lost.
            if !self.rerun.load(Ordering::Acquire) || self.in_flight.swap(true, Ordering::AcqRel) {
                break;
            }
            if shared.token().is_cancelled() {
                self.in_flight.store(false, Ordering::Release);
                break;
            }
        }
    }

    async fn rebuild(&self, shared: &Arc<Shared>) {
        let builder = shared.clone();
        let wallets = match shared
            .core_call(move |core| build_snapshots(core, &builder))
            .await
        {
            Ok(wallets) => wallets,
            Err(e) => {
                log_failure("RELOAD", "wallet list", &e);
                return;
            }
        };
        if shared.token().is_cancelled() || !shared.session.is_logged_in() {
            return;
        }

        let newly_synced: BTreeSet<String> = {
            let previous = shared.session.wallets().current();
            wallets
                .iter()
                .filter(|w| w.synced)
                .filter(|w| {
                    !previous
                        .as_ref()
                        .is_some_and(|p| p.iter().any(|old| old.id == w.id && old.synced))
                })
                .filter_map(|w| w.currency.clone())
                .collect()
        };

        let count = wallets.len();
        shared.session.wallets().publish(wallets);
        let pass = self.passes.fetch_add(1, Ordering::Relaxed) + 1;
        info!("[RELOAD] pass {pass}: published {count} wallet(s)");

        for currency in newly_synced {
            shared.exchange.request(shared, currency);
        }
        shared.notifier.notify(Notification::WalletsChanged);
    }
}

fn build_snapshots(core: &dyn WalletCore, shared: &Shared) -> CoreResult<Vec<WalletSnapshot>> {
    let creds = shared.session.credentials();
    let ids = core.list_wallet_ids(creds)?;
    let mut wallets = Vec::with_capacity(ids.len());
    for id in ids {
        if !shared.watchers.is_started(&id) {
            trace!("[RELOAD] {id}: watcher not started, skipped");
            continue;
        }
        wallets.push(load_snapshot(core, creds, id));
    }
    Ok(wallets)
}

fn load_snapshot(core: &dyn WalletCore, creds: &Credentials, id: WalletId) -> WalletSnapshot {
    let name = core.wallet_name(creds, &id).unwrap_or_else(|e| {
        log_failure("RELOAD", &format!("{id}: name"), &e);
        String::new()
    });
    let archived = core.wallet_archived(creds, &id).unwrap_or_else(|e| {
        log_failure("RELOAD", &format!("{id}: archived flag"), &e);
        false
    });

    let currency = match core.wallet_currency(creds, &id) {
        Ok(currency) => currency,
        Err(e) => {
            debug!("[RELOAD] {id}: currency unavailable ({}: {})", e.code, e.description);
            return WalletSnapshot::unsynced(id, name, archived);
        }
    };
    let (balance, synced) = match core.wallet_balance(creds, &id) {
        Ok(balance) => (balance, true),
        Err(e) => {
            log_failure("RELOAD", &format!("{id}: balance"), &e);
            (SignedAmount::ZERO, false)
        }
    };

    WalletSnapshot {
        id,
        name,
        currency: Some(currency),
        balance,
        archived,
        synced,
    }
}
