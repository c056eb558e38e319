use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use log::{debug, info};
use tokio_util::sync::CancellationToken;

use crate::domain::WalletId;
use crate::engine::logic;
use crate::engine::state::Shared;
use crate::engine::Notification;
use crate::runtime::{log_failure, CycleSlot};

/// Periodic account and wallet data sync.
pub struct SyncScheduler {
    slot: CycleSlot,
    cycles: AtomicU64,
}

impl Default for SyncScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl SyncScheduler {
    pub fn new() -> Self {
        Self {
            slot: CycleSlot::new("SYNC"),
            cycles: AtomicU64::new(0),
        }
    }

    /// Start the sync loop now. No-op while a loop is pending or running.
    pub(crate) fn sync_now(&self, shared: &Arc<Shared>) -> bool {
        self.slot.arm(shared, shared.config.sync_interval(), run_cycle)
    }

    pub(crate) fn cancel(&self) {
        self.slot.cancel();
    }

    pub fn is_pending(&self) -> bool {
        self.slot.is_pending()
    }

    /// Cycles started since the engine was created.
    pub fn cycles(&self) -> u64 {
        self.cycles.load(Ordering::Relaxed)
    }

    /// One-off sync of a single wallet, outside the periodic cycle.
    pub(crate) fn request_wallet_sync(&self, shared: &Arc<Shared>, id: WalletId) {
        if !shared.is_active() {
            return;
        }
        let shared_task = shared.clone();
        shared.spawn(async move {
            let shared = shared_task;
            if shared.token().is_cancelled() {
                return;
            }
            let creds = shared.credentials();
            let wallet = id.clone();
            match shared
                .core_call(move |core| core.data_sync_wallet(&creds, &wallet))
                .await
            {
                Ok(true) => {
                    info!("[SYNC] {id}: remote change after watcher start");
                    logic::on_remote_change(&shared).await;
                }
                Ok(false) => debug!("[SYNC] {id}: wallet data up to date"),
                Err(e) => log_failure("SYNC", &format!("{id}: wallet sync"), &e),
            }
        });
    }
}

async fn run_cycle(shared: Arc<Shared>, token: CancellationToken) {
    let cycle = shared.sync.cycles.fetch_add(1, Ordering::Relaxed) + 1;
    debug!("[SYNC] cycle {cycle} starting");

    if let Err(e) = shared.core_call(|core| core.general_info_update()).await {
        log_failure("SYNC", "general info update", &e);
    }
    if token.is_cancelled() {
        return;
    }

    let mut remote_change = false;

    let creds = shared.credentials();
    let account_synced = match shared
        .core_call(move |core| core.data_sync_account(&creds))
        .await
    {
        Ok(status) => {
            if status.password_changed {
                info!("[SYNC] password changed remotely");
                shared.notifier.notify(Notification::RemotePasswordChange);
            }
            remote_change |= status.dirty;
            true
        }
        Err(e) if e.is_invalid_otp() => {
            logic::on_invalid_otp(&shared);
            false
        }
        Err(e) => {
            log_failure("SYNC", "account sync", &e);
            false
        }
    };
    if token.is_cancelled() {
        return;
    }

    let creds = shared.credentials();
    let ids = match shared.core_call(move |core| core.list_wallet_ids(&creds)).await {
        Ok(ids) => ids,
        Err(e) => {
            log_failure("SYNC", "list wallets", &e);
            Vec::new()
        }
    };
    for id in ids {
        if token.is_cancelled() {
            return;
        }
        let creds = shared.credentials();
        let wallet = id.clone();
        match shared
            .core_call(move |core| core.data_sync_wallet(&creds, &wallet))
            .await
        {
            Ok(dirty) => {
                if dirty {
                    debug!("[SYNC] {id}: remote change");
                }
                remote_change |= dirty;
            }
            Err(e) => log_failure("SYNC", &format!("{id}: wallet sync"), &e),
        }
    }
    if token.is_cancelled() {
        return;
    }

    if remote_change {
        logic::on_remote_change(&shared).await;
    }
    if token.is_cancelled() {
        return;
    }

    let creds = shared.credentials();
    match shared
        .core_call(move |core| core.is_otp_reset_pending(&creds))
        .await
    {
        Ok(true) => {
            info!("[SYNC] OTP reset pending");
            shared.notifier.notify(Notification::OtpResetPending);
        }
        Ok(false) => {}
        Err(e) => log_failure("SYNC", "OTP reset check", &e),
    }

    if account_synced && shared.mark_data_fetched() {
        info!("[SYNC] first data fetch complete, connecting watchers");
        logic::connect_pending(&shared).await;
    }

    debug!("[SYNC] cycle {cycle} done");
}
