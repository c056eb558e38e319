//! Orchestration steps shared by the schedulers, the dispatcher and the
//! engine façade. Blocking steps run on the runtime's blocking pool.

use std::sync::Arc;

use log::{debug, error, info};

use crate::domain::WalletId;
use crate::engine::state::Shared;
use crate::engine::Notification;
use crate::runtime::{log_failure, StartOutcome};

/// Start one watcher, then request a wallet sync and a cache reload for it.
/// Connects it right away once the account's first data fetch happened.
/// Blocking.
pub(crate) fn start_watcher(shared: &Arc<Shared>, id: &WalletId) {
    match shared
        .watchers
        .start(&shared.core, shared.session.credentials(), id)
    {
        StartOutcome::AlreadyRunning | StartOutcome::Closed => return,
        StartOutcome::Started => {
            if shared.data_fetched() && shared.session.is_logged_in() {
                shared.watchers.connect(shared.core.as_ref(), id);
            }
        }
        StartOutcome::Failed(_) => {}
    }
    shared.sync.request_wallet_sync(shared, id.clone());
    shared.reloader.reload(shared);
}

/// Start a watcher for every wallet the core knows about. Blocking.
pub(crate) fn start_watchers(shared: &Arc<Shared>) {
    let ids = match shared.core.list_wallet_ids(shared.session.credentials()) {
        Ok(ids) => ids,
        Err(e) => {
            log_failure("ENGINE", "list wallets", &e);
            return;
        }
    };
    for id in &ids {
        if shared.token().is_cancelled() {
            return;
        }
        start_watcher(shared, id);
    }
}

/// Connect every started watcher. No-op while logged out. Blocking.
pub(crate) fn connect_all(shared: &Shared) {
    if !shared.session.is_logged_in() {
        debug!("[ENGINE] logged out, not connecting watchers");
        return;
    }
    let connected = shared.watchers.connect_all(shared.core.as_ref());
    debug!("[ENGINE] connected {connected} watcher(s)");
}

/// Connect watchers started before the first data fetch.
pub(crate) async fn connect_pending(shared: &Arc<Shared>) {
    if !shared.session.is_logged_in() {
        return;
    }
    let task_shared = shared.clone();
    let joined = shared
        .spawn_blocking(move || {
            let connected = task_shared
                .watchers
                .connect_pending(task_shared.core.as_ref());
            info!("[ENGINE] connected {connected} pending watcher(s)");
        })
        .await;
    if let Err(e) = joined {
        error!("[ENGINE] connecting watchers failed: {e}");
    }
}

/// Full reload after the core reported remote data changes: drop cached
/// settings, (re)start watchers, rebuild the wallet cache, then tell the
/// consumer once.
pub(crate) async fn on_remote_change(shared: &Arc<Shared>) {
    info!("[ENGINE] remote data changed, reloading account");
    shared.session.invalidate_settings();

    let task_shared = shared.clone();
    if let Err(e) = shared
        .spawn_blocking(move || start_watchers(&task_shared))
        .await
    {
        error!("[ENGINE] restarting watchers failed: {e}");
    }
    if shared.token().is_cancelled() {
        return;
    }

    shared.reloader.reload(shared);
    shared.notifier.notify(Notification::AccountChanged);
}

/// The core rejected our OTP state during sync.
pub(crate) fn on_invalid_otp(shared: &Shared) {
    if !shared.session.is_logged_in() {
        return;
    }
    if shared.session.has_otp_secret() {
        info!("[ENGINE] OTP rejected with a local secret present, clock skew");
        shared.notifier.notify(Notification::OtpSkew);
    } else {
        info!("[ENGINE] OTP required but no local secret");
        shared.notifier.notify(Notification::OtpRequired);
    }
}

/// Initial load after `start()`: announce loading, load each wallet and start
/// its watcher in core order, then kick off the periodic schedulers.
pub(crate) async fn load_wallets(shared: Arc<Shared>) {
    shared.notifier.notify(Notification::WalletsLoading);

    let creds = shared.credentials();
    let ids = match shared.core_call(move |core| core.list_wallet_ids(&creds)).await {
        Ok(ids) => ids,
        Err(e) => {
            log_failure("ENGINE", "list wallets", &e);
            Vec::new()
        }
    };
    info!("[ENGINE] loading {} wallet(s)", ids.len());

    for id in ids {
        if shared.token().is_cancelled() {
            return;
        }

        let creds = shared.credentials();
        let wallet = id.clone();
        if let Err(e) = shared
            .core_call(move |core| core.wallet_load(&creds, &wallet))
            .await
        {
            log_failure("ENGINE", &format!("{id}: load"), &e);
        }

        let task_shared = shared.clone();
        let wallet = id.clone();
        if let Err(e) = shared
            .spawn_blocking(move || start_watcher(&task_shared, &wallet))
            .await
        {
            error!("[ENGINE] {id}: watcher start task failed: {e}");
        }

        shared.notifier.notify(Notification::WalletChanged(id));
        shared.reloader.reload(&shared);
    }

    if shared.token().is_cancelled() {
        return;
    }
    shared.exchange.update_now(&shared);
    shared.sync.sync_now(&shared);
    shared.reloader.reload(&shared);
    debug!("[ENGINE] initial load queued schedulers");
}
