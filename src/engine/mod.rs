//! Account engine façade.
//!
//! [`AccountEngine`] owns the tokio runtime and every background component of
//! one logged-in account. It starts them together, tears them down together
//! and is the only way application code drives them.
//!
//! # Guarantees
//! * `stop()` is a barrier: when it returns no watcher thread, timer or task
//!   is running and no further callback will be delivered.
//! * All callbacks run on one delivery thread, never concurrently.
//! * Overlapping sync, exchange-rate and reload requests are deduplicated.

pub(crate) mod logic;
pub(crate) mod state;
pub mod types;

#[cfg(test)]
mod tests;

pub use state::EngineState;
pub use types::{AccountCallbacks, CoreEvent, Notification};

use std::future::Future;
use std::sync::{mpsc as std_mpsc, Arc};

use log::{debug, info, warn};
use tokio::runtime::Runtime;
use tokio_util::sync::CancellationToken;

use crate::backend::WalletCore;
use crate::config::{DataFetchPolicy, EngineConfig};
use crate::domain::{Session, WalletId};
use crate::error::Error;
use crate::runtime::EventSink;

use state::Shared;

pub struct AccountEngine {
    shared: Arc<Shared>,
    runtime: Option<Runtime>,
}

impl AccountEngine {
    /// Build a stopped engine with its own runtime and delivery thread.
    pub fn new(
        core: Arc<dyn WalletCore>,
        session: Arc<Session>,
        config: EngineConfig,
    ) -> Result<Self, Error> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(config.worker_threads.max(1))
            .thread_name("account-engine")
            .enable_all()
            .build()?;
        let shared = Arc::new(Shared::new(core, session, config, runtime.handle().clone())?);

        Ok(Self {
            shared,
            runtime: Some(runtime),
        })
    }

    pub fn state(&self) -> EngineState {
        self.shared.state()
    }

    pub fn is_paused(&self) -> bool {
        self.shared.lifecycle().paused
    }

    pub fn config(&self) -> &EngineConfig {
        &self.shared.config
    }

    /// Launch watchers, schedulers and event dispatch.
    ///
    /// Returns once the initial load is queued; wallets load in the background
    /// and are announced through `wallet_changed` / `wallets_changed`.
    pub fn start(&self) {
        let shared = &self.shared;
        {
            let mut lifecycle = shared.lifecycle();
            if lifecycle.state != EngineState::Stopped {
                debug!("[ENGINE] start ignored, engine is {:?}", lifecycle.state);
                return;
            }
            if !shared.session.is_logged_in() {
                warn!("[ENGINE] start refused, account logged out");
                return;
            }
            lifecycle.state = EngineState::Starting;
            lifecycle.token = CancellationToken::new();
            lifecycle.paused = false;
        }
        info!("[ENGINE] starting for {}", shared.session.username());

        shared.tracker.reopen();
        shared.watchers.open();
        shared.notifier.open();
        shared.dispatcher.spawn(shared);
        shared.spawn(logic::load_wallets(shared.clone()));

        let mut lifecycle = shared.lifecycle();
        if lifecycle.state == EngineState::Starting {
            lifecycle.state = EngineState::Running;
        }
    }

    /// Tear everything down and wait until it is quiescent. Idempotent.
    ///
    /// May be called from inside a callback; the delivery thread is then not
    /// waited on.
    pub fn stop(&self) {
        self.shutdown(None);
    }

    /// Stop, delivering `farewell` as the very last notification.
    pub(crate) fn shutdown(&self, farewell: Option<Notification>) {
        let shared = &self.shared;
        {
            let mut lifecycle = shared.lifecycle();
            match lifecycle.state {
                EngineState::Stopped => {
                    drop(lifecycle);
                    debug!("[ENGINE] stop ignored, already stopped");
                    if let Some(note) = farewell {
                        self.deliver_while_stopped(note);
                    }
                    return;
                }
                EngineState::Stopping => {
                    debug!("[ENGINE] stop ignored, already stopping");
                    return;
                }
                EngineState::Starting | EngineState::Running => {
                    lifecycle.state = EngineState::Stopping;
                    lifecycle.token.cancel();
                }
            }
        }
        info!("[ENGINE] stopping");

        shared.sync.cancel();
        shared.exchange.cancel();
        shared.watchers.stop_all(shared.core.as_ref());

        shared.tracker.close();
        let tracker = shared.tracker.clone();
        self.block_until(async move { tracker.wait().await });
        debug!("[ENGINE] all tasks finished");

        let notifier = &shared.notifier;
        match farewell {
            Some(note) if notifier.on_delivery_thread() => {
                notifier.close();
                notifier.deliver_inline(&note, &shared.session);
            }
            Some(note) => {
                notifier.notify(note);
                notifier.flush();
                notifier.close();
            }
            None => {
                notifier.flush();
                notifier.close();
            }
        }

        shared.lifecycle().state = EngineState::Stopped;
        info!("[ENGINE] stopped");
    }

    fn deliver_while_stopped(&self, note: Notification) {
        let notifier = &self.shared.notifier;
        if notifier.on_delivery_thread() {
            notifier.deliver_inline(&note, &self.shared.session);
            return;
        }
        notifier.open();
        notifier.notify(note);
        notifier.flush();
        notifier.close();
    }

    /// Connectivity lost: disconnect watchers and suspend both schedulers.
    /// Watch tasks keep running.
    pub fn pause(&self) {
        {
            let mut lifecycle = self.shared.lifecycle();
            if lifecycle.state != EngineState::Running || lifecycle.paused {
                debug!("[ENGINE] pause ignored");
                return;
            }
            lifecycle.paused = true;
            self.shared.watchers.set_online(false);
        }
        info!("[ENGINE] pausing");

        let shared = &self.shared;
        shared.sync.cancel();
        shared.exchange.cancel();
        let task_shared = shared.clone();
        shared.spawn_blocking(move || {
            task_shared
                .watchers
                .disconnect_if_offline(task_shared.core.as_ref());
        });
    }

    /// Connectivity restored: reconnect watchers (once data was fetched) and
    /// restart both schedulers.
    pub fn resume(&self) {
        {
            let mut lifecycle = self.shared.lifecycle();
            if lifecycle.state != EngineState::Running || !lifecycle.paused {
                debug!("[ENGINE] resume ignored");
                return;
            }
            lifecycle.paused = false;
            self.shared.watchers.set_online(true);
        }
        info!("[ENGINE] resuming");

        let shared = &self.shared;
        if shared.config.data_fetch_policy == DataFetchPolicy::RearmOnResume {
            shared.rearm_data_fetched();
        }
        if shared.data_fetched() {
            let task_shared = shared.clone();
            shared.spawn_blocking(move || logic::connect_all(&task_shared));
        }
        shared.sync.sync_now(shared);
        shared.exchange.update_now(shared);
    }

    /// Request a wallet cache rebuild. Returns `true` if a new rebuild started.
    pub fn reload_wallets(&self) -> bool {
        self.shared.reloader.reload(&self.shared)
    }

    /// Start the exchange-rate loop now unless one is pending.
    pub fn update_exchange_rates(&self) -> bool {
        self.shared.exchange.update_now(&self.shared)
    }

    /// Start the data-sync loop now unless one is pending.
    pub fn sync_now(&self) -> bool {
        self.shared.sync.sync_now(&self.shared)
    }

    /// Start watchers for wallets that have none yet, in the background.
    pub fn start_watchers(&self) {
        if !self.shared.is_active() {
            debug!("[ENGINE] start_watchers ignored, engine not running");
            return;
        }
        let task_shared = self.shared.clone();
        self.shared
            .spawn_blocking(move || logic::start_watchers(&task_shared));
    }

    pub fn request_exchange_rate(&self, currency: impl Into<String>) {
        self.shared.exchange.request(&self.shared, currency.into());
    }

    /// Where the native core posts its asynchronous events.
    pub fn event_sink(&self) -> EventSink {
        self.shared.dispatcher.sink()
    }

    pub fn set_callbacks(&self, callbacks: Option<Arc<dyn AccountCallbacks>>) {
        self.shared.session.set_callbacks(callbacks);
    }

    pub fn watcher_count(&self) -> usize {
        self.shared.watchers.len()
    }

    pub fn is_watching(&self, id: &WalletId) -> bool {
        self.shared.watchers.is_started(id)
    }

    pub fn is_connected(&self, id: &WalletId) -> bool {
        self.shared.watchers.is_connected(id)
    }

    pub fn is_syncing(&self) -> bool {
        self.shared.sync.is_pending()
    }

    pub fn sync_cycles(&self) -> u64 {
        self.shared.sync.cycles()
    }

    pub fn is_reloading(&self) -> bool {
        self.shared.reloader.is_in_flight()
    }

    pub fn reload_passes(&self) -> u64 {
        self.shared.reloader.passes()
    }

    pub fn data_fetched(&self) -> bool {
        self.shared.data_fetched()
    }

    /// Drop every wallet's cached blockchain data. Only while stopped.
    pub fn delete_watcher_cache(&self) -> Result<(), Error> {
        if self.state() != EngineState::Stopped {
            return Err(Error::EngineRunning("clear the blockchain cache"));
        }
        let ids = self
            .shared
            .core
            .list_wallet_ids(self.shared.session.credentials())?;
        self.shared
            .watchers
            .delete_cache(self.shared.core.as_ref(), &ids);
        info!("[ENGINE] blockchain cache cleared for {} wallet(s)", ids.len());
        Ok(())
    }

    /// Block the calling (non-runtime) thread until `fut` completes.
    fn block_until<F>(&self, fut: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let (tx, rx) = std_mpsc::channel();
        self.shared.handle.spawn(async move {
            fut.await;
            let _ = tx.send(());
        });
        let _ = rx.recv();
    }
}

impl Drop for AccountEngine {
    fn drop(&mut self) {
        self.stop();
        if let Some(runtime) = self.runtime.take() {
            runtime.shutdown_background();
        }
    }
}
