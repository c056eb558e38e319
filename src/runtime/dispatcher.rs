use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, PoisonError};

use log::{debug, info, trace, warn};
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::time::{sleep_until, Instant};
use tokio_util::sync::CancellationToken;

use crate::domain::{TxId, WalletId};
use crate::engine::state::Shared;
use crate::engine::{CoreEvent, Notification};
use crate::runtime::log_failure;

/// Handle the native core posts its asynchronous events into.
///
/// Cheap to clone and callable from any thread. Posting never blocks.
#[derive(Debug, Clone)]
pub struct EventSink {
    tx: mpsc::Sender<CoreEvent>,
}

impl EventSink {
    /// Queue an event. Returns `false` if the queue is full and the event was
    /// dropped.
    pub fn post(&self, event: CoreEvent) -> bool {
        match self.tx.try_send(event) {
            Ok(()) => true,
            Err(TrySendError::Full(event)) => {
                warn!("[DISPATCH] event queue full, dropping {event:?}");
                false
            }
            Err(TrySendError::Closed(event)) => {
                debug!("[DISPATCH] engine gone, dropping {event:?}");
                false
            }
        }
    }
}

/// Owns the ingress channel and runs the single task that normalizes events.
pub(crate) struct EventDispatcher {
    sink: EventSink,
    /// Parked here while the engine is stopped.
    rx: Mutex<Option<mpsc::Receiver<CoreEvent>>>,
}

impl EventDispatcher {
    pub(crate) fn new(capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        Self {
            sink: EventSink { tx },
            rx: Mutex::new(Some(rx)),
        }
    }

    pub(crate) fn sink(&self) -> EventSink {
        self.sink.clone()
    }

    /// Spawn the dispatch task. Events queued while stopped are discarded.
    pub(crate) fn spawn(&self, shared: &Arc<Shared>) -> bool {
        let Some(mut rx) = self.rx.lock().unwrap_or_else(PoisonError::into_inner).take() else {
            warn!("[DISPATCH] dispatcher already running");
            return false;
        };

        let mut stale = 0usize;
        while rx.try_recv().is_ok() {
            stale += 1;
        }
        if stale > 0 {
            debug!("[DISPATCH] discarded {stale} event(s) queued while stopped");
        }

        let token = shared.token();
        let task_shared = shared.clone();
        shared.spawn(async move {
            let rx = run(&task_shared, rx, token).await;
            task_shared
                .dispatcher
                .rx
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .replace(rx);
        });
        true
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Burst {
    Incoming,
    Balance,
}

/// Coalesced events for one wallet, in order of each kind's first arrival.
struct Batch {
    deadline: Instant,
    items: Vec<(Burst, TxId)>,
}

impl Batch {
    fn absorb(&mut self, kind: Burst, tx: TxId, deadline: Instant) {
        self.deadline = deadline;
        match self.items.iter_mut().find(|(k, _)| *k == kind) {
            Some(item) => item.1 = tx,
            None => self.items.push((kind, tx)),
        }
    }
}

#[derive(Default)]
struct DispatchState {
    pending: HashMap<WalletId, Batch>,
    synced: HashSet<WalletId>,
    loaded_fired: bool,
    fallback: Option<Instant>,
}

async fn run(
    shared: &Arc<Shared>,
    mut rx: mpsc::Receiver<CoreEvent>,
    token: CancellationToken,
) -> mpsc::Receiver<CoreEvent> {
    debug!("[DISPATCH] dispatcher running");
    let mut state = DispatchState::default();

    loop {
        let wake = state.next_deadline();
        tokio::select! {
            biased;
            _ = token.cancelled() => break,
            event = rx.recv() => match event {
                Some(event) => state.handle(shared, event).await,
                None => break,
            },
            _ = sleep_until(wake.unwrap_or_else(Instant::now)), if wake.is_some() => {
                state.on_timer(shared);
            }
        }
    }

    if !state.pending.is_empty() {
        debug!("[DISPATCH] dropping {} pending burst(s) on shutdown", state.pending.len());
    }
    debug!("[DISPATCH] dispatcher exited");
    rx
}

impl DispatchState {
    fn next_deadline(&self) -> Option<Instant> {
        self.pending
            .values()
            .map(|b| b.deadline)
            .chain(self.fallback)
            .min()
    }

    async fn handle(&mut self, shared: &Arc<Shared>, event: CoreEvent) {
        trace!("[DISPATCH] event {event:?}");
        match event {
            CoreEvent::IncomingPayment { wallet, tx } => {
                self.absorb(shared, wallet, Burst::Incoming, tx);
            }
            CoreEvent::BalanceUpdate { wallet, tx } => {
                self.absorb(shared, wallet, Burst::Balance, tx);
                if !self.loaded_fired {
                    self.fallback = Some(Instant::now() + shared.config.wallets_loaded_fallback());
                }
            }
            CoreEvent::BlockHeightChanged => {
                shared.session.invalidate_settings();
                shared.notifier.notify(Notification::BlockHeightChanged);
            }
            CoreEvent::WatcherSyncDone { wallet } => {
                self.flush(shared, &wallet);
                self.synced.insert(wallet.clone());
                shared.notifier.notify(Notification::WalletChanged(wallet));
                shared.reloader.reload(shared);
                self.check_loaded(shared).await;
            }
            CoreEvent::SweepComplete { wallet, tx, amount } => {
                self.flush(shared, &wallet);
                info!("[DISPATCH] {wallet}: sweep complete ({amount})");
                shared
                    .notifier
                    .notify(Notification::SweepComplete { wallet, tx, amount });
                shared.reloader.reload(shared);
            }
        }
    }

    fn absorb(&mut self, shared: &Shared, wallet: WalletId, kind: Burst, tx: TxId) {
        let deadline = Instant::now() + shared.config.balance_debounce();
        self.pending
            .entry(wallet)
            .or_insert_with(|| Batch {
                deadline,
                items: Vec::new(),
            })
            .absorb(kind, tx, deadline);
    }

    /// Deliver a wallet's coalesced burst now, followed by one reload.
    fn flush(&mut self, shared: &Arc<Shared>, wallet: &WalletId) {
        let Some(batch) = self.pending.remove(wallet) else {
            return;
        };
        for (kind, tx) in batch.items {
            let wallet = wallet.clone();
            let note = match kind {
                Burst::Incoming => Notification::IncomingPayment { wallet, tx },
                Burst::Balance => Notification::BalanceUpdate { wallet, tx },
            };
            shared.notifier.notify(note);
        }
        shared.reloader.reload(shared);
    }

    fn on_timer(&mut self, shared: &Arc<Shared>) {
        let now = Instant::now();

        let mut due: Vec<WalletId> = self
            .pending
            .iter()
            .filter(|(_, b)| b.deadline <= now)
            .map(|(id, _)| id.clone())
            .collect();
        due.sort();
        for wallet in &due {
            self.flush(shared, wallet);
        }

        if self.fallback.is_some_and(|at| at <= now) {
            info!("[DISPATCH] wallets-loaded fallback elapsed");
            self.fire_loaded(shared);
        }
    }

    async fn check_loaded(&mut self, shared: &Arc<Shared>) {
        if self.loaded_fired {
            return;
        }
        let creds = shared.credentials();
        match shared.core_call(move |core| core.list_wallet_ids(&creds)).await {
            Ok(ids) => {
                if ids.iter().all(|id| self.synced.contains(id)) {
                    self.fire_loaded(shared);
                }
            }
            Err(e) => log_failure("DISPATCH", "list wallets", &e),
        }
    }

    fn fire_loaded(&mut self, shared: &Shared) {
        self.fallback = None;
        if self.loaded_fired {
            return;
        }
        self.loaded_fired = true;
        info!("[DISPATCH] all wallets loaded");
        shared.notifier.notify(Notification::WalletsLoaded);
    }
}
