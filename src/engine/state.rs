use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::backend::{CoreError, CoreResult, Credentials, ResultCode, WalletCore};
use crate::config::EngineConfig;
use crate::domain::Session;
use crate::runtime::delivery::Notifier;
use crate::runtime::dispatcher::EventDispatcher;
use crate::runtime::exchange::ExchangeRateScheduler;
use crate::runtime::reload::WalletCacheReloader;
use crate::runtime::sync::SyncScheduler;
use crate::runtime::WatcherSupervisor;

/// Engine lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    Stopped,
    Starting,
    Running,
    Stopping,
}

#[derive(Debug)]
pub(crate) struct Lifecycle {
    pub state: EngineState,
    /// Root of every cancellation token handed out during one start/stop span.
    pub token: CancellationToken,
    pub paused: bool,
}

/// Everything the engine's background work shares.
pub(crate) struct Shared {
    pub core: Arc<dyn WalletCore>,
    pub session: Arc<Session>,
    pub config: EngineConfig,
    pub handle: Handle,
    pub tracker: TaskTracker,

    pub notifier: Notifier,
    pub dispatcher: EventDispatcher,
    pub watchers: WatcherSupervisor,
    pub sync: SyncScheduler,
    pub exchange: ExchangeRateScheduler,
    pub reloader: WalletCacheReloader,

    /// Set by the first successful account sync; gates watcher connects.
    data_fetched: AtomicBool,
    lifecycle: Mutex<Lifecycle>,
}

impl Shared {
    pub(crate) fn new(
        core: Arc<dyn WalletCore>,
        session: Arc<Session>,
        config: EngineConfig,
        handle: Handle,
    ) -> std::io::Result<Self> {
        let notifier = Notifier::new(session.clone())?;
        let token = CancellationToken::new();
        token.cancel();

        Ok(Self {
            dispatcher: EventDispatcher::new(config.event_queue_capacity),
            core,
            session,
            config,
            handle,
            tracker: TaskTracker::new(),
            notifier,
            watchers: WatcherSupervisor::new(),
            sync: SyncScheduler::new(),
            exchange: ExchangeRateScheduler::new(),
            reloader: WalletCacheReloader::new(),
            data_fetched: AtomicBool::new(false),
            lifecycle: Mutex::new(Lifecycle {
                state: EngineState::Stopped,
                token,
                paused: false,
            }),
        })
    }

    pub(crate) fn lifecycle(&self) -> MutexGuard<'_, Lifecycle> {
        self.lifecycle.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn state(&self) -> EngineState {
        self.lifecycle().state
    }

    pub(crate) fn token(&self) -> CancellationToken {
        self.lifecycle().token.clone()
    }

    /// Starting or running, and not yet told to stop.
    pub(crate) fn is_active(&self) -> bool {
        let lifecycle = self.lifecycle();
        matches!(lifecycle.state, EngineState::Starting | EngineState::Running)
            && !lifecycle.token.is_cancelled()
    }

    pub(crate) fn credentials(&self) -> Credentials {
        self.session.credentials().clone()
    }

    pub(crate) fn data_fetched(&self) -> bool {
        self.data_fetched.load(Ordering::Acquire)
    }

    /// Flip the data-fetched flag. Returns `true` only for the caller that
    /// flipped it.
    pub(crate) fn mark_data_fetched(&self) -> bool {
        !self.data_fetched.swap(true, Ordering::AcqRel)
    }

    pub(crate) fn rearm_data_fetched(&self) {
        self.data_fetched.store(false, Ordering::Release);
    }

    pub(crate) fn spawn<F>(&self, task: F) -> JoinHandle<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.tracker.spawn_on(task, &self.handle)
    }

    pub(crate) fn spawn_blocking<F>(&self, task: F) -> JoinHandle<()>
    where
        F: FnOnce() + Send + 'static,
    {
        self.tracker.spawn_blocking_on(task, &self.handle)
    }

    /// Run a blocking core call on the blocking pool.
    pub(crate) async fn core_call<T, F>(&self, call: F) -> CoreResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&dyn WalletCore) -> CoreResult<T> + Send + 'static,
    {
        let core = self.core.clone();
        match self
            .tracker
            .spawn_blocking_on(move || call(core.as_ref()), &self.handle)
            .await
        {
            Ok(result) => result,
            Err(e) => Err(CoreError::new(
                ResultCode::Error,
                format!("core call did not complete: {e}"),
            )),
        }
    }
}
