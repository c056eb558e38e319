use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::thread::{self, JoinHandle};

use log::{debug, error, info, warn};

use crate::backend::{CoreError, Credentials, ResultCode, WalletCore};
use crate::domain::WalletId;

/// Outcome of a `start` request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StartOutcome {
    Started,
    AlreadyRunning,
    /// The core refused to initialize the watcher. Nothing was registered.
    Failed(CoreError),
    /// The supervisor is shut down.
    Closed,
}

struct WatchTask {
    /// Taken when the loop thread is joined.
    thread: Option<JoinHandle<()>>,
    connected: bool,
}

/// Owns one native watcher loop thread per wallet.
///
/// Lifecycle and connectivity operations are serialized; readers of the
/// registry (`is_started`, `started_ids`) never wait on a core call.
///
/// The `online` flag is the wanted connectivity. It flips immediately on
/// `set_online`; connects and `disconnect_if_offline` check it under the ops
/// lock, so the last flip wins whatever order the blocking work runs in.
pub struct WatcherSupervisor {
    tasks: RwLock<HashMap<WalletId, WatchTask>>,
    ops: Mutex<()>,
    closed: AtomicBool,
    online: AtomicBool,
}

impl Default for WatcherSupervisor {
    fn default() -> Self {
        Self::new()
    }
}

impl WatcherSupervisor {
    /// A supervisor starts closed; `open` it before the first `start`.
    pub fn new() -> Self {
        Self {
            tasks: RwLock::new(HashMap::new()),
            ops: Mutex::new(()),
            closed: AtomicBool::new(true),
            online: AtomicBool::new(true),
        }
    }

    pub fn open(&self) {
        self.online.store(true, Ordering::Release);
        self.closed.store(false, Ordering::Release);
    }

    /// Record whether the network is reachable. Connects are refused while
    /// offline.
    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::Release);
    }

    pub fn is_online(&self) -> bool {
        self.online.load(Ordering::Acquire)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub fn is_started(&self, id: &WalletId) -> bool {
        self.read().contains_key(id)
    }

    pub fn is_connected(&self, id: &WalletId) -> bool {
        self.read().get(id).is_some_and(|t| t.connected)
    }

    pub fn started_ids(&self) -> Vec<WalletId> {
        let mut ids: Vec<_> = self.read().keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    /// Initialize native watcher state for `id` and launch its loop thread.
    pub fn start(
        &self,
        core: &Arc<dyn WalletCore>,
        creds: &Credentials,
        id: &WalletId,
    ) -> StartOutcome {
        let _ops = self.lock_ops();
        if self.is_closed() {
            debug!("[WATCHER] {id}: supervisor closed, start refused");
            return StartOutcome::Closed;
        }
        if self.is_started(id) {
            return StartOutcome::AlreadyRunning;
        }

        if let Err(e) = core.watcher_start(creds, id) {
            warn!("[WATCHER] {id}: start failed ({}: {})", e.code, e.description);
            return StartOutcome::Failed(e);
        }

        let loop_core = core.clone();
        let loop_id = id.clone();
        let spawned = thread::Builder::new()
            .name(format!("watcher-{id}"))
            .spawn(move || {
                debug!("[WATCHER] {loop_id}: loop entered");
                match loop_core.watcher_loop(&loop_id) {
                    Ok(()) => debug!("[WATCHER] {loop_id}: loop returned"),
                    Err(e) => warn!("[WATCHER] {loop_id}: loop failed ({}: {})", e.code, e.description),
                }
            });

        match spawned {
            Ok(thread) => {
                self.write().insert(
                    id.clone(),
                    WatchTask {
                        thread: Some(thread),
                        connected: false,
                    },
                );
                info!("[WATCHER] {id}: started");
                StartOutcome::Started
            }
            Err(e) => {
                error!("[WATCHER] {id}: failed to spawn loop thread: {e}");
                if let Err(e) = core.watcher_delete(id) {
                    warn!("[WATCHER] {id}: delete failed ({}: {})", e.code, e.description);
                }
                StartOutcome::Failed(CoreError::new(ResultCode::Error, e.to_string()))
            }
        }
    }

    /// Attach a started watcher to the network. Returns `false` if `id` was
    /// never started, the supervisor is offline or the core refused.
    pub fn connect(&self, core: &dyn WalletCore, id: &WalletId) -> bool {
        let _ops = self.lock_ops();
        self.connect_locked(core, id)
    }

    fn connect_locked(&self, core: &dyn WalletCore, id: &WalletId) -> bool {
        if !self.is_online() {
            debug!("[WATCHER] {id}: connect ignored, offline");
            return false;
        }
        if !self.is_started(id) {
            debug!("[WATCHER] {id}: connect ignored, not started");
            return false;
        }
        match core.watcher_connect(id) {
            Ok(()) => {
                if let Some(task) = self.write().get_mut(id) {
                    task.connected = true;
                }
                debug!("[WATCHER] {id}: connected");
                true
            }
            Err(e) => {
                warn!("[WATCHER] {id}: connect failed ({}: {})", e.code, e.description);
                false
            }
        }
    }

    pub fn connect_all(&self, core: &dyn WalletCore) -> usize {
        let _ops = self.lock_ops();
        self.started_ids()
            .iter()
            .filter(|id| self.connect_locked(core, id))
            .count()
    }

    /// Connect every started watcher that is not connected yet.
    pub fn connect_pending(&self, core: &dyn WalletCore) -> usize {
        let _ops = self.lock_ops();
        let pending: Vec<WalletId> = {
            let tasks = self.read();
            tasks
                .iter()
                .filter(|(_, t)| !t.connected)
                .map(|(id, _)| id.clone())
                .collect()
        };
        pending.iter().filter(|id| self.connect_locked(core, id)).count()
    }

    /// Detach every watcher from the network, keeping loop threads alive.
    pub fn disconnect_all(&self, core: &dyn WalletCore) {
        let _ops = self.lock_ops();
        self.disconnect_locked(core);
    }

    /// Detach every watcher unless the supervisor went back online first.
    /// Returns whether it disconnected.
    pub fn disconnect_if_offline(&self, core: &dyn WalletCore) -> bool {
        let _ops = self.lock_ops();
        if self.is_online() {
            debug!("[WATCHER] back online, disconnect skipped");
            return false;
        }
        self.disconnect_locked(core);
        true
    }

    fn disconnect_locked(&self, core: &dyn WalletCore) {
        for id in self.started_ids() {
            if let Err(e) = core.watcher_disconnect(&id) {
                warn!("[WATCHER] {id}: disconnect failed ({}: {})", e.code, e.description);
            }
            if let Some(task) = self.write().get_mut(&id) {
                task.connected = false;
            }
        }
        debug!("[WATCHER] all watchers disconnected");
    }

    /// Stop one watcher: request stop, join its thread, delete native state,
    /// then unregister it.
    pub fn stop(&self, core: &dyn WalletCore, id: &WalletId) -> bool {
        let _ops = self.lock_ops();
        let thread = match self.write().get_mut(id) {
            Some(task) => task.thread.take(),
            None => {
                debug!("[WATCHER] {id}: stop ignored, not started");
                return false;
            }
        };
        self.shutdown_one(core, id, thread);
        self.write().remove(id);
        true
    }

    /// Stop and join every watcher, then close the supervisor.
    ///
    /// When this returns no loop thread is running and later `start` calls are
    /// refused until `open`.
    pub fn stop_all(&self, core: &dyn WalletCore) {
        let _ops = self.lock_ops();
        self.closed.store(true, Ordering::Release);

        let ids = self.started_ids();
        for id in &ids {
            if let Err(e) = core.watcher_stop(id) {
                warn!("[WATCHER] {id}: stop failed ({}: {})", e.code, e.description);
            }
        }

        for id in &ids {
            let thread = self.write().get_mut(id).and_then(|t| t.thread.take());
            self.join(id, thread);
            if let Err(e) = core.watcher_delete(id) {
                warn!("[WATCHER] {id}: delete failed ({}: {})", e.code, e.description);
            }
        }

        self.write().clear();
        info!("[WATCHER] stopped {} watcher(s)", ids.len());
    }

    /// Drop cached blockchain data for `ids`. Failures are logged per wallet.
    pub fn delete_cache(&self, core: &dyn WalletCore, ids: &[WalletId]) {
        for id in ids {
            if let Err(e) = core.watcher_delete_cache(id) {
                warn!("[WATCHER] {id}: cache delete failed ({}: {})", e.code, e.description);
            }
        }
    }

    fn shutdown_one(&self, core: &dyn WalletCore, id: &WalletId, thread: Option<JoinHandle<()>>) {
        if let Err(e) = core.watcher_stop(id) {
            warn!("[WATCHER] {id}: stop failed ({}: {})", e.code, e.description);
        }
        self.join(id, thread);
        if let Err(e) = core.watcher_delete(id) {
            warn!("[WATCHER] {id}: delete failed ({}: {})", e.code, e.description);
        }
        info!("[WATCHER] {id}: stopped");
    }

    fn join(&self, id: &WalletId, thread: Option<JoinHandle<()>>) {
        if let Some(thread) = thread {
            if thread.join().is_err() {
                error!("[WATCHER] {id}: loop thread panicked");
            }
        }
    }

    fn lock_ops(&self) -> MutexGuard<'_, ()> {
        self.ops.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, HashMap<WalletId, WatchTask>> {
        self.tasks.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<WalletId, WatchTask>> {
        self.tasks.write().unwrap_or_else(PoisonError::into_inner)
    }
}
