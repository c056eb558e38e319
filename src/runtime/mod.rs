//! Background machinery behind the engine: watcher threads, periodic cycles,
//! cache rebuilds and event delivery.

pub mod delivery;
pub mod dispatcher;
pub mod exchange;
pub mod reload;
pub mod sync;
pub mod watcher;

pub use dispatcher::EventSink;
pub use watcher::{StartOutcome, WatcherSupervisor};


use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use log::{debug, info, warn};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::backend::CoreError;
use crate::engine::state::Shared;

/// Log a failed background core call. Transient network errors are expected
/// and logged quieter.
pub(crate) fn log_failure(tag: &str, what: &str, e: &CoreError) {
    if e.code.is_transient() {
        info!("[{tag}] {what} failed ({}: {})", e.code, e.description);
    } else {
        warn!("[{tag}] {what} failed ({}: {})", e.code, e.description);
    }
}

struct PendingCycle {
    token: CancellationToken,
    handle: JoinHandle<()>,
}

/// At most one re-arming cycle loop per category.
///
/// `arm` while a live loop exists is a no-op. A cancelled loop is replaced,
/// and its successor waits for it to wind down before running.
pub(crate) struct CycleSlot {
    tag: &'static str,
    pending: Mutex<Option<PendingCycle>>,
}

impl CycleSlot {
    pub(crate) fn new(tag: &'static str) -> Self {
        Self {
            tag,
            pending: Mutex::new(None),
        }
    }

    pub(crate) fn is_pending(&self) -> bool {
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(|p| !p.token.is_cancelled() && !p.handle.is_finished())
    }

    /// Start the loop: run `body`, sleep `interval`, repeat until cancelled.
    pub(crate) fn arm<F, Fut>(&self, shared: &Arc<Shared>, interval: Duration, body: F) -> bool
    where
        F: Fn(Arc<Shared>, CancellationToken) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let tag = self.tag;
        if !shared.is_active() {
            debug!("[{tag}] engine not running, cycle not armed");
            return false;
        }

        let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(p) = pending.as_ref() {
            if !p.token.is_cancelled() && !p.handle.is_finished() {
                debug!("[{tag}] cycle already pending");
                return false;
            }
        }

        let previous = pending.take().map(|p| p.handle);
        let token = shared.token().child_token();
        let loop_token = token.clone();
        let loop_shared = shared.clone();

        let handle = shared.spawn(async move {
            if let Some(previous) = previous {
                let _ = previous.await;
            }
            loop {
                if loop_token.is_cancelled() {
                    break;
                }
                body(loop_shared.clone(), loop_token.clone()).await;
                tokio::select! {
                    _ = loop_token.cancelled() => break,
                    _ = tokio::time::sleep(interval) => {}
                }
            }
            debug!("[{tag}] cycle loop exited");
        });

        *pending = Some(PendingCycle { token, handle });
        true
    }

    /// Cancel the loop. It stops at its next checkpoint.
    pub(crate) fn cancel(&self) {
        if let Some(p) = self
            .pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
        {
            p.token.cancel();
        }
    }
}
