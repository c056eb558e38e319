use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{mpsc as std_mpsc, Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle, ThreadId};

use log::{debug, error, trace, warn};
use tokio::sync::mpsc;

use crate::domain::Session;
use crate::engine::Notification;

enum Envelope {
    Note { epoch: u64, note: Notification },
    /// Acknowledged once every envelope queued before it was handled.
    Flush(std_mpsc::SyncSender<()>),
}

/// Open/closed switch in front of the callbacks.
///
/// Each `open` starts a new epoch; notifications queued in an earlier epoch
/// are discarded on arrival.
struct Gate {
    open: AtomicBool,
    epoch: AtomicU64,
    /// Held while a callback runs, so `close` waits out an in-flight delivery.
    delivering: Mutex<()>,
}

/// Funnels notifications to the registered callbacks on one dedicated thread.
pub(crate) struct Notifier {
    tx: Option<mpsc::UnboundedSender<Envelope>>,
    gate: Arc<Gate>,
    thread: Option<JoinHandle<()>>,
    thread_id: Option<ThreadId>,
}

impl Notifier {
    pub(crate) fn new(session: Arc<Session>) -> std::io::Result<Self> {
        let (tx, rx) = mpsc::unbounded_channel();
        let gate = Arc::new(Gate {
            open: AtomicBool::new(false),
            epoch: AtomicU64::new(0),
            delivering: Mutex::new(()),
        });

        let thread_gate = gate.clone();
        let thread = thread::Builder::new()
            .name("account-delivery".into())
            .spawn(move || delivery_loop(rx, thread_gate, session))?;
        let thread_id = Some(thread.thread().id());

        Ok(Self {
            tx: Some(tx),
            gate,
            thread: Some(thread),
            thread_id,
        })
    }

    /// Queue a notification for delivery. Dropped while the gate is closed.
    pub(crate) fn notify(&self, note: Notification) {
        if !self.gate.open.load(Ordering::Acquire) {
            trace!("[DISPATCH] gate closed, dropping {note:?}");
            return;
        }
        let epoch = self.gate.epoch.load(Ordering::Acquire);
        if let Some(tx) = &self.tx {
            if tx.send(Envelope::Note { epoch, note }).is_err() {
                warn!("[DISPATCH] delivery thread gone");
            }
        }
    }

    pub(crate) fn open(&self) {
        self.gate.epoch.fetch_add(1, Ordering::AcqRel);
        self.gate.open.store(true, Ordering::Release);
    }

    pub(crate) fn is_open(&self) -> bool {
        self.gate.open.load(Ordering::Acquire)
    }

    /// Close the gate. Off the delivery thread this also waits for a callback
    /// that is currently running to return.
    pub(crate) fn close(&self) {
        self.gate.open.store(false, Ordering::Release);
        if !self.on_delivery_thread() {
            drop(self.gate.delivering.lock().unwrap_or_else(PoisonError::into_inner));
        }
        debug!("[DISPATCH] gate closed");
    }

    /// Block until every notification queued so far has been delivered.
    /// Returns immediately on the delivery thread itself.
    pub(crate) fn flush(&self) {
        if self.on_delivery_thread() {
            return;
        }
        let Some(tx) = &self.tx else { return };
        let (ack_tx, ack_rx) = std_mpsc::sync_channel(1);
        if tx.send(Envelope::Flush(ack_tx)).is_ok() {
            let _ = ack_rx.recv();
        }
    }

    /// Run a notification synchronously on the delivery thread, bypassing the
    /// queue. Only valid from inside a callback.
    pub(crate) fn deliver_inline(&self, note: &Notification, session: &Session) {
        debug_assert!(self.on_delivery_thread());
        if let Some(callbacks) = session.callbacks() {
            invoke(note, callbacks.as_ref());
        }
    }

    pub(crate) fn on_delivery_thread(&self) -> bool {
        self.thread_id == Some(thread::current().id())
    }
}

impl Drop for Notifier {
    fn drop(&mut self) {
        self.tx.take();
        if let Some(thread) = self.thread.take() {
            if thread.thread().id() != thread::current().id() && thread.join().is_err() {
                error!("[DISPATCH] delivery thread panicked");
            }
        }
    }
}

fn delivery_loop(mut rx: mpsc::UnboundedReceiver<Envelope>, gate: Arc<Gate>, session: Arc<Session>) {
    debug!("[DISPATCH] delivery thread running");
    while let Some(envelope) = rx.blocking_recv() {
        match envelope {
            Envelope::Note { epoch, note } => {
                let _delivering = gate.delivering.lock().unwrap_or_else(PoisonError::into_inner);
                let current = gate.epoch.load(Ordering::Acquire);
                if !gate.open.load(Ordering::Acquire) || epoch != current {
                    trace!("[DISPATCH] discarding stale {note:?}");
                    continue;
                }
                match session.callbacks() {
                    Some(callbacks) => invoke(&note, callbacks.as_ref()),
                    None => trace!("[DISPATCH] no callbacks for {note:?}"),
                }
            }
            Envelope::Flush(ack) => {
                let _ = ack.send(());
            }
        }
    }
    debug!("[DISPATCH] delivery thread exiting");
}

fn invoke(note: &Notification, callbacks: &dyn crate::engine::AccountCallbacks) {
    trace!("[DISPATCH] delivering {note:?}");
    if panic::catch_unwind(AssertUnwindSafe(|| note.dispatch(callbacks))).is_err() {
        error!("[DISPATCH] callback panicked while handling {note:?}");
    }
}
