use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock, Weak};
use std::thread;
use std::time::Duration;

use super::*;
use crate::backend::{CoreError, Credentials, MockWalletCore, ResultCode, SyncStatus};
use crate::domain::Settings;
use crate::testing::{fast_config, init_logger, wait_until, Recorder, WAIT};

fn session() -> Arc<Session> {
    Arc::new(Session::new(Credentials::new("alice", Some("pw".into()))))
}

fn engine_with(
    core: &Arc<MockWalletCore>,
    config: EngineConfig,
) -> (AccountEngine, Arc<Session>, Arc<Recorder>) {
    init_logger();
    let session = session();
    let engine = AccountEngine::new(core.clone(), session.clone(), config).unwrap();
    let recorder = Recorder::new();
    engine.set_callbacks(Some(recorder.clone()));
    (engine, session, recorder)
}

fn settled(engine: &AccountEngine) {
    assert!(wait_until(WAIT, || engine.data_fetched()));
    assert!(wait_until(WAIT, || !engine.is_reloading()));
    thread::sleep(Duration::from_millis(100));
}

#[test]
fn start_loads_every_wallet() {
    let core = Arc::new(MockWalletCore::new().with_wallets(3));
    let (engine, session, recorder) = engine_with(&core, fast_config());

    engine.start();
    assert_eq!(engine.state(), EngineState::Running);

    assert!(wait_until(WAIT, || core.running_loops() == 3));
    assert!(recorder.wait_for(&Notification::WalletsChanged));
    for i in 1..=3 {
        let id = WalletId::new(format!("wallet-{i}"));
        assert!(recorder.wait_for(&Notification::WalletChanged(id.clone())));
        assert!(engine.is_watching(&id));
    }

    assert_eq!(recorder.count_of(&Notification::WalletsLoading), 1);
    assert_eq!(recorder.notes()[0], Notification::WalletsLoading);
    assert_eq!(core.calls("watcher_start"), 3);
    assert_eq!(core.calls("wallet_load"), 3);
    assert_eq!(engine.watcher_count(), 3);

    assert!(wait_until(WAIT, || {
        session.wallets().current().is_some_and(|w| w.len() == 3 && w.iter().all(|w| w.synced))
    }));

    engine.stop();
}

#[test]
fn stop_joins_everything_and_silences_callbacks() {
    let core = Arc::new(MockWalletCore::new().with_wallets(3));
    let (engine, _session, recorder) = engine_with(&core, fast_config());

    engine.start();
    settled(&engine);
    assert_eq!(core.running_loops(), 3);

    engine.stop();

    assert_eq!(engine.state(), EngineState::Stopped);
    assert_eq!(core.running_loops(), 0);
    assert_eq!(core.live_watchers(), 0);
    assert_eq!(engine.watcher_count(), 0);
    assert!(!engine.is_syncing());
    assert!(!engine.shared.notifier.is_open());

    let delivered = recorder.notes().len();
    let sink = engine.event_sink();
    sink.post(CoreEvent::BlockHeightChanged);
    sink.post(CoreEvent::WatcherSyncDone { wallet: "wallet-1".into() });
    assert!(!engine.reload_wallets());
    assert!(!engine.sync_now());
    thread::sleep(Duration::from_millis(200));

    assert_eq!(recorder.notes().len(), delivered);
    assert_eq!(recorder.delivery_threads().len(), 1);
}

#[test]
fn stop_is_idempotent() {
    let core = Arc::new(MockWalletCore::new().with_wallets(1));
    let (engine, _session, _recorder) = engine_with(&core, fast_config());

    engine.stop();
    assert_eq!(engine.state(), EngineState::Stopped);

    engine.start();
    engine.stop();
    engine.stop();
    assert_eq!(engine.state(), EngineState::Stopped);
    assert_eq!(core.running_loops(), 0);
}

#[test]
fn engine_restarts_after_stop() {
    let core = Arc::new(MockWalletCore::new().with_wallets(2));
    let (engine, _session, recorder) = engine_with(&core, fast_config());

    engine.start();
    assert!(wait_until(WAIT, || core.running_loops() == 2));
    engine.stop();

    engine.start();
    assert!(wait_until(WAIT, || core.running_loops() == 2));
    assert!(recorder.wait_for_n(2, |n| *n == Notification::WalletsLoading));
    assert_eq!(core.calls("watcher_start"), 4);
    engine.stop();
    assert_eq!(core.running_loops(), 0);
}

#[test]
fn start_is_refused_when_logged_out() {
    let core = Arc::new(MockWalletCore::new().with_wallets(1));
    let (engine, session, _recorder) = engine_with(&core, fast_config());

    session.mark_logged_out();
    engine.start();

    assert_eq!(engine.state(), EngineState::Stopped);
    assert_eq!(core.calls("watcher_start"), 0);
}

#[test]
fn dirty_account_sync_reloads_account_once() {
    let core = Arc::new(MockWalletCore::new().with_wallets(2));
    core.fail_watcher_start("wallet-2");
    core.push_account_sync(Ok(SyncStatus { dirty: true, password_changed: false }));
    let (engine, session, recorder) = engine_with(&core, fast_config());

    let stale = Settings { currency_code: "USD".into(), ..Settings::default() };
    core.set_settings(stale);
    session.settings(core.as_ref()).unwrap();
    core.set_settings(Settings { currency_code: "CAD".into(), ..Settings::default() });

    engine.start();
    assert!(recorder.wait_for(&Notification::AccountChanged));
    settled(&engine);

    assert_eq!(recorder.count_of(&Notification::AccountChanged), 1);
    // wallet-2 failed at load and was retried by the reload
    assert_eq!(core.calls("watcher_start"), 3);
    assert_eq!(session.settings(core.as_ref()).unwrap().currency_code, "CAD");

    engine.stop();
}

#[test]
fn several_dirty_wallets_in_one_cycle_notify_once() {
    let core = Arc::new(MockWalletCore::new().with_wallets(3));
    let config = EngineConfig {
        sync_interval_secs: 1,
        ..fast_config()
    };
    let (engine, _session, recorder) = engine_with(&core, config);

    engine.start();
    settled(&engine);
    let cycles = engine.sync_cycles();

    core.mark_wallet_dirty("wallet-1");
    core.mark_wallet_dirty("wallet-2");
    core.mark_wallet_dirty("wallet-3");

    assert!(recorder.wait_for(&Notification::AccountChanged));
    assert!(wait_until(WAIT, || engine.sync_cycles() >= cycles + 2));
    assert_eq!(recorder.count_of(&Notification::AccountChanged), 1);

    engine.stop();
}

#[test]
fn invalid_otp_without_secret_requires_otp() {
    let core = Arc::new(MockWalletCore::new().with_wallets(1));
    core.push_account_sync(Err(CoreError::new(ResultCode::InvalidOtp, "otp")));
    let (engine, _session, recorder) = engine_with(&core, fast_config());

    engine.start();
    assert!(recorder.wait_for(&Notification::OtpRequired));
    assert_eq!(recorder.count_of(&Notification::OtpSkew), 0);
    assert!(!engine.data_fetched());

    engine.stop();
}

#[test]
fn invalid_otp_with_secret_is_clock_skew() {
    let core = Arc::new(MockWalletCore::new().with_wallets(1));
    core.push_account_sync(Err(CoreError::new(ResultCode::InvalidOtp, "otp")));
    let (engine, session, recorder) = engine_with(&core, fast_config());
    session.set_otp_secret(Some("JBSWY3DPEHPK3PXP".into()));

    engine.start();
    assert!(recorder.wait_for(&Notification::OtpSkew));
    assert_eq!(recorder.count_of(&Notification::OtpRequired), 0);

    engine.stop();
}

#[test]
fn password_change_and_otp_reset_are_reported() {
    let core = Arc::new(MockWalletCore::new().with_wallets(1));
    core.push_account_sync(Ok(SyncStatus { dirty: false, password_changed: true }));
    core.set_otp_reset_pending(true);
    let (engine, _session, recorder) = engine_with(&core, fast_config());

    engine.start();
    assert!(recorder.wait_for(&Notification::RemotePasswordChange));
    assert!(recorder.wait_for(&Notification::OtpResetPending));
    assert_eq!(recorder.count_of(&Notification::AccountChanged), 0);

    engine.stop();
}

#[test]
fn first_successful_sync_connects_watchers() {
    let core = Arc::new(MockWalletCore::new().with_wallets(3));
    let (engine, _session, _recorder) = engine_with(&core, fast_config());

    engine.start();
    settled(&engine);

    assert_eq!(core.connected().len(), 3);
    assert!(engine.is_connected(&"wallet-2".into()));

    engine.stop();
    assert!(core.connected().is_empty());
}

#[test]
fn failed_sync_leaves_watchers_disconnected() {
    let core = Arc::new(MockWalletCore::new().with_wallets(2));
    core.push_account_sync(Err(CoreError::new(ResultCode::ServerError, "down")));
    let (engine, _session, _recorder) = engine_with(&core, fast_config());

    engine.start();
    assert!(wait_until(WAIT, || engine.sync_cycles() >= 1 && core.calls("is_otp_reset_pending") >= 1));
    thread::sleep(Duration::from_millis(100));

    assert!(!engine.data_fetched());
    assert!(core.connected().is_empty());
    assert_eq!(core.running_loops(), 2);

    engine.stop();
}

#[test]
fn requests_while_a_cycle_is_pending_are_dropped() {
    let core = Arc::new(
        MockWalletCore::new()
            .with_wallets(2)
            .with_sync_delay(Duration::from_millis(300)),
    );
    let (engine, _session, _recorder) = engine_with(&core, fast_config());

    engine.start();
    assert!(wait_until(WAIT, || engine.is_syncing()));

    assert!(!engine.sync_now());
    assert!(!engine.sync_now());
    assert!(!engine.update_exchange_rates());

    settled(&engine);
    assert_eq!(core.max_concurrent_syncs(), 1);
    assert_eq!(engine.sync_cycles(), 1);

    engine.stop();
}

#[test]
fn pause_disconnects_and_resume_reconnects() {
    let core = Arc::new(MockWalletCore::new().with_wallets(2));
    let (engine, _session, _recorder) = engine_with(&core, fast_config());

    engine.start();
    settled(&engine);
    assert_eq!(core.connected().len(), 2);

    engine.pause();
    assert!(engine.is_paused());
    assert!(wait_until(WAIT, || core.connected().is_empty()));
    assert!(!engine.is_syncing());
    assert_eq!(core.running_loops(), 2);

    engine.resume();
    assert!(!engine.is_paused());
    assert!(wait_until(WAIT, || core.connected().len() == 2));
    assert!(engine.is_syncing());

    engine.stop();
}

#[test]
fn quick_resume_outlasts_a_slow_disconnect() {
    let core = Arc::new(
        MockWalletCore::new()
            .with_wallets(2)
            .with_disconnect_delay(Duration::from_millis(300)),
    );
    let (engine, _session, _recorder) = engine_with(&core, fast_config());

    engine.start();
    settled(&engine);
    assert_eq!(core.connected().len(), 2);

    engine.pause();
    engine.resume();
    thread::sleep(Duration::from_millis(1_500));

    assert!(!engine.is_paused());
    assert_eq!(core.connected().len(), 2);
    assert!(engine.is_connected(&"wallet-1".into()));
    assert!(engine.is_connected(&"wallet-2".into()));

    engine.pause();
    engine.resume();
    engine.pause();
    assert!(wait_until(WAIT, || core.connected().is_empty()));
    thread::sleep(Duration::from_millis(700));
    assert!(core.connected().is_empty());
    assert!(!engine.is_connected(&"wallet-1".into()));

    engine.stop();
}

#[test]
fn rearm_on_resume_waits_for_the_next_sync() {
    let core = Arc::new(MockWalletCore::new().with_wallets(1));
    let config = EngineConfig {
        data_fetch_policy: DataFetchPolicy::RearmOnResume,
        ..fast_config()
    };
    let (engine, _session, _recorder) = engine_with(&core, config);

    engine.start();
    settled(&engine);

    engine.pause();
    assert!(wait_until(WAIT, || core.connected().is_empty()));
    engine.resume();

    assert!(wait_until(WAIT, || engine.sync_cycles() >= 2));
    assert!(wait_until(WAIT, || engine.data_fetched() && core.connected().len() == 1));

    engine.stop();
}

#[test]
fn callbacks_run_on_one_thread() {
    let core = Arc::new(MockWalletCore::new().with_wallets(3));
    let (engine, _session, recorder) = engine_with(&core, fast_config());

    engine.start();
    settled(&engine);
    let sink = engine.event_sink();
    for _ in 0..5 {
        sink.post(CoreEvent::BlockHeightChanged);
    }
    assert!(recorder.wait_for_n(5, |n| *n == Notification::BlockHeightChanged));

    let threads = recorder.delivery_threads();
    assert_eq!(threads.len(), 1);
    assert!(!threads.contains(&thread::current().id()));

    engine.stop();
}

/// Stops its engine from inside the first `wallets_loading` callback.
#[derive(Default)]
struct StopFromCallback {
    engine: OnceLock<Weak<AccountEngine>>,
    stopped: AtomicBool,
}

impl AccountCallbacks for StopFromCallback {
    fn wallets_loading(&self) {
        if let Some(engine) = self.engine.get().and_then(Weak::upgrade) {
            engine.stop();
            self.stopped.store(true, Ordering::SeqCst);
        }
    }
}

#[test]
fn stop_from_inside_a_callback_does_not_deadlock() {
    init_logger();
    let core = Arc::new(MockWalletCore::new().with_wallets(2));
    let engine = Arc::new(AccountEngine::new(core.clone(), session(), fast_config()).unwrap());
    let callbacks = Arc::new(StopFromCallback::default());
    let _ = callbacks.engine.set(Arc::downgrade(&engine));
    engine.set_callbacks(Some(callbacks.clone()));

    engine.start();

    assert!(wait_until(WAIT, || callbacks.stopped.load(Ordering::SeqCst)));
    assert_eq!(engine.state(), EngineState::Stopped);
    assert_eq!(core.running_loops(), 0);
}

#[test]
fn watcher_cache_is_cleared_only_while_stopped() {
    let core = Arc::new(MockWalletCore::new().with_wallets(2));
    let (engine, _session, _recorder) = engine_with(&core, fast_config());

    engine.start();
    let err = engine.delete_watcher_cache().unwrap_err();
    assert!(matches!(err, Error::EngineRunning(_)));

    engine.stop();
    engine.delete_watcher_cache().unwrap();
    assert_eq!(core.deleted_caches().len(), 2);
}
