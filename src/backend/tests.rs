use std::sync::Arc;
use std::thread;
use std::time::Duration;

use super::*;
use crate::domain::WalletId;

fn creds() -> Credentials {
    Credentials::new("alice", Some("pw".into()))
}

#[test]
fn watcher_loop_blocks_until_stopped() {
    let core = Arc::new(MockWalletCore::new().with_wallets(1));
    let id = WalletId::from("wallet-1");
    core.watcher_start(&creds(), &id).unwrap();

    let loop_core = core.clone();
    let loop_id = id.clone();
    let handle = thread::spawn(move || loop_core.watcher_loop(&loop_id));

    for _ in 0..100 {
        if core.running_loops() == 1 {
            break;
        }
        thread::sleep(Duration::from_millis(5));
    }
    assert_eq!(core.running_loops(), 1);
    assert!(!handle.is_finished());

    core.watcher_stop(&id).unwrap();
    handle.join().unwrap().unwrap();
    assert_eq!(core.running_loops(), 0);

    core.watcher_delete(&id).unwrap();
    assert_eq!(core.live_watchers(), 0);
}

#[test]
fn stop_before_loop_returns_immediately() {
    let core = MockWalletCore::new().with_wallets(1);
    let id = WalletId::from("wallet-1");
    core.watcher_start(&creds(), &id).unwrap();
    core.watcher_stop(&id).unwrap();

    core.watcher_loop(&id).unwrap();
}

#[test]
fn loop_without_start_is_rejected() {
    let core = MockWalletCore::new().with_wallets(1);
    let err = core.watcher_loop(&WalletId::from("wallet-1")).unwrap_err();
    assert_eq!(err.code, ResultCode::InvalidWalletId);
}

#[test]
fn currency_is_known_only_after_load() {
    let core = MockWalletCore::new().with_wallets(1);
    let id = WalletId::from("wallet-1");

    assert!(core.wallet_currency(&creds(), &id).is_err());
    core.wallet_load(&creds(), &id).unwrap();
    assert_eq!(core.wallet_currency(&creds(), &id).unwrap(), "USD");
}

#[test]
fn scripted_account_sync_results_are_consumed_in_order() {
    let core = MockWalletCore::new();
    core.push_account_sync(Ok(SyncStatus { dirty: true, password_changed: false }));
    core.push_account_sync(Err(CoreError::new(ResultCode::InvalidOtp, "otp")));

    assert!(core.data_sync_account(&creds()).unwrap().dirty);
    assert!(core.data_sync_account(&creds()).unwrap_err().is_invalid_otp());
    assert_eq!(core.data_sync_account(&creds()).unwrap(), SyncStatus::default());
    assert_eq!(core.calls("data_sync_account"), 3);
}

#[test]
fn duplicate_wallet_names_are_refused() {
    let core = MockWalletCore::new();
    let new = NewWallet { name: "Savings".into(), currency: "EUR".into() };

    let id = core.create_wallet(&creds(), &new).unwrap();
    assert_eq!(core.list_wallet_ids(&creds()).unwrap(), vec![id]);

    let err = core.create_wallet(&creds(), &new).unwrap_err();
    assert_eq!(err.code, ResultCode::WalletAlreadyExists);
}

#[test]
fn transient_codes() {
    assert!(ResultCode::ServerError.is_transient());
    assert!(ResultCode::UrlError.is_transient());
    assert!(!ResultCode::InvalidOtp.is_transient());
    assert_eq!(
        CoreError::new(ResultCode::BadPassword, "nope").to_string(),
        "BadPassword: nope"
    );
}

#[test]
fn credentials_debug_hides_password() {
    let rendered = format!("{:?}", creds());
    assert!(rendered.contains("alice"));
    assert!(!rendered.contains("pw\""));
}
