use std::sync::Arc;
use std::thread;

use bitcoin::{Amount, SignedAmount};

use super::*;
use crate::backend::{Credentials, MockWalletCore};

fn snapshot(id: &str, generation: i64) -> WalletSnapshot {
    WalletSnapshot {
        id: id.into(),
        name: format!("gen-{generation}"),
        currency: Some("USD".into()),
        balance: SignedAmount::from_sat(generation),
        archived: false,
        synced: true,
    }
}

#[test]
fn readers_only_see_complete_snapshots() {
    let cache = Arc::new(WalletCache::new());
    assert!(cache.current().is_none());

    let writer = {
        let cache = cache.clone();
        thread::spawn(move || {
            for generation in 0..200 {
                cache.publish(vec![snapshot("a", generation), snapshot("b", generation)]);
            }
        })
    };

    let readers: Vec<_> = (0..4)
        .map(|_| {
            let cache = cache.clone();
            thread::spawn(move || {
                for _ in 0..500 {
                    if let Some(list) = cache.current() {
                        assert_eq!(list.len(), 2);
                        assert_eq!(list[0].balance, list[1].balance);
                    }
                }
            })
        })
        .collect();

    writer.join().unwrap();
    for reader in readers {
        reader.join().unwrap();
    }
    assert_eq!(cache.get(&"b".into()).unwrap().name, "gen-199");
}

#[test]
fn publish_returns_the_superseded_list() {
    let cache = WalletCache::new();
    assert!(cache.publish(vec![snapshot("a", 1)]).is_none());

    let previous = cache.publish(vec![snapshot("a", 2)]).unwrap();
    assert_eq!(previous[0].balance, SignedAmount::from_sat(1));

    cache.clear();
    assert!(cache.current().is_none());
}

#[test]
fn active_excludes_archived_wallets() {
    let cache = WalletCache::new();
    let mut archived = snapshot("b", 1);
    archived.archived = true;
    cache.publish(vec![snapshot("a", 1), archived, snapshot("c", 1)]);

    let active: Vec<_> = cache.active().unwrap().into_iter().map(|w| w.id).collect();
    assert_eq!(active, vec![WalletId::from("a"), WalletId::from("c")]);
}

#[test]
fn settings_are_loaded_lazily_and_invalidated() {
    let core = MockWalletCore::new();
    let session = Session::new(Credentials::new("alice", None));

    assert!(session.cached_settings().is_none());
    session.settings(&core).unwrap();
    session.settings(&core).unwrap();
    assert_eq!(core.calls("account_settings"), 1);

    session.invalidate_settings();
    assert!(session.cached_settings().is_none());
    session.settings(&core).unwrap();
    assert_eq!(core.calls("account_settings"), 2);
}

#[test]
fn pin_threshold_and_auto_logout() {
    let settings = Settings {
        spend_require_pin_amount: Amount::from_sat(1_000),
        auto_logout_secs: 0,
        ..Settings::default()
    };
    assert!(settings.requires_pin(Amount::from_sat(1_001)));
    assert!(!settings.requires_pin(Amount::from_sat(1_000)));
    assert!(settings.auto_logout().is_zero());

    assert_eq!(Settings::default().auto_logout().as_secs(), 3_600);
    assert_eq!(Denomination::Bits.unit(), bitcoin::Denomination::Bit);
}

#[test]
fn otp_secret_and_login_state() {
    let session = Session::new(Credentials::new("bob", Some("pw".into())));
    assert!(session.is_logged_in());
    assert!(!session.has_otp_secret());

    session.set_otp_secret(Some("SECRET".into()));
    assert_eq!(session.otp_secret().as_deref(), Some("SECRET"));

    session.mark_logged_out();
    assert!(!session.is_logged_in());
}
