use std::collections::BTreeSet;
use std::sync::Arc;

use log::debug;
use tokio_util::sync::CancellationToken;

use crate::engine::state::Shared;
use crate::engine::Notification;
use crate::runtime::{log_failure, CycleSlot};

/// Periodic exchange-rate refresh for every currency the account uses.
pub struct ExchangeRateScheduler {
    slot: CycleSlot,
}

impl Default for ExchangeRateScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl ExchangeRateScheduler {
    pub fn new() -> Self {
        Self {
            slot: CycleSlot::new("EXCHANGE"),
        }
    }

    /// Start the refresh loop now. No-op while a loop is pending or running.
    pub(crate) fn update_now(&self, shared: &Arc<Shared>) -> bool {
        self.slot
            .arm(shared, shared.config.exchange_interval(), refresh_rates)
    }

    pub(crate) fn cancel(&self) {
        self.slot.cancel();
    }

    pub fn is_pending(&self) -> bool {
        self.slot.is_pending()
    }

    /// One-off rate request for a single currency.
    pub(crate) fn request(&self, shared: &Arc<Shared>, currency: String) {
        if !shared.is_active() {
            return;
        }
        let shared_task = shared.clone();
        shared.spawn(async move {
            let shared = shared_task;
            if shared.token().is_cancelled() {
                return;
            }
            request_rate(&shared, currency).await;
        });
    }
}

async fn request_rate(shared: &Shared, currency: String) {
    debug!("[EXCHANGE] requesting {currency} rate");
    let code = currency.clone();
    if let Err(e) = shared
        .core_call(move |core| core.request_exchange_rate_update(&code))
        .await
    {
        log_failure("EXCHANGE", &format!("{currency} rate update"), &e);
    }
}

async fn refresh_rates(shared: Arc<Shared>, token: CancellationToken) {
    if !shared.session.is_logged_in() {
        return;
    }

    let session = shared.session.clone();
    let settings = match shared
        .core_call(move |core| session.settings(core))
        .await
    {
        Ok(settings) => settings,
        Err(e) => {
            log_failure("EXCHANGE", "settings load", &e);
            return;
        }
    };
    let Some(wallets) = shared.session.wallets().current() else {
        debug!("[EXCHANGE] wallets not loaded yet, skipping refresh");
        return;
    };

    let mut currencies = BTreeSet::new();
    currencies.insert(settings.currency_code);
    currencies.extend(
        wallets
            .iter()
            .filter(|w| w.synced)
            .filter_map(|w| w.currency.clone()),
    );

    for currency in currencies {
        if token.is_cancelled() {
            return;
        }
        request_rate(&shared, currency).await;
    }

    shared.notifier.notify(Notification::ExchangeRateChanged);
}
