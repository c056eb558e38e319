use bitcoin::Amount;

use crate::domain::{TxId, WalletId};

/// Asynchronous event raised by the native core on one of its own threads.
#[derive(Debug, Clone, PartialEq)]
pub enum CoreEvent {
    IncomingPayment { wallet: WalletId, tx: TxId },
    BalanceUpdate { wallet: WalletId, tx: TxId },
    BlockHeightChanged,
    /// The wallet's watcher finished its initial sync.
    WatcherSyncDone { wallet: WalletId },
    SweepComplete {
        wallet: WalletId,
        tx: Option<TxId>,
        amount: Amount,
    },
}

impl CoreEvent {
    pub fn wallet(&self) -> Option<&WalletId> {
        match self {
            CoreEvent::IncomingPayment { wallet, .. }
            | CoreEvent::BalanceUpdate { wallet, .. }
            | CoreEvent::WatcherSyncDone { wallet }
            | CoreEvent::SweepComplete { wallet, .. } => Some(wallet),
            CoreEvent::BlockHeightChanged => None,
        }
    }
}

/// Normalized notification delivered to the registered [`AccountCallbacks`].
#[derive(Debug, Clone, PartialEq)]
pub enum Notification {
    WalletsLoading,
    WalletsLoaded,
    WalletsChanged,
    WalletChanged(WalletId),
    AccountChanged,
    RemotePasswordChange,
    OtpSkew,
    OtpRequired,
    OtpResetPending,
    ExchangeRateChanged,
    BlockHeightChanged,
    BalanceUpdate { wallet: WalletId, tx: TxId },
    IncomingPayment { wallet: WalletId, tx: TxId },
    SweepComplete {
        wallet: WalletId,
        tx: Option<TxId>,
        amount: Amount,
    },
    LoggedOut,
}

impl Notification {
    /// Invoke the matching observer method.
    pub fn dispatch(&self, callbacks: &dyn AccountCallbacks) {
        match self {
            Notification::WalletsLoading => callbacks.wallets_loading(),
            Notification::WalletsLoaded => callbacks.wallets_loaded(),
            Notification::WalletsChanged => callbacks.wallets_changed(),
            Notification::WalletChanged(id) => callbacks.wallet_changed(id),
            Notification::AccountChanged => callbacks.account_changed(),
            Notification::RemotePasswordChange => callbacks.remote_password_change(),
            Notification::OtpSkew => callbacks.otp_skew(),
            Notification::OtpRequired => callbacks.otp_required(),
            Notification::OtpResetPending => callbacks.otp_reset_pending(),
            Notification::ExchangeRateChanged => callbacks.exchange_rate_changed(),
            Notification::BlockHeightChanged => callbacks.block_height_changed(),
            Notification::BalanceUpdate { wallet, tx } => callbacks.balance_update(wallet, tx),
            Notification::IncomingPayment { wallet, tx } => callbacks.incoming_payment(wallet, tx),
            Notification::SweepComplete { wallet, tx, amount } => {
                callbacks.sweep_complete(wallet, tx.as_ref(), *amount)
            }
            Notification::LoggedOut => callbacks.logged_out(),
        }
    }
}

/// Observer for account activity. All methods run on the engine's single
/// delivery thread, one at a time, and default to doing nothing.
pub trait AccountCallbacks: Send + Sync {
    fn wallets_loading(&self) {}
    fn wallets_loaded(&self) {}
    fn wallets_changed(&self) {}
    fn wallet_changed(&self, _wallet: &WalletId) {}
    fn account_changed(&self) {}
    fn remote_password_change(&self) {}
    fn otp_skew(&self) {}
    fn otp_required(&self) {}
    fn otp_reset_pending(&self) {}
    fn exchange_rate_changed(&self) {}
    fn block_height_changed(&self) {}
    fn balance_update(&self, _wallet: &WalletId, _tx: &TxId) {}
    fn incoming_payment(&self, _wallet: &WalletId, _tx: &TxId) {}
    fn sweep_complete(&self, _wallet: &WalletId, _tx: Option<&TxId>, _amount: Amount) {}
    fn logged_out(&self) {}
}
