pub mod api;
pub mod error;
pub mod mock;

pub use api::{Credentials, NewWallet, SyncStatus, WalletCore};
pub use error::{CoreError, CoreResult, ResultCode};
pub use mock::{MockWallet, MockWalletCore};

#[cfg(test)]
mod tests;
