pub mod session;
pub mod settings;
pub mod wallet;

pub use session::Session;
pub use settings::{Denomination, Settings};
pub use wallet::{TxId, WalletCache, WalletId, WalletSnapshot};

#[cfg(test)]
mod tests;
