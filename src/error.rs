use thiserror::Error;

use crate::backend::CoreError;

/// Errors surfaced synchronously to callers of the account API.
///
/// Background work never produces these: it logs and turns failures into
/// notifications instead.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Invalid credentials: {0}")]
    InvalidCredentials(&'static str),

    #[error("Account is logged out")]
    NotLoggedIn,

    #[error("Engine must be stopped to {0}")]
    EngineRunning(&'static str),

    #[error("Wallet core error: {0}")]
    Core(#[from] CoreError),

    #[error("Failed to build engine runtime: {0}")]
    Runtime(#[from] std::io::Error),
}

impl Error {
    /// The core result code, if this error came from the wallet core.
    pub fn core_code(&self) -> Option<crate::backend::ResultCode> {
        match self {
            Error::Core(e) => Some(e.code),
            _ => None,
        }
    }
}
