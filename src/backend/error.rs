use std::fmt;

use thiserror::Error;

/// Result codes reported by the wallet core.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResultCode {
    Error,
    BadPassword,
    InvalidOtp,
    AccountAlreadyExists,
    AccountDoesNotExist,
    WalletAlreadyExists,
    InvalidWalletId,
    UrlError,
    ServerError,
    NoRecoveryQuestions,
    NotSupported,
    InsufficientFunds,
    SpendDust,
    Synchronizing,
    NonNumericPin,
    InvalidPinWait,
    NoTransaction,
}

impl ResultCode {
    /// Network and server failures: background work logs these and re-arms.
    pub fn is_transient(self) -> bool {
        matches!(
            self,
            ResultCode::UrlError | ResultCode::ServerError | ResultCode::Synchronizing
        )
    }
}

impl fmt::Display for ResultCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// A failed wallet-core call: result code plus the core's description.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{code}: {description}")]
pub struct CoreError {
    pub code: ResultCode,
    pub description: String,
}

impl CoreError {
    pub fn new(code: ResultCode, description: impl Into<String>) -> Self {
        Self {
            code,
            description: description.into(),
        }
    }

    pub fn is_invalid_otp(&self) -> bool {
        self.code == ResultCode::InvalidOtp
    }
}

pub type CoreResult<T> = Result<T, CoreError>;
