//! Error handling - engine status taxonomy

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Engine error hierarchy.
///
/// `Again` is the expected, frequent outcome of polling an external
/// service whose precondition is not yet met; the tick loops treat it as
/// "retry later", never as a failure. `Fatal` marks a durable-write or
/// invariant failure that must never be absorbed silently.
#[derive(Debug, Error)]
pub enum Error {
    /// Precondition or verification not yet satisfied; retry on a later tick
    #[error("not ready, try again")]
    Again,

    /// Caller supplied invalid trade/order parameters
    #[error("bad arguments: {0}")]
    BadArgs(String),

    /// Required collaborator (wallet, market) is unavailable
    #[error("insufficient environment: {0}")]
    InsufficientEnvironment(String),

    /// Referenced record or transaction not found
    #[error("no data: {0}")]
    NoData(String),

    /// Policy disallows the action
    #[error("refused: {0}")]
    Refused(String),

    /// Wallet service failure
    #[error("wallet: {0}")]
    Wallet(String),

    /// Market service failure
    #[error("market: {0}")]
    Market(String),

    /// Configuration errors
    #[error("config: {0}")]
    Config(String),

    /// Serialization
    #[error("serialization: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Durable-write or invariant failure
    #[error("fatal: {0}")]
    Fatal(String),
}

impl Error {
    /// True for the retry signal.
    pub fn is_again(&self) -> bool {
        matches!(self, Error::Again)
    }

    /// True for failures that must stop the tick loop.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::Fatal(_))
    }
}
