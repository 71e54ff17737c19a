use splitpool_common::{IntentKey, SplitError, TxHash};
use thiserror::Error;

use crate::decode::DecodeError;

pub type ClientResult<T> = Result<T, ClientError>;

/// Where in the pipeline an error originated
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    /// Rejected locally before any network call
    Validation,
    /// The dry run reverted, nothing was broadcast
    Simulation,
    /// Broadcast or confirmation went wrong
    Submission,
    /// A read could not be served
    Read,
}

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("validation failed: {0}")]
    Validation(#[from] SplitError),
    #[error("transaction would revert: {reason}")]
    Reverted { reason: String },
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("RPC error [{code}]: {message}")]
    Rpc { code: i64, message: String },
    #[error("decode error: {0}")]
    Decode(#[from] DecodeError),
    #[error("transaction {tx_hash} not confirmed after {waited_secs}s")]
    ConfirmationTimeout { tx_hash: TxHash, waited_secs: u64 },
    #[error("transaction {tx_hash} reverted on chain")]
    FailedOnChain { tx_hash: TxHash },
    #[error("a submission for {key} is already in flight")]
    AlreadyInFlight { key: IntentKey },
    #[error("no wallet connected")]
    NotConnected,
    #[error("wallet is on chain {actual}, expected {expected}")]
    WrongChain { expected: u64, actual: u64 },
    #[error("metadata {cid} unavailable from every gateway")]
    MetadataUnavailable { cid: String },
    #[error("confirmation task aborted: {0}")]
    TaskAborted(String),
    #[error("configuration error: {0}")]
    Config(String),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl ClientError {
    pub fn rpc(code: i64, message: impl Into<String>) -> Self {
        Self::Rpc {
            code,
            message: message.into(),
        }
    }

    pub fn reverted(reason: impl Into<String>) -> Self {
        Self::Reverted {
            reason: reason.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation(_) | Self::Config(_) => ErrorKind::Validation,
            Self::Reverted { .. } => ErrorKind::Simulation,
            Self::ConfirmationTimeout { .. }
            | Self::FailedOnChain { .. }
            | Self::AlreadyInFlight { .. }
            | Self::NotConnected
            | Self::WrongChain { .. }
            | Self::TaskAborted(_) => ErrorKind::Submission,
            Self::Transport(_)
            | Self::Rpc { .. }
            | Self::Decode(_)
            | Self::MetadataUnavailable { .. }
            | Self::Json(_)
            | Self::Io(_) => ErrorKind::Read,
        }
    }

    /// Hash of the transaction this error concerns, when one was broadcast
    pub fn tx_hash(&self) -> Option<TxHash> {
        match self {
            Self::ConfirmationTimeout { tx_hash, .. } | Self::FailedOnChain { tx_hash } => {
                Some(*tx_hash)
            }
            _ => None,
        }
    }
}
