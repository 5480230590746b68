//! Error types for the oracle relay
//!
//! Ledger faults are wrapped into one error per stage (registration, event
//! decoding, submission) so log records say where the relay was when the
//! ledger misbehaved.

use std::time::Duration;

use thiserror::Error;

use crate::ledger::abi::AbiError;
use crate::models::{AccountHandle, Index};

/// Faults reported by a ledger client.
#[derive(Debug, Clone, Error)]
pub enum LedgerError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("RPC error {code}: {message}")]
    Rpc { code: i64, message: String },

    #[error("malformed ledger response: {0}")]
    MalformedResponse(String),

    #[error("ABI error: {0}")]
    Abi(#[from] AbiError),

    #[error("transaction {tx_hash} reverted")]
    Reverted { tx_hash: String },

    #[error("transaction rejected: {0}")]
    Rejected(String),

    #[error("timed out waiting for {0}")]
    Timeout(String),

    #[error("{0} is not a registered oracle")]
    NotRegistered(AccountHandle),

    #[error("{0} is already a registered oracle")]
    AlreadyRegistered(AccountHandle),

    #[error("registration fee too low: sent {sent} wei, required {required} wei")]
    InsufficientFee { sent: u128, required: u128 },

    #[error("the status request subscription has already been taken")]
    AlreadySubscribed,
}

impl LedgerError {
    /// Network-level faults that say nothing about the ledger's state.
    pub fn is_transient(&self) -> bool {
        matches!(self, LedgerError::Transport(_) | LedgerError::Timeout(_))
    }
}

impl From<reqwest::Error> for LedgerError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            LedgerError::Timeout(err.to_string())
        } else if err.is_decode() {
            LedgerError::MalformedResponse(err.to_string())
        } else {
            LedgerError::Transport(err.to_string())
        }
    }
}

/// Why one identity could not join the oracle pool.
#[derive(Debug, Error)]
pub enum RegistrationError {
    #[error("could not enumerate ledger accounts: {0}")]
    Accounts(#[source] LedgerError),

    #[error("could not read the registration fee: {0}")]
    Fee(#[source] LedgerError),

    #[error("registration fee rejected for {account}: {source}")]
    FeeRejected {
        account: AccountHandle,
        #[source]
        source: LedgerError,
    },

    #[error("{account} is already registered")]
    Duplicate { account: AccountHandle },

    #[error("ledger rejected registration of {account}: {source}")]
    Rejected {
        account: AccountHandle,
        #[source]
        source: LedgerError,
    },

    #[error("ledger unavailable while registering {account}: {source}")]
    Network {
        account: AccountHandle,
        #[source]
        source: LedgerError,
    },

    #[error("{account} registered but its indexes could not be read back: {source}")]
    IndexReadBack {
        account: AccountHandle,
        #[source]
        source: LedgerError,
    },
}

impl RegistrationError {
    pub fn from_ledger(account: &AccountHandle, source: LedgerError) -> Self {
        let account = account.clone();
        match source {
            LedgerError::InsufficientFee { .. } => RegistrationError::FeeRejected { account, source },
            LedgerError::AlreadyRegistered(_) => RegistrationError::Duplicate { account },
            source if source.is_transient() => RegistrationError::Network { account, source },
            source => RegistrationError::Rejected { account, source },
        }
    }

    pub fn account(&self) -> Option<&AccountHandle> {
        match self {
            RegistrationError::Accounts(_) | RegistrationError::Fee(_) => None,
            RegistrationError::FeeRejected { account, .. }
            | RegistrationError::Duplicate { account }
            | RegistrationError::Rejected { account, .. }
            | RegistrationError::Network { account, .. }
            | RegistrationError::IndexReadBack { account, .. } => Some(account),
        }
    }
}

/// An event on the request subscription that could not be turned into a
/// `StatusRequest`.
#[derive(Debug, Clone, Error)]
pub enum EventDecodeError {
    #[error("{log}: unexpected event topic {topic}")]
    UnexpectedTopic { log: String, topic: String },

    #[error("{log}: malformed `{field}`: {reason}")]
    Field {
        log: String,
        field: &'static str,
        reason: String,
    },

    #[error("{log}: {source}")]
    Payload {
        log: String,
        #[source]
        source: AbiError,
    },
}

/// One oracle's response that did not make it onto the ledger.
#[derive(Debug, Clone, Error)]
pub enum SubmissionError {
    #[error("oracle {oracle} response to request index {request_index} failed: {source}")]
    Rejected {
        request_index: Index,
        oracle: AccountHandle,
        #[source]
        source: LedgerError,
    },

    #[error("oracle {oracle} response to request index {request_index} abandoned after {timeout:?}")]
    TimedOut {
        request_index: Index,
        oracle: AccountHandle,
        timeout: Duration,
    },

    #[error("oracle {oracle} response task for request index {request_index} aborted: {reason}")]
    Aborted {
        request_index: Index,
        oracle: AccountHandle,
        reason: String,
    },
}

impl SubmissionError {
    pub fn oracle(&self) -> &AccountHandle {
        match self {
            SubmissionError::Rejected { oracle, .. }
            | SubmissionError::TimedOut { oracle, .. }
            | SubmissionError::Aborted { oracle, .. } => oracle,
        }
    }

    pub fn request_index(&self) -> Index {
        match self {
            SubmissionError::Rejected { request_index, .. }
            | SubmissionError::TimedOut { request_index, .. }
            | SubmissionError::Aborted { request_index, .. } => *request_index,
        }
    }

    /// Whether resending could plausibly succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            SubmissionError::Rejected { source, .. } => source.is_transient(),
            SubmissionError::TimedOut { .. } => true,
            SubmissionError::Aborted { .. } => false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResolverError {
    #[error("status code {0} is not a known flight status")]
    UnknownStatusCode(u8),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required environment variable {0}")]
    Missing(&'static str),

    #[error("invalid value {value:?} for {var}: {reason}")]
    Invalid {
        var: &'static str,
        value: String,
        reason: String,
    },
}
