//! Ledger access
//!
//! Everything the relay needs from the chain sits behind [`LedgerClient`]:
//! a JSON-RPC node in production, an in-process ledger for simulation and
//! tests.

use async_trait::async_trait;
use futures_util::stream::BoxStream;
use serde::Serialize;

use crate::error::{EventDecodeError, LedgerError};
use crate::models::{AccountHandle, IndexSet, StatusRequest, StatusResponse};

pub mod abi;
pub mod rpc;
pub mod simulated;

pub use rpc::{JsonRpcLedger, RpcLedgerConfig};
pub use simulated::SimulatedLedger;

/// Status requests in ledger inclusion order. Never restarts; a decode
/// failure is yielded in place of the event it could not read. Faults while
/// fetching events are retried by the adapter and never appear here.
pub type StatusRequestStream = BoxStream<'static, Result<StatusRequest, EventDecodeError>>;

/// Proof that a transaction was included.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TxConfirmation {
    pub tx_hash: String,
    pub block_number: Option<u64>,
}

#[async_trait]
pub trait LedgerClient: Send + Sync {
    /// Accounts the node will send transactions for, in the node's order.
    async fn get_accounts(&self) -> Result<Vec<AccountHandle>, LedgerError>;

    /// Fee the app contract charges per oracle registration, in wei.
    async fn registration_fee(&self) -> Result<u128, LedgerError>;

    /// Registers `account` as an oracle and waits for inclusion.
    async fn register_oracle(
        &self,
        account: &AccountHandle,
        fee: u128,
    ) -> Result<TxConfirmation, LedgerError>;

    /// Indexes the ledger assigned to `account` when it registered.
    async fn get_assigned_indexes(&self, account: &AccountHandle) -> Result<IndexSet, LedgerError>;

    async fn subscribe_status_requests(&self) -> Result<StatusRequestStream, LedgerError>;

    /// Sends `response` from `account` and waits for inclusion.
    async fn submit_status_response(
        &self,
        account: &AccountHandle,
        response: &StatusResponse,
    ) -> Result<TxConfirmation, LedgerError>;
}
