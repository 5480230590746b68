//! JSON-RPC ledger client
//!
//! Talks to an Ethereum-style node that manages the oracle accounts itself
//! (`eth_sendTransaction` from unlocked accounts), so no key material passes
//! through the relay.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{stream, StreamExt};
use reqwest::Client;
use serde_json::{json, Value};
use tokio::time::{sleep, timeout};
use tracing::{debug, warn};

use crate::error::{EventDecodeError, LedgerError};
use crate::ledger::abi::{self, Token};
use crate::ledger::{LedgerClient, StatusRequestStream, TxConfirmation};
use crate::models::{AccountHandle, IndexSet, StatusRequest, StatusResponse};

/// Upper bound on the block span of one `eth_getLogs` call.
const MAX_BLOCK_RANGE: u64 = 200;

#[derive(Debug, Clone)]
pub struct RpcLedgerConfig {
    pub rpc_url: String,
    pub app_address: AccountHandle,
    pub gas_limit: u64,
    pub gas_price: u128,
    pub poll_interval: Duration,
    pub receipt_timeout: Duration,
}

#[derive(Clone)]
pub struct JsonRpcLedger {
    config: Arc<RpcLedgerConfig>,
    http: Client,
    request_id: Arc<AtomicU64>,
    oracle_request_topic: String,
}

impl JsonRpcLedger {
    pub fn new(config: RpcLedgerConfig) -> Self {
        Self {
            config: Arc::new(config),
            http: Client::new(),
            request_id: Arc::new(AtomicU64::new(1)),
            oracle_request_topic: abi::event_topic(abi::ORACLE_REQUEST_EVENT),
        }
    }

    async fn rpc_call(&self, method: &str, params: Value) -> Result<Value, LedgerError> {
        let id = self.request_id.fetch_add(1, Ordering::Relaxed);
        let response = self
            .http
            .post(&self.config.rpc_url)
            .json(&json!({
                "jsonrpc": "2.0",
                "id": id,
                "method": method,
                "params": params,
            }))
            .send()
            .await?
            .error_for_status()?
            .json::<Value>()
            .await?;

        if let Some(error) = response.get("error") {
            return Err(LedgerError::Rpc {
                code: error.pointer("/code").and_then(Value::as_i64).unwrap_or_default(),
                message: error
                    .pointer("/message")
                    .and_then(Value::as_str)
                    .unwrap_or("unknown error")
                    .to_string(),
            });
        }

        response
            .get("result")
            .cloned()
            .ok_or_else(|| LedgerError::MalformedResponse(format!("{method}: no result")))
    }

    async fn call(&self, from: Option<&AccountHandle>, data: String) -> Result<Vec<u8>, LedgerError> {
        let mut tx = json!({
            "to": self.config.app_address,
            "data": data,
        });
        if let Some(from) = from {
            tx["from"] = json!(from);
        }

        let result = self.rpc_call("eth_call", json!([tx, "latest"])).await?;
        let encoded = result
            .as_str()
            .ok_or_else(|| LedgerError::MalformedResponse("eth_call: result is not a string".into()))?;
        Ok(abi::decode_hex(encoded)?)
    }

    async fn send_transaction(
        &self,
        from: &AccountHandle,
        data: String,
        value: u128,
    ) -> Result<TxConfirmation, LedgerError> {
        let tx = json!({
            "from": from,
            "to": self.config.app_address,
            "data": data,
            "value": quantity(value),
            "gas": quantity(u128::from(self.config.gas_limit)),
            "gasPrice": quantity(self.config.gas_price),
        });

        let result = self.rpc_call("eth_sendTransaction", json!([tx])).await?;
        let tx_hash = result
            .as_str()
            .ok_or_else(|| {
                LedgerError::MalformedResponse("eth_sendTransaction: result is not a hash".into())
            })?
            .to_string();

        timeout(self.config.receipt_timeout, self.wait_for_receipt(&tx_hash))
            .await
            .map_err(|_| LedgerError::Timeout(format!("receipt of {tx_hash}")))?
    }

    async fn wait_for_receipt(&self, tx_hash: &str) -> Result<TxConfirmation, LedgerError> {
        loop {
            let receipt = self
                .rpc_call("eth_getTransactionReceipt", json!([tx_hash]))
                .await?;
            if receipt.is_null() {
                sleep(self.config.poll_interval).await;
                continue;
            }

            let block_number = receipt
                .get("blockNumber")
                .and_then(Value::as_str)
                .map(parse_block_number)
                .transpose()?;

            // pre-Byzantium receipts carry no status field
            let succeeded = match receipt.get("status").and_then(Value::as_str) {
                Some(status) => parse_quantity(status)? == 1,
                None => true,
            };

            if !succeeded {
                return Err(LedgerError::Reverted {
                    tx_hash: tx_hash.to_string(),
                });
            }

            return Ok(TxConfirmation {
                tx_hash: tx_hash.to_string(),
                block_number,
            });
        }
    }

    async fn block_number(&self) -> Result<u64, LedgerError> {
        let result = self.rpc_call("eth_blockNumber", json!([])).await?;
        let block = result
            .as_str()
            .ok_or_else(|| LedgerError::MalformedResponse("eth_blockNumber: not a quantity".into()))?;
        parse_block_number(block)
    }

    async fn fetch_logs(&self, from_block: u64, to_block: u64) -> Result<Vec<Value>, LedgerError> {
        let filter = json!({
            "fromBlock": quantity(u128::from(from_block)),
            "toBlock": quantity(u128::from(to_block)),
            "address": self.config.app_address,
            "topics": [self.oracle_request_topic],
        });

        let result = self.rpc_call("eth_getLogs", json!([filter])).await?;
        match result {
            Value::Array(logs) => Ok(logs),
            _ => Err(LedgerError::MalformedResponse(
                "eth_getLogs: result is not an array".into(),
            )),
        }
    }
}

#[async_trait]
impl LedgerClient for JsonRpcLedger {
    async fn get_accounts(&self) -> Result<Vec<AccountHandle>, LedgerError> {
        let result = self.rpc_call("eth_accounts", json!([])).await?;
        let accounts = result
            .as_array()
            .ok_or_else(|| LedgerError::MalformedResponse("eth_accounts: not an array".into()))?;

        accounts
            .iter()
            .map(|account| {
                account
                    .as_str()
                    .map(AccountHandle::new)
                    .ok_or_else(|| LedgerError::MalformedResponse(format!("bad account {account}")))
            })
            .collect()
    }

    async fn registration_fee(&self) -> Result<u128, LedgerError> {
        let data = self
            .call(None, abi::encode_call(abi::REGISTRATION_FEE, &[])?)
            .await?;
        let fee = data.get(..abi::WORD).ok_or_else(|| {
            LedgerError::MalformedResponse(format!("REGISTRATION_FEE(): {} bytes", data.len()))
        })?;
        Ok(abi::decode_uint(fee)?)
    }

    async fn register_oracle(
        &self,
        account: &AccountHandle,
        fee: u128,
    ) -> Result<TxConfirmation, LedgerError> {
        let data = abi::encode_call(abi::REGISTER_ORACLE, &[])?;
        self.send_transaction(account, data, fee).await
    }

    async fn get_assigned_indexes(&self, account: &AccountHandle) -> Result<IndexSet, LedgerError> {
        let data = abi::encode_call(abi::GET_MY_INDEXES, &[])?;
        // getMyIndexes() reverts for accounts that never registered
        let returned = self.call(Some(account), data).await.map_err(|err| match err {
            LedgerError::Rpc { code, ref message } if is_revert(code, message) => {
                debug!(oracle = %account, code, reason = %message, "getMyIndexes() reverted");
                LedgerError::NotRegistered(account.clone())
            }
            other => other,
        })?;
        Ok(IndexSet::new(abi::decode_indexes(&returned)?))
    }

    async fn subscribe_status_requests(&self) -> Result<StatusRequestStream, LedgerError> {
        let start_block = self.block_number().await?;
        debug!(start_block, "subscribing to OracleRequest logs");

        let poller = LogPoller {
            ledger: self.clone(),
            next_block: start_block,
            pending: VecDeque::new(),
            consecutive_failures: 0,
        };

        Ok(stream::unfold(poller, |mut poller| async move {
            let event = poller.next_event().await;
            Some((event, poller))
        })
        .boxed())
    }

    async fn submit_status_response(
        &self,
        account: &AccountHandle,
        response: &StatusResponse,
    ) -> Result<TxConfirmation, LedgerError> {
        let request = &response.request;
        let data = abi::encode_call(
            abi::SUBMIT_ORACLE_RESPONSE,
            &[
                Token::Uint(u128::from(request.index.0)),
                Token::Address(&request.airline),
                Token::String(&request.flight),
                Token::Uint(u128::from(request.timestamp)),
                Token::Uint(u128::from(response.verdict.code())),
                Token::Uint(response.quorum_size as u128),
            ],
        )?;
        self.send_transaction(account, data, 0).await
    }
}

/// Block cursor over `OracleRequest` logs.
struct LogPoller {
    ledger: JsonRpcLedger,
    next_block: u64,
    pending: VecDeque<Result<StatusRequest, EventDecodeError>>,
    consecutive_failures: u32,
}

impl LogPoller {
    async fn next_event(&mut self) -> Result<StatusRequest, EventDecodeError> {
        loop {
            if let Some(event) = self.pending.pop_front() {
                return event;
            }

            // a failed poll yields nothing; the cursor stays put and the
            // same range is fetched again
            match self.poll_once().await {
                Ok(()) => self.consecutive_failures = 0,
                Err(err) => {
                    self.consecutive_failures = self.consecutive_failures.saturating_add(1);
                    warn!(
                        next_block = self.next_block,
                        consecutive_failures = self.consecutive_failures,
                        error = %err,
                        "OracleRequest log poll failed; retrying"
                    );
                }
            }

            if self.pending.is_empty() {
                sleep(self.ledger.config.poll_interval).await;
            }
        }
    }

    async fn poll_once(&mut self) -> Result<(), LedgerError> {
        let latest_block = self.ledger.block_number().await?;
        if self.next_block > latest_block {
            return Ok(());
        }

        // Limit the range per cycle to keep requests and processing predictable.
        let to_block = latest_block.min(self.next_block + MAX_BLOCK_RANGE - 1);
        let logs = self.ledger.fetch_logs(self.next_block, to_block).await?;
        debug!(
            from_block = self.next_block,
            to_block,
            logs = logs.len(),
            "polled OracleRequest logs"
        );

        let topic = &self.ledger.oracle_request_topic;
        self.pending
            .extend(logs.iter().filter(|raw| !is_removed(raw)).map(|raw| decode_log(raw, topic)));
        self.next_block = to_block + 1;
        Ok(())
    }
}

fn is_removed(raw: &Value) -> bool {
    raw.get("removed").and_then(Value::as_bool).unwrap_or(false)
}

fn decode_log(raw: &Value, expected_topic: &str) -> Result<StatusRequest, EventDecodeError> {
    let block = raw
        .get("blockNumber")
        .and_then(Value::as_str)
        .unwrap_or("pending");
    let log_index = raw.get("logIndex").and_then(Value::as_str).unwrap_or("?");
    let log = format!("log {log_index} in block {block}");

    let topic = raw
        .pointer("/topics/0")
        .and_then(Value::as_str)
        .unwrap_or_default();
    if !topic.eq_ignore_ascii_case(expected_topic) {
        return Err(EventDecodeError::UnexpectedTopic {
            log,
            topic: topic.to_string(),
        });
    }

    let data = raw
        .get("data")
        .and_then(Value::as_str)
        .ok_or_else(|| EventDecodeError::Field {
            log: log.clone(),
            field: "data",
            reason: "missing".to_string(),
        })?;

    abi::decode_hex(data)
        .and_then(|bytes| abi::decode_oracle_request(&bytes))
        .map_err(|source| EventDecodeError::Payload { log, source })
}

fn quantity(value: u128) -> String {
    format!("{value:#x}")
}

fn parse_block_number(value: &str) -> Result<u64, LedgerError> {
    u64::try_from(parse_quantity(value)?)
        .map_err(|_| LedgerError::MalformedResponse(format!("block number {value:?} exceeds u64")))
}

/// JSON-RPC error for an `eth_call` that executed and reverted, as opposed to
/// the node failing to run it.
fn is_revert(code: i64, message: &str) -> bool {
    code == 3 || message.to_ascii_lowercase().contains("revert")
}

fn parse_quantity(value: &str) -> Result<u128, LedgerError> {
    let digits = value.strip_prefix("0x").unwrap_or(value);
    if digits.is_empty() {
        return Ok(0);
    }
    u128::from_str_radix(digits, 16)
        .map_err(|err| LedgerError::MalformedResponse(format!("bad quantity {value:?}: {err}")))
}
