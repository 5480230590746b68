//! In-process ledger mirroring the app contract's oracle rules
//!
//! Used by `LEDGER_MODE=simulated` and by the tests. Registration charges a
//! fixed fee and hands out three distinct indexes in `0..=9`; responses are
//! only accepted from oracles holding the request index, once per oracle,
//! and a status is accepted once `MIN_RESPONSES` oracles agree on it.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use tokio::sync::{mpsc, Mutex};
use tokio::time::sleep;
use tracing::{debug, info};

use crate::error::{EventDecodeError, LedgerError};
use crate::ledger::{LedgerClient, StatusRequestStream, TxConfirmation};
use crate::models::{
    AccountHandle, Index, IndexSet, StatusRequest, StatusResponse, StatusVerdict,
    INDEXES_PER_ORACLE,
};

/// Identical responses needed before the contract accepts a status.
pub const MIN_RESPONSES: usize = 3;

/// One ether.
pub const DEFAULT_REGISTRATION_FEE: u128 = 1_000_000_000_000_000_000;

const STARTING_BALANCE: u128 = 100 * DEFAULT_REGISTRATION_FEE;
const MAX_INDEX: u8 = 9;

/// Requests kept open at once; the oldest is closed when a new one opens.
const DEFAULT_OPEN_REQUESTS: usize = 1024;
/// Accepted responses and outcomes kept for inspection.
const DEFAULT_HISTORY: usize = 4096;

/// A response the ledger accepted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AcceptedResponse {
    pub oracle: AccountHandle,
    pub request: StatusRequest,
    pub verdict: StatusVerdict,
    pub quorum_size: usize,
}

/// A status the majority rule settled on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FlightOutcome {
    pub request: StatusRequest,
    pub verdict: StatusVerdict,
    pub responders: Vec<AccountHandle>,
}

struct LedgerState {
    accounts: Vec<AccountHandle>,
    balances: HashMap<AccountHandle, u128>,
    fee: u128,
    rng: StdRng,
    oracles: HashMap<AccountHandle, IndexSet>,
    scripted_indexes: HashMap<AccountHandle, IndexSet>,
    open_requests: HashSet<StatusRequest>,
    open_order: VecDeque<StatusRequest>,
    open_capacity: usize,
    responses: HashMap<StatusRequest, HashMap<StatusVerdict, Vec<AccountHandle>>>,
    accepted: VecDeque<AcceptedResponse>,
    outcomes: VecDeque<FlightOutcome>,
    history_capacity: usize,
    submission_delays: HashMap<AccountHandle, Duration>,
    rejecting: HashSet<AccountHandle>,
    lookup_failures: HashMap<AccountHandle, u32>,
    tx_counter: u64,
}

impl LedgerState {
    fn next_tx(&mut self) -> TxConfirmation {
        self.tx_counter += 1;
        TxConfirmation {
            tx_hash: format!("0x{:064x}", self.tx_counter),
            block_number: Some(self.tx_counter),
        }
    }

    fn open(&mut self, request: StatusRequest) {
        if !self.open_requests.insert(request.clone()) {
            return;
        }
        self.open_order.push_back(request);
        while self.open_order.len() > self.open_capacity {
            if let Some(oldest) = self.open_order.pop_front() {
                self.open_requests.remove(&oldest);
                self.responses.remove(&oldest);
            }
        }
    }

    fn remember<T>(history: &mut VecDeque<T>, capacity: usize, entry: T) {
        if history.len() == capacity {
            history.pop_front();
        }
        history.push_back(entry);
    }

    fn generate_indexes(&mut self) -> IndexSet {
        let mut indexes = [0u8; INDEXES_PER_ORACLE];
        let mut picked = 0;
        while picked < INDEXES_PER_ORACLE {
            let candidate = self.rng.gen_range(0..=MAX_INDEX);
            if !indexes[..picked].contains(&candidate) {
                indexes[picked] = candidate;
                picked += 1;
            }
        }
        IndexSet::new(indexes)
    }
}

pub struct SimulatedLedger {
    state: Mutex<LedgerState>,
    requests_tx: mpsc::UnboundedSender<Result<StatusRequest, EventDecodeError>>,
    requests_rx: Mutex<Option<mpsc::UnboundedReceiver<Result<StatusRequest, EventDecodeError>>>>,
}

impl SimulatedLedger {
    /// A ledger with `account_count` funded accounts.
    pub fn new(account_count: usize) -> Self {
        let accounts: Vec<AccountHandle> = (0..account_count).map(Self::account).collect();
        let balances = accounts
            .iter()
            .map(|account| (account.clone(), STARTING_BALANCE))
            .collect();
        let (requests_tx, requests_rx) = mpsc::unbounded_channel();

        Self {
            state: Mutex::new(LedgerState {
                accounts,
                balances,
                fee: DEFAULT_REGISTRATION_FEE,
                rng: StdRng::from_entropy(),
                oracles: HashMap::new(),
                scripted_indexes: HashMap::new(),
                open_requests: HashSet::new(),
                open_order: VecDeque::new(),
                open_capacity: DEFAULT_OPEN_REQUESTS,
                responses: HashMap::new(),
                accepted: VecDeque::new(),
                outcomes: VecDeque::new(),
                history_capacity: DEFAULT_HISTORY,
                submission_delays: HashMap::new(),
                rejecting: HashSet::new(),
                lookup_failures: HashMap::new(),
                tx_counter: 0,
            }),
            requests_tx,
            requests_rx: Mutex::new(Some(requests_rx)),
        }
    }

    /// The address of the `position`-th simulated account.
    pub fn account(position: usize) -> AccountHandle {
        AccountHandle::new(format!("0x{:040x}", position + 1))
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.state.get_mut().rng = StdRng::seed_from_u64(seed);
        self
    }

    pub fn with_fee(mut self, fee: u128) -> Self {
        self.state.get_mut().fee = fee;
        self
    }

    /// Pins the indexes `account` receives when it registers.
    pub fn with_indexes(mut self, account: &AccountHandle, indexes: [u8; INDEXES_PER_ORACLE]) -> Self {
        self.state
            .get_mut()
            .scripted_indexes
            .insert(account.clone(), IndexSet::new(indexes));
        self
    }

    /// Marks `account` as already registered, as if by an earlier run.
    pub fn with_registered_oracle(
        mut self,
        account: &AccountHandle,
        indexes: [u8; INDEXES_PER_ORACLE],
    ) -> Self {
        self.state
            .get_mut()
            .oracles
            .insert(account.clone(), IndexSet::new(indexes));
        self
    }

    /// Holds every response from `account` for `delay` before processing it.
    pub fn with_submission_delay(mut self, account: &AccountHandle, delay: Duration) -> Self {
        self.state
            .get_mut()
            .submission_delays
            .insert(account.clone(), delay);
        self
    }

    /// Bounds how many requests stay open and how much history is kept.
    pub fn with_retention(mut self, open_requests: usize, history: usize) -> Self {
        let state = self.state.get_mut();
        state.open_capacity = open_requests.max(1);
        state.history_capacity = history.max(1);
        self
    }

    /// Fails the next `times` index lookups for `account` as if the node
    /// could not be reached.
    pub fn with_failing_index_lookups(mut self, account: &AccountHandle, times: u32) -> Self {
        self.state
            .get_mut()
            .lookup_failures
            .insert(account.clone(), times);
        self
    }

    /// Rejects every response from `account`.
    pub fn with_rejected_submissions(mut self, account: &AccountHandle) -> Self {
        self.state.get_mut().rejecting.insert(account.clone());
        self
    }

    /// Opens a request and emits its `OracleRequest` event, like the app
    /// contract's `fetchFlightStatus`.
    pub async fn request_status(&self, request: StatusRequest) {
        self.state.lock().await.open(request.clone());
        // the receiver only disappears once the subscriber is gone
        let _ = self.requests_tx.send(Ok(request));
    }

    /// Emits an event the subscriber cannot decode.
    pub fn emit_malformed(&self, error: EventDecodeError) {
        let _ = self.requests_tx.send(Err(error));
    }

    pub async fn balance(&self, account: &AccountHandle) -> u128 {
        self.state
            .lock()
            .await
            .balances
            .get(account)
            .copied()
            .unwrap_or_default()
    }

    pub async fn accepted_responses(&self) -> Vec<AcceptedResponse> {
        self.state.lock().await.accepted.iter().cloned().collect()
    }

    pub async fn outcomes(&self) -> Vec<FlightOutcome> {
        self.state.lock().await.outcomes.iter().cloned().collect()
    }

    /// Emits a request for a random index every `interval`, using the second
    /// account as the airline.
    pub fn spawn_request_generator(self: Arc<Self>, interval: Duration) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let airline = Self::account(1);
            let mut flight_number = 1309u32;
            loop {
                sleep(interval).await;
                let (index, offset) = {
                    let mut state = self.state.lock().await;
                    (
                        state.rng.gen_range(0..=MAX_INDEX),
                        state.rng.gen_range(-3_600i64..3_600),
                    )
                };
                let timestamp = (chrono::Utc::now().timestamp() + offset).max(0) as u64;
                let request = StatusRequest {
                    index: Index(index),
                    airline: airline.clone(),
                    flight: format!("ND{flight_number}"),
                    timestamp,
                };
                info!(request_index = %request.index, flight = %request.flight, timestamp, "simulating fetchFlightStatus");
                self.request_status(request).await;
                flight_number += 1;
            }
        })
    }
}

#[async_trait]
impl LedgerClient for SimulatedLedger {
    async fn get_accounts(&self) -> Result<Vec<AccountHandle>, LedgerError> {
        Ok(self.state.lock().await.accounts.clone())
    }

    async fn registration_fee(&self) -> Result<u128, LedgerError> {
        Ok(self.state.lock().await.fee)
    }

    async fn register_oracle(
        &self,
        account: &AccountHandle,
        fee: u128,
    ) -> Result<TxConfirmation, LedgerError> {
        let mut state = self.state.lock().await;

        if fee < state.fee {
            return Err(LedgerError::InsufficientFee {
                sent: fee,
                required: state.fee,
            });
        }
        if state.oracles.contains_key(account) {
            return Err(LedgerError::AlreadyRegistered(account.clone()));
        }
        let balance = state
            .balances
            .get_mut(account)
            .ok_or_else(|| LedgerError::Rejected(format!("unknown account {account}")))?;
        if *balance < fee {
            return Err(LedgerError::Rejected(format!("{account} cannot cover {fee} wei")));
        }
        *balance -= fee;

        let scripted = state.scripted_indexes.remove(account);
        let indexes = match scripted {
            Some(indexes) => indexes,
            None => state.generate_indexes(),
        };
        state.oracles.insert(account.clone(), indexes);
        debug!(oracle = %account, %indexes, "simulated oracle registration");

        Ok(state.next_tx())
    }

    async fn get_assigned_indexes(&self, account: &AccountHandle) -> Result<IndexSet, LedgerError> {
        let mut state = self.state.lock().await;
        if let Some(remaining) = state.lookup_failures.get_mut(account) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(LedgerError::Transport("connection reset by peer".to_string()));
            }
        }
        state
            .oracles
            .get(account)
            .copied()
            .ok_or_else(|| LedgerError::NotRegistered(account.clone()))
    }

    async fn subscribe_status_requests(&self) -> Result<StatusRequestStream, LedgerError> {
        let receiver = self
            .requests_rx
            .lock()
            .await
            .take()
            .ok_or(LedgerError::AlreadySubscribed)?;

        Ok(futures_util::stream::unfold(receiver, |mut receiver| async move {
            receiver.recv().await.map(|event| (event, receiver))
        })
        .boxed())
    }

    async fn submit_status_response(
        &self,
        account: &AccountHandle,
        response: &StatusResponse,
    ) -> Result<TxConfirmation, LedgerError> {
        let delay = self
            .state
            .lock()
            .await
            .submission_delays
            .get(account)
            .copied();
        if let Some(delay) = delay {
            sleep(delay).await;
        }

        let mut state = self.state.lock().await;
        if state.rejecting.contains(account) {
            return Err(LedgerError::Rejected(format!("{account} responses are rejected")));
        }

        let request = &response.request;
        let holds_index = state
            .oracles
            .get(account)
            .map(|indexes| indexes.contains(request.index))
            .unwrap_or(false);
        if !holds_index {
            return Err(LedgerError::Rejected(
                "index does not match oracle request".to_string(),
            ));
        }
        if !state.open_requests.contains(request) {
            return Err(LedgerError::Rejected(
                "flight or timestamp do not match oracle request".to_string(),
            ));
        }

        let tally = state.responses.entry(request.clone()).or_default();
        if tally.values().any(|oracles| oracles.contains(account)) {
            return Err(LedgerError::Rejected(format!("{account} already responded")));
        }
        let voters = tally.entry(response.verdict).or_default();
        voters.push(account.clone());
        let reached = voters.len() == MIN_RESPONSES;
        let responders = voters.clone();

        let history_capacity = state.history_capacity;
        LedgerState::remember(
            &mut state.accepted,
            history_capacity,
            AcceptedResponse {
                oracle: account.clone(),
                request: request.clone(),
                verdict: response.verdict,
                quorum_size: response.quorum_size,
            },
        );

        if reached {
            info!(
                request_index = %request.index,
                flight = %request.flight,
                verdict = response.verdict.label(),
                "simulated ledger accepted flight status"
            );
            LedgerState::remember(
                &mut state.outcomes,
                history_capacity,
                FlightOutcome {
                    request: request.clone(),
                    verdict: response.verdict,
                    responders,
                },
            );
        }

        Ok(state.next_tx())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(index: u8) -> StatusRequest {
        StatusRequest {
            index: Index(index),
            airline: SimulatedLedger::account(1),
            flight: "ND1309".to_string(),
            timestamp: 1_600_000_000,
        }
    }

    fn response(index: u8, verdict: StatusVerdict) -> StatusResponse {
        StatusResponse {
            request: request(index),
            verdict,
            quorum_size: 3,
        }
    }

    #[tokio::test]
    async fn registration_charges_the_fee_and_assigns_distinct_indexes() {
        let ledger = SimulatedLedger::new(2).with_seed(7);
        let oracle = SimulatedLedger::account(0);

        ledger
            .register_oracle(&oracle, DEFAULT_REGISTRATION_FEE)
            .await
            .unwrap();

        let indexes = ledger.get_assigned_indexes(&oracle).await.unwrap();
        let mut values: Vec<u8> = indexes.as_slice().iter().map(|index| index.0).collect();
        values.sort_unstable();
        values.dedup();
        assert_eq!(values.len(), INDEXES_PER_ORACLE);
        assert!(values.iter().all(|value| *value <= MAX_INDEX));
        assert_eq!(
            ledger.balance(&oracle).await,
            STARTING_BALANCE - DEFAULT_REGISTRATION_FEE
        );
    }

    #[tokio::test]
    async fn registration_rejects_low_fees_and_duplicates() {
        let ledger = SimulatedLedger::new(1);
        let oracle = SimulatedLedger::account(0);

        let low = ledger.register_oracle(&oracle, 1).await.unwrap_err();
        assert!(matches!(low, LedgerError::InsufficientFee { .. }));

        ledger
            .register_oracle(&oracle, DEFAULT_REGISTRATION_FEE)
            .await
            .unwrap();
        let duplicate = ledger
            .register_oracle(&oracle, DEFAULT_REGISTRATION_FEE)
            .await
            .unwrap_err();
        assert!(matches!(duplicate, LedgerError::AlreadyRegistered(_)));
    }

    #[tokio::test]
    async fn majority_of_identical_responses_settles_the_status() {
        let oracles: Vec<AccountHandle> = (0..4).map(SimulatedLedger::account).collect();
        let mut ledger = SimulatedLedger::new(4);
        for oracle in &oracles {
            ledger = ledger.with_registered_oracle(oracle, [5, 6, 7]);
        }
        ledger.request_status(request(5)).await;

        ledger
            .submit_status_response(&oracles[0], &response(5, StatusVerdict::OnTime))
            .await
            .unwrap();
        for oracle in &oracles[1..] {
            ledger
                .submit_status_response(oracle, &response(5, StatusVerdict::LateAirline))
                .await
                .unwrap();
        }

        let outcomes = ledger.outcomes().await;
        assert_eq!(outcomes.len(), 1);
        assert_eq!(outcomes[0].verdict, StatusVerdict::LateAirline);
        assert_eq!(outcomes[0].responders, oracles[1..].to_vec());
    }

    #[tokio::test]
    async fn responses_from_unselected_or_repeating_oracles_are_rejected() {
        let oracle = SimulatedLedger::account(0);
        let ledger = SimulatedLedger::new(1).with_registered_oracle(&oracle, [1, 2, 3]);
        ledger.request_status(request(3)).await;

        let wrong_index = ledger
            .submit_status_response(&oracle, &response(4, StatusVerdict::Unknown))
            .await
            .unwrap_err();
        assert!(matches!(wrong_index, LedgerError::Rejected(_)));

        ledger
            .submit_status_response(&oracle, &response(3, StatusVerdict::Unknown))
            .await
            .unwrap();
        let repeat = ledger
            .submit_status_response(&oracle, &response(3, StatusVerdict::Unknown))
            .await
            .unwrap_err();
        assert!(matches!(repeat, LedgerError::Rejected(_)));
    }

    #[tokio::test]
    async fn the_oldest_requests_and_history_are_dropped_at_capacity() {
        let oracle = SimulatedLedger::account(0);
        let ledger = SimulatedLedger::new(1)
            .with_registered_oracle(&oracle, [1, 2, 3])
            .with_retention(2, 2);
        for index in 1..=3 {
            ledger.request_status(request(index)).await;
        }

        let closed = ledger
            .submit_status_response(&oracle, &response(1, StatusVerdict::OnTime))
            .await
            .unwrap_err();
        assert!(matches!(closed, LedgerError::Rejected(_)));

        for index in [2, 3] {
            ledger
                .submit_status_response(&oracle, &response(index, StatusVerdict::OnTime))
                .await
                .unwrap();
        }
        ledger.request_status(request(1)).await;
        ledger
            .submit_status_response(&oracle, &response(1, StatusVerdict::OnTime))
            .await
            .unwrap();

        let accepted: Vec<Index> = ledger
            .accepted_responses()
            .await
            .iter()
            .map(|response| response.request.index)
            .collect();
        assert_eq!(accepted, vec![Index(3), Index(1)]);
    }

    #[tokio::test]
    async fn the_request_subscription_can_only_be_taken_once() {
        let ledger = SimulatedLedger::new(1);
        let mut requests = ledger.subscribe_status_requests().await.unwrap();
        assert!(matches!(
            ledger.subscribe_status_requests().await,
            Err(LedgerError::AlreadySubscribed)
        ));

        ledger.request_status(request(2)).await;
        assert_eq!(requests.next().await.unwrap().unwrap(), request(2));
    }
}
