//! Consensus relay
//!
//! Pulls `OracleRequest` events one at a time, selects the registered
//! identities holding the request index, resolves a single verdict, and
//! sends it under every selected identity. Submissions for one request run
//! concurrently on a bounded pool and are awaited up to a per-request
//! deadline; the next event is not pulled until the fan-out has settled.
//!
//! The contract decides whether a majority was reached. The relay's part in
//! a request ends once every selected identity has had its attempt.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures_util::StreamExt;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::{timeout_at, Instant};
use tracing::{error, info, info_span, warn, Instrument};

use crate::error::{LedgerError, SubmissionError};
use crate::ledger::{LedgerClient, TxConfirmation};
use crate::models::{
    AccountHandle, Identity, StatusRequest, StatusResponse, StatusVerdict, SubmissionOutcome,
    SubmissionRecord,
};
use crate::services::registry::RegistrySnapshot;
use crate::services::resolver::StatusPolicy;
use crate::services::stats::RelayStats;
use crate::services::tracker::SubmissionTracker;

#[derive(Debug, Clone)]
pub struct RelayOptions {
    /// Deadline for all submissions of one request.
    pub request_timeout: Duration,
    /// Submissions in flight at once, across all identities.
    pub max_concurrent_submissions: usize,
    /// Requests remembered for duplicate suppression.
    pub tracked_requests: usize,
}

impl Default for RelayOptions {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(30),
            max_concurrent_submissions: 16,
            tracked_requests: 1024,
        }
    }
}

/// What became of one request.
#[derive(Debug)]
pub enum RequestOutcome {
    /// The registry is empty; the request was observed and left alone.
    NoIdentities,
    /// No registered identity holds the request index.
    ZeroMatch,
    /// Every selected identity already answered this request.
    AlreadyAnswered { suppressed: usize },
    Dispatched(DispatchReport),
}

#[derive(Debug)]
pub struct DispatchReport {
    pub verdict: StatusVerdict,
    pub quorum_size: usize,
    /// Selected identities skipped because they already answered.
    pub suppressed: usize,
    pub confirmed: Vec<(AccountHandle, TxConfirmation)>,
    pub errors: Vec<SubmissionError>,
}

pub struct ConsensusRelay {
    ledger: Arc<dyn LedgerClient>,
    registry: RegistrySnapshot,
    policy: Arc<dyn StatusPolicy>,
    options: RelayOptions,
    permits: Arc<Semaphore>,
    tracker: SubmissionTracker,
    stats: Arc<RelayStats>,
}

impl ConsensusRelay {
    pub fn new(
        ledger: Arc<dyn LedgerClient>,
        registry: RegistrySnapshot,
        policy: Arc<dyn StatusPolicy>,
        options: RelayOptions,
        stats: Arc<RelayStats>,
    ) -> Self {
        let permits = Arc::new(Semaphore::new(options.max_concurrent_submissions.max(1)));
        let tracker = SubmissionTracker::new(options.tracked_requests);
        Self {
            ledger,
            registry,
            policy,
            options,
            permits,
            tracker,
            stats,
        }
    }

    /// Consumes the request subscription until it ends.
    ///
    /// Only a failure to subscribe is returned; everything that goes wrong
    /// with an individual event or submission is logged and counted.
    pub async fn run(&mut self) -> Result<(), LedgerError> {
        let mut requests = self.ledger.subscribe_status_requests().await?;

        if self.registry.is_empty() {
            warn!("no oracle identities registered; requests will be observed but not answered");
        }
        info!(oracles = self.registry.len(), "consensus relay listening for oracle requests");

        while let Some(event) = requests.next().await {
            match event {
                Ok(request) => {
                    self.process_request(request).await;
                }
                Err(err) => {
                    self.stats.record_decode_failure();
                    error!(error = %err, "could not decode oracle request event; skipping it");
                }
            }
        }

        warn!("oracle request subscription ended");
        Ok(())
    }

    pub async fn process_request(&mut self, request: StatusRequest) -> RequestOutcome {
        let span = info_span!(
            "oracle_request",
            request_index = %request.index,
            airline = %request.airline,
            flight = %request.flight,
            timestamp = request.timestamp,
        );
        self.handle_request(request).instrument(span).await
    }

    async fn handle_request(&mut self, request: StatusRequest) -> RequestOutcome {
        self.stats.record_request();
        info!("oracle request received");

        if self.registry.is_empty() {
            self.stats.record_without_identities();
            warn!("oracle request observed with an empty registry; nothing submitted");
            return RequestOutcome::NoIdentities;
        }

        let matched: Vec<Identity> = self.registry.matching(request.index).cloned().collect();
        if matched.is_empty() {
            self.stats.record_zero_match();
            info!("no registered oracle holds this index; nothing to submit");
            return RequestOutcome::ZeroMatch;
        }

        let quorum_size = matched.len();
        let verdict = self.policy.resolve(request.timestamp, Utc::now());

        let (fresh, suppressed) = self.tracker.claim(&request, &matched, verdict);
        if suppressed > 0 {
            self.stats.record_duplicates(suppressed);
            warn!(suppressed, "oracles already answered this request; not resubmitting");
        }
        if fresh.is_empty() {
            return RequestOutcome::AlreadyAnswered { suppressed };
        }

        info!(
            verdict = verdict.label(),
            quorum_size,
            submitting = fresh.len(),
            "dispatching oracle responses"
        );

        let response = StatusResponse {
            request,
            verdict,
            quorum_size,
        };
        let (confirmed, errors) = self.dispatch(&response, fresh).await;

        info!(
            confirmed = confirmed.len(),
            failed = errors.len(),
            "oracle request handled"
        );

        RequestOutcome::Dispatched(DispatchReport {
            verdict,
            quorum_size,
            suppressed,
            confirmed,
            errors,
        })
    }

    async fn dispatch(
        &mut self,
        response: &StatusResponse,
        identities: Vec<Identity>,
    ) -> (Vec<(AccountHandle, TxConfirmation)>, Vec<SubmissionError>) {
        let request = &response.request;
        let shared = Arc::new(response.clone());
        let mut outstanding: BTreeSet<AccountHandle> = BTreeSet::new();
        let mut tasks = JoinSet::new();

        for identity in identities {
            let ledger = Arc::clone(&self.ledger);
            let permits = Arc::clone(&self.permits);
            let response = Arc::clone(&shared);
            outstanding.insert(identity.account.clone());

            tasks.spawn(async move {
                let oracle = identity.account;
                let result = match permits.acquire_owned().await {
                    Ok(_permit) => ledger.submit_status_response(&oracle, &response).await,
                    Err(_) => Err(LedgerError::Rejected("submission pool closed".to_string())),
                };
                (oracle, result)
            });
        }

        let deadline = Instant::now() + self.options.request_timeout;
        let mut confirmed = Vec::new();
        let mut errors = Vec::new();
        let mut timed_out = false;

        loop {
            match timeout_at(deadline, tasks.join_next()).await {
                Ok(Some(Ok((oracle, Ok(confirmation))))) => {
                    outstanding.remove(&oracle);
                    self.stats.record_confirmed();
                    info!(oracle = %oracle, tx_hash = %confirmation.tx_hash, "oracle response confirmed");
                    self.tracker.settle(
                        request,
                        &oracle,
                        SubmissionOutcome::Confirmed {
                            tx_hash: confirmation.tx_hash.clone(),
                        },
                    );
                    confirmed.push((oracle, confirmation));
                }
                Ok(Some(Ok((oracle, Err(source))))) => {
                    outstanding.remove(&oracle);
                    let err = SubmissionError::Rejected {
                        request_index: request.index,
                        oracle: oracle.clone(),
                        source,
                    };
                    self.record_failure(request, &err);
                    errors.push(err);
                }
                Ok(Some(Err(join_error))) => {
                    // the task's identity is recovered from `outstanding` below
                    error!(error = %join_error, "oracle submission task failed");
                }
                Ok(None) => break,
                Err(_) => {
                    timed_out = true;
                    tasks.abort_all();
                    break;
                }
            }
        }

        for oracle in outstanding {
            let err = if timed_out {
                SubmissionError::TimedOut {
                    request_index: request.index,
                    oracle,
                    timeout: self.options.request_timeout,
                }
            } else {
                SubmissionError::Aborted {
                    request_index: request.index,
                    oracle,
                    reason: "submission task ended without a result".to_string(),
                }
            };
            self.record_failure(request, &err);
            errors.push(err);
        }

        (confirmed, errors)
    }

    fn record_failure(&mut self, request: &StatusRequest, err: &SubmissionError) {
        match err {
            SubmissionError::TimedOut { .. } => self.stats.record_timed_out(),
            _ => self.stats.record_failed(),
        }
        error!(
            request_index = %err.request_index(),
            oracle = %err.oracle(),
            retryable = err.is_retryable(),
            error = %err,
            "oracle response not confirmed"
        );
        self.tracker.settle(
            request,
            err.oracle(),
            SubmissionOutcome::Failed {
                reason: err.to_string(),
                retryable: err.is_retryable(),
            },
        );
    }

    pub fn registry(&self) -> &RegistrySnapshot {
        &self.registry
    }

    pub fn submission_records(&self, request: &StatusRequest) -> &[SubmissionRecord] {
        self.tracker.records(request)
    }

    /// Failed submissions that could be resent. Nothing resends them
    /// automatically.
    pub fn retry_candidates(&self) -> Vec<(StatusRequest, SubmissionRecord)> {
        self.tracker
            .retry_candidates()
            .map(|(request, record)| (request.clone(), record.clone()))
            .collect()
    }
}
