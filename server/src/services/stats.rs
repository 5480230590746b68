use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Relay counters, shared with the HTTP API.
#[derive(Debug, Default)]
pub struct RelayStats {
    requests_received: AtomicU64,
    decode_failures: AtomicU64,
    zero_match_requests: AtomicU64,
    requests_without_identities: AtomicU64,
    duplicates_suppressed: AtomicU64,
    submissions_confirmed: AtomicU64,
    submissions_failed: AtomicU64,
    submissions_timed_out: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct RelayStatsSnapshot {
    pub requests_received: u64,
    pub decode_failures: u64,
    pub zero_match_requests: u64,
    pub requests_without_identities: u64,
    pub duplicates_suppressed: u64,
    pub submissions_confirmed: u64,
    pub submissions_failed: u64,
    pub submissions_timed_out: u64,
}

impl RelayStats {
    pub fn record_request(&self) {
        self.requests_received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_decode_failure(&self) {
        self.decode_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_zero_match(&self) {
        self.zero_match_requests.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_without_identities(&self) {
        self.requests_without_identities.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_duplicates(&self, count: usize) {
        self.duplicates_suppressed
            .fetch_add(count as u64, Ordering::Relaxed);
    }

    pub fn record_confirmed(&self) {
        self.submissions_confirmed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_failed(&self) {
        self.submissions_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_timed_out(&self) {
        self.submissions_timed_out.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> RelayStatsSnapshot {
        RelayStatsSnapshot {
            requests_received: self.requests_received.load(Ordering::Relaxed),
            decode_failures: self.decode_failures.load(Ordering::Relaxed),
            zero_match_requests: self.zero_match_requests.load(Ordering::Relaxed),
            requests_without_identities: self.requests_without_identities.load(Ordering::Relaxed),
            duplicates_suppressed: self.duplicates_suppressed.load(Ordering::Relaxed),
            submissions_confirmed: self.submissions_confirmed.load(Ordering::Relaxed),
            submissions_failed: self.submissions_failed.load(Ordering::Relaxed),
            submissions_timed_out: self.submissions_timed_out.load(Ordering::Relaxed),
        }
    }
}
