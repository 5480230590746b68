use std::collections::{HashMap, VecDeque};

use crate::models::{
    AccountHandle, Identity, StatusRequest, StatusVerdict, SubmissionOutcome, SubmissionRecord,
};

/// Remembers which oracles already answered which request.
///
/// Holds the most recent `capacity` requests; older ones are forgotten in
/// arrival order.
#[derive(Debug)]
pub struct SubmissionTracker {
    capacity: usize,
    arrival: VecDeque<StatusRequest>,
    records: HashMap<StatusRequest, Vec<SubmissionRecord>>,
}

impl SubmissionTracker {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            arrival: VecDeque::new(),
            records: HashMap::new(),
        }
    }

    /// Opens a pending record for every matched identity that has not
    /// answered `request` yet. Returns those identities and the number
    /// skipped as repeats.
    pub fn claim(
        &mut self,
        request: &StatusRequest,
        matched: &[Identity],
        verdict: StatusVerdict,
    ) -> (Vec<Identity>, usize) {
        if !self.records.contains_key(request) {
            if self.arrival.len() == self.capacity {
                if let Some(oldest) = self.arrival.pop_front() {
                    self.records.remove(&oldest);
                }
            }
            self.arrival.push_back(request.clone());
        }

        let records = self.records.entry(request.clone()).or_default();
        let mut fresh = Vec::with_capacity(matched.len());
        let mut repeats = 0;

        for identity in matched {
            if records.iter().any(|record| record.oracle == identity.account) {
                repeats += 1;
                continue;
            }
            records.push(SubmissionRecord::pending(
                request.index,
                identity.account.clone(),
                verdict,
            ));
            fresh.push(identity.clone());
        }

        (fresh, repeats)
    }

    pub fn settle(&mut self, request: &StatusRequest, oracle: &AccountHandle, outcome: SubmissionOutcome) {
        if let Some(record) = self
            .records
            .get_mut(request)
            .and_then(|records| records.iter_mut().find(|record| &record.oracle == oracle))
        {
            record.settle(outcome);
        }
    }

    pub fn records(&self, request: &StatusRequest) -> &[SubmissionRecord] {
        self.records
            .get(request)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// Failed submissions a retry policy would be allowed to resend.
    pub fn retry_candidates(&self) -> impl Iterator<Item = (&StatusRequest, &SubmissionRecord)> {
        self.arrival.iter().flat_map(move |request| {
            self.records(request)
                .iter()
                .filter(|record| record.is_retry_candidate())
                .map(move |record| (request, record))
        })
    }

    pub fn tracked_requests(&self) -> usize {
        self.arrival.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{IdentityStatus, Index, IndexSet};

    fn identity(n: u8) -> Identity {
        Identity::new(
            AccountHandle::new(format!("0x{:040x}", n)),
            IndexSet::new([1, 2, 3]),
            IdentityStatus::Registered,
        )
    }

    fn request(flight: &str) -> StatusRequest {
        StatusRequest {
            index: Index(1),
            airline: AccountHandle::new("0x00000000000000000000000000000000000000aa"),
            flight: flight.to_string(),
            timestamp: 42,
        }
    }

    #[test]
    fn repeated_claims_only_return_new_identities() {
        let mut tracker = SubmissionTracker::new(8);
        let req = request("ND1309");

        let (fresh, repeats) = tracker.claim(&req, &[identity(1), identity(2)], StatusVerdict::Unknown);
        assert_eq!(fresh.len(), 2);
        assert_eq!(repeats, 0);

        let (fresh, repeats) = tracker.claim(
            &req,
            &[identity(1), identity(2), identity(3)],
            StatusVerdict::Unknown,
        );
        assert_eq!(fresh, vec![identity(3)]);
        assert_eq!(repeats, 2);
        assert_eq!(tracker.records(&req).len(), 3);
    }

    #[test]
    fn the_oldest_request_is_forgotten_at_capacity() {
        let mut tracker = SubmissionTracker::new(2);
        for flight in ["A1", "B2", "C3"] {
            tracker.claim(&request(flight), &[identity(1)], StatusVerdict::Unknown);
        }

        assert_eq!(tracker.tracked_requests(), 2);
        assert!(tracker.records(&request("A1")).is_empty());
        assert_eq!(tracker.records(&request("C3")).len(), 1);
    }

    #[test]
    fn only_retryable_failures_are_retry_candidates() {
        let mut tracker = SubmissionTracker::new(4);
        let req = request("ND1309");
        tracker.claim(&req, &[identity(1), identity(2), identity(3)], StatusVerdict::LateAirline);

        tracker.settle(&req, &identity(1).account, SubmissionOutcome::Confirmed { tx_hash: "0x1".into() });
        tracker.settle(
            &req,
            &identity(2).account,
            SubmissionOutcome::Failed { reason: "timed out".into(), retryable: true },
        );
        tracker.settle(
            &req,
            &identity(3).account,
            SubmissionOutcome::Failed { reason: "reverted".into(), retryable: false },
        );

        let candidates: Vec<_> = tracker.retry_candidates().collect();
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].1.oracle, identity(2).account);
    }
}
