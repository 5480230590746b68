use serde::Serialize;

use crate::models::flight::StatusVerdict;
use crate::models::oracle::{AccountHandle, Index};

/// Where a single oracle's submission stands.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum SubmissionOutcome {
    Pending,
    Confirmed { tx_hash: String },
    Failed { reason: String, retryable: bool },
}

/// Bookkeeping for one oracle answering one request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SubmissionRecord {
    pub request_index: Index,
    pub oracle: AccountHandle,
    pub verdict: StatusVerdict,
    pub outcome: SubmissionOutcome,
}

impl SubmissionRecord {
    pub fn pending(request_index: Index, oracle: AccountHandle, verdict: StatusVerdict) -> Self {
        Self {
            request_index,
            oracle,
            verdict,
            outcome: SubmissionOutcome::Pending,
        }
    }

    pub fn is_confirmed(&self) -> bool {
        matches!(self.outcome, SubmissionOutcome::Confirmed { .. })
    }

    /// A failed submission that a retry policy would be allowed to resend.
    pub fn is_retry_candidate(&self) -> bool {
        matches!(self.outcome, SubmissionOutcome::Failed { retryable: true, .. })
    }

    /// Settles a pending record. Settled records are left untouched.
    pub fn settle(&mut self, outcome: SubmissionOutcome) -> bool {
        if self.outcome != SubmissionOutcome::Pending {
            return false;
        }
        self.outcome = outcome;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn confirmed_records_are_never_rewritten() {
        let mut record = SubmissionRecord::pending(
            Index(3),
            AccountHandle::new("0x0000000000000000000000000000000000000001"),
            StatusVerdict::LateAirline,
        );

        assert!(record.settle(SubmissionOutcome::Confirmed {
            tx_hash: "0xabc".to_string()
        }));
        assert!(!record.settle(SubmissionOutcome::Failed {
            reason: "late".to_string(),
            retryable: true
        }));
        assert!(record.is_confirmed());
        assert!(!record.is_retry_candidate());
    }
}
