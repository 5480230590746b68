//! Data models for the oracle relay

use serde::Serialize;

pub mod flight;
pub mod oracle;
pub mod submission;

pub use flight::{StatusRequest, StatusResponse, StatusVerdict};
pub use oracle::{AccountHandle, Identity, IdentityStatus, Index, IndexSet, INDEXES_PER_ORACLE};
pub use submission::{SubmissionOutcome, SubmissionRecord};

/// API response wrapper
#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    pub error: Option<String>,
}

impl<T> ApiResponse<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }
}
