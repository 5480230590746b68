use serde::{Deserialize, Serialize};

use crate::error::ResolverError;
use crate::models::oracle::{AccountHandle, Index};

/// Flight status codes understood by the app contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[repr(u8)]
pub enum StatusVerdict {
    Unknown = 0,
    OnTime = 10,
    LateAirline = 20,
    LateWeather = 30,
    LateTechnical = 40,
    LateOther = 50,
}

impl StatusVerdict {
    pub const ALL: [StatusVerdict; 6] = [
        StatusVerdict::Unknown,
        StatusVerdict::OnTime,
        StatusVerdict::LateAirline,
        StatusVerdict::LateWeather,
        StatusVerdict::LateTechnical,
        StatusVerdict::LateOther,
    ];

    pub fn code(self) -> u8 {
        self as u8
    }

    pub fn label(self) -> &'static str {
        match self {
            StatusVerdict::Unknown => "STATUS_CODE_UNKNOWN",
            StatusVerdict::OnTime => "STATUS_CODE_ON_TIME",
            StatusVerdict::LateAirline => "STATUS_CODE_LATE_AIRLINE",
            StatusVerdict::LateWeather => "STATUS_CODE_LATE_WEATHER",
            StatusVerdict::LateTechnical => "STATUS_CODE_LATE_TECHNICAL",
            StatusVerdict::LateOther => "STATUS_CODE_LATE_OTHER",
        }
    }
}

impl TryFrom<u8> for StatusVerdict {
    type Error = ResolverError;

    fn try_from(code: u8) -> Result<Self, Self::Error> {
        StatusVerdict::ALL
            .into_iter()
            .find(|verdict| verdict.code() == code)
            .ok_or(ResolverError::UnknownStatusCode(code))
    }
}

/// One `OracleRequest` event emitted by the app contract.
///
/// The four fields together are the contract's request key, so equal values
/// denote the same request.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StatusRequest {
    pub index: Index,
    pub airline: AccountHandle,
    pub flight: String,
    /// Scheduled departure, unix seconds.
    pub timestamp: u64,
}

/// What every matching oracle sends back for a single request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusResponse {
    pub request: StatusRequest,
    pub verdict: StatusVerdict,
    /// Size of the matched oracle set, fixed when the request arrived.
    pub quorum_size: usize,
}
