//! Oracle registration, status resolution and the consensus relay

pub mod registry;
pub mod relay;
pub mod resolver;
pub mod stats;
pub mod tracker;

pub use registry::{OracleRegistry, RegistrationMode, RegistryOptions, RegistrySnapshot};
pub use relay::{ConsensusRelay, DispatchReport, RelayOptions, RequestOutcome};
pub use resolver::{DepartureTimePolicy, StatusPolicy};
pub use stats::{RelayStats, RelayStatsSnapshot};
