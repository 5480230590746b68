//! API handlers for the oracle relay

pub mod oracle;

pub use oracle::{api_banner, health_check, list_oracles, relay_stats, root};
