//! Process configuration, read once at startup

pub mod relay;

pub use relay::{LedgerMode, RelayConfig};
