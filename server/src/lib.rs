//! FlightSurety Oracle Relay Library
//!
//! Registers a pool of oracle identities with the FlightSurety app contract
//! and answers its flight status requests on their behalf.

pub mod app_state;
pub mod config;
pub mod error;
pub mod handlers;
pub mod ledger;
pub mod models;
pub mod routes;
pub mod services;
